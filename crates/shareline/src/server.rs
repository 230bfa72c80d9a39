//! Shareline server
//!
//! Accepts TCP connections and runs a [`ConnectionHandler`] for each one on
//! its own task. The user directory, session table, path resolver and audit
//! log are shared by every connection through [`SharedState`].

use crate::audit::AuditLog;
use crate::handler::ConnectionHandler;
use crate::path::PathResolver;
use crate::session::SessionManager;
use crate::transport::Transport;
use crate::users::{UserDirectory, UserStore};
use crate::{Config, Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Services shared by all connections
pub struct SharedState {
    /// Known users
    pub users: Arc<dyn UserDirectory>,
    /// Session slots
    pub sessions: SessionManager,
    /// Shared root confinement
    pub resolver: PathResolver,
    /// INFO audit sink
    pub audit: AuditLog,
}

/// Shareline server
pub struct Server {
    config: Config,
    shared: Arc<SharedState>,
}

impl Server {
    /// Create a server for `config` serving the users in `users`
    ///
    /// The shared directory is canonicalized and the audit log opened here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the shared directory or audit log cannot
    /// be used, or the directory has no users.
    pub async fn new(config: Config, users: UserStore) -> Result<Self> {
        if users.is_empty() {
            return Err(Error::Config("No users configured".to_string()));
        }

        let resolver = PathResolver::for_directory(&config.root_dir)?;
        let audit = match &config.audit_log {
            Some(path) => AuditLog::open(path).await?,
            None => AuditLog::disabled(),
        };

        let users: Arc<dyn UserDirectory> = Arc::new(users);
        let sessions = SessionManager::new(Arc::clone(&users), config.max_sessions);

        info!(
            event = "server_initialized",
            root = resolver.root(),
            users = users.users().len(),
            max_sessions = config.max_sessions,
            audit_log = ?audit.path(),
            "Server initialized"
        );

        Ok(Self {
            config,
            shared: Arc::new(SharedState {
                users,
                sessions,
                resolver,
                audit,
            }),
        })
    }

    /// Load users from `config.users_file` and create the server
    ///
    /// # Errors
    ///
    /// See [`Server::new`] and [`UserStore::from_file`].
    pub async fn from_config(config: Config) -> Result<Self> {
        let users = UserStore::from_file(&config.users_file)?;
        Self::new(config, users).await
    }

    /// State handed to every connection
    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Bind the listening socket
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the address cannot be bound.
    pub async fn bind(self) -> Result<Listening> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Connection(format!("Failed to bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        info!(
            event = "server_listening",
            address = %local_addr,
            "Listening for connections"
        );

        Ok(Listening {
            listener,
            local_addr,
            shared: self.shared,
        })
    }

    /// Bind and serve until the listener fails
    ///
    /// # Errors
    ///
    /// See [`Server::bind`] and [`Listening::serve`].
    pub async fn run(self) -> Result<()> {
        self.bind().await?.serve().await
    }
}

/// A bound server, ready to accept connections
pub struct Listening {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<SharedState>,
}

impl Listening {
    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever, one task per connection
    ///
    /// # Errors
    ///
    /// Runs until the task is dropped; accept errors are logged and the loop
    /// continues.
    pub async fn serve(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(event = "set_nodelay_failed", peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let handler = ConnectionHandler::new(Transport::from_tcp(stream), Arc::clone(&self.shared));
                    tokio::spawn(async move {
                        let connection_id = handler.connection_id().to_string();
                        if let Err(e) = handler.run().await {
                            error!(
                                event = "connection_error",
                                connection_id,
                                peer = %peer,
                                error = %e,
                                "Error handling client"
                            );
                        }
                    });
                }
                Err(e) => {
                    error!(event = "accept_failed", error = %e, "Error accepting connection");
                }
            }
        }
    }
}
