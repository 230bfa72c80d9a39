//! Per-connection command state machine
//!
//! NIST 800-53: AC-3 (Access Enforcement), AU-12 (Audit Generation)
//!
//! A connection starts at user selection, moves to the command loop once a
//! session is bound, and ends on `EXIT`, on a failed login or when the peer
//! closes the stream. A failed `SWITCH` keeps the loop running without a
//! session; commands that need one are refused until a later `SWITCH`
//! succeeds.

use crate::audit::{AuditEvent, AuditRecord};
use crate::cipher::CipherContext;
use crate::path::FileAttributes;
use crate::protocol::{self, CHUNK_SIZE, Command, GOODBYE, GetHeader, Listing, MAX_LINE, PAYLOAD_TRAILER};
use crate::server::SharedState;
use crate::session::{Session, SessionHandle};
use crate::transport::Transport;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

/// Upper bound for a single filesystem call
const FILE_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// User menu sent, waiting for a selection
    AwaitingUserSelection,
    /// In the command loop
    Authenticated,
    /// Connection finished
    Terminated,
}

/// Serves one client connection
pub struct ConnectionHandler<S = TcpStream> {
    transport: Transport<S>,
    shared: Arc<SharedState>,
    connection_id: String,
    state: ConnectionState,
    session: Option<SessionHandle>,
    started: DateTime<Utc>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Handler for a freshly accepted connection
    pub fn new(transport: Transport<S>, shared: Arc<SharedState>) -> Self {
        Self {
            transport,
            shared,
            connection_id: uuid::Uuid::new_v4().to_string(),
            state: ConnectionState::AwaitingUserSelection,
            session: None,
            started: Utc::now(),
        }
    }

    /// Unique id used in logs and audit events
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the connection to completion
    ///
    /// The bound session, if any, is released before returning.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn run(mut self) -> Result<()> {
        AuditEvent::ConnectionEstablished {
            connection_id: self.connection_id.clone(),
            peer: self.transport.peer_addr(),
            timestamp: self.started,
        }
        .log();

        let result = self.drive().await;

        let username = self.session.take().map(|handle| handle.username().to_string());
        AuditEvent::ConnectionClosed {
            connection_id: self.connection_id.clone(),
            username,
            timestamp: Utc::now(),
            duration_secs: Utc::now().signed_duration_since(self.started).num_seconds(),
        }
        .log();

        result
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            self.state = match self.state {
                ConnectionState::AwaitingUserSelection => self.login().await?,
                ConnectionState::Authenticated => self.command().await?,
                ConnectionState::Terminated => return Ok(()),
            };
        }
    }

    async fn login(&mut self) -> Result<ConnectionState> {
        let menu = protocol::user_menu(self.shared.users.users());
        self.transport.send_str(&menu).await?;

        let Some(selection) = self.transport.recv_line(MAX_LINE).await? else {
            return Ok(ConnectionState::Terminated);
        };

        match self.bind(&selection) {
            Ok(handle) => {
                let banner = protocol::auth_banner(handle.username(), handle.key_size());
                AuditEvent::AuthAttempt {
                    connection_id: self.connection_id.clone(),
                    selection,
                    username: Some(handle.username().to_string()),
                    timestamp: Utc::now(),
                    success: true,
                    reason: None,
                }
                .log();
                self.session = Some(handle);
                self.transport.send_str(&banner).await?;
                Ok(ConnectionState::Authenticated)
            }
            Err(e) => {
                self.audit_bind_failure(&selection, &e);
                let message = match e {
                    Error::CapacityExhausted(_) => "Too many active sessions",
                    _ => "Invalid user",
                };
                self.reply_error(message).await?;
                Ok(ConnectionState::Terminated)
            }
        }
    }

    async fn command(&mut self) -> Result<ConnectionState> {
        let menu = protocol::main_menu(self.shared.resolver.root());
        self.transport.send_str(&menu).await?;

        let Some(line) = self.transport.recv_line(MAX_LINE).await? else {
            return Ok(ConnectionState::Terminated);
        };

        let command = Command::parse(&line);
        debug!(
            event = "command_received",
            connection_id = %self.connection_id,
            command = command.name(),
            "Received command"
        );

        match command {
            Command::Exit => {
                self.transport.send_str(GOODBYE).await?;
                return Ok(ConnectionState::Terminated);
            }
            Command::Switch => return self.switch().await,
            Command::Unknown => self.reply_error("Unknown command").await?,
            Command::List(_) | Command::Get(_) | Command::Info(_) => {
                let Some(session) = self.session.as_ref().map(|h| Arc::clone(h.session())) else {
                    self.reply_error(Error::NotAuthenticated.wire_message()).await?;
                    return Ok(ConnectionState::Authenticated);
                };
                match command {
                    Command::List(subdir) => self.list(&session, subdir).await?,
                    Command::Get(file) => self.get(&session, file).await?,
                    Command::Info(file) => self.info(&session, file).await?,
                    _ => {}
                }
            }
        }

        Ok(ConnectionState::Authenticated)
    }

    async fn list(&mut self, session: &Session, subdir: Option<&str>) -> Result<()> {
        let (dir, shown) = match subdir {
            Some(sub) => match self.shared.resolver.validate(sub) {
                Ok(resolved) => (PathBuf::from(resolved), sub.to_string()),
                Err(e) => {
                    self.audit_security(session, "path_rejected", &e);
                    return self.reply_error(e.wire_message()).await;
                }
            },
            None => (PathBuf::from(self.shared.resolver.root()), String::from(".")),
        };

        let listing = match timeout(FILE_OP_TIMEOUT, read_listing(&dir)).await {
            Ok(Ok(listing)) => listing,
            Ok(Err(e)) => {
                self.audit_directory(session, &shown, 0, Some(&e.to_string()));
                return self.reply_error("Cannot list directory").await;
            }
            Err(_) => {
                self.audit_directory(session, &shown, 0, Some("timed out"));
                return self.reply_error("Cannot list directory").await;
            }
        };

        if listing.is_truncated() {
            debug!(
                event = "listing_truncated",
                connection_id = %self.connection_id,
                entries = listing.entries(),
                "Listing reached the response limit"
            );
        }
        self.audit_directory(session, &shown, listing.entries(), None);
        self.transport.send_str(&listing.finish()).await
    }

    async fn get(&mut self, session: &Session, file: &str) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let resolver = &shared.resolver;
        let resolved = match resolver.resolve(file) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.audit_security(session, "path_rejected", &e);
                return self.reply_error(e.wire_message()).await;
            }
        };

        // The path state is shared by every connection bound to this user;
        // the checks below read back whatever is stored at that moment.
        session.set_current_path(resolved);
        let current = session.current_path();

        let target_ok = resolver.is_within(&current)
            && matches!(fs::metadata(&current).await, Ok(meta) if !meta.is_dir());
        if !target_ok {
            let e = Error::AccessDenied(file.to_string());
            self.audit_security(session, "access_denied", &e);
            return self.reply_error(e.wire_message()).await;
        }
        session.mark_validated();

        let result = self.send_file(session, file, Path::new(&current)).await;
        session.reset_validation();
        result
    }

    async fn send_file(&mut self, session: &Session, file: &str, path: &Path) -> Result<()> {
        let Ok(attrs) = FileAttributes::read(path).await else {
            self.audit_file(session, "GET", file, None, Some("not accessible"));
            return self.reply_error("File not accessible").await;
        };
        if attrs.hidden || attrs.system {
            let e = Error::AccessDenied(file.to_string());
            self.audit_security(session, "protected_file", &e);
            return self.reply_error(e.wire_message()).await;
        }

        let handle = match timeout(FILE_OP_TIMEOUT, File::open(path)).await {
            Ok(Ok(handle)) => handle,
            _ => {
                self.audit_file(session, "GET", file, None, Some("open failed"));
                return self.reply_error("Cannot open file").await;
            }
        };

        let header = GetHeader {
            file: file.to_string(),
            key_size: session.key_size(),
            file_size: attrs.size,
        };
        let cipher = session.cipher();
        let preamble = protocol::encode_get_preamble(&header, cipher.map(CipherContext::iv));
        self.transport.send(&preamble).await?;

        let mut keystream = cipher.map(CipherContext::keystream);
        let mut reader = handle.take(attrs.size);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut sent: u64 = 0;
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(
                        event = "file_read_failed",
                        connection_id = %self.connection_id,
                        path = %path.display(),
                        error = %e,
                        "Read failed mid-transfer"
                    );
                    break;
                }
            };
            let data = &mut chunk[..n];
            if let Some(keystream) = keystream.as_mut() {
                keystream.apply(data);
            }
            self.transport.send(data).await?;
            sent += n as u64;
        }
        self.transport.send(PAYLOAD_TRAILER).await?;

        self.audit_file(session, "GET", file, Some(sent), None);
        Ok(())
    }

    async fn info(&mut self, session: &Session, file: &str) -> Result<()> {
        let resolved = match self.shared.resolver.validate(file) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.audit_security(session, "path_rejected", &e);
                return self.reply_error(e.wire_message()).await;
            }
        };

        let Ok(attrs) = FileAttributes::read(Path::new(&resolved)).await else {
            self.audit_file(session, "INFO", file, None, Some("not found"));
            return self.reply_error("File not found").await;
        };

        let record = AuditRecord::now(session.username(), "INFO", file);
        if let Err(e) = self.shared.audit.append(&record).await {
            warn!(
                event = "audit_write_failed",
                connection_id = %self.connection_id,
                error = %e,
                "Failed to append audit record"
            );
        }
        self.audit_file(session, "INFO", file, None, None);

        self.transport.send_str(&protocol::info_reply(file, &attrs)).await
    }

    async fn switch(&mut self) -> Result<ConnectionState> {
        let previous = self.session.take().map(|handle| handle.username().to_string());

        let menu = protocol::user_menu(self.shared.users.users());
        self.transport.send_str(&menu).await?;

        let Some(selection) = self.transport.recv_line(MAX_LINE).await? else {
            return Ok(ConnectionState::Terminated);
        };

        match self.bind(&selection) {
            Ok(handle) => {
                AuditEvent::SessionSwitch {
                    connection_id: self.connection_id.clone(),
                    from: previous,
                    to: Some(handle.username().to_string()),
                    timestamp: Utc::now(),
                    success: true,
                    reason: None,
                }
                .log();
                let banner = protocol::switch_banner(handle.username());
                self.session = Some(handle);
                self.transport.send_str(&banner).await?;
            }
            Err(e) => {
                AuditEvent::SessionSwitch {
                    connection_id: self.connection_id.clone(),
                    from: previous,
                    to: None,
                    timestamp: Utc::now(),
                    success: false,
                    reason: Some(e.to_string()),
                }
                .log();
                self.audit_bind_failure(&selection, &e);
                let message = match e {
                    Error::CapacityExhausted(_) => "Cannot create session",
                    _ => "Invalid user",
                };
                self.reply_error(message).await?;
            }
        }

        Ok(ConnectionState::Authenticated)
    }

    /// Resolve a menu selection and bind a session for it
    fn bind(&self, selection: &str) -> Result<SessionHandle> {
        let user = self
            .shared
            .users
            .resolve(selection)
            .ok_or_else(|| Error::UnknownUser(selection.to_string()))?;
        self.shared.sessions.acquire(user.username())
    }

    async fn reply_error(&mut self, message: &str) -> Result<()> {
        self.transport.send_str(&protocol::error_line(message)).await
    }

    fn audit_bind_failure(&self, selection: &str, error: &Error) {
        match error {
            Error::CapacityExhausted(capacity) => AuditEvent::CapacityExhausted {
                connection_id: self.connection_id.clone(),
                username: selection.to_string(),
                capacity: *capacity,
                timestamp: Utc::now(),
            }
            .log(),
            _ => AuditEvent::AuthAttempt {
                connection_id: self.connection_id.clone(),
                selection: selection.to_string(),
                username: None,
                timestamp: Utc::now(),
                success: false,
                reason: Some(error.to_string()),
            }
            .log(),
        }
    }

    fn audit_security(&self, session: &Session, event: &str, error: &Error) {
        AuditEvent::SecurityEvent {
            connection_id: self.connection_id.clone(),
            username: Some(session.username().to_string()),
            event: event.to_string(),
            details: error.to_string(),
            timestamp: Utc::now(),
        }
        .log();
    }

    fn audit_file(&self, session: &Session, operation: &str, path: &str, bytes: Option<u64>, error: Option<&str>) {
        AuditEvent::FileOperation {
            connection_id: self.connection_id.clone(),
            username: session.username().to_string(),
            operation: operation.to_string(),
            path: path.to_string(),
            timestamp: Utc::now(),
            success: error.is_none(),
            bytes_transferred: bytes,
            encrypted: session.cipher().is_some(),
            error: error.map(str::to_string),
        }
        .log();
    }

    fn audit_directory(&self, session: &Session, path: &str, entries: usize, error: Option<&str>) {
        AuditEvent::DirectoryOperation {
            connection_id: self.connection_id.clone(),
            username: session.username().to_string(),
            path: path.to_string(),
            timestamp: Utc::now(),
            success: error.is_none(),
            entries,
            error: error.map(str::to_string),
        }
        .log();
    }
}

/// Immediate entries of `dir`, in the order the filesystem returns them
async fn read_listing(dir: &Path) -> Result<Listing> {
    let mut entries = fs::read_dir(dir).await?;
    let mut listing = Listing::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "." || name == ".." {
            continue;
        }
        let metadata = match fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(_) => entry.metadata().await?,
        };
        let added = if metadata.is_dir() {
            listing.push_dir(&name)
        } else {
            listing.push_file(&name, metadata.len())
        };
        if !added {
            break;
        }
    }

    Ok(listing)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::path::PathResolver;
    use crate::session::SessionManager;
    use crate::users::{UserRecord, UserStore};
    use tempfile::TempDir;
    use tokio::io::{DuplexStream, duplex};

    async fn setup(capacity: usize) -> (TempDir, Arc<SharedState>) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let users = Arc::new(UserStore::new(vec![
            UserRecord::new("alice", &[1u8; 32]),
            UserRecord::new("bob", &[2u8; 32]),
        ]));
        let shared = Arc::new(SharedState {
            users: users.clone(),
            sessions: SessionManager::new(users, capacity),
            resolver: PathResolver::for_directory(dir.path()).unwrap(),
            audit: AuditLog::disabled(),
        });
        (dir, shared)
    }

    fn spawn(shared: Arc<SharedState>) -> (Transport<DuplexStream>, tokio::task::JoinHandle<Result<()>>) {
        let (client, server) = duplex(64 * 1024);
        let handler = ConnectionHandler::new(Transport::new(server), shared);
        (Transport::new(client), tokio::spawn(handler.run()))
    }

    async fn until_prompt(client: &mut Transport<DuplexStream>) -> String {
        let bytes = client
            .recv_until(protocol::PROMPT.as_bytes(), Duration::from_secs(2), 1 << 20)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[tokio::test]
    async fn test_login_then_exit() {
        let (_dir, shared) = setup(2).await;
        let (mut client, task) = spawn(shared.clone());

        let menu = until_prompt(&mut client).await;
        assert!(menu.contains("1 alice\r\n2 bob\r\n"));

        client.send(b"2\r\n").await.unwrap();
        let reply = until_prompt(&mut client).await;
        assert!(reply.contains("[+] Authenticated as: bob\r\n[+] Encryption key: 32 bytes"));
        assert!(reply.contains("===== MENU ====="));
        assert_eq!(shared.sessions.ref_count("bob"), 1);

        client.send(b"EXIT\n").await.unwrap();
        let bye = client.recv_all(Duration::from_secs(2), 1024).await.unwrap();
        assert_eq!(&bye[..], GOODBYE.as_bytes());

        task.await.unwrap().unwrap();
        assert_eq!(shared.sessions.ref_count("bob"), 0);
    }

    #[tokio::test]
    async fn test_invalid_login_terminates() {
        let (_dir, shared) = setup(2).await;
        let (mut client, task) = spawn(shared);

        until_prompt(&mut client).await;
        client.send(b"mallory\n").await.unwrap();
        let reply = client.recv_all(Duration::from_secs(2), 1024).await.unwrap();
        assert_eq!(&reply[..], b"ERROR: Invalid user\r\n");
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_capacity_reported_at_login() {
        let (_dir, shared) = setup(1).await;
        let held = shared.sessions.acquire("alice").unwrap();
        let (mut client, task) = spawn(shared);

        until_prompt(&mut client).await;
        client.send(b"bob\n").await.unwrap();
        let reply = client.recv_all(Duration::from_secs(2), 1024).await.unwrap();
        assert_eq!(&reply[..], b"ERROR: Too many active sessions\r\n");
        task.await.unwrap().unwrap();
        drop(held);
    }

    #[tokio::test]
    async fn test_list_and_unknown_command() {
        let (_dir, shared) = setup(2).await;
        let (mut client, task) = spawn(shared);

        until_prompt(&mut client).await;
        client.send(b"alice\n").await.unwrap();
        until_prompt(&mut client).await;

        client.send(b"LIST\n").await.unwrap();
        let reply = until_prompt(&mut client).await;
        assert!(reply.contains("[FILE] a.txt (5 bytes)\r\n"));
        assert!(reply.contains("[DIR] sub\r\n"));
        assert!(!reply.contains("[DIR] .\r\n"));

        client.send(b"LIST ../..\n").await.unwrap();
        assert!(until_prompt(&mut client).await.starts_with("ERROR: Invalid path\r\n"));

        client.send(b"DELETE a.txt\n").await.unwrap();
        assert!(until_prompt(&mut client).await.starts_with("ERROR: Unknown command\r\n"));

        // A bare line ending is an unknown command, not a disconnect
        client.send(b"\r\n").await.unwrap();
        assert!(until_prompt(&mut client).await.starts_with("ERROR: Unknown command\r\n"));
        client.send(b"LIST\n").await.unwrap();
        assert!(until_prompt(&mut client).await.contains("[FILE] a.txt (5 bytes)\r\n"));

        client.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_get_rejects_directory_and_hidden() {
        let (dir, shared) = setup(2).await;
        std::fs::write(dir.path().join(".secret"), b"x").unwrap();
        let (mut client, task) = spawn(shared.clone());

        until_prompt(&mut client).await;
        client.send(b"1\n").await.unwrap();
        until_prompt(&mut client).await;

        for request in ["GET sub\n", "GET .secret\n", "GET missing\n", "GET ../../etc/passwd\n"] {
            client.send(request.as_bytes()).await.unwrap();
            let reply = until_prompt(&mut client).await;
            assert!(reply.starts_with("ERROR: Access denied\r\n"), "{request}: {reply}");
        }

        let session = shared.sessions.acquire("alice").unwrap();
        assert!(!session.is_path_validated());
        drop(session);

        client.send(b"EXIT\n").await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_get_streams_encrypted_payload() {
        let (_dir, shared) = setup(2).await;
        let (mut client, task) = spawn(shared.clone());

        until_prompt(&mut client).await;
        client.send(b"alice\n").await.unwrap();
        until_prompt(&mut client).await;

        client.send(b"GET a.txt\n").await.unwrap();
        let frame = client
            .recv_frame(Duration::from_secs(2), 1 << 20, protocol::get_frame_end)
            .await
            .unwrap();
        let response = protocol::GetResponse::parse(&frame).unwrap();
        let header = response.header.unwrap();
        assert_eq!(header.file, "a.txt");
        assert_eq!(header.key_size, 32);
        assert_eq!(header.file_size, 5);

        let iv = response.iv.unwrap();
        let ctx = CipherContext::new(&[1u8; 32], Some(iv)).unwrap();
        assert_eq!(ctx.decrypt(&response.payload), b"hello");

        let session = shared.sessions.acquire("alice").unwrap();
        assert_eq!(session.cipher().unwrap().iv(), &iv);
        assert!(session.current_path().ends_with("a.txt"));
        assert!(!session.is_path_validated());
        drop(session);

        client.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_switch_guards_commands() {
        let (_dir, shared) = setup(2).await;
        let (mut client, task) = spawn(shared.clone());

        until_prompt(&mut client).await;
        client.send(b"alice\n").await.unwrap();
        until_prompt(&mut client).await;

        client.send(b"SWITCH\n").await.unwrap();
        let menu = until_prompt(&mut client).await;
        assert!(menu.contains("Choose your user:"));
        assert_eq!(shared.sessions.ref_count("alice"), 0);

        client.send(b"nobody\n").await.unwrap();
        assert!(until_prompt(&mut client).await.starts_with("ERROR: Invalid user\r\n"));

        for request in ["LIST\n", "GET a.txt\n", "INFO a.txt\n"] {
            client.send(request.as_bytes()).await.unwrap();
            assert!(until_prompt(&mut client).await.starts_with("ERROR: No active session\r\n"));
        }

        client.send(b"SWITCH\n").await.unwrap();
        until_prompt(&mut client).await;
        client.send(b"bob\n").await.unwrap();
        assert!(until_prompt(&mut client).await.starts_with("\r\n[+] Switched to: bob\r\n"));
        assert_eq!(shared.sessions.ref_count("bob"), 1);

        client.send(b"QUIT\n").await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(shared.sessions.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_switch_capacity_message() {
        let (_dir, shared) = setup(1).await;
        let (mut client, task) = spawn(shared.clone());

        until_prompt(&mut client).await;
        client.send(b"alice\n").await.unwrap();
        until_prompt(&mut client).await;

        client.send(b"SWITCH\n").await.unwrap();
        until_prompt(&mut client).await;
        // Another connection takes the only slot in between
        let other = shared.sessions.acquire("alice").unwrap();

        client.send(b"bob\n").await.unwrap();
        assert!(until_prompt(&mut client).await.starts_with("ERROR: Cannot create session\r\n"));

        drop(other);
        client.send(b"EXIT\n").await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_eof_during_login_ends_connection() {
        let (_dir, shared) = setup(1).await;
        let (mut client, task) = spawn(shared);
        until_prompt(&mut client).await;
        client.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_info_reply() {
        let (_dir, shared) = setup(1).await;
        let (mut client, task) = spawn(shared);

        until_prompt(&mut client).await;
        client.send(b"alice\n").await.unwrap();
        until_prompt(&mut client).await;

        client.send(b"INFO a.txt\n").await.unwrap();
        let reply = until_prompt(&mut client).await;
        assert!(reply.starts_with("\r\nFile: a.txt\r\nSize: 5 bytes\r\nModified: "));
        assert!(reply.contains("\r\nAttributes: "));

        client.send(b"INFO nope.txt\n").await.unwrap();
        assert!(until_prompt(&mut client).await.starts_with("ERROR: File not found\r\n"));

        client.send(b"EXIT\n").await.unwrap();
        task.await.unwrap().unwrap();
    }
}
