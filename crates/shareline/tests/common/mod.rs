//! Shared fixtures for integration tests
//!
//! Starts a real server on `127.0.0.1:0` over a temporary shared directory
//! holding `a.txt` ("hello") and an empty `sub/` directory.

#![allow(dead_code)]

use shareline::transport::Transport;
use shareline::{Client, ClientConfig, Config, Server, SharedState, UserRecord, UserStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const ALICE_KEY: [u8; 32] = [0x11; 32];
pub const BOB_KEY: [u8; 32] = [0x22; 32];

pub const WAIT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub dir: TempDir,
    pub addr: SocketAddr,
    pub shared: Arc<SharedState>,
    task: JoinHandle<shareline::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(10).await
    }

    pub async fn start_with(max_sessions: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let share = dir.path().join("share");
        std::fs::create_dir(&share).unwrap();
        std::fs::write(share.join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(share.join("sub")).unwrap();

        let users = UserStore::new(vec![
            UserRecord::new("alice", &ALICE_KEY),
            UserRecord::new("bob", &BOB_KEY),
            UserRecord::new("guest", &[]),
        ]);

        let config = Config {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            root_dir: share,
            max_sessions,
            audit_log: Some(dir.path().join("audit.log")),
            ..Config::default()
        };

        let server = Server::new(config, users).await.unwrap();
        let shared = Arc::clone(server.shared());
        let listening = server.bind().await.unwrap();
        let addr = listening.local_addr();
        let task = tokio::spawn(listening.serve());

        Self {
            dir,
            addr,
            shared,
            task,
        }
    }

    pub fn share(&self) -> PathBuf {
        self.dir.path().join("share")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.dir.path().join("audit.log")
    }

    /// Scratch directory for downloads
    pub fn downloads(&self) -> PathBuf {
        let path = self.dir.path().join("downloads");
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: self.addr.port(),
            prompt_timeout_ms: 2_000,
            transfer_timeout_ms: 5_000,
            ..ClientConfig::default()
        }
    }

    pub async fn client(&self) -> Client {
        Client::connect_with(self.client_config()).await.unwrap()
    }

    /// Client holding `key`, logged in as `user`
    pub async fn login(&self, user: &str, key: Option<&[u8]>) -> Client {
        let mut client = self.client().await;
        if let Some(key) = key {
            client.set_key(key).unwrap();
        }
        client.authenticate(user).await.unwrap();
        client
    }

    pub async fn raw(&self) -> Transport {
        Transport::connect("127.0.0.1", self.addr.port()).await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read through the next prompt as text
pub async fn until_prompt(transport: &mut Transport) -> String {
    let bytes = transport
        .recv_until(shareline::protocol::PROMPT.as_bytes(), WAIT, 1 << 20)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}
