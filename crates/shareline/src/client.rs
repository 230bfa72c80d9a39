//! Shareline client
//!
//! Drives the server's menus over one connection. Replies are read up to the
//! next `"> "` prompt; a timeout ends a read early and the text received so
//! far is used as the reply. Downloads are decrypted when a 32-byte key is
//! loaded and the server sent an IV.

use crate::cipher::{CipherContext, KEY_SIZE};
use crate::config::ClientConfig;
use crate::protocol::{self, AUTH_MARKER, Command, ERROR_PREFIX, GetResponse, MENU_MARKER, PROMPT};
use crate::transport::Transport;
use crate::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Outcome of a GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    /// Decrypted with the loaded key
    Decrypted {
        /// Output file
        path: PathBuf,
        /// Plaintext bytes written
        bytes: usize,
    },
    /// Encrypted payload saved as-is because no key is loaded
    Encrypted {
        /// Output file, with `.enc` appended
        path: PathBuf,
        /// Ciphertext bytes written
        bytes: usize,
    },
    /// The server sent the file without encryption
    Plain {
        /// Output file
        path: PathBuf,
        /// Bytes written
        bytes: usize,
    },
}

impl Download {
    /// Where the file was written
    pub fn path(&self) -> &Path {
        match self {
            Download::Decrypted { path, .. } | Download::Encrypted { path, .. } | Download::Plain { path, .. } => path,
        }
    }

    /// Payload size in bytes
    pub fn bytes(&self) -> usize {
        match self {
            Download::Decrypted { bytes, .. } | Download::Encrypted { bytes, .. } | Download::Plain { bytes, .. } => {
                *bytes
            }
        }
    }
}

/// Shareline client
pub struct Client<S = TcpStream> {
    transport: Transport<S>,
    config: ClientConfig,
    key: Option<Vec<u8>>,
    username: Option<String>,
    in_command_loop: bool,
}

impl Client<TcpStream> {
    /// Connect to a server with default settings
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the server cannot be reached.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with(ClientConfig {
            host: host.to_string(),
            port,
            ..ClientConfig::default()
        })
        .await
    }

    /// Connect using `config`, loading its key file if one is set
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration,
    /// [`Error::Connection`] if the server cannot be reached and
    /// [`Error::InvalidKey`] if the key file is not exactly 32 bytes.
    pub async fn connect_with(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        info!(event = "client_connecting", host = %config.host, port = config.port, "Connecting");

        let transport = Transport::connect(&config.host, config.port).await?;
        let key_file = config.key_file.clone();
        let mut client = Self::from_transport(transport, config);
        if let Some(path) = key_file {
            client.load_key(&path).await?;
        }
        Ok(client)
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected transport
    pub fn from_transport(transport: Transport<S>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            key: None,
            username: None,
            in_command_loop: false,
        }
    }

    /// Load a decryption key from a file of exactly 32 bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::InvalidKey`] if it has the wrong size.
    pub async fn load_key(&mut self, path: &Path) -> Result<()> {
        let key = tokio::fs::read(path).await?;
        self.set_key(&key)?;
        info!(
            event = "key_loaded",
            path = %path.display(),
            key_fingerprint = %crate::cipher::fingerprint(&key),
            "Loaded decryption key"
        );
        Ok(())
    }

    /// Use `key` for decryption
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] unless `key` is exactly 32 bytes.
    pub fn set_key(&mut self, key: &[u8]) -> Result<()> {
        if key.len() != KEY_SIZE {
            return Err(Error::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        self.key = Some(key.to_vec());
        Ok(())
    }

    /// Whether a decryption key is loaded
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// User currently bound on the server, if any
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Whether the server accepted a user selection
    pub fn is_authenticated(&self) -> bool {
        self.in_command_loop
    }

    /// Read the user menu sent on connect
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the server closes without a menu.
    pub async fn greeting(&mut self) -> Result<String> {
        self.read_reply().await
    }

    /// Answer the user menu with `selection` (index or username)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the server rejects the selection.
    pub async fn select_user(&mut self, selection: &str) -> Result<String> {
        self.send_line(selection).await?;
        let reply = self.read_reply().await?;

        if let Some(message) = protocol::error_message(&reply) {
            warn!(event = "authentication_rejected", selection, reply = message, "Server rejected user");
            return Err(Error::Authentication(message.to_string()));
        }
        if !reply.contains(AUTH_MARKER) && !reply.contains(MENU_MARKER) {
            return Err(Error::Authentication(format!("Unexpected reply: {}", reply.trim())));
        }

        let username = protocol::banner_username(&reply).unwrap_or(selection).to_string();
        info!(event = "authenticated", username = %username, "Authenticated");
        self.username = Some(username.clone());
        self.in_command_loop = true;
        Ok(username)
    }

    /// Read the user menu and select `username`
    ///
    /// # Errors
    ///
    /// See [`Client::greeting`] and [`Client::select_user`].
    pub async fn authenticate(&mut self, username: &str) -> Result<String> {
        self.greeting().await?;
        self.select_user(username).await
    }

    /// Directory listing of the shared root or `subdir`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] for an `ERROR:` reply and
    /// [`Error::NotAuthenticated`] before login.
    pub async fn list(&mut self, subdir: Option<&str>) -> Result<String> {
        self.text_command(Command::List(subdir)).await
    }

    /// Size, modification time and attributes of `file`
    ///
    /// # Errors
    ///
    /// See [`Client::list`].
    pub async fn info(&mut self, file: &str) -> Result<String> {
        self.text_command(Command::Info(file)).await
    }

    /// Download `file` to `output` (default: the last component of `file`)
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the server refused the request
    /// - [`Error::Protocol`] if the reply is malformed
    /// - [`Error::Io`] if the output cannot be written
    pub async fn get(&mut self, file: &str, output: Option<&Path>) -> Result<Download> {
        self.require_command_loop()?;
        self.send_line(&Command::Get(file).to_string()).await?;

        let frame = self
            .transport
            .recv_frame(
                self.config.transfer_timeout(),
                self.config.max_download_bytes,
                protocol::get_frame_end,
            )
            .await?;
        if frame.is_empty() {
            return Err(Error::Connection("Server closed the connection".to_string()));
        }
        let limit = self.config.max_download_bytes;
        if let Some(expected) =
            protocol::declared_frame_len(&frame).filter(|&end| end > frame.len() || end > limit)
        {
            return Err(self.abandon_download(file, expected, frame.len()).await);
        }

        let response = GetResponse::parse(&frame)?;
        // Menu sent after the file
        self.read_reply().await?;

        let output = output.map_or_else(|| default_output(file), Path::to_path_buf);
        self.store(file, response, output).await
    }

    /// Skip the unread part of a GET reply so the next command stays in sync
    async fn abandon_download(&mut self, file: &str, expected: usize, received: usize) -> Error {
        let limit = self.config.max_download_bytes;
        warn!(
            event = "download_abandoned",
            file,
            expected,
            received,
            limit,
            "Abandoning GET reply"
        );

        let remaining = expected.saturating_sub(received);
        match self.transport.discard(remaining, self.config.transfer_timeout()).await {
            Ok(skipped) if skipped == remaining => {}
            Ok(_) => return Error::Connection("Server stopped mid-transfer".to_string()),
            Err(e) => return e,
        }
        if let Err(e) = self.read_reply().await {
            return e;
        }

        if expected > limit {
            Error::protocol(format!("{file} exceeds the download limit of {limit} bytes"))
        } else {
            Error::protocol(format!("Truncated GET reply for {file}"))
        }
    }

    async fn store(&self, file: &str, response: GetResponse, output: PathBuf) -> Result<Download> {
        let bytes = response.payload.len();
        let download = match (response.iv, &self.key) {
            (Some(iv), Some(key)) => {
                let cipher = CipherContext::new(key, Some(iv))?;
                tokio::fs::write(&output, cipher.decrypt(&response.payload)).await?;
                Download::Decrypted { path: output, bytes }
            }
            (Some(_), None) => {
                let mut name = output.into_os_string();
                name.push(".enc");
                let path = PathBuf::from(name);
                write_payload(&path, &response.payload).await?;
                Download::Encrypted { path, bytes }
            }
            (None, _) => {
                write_payload(&output, &response.payload).await?;
                Download::Plain { path: output, bytes }
            }
        };

        info!(
            event = "download_complete",
            file,
            path = %download.path().display(),
            bytes,
            "Download complete"
        );
        Ok(download)
    }

    /// Send `SWITCH` and return the user menu
    ///
    /// The server releases the current session immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] before login.
    pub async fn begin_switch(&mut self) -> Result<String> {
        self.require_command_loop()?;
        self.send_line(&Command::Switch.to_string()).await?;
        self.username = None;
        self.read_reply().await
    }

    /// Answer the menu from [`Client::begin_switch`]
    ///
    /// On failure the connection stays usable without a session until the
    /// next successful switch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the server rejected the selection.
    pub async fn finish_switch(&mut self, selection: &str) -> Result<String> {
        self.send_line(selection).await?;
        let reply = self.read_reply().await?;

        if let Some(message) = protocol::error_message(&reply) {
            return Err(Error::Remote(message.to_string()));
        }
        let username = protocol::banner_username(&reply)
            .ok_or_else(|| Error::protocol(format!("Unexpected switch reply: {}", reply.trim())))?
            .to_string();

        info!(event = "switched_user", username = %username, "Switched user");
        self.username = Some(username);
        Ok(protocol::strip_menu(&reply).to_string())
    }

    /// Send `EXIT` and return the server's farewell
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn exit(&mut self) -> Result<String> {
        self.send_line(&Command::Exit.to_string()).await?;
        let reply = self
            .transport
            .recv_all(self.config.prompt_timeout(), self.config.max_response_bytes)
            .await?;
        self.in_command_loop = false;
        self.username = None;
        Ok(text(&reply))
    }

    async fn text_command(&mut self, command: Command<'_>) -> Result<String> {
        self.require_command_loop()?;
        self.send_line(&command.to_string()).await?;
        let reply = self.read_reply().await?;

        let body = protocol::strip_menu(&reply);
        if body.trim_start().starts_with(ERROR_PREFIX) {
            let message = protocol::error_message(body).unwrap_or(body.trim());
            return Err(Error::Remote(message.to_string()));
        }
        Ok(body.to_string())
    }

    fn require_command_loop(&self) -> Result<()> {
        if self.in_command_loop {
            Ok(())
        } else {
            Err(Error::NotAuthenticated)
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        debug!(event = "client_send", line, "Sending");
        self.transport.send_str(&format!("{}\n", line)).await
    }

    /// Read up to and including the next prompt
    async fn read_reply(&mut self) -> Result<String> {
        let reply = self
            .transport
            .recv_until(
                PROMPT.as_bytes(),
                self.config.prompt_timeout(),
                self.config.max_response_bytes,
            )
            .await?;
        if reply.is_empty() {
            self.in_command_loop = false;
            return Err(Error::Connection("Server closed the connection".to_string()));
        }
        Ok(text(&reply))
    }
}

impl<S> fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("username", &self.username)
            .field("has_key", &self.key.is_some())
            .finish_non_exhaustive()
    }
}

fn text(bytes: &Bytes) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

async fn write_payload(path: &Path, payload: &[u8]) -> Result<()> {
    tokio::fs::write(path, payload).await?;
    Ok(())
}

/// Last component of a requested name, accepting either separator
fn default_output(file: &str) -> PathBuf {
    let name = file
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty() && *part != "." && *part != "..")
        .unwrap_or("download.bin");
    PathBuf::from(name)
}
