//! # Shareline
//!
//! Multi-user file sharing over a line-oriented TCP protocol.
//!
//! A client picks one of the configured users from a menu, then lists,
//! inspects and downloads files below the server's shared directory.
//! Downloads for users with a key are XORed with a keyed stream cipher; the
//! companion client decrypts them when it holds the same key.
//!
//! ## Modules
//!
//! - [`cipher`]: keystream generator and per-session cipher context
//! - [`users`]: user directory loaded from TOML
//! - [`session`]: username-scoped session table with counted handles
//! - [`path`]: shared-root confinement and file attributes
//! - [`protocol`]: commands, menus and GET framing
//! - [`handler`]: per-connection server state machine
//! - [`server`]: listener and shared services
//! - [`client`]: protocol driver used by `shareline-client`
//! - [`transport`]: buffered stream reads shared by both sides
//!
//! The stream cipher provides no integrity and reuses one IV for every
//! download in a session. It obfuscates payloads; it does not protect them.

pub mod audit;
pub mod cipher;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod path;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod users;

pub use audit::{AuditEvent, AuditLog, AuditRecord};
pub use cipher::CipherContext;
pub use client::{Client, Download};
pub use config::{ClientConfig, Config, LogFormat, LoggingConfig};
pub use error::{Error, Result};
pub use path::PathResolver;
pub use server::{Listening, Server, SharedState};
pub use session::{SessionHandle, SessionManager};
pub use users::{UserDirectory, UserRecord, UserStore};
