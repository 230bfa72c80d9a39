//! Audit trail
//!
//! NIST 800-53: AU-2 (Audit Events), AU-3 (Content of Audit Records), AU-12 (Audit Generation)
//!
//! Two outputs: [`AuditEvent`] goes to the `tracing` pipeline with structured
//! fields, and [`AuditLog`] appends one plain text line per INFO request to
//! the audit file.

use crate::{Error, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AuditEvent {
    /// Connection accepted
    ConnectionEstablished {
        /// Connection identifier
        connection_id: String,
        /// Remote address
        peer: Option<SocketAddr>,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },
    /// Connection closed
    ConnectionClosed {
        /// Connection identifier
        connection_id: String,
        /// User bound when the connection closed
        username: Option<String>,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Connection duration in seconds
        duration_secs: i64,
    },
    /// User selection at login
    AuthAttempt {
        /// Connection identifier
        connection_id: String,
        /// Menu input as received
        selection: String,
        /// Resolved username, if any
        username: Option<String>,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Whether the operation succeeded
        success: bool,
        /// Failure reason
        reason: Option<String>,
    },
    /// SWITCH to another user
    SessionSwitch {
        /// Connection identifier
        connection_id: String,
        /// User released by the switch
        from: Option<String>,
        /// User selected, if any
        to: Option<String>,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Whether the operation succeeded
        success: bool,
        /// Failure reason
        reason: Option<String>,
    },
    /// GET or INFO
    FileOperation {
        /// Connection identifier
        connection_id: String,
        /// Authenticated user
        username: String,
        /// Command name (GET, INFO)
        operation: String,
        /// Path as requested
        path: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Whether the operation succeeded
        success: bool,
        /// Payload bytes sent
        bytes_transferred: Option<u64>,
        /// Whether the payload was encrypted
        encrypted: bool,
        /// Error message on failure
        error: Option<String>,
    },
    /// LIST
    DirectoryOperation {
        /// Connection identifier
        connection_id: String,
        /// Authenticated user
        username: String,
        /// Path as requested
        path: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Whether the operation succeeded
        success: bool,
        /// Entries listed
        entries: usize,
        /// Error message on failure
        error: Option<String>,
    },
    /// Rejected path, access denial
    SecurityEvent {
        /// Connection identifier
        connection_id: String,
        /// Username, if authenticated
        username: Option<String>,
        /// Event type
        event: String,
        /// Event details
        details: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },
    /// All session slots taken
    CapacityExhausted {
        /// Connection identifier
        connection_id: String,
        /// User that could not get a slot
        username: String,
        /// Configured number of session slots
        capacity: usize,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// Log the audit event
    ///
    /// NIST 800-53: AU-12 (Audit Generation)
    pub fn log(&self) {
        match self {
            AuditEvent::ConnectionEstablished {
                connection_id, peer, ..
            } => {
                info!(
                    event = "connection_established",
                    connection_id,
                    peer = ?peer,
                    "New connection established"
                );
            }
            AuditEvent::ConnectionClosed {
                connection_id,
                username,
                duration_secs,
                ..
            } => {
                info!(
                    event = "connection_closed",
                    connection_id,
                    username = ?username,
                    duration_secs,
                    "Connection closed"
                );
            }
            AuditEvent::AuthAttempt {
                connection_id,
                selection,
                username,
                success,
                reason,
                ..
            } => {
                if *success {
                    info!(
                        event = "auth_success",
                        connection_id,
                        username = ?username,
                        "User selected"
                    );
                } else {
                    warn!(
                        event = "auth_failure",
                        connection_id,
                        selection,
                        reason = ?reason,
                        "User selection rejected"
                    );
                }
            }
            AuditEvent::SessionSwitch {
                connection_id,
                from,
                to,
                success,
                reason,
                ..
            } => {
                if *success {
                    info!(
                        event = "session_switch",
                        connection_id,
                        from = ?from,
                        to = ?to,
                        "Switched user"
                    );
                } else {
                    warn!(
                        event = "session_switch_failed",
                        connection_id,
                        from = ?from,
                        reason = ?reason,
                        "Switch failed, connection has no session"
                    );
                }
            }
            AuditEvent::FileOperation {
                connection_id,
                username,
                operation,
                path,
                success,
                bytes_transferred,
                encrypted,
                error,
                ..
            } => {
                if *success {
                    info!(
                        event = "file_operation",
                        connection_id,
                        username,
                        operation,
                        path,
                        bytes = ?bytes_transferred,
                        encrypted,
                        "File operation completed"
                    );
                } else {
                    warn!(
                        event = "file_operation_failed",
                        connection_id,
                        username,
                        operation,
                        path,
                        error = ?error,
                        "File operation failed"
                    );
                }
            }
            AuditEvent::DirectoryOperation {
                connection_id,
                username,
                path,
                success,
                entries,
                error,
                ..
            } => {
                if *success {
                    info!(
                        event = "directory_listed",
                        connection_id,
                        username,
                        path,
                        entries,
                        "Directory listed"
                    );
                } else {
                    warn!(
                        event = "directory_list_failed",
                        connection_id,
                        username,
                        path,
                        error = ?error,
                        "Directory listing failed"
                    );
                }
            }
            AuditEvent::SecurityEvent {
                connection_id,
                username,
                event,
                details,
                ..
            } => {
                warn!(
                    event = "security_event",
                    connection_id,
                    username = ?username,
                    security_event = event,
                    details,
                    "Security event detected"
                );
            }
            AuditEvent::CapacityExhausted {
                connection_id,
                username,
                capacity,
                ..
            } => {
                warn!(
                    event = "session_capacity_exhausted",
                    connection_id,
                    username,
                    capacity,
                    "Session table full"
                );
            }
        }
    }

    /// Export as JSON
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One line of the audit file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    /// When the request was served, in local time
    pub timestamp: DateTime<Local>,
    /// Authenticated user
    pub username: String,
    /// Command name, e.g. `INFO`
    pub action: String,
    /// Name as requested by the client
    pub target: String,
}

impl AuditRecord {
    /// Record stamped with the current local time
    pub fn now(username: &str, action: &str, target: &str) -> Self {
        Self {
            timestamp: Local::now(),
            username: username.to_string(),
            action: action.to_string(),
            target: target.to_string(),
        }
    }
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] user={} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.username,
            self.action,
            self.target
        )
    }
}

/// Append-only audit file
///
/// NIST 800-53: AU-9 (Protection of Audit Information)
#[derive(Debug)]
pub struct AuditLog {
    sink: Option<(PathBuf, Mutex<File>)>,
}

impl AuditLog {
    /// Open `path` for appending, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be opened.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::Config(format!("Failed to open audit log {}: {}", path.display(), e)))?;
        Ok(Self {
            sink: Some((path.to_path_buf(), Mutex::new(file))),
        })
    }

    /// An audit log that drops every record
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Whether records are written anywhere
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// File receiving records, if enabled
    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|(path, _)| path.as_path())
    }

    /// Append one record line
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub async fn append(&self, record: &AuditRecord) -> Result<()> {
        let Some((_, file)) = &self.sink else {
            return Ok(());
        };
        let line = format!("{}\n", record);
        let mut file = file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
