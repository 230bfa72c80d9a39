//! Error types for Shareline operations
//!
//! NIST 800-53: SI-11 (Error Handling)
//! Implementation: one error enum shared by the server, the client and the
//! supporting services. Protocol-level failures are mapped to the text of an
//! `ERROR:` line with [`Error::wire_message`].

use thiserror::Error;

/// Result type alias for Shareline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Shareline error types
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed frame or unexpected response from the peer
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with an `ERROR:` line
    #[error("Server error: {0}")]
    Remote(String),

    /// Path failed canonicalization or the shared-root prefix check
    ///
    /// NIST 800-53: SI-10 (Input Validation)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Target exists but may not be served
    ///
    /// NIST 800-53: AC-3 (Access Enforcement)
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// File or directory does not exist
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Selection matched neither an index nor a username
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Every session slot is held by a live binding
    ///
    /// NIST 800-53: AC-10 (Concurrent Session Control)
    #[error("Session capacity exhausted ({0} slots in use)")]
    CapacityExhausted(usize),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Command issued before a user was selected
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Key material has the wrong size or cannot be decoded
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Network connection failures
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation exceeded its time limit
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if error was caused by the peer's input rather than the host
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidPath(_)
                | Error::AccessDenied(_)
                | Error::FileNotFound(_)
                | Error::UnknownUser(_)
                | Error::Protocol(_)
        )
    }

    /// Check if error has security implications and should be audited
    ///
    /// NIST 800-53: AU-2 (Audit Events)
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_)
                | Error::AccessDenied(_)
                | Error::InvalidPath(_)
                | Error::UnknownUser(_)
        )
    }

    /// Text carried by the `ERROR:` line sent to the peer
    ///
    /// Never includes resolved paths or key material.
    pub fn wire_message(&self) -> &'static str {
        match self {
            Error::InvalidPath(_) => "Invalid path",
            Error::AccessDenied(_) => "Access denied",
            Error::FileNotFound(_) => "File not found",
            Error::UnknownUser(_) => "Invalid user",
            Error::CapacityExhausted(_) => "Too many active sessions",
            Error::NotAuthenticated => "No active session",
            _ => "Internal error",
        }
    }

    /// Create protocol error with context
    pub fn protocol(context: impl Into<String>) -> Self {
        Error::Protocol(context.into())
    }

    /// Create invalid path error
    pub fn invalid_path(context: impl Into<String>) -> Self {
        Error::InvalidPath(context.into())
    }

    /// Create timeout error with context
    pub fn timeout(context: impl Into<String>) -> Self {
        Error::Timeout(context.into())
    }
}
