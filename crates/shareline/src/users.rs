//! User directory
//!
//! Maps usernames to key bytes. The directory is loaded once at startup and is
//! read-only afterwards, so it is shared between connections without locking.
//!
//! ## File format
//!
//! ```toml
//! [[users]]
//! username = "alice"
//! key = "000102...1f"          # hex, up to 32 bytes
//!
//! [[users]]
//! username = "bob"
//! key_file = "keys/bob.key"    # raw bytes, relative to the users file
//!
//! [[users]]
//! username = "guest"           # no key: downloads are sent in the clear
//! ```

use crate::cipher::{self, KEY_SIZE};
use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Maximum number of users loaded from a directory file
pub const MAX_USERS: usize = 10;

/// A known user and their key
#[derive(Clone, PartialEq, Eq)]
pub struct UserRecord {
    username: String,
    key: Vec<u8>,
}

impl UserRecord {
    /// Create a record, truncating keys longer than [`KEY_SIZE`]
    pub fn new(username: impl Into<String>, key: &[u8]) -> Self {
        let len = key.len().min(KEY_SIZE);
        Self {
            username: username.into(),
            key: key[..len].to_vec(),
        }
    }

    /// Name shown in the user menu
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Raw key bytes; empty for users without encryption
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Key length in bytes
    pub fn key_size(&self) -> usize {
        self.key.len()
    }

    /// Whether downloads for this user are encrypted
    pub fn has_key(&self) -> bool {
        !self.key.is_empty()
    }
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("username", &self.username)
            .field("key_size", &self.key.len())
            .finish_non_exhaustive()
    }
}

/// Lookup service for known users
pub trait UserDirectory: Send + Sync {
    /// All known users, in menu order
    fn users(&self) -> &[UserRecord];

    /// Lookup by 1-based menu index
    fn by_index(&self, index: usize) -> Option<&UserRecord> {
        index.checked_sub(1).and_then(|i| self.users().get(i))
    }

    /// Lookup by exact username
    fn by_name(&self, name: &str) -> Option<&UserRecord> {
        self.users().iter().find(|u| u.username == name)
    }

    /// Resolve a menu selection
    ///
    /// The leading integer of `selection` is taken as a 1-based index when it
    /// is in range; anything else is looked up as an exact username.
    fn resolve(&self, selection: &str) -> Option<&UserRecord> {
        let index = leading_integer(selection);
        if index >= 1 {
            if let Some(user) = usize::try_from(index).ok().and_then(|i| self.by_index(i)) {
                return Some(user);
            }
        }
        self.by_name(selection)
    }
}

/// Parse the leading integer of `s` the way C `atoi` does
///
/// Leading whitespace and one sign are accepted; parsing stops at the first
/// non-digit. Returns 0 when no digits are present.
pub fn leading_integer(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }

    if negative { -value } else { value }
}

/// In-memory user directory
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    users: Vec<UserRecord>,
}

#[derive(Debug, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    username: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    key_file: Option<PathBuf>,
}

impl UserStore {
    /// Build a store from records, keeping at most [`MAX_USERS`]
    pub fn new(mut users: Vec<UserRecord>) -> Self {
        if users.len() > MAX_USERS {
            warn!(
                event = "users_truncated",
                loaded = users.len(),
                max = MAX_USERS,
                "Too many users, ignoring the rest"
            );
            users.truncate(MAX_USERS);
        }
        Self { users }
    }

    /// Load a users file
    ///
    /// `key_file` entries are resolved relative to the directory of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed, has no
    /// users, or names a key that cannot be loaded.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read users file {}: {}", path.display(), e))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&content, base)
    }

    /// Parse a users file body; `base` anchors relative `key_file` paths
    ///
    /// # Errors
    ///
    /// See [`UserStore::from_file`].
    pub fn from_toml_str(content: &str, base: &Path) -> Result<Self> {
        let parsed: UsersFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse users file: {}", e)))?;

        if parsed.users.is_empty() {
            return Err(Error::Config("No users in directory".to_string()));
        }

        let mut users = Vec::with_capacity(parsed.users.len());
        for entry in parsed.users {
            let key = match (&entry.key, &entry.key_file) {
                (Some(_), Some(_)) => {
                    return Err(Error::Config(format!(
                        "User '{}' sets both key and key_file",
                        entry.username
                    )));
                }
                (Some(hex_key), None) => hex::decode(hex_key.trim()).map_err(|e| {
                    Error::Config(format!("User '{}' has an invalid hex key: {}", entry.username, e))
                })?,
                (None, Some(key_file)) => {
                    let key_path = base.join(key_file);
                    std::fs::read(&key_path).map_err(|e| {
                        Error::Config(format!(
                            "Failed to read key for '{}' from {}: {}",
                            entry.username,
                            key_path.display(),
                            e
                        ))
                    })?
                }
                (None, None) => Vec::new(),
            };

            let record = UserRecord::new(entry.username, &key);
            debug!(
                event = "user_loaded",
                username = record.username(),
                key_size = record.key_size(),
                key_fingerprint = %cipher::fingerprint(record.key()),
                "Loaded user"
            );
            users.push(record);
        }

        let store = Self::new(users);
        info!(event = "users_loaded", count = store.users.len(), "User directory loaded");
        Ok(store)
    }

    /// Number of users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users were loaded
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for UserStore {
    fn users(&self) -> &[UserRecord] {
        &self.users
    }
}
