//! Shared-root path confinement
//!
//! NIST 800-53: SI-10 (Input Validation), AC-3 (Access Enforcement)
//!
//! A requested path is appended to the root string as-is, normalized
//! lexically, and accepted when the normalized string starts with the root
//! string. The comparison is a plain string prefix, not a path-segment match:
//! with a root of `/share` a request resolving to `/share2/secret` passes.
//! Servers normally register the root with a trailing separator, which keeps
//! sibling directories out.

use crate::{Error, Result};
use chrono::{DateTime, Local};
use std::path::{self, MAIN_SEPARATOR, Path};
use tracing::warn;

/// Confines requests to a shared root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    root: String,
}

impl PathResolver {
    /// Use `root` verbatim as the prefix
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// Build a resolver for an on-disk shared directory
    ///
    /// The directory is canonicalized and a trailing separator appended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the directory cannot be canonicalized.
    pub fn for_directory(dir: &Path) -> Result<Self> {
        let canonical = std::fs::canonicalize(dir).map_err(|e| {
            Error::Config(format!("Invalid shared directory {}: {}", dir.display(), e))
        })?;

        let mut root = canonical.to_string_lossy().into_owned();
        if !root.ends_with(MAIN_SEPARATOR) {
            root.push(MAIN_SEPARATOR);
        }
        Ok(Self { root })
    }

    /// Canonical root, with trailing separator
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Canonical form of `root + requested`, without the prefix check
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the combined path cannot be
    /// canonicalized.
    pub fn resolve(&self, requested: &str) -> Result<String> {
        let combined = format!("{}{}", self.root, requested);
        canonicalize(&combined).ok_or_else(|| Error::invalid_path(requested))
    }

    /// Whether a canonical path lies under the root (textual prefix)
    pub fn is_within(&self, canonical: &str) -> bool {
        canonical.starts_with(&self.root)
    }

    /// Resolve `requested` and apply the prefix check
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if canonicalization fails or the result
    /// is outside the root.
    pub fn validate(&self, requested: &str) -> Result<String> {
        let resolved = self.resolve(requested)?;
        if !self.is_within(&resolved) {
            warn!(
                event = "path_traversal_rejected",
                requested,
                "Request resolved outside the shared root"
            );
            return Err(Error::invalid_path(requested));
        }
        Ok(resolved)
    }
}

/// Lexically normalize `path`
///
/// Collapses repeated separators, drops `.` components and lets `..` remove
/// the previous component. `..` never climbs above the root or a drive
/// prefix. A trailing separator on the input is kept. Returns `None` for
/// input containing NUL bytes.
pub fn canonicalize(path: &str) -> Option<String> {
    if path.contains('\0') {
        return None;
    }

    let mut rest = path;
    let mut prefix = String::new();

    // Windows drive prefix such as `C:`
    if cfg!(windows) {
        let bytes = rest.as_bytes();
        if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
            prefix.push_str(&rest[..2]);
            rest = &rest[2..];
        }
    }

    let absolute = rest.starts_with(path::is_separator);
    if absolute {
        prefix.push(MAIN_SEPARATOR);
    }
    let trailing = rest.len() > 1 && rest.ends_with(path::is_separator);

    let mut parts: Vec<&str> = Vec::new();
    for component in rest.split(path::is_separator) {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }

    let mut out = prefix;
    out.push_str(&parts.join(&MAIN_SEPARATOR.to_string()));
    if trailing && !parts.is_empty() {
        out.push(MAIN_SEPARATOR);
    }
    if out.is_empty() {
        out.push('.');
    }
    Some(out)
}

/// Metadata consulted by GET and reported by INFO
#[derive(Debug, Clone)]
pub struct FileAttributes {
    /// Entry is a directory
    pub is_dir: bool,
    /// Length in bytes
    pub size: u64,
    /// Last modification time, when the platform reports one
    pub modified: Option<DateTime<Local>>,
    /// No write permission
    pub read_only: bool,
    /// Dot-file
    pub hidden: bool,
    /// Neither a regular file nor a directory
    pub system: bool,
}

impl FileAttributes {
    /// Read attributes of `path`, following symlinks
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if the path cannot be stat'ed.
    pub async fn read(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        Ok(Self::from_metadata(path, &metadata))
    }

    fn from_metadata(path: &Path, metadata: &std::fs::Metadata) -> Self {
        let modified = metadata.modified().ok().map(DateTime::<Local>::from);
        let (hidden, system) = platform_flags(path, metadata);
        Self {
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified,
            read_only: metadata.permissions().readonly(),
            hidden,
            system,
        }
    }

    /// Whether GET may serve this target
    pub fn is_servable(&self) -> bool {
        !self.is_dir && !self.hidden && !self.system
    }

    /// Flag list as sent in INFO replies, e.g. `"ReadOnly Hidden "`
    pub fn flags_text(&self) -> String {
        let mut text = String::new();
        if self.read_only {
            text.push_str("ReadOnly ");
        }
        if self.hidden {
            text.push_str("Hidden ");
        }
        if self.system {
            text.push_str("System ");
        }
        text
    }
}

#[cfg(windows)]
fn platform_flags(_path: &Path, metadata: &std::fs::Metadata) -> (bool, bool) {
    use std::os::windows::fs::MetadataExt;

    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;

    let attrs = metadata.file_attributes();
    (
        attrs & FILE_ATTRIBUTE_HIDDEN != 0,
        attrs & FILE_ATTRIBUTE_SYSTEM != 0,
    )
}

/// Dotfiles are hidden; anything other than a regular file or directory
/// (device, socket, FIFO) counts as a system file.
#[cfg(not(windows))]
fn platform_flags(path: &Path, metadata: &std::fs::Metadata) -> (bool, bool) {
    let hidden = path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'));
    let file_type = metadata.file_type();
    let system = !(file_type.is_file() || file_type.is_dir());
    (hidden, system)
}
