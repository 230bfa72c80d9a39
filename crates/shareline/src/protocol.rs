//! Shareline wire protocol
//!
//! Text messages are CRLF-terminated lines. The server ends every menu with
//! the `"> "` prompt. A GET reply is the only binary message:
//!
//! ```text
//! ENCRYPTED_FILE:{file}:KEY_SIZE:{k}:FILE_SIZE:{n}\r\n
//! IV:{16 raw bytes}\r\n          (only when the session has a cipher)
//! DATA:\r\n
//! {n payload bytes}
//! \r\nFILE_END\r\n
//! ```
//!
//! Framing is found by scanning for these literal markers.

use crate::cipher::IV_SIZE;
use crate::path::FileAttributes;
use crate::transport::find_bytes;
use crate::users::UserRecord;
use crate::{Error, Result};
use bytes::Bytes;
use std::fmt;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 9876;

/// Terminates every menu sent by the server
pub const PROMPT: &str = "> ";

/// Maximum accepted command line length
pub const MAX_LINE: usize = 4096;

/// GET payloads are read and sent in chunks of this size
pub const CHUNK_SIZE: usize = 4096;

/// Size of the LIST response buffer
pub const LIST_BUFFER: usize = 4096;

/// LIST stops adding entries once the response reaches this length
pub const LIST_CUTOFF: usize = LIST_BUFFER - 256;

/// Starts the GET header line
pub const HEADER_PREFIX: &[u8] = b"ENCRYPTED_FILE:";
/// Precedes the 16 raw IV bytes
pub const IV_PREFIX: &[u8] = b"IV:";
/// Last line before the payload
pub const DATA_MARKER: &[u8] = b"DATA:\r\n";
/// Closes a GET reply
pub const FILE_END: &[u8] = b"FILE_END\r\n";
/// Bytes following the payload
pub const PAYLOAD_TRAILER: &[u8] = b"\r\nFILE_END\r\n";

/// Prefix of every error line
pub const ERROR_PREFIX: &str = "ERROR:";
/// Start of the main menu
pub const MENU_MARKER: &str = "\r\n===== MENU";
/// Present in the login banner
pub const AUTH_MARKER: &str = "[+] Authenticated";
/// Reply to `EXIT`
pub const GOODBYE: &str = "Goodbye!\r\n";

const AUTH_NAME_PREFIX: &str = "Authenticated as: ";
const SWITCH_NAME_PREFIX: &str = "Switched to: ";
const LIST_HEADER: &str = "\r\nFiles in shared directory:\r\n----------------------------\r\n";
const LIST_FOOTER: &str = "----------------------------\r\n";

/// A command line received in the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `LIST [subdir]`
    List(Option<&'a str>),
    /// `GET <file>`
    Get(&'a str),
    /// `INFO <file>`
    Info(&'a str),
    /// `SWITCH`
    Switch,
    /// `EXIT` or `QUIT`
    Exit,
    /// Anything else, answered with `Unknown command`
    Unknown,
}

impl<'a> Command<'a> {
    /// Dispatch on case-sensitive literal prefixes
    ///
    /// `LIST`, `GET `, `INFO ` and `SWITCH` match as prefixes (so `LISTING`
    /// is a LIST of `ING`); `EXIT` and `QUIT` must match exactly.
    pub fn parse(line: &'a str) -> Self {
        if let Some(rest) = line.strip_prefix("LIST") {
            let subdir = rest.trim_start_matches(' ');
            Command::List((!subdir.is_empty()).then_some(subdir))
        } else if let Some(rest) = line.strip_prefix("GET ") {
            Command::Get(rest.trim_start_matches(' '))
        } else if let Some(rest) = line.strip_prefix("INFO ") {
            Command::Info(rest.trim_start_matches(' '))
        } else if line.starts_with("SWITCH") {
            Command::Switch
        } else if line == "EXIT" || line == "QUIT" {
            Command::Exit
        } else {
            Command::Unknown
        }
    }

    /// Name used in logs and audit records
    pub fn name(&self) -> &'static str {
        match self {
            Command::List(_) => "LIST",
            Command::Get(_) => "GET",
            Command::Info(_) => "INFO",
            Command::Switch => "SWITCH",
            Command::Exit => "EXIT",
            Command::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::List(Some(subdir)) => write!(f, "LIST {}", subdir),
            Command::List(None) => f.write_str("LIST"),
            Command::Get(file) => write!(f, "GET {}", file),
            Command::Info(file) => write!(f, "INFO {}", file),
            Command::Switch => f.write_str("SWITCH"),
            Command::Exit => f.write_str("EXIT"),
            Command::Unknown => Ok(()),
        }
    }
}

/// User selection menu, ending with the prompt
pub fn user_menu(users: &[UserRecord]) -> String {
    let mut menu = String::from("\r\n======== Welcome to Shareline ========\r\nChoose your user:\r\n");
    for (i, user) in users.iter().enumerate() {
        menu.push_str(&format!("{} {}\r\n", i + 1, user.username()));
    }
    menu.push_str(PROMPT);
    menu
}

/// Main command menu, ending with the prompt
pub fn main_menu(root: &str) -> String {
    format!(
        "\r\n===== MENU =====\r\nShared: {}\r\n- LIST [subdir]\r\n- GET  <file>\r\n- INFO <file>\r\n- SWITCH\r\n{}",
        root, PROMPT
    )
}

/// Banner sent after a successful login
pub fn auth_banner(username: &str, key_size: usize) -> String {
    format!(
        "\r\n[+] Authenticated as: {}\r\n[+] Encryption key: {} bytes\r\n",
        username, key_size
    )
}

/// Banner sent after a successful `SWITCH`
pub fn switch_banner(username: &str) -> String {
    format!("\r\n[+] Switched to: {}\r\n", username)
}

/// `ERROR: {message}` line
pub fn error_line(message: &str) -> String {
    format!("{} {}\r\n", ERROR_PREFIX, message)
}

/// Accumulates a LIST reply up to [`LIST_CUTOFF`] bytes
#[derive(Debug)]
pub struct Listing {
    text: String,
    entries: usize,
    truncated: bool,
}

impl Listing {
    /// Empty listing
    pub fn new() -> Self {
        Self {
            text: String::from(LIST_HEADER),
            entries: 0,
            truncated: false,
        }
    }

    /// Add a directory entry; returns `false` once the listing is full
    pub fn push_dir(&mut self, name: &str) -> bool {
        self.push(format!("[DIR] {}\r\n", name))
    }

    /// Add a file entry; returns `false` once the listing is full
    pub fn push_file(&mut self, name: &str, size: u64) -> bool {
        self.push(format!("[FILE] {} ({} bytes)\r\n", name, size))
    }

    fn push(&mut self, entry: String) -> bool {
        if self.text.len() >= LIST_CUTOFF {
            self.truncated = true;
            return false;
        }
        self.text.push_str(&entry);
        self.entries += 1;
        true
    }

    /// Entries added so far
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Whether entries were dropped at the cutoff
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Text with header and footer
    pub fn finish(mut self) -> String {
        self.text.push_str(LIST_FOOTER);
        self.text
    }
}

impl Default for Listing {
    fn default() -> Self {
        Self::new()
    }
}

/// INFO reply body
pub fn info_reply(file: &str, attrs: &FileAttributes) -> String {
    let modified = attrs.modified.map_or_else(
        || "unknown".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    format!(
        "\r\nFile: {}\r\nSize: {} bytes\r\nModified: {}\r\nAttributes: {}\r\n",
        file,
        attrs.size,
        modified,
        attrs.flags_text()
    )
}

/// First line of a GET reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeader {
    /// Name as requested
    pub file: String,
    /// Session key length, 0 without a cipher
    pub key_size: usize,
    /// Bytes of payload that follow `DATA:`
    pub file_size: u64,
}

impl GetHeader {
    /// Header line including the trailing CRLF
    pub fn encode(&self) -> String {
        format!(
            "ENCRYPTED_FILE:{}:KEY_SIZE:{}:FILE_SIZE:{}\r\n",
            self.file, self.key_size, self.file_size
        )
    }

    /// Parse a header line (with or without its CRLF)
    ///
    /// File names may contain `:`; the last `:KEY_SIZE:` separates the name.
    pub fn parse(line: &str) -> Option<Self> {
        let body = line
            .trim_end_matches(['\r', '\n'])
            .strip_prefix("ENCRYPTED_FILE:")?;
        let (file, rest) = body.rsplit_once(":KEY_SIZE:")?;
        let (key_size, file_size) = rest.split_once(":FILE_SIZE:")?;
        Some(Self {
            file: file.to_string(),
            key_size: key_size.trim().parse().ok()?,
            file_size: file_size.trim().parse().ok()?,
        })
    }
}

/// Header line, optional IV field and `DATA:` marker
pub fn encode_get_preamble(header: &GetHeader, iv: Option<&[u8; IV_SIZE]>) -> Vec<u8> {
    let mut out = header.encode().into_bytes();
    if let Some(iv) = iv {
        out.extend_from_slice(IV_PREFIX);
        out.extend_from_slice(iv);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(DATA_MARKER);
    out
}

/// Offsets of a GET reply's parts within a buffer
struct Layout {
    header: Option<GetHeader>,
    iv: Option<[u8; IV_SIZE]>,
    data_start: usize,
}

/// Locate header, IV and payload start; `None` while incomplete
fn layout(buf: &[u8]) -> Option<Layout> {
    let mut pos = 0;
    let mut header = None;

    if let Some(start) = find_bytes(buf, HEADER_PREFIX) {
        let line_end = start + find_bytes(&buf[start..], b"\r\n")?;
        header = GetHeader::parse(&String::from_utf8_lossy(&buf[start..line_end]));
        pos = line_end + 2;
    }

    let mut iv = None;
    if header.is_some() && buf[pos..].starts_with(IV_PREFIX) {
        let iv_start = pos + IV_PREFIX.len();
        let iv_end = iv_start + IV_SIZE;
        let field = buf.get(iv_start..iv_end)?;
        let mut bytes = [0u8; IV_SIZE];
        bytes.copy_from_slice(field);
        iv = Some(bytes);
        pos = iv_end;
        if buf[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
    } else if header.is_some() && buf.len() - pos < IV_PREFIX.len() {
        return None;
    }

    let data_start = pos + find_bytes(&buf[pos..], DATA_MARKER)? + DATA_MARKER.len();
    Some(Layout {
        header,
        iv,
        data_start,
    })
}

/// End offset of a complete GET reply in `buf`, if one is buffered
///
/// With a parseable header the reply ends after `FILE_SIZE` payload bytes and
/// the trailer; otherwise at the first `FILE_END\r\n`. An error reply ends at
/// the prompt of the menu that follows it.
pub fn get_frame_end(buf: &[u8]) -> Option<usize> {
    if buf.trim_ascii_start().starts_with(ERROR_PREFIX.as_bytes()) {
        return find_bytes(buf, PROMPT.as_bytes()).map(|pos| pos + PROMPT.len());
    }

    if let Some(end) = declared_frame_len(buf) {
        return (buf.len() >= end).then_some(end);
    }

    find_bytes(buf, FILE_END).map(|pos| pos + FILE_END.len())
}

/// Total length of the GET reply starting at `buf`, per its `FILE_SIZE`
///
/// Known as soon as the preamble is buffered, before any payload arrives.
/// `None` without a parseable header.
pub fn declared_frame_len(buf: &[u8]) -> Option<usize> {
    let layout = layout(buf)?;
    let payload = usize::try_from(layout.header?.file_size).ok()?;
    Some(layout.data_start + payload + PAYLOAD_TRAILER.len())
}

/// A parsed GET reply
#[derive(Debug, Clone)]
pub struct GetResponse {
    /// `None` when the header line is missing or malformed
    pub header: Option<GetHeader>,
    /// IV announced by the server; `None` means plaintext
    pub iv: Option<[u8; IV_SIZE]>,
    /// Payload as received
    pub payload: Bytes,
}

impl GetResponse {
    /// Parse a complete GET reply
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the server answered with an error line
    /// - [`Error::Protocol`] if no `DATA:` section is present, or the
    ///   payload is shorter than the header's `FILE_SIZE`
    pub fn parse(frame: &Bytes) -> Result<Self> {
        let trimmed = frame.trim_ascii_start();
        if trimmed.starts_with(ERROR_PREFIX.as_bytes()) {
            let line_end = find_bytes(trimmed, b"\r\n").unwrap_or(trimmed.len());
            let message = String::from_utf8_lossy(&trimmed[..line_end]).into_owned();
            return Err(Error::Remote(message));
        }

        let layout =
            layout(frame).ok_or_else(|| Error::protocol("Missing DATA section in GET reply"))?;
        let rest = &frame[layout.data_start..];

        let declared = layout
            .header
            .as_ref()
            .and_then(|h| usize::try_from(h.file_size).ok());
        if let Some(size) = declared.filter(|&size| size > rest.len()) {
            return Err(Error::protocol(format!(
                "Truncated GET payload: expected {size} bytes, received {}",
                rest.len()
            )));
        }
        let payload_len = declared
            .or_else(|| find_bytes(rest, PAYLOAD_TRAILER))
            .or_else(|| find_bytes(rest, FILE_END))
            .unwrap_or(rest.len());

        let start = layout.data_start;
        Ok(Self {
            header: layout.header,
            iv: layout.iv,
            payload: frame.slice(start..start + payload_len),
        })
    }
}

/// Text before the menu the server appends to every reply
pub fn strip_menu(text: &str) -> &str {
    text.find(MENU_MARKER).map_or(text, |pos| &text[..pos])
}

/// Username from an `Authenticated as:` or `Switched to:` banner
pub fn banner_username(text: &str) -> Option<&str> {
    [AUTH_NAME_PREFIX, SWITCH_NAME_PREFIX].iter().find_map(|prefix| {
        let start = text.find(prefix)? + prefix.len();
        let rest = &text[start..];
        let end = rest.find(['\r', '\n']).unwrap_or(rest.len());
        Some(rest[..end].trim()).filter(|name| !name.is_empty())
    })
}

/// The first `ERROR:` line in `text`, without its line ending
pub fn error_message(text: &str) -> Option<&str> {
    let start = text.find(ERROR_PREFIX)?;
    let rest = &text[start..];
    let end = rest.find(['\r', '\n']).unwrap_or(rest.len());
    Some(&rest[..end])
}
