//! Change event representation.
//!
//! A ChangeEvent is our abstraction over a single line emitted by the
//! external watcher. The watcher speaks a tiny text protocol:
//!
//! ```text
//! '<FLAG[,FLAG...]>, <absolute path>'
//! ```
//!
//! which is what `inotifywait --format "'%e, %w%f'"` produces.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// The kind of filesystem change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// File content was written.
    Modify,
    /// Metadata (permissions, owner, timestamps) changed.
    Attrib,
    /// A file opened for writing was closed.
    CloseWrite,
    /// The file was moved into, out of, or within the tree.
    Move,
    /// A new file or directory appeared.
    Create,
    /// The file was removed.
    Delete,
    /// Read access, open, or close without writing.
    AccessOnly,
}

impl EventKind {
    /// Maps an inotify flag list such as `CLOSE_WRITE,CLOSE` to a single kind.
    ///
    /// When several flags are present the most significant one wins:
    /// Delete, Move, Create, Modify, CloseWrite, Attrib, then AccessOnly.
    /// Flags we do not track (`ISDIR`, `UNMOUNT`, ...) are skipped. Returns
    /// None if no known flag is present.
    pub fn from_flags(flags: &str) -> Option<Self> {
        flags
            .split(',')
            .map(str::trim)
            .filter(|flag| !flag.is_empty())
            .filter_map(|flag| Self::from_flag(&flag.to_ascii_uppercase()))
            .max_by_key(|kind| kind.precedence())
    }

    fn from_flag(flag: &str) -> Option<Self> {
        let kind = match flag {
            "DELETE" | "DELETE_SELF" => Self::Delete,
            "MOVE" | "MOVED_FROM" | "MOVED_TO" | "MOVE_SELF" => Self::Move,
            "CREATE" => Self::Create,
            "MODIFY" => Self::Modify,
            "CLOSE_WRITE" => Self::CloseWrite,
            "ATTRIB" => Self::Attrib,
            "ACCESS" | "OPEN" | "CLOSE_NOWRITE" | "CLOSE" => Self::AccessOnly,
            _ => return None,
        };
        Some(kind)
    }

    fn precedence(self) -> u8 {
        match self {
            Self::AccessOnly => 0,
            Self::Attrib => 1,
            Self::CloseWrite => 2,
            Self::Modify => 3,
            Self::Create => 4,
            Self::Move => 5,
            Self::Delete => 6,
        }
    }

    /// True for access- and close-type events, which never change history.
    pub fn is_access_like(self) -> bool {
        matches!(self, Self::AccessOnly | Self::CloseWrite)
    }

    /// True if the event removed the file.
    pub fn is_delete(self) -> bool {
        self == Self::Delete
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Modify => "MODIFY",
            Self::Attrib => "ATTRIB",
            Self::CloseWrite => "CLOSE_WRITE",
            Self::Move => "MOVE",
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
            Self::AccessOnly => "ACCESS",
        };
        write!(f, "{}", s)
    }
}

/// One filesystem change, consumed exactly once by the watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: EventKind,

    /// Absolute path of the affected file.
    pub path: PathBuf,

    /// When the line was read from the watcher.
    pub observed_at: DateTime<Local>,
}

impl ChangeEvent {
    /// Creates an event observed now.
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            observed_at: Local::now(),
        }
    }

    /// Parses one watcher line.
    ///
    /// Surrounding quotes are stripped, then the line is split on the first
    /// space. Paths may contain spaces; everything after the first space is
    /// the path.
    pub fn parse_line(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        let unquoted = trimmed
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
            .unwrap_or(trimmed);

        let (token, path) = unquoted
            .split_once(' ')
            .ok_or_else(|| CoreError::protocol(line, "expected '<kind>, <path>'"))?;

        let token = token.trim_end_matches(',');
        if token.is_empty() {
            return Err(CoreError::protocol(line, "missing event kind"));
        }
        if path.is_empty() {
            return Err(CoreError::protocol(line, "missing path"));
        }
        if !Path::new(path).is_absolute() {
            return Err(CoreError::protocol(line, "path is not absolute"));
        }

        let kind = EventKind::from_flags(token)
            .ok_or_else(|| CoreError::protocol(line, format!("unknown event kind '{}'", token)))?;

        Ok(Self::new(kind, path))
    }

    /// Parses one raw watcher line.
    ///
    /// File names are arbitrary bytes, so a line need not be UTF-8. Such a
    /// line keeps its exact path bytes on Unix; elsewhere it is a protocol
    /// error.
    pub fn parse_bytes(line: &[u8]) -> Result<Self> {
        match std::str::from_utf8(line) {
            Ok(text) => Self::parse_line(text),
            Err(_) => Self::parse_raw(line),
        }
    }

    #[cfg(unix)]
    fn parse_raw(line: &[u8]) -> Result<Self> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let shown = String::from_utf8_lossy(line);
        let trimmed = trim_ascii(line);
        let unquoted = trimmed
            .strip_prefix(b"'")
            .and_then(|rest| rest.strip_suffix(b"'"))
            .unwrap_or(trimmed);

        let space = unquoted
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| CoreError::protocol(shown.as_ref(), "expected '<kind>, <path>'"))?;
        let (token, path) = (&unquoted[..space], &unquoted[space + 1..]);

        let token = std::str::from_utf8(token)
            .map_err(|_| CoreError::protocol(shown.as_ref(), "event kind is not valid UTF-8"))?
            .trim_end_matches(',');
        let path = Path::new(OsStr::from_bytes(path));
        if token.is_empty() {
            return Err(CoreError::protocol(shown.as_ref(), "missing event kind"));
        }
        if !path.is_absolute() {
            return Err(CoreError::protocol(shown.as_ref(), "path is not absolute"));
        }

        let kind = EventKind::from_flags(token)
            .ok_or_else(|| CoreError::protocol(shown.as_ref(), format!("unknown event kind '{}'", token)))?;

        Ok(Self::new(kind, path))
    }

    #[cfg(not(unix))]
    fn parse_raw(line: &[u8]) -> Result<Self> {
        Err(CoreError::protocol(
            String::from_utf8_lossy(line).into_owned(),
            "line is not valid UTF-8",
        ))
    }

    /// Formats the event back into the watcher line protocol.
    pub fn to_line(&self) -> String {
        format!("'{}, {}'", self.kind, self.path.display())
    }

    /// Like [`to_line`](Self::to_line), keeping the exact path bytes.
    pub fn to_line_bytes(&self) -> Vec<u8> {
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;

            let mut line = format!("'{}, ", self.kind).into_bytes();
            line.extend_from_slice(self.path.as_os_str().as_bytes());
            line.push(b'\'');
            line
        }
        #[cfg(not(unix))]
        {
            self.to_line().into_bytes()
        }
    }

    /// Human-readable description used in logs and commit messages.
    pub fn describe(&self) -> String {
        format!("{} - {}", self.kind, self.path.display())
    }
}

#[cfg(unix)]
fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
