//! Event sources.
//!
//! Every source yields raw lines in the watcher protocol
//! (`'<KIND>, <absolute path>'`). Lines are bytes, not text: a file name
//! may be any byte sequence. Parsing happens in the session, so a
//! captured log can be replayed through exactly the same path as live
//! events.

use crate::error::{Result, WatchError};
use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use windex_core::{ChangeEvent, EventKind};

/// Program spawned by the inotify backend.
pub const INOTIFY_PROGRAM: &str = "inotifywait";

/// Which kernel-facing watcher feeds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventBackend {
    /// `inotifywait` child process.
    #[default]
    Inotify,
    /// In-process watcher from the `notify` crate.
    Notify,
}

impl std::fmt::Display for EventBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Inotify => "inotify",
            Self::Notify => "notify",
        };
        write!(f, "{}", s)
    }
}

/// Newline-delimited byte lines over a buffered reader.
///
/// Bytes of a line cut short by a cancelled read stay in `pending`, so
/// the next call picks up where the last one stopped.
pub struct RawLines<R> {
    reader: R,
    pending: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> RawLines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 && self.pending.is_empty() {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

/// A lazy, non-restartable stream of watcher lines.
pub enum EventSource {
    Inotify {
        // Held so the child is killed when the source is dropped.
        _child: Child,
        lines: RawLines<BufReader<ChildStdout>>,
    },
    Notify {
        _watcher: notify::RecommendedWatcher,
        receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    },
    Reader(RawLines<Box<dyn AsyncBufRead + Send + Unpin>>),
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Inotify { .. } => "Inotify",
            Self::Notify { .. } => "Notify",
            Self::Reader(_) => "Reader",
        };
        f.debug_tuple("EventSource").field(&kind).finish()
    }
}

/// Arguments passed to `inotifywait` for `dir`.
pub fn inotify_args(dir: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-m", "-r", "-e", "modify,attrib,close_write,move,create,delete"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(dir.as_os_str().to_os_string());
    args.push(OsString::from("--format"));
    args.push(OsString::from("'%e, %w%f'"));
    args
}

impl EventSource {
    /// Opens the source for `backend` on `dir`.
    pub fn open(backend: EventBackend, dir: &Path) -> Result<Self> {
        match backend {
            EventBackend::Inotify => Self::spawn_inotify(dir),
            EventBackend::Notify => Self::notify(dir),
        }
    }

    /// Spawns `inotifywait` in monitor mode and reads its standard output.
    pub fn spawn_inotify(dir: &Path) -> Result<Self> {
        let mut child = Command::new(INOTIFY_PROGRAM)
            .args(inotify_args(dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WatchError::Spawn {
                program: INOTIFY_PROGRAM.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| WatchError::Spawn {
            program: INOTIFY_PROGRAM.to_string(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "no stdout handle"),
        })?;

        info!("Started {} on {}", INOTIFY_PROGRAM, dir.display());
        Ok(Self::Inotify {
            _child: child,
            lines: RawLines::new(BufReader::new(stdout)),
        })
    }

    /// Watches `dir` recursively with the platform's native watcher.
    pub fn notify(dir: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    for line in notify_lines(&event) {
                        if tx.send(line).is_err() {
                            debug!("Event receiver dropped");
                            return;
                        }
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            }
        })?;

        watcher.watch(dir, RecursiveMode::Recursive)?;
        info!("Watching {} for changes", dir.display());

        Ok(Self::Notify {
            _watcher: watcher,
            receiver: rx,
        })
    }

    /// Reads lines from any buffered reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        let boxed: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(reader);
        Self::Reader(RawLines::new(boxed))
    }

    /// Waits for the next line. `None` means the source is exhausted.
    ///
    /// Cancel-safe: dropping the future loses no line.
    pub async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self {
            Self::Inotify { lines, .. } => lines.next_line().await,
            Self::Notify { receiver, .. } => Ok(receiver.recv().await),
            Self::Reader(lines) => lines.next_line().await,
        }
    }
}

/// Maps a notify event kind onto the watcher vocabulary.
fn translate(kind: &notify::EventKind) -> Option<EventKind> {
    match kind {
        notify::EventKind::Create(_) => Some(EventKind::Create),
        notify::EventKind::Remove(_) => Some(EventKind::Delete),
        notify::EventKind::Modify(ModifyKind::Name(_)) => Some(EventKind::Move),
        notify::EventKind::Modify(ModifyKind::Metadata(_)) => Some(EventKind::Attrib),
        notify::EventKind::Modify(_) => Some(EventKind::Modify),
        notify::EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(EventKind::CloseWrite),
        notify::EventKind::Access(_) => Some(EventKind::AccessOnly),
        notify::EventKind::Any | notify::EventKind::Other => None,
    }
}

/// Renders a notify event as protocol lines, one per path.
fn notify_lines(event: &Event) -> Vec<Vec<u8>> {
    let kind = match translate(&event.kind) {
        Some(kind) => kind,
        None => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|path| ChangeEvent::new(kind, path).to_line_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};
    use std::path::PathBuf;

    #[test]
    fn test_inotify_args_match_watcher_protocol() {
        let args = inotify_args(Path::new("/data/project"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-m",
                "-r",
                "-e",
                "modify,attrib,close_write,move,create,delete",
                "/data/project",
                "--format",
                "'%e, %w%f'",
            ]
        );
    }

    #[test]
    fn test_notify_kinds_translate() {
        let cases = [
            (notify::EventKind::Create(CreateKind::File), Some(EventKind::Create)),
            (notify::EventKind::Remove(RemoveKind::File), Some(EventKind::Delete)),
            (
                notify::EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                Some(EventKind::Move),
            ),
            (
                notify::EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                Some(EventKind::Attrib),
            ),
            (
                notify::EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                Some(EventKind::Modify),
            ),
            (
                notify::EventKind::Access(AccessKind::Close(AccessMode::Write)),
                Some(EventKind::CloseWrite),
            ),
            (
                notify::EventKind::Access(AccessKind::Open(AccessMode::Read)),
                Some(EventKind::AccessOnly),
            ),
            (notify::EventKind::Other, None),
        ];
        for (kind, expected) in cases {
            assert_eq!(translate(&kind), expected, "{:?}", kind);
        }
    }

    #[test]
    fn test_notify_event_becomes_parseable_lines() {
        let event = Event::new(notify::EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/data/project/a file.txt"))
            .add_path(PathBuf::from("/data/project/b.txt"));

        let lines = notify_lines(&event);
        assert_eq!(lines.len(), 2);

        let parsed = ChangeEvent::parse_bytes(&lines[0]).unwrap();
        assert_eq!(parsed.kind, EventKind::Create);
        assert_eq!(parsed.path, PathBuf::from("/data/project/a file.txt"));
    }

    #[tokio::test]
    async fn test_reader_source_yields_lines_then_ends() {
        let input: &'static [u8] = b"'CREATE, /data/a.txt'\n\n'MODIFY, /data/a.txt'\n";
        let mut source = EventSource::from_reader(input);

        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some(&b"'CREATE, /data/a.txt'"[..])
        );
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some(&b""[..]));
        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some(&b"'MODIFY, /data/a.txt'"[..])
        );
        assert_eq!(source.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_source_passes_non_utf8_bytes_through() {
        let input: &'static [u8] = b"'CREATE, /data/\xff\xfe.bin'\r\n'MODIFY, /data/a.txt'";
        let mut source = EventSource::from_reader(input);

        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some(&b"'CREATE, /data/\xff\xfe.bin'"[..])
        );
        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some(&b"'MODIFY, /data/a.txt'"[..])
        );
        assert_eq!(source.next_line().await.unwrap(), None);
    }
}
