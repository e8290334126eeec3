//! Append-only JSON Lines event log on disk.
//!
//! Layout under the log directory:
//! - `events.jsonl`: every event (agents append their session/tool events here too)
//! - `errors.jsonl`: error-level events only

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use super::{EventSink, LogEvent, trace};
use crate::error::EventLogError;

pub const EVENTS_FILE: &str = "events.jsonl";
pub const ERRORS_FILE: &str = "errors.jsonl";

/// Bytes read per step when tailing a stream.
const TAIL_CHUNK: u64 = 64 * 1024;

/// File-backed event sink.
pub struct JsonlEventLog {
    dir: PathBuf,
    /// Serializes appends so lines from concurrent writers never interleave.
    write_lock: Mutex<()>,
}

impl JsonlEventLog {
    /// Open (and create if needed) a log directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, EventLogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| EventLogError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    pub fn errors_path(&self) -> PathBuf {
        self.dir.join(ERRORS_FILE)
    }

    async fn append(path: &Path, line: &str) -> Result<(), EventLogError> {
        let io_err = |source| EventLogError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)
    }

    async fn write(&self, event: &LogEvent) -> Result<(), EventLogError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        Self::append(&self.events_path(), &line).await?;
        if event.is_error() {
            Self::append(&self.errors_path(), &line).await?;
        }
        Ok(())
    }

    /// Last `limit` parseable events of a stream, oldest first.
    ///
    /// Reads backwards from the end in fixed-size chunks until enough valid
    /// lines are found, so the cost does not grow with the file. Lines that
    /// are not valid JSON (or not UTF-8) are skipped.
    async fn tail(path: &Path, limit: usize) -> Result<Vec<LogEvent>, EventLogError> {
        let io_err = |source| EventLogError::Io {
            path: path.to_path_buf(),
            source,
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_err(source)),
        };

        let mut pos = file.metadata().await.map_err(io_err)?.len();
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let chunk = pos.min(TAIL_CHUNK);
            pos -= chunk;
            let mut block = vec![0u8; chunk as usize];
            file.seek(SeekFrom::Start(pos)).await.map_err(io_err)?;
            file.read_exact(&mut block).await.map_err(io_err)?;
            block.extend_from_slice(&buf);
            buf = block;

            // Unless the start of the file was reached, the first line may be partial.
            let complete = if pos == 0 {
                &buf[..]
            } else {
                match buf.iter().position(|b| *b == b'\n') {
                    Some(i) => &buf[i + 1..],
                    None => continue,
                }
            };
            let events = parse_lines(complete);
            if pos == 0 || events.len() >= limit {
                let skip = events.len().saturating_sub(limit);
                return Ok(events.into_iter().skip(skip).collect());
            }
        }
    }
}

fn parse_lines(bytes: &[u8]) -> Vec<LogEvent> {
    bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.trim_ascii().is_empty())
        .filter_map(|line| serde_json::from_slice::<LogEvent>(line).ok())
        .collect()
}

#[async_trait]
impl EventSink for JsonlEventLog {
    async fn record(&self, event: LogEvent) {
        trace(&event);
        if let Err(e) = self.write(&event).await {
            warn!(error = %e, event = %event.event_type, "Failed to append event to log");
        }
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<LogEvent>, EventLogError> {
        Self::tail(&self.events_path(), limit).await
    }

    async fn recent_errors(&self, limit: usize) -> Result<Vec<LogEvent>, EventLogError> {
        Self::tail(&self.errors_path(), limit).await
    }
}
