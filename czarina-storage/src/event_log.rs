//! JSON-lines event log
//!
//! One event per line, appended with a single write and synced before the
//! append returns. Appends within a process are serialized by a mutex; the
//! file is opened in append mode so records from other processes (an
//! operator running `czarina worker complete` during `czarina run`) land
//! whole as well.
//!
//! Reads stream the file lazily from the start each time. Opening or reading
//! never modifies the file. A final line without its newline is an append
//! still in flight (or torn by a crash) and is not yielded; a complete line
//! that does not parse is reported as a corrupt record rather than skipped.

use async_trait::async_trait;
use futures_util::stream;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use czarina_core::event::{Event, EventFilter, EventLog, EventStream};

use crate::{Error, Result};

/// Durable event log backed by a `.jsonl` file
#[derive(Debug)]
pub struct JsonlEventLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl JsonlEventLog {
    /// Open (creating if needed) the log at `path`
    ///
    /// Existing content is left untouched, so opening from a read-only
    /// command never races with another process appending.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::io(&path, e))?;

        debug!("Opened event log {}", path.display());
        Ok(Self {
            path,
            append_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_record(&self, event: &Event) -> Result<()> {
        let mut record = serde_json::to_vec(event)?;
        record.push(b'\n');

        let _guard = self.append_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::io(&self.path, e))?;
        file.write_all(&record)
            .await
            .map_err(|e| Error::io(&self.path, e))?;
        file.flush().await.map_err(|e| Error::io(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| Error::io(&self.path, e))?;
        Ok(())
    }

    async fn open_reader(&self) -> Result<Option<BufReader<File>>> {
        match File::open(&self.path).await {
            Ok(file) => Ok(Some(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }

    /// Number of complete records in the log
    pub async fn record_count(&self) -> Result<usize> {
        let Some(reader) = self.open_reader().await? else {
            return Ok(0);
        };
        let mut lines = RecordLines::new(reader, self.path.clone());
        let mut count = 0;
        while let Some(line) = lines.next_record().await? {
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Newline-terminated lines of the log, numbered from 1
struct RecordLines {
    reader: BufReader<File>,
    buf: Vec<u8>,
    line_number: usize,
    path: PathBuf,
}

impl RecordLines {
    fn new(reader: BufReader<File>, path: PathBuf) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_number: 0,
            path,
        }
    }

    /// Next complete line; `None` at the end or at an unterminated tail
    async fn next_record(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(|e| Error::io(&self.path, e))?;
        if read == 0 {
            return Ok(None);
        }
        if self.buf.last() != Some(&b'\n') {
            trace!(
                "Event log {} ends with {} bytes of an unfinished record",
                self.path.display(),
                self.buf.len()
            );
            return Ok(None);
        }
        self.line_number += 1;
        self.buf.pop();
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

/// Cursor state carried through the lazy read
struct ReadCursor {
    lines: RecordLines,
    filter: EventFilter,
    finished: bool,
}

impl ReadCursor {
    async fn next_event(&mut self) -> Option<Result<Event>> {
        while !self.finished {
            let line = match self.lines.next_record().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) if self.filter.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(Error::Corrupt {
                        path: self.lines.path.clone(),
                        line: self.lines.line_number,
                        message: e.to_string(),
                    }))
                }
            }
        }
        None
    }
}

#[async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: Event) -> czarina_core::Result<()> {
        self.write_record(&event).await?;
        Ok(())
    }

    async fn read(&self, filter: EventFilter) -> czarina_core::Result<EventStream> {
        let Some(reader) = self.open_reader().await? else {
            return Ok(Box::pin(stream::empty()));
        };
        let cursor = ReadCursor {
            lines: RecordLines::new(reader, self.path.clone()),
            filter,
            finished: false,
        };
        let events = stream::unfold(cursor, |mut cursor| async move {
            let item = cursor.next_event().await?;
            Some((item.map_err(czarina_core::Error::from), cursor))
        });
        Ok(Box::pin(events))
    }
}
