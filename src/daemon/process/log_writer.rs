//! Timestamped capture of instance output.
//!
//! Each log file is opened once in append mode and shared through a
//! [`LogSink`]. A line is written as one buffer under the sink's lock, so
//! instances that merge into the same file never interleave mid-line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::constants::LOG_PREFIX_SEPARATOR;
use crate::date_format::LogDateFormat;
use crate::error::{Error, Result};

/// Shared append-mode writer for one log file.
#[derive(Clone)]
pub struct LogSink {
    path: Arc<PathBuf>,
    file: Arc<AsyncMutex<File>>,
}

impl LogSink {
    /// Open `path` for appending, creating it and its parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory or file cannot be created.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(format!("creating log directory {}", parent.display()), e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::io(format!("opening log file {}", path.display()), e))?;

        Ok(Self {
            path: Arc::new(path.to_path_buf()),
            file: Arc::new(AsyncMutex::new(file)),
        })
    }

    /// The file this sink appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line, prefixed with `format`'s current timestamp if set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the write fails.
    pub async fn write_line(&self, format: Option<&LogDateFormat>, line: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 40);
        if let Some(format) = format {
            buf.extend_from_slice(format.now().as_bytes());
            buf.extend_from_slice(LOG_PREFIX_SEPARATOR.as_bytes());
        }
        buf.extend_from_slice(line);
        buf.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&buf)
            .await
            .map_err(|e| Error::io(format!("writing {}", self.path.display()), e))?;
        file.flush()
            .await
            .map_err(|e| Error::io(format!("flushing {}", self.path.display()), e))
    }
}

/// Open sinks keyed by path, so merged instances share one writer.
#[derive(Default)]
pub struct LogSinks {
    sinks: Mutex<HashMap<PathBuf, LogSink>>,
}

impl LogSinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the sink for `path`, opening it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened.
    pub async fn get(&self, path: &Path) -> Result<LogSink> {
        if let Some(sink) = self.sinks.lock().get(path) {
            return Ok(sink.clone());
        }

        let opened = LogSink::open(path).await?;

        // Another instance may have opened it while we were awaiting.
        Ok(self
            .sinks
            .lock()
            .entry(path.to_path_buf())
            .or_insert(opened)
            .clone())
    }

    /// Drop every cached sink. Writers still holding clones keep working.
    pub fn clear(&self) {
        self.sinks.lock().clear();
    }
}

/// Copy `reader` line by line into `sink` until EOF.
///
/// Invalid UTF-8 is written through unchanged. A trailing line without a
/// newline is still written. Returns the number of lines captured.
pub async fn pump_lines<R>(reader: R, sink: LogSink, format: Option<LogDateFormat>) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    let mut lines = 0u64;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                if let Err(e) = sink.write_line(format.as_ref(), &buf).await {
                    warn!(path = %sink.path().display(), error = %e, "Dropping log line");
                }
                lines += 1;
            },
            Err(e) => {
                warn!(path = %sink.path().display(), error = %e, "Stopped reading instance output");
                break;
            },
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/logs/out.log");

        let sink = LogSink::open(&path).await.unwrap();
        sink.write_line(None, b"hello").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn test_append_preserves_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, "old\n").unwrap();

        let sink = LogSink::open(&path).await.unwrap();
        sink.write_line(None, b"new").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }

    #[tokio::test]
    async fn test_pump_prefixes_each_line_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        let sink = LogSink::open(&path).await.unwrap();
        let format = LogDateFormat::parse("[ts]").unwrap();

        let input: &[u8] = b"one\r\ntwo\nthree";
        let lines = pump_lines(input, sink, Some(format)).await;

        assert_eq!(lines, 3);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "ts: one\nts: two\nts: three\n"
        );
    }

    #[tokio::test]
    async fn test_sinks_share_one_writer_per_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merged.log");
        let sinks = LogSinks::new();

        let a = sinks.get(&path).await.unwrap();
        let b = sinks.get(&path).await.unwrap();
        assert!(Arc::ptr_eq(&a.file, &b.file));

        let other = sinks.get(&dir.path().join("other.log")).await.unwrap();
        assert!(!Arc::ptr_eq(&a.file, &other.file));

        // After clearing, the next lookup reopens the file.
        sinks.clear();
        let reopened = sinks.get(&path).await.unwrap();
        assert!(!Arc::ptr_eq(&a.file, &reopened.file));
        a.write_line(None, b"old writer").await.unwrap();
        reopened.write_line(None, b"new writer").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "old writer\nnew writer\n"
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_split_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merged.log");
        let sinks = Arc::new(LogSinks::new());

        let mut handles = Vec::new();
        for writer in 0..4 {
            let sink = sinks.get(&path).await.unwrap();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let line = format!("writer-{writer}-line-{i}-{}", "x".repeat(64));
                    sink.write_line(None, line.as_bytes()).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 200);
        assert!(lines.iter().all(|l| l.starts_with("writer-") && l.ends_with(&"x".repeat(64))));
    }
}
