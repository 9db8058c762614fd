use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use catena_core::error::CrawlError;
use catena_core::models::{Record, StoredEntry};
use catena_core::traits::Storage;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

pub const DEFAULT_FLUSH_EVERY: usize = 100;

struct Writer {
    out: BufWriter<File>,
    unflushed: usize,
}

/// Appends one JSON object per line.
///
/// The file is opened lazily on the first save and flushed every
/// `flush_every` entries and on finalize.
pub struct JsonLinesStore {
    path: PathBuf,
    flush_every: usize,
    writer: Mutex<Option<Writer>>,
    saved: AtomicUsize,
}

impl JsonLinesStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            flush_every: DEFAULT_FLUSH_EVERY,
            writer: Mutex::new(None),
            saved: AtomicUsize::new(0),
        }
    }

    /// Values below 1 are raised to 1.
    pub fn with_flush_every(mut self, n: usize) -> Self {
        self.flush_every = n.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn saved_count(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<Writer, CrawlError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(Writer {
            out: BufWriter::new(file),
            unflushed: 0,
        })
    }
}

impl Storage for JsonLinesStore {
    async fn save(&self, url: &str, record: &Record) -> Result<(), CrawlError> {
        let mut line = serde_json::to_vec(&StoredEntry::new(url, record))?;
        line.push(b'\n');

        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(writer) = guard.as_mut() else {
            return Err(CrawlError::StorageError("JSONL writer unavailable".into()));
        };
        writer.out.write_all(&line).await?;
        writer.unflushed += 1;
        if writer.unflushed >= self.flush_every {
            writer.out.flush().await?;
            writer.unflushed = 0;
        }
        self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn finalize(&self) -> Result<(), CrawlError> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                writer.out.flush().await?;
                writer.unflushed = 0;
            }
            // Nothing saved: still leave an (empty) output file behind.
            None => *guard = Some(self.open().await?),
        }
        tracing::info!(
            path = %self.path.display(),
            entries = self.saved_count(),
            "Flushed JSONL results"
        );
        Ok(())
    }
}
