use std::path::{Path, PathBuf};
use std::sync::Mutex;

use catena_core::error::CrawlError;
use catena_core::models::{Record, StoredEntry};
use catena_core::traits::Storage;

/// Buffers every entry and writes them as one JSON array on finalize.
#[derive(Debug)]
pub struct JsonArrayStore {
    path: PathBuf,
    entries: Mutex<Vec<StoredEntry>>,
}

impl JsonArrayStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn saved_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Storage for JsonArrayStore {
    async fn save(&self, url: &str, record: &Record) -> Result<(), CrawlError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StoredEntry::new(url, record));
        Ok(())
    }

    async fn finalize(&self) -> Result<(), CrawlError> {
        let body = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            serde_json::to_vec_pretty(&*entries)?
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, body).await?;
        tracing::info!(
            path = %self.path.display(),
            entries = self.saved_count(),
            "Wrote JSON results"
        );
        Ok(())
    }
}
