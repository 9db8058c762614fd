use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use catena_core::error::CrawlError;
use catena_core::models::{Record, StoredEntry, compute_hash};
use catena_core::traits::Storage;
use url::Url;

/// Writes each entry to its own pretty-printed JSON file in a directory.
#[derive(Debug)]
pub struct PerUrlStore {
    dir: PathBuf,
    saved: AtomicUsize,
}

impl PerUrlStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            saved: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn saved_count(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(file_name_for(url))
    }
}

/// `{host}{path}_{hash8}.json` with `/` and `:` turned into `_` and
/// anything outside `[A-Za-z0-9._-]` dropped. The hash suffix keeps URLs
/// that differ only in query or in dropped characters apart.
pub fn file_name_for(url: &str) -> String {
    let hash = compute_hash(url);
    let stem = match Url::parse(url) {
        Ok(parsed) => {
            let mut host = parsed.host_str().unwrap_or_default().to_string();
            if let Some(port) = parsed.port() {
                host.push('_');
                host.push_str(&port.to_string());
            }
            format!("{host}{}", parsed.path().replace('/', "_"))
        }
        Err(_) => url.replace([':', '/'], "_"),
    };
    let raw = format!("{stem}_{}.json", &hash[..8]);
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

impl Storage for PerUrlStore {
    async fn save(&self, url: &str, record: &Record) -> Result<(), CrawlError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(&StoredEntry::new(url, record))?;
        let path = self.path_for(url);
        tokio::fs::write(&path, body).await?;
        self.saved.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(url, path = %path.display(), "Saved page");
        Ok(())
    }

    async fn finalize(&self) -> Result<(), CrawlError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tracing::info!(
            dir = %self.dir.display(),
            files = self.saved_count(),
            "Per-URL results written"
        );
        Ok(())
    }
}
