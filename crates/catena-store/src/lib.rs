pub mod json_array;
pub mod json_lines;
pub mod per_url;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use catena_core::error::CrawlError;
use catena_core::models::Record;
use catena_core::traits::Storage;

pub use json_array::JsonArrayStore;
pub use json_lines::JsonLinesStore;
pub use per_url::PerUrlStore;

/// Output format selectable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// One pretty-printed JSON array.
    #[default]
    Json,
    /// One JSON object per line.
    Jsonl,
    /// One file per URL in a directory.
    PerUrl,
}

impl StoreKind {
    /// Output path used when none is given.
    pub fn default_path(&self) -> &'static str {
        match self {
            StoreKind::Json => "crawl_results.json",
            StoreKind::Jsonl => "crawl_results.jsonl",
            StoreKind::PerUrl => "crawl_results",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Json => write!(f, "json"),
            StoreKind::Jsonl => write!(f, "jsonl"),
            StoreKind::PerUrl => write!(f, "per-url"),
        }
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(StoreKind::Json),
            "jsonl" | "json-lines" => Ok(StoreKind::Jsonl),
            "per-url" | "per_url" | "files" => Ok(StoreKind::PerUrl),
            other => Err(format!(
                "unknown storage '{other}' (expected json, jsonl or per-url)"
            )),
        }
    }
}

/// Any of the file sinks, chosen at runtime.
pub enum FileStore {
    Json(JsonArrayStore),
    Jsonl(JsonLinesStore),
    PerUrl(PerUrlStore),
}

impl FileStore {
    pub fn new(kind: StoreKind, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match kind {
            StoreKind::Json => FileStore::Json(JsonArrayStore::new(path)),
            StoreKind::Jsonl => FileStore::Jsonl(JsonLinesStore::new(path)),
            StoreKind::PerUrl => FileStore::PerUrl(PerUrlStore::new(path)),
        }
    }

    pub fn saved_count(&self) -> usize {
        match self {
            FileStore::Json(s) => s.saved_count(),
            FileStore::Jsonl(s) => s.saved_count(),
            FileStore::PerUrl(s) => s.saved_count(),
        }
    }
}

impl Storage for FileStore {
    async fn save(&self, url: &str, record: &Record) -> Result<(), CrawlError> {
        match self {
            FileStore::Json(s) => s.save(url, record).await,
            FileStore::Jsonl(s) => s.save(url, record).await,
            FileStore::PerUrl(s) => s.save(url, record).await,
        }
    }

    async fn finalize(&self) -> Result<(), CrawlError> {
        match self {
            FileStore::Json(s) => s.finalize().await,
            FileStore::Jsonl(s) => s.finalize().await,
            FileStore::PerUrl(s) => s.finalize().await,
        }
    }
}
