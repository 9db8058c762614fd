use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Data produced by a step parser. Steps exchange arbitrary JSON.
pub type Record = serde_json::Value;

/// A parsed record together with the URL it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub data: Record,
}

/// Envelope written by the file sinks: `{ url, timestamp, data }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub data: Record,
}

impl StoredEntry {
    pub fn new(url: &str, data: &Record) -> Self {
        Self {
            url: url.to_string(),
            timestamp: Utc::now(),
            data: data.clone(),
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("https://example.com/a");
        let h2 = compute_hash("https://example.com/a");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_compute_hash_different_inputs() {
        assert_ne!(
            compute_hash("https://example.com/a"),
            compute_hash("https://example.com/b")
        );
    }

    #[test]
    fn test_stored_entry_serializes_envelope() {
        let entry = StoredEntry::new("https://example.com", &serde_json::json!({"title": "Hi"}));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["url"], "https://example.com");
        assert_eq!(value["data"]["title"], "Hi");
        assert!(value["timestamp"].is_string());
    }
}
