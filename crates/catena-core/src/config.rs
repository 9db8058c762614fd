use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chain::ChainConfig;
use crate::error::CrawlError;
use crate::proxy::ProxyPoolConfig;

/// Complete run configuration, loadable from a JSON file.
///
/// ```json
/// {
///   "chain": { "concurrency_limit": 4, "max_urls_per_step": 100,
///              "fetch": { "timeout_ms": 10000, "max_retries": 2 } },
///   "proxy": { "failure_threshold": 1, "sources": ["https://..."] }
/// }
/// ```
///
/// Every field is optional and falls back to its default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub chain: ChainConfig,
    pub proxy: ProxyPoolConfig,
}

impl CrawlConfig {
    pub fn from_json_str(json: &str) -> Result<Self, CrawlError> {
        let config: CrawlConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CrawlError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        self.chain.validate()?;
        self.proxy.validate()
    }
}
