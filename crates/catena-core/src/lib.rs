pub mod chain;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod proxy;
pub mod reporter;
pub mod retry;
pub mod runner;
pub mod step;
pub mod testutil;
pub mod traits;

pub use chain::{ChainConfig, ChainEngine, ChainOutcome, ChainRunStats, ChainState, Frontier};
pub use config::CrawlConfig;
pub use error::CrawlError;
pub use fetch::{FetchConfig, FetchOutcome, FetchResult, FetchService};
pub use models::{PageRecord, Record, StoredEntry, compute_hash};
pub use proxy::{ProxyPool, ProxyPoolConfig, ProxyStats, ProxyStatus, ValidationReport};
pub use reporter::{ChainEvent, ChainReporter, TracingChainReporter};
pub use retry::RetryPolicy;
pub use runner::{StepOutput, StepRunner, StepStats};
pub use step::ChainStep;
pub use traits::{Fetcher, NullStore, ProxySource, Storage};
