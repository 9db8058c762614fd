//! Multi-step chain orchestration.
//!
//! # Chain states
//!
//! ```text
//! IDLE --> RUNNING(0) --> RUNNING(1) --> ... --> RUNNING(n-1) --> COMPLETED
//!              |              |                      |
//!              +--[empty frontier: early end]--------+----------> COMPLETED
//!              +--[cancel token]-----------------------------> CANCELLED
//! ```
//!
//! Each step runs at most once, in order. Between steps the engine
//! deduplicates and caps the extracted URLs to form the next frontier.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::CrawlError;
use crate::fetch::{FetchConfig, FetchService};
use crate::models::PageRecord;
use crate::proxy::{ProxyPool, ProxyStats};
use crate::reporter::{ChainEvent, ChainReporter, TracingChainReporter};
use crate::runner::{StepRunner, StepStats};
use crate::step::ChainStep;
use crate::traits::{Fetcher, Storage};

/// Settings for a chain run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Maximum concurrent fetches within a step.
    pub concurrency_limit: usize,
    /// Cap on every frontier, the initial one included. `None` = unlimited.
    pub max_urls_per_step: Option<usize>,
    pub fetch: FetchConfig,
    /// Fetch directly when the proxy pool is empty at start.
    pub direct_fallback: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 8,
            max_urls_per_step: None,
            fetch: FetchConfig::default(),
            direct_fallback: true,
        }
    }
}

impl ChainConfig {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_max_urls_per_step(mut self, cap: usize) -> Self {
        self.max_urls_per_step = Some(cap);
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_direct_fallback(mut self, enabled: bool) -> Self {
        self.direct_fallback = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.concurrency_limit == 0 {
            return Err(CrawlError::ConfigError(
                "concurrency_limit must be greater than zero".into(),
            ));
        }
        if self.max_urls_per_step == Some(0) {
            return Err(CrawlError::ConfigError(
                "max_urls_per_step must be greater than zero".into(),
            ));
        }
        self.fetch.validate()
    }
}

/// Where the chain is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Idle,
    RunningStep(usize),
    Completed,
    Cancelled { step: usize },
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Idle => write!(f, "idle"),
            ChainState::RunningStep(i) => write!(f, "running step {i}"),
            ChainState::Completed => write!(f, "completed"),
            ChainState::Cancelled { step } => write!(f, "cancelled at step {step}"),
        }
    }
}

/// URLs for one step: distinct, in first-seen order, at most `cap`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontier {
    pub urls: Vec<String>,
    pub duplicates: usize,
    /// Distinct URLs dropped by the cap.
    pub truncated: usize,
    /// Empty or whitespace-only candidates dropped.
    pub blank: usize,
}

impl Frontier {
    pub fn build<I, S>(candidates: I, cap: Option<usize>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut frontier = Frontier::default();
        let mut seen = HashSet::new();
        for candidate in candidates {
            let url: String = candidate.into();
            if url.trim().is_empty() {
                frontier.blank += 1;
                continue;
            }
            if seen.contains(&url) {
                frontier.duplicates += 1;
                continue;
            }
            seen.insert(url.clone());
            if cap.is_some_and(|cap| frontier.urls.len() >= cap) {
                frontier.truncated += 1;
            } else {
                frontier.urls.push(url);
            }
        }
        frontier
    }
}

/// Aggregated statistics of one chain run.
#[derive(Debug, Clone, Serialize)]
pub struct ChainRunStats {
    pub run_id: Uuid,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub steps_completed: usize,
    pub final_results: usize,
    pub step_stats: BTreeMap<String, StepStats>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub cancelled: bool,
    pub storage_failures: usize,
    pub proxy: Option<ProxyStats>,
}

impl ChainRunStats {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            steps_completed: 0,
            final_results: 0,
            step_stats: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            cancelled: false,
            storage_failures: 0,
            proxy: None,
        }
    }

    fn absorb(&mut self, step: &str, stats: &StepStats) {
        self.total_requests += stats.urls_processed;
        self.successful_requests += stats.urls_processed - stats.fetch_failures;
        self.failed_requests += stats.fetch_failures;
        self.step_stats.insert(step.to_string(), stats.clone());
    }

    /// Successful requests over total requests, 0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// Result of [`ChainEngine::run`].
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub state: ChainState,
    /// Records of the terminal step, as handed to storage. Empty when the
    /// chain stopped before reaching it.
    pub records: Vec<PageRecord>,
    /// URLs left unprocessed by a cancelled run.
    pub pending_urls: Vec<String>,
    pub stats: ChainRunStats,
}

/// Drives a frontier through an ordered list of steps.
pub struct ChainEngine<F, S, R = TracingChainReporter> {
    steps: Vec<ChainStep>,
    config: ChainConfig,
    fetcher: F,
    storage: S,
    pool: Option<ProxyPool>,
    reporter: R,
    retry_seed: Option<u64>,
}

impl<F: Fetcher, S: Storage> ChainEngine<F, S, TracingChainReporter> {
    /// Validates the chain definition. Nothing touches the network here.
    pub fn new(
        steps: Vec<ChainStep>,
        config: ChainConfig,
        fetcher: F,
        storage: S,
    ) -> Result<Self, CrawlError> {
        validate_steps(&steps)?;
        config.validate()?;
        Ok(Self {
            steps,
            config,
            fetcher,
            storage,
            pool: None,
            reporter: TracingChainReporter,
            retry_seed: None,
        })
    }
}

impl<F: Fetcher, S: Storage, R: ChainReporter> ChainEngine<F, S, R> {
    pub fn with_reporter<R2: ChainReporter>(self, reporter: R2) -> ChainEngine<F, S, R2> {
        ChainEngine {
            steps: self.steps,
            config: self.config,
            fetcher: self.fetcher,
            storage: self.storage,
            pool: self.pool,
            reporter,
            retry_seed: self.retry_seed,
        }
    }

    pub fn with_proxy_pool(mut self, pool: ProxyPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Seeds retry jitter for reproducible runs.
    pub fn with_retry_seed(mut self, seed: u64) -> Self {
        self.retry_seed = Some(seed);
        self
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn proxy_pool(&self) -> Option<&ProxyPool> {
        self.pool.as_ref()
    }

    pub async fn run<I, U>(&self, initial_urls: I) -> Result<ChainOutcome, CrawlError>
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        self.run_with_cancel(initial_urls, CancellationToken::new())
            .await
    }

    /// Runs the chain. Partial failures and cancellation are reported in the
    /// outcome; only a storage `finalize` failure is returned as an error.
    pub async fn run_with_cancel<I, U>(
        &self,
        initial_urls: I,
        cancel: CancellationToken,
    ) -> Result<ChainOutcome, CrawlError>
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        let clock = Instant::now();
        let cap = self.config.max_urls_per_step;
        let mut stats = ChainRunStats::new(Uuid::new_v4());

        let initial = Frontier::build(initial_urls, cap);
        self.reporter.report(ChainEvent::ChainStarted {
            run_id: stats.run_id,
            steps: self.steps.len(),
            initial_urls: initial.urls.len(),
        });

        let mut fetch = FetchService::new(self.fetcher.clone(), self.config.fetch.clone())
            .with_cancel(cancel.clone());
        if let Some(pool) = self.prepare_proxies().await {
            fetch = fetch.with_proxy_pool(pool);
        }
        if let Some(seed) = self.retry_seed {
            fetch = fetch.with_rng_seed(seed);
        }
        let runner = StepRunner::new(&fetch, &self.reporter).with_cancel(cancel.clone());

        let mut state = ChainState::Idle;
        if initial.blank > 0 {
            tracing::debug!(blank = initial.blank, "Dropped blank initial URLs");
        }
        let mut frontier = initial.urls;
        let last = self.steps.len() - 1;
        let mut records = Vec::new();
        let mut pending_urls = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            if frontier.is_empty() {
                tracing::info!(step = %step.name, "Frontier is empty, chain ends early");
                state = ChainState::Completed;
                break;
            }
            if cancel.is_cancelled() {
                state = ChainState::Cancelled { step: index };
                pending_urls = frontier;
                break;
            }

            state = ChainState::RunningStep(index);
            self.reporter.report(ChainEvent::StepStarted {
                index,
                step: &step.name,
                urls: frontier.len(),
            });

            let output = runner
                .run(step, &frontier, self.config.concurrency_limit)
                .await;
            stats.absorb(&step.name, &output.stats);
            self.reporter.report(ChainEvent::StepCompleted {
                step: &step.name,
                stats: &output.stats,
            });
            if index == last {
                records = output.records;
            }

            // A step with nothing skipped ran to the end even if the token
            // fired meanwhile; the next loop turn picks up the cancellation.
            if !output.skipped.is_empty() {
                state = ChainState::Cancelled { step: index };
                pending_urls = output.skipped;
                break;
            }
            stats.steps_completed += 1;

            let Some(next_step) = self.steps.get(index + 1) else {
                state = ChainState::Completed;
                break;
            };

            let next = Frontier::build(output.next_urls, cap);
            self.reporter.report(ChainEvent::FrontierBuilt {
                step: &next_step.name,
                urls: next.urls.len(),
                duplicates: next.duplicates,
                truncated: next.truncated,
                blank: next.blank,
            });
            frontier = next.urls;
        }

        if let ChainState::Cancelled { step } = state {
            stats.cancelled = true;
            let name = self.steps.get(step).map_or("", |s| s.name.as_str());
            self.reporter.report(ChainEvent::Cancelled { step: name });
        }

        stats.storage_failures = self.store(&records).await;
        self.storage.finalize().await?;

        stats.final_results = records.len();
        stats.proxy = fetch.proxy_pool().map(ProxyPool::stats);
        stats.finished_at = Some(Utc::now());
        stats.duration_ms = clock.elapsed().as_millis() as u64;
        self.reporter.report(ChainEvent::ChainCompleted { stats: &stats });

        Ok(ChainOutcome {
            state,
            records,
            pending_urls,
            stats,
        })
    }

    /// Makes sure the pool has something to hand out before the first step.
    /// Returns `None` when requests should go out directly.
    async fn prepare_proxies(&self) -> Option<ProxyPool> {
        if !self.config.fetch.use_proxy {
            return None;
        }
        let pool = self.pool.clone()?;
        if pool.stats().available == 0 && pool.has_sources() {
            pool.fetch().await;
        }
        if pool.is_empty() {
            self.reporter.report(ChainEvent::ProxiesUnavailable {
                direct_fallback: self.config.direct_fallback,
            });
            if self.config.direct_fallback {
                return None;
            }
        }
        Some(pool)
    }

    /// Saves every record concurrently. Returns the number of failed saves.
    async fn store(&self, records: &[PageRecord]) -> usize {
        futures::stream::iter(records)
            .map(|record| async move {
                let result = self.storage.save(&record.url, &record.data).await;
                if let Err(e) = &result {
                    tracing::error!(url = %record.url, error = %e, "Failed to store record");
                }
                result.is_err()
            })
            .buffer_unordered(self.config.concurrency_limit.max(1))
            .fold(0, |failures, failed| async move { failures + usize::from(failed) })
            .await
    }
}

fn validate_steps(steps: &[ChainStep]) -> Result<(), CrawlError> {
    if steps.is_empty() {
        return Err(CrawlError::ConfigError("chain has no steps".into()));
    }
    let mut names = HashSet::new();
    let last = steps.len() - 1;
    for (index, step) in steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(CrawlError::ConfigError(format!("step {index} has an empty name")));
        }
        if !names.insert(step.name.as_str()) {
            return Err(CrawlError::ConfigError(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
        if index < last && step.is_terminal() {
            return Err(CrawlError::ConfigError(format!(
                "step '{}' has no next-URL extractor but is not the last step",
                step.name
            )));
        }
    }
    Ok(())
}
