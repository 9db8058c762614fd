//! Shared proxy pool with health tracking and automatic replenishment.
//!
//! # Proxy lifecycle
//!
//! ```text
//! UNTESTED --[success]--> HEALTHY --[N failures]--> FAILED
//!     |                      ^                        |
//!     +---[N failures]-------|------------------------+
//!                            |                        |
//!                  [success] +-- UNTESTED <--[reset / second chance]
//! ```
//!
//! `acquire` picks uniformly at random among healthy and untested proxies.
//! When none are left it runs exhaustion recovery (re-fetch every source,
//! then reset failed proxies once) before reporting `ProxyExhausted`.
//! Recovery is single-flight: concurrent acquirers wait for the one
//! recovery already in progress instead of starting their own.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CrawlError;
use crate::traits::{Fetcher, ProxySource};

/// Proxy URL schemes the pool accepts.
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "socks4", "socks4a", "socks5", "socks5h"];

/// Validate a raw proxy string and normalize it to `scheme://[user:pass@]host:port`.
///
/// A missing port is only accepted for `http`/`https`, where the scheme's
/// default port is filled in.
pub fn parse_proxy_address(raw: &str) -> Result<String, CrawlError> {
    let raw = raw.trim();
    let invalid = |reason: &str| CrawlError::InvalidProxy {
        address: raw.to_string(),
        reason: reason.to_string(),
    };

    if !raw.contains("://") {
        return Err(invalid("missing scheme"));
    }
    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;

    let scheme = url.scheme();
    if !SUPPORTED_SCHEMES.contains(&scheme) {
        return Err(invalid(&format!("unsupported scheme '{scheme}'")));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port"))?;
    if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("unexpected path or query"));
    }

    let credentials = match (url.username(), url.password()) {
        ("", _) => String::new(),
        (user, Some(pass)) => format!("{user}:{pass}@"),
        (user, None) => format!("{user}@"),
    };
    Ok(format!("{scheme}://{credentials}{host}:{port}"))
}

/// Health of a single proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    Untested,
    Healthy,
    Failed,
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyStatus::Untested => write!(f, "untested"),
            ProxyStatus::Healthy => write!(f, "healthy"),
            ProxyStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A proxy known to the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub address: String,
    pub status: ProxyStatus,
    pub consecutive_failures: u32,
    pub last_used: Option<DateTime<Utc>>,
}

impl Proxy {
    fn new(address: String) -> Self {
        Self {
            address,
            status: ProxyStatus::Untested,
            consecutive_failures: 0,
            last_used: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status != ProxyStatus::Failed
    }
}

/// Pool behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyPoolConfig {
    /// Consecutive failures before a proxy is retired.
    pub failure_threshold: u32,
    /// Source endpoint URLs. The pool itself works with [`ProxySource`]
    /// objects; front ends build those from these URLs.
    pub sources: Vec<String>,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
            sources: Vec::new(),
        }
    }
}

impl ProxyPoolConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.failure_threshold == 0 {
            return Err(CrawlError::ConfigError(
                "failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A proxy string that `add` refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedProxy {
    pub address: String,
    pub reason: String,
}

/// Outcome of [`ProxyPool::add`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddReport {
    pub added: usize,
    pub duplicates: usize,
    pub rejected: Vec<RejectedProxy>,
}

/// Outcome of [`ProxyPool::fetch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub sources_queried: usize,
    pub sources_failed: usize,
    pub added: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

/// Snapshot of pool health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyStats {
    pub total: usize,
    pub available: usize,
    pub healthy: usize,
    pub untested: usize,
    pub failed: usize,
    pub failure_rate: f64,
}

/// Outcome of [`ProxyPool::validate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub total: usize,
    pub working: usize,
    pub success_rate: f64,
}

struct PoolState {
    proxies: BTreeMap<String, Proxy>,
    rng: StdRng,
    /// Set once failed proxies were reset during the current exhaustion
    /// episode. Cleared by any success or newly added proxy.
    second_chance_spent: bool,
    /// Bumped every time a recovery runs, so waiters can tell that one
    /// already happened while they queued.
    recovery_epoch: u64,
}

impl PoolState {
    fn available(&self) -> impl Iterator<Item = &Proxy> {
        self.proxies.values().filter(|p| p.is_available())
    }

    fn insert(&mut self, address: String) -> bool {
        if self.proxies.contains_key(&address) {
            return false;
        }
        self.proxies.insert(address.clone(), Proxy::new(address));
        self.second_chance_spent = false;
        true
    }

    fn reset_failed(&mut self) -> usize {
        let mut count = 0;
        for proxy in self.proxies.values_mut() {
            if proxy.status == ProxyStatus::Failed {
                proxy.status = ProxyStatus::Untested;
                proxy.consecutive_failures = 0;
                count += 1;
            }
        }
        count
    }
}

struct PoolShared {
    config: ProxyPoolConfig,
    state: Mutex<PoolState>,
    sources: RwLock<Vec<Arc<dyn ProxySource>>>,
    recovery: tokio::sync::Mutex<()>,
}

/// Thread-safe proxy pool. Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct ProxyPool {
    shared: Arc<PoolShared>,
}

impl fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyPool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new(ProxyPoolConfig::default())
    }
}

impl ProxyPool {
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState {
                    proxies: BTreeMap::new(),
                    rng: StdRng::from_os_rng(),
                    second_chance_spent: false,
                    recovery_epoch: 0,
                }),
                sources: RwLock::new(Vec::new()),
                recovery: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Makes proxy selection reproducible.
    pub fn with_seed(self, seed: u64) -> Self {
        self.lock_state().rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_sources(self, sources: Vec<Arc<dyn ProxySource>>) -> Self {
        self.set_sources(sources);
        self
    }

    pub fn config(&self) -> &ProxyPoolConfig {
        &self.shared.config
    }

    /// Acquires the state lock, recovering from poison if necessary.
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.shared.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy pool mutex");
            poisoned.into_inner()
        })
    }

    fn current_sources(&self) -> Vec<Arc<dyn ProxySource>> {
        match self.shared.sources.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    /// Replaces the ordered list of source endpoints.
    pub fn set_sources(&self, sources: Vec<Arc<dyn ProxySource>>) {
        match self.shared.sources.write() {
            Ok(mut guard) => *guard = sources,
            Err(poisoned) => *poisoned.into_inner() = sources,
        }
    }

    pub fn add_source(&self, source: Arc<dyn ProxySource>) {
        match self.shared.sources.write() {
            Ok(mut guard) => guard.push(source),
            Err(poisoned) => poisoned.into_inner().push(source),
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.current_sources()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn has_sources(&self) -> bool {
        !self.current_sources().is_empty()
    }

    // -----------------------------------------------------------------------
    // Population
    // -----------------------------------------------------------------------

    /// Adds proxies as untested. Malformed addresses are rejected one by one.
    pub fn add<I, S>(&self, addresses: I) -> AddReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = AddReport::default();
        let mut parsed = Vec::new();
        for raw in addresses {
            let raw = raw.as_ref();
            if raw.trim().is_empty() {
                continue;
            }
            match parse_proxy_address(raw) {
                Ok(address) => parsed.push(address),
                Err(e) => {
                    tracing::debug!(proxy = %raw, error = %e, "Rejected proxy address");
                    report.rejected.push(RejectedProxy {
                        address: raw.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut state = self.lock_state();
        for address in parsed {
            if state.insert(address) {
                report.added += 1;
            } else {
                report.duplicates += 1;
            }
        }
        report
    }

    /// Queries every configured source and merges the results.
    pub async fn fetch(&self) -> FetchReport {
        let sources = self.current_sources();
        self.fetch_from(&sources).await
    }

    /// Queries the given sources concurrently and merges new proxies as
    /// untested. Failing sources are logged and skipped.
    pub async fn fetch_from(&self, sources: &[Arc<dyn ProxySource>]) -> FetchReport {
        let mut report = FetchReport {
            sources_queried: sources.len(),
            ..FetchReport::default()
        };

        let results = join_all(sources.iter().map(|source| async move {
            (source.name().to_string(), source.fetch().await)
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(addresses) => {
                    let added = self.add(&addresses);
                    tracing::info!(
                        source = %name,
                        found = addresses.len(),
                        added = added.added,
                        "Fetched proxies from source"
                    );
                    report.added += added.added;
                    report.duplicates += added.duplicates;
                    report.rejected += added.rejected.len();
                }
                Err(e) => {
                    tracing::warn!(source = %name, error = %e, "Proxy source failed");
                    report.sources_failed += 1;
                }
            }
        }

        if report.added == 0 {
            tracing::warn!(
                sources = report.sources_queried,
                failed = report.sources_failed,
                "No new proxies obtained from sources"
            );
        }
        report
    }

    // -----------------------------------------------------------------------
    // Consumption
    // -----------------------------------------------------------------------

    /// Picks a random healthy or untested proxy, recovering from exhaustion
    /// if needed.
    pub async fn acquire(&self) -> Result<String, CrawlError> {
        let epoch = match self.try_pick() {
            Ok(address) => return Ok(address),
            Err(epoch) => epoch,
        };
        self.recover_since(epoch).await;
        self.try_pick().map_err(|_| CrawlError::ProxyExhausted)
    }

    /// Returns the picked address, or the current recovery epoch when no
    /// proxy is available.
    fn try_pick(&self) -> Result<String, u64> {
        let mut state = self.lock_state();
        let count = state.available().count();
        if count == 0 {
            return Err(state.recovery_epoch);
        }
        let index = state.rng.random_range(0..count);
        let address = state
            .available()
            .nth(index)
            .map(|p| p.address.clone())
            .ok_or(state.recovery_epoch)?;
        if let Some(proxy) = state.proxies.get_mut(&address) {
            proxy.last_used = Some(Utc::now());
        }
        Ok(address)
    }

    /// Replenishes an exhausted pool: re-fetch every source, then, if still
    /// empty, give failed proxies a second chance (once per exhaustion
    /// episode). Returns the number of available proxies afterwards.
    pub async fn exhaustion_recovery(&self) -> usize {
        let epoch = self.lock_state().recovery_epoch;
        self.recover_since(epoch).await
    }

    async fn recover_since(&self, observed_epoch: u64) -> usize {
        let _guard = self.shared.recovery.lock().await;

        {
            let mut state = self.lock_state();
            if state.recovery_epoch != observed_epoch {
                // Another task recovered while we waited.
                return state.available().count();
            }
            state.recovery_epoch += 1;
            let available = state.available().count();
            if available > 0 {
                return available;
            }
        }

        tracing::warn!("Proxy pool exhausted, attempting recovery");

        let sources = self.current_sources();
        if !sources.is_empty() {
            let report = self.fetch_from(&sources).await;
            let available = self.lock_state().available().count();
            if available > 0 {
                tracing::info!(added = report.added, available, "Recovered proxies from sources");
                return available;
            }
        }

        let mut state = self.lock_state();
        if state.second_chance_spent {
            tracing::warn!("Proxy pool exhausted and second chance already spent");
            return state.available().count();
        }
        let reset = state.reset_failed();
        state.second_chance_spent = true;
        if reset > 0 {
            tracing::info!(reset, "Reset failed proxies for a second chance");
        }
        state.available().count()
    }

    /// Marks a proxy healthy and clears its failure count.
    pub fn report_success(&self, address: &str) {
        let mut state = self.lock_state();
        if let Some(proxy) = state.proxies.get_mut(address) {
            proxy.consecutive_failures = 0;
            proxy.status = ProxyStatus::Healthy;
            state.second_chance_spent = false;
        }
    }

    /// Records a failure; retires the proxy once the threshold is reached.
    pub fn report_failure(&self, address: &str) {
        let threshold = self.shared.config.failure_threshold.max(1);
        let mut state = self.lock_state();
        if let Some(proxy) = state.proxies.get_mut(address) {
            proxy.consecutive_failures = proxy.consecutive_failures.saturating_add(1);
            if proxy.consecutive_failures >= threshold && proxy.status != ProxyStatus::Failed {
                proxy.status = ProxyStatus::Failed;
                tracing::debug!(
                    proxy = %address,
                    failures = proxy.consecutive_failures,
                    "Proxy retired"
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Puts every proxy back to untested.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        for proxy in state.proxies.values_mut() {
            proxy.status = ProxyStatus::Untested;
            proxy.consecutive_failures = 0;
        }
        state.second_chance_spent = false;
    }

    /// Puts failed proxies back to untested. Returns how many were reset.
    pub fn reset_failed(&self) -> usize {
        self.lock_state().reset_failed()
    }

    /// Drops retired proxies. Returns how many were removed.
    pub fn remove_failed(&self) -> usize {
        let mut state = self.lock_state();
        let before = state.proxies.len();
        state.proxies.retain(|_, p| p.status != ProxyStatus::Failed);
        before - state.proxies.len()
    }

    pub fn clear(&self) {
        self.lock_state().proxies.clear();
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> ProxyStats {
        let state = self.lock_state();
        let mut stats = ProxyStats {
            total: state.proxies.len(),
            ..ProxyStats::default()
        };
        for proxy in state.proxies.values() {
            match proxy.status {
                ProxyStatus::Healthy => stats.healthy += 1,
                ProxyStatus::Untested => stats.untested += 1,
                ProxyStatus::Failed => stats.failed += 1,
            }
        }
        stats.available = stats.healthy + stats.untested;
        if stats.total > 0 {
            stats.failure_rate = stats.failed as f64 / stats.total as f64;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.lock_state().proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().proxies.is_empty()
    }

    pub fn get(&self, address: &str) -> Option<Proxy> {
        self.lock_state().proxies.get(address).cloned()
    }

    pub fn proxies(&self) -> Vec<Proxy> {
        self.lock_state().proxies.values().cloned().collect()
    }

    /// Addresses of proxies that have succeeded at least once.
    pub fn healthy_addresses(&self) -> Vec<String> {
        self.lock_state()
            .proxies
            .values()
            .filter(|p| p.status == ProxyStatus::Healthy)
            .map(|p| p.address.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Probes every non-failed proxy by fetching `probe_url` through it.
    ///
    /// Results are reported into the pool. Call [`remove_failed`](Self::remove_failed)
    /// afterwards to purge the proxies that did not answer.
    pub async fn validate<F: Fetcher>(
        &self,
        fetcher: &F,
        probe_url: &str,
        concurrency: usize,
        timeout: Duration,
    ) -> ValidationReport {
        let candidates: Vec<String> = self
            .lock_state()
            .available()
            .map(|p| p.address.clone())
            .collect();
        let total = candidates.len();
        tracing::info!(total, probe_url = %probe_url, "Validating proxies");

        let working = futures::stream::iter(candidates)
            .map(|address| async move {
                let ok = matches!(
                    tokio::time::timeout(timeout, fetcher.fetch(probe_url, Some(&address))).await,
                    Ok(Ok(_))
                );
                (address, ok)
            })
            .buffer_unordered(concurrency.max(1))
            .fold(0usize, |working, (address, ok)| async move {
                if ok {
                    self.report_success(&address);
                    working + 1
                } else {
                    tracing::debug!(proxy = %address, "Proxy failed validation");
                    self.report_failure(&address);
                    working
                }
            })
            .await;

        let success_rate = if total > 0 {
            working as f64 / total as f64
        } else {
            0.0
        };
        tracing::info!(total, working, "Proxy validation complete");
        ValidationReport {
            total,
            working,
            success_rate,
        }
    }
}
