use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::CrawlError;
use crate::proxy::ProxyPool;
use crate::retry::RetryPolicy;
use crate::traits::Fetcher;

/// Settings for fetching a single URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Route requests through the proxy pool when one is attached.
    pub use_proxy: bool,
    /// Verify TLS certificates. Consumed by the transport.
    pub verify_ssl: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            retry_base_delay_ms: 2_000,
            max_retry_delay_ms: 30_000,
            use_proxy: true,
            verify_ssl: true,
        }
    }
}

impl FetchConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_proxy(mut self, use_proxy: bool) -> Self {
        self.use_proxy = use_proxy;
        self
    }

    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.max_retry_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.timeout_ms == 0 {
            return Err(CrawlError::ConfigError("timeout must be greater than zero".into()));
        }
        if self.max_retry_delay_ms < self.retry_base_delay_ms {
            return Err(CrawlError::ConfigError(format!(
                "max_retry_delay_ms ({}) is smaller than retry_base_delay_ms ({})",
                self.max_retry_delay_ms, self.retry_base_delay_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Success,
    Failed,
}

/// Result of fetching one URL, after all retries.
#[derive(Debug)]
pub struct FetchResult {
    pub url: String,
    pub outcome: FetchOutcome,
    pub content: Option<String>,
    pub error: Option<CrawlError>,
    pub attempts: u32,
    /// Proxy used by the last attempt, if any.
    pub proxy: Option<String>,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.outcome == FetchOutcome::Success
    }
}

/// Fetches URLs with timeouts, proxy rotation and bounded retries.
///
/// Never returns an error: every failure ends up in a [`FetchResult`] with
/// outcome `Failed`.
pub struct FetchService<F> {
    fetcher: F,
    pool: Option<ProxyPool>,
    config: FetchConfig,
    policy: RetryPolicy,
    rng: Arc<Mutex<StdRng>>,
    cancel: CancellationToken,
}

impl<F: Fetcher> FetchService<F> {
    pub fn new(fetcher: F, config: FetchConfig) -> Self {
        let policy = config.retry_policy();
        Self {
            fetcher,
            pool: None,
            config,
            policy,
            rng: Arc::new(Mutex::new(StdRng::from_os_rng())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_proxy_pool(mut self, pool: ProxyPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Seeds the jitter source so retry delays are reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    /// Backoff sleeps end early when this token is cancelled.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn proxy_pool(&self) -> Option<&ProxyPool> {
        self.pool.as_ref()
    }

    fn active_pool(&self) -> Option<&ProxyPool> {
        if self.config.use_proxy {
            self.pool.as_ref()
        } else {
            None
        }
    }

    pub async fn fetch(&self, url: &str) -> FetchResult {
        let max_attempts = self.config.max_attempts();
        let mut attempts = 0;
        let mut last_error = None;
        let mut last_proxy = None;

        for attempt in 1..=max_attempts {
            attempts = attempt;

            let proxy = match self.active_pool() {
                Some(pool) => match pool.acquire().await {
                    Ok(address) => Some(address),
                    Err(e) => {
                        tracing::warn!(url = %url, attempt, error = %e, "No proxy available");
                        last_error = Some(e);
                        last_proxy = None;
                        if !self.wait_before_retry(attempt, max_attempts).await {
                            last_error = Some(CrawlError::Cancelled);
                            break;
                        }
                        continue;
                    }
                },
                None => None,
            };

            let result = match tokio::time::timeout(
                self.config.timeout(),
                self.fetcher.fetch(url, proxy.as_deref()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CrawlError::Timeout(self.config.timeout_ms)),
            };

            match result {
                Ok(content) => {
                    if let (Some(pool), Some(address)) = (self.active_pool(), proxy.as_deref()) {
                        pool.report_success(address);
                    }
                    tracing::debug!(url = %url, attempt, proxy = ?proxy, "Fetched");
                    return FetchResult {
                        url: url.to_string(),
                        outcome: FetchOutcome::Success,
                        content: Some(content),
                        error: None,
                        attempts,
                        proxy,
                    };
                }
                Err(e) => {
                    if e.should_penalize_proxy()
                        && let (Some(pool), Some(address)) = (self.active_pool(), proxy.as_deref())
                    {
                        pool.report_failure(address);
                    }
                    tracing::debug!(
                        url = %url,
                        attempt,
                        max_attempts,
                        proxy = ?proxy,
                        error = %e,
                        "Fetch attempt failed"
                    );
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    last_proxy = proxy;
                    if !retryable {
                        break;
                    }
                    if !self.wait_before_retry(attempt, max_attempts).await {
                        last_error = Some(CrawlError::Cancelled);
                        break;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| CrawlError::Generic("no attempt made".into()));
        tracing::warn!(url = %url, attempts, error = %error, "Fetch failed");
        FetchResult {
            url: url.to_string(),
            outcome: FetchOutcome::Failed,
            content: None,
            error: Some(error),
            attempts,
            proxy: last_proxy,
        }
    }

    /// Sleeps before the next attempt. Returns false if cancelled.
    /// No sleep follows the final attempt.
    async fn wait_before_retry(&self, attempt: u32, max_attempts: u32) -> bool {
        if attempt >= max_attempts {
            return true;
        }
        let delay = {
            let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
            self.policy.delay_for(attempt, &mut *rng)
        };
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
