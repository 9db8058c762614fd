use std::sync::Arc;
use std::time::Duration;

use catena_core::error::CrawlError;
use catena_core::fetch::FetchConfig;
use catena_core::traits::Fetcher;
use moka::sync::Cache;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Browser-like headers sent with every request unless overridden.
const DEFAULT_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.9"),
    ("cache-control", "no-cache"),
    ("pragma", "no-cache"),
];

/// Builder for [`ReqwestFetcher`].
#[derive(Debug, Clone)]
pub struct ReqwestFetcherBuilder {
    timeout: Duration,
    verify_ssl: bool,
    user_agent: Option<String>,
    headers: Vec<(String, String)>,
    max_proxy_clients: u64,
}

impl Default for ReqwestFetcherBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            verify_ssl: true,
            user_agent: None,
            headers: Vec::new(),
            max_proxy_clients: 64,
        }
    }
}

impl ReqwestFetcherBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Adds a header. Caller headers win over the defaults.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// How many per-proxy clients to keep alive.
    pub fn max_proxy_clients(mut self, max: u64) -> Self {
        self.max_proxy_clients = max;
        self
    }

    pub fn build(self) -> Result<ReqwestFetcher, CrawlError> {
        let headers = build_headers(self.user_agent.as_deref(), &self.headers)?;
        let settings = Arc::new(ClientSettings {
            timeout: self.timeout,
            verify_ssl: self.verify_ssl,
            headers,
        });
        let direct = settings.client(None)?;
        let proxied = Cache::builder()
            .max_capacity(self.max_proxy_clients)
            .build();
        Ok(ReqwestFetcher {
            direct,
            proxied,
            settings,
        })
    }
}

#[derive(Debug)]
struct ClientSettings {
    timeout: Duration,
    verify_ssl: bool,
    headers: HeaderMap,
}

impl ClientSettings {
    fn client(&self, proxy: Option<&str>) -> Result<Client, CrawlError> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .default_headers(self.headers.clone())
            .danger_accept_invalid_certs(!self.verify_ssl);
        if let Some(address) = proxy {
            let proxy = reqwest::Proxy::all(address).map_err(|e| CrawlError::InvalidProxy {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| CrawlError::HttpError(format!("Failed to build HTTP client: {e}")))
    }
}

/// HTTP transport using reqwest.
///
/// Direct requests share one client. Proxied requests use one client per
/// proxy address, kept in a bounded cache so connections are reused
/// between requests through the same proxy.
#[derive(Clone)]
pub struct ReqwestFetcher {
    direct: Client,
    proxied: Cache<String, Client>,
    settings: Arc<ClientSettings>,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, CrawlError> {
        Self::builder().build()
    }

    pub fn builder() -> ReqwestFetcherBuilder {
        ReqwestFetcherBuilder::default()
    }

    /// Builder preloaded with the timeout and TLS settings of a fetch config.
    pub fn builder_from_config(config: &FetchConfig) -> ReqwestFetcherBuilder {
        Self::builder()
            .timeout(config.timeout())
            .verify_ssl(config.verify_ssl)
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self, CrawlError> {
        Self::builder_from_config(config).build()
    }

    /// Drops the cached client for a proxy.
    pub fn invalidate_proxy(&self, proxy: &str) {
        self.proxied.invalidate(proxy);
    }

    pub fn cached_proxy_clients(&self) -> u64 {
        self.proxied.run_pending_tasks();
        self.proxied.entry_count()
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, CrawlError> {
        let Some(address) = proxy else {
            return Ok(self.direct.clone());
        };
        self.proxied
            .try_get_with(address.to_string(), || self.settings.client(Some(address)))
            .map_err(|e| match e.as_ref() {
                CrawlError::InvalidProxy { address, reason } => CrawlError::InvalidProxy {
                    address: address.clone(),
                    reason: reason.clone(),
                },
                other => CrawlError::HttpError(other.to_string()),
            })
    }

    fn map_error(&self, e: reqwest::Error, proxy: Option<&str>) -> CrawlError {
        if e.is_timeout() {
            CrawlError::Timeout(self.settings.timeout.as_millis() as u64)
        } else if e.is_connect() {
            if let Some(address) = proxy {
                self.invalidate_proxy(address);
            }
            CrawlError::NetworkError(format!("Connection failed: {e}"))
        } else {
            CrawlError::HttpError(e.to_string())
        }
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, proxy: Option<&str>) -> Result<String, CrawlError> {
        let client = self.client_for(proxy)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e, proxy))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| CrawlError::HttpError(format!("Failed to read response body: {e}")))
    }
}

/// Merges the default headers, the user agent, and caller headers.
fn build_headers(
    user_agent: Option<&str>,
    extra: &[(String, String)],
) -> Result<HeaderMap, CrawlError> {
    let mut headers = HeaderMap::new();
    let defaults = DEFAULT_HEADERS
        .iter()
        .map(|(k, v)| (*k, *v))
        .chain(std::iter::once((
            "user-agent",
            user_agent.unwrap_or(DEFAULT_USER_AGENT),
        )));
    let extra = extra.iter().map(|(k, v)| (k.as_str(), v.as_str()));

    for (name, value) in defaults.chain(extra) {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CrawlError::ConfigError(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| CrawlError::ConfigError(format!("Invalid value for header '{name}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
