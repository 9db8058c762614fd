use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use catena_core::error::CrawlError;
use catena_core::traits::ProxySource;
use futures::future::BoxFuture;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};

/// Public proxy list endpoints used when no source is configured.
pub const DEFAULT_PROXY_SOURCES: &[&str] = &[
    "https://api.proxyscrape.com/v4/free-proxy-list/get?request=display_proxies&proxy_format=protocolipport&format=text",
    "https://cdn.jsdelivr.net/gh/databay-labs/free-proxy-list/socks5.txt",
    "https://cdn.jsdelivr.net/gh/databay-labs/free-proxy-list/http.txt",
    "https://www.freeproxy.world/?type=&anonymity=&country=&page=1",
    "https://proxydb.net/?anonlvl=4&offset=0",
];

const SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Schemes recognised in protocol table cells.
const TABLE_SCHEMES: &[&str] = &["http", "https", "socks4", "socks5"];

static IP_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}:\d{2,5}\b").expect("static ip:port pattern is valid")
});
static HOST_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.\-]+:\d{1,5}$").expect("static host:port pattern is valid")
});
static ROWS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody tr").expect("static 'tbody tr' selector is valid"));
static CELLS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("static 'td' selector is valid"));

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Scheme for bare `host:port` entries, guessed from the source URL.
pub fn infer_scheme(source_url: &str) -> &'static str {
    let lower = source_url.to_ascii_lowercase();
    if lower.contains("socks5") {
        "socks5"
    } else if lower.contains("socks4") {
        "socks4"
    } else {
        "http"
    }
}

/// Extracts raw proxy addresses from a source response.
///
/// Plain-text bodies are read line by line; HTML pages are scanned for
/// proxy tables first and for `ip:port` patterns second. The pool
/// validates whatever this returns.
pub fn parse_proxy_list(content: &str, source_url: &str) -> Vec<String> {
    if looks_like_html(content) {
        let document = Html::parse_document(content);
        let from_table = parse_table_rows(&document);
        if !from_table.is_empty() {
            return from_table;
        }
        let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");
        return IP_PORT
            .find_iter(&text)
            .map(|m| format!("http://{}", m.as_str()))
            .collect();
    }
    parse_lines(content, infer_scheme(source_url))
}

fn looks_like_html(content: &str) -> bool {
    let head: String = content.chars().take(2048).collect::<String>().to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype") || head.contains("<table")
}

/// One entry per line; `#` starts a comment. Bare entries get `scheme`.
fn parse_lines(content: &str, scheme: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|entry| !entry.starts_with('#'))
        .filter_map(|entry| {
            if entry.contains("://") {
                Some(entry.to_string())
            } else if HOST_PORT.is_match(entry) {
                Some(format!("{scheme}://{entry}"))
            } else {
                None
            }
        })
        .collect()
}

/// Reads `<tbody><tr>` rows holding an IPv4 cell, a port cell right after
/// it, and optionally cells naming protocols. A row listing several
/// protocols yields one address per protocol.
fn parse_table_rows(document: &Html) -> Vec<String> {
    let mut proxies = Vec::new();
    for row in document.select(&ROWS) {
        let cells: Vec<String> = row
            .select(&CELLS)
            .map(|cell| cell.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .collect();

        let Some(ip_index) = cells.iter().position(|c| c.parse::<Ipv4Addr>().is_ok()) else {
            continue;
        };
        let Some(port) = cells
            .get(ip_index + 1)
            .and_then(|c| c.split_whitespace().next())
            .and_then(|p| p.parse::<u16>().ok())
        else {
            continue;
        };

        let mut schemes: Vec<&str> = Vec::new();
        for cell in &cells[ip_index + 2..] {
            for token in cell.split(|ch: char| ch.is_whitespace() || ch == ',' || ch == '/') {
                let token = token.to_ascii_lowercase();
                if let Some(scheme) = TABLE_SCHEMES.iter().copied().find(|s| *s == token)
                    && !schemes.contains(&scheme)
                {
                    schemes.push(scheme);
                }
            }
        }
        if schemes.is_empty() {
            schemes.push("http");
        }

        let ip = &cells[ip_index];
        proxies.extend(schemes.iter().map(|scheme| format!("{scheme}://{ip}:{port}")));
    }
    proxies
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// A proxy list served over HTTP.
#[derive(Clone)]
pub struct HttpProxySource {
    url: String,
    client: Client,
}

impl HttpProxySource {
    pub fn new(url: impl Into<String>) -> Result<Self, CrawlError> {
        Ok(Self::with_client(url, source_client()?))
    }

    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    /// One source per URL, sharing a client.
    pub fn from_urls<I, S>(urls: I) -> Result<Vec<Arc<dyn ProxySource>>, CrawlError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = source_client()?;
        Ok(urls
            .into_iter()
            .map(|url| Arc::new(Self::with_client(url, client.clone())) as Arc<dyn ProxySource>)
            .collect())
    }

    /// Sources for [`DEFAULT_PROXY_SOURCES`].
    pub fn defaults() -> Result<Vec<Arc<dyn ProxySource>>, CrawlError> {
        Self::from_urls(DEFAULT_PROXY_SOURCES.iter().copied())
    }

    async fn fetch_list(&self) -> Result<Vec<String>, CrawlError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::Timeout(SOURCE_TIMEOUT.as_millis() as u64)
            } else {
                CrawlError::NetworkError(format!("Proxy source {}: {e}", self.url))
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::HttpError(format!("Failed to read proxy list: {e}")))?;
        Ok(parse_proxy_list(&body, &self.url))
    }
}

fn source_client() -> Result<Client, CrawlError> {
    Client::builder()
        .timeout(SOURCE_TIMEOUT)
        .user_agent(crate::fetcher::DEFAULT_USER_AGENT)
        .build()
        .map_err(|e| CrawlError::HttpError(format!("Failed to build HTTP client: {e}")))
}

impl ProxySource for HttpProxySource {
    fn name(&self) -> &str {
        &self.url
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<String>, CrawlError>> {
        Box::pin(self.fetch_list())
    }
}

/// A local file with one proxy per line. Bare `host:port` lines are read
/// as HTTP proxies.
#[derive(Debug, Clone)]
pub struct FileProxySource {
    path: PathBuf,
    name: String,
}

impl FileProxySource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        Self { path, name }
    }
}

impl ProxySource for FileProxySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<String>, CrawlError>> {
        Box::pin(async move {
            let content = tokio::fs::read_to_string(&self.path).await?;
            Ok(parse_lines(&content, "http"))
        })
    }
}
