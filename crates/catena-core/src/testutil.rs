//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit and integration
//! tests. All mocks share their state through `Arc<Mutex<_>>`, so a clone
//! handed to the code under test records into the same place the test
//! asserts on.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::CrawlError;
use crate::models::Record;
use crate::reporter::{ChainEvent, ChainReporter};
use crate::traits::{Fetcher, ProxySource, Storage};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock transport.
///
/// Lookup order per call: failing proxy, failing URL, scripted responses
/// for the URL, fixed page for the URL, then a default page that echoes
/// the URL.
#[derive(Clone, Default)]
pub struct MockFetcher {
    scripted: Arc<Mutex<HashMap<String, VecDeque<Result<String, CrawlError>>>>>,
    pages: Arc<Mutex<HashMap<String, String>>>,
    failing_urls: Arc<Mutex<HashSet<String>>>,
    failing_proxies: Arc<Mutex<HashSet<String>>>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answers `url` with `body`.
    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
        self
    }

    /// Answers `url` with these results in order, then falls through.
    pub fn with_responses(self, url: &str, responses: Vec<Result<String, CrawlError>>) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
        self
    }

    /// Every request for `url` fails with a network error.
    pub fn fail_url(self, url: &str) -> Self {
        self.failing_urls.lock().unwrap().insert(url.to_string());
        self
    }

    /// Every request through `proxy` fails with a network error.
    pub fn fail_proxy(self, proxy: &str) -> Self {
        self.failing_proxies
            .lock()
            .unwrap()
            .insert(proxy.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    /// Highest number of concurrent `fetch` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, url: &str, proxy: Option<&str>) -> Result<String, CrawlError> {
        if let Some(proxy) = proxy
            && self.failing_proxies.lock().unwrap().contains(proxy)
        {
            return Err(CrawlError::NetworkError(format!("proxy {proxy} refused")));
        }
        if self.failing_urls.lock().unwrap().contains(url) {
            return Err(CrawlError::NetworkError(format!("connection reset: {url}")));
        }
        if let Some(queue) = self.scripted.lock().unwrap().get_mut(url)
            && let Some(next) = queue.pop_front()
        {
            return next;
        }
        if let Some(body) = self.pages.lock().unwrap().get(url) {
            return Ok(body.clone());
        }
        Ok(format!("<html><body>{url}</body></html>"))
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, proxy: Option<&str>) -> Result<String, CrawlError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), proxy.map(String::from)));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.respond(url, proxy);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// MockProxySource
// ---------------------------------------------------------------------------

/// Proxy source returning scripted batches; returns nothing once drained.
#[derive(Clone)]
pub struct MockProxySource {
    name: String,
    batches: Arc<Mutex<VecDeque<Result<Vec<String>, CrawlError>>>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockProxySource {
    pub fn new(name: &str, batches: Vec<Result<Vec<String>, CrawlError>>) -> Self {
        Self {
            name: name.to_string(),
            batches: Arc::new(Mutex::new(batches.into())),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProxySource for MockProxySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<String>, CrawlError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory storage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    saved: Arc<Mutex<Vec<(String, Record)>>>,
    finalize_calls: Arc<AtomicUsize>,
    fail_saves_for: Arc<Mutex<HashSet<String>>>,
    fail_finalize: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `save` fails for this URL.
    pub fn fail_save(self, url: &str) -> Self {
        self.fail_saves_for.lock().unwrap().insert(url.to_string());
        self
    }

    pub fn failing_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    pub fn saved(&self) -> Vec<(String, Record)> {
        self.saved.lock().unwrap().clone()
    }

    /// Saved URLs, sorted.
    pub fn saved_urls(&self) -> Vec<String> {
        let mut urls: Vec<_> = self.saved().into_iter().map(|(u, _)| u).collect();
        urls.sort();
        urls
    }

    pub fn finalize_count(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalize_count() > 0
    }
}

impl Storage for MemoryStore {
    async fn save(&self, url: &str, record: &Record) -> Result<(), CrawlError> {
        if self.fail_saves_for.lock().unwrap().contains(url) {
            return Err(CrawlError::StorageError(format!("disk full for {url}")));
        }
        self.saved
            .lock()
            .unwrap()
            .push((url.to_string(), record.clone()));
        Ok(())
    }

    async fn finalize(&self) -> Result<(), CrawlError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_finalize {
            return Err(CrawlError::StorageError("finalize failed".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Reporter that records event kinds, failed URLs and dropped blank URLs.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<&'static str>>>,
    failed_urls: Arc<Mutex<Vec<String>>>,
    blank_urls: Arc<AtomicUsize>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| **e == kind).count()
    }

    /// Failed URLs, sorted.
    pub fn failed_urls(&self) -> Vec<String> {
        let mut urls = self.failed_urls.lock().unwrap().clone();
        urls.sort();
        urls
    }

    /// Blank URLs dropped across all frontier transitions.
    pub fn blank_urls(&self) -> usize {
        self.blank_urls.load(Ordering::SeqCst)
    }
}

impl ChainReporter for RecordingReporter {
    fn report(&self, event: ChainEvent<'_>) {
        match &event {
            ChainEvent::UrlFailed { url, .. } => {
                self.failed_urls.lock().unwrap().push(url.to_string());
            }
            ChainEvent::FrontierBuilt { blank, .. } => {
                self.blank_urls.fetch_add(*blank, Ordering::SeqCst);
            }
            _ => {}
        }
        self.events.lock().unwrap().push(event.kind());
    }
}
