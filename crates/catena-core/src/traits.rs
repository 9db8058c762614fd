use std::future::Future;

use futures::future::BoxFuture;

use crate::error::CrawlError;
use crate::models::Record;

/// Performs a single network request for a URL, optionally through a proxy.
///
/// Implementations do not retry; retry, proxy rotation and timeouts are the
/// job of [`FetchService`](crate::fetch::FetchService).
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        proxy: Option<&str>,
    ) -> impl Future<Output = Result<String, CrawlError>> + Send;
}

/// An endpoint that lists proxy addresses.
///
/// Sources are stored as trait objects in the [`ProxyPool`](crate::proxy::ProxyPool),
/// so `fetch` returns a boxed future.
pub trait ProxySource: Send + Sync {
    /// Human-readable identifier used in logs (usually the endpoint URL).
    fn name(&self) -> &str;

    /// Returns raw proxy address strings. Entries are validated by the pool.
    fn fetch(&self) -> BoxFuture<'_, Result<Vec<String>, CrawlError>>;
}

/// Receives the records produced by the final step of a chain.
///
/// The engine may call `save` from several tasks at once.
pub trait Storage: Send + Sync {
    fn save(
        &self,
        url: &str,
        record: &Record,
    ) -> impl Future<Output = Result<(), CrawlError>> + Send;

    /// Called once after the chain finishes (including cancelled runs).
    fn finalize(&self) -> impl Future<Output = Result<(), CrawlError>> + Send;
}

/// A no-op Storage for use when persistence is not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl Storage for NullStore {
    async fn save(&self, _url: &str, _record: &Record) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn finalize(&self) -> Result<(), CrawlError> {
        Ok(())
    }
}
