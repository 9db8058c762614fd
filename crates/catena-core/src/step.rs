use std::fmt;
use std::sync::Arc;

use crate::error::CrawlError;
use crate::models::Record;

/// Turns fetched content into a record: `(url, content) -> record`.
pub type ParseFn = Arc<dyn Fn(&str, &str) -> Result<Record, CrawlError> + Send + Sync>;

/// Pulls the next step's URLs out of a record. An empty list is valid.
pub type ExtractFn = Arc<dyn Fn(&Record) -> Vec<String> + Send + Sync>;

/// One stage of a chain: fetch, parse, and optionally extract next URLs.
///
/// A step without an extractor is terminal and may only be the last one.
#[derive(Clone)]
pub struct ChainStep {
    pub name: String,
    parser: ParseFn,
    extractor: Option<ExtractFn>,
}

impl ChainStep {
    pub fn new<P>(name: impl Into<String>, parser: P) -> Self
    where
        P: Fn(&str, &str) -> Result<Record, CrawlError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parser: Arc::new(parser),
            extractor: None,
        }
    }

    pub fn with_extractor<E>(mut self, extractor: E) -> Self
    where
        E: Fn(&Record) -> Vec<String> + Send + Sync + 'static,
    {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.extractor.is_none()
    }

    pub fn parse(&self, url: &str, content: &str) -> Result<Record, CrawlError> {
        (self.parser)(url, content)
    }

    /// Next URLs for a record; `None` for a terminal step.
    pub fn extract(&self, record: &Record) -> Option<Vec<String>> {
        self.extractor.as_ref().map(|extract| extract(record))
    }
}

impl fmt::Debug for ChainStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainStep")
            .field("name", &self.name)
            .field("terminal", &self.is_terminal())
            .finish()
    }
}
