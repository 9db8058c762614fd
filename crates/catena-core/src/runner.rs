use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::CrawlError;
use crate::fetch::FetchService;
use crate::models::PageRecord;
use crate::reporter::{ChainEvent, ChainReporter, FailureStage};
use crate::step::ChainStep;
use crate::traits::Fetcher;

/// Counters for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    pub urls_processed: u64,
    pub urls_succeeded: u64,
    pub urls_failed: u64,
    pub fetch_failures: u64,
    pub parse_failures: u64,
    /// Network attempts across all URLs, retries included.
    pub fetch_attempts: u64,
    /// `None` for a terminal step.
    pub next_urls_discovered: Option<u64>,
}

/// What a step produced.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    /// Parsed records, in input URL order.
    pub records: Vec<PageRecord>,
    /// Extracted URLs in input URL order. May contain duplicates.
    pub next_urls: Vec<String>,
    pub stats: StepStats,
    /// URLs never started because the run was cancelled.
    pub skipped: Vec<String>,
}

enum UrlOutcome {
    Skipped,
    FetchFailed {
        attempts: u32,
    },
    ParseFailed {
        attempts: u32,
    },
    Parsed {
        attempts: u32,
        record: PageRecord,
        next: Option<Vec<String>>,
    },
}

/// Runs one step over a frontier with bounded concurrency.
pub struct StepRunner<'a, F, R: ?Sized> {
    fetch: &'a FetchService<F>,
    reporter: &'a R,
    cancel: CancellationToken,
}

impl<'a, F: Fetcher, R: ChainReporter + ?Sized> StepRunner<'a, F, R> {
    pub fn new(fetch: &'a FetchService<F>, reporter: &'a R) -> Self {
        Self {
            fetch,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// URLs not yet started when this token fires are skipped.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, step: &ChainStep, urls: &[String], concurrency_limit: usize) -> StepOutput {
        let mut outcomes: Vec<(usize, UrlOutcome)> = futures::stream::iter(urls.iter().enumerate())
            .map(|(index, url)| async move { (index, self.process(step, url).await) })
            .buffer_unordered(concurrency_limit.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut output = StepOutput::default();
        let mut next_urls = (!step.is_terminal()).then(Vec::new);

        for (index, outcome) in outcomes {
            let attempts = match &outcome {
                UrlOutcome::Skipped => {
                    output.skipped.push(urls[index].clone());
                    continue;
                }
                UrlOutcome::FetchFailed { attempts }
                | UrlOutcome::ParseFailed { attempts }
                | UrlOutcome::Parsed { attempts, .. } => *attempts,
            };
            output.stats.urls_processed += 1;
            output.stats.fetch_attempts += u64::from(attempts);

            match outcome {
                UrlOutcome::Skipped => {}
                UrlOutcome::FetchFailed { .. } => {
                    output.stats.urls_failed += 1;
                    output.stats.fetch_failures += 1;
                }
                UrlOutcome::ParseFailed { .. } => {
                    output.stats.urls_failed += 1;
                    output.stats.parse_failures += 1;
                }
                UrlOutcome::Parsed { record, next, .. } => {
                    output.stats.urls_succeeded += 1;
                    if let (Some(all), Some(found)) = (next_urls.as_mut(), next) {
                        all.extend(found);
                    }
                    output.records.push(record);
                }
            }
        }

        output.stats.next_urls_discovered = next_urls.as_ref().map(|n| n.len() as u64);
        output.next_urls = next_urls.unwrap_or_default();
        output
    }

    async fn process(&self, step: &ChainStep, url: &str) -> UrlOutcome {
        if self.cancel.is_cancelled() {
            return UrlOutcome::Skipped;
        }

        let result = self.fetch.fetch(url).await;
        let attempts = result.attempts;
        if !result.is_success() {
            let error = result
                .error
                .map_or_else(|| "unknown error".to_string(), |e| e.to_string());
            self.reporter.report(ChainEvent::UrlFailed {
                step: &step.name,
                url,
                stage: FailureStage::Fetch,
                error: &error,
            });
            return UrlOutcome::FetchFailed { attempts };
        }
        let content = result.content.unwrap_or_default();

        let parsed = catch_unwind(AssertUnwindSafe(|| step.parse(url, &content)))
            .unwrap_or_else(|panic| Err(CrawlError::ParseError(format!(
                "parser panicked: {}",
                panic_message(&*panic)
            ))));
        let data = match parsed {
            Ok(data) => data,
            Err(e) => {
                self.reporter.report(ChainEvent::UrlFailed {
                    step: &step.name,
                    url,
                    stage: FailureStage::Parse,
                    error: &e.to_string(),
                });
                return UrlOutcome::ParseFailed { attempts };
            }
        };

        let next = if step.is_terminal() {
            None
        } else {
            match catch_unwind(AssertUnwindSafe(|| step.extract(&data))) {
                Ok(next) => next,
                Err(panic) => {
                    tracing::warn!(
                        step = %step.name,
                        url = %url,
                        error = %panic_message(&*panic),
                        "Next-URL extractor panicked; no URLs taken from this page"
                    );
                    Some(Vec::new())
                }
            }
        };

        self.reporter.report(ChainEvent::UrlSucceeded {
            step: &step.name,
            url,
            attempts,
        });
        UrlOutcome::Parsed {
            attempts,
            record: PageRecord {
                url: url.to_string(),
                data,
            },
            next,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
