use std::fmt;

use uuid::Uuid;

use crate::chain::ChainRunStats;
use crate::runner::StepStats;

/// Where a URL failed inside a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Fetch,
    Parse,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Fetch => write!(f, "fetch"),
            FailureStage::Parse => write!(f, "parse"),
        }
    }
}

/// Events emitted while a chain runs, for progress display and logging.
#[derive(Debug, Clone)]
pub enum ChainEvent<'a> {
    ChainStarted {
        run_id: Uuid,
        steps: usize,
        initial_urls: usize,
    },
    ProxiesUnavailable {
        direct_fallback: bool,
    },
    StepStarted {
        index: usize,
        step: &'a str,
        urls: usize,
    },
    UrlSucceeded {
        step: &'a str,
        url: &'a str,
        attempts: u32,
    },
    UrlFailed {
        step: &'a str,
        url: &'a str,
        stage: FailureStage,
        error: &'a str,
    },
    StepCompleted {
        step: &'a str,
        stats: &'a StepStats,
    },
    FrontierBuilt {
        step: &'a str,
        urls: usize,
        duplicates: usize,
        truncated: usize,
        blank: usize,
    },
    Cancelled {
        step: &'a str,
    },
    ChainCompleted {
        stats: &'a ChainRunStats,
    },
}

impl ChainEvent<'_> {
    /// Short, stable name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ChainEvent::ChainStarted { .. } => "chain_started",
            ChainEvent::ProxiesUnavailable { .. } => "proxies_unavailable",
            ChainEvent::StepStarted { .. } => "step_started",
            ChainEvent::UrlSucceeded { .. } => "url_succeeded",
            ChainEvent::UrlFailed { .. } => "url_failed",
            ChainEvent::StepCompleted { .. } => "step_completed",
            ChainEvent::FrontierBuilt { .. } => "frontier_built",
            ChainEvent::Cancelled { .. } => "cancelled",
            ChainEvent::ChainCompleted { .. } => "chain_completed",
        }
    }
}

/// Receives chain events. Progress bars and other UIs plug in here.
pub trait ChainReporter: Send + Sync {
    fn report(&self, event: ChainEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingChainReporter;

impl ChainReporter for TracingChainReporter {
    fn report(&self, event: ChainEvent<'_>) {
        match event {
            ChainEvent::ChainStarted {
                run_id,
                steps,
                initial_urls,
            } => {
                tracing::info!(%run_id, steps, initial_urls, "Chain started");
            }
            ChainEvent::ProxiesUnavailable { direct_fallback } => {
                tracing::warn!(direct_fallback, "No proxies available");
            }
            ChainEvent::StepStarted { index, step, urls } => {
                tracing::info!(index, %step, urls, "Step started");
            }
            ChainEvent::UrlSucceeded {
                step,
                url,
                attempts,
            } => {
                tracing::debug!(%step, %url, attempts, "URL processed");
            }
            ChainEvent::UrlFailed {
                step,
                url,
                stage,
                error,
            } => {
                tracing::warn!(%step, %url, %stage, %error, "URL failed");
            }
            ChainEvent::StepCompleted { step, stats } => {
                tracing::info!(
                    %step,
                    processed = stats.urls_processed,
                    succeeded = stats.urls_succeeded,
                    failed = stats.urls_failed,
                    next_urls = ?stats.next_urls_discovered,
                    "Step completed"
                );
            }
            ChainEvent::FrontierBuilt {
                step,
                urls,
                duplicates,
                truncated,
                blank,
            } => {
                tracing::info!(%step, urls, duplicates, truncated, blank, "Frontier built");
            }
            ChainEvent::Cancelled { step } => {
                tracing::warn!(%step, "Chain cancelled");
            }
            ChainEvent::ChainCompleted { stats } => {
                tracing::info!(
                    run_id = %stats.run_id,
                    total = stats.total_requests,
                    successful = stats.successful_requests,
                    failed = stats.failed_requests,
                    final_results = stats.final_results,
                    duration_ms = stats.duration_ms,
                    "Chain completed"
                );
            }
        }
    }
}

impl<R: ChainReporter + ?Sized> ChainReporter for &R {
    fn report(&self, event: ChainEvent<'_>) {
        (**self).report(event);
    }
}
