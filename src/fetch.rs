//! Log fetching with graceful degradation.
//!
//! Wraps a [`LogSource`] so that every failure mode ends in a (possibly
//! empty) event list: a missing log group/stream yields nothing, and
//! transient faults are retried within bounds before yielding nothing.
use crate::config::RetryConfig;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::source::{FetchError, LogSource, RawLogEvent, TimeWindow};
use chrono::Utc;

/// Fetch every event from the last `days_back` days. Never fails.
pub async fn fetch(
    source: &dyn LogSource,
    days_back: u32,
    retry: &RetryConfig,
) -> Vec<RawLogEvent> {
    let window = TimeWindow::lookback(Utc::now(), days_back);
    fetch_window(source, window, retry).await
}

/// Fetch every event inside `window`. Never fails.
pub async fn fetch_window(
    source: &dyn LogSource,
    window: TimeWindow,
    retry: &RetryConfig,
) -> Vec<RawLogEvent> {
    let mut policy = RetryPolicy::from_config(retry);

    loop {
        match source.filter_events(window).await {
            Ok(events) => {
                tracing::info!(
                    source = source.name(),
                    start_ms = window.start_ms,
                    end_ms = window.end_ms,
                    events = events.len(),
                    "fetched invocation log events"
                );
                return events;
            }
            Err(e @ FetchError::SourceNotFound { .. }) => {
                tracing::warn!(source = source.name(), "{e}");
                return Vec::new();
            }
            Err(e @ FetchError::Transient(_)) => match policy.on_failure(&e) {
                RetryDecision::Retry { attempt, delay } => {
                    tracing::debug!(source = source.name(), attempt, ?delay, "retrying log fetch");
                    tokio::time::sleep(delay).await
                }
                RetryDecision::GiveUp => {
                    tracing::error!(source = source.name(), "{e}");
                    return Vec::new();
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a transient error for the first `failures` calls.
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LogSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn filter_events(&self, _window: TimeWindow) -> Result<Vec<RawLogEvent>, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(FetchError::Transient("throttled".into()))
            } else {
                Ok(vec![RawLogEvent::new(1, "{}")])
            }
        }
    }

    struct MissingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LogSource for MissingSource {
        fn name(&self) -> &str {
            "missing"
        }

        async fn filter_events(&self, _window: TimeWindow) -> Result<Vec<RawLogEvent>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::SourceNotFound {
                log_group: "/aws/bedrock".into(),
                log_stream: "aws/bedrock/modelinvocations".into(),
            })
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn missing_source_is_empty_without_retry() {
        let src = MissingSource {
            calls: AtomicU32::new(0),
        };
        let events = fetch(&src, 7, &fast_retry(3)).await;
        assert!(events.is_empty());
        assert_eq!(src.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_fault_recovers_within_retries() {
        let src = FlakySource {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let events = fetch(&src, 7, &fast_retry(2)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(src.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_empty() {
        let src = FlakySource {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let events = fetch(&src, 7, &fast_retry(1)).await;
        assert!(events.is_empty());
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_retries_configured_means_single_attempt() {
        let src = FlakySource {
            failures: 1,
            calls: AtomicU32::new(0),
        };
        let events = fetch(&src, 7, &fast_retry(0)).await;
        assert!(events.is_empty());
        assert_eq!(src.calls.load(Ordering::SeqCst), 1);
    }
}
