use super::{FetchError, LogSource, RawLogEvent, TimeWindow};
use crate::config::SourceConfig;
use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::config::Region;
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, SdkError};
use aws_sdk_cloudwatchlogs::operation::filter_log_events::FilterLogEventsError;
use aws_sdk_cloudwatchlogs::Client;

/// CloudWatch Logs source backed by the `FilterLogEvents` paginator.
///
/// Credentials come from the ambient AWS provider chain (environment,
/// shared config/profile, instance role).
pub struct CloudWatchSource {
    client: Client,
    log_group: String,
    log_stream: String,
}

impl CloudWatchSource {
    /// Build a client from the ambient AWS configuration.
    pub async fn from_config(config: &SourceConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;

        tracing::debug!(
            region = ?sdk_config.region(),
            log_group = %config.log_group,
            log_stream = %config.log_stream,
            "cloudwatch client configured"
        );

        Self::new(Client::new(&sdk_config), config)
    }

    pub fn new(client: Client, config: &SourceConfig) -> Self {
        Self {
            client,
            log_group: config.log_group.clone(),
            log_stream: config.log_stream.clone(),
        }
    }

    fn classify(&self, err: SdkError<FilterLogEventsError>) -> FetchError {
        let not_found = err
            .as_service_error()
            .map(|e| e.is_resource_not_found_exception())
            .unwrap_or(false);
        if not_found {
            FetchError::SourceNotFound {
                log_group: self.log_group.clone(),
                log_stream: self.log_stream.clone(),
            }
        } else {
            FetchError::Transient(DisplayErrorContext(err).to_string())
        }
    }
}

#[async_trait]
impl LogSource for CloudWatchSource {
    fn name(&self) -> &str {
        "cloudwatch"
    }

    async fn filter_events(&self, window: TimeWindow) -> Result<Vec<RawLogEvent>, FetchError> {
        let mut pages = self
            .client
            .filter_log_events()
            .log_group_name(&self.log_group)
            .log_stream_names(&self.log_stream)
            .start_time(window.start_ms)
            .end_time(window.end_ms)
            .into_paginator()
            .send();

        let mut events = Vec::new();
        let mut page_count = 0u32;
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| self.classify(e))?;
            page_count += 1;
            events.extend(page.events().iter().map(|e| RawLogEvent {
                timestamp: e.timestamp(),
                message: e.message().map(str::to_string),
            }));
        }

        tracing::debug!(
            pages = page_count,
            events = events.len(),
            "cloudwatch filter complete"
        );
        Ok(events)
    }
}
