//! Connection configuration.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::event::Event;

/// Default interval between keep-alive comments.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Default keep-alive comment text.
pub const DEFAULT_HEARTBEAT_COMMENT: &str = "keep-alive";

/// Default reconnection delay advertised on upgrade.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Default per-write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`upgrade`](crate::upgrade).
#[derive(Clone, Debug)]
pub struct SseConfig {
    /// Interval between keep-alive comments. Zero disables heartbeats.
    pub heartbeat_interval: Duration,

    /// Text of the keep-alive comment line.
    pub heartbeat_comment: String,

    /// Extra response headers, added after the mandatory SSE headers.
    pub headers: HeaderMap,

    /// Response status.
    pub status: StatusCode,

    /// Reconnection delay sent to the client on upgrade. Zero sends nothing.
    pub retry_delay: Duration,

    /// Default write deadline for sends without one, and bound on the farewell write.
    pub write_timeout: Duration,

    /// Farewell event sent (best effort) on close.
    pub close_event: Option<Event>,

    /// Time source for deadlines.
    pub clock: Arc<dyn Clock>,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_comment: DEFAULT_HEARTBEAT_COMMENT.to_string(),
            headers: HeaderMap::new(),
            status: StatusCode::OK,
            retry_delay: DEFAULT_RETRY_DELAY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            close_event: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl SseConfig {
    /// Create configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Disable heartbeats.
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat_interval = Duration::ZERO;
        self
    }

    /// Set the heartbeat comment text.
    pub fn with_heartbeat_comment(mut self, comment: impl Into<String>) -> Self {
        self.heartbeat_comment = comment.into();
        self
    }

    /// Add an extra response header. Repeated names are kept.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Add several extra response headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in &headers {
            self.headers.append(name, value.clone());
        }
        self
    }

    /// Set the response status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set the advertised reconnection delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the farewell event.
    pub fn with_close_event(mut self, event: Event) -> Self {
        self.close_event = Some(event);
        self
    }

    /// Use a custom time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Check the configuration before it is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the heartbeat comment contains a line
    /// break, or [`Error::Validation`] if the farewell event is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_comment.contains(['\r', '\n']) {
            return Err(Error::Config(
                "heartbeat comment must not contain line breaks".to_string(),
            ));
        }

        if let Some(event) = &self.close_event {
            event.validate()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_defaults() {
        let config = SseConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.heartbeat_comment, "keep-alive");
        assert_eq!(config.status, StatusCode::OK);
        assert_eq!(config.retry_delay, Duration::from_secs(3));
        assert_eq!(config.write_timeout, Duration::from_secs(5));
        assert!(config.headers.is_empty());
        assert!(config.close_event.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SseConfig::new()
            .without_heartbeat()
            .with_heartbeat_comment("ping")
            .with_header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("a"),
            )
            .with_header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("b"),
            )
            .with_status(StatusCode::ACCEPTED)
            .with_retry_delay(Duration::ZERO)
            .with_write_timeout(Duration::from_millis(250))
            .with_close_event(Event::raw("bye"))
            .with_clock(Arc::new(ManualClock::new()));

        assert!(config.heartbeat_interval.is_zero());
        assert_eq!(config.headers.get_all("x-trace").iter().count(), 2);

        let mut more = HeaderMap::new();
        more.insert("x-trace", HeaderValue::from_static("c"));
        let config = config.with_headers(more);
        assert_eq!(config.headers.get_all("x-trace").iter().count(), 3);
        assert_eq!(config.status, StatusCode::ACCEPTED);
        assert_eq!(config.write_timeout, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_multiline_comment() {
        let err = SseConfig::new()
            .with_heartbeat_comment("a\nb")
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_invalid_close_event() {
        let err = SseConfig::new()
            .with_close_event(Event::raw("a\nb"))
            .validate()
            .unwrap_err();
        assert!(err.is_validation());
    }
}
