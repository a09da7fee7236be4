//! SSE configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-stream tunables.
///
/// # Example
///
/// ```toml
/// [sse]
/// keep_alive_interval_secs = 15
/// require_flush = true
/// flush_after_ping = true
/// write_buffer_bytes = 4096
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseConfig {
    /// Keep-alive interval in seconds (default: 15, 0 disables keep-alive).
    ///
    /// A `: ping` comment is written at this interval so intermediaries do
    /// not tear down an idle connection.
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_secs: u64,

    /// Refuse to stream into a response that cannot flush incrementally
    /// (default: true).
    #[serde(default = "default_true")]
    pub require_flush: bool,

    /// Flush right after each keep-alive ping (default: true).
    ///
    /// Without it a ping on a quiet stream may sit in the response buffer
    /// until the next event is flushed.
    #[serde(default = "default_true")]
    pub flush_after_ping: bool,

    /// Response buffer size in bytes before an automatic flush (default: 4096).
    #[serde(default = "default_write_buffer_bytes")]
    pub write_buffer_bytes: usize,

    /// Flushed body frames allowed to wait for the HTTP server (default: 16).
    #[serde(default = "default_body_channel_capacity")]
    pub body_channel_capacity: usize,
}

impl SseConfig {
    /// Get the keep-alive interval as a Duration, or None if disabled.
    #[must_use]
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        if self.keep_alive_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.keep_alive_interval_secs))
        }
    }

    /// Set the keep-alive interval.
    #[must_use]
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval_secs = interval.as_secs();
        self
    }

    /// Check values that deserialize but cannot drive a stream.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.write_buffer_bytes == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "sse.write_buffer_bytes must be greater than zero".to_string(),
            ));
        }
        if self.body_channel_capacity == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "sse.body_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_secs: default_keep_alive_interval(),
            require_flush: true,
            flush_after_ping: true,
            write_buffer_bytes: default_write_buffer_bytes(),
            body_channel_capacity: default_body_channel_capacity(),
        }
    }
}

fn default_keep_alive_interval() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_write_buffer_bytes() -> usize {
    4 * 1024
}

fn default_body_channel_capacity() -> usize {
    16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SseConfig::default();
        assert_eq!(config.keep_alive_interval_secs, 15);
        assert!(config.require_flush);
        assert!(config.flush_after_ping);
        assert_eq!(config.write_buffer_bytes, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_keep_alive_interval() {
        let mut config = SseConfig::default();
        assert_eq!(config.keep_alive_interval(), Some(Duration::from_secs(15)));

        config.keep_alive_interval_secs = 0;
        assert!(config.keep_alive_interval().is_none());

        let config = config.with_keep_alive_interval(Duration::from_secs(30));
        assert_eq!(config.keep_alive_interval_secs, 30);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: SseConfig = serde_json::from_str(r#"{"require_flush": false}"#).unwrap();
        assert!(!config.require_flush);
        assert_eq!(config.keep_alive_interval_secs, 15);
        assert_eq!(config.body_channel_capacity, 16);
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let config = SseConfig {
            write_buffer_bytes: 0,
            ..SseConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
