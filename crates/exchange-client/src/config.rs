//! Exchange client configuration options

use std::time::Duration;

/// Configuration for an exchange client
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Buffer budget in retained bytes; dispatch pauses at or above it
    pub max_buffered_bytes: u64,
    /// Per-request response size cap handed to each sub-client
    pub max_response_size: u64,
    /// Scale on the bytes-in-flight dispatch target
    pub concurrent_request_multiplier: u32,
    /// Backoff floor for transient endpoint errors
    pub min_error_duration: Duration,
    /// Per-endpoint retry budget before a sub-client escalates
    pub max_error_duration: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_buffered_bytes: 32 * 1024 * 1024, // 32 MB
            max_response_size: 16 * 1024 * 1024,  // 16 MB
            concurrent_request_multiplier: 3,
            min_error_duration: Duration::from_secs(60),  // 1 minute
            max_error_duration: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl ExchangeConfig {
    /// Set the buffer budget
    pub fn with_max_buffered_bytes(mut self, max_buffered_bytes: u64) -> Self {
        self.max_buffered_bytes = max_buffered_bytes;
        self
    }

    /// Set the per-request response size cap
    pub fn with_max_response_size(mut self, max_response_size: u64) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    /// Set the dispatch target multiplier
    pub fn with_concurrent_request_multiplier(mut self, multiplier: u32) -> Self {
        self.concurrent_request_multiplier = multiplier;
        self
    }

    /// Set the retry envelope handed to each sub-client
    pub fn with_error_durations(mut self, min: Duration, max: Duration) -> Self {
        self.min_error_duration = min;
        self.max_error_duration = max;
        self
    }
}
