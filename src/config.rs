// SPDX-License-Identifier: MIT

use std::time::Duration;

/// Connect timeout applied to every control-channel exchange.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Interval at which the monitor heartbeats the service handle while
/// `Operational`.
pub const CONNECTIVITY_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed backoff used by the lossless-mode reserve retry loop.
pub const LOSSLESS_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Host-tunable configuration for a [`crate::adapter::LogTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Application name pushed via `SetApplicationName` at handshake.
    pub application_name: String,
    /// Prefix used to build the region, fallback-region, and control-channel
    /// kernel object names.
    pub kernel_object_prefix: String,
    /// How often a `Degraded` session attempts to reconnect.
    pub auto_reconnect_interval: Duration,
    /// Message-frame capacity of the in-process overflow buffer. Metadata
    /// and command frames are always admitted regardless of this value.
    pub peak_buffer_capacity: usize,
    /// When enabled, a full ring blocks and retries instead of spilling to
    /// the peak buffer or dropping.
    pub lossless_mode: bool,
    /// Initial value pushed to the service as `SetWritingToLogFile`.
    pub write_to_log_file: bool,
}

impl TransportConfig {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            kernel_object_prefix: "Griffin+".to_string(),
            auto_reconnect_interval: Duration::from_secs(15),
            peak_buffer_capacity: 0,
            lossless_mode: false,
            write_to_log_file: true,
        }
    }

    pub fn with_kernel_object_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.kernel_object_prefix = prefix.into();
        self
    }

    pub fn with_auto_reconnect_interval(mut self, interval: Duration) -> Self {
        self.auto_reconnect_interval = interval;
        self
    }

    pub fn with_peak_buffer_capacity(mut self, capacity: usize) -> Self {
        self.peak_buffer_capacity = capacity;
        self
    }

    pub fn with_lossless_mode(mut self, enabled: bool) -> Self {
        self.lossless_mode = enabled;
        self
    }

    pub fn with_write_to_log_file(mut self, enabled: bool) -> Self {
        self.write_to_log_file = enabled;
        self
    }
}
