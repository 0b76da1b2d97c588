//! Transport policy: timeouts, retry counts and backoff applied uniformly to
//! every connection. Set once when the manager is built, immutable after.

use std::time::Duration;

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_OPERATION_TIMEOUT, DEFAULT_RECONNECT_COUNT,
    DEFAULT_RECONNECT_INTERVAL, DEFAULT_SCAN_DURATION,
};

/// Process-wide transport configuration, read by the connection manager on
/// every connect attempt and by the scanner for its default window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPolicy {
    /// Deadline for the platform to report a link as established.
    pub connect_timeout: Duration,
    /// Deadline for each individual GATT operation.
    pub operation_timeout: Duration,
    /// Automatic reconnect attempts beyond the initial one, shared by
    /// connect failures and passive link losses.
    pub reconnect_count: u32,
    /// Delay between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Default scan window when the filter does not override it.
    pub scan_duration: Duration,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            reconnect_count: DEFAULT_RECONNECT_COUNT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            scan_duration: DEFAULT_SCAN_DURATION,
        }
    }
}

impl TransportPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, count: u32, interval: Duration) -> Self {
        self.reconnect_count = count;
        self.reconnect_interval = interval;
        self
    }

    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }
}
