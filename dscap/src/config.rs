use std::time::Duration;

use crate::capture::loopy_ds::CarryOver;

/// Knobs for a capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Background worker threads. More than one only helps when the device
    /// is slower to answer than reconstruction takes.
    pub workers: usize,
    /// Timeout applied to every USB transfer, zero waits forever.
    pub transfer_timeout: Duration,
    /// Pause after a failed frame before a worker tries again.
    pub retry_backoff: Duration,
    pub carry: CarryOver,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            transfer_timeout: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(10),
            carry: CarryOver::PreviousFrame,
        }
    }
}

impl CaptureConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_carry(mut self, carry: CarryOver) -> Self {
        self.carry = carry;
        self
    }
}
