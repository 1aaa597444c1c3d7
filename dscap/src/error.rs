//! Error types for the capture library.

use thiserror::Error;

/// Reasons a frame validity descriptor is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Invalid {
    /// Status bits of the descriptor were not `3`.
    #[error("bad frame status {0:#04b}")]
    BadStatus(u8),

    /// The device timed out waiting for the LCD (screen off or asleep).
    #[error("capture timed out, LCD inactive")]
    CaptureTimedOut,

    /// The descriptor response was shorter than expected.
    #[error("frame info truncated to {0} bytes")]
    Truncated(usize),
}

/// Errors that can occur while talking to the capture board.
#[derive(Debug, Error)]
pub enum Error {
    /// No attached device matches the capture board ids.
    #[error("no capture device {vid:04x}:{pid:04x} attached")]
    DeviceNotFound { vid: u16, pid: u16 },

    /// The device is claimed by someone else.
    #[error("capture device is busy: {0}")]
    DeviceBusy(#[source] rusb::Error),

    /// The OS refused access to the device.
    #[error("access to capture device denied: {0}")]
    AccessDenied(#[source] rusb::Error),

    /// The handle could not be initialized.
    #[error("usb driver error: {0}")]
    Driver(#[source] rusb::Error),

    /// The interface has no bulk IN endpoint.
    #[error("device has no bulk input endpoint")]
    NoBulkInputEndpoint,

    /// The raw transfer policy could not be applied to the bulk endpoint.
    #[error("could not apply transfer policy: {0}")]
    Policy(String),

    /// A control or bulk transfer failed.
    #[error("transfer failed: {0}")]
    Transfer(#[source] rusb::Error),

    /// The bulk stream ended before a whole frame arrived.
    #[error("short frame: received {received} of {expected} bytes")]
    ShortFrame { received: usize, expected: usize },

    /// The device reported an unusable frame.
    #[error("invalid frame: {0}")]
    Validation(#[from] Invalid),

    /// A control request was built from an invalid field combination.
    #[error("invalid control request: {0}")]
    InvalidRequest(&'static str),

    /// The device session was already closed.
    #[error("device session is closed")]
    Closed,

    /// Background capture is already running.
    #[error("capture already running")]
    AlreadyRunning,

    /// A capture worker thread could not be started.
    #[error("could not spawn capture worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl Error {
    /// Errors raised while setting up the session; retrying will not help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DeviceNotFound { .. }
                | Error::DeviceBusy(_)
                | Error::AccessDenied(_)
                | Error::Driver(_)
                | Error::NoBulkInputEndpoint
                | Error::Policy(_)
                | Error::Closed
        )
    }

    /// Map a failure to open or claim the device.
    pub(crate) fn from_open(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Busy => Error::DeviceBusy(err),
            rusb::Error::Access => Error::AccessDenied(err),
            _ => Error::Driver(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
