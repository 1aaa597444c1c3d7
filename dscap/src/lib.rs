mod capture;
mod config;
mod error;
mod frame;
pub mod layout;
mod scheduler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;
use rusb::Context;

pub use capture::loopy_ds::{
    self, BulkEndpoint, CarryOver, DeviceStatus, FrameGrabber, FrameInfo, UsbTransport,
};
pub use capture::{ControlRequest, Transport};
pub use config::CaptureConfig;
pub use error::{Error, Invalid, Result};
pub use frame::{
    rgb565_to_rgba, DualFrame, SharedFrame, FRAME_PIXELS, LCD_HEIGHT, LCD_WIDTH, PANEL_PIXELS,
};
pub use scheduler::{CaptureState, CaptureStats, FrameStatus, StatsSnapshot, StatusCallback};

use scheduler::Scheduler;

/// A session with the DS capture board.
///
/// Frames are either pulled one at a time with [`DsCapture::grab_frame`] or
/// produced in the background between [`DsCapture::start_capture`] and
/// [`DsCapture::end_capture`]. Dropping the session closes the device.
pub struct DsCapture<T: Transport + 'static = UsbTransport<Context>> {
    transport: Arc<Mutex<T>>,
    open: AtomicBool,
    config: CaptureConfig,
    grabber: FrameGrabber,
    scheduler: Scheduler,
    stats: Arc<CaptureStats>,
    status_callback: Option<StatusCallback>,
}

impl DsCapture {
    /// Open the attached capture board with the default configuration.
    pub fn open() -> Result<Self> {
        Self::open_with(CaptureConfig::default())
    }

    pub fn open_with(config: CaptureConfig) -> Result<Self> {
        let transport = UsbTransport::open(config.transfer_timeout)?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport + 'static> DsCapture<T> {
    pub fn with_transport(transport: T, config: CaptureConfig) -> Self {
        Self {
            open: AtomicBool::new(transport.is_open()),
            transport: Arc::new(Mutex::new(transport)),
            config,
            grabber: FrameGrabber::new(),
            scheduler: Scheduler::new(),
            stats: Arc::new(CaptureStats::default()),
            status_callback: None,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        self.scheduler.state()
    }

    /// Does not touch the device, so it is safe to call while holding a
    /// [`SharedFrame`] lock.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Callback run by the workers after every frame attempt. Takes effect on
    /// the next [`DsCapture::start_capture`].
    pub fn set_status_callback<F>(&mut self, callback: F)
    where
        F: Fn(usize, FrameStatus<'_>) + Send + Sync + 'static,
    {
        self.status_callback = Some(Arc::new(callback));
    }

    /// Start the configured number of workers writing into `frame`.
    ///
    /// Consumers lock `frame` to read it; workers hold the same lock for the
    /// whole reconstruction so a locked read never sees a torn frame.
    pub fn start_capture(&mut self, frame: SharedFrame) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }

        self.scheduler.start(
            &self.transport,
            frame,
            &self.config,
            &self.stats,
            self.status_callback.clone(),
        )
    }

    /// Stop the workers, returning once each finished its frame in flight.
    pub fn end_capture(&mut self) {
        if self.scheduler.state() != CaptureState::Running {
            return;
        }

        self.scheduler.stop();
        let stats = self.stats.snapshot();
        info!(
            "{} frames captured, {} dropped",
            stats.published, stats.failed
        );
    }

    /// Capture a single frame into `frame`. Returns false if this attempt
    /// failed, in which case `frame` is left as it was.
    pub fn grab_frame(&mut self, frame: &mut DualFrame) -> bool {
        match self.try_grab_frame(frame) {
            Ok(_) => true,
            Err(err) => {
                debug!("could not grab frame: {}", err);
                false
            }
        }
    }

    pub fn try_grab_frame(&mut self, frame: &mut DualFrame) -> Result<FrameInfo> {
        // a frame taken here would be missing from the background chain
        if self.scheduler.state() != CaptureState::Idle {
            return Err(Error::AlreadyRunning);
        }

        let fetched = {
            let mut device = self.transport.lock();
            self.grabber.fetch(&mut *device)
        };

        let info = match fetched {
            Ok(info) => info,
            Err(err) => {
                self.stats.record_failed();
                return Err(err);
            }
        };

        let lines = loopy_ds::reconstruct(self.grabber.payload(), &info, frame, self.config.carry);
        self.stats.record_published(lines);
        Ok(info)
    }

    pub fn device_status(&mut self) -> Result<DeviceStatus> {
        loopy_ds::device_status(&mut *self.transport.lock())
    }

    /// Abort any capture on the device and reset its frame counter.
    pub fn reset(&mut self) -> Result<()> {
        if self.scheduler.state() != CaptureState::Idle {
            return Err(Error::AlreadyRunning);
        }
        loopy_ds::stop_capture(&mut *self.transport.lock())
    }

    /// Stop capturing and release the device. Safe to call more than once.
    pub fn close(&mut self) {
        self.end_capture();
        self.transport.lock().close();
        self.open.store(false, Ordering::Release);
    }
}

impl<T: Transport + 'static> Drop for DsCapture<T> {
    fn drop(&mut self) {
        self.close();
    }
}
