//! DS capture board (USB 16d0:0647).
//!
//! Device vendor requests:
//!
//! | code | dir | meaning                                                   |
//! |------|-----|-----------------------------------------------------------|
//! | 0x30 | out | capture a new frame                                       |
//! | 0x31 | out | stop capture in progress and reset frame counter to 0     |
//! | 0x30 | in  | record of the last captured frame, see [`FrameInfo`]      |
//! | 0x31 | in  | device status, see [`DeviceStatus`]                       |
//!
//! After a capture request the frame is streamed over the bulk IN endpoint.

use std::time::Duration;

use log::{debug, info, warn};
use rusb::{Context, DeviceHandle, Direction, UsbContext};

use super::{open_device, ControlRequest, Transport};
use crate::error::{Error, Result};
use crate::frame::LCD_HEIGHT;

mod endpoint;
mod parse;
mod protocol;

pub use endpoint::{check_raw_io, negotiate, BulkEndpoint, EndpointInfo};
pub use parse::{reconstruct, CarryOver};
pub use protocol::{device_status, stop_capture, DeviceStatus, FrameGrabber, FrameInfo};

pub const USBDS_VID: u16 = 0x16D0;
pub const USBDS_PID: u16 = 0x0647;
pub const INTERFACE: u8 = 0;

pub const CMDIN_STATUS: u8 = 0x31;
pub const CMDIN_FRAMEINFO: u8 = 0x30;
pub const CMDOUT_CAPTURE_START: u8 = 0x30;
pub const CMDOUT_CAPTURE_STOP: u8 = 0x31;

/// Bulk payload of one frame.
pub const FRAME_SIZE: usize = 1024 * LCD_HEIGHT;
pub const INFO_SIZE: usize = 64;
pub const BITMAP_LEN: usize = 48;
pub const VALID_FLAG_OFFSET: usize = 52;
pub const STATUS_SIZE: usize = 6;

/// [`Transport`] over libusb.
pub struct UsbTransport<T: UsbContext> {
    handle: Option<DeviceHandle<T>>,
    endpoint: BulkEndpoint,
    timeout: Duration,
}

impl UsbTransport<Context> {
    /// Open the capture board. A zero `timeout` waits forever on transfers.
    pub fn open(timeout: Duration) -> Result<Self> {
        let context = Context::new().map_err(Error::Driver)?;
        Self::open_with_context(context, timeout)
    }
}

impl<T: UsbContext> UsbTransport<T> {
    pub fn open_with_context(context: T, timeout: Duration) -> Result<Self> {
        let (device, mut handle) = open_device(&context, USBDS_VID, USBDS_PID)?;
        info!("Opened {:04x}:{:04x}", USBDS_VID, USBDS_PID);

        if let Err(err) = handle.set_auto_detach_kernel_driver(true) {
            debug!("kernel driver auto-detach unavailable: {}", err);
        }

        handle
            .claim_interface(INTERFACE)
            .map_err(Error::from_open)?;

        let config = device.active_config_descriptor().map_err(Error::Driver)?;
        let endpoint = negotiate(endpoint::interface_endpoints(&config, INTERFACE))?;
        endpoint::apply_raw_io(&mut handle, &endpoint, FRAME_SIZE)?;

        Ok(Self {
            handle: Some(handle),
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> BulkEndpoint {
        self.endpoint
    }

    fn handle(&self) -> Result<&DeviceHandle<T>> {
        self.handle.as_ref().ok_or(Error::Closed)
    }
}

impl<T: UsbContext> Transport for UsbTransport<T> {
    fn control_transfer(&mut self, request: ControlRequest, buf: &mut [u8]) -> Result<usize> {
        let handle = self.handle()?;

        let result = match request.direction() {
            Direction::Out => handle.write_control(
                request.request_type(),
                request.request(),
                request.value(),
                request.index(),
                buf,
                self.timeout,
            ),
            Direction::In => handle.read_control(
                request.request_type(),
                request.request(),
                request.value(),
                request.index(),
                buf,
                self.timeout,
            ),
        };

        result.map_err(Error::Transfer)
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.handle()?
            .read_bulk(self.endpoint.address, buf, self.timeout)
            .map_err(Error::Transfer)
    }

    fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(err) = handle.release_interface(INTERFACE) {
                warn!("could not release interface {}: {}", INTERFACE, err);
            }
            info!("Closed {:04x}:{:04x}", USBDS_VID, USBDS_PID);
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

impl<T: UsbContext> Drop for UsbTransport<T> {
    fn drop(&mut self) {
        self.close();
    }
}
