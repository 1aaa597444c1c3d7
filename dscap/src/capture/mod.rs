pub mod loopy_ds;
mod request;
#[cfg(test)]
pub(crate) mod testing;

pub use request::ControlRequest;

use log::debug;
use rusb::{Device, DeviceHandle, UsbContext};

use crate::error::{Error, Result};

/// Byte pipe to one capture board.
///
/// Every call blocks the calling thread until the transfer completes or times
/// out. Once [`Transport::close`] has run, all transfers fail with
/// [`Error::Closed`].
pub trait Transport: Send {
    /// Run a control transfer. For `Out` requests `buf` is sent, for `In`
    /// requests the response is written into it. Returns the bytes moved.
    fn control_transfer(&mut self, request: ControlRequest, buf: &mut [u8]) -> Result<usize>;

    /// Read from the bulk input endpoint. `Ok(0)` means the device had nothing
    /// more to send for this request.
    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Release the device. Calling it again does nothing.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Find the first attached device with the given ids and open it.
pub(crate) fn open_device<T: UsbContext>(
    context: &T,
    vid: u16,
    pid: u16,
) -> Result<(Device<T>, DeviceHandle<T>)> {
    let devices = context.devices().map_err(Error::Driver)?;

    for device in devices.iter() {
        let device_desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };

        if device_desc.vendor_id() == vid && device_desc.product_id() == pid {
            debug!(
                "found {:04x}:{:04x} on bus {} address {}",
                vid,
                pid,
                device.bus_number(),
                device.address()
            );
            let handle = device.open().map_err(Error::from_open)?;
            return Ok((device, handle));
        }
    }

    Err(Error::DeviceNotFound { vid, pid })
}
