use bytes::BytesMut;
use log::{debug, trace};

use super::{
    BITMAP_LEN, CMDIN_FRAMEINFO, CMDIN_STATUS, CMDOUT_CAPTURE_START, CMDOUT_CAPTURE_STOP,
    FRAME_SIZE, INFO_SIZE, STATUS_SIZE, VALID_FLAG_OFFSET,
};
use crate::capture::{ControlRequest, Transport};
use crate::error::{Error, Invalid, Result};
use crate::frame::LCD_HEIGHT;

/// Record of the last captured frame.
///
/// ```text
/// u8  bitmap[48]   one bit per half-line sent, LSB first
/// u32 frame        frame number
/// u8  valid        0 if capture timed out (LCD is inactive)
/// ```
///
/// The low two bits of the bitmap double as the frame status; a usable frame
/// always has both halves of its first row sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    bitmap: [u8; BITMAP_LEN],
    frame: u32,
    valid: u8,
}

impl FrameInfo {
    pub fn from_bytes(raw: &[u8; INFO_SIZE]) -> Self {
        let mut bitmap = [0u8; BITMAP_LEN];
        bitmap.copy_from_slice(&raw[..BITMAP_LEN]);

        let mut frame = [0u8; 4];
        frame.copy_from_slice(&raw[BITMAP_LEN..VALID_FLAG_OFFSET]);

        Self {
            bitmap,
            frame: u32::from_le_bytes(frame),
            valid: raw[VALID_FLAG_OFFSET],
        }
    }

    pub fn status(&self) -> u8 {
        self.bitmap[0] & 3
    }

    pub fn frame_number(&self) -> u32 {
        self.frame
    }

    pub fn validate(&self) -> std::result::Result<(), Invalid> {
        if self.status() != 3 {
            return Err(Invalid::BadStatus(self.status()));
        }
        if self.valid == 0 {
            return Err(Invalid::CaptureTimedOut);
        }
        Ok(())
    }

    /// Whether half-line `line` was transmitted in this frame.
    pub fn line_sent(&self, line: usize) -> bool {
        self.bitmap[line >> 3] & (1 << (line & 7)) != 0
    }

    pub fn lines_sent(&self) -> usize {
        self.bitmap.iter().map(|b| b.count_ones() as usize).sum()
    }
}

/// Response of the status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Free running frame counter.
    pub frame_count: u32,
    pub lcd_on: bool,
    pub capture_in_progress: bool,
}

impl DeviceStatus {
    pub fn from_bytes(raw: &[u8]) -> std::result::Result<Self, Invalid> {
        if raw.len() < STATUS_SIZE {
            return Err(Invalid::Truncated(raw.len()));
        }

        Ok(Self {
            frame_count: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            lcd_on: raw[4] != 0,
            capture_in_progress: raw[5] != 0,
        })
    }
}

pub fn device_status<T: Transport + ?Sized>(transport: &mut T) -> Result<DeviceStatus> {
    let mut buf = [0u8; STATUS_SIZE];
    let n = transport.control_transfer(ControlRequest::vendor_in(CMDIN_STATUS), &mut buf)?;
    Ok(DeviceStatus::from_bytes(&buf[..n])?)
}

/// Stop any capture in progress and reset the frame counter to 0.
pub fn stop_capture<T: Transport + ?Sized>(transport: &mut T) -> Result<()> {
    transport.control_transfer(ControlRequest::vendor_out(CMDOUT_CAPTURE_STOP, 0), &mut [])?;
    Ok(())
}

/// Runs the capture exchange for one frame at a time.
///
/// Owns the scratch space for the payload and the frame info, so every
/// session and every worker gets its own.
pub struct FrameGrabber {
    payload: BytesMut,
    info: [u8; INFO_SIZE],
}

impl FrameGrabber {
    pub fn new() -> Self {
        let mut payload = BytesMut::with_capacity(FRAME_SIZE);
        payload.resize(FRAME_SIZE, 0);

        Self {
            payload,
            info: [0; INFO_SIZE],
        }
    }

    /// Capture one frame. On success [`FrameGrabber::payload`] holds the sent
    /// lines, packed in order.
    pub fn fetch<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<FrameInfo> {
        transport.control_transfer(ControlRequest::vendor_out(CMDOUT_CAPTURE_START, 0), &mut [])?;

        self.read_payload(transport)?;

        let n = transport.control_transfer(ControlRequest::vendor_in(CMDIN_FRAMEINFO), &mut self.info)?;
        // the record ends at the valid flag, the rest of the 64 bytes is padding
        if n <= VALID_FLAG_OFFSET {
            return Err(Invalid::Truncated(n).into());
        }
        self.info[n..].fill(0);

        let info = FrameInfo::from_bytes(&self.info);
        if let Err(invalid) = info.validate() {
            debug!(
                "rejected frame {}: {} (info {})",
                info.frame_number(),
                invalid,
                hex::encode(&self.info[..8])
            );
            return Err(invalid.into());
        }

        trace!(
            "frame {}: {} of {} lines sent",
            info.frame_number(),
            info.lines_sent(),
            2 * LCD_HEIGHT
        );

        Ok(info)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn read_payload<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        let mut received = 0;

        while received < FRAME_SIZE {
            let len = transport.bulk_read(&mut self.payload[received..])?;
            if len == 0 {
                return Err(Error::ShortFrame {
                    received,
                    expected: FRAME_SIZE,
                });
            }
            received += len;
        }

        Ok(())
    }
}

impl Default for FrameGrabber {
    fn default() -> Self {
        Self::new()
    }
}
