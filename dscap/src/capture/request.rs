use rusb::{Direction, Recipient, RequestType};

use crate::error::{Error, Result};

// Highest standard request code defined by USB 2.0 (SYNCH_FRAME).
const MAX_STANDARD_REQUEST: u8 = 0x0c;

/// Setup packet for a control transfer on the default endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    direction: Direction,
    request_type: u8,
    request: u8,
    value: u16,
    index: u16,
}

impl ControlRequest {
    /// Build a request, rejecting field combinations the bus can't carry.
    pub fn new(
        direction: Direction,
        kind: RequestType,
        recipient: Recipient,
        request: u8,
        value: u16,
    ) -> Result<Self> {
        if kind == RequestType::Reserved {
            return Err(Error::InvalidRequest("reserved request type"));
        }
        if kind == RequestType::Standard {
            if request > MAX_STANDARD_REQUEST {
                return Err(Error::InvalidRequest("undefined standard request"));
            }
            if recipient == Recipient::Other {
                return Err(Error::InvalidRequest(
                    "standard requests can't target recipient other",
                ));
            }
        }

        Ok(Self::raw(direction, kind, recipient, request, value))
    }

    /// Vendor request to the device carrying data out (or nothing).
    pub fn vendor_out(request: u8, value: u16) -> Self {
        Self::raw(
            Direction::Out,
            RequestType::Vendor,
            Recipient::Device,
            request,
            value,
        )
    }

    /// Vendor request to the device expecting a response.
    pub fn vendor_in(request: u8) -> Self {
        Self::raw(Direction::In, RequestType::Vendor, Recipient::Device, request, 0)
    }

    fn raw(
        direction: Direction,
        kind: RequestType,
        recipient: Recipient,
        request: u8,
        value: u16,
    ) -> Self {
        Self {
            direction,
            request_type: rusb::request_type(direction, kind, recipient),
            request,
            value,
            index: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The packed `bmRequestType` byte.
    pub fn request_type(&self) -> u8 {
        self.request_type
    }

    pub fn request(&self) -> u8 {
        self.request
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    pub fn index(&self) -> u16 {
        self.index
    }
}
