use log::{debug, info};
use rusb::{ConfigDescriptor, DeviceHandle, Direction, TransferType, UsbContext};

use crate::error::{Error, Result};

/// The bulk IN pipe frames are streamed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkEndpoint {
    pub address: u8,
    pub max_packet_size: u16,
}

/// One endpoint as listed by the interface descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

/// Endpoints of the default alternate setting of `interface`.
pub fn interface_endpoints(config: &ConfigDescriptor, interface: u8) -> Vec<EndpointInfo> {
    config
        .interfaces()
        .filter(|i| i.number() == interface)
        .flat_map(|i| i.descriptors())
        .filter(|d| d.setting_number() == 0)
        .flat_map(|d| {
            d.endpoint_descriptors()
                .map(|e| EndpointInfo {
                    address: e.address(),
                    direction: e.direction(),
                    transfer_type: e.transfer_type(),
                    // upper bits carry high-bandwidth multipliers
                    max_packet_size: e.max_packet_size() & 0x07ff,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Pick the first bulk IN endpoint.
pub fn negotiate(endpoints: impl IntoIterator<Item = EndpointInfo>) -> Result<BulkEndpoint> {
    for (index, ep) in endpoints.into_iter().enumerate() {
        debug!(
            "endpoint {}: address {:#04x} {:?} {:?} max packet {}",
            index, ep.address, ep.transfer_type, ep.direction, ep.max_packet_size
        );

        if ep.transfer_type == TransferType::Bulk && ep.direction == Direction::In {
            info!(
                "using bulk endpoint {:#04x}, max packet size {}",
                ep.address, ep.max_packet_size
            );
            return Ok(BulkEndpoint {
                address: ep.address,
                max_packet_size: ep.max_packet_size,
            });
        }
    }

    Err(Error::NoBulkInputEndpoint)
}

/// A whole frame must go out as one unsplit read: its length has to be a
/// multiple of the packet size or the device ends the request on a short
/// packet mid-frame.
pub fn check_raw_io(endpoint: &BulkEndpoint, transfer_len: usize) -> Result<()> {
    let packet = endpoint.max_packet_size as usize;
    if packet == 0 {
        return Err(Error::Policy(format!(
            "endpoint {:#04x} reports a zero packet size",
            endpoint.address
        )));
    }
    if transfer_len % packet != 0 {
        return Err(Error::Policy(format!(
            "frame of {} bytes is not a multiple of the {} byte packet size",
            transfer_len, packet
        )));
    }
    Ok(())
}

/// Prepare the bulk pipe for full-frame reads.
pub fn apply_raw_io<T: UsbContext>(
    handle: &mut DeviceHandle<T>,
    endpoint: &BulkEndpoint,
    transfer_len: usize,
) -> Result<()> {
    check_raw_io(endpoint, transfer_len)?;

    handle.clear_halt(endpoint.address).map_err(|err| {
        Error::Policy(format!(
            "could not reset endpoint {:#04x}: {}",
            endpoint.address, err
        ))
    })
}
