#![allow(dead_code)]

use std::sync::Arc;

use urbtrace_capture::{CapturedRecord, ManualClock, MemoryCapture, MemoryCaptureConfig};
use urbtrace_engine::endpoints::{INTERFACE_HEADER_LEN, PIPE_ENTRY_LEN};
use urbtrace_engine::{CaptureAll, DeviceContext, DeviceFilter, RootContext};

pub const BUS_ID: u16 = 1;
pub const DEVICE_ADDRESS: u16 = 5;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub sink: Arc<MemoryCapture>,
    pub device: DeviceContext,
}

impl Harness {
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.sink.records()
    }
}

pub fn harness() -> Harness {
    harness_with_filter(Arc::new(CaptureAll))
}

pub fn harness_with_filter(filter: Arc<dyn DeviceFilter>) -> Harness {
    let clock = Arc::new(ManualClock::new(1_000));
    let sink = Arc::new(MemoryCapture::with_clock(
        MemoryCaptureConfig::default(),
        clock.clone(),
    ));
    let root = RootContext::new(BUS_ID, filter, sink.clone(), clock.clone());
    Harness {
        clock,
        sink,
        device: DeviceContext::new(Arc::new(root), DEVICE_ADDRESS),
    }
}

/// One interface-information record: 10-byte header plus 12-byte pipe
/// entries `(max_packet_size, endpoint_address, pipe_type, pipe_handle)`.
pub fn interface_record(
    interface_number: u8,
    alternate_setting: u8,
    pipes: &[(u16, u8, u8, u64)],
) -> Vec<u8> {
    let length = (INTERFACE_HEADER_LEN + pipes.len().max(1) * PIPE_ENTRY_LEN) as u16;
    let mut out = Vec::new();
    out.extend_from_slice(&length.to_le_bytes());
    out.push(interface_number);
    out.push(alternate_setting);
    out.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00]); // class/subclass/protocol/reserved
    out.extend_from_slice(&(pipes.len() as u16).to_le_bytes());
    for (max_packet, endpoint, kind, handle) in pipes {
        out.extend_from_slice(&max_packet.to_le_bytes());
        out.push(*endpoint);
        out.push(*kind);
        out.extend_from_slice(&handle.to_le_bytes());
    }
    while out.len() < length as usize {
        out.push(0);
    }
    out
}

/// Standard configuration descriptor blob: 9-byte configuration header
/// followed by one 9-byte interface descriptor per
/// `(interface_number, alternate_setting)` pair.
pub fn config_descriptor(configuration_value: u8, interfaces: &[(u8, u8)]) -> Vec<u8> {
    let mut blob = vec![
        0x09,
        0x02,
        0x00, // wTotalLength, patched below
        0x00,
        interfaces.len() as u8,
        configuration_value,
        0x00,
        0x80,
        0x32,
    ];
    for (interface_number, alternate_setting) in interfaces {
        blob.extend_from_slice(&[
            0x09,
            0x04,
            *interface_number,
            *alternate_setting,
            0x01,
            0xFF,
            0x00,
            0x00,
            0x00,
        ]);
    }
    let total = blob.len() as u16;
    blob[2..4].copy_from_slice(&total.to_le_bytes());
    blob
}
