//! Isochronous transfer capture.
//!
//! Inbound completions arrive as a sparse buffer: each sub-packet reports
//! its own offset and received length, with gaps in between. The capture
//! path compacts the valid bytes into a gapless payload and rewrites the
//! per-packet offsets to match, so the record carries exactly the bytes
//! that were received.

use thiserror::Error;

use urbtrace_capture::{CaptureRecord, IsoPacketEntry, PacketHeader, TransferKind, MAX_ISO_PACKETS};

use crate::classify::record_info;
use crate::urb::{IsoPacket, Phase, PipeHandle, TransferData, TransferFlags};
use crate::DeviceContext;

/// Why an isochronous transfer produced no record.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IsochDiscard {
    #[error("isochronous transfer declares {count} packets (limit {MAX_ISO_PACKETS})")]
    TooManyPackets { count: usize },
    #[error("sum of isochronous packet lengths {sum} exceeds transfer buffer length {declared}")]
    LengthMismatch { sum: u64, declared: u32 },
    #[error("isochronous packet {index} extends past the provided transfer bytes")]
    PacketOutOfBounds { index: usize },
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn analyze_isoch_transfer(
    device: &DeviceContext,
    irp_id: u64,
    status: u32,
    function: u16,
    phase: Phase,
    pipe: PipeHandle,
    flags: TransferFlags,
    data: &TransferData,
    start_frame: u64,
    error_count: u64,
    packets: &[IsoPacket],
) {
    // Bound the per-record packet array before any other work so a bogus
    // packet count cannot drive allocation.
    if packets.len() > MAX_ISO_PACKETS {
        tracing::warn!(
            "{}",
            IsochDiscard::TooManyPackets {
                count: packets.len()
            }
        );
        return;
    }

    let (record_device, endpoint) = match device.resolve_endpoint(pipe) {
        Some(info) => (info.device_address, info.endpoint_address),
        None => (device.device_address(), 0xFF),
    };

    let mut header = PacketHeader {
        irp_id,
        status,
        function,
        info: record_info(phase),
        bus: device.root().bus_id(),
        device: record_device,
        endpoint,
        transfer: TransferKind::Isochronous,
        data_length: 0,
    };

    // Consumers need per-packet status/length even when no payload is
    // attached, so the descriptor array is always copied into the header.
    let mut entries: Vec<IsoPacketEntry> = packets
        .iter()
        .map(|packet| IsoPacketEntry {
            offset: u64::from(packet.offset),
            length: packet.length,
            status: packet.status,
        })
        .collect();

    let from_device = flags.is_in();

    if let Some(bytes) = data.capture_bytes() {
        if from_device && phase == Phase::Complete {
            // The declared buffer length reflects what was actually
            // received; the packet lengths must add up within it or the
            // bus driver handed us inconsistent state.
            let sum: u64 = packets.iter().map(|p| u64::from(p.length)).sum();
            if sum > u64::from(data.declared_length) {
                tracing::warn!(
                    "{}",
                    IsochDiscard::LengthMismatch {
                        sum,
                        declared: data.declared_length
                    }
                );
                return;
            }
            for (index, packet) in packets.iter().enumerate() {
                let end = u64::from(packet.offset) + u64::from(packet.length);
                if end > bytes.len() as u64 {
                    tracing::warn!("{}", IsochDiscard::PacketOutOfBounds { index });
                    return;
                }
            }

            let mut segments = Vec::with_capacity(packets.len());
            let mut compacted_offset = 0u64;
            for (entry, packet) in entries.iter_mut().zip(packets) {
                entry.offset = compacted_offset;
                segments.push(&bytes[packet.offset as usize..][..packet.length as usize]);
                compacted_offset += u64::from(packet.length);
            }

            header.data_length = sum as u32;
            let record = CaptureRecord::isoch(header, start_frame, error_count, entries);
            device.root().emit_payload(&record, &segments);
            return;
        }

        if !from_device && phase == Phase::Submit {
            // Outbound buffers are final before the device consumes them;
            // capture verbatim, offsets untouched.
            header.data_length = bytes.len() as u32;
            let record = CaptureRecord::isoch(header, start_frame, error_count, entries);
            device.root().emit_packet(&record, Some(bytes));
            return;
        }
    }

    // Neither side holds a complete, meaningful buffer at this moment.
    let record = CaptureRecord::isoch(header, start_frame, error_count, entries);
    device.root().emit_packet(&record, None);
}
