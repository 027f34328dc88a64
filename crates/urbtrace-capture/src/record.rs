//! Record header wire format.
//!
//! Every capture record starts with a fixed base header whose first field is
//! the total header length, so consumers can skip extensions they do not
//! understand. Control and isochronous records append a kind-specific
//! extension between the base header and the payload bytes. All fields are
//! little-endian.

use bitflags::bitflags;

/// Base packet header size in bytes.
pub const PACKET_HEADER_LEN: u16 = 27;
/// Control record header size (base header + 1-byte stage tag).
pub const CONTROL_HEADER_LEN: u16 = 28;
/// Isochronous header size before the per-packet array.
pub const ISOCH_FIXED_HEADER_LEN: u16 = PACKET_HEADER_LEN + 24;
/// Size of one encoded isochronous packet entry.
pub const ISO_PACKET_ENTRY_LEN: u16 = 16;
/// Upper bound on per-transfer isochronous packet entries.
pub const MAX_ISO_PACKETS: usize = 1024;

/// Normalized transfer category attached to every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Isochronous,
    Interrupt,
    Control,
    Bulk,
    /// Request-level bookkeeping record with no transfer semantics
    /// (pipe resets, aborts, frame-number queries).
    IrpInfo,
    Unknown,
}

impl TransferKind {
    pub const fn raw(self) -> u8 {
        match self {
            TransferKind::Isochronous => 0,
            TransferKind::Interrupt => 1,
            TransferKind::Control => 2,
            TransferKind::Bulk => 3,
            TransferKind::IrpInfo => 0xFE,
            TransferKind::Unknown => 0xFF,
        }
    }
}

/// Control transfer stage tag.
///
/// The engine only ever emits `Setup` and `Complete`; `Data` and `Status`
/// exist in the wire format for consumers that splice in bus-level captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStage {
    Setup,
    Data,
    Status,
    Complete,
}

impl ControlStage {
    pub const fn raw(self) -> u8 {
        match self {
            ControlStage::Setup => 0,
            ControlStage::Data => 1,
            ControlStage::Status => 2,
            ControlStage::Complete => 3,
        }
    }
}

bitflags! {
    /// Record info bit-flags.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct RecordInfo: u8 {
        /// Set when the request was observed on its way back from the bus
        /// driver (completion side); clear for the submission side.
        const FROM_COMPLETION = 0x01;
    }
}

/// Base header fields shared by every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Correlation identity pairing Submit and Complete observations.
    pub irp_id: u64,
    pub status: u32,
    /// Operation kind code of the observed request.
    pub function: u16,
    pub info: RecordInfo,
    pub bus: u16,
    pub device: u16,
    /// 7-bit endpoint address; bit 7 set for device-to-host endpoints.
    pub endpoint: u8,
    pub transfer: TransferKind,
    /// Payload bytes following the header.
    pub data_length: u32,
}

/// One per-packet entry of an isochronous record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoPacketEntry {
    pub offset: u64,
    pub length: u32,
    pub status: u32,
}

/// Kind-specific header extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderExtension {
    None,
    Control {
        stage: ControlStage,
    },
    Isoch {
        start_frame: u64,
        error_count: u64,
        packets: Vec<IsoPacketEntry>,
    },
}

/// A complete record header, ready to encode.
///
/// Records are immutable once handed to a sink; the payload travels
/// separately (see [`crate::CaptureSink`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub header: PacketHeader,
    pub extension: HeaderExtension,
}

impl CaptureRecord {
    pub fn packet(header: PacketHeader) -> Self {
        Self {
            header,
            extension: HeaderExtension::None,
        }
    }

    pub fn control(header: PacketHeader, stage: ControlStage) -> Self {
        Self {
            header,
            extension: HeaderExtension::Control { stage },
        }
    }

    pub fn isoch(
        header: PacketHeader,
        start_frame: u64,
        error_count: u64,
        packets: Vec<IsoPacketEntry>,
    ) -> Self {
        Self {
            header,
            extension: HeaderExtension::Isoch {
                start_frame,
                error_count,
                packets,
            },
        }
    }

    /// Total encoded header size, including the extension.
    pub fn header_len(&self) -> u16 {
        match &self.extension {
            HeaderExtension::None => PACKET_HEADER_LEN,
            HeaderExtension::Control { .. } => CONTROL_HEADER_LEN,
            HeaderExtension::Isoch { packets, .. } => {
                // 1024 entries max, so this always fits in 16 bits.
                ISOCH_FIXED_HEADER_LEN + ISO_PACKET_ENTRY_LEN * packets.len() as u16
            }
        }
    }

    /// Builds the encoded header bytes. Payload bytes (if any) follow the
    /// header directly in the capture stream.
    pub fn encode(&self) -> Vec<u8> {
        let header = &self.header;
        let mut out = Vec::with_capacity(self.header_len() as usize);
        out.extend_from_slice(&self.header_len().to_le_bytes());
        out.extend_from_slice(&header.irp_id.to_le_bytes());
        out.extend_from_slice(&header.status.to_le_bytes());
        out.extend_from_slice(&header.function.to_le_bytes());
        out.push(header.info.bits());
        out.extend_from_slice(&header.bus.to_le_bytes());
        out.extend_from_slice(&header.device.to_le_bytes());
        out.push(header.endpoint);
        out.push(header.transfer.raw());
        out.extend_from_slice(&header.data_length.to_le_bytes());

        match &self.extension {
            HeaderExtension::None => {}
            HeaderExtension::Control { stage } => out.push(stage.raw()),
            HeaderExtension::Isoch {
                start_frame,
                error_count,
                packets,
            } => {
                out.extend_from_slice(&start_frame.to_le_bytes());
                out.extend_from_slice(&(packets.len() as u64).to_le_bytes());
                out.extend_from_slice(&error_count.to_le_bytes());
                for packet in packets {
                    out.extend_from_slice(&packet.offset.to_le_bytes());
                    out.extend_from_slice(&packet.length.to_le_bytes());
                    out.extend_from_slice(&packet.status.to_le_bytes());
                }
            }
        }

        out
    }
}
