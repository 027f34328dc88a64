#![forbid(unsafe_code)]

//! Capture-side model for normalized USB request records.
//!
//! This crate intentionally stays on the "cold" side of the observation
//! path: it defines the fixed little-endian record wire format, a pure
//! `encode()` builder that returns fully formed header bytes as `Vec<u8>`
//! so callers can decide how to persist them, the [`CaptureSink`] seam the
//! normalization engine writes through, and an in-memory sink suitable for
//! tests and for draining captures out of a live process.

mod clock;
mod memory;
mod record;
mod sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::{CaptureStats, CapturedRecord, MemoryCapture, MemoryCaptureConfig};
pub use record::{
    CaptureRecord, ControlStage, HeaderExtension, IsoPacketEntry, PacketHeader, RecordInfo,
    TransferKind, CONTROL_HEADER_LEN, ISOCH_FIXED_HEADER_LEN, ISO_PACKET_ENTRY_LEN,
    MAX_ISO_PACKETS, PACKET_HEADER_LEN,
};
pub use sink::{CaptureSink, SinkError};
