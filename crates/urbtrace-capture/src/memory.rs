//! In-memory capture sink with a hard byte cap.
//!
//! Bounded buffer for records drained out of a live process (or inspected
//! by tests). When the cap is exceeded new records are dropped and counted,
//! never truncated; dropped-record accounting is this sink's responsibility,
//! not the engine's.

use std::sync::{Arc, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::record::CaptureRecord;
use crate::sink::{CaptureSink, SinkError};

const DEFAULT_MAX_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct MemoryCaptureConfig {
    /// Hard cap on total buffered bytes (headers + payloads).
    ///
    /// - When exceeded, new records are dropped.
    /// - `0` disables capture (all records are dropped).
    pub max_bytes: usize,
}

impl Default for MemoryCaptureConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// One buffered record, as handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    pub timestamp_ns: u64,
    pub record: CaptureRecord,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub records: usize,
    pub bytes: usize,
    pub dropped_records: u64,
    pub dropped_bytes: u64,
}

#[derive(Debug, Default)]
struct CaptureState {
    records: Vec<CapturedRecord>,
    bytes: usize,
    dropped_records: u64,
    dropped_bytes: u64,
}

pub struct MemoryCapture {
    cfg: MemoryCaptureConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CaptureState>,
}

impl MemoryCapture {
    pub fn new(cfg: MemoryCaptureConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: MemoryCaptureConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            clock,
            state: Mutex::new(CaptureState::default()),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        let state = self.state.lock().expect("capture lock poisoned");
        CaptureStats {
            records: state.records.len(),
            bytes: state.bytes,
            dropped_records: state.dropped_records,
            dropped_bytes: state.dropped_bytes,
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().expect("capture lock poisoned");
        state.records.clear();
        state.bytes = 0;
        state.dropped_records = 0;
        state.dropped_bytes = 0;
    }

    /// Snapshot of all buffered records, oldest first.
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.state
            .lock()
            .expect("capture lock poisoned")
            .records
            .clone()
    }

    /// Serializes all buffered records to the wire stream without draining.
    pub fn export(&self) -> Vec<u8> {
        self.export_inner(false)
    }

    /// Serializes and drains all buffered records.
    pub fn take(&self) -> Vec<u8> {
        self.export_inner(true)
    }

    fn export_inner(&self, drain: bool) -> Vec<u8> {
        let records = {
            let mut guard = self.state.lock().expect("capture lock poisoned");
            if drain {
                guard.bytes = 0;
                std::mem::take(&mut guard.records)
            } else {
                guard.records.clone()
            }
        };

        let mut out = Vec::new();
        for entry in records {
            out.extend_from_slice(&entry.record.encode());
            out.extend_from_slice(&entry.payload);
        }
        out
    }

    fn push(
        &self,
        timestamp_ns: u64,
        record: &CaptureRecord,
        payload: Vec<u8>,
    ) -> Result<(), SinkError> {
        debug_assert_eq!(
            record.header.data_length as usize,
            payload.len(),
            "record declares {} payload bytes but {} were provided",
            record.header.data_length,
            payload.len()
        );

        let len = record.header_len() as usize + payload.len();
        let mut state = self.state.lock().expect("capture lock poisoned");
        if len > self.cfg.max_bytes || state.bytes.saturating_add(len) > self.cfg.max_bytes {
            state.dropped_records = state.dropped_records.saturating_add(1);
            state.dropped_bytes = state.dropped_bytes.saturating_add(len as u64);
            return Err(SinkError::CaptureFull);
        }
        state.records.push(CapturedRecord {
            timestamp_ns,
            record: record.clone(),
            payload,
        });
        state.bytes = state.bytes.saturating_add(len);
        Ok(())
    }
}

impl CaptureSink for MemoryCapture {
    fn write_packet(
        &self,
        record: &CaptureRecord,
        payload: Option<&[u8]>,
    ) -> Result<(), SinkError> {
        let timestamp_ns = self.clock.now_ns();
        self.push(
            timestamp_ns,
            record,
            payload.map(<[u8]>::to_vec).unwrap_or_default(),
        )
    }

    fn write_payload(&self, record: &CaptureRecord, segments: &[&[u8]]) -> Result<(), SinkError> {
        let total: usize = segments.iter().map(|s| s.len()).sum();
        let mut payload = Vec::with_capacity(total);
        for segment in segments {
            payload.extend_from_slice(segment);
        }
        self.push(self.clock.now_ns(), record, payload)
    }

    fn write_timestamped_packet(
        &self,
        timestamp_ns: u64,
        record: &CaptureRecord,
        payload: Option<&[u8]>,
    ) -> Result<(), SinkError> {
        self.push(
            timestamp_ns,
            record,
            payload.map(<[u8]>::to_vec).unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::{PacketHeader, RecordInfo, TransferKind};

    fn header(data_length: u32) -> PacketHeader {
        PacketHeader {
            irp_id: 1,
            status: 0,
            function: 0x0009,
            info: RecordInfo::empty(),
            bus: 1,
            device: 3,
            endpoint: 0x02,
            transfer: TransferKind::Bulk,
            data_length,
        }
    }

    #[test]
    fn records_are_stamped_with_sink_clock() {
        let clock = Arc::new(ManualClock::new(42));
        let sink = MemoryCapture::with_clock(MemoryCaptureConfig::default(), clock.clone());

        let record = CaptureRecord::packet(header(2));
        sink.write_packet(&record, Some(&[1, 2])).unwrap();
        clock.advance(10);
        sink.write_timestamped_packet(7, &record, Some(&[3, 4]))
            .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp_ns, 42);
        assert_eq!(records[1].timestamp_ns, 7);
    }

    #[test]
    fn write_payload_concatenates_segments_in_order() {
        let sink = MemoryCapture::new(MemoryCaptureConfig::default());
        let record = CaptureRecord::packet(header(5));
        sink.write_payload(&record, &[&[1, 2], &[], &[3, 4, 5]])
            .unwrap();

        let records = sink.records();
        assert_eq!(records[0].payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn byte_cap_drops_and_counts() {
        // Base header is 27 bytes; leave room for exactly one header-only record.
        let sink = MemoryCapture::new(MemoryCaptureConfig { max_bytes: 30 });
        let record = CaptureRecord::packet(header(0));

        assert_eq!(sink.write_packet(&record, None), Ok(()));
        assert_eq!(sink.write_packet(&record, None), Err(SinkError::CaptureFull));

        let stats = sink.stats();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.bytes, 27);
        assert_eq!(stats.dropped_records, 1);
        assert_eq!(stats.dropped_bytes, 27);
    }

    #[test]
    fn zero_cap_disables_capture() {
        let sink = MemoryCapture::new(MemoryCaptureConfig { max_bytes: 0 });
        let record = CaptureRecord::packet(header(0));
        assert_eq!(sink.write_packet(&record, None), Err(SinkError::CaptureFull));
        assert_eq!(sink.stats().records, 0);
    }

    #[test]
    fn take_drains_and_frames_records_back_to_back() {
        let sink = MemoryCapture::new(MemoryCaptureConfig::default());
        let record = CaptureRecord::packet(header(3));
        sink.write_packet(&record, Some(&[9, 8, 7])).unwrap();

        let bytes = sink.take();
        assert_eq!(bytes.len(), 27 + 3);
        assert_eq!(&bytes[27..], &[9, 8, 7]);
        assert_eq!(u16::from_le_bytes(bytes[0..2].try_into().unwrap()), 27);

        assert!(sink.records().is_empty());
        assert_eq!(sink.stats().bytes, 0);
    }
}
