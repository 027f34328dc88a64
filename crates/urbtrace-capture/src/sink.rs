use thiserror::Error;

use crate::record::CaptureRecord;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    #[error("capture buffer full")]
    CaptureFull,
    #[error("record rejected by sink")]
    Rejected,
}

/// Destination for normalized capture records.
///
/// Implementations own queuing and backpressure. A failed write means the
/// record is lost; callers must treat it as a drop and never retry — the
/// observation that produced it has already passed.
pub trait CaptureSink: Send + Sync {
    /// Writes one record with an optional contiguous payload.
    fn write_packet(&self, record: &CaptureRecord, payload: Option<&[u8]>)
        -> Result<(), SinkError>;

    /// Writes one record whose payload is scattered across `segments`.
    ///
    /// Segments are concatenated in order with no added framing. The default
    /// implementation gathers into a single buffer and delegates to
    /// [`CaptureSink::write_packet`].
    fn write_payload(&self, record: &CaptureRecord, segments: &[&[u8]]) -> Result<(), SinkError> {
        let total: usize = segments.iter().map(|s| s.len()).sum();
        if total == 0 {
            return self.write_packet(record, None);
        }
        let mut payload = Vec::with_capacity(total);
        for segment in segments {
            payload.extend_from_slice(segment);
        }
        self.write_packet(record, Some(&payload))
    }

    /// Writes one record stamped with a caller-provided timestamp instead of
    /// the sink's own clock. Used for records materialized after the moment
    /// they describe.
    fn write_timestamped_packet(
        &self,
        timestamp_ns: u64,
        record: &CaptureRecord,
        payload: Option<&[u8]>,
    ) -> Result<(), SinkError>;
}
