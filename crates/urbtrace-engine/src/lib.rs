#![forbid(unsafe_code)]

//! Request normalization engine for wire-level USB capture.
//!
//! The engine observes every request flowing between a function driver and
//! the bus driver — each request twice, once per [`urb::Phase`] — and turns
//! the heterogeneous operation kinds into a uniform stream of capture
//! records written through a [`urbtrace_capture::CaptureSink`]. It is
//! strictly observational: nothing here may alter, delay or fail the
//! underlying request, so every malformed-input and resource-exhaustion
//! path degrades to "emit less, keep going".
//!
//! Entry point: [`analyze`], called synchronously and reentrantly from the
//! surrounding I/O stack. Shared per-device state (the pipe table, the
//! pending-request table, the cached configuration descriptor) lives in
//! [`DeviceContext`] behind one short-held lock each; no call path ever
//! holds two of them at once.

use std::sync::{Arc, Mutex};

use urbtrace_capture::{CaptureRecord, CaptureSink, Clock};

pub mod endpoints;
pub mod pending;
pub mod urb;

mod classify;
mod control;
mod filter;
mod isoch;

pub use classify::analyze;
pub use filter::{AddressListFilter, CaptureAll, DeviceFilter};
pub use isoch::IsochDiscard;

use endpoints::{EndpointInfo, EndpointTable};
use pending::{PendingUrbInfo, PendingUrbTable};
use urb::PipeHandle;

/// Bus-wide state shared by every device attached to one root hub:
/// the bus identity, the capture collaborators and the clock.
pub struct RootContext {
    bus_id: u16,
    filter: Arc<dyn DeviceFilter>,
    sink: Arc<dyn CaptureSink>,
    clock: Arc<dyn Clock>,
}

impl RootContext {
    pub fn new(
        bus_id: u16,
        filter: Arc<dyn DeviceFilter>,
        sink: Arc<dyn CaptureSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bus_id,
            filter,
            sink,
            clock,
        }
    }

    pub fn bus_id(&self) -> u16 {
        self.bus_id
    }

    pub fn filter(&self) -> &dyn DeviceFilter {
        self.filter.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // A rejected write is a drop, never a retry: the observation has already
    // passed and the underlying request must not notice.

    pub(crate) fn emit_packet(&self, record: &CaptureRecord, payload: Option<&[u8]>) {
        if let Err(err) = self.sink.write_packet(record, payload) {
            tracing::debug!("capture record dropped: {err}");
        }
    }

    pub(crate) fn emit_payload(&self, record: &CaptureRecord, segments: &[&[u8]]) {
        if let Err(err) = self.sink.write_payload(record, segments) {
            tracing::debug!("capture record dropped: {err}");
        }
    }

    pub(crate) fn emit_packet_at(
        &self,
        timestamp_ns: u64,
        record: &CaptureRecord,
        payload: Option<&[u8]>,
    ) {
        if let Err(err) = self.sink.write_timestamped_packet(timestamp_ns, record, payload) {
            tracing::debug!("capture record dropped: {err}");
        }
    }
}

/// Snapshot of a device context's bookkeeping, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device_address: u16,
    pub known_endpoints: usize,
    pub pending_urbs: usize,
    pub has_configuration_descriptor: bool,
}

/// Per-device observation state.
///
/// Created on device attach and shared by every in-flight request for that
/// device; all interior state is lock-guarded so [`analyze`] can be entered
/// concurrently from independent execution contexts.
pub struct DeviceContext {
    device_address: u16,
    root: Arc<RootContext>,
    endpoints: Mutex<EndpointTable>,
    pending: Mutex<PendingUrbTable>,
    config_descriptor: Mutex<Option<Arc<[u8]>>>,
}

impl DeviceContext {
    pub fn new(root: Arc<RootContext>, device_address: u16) -> Self {
        Self {
            device_address,
            root,
            endpoints: Mutex::new(EndpointTable::default()),
            pending: Mutex::new(PendingUrbTable::default()),
            config_descriptor: Mutex::new(None),
        }
    }

    pub fn device_address(&self) -> u16 {
        self.device_address
    }

    pub fn root(&self) -> &RootContext {
        &self.root
    }

    pub fn summary(&self) -> DeviceSummary {
        // One lock at a time; each guard is released before the next is
        // taken.
        let known_endpoints = self.endpoints.lock().expect("endpoint lock poisoned").len();
        let pending_urbs = self.pending.lock().expect("pending lock poisoned").len();
        let has_configuration_descriptor = self
            .config_descriptor
            .lock()
            .expect("descriptor lock poisoned")
            .is_some();
        DeviceSummary {
            device_address: self.device_address,
            known_endpoints,
            pending_urbs,
            has_configuration_descriptor,
        }
    }

    pub fn resolve_endpoint(&self, pipe: PipeHandle) -> Option<EndpointInfo> {
        self.endpoints
            .lock()
            .expect("endpoint lock poisoned")
            .resolve(pipe)
    }

    pub(crate) fn learn_endpoints(&self, interfaces: &[u8]) {
        let mut table = self.endpoints.lock().expect("endpoint lock poisoned");
        endpoints::learn_endpoints(&mut table, interfaces, self.device_address);
    }

    /// Replaces the cached configuration descriptor.
    ///
    /// The new copy is built before the lock is taken and installed by an
    /// owned-value swap, so a concurrent reader either sees the complete old
    /// descriptor or the complete new one. The cached span is the declared
    /// wTotalLength, clamped to the bytes actually provided.
    pub(crate) fn cache_configuration(&self, descriptor: Option<&[u8]>) {
        let new: Option<Arc<[u8]>> = descriptor.and_then(|bytes| {
            if bytes.len() < 4 {
                tracing::debug!(
                    "configuration descriptor too short to cache ({} bytes)",
                    bytes.len()
                );
                return None;
            }
            let total = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
            Some(Arc::from(&bytes[..total.min(bytes.len())]))
        });
        *self
            .config_descriptor
            .lock()
            .expect("descriptor lock poisoned") = new;
    }

    /// Clones the cached descriptor handle; callers parse without holding
    /// the lock.
    pub(crate) fn cached_configuration(&self) -> Option<Arc<[u8]>> {
        self.config_descriptor
            .lock()
            .expect("descriptor lock poisoned")
            .clone()
    }

    pub(crate) fn insert_pending(&self, irp_id: u64, info: PendingUrbInfo) {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(irp_id, info);
    }

    pub(crate) fn take_pending(&self, irp_id: u64) -> Option<PendingUrbInfo> {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .take(irp_id)
    }
}
