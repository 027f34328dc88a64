use std::collections::HashMap;

/// Submit-time snapshot of a request whose operation kind the engine does
/// not understand. Consulted (and removed) when the request completes, so
/// the deferred record keeps the submission's identity and causal position
/// even if the stack reinterpreted the operation in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUrbInfo {
    pub timestamp_ns: u64,
    pub status: u32,
    pub function: u16,
    pub bus: u16,
    pub device: u16,
}

#[derive(Debug, Default)]
pub struct PendingUrbTable {
    entries: HashMap<u64, PendingUrbInfo>,
}

impl PendingUrbTable {
    /// Records a pending submission. A stale entry under the same
    /// correlation identity (a request that never completed) is replaced.
    pub fn insert(&mut self, irp_id: u64, info: PendingUrbInfo) {
        self.entries.insert(irp_id, info);
    }

    pub fn take(&mut self, irp_id: u64) -> Option<PendingUrbInfo> {
        self.entries.remove(&irp_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
