use std::collections::HashSet;
use std::sync::Mutex;

/// Per-device capture gate.
///
/// Filtering affects only observability: the engine still performs its
/// learning side effects for devices outside the filter, it just emits no
/// records for them.
pub trait DeviceFilter: Send + Sync {
    fn is_captured(&self, device_address: u16) -> bool;
}

/// Captures every device on the bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureAll;

impl DeviceFilter for CaptureAll {
    fn is_captured(&self, _device_address: u16) -> bool {
        true
    }
}

/// Allow-list filter whose membership can be toggled while capture runs.
#[derive(Debug, Default)]
pub struct AddressListFilter {
    addresses: Mutex<HashSet<u16>>,
}

impl AddressListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, device_address: u16) {
        self.addresses
            .lock()
            .expect("filter lock poisoned")
            .insert(device_address);
    }

    pub fn remove(&self, device_address: u16) {
        self.addresses
            .lock()
            .expect("filter lock poisoned")
            .remove(&device_address);
    }
}

impl DeviceFilter for AddressListFilter {
    fn is_captured(&self, device_address: u16) -> bool {
        self.addresses
            .lock()
            .expect("filter lock poisoned")
            .contains(&device_address)
    }
}
