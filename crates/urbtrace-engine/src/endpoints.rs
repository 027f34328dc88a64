//! Endpoint resolver: maps opaque pipe identities to endpoint identities.
//!
//! The table is populated by walking the interface-information region that
//! the bus driver fills into configuration/interface selection completions.
//! That region comes from the lower stack and is treated as untrusted: the
//! walk stops (keeping whatever was already learned) rather than failing
//! the request.

use std::collections::HashMap;

use thiserror::Error;

use crate::urb::PipeHandle;

// Pipe kind codes used in interface-information pipe entries.
pub const PIPE_TYPE_CONTROL: u8 = 0;
pub const PIPE_TYPE_ISOCHRONOUS: u8 = 1;
pub const PIPE_TYPE_BULK: u8 = 2;
pub const PIPE_TYPE_INTERRUPT: u8 = 3;

/// Interface-information wire layout: a 10-byte interface header followed
/// by `number_of_pipes` 12-byte pipe entries. Records are variable-length;
/// the walk advances by the declared record length, and the minimum record
/// size covers the header plus one pipe entry.
pub const INTERFACE_HEADER_LEN: usize = 10;
pub const PIPE_ENTRY_LEN: usize = 12;
pub const MIN_INTERFACE_LEN: usize = INTERFACE_HEADER_LEN + PIPE_ENTRY_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
    /// Any kind code outside the defined set.
    Other(u8),
}

impl PipeKind {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            PIPE_TYPE_CONTROL => PipeKind::Control,
            PIPE_TYPE_ISOCHRONOUS => PipeKind::Isochronous,
            PIPE_TYPE_BULK => PipeKind::Bulk,
            PIPE_TYPE_INTERRUPT => PipeKind::Interrupt,
            other => PipeKind::Other(other),
        }
    }
}

/// Resolved identity of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub device_address: u16,
    /// 7-bit address with bit 7 set for device-to-host endpoints.
    pub endpoint_address: u8,
    pub kind: PipeKind,
}

/// Pipe identity to endpoint identity map for one device.
#[derive(Debug, Default)]
pub struct EndpointTable {
    entries: HashMap<PipeHandle, EndpointInfo>,
}

impl EndpointTable {
    pub fn resolve(&self, pipe: PipeHandle) -> Option<EndpointInfo> {
        self.entries.get(&pipe).copied()
    }

    /// Registers a pipe, overwriting any prior mapping: pipe identities are
    /// reused by the bus stack across configuration changes.
    pub fn insert(&mut self, pipe: PipeHandle, info: EndpointInfo) {
        self.entries.insert(pipe, info);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why an interface-information walk stopped early.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceParseStop {
    #[error("{remaining} remaining bytes are too short for an interface record")]
    Truncated { remaining: usize },
    #[error("interface record length {length} exceeds remaining {remaining} bytes")]
    RecordOverrun { length: usize, remaining: usize },
    #[error("{pipes} pipe entries do not fit in {remaining} bytes")]
    PipesOverrun { pipes: usize, remaining: usize },
}

/// Walks an interface-information region and registers every pipe entry
/// under `device_address`. Entries learned before a malformed record are
/// kept; the stop reason is logged, never propagated.
pub fn learn_endpoints(table: &mut EndpointTable, interfaces: &[u8], device_address: u16) {
    let mut offset = 0usize;
    while offset < interfaces.len() {
        let remaining = interfaces.len() - offset;
        if remaining < MIN_INTERFACE_LEN {
            tracing::warn!(
                "stopped parsing interface information: {}",
                InterfaceParseStop::Truncated { remaining }
            );
            break;
        }

        let record = &interfaces[offset..];
        let length = u16::from_le_bytes([record[0], record[1]]) as usize;
        if length == 0 {
            // Zero-length record terminates the region.
            break;
        }
        if length > remaining {
            tracing::warn!(
                "stopped parsing interface information: {}",
                InterfaceParseStop::RecordOverrun { length, remaining }
            );
            break;
        }

        let pipes = u16::from_le_bytes([record[8], record[9]]) as usize;
        // A minimum-size record already holds one pipe entry; only larger
        // pipe counts need the explicit bound check.
        if pipes > 1 && INTERFACE_HEADER_LEN + pipes * PIPE_ENTRY_LEN > remaining {
            tracing::warn!(
                "stopped parsing interface information: {}",
                InterfaceParseStop::PipesOverrun { pipes, remaining }
            );
            break;
        }

        for i in 0..pipes {
            let entry = &record[INTERFACE_HEADER_LEN + i * PIPE_ENTRY_LEN..][..PIPE_ENTRY_LEN];
            let endpoint_address = entry[2];
            let kind = PipeKind::from_raw(entry[3]);
            let handle = PipeHandle(u64::from_le_bytes([
                entry[4], entry[5], entry[6], entry[7], entry[8], entry[9], entry[10], entry[11],
            ]));
            tracing::debug!(
                "learned endpoint {endpoint_address:#04x} ({kind:?}) for pipe {:#x} on device {device_address}",
                handle.0
            );
            table.insert(
                handle,
                EndpointInfo {
                    device_address,
                    endpoint_address,
                    kind,
                },
            );
        }

        offset += length;
    }
}

/// Interface number and alternate setting of the first interface record,
/// used to locate the matching descriptor for interface selections.
pub(crate) fn first_interface_selection(interfaces: &[u8]) -> Option<(u8, u8)> {
    if interfaces.len() < 4 {
        return None;
    }
    Some((interfaces[2], interfaces[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds one interface record with the given pipes, optionally lying
    /// about the declared record length.
    pub(crate) fn interface_record(
        interface_number: u8,
        alternate_setting: u8,
        pipes: &[(u16, u8, u8, u64)],
        declared_length: Option<u16>,
    ) -> Vec<u8> {
        let length = declared_length.unwrap_or_else(|| {
            (INTERFACE_HEADER_LEN + pipes.len().max(1) * PIPE_ENTRY_LEN) as u16
        });
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
        // Pad unused pipe slots up to the declared length when the caller
        // asked for a larger record.
        while out.len() < length as usize {
            out.push(0);
        }
        out
    }

    #[test]
    fn learns_pipes_from_single_interface() {
        let mut table = EndpointTable::default();
        let bytes = interface_record(
            0,
            0,
            &[
                (64, 0x81, PIPE_TYPE_BULK, 0x1000),
                (8, 0x02, PIPE_TYPE_INTERRUPT, 0x2000),
            ],
            None,
        );
        learn_endpoints(&mut table, &bytes, 5);

        assert_eq!(table.len(), 2);
        let info = table.resolve(PipeHandle(0x1000)).unwrap();
        assert_eq!(info.device_address, 5);
        assert_eq!(info.endpoint_address, 0x81);
        assert_eq!(info.kind, PipeKind::Bulk);
        assert_eq!(
            table.resolve(PipeHandle(0x2000)).unwrap().kind,
            PipeKind::Interrupt
        );
    }

    #[test]
    fn walks_consecutive_variable_length_records() {
        let mut table = EndpointTable::default();
        let mut bytes = interface_record(0, 0, &[(64, 0x81, PIPE_TYPE_BULK, 0x1000)], None);
        // Second interface padded beyond its natural size; the walk must
        // advance by the declared length, not the struct size.
        bytes.extend_from_slice(&interface_record(
            1,
            0,
            &[(16, 0x83, PIPE_TYPE_ISOCHRONOUS, 0x3000)],
            Some((MIN_INTERFACE_LEN + 6) as u16),
        ));
        bytes.extend_from_slice(&interface_record(
            2,
            0,
            &[(8, 0x04, PIPE_TYPE_BULK, 0x4000)],
            None,
        ));
        learn_endpoints(&mut table, &bytes, 3);

        assert_eq!(table.len(), 3);
        assert!(table.resolve(PipeHandle(0x3000)).is_some());
        assert!(table.resolve(PipeHandle(0x4000)).is_some());
    }

    #[test]
    fn stops_on_truncated_tail_but_keeps_learned_entries() {
        let mut table = EndpointTable::default();
        let mut bytes = interface_record(0, 0, &[(64, 0x81, PIPE_TYPE_BULK, 0x1000)], None);
        bytes.extend_from_slice(&[5, 0, 1, 2, 3]); // not enough for a record
        learn_endpoints(&mut table, &bytes, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn stops_when_declared_length_overruns_region() {
        let mut table = EndpointTable::default();
        let bytes = interface_record(
            0,
            0,
            &[(64, 0x81, PIPE_TYPE_BULK, 0x1000)],
            Some(0x400), // claims far more than is present
        );
        learn_endpoints(&mut table, &bytes[..MIN_INTERFACE_LEN], 1);
        assert!(table.is_empty());
    }

    #[test]
    fn stops_when_pipe_count_does_not_fit() {
        let mut table = EndpointTable::default();
        let mut bytes = interface_record(0, 0, &[(64, 0x81, PIPE_TYPE_BULK, 0x1000)], None);
        // Claim three pipes but provide storage for one.
        bytes[8..10].copy_from_slice(&3u16.to_le_bytes());
        learn_endpoints(&mut table, &bytes, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn relearning_a_pipe_overwrites_the_old_identity() {
        let mut table = EndpointTable::default();
        let first = interface_record(0, 0, &[(64, 0x81, PIPE_TYPE_BULK, 0x1000)], None);
        learn_endpoints(&mut table, &first, 1);

        let second = interface_record(0, 1, &[(64, 0x02, PIPE_TYPE_INTERRUPT, 0x1000)], None);
        learn_endpoints(&mut table, &second, 1);

        assert_eq!(table.len(), 1);
        let info = table.resolve(PipeHandle(0x1000)).unwrap();
        assert_eq!(info.endpoint_address, 0x02);
        assert_eq!(info.kind, PipeKind::Interrupt);
    }

    #[test]
    fn zero_length_record_terminates_silently() {
        let mut table = EndpointTable::default();
        let mut bytes = interface_record(0, 0, &[(64, 0x81, PIPE_TYPE_BULK, 0x1000)], None);
        let zeros = vec![0u8; MIN_INTERFACE_LEN];
        bytes.extend_from_slice(&zeros);
        learn_endpoints(&mut table, &bytes, 1);
        assert_eq!(table.len(), 1);
    }
}
