mod util;

use std::sync::Arc;

use urbtrace_engine::analyze;
use urbtrace_engine::endpoints::PIPE_TYPE_BULK;
use urbtrace_engine::urb::{Phase, PipeHandle, TransferData, TransferFlags, Urb, UrbBody};
use urbtrace_engine::AddressListFilter;

use util::{config_descriptor, harness_with_filter, interface_record, DEVICE_ADDRESS};

const PIPE: u64 = 0x7000;

fn select_configuration() -> Urb {
    Urb {
        status: 0,
        body: UrbBody::SelectConfiguration {
            descriptor: Some(config_descriptor(1, &[(0, 0)])),
            interfaces: interface_record(0, 0, &[(64, 0x81, PIPE_TYPE_BULK, PIPE)]),
        },
    }
}

#[test]
fn unfiltered_devices_emit_nothing_but_still_learn() {
    let filter = Arc::new(AddressListFilter::new());
    let h = harness_with_filter(filter);

    analyze(&h.device, 1, &select_configuration(), Phase::Complete);

    assert!(h.records().is_empty());
    // Observability is the only thing the filter gates: the endpoint table
    // and descriptor cache were still updated.
    let summary = h.device.summary();
    assert_eq!(summary.known_endpoints, 1);
    assert!(summary.has_configuration_descriptor);
    assert!(h.device.resolve_endpoint(PipeHandle(PIPE)).is_some());
}

#[test]
fn correlator_state_is_updated_while_filtered_out() {
    let filter = Arc::new(AddressListFilter::new());
    let h = harness_with_filter(filter.clone());

    h.clock.set(100);
    analyze(
        &h.device,
        2,
        &Urb {
            status: 0,
            body: UrbBody::Other { function: 0x0FFE },
        },
        Phase::Submit,
    );
    assert_eq!(h.device.summary().pending_urbs, 1);
    assert!(h.records().is_empty());

    // The device joins the filter before the completion arrives: the
    // deferred record must surface with its submit-time identity.
    filter.add(DEVICE_ADDRESS);
    h.clock.set(700);
    analyze(
        &h.device,
        2,
        &Urb {
            status: 0,
            body: UrbBody::Other { function: 0x0FFE },
        },
        Phase::Complete,
    );

    let records = h.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp_ns, 100);
    assert_eq!(h.device.summary().pending_urbs, 0);
}

#[test]
fn toggling_the_filter_only_toggles_emission() {
    let filter = Arc::new(AddressListFilter::new());
    filter.add(DEVICE_ADDRESS);
    let h = harness_with_filter(filter.clone());

    analyze(&h.device, 1, &select_configuration(), Phase::Complete);
    assert_eq!(h.records().len(), 2);
    h.sink.clear();

    let transfer = Urb {
        status: 0,
        body: UrbBody::BulkOrInterruptTransfer {
            pipe: PipeHandle(PIPE),
            flags: TransferFlags::DIRECTION_IN,
            data: TransferData::from_bytes(vec![7; 8]),
        },
    };

    filter.remove(DEVICE_ADDRESS);
    analyze(&h.device, 2, &transfer, Phase::Complete);
    assert!(h.records().is_empty());

    filter.add(DEVICE_ADDRESS);
    analyze(&h.device, 3, &transfer, Phase::Complete);
    let records = h.records();
    assert_eq!(records.len(), 1);
    // Resolution still works because the earlier filtered-out completion
    // kept the endpoint table current.
    assert_eq!(records[0].record.header.endpoint, 0x81);
    assert_eq!(records[0].payload, vec![7; 8]);
}
