//! Request classifier.
//!
//! One call per observation: the classifier dispatches on the operation
//! kind and phase, consults/updates the endpoint and pending tables, and
//! terminates by emitting zero, one or two records to the sink. The order
//! of the steps matters and mirrors the contract:
//!
//! 1. learning side effects (endpoint table, descriptor cache, pending
//!    insert) — these run for every device, filtered or not;
//! 2. unconditional pending-entry removal on completion;
//! 3. the per-device filter gate;
//! 4. deferred-unknown emission;
//! 5. the per-kind dispatch.

use urbtrace_capture::{CaptureRecord, PacketHeader, RecordInfo, TransferKind};

use crate::control::{
    descriptor_request_setup, emit_control_transfer, find_interface_descriptor, get_status_setup,
    set_configuration_setup, set_interface_setup, vendor_class_setup, ControlView,
};
use crate::endpoints::{first_interface_selection, PipeKind};
use crate::isoch::analyze_isoch_transfer;
use crate::pending::PendingUrbInfo;
use crate::urb::{DescriptorOp, Phase, TransferData, TransferFlags, Urb, UrbBody};
use crate::DeviceContext;

pub(crate) fn record_info(phase: Phase) -> RecordInfo {
    match phase {
        Phase::Submit => RecordInfo::empty(),
        Phase::Complete => RecordInfo::FROM_COMPLETION,
    }
}

/// Classifies one observed request and emits its capture records.
///
/// Infallible by contract: malformed input and resource pressure degrade to
/// fewer (or header-only) records, never to an error the caller must route
/// around the I/O path.
pub fn analyze(device: &DeviceContext, irp_id: u64, urb: &Urb, phase: Phase) {
    // Learning side effects run regardless of the capture filter, so that
    // toggling a device into the filter later starts from correct state.
    match (&urb.body, phase) {
        (
            UrbBody::SelectConfiguration {
                descriptor,
                interfaces,
            },
            Phase::Complete,
        ) => {
            // Interface/pipe fields are filled in by the bus driver, so they
            // are only meaningful on the way back.
            device.learn_endpoints(interfaces);
            device.cache_configuration(descriptor.as_deref());
        }
        (UrbBody::SelectInterface { interfaces }, Phase::Complete) => {
            device.learn_endpoints(interfaces);
        }
        (UrbBody::Other { function }, Phase::Submit) => {
            device.insert_pending(
                irp_id,
                PendingUrbInfo {
                    timestamp_ns: device.root().clock().now_ns(),
                    status: urb.status,
                    function: *function,
                    bus: device.root().bus_id(),
                    device: device.device_address(),
                },
            );
        }
        _ => {}
    }

    // A completion always claims its pending entry, whether or not the
    // completing kind is classified, so entries cannot outlive their
    // request.
    let pending = match phase {
        Phase::Complete => device.take_pending(irp_id),
        Phase::Submit => None,
    };

    if !device.root().filter().is_captured(device.device_address()) {
        return;
    }

    // Deferred record for an operation that was unclassified at submission.
    // It carries the submit-time metadata and timestamp so the capture
    // stream keeps causal order. The operation may have been reinterpreted
    // as a control transfer in flight, but its setup bytes are not
    // trustworthy by now on some stacks, so the original unknown identity
    // is logged rather than a fabricated control-transfer record.
    if let Some(info) = pending {
        let record = CaptureRecord::packet(PacketHeader {
            irp_id,
            status: info.status,
            function: info.function,
            info: RecordInfo::empty(),
            bus: info.bus,
            device: info.device,
            endpoint: 0,
            transfer: TransferKind::Unknown,
            data_length: 0,
        });
        device.root().emit_packet_at(info.timestamp_ns, &record, None);
    }

    match &urb.body {
        UrbBody::SelectConfiguration { descriptor, .. } => {
            if phase != Phase::Complete {
                return;
            }
            let configuration_value = descriptor
                .as_deref()
                .and_then(|d| d.get(5).copied())
                .unwrap_or(0);
            let data = TransferData::empty();
            let view = ControlView {
                pipe: None,
                flags: TransferFlags::empty(),
                data: &data,
                setup: set_configuration_setup(configuration_value),
            };
            let function = urb.body.function();
            emit_control_transfer(device, irp_id, urb.status, function, &view, Phase::Submit);
            emit_control_transfer(device, irp_id, urb.status, function, &view, Phase::Complete);
        }

        UrbBody::SelectInterface { interfaces } => {
            if phase != Phase::Complete {
                return;
            }
            let Some(config) = device.cached_configuration() else {
                tracing::debug!(
                    "no cached configuration descriptor; skipping interface-selection record"
                );
                return;
            };
            let Some((interface_number, alternate_setting)) =
                first_interface_selection(interfaces)
            else {
                tracing::debug!("interface selection carries no interface information");
                return;
            };
            let Some(descriptor) =
                find_interface_descriptor(&config, interface_number, alternate_setting)
            else {
                tracing::debug!(
                    "no interface descriptor for interface {interface_number} \
                     alternate {alternate_setting}"
                );
                return;
            };
            let data = TransferData::empty();
            let view = ControlView {
                pipe: None,
                flags: TransferFlags::empty(),
                data: &data,
                setup: set_interface_setup(
                    descriptor.alternate_setting,
                    descriptor.interface_number,
                ),
            };
            let function = urb.body.function();
            emit_control_transfer(device, irp_id, urb.status, function, &view, Phase::Submit);
            emit_control_transfer(device, irp_id, urb.status, function, &view, Phase::Complete);
        }

        UrbBody::ControlTransfer(transfer) | UrbBody::ControlTransferEx(transfer) => {
            let view = ControlView {
                pipe: transfer.pipe,
                flags: transfer.flags,
                data: &transfer.data,
                setup: transfer.setup,
            };
            emit_control_transfer(device, irp_id, urb.status, urb.body.function(), &view, phase);
        }

        UrbBody::DescriptorRequest {
            op,
            recipient,
            index,
            descriptor_type,
            language_id,
            data,
        } => {
            let flags = match op {
                DescriptorOp::Get => TransferFlags::DIRECTION_IN,
                DescriptorOp::Set => TransferFlags::empty(),
            };
            let view = ControlView {
                pipe: None,
                flags,
                data,
                setup: descriptor_request_setup(
                    *op,
                    *recipient,
                    *index,
                    *descriptor_type,
                    *language_id,
                    data.declared_length as u16,
                ),
            };
            emit_control_transfer(device, irp_id, urb.status, urb.body.function(), &view, phase);
        }

        UrbBody::GetStatus {
            recipient,
            index,
            data,
        } => {
            let view = ControlView {
                pipe: None,
                flags: TransferFlags::DIRECTION_IN,
                data,
                setup: get_status_setup(*recipient, *index, data.declared_length as u16),
            };
            emit_control_transfer(device, irp_id, urb.status, urb.body.function(), &view, phase);
        }

        UrbBody::VendorOrClass {
            kind,
            recipient,
            flags,
            request,
            value,
            index,
            data,
        } => {
            let view = ControlView {
                pipe: None,
                flags: *flags,
                data,
                setup: vendor_class_setup(
                    *kind,
                    *recipient,
                    flags.is_in(),
                    *request,
                    *value,
                    *index,
                    data.declared_length as u16,
                ),
            };
            emit_control_transfer(device, irp_id, urb.status, urb.body.function(), &view, phase);
        }

        UrbBody::BulkOrInterruptTransfer { pipe, data, .. } => {
            let (record_device, endpoint, transfer_kind) = match device.resolve_endpoint(*pipe) {
                Some(info) => {
                    let kind = match info.kind {
                        PipeKind::Interrupt => TransferKind::Interrupt,
                        PipeKind::Bulk => TransferKind::Bulk,
                        other => {
                            tracing::debug!(
                                "unexpected pipe kind {other:?} on bulk/interrupt transfer; \
                                 assuming bulk"
                            );
                            TransferKind::Bulk
                        }
                    };
                    (info.device_address, info.endpoint_address, kind)
                }
                None => (device.device_address(), 0xFF, TransferKind::Bulk),
            };

            // New data exists only on the writer side: device-to-host
            // endpoints produce it at completion, host-to-device endpoints
            // carry it at submission. The other side is header-only.
            let endpoint_in = endpoint & 0x80 != 0;
            let capture_side = (endpoint_in && phase == Phase::Complete)
                || (!endpoint_in && phase == Phase::Submit);
            let payload = if capture_side { data.capture_bytes() } else { None };

            let record = CaptureRecord::packet(PacketHeader {
                irp_id,
                status: urb.status,
                function: urb.body.function(),
                info: record_info(phase),
                bus: device.root().bus_id(),
                device: record_device,
                endpoint,
                transfer: transfer_kind,
                data_length: payload.map_or(0, |b| b.len() as u32),
            });
            device.root().emit_packet(&record, payload);
        }

        UrbBody::IsochTransfer {
            pipe,
            flags,
            data,
            start_frame,
            error_count,
            packets,
        } => {
            analyze_isoch_transfer(
                device,
                irp_id,
                urb.status,
                urb.body.function(),
                phase,
                *pipe,
                *flags,
                data,
                *start_frame,
                *error_count,
                packets,
            );
        }

        UrbBody::PipeRequest { pipe, .. } => {
            let (record_device, endpoint, transfer_kind) = match device.resolve_endpoint(*pipe) {
                Some(info) => (info.device_address, info.endpoint_address, TransferKind::IrpInfo),
                None => (device.device_address(), 0xFF, TransferKind::Unknown),
            };
            let record = CaptureRecord::packet(PacketHeader {
                irp_id,
                status: urb.status,
                function: urb.body.function(),
                info: record_info(phase),
                bus: device.root().bus_id(),
                device: record_device,
                endpoint,
                transfer: transfer_kind,
                data_length: 0,
            });
            device.root().emit_packet(&record, None);
        }

        UrbBody::GetCurrentFrameNumber { frame_number } => {
            let mut header = PacketHeader {
                irp_id,
                status: urb.status,
                function: urb.body.function(),
                info: record_info(phase),
                bus: device.root().bus_id(),
                device: device.device_address(),
                endpoint: 0x80,
                transfer: TransferKind::IrpInfo,
                data_length: 0,
            };
            match (phase, frame_number) {
                (Phase::Complete, Some(frame)) => {
                    let bytes = frame.to_le_bytes();
                    header.data_length = bytes.len() as u32;
                    device
                        .root()
                        .emit_packet(&CaptureRecord::packet(header), Some(&bytes));
                }
                _ => device.root().emit_packet(&CaptureRecord::packet(header), None),
            }
        }

        UrbBody::Other { function } => {
            // Submit-side bookkeeping already ran before the filter gate.
            // A current-time record is only for completions nobody saw
            // submitted; otherwise the deferred record above already covers
            // this request.
            if phase == Phase::Complete && pending.is_none() {
                let record = CaptureRecord::packet(PacketHeader {
                    irp_id,
                    status: urb.status,
                    function: *function,
                    info: RecordInfo::FROM_COMPLETION,
                    bus: device.root().bus_id(),
                    device: device.device_address(),
                    endpoint: 0,
                    transfer: TransferKind::Unknown,
                    data_length: 0,
                });
                device.root().emit_packet(&record, None);
            }
        }
    }
}
