//! Control-transfer emission and SETUP packet synthesis.
//!
//! Several operation kinds are semantically control transfers without being
//! represented as one on the request; for those the classifier builds the
//! canonical 8-byte SETUP packet here and reuses the same emission path as
//! native control transfers.
//!
//! The payload asymmetry: a control transfer's meaningful data exists on
//! the writer side exactly once. Host-to-device bytes are captured with the
//! Setup stage (they exist before the device sees them); device-to-host
//! bytes are captured with the Complete stage (they do not exist earlier).

use urbtrace_capture::{CaptureRecord, ControlStage, PacketHeader, TransferKind};

use crate::classify::record_info;
use crate::urb::{
    DescriptorOp, DescriptorRecipient, Phase, PipeHandle, RequestKind, RequestRecipient,
    TransferData, TransferFlags,
};
use crate::DeviceContext;

const USB_REQUEST_GET_STATUS: u8 = 0x00;
const USB_REQUEST_GET_DESCRIPTOR: u8 = 0x06;
const USB_REQUEST_SET_DESCRIPTOR: u8 = 0x07;
const USB_REQUEST_SET_CONFIGURATION: u8 = 0x09;
const USB_REQUEST_SET_INTERFACE: u8 = 0x0B;

const USB_DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;

/// A control transfer as seen by the emission path: either carried verbatim
/// by the request or synthesized from a non-control operation.
pub(crate) struct ControlView<'a> {
    /// `None` addresses the default control pipe.
    pub pipe: Option<PipeHandle>,
    pub flags: TransferFlags,
    pub data: &'a TransferData,
    pub setup: [u8; 8],
}

/// Emits the record for one phase of a control transfer.
pub(crate) fn emit_control_transfer(
    device: &DeviceContext,
    irp_id: u64,
    status: u32,
    function: u16,
    view: &ControlView<'_>,
    phase: Phase,
) {
    let from_device = view.flags.is_in();

    let mut endpoint = 0u8;
    if !view.flags.contains(TransferFlags::DEFAULT_PIPE) {
        if let Some(pipe) = view.pipe {
            if let Some(info) = device.resolve_endpoint(pipe) {
                endpoint = info.endpoint_address;
            }
        }
    }
    if from_device {
        endpoint |= 0x80;
    }

    let mut header = PacketHeader {
        irp_id,
        status,
        function,
        info: record_info(phase),
        bus: device.root().bus_id(),
        device: device.device_address(),
        endpoint,
        transfer: TransferKind::Control,
        data_length: 0,
    };

    let data = view.data.capture_bytes();

    match phase {
        Phase::Submit => {
            let out_data = if from_device { None } else { data };
            header.data_length = 8 + out_data.map_or(0, |b| b.len() as u32);
            let record = CaptureRecord::control(header, ControlStage::Setup);
            match out_data {
                Some(bytes) => device.root().emit_payload(&record, &[&view.setup, bytes]),
                None => device.root().emit_payload(&record, &[&view.setup]),
            }
        }
        Phase::Complete => {
            let in_data = if from_device { data } else { None };
            header.data_length = in_data.map_or(0, |b| b.len() as u32);
            let record = CaptureRecord::control(header, ControlStage::Complete);
            match in_data {
                Some(bytes) => device.root().emit_payload(&record, &[bytes]),
                None => device.root().emit_payload(&record, &[]),
            }
        }
    }
}

// Synthesis tables. Byte 0 is bmRequestType (D7 direction, D6..D5 type,
// D4..D0 recipient), byte 1 the request code; value/index/length fields are
// little-endian per the USB spec.

pub(crate) fn set_configuration_setup(configuration_value: u8) -> [u8; 8] {
    [
        0x00, // host to device, standard, device
        USB_REQUEST_SET_CONFIGURATION,
        configuration_value,
        0,
        0,
        0,
        0,
        0,
    ]
}

pub(crate) fn set_interface_setup(alternate_setting: u8, interface_number: u8) -> [u8; 8] {
    [
        0x00, // host to device, standard, device
        USB_REQUEST_SET_INTERFACE,
        alternate_setting,
        0,
        interface_number,
        0,
        0,
        0,
    ]
}

pub(crate) fn descriptor_request_setup(
    op: DescriptorOp,
    recipient: DescriptorRecipient,
    index: u8,
    descriptor_type: u8,
    language_id: u16,
    length: u16,
) -> [u8; 8] {
    let direction = match op {
        DescriptorOp::Get => 0x80,
        DescriptorOp::Set => 0x00,
    };
    let recipient = match recipient {
        DescriptorRecipient::Device => 0,
        DescriptorRecipient::Interface => 1,
        DescriptorRecipient::Endpoint => 2,
    };
    let request = match op {
        DescriptorOp::Get => USB_REQUEST_GET_DESCRIPTOR,
        DescriptorOp::Set => USB_REQUEST_SET_DESCRIPTOR,
    };
    let [language_lo, language_hi] = language_id.to_le_bytes();
    let [length_lo, length_hi] = length.to_le_bytes();
    [
        direction | recipient,
        request,
        index,
        descriptor_type,
        language_lo,
        language_hi,
        length_lo,
        length_hi,
    ]
}

pub(crate) fn get_status_setup(recipient: RequestRecipient, index: u16, length: u16) -> [u8; 8] {
    let [index_lo, index_hi] = index.to_le_bytes();
    let [length_lo, length_hi] = length.to_le_bytes();
    [
        0x80 | recipient.bits(), // device to host, standard
        USB_REQUEST_GET_STATUS,
        0, // wValue is zero
        0,
        index_lo,
        index_hi,
        length_lo,
        length_hi,
    ]
}

pub(crate) fn vendor_class_setup(
    kind: RequestKind,
    recipient: RequestRecipient,
    direction_in: bool,
    request: u8,
    value: u16,
    index: u16,
    length: u16,
) -> [u8; 8] {
    let mut request_type = match kind {
        RequestKind::Vendor => 0x40,
        RequestKind::Class => 0x20,
    } | recipient.bits();
    if direction_in {
        request_type |= 0x80;
    }
    let [value_lo, value_hi] = value.to_le_bytes();
    let [index_lo, index_hi] = index.to_le_bytes();
    let [length_lo, length_hi] = length.to_le_bytes();
    [
        request_type,
        request,
        value_lo,
        value_hi,
        index_lo,
        index_hi,
        length_lo,
        length_hi,
    ]
}

/// Fields of a standard interface descriptor needed for SET_INTERFACE
/// synthesis.
pub(crate) struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
}

/// Finds the interface descriptor matching `interface_number` and
/// `alternate_setting` inside a cached configuration descriptor blob.
///
/// Standard descriptor walk: each record starts with bLength and
/// bDescriptorType; a zero or truncated bLength ends the walk.
pub(crate) fn find_interface_descriptor(
    config: &[u8],
    interface_number: u8,
    alternate_setting: u8,
) -> Option<InterfaceDescriptor> {
    let mut offset = 0usize;
    while offset + 2 <= config.len() {
        let length = config[offset] as usize;
        if length < 2 || offset + length > config.len() {
            return None;
        }
        let descriptor = &config[offset..offset + length];
        if descriptor[1] == USB_DESCRIPTOR_TYPE_INTERFACE
            && length >= 4
            && descriptor[2] == interface_number
            && descriptor[3] == alternate_setting
        {
            return Some(InterfaceDescriptor {
                interface_number: descriptor[2],
                alternate_setting: descriptor[3],
            });
        }
        offset += length;
    }
    None
}
