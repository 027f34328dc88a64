//! Observed-request model.
//!
//! An observed request ([`Urb`]) is one wire-level USB operation seen
//! between the function driver and the bus driver, tagged with the
//! submission/completion [`Phase`] by the caller. [`UrbBody`] is a closed
//! enumeration; the classifier matches it exhaustively, so adding an
//! operation kind forces every dispatch site to handle it.

use bitflags::bitflags;

// Operation kind codes carried in capture records.
pub const URB_FUNCTION_SELECT_CONFIGURATION: u16 = 0x0000;
pub const URB_FUNCTION_SELECT_INTERFACE: u16 = 0x0001;
pub const URB_FUNCTION_ABORT_PIPE: u16 = 0x0002;
pub const URB_FUNCTION_GET_CURRENT_FRAME_NUMBER: u16 = 0x0007;
pub const URB_FUNCTION_CONTROL_TRANSFER: u16 = 0x0008;
pub const URB_FUNCTION_BULK_OR_INTERRUPT_TRANSFER: u16 = 0x0009;
pub const URB_FUNCTION_ISOCH_TRANSFER: u16 = 0x000A;
pub const URB_FUNCTION_GET_DESCRIPTOR_FROM_DEVICE: u16 = 0x000B;
pub const URB_FUNCTION_SET_DESCRIPTOR_TO_DEVICE: u16 = 0x000C;
pub const URB_FUNCTION_GET_STATUS_FROM_DEVICE: u16 = 0x0013;
pub const URB_FUNCTION_GET_STATUS_FROM_INTERFACE: u16 = 0x0014;
pub const URB_FUNCTION_GET_STATUS_FROM_ENDPOINT: u16 = 0x0015;
pub const URB_FUNCTION_VENDOR_DEVICE: u16 = 0x0017;
pub const URB_FUNCTION_VENDOR_INTERFACE: u16 = 0x0018;
pub const URB_FUNCTION_VENDOR_ENDPOINT: u16 = 0x0019;
pub const URB_FUNCTION_CLASS_DEVICE: u16 = 0x001A;
pub const URB_FUNCTION_CLASS_INTERFACE: u16 = 0x001B;
pub const URB_FUNCTION_CLASS_ENDPOINT: u16 = 0x001C;
pub const URB_FUNCTION_SYNC_RESET_PIPE_AND_CLEAR_STALL: u16 = 0x001E;
pub const URB_FUNCTION_CLASS_OTHER: u16 = 0x001F;
pub const URB_FUNCTION_VENDOR_OTHER: u16 = 0x0020;
pub const URB_FUNCTION_GET_STATUS_FROM_OTHER: u16 = 0x0021;
pub const URB_FUNCTION_GET_DESCRIPTOR_FROM_ENDPOINT: u16 = 0x0024;
pub const URB_FUNCTION_SET_DESCRIPTOR_TO_ENDPOINT: u16 = 0x0025;
pub const URB_FUNCTION_GET_DESCRIPTOR_FROM_INTERFACE: u16 = 0x0028;
pub const URB_FUNCTION_SET_DESCRIPTOR_TO_INTERFACE: u16 = 0x0029;
pub const URB_FUNCTION_SYNC_RESET_PIPE: u16 = 0x0030;
pub const URB_FUNCTION_SYNC_CLEAR_STALL: u16 = 0x0031;
pub const URB_FUNCTION_CONTROL_TRANSFER_EX: u16 = 0x0032;
pub const URB_FUNCTION_CLOSE_STATIC_STREAMS: u16 = 0x0036;

/// Which side of the round trip the request was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Heading toward the bus driver.
    Submit,
    /// Returning from the bus driver.
    Complete,
}

bitflags! {
    /// Transfer flags as carried by control/bulk/isochronous requests.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct TransferFlags: u32 {
        /// Data flows device-to-host.
        const DIRECTION_IN = 0x0000_0001;
        const SHORT_TRANSFER_OK = 0x0000_0002;
        /// Transfer addresses the default control pipe regardless of the
        /// pipe identity field.
        const DEFAULT_PIPE = 0x0000_0008;
    }
}

impl TransferFlags {
    pub fn is_in(self) -> bool {
        self.contains(TransferFlags::DIRECTION_IN)
    }
}

/// Opaque identity of a logical endpoint channel, stable for the life of a
/// configuration/interface selection. Reused by the bus stack across
/// configuration changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeHandle(pub u64);

/// Transfer buffer as observed: a declared length plus the bytes actually
/// visible at the capture point.
///
/// `bytes: None` models a buffer the capture point cannot map into its own
/// address space; emission degrades to header-only. Capturable bytes are
/// always clamped to the declared length.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferData {
    pub declared_length: u32,
    pub bytes: Option<Vec<u8>>,
}

impl TransferData {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Buffer whose declared length matches the provided bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            declared_length: bytes.len() as u32,
            bytes: Some(bytes),
        }
    }

    pub fn with_declared(declared_length: u32, bytes: Option<Vec<u8>>) -> Self {
        Self {
            declared_length,
            bytes,
        }
    }

    /// The bytes a record may carry: `min(declared, provided)`, or `None`
    /// when there is nothing to capture.
    pub(crate) fn capture_bytes(&self) -> Option<&[u8]> {
        if self.declared_length == 0 {
            return None;
        }
        let bytes = self.bytes.as_deref()?;
        let len = (self.declared_length as usize).min(bytes.len());
        if len == 0 {
            return None;
        }
        Some(&bytes[..len])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorOp {
    Get,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorRecipient {
    Device,
    Interface,
    Endpoint,
}

/// Recipient of a status, vendor or class request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRecipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

impl RequestRecipient {
    /// Low nibble of bmRequestType (USB 2.0 §9.3).
    pub(crate) const fn bits(self) -> u8 {
        match self {
            RequestRecipient::Device => 0,
            RequestRecipient::Interface => 1,
            RequestRecipient::Endpoint => 2,
            RequestRecipient::Other => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Vendor,
    Class,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeOp {
    ResetPipe,
    ResetPipeAndClearStall,
    ClearStall,
    AbortPipe,
    CloseStaticStreams,
}

/// A control transfer as natively carried by the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTransfer {
    /// `None` addresses the default control pipe.
    pub pipe: Option<PipeHandle>,
    pub flags: TransferFlags,
    pub data: TransferData,
    /// The 8 SETUP bytes exactly as they go on the wire.
    pub setup: [u8; 8],
}

/// One sub-packet of an isochronous transfer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoPacket {
    pub offset: u32,
    pub length: u32,
    pub status: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrbBody {
    /// Configuration selection. `descriptor` is the standard USB
    /// configuration descriptor blob chosen by the function driver;
    /// `interfaces` is the interface-information region filled in by the
    /// bus driver on completion (see [`crate::endpoints`] for the layout).
    SelectConfiguration {
        descriptor: Option<Vec<u8>>,
        interfaces: Vec<u8>,
    },
    SelectInterface {
        interfaces: Vec<u8>,
    },
    ControlTransfer(ControlTransfer),
    /// Extended control transfer; the setup packet field is carried
    /// verbatim without reinterpretation.
    ControlTransferEx(ControlTransfer),
    DescriptorRequest {
        op: DescriptorOp,
        recipient: DescriptorRecipient,
        index: u8,
        descriptor_type: u8,
        language_id: u16,
        data: TransferData,
    },
    GetStatus {
        recipient: RequestRecipient,
        index: u16,
        data: TransferData,
    },
    VendorOrClass {
        kind: RequestKind,
        recipient: RequestRecipient,
        flags: TransferFlags,
        request: u8,
        value: u16,
        index: u16,
        data: TransferData,
    },
    BulkOrInterruptTransfer {
        pipe: PipeHandle,
        flags: TransferFlags,
        data: TransferData,
    },
    IsochTransfer {
        pipe: PipeHandle,
        flags: TransferFlags,
        data: TransferData,
        start_frame: u64,
        error_count: u64,
        packets: Vec<IsoPacket>,
    },
    PipeRequest {
        op: PipeOp,
        pipe: PipeHandle,
    },
    /// Frame-number query. The field is only meaningful on completion;
    /// a submission always observes `None`.
    GetCurrentFrameNumber {
        frame_number: Option<u32>,
    },
    /// Any operation kind outside the closed set, carried by code.
    Other {
        function: u16,
    },
}

impl UrbBody {
    /// The operation kind code emitted in capture records.
    pub fn function(&self) -> u16 {
        match self {
            UrbBody::SelectConfiguration { .. } => URB_FUNCTION_SELECT_CONFIGURATION,
            UrbBody::SelectInterface { .. } => URB_FUNCTION_SELECT_INTERFACE,
            UrbBody::ControlTransfer(_) => URB_FUNCTION_CONTROL_TRANSFER,
            UrbBody::ControlTransferEx(_) => URB_FUNCTION_CONTROL_TRANSFER_EX,
            UrbBody::DescriptorRequest { op, recipient, .. } => match (op, recipient) {
                (DescriptorOp::Get, DescriptorRecipient::Device) => {
                    URB_FUNCTION_GET_DESCRIPTOR_FROM_DEVICE
                }
                (DescriptorOp::Get, DescriptorRecipient::Interface) => {
                    URB_FUNCTION_GET_DESCRIPTOR_FROM_INTERFACE
                }
                (DescriptorOp::Get, DescriptorRecipient::Endpoint) => {
                    URB_FUNCTION_GET_DESCRIPTOR_FROM_ENDPOINT
                }
                (DescriptorOp::Set, DescriptorRecipient::Device) => {
                    URB_FUNCTION_SET_DESCRIPTOR_TO_DEVICE
                }
                (DescriptorOp::Set, DescriptorRecipient::Interface) => {
                    URB_FUNCTION_SET_DESCRIPTOR_TO_INTERFACE
                }
                (DescriptorOp::Set, DescriptorRecipient::Endpoint) => {
                    URB_FUNCTION_SET_DESCRIPTOR_TO_ENDPOINT
                }
            },
            UrbBody::GetStatus { recipient, .. } => match recipient {
                RequestRecipient::Device => URB_FUNCTION_GET_STATUS_FROM_DEVICE,
                RequestRecipient::Interface => URB_FUNCTION_GET_STATUS_FROM_INTERFACE,
                RequestRecipient::Endpoint => URB_FUNCTION_GET_STATUS_FROM_ENDPOINT,
                RequestRecipient::Other => URB_FUNCTION_GET_STATUS_FROM_OTHER,
            },
            UrbBody::VendorOrClass {
                kind, recipient, ..
            } => match (kind, recipient) {
                (RequestKind::Vendor, RequestRecipient::Device) => URB_FUNCTION_VENDOR_DEVICE,
                (RequestKind::Vendor, RequestRecipient::Interface) => URB_FUNCTION_VENDOR_INTERFACE,
                (RequestKind::Vendor, RequestRecipient::Endpoint) => URB_FUNCTION_VENDOR_ENDPOINT,
                (RequestKind::Vendor, RequestRecipient::Other) => URB_FUNCTION_VENDOR_OTHER,
                (RequestKind::Class, RequestRecipient::Device) => URB_FUNCTION_CLASS_DEVICE,
                (RequestKind::Class, RequestRecipient::Interface) => URB_FUNCTION_CLASS_INTERFACE,
                (RequestKind::Class, RequestRecipient::Endpoint) => URB_FUNCTION_CLASS_ENDPOINT,
                (RequestKind::Class, RequestRecipient::Other) => URB_FUNCTION_CLASS_OTHER,
            },
            UrbBody::BulkOrInterruptTransfer { .. } => URB_FUNCTION_BULK_OR_INTERRUPT_TRANSFER,
            UrbBody::IsochTransfer { .. } => URB_FUNCTION_ISOCH_TRANSFER,
            UrbBody::PipeRequest { op, .. } => match op {
                PipeOp::ResetPipe => URB_FUNCTION_SYNC_RESET_PIPE,
                PipeOp::ResetPipeAndClearStall => URB_FUNCTION_SYNC_RESET_PIPE_AND_CLEAR_STALL,
                PipeOp::ClearStall => URB_FUNCTION_SYNC_CLEAR_STALL,
                PipeOp::AbortPipe => URB_FUNCTION_ABORT_PIPE,
                PipeOp::CloseStaticStreams => URB_FUNCTION_CLOSE_STATIC_STREAMS,
            },
            UrbBody::GetCurrentFrameNumber { .. } => URB_FUNCTION_GET_CURRENT_FRAME_NUMBER,
            UrbBody::Other { function } => *function,
        }
    }
}

/// One observed request: bus-driver status plus the kind-specific body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urb {
    pub status: u32,
    pub body: UrbBody,
}
