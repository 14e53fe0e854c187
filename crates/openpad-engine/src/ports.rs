//! Port traits for the external collaborators.
//!
//! The engine never talks to hardware or to the virtual bus driver directly;
//! it goes through these traits. Real implementations live in the service
//! crate (hidapi-backed USB) or are supplied by the embedder; the
//! integration tests script them.

use std::io;
use std::sync::Arc;

use openpad_hid_sixaxis_protocol::types::{Battery, ConnectionKind, DeviceState, PadSlot};

/// Raw pipes of one Bluetooth host radio.
///
/// All reads block until a frame arrives, the pipe errors, or [`close`]
/// unblocks them. The engine's worker loops tolerate any error by logging
/// and retrying, so implementations are free to fail transiently.
///
/// [`close`]: RadioTransport::close
pub trait RadioTransport: Send + Sync {
    /// Write one HCI command frame to the command pipe.
    fn send_command(&self, frame: &[u8]) -> io::Result<usize>;

    /// Blocking read of one HCI event from the interrupt pipe.
    fn read_event(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one ACL frame to the bulk-out pipe.
    fn write_acl(&self, frame: &[u8]) -> io::Result<usize>;

    /// Blocking read of one ACL frame from the bulk-in pipe.
    fn read_acl(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// False once the device is gone or closed; worker loops exit on it.
    fn is_active(&self) -> bool;

    /// Close the pipes, unblocking any pending reads.
    fn close(&self);
}

/// Control/interrupt transfers of one wired controller.
pub trait UsbTransport: Send + Sync {
    /// GET_REPORT-style control read; `value` selects report type and id.
    fn control_read(&self, value: u16, buf: &mut [u8]) -> io::Result<usize>;

    /// SET_REPORT-style control write.
    fn control_write(&self, value: u16, data: &[u8]) -> io::Result<usize>;

    /// Blocking read of one input report from the interrupt pipe.
    fn read_interrupt(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Re-enumerate the device (quick-disconnect shutdown path).
    fn restart(&self) -> io::Result<()>;

    fn is_active(&self) -> bool;

    fn close(&self);
}

/// Enumerates wired controllers into the four fixed USB slots.
pub trait UsbTransportProvider: Send + Sync {
    /// Open the transport for fixed slot `index`, if a device is present.
    fn open(&self, index: usize) -> Option<Arc<dyn UsbTransport>>;
}

/// The external virtual HID bus driver the normalized reports feed.
///
/// Treated as a black box: `parse` converts a normalized report into the
/// bus's own format and yields the owning slot, `report` submits it and
/// hands back any pending feedback (rumble/LED) for that slot.
pub trait VirtualBus: Send + Sync {
    fn plugin(&self, unit: u32) -> bool;

    fn unplug(&self, unit: u32) -> bool;

    /// Translate `input` into the bus report format; returns the slot index.
    fn parse(&self, input: &[u8; 64], output: &mut [u8; 28]) -> usize;

    /// Submit a bus report; on `true`, `rumble` holds feedback bytes.
    fn report(&self, output: &[u8; 28], rumble: &mut [u8; 8]) -> bool;
}

/// A bus that accepts everything and never asks for feedback. Used when no
/// bus driver is installed.
pub struct NullBus;

impl VirtualBus for NullBus {
    fn plugin(&self, _unit: u32) -> bool {
        true
    }

    fn unplug(&self, _unit: u32) -> bool {
        true
    }

    fn parse(&self, input: &[u8; 64], output: &mut [u8; 28]) -> usize {
        output[0] = input[0];
        input[0] as usize
    }

    fn report(&self, _output: &[u8; 28], _rumble: &mut [u8; 8]) -> bool {
        false
    }
}

/// One live or empty logical pad as the arbitrator sees it.
///
/// Implemented by both session types; the methods mirror the operations the
/// slot table and control plane need and nothing more.
pub trait PadDevice: Send + Sync {
    fn pad_id(&self) -> PadSlot;

    fn set_pad_id(&self, slot: PadSlot);

    fn state(&self) -> DeviceState;

    fn connection(&self) -> ConnectionKind;

    fn battery(&self) -> Battery;

    /// The controller's own address — the identity slots are reserved by.
    fn local_address(&self) -> String;

    /// The host/master address the controller is paired to.
    fn remote_address(&self) -> String;

    fn start(&self) -> bool;

    fn stop(&self) -> bool;

    fn close(&self) -> bool;

    fn rumble(&self, left: u8, right: u8) -> bool;

    /// Re-pair the controller to a new host address (wired sessions only).
    fn pair(&self, host: &[u8; 6]) -> bool;

    /// Tear the underlying link down.
    fn disconnect(&self) -> bool;

    /// Human-readable status line for the control plane's text dump.
    fn describe(&self) -> String;
}

/// Placeholder occupying an empty slot.
pub struct NullPad {
    slot: PadSlot,
}

impl NullPad {
    pub fn new(slot: PadSlot) -> Self {
        Self { slot }
    }
}

impl PadDevice for NullPad {
    fn pad_id(&self) -> PadSlot {
        self.slot
    }

    fn set_pad_id(&self, _slot: PadSlot) {}

    fn state(&self) -> DeviceState {
        DeviceState::Disconnected
    }

    fn connection(&self) -> ConnectionKind {
        ConnectionKind::None
    }

    fn battery(&self) -> Battery {
        Battery::None
    }

    fn local_address(&self) -> String {
        "00:00:00:00:00:00".into()
    }

    fn remote_address(&self) -> String {
        "00:00:00:00:00:00".into()
    }

    fn start(&self) -> bool {
        true
    }

    fn stop(&self) -> bool {
        true
    }

    fn close(&self) -> bool {
        true
    }

    fn rumble(&self, _left: u8, _right: u8) -> bool {
        true
    }

    fn pair(&self, _host: &[u8; 6]) -> bool {
        true
    }

    fn disconnect(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("{} : {}", self.slot, DeviceState::Disconnected)
    }
}
