//! Sixaxis host engine.
//!
//! This crate turns raw transport pipes into logical game pads:
//!
//! - [`bluetooth::HostControllerEngine`] drives one Bluetooth radio through
//!   HCI bring-up, accepts controller connections by remote name, and runs
//!   the L2CAP channel state machine for every connected handle.
//! - [`usb::UsbSessionManager`] owns up to four wired controllers, which
//!   skip link negotiation entirely.
//! - Both produce [`events::PadEvent`]s consumed by the
//!   [`arbitrator::SlotArbitrator`], which binds sessions to the four stable
//!   logical slots and bridges reports/rumble to the external virtual bus.
//!
//! Transports (the radio's bulk/interrupt pipes, USB control/interrupt
//! transfers) and the virtual bus are external collaborators behind the
//! traits in [`ports`].

pub mod arbitrator;
pub mod bluetooth;
pub mod channel;
pub mod events;
pub mod ports;
mod session;
pub mod settings;
pub mod usb;

pub use arbitrator::SlotArbitrator;
pub use bluetooth::HostControllerEngine;
pub use events::PadEvent;
pub use settings::RuntimeSettings;
pub use usb::UsbSessionManager;

use thiserror::Error;

/// Engine-level failures surfaced to callers; per-frame problems inside the
/// worker loops are logged and dropped instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("transport I/O failed: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol decode failed: {0}")]
    Protocol(#[from] openpad_hid_sixaxis_protocol::ProtocolError),

    #[error("all four controller sessions are in use")]
    Capacity,

    #[error("no session for handle {0:#06x}")]
    UnknownHandle(u16),

    #[error("device is not in the required state")]
    BadState,
}

pub type EngineResult<T> = Result<T, EngineError>;
