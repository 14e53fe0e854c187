//! Sixaxis/DualShock 3 wire protocol: HCI, L2CAP and HID report codecs.
//!
//! The Sixaxis family (DualShock 3 and the Navigation Controller) does not
//! pair like a standard Bluetooth HID device. A host impersonating the
//! console must drive the radio over raw HCI, accept the controller's
//! inbound connection by remote name, bring up three L2CAP channels
//! (Command PSM `0x11`, Interrupt PSM `0x13`, and a short-lived Service
//! channel on PSM `0x01`), and echo a fixed seven-step SDP exchange before
//! the controller starts streaming input reports.
//!
//! # Report sizes
//! - Bluetooth input report: 58 bytes, `A1 01` marker at offsets 8–9.
//! - USB input report: 49 bytes, report id `0x01` at offset 0.
//! - Field offsets differ by a fixed +9 transport skew, semantics identical.
//!
//! This crate is intentionally I/O-free: pure encoders, decoders and layout
//! constants only. Transport and session state live in `openpad-engine`.

#![deny(static_mut_refs)]
#![deny(clippy::unwrap_used)]

pub mod control;
pub mod handle;
pub mod hci;
pub mod l2cap;
pub mod output;
pub mod report;
pub mod settings;
pub mod types;

pub use handle::ConnectionHandle;
pub use types::{Battery, ConnectionKind, DeviceState, PadSlot};

use thiserror::Error;

/// Errors produced by the wire decoders in this crate.
///
/// Truncated or malformed input is reported, never panicked on; callers in
/// the engine log and drop the offending frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame too short: got {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },
}

/// Result alias for protocol decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
