//! Typed events flowing from the transport managers to the slot arbitrator.
//!
//! The original observer-chain fan-out is replaced by one crossbeam channel
//! carrying these messages, which makes delivery ordering explicit and keeps
//! session code free of arbitrator callbacks.

use std::sync::Arc;

use crate::ports::PadDevice;

/// Normalized report buffer as carried on the event channel.
pub type ReportFrame = [u8; 64];

/// One message from a session or engine to the arbitrator.
pub enum PadEvent {
    /// A session finished its minimal initialization and wants a slot.
    Arrival(Arc<dyn PadDevice>),

    /// A decoded (or final state-bearing) normalized report.
    Report(ReportFrame),

    /// The session's underlying link is gone; free its slot.
    Removal(Arc<dyn PadDevice>),
}

impl std::fmt::Debug for PadEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PadEvent::Arrival(dev) => write!(f, "Arrival({})", dev.local_address()),
            PadEvent::Report(frame) => {
                write!(f, "Report(slot={}, state={})", frame[0], frame[1])
            }
            PadEvent::Removal(dev) => write!(f, "Removal({})", dev.local_address()),
        }
    }
}

/// Channel pair used to wire managers to the arbitrator.
pub fn channel() -> (
    crossbeam_channel::Sender<PadEvent>,
    crossbeam_channel::Receiver<PadEvent>,
) {
    crossbeam_channel::unbounded()
}
