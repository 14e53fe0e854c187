//! State shared by the Bluetooth and USB controller sessions.
//!
//! Both transports decode the same report, run the same lifecycle and
//! publish the same normalized frames; this module holds that common core.
//! Everything in [`SessionCore`] is guarded by the owning session's single
//! mutex — the pipe read loop and the watchdog tick both go through it.

use std::time::Instant;

use openpad_hid_sixaxis_protocol::report::{self, Transport, READ_BUF_LEN};
use openpad_hid_sixaxis_protocol::types::{DeviceState, PadSlot};

use crate::events::ReportFrame;

/// Mutable per-controller record common to both transports.
#[derive(Debug)]
pub(crate) struct SessionCore {
    pub state: DeviceState,
    pub pad: PadSlot,
    /// Monotonic per-session report counter, reset at (re)connect.
    pub packet: u32,
    /// Normalized report buffer published downstream.
    pub report: ReportFrame,
    pub plug: u8,
    pub battery: u8,
    pub cable: u8,
    /// No activity seen since `idle_since`.
    pub is_idle: bool,
    pub idle_since: Instant,
    /// The disconnect gesture has been latched since `disconnect_since`.
    pub is_disconnect: bool,
    pub disconnect_since: Instant,
    /// Last LED cadence update.
    pub led_tick: Instant,
}

/// Outcome of feeding one raw frame into the core.
pub(crate) struct Ingested {
    /// This was the first counted report since the last (re)connect; the
    /// session must push a zero rumble command before anything else.
    pub first: bool,
}

impl SessionCore {
    pub fn new(now: Instant) -> Self {
        Self {
            state: DeviceState::Disconnected,
            pad: PadSlot::NONE,
            packet: 0,
            report: [0u8; READ_BUF_LEN],
            plug: 0,
            battery: 0,
            cable: 0,
            is_idle: true,
            idle_since: now,
            is_disconnect: false,
            disconnect_since: now,
            led_tick: now,
        }
    }

    /// Decode one raw frame and fold it into the normalized report.
    ///
    /// Returns `None` for not-ready frames, which must leave every field
    /// untouched. The activity and disconnect-gesture latches are updated
    /// against `now`.
    pub fn ingest(
        &mut self,
        transport: Transport,
        buf: &mut [u8; READ_BUF_LEN],
        now: Instant,
    ) -> Option<Ingested> {
        let status = report::decode_input(transport, buf)?;

        self.plug = status.plug;
        self.battery = status.battery;
        self.cable = status.cable;

        let first = self.packet == 0;
        self.packet = self.packet.wrapping_add(1);

        report::stamp_normalized_header(
            &mut self.report,
            self.pad.as_byte(),
            self.state.as_byte(),
            self.battery,
            self.cable,
            self.packet,
        );
        report::copy_core_body(transport, buf, &mut self.report);

        if status.active {
            self.is_idle = false;
        } else if !self.is_idle {
            self.is_idle = true;
            self.idle_since = now;
        }

        if status.trigger && !self.is_disconnect {
            self.is_disconnect = true;
            self.disconnect_since = now;
        } else if !status.trigger && self.is_disconnect {
            self.is_disconnect = false;
        }

        Some(Ingested { first })
    }

    /// Snapshot the normalized report with the current slot and lifecycle
    /// state stamped in, ready for the event channel.
    pub fn publish_frame(&mut self) -> ReportFrame {
        self.report[0] = self.pad.as_byte();
        self.report[1] = self.state.as_byte();
        self.report
    }
}
