//! The four-slot pad table: binds arriving sessions to stable logical
//! slots, fans reports out to the virtual bus and the feed socket, and fans
//! rumble back in.
//!
//! Binding follows physical identity: the first time a controller arrives it
//! claims the first free slot and its address is remembered as that slot's
//! reservation, so the same controller returns to the same slot across
//! disconnects. When both transports race for one reservation, USB wins
//! while physically present and a duplicate Bluetooth link is refused.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use openpad_hid_sixaxis_protocol::types::{ConnectionKind, DeviceState, PadSlot};

use crate::events::{PadEvent, ReportFrame};
use crate::ports::{NullPad, PadDevice, VirtualBus};

/// Feedback report byte that marks a rumble payload from the bus.
const BUS_RUMBLE_TAG: u8 = 0x08;

struct Slots {
    pads: [Arc<dyn PadDevice>; 4],
    /// Remembered controller address per slot; survives disconnects.
    reserved: [Option<String>; 4],
    /// Last rumble forwarded from the bus, per slot.
    bus_rumble: [[u8; 2]; 4],
    /// Last rumble forwarded from the control plane, per slot.
    native_rumble: [[u8; 2]; 4],
}

/// Owns the four logical pad slots.
pub struct SlotArbitrator {
    bus: Arc<dyn VirtualBus>,
    slots: Mutex<Slots>,
    feed: Option<(UdpSocket, SocketAddr)>,
}

fn null_pad(index: u8) -> Arc<dyn PadDevice> {
    Arc::new(NullPad::new(PadSlot::new(index).unwrap_or(PadSlot::NONE)))
}

impl SlotArbitrator {
    /// `feed` is the loopback endpoint every normalized report is mirrored
    /// to; `None` disables the mirror.
    pub fn new(bus: Arc<dyn VirtualBus>, feed: Option<SocketAddr>) -> Self {
        let feed = feed.and_then(|addr| {
            match UdpSocket::bind(("127.0.0.1", 0)) {
                Ok(socket) => Some((socket, addr)),
                Err(e) => {
                    warn!("report feed socket unavailable: {e}");
                    None
                }
            }
        });
        Self {
            bus,
            slots: Mutex::new(Slots {
                pads: [null_pad(0), null_pad(1), null_pad(2), null_pad(3)],
                reserved: [None, None, None, None],
                bus_rumble: [[0; 2]; 4],
                native_rumble: [[0; 2]; 4],
            }),
            feed,
        }
    }

    /// Consume pad events until the channel's senders are gone.
    pub fn run(self: &Arc<Self>, events: Receiver<PadEvent>) {
        for event in events.iter() {
            match event {
                PadEvent::Arrival(device) => {
                    self.on_arrival(device);
                }
                PadEvent::Report(frame) => self.on_report(&frame),
                PadEvent::Removal(device) => self.on_removal(&device),
            }
        }
        debug!("pad event channel closed, arbitrator exiting");
    }

    /// Spawn the consumer loop on its own thread.
    pub fn spawn(self: &Arc<Self>, events: Receiver<PadEvent>) {
        let arbitrator = Arc::clone(self);
        thread::Builder::new()
            .name("openpad-arbitrator".into())
            .spawn(move || arbitrator.run(events))
            .map(|_| ())
            .unwrap_or_else(|e| warn!("failed to spawn arbitrator: {e}"));
    }

    /// Bind an arriving session to a slot. Returns the slot on success;
    /// rejected arrivals have their link torn down here.
    pub fn on_arrival(&self, device: Arc<dyn PadDevice>) -> Option<PadSlot> {
        let address = device.local_address();
        let kind = device.connection();

        enum Decision {
            Reject(&'static str),
            Bind(PadSlot, Option<Arc<dyn PadDevice>>),
            Full,
        }

        // Decide and update the table under the lock; all I/O (disconnects,
        // bus announcements, session start) happens after it is released.
        let decision = {
            let mut slots = self.slots.lock();

            let reserved_at = (0..PadSlot::COUNT)
                .find(|&i| slots.reserved[i].as_deref() == Some(address.as_str()));

            let choice: Result<(usize, Option<Arc<dyn PadDevice>>), Decision> = match reserved_at {
                Some(index) => {
                    let occupant = Arc::clone(&slots.pads[index]);
                    if occupant.state() != DeviceState::Connected {
                        Ok((index, None))
                    } else if occupant.connection() == ConnectionKind::Bluetooth
                        && kind == ConnectionKind::Bluetooth
                    {
                        Err(Decision::Reject("duplicate Bluetooth link"))
                    } else if occupant.connection() == ConnectionKind::Usb
                        && kind == ConnectionKind::Bluetooth
                    {
                        Err(Decision::Reject("USB session takes precedence"))
                    } else {
                        // USB replacing a live Bluetooth session: rebind and
                        // drop the old link afterwards.
                        Ok((index, Some(occupant)))
                    }
                }
                None => (0..PadSlot::COUNT)
                    .find(|&i| slots.pads[i].state() == DeviceState::Disconnected)
                    .map(|i| (i, None))
                    .ok_or(Decision::Full),
            };

            match choice {
                Ok((index, evicted)) => {
                    slots.reserved[index] = Some(address.clone());
                    slots.pads[index] = Arc::clone(&device);
                    match PadSlot::new(index as u8) {
                        Some(slot) => Decision::Bind(slot, evicted),
                        None => Decision::Full,
                    }
                }
                Err(decision) => decision,
            }
        };

        match decision {
            Decision::Bind(slot, evicted) => {
                if let Some(old) = evicted {
                    old.disconnect();
                }
                device.set_pad_id(slot);
                info!(%address, %slot, kind = %kind, "controller bound");
                self.bus.plugin(slot.unit());
                device.start();
                Some(slot)
            }
            Decision::Reject(reason) => {
                info!(%address, reason, "rejecting arrival");
                device.disconnect();
                None
            }
            Decision::Full => {
                // No room for a fifth controller.
                warn!(%address, "no free pad slot, tearing arrival down");
                device.disconnect();
                None
            }
        }
    }

    /// Free the slot a removed session occupied; its reservation stays so a
    /// reconnect lands on the same slot.
    pub fn on_removal(&self, device: &Arc<dyn PadDevice>) {
        let freed = {
            let mut slots = self.slots.lock();
            let found = (0..PadSlot::COUNT)
                .find(|&i| Arc::ptr_eq(&slots.pads[i], device));
            if let Some(index) = found {
                slots.pads[index] = null_pad(index as u8);
                slots.bus_rumble[index] = [0; 2];
                slots.native_rumble[index] = [0; 2];
            }
            found
        };
        if let Some(index) = freed {
            info!(slot = index, "pad slot freed");
            self.bus.unplug(index as u32 + 1);
        }
    }

    /// Forward one normalized report to the bus, route any rumble feedback
    /// back to the owning session and mirror the frame to the feed socket.
    pub fn on_report(&self, frame: &ReportFrame) {
        let mut bus_report = [0u8; 28];
        let serial = self.bus.parse(frame, &mut bus_report);
        let state = frame[1];

        if serial < PadSlot::COUNT {
            let mut rumble = [0u8; 8];
            if self.bus.report(&bus_report, &mut rumble)
                && state == DeviceState::Connected.as_byte()
                && rumble[1] == BUS_RUMBLE_TAG
            {
                let big = rumble[3];
                let small = if rumble[4] > 0 { 1 } else { 0 };
                let target = {
                    let mut slots = self.slots.lock();
                    if slots.bus_rumble[serial] != [big, small] {
                        slots.bus_rumble[serial] = [big, small];
                        Some(Arc::clone(&slots.pads[serial]))
                    } else {
                        None
                    }
                };
                if let Some(pad) = target {
                    pad.rumble(big, small);
                }
            }

            if state != DeviceState::Connected.as_byte() {
                let mut slots = self.slots.lock();
                slots.bus_rumble[serial] = [0; 2];
                slots.native_rumble[serial] = [0; 2];
            }
        }

        if let Some((socket, addr)) = &self.feed {
            if let Err(e) = socket.send_to(frame, addr) {
                debug!("report feed send failed: {e}");
            }
        }
    }

    /// Per-slot lifecycle state bytes for the control plane's status query.
    pub fn slot_states(&self) -> [u8; 4] {
        let slots = self.slots.lock();
        [
            slots.pads[0].state().as_byte(),
            slots.pads[1].state().as_byte(),
            slots.pads[2].state().as_byte(),
            slots.pads[3].state().as_byte(),
        ]
    }

    /// Status lines for the control plane's text dump.
    pub fn describe_pads(&self) -> [String; 4] {
        let slots = self.slots.lock();
        [
            slots.pads[0].describe(),
            slots.pads[1].describe(),
            slots.pads[2].describe(),
            slots.pads[3].describe(),
        ]
    }

    /// Rumble pushed from the control plane; deduplicated per slot so a
    /// chatty client does not flood the session's send queue.
    pub fn native_rumble(&self, slot: u8, left: u8, right: u8) -> bool {
        let index = slot as usize;
        if index >= PadSlot::COUNT {
            return false;
        }
        let target = {
            let mut slots = self.slots.lock();
            if slots.pads[index].state() != DeviceState::Connected {
                return false;
            }
            if slots.native_rumble[index] == [left, right] {
                return true;
            }
            slots.native_rumble[index] = [left, right];
            Arc::clone(&slots.pads[index])
        };
        target.rumble(left, right)
    }

    /// Snapshot of one slot's device for callers outside the event loop.
    pub fn pad(&self, index: usize) -> Option<Arc<dyn PadDevice>> {
        self.slots.lock().pads.get(index).cloned()
    }
}
