//! Wired controller sessions and the four-slot USB manager.
//!
//! The USB transport skips link negotiation entirely: open reads the two
//! identity feature reports, start enables reporting and spawns a blocking
//! read loop on the interrupt pipe, and the same report decode and watchdog
//! logic as the Bluetooth session runs with USB offsets. The one structural
//! difference is the quick-disconnect path: instead of an HCI disconnect it
//! re-enumerates the device, so the controller comes back through a fresh
//! open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use openpad_hid_sixaxis_protocol::output;
use openpad_hid_sixaxis_protocol::report::{Transport, READ_BUF_LEN};
use openpad_hid_sixaxis_protocol::types::{
    format_address_msb, Battery, ConnectionKind, DeviceState, PadSlot,
};

use crate::events::PadEvent;
use crate::ports::{PadDevice, UsbTransport, UsbTransportProvider};
use crate::session::SessionCore;
use crate::settings::RuntimeSettings;

/// Watchdog cadence.
const TICK_PERIOD: Duration = Duration::from_millis(16);
/// How long the disconnect gesture must stay latched before shutdown.
const TRIGGER_HOLD: Duration = Duration::from_millis(2000);
/// LED refresh cadence on the wired transport.
const LED_PERIOD: Duration = Duration::from_millis(1500);

struct UsbShared {
    core: SessionCore,
    output: [u8; 48],
    /// Controller address (msb-first, as the feature report returns it).
    address: [u8; 6],
    /// Host the controller is paired to (msb-first).
    master: [u8; 6],
    /// Set when the quick-disconnect shutdown has restarted the device; the
    /// next rescan reopens this slot instead of re-announcing it.
    shutdown: bool,
}

/// One wired controller.
pub struct UsbSession {
    slot_hint: usize,
    transport: Arc<dyn UsbTransport>,
    events: Sender<PadEvent>,
    settings: RuntimeSettings,
    reader_active: AtomicBool,
    weak: Weak<UsbSession>,
    shared: Mutex<UsbShared>,
}

impl UsbSession {
    pub fn new(
        slot_hint: usize,
        transport: Arc<dyn UsbTransport>,
        events: Sender<PadEvent>,
        settings: RuntimeSettings,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new_cyclic(|weak| Self {
            slot_hint,
            transport,
            events,
            settings,
            reader_active: AtomicBool::new(false),
            weak: weak.clone(),
            shared: Mutex::new(UsbShared {
                core: SessionCore::new(now),
                output: output::USB_OUTPUT_TEMPLATE,
                address: [0u8; 6],
                master: [0u8; 6],
                shutdown: false,
            }),
        })
    }

    /// Read the controller's identity and reserve the session.
    pub fn open(&self) -> bool {
        let mut buf = [0u8; READ_BUF_LEN];
        let mut shared = self.shared.lock();
        shared.core.state = DeviceState::Reserved;

        match self
            .transport
            .control_read(output::usb_feature::PAIRING, &mut buf)
        {
            Ok(n) => {
                if let Some(host) = output::parse_paired_host(&buf[..n]) {
                    shared.master = host;
                }
            }
            Err(e) => warn!(slot = self.slot_hint, "paired-host read failed: {e}"),
        }
        match self
            .transport
            .control_read(output::usb_feature::ADDRESS, &mut buf)
        {
            Ok(n) => {
                if let Some(addr) = output::parse_device_address(&buf[..n]) {
                    shared.address = addr;
                }
            }
            Err(e) => warn!(slot = self.slot_hint, "device-address read failed: {e}"),
        }

        debug!(
            local = %format_address_msb(&shared.address),
            remote = %format_address_msb(&shared.master),
            "opened wired controller"
        );
        shared.core.state == DeviceState::Reserved
    }

    fn send_output(&self, shared: &UsbShared) -> bool {
        self.transport
            .control_write(output::usb_feature::OUTPUT, &shared.output)
            .is_ok()
    }

    fn publish(&self, shared: &mut UsbShared) {
        let frame = shared.core.publish_frame();
        let _ = self.events.send(PadEvent::Report(frame));
    }

    fn parse(&self, buf: &mut [u8; READ_BUF_LEN], now: Instant) {
        let mut shared = self.shared.lock();
        let Some(ingested) = shared.core.ingest(Transport::Usb, buf, now) else {
            return;
        };
        if ingested.first {
            self.write_rumble(&mut shared, 0, 0);
        }
        self.publish(&mut shared);
    }

    /// Merge rumble into the pending report and write it out immediately —
    /// the wired transport has no flow-control window to wait for.
    fn write_rumble(&self, shared: &mut UsbShared, left: u8, right: u8) -> bool {
        shared.output[output::usb_offset::RUMBLE_RIGHT] = if right > 0 { 0x01 } else { 0x00 };
        shared.output[output::usb_offset::RUMBLE_LEFT] = left;
        shared.output[output::usb_offset::LED] = if self.settings.disable_led() {
            0
        } else {
            led_mask(shared.core.pad)
        };
        self.send_output(shared)
    }

    /// Watchdog tick; `now` injected for tests.
    pub fn tick(&self, now: Instant) {
        let mut shared = self.shared.lock();

        if shared.core.is_disconnect
            && now.duration_since(shared.core.disconnect_since) >= TRIGGER_HOLD
        {
            info!(slot = self.slot_hint, "quick disconnect triggered");
            shared.core.is_disconnect = false;
            drop(shared);
            self.shutdown();
            return;
        }

        if now.duration_since(shared.core.led_tick) >= LED_PERIOD && shared.core.packet > 0 {
            shared.core.led_tick = now;
            let mask = led_mask(shared.core.pad);
            if Battery::from_raw(shared.core.battery) == Battery::Charging {
                shared.output[output::usb_offset::LED] ^= mask;
            } else {
                shared.output[output::usb_offset::LED] |= mask;
            }
            if self.settings.disable_led() {
                shared.output[output::usb_offset::LED] = 0;
            }
            self.send_output(&shared);
        }
    }

    /// Quick-disconnect shutdown: stop and re-enumerate the device.
    fn shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.stop();
        if let Err(e) = self.transport.restart() {
            warn!(slot = self.slot_hint, "device restart failed: {e}");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Raw plug status byte from the last decoded report.
    pub fn plug_status(&self) -> u8 {
        self.shared.lock().core.plug
    }

    pub fn clear_shutdown(&self) {
        self.shared.lock().shutdown = false;
    }

    fn read_loop(self: Arc<Self>) {
        debug!(slot = self.slot_hint, "USB read worker starting");
        let mut buf = [0u8; READ_BUF_LEN];

        while self.reader_active.load(Ordering::SeqCst) && self.transport.is_active() {
            match self.transport.read_interrupt(&mut buf) {
                Ok(n) if n > 0 => self.parse(&mut buf, Instant::now()),
                Ok(_) => {}
                Err(e) => {
                    if !self.reader_active.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!(slot = self.slot_hint, "interrupt read failed: {e}");
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
        debug!(slot = self.slot_hint, "USB read worker exiting");
    }
}

fn led_mask(pad: PadSlot) -> u8 {
    if pad.is_none() {
        0
    } else {
        output::LED_MASKS[pad.index()]
    }
}

impl PadDevice for UsbSession {
    fn pad_id(&self) -> PadSlot {
        self.shared.lock().core.pad
    }

    fn set_pad_id(&self, slot: PadSlot) {
        let mut shared = self.shared.lock();
        shared.core.pad = slot;
        shared.output[output::usb_offset::LED] = led_mask(slot);
    }

    fn state(&self) -> DeviceState {
        self.shared.lock().core.state
    }

    fn connection(&self) -> ConnectionKind {
        ConnectionKind::Usb
    }

    fn battery(&self) -> Battery {
        Battery::from_raw(self.shared.lock().core.battery)
    }

    fn local_address(&self) -> String {
        format_address_msb(&self.shared.lock().address)
    }

    fn remote_address(&self) -> String {
        format_address_msb(&self.shared.lock().master)
    }

    /// Enable reporting and spawn the interrupt read loop.
    fn start(&self) -> bool {
        if self.shared.lock().core.state == DeviceState::Connected {
            return true;
        }
        if self
            .transport
            .control_write(output::usb_feature::ENABLE, &output::USB_ENABLE)
            .is_err()
        {
            warn!(slot = self.slot_hint, "feature enable failed");
            return false;
        }
        {
            let mut shared = self.shared.lock();
            shared.core.state = DeviceState::Connected;
            shared.core.packet = 0;
        }
        if !self.reader_active.swap(true, Ordering::SeqCst) {
            if let Some(session) = self.weak.upgrade() {
                thread::Builder::new()
                    .name(format!("openpad-usb-{}", self.slot_hint))
                    .spawn(move || session.read_loop())
                    .map(|_| ())
                    .unwrap_or_else(|e| warn!("failed to spawn USB reader: {e}"));
            }
        }
        info!(slot = self.slot_hint, "wired controller started");
        true
    }

    fn stop(&self) -> bool {
        self.reader_active.store(false, Ordering::SeqCst);
        let mut shared = self.shared.lock();
        if shared.core.state == DeviceState::Connected {
            shared.core.state = DeviceState::Reserved;
            shared.core.packet = 0;
            self.publish(&mut shared);
        }
        shared.core.state == DeviceState::Reserved
    }

    fn close(&self) -> bool {
        self.reader_active.store(false, Ordering::SeqCst);
        {
            let mut shared = self.shared.lock();
            if shared.core.state == DeviceState::Connected {
                shared.core.packet = 0;
                shared.core.state = DeviceState::Disconnected;
                self.publish(&mut shared);
            }
            shared.core.state = DeviceState::Disconnected;
        }
        self.transport.close();
        true
    }

    fn rumble(&self, left: u8, right: u8) -> bool {
        let mut shared = self.shared.lock();
        self.write_rumble(&mut shared, left, right)
    }

    /// Pair the controller to a new Bluetooth host so it reconnects there
    /// when unplugged.
    fn pair(&self, host: &[u8; 6]) -> bool {
        let payload = output::pairing_payload(host);
        match self
            .transport
            .control_write(output::usb_feature::PAIRING, &payload)
        {
            Ok(_) => {
                let mut shared = self.shared.lock();
                shared.master = *host;
                info!(
                    local = %format_address_msb(&shared.address),
                    host = %format_address_msb(host),
                    "paired wired controller to host"
                );
                true
            }
            Err(e) => {
                warn!(slot = self.slot_hint, "pairing transfer failed: {e}");
                false
            }
        }
    }

    fn disconnect(&self) -> bool {
        // No link to drop on the wired transport.
        true
    }

    fn describe(&self) -> String {
        let shared = self.shared.lock();
        let pad = shared.core.pad;
        match shared.core.state {
            DeviceState::Disconnected => format!("{pad} : Disconnected"),
            DeviceState::Reserved => {
                format!("{pad} : {} - Reserved", format_address_msb(&shared.address))
            }
            DeviceState::Connected => format!(
                "{pad} : {} - {} {:08X} {}",
                format_address_msb(&shared.address),
                ConnectionKind::Usb,
                shared.core.packet,
                Battery::from_raw(shared.core.battery),
            ),
        }
    }
}

/// Owns the four fixed USB device slots.
pub struct UsbSessionManager {
    provider: Arc<dyn UsbTransportProvider>,
    events: Sender<PadEvent>,
    settings: RuntimeSettings,
    started: AtomicBool,
    ticker: AtomicBool,
    devices: Mutex<[Option<Arc<UsbSession>>; 4]>,
}

impl UsbSessionManager {
    pub fn new(
        provider: Arc<dyn UsbTransportProvider>,
        events: Sender<PadEvent>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            provider,
            events,
            settings,
            started: AtomicBool::new(false),
            ticker: AtomicBool::new(false),
            devices: Mutex::new([None, None, None, None]),
        }
    }

    /// Enumerate present controllers and announce each as an arrival.
    pub fn open(&self) -> bool {
        for index in 0..PadSlot::COUNT {
            self.open_slot(index);
        }
        true
    }

    fn open_slot(&self, index: usize) {
        if self.devices.lock()[index].is_some() {
            return;
        }
        let Some(transport) = self.provider.open(index) else {
            return;
        };
        let session = UsbSession::new(
            index,
            transport,
            self.events.clone(),
            self.settings.clone(),
        );
        if !session.open() {
            session.close();
            return;
        }
        self.devices.lock()[index] = Some(Arc::clone(&session));
        let device: Arc<dyn PadDevice> = session;
        let _ = self.events.send(PadEvent::Arrival(device));
    }

    /// Start reserved sessions and the watchdog scheduler.
    pub fn start(self: &Arc<Self>) -> bool {
        self.started.store(true, Ordering::SeqCst);
        let devices = self.devices.lock().clone();
        for session in devices.into_iter().flatten() {
            if session.state() == DeviceState::Reserved {
                session.start();
            }
        }
        if !self.ticker.swap(true, Ordering::SeqCst) {
            let manager = Arc::clone(self);
            thread::Builder::new()
                .name("openpad-usb-tick".into())
                .spawn(move || manager.tick_loop())
                .map(|_| ())
                .unwrap_or_else(|e| warn!("failed to spawn USB tick worker: {e}"));
        }
        true
    }

    pub fn stop(&self) -> bool {
        self.started.store(false, Ordering::SeqCst);
        self.ticker.store(false, Ordering::SeqCst);
        let devices = self.devices.lock().clone();
        for session in devices.into_iter().flatten() {
            if session.state() == DeviceState::Connected {
                session.stop();
            }
        }
        true
    }

    pub fn close(&self) -> bool {
        self.stop();
        let devices = std::mem::take(&mut *self.devices.lock());
        for session in devices.into_iter().flatten() {
            session.close();
        }
        true
    }

    /// Re-enumerate: reopen empty slots and rebind any session whose
    /// quick-disconnect shutdown restarted the device.
    pub fn rescan(&self) {
        for index in 0..PadSlot::COUNT {
            let existing = self.devices.lock()[index].clone();
            if let Some(session) = existing {
                if session.is_shutdown() {
                    session.clear_shutdown();
                    session.close();
                    self.devices.lock()[index] = None;
                } else {
                    continue;
                }
            }
            self.open_slot(index);
            if self.started.load(Ordering::SeqCst) {
                if let Some(session) = self.devices.lock()[index].clone() {
                    session.start();
                }
            }
        }
    }

    /// Notify that the device in fixed slot `index` is gone.
    pub fn notify_removal(&self, index: usize) {
        let removed = self.devices.lock()[index].take();
        if let Some(session) = removed {
            info!(slot = index, "wired controller removed");
            session.stop();
            let device: Arc<dyn PadDevice> = session.clone();
            let _ = self.events.send(PadEvent::Removal(device));
            session.close();
        }
    }

    /// Pair every wired controller to `host` (the dongle's address) so they
    /// reconnect over Bluetooth when unplugged.
    pub fn pair_all(&self, host: &[u8; 6]) {
        let devices = self.devices.lock().clone();
        for session in devices.into_iter().flatten() {
            session.pair(host);
        }
    }

    fn tick_loop(self: Arc<Self>) {
        while self.ticker.load(Ordering::SeqCst) {
            let devices = self.devices.lock().clone();
            let now = Instant::now();
            for session in devices.into_iter().flatten() {
                session.tick(now);
            }
            thread::sleep(TICK_PERIOD);
        }
    }
}
