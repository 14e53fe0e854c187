//! Bluetooth host-controller engine and per-controller sessions.
//!
//! One [`HostControllerEngine`] owns one radio. Two worker threads service
//! it: the HCI loop (bring-up, connection accept/reject, flow control) and
//! the L2CAP loop (channel state machine, initialization exchange, input
//! reports). A third loop ticks every session's watchdog at ~16 ms.
//!
//! Nothing in either loop is allowed to kill it: decode failures and I/O
//! errors are logged and the frame dropped, so one misbehaving controller
//! cannot take down the radio or its siblings.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use openpad_hid_sixaxis_protocol::l2cap::{self, Psm, SignalPdu};
use openpad_hid_sixaxis_protocol::report::{self, Transport, READ_BUF_LEN};
use openpad_hid_sixaxis_protocol::types::{
    format_address, Battery, ConnectionKind, DeviceState, PadSlot,
};
use openpad_hid_sixaxis_protocol::{hci, output, ConnectionHandle};

use crate::channel::ChannelTable;
use crate::events::PadEvent;
use crate::ports::{PadDevice, RadioTransport};
use crate::session::SessionCore;
use crate::settings::RuntimeSettings;

/// Remote names the engine accepts; anything else is rejected at the HCI
/// layer before a session exists.
pub const SUPPORTED_NAMES: [&str; 2] = ["PLAYSTATION(R)3 Controller", "Navigation Controller"];

/// Maximum concurrent controller sessions per radio.
pub const MAX_SESSIONS: usize = 4;

/// Watchdog cadence.
const TICK_PERIOD: Duration = Duration::from_millis(16);
/// Settle delay after an accepted HCI Reset.
const RESET_SETTLE: Duration = Duration::from_millis(250);
/// How long the disconnect gesture must stay latched.
const TRIGGER_HOLD: Duration = Duration::from_millis(2000);
/// LED cadence while connected.
const LED_PERIOD: Duration = Duration::from_millis(500);
/// Minimum spacing between outbound output reports.
const SEND_SPACING: Duration = Duration::from_millis(125);

struct BtShared {
    core: SessionCore,
    channels: ChannelTable,
    output: [u8; 50],
    queued: u32,
    blocked: bool,
    last_send: Instant,
    init_step: u8,
    /// Controller address, LSB-first as HCI events carry it.
    address: [u8; 6],
    /// Host radio address the controller paired against.
    master: [u8; 6],
    name: String,
}

/// One connected controller on the Bluetooth transport.
pub struct BluetoothSession {
    handle: ConnectionHandle,
    transport: Arc<dyn RadioTransport>,
    events: Sender<PadEvent>,
    settings: RuntimeSettings,
    shared: Mutex<BtShared>,
}

impl BluetoothSession {
    pub fn new(
        handle: ConnectionHandle,
        transport: Arc<dyn RadioTransport>,
        master: [u8; 6],
        events: Sender<PadEvent>,
        settings: RuntimeSettings,
    ) -> Self {
        let now = Instant::now();
        Self {
            handle,
            transport,
            events,
            settings,
            shared: Mutex::new(BtShared {
                core: SessionCore::new(now),
                channels: ChannelTable::new(),
                output: output::BT_OUTPUT_TEMPLATE,
                queued: 0,
                blocked: false,
                last_send: now,
                init_step: 0,
                address: [0u8; 6],
                master,
                name: String::new(),
            }),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn set_address(&self, addr: [u8; 6]) {
        self.shared.lock().address = addr;
    }

    pub fn set_name(&self, name: String) {
        self.shared.lock().name = name;
    }

    /// Remote name resolved during the HCI accept decision.
    pub fn remote_name(&self) -> String {
        self.shared.lock().name.clone()
    }

    /// Raw plug status byte from the last decoded report.
    pub fn plug_status(&self) -> u8 {
        self.shared.lock().core.plug
    }

    fn hid_command(&self, channel: [u8; 2], data: &[u8]) -> bool {
        let cid = channel[0] as u16 | (channel[1] as u16) << 8;
        let frame = l2cap::acl_frame(self.handle, cid, data);
        match self.transport.write_acl(&frame) {
            Ok(_) => true,
            Err(e) => {
                warn!(handle = %self.handle, "HID command write failed: {e}");
                false
            }
        }
    }

    fn publish(&self, shared: &mut BtShared) {
        let frame = shared.core.publish_frame();
        let _ = self.events.send(PadEvent::Report(frame));
    }

    /// Feed one inbound gameplay report.
    pub fn parse(&self, buf: &mut [u8; READ_BUF_LEN], now: Instant) {
        let mut shared = self.shared.lock();
        let Some(ingested) = shared.core.ingest(Transport::Bluetooth, buf, now) else {
            return;
        };
        if ingested.first {
            Self::queue_rumble(&mut shared, 0, 0);
        }
        self.publish(&mut shared);
    }

    fn queue_rumble(shared: &mut BtShared, left: u8, right: u8) {
        shared.output[output::bt_offset::RUMBLE_RIGHT] = if right > 0 { 0x01 } else { 0x00 };
        shared.output[output::bt_offset::RUMBLE_LEFT] = left;
        shared.queued = 3;
    }

    /// Echo the next initialization blob over the Service channel.
    ///
    /// Returns `true` exactly once: on the frame after the seventh blob,
    /// which is the controller's final acknowledgment.
    pub fn init_report(&self) -> bool {
        let mut shared = self.shared.lock();
        let step = shared.init_step;
        if step < output::INIT_STEPS {
            if let Some(channel) = shared.channels.remote_cid(Psm::Service) {
                shared.init_step += 1;
                drop(shared);
                self.hid_command(channel, output::INIT_REPORTS[step as usize]);
            } else {
                warn!(handle = %self.handle, "init report without a service channel");
            }
            false
        } else if step == output::INIT_STEPS {
            shared.init_step += 1;
            true
        } else {
            false
        }
    }

    /// Clear the outbound flow-control block (Number-Of-Completed-Packets).
    pub fn completed(&self) {
        self.shared.lock().blocked = false;
    }

    /// Watchdog tick; `now` is injected so tests can drive time.
    pub fn tick(&self, now: Instant) {
        let mut shared = self.shared.lock();
        if shared.core.state != DeviceState::Connected {
            return;
        }

        if let (true, Some(timeout)) = (shared.core.is_idle, self.settings.idle_timeout()) {
            if now.duration_since(shared.core.idle_since) >= timeout {
                info!(handle = %self.handle, "idle disconnect triggered");
                shared.core.is_disconnect = false;
                shared.core.is_idle = false;
                drop(shared);
                self.disconnect();
                return;
            }
        } else if shared.core.is_disconnect
            && now.duration_since(shared.core.disconnect_since) >= TRIGGER_HOLD
        {
            info!(handle = %self.handle, "quick disconnect triggered");
            shared.core.is_disconnect = false;
            shared.core.is_idle = false;
            drop(shared);
            self.disconnect();
            return;
        }

        if now.duration_since(shared.core.led_tick) >= LED_PERIOD && shared.core.packet > 0 {
            shared.core.led_tick = now;
            if shared.queued == 0 {
                shared.queued = 1;
            }
            let mask = led_mask(shared.core.pad);
            if Battery::is_low(shared.core.battery) {
                shared.output[output::bt_offset::LED] ^= mask;
            } else {
                shared.output[output::bt_offset::LED] |= mask;
            }
        }

        if self.settings.disable_led() {
            shared.output[output::bt_offset::LED] = 0;
        }

        if !shared.blocked
            && shared.queued > 0
            && now.duration_since(shared.last_send) >= SEND_SPACING
        {
            shared.last_send = now;
            shared.blocked = true;
            shared.queued -= 1;
            if let Some(channel) = shared.channels.remote_cid(Psm::Command) {
                let report = shared.output;
                drop(shared);
                self.hid_command(channel, &report);
            }
        }
    }

    // Channel-table operations driven by the engine's L2CAP loop. Each takes
    // the session lock for the duration of the table update only.

    pub fn set_channel_inbound(&self, psm: Psm, remote_cid: [u8; 2]) -> [u8; 2] {
        self.shared.lock().channels.set_inbound(psm, remote_cid)
    }

    pub fn set_service_channel(&self, remote_cid: [u8; 2], local_cid: [u8; 2]) {
        self.shared
            .lock()
            .channels
            .set_service(remote_cid, local_cid)
    }

    pub fn allocate_cid(&self) -> u16 {
        self.shared.lock().channels.allocate_cid()
    }

    pub fn remote_for_local(&self, local: [u8; 2]) -> Option<[u8; 2]> {
        self.shared.lock().channels.remote_for_local(local)
    }

    pub fn remote_cid(&self, psm: Psm) -> Option<[u8; 2]> {
        self.shared.lock().channels.remote_cid(psm)
    }

    pub fn local_cid(&self, psm: Psm) -> Option<[u8; 2]> {
        self.shared.lock().channels.local_cid(psm)
    }

    pub fn can_start_hid(&self) -> bool {
        self.shared.lock().channels.can_start_hid
    }

    pub fn set_can_start_hid(&self, value: bool) {
        self.shared.lock().channels.can_start_hid = value;
    }

    pub fn can_start_service(&self) -> bool {
        self.shared.lock().channels.can_start_service
    }

    pub fn service_started(&self) -> bool {
        self.shared.lock().channels.service_started
    }

    pub fn set_service_started(&self, value: bool) {
        self.shared.lock().channels.service_started = value;
    }
}

fn led_mask(pad: PadSlot) -> u8 {
    if pad.is_none() {
        0
    } else {
        output::LED_MASKS[pad.index()]
    }
}

impl PadDevice for BluetoothSession {
    fn pad_id(&self) -> PadSlot {
        self.shared.lock().core.pad
    }

    fn set_pad_id(&self, slot: PadSlot) {
        let mut shared = self.shared.lock();
        shared.core.pad = slot;
        shared.output[output::bt_offset::LED] = led_mask(slot);
    }

    fn state(&self) -> DeviceState {
        self.shared.lock().core.state
    }

    fn connection(&self) -> ConnectionKind {
        ConnectionKind::Bluetooth
    }

    fn battery(&self) -> Battery {
        Battery::from_raw(self.shared.lock().core.battery)
    }

    fn local_address(&self) -> String {
        format_address(&self.shared.lock().address)
    }

    fn remote_address(&self) -> String {
        format_address(&self.shared.lock().master)
    }

    /// Enter the gameplay phase: reset the counter, prime the send queue and
    /// enable reporting on the Command channel.
    fn start(&self) -> bool {
        let channel = {
            let mut shared = self.shared.lock();
            if shared.core.state == DeviceState::Connected {
                return true;
            }
            shared.channels.can_start_hid = false;
            shared.core.state = DeviceState::Connected;
            shared.core.packet = 0;
            shared.queued = 3;
            shared.blocked = true;
            shared.last_send = Instant::now();
            shared.channels.remote_cid(Psm::Command)
        };
        match channel {
            Some(channel) => self.hid_command(channel, &output::BT_ENABLE),
            None => {
                warn!(handle = %self.handle, "start without a command channel");
                false
            }
        }
    }

    fn stop(&self) -> bool {
        let mut shared = self.shared.lock();
        if shared.core.state == DeviceState::Connected {
            shared.core.state = DeviceState::Reserved;
            shared.core.packet = 0;
            self.publish(&mut shared);
        }
        shared.core.state == DeviceState::Reserved
    }

    fn close(&self) -> bool {
        let mut shared = self.shared.lock();
        if shared.core.state == DeviceState::Connected {
            shared.core.packet = 0;
            shared.core.state = DeviceState::Disconnected;
            self.publish(&mut shared);
        }
        shared.core.state = DeviceState::Disconnected;
        true
    }

    fn rumble(&self, left: u8, right: u8) -> bool {
        let mut shared = self.shared.lock();
        Self::queue_rumble(&mut shared, left, right);
        true
    }

    fn pair(&self, _host: &[u8; 6]) -> bool {
        // Pairing is a wired-transport operation.
        false
    }

    fn disconnect(&self) -> bool {
        self.transport
            .send_command(&hci::disconnect(self.handle))
            .is_ok()
    }

    fn describe(&self) -> String {
        let shared = self.shared.lock();
        let pad = shared.core.pad;
        match shared.core.state {
            DeviceState::Disconnected => format!("{pad} : Disconnected"),
            DeviceState::Reserved => {
                format!("{pad} : {} - Reserved", format_address(&shared.address))
            }
            DeviceState::Connected => format!(
                "{pad} : {} - {} {:08X} {}",
                format_address(&shared.address),
                ConnectionKind::Bluetooth,
                shared.core.packet,
                Battery::from_raw(shared.core.battery),
            ),
        }
    }
}

struct EngineShared {
    device_state: DeviceState,
    initialized: bool,
    local: [u8; 6],
    hci_version: String,
    lmp_version: String,
    /// Sessions keyed by the numeric handle value, iterated in handle order.
    sessions: BTreeMap<u16, Arc<BluetoothSession>>,
    /// Remote names remembered between name resolution and the connection
    /// completing, keyed by formatted address.
    names: BTreeMap<String, String>,
    /// Signaling id for outbound L2CAP requests.
    signal_id: u8,
}

/// Drives one Bluetooth radio: HCI bring-up, inbound pairing decisions and
/// the L2CAP state machine for every connected controller.
pub struct HostControllerEngine {
    transport: Arc<dyn RadioTransport>,
    events: Sender<PadEvent>,
    settings: RuntimeSettings,
    active: AtomicBool,
    shared: Mutex<EngineShared>,
}

impl HostControllerEngine {
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        events: Sender<PadEvent>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            transport,
            events,
            settings,
            active: AtomicBool::new(false),
            shared: Mutex::new(EngineShared {
                device_state: DeviceState::Disconnected,
                initialized: false,
                local: [0u8; 6],
                hci_version: String::new(),
                lmp_version: String::new(),
                sessions: BTreeMap::new(),
                names: BTreeMap::new(),
                signal_id: 0x01,
            }),
        }
    }

    pub fn open(&self) -> bool {
        self.shared.lock().device_state = DeviceState::Reserved;
        true
    }

    /// Spawn the worker loops. The engine counts as initialized only once
    /// the bring-up sequence has completed inside the HCI loop.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.active.swap(true, Ordering::SeqCst) {
            return true;
        }
        self.shared.lock().device_state = DeviceState::Connected;

        let engine = Arc::clone(self);
        thread::Builder::new()
            .name("openpad-hci".into())
            .spawn(move || engine.hci_loop())
            .map(|_| ())
            .unwrap_or_else(|e| warn!("failed to spawn HCI worker: {e}"));

        let engine = Arc::clone(self);
        thread::Builder::new()
            .name("openpad-l2cap".into())
            .spawn(move || engine.l2cap_loop())
            .map(|_| ())
            .unwrap_or_else(|e| warn!("failed to spawn L2CAP worker: {e}"));

        let engine = Arc::clone(self);
        thread::Builder::new()
            .name("openpad-bt-tick".into())
            .spawn(move || engine.tick_loop())
            .map(|_| ())
            .unwrap_or_else(|e| warn!("failed to spawn tick worker: {e}"));

        true
    }

    /// Disconnect every session and reset the radio.
    pub fn stop(&self) -> bool {
        self.active.store(false, Ordering::SeqCst);
        let sessions: Vec<_> = {
            let mut shared = self.shared.lock();
            shared.device_state = DeviceState::Reserved;
            shared.sessions.values().cloned().collect()
        };
        for session in &sessions {
            session.disconnect();
            session.stop();
        }
        if let Err(e) = self.transport.send_command(&hci::reset()) {
            warn!("reset on stop failed: {e}");
        }
        thread::sleep(RESET_SETTLE);
        self.shared.lock().sessions.clear();
        true
    }

    pub fn close(&self) -> bool {
        self.active.store(false, Ordering::SeqCst);
        {
            let mut shared = self.shared.lock();
            shared.device_state = DeviceState::Disconnected;
            shared.sessions.clear();
        }
        self.transport.close();
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.lock().initialized
    }

    pub fn state(&self) -> DeviceState {
        self.shared.lock().device_state
    }

    /// Host radio address, once bring-up has read it.
    pub fn local_address(&self) -> String {
        format_address(&self.shared.lock().local)
    }

    pub fn local_address_bytes(&self) -> [u8; 6] {
        self.shared.lock().local
    }

    pub fn session_count(&self) -> usize {
        self.shared.lock().sessions.len()
    }

    /// Dongle status line for the control plane's text dump.
    pub fn describe(&self) -> String {
        let shared = self.shared.lock();
        match shared.device_state {
            DeviceState::Disconnected => "Host Address : Disconnected".to_string(),
            _ if !shared.initialized => "Host Address : <Error>".to_string(),
            DeviceState::Reserved => format!(
                "Host Address : {}\n\nHCI Version  : {}\n\nLMP Version  : {}\n\nReserved",
                format_address(&shared.local),
                shared.hci_version,
                shared.lmp_version,
            ),
            DeviceState::Connected => format!(
                "Host Address : {}\n\nHCI Version  : {}\n\nLMP Version  : {}",
                format_address(&shared.local),
                shared.hci_version,
                shared.lmp_version,
            ),
        }
    }

    fn send_command(&self, frame: &[u8]) {
        if let Err(e) = self.transport.send_command(frame) {
            warn!("HCI command write failed: {e}");
        }
    }

    fn next_signal_id(&self) -> u8 {
        let mut shared = self.shared.lock();
        let id = shared.signal_id;
        shared.signal_id = shared.signal_id.wrapping_add(1);
        id
    }

    fn send_signal(&self, handle: ConnectionHandle, pdu: &[u8]) {
        let frame = l2cap::signal_frame(handle, pdu);
        if let Err(e) = self.transport.write_acl(&frame) {
            warn!(handle = %handle, "L2CAP signal write failed: {e}");
        }
    }

    fn session_for(&self, handle: ConnectionHandle) -> Option<Arc<BluetoothSession>> {
        self.shared.lock().sessions.get(&handle.value()).cloned()
    }

    /// HCI event loop. Sends the initial Reset, then reacts to one event per
    /// iteration until the engine deactivates.
    fn hci_loop(self: Arc<Self>) {
        debug!("HCI worker starting");
        let mut buf = [0u8; 512];
        let mut bring_up_started = false;

        self.send_command(&hci::reset());

        while self.active.load(Ordering::SeqCst) && self.transport.is_active() {
            match self.transport.read_event(&mut buf) {
                Ok(n) if n > 0 => self.handle_hci_event(&buf[..n], &mut bring_up_started),
                Ok(_) => {}
                Err(e) => {
                    if !self.active.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("HCI event read failed: {e}");
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
        debug!("HCI worker exiting");
    }

    fn handle_hci_event(&self, buf: &[u8], bring_up_started: &mut bool) {
        let event = match hci::decode_event(buf) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                warn!("dropping malformed HCI event: {e}");
                return;
            }
        };

        match event {
            hci::HciEvent::CommandComplete {
                opcode,
                status,
                params,
            } => self.handle_command_complete(opcode, status, params, bring_up_started),
            hci::HciEvent::ConnectionRequest { addr } => {
                debug!(peer = %format_address(&addr), "connection request");
                self.send_command(&hci::remote_name_request(&addr));
            }
            hci::HciEvent::RemoteNameRequestComplete { addr, name } => {
                self.handle_remote_name(addr, name);
            }
            hci::HciEvent::ConnectionComplete { handle, addr, .. } => {
                self.handle_connection_complete(handle, addr);
            }
            hci::HciEvent::DisconnectionComplete { handle } => {
                let removed = self.shared.lock().sessions.remove(&handle.value());
                match removed {
                    Some(session) => {
                        info!(handle = %handle, "controller disconnected");
                        session.stop();
                        let device: Arc<dyn PadDevice> = session;
                        let _ = self.events.send(PadEvent::Removal(device));
                    }
                    None => debug!(handle = %handle, "disconnect for unknown handle"),
                }
            }
            hci::HciEvent::NumberOfCompletedPackets { entries } => {
                for entry in entries {
                    if entry.completed > 0 {
                        if let Some(session) = self.session_for(entry.handle) {
                            session.completed();
                        }
                    }
                }
            }
            hci::HciEvent::CommandStatus { status } => {
                debug!(status, "command status");
            }
            hci::HciEvent::RoleChange | hci::HciEvent::PageScanRepetitionModeChange => {}
        }
    }

    /// Bring-up chain: each Command-Complete with status 0 triggers the next
    /// command, strictly Reset → ReadBdAddr → ReadBufferSize →
    /// ReadLocalVersionInfo → WriteScanEnable.
    fn handle_command_complete(
        &self,
        opcode: u16,
        status: u8,
        params: &[u8],
        bring_up_started: &mut bool,
    ) {
        if status != 0 {
            warn!(opcode, status, "HCI command failed");
            return;
        }

        match opcode {
            hci::opcode::RESET if !*bring_up_started => {
                *bring_up_started = true;
                thread::sleep(RESET_SETTLE);
                self.send_command(&hci::read_bd_addr());
            }
            hci::opcode::READ_BD_ADDR => {
                if params.len() >= 6 {
                    let mut shared = self.shared.lock();
                    shared.local.copy_from_slice(&params[..6]);
                }
                self.send_command(&hci::read_buffer_size());
            }
            hci::opcode::READ_BUFFER_SIZE => {
                self.send_command(&hci::read_local_version_info());
            }
            hci::opcode::READ_LOCAL_VERSION_INFO => {
                if params.len() >= 8 {
                    let mut shared = self.shared.lock();
                    shared.hci_version =
                        format!("{}.{}", params[0], (params[2] as u16) << 8 | params[1] as u16);
                    shared.lmp_version =
                        format!("{}.{}", params[3], (params[7] as u16) << 8 | params[6] as u16);
                    info!(
                        master = %format_address(&shared.local),
                        hci = %shared.hci_version,
                        lmp = %shared.lmp_version,
                        "radio identity read"
                    );
                }
                self.send_command(&hci::write_scan_enable());
            }
            hci::opcode::WRITE_SCAN_ENABLE => {
                self.shared.lock().initialized = true;
                info!("host controller initialized");
            }
            _ => {}
        }
    }

    fn handle_remote_name(&self, addr: [u8; 6], name: String) {
        let formatted = format_address(&addr);
        debug!(peer = %formatted, name = %name, "remote name resolved");

        if SUPPORTED_NAMES.contains(&name.as_str()) {
            self.shared.lock().names.insert(formatted, name);
            self.send_command(&hci::accept_connection_request(&addr, hci::ACCEPT_ROLE));
        } else {
            info!(peer = %formatted, name = %name, "rejecting unsupported device");
            self.send_command(&hci::reject_connection_request(
                &addr,
                hci::REJECT_REASON_UNSUPPORTED,
            ));
        }
    }

    fn handle_connection_complete(&self, handle: ConnectionHandle, addr: [u8; 6]) {
        let formatted = format_address(&addr);
        let mut shared = self.shared.lock();

        let Some(name) = shared.names.remove(&formatted) else {
            warn!(peer = %formatted, "connection complete without a resolved name");
            return;
        };
        if shared.sessions.len() >= MAX_SESSIONS {
            warn!(peer = %formatted, "session table full, ignoring connection");
            return;
        }

        let session = Arc::new(BluetoothSession::new(
            handle,
            Arc::clone(&self.transport),
            shared.local,
            self.events.clone(),
            self.settings.clone(),
        ));
        session.set_address(addr);
        session.set_name(name);
        info!(handle = %handle, peer = %formatted, "controller link up");
        shared.sessions.insert(handle.value(), session);
    }

    /// L2CAP/data loop: one ACL frame per iteration, dispatched to the
    /// owning session by handle.
    fn l2cap_loop(self: Arc<Self>) {
        debug!("L2CAP worker starting");
        let mut buf = [0u8; READ_BUF_LEN];

        while self.active.load(Ordering::SeqCst) && self.transport.is_active() {
            match self.transport.read_acl(&mut buf) {
                Ok(n) if n > 0 => self.handle_acl_frame(&mut buf, n),
                Ok(_) => {}
                Err(e) => {
                    if !self.active.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("ACL read failed: {e}");
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
        debug!("L2CAP worker exiting");
    }

    fn handle_acl_frame(&self, buf: &mut [u8; READ_BUF_LEN], transferred: usize) {
        let (handle, cid) = match l2cap::parse_acl(&buf[..transferred]) {
            Ok(view) => (view.handle, view.cid),
            Err(e) => {
                warn!("dropping malformed ACL frame: {e}");
                return;
            }
        };

        let Some(session) = self.session_for(handle) else {
            debug!(handle = %handle, "ACL frame for unknown handle");
            return;
        };

        if cid == l2cap::SIGNALING_CID {
            let pdu = match l2cap::decode_signal(&buf[l2cap::ACL_HEADER_LEN..transferred]) {
                Ok(Some(pdu)) => pdu,
                Ok(None) => return,
                Err(e) => {
                    warn!(handle = %handle, "dropping malformed signal: {e}");
                    return;
                }
            };
            self.handle_signal(&session, pdu);
        } else if report::is_bt_input_report(buf, transferred) {
            session.parse(buf, Instant::now());
        } else if session.init_report() {
            // Final initialization acknowledgment: the Service channel has
            // done its job; tear it down and let gameplay continue on the
            // Command/Interrupt channels.
            session.set_can_start_hid(true);
            if let (Some(remote), Some(local)) = (
                session.remote_cid(Psm::Service),
                session.local_cid(Psm::Service),
            ) {
                let id = self.next_signal_id();
                self.send_signal(
                    session.handle(),
                    &l2cap::disconnection_request(id, remote, local),
                );
            }
        }
    }

    fn handle_signal(&self, session: &Arc<BluetoothSession>, pdu: SignalPdu) {
        let handle = session.handle();
        match pdu {
            SignalPdu::ConnectionRequest { id, psm, scid } => {
                let Some(psm) = Psm::from_byte(psm) else {
                    warn!(handle = %handle, psm, "connection request for unknown PSM");
                    return;
                };
                debug!(handle = %handle, ?psm, "l2cap connection request");
                let dcid = session.set_channel_inbound(psm, scid);
                self.send_signal(handle, &l2cap::connection_response(id, dcid, scid, 0x00));
                let config_id = self.next_signal_id();
                self.send_signal(
                    handle,
                    &l2cap::configuration_request(config_id, scid, psm.wants_mtu_option()),
                );
            }
            SignalPdu::ConnectionResponse { dcid, scid, result } => {
                if result != 0 {
                    warn!(handle = %handle, result, "service channel refused");
                    return;
                }
                session.set_service_channel(dcid, scid);
                let config_id = self.next_signal_id();
                self.send_signal(
                    handle,
                    &l2cap::configuration_request(
                        config_id,
                        dcid,
                        Psm::Service.wants_mtu_option(),
                    ),
                );
            }
            SignalPdu::ConfigurationRequest { id, dcid } => {
                let Some(remote) = session.remote_for_local(dcid) else {
                    warn!(handle = %handle, "configuration request for unknown channel");
                    return;
                };
                self.send_signal(handle, &l2cap::configuration_response(id, remote));
                if session.service_started() {
                    session.set_can_start_hid(true);
                    session.init_report();
                }
            }
            SignalPdu::ConfigurationResponse => {
                if session.can_start_service() {
                    let cid = session.allocate_cid().to_le_bytes();
                    let id = self.next_signal_id();
                    self.send_signal(
                        handle,
                        &l2cap::connection_request(id, Psm::Service, cid),
                    );
                }
            }
            SignalPdu::DisconnectionRequest { id, scid } => {
                self.send_signal(handle, &l2cap::disconnection_response(id, scid, scid));
            }
            SignalPdu::DisconnectionResponse => {
                if session.can_start_hid() {
                    session.set_service_started(false);
                    info!(handle = %handle, "controller initialized");
                    let device: Arc<dyn PadDevice> = session.clone();
                    let _ = self.events.send(PadEvent::Arrival(device));
                }
            }
            SignalPdu::CommandReject
            | SignalPdu::EchoRequest
            | SignalPdu::EchoResponse
            | SignalPdu::InformationRequest
            | SignalPdu::InformationResponse => {
                debug!(handle = %handle, ?pdu, "signal ignored");
            }
        }
    }

    /// Single scheduler loop driving every session's watchdog.
    fn tick_loop(self: Arc<Self>) {
        while self.active.load(Ordering::SeqCst) {
            let sessions: Vec<_> = self.shared.lock().sessions.values().cloned().collect();
            let now = Instant::now();
            for session in sessions {
                session.tick(now);
            }
            thread::sleep(TICK_PERIOD);
        }
    }
}
