//! Watchdog timing: idle disconnect, the quick-disconnect gesture and
//! rumble send pacing, driven with synthetic clocks.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use openpad_engine::bluetooth::BluetoothSession;
use openpad_engine::events;
use openpad_engine::ports::PadDevice;
use openpad_engine::settings::RuntimeSettings;
use openpad_engine::PadEvent;
use openpad_hid_sixaxis_protocol::l2cap::Psm;
use openpad_hid_sixaxis_protocol::settings::Settings;
use openpad_hid_sixaxis_protocol::ConnectionHandle;
use support::VirtualRadio;

const HANDLE: ConnectionHandle = ConnectionHandle::new(0x0B, 0x20);

struct Rig {
    radio: Arc<VirtualRadio>,
    session: BluetoothSession,
    rx: Receiver<PadEvent>,
}

fn rig(settings: Settings) -> Rig {
    let radio = Arc::new(VirtualRadio::new());
    let (tx, rx) = events::channel();
    let radio_port: Arc<dyn openpad_engine::ports::RadioTransport> = radio.clone();
    let session = BluetoothSession::new(
        HANDLE,
        radio_port,
        [0xAA; 6],
        tx,
        RuntimeSettings::new(settings),
    );
    session.set_address([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    session.set_channel_inbound(Psm::Command, [0x50, 0x00]);
    session.set_channel_inbound(Psm::Interrupt, [0x51, 0x00]);
    session.start();
    Rig { radio, session, rx }
}

/// 58-byte Bluetooth frame in the 64-byte pipe buffer, sticks at rest.
fn quiet_frame() -> [u8; 64] {
    let mut buf = [0u8; 64];
    buf[8] = 0xA1;
    buf[9] = 0x01;
    for i in 15..19 {
        buf[i] = 0x80;
    }
    buf
}

fn active_frame() -> [u8; 64] {
    let mut buf = quiet_frame();
    buf[11] = 0x10; // a face button held
    buf
}

fn trigger_frame() -> [u8; 64] {
    let mut buf = quiet_frame();
    buf[12] = 0x0C; // gesture bits 10 and 11
    buf[13] = 0x01; // gesture bit 16
    buf
}

fn disconnect_count(radio: &VirtualRadio) -> usize {
    radio
        .commands()
        .iter()
        .filter(|c| c[..2] == [0x06, 0x04])
        .count()
}

#[test]
fn idle_disconnect_fires_exactly_once_at_the_timeout() {
    let settings = Settings {
        idle_timeout_min: 1,
        ..Settings::default()
    };
    let r = rig(settings);
    let t0 = Instant::now();

    // Activity, then the controller goes quiet.
    r.session.parse(&mut active_frame(), t0);
    r.session.parse(&mut quiet_frame(), t0);

    // Not before the timeout.
    r.session.tick(t0 + Duration::from_secs(59));
    assert_eq!(disconnect_count(&r.radio), 0);

    // Exactly at the timeout.
    r.session.tick(t0 + Duration::from_secs(60));
    assert_eq!(disconnect_count(&r.radio), 1);

    // Never repeated.
    r.session.tick(t0 + Duration::from_secs(61));
    r.session.tick(t0 + Duration::from_secs(120));
    assert_eq!(disconnect_count(&r.radio), 1);
}

#[test]
fn idle_disconnect_disabled_by_zero_timeout() {
    let settings = Settings {
        idle_timeout_min: 0,
        ..Settings::default()
    };
    let r = rig(settings);
    let t0 = Instant::now();

    r.session.parse(&mut active_frame(), t0);
    r.session.parse(&mut quiet_frame(), t0);
    r.session.tick(t0 + Duration::from_secs(3600));
    assert_eq!(disconnect_count(&r.radio), 0);
}

#[test]
fn activity_rearms_the_idle_clock() {
    let settings = Settings {
        idle_timeout_min: 1,
        ..Settings::default()
    };
    let r = rig(settings);
    let t0 = Instant::now();

    r.session.parse(&mut active_frame(), t0);
    r.session.parse(&mut quiet_frame(), t0);
    // New activity 30 s in, quiet again at 40 s.
    r.session.parse(&mut active_frame(), t0 + Duration::from_secs(30));
    r.session.parse(&mut quiet_frame(), t0 + Duration::from_secs(40));

    r.session.tick(t0 + Duration::from_secs(90));
    assert_eq!(disconnect_count(&r.radio), 0, "idle clock restarts on activity");
    r.session.tick(t0 + Duration::from_secs(100));
    assert_eq!(disconnect_count(&r.radio), 1);
}

#[test]
fn trigger_gesture_disconnects_after_two_seconds_and_flips_the_bit() {
    let r = rig(Settings::default());
    let t0 = Instant::now();

    // Gesture held across repeated frames.
    r.session.parse(&mut trigger_frame(), t0);
    r.session.parse(&mut trigger_frame(), t0 + Duration::from_millis(500));
    r.session.parse(&mut trigger_frame(), t0 + Duration::from_millis(1000));

    // Every forwarded report during the latch has the gesture bit cleared
    // (frame offset 13 lands at normalized offset 12).
    let mut seen = 0;
    while let Ok(event) = r.rx.try_recv() {
        if let PadEvent::Report(frame) = event {
            seen += 1;
            assert_eq!(frame[12] & 0x01, 0, "gesture bit must not reach the bus");
            assert_eq!(frame[12 - 1] & 0x0C, 0x0C, "other button bits pass through");
        }
    }
    assert_eq!(seen, 3);

    r.session.tick(t0 + Duration::from_millis(1999));
    assert_eq!(disconnect_count(&r.radio), 0, "not before the 2000 ms hold");

    r.session.tick(t0 + Duration::from_millis(2000));
    assert_eq!(disconnect_count(&r.radio), 1);

    r.session.tick(t0 + Duration::from_millis(2016));
    assert_eq!(disconnect_count(&r.radio), 1, "exactly one disconnect");
}

#[test]
fn releasing_the_gesture_cancels_the_latch() {
    let r = rig(Settings::default());
    let t0 = Instant::now();

    r.session.parse(&mut trigger_frame(), t0);
    r.session.parse(&mut quiet_frame(), t0 + Duration::from_millis(500));
    r.session.tick(t0 + Duration::from_millis(2500));
    assert_eq!(disconnect_count(&r.radio), 0);
}

#[test]
fn rumble_sends_respect_flow_control_and_spacing() {
    let r = rig(Settings::default());
    let t0 = Instant::now();

    // First report primes the zero-rumble command; the session starts
    // blocked until the radio acknowledges the enable command.
    r.session.parse(&mut quiet_frame(), t0);
    let before = r.radio.acl_writes().len();

    r.session.tick(t0 + Duration::from_millis(130));
    assert_eq!(
        r.radio.acl_writes().len(),
        before,
        "blocked session must not send"
    );

    r.session.completed();
    r.session.tick(t0 + Duration::from_millis(140));
    let after_first = r.radio.acl_writes().len();
    assert_eq!(after_first, before + 1, "unblocked send goes out");

    // Still blocked again until the next completed-packets signal.
    r.session.completed();
    r.session.tick(t0 + Duration::from_millis(200));
    assert_eq!(
        r.radio.acl_writes().len(),
        after_first,
        "sends are spaced at least 125 ms apart"
    );

    r.session.tick(t0 + Duration::from_millis(270));
    assert_eq!(r.radio.acl_writes().len(), after_first + 1);
}

#[test]
fn rumble_request_updates_the_pending_report() {
    let r = rig(Settings::default());
    let t0 = Instant::now();
    r.session.parse(&mut quiet_frame(), t0);

    assert!(r.session.rumble(0x80, 0x01));
    r.session.completed();
    r.session.tick(t0 + Duration::from_millis(130));

    let writes = r.radio.acl_writes();
    let last = writes.last().expect("an output report was sent");
    // ACL header is 8 bytes; rumble-left magnitude at report offset 6.
    assert_eq!(last[8 + 6], 0x80);
    assert_eq!(last[8 + 4], 0x01);
}
