//! HCI bring-up sequencing against a scripted radio.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use openpad_engine::events;
use openpad_engine::HostControllerEngine;
use openpad_engine::settings::RuntimeSettings;
use openpad_hid_sixaxis_protocol::hci;
use support::VirtualRadio;

const WAIT: Duration = Duration::from_secs(2);

fn command_complete(opcode: u16, params: &[u8]) -> Vec<u8> {
    let mut event = vec![
        0x0E,
        (params.len() + 4) as u8,
        0x01,
        (opcode & 0xFF) as u8,
        (opcode >> 8) as u8,
        0x00,
    ];
    event.extend_from_slice(params);
    event
}

fn start_engine(
    radio: &Arc<VirtualRadio>,
) -> (
    Arc<HostControllerEngine>,
    crossbeam_channel::Receiver<openpad_engine::PadEvent>,
) {
    let (tx, rx) = events::channel();
    let radio_port: Arc<dyn openpad_engine::ports::RadioTransport> = radio.clone();
    let engine = Arc::new(HostControllerEngine::new(
        radio_port,
        tx,
        RuntimeSettings::default(),
    ));
    engine.open();
    engine.start();
    (engine, rx)
}

#[test]
fn bring_up_issues_commands_in_order_and_initializes() {
    let radio = Arc::new(VirtualRadio::new());
    let (engine, _rx) = start_engine(&radio);

    let commands = radio.wait_commands(1, WAIT);
    assert_eq!(commands[0], hci::reset(), "bring-up must begin with Reset");

    radio.push_event(&command_complete(hci::opcode::RESET, &[]));
    let commands = radio.wait_commands(2, WAIT);
    assert_eq!(commands[1], hci::read_bd_addr());

    let addr = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
    radio.push_event(&command_complete(hci::opcode::READ_BD_ADDR, &addr));
    let commands = radio.wait_commands(3, WAIT);
    assert_eq!(commands[2], hci::read_buffer_size());

    radio.push_event(&command_complete(
        hci::opcode::READ_BUFFER_SIZE,
        &[0x36, 0x01, 0x40, 0x0A, 0x00, 0x08, 0x00],
    ));
    let commands = radio.wait_commands(4, WAIT);
    assert_eq!(commands[3], hci::read_local_version_info());

    radio.push_event(&command_complete(
        hci::opcode::READ_LOCAL_VERSION_INFO,
        &[0x04, 0x00, 0x10, 0x04, 0x0F, 0x00, 0x0E, 0x21],
    ));
    let commands = radio.wait_commands(5, WAIT);
    assert_eq!(commands[4], hci::write_scan_enable());

    assert!(!engine.is_initialized(), "not initialized before the last ack");
    radio.push_event(&command_complete(hci::opcode::WRITE_SCAN_ENABLE, &[]));

    let deadline = Instant::now() + WAIT;
    while !engine.is_initialized() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(engine.is_initialized());

    // Exactly Reset plus the four follow-up commands, in that order.
    assert_eq!(radio.commands().len(), 5);
    assert_eq!(engine.local_address(), "66:55:44:33:22:11");

    engine.close();
}

#[test]
fn failed_command_halts_the_bring_up_chain() {
    let radio = Arc::new(VirtualRadio::new());
    let (engine, _rx) = start_engine(&radio);

    radio.wait_commands(1, WAIT);
    // Reset completes with a failure status.
    radio.push_event(&[0x0E, 0x04, 0x01, 0x03, 0x0C, 0x01]);

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(radio.commands().len(), 1, "no follow-up after a failed Reset");
    assert!(!engine.is_initialized());

    engine.close();
}

#[test]
fn unknown_events_are_ignored() {
    let radio = Arc::new(VirtualRadio::new());
    let (engine, _rx) = start_engine(&radio);

    radio.wait_commands(1, WAIT);
    radio.push_event(&[0x99, 0x02, 0xAA, 0xBB]);
    radio.push_event(&[0x10, 0x01, 0x00]); // hardware error: known to HCI, not to us

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(radio.commands().len(), 1);

    engine.close();
}
