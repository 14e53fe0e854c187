//! HCI command encoding and event decoding.
//!
//! Command frame layout: `[opcode_lsb, opcode_msb, param_len, params...]`,
//! written to the radio's command pipe. Event frames arrive on the interrupt
//! pipe with the event code at byte 0 and the parameter length at byte 1.

use crate::handle::ConnectionHandle;
use crate::{ProtocolError, ProtocolResult};

/// HCI command opcodes used by the engine.
pub mod opcode {
    pub const ACCEPT_CONNECTION_REQUEST: u16 = 0x0409;
    pub const REJECT_CONNECTION_REQUEST: u16 = 0x040A;
    pub const REMOTE_NAME_REQUEST: u16 = 0x0419;
    pub const DISCONNECT: u16 = 0x0406;
    pub const RESET: u16 = 0x0C03;
    pub const WRITE_SCAN_ENABLE: u16 = 0x0C1A;
    pub const READ_BUFFER_SIZE: u16 = 0x1005;
    pub const READ_BD_ADDR: u16 = 0x1009;
    pub const READ_LOCAL_VERSION_INFO: u16 = 0x1001;
}

/// HCI event codes the engine reacts to. Everything else on the wire is
/// ignored, matching the chatter a real dongle produces.
pub mod event_code {
    pub const CONNECTION_COMPLETE: u8 = 0x03;
    pub const CONNECTION_REQUEST: u8 = 0x04;
    pub const DISCONNECTION_COMPLETE: u8 = 0x05;
    pub const REMOTE_NAME_REQUEST_COMPLETE: u8 = 0x07;
    pub const COMMAND_COMPLETE: u8 = 0x0E;
    pub const COMMAND_STATUS: u8 = 0x0F;
    pub const ROLE_CHANGE: u8 = 0x12;
    pub const NUMBER_OF_COMPLETED_PACKETS: u8 = 0x13;
    pub const PAGE_SCAN_REPETITION_MODE_CHANGE: u8 = 0x20;
}

/// Role byte sent with `AcceptConnectionRequest` (0x00: stay master).
pub const ACCEPT_ROLE: u8 = 0x00;
/// Rejection reason for peers that are not a supported controller.
pub const REJECT_REASON_UNSUPPORTED: u8 = 0x0F;
/// Disconnect reason sent with the `Disconnect` command.
pub const DISCONNECT_REASON: u8 = 0x13;

/// Scan-enable parameter: page scan on, inquiry scan off.
pub const SCAN_ENABLE_PAGE: u8 = 0x02;

/// Remote-name-request trailer (page scan repetition mode + clock offset).
const NAME_REQUEST_TRAILER: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Encode a raw HCI command frame.
pub fn encode_command(opcode: u16, params: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(3 + params.len());
    frame.push((opcode & 0xFF) as u8);
    frame.push((opcode >> 8) as u8);
    frame.push(params.len() as u8);
    frame.extend_from_slice(params);
    frame
}

pub fn reset() -> Vec<u8> {
    encode_command(opcode::RESET, &[])
}

pub fn read_bd_addr() -> Vec<u8> {
    encode_command(opcode::READ_BD_ADDR, &[])
}

pub fn read_buffer_size() -> Vec<u8> {
    encode_command(opcode::READ_BUFFER_SIZE, &[])
}

pub fn read_local_version_info() -> Vec<u8> {
    encode_command(opcode::READ_LOCAL_VERSION_INFO, &[])
}

pub fn write_scan_enable() -> Vec<u8> {
    encode_command(opcode::WRITE_SCAN_ENABLE, &[SCAN_ENABLE_PAGE])
}

pub fn accept_connection_request(addr: &[u8; 6], role: u8) -> Vec<u8> {
    let mut params = [0u8; 7];
    params[..6].copy_from_slice(addr);
    params[6] = role;
    encode_command(opcode::ACCEPT_CONNECTION_REQUEST, &params)
}

pub fn reject_connection_request(addr: &[u8; 6], reason: u8) -> Vec<u8> {
    let mut params = [0u8; 7];
    params[..6].copy_from_slice(addr);
    params[6] = reason;
    encode_command(opcode::REJECT_CONNECTION_REQUEST, &params)
}

pub fn remote_name_request(addr: &[u8; 6]) -> Vec<u8> {
    let mut params = [0u8; 10];
    params[..6].copy_from_slice(addr);
    params[6..].copy_from_slice(&NAME_REQUEST_TRAILER);
    encode_command(opcode::REMOTE_NAME_REQUEST, &params)
}

pub fn disconnect(handle: ConnectionHandle) -> Vec<u8> {
    let bare = handle.bare_bytes();
    encode_command(opcode::DISCONNECT, &[bare[0], bare[1], DISCONNECT_REASON])
}

/// One `(handle, completed)` entry of a Number-Of-Completed-Packets event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedPackets {
    pub handle: ConnectionHandle,
    pub completed: u16,
}

/// Decoded HCI event.
///
/// Borrowed variants reference the incoming frame; the engine consumes them
/// before the read buffer is reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciEvent<'a> {
    CommandComplete {
        opcode: u16,
        status: u8,
        /// Return parameters after the status byte.
        params: &'a [u8],
    },
    CommandStatus {
        status: u8,
    },
    ConnectionRequest {
        addr: [u8; 6],
    },
    ConnectionComplete {
        status: u8,
        handle: ConnectionHandle,
        addr: [u8; 6],
    },
    DisconnectionComplete {
        handle: ConnectionHandle,
    },
    RemoteNameRequestComplete {
        addr: [u8; 6],
        name: String,
    },
    NumberOfCompletedPackets {
        entries: Vec<CompletedPackets>,
    },
    RoleChange,
    PageScanRepetitionModeChange,
}

fn need(buf: &[u8], need: usize) -> ProtocolResult<()> {
    if buf.len() < need {
        Err(ProtocolError::Truncated {
            got: buf.len(),
            need,
        })
    } else {
        Ok(())
    }
}

fn addr_at(buf: &[u8], offset: usize) -> [u8; 6] {
    let mut addr = [0u8; 6];
    addr.copy_from_slice(&buf[offset..offset + 6]);
    addr
}

/// Decode one HCI event frame.
///
/// Returns `Ok(None)` for event codes outside the known set (ignored, not an
/// error) and `Err` only when a known event is truncated.
///
/// Connection handles in `ConnectionComplete`, `DisconnectionComplete` and
/// `NumberOfCompletedPackets` are returned with the ACL packet-boundary flag
/// already OR-ed into the msb, so they compare equal to the handles seen in
/// inbound ACL headers.
pub fn decode_event(buf: &[u8]) -> ProtocolResult<Option<HciEvent<'_>>> {
    need(buf, 2)?;

    match buf[0] {
        event_code::COMMAND_COMPLETE => {
            need(buf, 6)?;
            Ok(Some(HciEvent::CommandComplete {
                opcode: buf[3] as u16 | (buf[4] as u16) << 8,
                status: buf[5],
                params: &buf[6..],
            }))
        }
        event_code::COMMAND_STATUS => {
            need(buf, 3)?;
            Ok(Some(HciEvent::CommandStatus { status: buf[2] }))
        }
        event_code::CONNECTION_REQUEST => {
            need(buf, 8)?;
            Ok(Some(HciEvent::ConnectionRequest {
                addr: addr_at(buf, 2),
            }))
        }
        event_code::CONNECTION_COMPLETE => {
            need(buf, 11)?;
            Ok(Some(HciEvent::ConnectionComplete {
                status: buf[2],
                handle: ConnectionHandle::new(buf[3], buf[4] | crate::handle::ACL_FLAGS),
                addr: addr_at(buf, 5),
            }))
        }
        event_code::DISCONNECTION_COMPLETE => {
            need(buf, 5)?;
            Ok(Some(HciEvent::DisconnectionComplete {
                handle: ConnectionHandle::new(buf[3], buf[4] | crate::handle::ACL_FLAGS),
            }))
        }
        event_code::REMOTE_NAME_REQUEST_COMPLETE => {
            need(buf, 10)?;
            let name = buf[9..]
                .iter()
                .take_while(|&&b| b > 0)
                .map(|&b| b as char)
                .collect();
            Ok(Some(HciEvent::RemoteNameRequestComplete {
                addr: addr_at(buf, 3),
                name,
            }))
        }
        event_code::NUMBER_OF_COMPLETED_PACKETS => {
            need(buf, 3)?;
            let count = buf[2] as usize;
            need(buf, 3 + count * 4)?;
            let entries = (0..count)
                .map(|i| {
                    let ptr = 3 + i * 4;
                    CompletedPackets {
                        handle: ConnectionHandle::new(
                            buf[ptr],
                            buf[ptr + 1] | crate::handle::ACL_FLAGS,
                        ),
                        completed: buf[ptr + 2] as u16 | (buf[ptr + 3] as u16) << 8,
                    }
                })
                .collect();
            Ok(Some(HciEvent::NumberOfCompletedPackets { entries }))
        }
        event_code::ROLE_CHANGE => Ok(Some(HciEvent::RoleChange)),
        event_code::PAGE_SCAN_REPETITION_MODE_CHANGE => {
            Ok(Some(HciEvent::PageScanRepetitionModeChange))
        }
        _ => Ok(None),
    }
}
