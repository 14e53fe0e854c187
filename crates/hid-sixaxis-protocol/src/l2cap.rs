//! L2CAP signaling PDUs and the ACL framing they ride in.
//!
//! Every outbound frame is an ACL packet: 2-byte handle (packet-boundary
//! flag in the msb), 2-byte total length, 2-byte L2CAP length, 2-byte
//! channel id, then the payload. Signaling PDUs go to CID `0x0001`; HID
//! traffic goes to the negotiated data channel ids. The byte layout here is
//! load-bearing — it must match what the controller firmware expects, down
//! to the zero padding in the configuration PDUs.

use crate::handle::ConnectionHandle;
use crate::{ProtocolError, ProtocolResult};

/// Fixed channel id for the signaling channel.
pub const SIGNALING_CID: u16 = 0x0001;

/// Offset of the L2CAP payload inside an ACL frame.
pub const ACL_HEADER_LEN: usize = 8;

/// L2CAP signaling codes.
pub mod code {
    pub const COMMAND_REJECT: u8 = 0x01;
    pub const CONNECTION_REQUEST: u8 = 0x02;
    pub const CONNECTION_RESPONSE: u8 = 0x03;
    pub const CONFIGURATION_REQUEST: u8 = 0x04;
    pub const CONFIGURATION_RESPONSE: u8 = 0x05;
    pub const DISCONNECTION_REQUEST: u8 = 0x06;
    pub const DISCONNECTION_RESPONSE: u8 = 0x07;
    pub const ECHO_REQUEST: u8 = 0x08;
    pub const ECHO_RESPONSE: u8 = 0x09;
    pub const INFORMATION_REQUEST: u8 = 0x0A;
    pub const INFORMATION_RESPONSE: u8 = 0x0B;
}

/// Protocol/service multiplexer values for the three channels a controller
/// uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Psm {
    /// SDP channel used only for the initialization exchange.
    Service = 0x01,
    /// HID control channel (output reports, feature enable).
    Command = 0x11,
    /// HID interrupt channel (input reports).
    Interrupt = 0x13,
}

impl Psm {
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Psm::Service),
            0x11 => Some(Psm::Command),
            0x13 => Some(Psm::Interrupt),
            _ => None,
        }
    }

    /// The MTU option is negotiated for the HID channels only; the Service
    /// channel's configuration request carries no options.
    pub const fn wants_mtu_option(self) -> bool {
        matches!(self, Psm::Command | Psm::Interrupt)
    }
}

/// MTU configuration option appended to HID-channel configuration requests
/// (option type 0x01, length 2, MTU 0x0096).
pub const MTU_OPTION: [u8; 4] = [0x01, 0x02, 0x96, 0x00];

/// Wrap `payload` in an ACL header targeting `cid`.
pub fn acl_frame(handle: ConnectionHandle, cid: u16, payload: &[u8]) -> Vec<u8> {
    let acl = handle.acl_bytes();
    let total = (payload.len() + 4) as u16;
    let l2 = payload.len() as u16;
    let mut frame = Vec::with_capacity(ACL_HEADER_LEN + payload.len());
    frame.extend_from_slice(&acl);
    frame.extend_from_slice(&total.to_le_bytes());
    frame.extend_from_slice(&l2.to_le_bytes());
    frame.extend_from_slice(&cid.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Wrap a signaling PDU for the fixed signaling channel.
pub fn signal_frame(handle: ConnectionHandle, pdu: &[u8]) -> Vec<u8> {
    acl_frame(handle, SIGNALING_CID, pdu)
}

fn pdu(code: u8, id: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(code);
    out.push(id);
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Connection Request: open `psm` with our source channel id `scid`.
pub fn connection_request(id: u8, psm: Psm, scid: [u8; 2]) -> Vec<u8> {
    pdu(
        code::CONNECTION_REQUEST,
        id,
        &[psm as u8, 0x00, scid[0], scid[1]],
    )
}

/// Connection Response: `dcid` is the channel endpoint on our side, `scid`
/// echoes the requester's source channel id.
pub fn connection_response(id: u8, dcid: [u8; 2], scid: [u8; 2], result: u8) -> Vec<u8> {
    pdu(
        code::CONNECTION_RESPONSE,
        id,
        &[dcid[0], dcid[1], scid[0], scid[1], result, 0x00, 0x00, 0x00],
    )
}

/// Configuration Request for the remote endpoint `dcid`, with the MTU option
/// appended when `mtu` is set.
pub fn configuration_request(id: u8, dcid: [u8; 2], mtu: bool) -> Vec<u8> {
    let mut body = vec![dcid[0], dcid[1], 0x00, 0x00];
    if mtu {
        body.extend_from_slice(&MTU_OPTION);
    }
    pdu(code::CONFIGURATION_REQUEST, id, &body)
}

/// Configuration Response acknowledging the remote endpoint `scid`.
pub fn configuration_response(id: u8, scid: [u8; 2]) -> Vec<u8> {
    pdu(
        code::CONFIGURATION_RESPONSE,
        id,
        &[scid[0], scid[1], 0x00, 0x00, 0x00, 0x00],
    )
}

pub fn disconnection_request(id: u8, dcid: [u8; 2], scid: [u8; 2]) -> Vec<u8> {
    pdu(
        code::DISCONNECTION_REQUEST,
        id,
        &[dcid[0], dcid[1], scid[0], scid[1]],
    )
}

pub fn disconnection_response(id: u8, dcid: [u8; 2], scid: [u8; 2]) -> Vec<u8> {
    pdu(
        code::DISCONNECTION_RESPONSE,
        id,
        &[dcid[0], dcid[1], scid[0], scid[1]],
    )
}

/// Borrowed view of one inbound ACL frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclView<'a> {
    pub handle: ConnectionHandle,
    pub cid: u16,
    pub payload: &'a [u8],
}

impl AclView<'_> {
    pub fn is_signaling(&self) -> bool {
        self.cid == SIGNALING_CID
    }
}

/// Split an inbound ACL frame into handle, channel id and payload.
pub fn parse_acl(buf: &[u8]) -> ProtocolResult<AclView<'_>> {
    if buf.len() < ACL_HEADER_LEN {
        return Err(ProtocolError::Truncated {
            got: buf.len(),
            need: ACL_HEADER_LEN,
        });
    }
    Ok(AclView {
        handle: ConnectionHandle::new(buf[0], buf[1]),
        cid: buf[6] as u16 | (buf[7] as u16) << 8,
        payload: &buf[ACL_HEADER_LEN..],
    })
}

/// Decoded signaling PDU, carrying only the fields the connection state
/// machine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPdu {
    ConnectionRequest { id: u8, psm: u8, scid: [u8; 2] },
    ConnectionResponse { dcid: [u8; 2], scid: [u8; 2], result: u8 },
    ConfigurationRequest { id: u8, dcid: [u8; 2] },
    ConfigurationResponse,
    DisconnectionRequest { id: u8, scid: [u8; 2] },
    DisconnectionResponse,
    CommandReject,
    EchoRequest,
    EchoResponse,
    InformationRequest,
    InformationResponse,
}

/// Decode a signaling-channel payload.
///
/// Codes outside the defined set are ignored (`Ok(None)`); truncated PDUs of
/// a known code are an error the caller logs and drops.
pub fn decode_signal(payload: &[u8]) -> ProtocolResult<Option<SignalPdu>> {
    let need = |n: usize| -> ProtocolResult<()> {
        if payload.len() < n {
            Err(ProtocolError::Truncated {
                got: payload.len(),
                need: n,
            })
        } else {
            Ok(())
        }
    };

    need(2)?;
    let id = payload[1];

    match payload[0] {
        code::CONNECTION_REQUEST => {
            need(8)?;
            Ok(Some(SignalPdu::ConnectionRequest {
                id,
                psm: payload[4],
                scid: [payload[6], payload[7]],
            }))
        }
        code::CONNECTION_RESPONSE => {
            need(9)?;
            Ok(Some(SignalPdu::ConnectionResponse {
                dcid: [payload[4], payload[5]],
                scid: [payload[6], payload[7]],
                result: payload[8],
            }))
        }
        code::CONFIGURATION_REQUEST => {
            need(6)?;
            Ok(Some(SignalPdu::ConfigurationRequest {
                id,
                dcid: [payload[4], payload[5]],
            }))
        }
        code::CONFIGURATION_RESPONSE => Ok(Some(SignalPdu::ConfigurationResponse)),
        code::DISCONNECTION_REQUEST => {
            need(8)?;
            Ok(Some(SignalPdu::DisconnectionRequest {
                id,
                scid: [payload[6], payload[7]],
            }))
        }
        code::DISCONNECTION_RESPONSE => Ok(Some(SignalPdu::DisconnectionResponse)),
        code::COMMAND_REJECT => Ok(Some(SignalPdu::CommandReject)),
        code::ECHO_REQUEST => Ok(Some(SignalPdu::EchoRequest)),
        code::ECHO_RESPONSE => Ok(Some(SignalPdu::EchoResponse)),
        code::INFORMATION_REQUEST => Ok(Some(SignalPdu::InformationRequest)),
        code::INFORMATION_RESPONSE => Ok(Some(SignalPdu::InformationResponse)),
        _ => Ok(None),
    }
}
