//! Control-plane datagram protocol.
//!
//! Loopback UDP, one request per datagram, opcode at byte 1 (byte 0 carries
//! the pad slot where one is needed). Replies reuse the request buffer where
//! the original protocol did.

use crate::settings::Settings;
use crate::ProtocolResult;

/// Default server port for control-plane requests.
pub const DEFAULT_SERVER_PORT: u16 = 26760;
/// Default port the normalized report stream is fed to.
pub const DEFAULT_FEED_PORT: u16 = 26761;

/// Request opcodes (datagram byte 1).
pub mod opcode {
    /// Reply echoes the datagram with the four per-slot state bytes at 2..6.
    pub const STATUS: u8 = 0x00;
    /// `(slot @ 0, left @ 2, right @ 3)` rumble push.
    pub const RUMBLE: u8 = 0x01;
    /// Reply is a UTF-16LE status string, `^`-separated.
    pub const TEXT_STATUS: u8 = 0x02;
    /// Reply is the 8-byte packed settings blob.
    pub const SETTINGS_GET: u8 = 0x03;
    /// Carries an 8-byte packed settings blob to persist.
    pub const SETTINGS_SET: u8 = 0x04;
}

/// A decoded control-plane request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Status,
    Rumble { slot: u8, left: u8, right: u8 },
    TextStatus,
    SettingsGet,
    SettingsSet(Settings),
}

impl Request {
    /// Decode one datagram. Returns `None` for datagrams too short to carry
    /// an opcode or with an opcode outside the protocol; the server ignores
    /// those.
    pub fn parse(buf: &[u8]) -> Option<ProtocolResult<Self>> {
        if buf.len() < 2 {
            return None;
        }
        match buf[1] {
            opcode::STATUS => Some(Ok(Request::Status)),
            opcode::RUMBLE => {
                if buf.len() < 4 {
                    return Some(Err(crate::ProtocolError::Truncated {
                        got: buf.len(),
                        need: 4,
                    }));
                }
                Some(Ok(Request::Rumble {
                    slot: buf[0],
                    left: buf[2],
                    right: buf[3],
                }))
            }
            opcode::TEXT_STATUS => Some(Ok(Request::TextStatus)),
            opcode::SETTINGS_GET => Some(Ok(Request::SettingsGet)),
            opcode::SETTINGS_SET => Some(Settings::unpack(buf).map(Request::SettingsSet)),
            _ => None,
        }
    }
}

/// Build the status reply: the request datagram with the four per-slot state
/// bytes written at offsets 2..6.
pub fn status_reply(request: &[u8], states: [u8; 4]) -> Vec<u8> {
    let mut reply = request.to_vec();
    if reply.len() < 6 {
        reply.resize(6, 0);
    }
    reply[2..6].copy_from_slice(&states);
    reply
}

/// Encode the text status dump: the dongle description and the four pad
/// descriptions, each terminated by `^`, as UTF-16LE.
pub fn text_status_reply(dongle: &str, pads: &[String; 4]) -> Vec<u8> {
    let mut text = String::new();
    text.push_str(dongle);
    text.push('^');
    for pad in pads {
        text.push_str(pad);
        text.push('^');
    }
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status() {
        assert_eq!(Request::parse(&[0x00, 0x00]), Some(Ok(Request::Status)));
    }

    #[test]
    fn parse_rumble() {
        assert_eq!(
            Request::parse(&[0x02, 0x01, 0x80, 0x01]),
            Some(Ok(Request::Rumble {
                slot: 2,
                left: 0x80,
                right: 0x01
            }))
        );
    }

    #[test]
    fn parse_rumble_truncated() {
        match Request::parse(&[0x02, 0x01, 0x80]) {
            Some(Err(_)) => {}
            other => panic!("expected truncation error, got {other:?}"),
        }
    }

    #[test]
    fn parse_settings_set_round_trips() {
        let settings = Settings::default();
        // A push datagram is the packed blob with the push opcode at byte 1.
        let mut datagram = settings.pack();
        datagram[1] = opcode::SETTINGS_SET;
        match Request::parse(&datagram) {
            Some(Ok(Request::SettingsSet(parsed))) => assert_eq!(parsed, settings),
            other => panic!("expected settings, got {other:?}"),
        }
    }

    #[test]
    fn packed_blob_itself_parses_as_a_get() {
        // The blob's tag byte doubles as the settings-get opcode.
        assert_eq!(
            Request::parse(&Settings::default().pack()),
            Some(Ok(Request::SettingsGet))
        );
    }

    #[test]
    fn unknown_opcode_ignored() {
        assert_eq!(Request::parse(&[0x00, 0x7F, 0x00]), None);
        assert_eq!(Request::parse(&[0x00]), None);
    }

    #[test]
    fn status_reply_fills_state_bytes() {
        let reply = status_reply(&[0x00, 0x00, 0, 0, 0, 0], [2, 1, 0, 0]);
        assert_eq!(reply, vec![0x00, 0x00, 2, 1, 0, 0]);
    }

    #[test]
    fn status_reply_grows_short_requests() {
        let reply = status_reply(&[0x00, 0x00], [2, 0, 0, 1]);
        assert_eq!(reply.len(), 6);
        assert_eq!(&reply[2..6], &[2, 0, 0, 1]);
    }

    #[test]
    fn text_status_is_utf16_with_separators() {
        let pads = [
            "Pad 1 : Disconnected".to_string(),
            "Pad 2 : Disconnected".to_string(),
            "Pad 3 : Disconnected".to_string(),
            "Pad 4 : Disconnected".to_string(),
        ];
        let bytes = text_status_reply("Host Address : Disconnected", &pads);
        assert_eq!(bytes.len() % 2, 0);
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let text = String::from_utf16(&units).expect("valid UTF-16");
        assert_eq!(text.matches('^').count(), 5);
        assert!(text.starts_with("Host Address : Disconnected^Pad 1"));
    }
}
