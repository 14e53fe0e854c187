//! The 8-byte packed settings blob exchanged over the control plane.
//!
//! Layout: `[_, 0x03, idle_minutes, flip_lx, flip_ly, flip_rx, flip_ry,
//! disable_led]`. Byte 1 carries the settings opcode so a reply can be told
//! apart from other datagrams.

use crate::{ProtocolError, ProtocolResult};

/// Blob length on the wire.
pub const PACKED_LEN: usize = 8;

/// Opcode byte stamped into position 1 of the packed blob.
pub const PACKED_TAG: u8 = 0x03;

/// User-tunable settings carried by the control plane and consumed by the
/// session watchdogs (idle timeout, LED disable) and the downstream bus
/// (axis flips).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Idle-disconnect timeout in whole minutes; 0 disables the idle
    /// watchdog.
    pub idle_timeout_min: u8,
    pub flip_lx: bool,
    pub flip_ly: bool,
    pub flip_rx: bool,
    pub flip_ry: bool,
    pub disable_led: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            idle_timeout_min: 10,
            flip_lx: false,
            flip_ly: false,
            flip_rx: false,
            flip_ry: false,
            disable_led: false,
        }
    }
}

impl Settings {
    /// Idle timeout as a duration; `None` when idle disconnect is disabled.
    pub fn idle_timeout(&self) -> Option<core::time::Duration> {
        if self.idle_timeout_min == 0 {
            None
        } else {
            Some(core::time::Duration::from_secs(
                self.idle_timeout_min as u64 * 60,
            ))
        }
    }

    pub fn pack(&self) -> [u8; PACKED_LEN] {
        [
            0x00,
            PACKED_TAG,
            self.idle_timeout_min,
            self.flip_lx as u8,
            self.flip_ly as u8,
            self.flip_rx as u8,
            self.flip_ry as u8,
            self.disable_led as u8,
        ]
    }

    pub fn unpack(buf: &[u8]) -> ProtocolResult<Self> {
        if buf.len() < PACKED_LEN {
            return Err(ProtocolError::Truncated {
                got: buf.len(),
                need: PACKED_LEN,
            });
        }
        Ok(Self {
            idle_timeout_min: buf[2],
            flip_lx: buf[3] == 0x01,
            flip_ly: buf[4] == 0x01,
            flip_rx: buf[5] == 0x01,
            flip_ry: buf[6] == 0x01,
            disable_led: buf[7] == 0x01,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_layout() {
        let s = Settings {
            idle_timeout_min: 10,
            flip_lx: true,
            flip_ly: false,
            flip_rx: false,
            flip_ry: true,
            disable_led: false,
        };
        assert_eq!(s.pack(), [0x00, 0x03, 10, 1, 0, 0, 1, 0]);
    }

    #[test]
    fn unpack_rejects_short_blob() {
        assert!(Settings::unpack(&[0u8; 7]).is_err());
    }

    #[test]
    fn zero_minutes_disables_idle() {
        let s = Settings {
            idle_timeout_min: 0,
            ..Settings::default()
        };
        assert_eq!(s.idle_timeout(), None);
        let s = Settings::default();
        assert_eq!(
            s.idle_timeout(),
            Some(core::time::Duration::from_secs(600))
        );
    }
}
