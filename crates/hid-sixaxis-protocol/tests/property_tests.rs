//! Property tests over the wire decoders: arbitrary bytes must never panic,
//! and well-formed frames must round-trip through encode/decode.

use openpad_hid_sixaxis_protocol::handle::ConnectionHandle;
use openpad_hid_sixaxis_protocol::report::{
    decode_input, Transport, READ_BUF_LEN,
};
use openpad_hid_sixaxis_protocol::{hci, l2cap};
use proptest::prelude::*;

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(500))]

    /// HCI event decoding never panics on arbitrary input.
    #[test]
    fn hci_decode_never_panics(
        data in proptest::collection::vec(proptest::num::u8::ANY, 0..=64usize),
    ) {
        let _ = hci::decode_event(&data);
    }

    /// L2CAP frame/signal decoding never panics on arbitrary input.
    #[test]
    fn l2cap_decode_never_panics(
        data in proptest::collection::vec(proptest::num::u8::ANY, 0..=64usize),
    ) {
        if let Ok(view) = l2cap::parse_acl(&data) {
            let _ = l2cap::decode_signal(view.payload);
        }
    }

    /// Input report decoding never panics on an arbitrary pipe buffer.
    #[test]
    fn report_decode_never_panics(
        data in proptest::collection::vec(proptest::num::u8::ANY, READ_BUF_LEN),
    ) {
        let mut buf = [0u8; READ_BUF_LEN];
        buf.copy_from_slice(&data);
        let _ = decode_input(Transport::Bluetooth, &mut buf);
        let mut buf = [0u8; READ_BUF_LEN];
        buf.copy_from_slice(&data);
        let _ = decode_input(Transport::Usb, &mut buf);
    }

    /// Handle comparison always matches numeric comparison of `l | m << 8`.
    #[test]
    fn handle_ordering_matches_value(
        l1 in proptest::num::u8::ANY, m1 in proptest::num::u8::ANY,
        l2 in proptest::num::u8::ANY, m2 in proptest::num::u8::ANY,
    ) {
        let a = ConnectionHandle::new(l1, m1);
        let b = ConnectionHandle::new(l2, m2);
        let numeric = (l1 as u16 | (m1 as u16) << 8).cmp(&(l2 as u16 | (m2 as u16) << 8));
        prop_assert_eq!(a.cmp(&b), numeric);
    }

    /// An encoded HCI command always carries its own parameter length.
    #[test]
    fn hci_command_length_byte_is_consistent(
        op in proptest::num::u16::ANY,
        params in proptest::collection::vec(proptest::num::u8::ANY, 0..=32usize),
    ) {
        let frame = hci::encode_command(op, &params);
        prop_assert_eq!(frame.len(), 3 + params.len());
        prop_assert_eq!(frame[2] as usize, params.len());
        prop_assert_eq!(frame[0] as u16 | (frame[1] as u16) << 8, op);
    }

    /// An ACL frame parses back to the handle/cid/payload that built it.
    #[test]
    fn acl_frame_round_trips(
        value in proptest::num::u16::ANY,
        cid in proptest::num::u16::ANY,
        payload in proptest::collection::vec(proptest::num::u8::ANY, 0..=48usize),
    ) {
        let handle = ConnectionHandle::from_value(value);
        let frame = l2cap::acl_frame(handle, cid, &payload);
        let view = l2cap::parse_acl(&frame).map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
        // The header sets the packet-boundary flag in the msb.
        prop_assert_eq!(view.handle.value(), value | 0x2000);
        prop_assert_eq!(view.cid, cid);
        prop_assert_eq!(view.payload, &payload[..]);
    }
}
