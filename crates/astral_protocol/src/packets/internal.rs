//! Internal protocol between lobby, world, and channel. Same framing as the
//! client protocol; opcodes sit in the 0x1000 range.

use crate::packets::wire_packet;
use crate::string::Utf8String;
use crate::RawBytes;

/// `AccountLogout` action: the user disconnected entirely.
pub const LOGOUT_ACTION_DISCONNECT: u8 = 1;
/// `AccountLogout` action: the user is switching channels.
pub const LOGOUT_ACTION_CHANNEL_SWITCH: u8 = 2;

wire_packet! {
    /// Lobby -> channel handoff. The receiver transitions the user's state
    /// to CHANNEL.
    pub struct AccountLogin(0x1004) {
        pub cid: u32,
        pub world_id: u8,
        pub channel_id: u8,
        pub session_key: Utf8String,
    }
}

wire_packet! {
    /// Logout notification between servers. `channel_id` and `session_key`
    /// matter only for the channel-switch action.
    pub struct AccountLogout(0x1005) {
        pub action: u8,
        pub channel_id: u8,
        pub session_key: Utf8String,
    }
}

wire_packet! {
    /// Relay fan-out: the payload is forwarded untouched to every member's
    /// channel.
    pub struct PartyUpdate(0x1009) {
        pub party_id: u32,
        pub member_cids: Vec<u32>,
        pub payload: RawBytes,
    }
}

wire_packet! {
    pub struct ClanUpdate(0x100A) {
        pub clan_id: u32,
        pub member_cids: Vec<u32>,
        pub payload: RawBytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_frame;
    use crate::{Packet, PacketDecoder};

    #[test]
    fn account_login_round_trip() {
        let pkt = AccountLogin {
            cid: 88,
            world_id: 1,
            channel_id: 2,
            session_key: "c0ffee".into(),
        };

        let bytes = encode_frame(&pkt).unwrap();
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&bytes);
        let frame = dec.try_next_packet().unwrap().unwrap();
        assert_eq!(frame.opcode, AccountLogin::OPCODE);
        assert_eq!(frame.decode::<AccountLogin>().unwrap(), pkt);
    }

    #[test]
    fn relay_payload_consumes_remainder() {
        let pkt = PartyUpdate {
            party_id: 4,
            member_cids: vec![1, 2, 3],
            payload: RawBytes(vec![0xAA, 0xBB]),
        };

        let bytes = encode_frame(&pkt).unwrap();
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&bytes);
        let frame = dec.try_next_packet().unwrap().unwrap();
        assert_eq!(frame.decode::<PartyUpdate>().unwrap().payload.0, vec![0xAA, 0xBB]);
    }
}
