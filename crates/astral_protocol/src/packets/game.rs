//! Packets exchanged between the client and the channel server.
//!
//! Serverbound packets keep the field order the client sends; clientbound
//! packets carry only the fields the client actually reads.

use std::io::Write;

use anyhow::bail;

use crate::packets::{wire_packet, wire_struct};
use crate::string::{Cp932String, Utf8String};
use crate::{Decode, Encode, Packet};

// ---------------------------------------------------------------------------
// Serverbound
// ---------------------------------------------------------------------------

wire_packet! {
    /// First packet on a fresh connection.
    pub struct Login(0x0000) {
        pub username: Cp932String,
        pub client_version: u32,
    }
}

wire_packet! {
    /// Proves the web-auth session after [`Login`].
    pub struct Auth(0x0002) {
        pub session_key: Utf8String,
    }
}

wire_packet! {
    /// The client is ready to receive character and zone data.
    pub struct SendData(0x0004) {}
}

/// Why the client wants to leave.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LogoutCode {
    /// Begin the logout countdown.
    Quit,
    /// Abort a previously requested logout.
    Cancel,
    /// Hand off to another channel; carries the target channel.
    ChannelSwitch(u8),
}

/// Logout request. The channel ID field is only present for a switch.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Logout {
    pub code: LogoutCode,
}

impl Packet for Logout {
    const OPCODE: u16 = 0x0005;
    const NAME: &'static str = "Logout";
}

impl Encode for Logout {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        match self.code {
            LogoutCode::Quit => 1u8.encode(&mut w),
            LogoutCode::Cancel => 2u8.encode(&mut w),
            LogoutCode::ChannelSwitch(channel) => {
                3u8.encode(&mut w)?;
                channel.encode(&mut w)
            }
        }
    }
}

impl Decode for Logout {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let code = match u8::decode(r)? {
            1 => LogoutCode::Quit,
            2 => LogoutCode::Cancel,
            3 => LogoutCode::ChannelSwitch(u8::decode(r)?),
            other => bail!("unknown logout code {other}"),
        };
        Ok(Self { code })
    }
}

wire_packet! {
    /// Requests the entity population of the client's current zone.
    pub struct PopulateZone(0x0019) {
        pub entity_id: i32,
    }
}

wire_packet! {
    /// Movement intent. Times are client-relative float seconds.
    pub struct Move(0x001C) {
        pub entity_id: i32,
        pub dest_x: f32,
        pub dest_y: f32,
        pub start_time: f32,
        pub stop_time: f32,
    }
}

wire_packet! {
    pub struct Chat(0x0026) {
        pub channel: u16,
        pub message: Cp932String,
    }
}

wire_packet! {
    pub struct ActivateSkill(0x0030) {
        pub entity_id: i32,
        pub skill_id: u32,
        pub target_object_id: i64,
    }
}

wire_packet! {
    pub struct ExecuteSkill(0x0031) {
        pub entity_id: i32,
        pub activation_id: i8,
        pub target_object_id: i64,
    }
}

wire_packet! {
    pub struct CancelSkill(0x0032) {
        pub entity_id: i32,
        pub activation_id: i8,
    }
}

wire_packet! {
    /// Expected every 10 seconds; the token is echoed back.
    pub struct KeepAlive(0x0056) {
        pub token: u32,
    }
}

wire_packet! {
    pub struct ItemMove(0x0076) {
        pub item_object_id: i64,
        pub source_box_id: i64,
        pub dest_box_id: i64,
        pub dest_slot: u16,
    }
}

wire_packet! {
    pub struct ItemDrop(0x0077) {
        pub item_object_id: i64,
    }
}

wire_packet! {
    /// Rotation intent. Times are client-relative float seconds.
    pub struct Rotate(0x00F8) {
        pub entity_id: i32,
        pub rotation: f32,
        pub start_time: f32,
        pub stop_time: f32,
    }
}

// ---------------------------------------------------------------------------
// Clientbound
// ---------------------------------------------------------------------------

wire_packet! {
    pub struct LoginReply(0x0001) {
        pub response: u32,
    }
}

wire_packet! {
    pub struct AuthReply(0x0003) {
        pub response: u32,
    }
}

wire_packet! {
    pub struct LogoutReply(0x0006) {
        pub code: u8,
    }
}

wire_struct! {
    /// The calculated stat block shared by character and demon dumps.
    pub struct EntityStatsBlock {
        pub str_: i16,
        pub magic: i16,
        pub vit: i16,
        pub int: i16,
        pub speed: i16,
        pub luck: i16,
        pub clsr: i16,
        pub lngr: i16,
        pub spell: i16,
        pub support: i16,
        pub pdef: i16,
        pub mdef: i16,
    }
}

wire_struct! {
    /// One active status effect as shown to the client. The expiration is
    /// client-relative seconds for countdown effects and an absolute system
    /// second reinterpreted for fixed-time effects.
    pub struct StatusEffectEntry {
        pub effect_id: u32,
        pub expiration: f32,
        pub stack: u8,
    }
}

wire_packet! {
    /// The character's full state, sent once after [`SendData`].
    pub struct CharacterData(0x000F) {
        pub entity_id: i32,
        pub name: Cp932String,
        pub level: i8,
        pub lnc: i16,
        pub max_hp: i16,
        pub max_mp: i16,
        pub hp: i16,
        pub mp: i16,
        pub xp: i64,
        pub stats: EntityStatsBlock,
        pub equipment: Vec<u32>,
        pub status_effects: Vec<StatusEffectEntry>,
        pub skills: Vec<u32>,
        pub zone_id: u32,
        pub x: f32,
        pub y: f32,
        pub rotation: f32,
    }
}

wire_packet! {
    pub struct ShowCharacter(0x0010) {
        pub entity_id: i32,
    }
}

wire_packet! {
    pub struct StatusIcon(0x0011) {
        pub entity_id: i32,
        pub icon: u8,
    }
}

wire_packet! {
    pub struct ZoneChange(0x001A) {
        pub zone_id: u32,
        pub dynamic_map_id: u32,
        pub instance_id: u32,
        pub x: f32,
        pub y: f32,
        pub rotation: f32,
    }
}

wire_packet! {
    pub struct MoveNotify(0x001D) {
        pub entity_id: i32,
        pub dest_x: f32,
        pub dest_y: f32,
        pub origin_x: f32,
        pub origin_y: f32,
        pub start_time: f32,
        pub stop_time: f32,
    }
}

wire_packet! {
    pub struct StopNotify(0x001E) {
        pub entity_id: i32,
        pub x: f32,
        pub y: f32,
        pub rotation: f32,
        pub time: f32,
    }
}

wire_packet! {
    pub struct EntityAppeared(0x0023) {
        pub entity_id: i32,
        pub kind: u8,
        pub name: Cp932String,
        pub x: f32,
        pub y: f32,
        pub rotation: f32,
        pub max_hp: i16,
        pub hp: i16,
    }
}

wire_packet! {
    pub struct EntityRemoved(0x0024) {
        pub entity_id: i32,
    }
}

wire_packet! {
    pub struct KeepAliveReply(0x0057) {
        pub token: u32,
    }
}

wire_packet! {
    /// Re-sends the learned skill list after a skill-set change.
    pub struct SkillList(0x009A) {
        pub entity_id: i32,
        pub skills: Vec<u32>,
    }
}

wire_packet! {
    /// Per-entity delta emitted after a tick drain.
    pub struct StatusEffectDelta(0x00B0) {
        pub entity_id: i32,
        pub hp: i16,
        pub mp: i16,
        pub hp_t_damage: i32,
        pub mp_t_damage: i32,
        pub added: Vec<StatusEffectEntry>,
        pub updated: Vec<StatusEffectEntry>,
        pub removed: Vec<u32>,
    }
}

wire_packet! {
    /// Recalculated stat table for an entity the client controls.
    pub struct EntityStats(0x00B2) {
        pub entity_id: i32,
        pub stats: EntityStatsBlock,
        pub max_hp: i16,
        pub max_mp: i16,
    }
}

wire_packet! {
    pub struct HpMpUpdate(0x00B1) {
        pub entity_id: i32,
        pub hp: i16,
        pub mp: i16,
        pub max_hp: i16,
        pub max_mp: i16,
    }
}

wire_struct! {
    pub struct ItemSlot {
        pub slot: u16,
        pub item_type: u32,
        pub stack: u16,
    }
}

wire_packet! {
    pub struct ItemBoxUpdate(0x00C0) {
        pub box_id: i64,
        pub slots: Vec<ItemSlot>,
    }
}

wire_packet! {
    /// 0 success, -1 inventory full, -2 generic failure.
    pub struct ShopBuyResult(0x00C1) {
        pub shop_id: i32,
        pub product_id: u32,
        pub result: i32,
    }
}

wire_packet! {
    pub struct RotateNotify(0x00F9) {
        pub entity_id: i32,
        pub rotation: f32,
        pub start_time: f32,
        pub stop_time: f32,
    }
}

wire_packet! {
    /// Relays a chat line to zone subscribers.
    pub struct ChatNotify(0x0027) {
        pub channel: u16,
        pub sender: Cp932String,
        pub message: Cp932String,
    }
}
