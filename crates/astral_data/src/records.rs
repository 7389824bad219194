use rustc_hash::FxHashMap;

use crate::tables::CorrectTblEntry;

/// How a status effect's stored duration is interpreted.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum DurationType {
    #[default]
    None,
    /// Relative millisecond countdown, only elapsing while active.
    Ms,
    /// Same storage as `Ms`; applied by set rather than add.
    MsSet,
    /// Hours, converted to an absolute system-second expiration.
    Hour,
    /// Days, converted to an absolute system-second expiration.
    Day,
    DaySet,
}

impl DurationType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Ms),
            2 => Some(Self::MsSet),
            3 => Some(Self::Hour),
            4 => Some(Self::Day),
            5 => Some(Self::DaySet),
            _ => None,
        }
    }

    /// Whether the stored expiration is a relative millisecond countdown.
    pub fn is_relative(self) -> bool {
        matches!(self, Self::Ms | Self::MsSet)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct StatusBasic {
    pub max_stack: u8,
    pub group_id: u32,
    pub group_rank: u8,
    /// 0 add-if-absent, 1 set/add stack, 2 reset-time kaja, 3 full reapply.
    pub application_logic: u8,
    /// 1 = stack scales duration, 2 = stack multiplies correct-table rows.
    pub stack_type: u8,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct StatusCancel {
    pub duration_type: DurationType,
    pub duration: u32,
    /// Bitfield of the `EFFECT_CANCEL_*` event classes.
    pub cancel_types: u8,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct StatusTDamage {
    pub hp_damage: i16,
    pub mp_damage: i16,
}

/// A status-effect definition.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct StatusData {
    pub id: u32,
    pub basic: StatusBasic,
    pub cancel: StatusCancel,
    pub correct_tbl: Vec<CorrectTblEntry>,
    pub t_damage: StatusTDamage,
}

/// A status application carried by a skill definition.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AppliedStatus {
    pub status_id: u32,
    pub stack: u8,
    pub is_replace: bool,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct SkillData {
    pub id: u32,
    pub name: String,
    /// 0 passive, 1 active, 2 switch.
    pub main_category: u8,
    pub hp_cost: u16,
    pub mp_cost: u16,
    pub cooldown_ms: u32,
    pub correct_tbl: Vec<CorrectTblEntry>,
    pub applied_statuses: Vec<AppliedStatus>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ItemData {
    pub id: u32,
    pub name: String,
    /// Equipment slot index; `None` for non-equipment.
    pub equip_slot: Option<u8>,
    pub stack_size: u16,
    pub buy_price: u32,
    pub sell_price: u32,
    pub correct_tbl: Vec<CorrectTblEntry>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DevilGrowth {
    pub skills: Vec<u32>,
    pub enemy_only_skills: Vec<u32>,
}

/// A demon definition, shared by partner demons and enemies.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DevilData {
    pub id: u32,
    pub name: String,
    pub race_id: u8,
    pub base_level: i8,
    pub lnc: i16,
    pub growth: DevilGrowth,
    /// Base correct-table values, indexed by raw table ID.
    pub battle_correct: FxHashMap<u8, i16>,
}

/// A server-side action attached to a spot or trigger.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ServerAction {
    StartEvent { event_id: u32 },
    SetZoneFlag { flag: u32, value: i32 },
    ToggleSpawnGroup { group_id: u32, enable: bool },
}

/// A named rectangular region of a zone.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SpotData {
    pub id: u32,
    pub center_x: f32,
    pub center_y: f32,
    pub span_x: f32,
    pub span_y: f32,
    /// Gates spawn-location groups bound to this spot.
    pub match_spawn: bool,
    pub enter_actions: Vec<ServerAction>,
    pub leave_actions: Vec<ServerAction>,
}

impl SpotData {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        (x - self.center_x).abs() <= self.span_x / 2.0
            && (y - self.center_y).abs() <= self.span_y / 2.0
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct ZoneNpc {
    pub id: u32,
    pub npc_type: u32,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
}

#[derive(Clone, PartialEq, Debug)]
pub struct ZoneObject {
    pub id: u32,
    pub object_type: u32,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub state: u8,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct SpawnLocation {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct SpawnLocationGroup {
    pub id: u32,
    /// Devil definition IDs spawned by this group.
    pub spawn_ids: Vec<u32>,
    pub locations: Vec<SpawnLocation>,
    pub respawn_secs: u32,
    pub max_count: u16,
    /// Spot that must match for the group to be eligible.
    pub spot_id: Option<u32>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct ZoneTrigger {
    pub trigger_type: u8,
    pub value: i32,
    pub actions: Vec<ServerAction>,
}

/// A base zone definition.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ZoneData {
    pub id: u32,
    pub name: String,
    pub global: bool,
    pub dynamic_map_id: u32,
    pub starting_x: f32,
    pub starting_y: f32,
    pub starting_rotation: f32,
    pub npcs: FxHashMap<u32, ZoneNpc>,
    pub objects: FxHashMap<u32, ZoneObject>,
    pub spawn_groups: FxHashMap<u32, SpawnLocationGroup>,
    /// Server-side actions merged onto the dynamic map's spots.
    pub spot_actions: FxHashMap<u32, (Vec<ServerAction>, Vec<ServerAction>)>,
    pub triggers: Vec<ZoneTrigger>,
    pub drop_sets: Vec<u32>,
    pub skill_blacklist: Vec<u32>,
    pub skill_whitelist: Vec<u32>,
}

/// An overlay mutating a base zone without copying it.
///
/// Scalars override only when set; keyed tables union with the partial
/// winning; unkeyed lists concatenate in application order.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ZonePartialData {
    pub id: u32,
    pub auto_apply: bool,
    pub dynamic_map_ids: Vec<u32>,
    pub starting_x: Option<f32>,
    pub starting_y: Option<f32>,
    pub starting_rotation: Option<f32>,
    pub npcs: FxHashMap<u32, ZoneNpc>,
    pub objects: FxHashMap<u32, ZoneObject>,
    pub spawn_groups: FxHashMap<u32, SpawnLocationGroup>,
    pub spot_actions: FxHashMap<u32, (Vec<ServerAction>, Vec<ServerAction>)>,
    pub triggers: Vec<ZoneTrigger>,
    pub drop_sets: Vec<u32>,
    pub skill_blacklist: Vec<u32>,
    pub skill_whitelist: Vec<u32>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ShopProductData {
    pub id: u32,
    pub item_id: u32,
    pub stack: u16,
    pub price: u32,
    /// Purchase uses CP instead of macca when set.
    pub cp_cost: u32,
}

/// Connectivity between zones, used for travel validation.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ZoneRelationData {
    pub id: u32,
    pub connected_zone_ids: Vec<u32>,
}

/// A spatial variant of a logical zone.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DynamicMapData {
    pub id: u32,
    pub zone_id: u32,
    pub spot_file: String,
}
