#![doc = include_str!("../README.md")]

mod knockback;
mod movement;
mod status;
mod stats;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Weak;

use astral_core::{EntityId, ServerTime};
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

pub use movement::correct_rotation;
pub use status::{EffectTickResult, StatusApplication, StatusEffect};
pub use stats::{
    adjust_stat_bounds, calculate_dependent_stats, character_base_stat_map, CoreStats, HpMpResult,
};

use astral_data::CorrectTbl;

/// Effect cancelled upon logout.
pub const EFFECT_CANCEL_LOGOUT: u8 = 0x01;
/// Effect cancelled upon leaving a zone.
pub const EFFECT_CANCEL_ZONEOUT: u8 = 0x04;
/// Effect cancelled upon death.
pub const EFFECT_CANCEL_DEATH: u8 = 0x08;
/// Effect cancelled upon being hit.
pub const EFFECT_CANCEL_HIT: u8 = 0x10;
/// Effect cancelled upon receiving any damage.
pub const EFFECT_CANCEL_DAMAGE: u8 = 0x20;
/// Effect cancelled upon being knocked back.
pub const EFFECT_CANCEL_KNOCKBACK: u8 = 0x40;
/// Effect cancelled upon performing a skill.
pub const EFFECT_CANCEL_SKILL: u8 = 0x80;

/// Recalculation resulted in a locally visible stat change.
pub const ENTITY_CALC_STAT_LOCAL: u8 = 0x01;
/// Recalculation resulted in a stat change visible to the world.
pub const ENTITY_CALC_STAT_WORLD: u8 = 0x02;
/// Recalculation resulted in a modified skill set (characters only).
pub const ENTITY_CALC_SKILL: u8 = 0x04;

/// LNC alignment representation.
pub const LNC_LAW: u8 = 0;
pub const LNC_NEUTRAL: u8 = 2;
pub const LNC_CHAOS: u8 = 4;

/// Which logical variant an active entity is.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EntityKind {
    Character,
    PartnerDemon,
    Enemy,
}

impl EntityKind {
    pub fn is_player_faction(self) -> bool {
        matches!(self, Self::Character | Self::PartnerDemon)
    }
}

/// Durable character fields the entity layer reads during recalculation.
#[derive(Clone, Debug, Default)]
pub struct CharacterBacking {
    pub uuid: Uuid,
    pub name: String,
    pub core: CoreStats,
    pub lnc: i16,
    pub learned_skills: Vec<u32>,
    /// Clan-granted skills, already resolved for the clan's level.
    pub clan_skills: Vec<u32>,
    /// Equipped item definition IDs.
    pub equipped_items: Vec<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct DemonBacking {
    pub uuid: Uuid,
    pub devil_id: u32,
    pub core: CoreStats,
    pub learned_skills: Vec<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct EnemyBacking {
    pub devil_id: u32,
    pub core: CoreStats,
}

/// The durable record behind an active entity.
#[derive(Clone, Debug)]
pub enum EntityBacking {
    Character(CharacterBacking),
    PartnerDemon(DemonBacking),
    Enemy(EnemyBacking),
}

impl EntityBacking {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Character(_) => EntityKind::Character,
            Self::PartnerDemon(_) => EntityKind::PartnerDemon,
            Self::Enemy(_) => EntityKind::Enemy,
        }
    }

    pub fn core(&self) -> &CoreStats {
        match self {
            Self::Character(c) => &c.core,
            Self::PartnerDemon(d) => &d.core,
            Self::Enemy(e) => &e.core,
        }
    }

    pub fn core_mut(&mut self) -> &mut CoreStats {
        match self {
            Self::Character(c) => &mut c.core,
            Self::PartnerDemon(d) => &mut d.core,
            Self::Enemy(e) => &mut e.core,
        }
    }

    /// Entity UUID, nil for enemies which have no durable record.
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Character(c) => c.uuid,
            Self::PartnerDemon(d) => d.uuid,
            Self::Enemy(_) => Uuid::nil(),
        }
    }
}

/// Receives an entity's earliest pending effect time.
///
/// Implemented by the zone instance; the entity only holds a weak handle so
/// ownership keeps flowing zone -> entity.
pub trait EffectTimeSink: Send + Sync {
    fn set_next_status_effect_time(&self, time: u32, entity_id: EntityId);
}

/// Interpolation endpoints: where the entity started and where it is going.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Motion {
    pub current_x: f32,
    pub current_y: f32,
    pub current_rotation: f32,
    pub origin_x: f32,
    pub origin_y: f32,
    pub origin_rotation: f32,
    pub origin_ticks: ServerTime,
    pub destination_x: f32,
    pub destination_y: f32,
    pub destination_rotation: f32,
    pub destination_ticks: ServerTime,
}

#[derive(Debug, Default)]
pub(crate) struct EntityState {
    pub backing: Option<EntityBacking>,
    pub motion: Motion,
    pub last_refresh: ServerTime,
    pub knockback_resist: f32,
    /// Zero means "fully regenerated, no countdown in progress".
    pub knockback_ticks: ServerTime,
    pub alive: bool,
    pub effects_active: bool,
    pub initial_calc: bool,
    /// Calculated correct-table values after the last recalculation.
    pub correct_values: FxHashMap<CorrectTbl, i16>,
    pub status_effects: FxHashMap<u32, StatusEffect>,
    /// Active effects dealing time damage, for quick access.
    pub time_damage_effects: BTreeSet<u32>,
    /// Cancel flag -> effects terminated by it, for quick access.
    pub cancel_conditions: FxHashMap<u8, FxHashSet<u32>>,
    /// System times mapped to the events due then. Keys 1/2/3 are the
    /// added/updated/removed sentinels, key 0 never appears (regen is
    /// scheduled under its absolute time with member 0).
    pub next_effect_times: BTreeMap<u32, BTreeSet<u32>>,
    pub opponent_ids: BTreeSet<EntityId>,
    pub null_map: FxHashMap<CorrectTbl, i16>,
    pub reflect_map: FxHashMap<CorrectTbl, i16>,
    pub absorb_map: FxHashMap<CorrectTbl, i16>,
    pub current_skills: FxHashSet<u32>,
    pub active_switch_skills: FxHashSet<u32>,
    pub zone_sink: Option<Weak<dyn EffectTimeSink>>,
}

/// An active entity on the channel server.
///
/// Everything mutable is behind one mutex held for microseconds at a time.
/// Methods take `&self`; sharing an entity between workers is an
/// `Arc<ActiveEntity>`.
pub struct ActiveEntity {
    id: EntityId,
    kind: EntityKind,
    pub(crate) state: Mutex<EntityState>,
}

impl std::fmt::Debug for ActiveEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveEntity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl ActiveEntity {
    pub fn new(id: EntityId, kind: EntityKind) -> Self {
        Self {
            id,
            kind,
            state: Mutex::new(EntityState {
                alive: true,
                ..Default::default()
            }),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Binds the durable record. Status effects present on the record are
    /// installed in their stored (deactivated) form; knockback is reset and
    /// corrected on the next refresh.
    pub fn set_backing(&self, backing: EntityBacking, effects: Vec<StatusEffect>) {
        debug_assert_eq!(backing.kind(), self.kind);

        let mut state = self.state.lock();
        state.alive = backing.core().hp > 0;
        state.backing = Some(backing);
        state.knockback_resist = 0.0;
        state.knockback_ticks = ServerTime::ZERO;
        state.initial_calc = false;

        state.status_effects.clear();
        state.time_damage_effects.clear();
        state.cancel_conditions.clear();
        state.next_effect_times.clear();
        for effect in effects {
            state.status_effects.insert(effect.effect_id, effect);
        }
        Self::register_next_effect_time(self.id, &mut state);
    }

    /// True once a durable record is bound.
    pub fn ready(&self) -> bool {
        self.state.lock().backing.is_some()
    }

    pub fn uuid(&self) -> Uuid {
        self.state
            .lock()
            .backing
            .as_ref()
            .map(EntityBacking::uuid)
            .unwrap_or_else(Uuid::nil)
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    pub fn with_backing<R>(&self, f: impl FnOnce(&EntityBacking) -> R) -> Option<R> {
        self.state.lock().backing.as_ref().map(f)
    }

    /// Mutates the durable record in place, e.g. for an equipment change.
    /// Callers follow up with `recalculate_stats`.
    pub fn update_backing<R>(&self, f: impl FnOnce(&mut EntityBacking) -> R) -> Option<R> {
        self.state.lock().backing.as_mut().map(f)
    }

    /// The adjusted correct-table value, 0 when never calculated.
    pub fn correct_value(&self, table: CorrectTbl) -> i16 {
        self.state
            .lock()
            .correct_values
            .get(&table)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_hp(&self) -> i16 {
        self.correct_value(CorrectTbl::HpMax)
    }

    pub fn max_mp(&self) -> i16 {
        self.correct_value(CorrectTbl::MpMax)
    }

    pub fn hp_mp(&self) -> (i16, i16) {
        let state = self.state.lock();
        match &state.backing {
            Some(b) => (b.core().hp, b.core().mp),
            None => (0, 0),
        }
    }

    /// Connects or disconnects the zone's effect-time queue. The previous
    /// sink's entry is cleared by the zone itself on leave.
    pub fn set_zone_sink(&self, sink: Option<Weak<dyn EffectTimeSink>>) {
        let mut state = self.state.lock();
        state.zone_sink = sink;
        Self::register_next_effect_time(self.id, &mut state);
    }

    pub fn opponent_ids(&self) -> BTreeSet<EntityId> {
        self.state.lock().opponent_ids.clone()
    }

    pub fn has_opponent(&self, opponent_id: EntityId) -> bool {
        self.state.lock().opponent_ids.contains(&opponent_id)
    }

    /// Adds or removes an opponent, returning the count afterwards. The
    /// caller keeps the relation bidirectional.
    pub fn add_remove_opponent(&self, add: bool, opponent_id: EntityId) -> usize {
        let mut state = self.state.lock();
        if add {
            state.opponent_ids.insert(opponent_id);
        } else {
            state.opponent_ids.remove(&opponent_id);
        }
        state.opponent_ids.len()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntityState> {
        self.state.lock()
    }
}

/// Maps LNC points to the numeric alignment the client displays.
pub fn calculate_lnc_type(lnc_points: i16) -> u8 {
    if lnc_points >= 5000 {
        LNC_CHAOS
    } else if lnc_points <= -5000 {
        LNC_LAW
    } else {
        LNC_NEUTRAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opponents_count() {
        let e = ActiveEntity::new(EntityId(1), EntityKind::Character);
        assert_eq!(e.add_remove_opponent(true, EntityId(5)), 1);
        assert_eq!(e.add_remove_opponent(true, EntityId(6)), 2);
        assert!(e.has_opponent(EntityId(5)));
        assert_eq!(e.add_remove_opponent(false, EntityId(5)), 1);
        assert!(!e.has_opponent(EntityId(5)));
    }

    #[test]
    fn lnc_thresholds() {
        assert_eq!(calculate_lnc_type(5000), LNC_CHAOS);
        assert_eq!(calculate_lnc_type(-5000), LNC_LAW);
        assert_eq!(calculate_lnc_type(0), LNC_NEUTRAL);
        assert_eq!(calculate_lnc_type(4999), LNC_NEUTRAL);
    }
}
