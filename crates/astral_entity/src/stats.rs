use astral_core::ServerTime;
use astral_data::{
    CorrectTbl, CorrectTblEntry, DefinitionRegistry, NRA_ABSORB, NRA_NULL, NRA_REFLECT,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::error;

use crate::movement::stop_motion;
use crate::{
    ActiveEntity, EntityBacking, EntityState, ENTITY_CALC_SKILL, ENTITY_CALC_STAT_LOCAL,
    ENTITY_CALC_STAT_WORLD,
};

/// Durable base stats shared by every entity variant.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct CoreStats {
    pub level: i8,
    pub hp: i16,
    pub mp: i16,
    pub xp: i64,
    pub str_: i16,
    pub magic: i16,
    pub vit: i16,
    pub int: i16,
    pub speed: i16,
    pub luck: i16,
}

/// Outcome of [`ActiveEntity::set_hp_mp`].
///
/// When overflow is disallowed `hp_adjusted`/`mp_adjusted` are the literal
/// post-clamp deltas; with overflow allowed they echo the raw inputs. The
/// `changed` flag means "HP crossed zero in either direction" when both
/// `adjust` and `can_overflow` are set, and "a value changed" otherwise.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct HpMpResult {
    pub changed: bool,
    pub hp_adjusted: i16,
    pub mp_adjusted: i16,
}

type StatMap = FxHashMap<CorrectTbl, i16>;

fn stat(stats: &StatMap, id: CorrectTbl) -> i16 {
    stats.get(&id).copied().unwrap_or(0)
}

impl ActiveEntity {
    /// Applies an HP/MP change with the standard clamping rules.
    ///
    /// With `adjust` the inputs are deltas; otherwise they are explicit
    /// values and a negative input leaves that channel untouched. Without
    /// `can_overflow` a live entity cannot be dropped to zero (it floors at
    /// 1) and a dead one cannot be raised above zero. Returns `None` when
    /// no durable record is bound or both inputs are the skip sentinel.
    pub fn set_hp_mp(
        &self,
        hp: i16,
        mp: i16,
        adjust: bool,
        can_overflow: bool,
        now: ServerTime,
    ) -> Option<HpMpResult> {
        let mut state = self.lock();
        if state.backing.is_none() || (!adjust && hp < 0 && mp < 0) {
            return None;
        }

        let max_hp = stat(&state.correct_values, CorrectTbl::HpMax);
        let max_mp = stat(&state.correct_values, CorrectTbl::MpMax);
        let (cur_hp, cur_mp) = {
            let core = state.backing.as_ref().expect("checked above").core();
            (core.hp, core.mp)
        };

        let mut result = HpMpResult::default();
        if can_overflow {
            // Report the raw amounts rather than what was actually applied.
            result.hp_adjusted = hp;
            result.mp_adjusted = mp;
        }

        let mut hp = i32::from(hp);
        let mut mp = i32::from(mp);
        if adjust {
            hp += i32::from(cur_hp);
            mp += i32::from(cur_mp);

            if !can_overflow {
                if cur_hp > 0 && hp <= 0 {
                    hp = 1;
                } else if !state.alive && hp > 0 {
                    hp = 0;
                }
            }

            hp = hp.max(0);
            mp = mp.max(0);
        }

        let return_damaged = !adjust || !can_overflow;
        let mut changed = false;

        if hp >= 0 {
            let new_hp = (hp.min(i32::from(max_hp))) as i16;

            if cur_hp > 0 && new_hp == 0 {
                state.alive = false;
                stop_motion(&mut state.motion, now);
                changed = !return_damaged;
            } else if cur_hp == 0 && new_hp > 0 {
                state.alive = true;
                changed = !return_damaged;
            }

            changed |= return_damaged && new_hp != cur_hp;

            if !can_overflow {
                result.hp_adjusted = new_hp - cur_hp;
            }

            state.backing.as_mut().expect("checked above").core_mut().hp = new_hp;
        }

        if mp >= 0 {
            let new_mp = (mp.min(i32::from(max_mp))) as i16;
            changed |= return_damaged && new_mp != cur_mp;

            if !can_overflow {
                result.mp_adjusted = new_mp - cur_mp;
            }

            state.backing.as_mut().expect("checked above").core_mut().mp = new_mp;
        }

        result.changed = changed;
        Some(result)
    }

    /// Recalculates the entity's stat table from its base stats, equipment,
    /// skills, and status effects.
    ///
    /// Returns a bitmask of `ENTITY_CALC_*` flags describing what changed.
    pub fn recalculate_stats(&self, defs: &DefinitionRegistry) -> u8 {
        let mut state = self.lock();

        match state.backing.take() {
            Some(EntityBacking::Character(character)) => {
                let flags = recalculate_character(&mut state, defs, &character);
                state.backing = Some(EntityBacking::Character(character));
                flags
            }
            Some(EntityBacking::PartnerDemon(demon)) => {
                state
                    .current_skills
                    .extend(demon.learned_skills.iter().copied().filter(|&s| s != 0));
                let flags = recalculate_demon(&mut state, defs, demon.devil_id, &demon.core);
                state.backing = Some(EntityBacking::PartnerDemon(demon));
                flags
            }
            Some(EntityBacking::Enemy(enemy)) => {
                if !state.initial_calc {
                    seed_enemy_skills(&mut state, defs, enemy.devil_id);
                }
                let flags = recalculate_demon(&mut state, defs, enemy.devil_id, &enemy.core);
                state.backing = Some(EntityBacking::Enemy(enemy));
                flags
            }
            None => {
                // A recalculation before the record is bound has nothing to
                // work from; report no change rather than a stale flag.
                error!(entity = self.id().0, "recalculating stats with no backing record");
                0
            }
        }
    }

    /// Chance to null, reflect, or absorb the given affinity.
    pub fn nra_chance(&self, nra_idx: u8, table: CorrectTbl) -> i16 {
        let state = self.lock();
        let map = match nra_idx {
            NRA_NULL => &state.null_map,
            NRA_REFLECT => &state.reflect_map,
            NRA_ABSORB => &state.absorb_map,
            _ => return 0,
        };
        map.get(&table).copied().unwrap_or(0)
    }

    /// Toggles a switch skill. Returns false if the entity does not
    /// currently know the skill.
    pub fn set_switch_skill_active(&self, skill_id: u32, active: bool) -> bool {
        let mut state = self.lock();
        if active {
            if !state.current_skills.contains(&skill_id) {
                return false;
            }
            state.active_switch_skills.insert(skill_id);
        } else {
            state.active_switch_skills.remove(&skill_id);
        }
        true
    }

    pub fn current_skills(&self) -> Vec<u32> {
        let state = self.lock();
        let mut skills: Vec<u32> = state.current_skills.iter().copied().collect();
        skills.sort_unstable();
        skills
    }
}

fn recalculate_character(
    state: &mut EntityState,
    defs: &DefinitionRegistry,
    character: &crate::CharacterBacking,
) -> u8 {
    // Rebuild the skill set: learned skills plus clan skills, minus switch
    // skills that are no longer available.
    let previous_skills = std::mem::take(&mut state.current_skills);
    state
        .current_skills
        .extend(character.learned_skills.iter().copied());
    state
        .current_skills
        .extend(character.clan_skills.iter().copied());
    remove_inactive_switch_skills(state);

    let skills_changed = previous_skills != state.current_skills;
    let mut result = if skills_changed { ENTITY_CALC_SKILL } else { 0 };

    let mut stats = character_base_stat_map(&character.core);
    if !state.initial_calc {
        state.knockback_resist = f32::from(stat(&stats, CorrectTbl::KnockbackResist));
        state.initial_calc = true;
    }

    // Equipment splits into NRA adjustments and everything else.
    let mut correct_tbls: Vec<CorrectTblEntry> = Vec::new();
    let mut nra_tbls: Vec<CorrectTblEntry> = Vec::new();
    for &item_id in &character.equipped_items {
        let Some(item) = defs.item(item_id) else {
            continue;
        };
        for &entry in &item.correct_tbl {
            if entry.id.is_nra() {
                nra_tbls.push(entry);
            } else {
                correct_tbls.push(entry);
            }
        }
    }

    gather_additional_correct_tbls(state, defs, &mut correct_tbls);

    update_nra_chances(state, &stats, &nra_tbls);
    adjust_stats(state, &correct_tbls, &mut stats, true);
    calculate_dependent_stats(&mut stats, character.core.level, false);
    adjust_stats(state, &correct_tbls, &mut stats, false);

    result |= compare_and_reset_stats(state, &stats);
    result
}

fn recalculate_demon(
    state: &mut EntityState,
    defs: &DefinitionRegistry,
    devil_id: u32,
    core: &CoreStats,
) -> u8 {
    let Some(devil) = defs.devil(devil_id) else {
        error!(devil_id, "recalculating stats for an unknown devil type");
        return 0;
    };

    let mut stats = StatMap::default();
    for (&raw_id, &value) in &devil.battle_correct {
        if let Some(id) = CorrectTbl::from_raw(raw_id) {
            stats.insert(id, value);
        }
    }

    stats.insert(CorrectTbl::Str, core.str_);
    stats.insert(CorrectTbl::Magic, core.magic);
    stats.insert(CorrectTbl::Vit, core.vit);
    stats.insert(CorrectTbl::Int, core.int);
    stats.insert(CorrectTbl::Speed, core.speed);
    stats.insert(CorrectTbl::Luck, core.luck);

    if !state.initial_calc {
        state.knockback_resist = f32::from(stat(&stats, CorrectTbl::KnockbackResist));
        state.initial_calc = true;
    }

    let mut correct_tbls: Vec<CorrectTblEntry> = Vec::new();
    gather_additional_correct_tbls(state, defs, &mut correct_tbls);

    update_nra_chances(state, &stats, &[]);
    adjust_stats(state, &correct_tbls, &mut stats, true);
    calculate_dependent_stats(&mut stats, core.level, true);
    adjust_stats(state, &correct_tbls, &mut stats, false);

    compare_and_reset_stats(state, &stats)
}

fn seed_enemy_skills(state: &mut EntityState, defs: &DefinitionRegistry, devil_id: u32) {
    let Some(devil) = defs.devil(devil_id) else {
        return;
    };

    state.current_skills.clear();
    for skill_set in [&devil.growth.skills, &devil.growth.enemy_only_skills] {
        for &skill_id in skill_set {
            if skill_id != 0 {
                state.current_skills.insert(skill_id);
            }
        }
    }
}

fn remove_inactive_switch_skills(state: &mut EntityState) {
    let current = &state.current_skills;
    state
        .active_switch_skills
        .retain(|skill_id| current.contains(skill_id));
}

/// The base stat table for a character before any adjustment.
pub fn character_base_stat_map(core: &CoreStats) -> FxHashMap<CorrectTbl, i16> {
    let mut stats = FxHashMap::default();
    stats.insert(CorrectTbl::Str, core.str_);
    stats.insert(CorrectTbl::Magic, core.magic);
    stats.insert(CorrectTbl::Vit, core.vit);
    stats.insert(CorrectTbl::Int, core.int);
    stats.insert(CorrectTbl::Speed, core.speed);
    stats.insert(CorrectTbl::Luck, core.luck);
    stats.insert(CorrectTbl::KnockbackResist, 30);
    stats
}

/// Recomputes the stats that derive from the base six and level, between
/// the two adjustment passes.
pub fn calculate_dependent_stats(
    stats: &mut FxHashMap<CorrectTbl, i16>,
    level: i8,
    is_demon: bool,
) {
    let level = i32::from(level);
    let str_ = i32::from(stat(stats, CorrectTbl::Str));
    let magic = i32::from(stat(stats, CorrectTbl::Magic));
    let vit = i32::from(stat(stats, CorrectTbl::Vit));
    let int = i32::from(stat(stats, CorrectTbl::Int));
    let speed = i32::from(stat(stats, CorrectTbl::Speed));

    let (hp_base, mp_base) = if is_demon { (25, 4 * level) } else { (70, 2 * level) };
    let hp_max = hp_base + 3 * level + 2 * vit;
    let mp_max = 10 + mp_base + 2 * int;

    let mut set = |id: CorrectTbl, value: i32| {
        stats.insert(id, value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16);
    };

    set(CorrectTbl::HpMax, hp_max);
    set(CorrectTbl::MpMax, mp_max);
    set(CorrectTbl::Clsr, str_ * 2 + level);
    set(CorrectTbl::Lngr, speed * 2 + level);
    set(CorrectTbl::Spell, magic * 2 + level);
    set(CorrectTbl::Support, int * 2 + level);
    set(CorrectTbl::Pdef, vit * 2 + level);
    set(CorrectTbl::Mdef, magic + int + level);
    set(CorrectTbl::HpRegen, 2 + vit / 10);
    set(CorrectTbl::MpRegen, 2 + int / 10);
}

/// Clamps stats into their legal ranges.
pub fn adjust_stat_bounds(stats: &mut FxHashMap<CorrectTbl, i16>) {
    let clamp = |stats: &mut FxHashMap<CorrectTbl, i16>, id: CorrectTbl, lo: i16, hi: i16| {
        if let Some(value) = stats.get_mut(&id) {
            *value = (*value).clamp(lo, hi);
        }
    };

    for id in [
        CorrectTbl::Str,
        CorrectTbl::Magic,
        CorrectTbl::Vit,
        CorrectTbl::Int,
        CorrectTbl::Speed,
        CorrectTbl::Luck,
    ] {
        clamp(stats, id, 1, 999);
    }

    clamp(stats, CorrectTbl::HpMax, 1, 9999);
    clamp(stats, CorrectTbl::MpMax, 0, 9999);

    for id in [
        CorrectTbl::Clsr,
        CorrectTbl::Lngr,
        CorrectTbl::Spell,
        CorrectTbl::Support,
        CorrectTbl::Pdef,
        CorrectTbl::Mdef,
    ] {
        clamp(stats, id, 0, 9999);
    }

    clamp(stats, CorrectTbl::HpRegen, 0, 999);
    clamp(stats, CorrectTbl::MpRegen, 0, 999);
    clamp(stats, CorrectTbl::KnockbackResist, 0, 999);
}

/// Collects adjustments from skills and status effects, then sorts the
/// whole list: pin-to-zero percents first, other percents next, flat
/// numerics last.
fn gather_additional_correct_tbls(
    state: &EntityState,
    defs: &DefinitionRegistry,
    adjustments: &mut Vec<CorrectTblEntry>,
) {
    for &skill_id in &state.current_skills {
        let Some(skill) = defs.skill(skill_id) else {
            continue;
        };

        let include = match skill.main_category {
            // Passive.
            0 => true,
            // Switch.
            2 => state.active_switch_skills.contains(&skill_id),
            _ => false,
        };

        if include {
            adjustments.extend(skill.correct_tbl.iter().copied());
        }
    }

    for (&effect_type, effect) in &state.status_effects {
        let Some(status) = defs.status(effect_type) else {
            continue;
        };

        let multiplier = if status.basic.stack_type == 2 {
            effect.stack
        } else {
            1
        };
        for _ in 0..multiplier {
            adjustments.extend(status.correct_tbl.iter().copied());
        }
    }

    adjustments.sort_by_key(|entry| {
        if entry.kind == 1 {
            if entry.value == 0 {
                0
            } else {
                1
            }
        } else {
            2
        }
    });
}

/// Applies adjustments to either the base stats (`base_mode`) or the
/// calculated stats. NRA entries route into the chance maps instead.
fn adjust_stats(
    state: &mut EntityState,
    adjustments: &[CorrectTblEntry],
    stats: &mut StatMap,
    base_mode: bool,
) {
    let mut removed: FxHashSet<CorrectTbl> = FxHashSet::default();

    for entry in adjustments {
        let id = entry.id;

        // Only adjust base or calculated stats depending on the pass.
        if base_mode != id.is_base_stat() {
            continue;
        }

        // A value pinned to 0% stays there.
        if removed.contains(&id) {
            continue;
        }

        if id.is_nra() {
            if entry.kind == 0 {
                // The NRA chance becomes 100% and cannot be reduced.
                let map = match entry.value as u8 {
                    NRA_NULL => &mut state.null_map,
                    NRA_REFLECT => &mut state.reflect_map,
                    NRA_ABSORB => &mut state.absorb_map,
                    _ => continue,
                };
                removed.insert(id);
                map.insert(id, 100);
            } else {
                // Other kinds are the NRA index shifted by 2, adding the
                // value to the corresponding map.
                let map = match entry.kind {
                    k if k == NRA_NULL + 2 => &mut state.null_map,
                    k if k == NRA_REFLECT + 2 => &mut state.reflect_map,
                    k if k == NRA_ABSORB + 2 => &mut state.absorb_map,
                    _ => continue,
                };
                *map.entry(id).or_insert(0) += entry.value;
            }
        } else {
            match entry.kind {
                1 => {
                    if entry.value == 0 {
                        removed.insert(id);
                        stats.insert(id, 0);
                    } else {
                        let s = i32::from(stat(stats, id));
                        let adjusted = s + (s * i32::from(entry.value)) / 100;
                        stats.insert(
                            id,
                            adjusted.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
                        );
                    }
                }
                0 => {
                    let s = i32::from(stat(stats, id)) + i32::from(entry.value);
                    stats.insert(id, s.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16);
                }
                _ => {}
            }
        }
    }

    adjust_stat_bounds(stats);
}

/// Rebuilds the NRA chance maps from base values and equipment.
///
/// Natural NRA packs the index into the ones digit and the chance into the
/// remaining digits. Equipment entries use the NRA index as the kind and
/// add their value.
fn update_nra_chances(state: &mut EntityState, stats: &StatMap, adjustments: &[CorrectTblEntry]) {
    state.null_map.clear();
    state.reflect_map.clear();
    state.absorb_map.clear();

    for id in CorrectTbl::ALL {
        if !id.is_nra() {
            continue;
        }
        let val = stat(stats, id);
        if val <= 0 {
            continue;
        }

        let nra_idx = (val % 10) as u8;
        let chance = val / 10;
        let map = match nra_idx {
            NRA_NULL => &mut state.null_map,
            NRA_REFLECT => &mut state.reflect_map,
            NRA_ABSORB => &mut state.absorb_map,
            _ => continue,
        };
        map.insert(id, chance);
    }

    for entry in adjustments {
        let map = match entry.kind {
            k if k == NRA_NULL => &mut state.null_map,
            k if k == NRA_REFLECT => &mut state.reflect_map,
            k if k == NRA_ABSORB => &mut state.absorb_map,
            _ => continue,
        };
        *map.entry(entry.id).or_insert(0) += entry.value;
    }
}

/// Writes the calculated stats back, reporting what kind of change
/// resulted.
fn compare_and_reset_stats(state: &mut EntityState, stats: &StatMap) -> u8 {
    let Some(backing) = state.backing.as_ref() else {
        return 0;
    };
    let core = backing.core();

    let new_max_hp = stat(stats, CorrectTbl::HpMax);
    let new_max_mp = stat(stats, CorrectTbl::MpMax);
    let hp = core.hp.min(new_max_hp);
    let mp = core.mp.min(new_max_mp);

    let old = &state.correct_values;
    let result = if hp != core.hp
        || mp != core.mp
        || stat(old, CorrectTbl::HpMax) != new_max_hp
        || stat(old, CorrectTbl::MpMax) != new_max_mp
    {
        ENTITY_CALC_STAT_WORLD | ENTITY_CALC_STAT_LOCAL
    } else {
        let locally_visible = [
            CorrectTbl::Str,
            CorrectTbl::Magic,
            CorrectTbl::Vit,
            CorrectTbl::Int,
            CorrectTbl::Speed,
            CorrectTbl::Luck,
            CorrectTbl::Clsr,
            CorrectTbl::Lngr,
            CorrectTbl::Spell,
            CorrectTbl::Support,
            CorrectTbl::Pdef,
            CorrectTbl::Mdef,
        ];
        if locally_visible
            .iter()
            .any(|&id| stat(old, id) != stat(stats, id))
        {
            ENTITY_CALC_STAT_LOCAL
        } else {
            0
        }
    };

    state.correct_values = stats.clone();
    let core = state.backing.as_mut().expect("checked above").core_mut();
    core.hp = hp;
    core.mp = mp;

    result
}

#[cfg(test)]
mod tests {
    use astral_core::EntityId;
    use astral_data::{DefinitionRegistryBuilder, ItemData, SkillData};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{CharacterBacking, EntityKind};

    fn character_entity(hp: i16) -> ActiveEntity {
        let e = ActiveEntity::new(EntityId(1), EntityKind::Character);
        e.set_backing(
            EntityBacking::Character(CharacterBacking {
                core: CoreStats {
                    level: 10,
                    hp,
                    mp: 30,
                    str_: 20,
                    magic: 12,
                    vit: 15,
                    int: 10,
                    speed: 14,
                    luck: 8,
                    ..Default::default()
                },
                ..Default::default()
            }),
            vec![],
        );
        // Give the clamp logic a real ceiling.
        e.lock().correct_values.insert(CorrectTbl::HpMax, 100);
        e.lock().correct_values.insert(CorrectTbl::MpMax, 100);
        e
    }

    #[test]
    fn live_entity_floors_at_one_hp() {
        let e = character_entity(1);
        let r = e
            .set_hp_mp(-5, 0, true, false, ServerTime(0))
            .expect("applies");

        assert_eq!(e.hp_mp().0, 1);
        assert_eq!(r.hp_adjusted, 0);
        assert!(!r.changed);
        assert!(e.is_alive());
    }

    #[test]
    fn full_damage_leaves_one_hp() {
        let h = 57;
        let e = character_entity(h);
        let r = e
            .set_hp_mp(-h, 0, true, false, ServerTime(0))
            .expect("applies");

        assert_eq!(e.hp_mp().0, 1);
        assert_eq!(r.hp_adjusted, -(h - 1));
        assert!(e.is_alive());
    }

    #[test]
    fn overflow_kills_and_stops() {
        let e = character_entity(40);
        e.move_to(100.0, 0.0, ServerTime(0));

        let r = e
            .set_hp_mp(-60, 0, true, true, ServerTime(100))
            .expect("applies");

        assert!(!e.is_alive());
        assert_eq!(e.hp_mp().0, 0);
        // Raw input echoed when overflow is allowed.
        assert_eq!(r.hp_adjusted, -60);
        // Death crossed zero.
        assert!(r.changed);
        assert!(!e.is_moving());
    }

    #[test]
    fn dead_entity_cannot_be_healed_without_overflow() {
        let e = character_entity(10);
        e.set_hp_mp(-20, 0, true, true, ServerTime(0));
        assert!(!e.is_alive());

        let r = e
            .set_hp_mp(50, 0, true, false, ServerTime(1))
            .expect("applies");
        assert_eq!(e.hp_mp().0, 0);
        assert_eq!(r.hp_adjusted, 0);
        assert!(!e.is_alive());

        // With overflow permission the revive goes through.
        e.set_hp_mp(50, 0, true, true, ServerTime(2));
        assert!(e.is_alive());
        assert_eq!(e.hp_mp().0, 50);
    }

    #[test]
    fn explicit_negative_is_a_skip_sentinel() {
        let e = character_entity(40);
        let r = e
            .set_hp_mp(-1, 25, false, false, ServerTime(0))
            .expect("mp applies");

        assert_eq!(e.hp_mp(), (40, 25));
        assert_eq!(r.hp_adjusted, 0);
        assert_eq!(r.mp_adjusted, -5);

        assert!(e.set_hp_mp(-1, -1, false, false, ServerTime(1)).is_none());
    }

    #[test]
    fn recalculation_computes_dependent_stats() {
        let defs = DefinitionRegistryBuilder::default().build();
        let e = character_entity(40);

        let flags = e.recalculate_stats(&defs);
        // First calc always reports a change.
        assert_ne!(flags & (ENTITY_CALC_STAT_LOCAL | ENTITY_CALC_STAT_WORLD), 0);

        // level 10, vit 15: 70 + 30 + 30.
        assert_eq!(e.max_hp(), 130);
        // 10 + 20 + 20.
        assert_eq!(e.max_mp(), 50);
        assert_eq!(e.correct_value(CorrectTbl::Clsr), 50);

        // A second calc with nothing changed reports nothing.
        assert_eq!(e.recalculate_stats(&defs), 0);
    }

    #[test]
    fn equipment_adjustments_apply_in_sorted_order() {
        // +50% STR percent and +10 flat; flat applies after percent.
        let item = ItemData {
            id: 500,
            name: "Charm".into(),
            correct_tbl: vec![
                CorrectTblEntry::numeric(CorrectTbl::Str, 10),
                CorrectTblEntry::percent(CorrectTbl::Str, 50),
            ],
            ..Default::default()
        };
        let defs = DefinitionRegistryBuilder::default().items([item]).build();

        let e = ActiveEntity::new(EntityId(2), EntityKind::Character);
        e.set_backing(
            EntityBacking::Character(CharacterBacking {
                core: CoreStats {
                    level: 1,
                    hp: 10,
                    mp: 10,
                    str_: 20,
                    vit: 10,
                    int: 10,
                    ..Default::default()
                },
                equipped_items: vec![500],
                ..Default::default()
            }),
            vec![],
        );

        e.recalculate_stats(&defs);
        // 20 * 1.5 = 30, then +10.
        assert_eq!(e.correct_value(CorrectTbl::Str), 40);
    }

    #[test]
    fn natural_nra_decodes_ones_digit() {
        let devil = astral_data::DevilData {
            id: 900,
            name: "Lilim".into(),
            race_id: 1,
            base_level: 5,
            // 152 = 15% chance, index 2 (reflect).
            battle_correct: [(CorrectTbl::NraFire as u8, 152)].into_iter().collect(),
            ..Default::default()
        };
        let defs = DefinitionRegistryBuilder::default().devils([devil]).build();

        let e = ActiveEntity::new(EntityId(3), EntityKind::Enemy);
        e.set_backing(
            EntityBacking::Enemy(crate::EnemyBacking {
                devil_id: 900,
                core: CoreStats {
                    level: 5,
                    hp: 50,
                    mp: 10,
                    str_: 10,
                    vit: 10,
                    ..Default::default()
                },
            }),
            vec![],
        );

        e.recalculate_stats(&defs);
        assert_eq!(e.nra_chance(NRA_REFLECT, CorrectTbl::NraFire), 15);
        assert_eq!(e.nra_chance(NRA_NULL, CorrectTbl::NraFire), 0);
    }

    #[test]
    fn switch_skill_changes_skill_flag() {
        let skill = SkillData {
            id: 7000,
            name: "War Stance".into(),
            main_category: 2,
            correct_tbl: vec![CorrectTblEntry::numeric(CorrectTbl::Str, 5)],
            ..Default::default()
        };
        let defs = DefinitionRegistryBuilder::default().skills([skill]).build();

        let e = ActiveEntity::new(EntityId(4), EntityKind::Character);
        e.set_backing(
            EntityBacking::Character(CharacterBacking {
                core: CoreStats {
                    level: 1,
                    hp: 10,
                    mp: 10,
                    str_: 10,
                    vit: 10,
                    int: 10,
                    ..Default::default()
                },
                learned_skills: vec![7000],
                ..Default::default()
            }),
            vec![],
        );

        let flags = e.recalculate_stats(&defs);
        assert_ne!(flags & ENTITY_CALC_SKILL, 0);
        let base_str = e.correct_value(CorrectTbl::Str);

        // Switch off: no stat contribution.
        assert_eq!(base_str, 10);

        assert!(e.set_switch_skill_active(7000, true));
        e.recalculate_stats(&defs);
        assert_eq!(e.correct_value(CorrectTbl::Str), base_str + 5);

        // Unknown skills cannot be switched on.
        assert!(!e.set_switch_skill_active(9999, true));
    }
}
