use std::collections::BTreeSet;

use astral_core::EntityId;
use astral_data::{CorrectTbl, DefinitionRegistry, DurationType, StatusData};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::{ActiveEntity, EntityState};

/// Sentinel keys in the next-effect-time map: effects queued as added,
/// updated, or removed since the last drain.
const QUEUE_ADDED: u32 = 1;
const QUEUE_UPDATED: u32 = 2;
const QUEUE_REMOVED: u32 = 3;

/// Member value marking the natural regen tick inside a time slot.
const REGEN_MARKER: u32 = 0;

/// Seconds between regen / time-damage applications.
const T_DAMAGE_PERIOD: u32 = 10;

/// One status effect on an entity.
///
/// `expiration` is an absolute system second for hour/day effects and a
/// relative millisecond countdown for millisecond effects; which one is in
/// play follows the definition's duration type. Zero means "not yet
/// computed".
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StatusEffect {
    pub effect_id: u32,
    pub stack: u8,
    pub expiration: u32,
}

/// A requested stack and whether it replaces or adds.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct StatusApplication {
    pub stack: u8,
    pub is_replace: bool,
}

/// Everything that fell out of a [`ActiveEntity::pop_effect_ticks`] drain.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct EffectTickResult {
    pub hp_t_damage: i32,
    pub mp_t_damage: i32,
    pub added: BTreeSet<u32>,
    pub updated: BTreeSet<u32>,
    pub removed: BTreeSet<u32>,
}

impl EffectTickResult {
    fn is_empty(&self) -> bool {
        self.hp_t_damage == 0
            && self.mp_t_damage == 0
            && self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
    }
}

/// Positive/negative correct-table entry counts per stat, used for the
/// inverse-cancellation test.
type SignCounts = FxHashMap<CorrectTbl, (u8, u8)>;

fn sign_counts(def: &StatusData) -> Option<SignCounts> {
    if def.correct_tbl.is_empty() {
        return None;
    }

    let mut counts = SignCounts::default();
    for entry in &def.correct_tbl {
        if entry.value == 0 || entry.kind == 1 {
            return None;
        }
        let slot = counts.entry(entry.id).or_insert((0, 0));
        if entry.value > 0 {
            slot.0 += 1;
        } else {
            slot.1 += 1;
        }
    }
    Some(counts)
}

/// True when the per-stat positive counts of one effect exactly mirror the
/// negative counts of the other. The magnitudes do not need to match.
fn is_inverse(a: &SignCounts, b: &SignCounts) -> bool {
    a.len() == b.len()
        && a.iter().all(|(id, &(pos, neg))| {
            b.get(id)
                .is_some_and(|&(b_pos, b_neg)| b_pos == neg && b_neg == pos)
        })
}

impl ActiveEntity {
    /// Current status effects by type ID.
    pub fn status_effects(&self) -> Vec<StatusEffect> {
        self.lock().status_effects.values().cloned().collect()
    }

    pub fn has_status_effect(&self, effect_id: u32) -> bool {
        self.lock().status_effects.contains_key(&effect_id)
    }

    /// Adds status effects, honoring the definition's application logic,
    /// group ranking, and inverse cancellation. Returns the effect types
    /// removed as a consequence.
    ///
    /// `now_secs` is the current system second used for absolute
    /// expirations. With `queue_changes` the resulting inserts, updates,
    /// and removes are queued for the next tick drain.
    pub fn add_status_effects(
        &self,
        effects: &FxHashMap<u32, StatusApplication>,
        defs: &DefinitionRegistry,
        now_secs: u32,
        queue_changes: bool,
    ) -> BTreeSet<u32> {
        let mut removes = BTreeSet::new();
        let mut state = self.lock();

        for (&effect_type, application) in effects {
            let Some(def) = defs.status(effect_type) else {
                // Unknown content drop; ignore the request entirely.
                continue;
            };

            let max_stack = def.basic.max_stack;
            let mut stack = application.stack.min(max_stack);
            let is_replace = application.is_replace;

            let mut add = true;
            // The effect to insert or update, and the one displaced by it.
            let mut effect: Option<StatusEffect> = None;
            let mut remove_effect: Option<u32> = None;

            if let Some(existing) = state.status_effects.get(&effect_type).cloned() {
                let mut existing = existing;
                let mut do_replace = is_replace;
                let mut add_stack = false;
                let mut reset_time = false;

                match def.basic.application_logic {
                    0 => {
                        // Add always, replace only if higher or zero (sleep).
                        do_replace = is_replace && (existing.stack < stack || stack == 0);
                    }
                    1 => {
                        // Always set/add stack, reset time only if the stack
                        // represents time.
                        if is_replace {
                            existing.stack = stack;
                            if def.basic.stack_type == 1 {
                                reset_time = true;
                            }
                        } else {
                            add_stack = true;
                        }
                        do_replace = false;
                    }
                    2 => {
                        // Always reset time, add stacks on add (-kaja).
                        add_stack = !is_replace;
                        reset_time = true;
                    }
                    3 => {
                        // Always reapply time and stack (-karn).
                        do_replace = true;
                        reset_time = true;
                    }
                    _ => continue,
                }

                if do_replace {
                    existing.stack = stack;
                } else if add_stack && existing.stack < max_stack {
                    stack = stack.saturating_add(existing.stack);
                    existing.stack = stack.min(max_stack);
                }

                if reset_time {
                    existing.expiration = 0;
                }

                if existing.stack > 0 {
                    effect = Some(existing);
                } else {
                    remove_effect = Some(effect_type);
                }

                add = false;
            } else {
                // Effect is new; group ranking or inverse cancellation may
                // still block or transform the insert.
                let new_counts = sign_counts(def);
                let mut can_cancel = new_counts.is_some();
                let mut inverse_effects: BTreeSet<u32> = BTreeSet::new();

                for (&existing_type, _) in &state.status_effects {
                    let Some(existing_def) = defs.status(existing_type) else {
                        continue;
                    };

                    if def.basic.group_id != 0
                        && existing_def.basic.group_id == def.basic.group_id
                    {
                        if def.basic.group_rank >= existing_def.basic.group_rank {
                            // Replace the lower-ranked effect in the group.
                            remove_effect = Some(existing_type);
                        } else {
                            // A higher rank exists; do not add or replace.
                            add = false;
                        }

                        can_cancel = false;
                        break;
                    }

                    if can_cancel {
                        let Some(new_counts) = new_counts.as_ref() else {
                            continue;
                        };
                        if let Some(existing_counts) = sign_counts(existing_def) {
                            if is_inverse(new_counts, &existing_counts) {
                                inverse_effects.insert(existing_type);
                            }
                        }
                    }
                }

                if can_cancel {
                    if let Some(&inverse_type) = inverse_effects.first() {
                        // Should only ever be one; the lowest ID wins if not.
                        let mut existing = state.status_effects[&inverse_type].clone();
                        if existing.stack == stack {
                            // Both sides cancel out entirely.
                            add = false;
                            remove_effect = Some(inverse_type);
                        } else if existing.stack < stack {
                            // Cancel the old one, add the difference.
                            stack -= existing.stack;
                            add = true;
                            remove_effect = Some(inverse_type);
                        } else {
                            // Reduce the existing stack instead of adding.
                            existing.stack -= stack;
                            add = false;

                            // Reset-time effects refresh whenever touched.
                            if defs
                                .status(inverse_type)
                                .is_some_and(|d| d.basic.application_logic == 2)
                            {
                                existing.expiration = 0;
                            }

                            effect = Some(existing);
                        }
                    }
                }
            }

            if add {
                effect = Some(StatusEffect {
                    effect_id: effect_type,
                    stack,
                    expiration: 0,
                });
            }

            if let Some(effect) = effect.as_mut() {
                if effect.expiration == 0 {
                    effect.expiration = initial_expiration(def, effect.stack, now_secs);
                }
            }

            if let Some(removed_type) = remove_effect {
                removes.insert(removed_type);
                state.status_effects.remove(&removed_type);
                remove_from_indices(&mut state, removed_type);
                if state.effects_active {
                    clear_scheduled_time(&mut state, removed_type);
                    if queue_changes {
                        state
                            .next_effect_times
                            .entry(QUEUE_REMOVED)
                            .or_default()
                            .insert(removed_type);
                    }
                }
            }

            if let Some(effect) = effect {
                let effect_id = effect.effect_id;
                state.status_effects.insert(effect_id, effect);
                if state.effects_active {
                    if add {
                        let effect = state.status_effects[&effect_id].clone();
                        activate_status_effect(&mut state, &effect, def, now_secs);
                    }

                    if queue_changes {
                        let key = if add { QUEUE_ADDED } else { QUEUE_UPDATED };
                        state
                            .next_effect_times
                            .entry(key)
                            .or_default()
                            .insert(effect_id);
                    }
                }
            }
        }

        if state.effects_active {
            Self::register_next_effect_time(self.id(), &mut state);
        }

        removes
    }

    /// Expires effects by type. The removes are queued for the next drain.
    pub fn expire_status_effects(&self, effect_types: &BTreeSet<u32>) {
        let mut state = self.lock();
        let mut any = false;
        for &effect_type in effect_types {
            if state.status_effects.remove(&effect_type).is_none() {
                continue;
            }
            any = true;
            remove_from_indices(&mut state, effect_type);

            if state.effects_active {
                clear_scheduled_time(&mut state, effect_type);
                state
                    .next_effect_times
                    .entry(QUEUE_REMOVED)
                    .or_default()
                    .insert(effect_type);
            }
        }

        if any && state.effects_active {
            Self::register_next_effect_time(self.id(), &mut state);
        }
    }

    /// Expires every effect whose cancel conditions intersect `flags`.
    pub fn cancel_status_effects(&self, cancel_flags: u8) {
        let cancelled: BTreeSet<u32> = {
            let state = self.lock();
            state
                .cancel_conditions
                .iter()
                .filter(|(flag, _)| cancel_flags & **flag != 0)
                .flat_map(|(_, types)| types.iter().copied())
                .collect()
        };

        if !cancelled.is_empty() {
            self.expire_status_effects(&cancelled);
        }
    }

    /// Activates or deactivates the effect machinery for the current zone.
    ///
    /// Activation schedules regen and every effect's wake time and
    /// registers with the zone; deactivation converts absolute times back
    /// into the stored relative countdowns.
    pub fn set_status_effects_active(
        &self,
        activate: bool,
        defs: &DefinitionRegistry,
        now_secs: u32,
    ) {
        let mut state = self.lock();
        if state.effects_active == activate {
            return;
        }

        state.effects_active = activate;
        if activate {
            set_next_effect_time(&mut state, REGEN_MARKER, now_secs + T_DAMAGE_PERIOD);

            let effects: Vec<StatusEffect> = state.status_effects.values().cloned().collect();
            for effect in effects {
                let Some(def) = defs.status(effect.effect_id) else {
                    continue;
                };
                activate_status_effect(&mut state, &effect, def, now_secs);
            }

            Self::register_next_effect_time(self.id(), &mut state);
        } else {
            state.time_damage_effects.clear();
            state.cancel_conditions.clear();

            if let Some(sink) = state.zone_sink.as_ref().and_then(|w| w.upgrade()) {
                sink.set_next_status_effect_time(0, self.id());
            }

            let times: Vec<(u32, BTreeSet<u32>)> = state
                .next_effect_times
                .iter()
                .filter(|(&t, _)| t > QUEUE_REMOVED)
                .map(|(&t, set)| (t, set.clone()))
                .collect();

            for (next_time, effect_types) in times {
                for effect_type in effect_types {
                    if effect_type == REGEN_MARKER {
                        continue;
                    }
                    let Some(effect) = state.status_effects.get(&effect_type).cloned() else {
                        continue;
                    };
                    let exp = current_expiration(&effect, defs, next_time, now_secs);
                    if let Some(stored) = state.status_effects.get_mut(&effect_type) {
                        stored.expiration = exp;
                    }
                }
            }

            // The schedule is rebuilt wholesale on the next activation; a
            // stale wake left here would expire the effect early.
            state.next_effect_times.clear();
        }
    }

    /// Pops every effect event at or before `time`.
    ///
    /// Returns `None` when nothing was due. Otherwise the result carries
    /// accumulated regen and time damage plus the queued added, updated,
    /// and removed effect types. Regen reschedules itself, and the entity's
    /// new earliest time is re-registered with the zone.
    pub fn pop_effect_ticks(
        &self,
        defs: &DefinitionRegistry,
        time: u32,
    ) -> Option<EffectTickResult> {
        let mut result = EffectTickResult::default();
        let mut state = self.lock();

        let mut reregister = false;
        loop {
            let due: Vec<(u32, BTreeSet<u32>)> = state
                .next_effect_times
                .iter()
                .take_while(|(&t, _)| t <= time)
                .map(|(&t, set)| (t, set.clone()))
                .collect();

            if due.is_empty() {
                break;
            }
            reregister = true;

            for (t, _) in &due {
                state.next_effect_times.remove(t);
            }

            for (t, mut set) in due {
                match t {
                    QUEUE_ADDED => {
                        result.added = set;
                        continue;
                    }
                    QUEUE_UPDATED => {
                        result.updated = set;
                        continue;
                    }
                    QUEUE_REMOVED => {
                        result.removed = set;
                        continue;
                    }
                    _ => {}
                }

                if set.remove(&REGEN_MARKER) {
                    // Regen is subtracted from damage; dead entities get
                    // neither regen nor T-damage.
                    if state.alive {
                        let regen_hp = state
                            .correct_values
                            .get(&CorrectTbl::HpRegen)
                            .copied()
                            .unwrap_or(0);
                        let regen_mp = state
                            .correct_values
                            .get(&CorrectTbl::MpRegen)
                            .copied()
                            .unwrap_or(0);
                        result.hp_t_damage -= i32::from(regen_hp);
                        result.mp_t_damage -= i32::from(regen_mp);

                        for &effect_type in &state.time_damage_effects {
                            let Some(def) = defs.status(effect_type) else {
                                continue;
                            };
                            result.hp_t_damage += i32::from(def.t_damage.hp_damage);
                            result.mp_t_damage += i32::from(def.t_damage.mp_damage);
                        }
                    }

                    set_next_effect_time(&mut state, REGEN_MARKER, t + T_DAMAGE_PERIOD);
                }

                for effect_type in set {
                    // The effect's moment has come; it is finished.
                    state.status_effects.remove(&effect_type);
                    remove_from_indices(&mut state, effect_type);
                    result.removed.insert(effect_type);
                }
            }
        }

        if reregister {
            Self::register_next_effect_time(self.id(), &mut state);
        }

        (!result.is_empty()).then_some(result)
    }

    /// Snapshot of current effects with expirations relative to `now_secs`
    /// for countdown effects.
    pub fn current_status_effect_states(
        &self,
        defs: &DefinitionRegistry,
        now_secs: u32,
    ) -> Vec<(StatusEffect, u32)> {
        let state = self.lock();

        if !state.effects_active {
            return state
                .status_effects
                .values()
                .map(|e| (e.clone(), e.expiration))
                .collect();
        }

        let mut next_times: FxHashMap<u32, u32> = FxHashMap::default();
        for (&t, set) in &state.next_effect_times {
            if t <= QUEUE_REMOVED {
                continue;
            }
            for &effect_type in set {
                next_times.insert(effect_type, t);
            }
        }

        state
            .status_effects
            .values()
            .map(|e| {
                let exp = match next_times.get(&e.effect_id) {
                    Some(&next_time) => current_expiration(e, defs, next_time, now_secs),
                    None => e.expiration,
                };
                (e.clone(), exp)
            })
            .collect()
    }

    /// Registers the earliest pending time with the current zone. A pending
    /// sentinel key forces an immediate wake.
    pub(crate) fn register_next_effect_time(id: EntityId, state: &mut EntityState) {
        if !state.effects_active {
            return;
        }
        let Some(sink) = state.zone_sink.as_ref().and_then(|w| w.upgrade()) else {
            return;
        };

        let next = state
            .next_effect_times
            .keys()
            .next()
            .copied()
            .unwrap_or(0);
        sink.set_next_status_effect_time(next, id);
    }
}

/// Computes the stored expiration for a freshly applied effect.
fn initial_expiration(def: &StatusData, stack: u8, now_secs: u32) -> u32 {
    let (mut expiration, absolute) = match def.cancel.duration_type {
        // Milliseconds are stored as a relative countdown.
        DurationType::Ms | DurationType::MsSet => (def.cancel.duration, false),
        DurationType::Hour => (def.cancel.duration * 3600, true),
        DurationType::Day | DurationType::DaySet => (def.cancel.duration * 24 * 3600, true),
        DurationType::None => (0, false),
    };

    if def.basic.stack_type == 1 {
        // Stack scales time.
        expiration *= u32::from(stack);
    }

    if absolute {
        expiration += now_secs;
    }

    expiration
}

/// Converts an active effect's scheduled wake back into its stored form.
fn current_expiration(
    effect: &StatusEffect,
    defs: &DefinitionRegistry,
    next_time: u32,
    now_secs: u32,
) -> u32 {
    if effect.expiration == 0 {
        return 0;
    }
    let Some(def) = defs.status(effect.effect_id) else {
        return effect.expiration;
    };

    match def.cancel.duration_type {
        DurationType::Ms | DurationType::MsSet => {
            // Convert the remaining seconds back to milliseconds.
            let exp = next_time.saturating_sub(now_secs) * 1000;
            if effect.expiration < exp {
                0
            } else {
                exp
            }
        }
        // Time is absolute; nothing to do.
        _ => effect.expiration,
    }
}

fn activate_status_effect(
    state: &mut EntityState,
    effect: &StatusEffect,
    def: &StatusData,
    now_secs: u32,
) {
    let effect_type = effect.effect_id;

    let wake = match def.cancel.duration_type {
        DurationType::Ms | DurationType::MsSet => {
            // The countdown elapses only while active; schedule from now.
            now_secs + effect.expiration / 1000
        }
        _ => effect.expiration,
    };
    state
        .next_effect_times
        .entry(wake)
        .or_default()
        .insert(effect_type);

    let mut bit: u8 = 0x01;
    loop {
        if def.cancel.cancel_types & bit != 0 {
            state
                .cancel_conditions
                .entry(bit)
                .or_default()
                .insert(effect_type);
        }
        if bit == 0x80 {
            break;
        }
        bit <<= 1;
    }

    if def.t_damage.hp_damage != 0 || def.t_damage.mp_damage != 0 {
        // Skip effects whose damage applies as part of the skill only.
        if !(def.basic.stack_type == 1 && def.basic.application_logic == 0) {
            state.time_damage_effects.insert(effect_type);
        }
    }
}

/// Removes an effect from the quick-access indices.
fn remove_from_indices(state: &mut EntityState, effect_type: u32) {
    state.time_damage_effects.remove(&effect_type);
    for types in state.cancel_conditions.values_mut() {
        types.remove(&effect_type);
    }
}

/// Unschedules an effect's pending wake time. With `time == 0` the entry is
/// removed; an effect that is already scheduled keeps its slot otherwise.
fn set_next_effect_time(state: &mut EntityState, effect_type: u32, time: u32) {
    let mut found_at: Option<u32> = None;
    for (&t, set) in &state.next_effect_times {
        if t <= QUEUE_REMOVED {
            continue;
        }
        if set.contains(&effect_type) {
            found_at = Some(t);
            break;
        }
    }

    if let Some(t) = found_at {
        if time == 0 {
            let set = state.next_effect_times.get_mut(&t).expect("key vanished");
            set.remove(&effect_type);
            if set.is_empty() {
                state.next_effect_times.remove(&t);
            }
        }
        return;
    }

    if time != 0 {
        state
            .next_effect_times
            .entry(time)
            .or_default()
            .insert(effect_type);
    } else if effect_type != REGEN_MARKER {
        warn!(effect_type, "tried to unschedule an effect that was not scheduled");
    }
}

fn clear_scheduled_time(state: &mut EntityState, effect_type: u32) {
    set_next_effect_time(state, effect_type, 0);
}

#[cfg(test)]
mod tests {
    use astral_data::{
        CorrectTblEntry, DefinitionRegistryBuilder, StatusBasic, StatusCancel, StatusTDamage,
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{EntityKind, EFFECT_CANCEL_DEATH, EFFECT_CANCEL_ZONEOUT};

    struct StatusFixture {
        id: u32,
        group_id: u32,
        group_rank: u8,
        application_logic: u8,
        stack_type: u8,
        max_stack: u8,
        duration_type: DurationType,
        duration: u32,
        cancel_types: u8,
        correct_tbl: Vec<CorrectTblEntry>,
        t_damage: (i16, i16),
    }

    impl StatusFixture {
        fn new(id: u32) -> Self {
            Self {
                id,
                group_id: 0,
                group_rank: 0,
                application_logic: 0,
                stack_type: 0,
                max_stack: 8,
                duration_type: DurationType::Hour,
                duration: 1,
                cancel_types: 0,
                correct_tbl: vec![],
                t_damage: (0, 0),
            }
        }

        fn build(self) -> StatusData {
            StatusData {
                id: self.id,
                basic: StatusBasic {
                    max_stack: self.max_stack,
                    group_id: self.group_id,
                    group_rank: self.group_rank,
                    application_logic: self.application_logic,
                    stack_type: self.stack_type,
                },
                cancel: StatusCancel {
                    duration_type: self.duration_type,
                    duration: self.duration,
                    cancel_types: self.cancel_types,
                },
                correct_tbl: self.correct_tbl,
                t_damage: StatusTDamage {
                    hp_damage: self.t_damage.0,
                    mp_damage: self.t_damage.1,
                },
            }
        }
    }

    fn registry(specs: Vec<StatusFixture>) -> DefinitionRegistry {
        DefinitionRegistryBuilder::default()
            .statuses(specs.into_iter().map(StatusFixture::build))
            .build()
    }

    fn entity() -> ActiveEntity {
        ActiveEntity::new(EntityId(1), EntityKind::Character)
    }

    fn active_entity() -> ActiveEntity {
        let e = entity();
        e.lock().effects_active = true;
        e
    }

    fn apply(e: &ActiveEntity, defs: &DefinitionRegistry, id: u32, stack: u8, is_replace: bool) {
        let mut m = FxHashMap::default();
        m.insert(
            id,
            StatusApplication {
                stack,
                is_replace,
            },
        );
        e.add_status_effects(&m, defs, 1000, true);
    }

    fn stack_of(e: &ActiveEntity, id: u32) -> Option<u8> {
        e.lock().status_effects.get(&id).map(|s| s.stack)
    }

    #[test]
    fn group_rank_replaces_and_blocks() {
        let defs = registry(vec![
            {
                let mut s = StatusFixture::new(100);
                s.group_id = 7;
                s.group_rank = 1;
                s
            },
            {
                let mut s = StatusFixture::new(101);
                s.group_id = 7;
                s.group_rank = 2;
                s
            },
            {
                let mut s = StatusFixture::new(102);
                s.group_id = 7;
                s.group_rank = 1;
                s
            },
        ]);

        let e = entity();
        apply(&e, &defs, 100, 1, false);
        assert!(e.has_status_effect(100));

        // Higher rank replaces.
        apply(&e, &defs, 101, 1, false);
        assert!(!e.has_status_effect(100));
        assert!(e.has_status_effect(101));

        // Lower rank is blocked.
        apply(&e, &defs, 102, 1, false);
        assert!(!e.has_status_effect(102));
        assert!(e.has_status_effect(101));
    }

    #[test]
    fn stacks_add_up_to_max() {
        let defs = registry(vec![{
            let mut s = StatusFixture::new(200);
            s.application_logic = 1;
            s.max_stack = 5;
            s
        }]);

        let e = entity();
        apply(&e, &defs, 200, 3, false);
        assert_eq!(stack_of(&e, 200), Some(3));

        apply(&e, &defs, 200, 4, false);
        assert_eq!(stack_of(&e, 200), Some(5));

        // Replace sets outright.
        apply(&e, &defs, 200, 2, true);
        assert_eq!(stack_of(&e, 200), Some(2));
    }

    #[test]
    fn stack_scales_duration() {
        let defs = registry(vec![{
            let mut s = StatusFixture::new(300);
            s.duration_type = DurationType::Hour;
            s.duration = 2;
            s.stack_type = 1;
            s
        }]);

        let e = entity();
        apply(&e, &defs, 300, 3, false);
        // 2 hours x 3 stacks + now (1000).
        let exp = e.lock().status_effects[&300].expiration;
        assert_eq!(exp, 1000 + 2 * 3600 * 3);
    }

    fn inverse_pair() -> Vec<StatusFixture> {
        vec![
            {
                let mut s = StatusFixture::new(400); // buff
                s.application_logic = 2;
                s.correct_tbl = vec![CorrectTblEntry::numeric(CorrectTbl::Str, 10)];
                s
            },
            {
                let mut s = StatusFixture::new(401); // matching debuff
                s.application_logic = 2;
                s.correct_tbl = vec![CorrectTblEntry::numeric(CorrectTbl::Str, -10)];
                s
            },
        ]
    }

    #[test]
    fn inverse_cancel_equal_stacks_removes_both() {
        let defs = registry(inverse_pair());
        let e = entity();
        apply(&e, &defs, 401, 2, false);
        apply(&e, &defs, 400, 2, false);

        assert!(!e.has_status_effect(400));
        assert!(!e.has_status_effect(401));
    }

    #[test]
    fn inverse_cancel_smaller_incoming_reduces_existing() {
        let defs = registry(inverse_pair());
        let e = entity();
        apply(&e, &defs, 401, 3, false);
        apply(&e, &defs, 400, 1, false);

        assert!(!e.has_status_effect(400));
        assert_eq!(stack_of(&e, 401), Some(2));
    }

    #[test]
    fn inverse_cancel_larger_incoming_flips() {
        let defs = registry(inverse_pair());
        let e = entity();
        apply(&e, &defs, 401, 1, false);
        apply(&e, &defs, 400, 3, false);

        assert!(!e.has_status_effect(401));
        assert_eq!(stack_of(&e, 400), Some(2));
    }

    #[test]
    fn cancel_flags_expire_matching_effects() {
        let defs = registry(vec![
            {
                let mut s = StatusFixture::new(500);
                s.cancel_types = EFFECT_CANCEL_ZONEOUT;
                s
            },
            {
                let mut s = StatusFixture::new(501);
                s.cancel_types = EFFECT_CANCEL_DEATH;
                s
            },
        ]);

        let e = active_entity();
        apply(&e, &defs, 500, 1, false);
        apply(&e, &defs, 501, 1, false);

        e.cancel_status_effects(EFFECT_CANCEL_ZONEOUT);
        assert!(!e.has_status_effect(500));
        assert!(e.has_status_effect(501));
    }

    #[test]
    fn tick_drain_scenario() {
        // One expired effect at 100, one at 105, a pending "added" sentinel,
        // drained at 110.
        let defs = registry(vec![StatusFixture::new(600), StatusFixture::new(601)]);

        let e = active_entity();
        {
            let mut state = e.lock();
            state.status_effects.insert(
                600,
                StatusEffect {
                    effect_id: 600,
                    stack: 1,
                    expiration: 100,
                },
            );
            state.status_effects.insert(
                601,
                StatusEffect {
                    effect_id: 601,
                    stack: 1,
                    expiration: 105,
                },
            );
            state
                .next_effect_times
                .entry(100)
                .or_default()
                .insert(600);
            state
                .next_effect_times
                .entry(105)
                .or_default()
                .insert(601);
            state.next_effect_times.entry(1).or_default().insert(602);
            // Regen pending inside the window.
            state.next_effect_times.entry(110).or_default().insert(0);
        }

        let result = e.pop_effect_ticks(&defs, 110).expect("events were due");
        assert_eq!(result.added, BTreeSet::from([602]));
        assert_eq!(result.removed, BTreeSet::from([600, 601]));

        // Regen rescheduled at 120.
        let state = e.lock();
        assert!(state.next_effect_times[&120].contains(&0));
        assert!(state.status_effects.is_empty());
    }

    #[test]
    fn pop_with_nothing_due_returns_none() {
        let defs = registry(vec![]);
        let e = active_entity();
        e.lock().next_effect_times.entry(500).or_default().insert(0);
        assert!(e.pop_effect_ticks(&defs, 400).is_none());
    }

    #[test]
    fn regen_accumulates_time_damage() {
        let defs = registry(vec![{
            let mut s = StatusFixture::new(700);
            s.t_damage = (25, 5);
            s.duration_type = DurationType::Hour;
            s.duration = 10;
            s
        }]);

        let e = active_entity();
        {
            let mut state = e.lock();
            state.correct_values.insert(CorrectTbl::HpRegen, 3);
            state.correct_values.insert(CorrectTbl::MpRegen, 7);
        }
        apply(&e, &defs, 700, 1, false);

        // Drain the queued sentinel first so only regen remains.
        e.lock().next_effect_times.entry(2000).or_default().insert(0);
        let result = e.pop_effect_ticks(&defs, 2000).expect("regen due");

        assert_eq!(result.hp_t_damage, 25 - 3);
        assert_eq!(result.mp_t_damage, 5 - 7);
    }

    #[test]
    fn deactivation_converts_ms_to_relative() {
        let defs = registry(vec![{
            let mut s = StatusFixture::new(800);
            s.duration_type = DurationType::Ms;
            s.duration = 60_000;
            s
        }]);

        let e = entity();
        e.set_status_effects_active(true, &defs, 1000);
        apply(&e, &defs, 800, 1, false);

        // Scheduled at 1000 + 60s = 1060; deactivate at 1020 leaves 40s.
        e.set_status_effects_active(false, &defs, 1020);
        let exp = e.lock().status_effects[&800].expiration;
        assert_eq!(exp, 40_000);
    }
}
