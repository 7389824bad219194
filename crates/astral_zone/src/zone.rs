use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use astral_core::{EntityId, ServerTime};
use astral_data::{DefinitionRegistry, ServerAction, SpawnLocationGroup, SpotData, ZoneData};
use astral_entity::{ActiveEntity, EffectTimeSink, EFFECT_CANCEL_DEATH};
use astral_protocol::packets::game::{StatusEffectDelta, StatusEffectEntry};
use astral_protocol::{encode::encode_frame, Encode, Packet};
use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{error, warn};

/// Receives encoded frames destined for one client.
pub trait Subscriber: Send + Sync {
    fn send_bytes(&self, frame: Bytes);
}

/// The earliest pending effect time per entity, kept as ordered
/// `(time, entity)` pairs for cheap min queries.
#[derive(Default)]
struct EffectTimeQueue {
    pairs: BTreeSet<(u32, EntityId)>,
    by_entity: FxHashMap<EntityId, u32>,
}

#[derive(Default)]
struct ZoneInner {
    entities: FxHashMap<EntityId, Arc<ActiveEntity>>,
    subscribers: FxHashMap<EntityId, Arc<dyn Subscriber>>,
    /// Spot IDs each entity currently stands in.
    spot_presence: FxHashMap<EntityId, FxHashSet<u32>>,
}

/// One running spatial zone: the authoritative container of its entities.
///
/// The entity set and subscriber list share one mutex; the effect-time
/// queue has its own so entities can re-register their wake times without
/// touching the container lock.
pub struct Zone {
    instance_id: u32,
    definition: ZoneData,
    spots: FxHashMap<u32, SpotData>,
    inner: Mutex<ZoneInner>,
    times: Mutex<EffectTimeQueue>,
}

impl Zone {
    /// Builds a zone over a merged definition. Spot geometry comes from the
    /// dynamic map table; the definition's server-side actions are merged
    /// onto it.
    pub fn new(instance_id: u32, definition: ZoneData, defs: &DefinitionRegistry) -> Self {
        let mut spots: FxHashMap<u32, SpotData> = defs
            .spots(definition.dynamic_map_id)
            .cloned()
            .unwrap_or_default();

        for (&spot_id, (enter, leave)) in &definition.spot_actions {
            if let Some(spot) = spots.get_mut(&spot_id) {
                spot.enter_actions = enter.clone();
                spot.leave_actions = leave.clone();
            } else {
                warn!(
                    zone = definition.id,
                    spot_id, "zone actions reference a spot the dynamic map does not have"
                );
            }
        }

        Self {
            instance_id,
            definition,
            spots,
            inner: Mutex::default(),
            times: Mutex::default(),
        }
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn zone_id(&self) -> u32 {
        self.definition.id
    }

    pub fn dynamic_map_id(&self) -> u32 {
        self.definition.dynamic_map_id
    }

    pub fn definition(&self) -> &ZoneData {
        &self.definition
    }

    pub fn spot(&self, spot_id: u32) -> Option<&SpotData> {
        self.spots.get(&spot_id)
    }

    /// Spawn groups whose gating spot (if any) is a `match_spawn` spot of
    /// this zone.
    pub fn eligible_spawn_groups(&self) -> Vec<&SpawnLocationGroup> {
        self.definition
            .spawn_groups
            .values()
            .filter(|group| match group.spot_id {
                None => true,
                Some(spot_id) => self
                    .spots
                    .get(&spot_id)
                    .is_some_and(|spot| spot.match_spawn),
            })
            .collect()
    }

    /// Picks a random location from one of this zone's spawn groups.
    pub fn pick_spawn_location(&self, group_id: u32) -> Option<astral_data::SpawnLocation> {
        use rand::seq::SliceRandom;

        let group = self.definition.spawn_groups.get(&group_id)?;
        group.locations.choose(&mut rand::thread_rng()).copied()
    }

    /// Inserts an entity and points its effect-time registration here.
    pub fn add_entity(self: &Arc<Self>, entity: Arc<ActiveEntity>) {
        let id = entity.id();
        self.inner.lock().entities.insert(id, entity.clone());

        let self_dyn: Arc<dyn EffectTimeSink> = self.clone();
        let weak: Weak<dyn EffectTimeSink> = Arc::downgrade(&self_dyn);
        entity.set_zone_sink(Some(weak));
    }

    /// Removes an entity and every reference the zone holds to it: the
    /// subscriber entry, spot presence, the effect-time queue, and both
    /// sides of any opponent relations.
    pub fn remove_entity(&self, entity_id: EntityId) -> Option<Arc<ActiveEntity>> {
        let entity = {
            let mut inner = self.inner.lock();
            inner.subscribers.remove(&entity_id);
            inner.spot_presence.remove(&entity_id);

            let entity = inner.entities.remove(&entity_id)?;

            for opponent_id in entity.opponent_ids() {
                entity.add_remove_opponent(false, opponent_id);
                if let Some(opponent) = inner.entities.get(&opponent_id) {
                    opponent.add_remove_opponent(false, entity_id);
                }
            }

            entity
        };

        self.set_next_status_effect_time(0, entity_id);
        entity.set_zone_sink(None);
        Some(entity)
    }

    pub fn entity(&self, entity_id: EntityId) -> Option<Arc<ActiveEntity>> {
        self.inner.lock().entities.get(&entity_id).cloned()
    }

    pub fn entities(&self) -> Vec<Arc<ActiveEntity>> {
        self.inner.lock().entities.values().cloned().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.inner.lock().entities.len()
    }

    pub fn subscribe(&self, entity_id: EntityId, subscriber: Arc<dyn Subscriber>) {
        self.inner.lock().subscribers.insert(entity_id, subscriber);
    }

    pub fn unsubscribe(&self, entity_id: EntityId) {
        self.inner.lock().subscribers.remove(&entity_id);
    }

    /// Encodes a packet once and sends it to every subscriber, optionally
    /// skipping one entity's client.
    pub fn broadcast_packet<P>(&self, pkt: &P, except: Option<EntityId>)
    where
        P: Packet + Encode,
    {
        let frame = match encode_frame(pkt) {
            Ok(frame) => Bytes::from(frame.to_vec()),
            Err(e) => {
                error!("failed to encode broadcast packet '{}': {e:#}", P::NAME);
                return;
            }
        };

        let inner = self.inner.lock();
        for (&id, subscriber) in &inner.subscribers {
            if Some(id) == except {
                continue;
            }
            subscriber.send_bytes(frame.clone());
        }
    }

    /// The earliest pending effect time across all entities, if any.
    pub fn next_wake(&self) -> Option<u32> {
        self.times.lock().pairs.first().map(|&(t, _)| t)
    }

    /// Drains every entity whose effect time has passed, applies regen and
    /// time damage, and broadcasts one delta packet per affected entity.
    ///
    /// All per-entity mutation happens before the first broadcast is
    /// emitted. Returns the deltas for the caller's bookkeeping.
    pub fn process_effects(
        &self,
        defs: &DefinitionRegistry,
        now_secs: u32,
        now: ServerTime,
    ) -> Vec<StatusEffectDelta> {
        let due: Vec<EntityId> = {
            let mut times = self.times.lock();
            let popped: Vec<(u32, EntityId)> = times
                .pairs
                .iter()
                .take_while(|&&(t, _)| t <= now_secs)
                .copied()
                .collect();
            for &(t, id) in &popped {
                times.pairs.remove(&(t, id));
                times.by_entity.remove(&id);
            }
            popped.into_iter().map(|(_, id)| id).collect()
        };

        let mut deltas = Vec::new();
        for entity_id in due {
            let Some(entity) = self.entity(entity_id) else {
                // The queue referenced an entity that has left: repair.
                debug_assert!(false, "effect time queued for a missing entity");
                error!(
                    entity = entity_id.0,
                    zone = self.definition.id,
                    "dropping effect time for a missing entity"
                );
                continue;
            };

            let Some(result) = entity.pop_effect_ticks(defs, now_secs) else {
                continue;
            };

            if result.hp_t_damage != 0 || result.mp_t_damage != 0 {
                let hp_delta = (-result.hp_t_damage).clamp(i16::MIN.into(), i16::MAX.into());
                let mp_delta = (-result.mp_t_damage).clamp(i16::MIN.into(), i16::MAX.into());
                entity.set_hp_mp(hp_delta as i16, mp_delta as i16, true, true, now);

                if !entity.is_alive() {
                    entity.cancel_status_effects(EFFECT_CANCEL_DEATH);
                }
            }

            let states: FxHashMap<u32, (u8, u32)> = entity
                .current_status_effect_states(defs, now_secs)
                .into_iter()
                .map(|(e, remaining)| (e.effect_id, (e.stack, remaining)))
                .collect();

            let entry = |id: &u32| StatusEffectEntry {
                effect_id: *id,
                expiration: states.get(id).map(|&(_, exp)| exp as f32).unwrap_or(0.0),
                stack: states.get(id).map(|&(stack, _)| stack).unwrap_or(0),
            };

            let (hp, mp) = entity.hp_mp();
            deltas.push(StatusEffectDelta {
                entity_id: entity_id.0,
                hp,
                mp,
                hp_t_damage: result.hp_t_damage,
                mp_t_damage: result.mp_t_damage,
                added: result.added.iter().map(entry).collect(),
                updated: result.updated.iter().map(entry).collect(),
                removed: result.removed.iter().copied().collect(),
            });
        }

        for delta in &deltas {
            self.broadcast_packet(delta, None);
        }

        deltas
    }

    /// Re-evaluates which spots an entity stands in, returning the actions
    /// fired by entering and leaving.
    pub fn update_spot_presence(&self, entity_id: EntityId, x: f32, y: f32) -> Vec<ServerAction> {
        let current: FxHashSet<u32> = self
            .spots
            .values()
            .filter(|spot| spot.contains(x, y))
            .map(|spot| spot.id)
            .collect();

        let previous = {
            let mut inner = self.inner.lock();
            inner
                .spot_presence
                .insert(entity_id, current.clone())
                .unwrap_or_default()
        };

        let mut fired = Vec::new();
        for spot_id in current.difference(&previous) {
            if let Some(spot) = self.spots.get(spot_id) {
                fired.extend(spot.enter_actions.iter().cloned());
            }
        }
        for spot_id in previous.difference(&current) {
            if let Some(spot) = self.spots.get(spot_id) {
                fired.extend(spot.leave_actions.iter().cloned());
            }
        }
        fired
    }

    /// Spot IDs the entity currently stands in.
    pub fn spots_of(&self, entity_id: EntityId) -> FxHashSet<u32> {
        self.inner
            .lock()
            .spot_presence
            .get(&entity_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Debug-only sweep of the queue/entity invariant: every queued entity
    /// must still exist.
    pub fn check_invariants(&self) -> bool {
        let inner = self.inner.lock();
        let times = self.times.lock();
        times
            .pairs
            .iter()
            .all(|(_, id)| inner.entities.contains_key(id))
    }
}

impl EffectTimeSink for Zone {
    /// Inserts or updates an entity's pending time; zero clears it.
    fn set_next_status_effect_time(&self, time: u32, entity_id: EntityId) {
        let mut times = self.times.lock();

        if let Some(old) = times.by_entity.remove(&entity_id) {
            times.pairs.remove(&(old, entity_id));
        }

        if time != 0 {
            times.pairs.insert((time, entity_id));
            times.by_entity.insert(entity_id, time);
        }
    }
}
