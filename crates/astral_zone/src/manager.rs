use std::sync::Arc;

use astral_core::{EntityId, ServerTime};
use astral_data::DefinitionRegistry;
use astral_entity::{ActiveEntity, EntityBacking, EntityKind, EFFECT_CANCEL_ZONEOUT};
use astral_protocol::packets::game::{EntityAppeared, EntityRemoved};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::partial::merged_zone;
use crate::zone::Zone;

/// Identifies one running zone instance.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ZoneKey {
    pub instance_id: u32,
    pub zone_id: u32,
    pub dynamic_map_id: u32,
}

/// Where to put an entity on zone entry.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Placement {
    Coordinates { x: f32, y: f32, rotation: f32 },
    /// Resolve a spot ID to its center.
    Spot(u32),
}

#[derive(Default)]
struct ManagerInner {
    zones: IndexMap<ZoneKey, Arc<Zone>>,
    entity_zone: rustc_hash::FxHashMap<EntityId, ZoneKey>,
}

/// Catalog of running zone instances.
///
/// Instances are created lazily on the first entry request and removed by
/// [`ZoneManager::prune_empty`] once the last entity has left.
pub struct ZoneManager {
    defs: Arc<DefinitionRegistry>,
    inner: Mutex<ManagerInner>,
}

impl ZoneManager {
    pub fn new(defs: Arc<DefinitionRegistry>) -> Self {
        Self {
            defs,
            inner: Mutex::default(),
        }
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.defs
    }

    /// Finds or lazily creates the instance for `(instance_id, zone_id)`.
    ///
    /// The merged definition applies auto partials for the zone's dynamic
    /// map plus `selected_partials` in order. Returns `None` for an unknown
    /// zone ID.
    pub fn get_or_create(
        &self,
        instance_id: u32,
        zone_id: u32,
        selected_partials: &[u32],
    ) -> Option<Arc<Zone>> {
        let definition = merged_zone(&self.defs, zone_id, selected_partials)?;
        let key = ZoneKey {
            instance_id,
            zone_id,
            dynamic_map_id: definition.dynamic_map_id,
        };

        let mut inner = self.inner.lock();
        if let Some(zone) = inner.zones.get(&key) {
            return Some(zone.clone());
        }

        debug!(?key, "creating zone instance");
        let zone = Arc::new(Zone::new(instance_id, definition, &self.defs));
        inner.zones.insert(key, zone.clone());
        Some(zone)
    }

    pub fn get(&self, key: &ZoneKey) -> Option<Arc<Zone>> {
        self.inner.lock().zones.get(key).cloned()
    }

    /// The zone an entity currently occupies.
    pub fn zone_of(&self, entity_id: EntityId) -> Option<Arc<Zone>> {
        let inner = self.inner.lock();
        let key = inner.entity_zone.get(&entity_id)?;
        inner.zones.get(key).cloned()
    }

    /// Moves an entity into a zone.
    ///
    /// Leaves the previous zone first (firing zone-out cancels and
    /// deactivating effects), places the entity, activates its status
    /// effects, and announces it to the other subscribers.
    pub fn enter(
        &self,
        entity: &Arc<ActiveEntity>,
        instance_id: u32,
        zone_id: u32,
        selected_partials: &[u32],
        placement: Option<Placement>,
        now: ServerTime,
        now_secs: u32,
    ) -> Option<Arc<Zone>> {
        let zone = self.get_or_create(instance_id, zone_id, selected_partials)?;

        if self.inner.lock().entity_zone.contains_key(&entity.id()) {
            self.leave(entity.id(), now_secs);
        }

        let (x, y, rotation) = match placement {
            Some(Placement::Coordinates { x, y, rotation }) => (x, y, rotation),
            Some(Placement::Spot(spot_id)) => match zone.spot(spot_id) {
                Some(spot) => (spot.center_x, spot.center_y, 0.0),
                None => {
                    let d = zone.definition();
                    (d.starting_x, d.starting_y, d.starting_rotation)
                }
            },
            None => {
                let d = zone.definition();
                (d.starting_x, d.starting_y, d.starting_rotation)
            }
        };

        entity.place_at(x, y, rotation, now);
        zone.add_entity(entity.clone());
        entity.set_status_effects_active(true, &self.defs, now_secs);

        {
            let mut inner = self.inner.lock();
            let key = ZoneKey {
                instance_id,
                zone_id,
                dynamic_map_id: zone.dynamic_map_id(),
            };
            inner.entity_zone.insert(entity.id(), key);
        }

        let (max_hp, _) = (entity.max_hp(), entity.max_mp());
        let (hp, _) = entity.hp_mp();
        let name = entity
            .with_backing(|b| match b {
                EntityBacking::Character(c) => c.name.clone(),
                EntityBacking::PartnerDemon(_) | EntityBacking::Enemy(_) => String::new(),
            })
            .unwrap_or_default();

        zone.broadcast_packet(
            &EntityAppeared {
                entity_id: entity.id().0,
                kind: entity_kind_code(entity.kind()),
                name: name.as_str().into(),
                x,
                y,
                rotation,
                max_hp,
                hp,
            },
            Some(entity.id()),
        );

        Some(zone)
    }

    /// Removes an entity from its zone: zone-out cancels fire, effects
    /// deactivate (absolute expirations become relative countdowns), and
    /// every zone-side reference is dropped.
    pub fn leave(&self, entity_id: EntityId, now_secs: u32) -> Option<Arc<ActiveEntity>> {
        let key = self.inner.lock().entity_zone.remove(&entity_id)?;
        let zone = self.get(&key)?;
        let entity = zone.entity(entity_id)?;

        entity.cancel_status_effects(EFFECT_CANCEL_ZONEOUT);
        entity.set_status_effects_active(false, &self.defs, now_secs);
        zone.remove_entity(entity_id);

        zone.broadcast_packet(
            &EntityRemoved {
                entity_id: entity_id.0,
            },
            None,
        );

        Some(entity)
    }

    /// Runs effect processing on every zone whose wake time has passed.
    pub fn process_due(&self, now_secs: u32, now: ServerTime) -> usize {
        let zones: Vec<Arc<Zone>> = self.inner.lock().zones.values().cloned().collect();

        let mut processed = 0;
        for zone in zones {
            if zone.next_wake().is_some_and(|t| t <= now_secs) {
                processed += zone.process_effects(&self.defs, now_secs, now).len();
            }
        }
        processed
    }

    /// The earliest wake time across all instances.
    pub fn earliest_wake(&self) -> Option<u32> {
        let zones: Vec<Arc<Zone>> = self.inner.lock().zones.values().cloned().collect();
        zones.iter().filter_map(|z| z.next_wake()).min()
    }

    /// Drops instances with no entities left. Returns how many were
    /// removed.
    pub fn prune_empty(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.zones.len();
        inner.zones.retain(|_, zone| zone.entity_count() > 0);
        before - inner.zones.len()
    }

    pub fn instance_count(&self) -> usize {
        self.inner.lock().zones.len()
    }
}

fn entity_kind_code(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::Character => 0,
        EntityKind::PartnerDemon => 1,
        EntityKind::Enemy => 2,
    }
}

#[cfg(test)]
mod tests {
    use astral_data::{
        DefinitionRegistryBuilder, DurationType, StatusBasic, StatusCancel, StatusData, ZoneData,
    };
    use astral_entity::{CharacterBacking, CoreStats, EntityKind, StatusApplication};
    use pretty_assertions::assert_eq;

    use super::*;

    fn registry() -> Arc<DefinitionRegistry> {
        let zone = ZoneData {
            id: 1,
            dynamic_map_id: 11,
            starting_x: 5.0,
            starting_y: 6.0,
            starting_rotation: 0.5,
            ..Default::default()
        };
        let other = ZoneData {
            id: 2,
            dynamic_map_id: 12,
            ..Default::default()
        };
        let status = StatusData {
            id: 100,
            basic: StatusBasic {
                max_stack: 4,
                ..Default::default()
            },
            cancel: StatusCancel {
                duration_type: DurationType::Ms,
                duration: 60_000,
                ..Default::default()
            },
            ..Default::default()
        };
        Arc::new(
            DefinitionRegistryBuilder::default()
                .zones([zone, other])
                .statuses([status])
                .build(),
        )
    }

    fn character(id: i32) -> Arc<ActiveEntity> {
        let e = ActiveEntity::new(EntityId(id), EntityKind::Character);
        e.set_backing(
            astral_entity::EntityBacking::Character(CharacterBacking {
                name: "Kazuya".into(),
                core: CoreStats {
                    level: 5,
                    hp: 50,
                    mp: 20,
                    str_: 10,
                    vit: 10,
                    int: 10,
                    ..Default::default()
                },
                ..Default::default()
            }),
            vec![],
        );
        Arc::new(e)
    }

    #[test]
    fn instances_are_created_lazily_and_shared() {
        let manager = ZoneManager::new(registry());
        let a = manager.get_or_create(1, 1, &[]).unwrap();
        let b = manager.get_or_create(1, 1, &[]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.instance_count(), 1);

        manager.get_or_create(2, 1, &[]).unwrap();
        assert_eq!(manager.instance_count(), 2);

        assert!(manager.get_or_create(1, 42, &[]).is_none());
    }

    #[test]
    fn enter_places_at_zone_start_by_default() {
        let manager = ZoneManager::new(registry());
        let e = character(1);

        let zone = manager
            .enter(&e, 1, 1, &[], None, ServerTime(0), 1000)
            .unwrap();
        assert_eq!(zone.entity_count(), 1);

        let (x, y, rot) = e.position();
        assert_eq!((x, y, rot), (5.0, 6.0, 0.5));
        assert!(manager.zone_of(e.id()).is_some());
    }

    #[test]
    fn zone_switch_deactivates_and_converts_expirations() {
        let defs = registry();
        let manager = ZoneManager::new(defs.clone());
        let e = character(1);

        manager.enter(&e, 1, 1, &[], None, ServerTime(0), 1000).unwrap();

        let mut adds = rustc_hash::FxHashMap::default();
        adds.insert(
            100,
            StatusApplication {
                stack: 1,
                is_replace: false,
            },
        );
        e.add_status_effects(&adds, &defs, 1000, true);

        // Switch zones 20 seconds later; the 60 s countdown has 40 s left.
        manager.enter(&e, 1, 2, &[], None, ServerTime(0), 1020).unwrap();

        let effects = e.status_effects();
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].expiration, 40_000);

        // The old instance is empty and prunable.
        assert_eq!(manager.prune_empty(), 1);
        assert_eq!(manager.instance_count(), 1);
    }

    #[test]
    fn leave_clears_the_entity_zone_index() {
        let manager = ZoneManager::new(registry());
        let e = character(1);

        manager.enter(&e, 1, 1, &[], None, ServerTime(0), 1000).unwrap();
        let left = manager.leave(e.id(), 1001).expect("entity was in a zone");
        assert_eq!(left.id(), e.id());

        assert!(manager.zone_of(e.id()).is_none());
        assert!(manager.leave(e.id(), 1002).is_none());
    }
}
