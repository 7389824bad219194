//! End-to-end checks of the zone runtime through the public surface: two
//! characters share an instance, a damage-over-time effect lands on one,
//! the tick drain applies it and notifies both subscribers, and leaving
//! the zone removes every reference.

use std::sync::{Arc, Mutex};

use astral::prelude::*;
use astral_data::{
    DefinitionRegistryBuilder, DurationType as Dt, StatusBasic, StatusCancel, StatusData,
    StatusTDamage, ZoneData,
};
use bytes::Bytes;
use rustc_hash::FxHashMap;

#[derive(Default)]
struct FrameLog {
    frames: Mutex<Vec<Bytes>>,
}

impl Subscriber for FrameLog {
    fn send_bytes(&self, frame: Bytes) {
        self.frames.lock().unwrap().push(frame);
    }
}

fn registry() -> Arc<DefinitionRegistry> {
    let poison = StatusData {
        id: 900,
        basic: StatusBasic {
            max_stack: 4,
            ..Default::default()
        },
        cancel: StatusCancel {
            duration_type: Dt::Hour,
            duration: 1,
            ..Default::default()
        },
        t_damage: StatusTDamage {
            hp_damage: 10,
            mp_damage: 0,
        },
        ..Default::default()
    };

    Arc::new(
        DefinitionRegistryBuilder::default()
            .zones([ZoneData {
                id: 1,
                dynamic_map_id: 11,
                starting_x: 100.0,
                starting_y: 100.0,
                ..Default::default()
            }])
            .statuses([poison])
            .build(),
    )
}

fn character(id: i32, name: &str) -> Arc<ActiveEntity> {
    let entity = ActiveEntity::new(EntityId(id), EntityKind::Character);
    entity.set_backing(
        EntityBacking::Character(CharacterBacking {
            name: name.into(),
            core: CoreStats {
                level: 10,
                hp: 100,
                mp: 50,
                str_: 10,
                vit: 10,
                int: 10,
                ..Default::default()
            },
            ..Default::default()
        }),
        vec![],
    );
    Arc::new(entity)
}

#[test]
fn shared_instance_tick_and_teardown() {
    let defs = registry();
    let zones = ZoneManager::new(defs.clone());

    let alice = character(1, "Alice");
    let bob = character(2, "Bob");
    alice.recalculate_stats(&defs);
    bob.recalculate_stats(&defs);

    let zone = zones
        .enter(&alice, 1, 1, &[], None, ServerTime(0), 1000)
        .expect("zone exists");
    zones
        .enter(&bob, 1, 1, &[], None, ServerTime(0), 1000)
        .expect("zone exists");
    assert_eq!(zone.entity_count(), 2);

    let alice_log = Arc::new(FrameLog::default());
    let bob_log = Arc::new(FrameLog::default());
    zone.subscribe(alice.id(), alice_log.clone());
    zone.subscribe(bob.id(), bob_log.clone());

    // Bob poisons Alice; the delta is queued for the next tick.
    let mut effects = FxHashMap::default();
    effects.insert(
        900,
        StatusApplication {
            stack: 1,
            is_replace: false,
        },
    );
    alice.add_status_effects(&effects, &defs, 1000, true);
    alice.add_remove_opponent(true, bob.id());
    bob.add_remove_opponent(true, alice.id());

    // Regen was scheduled for both at entry (1000 + 10); drain through it.
    // Alice's queued effect sentinel sorts first, Bob's plain regen second.
    let deltas = zone.process_effects(&defs, 1010, ServerTime(1_000_000));
    assert_eq!(deltas.len(), 2);
    let delta = &deltas[0];
    assert_eq!(delta.entity_id, alice.id().0);
    assert_eq!(delta.added.len(), 1);
    // 10 poison minus 3 regen.
    assert_eq!(delta.hp_t_damage, 7);

    // Bob only regenerated.
    assert_eq!(deltas[1].entity_id, bob.id().0);
    assert_eq!(deltas[1].hp_t_damage, -3);

    // Both subscribers saw both broadcasts.
    assert_eq!(alice_log.frames.lock().unwrap().len(), 2);
    assert_eq!(bob_log.frames.lock().unwrap().len(), 2);

    let (hp, _) = alice.hp_mp();
    assert_eq!(hp, 93);
    assert_eq!(bob.hp_mp().0, 103);

    // Alice leaves: opponents, queue, and subscription all clear.
    let left = zones.leave(alice.id(), 1020).expect("alice was present");
    assert_eq!(left.id(), alice.id());
    assert!(zone.entity(alice.id()).is_none());
    assert!(bob.opponent_ids().is_empty());
    assert!(zone.check_invariants());

    // The countdown effect survived the zone change in its stored form.
    assert_eq!(alice.status_effects().len(), 1);

    zones.leave(bob.id(), 1020);
    assert_eq!(zones.prune_empty(), 1);
    assert_eq!(zones.instance_count(), 0);
}
