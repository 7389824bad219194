//! The opaque transactional change-set contract the core persists through.
//! No SQL or storage detail leaks past this module boundary.

use astral_entity::{CharacterBacking, DemonBacking, StatusEffect};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use uuid::Uuid;

/// A single item stack in an item box.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ItemInstance {
    pub uuid: Uuid,
    /// Client-visible object handle.
    pub object_id: i64,
    pub item_type: u32,
    pub stack: u16,
    pub box_id: i64,
    pub slot: u16,
}

/// A durable record in one of its persisted shapes.
#[derive(Clone, Debug)]
pub enum Persisted {
    Item(ItemInstance),
    Character(Box<CharacterBacking>),
    Demon(Box<DemonBacking>),
    /// Status effects are saved in their deactivated (relative) form.
    StatusEffects {
        entity_uuid: Uuid,
        effects: Vec<StatusEffect>,
    },
}

impl Persisted {
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Item(item) => item.uuid,
            Self::Character(c) => c.uuid,
            Self::Demon(d) => d.uuid,
            Self::StatusEffects { entity_uuid, .. } => *entity_uuid,
        }
    }
}

/// An atomic batch of inserts, updates, and deletes.
#[derive(Clone, Debug, Default)]
pub struct DatabaseChangeSet {
    pub inserts: Vec<Persisted>,
    pub updates: Vec<Persisted>,
    pub deletes: Vec<Uuid>,
}

impl DatabaseChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: Persisted) -> &mut Self {
        self.inserts.push(record);
        self
    }

    pub fn update(&mut self, record: Persisted) -> &mut Self {
        self.updates.push(record);
        self
    }

    pub fn delete(&mut self, uuid: Uuid) -> &mut Self {
        self.deletes.push(uuid);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("record {0} already exists")]
    Duplicate(Uuid),
    #[error("record {0} does not exist")]
    Missing(Uuid),
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Applies change sets atomically: either every record lands or none do.
pub trait ChangeSetStore: Send + Sync {
    fn process_change_set(&self, change_set: DatabaseChangeSet) -> Result<(), PersistError>;
}

/// In-memory store used by tests and local runs. Validates the whole batch
/// before applying any of it.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<FxHashMap<Uuid, Persisted>>,
    /// When set, every change set fails; exercises rollback paths.
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn get(&self, uuid: Uuid) -> Option<Persisted> {
        self.records.lock().get(&uuid).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl ChangeSetStore for MemoryStore {
    fn process_change_set(&self, change_set: DatabaseChangeSet) -> Result<(), PersistError> {
        if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(PersistError::Storage("simulated failure".into()));
        }

        let mut records = self.records.lock();

        for record in &change_set.inserts {
            if records.contains_key(&record.uuid()) {
                return Err(PersistError::Duplicate(record.uuid()));
            }
        }
        for record in &change_set.updates {
            if !records.contains_key(&record.uuid()) {
                return Err(PersistError::Missing(record.uuid()));
            }
        }
        for uuid in &change_set.deletes {
            if !records.contains_key(uuid) {
                return Err(PersistError::Missing(*uuid));
            }
        }

        for record in change_set.inserts {
            records.insert(record.uuid(), record);
        }
        for record in change_set.updates {
            records.insert(record.uuid(), record);
        }
        for uuid in change_set.deletes {
            records.remove(&uuid);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(uuid: Uuid, stack: u16) -> Persisted {
        Persisted::Item(ItemInstance {
            uuid,
            object_id: 1,
            item_type: 100,
            stack,
            box_id: 0,
            slot: 0,
        })
    }

    #[test]
    fn change_set_is_atomic() {
        let store = MemoryStore::new();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);

        let mut cs = DatabaseChangeSet::new();
        cs.insert(item(a, 5));
        store.process_change_set(cs).unwrap();

        // An update of a missing record fails the whole batch, so the
        // insert of `b` must not land either.
        let mut cs = DatabaseChangeSet::new();
        cs.insert(item(b, 1)).update(item(Uuid::from_u128(9), 2));
        assert!(store.process_change_set(cs).is_err());

        assert!(store.get(b).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        let a = Uuid::from_u128(1);

        let mut cs = DatabaseChangeSet::new();
        cs.insert(item(a, 5));
        store.process_change_set(cs).unwrap();

        let mut cs = DatabaseChangeSet::new();
        cs.insert(item(a, 5));
        assert!(matches!(
            store.process_change_set(cs),
            Err(PersistError::Duplicate(_))
        ));
    }
}
