use std::sync::Arc;

use astral_core::ServerTime;
use astral_data::{CorrectTbl, DefinitionRegistry};
use astral_entity::{
    ActiveEntity, CoreStats, DemonBacking, EntityBacking, EntityKind, ENTITY_CALC_SKILL,
    ENTITY_CALC_STAT_LOCAL, ENTITY_CALC_STAT_WORLD,
};
use astral_protocol::packets::game as pkt;
use astral_zone::ZoneManager;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::client::{ClientSession, ItemBox};
use crate::persistence::{ChangeSetStore, DatabaseChangeSet, ItemInstance, Persisted};

/// Macca coin item type. Stacks to 50,000.
pub const ITEM_MACCA: u32 = 1000;
/// Macca note item type; each note is worth 50,000 macca.
pub const ITEM_MACCA_NOTE: u32 = 1001;
/// Value of one macca note in macca.
pub const MACCA_NOTE_VALUE: u64 = 50_000;
/// Largest stack of loose macca.
pub const MACCA_STACK_MAX: u16 = 50_000;

/// The main inventory box.
pub const INVENTORY_BOX: i64 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("inventory is full")]
    InventoryFull,
    #[error("item not found")]
    NotFound,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("persistence failed")]
    PersistenceFailed,
}

/// Item mutations produced by a payment or trade calculation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemChanges {
    pub inserts: Vec<ItemInstance>,
    pub deletes: Vec<Uuid>,
    /// `(uuid, new stack)` pairs.
    pub adjusts: Vec<(Uuid, u16)>,
}

impl ItemChanges {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty() && self.adjusts.is_empty()
    }
}

/// Cross-entity operations initiated by client intent.
///
/// Binds zone-resident entity state to durable character data and emits
/// the client-visible packets each operation implies.
pub struct CharacterManager {
    defs: Arc<DefinitionRegistry>,
    store: Arc<dyn ChangeSetStore>,
}

impl CharacterManager {
    pub fn new(defs: Arc<DefinitionRegistry>, store: Arc<dyn ChangeSetStore>) -> Self {
        Self { defs, store }
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.defs
    }

    /// Sends the character's full state followed by the show-character
    /// confirmation.
    pub fn send_character_data(&self, session: &ClientSession, zones: &ZoneManager) {
        let Some(entity) = session.character() else {
            return;
        };

        let Some(character) = entity.with_backing(|b| match b {
            EntityBacking::Character(c) => Some(c.clone()),
            _ => None,
        })
        .flatten() else {
            return;
        };

        let now_secs = ServerTime::system_secs();
        let status_effects = entity
            .current_status_effect_states(&self.defs, now_secs)
            .into_iter()
            .map(|(effect, remaining)| pkt::StatusEffectEntry {
                effect_id: effect.effect_id,
                expiration: remaining as f32,
                stack: effect.stack,
            })
            .collect();

        let (x, y, rotation) = entity.position();
        let zone_id = zones
            .zone_of(entity.id())
            .map(|z| z.zone_id())
            .unwrap_or(0);

        let core = character.core;
        session.send_packet(&pkt::CharacterData {
            entity_id: entity.id().0,
            name: character.name.as_str().into(),
            level: core.level,
            lnc: character.lnc,
            max_hp: entity.max_hp(),
            max_mp: entity.max_mp(),
            hp: core.hp,
            mp: core.mp,
            xp: core.xp,
            stats: stats_block(&entity),
            equipment: character.equipped_items.clone(),
            status_effects,
            skills: entity.current_skills(),
            zone_id,
            x,
            y,
            rotation,
        });

        session.send_packet(&pkt::ShowCharacter {
            entity_id: entity.id().0,
        });
    }

    /// Sends the status icon to the client and announces it to the zone.
    pub fn send_status_icon(&self, session: &ClientSession, zones: &ZoneManager, icon: u8) {
        let Some(entity) = session.character() else {
            return;
        };

        let packet = pkt::StatusIcon {
            entity_id: entity.id().0,
            icon,
        };
        session.send_packet(&packet);

        if let Some(zone) = zones.zone_of(entity.id()) {
            zone.broadcast_packet(&packet, Some(entity.id()));
        }
    }

    /// Equips an item from the inventory by object ID, driving a stat
    /// recalculation and propagating the change flags.
    pub fn equip_item(
        &self,
        session: &ClientSession,
        zones: &ZoneManager,
        item_object_id: i64,
    ) -> Result<(), ItemError> {
        let Some(entity) = session.character() else {
            return Err(ItemError::NotFound);
        };

        let item_type = {
            let state = session.state();
            let item = state
                .item_boxes
                .get(&INVENTORY_BOX)
                .and_then(|b| b.find_by_object_id(item_object_id))
                .ok_or(ItemError::NotFound)?;
            item.item_type
        };

        let Some(item_def) = self.defs.item(item_type) else {
            // Unknown content; silently no-op for forward compatibility.
            return Ok(());
        };
        let Some(slot) = item_def.equip_slot else {
            return Err(ItemError::NotFound);
        };

        entity.update_backing(|b| {
            if let EntityBacking::Character(c) = b {
                let slot = slot as usize;
                if c.equipped_items.len() <= slot {
                    c.equipped_items.resize(slot + 1, 0);
                }
                c.equipped_items[slot] = item_type;
            }
        });

        self.recalculate_and_propagate(session, zones, &entity);
        self.save_character(&entity);
        Ok(())
    }

    /// Clears an equipment slot and recalculates.
    pub fn unequip_item(
        &self,
        session: &ClientSession,
        zones: &ZoneManager,
        slot: u8,
    ) -> Result<(), ItemError> {
        let Some(entity) = session.character() else {
            return Err(ItemError::NotFound);
        };

        let cleared = entity
            .update_backing(|b| {
                if let EntityBacking::Character(c) = b {
                    let slot = slot as usize;
                    if slot < c.equipped_items.len() && c.equipped_items[slot] != 0 {
                        c.equipped_items[slot] = 0;
                        return true;
                    }
                }
                false
            })
            .unwrap_or(false);

        if !cleared {
            return Err(ItemError::NotFound);
        }

        self.recalculate_and_propagate(session, zones, &entity);
        self.save_character(&entity);
        Ok(())
    }

    /// Recalculates an entity's stats and fans the resulting change bits
    /// out: LOCAL to the owning client, WORLD to the zone, SKILL as a
    /// fresh skill list.
    pub fn recalculate_and_propagate(
        &self,
        session: &ClientSession,
        zones: &ZoneManager,
        entity: &Arc<ActiveEntity>,
    ) {
        let flags = entity.recalculate_stats(&self.defs);
        if flags == 0 {
            return;
        }

        if flags & ENTITY_CALC_STAT_LOCAL != 0 {
            session.send_packet(&pkt::EntityStats {
                entity_id: entity.id().0,
                stats: stats_block(entity),
                max_hp: entity.max_hp(),
                max_mp: entity.max_mp(),
            });
        }

        if flags & ENTITY_CALC_STAT_WORLD != 0 {
            if let Some(zone) = zones.zone_of(entity.id()) {
                let (hp, mp) = entity.hp_mp();
                zone.broadcast_packet(
                    &pkt::HpMpUpdate {
                        entity_id: entity.id().0,
                        hp,
                        mp,
                        max_hp: entity.max_hp(),
                        max_mp: entity.max_mp(),
                    },
                    Some(entity.id()),
                );
            }
        }

        if flags & ENTITY_CALC_SKILL != 0 {
            session.send_packet(&pkt::SkillList {
                entity_id: entity.id().0,
                skills: entity.current_skills(),
            });
        }
    }

    /// Applies an HP/MP change and broadcasts the result to the zone.
    pub fn update_hp_mp(
        &self,
        zones: &ZoneManager,
        entity: &Arc<ActiveEntity>,
        hp_delta: i16,
        mp_delta: i16,
        can_overflow: bool,
        now: ServerTime,
    ) {
        if entity
            .set_hp_mp(hp_delta, mp_delta, true, can_overflow, now)
            .is_none()
        {
            return;
        }

        let (hp, mp) = entity.hp_mp();
        if let Some(zone) = zones.zone_of(entity.id()) {
            zone.broadcast_packet(
                &pkt::HpMpUpdate {
                    entity_id: entity.id().0,
                    hp,
                    mp,
                    max_hp: entity.max_hp(),
                    max_mp: entity.max_mp(),
                },
                None,
            );
        }
    }

    /// Adjusts the character's LNC points, clamped to the legal range.
    pub fn update_lnc(&self, session: &ClientSession, delta: i16) {
        let Some(entity) = session.character() else {
            return;
        };

        entity.update_backing(|b| {
            if let EntityBacking::Character(c) = b {
                c.lnc = (i32::from(c.lnc) + i32::from(delta)).clamp(-10_000, 10_000) as i16;
            }
        });
        self.save_character(&entity);
    }

    /// Figures out which macca items pay for `cost`.
    ///
    /// Loose macca is consumed first, then notes; breaking a note inserts
    /// the change as a new macca stack. Returns `None` without touching
    /// anything when funds are insufficient.
    pub fn calculate_macca_payment(&self, inventory: &ItemBox, cost: u64) -> Option<ItemChanges> {
        let mut macca: Vec<&ItemInstance> = inventory
            .items()
            .filter(|i| i.item_type == ITEM_MACCA)
            .collect();
        let mut notes: Vec<&ItemInstance> = inventory
            .items()
            .filter(|i| i.item_type == ITEM_MACCA_NOTE)
            .collect();
        // Spend small stacks first to keep the box tidy.
        macca.sort_by_key(|i| i.stack);
        notes.sort_by_key(|i| i.stack);

        let total: u64 = macca.iter().map(|i| u64::from(i.stack)).sum::<u64>()
            + notes.iter().map(|i| u64::from(i.stack)).sum::<u64>() * MACCA_NOTE_VALUE;
        if total < cost {
            return None;
        }

        let mut changes = ItemChanges::default();
        let mut remaining = cost;

        for item in macca {
            if remaining == 0 {
                break;
            }
            let stack = u64::from(item.stack);
            if stack <= remaining {
                changes.deletes.push(item.uuid);
                remaining -= stack;
            } else {
                changes.adjusts.push((item.uuid, (stack - remaining) as u16));
                remaining = 0;
            }
        }

        for note in notes {
            if remaining == 0 {
                break;
            }
            let need_notes = remaining.div_ceil(MACCA_NOTE_VALUE);
            let stack = u64::from(note.stack);
            let used = stack.min(need_notes);

            if used == stack {
                changes.deletes.push(note.uuid);
            } else {
                changes.adjusts.push((note.uuid, (stack - used) as u16));
            }

            let value = used * MACCA_NOTE_VALUE;
            if value > remaining {
                // Break a bill: the change comes back as loose macca.
                changes.inserts.push(ItemInstance {
                    uuid: Uuid::new_v4(),
                    object_id: 0,
                    item_type: ITEM_MACCA,
                    stack: (value - remaining) as u16,
                    box_id: inventory.box_id,
                    slot: 0,
                });
                remaining = 0;
            } else {
                remaining -= value;
            }
        }

        debug_assert_eq!(remaining, 0);
        Some(changes)
    }

    /// Buys a shop product with macca.
    ///
    /// Returns the client-visible status code: 0 success, -1 inventory
    /// full, -2 failure (unknown product, unknown item, or not enough
    /// macca). An unknown product never panics; newer content degrades to
    /// the generic failure code.
    pub fn shop_buy(&self, session: &ClientSession, shop_id: i32, product_id: u32) -> i32 {
        let result = self.try_shop_buy(session, product_id);
        session.send_packet(&astral_protocol::packets::game::ShopBuyResult {
            shop_id,
            product_id,
            result,
        });
        result
    }

    fn try_shop_buy(&self, session: &ClientSession, product_id: u32) -> i32 {
        let Some(product) = self.defs.shop_product(product_id) else {
            return -2;
        };
        if self.defs.item(product.item_id).is_none() {
            return -2;
        }

        let payment = {
            let state = session.state();
            let Some(inventory) = state.item_boxes.get(&INVENTORY_BOX) else {
                return -2;
            };
            self.calculate_macca_payment(inventory, u64::from(product.price))
        };
        let Some(mut changes) = payment else {
            return -2;
        };

        changes.inserts.push(ItemInstance {
            uuid: Uuid::new_v4(),
            object_id: 0,
            item_type: product.item_id,
            stack: product.stack.max(1),
            box_id: INVENTORY_BOX,
            slot: 0,
        });

        match self.update_items(session, true, &changes) {
            Ok(()) => {}
            Err(ItemError::InventoryFull) => return -1,
            Err(_) => return -2,
        }

        match self.update_items(session, false, &changes) {
            Ok(()) => 0,
            Err(ItemError::InventoryFull) => -1,
            Err(_) => -2,
        }
    }

    /// Applies item changes in two phases.
    ///
    /// With `dry_run` only capacity is validated. Otherwise the changes are
    /// applied to the session's boxes, persisted through the change-set
    /// store, and item-box updates are sent. A persistence failure leaves
    /// the in-memory boxes untouched.
    pub fn update_items(
        &self,
        session: &ClientSession,
        dry_run: bool,
        changes: &ItemChanges,
    ) -> Result<(), ItemError> {
        let mut state = session.state();
        let inventory = state
            .item_boxes
            .entry(INVENTORY_BOX)
            .or_insert_with(|| ItemBox::new(INVENTORY_BOX));

        let freed = changes
            .deletes
            .iter()
            .filter(|uuid| inventory.items().any(|i| i.uuid == **uuid))
            .count();
        if inventory.free_slots() + freed < changes.inserts.len() {
            return Err(ItemError::InventoryFull);
        }

        if dry_run {
            return Ok(());
        }

        // Stage the new box contents before telling the store.
        let mut staged = inventory.clone();
        for uuid in &changes.deletes {
            for slot in staged.slots.iter_mut() {
                if slot.as_ref().is_some_and(|i| i.uuid == *uuid) {
                    *slot = None;
                }
            }
        }
        for (uuid, new_stack) in &changes.adjusts {
            for slot in staged.slots.iter_mut().flatten() {
                if slot.uuid == *uuid {
                    slot.stack = *new_stack;
                }
            }
        }
        for insert in &changes.inserts {
            let Some(free) = staged.slots.iter().position(Option::is_none) else {
                return Err(ItemError::InventoryFull);
            };
            let mut item = insert.clone();
            item.slot = free as u16;
            staged.slots[free] = Some(item);
        }

        let mut change_set = DatabaseChangeSet::new();
        for insert in staged
            .items()
            .filter(|i| changes.inserts.iter().any(|n| n.uuid == i.uuid))
        {
            change_set.insert(Persisted::Item(insert.clone()));
        }
        for (uuid, _) in &changes.adjusts {
            if let Some(item) = staged.items().find(|i| i.uuid == *uuid) {
                change_set.update(Persisted::Item(item.clone()));
            }
        }
        for uuid in &changes.deletes {
            change_set.delete(*uuid);
        }

        if let Err(e) = self.store.process_change_set(change_set) {
            error!("item change set failed: {e}");
            return Err(ItemError::PersistenceFailed);
        }

        *inventory = staged;
        let update = item_box_packet(inventory);
        drop(state);

        session.send_packet(&update);
        Ok(())
    }

    /// Grants or removes a quantity of an item type.
    pub fn add_remove_items(
        &self,
        session: &ClientSession,
        item_type: u32,
        quantity: u16,
        add: bool,
    ) -> Result<(), ItemError> {
        let changes = if add {
            let stack_size = self
                .defs
                .item(item_type)
                .map(|i| i.stack_size.max(1))
                .unwrap_or(1);
            let mut changes = ItemChanges::default();
            let mut remaining = quantity;
            while remaining > 0 {
                let stack = remaining.min(stack_size);
                changes.inserts.push(ItemInstance {
                    uuid: Uuid::new_v4(),
                    object_id: 0,
                    item_type,
                    stack,
                    box_id: INVENTORY_BOX,
                    slot: 0,
                });
                remaining -= stack;
            }
            changes
        } else {
            let state = session.state();
            let Some(inventory) = state.item_boxes.get(&INVENTORY_BOX) else {
                return Err(ItemError::NotFound);
            };

            let mut changes = ItemChanges::default();
            let mut remaining = u64::from(quantity);
            for item in inventory.items().filter(|i| i.item_type == item_type) {
                if remaining == 0 {
                    break;
                }
                let stack = u64::from(item.stack);
                if stack <= remaining {
                    changes.deletes.push(item.uuid);
                    remaining -= stack;
                } else {
                    changes.adjusts.push((item.uuid, (stack - remaining) as u16));
                    remaining = 0;
                }
            }
            if remaining > 0 {
                return Err(ItemError::NotFound);
            }
            changes
        };

        self.update_items(session, false, &changes)
    }

    /// Sends the full contents of an item box.
    pub fn send_item_box_data(&self, session: &ClientSession, box_id: i64) {
        let packet = {
            let state = session.state();
            state.item_boxes.get(&box_id).map(item_box_packet)
        };

        match packet {
            Some(packet) => session.send_packet(&packet),
            None => session.send_packet(&pkt::ItemBoxUpdate {
                box_id,
                slots: vec![],
            }),
        }
    }

    /// Adds a freshly contracted demon to durable storage and returns its
    /// record.
    pub fn contract_demon(&self, devil_id: u32) -> Option<DemonBacking> {
        let devil = self.defs.devil(devil_id)?;

        let demon = DemonBacking {
            uuid: Uuid::new_v4(),
            devil_id,
            core: CoreStats {
                level: devil.base_level.max(1),
                hp: 1,
                mp: 1,
                str_: 5,
                magic: 5,
                vit: 5,
                int: 5,
                speed: 5,
                luck: 5,
                ..Default::default()
            },
            learned_skills: devil.growth.skills.clone(),
        };

        let mut change_set = DatabaseChangeSet::new();
        change_set.insert(Persisted::Demon(Box::new(demon.clone())));
        if let Err(e) = self.store.process_change_set(change_set) {
            error!("contract failed to persist: {e}");
            return None;
        }

        Some(demon)
    }

    /// Summons a demon: binds its record to the session's demon entity and
    /// brings it into the character's zone.
    pub fn summon_demon(
        &self,
        session: &ClientSession,
        zones: &ZoneManager,
        demon: DemonBacking,
        entity: Arc<ActiveEntity>,
        now: ServerTime,
        now_secs: u32,
    ) {
        debug_assert_eq!(entity.kind(), EntityKind::PartnerDemon);
        entity.set_backing(EntityBacking::PartnerDemon(demon), vec![]);
        entity.recalculate_stats(&self.defs);

        session.state().demon = Some(entity.clone());

        let Some(character) = session.character() else {
            return;
        };
        if let Some(zone) = zones.zone_of(character.id()) {
            let (x, y, rotation) = character.position();
            zones.enter(
                &entity,
                zone.instance_id(),
                zone.zone_id(),
                &[],
                Some(astral_zone::Placement::Coordinates { x, y, rotation }),
                now,
                now_secs,
            );
        }
    }

    /// Returns a summoned demon to the COMP: out of the zone, effects
    /// deactivated, record saved.
    pub fn store_demon(&self, session: &ClientSession, zones: &ZoneManager, now_secs: u32) {
        let Some(entity) = session.demon() else {
            return;
        };
        session.state().demon = None;

        zones.leave(entity.id(), now_secs);

        let Some(demon) = entity.with_backing(|b| match b {
            EntityBacking::PartnerDemon(d) => Some(d.clone()),
            _ => None,
        })
        .flatten() else {
            return;
        };

        let mut change_set = DatabaseChangeSet::new();
        change_set.update(Persisted::Demon(Box::new(demon)));
        if let Err(e) = self.store.process_change_set(change_set) {
            warn!("failed to save stored demon: {e}");
        }
    }

    /// Saves the character record after a durable mutation.
    fn save_character(&self, entity: &Arc<ActiveEntity>) {
        let Some(character) = entity.with_backing(|b| match b {
            EntityBacking::Character(c) => Some(c.clone()),
            _ => None,
        })
        .flatten() else {
            return;
        };

        let mut change_set = DatabaseChangeSet::new();
        change_set.update(Persisted::Character(Box::new(character)));
        if let Err(e) = self.store.process_change_set(change_set) {
            error!("failed to save character: {e}");
        }
    }
}

fn stats_block(entity: &ActiveEntity) -> pkt::EntityStatsBlock {
    pkt::EntityStatsBlock {
        str_: entity.correct_value(CorrectTbl::Str),
        magic: entity.correct_value(CorrectTbl::Magic),
        vit: entity.correct_value(CorrectTbl::Vit),
        int: entity.correct_value(CorrectTbl::Int),
        speed: entity.correct_value(CorrectTbl::Speed),
        luck: entity.correct_value(CorrectTbl::Luck),
        clsr: entity.correct_value(CorrectTbl::Clsr),
        lngr: entity.correct_value(CorrectTbl::Lngr),
        spell: entity.correct_value(CorrectTbl::Spell),
        support: entity.correct_value(CorrectTbl::Support),
        pdef: entity.correct_value(CorrectTbl::Pdef),
        mdef: entity.correct_value(CorrectTbl::Mdef),
    }
}

fn item_box_packet(item_box: &ItemBox) -> pkt::ItemBoxUpdate {
    pkt::ItemBoxUpdate {
        box_id: item_box.box_id,
        slots: item_box
            .items()
            .map(|item| pkt::ItemSlot {
                slot: item.slot,
                item_type: item.item_type,
                stack: item.stack,
            })
            .collect(),
    }
}
