use rustc_hash::FxHashMap;
use tracing::warn;

use crate::records::{
    DevilData, DynamicMapData, ItemData, ShopProductData, SkillData, SpotData, StatusData,
    ZoneData, ZonePartialData, ZoneRelationData,
};

/// Read-only index of all static game data.
///
/// Built once at startup and then shared freely between threads; nothing in
/// here is mutable afterwards, so no lock is required.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    items: FxHashMap<u32, ItemData>,
    skills: FxHashMap<u32, SkillData>,
    devils: FxHashMap<u32, DevilData>,
    statuses: FxHashMap<u32, StatusData>,
    shop_products: FxHashMap<u32, ShopProductData>,
    zone_relations: FxHashMap<u32, ZoneRelationData>,
    dynamic_maps: FxHashMap<u32, DynamicMapData>,
    zones: FxHashMap<u32, ZoneData>,
    zone_partials: FxHashMap<u32, ZonePartialData>,
    spots: FxHashMap<u32, FxHashMap<u32, SpotData>>,

    item_names: FxHashMap<String, u32>,
    devil_names: FxHashMap<String, u32>,
    /// race ID -> (level marker, result devil ID), ascending by level.
    fusion_ranges: FxHashMap<u8, Vec<(u8, u32)>>,
    default_character_skills: Vec<u32>,
    /// dynamic map ID -> auto-apply partial IDs, ascending.
    auto_partials: FxHashMap<u32, Vec<u32>>,
}

impl DefinitionRegistry {
    pub fn builder() -> DefinitionRegistryBuilder {
        DefinitionRegistryBuilder::default()
    }

    pub fn item(&self, id: u32) -> Option<&ItemData> {
        self.items.get(&id)
    }

    pub fn skill(&self, id: u32) -> Option<&SkillData> {
        self.skills.get(&id)
    }

    pub fn devil(&self, id: u32) -> Option<&DevilData> {
        self.devils.get(&id)
    }

    pub fn status(&self, id: u32) -> Option<&StatusData> {
        self.statuses.get(&id)
    }

    pub fn shop_product(&self, id: u32) -> Option<&ShopProductData> {
        self.shop_products.get(&id)
    }

    pub fn zone_relation(&self, id: u32) -> Option<&ZoneRelationData> {
        self.zone_relations.get(&id)
    }

    pub fn dynamic_map(&self, id: u32) -> Option<&DynamicMapData> {
        self.dynamic_maps.get(&id)
    }

    pub fn zone(&self, id: u32) -> Option<&ZoneData> {
        self.zones.get(&id)
    }

    pub fn zone_partial(&self, id: u32) -> Option<&ZonePartialData> {
        self.zone_partials.get(&id)
    }

    pub fn item_id_by_name(&self, name: &str) -> Option<u32> {
        self.item_names.get(name).copied()
    }

    pub fn devil_id_by_name(&self, name: &str) -> Option<u32> {
        self.devil_names.get(name).copied()
    }

    /// Spots for a dynamic map. Empty when the map has no spot table.
    pub fn spots(&self, dynamic_map_id: u32) -> Option<&FxHashMap<u32, SpotData>> {
        self.spots.get(&dynamic_map_id)
    }

    /// Fusion result ranges for a race, ascending by level marker.
    pub fn fusion_ranges(&self, race_id: u8) -> &[(u8, u32)] {
        self.fusion_ranges
            .get(&race_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn default_character_skills(&self) -> &[u32] {
        &self.default_character_skills
    }

    /// Partial IDs that apply implicitly when a zone with this dynamic map
    /// loads, in ascending partial-ID order.
    pub fn auto_applied_partials(&self, dynamic_map_id: u32) -> &[u32] {
        self.auto_partials
            .get(&dynamic_map_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Default)]
pub struct DefinitionRegistryBuilder {
    registry: DefinitionRegistry,
}

impl DefinitionRegistryBuilder {
    pub fn items(mut self, items: impl IntoIterator<Item = ItemData>) -> Self {
        for item in items {
            self.registry.item_names.insert(item.name.clone(), item.id);
            insert_unique(&mut self.registry.items, item.id, item, "item");
        }
        self
    }

    pub fn skills(mut self, skills: impl IntoIterator<Item = SkillData>) -> Self {
        for skill in skills {
            insert_unique(&mut self.registry.skills, skill.id, skill, "skill");
        }
        self
    }

    pub fn devils(mut self, devils: impl IntoIterator<Item = DevilData>) -> Self {
        for devil in devils {
            self.registry
                .devil_names
                .insert(devil.name.clone(), devil.id);
            insert_unique(&mut self.registry.devils, devil.id, devil, "devil");
        }
        self
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = StatusData>) -> Self {
        for status in statuses {
            insert_unique(&mut self.registry.statuses, status.id, status, "status");
        }
        self
    }

    pub fn shop_products(mut self, products: impl IntoIterator<Item = ShopProductData>) -> Self {
        for product in products {
            insert_unique(
                &mut self.registry.shop_products,
                product.id,
                product,
                "shop product",
            );
        }
        self
    }

    pub fn zone_relations(mut self, relations: impl IntoIterator<Item = ZoneRelationData>) -> Self {
        for relation in relations {
            insert_unique(
                &mut self.registry.zone_relations,
                relation.id,
                relation,
                "zone relation",
            );
        }
        self
    }

    pub fn dynamic_maps(mut self, maps: impl IntoIterator<Item = DynamicMapData>) -> Self {
        for map in maps {
            insert_unique(&mut self.registry.dynamic_maps, map.id, map, "dynamic map");
        }
        self
    }

    pub fn zones(mut self, zones: impl IntoIterator<Item = ZoneData>) -> Self {
        for zone in zones {
            insert_unique(&mut self.registry.zones, zone.id, zone, "zone");
        }
        self
    }

    pub fn zone_partials(mut self, partials: impl IntoIterator<Item = ZonePartialData>) -> Self {
        for partial in partials {
            insert_unique(
                &mut self.registry.zone_partials,
                partial.id,
                partial,
                "zone partial",
            );
        }
        self
    }

    pub fn spots(
        mut self,
        dynamic_map_id: u32,
        spots: impl IntoIterator<Item = SpotData>,
    ) -> Self {
        let map = self.registry.spots.entry(dynamic_map_id).or_default();
        for spot in spots {
            map.insert(spot.id, spot);
        }
        self
    }

    pub fn default_character_skills(mut self, skills: impl IntoIterator<Item = u32>) -> Self {
        self.registry.default_character_skills = skills.into_iter().collect();
        self
    }

    /// Finalizes the registry, computing the derived indices.
    pub fn build(mut self) -> DefinitionRegistry {
        // Fusion ranges: per race, devils ordered by base level. Ties keep
        // the lower devil ID first so the result is deterministic.
        let mut by_race: FxHashMap<u8, Vec<(u8, u32)>> = FxHashMap::default();
        for devil in self.registry.devils.values() {
            by_race
                .entry(devil.race_id)
                .or_default()
                .push((devil.base_level.max(0) as u8, devil.id));
        }
        for ranges in by_race.values_mut() {
            ranges.sort();
        }
        self.registry.fusion_ranges = by_race;

        let mut auto: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
        for partial in self.registry.zone_partials.values() {
            if !partial.auto_apply {
                continue;
            }
            for &map_id in &partial.dynamic_map_ids {
                auto.entry(map_id).or_default().push(partial.id);
            }
        }
        for ids in auto.values_mut() {
            ids.sort_unstable();
        }
        self.registry.auto_partials = auto;

        self.registry
    }
}

fn insert_unique<T>(map: &mut FxHashMap<u32, T>, id: u32, value: T, kind: &str) {
    if map.insert(id, value).is_some() {
        warn!(id, kind, "duplicate record replaced an earlier entry");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::records::DevilGrowth;

    fn devil(id: u32, name: &str, race_id: u8, base_level: i8) -> DevilData {
        DevilData {
            id,
            name: name.into(),
            race_id,
            base_level,
            lnc: 0,
            growth: DevilGrowth::default(),
            battle_correct: Default::default(),
        }
    }

    #[test]
    fn lookups_miss_quietly() {
        let registry = DefinitionRegistry::builder().build();
        assert!(registry.item(99).is_none());
        assert!(registry.status(99).is_none());
        assert!(registry.fusion_ranges(4).is_empty());
    }

    #[test]
    fn fusion_ranges_sorted_by_level() {
        let registry = DefinitionRegistry::builder()
            .devils([
                devil(30, "Pixie", 2, 2),
                devil(31, "Jack Frost", 2, 7),
                devil(32, "High Pixie", 2, 4),
                devil(40, "Slime", 9, 1),
            ])
            .build();

        assert_eq!(registry.fusion_ranges(2), &[(2, 30), (4, 32), (7, 31)]);
        assert_eq!(registry.fusion_ranges(9), &[(1, 40)]);
    }

    #[test]
    fn name_lookup() {
        let registry = DefinitionRegistry::builder()
            .devils([devil(30, "Pixie", 2, 2)])
            .build();

        assert_eq!(registry.devil_id_by_name("Pixie"), Some(30));
        assert_eq!(registry.devil_id_by_name("Nonexistent"), None);
    }

    #[test]
    fn auto_partials_sorted() {
        use crate::records::ZonePartialData;

        let partial = |id: u32, maps: &[u32], auto_apply: bool| ZonePartialData {
            id,
            auto_apply,
            dynamic_map_ids: maps.to_vec(),
            ..Default::default()
        };

        let registry = DefinitionRegistry::builder()
            .zone_partials([
                partial(9, &[1], true),
                partial(3, &[1, 2], true),
                partial(5, &[1], false),
            ])
            .build();

        assert_eq!(registry.auto_applied_partials(1), &[3, 9]);
        assert_eq!(registry.auto_applied_partials(2), &[3]);
        assert_eq!(registry.auto_applied_partials(7), &[] as &[u32]);
    }
}
