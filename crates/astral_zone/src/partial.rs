use astral_data::{DefinitionRegistry, ZoneData, ZonePartialData};

/// Applies one partial on top of a zone definition.
///
/// Merge policy: scalar fields override only when the partial sets them,
/// keyed child tables union with the partial winning on conflict, and
/// unkeyed lists concatenate in application order.
fn apply_partial(zone: &mut ZoneData, partial: &ZonePartialData) {
    if let Some(x) = partial.starting_x {
        zone.starting_x = x;
    }
    if let Some(y) = partial.starting_y {
        zone.starting_y = y;
    }
    if let Some(rot) = partial.starting_rotation {
        zone.starting_rotation = rot;
    }

    for (&id, npc) in &partial.npcs {
        zone.npcs.insert(id, npc.clone());
    }
    for (&id, object) in &partial.objects {
        zone.objects.insert(id, object.clone());
    }
    for (&id, group) in &partial.spawn_groups {
        zone.spawn_groups.insert(id, group.clone());
    }
    for (&id, actions) in &partial.spot_actions {
        zone.spot_actions.insert(id, actions.clone());
    }

    zone.triggers.extend(partial.triggers.iter().cloned());
    zone.drop_sets.extend(partial.drop_sets.iter().copied());
    zone.skill_blacklist
        .extend(partial.skill_blacklist.iter().copied());
    zone.skill_whitelist
        .extend(partial.skill_whitelist.iter().copied());
}

/// Builds the merged zone: the base definition, the auto-apply partials for
/// its dynamic map in ascending ID order, then the explicitly selected
/// partials in the order given.
///
/// Overlapping partials are order-dependent by design; the selection order
/// is the authority. Unknown zone or partial IDs merge to `None` /
/// skip-silently respectively.
pub fn merged_zone(
    defs: &DefinitionRegistry,
    zone_id: u32,
    selected_partials: &[u32],
) -> Option<ZoneData> {
    let mut zone = defs.zone(zone_id)?.clone();

    for &partial_id in defs.auto_applied_partials(zone.dynamic_map_id) {
        if let Some(partial) = defs.zone_partial(partial_id) {
            apply_partial(&mut zone, partial);
        }
    }

    for &partial_id in selected_partials {
        if let Some(partial) = defs.zone_partial(partial_id) {
            apply_partial(&mut zone, partial);
        }
    }

    Some(zone)
}
