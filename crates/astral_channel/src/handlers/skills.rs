use std::sync::Arc;

use astral_core::{EntityId, ServerTime};
use astral_entity::{StatusApplication, EFFECT_CANCEL_SKILL};
use astral_protocol::packets::game as pkt;
use astral_protocol::PacketFrame;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::client::{ClientSession, SkillActivation};
use crate::dispatch::{parse, ParseOutcome};
use crate::server::ChannelServer;

/// Charges a skill: validates ownership and cost, then records the
/// activation for the matching execute or cancel.
pub fn activate(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let request = parse!(frame, pkt::ActivateSkill);

    let Some(entity) = session.controlled_entity(EntityId(request.entity_id)) else {
        debug!(entity = request.entity_id, "skill activation for an entity the client does not own");
        return ParseOutcome::Malformed;
    };

    // Unknown skills no-op to stay compatible with newer content.
    if server.characters().definitions().skill(request.skill_id).is_none() {
        debug!(skill = request.skill_id, "activation of an unknown skill");
        return ParseOutcome::Handled;
    }

    let mut state = session.state();
    let activation_id = state.next_activation_id;
    state.next_activation_id = state.next_activation_id.wrapping_add(1);
    state.pending_skill = Some(SkillActivation {
        activation_id,
        skill_id: request.skill_id,
        entity_id: entity.id(),
        target_object_id: request.target_object_id,
    });

    ParseOutcome::Handled
}

/// Executes a charged skill: pays costs, fires the skill-cancel flag on
/// the source, and applies the skill's statuses to the target. The queued
/// status deltas flow to subscribers on the next zone tick.
pub fn execute(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let request = parse!(frame, pkt::ExecuteSkill);

    let pending = {
        let mut state = session.state();
        match state.pending_skill {
            Some(p)
                if p.activation_id == request.activation_id
                    && p.entity_id == EntityId(request.entity_id) =>
            {
                state.pending_skill = None;
                p
            }
            _ => {
                debug!(
                    activation = request.activation_id,
                    "execute without a matching activation"
                );
                return ParseOutcome::Malformed;
            }
        }
    };

    let Some(source) = session.controlled_entity(pending.entity_id) else {
        return ParseOutcome::Malformed;
    };

    let defs = server.characters().definitions();
    let Some(skill) = defs.skill(pending.skill_id) else {
        return ParseOutcome::Handled;
    };

    let now = server.now();
    let now_secs = ServerTime::system_secs();

    // Costs come out first; a skill the entity can no longer afford fizzles.
    let hp_cost = skill.hp_cost as i16;
    let mp_cost = skill.mp_cost as i16;
    if hp_cost > 0 || mp_cost > 0 {
        let (hp, mp) = source.hp_mp();
        if hp <= hp_cost || mp < mp_cost {
            debug!(skill = skill.id, "skill fizzled for lack of HP/MP");
            return ParseOutcome::Handled;
        }
        source.set_hp_mp(-hp_cost, -mp_cost, true, false, now);
    }

    // Performing a skill cancels the source's skill-bound effects.
    source.cancel_status_effects(EFFECT_CANCEL_SKILL);

    if !skill.applied_statuses.is_empty() {
        let target = resolve_target(server, session, &pending, &source);

        if let Some(target) = target {
            let mut effects = FxHashMap::default();
            for applied in &skill.applied_statuses {
                effects.insert(
                    applied.status_id,
                    StatusApplication {
                        stack: applied.stack,
                        is_replace: applied.is_replace,
                    },
                );
            }
            target.add_status_effects(&effects, defs, now_secs, true);
            target.recalculate_stats(defs);
        }
    }

    ParseOutcome::Handled
}

/// Cancels a charged skill by activation ID.
pub fn cancel(
    _server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let request = parse!(frame, pkt::CancelSkill);

    let mut state = session.state();
    match state.pending_skill {
        Some(p)
            if p.activation_id == request.activation_id
                && p.entity_id == EntityId(request.entity_id) =>
        {
            state.pending_skill = None;
            ParseOutcome::Handled
        }
        _ => {
            debug!(
                activation = request.activation_id,
                "cancel without a matching activation"
            );
            ParseOutcome::Malformed
        }
    }
}

/// The execute target: the source itself, one of the client's own
/// entities, or another entity in the same zone addressed by entity ID.
fn resolve_target(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    pending: &SkillActivation,
    source: &Arc<astral_entity::ActiveEntity>,
) -> Option<Arc<astral_entity::ActiveEntity>> {
    if pending.target_object_id <= 0 {
        return Some(source.clone());
    }

    let target_id = EntityId(pending.target_object_id as i32);
    if let Some(own) = session.controlled_entity(target_id) {
        return Some(own);
    }

    server
        .zones()
        .zone_of(source.id())
        .and_then(|zone| zone.entity(target_id))
}
