use std::sync::Arc;

use astral_core::{ClientTime, EntityId};
use astral_protocol::packets::game as pkt;
use astral_protocol::PacketFrame;
use tracing::debug;

use crate::client::ClientSession;
use crate::dispatch::{parse, ParseOutcome};
use crate::server::ChannelServer;

/// Re-sends the entity population of the client's current zone.
pub fn populate_zone(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let request = parse!(frame, pkt::PopulateZone);

    let Some(entity) = session.controlled_entity(EntityId(request.entity_id)) else {
        debug!(entity = request.entity_id, "populate request for an entity the client does not own");
        return ParseOutcome::Malformed;
    };

    let Some(zone) = server.zones().zone_of(entity.id()) else {
        return ParseOutcome::Handled;
    };

    let now = server.now();
    for other in zone.entities() {
        if other.id() == entity.id() {
            continue;
        }
        other.refresh_current_position(now);

        let (x, y, rotation) = other.position();
        let (hp, _) = other.hp_mp();
        let name = other
            .with_backing(|b| match b {
                astral_entity::EntityBacking::Character(c) => c.name.clone(),
                _ => String::new(),
            })
            .unwrap_or_default();

        session.send_packet(&pkt::EntityAppeared {
            entity_id: other.id().0,
            kind: match other.kind() {
                astral_entity::EntityKind::Character => 0,
                astral_entity::EntityKind::PartnerDemon => 1,
                astral_entity::EntityKind::Enemy => 2,
            },
            name: name.as_str().into(),
            x,
            y,
            rotation,
            max_hp: other.max_hp(),
            hp,
        });
    }

    ParseOutcome::Handled
}

/// Movement intent: update the entity's interpolation endpoints, fire spot
/// triggers, and relay to the rest of the zone.
pub fn move_entity(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let request = parse!(frame, pkt::Move);

    let Some(entity) = session.controlled_entity(EntityId(request.entity_id)) else {
        debug!(entity = request.entity_id, "move request for an entity the client does not own");
        return ParseOutcome::Malformed;
    };

    let start = session.to_server_time(ClientTime(request.start_time));
    entity.refresh_current_position(server.now());
    let (origin_x, origin_y, _) = entity.position();
    entity.move_to(request.dest_x, request.dest_y, start);

    let Some(zone) = server.zones().zone_of(entity.id()) else {
        return ParseOutcome::Handled;
    };

    // Spot presence follows the destination; enter/leave actions fire on
    // the worker that accepted the move.
    let actions = zone.update_spot_presence(entity.id(), request.dest_x, request.dest_y);
    server.run_actions(session, &zone, actions);

    zone.broadcast_packet(
        &pkt::MoveNotify {
            entity_id: entity.id().0,
            dest_x: request.dest_x,
            dest_y: request.dest_y,
            origin_x,
            origin_y,
            start_time: request.start_time,
            stop_time: request.stop_time,
        },
        Some(entity.id()),
    );

    ParseOutcome::Handled
}

pub fn rotate(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let request = parse!(frame, pkt::Rotate);

    let Some(entity) = session.controlled_entity(EntityId(request.entity_id)) else {
        debug!(entity = request.entity_id, "rotate request for an entity the client does not own");
        return ParseOutcome::Malformed;
    };

    let start = session.to_server_time(ClientTime(request.start_time));
    entity.refresh_current_position(server.now());
    entity.rotate(request.rotation, start);

    if let Some(zone) = server.zones().zone_of(entity.id()) {
        zone.broadcast_packet(
            &pkt::RotateNotify {
                entity_id: entity.id().0,
                rotation: request.rotation,
                start_time: request.start_time,
                stop_time: request.stop_time,
            },
            Some(entity.id()),
        );
    }

    ParseOutcome::Handled
}
