use std::sync::Arc;

use astral_protocol::packets::game as pkt;
use astral_protocol::PacketFrame;
use tracing::debug;
use uuid::Uuid;

use crate::character_manager::{ItemChanges, INVENTORY_BOX};
use crate::client::ClientSession;
use crate::dispatch::{parse, ParseOutcome};
use crate::server::ChannelServer;

/// Moves an item to another slot (or box). Out-of-scope boxes degrade to
/// the inventory.
pub fn item_move(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let request = parse!(frame, pkt::ItemMove);

    let moved = {
        let mut state = session.state();
        let Some(inventory) = state.item_boxes.get_mut(&INVENTORY_BOX) else {
            return ParseOutcome::Handled;
        };

        let from = inventory
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|i| i.object_id == request.item_object_id));
        let to = request.dest_slot as usize;

        match from {
            Some(from) if to < inventory.slots.len() => {
                inventory.slots.swap(from, to);
                if let Some(item) = inventory.slots[to].as_mut() {
                    item.slot = to as u16;
                }
                if let Some(item) = inventory.slots[from].as_mut() {
                    item.slot = from as u16;
                }
                true
            }
            _ => {
                debug!(
                    object_id = request.item_object_id,
                    "item move for an unknown item or slot"
                );
                false
            }
        }
    };

    if moved {
        server.characters().send_item_box_data(session, INVENTORY_BOX);
    }
    ParseOutcome::Handled
}

/// Drops an item on the ground, which destroys it server-side.
pub fn item_drop(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let request = parse!(frame, pkt::ItemDrop);

    let uuid: Option<Uuid> = {
        let state = session.state();
        state
            .item_boxes
            .get(&INVENTORY_BOX)
            .and_then(|b| b.find_by_object_id(request.item_object_id))
            .map(|i| i.uuid)
    };

    let Some(uuid) = uuid else {
        debug!(object_id = request.item_object_id, "drop for an unknown item");
        return ParseOutcome::Malformed;
    };

    let changes = ItemChanges {
        deletes: vec![uuid],
        ..Default::default()
    };
    if let Err(e) = server.characters().update_items(session, false, &changes) {
        debug!("item drop failed: {e}");
    }

    ParseOutcome::Handled
}
