use std::sync::Arc;

use astral_entity::EntityBacking;
use astral_protocol::packets::game as pkt;
use astral_protocol::PacketFrame;

use crate::client::ClientSession;
use crate::dispatch::{parse, ParseOutcome};
use crate::server::ChannelServer;

/// Chat channels the handler understands.
const CHAT_ZONE: u16 = 0;
const CHAT_SHOUT: u16 = 1;

pub fn chat(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let chat = parse!(frame, pkt::Chat);

    let Some(entity) = session.character() else {
        return ParseOutcome::Malformed;
    };

    let sender = entity
        .with_backing(|b| match b {
            EntityBacking::Character(c) => c.name.clone(),
            _ => String::new(),
        })
        .unwrap_or_default();

    let notify = pkt::ChatNotify {
        channel: chat.channel,
        sender: sender.as_str().into(),
        message: chat.message.clone(),
    };

    match chat.channel {
        CHAT_ZONE => {
            if let Some(zone) = server.zones().zone_of(entity.id()) {
                zone.broadcast_packet(&notify, None);
            }
        }
        CHAT_SHOUT => {
            // Shout reaches every connected client on the channel.
            for other in server.registry().sessions() {
                other.send_packet(&notify);
            }
        }
        _ => return ParseOutcome::Malformed,
    }

    ParseOutcome::Handled
}
