use std::sync::Arc;

use astral_protocol::packets::game as pkt;
use astral_protocol::{Packet, PacketFrame};
use thiserror::Error;
use tracing::debug;

use crate::client::{ClientSession, ConnectionState};
use crate::handlers;
use crate::server::ChannelServer;

/// What became of an inbound frame. Parse failures are values, never
/// panics, and never cross a thread boundary as an unwind.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParseOutcome {
    Handled,
    /// Bad size, bad string, bad enum value: drop the frame, keep the
    /// connection.
    Malformed,
    /// The handler decided the connection must go away.
    Disconnect,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    /// An opcode that is never legal in the connection's current state.
    /// Unlike a malformed body this is a hard protocol violation.
    #[error("opcode {opcode:#06x} is not valid in state {state:?}")]
    UnknownOpcode {
        opcode: u16,
        state: ConnectionState,
    },
}

/// Routes a frame to its handler based on the connection state.
pub fn dispatch(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> Result<ParseOutcome, HandlerError> {
    let state = session.connection_state();

    // Work items for a closed connection still drain the queue.
    if state == ConnectionState::Closed {
        return Ok(ParseOutcome::Handled);
    }

    let outcome = match (state, frame.opcode) {
        (ConnectionState::Handshake, pkt::Login::OPCODE) => {
            handlers::auth::login(server, session, frame)
        }

        (ConnectionState::Authenticated, pkt::Auth::OPCODE) => {
            handlers::auth::auth(server, session, frame)
        }
        (ConnectionState::Authenticated, pkt::SendData::OPCODE) => {
            handlers::auth::send_data(server, session, frame)
        }

        (ConnectionState::Authenticated | ConnectionState::InGame, pkt::Logout::OPCODE) => {
            handlers::auth::logout(server, session, frame)
        }
        (ConnectionState::Authenticated | ConnectionState::InGame, pkt::KeepAlive::OPCODE) => {
            handlers::auth::keep_alive(server, session, frame)
        }

        (ConnectionState::InGame, pkt::PopulateZone::OPCODE) => {
            handlers::movement::populate_zone(server, session, frame)
        }
        (ConnectionState::InGame, pkt::Move::OPCODE) => {
            handlers::movement::move_entity(server, session, frame)
        }
        (ConnectionState::InGame, pkt::Rotate::OPCODE) => {
            handlers::movement::rotate(server, session, frame)
        }
        (ConnectionState::InGame, pkt::Chat::OPCODE) => {
            handlers::chat::chat(server, session, frame)
        }
        (ConnectionState::InGame, pkt::ActivateSkill::OPCODE) => {
            handlers::skills::activate(server, session, frame)
        }
        (ConnectionState::InGame, pkt::ExecuteSkill::OPCODE) => {
            handlers::skills::execute(server, session, frame)
        }
        (ConnectionState::InGame, pkt::CancelSkill::OPCODE) => {
            handlers::skills::cancel(server, session, frame)
        }
        (ConnectionState::InGame, pkt::ItemMove::OPCODE) => {
            handlers::items::item_move(server, session, frame)
        }
        (ConnectionState::InGame, pkt::ItemDrop::OPCODE) => {
            handlers::items::item_drop(server, session, frame)
        }

        (state, opcode) => return Err(HandlerError::UnknownOpcode { opcode, state }),
    };

    if outcome == ParseOutcome::Malformed {
        debug!(
            opcode = format_args!("{:#06x}", frame.opcode),
            "dropping malformed packet"
        );
    }

    Ok(outcome)
}

/// Decodes a packet body or reports the frame malformed.
macro_rules! parse {
    ($frame:expr, $ty:ty) => {
        match $frame.decode::<$ty>() {
            Ok(pkt) => pkt,
            Err(e) => {
                ::tracing::debug!(
                    "failed to decode {}: {e:#}",
                    <$ty as ::astral_protocol::Packet>::NAME
                );
                return $crate::dispatch::ParseOutcome::Malformed;
            }
        }
    };
}

pub(crate) use parse;
