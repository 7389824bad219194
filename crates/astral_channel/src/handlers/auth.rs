use std::sync::Arc;

use astral_core::ServerTime;
use astral_protocol::packets::game as pkt;
use astral_protocol::PacketFrame;
use tracing::{debug, info};

use crate::client::{ClientSession, ConnectionState};
use crate::dispatch::{parse, ParseOutcome};
use crate::server::ChannelServer;

/// Login response codes.
const LOGIN_OK: u32 = 0;
const LOGIN_BAD_VERSION: u32 = 2;

/// Auth response codes.
const AUTH_OK: u32 = 0;
const AUTH_BAD_SESSION: u32 = 3;

pub fn login(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let login = parse!(frame, pkt::Login);

    if login.client_version != server.expected_client_version() {
        debug!(
            version = login.client_version,
            "rejecting client with wrong version"
        );
        session.send_packet(&pkt::LoginReply {
            response: LOGIN_BAD_VERSION,
        });
        return ParseOutcome::Disconnect;
    }

    {
        let mut state = session.state();
        state.username = login.username.0.clone();
        state.login_epoch = server.now();
        state.conn = ConnectionState::Authenticated;
    }
    session.refresh_timeout(server.now(), 10);

    session.send_packet(&pkt::LoginReply { response: LOGIN_OK });
    ParseOutcome::Handled
}

pub fn auth(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let auth = parse!(frame, pkt::Auth);

    let username = session.state().username.clone();
    match server.take_pending_login(&auth.session_key.0) {
        Some(cid) => {
            {
                let mut state = session.state();
                state.cid = cid;
                state.session_key = auth.session_key.0.clone();
            }
            session.send_packet(&pkt::AuthReply { response: AUTH_OK });
            ParseOutcome::Handled
        }
        None => {
            debug!(username, "rejecting auth with an unknown session key");
            session.send_packet(&pkt::AuthReply {
                response: AUTH_BAD_SESSION,
            });
            ParseOutcome::Disconnect
        }
    }
}

/// The client is ready: bind the character, enter its zone, and send the
/// full character dump.
pub fn send_data(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let _ = parse!(frame, pkt::SendData);

    let Some(entity) = server.bind_character(session) else {
        debug!("send data with no character bound to the account");
        return ParseOutcome::Disconnect;
    };

    let now = server.now();
    let now_secs = ServerTime::system_secs();
    server
        .zones()
        .enter(&entity, 0, server.home_zone_id(), &[], None, now, now_secs);

    if let Some(zone) = server.zones().zone_of(entity.id()) {
        zone.subscribe(entity.id(), session.clone());
    }

    session.set_connection_state(ConnectionState::InGame);
    server
        .characters()
        .send_character_data(session, server.zones());
    server.characters().send_status_icon(session, server.zones(), 0);

    info!(cid = session.state().cid, "client entered the game");
    ParseOutcome::Handled
}

pub fn logout(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let logout = parse!(frame, pkt::Logout);

    match logout.code {
        pkt::LogoutCode::Quit => {
            session.state().logout_save = true;
            session.send_packet(&pkt::LogoutReply { code: 1 });
            server.begin_logout(session);
            ParseOutcome::Handled
        }
        pkt::LogoutCode::Cancel => {
            session.state().logout_save = false;
            session.refresh_timeout(server.now(), 10);
            session.send_packet(&pkt::LogoutReply { code: 2 });
            ParseOutcome::Handled
        }
        pkt::LogoutCode::ChannelSwitch(channel_id) => {
            session.send_packet(&pkt::LogoutReply { code: 3 });
            server.begin_channel_switch(session, channel_id);
            ParseOutcome::Handled
        }
    }
}

/// Keep-alives refresh the timeout (unless a logout is pending), bring the
/// client's entity positions up to date, and echo the token.
pub fn keep_alive(
    server: &ChannelServer,
    session: &Arc<ClientSession>,
    frame: &PacketFrame,
) -> ParseOutcome {
    let keep_alive = parse!(frame, pkt::KeepAlive);

    let now = server.now();
    session.refresh_timeout(now, 10);

    if let Some(entity) = session.character() {
        entity.refresh_current_position(now);
    }
    if let Some(demon) = session.demon() {
        if demon.ready() {
            demon.refresh_current_position(now);
        }
    }

    session.send_packet(&pkt::KeepAliveReply {
        token: keep_alive.token,
    });
    ParseOutcome::Handled
}
