//! The internal link to the world server. Same framing as the client
//! protocol with opcodes in the 0x1000 range; the channel both consumes
//! relayed updates and reports logins and logouts upstream.

use astral_protocol::encode::encode_frame;
use astral_protocol::packets::internal as ipkt;
use astral_protocol::{Encode, Packet, PacketFrame};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::server::ChannelServer;

const READ_BUF_SIZE: usize = 4096;

/// Outgoing half of the world-server connection.
#[derive(Clone)]
pub struct WorldLink {
    outgoing: flume::Sender<Bytes>,
}

impl WorldLink {
    pub fn send_packet<P>(&self, pkt: &P)
    where
        P: Packet + Encode,
    {
        match encode_frame(pkt) {
            Ok(frame) => {
                if self.outgoing.try_send(Bytes::from(frame.to_vec())).is_err() {
                    warn!("world link is closed or saturated");
                }
            }
            Err(e) => warn!("failed to encode '{}': {e:#}", P::NAME),
        }
    }

    /// Reports a user logout (or channel switch) to the world.
    pub fn send_account_logout(&self, action: u8, channel_id: u8, session_key: &str) {
        self.send_packet(&ipkt::AccountLogout {
            action,
            channel_id,
            session_key: session_key.into(),
        });
    }
}

/// Connects to the world server and runs its reader until the link drops.
/// Inbound internal frames are posted to the worker queue like any other
/// work.
pub async fn connect(server: ChannelServer, addr: &str) -> anyhow::Result<WorldLink> {
    let stream = TcpStream::connect(addr).await?;
    info!(%addr, "connected to world server");

    let (outgoing_tx, outgoing_rx) = flume::bounded::<Bytes>(256);
    let link = WorldLink {
        outgoing: outgoing_tx,
    };

    let (mut reader, mut writer) = stream.into_split();

    tokio::spawn(async move {
        while let Ok(bytes) = outgoing_rx.recv_async().await {
            if let Err(e) = writer.write_all(&bytes).await {
                debug!("error writing to world link: {e}");
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut dec = astral_protocol::PacketDecoder::new();
        let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);

        loop {
            match dec.try_next_packet() {
                Ok(Some(frame)) => {
                    let server = server.clone();
                    server.clone().post(Box::new(move || {
                        handle_internal_frame(&server, &frame);
                    }));
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("error decoding world frame: {e:#}");
                    break;
                }
            }

            buf.reserve(READ_BUF_SIZE);
            match reader.read_buf(&mut buf).await {
                Ok(0) => {
                    warn!("world server closed the connection");
                    break;
                }
                Ok(_) => dec.queue_bytes(buf.split()),
                Err(e) => {
                    warn!("error reading from world link: {e}");
                    break;
                }
            }
        }
    });

    Ok(link)
}

/// Handles one frame from the world server.
pub fn handle_internal_frame(server: &ChannelServer, frame: &PacketFrame) {
    match frame.opcode {
        ipkt::AccountLogin::OPCODE => match frame.decode::<ipkt::AccountLogin>() {
            Ok(login) => {
                debug!(cid = login.cid, "lobby handoff announced");
                // The staged character arrives through the persistence
                // layer keyed by CID; the handoff only carries the key.
                server.stage_handoff(login.cid, &login.session_key.0);
            }
            Err(e) => debug!("malformed AccountLogin: {e:#}"),
        },

        ipkt::AccountLogout::OPCODE => match frame.decode::<ipkt::AccountLogout>() {
            Ok(logout) => handle_account_logout(server, &logout),
            Err(e) => debug!("malformed AccountLogout: {e:#}"),
        },

        ipkt::PartyUpdate::OPCODE => match frame.decode::<ipkt::PartyUpdate>() {
            Ok(update) => relay(server, &update.member_cids, &update.payload.0),
            Err(e) => debug!("malformed PartyUpdate: {e:#}"),
        },

        ipkt::ClanUpdate::OPCODE => match frame.decode::<ipkt::ClanUpdate>() {
            Ok(update) => relay(server, &update.member_cids, &update.payload.0),
            Err(e) => debug!("malformed ClanUpdate: {e:#}"),
        },

        opcode => warn!(
            opcode = format_args!("{opcode:#06x}"),
            "unknown internal opcode"
        ),
    }
}

fn handle_account_logout(server: &ChannelServer, logout: &ipkt::AccountLogout) {
    match logout.action {
        ipkt::LOGOUT_ACTION_DISCONNECT => {
            // The lobby says this user is gone everywhere; close any
            // session that still holds the key.
            for session in server.registry().sessions() {
                if session.state().session_key == logout.session_key.0 {
                    server.close_session(&session);
                }
            }
        }
        ipkt::LOGOUT_ACTION_CHANNEL_SWITCH => {
            let cid = server
                .registry()
                .sessions()
                .into_iter()
                .find(|s| s.state().session_key == logout.session_key.0)
                .map(|s| s.state().cid);

            if let Some(cid) = cid {
                if !server.confirm_channel_switch(cid, &logout.session_key.0) {
                    debug!(cid, "switch confirmation with nothing pending");
                }
            }
        }
        action => debug!(action, "unknown account logout action"),
    }
}

/// Fans an opaque payload out to every member with a live session here.
/// The payload is already a framed packet; it is forwarded untouched.
fn relay(server: &ChannelServer, member_cids: &[u32], payload: &[u8]) {
    let frame = Bytes::copy_from_slice(payload);
    for &cid in member_cids {
        if let Some(session) = server.registry().by_cid(cid) {
            session.send_bytes(frame.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use astral_data::DefinitionRegistryBuilder;
    use astral_protocol::PacketDecoder;

    use super::*;
    use crate::client::ClientSession;
    use crate::config::ChannelConfig;
    use crate::persistence::MemoryStore;

    fn test_server() -> ChannelServer {
        ChannelServer::new(
            ChannelConfig::default(),
            Arc::new(DefinitionRegistryBuilder::default().build()),
            Arc::new(MemoryStore::new()),
        )
    }

    fn frame_of<P: Packet + Encode>(pkt: &P) -> PacketFrame {
        let bytes = encode_frame(pkt).unwrap();
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&bytes);
        dec.try_next_packet().unwrap().unwrap()
    }

    #[test]
    fn party_update_relays_to_members_only() {
        let server = test_server();

        let (tx_a, rx_a) = flume::bounded(8);
        let (tx_b, rx_b) = flume::bounded(8);
        let a = Arc::new(ClientSession::new(tx_a));
        let b = Arc::new(ClientSession::new(tx_b));
        server
            .registry()
            .register(1, astral_core::EntityId(10), a);
        server
            .registry()
            .register(2, astral_core::EntityId(11), b);

        let frame = frame_of(&ipkt::PartyUpdate {
            party_id: 5,
            member_cids: vec![1],
            payload: astral_protocol::RawBytes(vec![0xAB, 0xCD]),
        });
        handle_internal_frame(&server, &frame);

        assert_eq!(rx_a.try_recv().unwrap().as_ref(), &[0xAB, 0xCD]);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn disconnect_logout_closes_the_matching_session() {
        let server = test_server();

        let (tx, _rx) = flume::bounded(8);
        let session = Arc::new(ClientSession::new(tx));
        session.state().session_key = "gone".into();
        server
            .registry()
            .register(1, astral_core::EntityId(10), session.clone());

        let frame = frame_of(&ipkt::AccountLogout {
            action: ipkt::LOGOUT_ACTION_DISCONNECT,
            channel_id: 0,
            session_key: "gone".into(),
        });
        handle_internal_frame(&server, &frame);

        assert!(session.is_closed());
    }
}
