use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use astral_core::{EntityIdAllocator, Scheduler, ServerClock, ServerTime, WorkItem};
use astral_data::{DefinitionRegistry, ServerAction};
use astral_entity::{
    ActiveEntity, CharacterBacking, EntityBacking, EntityKind, StatusEffect, EFFECT_CANCEL_LOGOUT,
};
use astral_zone::{Zone, ZoneManager};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::character_manager::CharacterManager;
use crate::client::{ClientRegistry, ClientSession, ConnectionState};
use crate::config::ChannelConfig;
use crate::dispatch::{self, ParseOutcome};
use crate::persistence::{ChangeSetStore, DatabaseChangeSet, Persisted};

/// Client build accepted by this server.
const CLIENT_VERSION: u32 = 1666;

const READ_BUF_SIZE: usize = 4096;

/// A login handed off from the lobby, waiting for the client to prove it.
struct PendingLogin {
    cid: u32,
}

/// A channel switch waiting for the peer channel to confirm.
struct PendingSwitch {
    session_key: String,
}

struct ServerInner {
    config: ChannelConfig,
    clock: ServerClock,
    defs: Arc<DefinitionRegistry>,
    zones: ZoneManager,
    characters: CharacterManager,
    registry: ClientRegistry,
    entity_ids: EntityIdAllocator,
    store: Arc<dyn ChangeSetStore>,
    scheduler: Scheduler,
    work_tx: flume::Sender<WorkItem>,
    work_rx: flume::Receiver<WorkItem>,
    /// session key -> staged login from the lobby.
    pending_logins: Mutex<FxHashMap<String, PendingLogin>>,
    /// cid -> unconfirmed channel switch.
    pending_switches: Mutex<FxHashMap<u32, PendingSwitch>>,
    /// cid -> character staged for binding at SendData.
    staged_characters: Mutex<FxHashMap<u32, (CharacterBacking, Vec<StatusEffect>)>>,
    home_zone_id: u32,
    shutdown: AtomicBool,
}

/// The channel server. Cheap to clone; all state lives behind the shared
/// inner.
#[derive(Clone)]
pub struct ChannelServer {
    inner: Arc<ServerInner>,
}

impl ChannelServer {
    pub fn new(
        config: ChannelConfig,
        defs: Arc<DefinitionRegistry>,
        store: Arc<dyn ChangeSetStore>,
    ) -> Self {
        let clock = ServerClock::new();
        let (work_tx, work_rx) = flume::unbounded();
        let scheduler = Scheduler::new(clock, work_tx.clone());

        Self {
            inner: Arc::new(ServerInner {
                characters: CharacterManager::new(defs.clone(), store.clone()),
                zones: ZoneManager::new(defs.clone()),
                config,
                clock,
                defs,
                registry: ClientRegistry::new(),
                entity_ids: EntityIdAllocator::new(),
                store,
                scheduler,
                work_tx,
                work_rx,
                pending_logins: Mutex::default(),
                pending_switches: Mutex::default(),
                staged_characters: Mutex::default(),
                home_zone_id: 1,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn now(&self) -> ServerTime {
        self.inner.clock.now()
    }

    pub fn definitions(&self) -> &Arc<DefinitionRegistry> {
        &self.inner.defs
    }

    pub fn zones(&self) -> &ZoneManager {
        &self.inner.zones
    }

    pub fn characters(&self) -> &CharacterManager {
        &self.inner.characters
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.inner.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn expected_client_version(&self) -> u32 {
        CLIENT_VERSION
    }

    pub fn home_zone_id(&self) -> u32 {
        self.inner.home_zone_id
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Relaxed)
    }

    /// Queues a work item for the worker pool.
    pub fn post(&self, work: WorkItem) {
        if self.inner.work_tx.send(work).is_err() {
            warn!("work queue is closed");
        }
    }

    // -----------------------------------------------------------------
    // Lobby handoff
    // -----------------------------------------------------------------

    /// Stages a lobby-announced login until the client proves the session
    /// key, together with the character it will play.
    pub fn add_pending_login(
        &self,
        cid: u32,
        session_key: &str,
        character: CharacterBacking,
        effects: Vec<StatusEffect>,
    ) {
        self.inner
            .pending_logins
            .lock()
            .insert(session_key.to_owned(), PendingLogin { cid });
        self.inner
            .staged_characters
            .lock()
            .insert(cid, (character, effects));
    }

    /// Records a lobby handoff that carries only the session key. The
    /// character record is staged separately once loaded for the CID.
    pub fn stage_handoff(&self, cid: u32, session_key: &str) {
        self.inner
            .pending_logins
            .lock()
            .insert(session_key.to_owned(), PendingLogin { cid });
    }

    /// Consumes a staged login if the session key matches.
    pub fn take_pending_login(&self, session_key: &str) -> Option<u32> {
        self.inner
            .pending_logins
            .lock()
            .remove(session_key)
            .map(|p| p.cid)
    }

    /// Builds the character's active entity from its staged record and
    /// registers the client under it.
    pub fn bind_character(&self, session: &Arc<ClientSession>) -> Option<Arc<ActiveEntity>> {
        let cid = session.state().cid;
        let (character, effects) = self.inner.staged_characters.lock().remove(&cid)?;

        let entity = Arc::new(ActiveEntity::new(
            self.inner.entity_ids.next(),
            EntityKind::Character,
        ));
        entity.set_backing(EntityBacking::Character(character), effects);
        entity.recalculate_stats(&self.inner.defs);

        session.state().character = Some(entity.clone());
        self.inner.registry.register(cid, entity.id(), session.clone());

        Some(entity)
    }

    /// Allocates a fresh entity for a demon summon.
    pub fn new_demon_entity(&self) -> Arc<ActiveEntity> {
        Arc::new(ActiveEntity::new(
            self.inner.entity_ids.next(),
            EntityKind::PartnerDemon,
        ))
    }

    // -----------------------------------------------------------------
    // Logout and channel switch
    // -----------------------------------------------------------------

    /// Starts the logout countdown; the disconnect lands unless the client
    /// cancels in time.
    pub fn begin_logout(&self, session: &Arc<ClientSession>) {
        let server = self.clone();
        let session = session.clone();
        self.inner.scheduler.schedule_in(
            Duration::from_secs(10),
            Box::new(move || {
                if session.state().logout_save {
                    server.close_session(&session);
                }
            }),
        );
    }

    /// Marks a channel switch pending and forces a logout if the target
    /// channel never confirms.
    pub fn begin_channel_switch(&self, session: &Arc<ClientSession>, channel_id: u8) {
        let (cid, session_key) = {
            let state = session.state();
            (state.cid, state.session_key.clone())
        };

        debug!(cid, channel_id, "channel switch requested");
        self.inner
            .pending_switches
            .lock()
            .insert(cid, PendingSwitch { session_key });

        let server = self.clone();
        let session = session.clone();
        let timeout = u64::from(self.inner.config.channel_connection_time_out);
        self.inner.scheduler.schedule_in(
            Duration::from_secs(timeout),
            Box::new(move || {
                if server.inner.pending_switches.lock().remove(&cid).is_some() {
                    warn!(cid, "channel switch timed out, forcing logout");
                    server.close_session(&session);
                }
            }),
        );
    }

    /// The peer channel confirmed the handoff; release the session without
    /// the forced-logout path.
    pub fn confirm_channel_switch(&self, cid: u32, session_key: &str) -> bool {
        let confirmed = {
            let mut switches = self.inner.pending_switches.lock();
            match switches.get(&cid) {
                Some(p) if p.session_key == session_key => {
                    switches.remove(&cid);
                    true
                }
                _ => false,
            }
        };

        if confirmed {
            if let Some(session) = self.inner.registry.by_cid(cid) {
                self.close_session(&session);
            }
        }
        confirmed
    }

    /// Tears a session down: logout cancels fire, the entities leave their
    /// zone, and the durable state is saved.
    pub fn close_session(&self, session: &Arc<ClientSession>) {
        let already_closed = {
            let mut state = session.state();
            let closed = state.conn == ConnectionState::Closed;
            state.conn = ConnectionState::Closed;
            closed
        };
        if already_closed {
            return;
        }

        let now_secs = ServerTime::system_secs();
        let (cid, character, demon) = {
            let state = session.state();
            (state.cid, state.character.clone(), state.demon.clone())
        };

        if let Some(demon) = demon {
            self.inner.zones.leave(demon.id(), now_secs);
        }

        if let Some(entity) = character {
            entity.cancel_status_effects(EFFECT_CANCEL_LOGOUT);
            self.inner.zones.leave(entity.id(), now_secs);
            self.save_on_logout(&entity);
            self.inner.registry.unregister(cid, entity.id());
        }

        info!(cid, "session closed");
    }

    fn save_on_logout(&self, entity: &Arc<ActiveEntity>) {
        let Some(character) = entity.with_backing(|b| match b {
            EntityBacking::Character(c) => Some(c.clone()),
            _ => None,
        })
        .flatten() else {
            return;
        };

        let mut change_set = DatabaseChangeSet::new();
        let entity_uuid = character.uuid;
        change_set.update(Persisted::Character(Box::new(character)));
        change_set.update(Persisted::StatusEffects {
            entity_uuid,
            effects: entity.status_effects(),
        });

        if let Err(e) = self.inner.store.process_change_set(change_set) {
            // The user-visible operation already happened; all that is
            // left is to scream.
            error!("logout save failed: {e}");
        }
    }

    // -----------------------------------------------------------------
    // Spot / trigger actions
    // -----------------------------------------------------------------

    /// Executes server-side actions fired by spot transitions.
    pub fn run_actions(
        &self,
        session: &Arc<ClientSession>,
        zone: &Arc<Zone>,
        actions: Vec<ServerAction>,
    ) {
        for action in actions {
            match action {
                ServerAction::StartEvent { event_id } => {
                    debug!(event_id, cid = session.state().cid, "spot event fired");
                }
                ServerAction::SetZoneFlag { flag, value } => {
                    debug!(flag, value, zone = zone.zone_id(), "zone flag updated");
                }
                ServerAction::ToggleSpawnGroup { group_id, enable } => {
                    debug!(group_id, enable, zone = zone.zone_id(), "spawn group toggled");
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Worker pool and tick loop
    // -----------------------------------------------------------------

    /// Spawns the configured number of worker threads consuming the work
    /// queue, plus the effect tick loop.
    pub fn start_workers(&self) {
        let count = self.inner.config.worker_thread_count.max(1);
        for i in 0..count {
            let server = self.clone();
            std::thread::Builder::new()
                .name(format!("astral-worker-{i}"))
                .spawn(move || {
                    while let Ok(work) = server.inner.work_rx.recv() {
                        work();
                        if server.is_shutting_down() {
                            break;
                        }
                    }
                })
                .expect("failed to spawn worker thread");
        }

        let server = self.clone();
        std::thread::Builder::new()
            .name("astral-tick".into())
            .spawn(move || server.tick_loop())
            .expect("failed to spawn tick thread");
    }

    fn tick_loop(&self) {
        while !self.is_shutting_down() {
            std::thread::sleep(Duration::from_millis(250));

            let now_secs = ServerTime::system_secs();
            let now = self.now();

            if self
                .inner
                .zones
                .earliest_wake()
                .is_some_and(|t| t <= now_secs)
            {
                self.inner.zones.process_due(now_secs, now);
            }

            self.sweep_keepalive(now);
        }
    }

    /// Closes sessions whose keep-alive window lapsed.
    fn sweep_keepalive(&self, now: ServerTime) {
        for session in self.inner.registry.sessions() {
            let deadline = session.state().keepalive_deadline;
            if deadline != ServerTime::ZERO && now > deadline && !session.is_closed() {
                warn!("closing session after missed keep-alives");
                self.close_session(&session);
            }
        }
    }

    // -----------------------------------------------------------------
    // Networking
    // -----------------------------------------------------------------

    /// Accept loop for the client listener. Runs until shutdown.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let addr = (self.inner.config.listen_address, self.inner.config.port);
        let listener = TcpListener::bind(addr).await?;
        info!(
            address = %listener.local_addr()?,
            "channel server listening"
        );

        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "accepted connection");

            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream).await;
            });
        }
    }

    /// Splits a connection into reader and writer tasks. The reader posts
    /// each decoded frame to the worker queue; the writer drains the
    /// session's outgoing byte channel.
    async fn handle_connection(&self, stream: TcpStream) {
        let (outgoing_tx, outgoing_rx) = flume::bounded::<Bytes>(256);
        let session = Arc::new(ClientSession::new(outgoing_tx));

        let (mut reader, mut writer) = stream.into_split();

        let writer_task = tokio::spawn(async move {
            while let Ok(bytes) = outgoing_rx.recv_async().await {
                if let Err(e) = writer.write_all(&bytes).await {
                    debug!("error writing to stream: {e}");
                    break;
                }
            }
        });

        let mut dec = astral_protocol::PacketDecoder::new();
        let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);

        loop {
            match dec.try_next_packet() {
                Ok(Some(frame)) => {
                    let server = self.clone();
                    let session = session.clone();
                    self.post(Box::new(move || {
                        server.handle_frame(&session, &frame);
                    }));
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    // Framing is unrecoverable; close the transport.
                    warn!("error decoding frame: {e:#}");
                    break;
                }
            }

            buf.reserve(READ_BUF_SIZE);
            match reader.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => dec.queue_bytes(buf.split()),
                Err(e) => {
                    debug!("error reading from stream: {e}");
                    break;
                }
            }
        }

        // Transport gone: tear the session down on a worker.
        let server = self.clone();
        let session_for_close = session.clone();
        self.post(Box::new(move || {
            server.close_session(&session_for_close);
        }));

        writer_task.abort();
    }

    /// Runs a frame through the dispatcher and applies the outcome.
    pub fn handle_frame(&self, session: &Arc<ClientSession>, frame: &astral_protocol::PacketFrame) {
        match dispatch::dispatch(self, session, frame) {
            Ok(ParseOutcome::Handled) | Ok(ParseOutcome::Malformed) => {}
            Ok(ParseOutcome::Disconnect) => self.close_session(session),
            Err(e) => {
                // Out-of-state opcodes are hard protocol violations.
                error!("{e}");
                self.close_session(session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use astral_data::{DefinitionRegistryBuilder, ZoneData};
    use astral_entity::CoreStats;
    use astral_protocol::encode::encode_frame;
    use astral_protocol::packets::game as pkt;
    use astral_protocol::{Packet, PacketDecoder};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::persistence::MemoryStore;

    fn test_server() -> ChannelServer {
        let defs = DefinitionRegistryBuilder::default()
            .zones([ZoneData {
                id: 1,
                dynamic_map_id: 11,
                ..Default::default()
            }])
            .build();
        ChannelServer::new(
            ChannelConfig::default(),
            Arc::new(defs),
            Arc::new(MemoryStore::new()),
        )
    }

    fn client() -> (Arc<ClientSession>, flume::Receiver<Bytes>) {
        let (tx, rx) = flume::bounded(64);
        (Arc::new(ClientSession::new(tx)), rx)
    }

    fn frame_of<P: Packet + astral_protocol::Encode>(pkt: &P) -> astral_protocol::PacketFrame {
        let bytes = encode_frame(pkt).unwrap();
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&bytes);
        dec.try_next_packet().unwrap().unwrap()
    }

    fn next_packet<P: Packet + astral_protocol::Decode>(rx: &flume::Receiver<Bytes>) -> P {
        loop {
            let bytes = rx.try_recv().expect("expected a reply frame");
            let mut dec = PacketDecoder::new();
            dec.queue_slice(&bytes);
            let frame = dec.try_next_packet().unwrap().unwrap();
            if frame.opcode == P::OPCODE {
                return frame.decode::<P>().unwrap();
            }
        }
    }

    fn staged_character() -> CharacterBacking {
        CharacterBacking {
            uuid: uuid::Uuid::from_u128(1),
            name: "Raidou".into(),
            core: CoreStats {
                level: 10,
                hp: 80,
                mp: 40,
                str_: 10,
                vit: 10,
                int: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn full_login_sequence_reaches_in_game() {
        let server = test_server();
        let (session, rx) = client();

        server.add_pending_login(7, "key-abc", staged_character(), vec![]);

        server.handle_frame(
            &session,
            &frame_of(&pkt::Login {
                username: "raidou".into(),
                client_version: CLIENT_VERSION,
            }),
        );
        assert_eq!(next_packet::<pkt::LoginReply>(&rx).response, 0);
        assert_eq!(session.connection_state(), ConnectionState::Authenticated);

        server.handle_frame(
            &session,
            &frame_of(&pkt::Auth {
                session_key: "key-abc".into(),
            }),
        );
        assert_eq!(next_packet::<pkt::AuthReply>(&rx).response, 0);

        server.handle_frame(&session, &frame_of(&pkt::SendData {}));
        assert_eq!(session.connection_state(), ConnectionState::InGame);

        let data = next_packet::<pkt::CharacterData>(&rx);
        assert_eq!(data.name.0, "Raidou");
        assert_eq!(data.hp, 80);

        // The character is in the home zone.
        let entity = session.character().unwrap();
        assert!(server.zones().zone_of(entity.id()).is_some());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let server = test_server();
        let (session, rx) = client();

        server.handle_frame(
            &session,
            &frame_of(&pkt::Login {
                username: "x".into(),
                client_version: 1,
            }),
        );
        assert_ne!(next_packet::<pkt::LoginReply>(&rx).response, 0);
        assert!(session.is_closed());
    }

    #[test]
    fn out_of_state_opcode_closes_the_connection() {
        let server = test_server();
        let (session, _rx) = client();

        // Move before login is a hard protocol violation.
        server.handle_frame(
            &session,
            &frame_of(&pkt::Move {
                entity_id: 1,
                dest_x: 0.0,
                dest_y: 0.0,
                start_time: 0.0,
                stop_time: 0.5,
            }),
        );
        assert!(session.is_closed());
    }

    #[test]
    fn bad_session_key_disconnects() {
        let server = test_server();
        let (session, rx) = client();

        server.handle_frame(
            &session,
            &frame_of(&pkt::Login {
                username: "x".into(),
                client_version: CLIENT_VERSION,
            }),
        );
        let _ = next_packet::<pkt::LoginReply>(&rx);

        server.handle_frame(
            &session,
            &frame_of(&pkt::Auth {
                session_key: "wrong".into(),
            }),
        );
        assert_ne!(next_packet::<pkt::AuthReply>(&rx).response, 0);
        assert!(session.is_closed());
    }

    #[test]
    fn keep_alive_echoes_token() {
        let server = test_server();
        let (session, rx) = client();
        session.set_connection_state(ConnectionState::InGame);

        server.handle_frame(&session, &frame_of(&pkt::KeepAlive { token: 0xFEED }));
        assert_eq!(next_packet::<pkt::KeepAliveReply>(&rx).token, 0xFEED);
    }

    #[test]
    fn malformed_body_is_dropped_without_close() {
        let server = test_server();
        let (session, _rx) = client();
        session.set_connection_state(ConnectionState::InGame);

        // A keep-alive frame with a truncated body.
        let frame = astral_protocol::PacketFrame {
            opcode: pkt::KeepAlive::OPCODE,
            body: BytesMut::from(&[0x01u8][..]),
        };
        server.handle_frame(&session, &frame);
        assert!(!session.is_closed());
    }

    #[test]
    fn channel_switch_confirmation_races_the_timeout() {
        let server = test_server();
        let (session, _rx) = client();
        {
            let mut state = session.state();
            state.cid = 9;
            state.session_key = "switch-key".into();
        }

        server.begin_channel_switch(&session, 2);
        assert!(!server.confirm_channel_switch(9, "other-key"));
        assert!(server.confirm_channel_switch(9, "switch-key"));
        // A second confirm finds nothing pending.
        assert!(!server.confirm_channel_switch(9, "switch-key"));
    }
}
