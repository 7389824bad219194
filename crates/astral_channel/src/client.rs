use std::sync::Arc;

use astral_core::{ClientTime, EntityId, ServerTime};
use astral_entity::ActiveEntity;
use astral_protocol::encode::encode_frame;
use astral_protocol::{Encode, Packet};
use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::persistence::ItemInstance;

/// Which handler table applies to a connection.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ConnectionState {
    /// Fresh TCP connection; only Login is legal.
    Handshake,
    /// Login accepted, waiting for the session proof.
    Authenticated,
    /// Character data sent; the full game surface is live.
    InGame,
    /// Marked for teardown; work items short-circuit.
    Closed,
}

/// Slots per item box.
pub const ITEM_BOX_SLOTS: usize = 50;

/// One item box (inventory page) of a character.
#[derive(Clone, Debug)]
pub struct ItemBox {
    pub box_id: i64,
    pub slots: Vec<Option<ItemInstance>>,
}

impl ItemBox {
    pub fn new(box_id: i64) -> Self {
        Self {
            box_id,
            slots: vec![None; ITEM_BOX_SLOTS],
        }
    }

    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    pub fn find_by_object_id(&self, object_id: i64) -> Option<&ItemInstance> {
        self.slots
            .iter()
            .flatten()
            .find(|item| item.object_id == object_id)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemInstance> {
        self.slots.iter().flatten()
    }
}

/// A skill charged by ActivateSkill, waiting to execute or be cancelled.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SkillActivation {
    pub activation_id: i8,
    pub skill_id: u32,
    pub entity_id: EntityId,
    pub target_object_id: i64,
}

/// Mutable per-connection state behind the session mutex.
#[derive(Debug)]
pub struct SessionState {
    pub conn: ConnectionState,
    pub username: String,
    pub cid: u32,
    pub session_key: String,
    /// Server time at login; anchor for client-relative times.
    pub login_epoch: ServerTime,
    /// Server time after which a missing keep-alive starts the logout
    /// countdown.
    pub keepalive_deadline: ServerTime,
    /// The client has signalled an impending disconnect; keep-alives no
    /// longer refresh the timeout.
    pub logout_save: bool,
    pub character: Option<Arc<ActiveEntity>>,
    pub demon: Option<Arc<ActiveEntity>>,
    pub item_boxes: FxHashMap<i64, ItemBox>,
    pub pending_skill: Option<SkillActivation>,
    pub next_activation_id: i8,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            conn: ConnectionState::Handshake,
            username: String::new(),
            cid: 0,
            session_key: String::new(),
            login_epoch: ServerTime::ZERO,
            keepalive_deadline: ServerTime::ZERO,
            logout_save: false,
            character: None,
            demon: None,
            item_boxes: FxHashMap::default(),
            pending_skill: None,
            next_activation_id: 0,
        }
    }
}

/// One connected client.
///
/// Outgoing frames go through a bounded byte channel drained by the
/// connection's writer task; a full channel drops the frame and the
/// connection is torn down by the keep-alive sweep soon after.
pub struct ClientSession {
    state: Mutex<SessionState>,
    outgoing: flume::Sender<Bytes>,
}

impl ClientSession {
    pub fn new(outgoing: flume::Sender<Bytes>) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            outgoing,
        }
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().conn
    }

    pub fn set_connection_state(&self, conn: ConnectionState) {
        self.state.lock().conn = conn;
    }

    pub fn is_closed(&self) -> bool {
        self.connection_state() == ConnectionState::Closed
    }

    pub fn character(&self) -> Option<Arc<ActiveEntity>> {
        self.state.lock().character.clone()
    }

    pub fn demon(&self) -> Option<Arc<ActiveEntity>> {
        self.state.lock().demon.clone()
    }

    /// The entity for an ID the client claims to control, or `None`.
    pub fn controlled_entity(&self, entity_id: EntityId) -> Option<Arc<ActiveEntity>> {
        let state = self.state.lock();
        let found = [state.character.as_ref(), state.demon.as_ref()]
            .into_iter()
            .flatten()
            .find(|e| e.id() == entity_id)
            .cloned();
        found
    }

    pub fn to_client_time(&self, time: ServerTime) -> ClientTime {
        ClientTime::from_server(time, self.state.lock().login_epoch)
    }

    pub fn to_server_time(&self, time: ClientTime) -> ServerTime {
        time.to_server(self.state.lock().login_epoch)
    }

    /// Pushes the keep-alive deadline `secs` ahead of `now`, unless the
    /// client has already prepared to disconnect.
    pub fn refresh_timeout(&self, now: ServerTime, secs: u64) {
        let mut state = self.state.lock();
        if !state.logout_save {
            state.keepalive_deadline = now.plus_millis(secs * 1000);
        }
    }

    pub fn send_packet<P>(&self, pkt: &P)
    where
        P: Packet + Encode,
    {
        match encode_frame(pkt) {
            Ok(frame) => self.send_bytes(Bytes::from(frame.to_vec())),
            Err(e) => warn!("failed to encode '{}': {e:#}", P::NAME),
        }
    }

    pub fn send_bytes(&self, frame: Bytes) {
        if self.outgoing.try_send(frame).is_err() {
            debug!("dropping frame for a closed or saturated connection");
        }
    }
}

impl astral_zone::Subscriber for ClientSession {
    fn send_bytes(&self, frame: Bytes) {
        ClientSession::send_bytes(self, frame);
    }
}

/// Maps entity IDs and account IDs to their sessions.
///
/// An explicit collaborator rather than process-global state; one mutex
/// guards both indices.
#[derive(Default)]
pub struct ClientRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    by_entity: FxHashMap<EntityId, Arc<ClientSession>>,
    by_cid: FxHashMap<u32, Arc<ClientSession>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cid: u32, entity_id: EntityId, session: Arc<ClientSession>) {
        let mut inner = self.inner.lock();
        inner.by_entity.insert(entity_id, session.clone());
        inner.by_cid.insert(cid, session);
    }

    pub fn by_entity(&self, entity_id: EntityId) -> Option<Arc<ClientSession>> {
        self.inner.lock().by_entity.get(&entity_id).cloned()
    }

    pub fn by_cid(&self, cid: u32) -> Option<Arc<ClientSession>> {
        self.inner.lock().by_cid.get(&cid).cloned()
    }

    pub fn unregister(&self, cid: u32, entity_id: EntityId) {
        let mut inner = self.inner.lock();
        inner.by_entity.remove(&entity_id);
        inner.by_cid.remove(&cid);
    }

    pub fn sessions(&self) -> Vec<Arc<ClientSession>> {
        self.inner.lock().by_cid.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use astral_protocol::packets::game::KeepAliveReply;
    use astral_protocol::PacketDecoder;

    use super::*;

    fn session() -> (Arc<ClientSession>, flume::Receiver<Bytes>) {
        let (tx, rx) = flume::bounded(16);
        (Arc::new(ClientSession::new(tx)), rx)
    }

    #[test]
    fn send_packet_produces_a_frame() {
        let (session, rx) = session();
        session.send_packet(&KeepAliveReply { token: 9 });

        let frame_bytes = rx.try_recv().unwrap();
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&frame_bytes);
        let frame = dec.try_next_packet().unwrap().unwrap();
        assert_eq!(frame.decode::<KeepAliveReply>().unwrap().token, 9);
    }

    #[test]
    fn client_time_round_trips_through_login_epoch() {
        let (session, _rx) = session();
        session.state().login_epoch = ServerTime(2_000_000);

        let ct = session.to_client_time(ServerTime(3_500_000));
        assert_eq!(ct.0, 1.5);
        assert_eq!(session.to_server_time(ct), ServerTime(3_500_000));
    }

    #[test]
    fn logout_save_blocks_timeout_refresh() {
        let (session, _rx) = session();
        session.refresh_timeout(ServerTime(0), 10);
        assert_eq!(session.state().keepalive_deadline, ServerTime(10_000_000));

        session.state().logout_save = true;
        session.refresh_timeout(ServerTime(20_000_000), 10);
        assert_eq!(session.state().keepalive_deadline, ServerTime(10_000_000));
    }

    #[test]
    fn registry_round_trip() {
        let registry = ClientRegistry::new();
        let (session, _rx) = session();

        registry.register(7, EntityId(42), session.clone());
        assert!(registry.by_entity(EntityId(42)).is_some());
        assert!(registry.by_cid(7).is_some());

        registry.unregister(7, EntityId(42));
        assert!(registry.by_entity(EntityId(42)).is_none());
    }
}
