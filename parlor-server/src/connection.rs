//! Connection registry: socket sessions, uuid bindings, and the lobby group.

use derive_more::Display;
use parlor::messages::{Outbound, Recipient, ServerEvent};
use parlor::player::PlayerUuid;
use parlor::store::RoomStore;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{trace, warn};
use warp::ws::Message;

/// Identifier for a connected client session.
///
/// IDs are unique while the session is active; they may be reused after
/// enough sessions come and go.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display(fmt = "{}", _0)]
pub struct ConnectionId(u64);

pub struct ConnectionIdGenerator(AtomicU64);

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// One live socket session.
pub struct Connection {
    /// Sender half of the channel a writer task drains into the socket.
    tx: UnboundedSender<Message>,

    /// The player identity this connection presented, once known.
    player_uuid: Option<PlayerUuid>,

    /// Username assigned before the player picks one by joining a room.
    guest_name: Option<String>,
}

/// All live connections, plus the uuid and lobby indexes over them.
#[derive(Default)]
pub struct Connections {
    by_id: HashMap<ConnectionId, Connection>,
    by_uuid: HashMap<PlayerUuid, ConnectionId>,

    /// Connections not yet seated in a room; lobby chat goes here.
    lobby: HashSet<ConnectionId>,
}

impl Connections {
    pub fn register(&mut self, id: ConnectionId, tx: UnboundedSender<Message>) {
        self.by_id.insert(
            id,
            Connection {
                tx,
                player_uuid: None,
                guest_name: None,
            },
        );
    }

    /// Drops a closed connection. The uuid-to-room mapping in the store is
    /// untouched so the player can rejoin later.
    pub fn unregister(&mut self, id: ConnectionId) {
        if let Some(connection) = self.by_id.remove(&id) {
            if let Some(uuid) = connection.player_uuid {
                if self.by_uuid.get(&uuid) == Some(&id) {
                    self.by_uuid.remove(&uuid);
                }
            }
        }
        self.lobby.remove(&id);
    }

    /// Associates a connection with a player identity. A reconnecting uuid
    /// steals the binding from its older connection.
    pub fn bind_uuid(&mut self, id: ConnectionId, uuid: PlayerUuid) {
        if let Some(connection) = self.by_id.get_mut(&id) {
            connection.player_uuid = Some(uuid.clone());
        }
        self.by_uuid.insert(uuid, id);
    }

    pub fn uuid_of(&self, id: ConnectionId) -> Option<&PlayerUuid> {
        self.by_id.get(&id).and_then(|conn| conn.player_uuid.as_ref())
    }

    pub fn set_guest_name(&mut self, id: ConnectionId, name: String) {
        if let Some(connection) = self.by_id.get_mut(&id) {
            connection.guest_name = Some(name);
        }
    }

    pub fn guest_name(&self, id: ConnectionId) -> Option<&str> {
        self.by_id
            .get(&id)
            .and_then(|conn| conn.guest_name.as_deref())
    }

    pub fn enter_lobby(&mut self, id: ConnectionId) {
        self.lobby.insert(id);
    }

    pub fn leave_lobby(&mut self, id: ConnectionId) {
        self.lobby.remove(&id);
    }

    /// Sends one event to one connection.
    pub fn send_to_conn(&self, id: ConnectionId, event: &ServerEvent) {
        if let Some(connection) = self.by_id.get(&id) {
            Self::send(&connection.tx, event);
        }
    }

    /// Emits an engine event plan.
    ///
    /// Room recipients fan out across the room's seats; seats without a live
    /// connection (AI players, disconnected humans) are skipped silently.
    pub fn emit(&self, store: &RoomStore, plan: &[Outbound]) {
        for outbound in plan {
            match &outbound.to {
                Recipient::Player(uuid) => self.send_to_uuid(uuid, &outbound.event),

                Recipient::Room(room_id) => match store.room(room_id) {
                    Some(room) => {
                        for uuid in &room.seats {
                            self.send_to_uuid(uuid, &outbound.event);
                        }
                    }
                    None => trace!(%room_id, "skipping emit to deleted room"),
                },

                Recipient::Lobby => {
                    for id in &self.lobby {
                        self.send_to_conn(*id, &outbound.event);
                    }
                }
            }
        }
    }

    fn send_to_uuid(&self, uuid: &PlayerUuid, event: &ServerEvent) {
        match self.by_uuid.get(uuid).and_then(|id| self.by_id.get(id)) {
            Some(connection) => Self::send(&connection.tx, event),
            None => trace!(%uuid, "no connection for player, dropping event"),
        }
    }

    fn send(tx: &UnboundedSender<Message>, event: &ServerEvent) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "failed to serialize outbound event");
                return;
            }
        };

        // A send error means the writer task is gone; the reader side will
        // unregister the connection shortly.
        if tx.send(Message::text(text)).is_err() {
            trace!("dropping event for closed connection");
        }
    }
}
