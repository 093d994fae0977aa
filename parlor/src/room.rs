//! Room state: the wall, the seats, and the claim window.

use crate::{
    player::{Player, PlayerState, PlayerUuid},
    tile::Tile,
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Eight alphanumeric characters, generated by the room store.
#[derive(
    Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display(fmt = "{}", _0)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Whether a chat line came from the server or from a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatKind {
    ServerMsg,
    PlayerMsg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub msg_type: ChatKind,
    pub msg_text: String,
}

impl ChatEntry {
    pub fn server<S: Into<String>>(text: S) -> Self {
        Self {
            msg_type: ChatKind::ServerMsg,
            msg_text: text.into(),
        }
    }

    pub fn player<S: Into<String>>(text: S) -> Self {
        Self {
            msg_type: ChatKind::PlayerMsg,
            msg_text: text.into(),
        }
    }
}

/// One game room. Seat order is play order; seat 0 is the dealer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,

    /// The draw wall. Dealing and drawing both pop from the tail.
    pub wall: Vec<Tile>,

    pub seats: Vec<PlayerUuid>,
    pub players: HashMap<PlayerUuid, Player>,

    /// Index into `seats` of the player whose turn it is. During a claim
    /// window this is still the discarder's seat.
    pub current_seat: usize,

    /// The most recent discard, while it is still up for claims.
    pub current_discard: Option<Tile>,

    /// Discards that survived their claim window unclaimed.
    pub past_discards: Vec<Tile>,

    /// Chat log for the room.
    pub messages: Vec<ChatEntry>,

    /// Seats that have responded in the current claim window, in the order
    /// the responses arrived. Arrival order breaks ties between equal-rank
    /// claims.
    pub claimed: Vec<PlayerUuid>,

    /// Bumped every time a claim window opens, so a stale watchdog timer can
    /// tell that its window is long gone.
    pub claim_generation: u64,

    /// Number of non-AI seats.
    pub human_count: usize,

    pub in_progress: bool,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            wall: Vec::new(),
            seats: Vec::new(),
            players: HashMap::new(),
            current_seat: 0,
            current_discard: None,
            past_discards: Vec::new(),
            messages: Vec::new(),
            claimed: Vec::new(),
            claim_generation: 0,
            human_count: 0,
            in_progress: false,
        }
    }

    pub fn seat_of(&self, uuid: &PlayerUuid) -> Option<usize> {
        self.seats.iter().position(|seated| seated == uuid)
    }

    pub fn player(&self, uuid: &PlayerUuid) -> Option<&Player> {
        self.players.get(uuid)
    }

    pub fn player_mut(&mut self, uuid: &PlayerUuid) -> Option<&mut Player> {
        self.players.get_mut(uuid)
    }

    /// The uuid seated at `current_seat`.
    pub fn current_uuid(&self) -> Option<&PlayerUuid> {
        self.seats.get(self.current_seat)
    }

    /// A claim window is open while any seat still owes a claim response.
    pub fn claim_window_open(&self) -> bool {
        self.players
            .values()
            .any(|player| player.state == PlayerState::DeclareClaim)
    }

    /// Turn distance from the discarder to `claimant_seat`: 1 means next to
    /// play. Chow claims are only legal at distance 1, and distance breaks
    /// ties between simultaneous winning claims.
    pub fn rel_pos(&self, claimant_seat: usize) -> usize {
        (claimant_seat + self.seats.len() - self.current_seat) % self.seats.len()
    }

    /// Seats in play order starting just after `viewer`, skipping `viewer`.
    pub fn opponents_of(&self, viewer: &PlayerUuid) -> Vec<&Player> {
        let start = match self.seat_of(viewer) {
            Some(seat) => seat,
            None => return Vec::new(),
        };

        (1..self.seats.len())
            .filter_map(|offset| {
                let seat = (start + offset) % self.seats.len();
                self.players.get(&self.seats[seat])
            })
            .collect()
    }
}
