//! The message definitions for communication between clients and the server.
//!
//! Frames on the wire are JSON objects of the shape
//! `{"event": <name>, "payload": {...}}`, modeled as adjacently tagged serde
//! enums. Deserialization failure (unknown event, missing or ill-typed
//! payload fields) is the gateway's cue to log and drop the frame.

use crate::{
    player::{Player, PlayerState, PlayerUuid},
    room::{ChatEntry, Room, RoomId},
    rules::MeldType,
    tile::Tile,
};
use serde::{Deserialize, Serialize};

/// Events clients send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Connection is ready for a session; the server assigns a guest
    /// username and parks the connection in the lobby.
    Ready { player_uuid: PlayerUuid },

    /// Ask for a snapshot of an in-flight game for this uuid.
    RejoinGame { player_uuid: PlayerUuid },

    /// Re-send transient events (claim timer, offered meld subsets) for the
    /// player's current state.
    ReemitEvents,

    /// Create or join a room.
    EnterGame {
        username: String,
        player_uuid: PlayerUuid,
        #[serde(default)]
        room_id: Option<RoomId>,
        #[serde(default)]
        should_create_room: bool,
    },

    /// Host only: fill empty seats with AI, deal, and begin.
    StartGame,

    DrawTile,

    /// Discard a tile, ending the turn and opening the claim window.
    EndTurn { discarded_tile: Tile },

    /// Client-side claim countdown started; the server remembers the first
    /// report per window.
    DeclareClaimStart { declare_claim_start_time: u64 },

    /// Claim the current discard, or pass with `None`.
    UpdateClaimState {
        #[serde(default)]
        declared_meld: Option<MeldType>,
    },

    /// Finalize a claimed meld with the chosen tiles.
    CompleteNewMeld { new_meld: Vec<Tile> },

    /// Move an in-hand four-of-a-kind to the concealed kongs.
    DeclareConcealedKong,

    DeclareWin,

    TextMessage { message: String },

    LeaveGame,
}

/// Events the server emits to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Replace the player's concealed hand.
    UpdateTiles(Vec<Tile>),

    /// Append tiles to the player's concealed hand (a draw).
    ExtendTiles(Vec<Tile>),

    UpdateCurrentState(PlayerState),

    UpdateDiscardedTile(Tile),

    UpdateOpponents(Vec<OpponentView>),

    UpdateRoomId(RoomId),

    /// Partial update of the player's own fields.
    UpdatePlayer(PlayerPatch),

    /// Start (or resume) the claim countdown.
    DeclareClaimWithTimer { start_time: u64, ms_duration: u64 },

    /// The subsets the player may use to complete their claimed meld.
    ValidTileSetsForMeld {
        valid_meld_subsets: Vec<Vec<Tile>>,
        new_meld: Vec<Tile>,
        new_meld_target_length: usize,
    },

    UpdateCanDeclareWin(bool),

    UpdateCanDeclareKong(bool),

    UpdateConcealedKongs(Vec<Vec<Tile>>),

    TextMessage(ChatEntry),

    /// Rejoin snapshot; `None` when the uuid has no active game.
    ExistingGameData(Option<GameSnapshot>),

    EndGame,
}

/// A player as seen by their opponents: everything public, nothing from the
/// concealed hand except its size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpponentView {
    pub name: String,
    pub revealed_melds: Vec<Vec<Tile>>,
    pub tile_count: usize,
    pub concealed_kongs: Vec<Vec<Tile>>,
    pub is_current_turn: bool,
}

impl OpponentView {
    pub fn of(player: &Player) -> Self {
        Self {
            name: player.username.clone(),
            revealed_melds: player.revealed_melds.clone(),
            tile_count: player.hand.len(),
            concealed_kongs: player.concealed_kongs.clone(),
            is_current_turn: player.state.is_active(),
        }
    }
}

/// Partial player update; absent fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PlayerState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_host: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_melds: Option<Vec<Vec<Tile>>>,
}

/// Everything a returning client needs to rebuild its view mid-game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub room_id: RoomId,
    pub in_progress: bool,
    pub username: String,
    pub is_host: bool,
    pub state: PlayerState,
    pub tiles: Vec<Tile>,
    pub revealed_melds: Vec<Vec<Tile>>,
    pub concealed_kongs: Vec<Vec<Tile>>,
    pub new_meld: Vec<Tile>,
    pub valid_meld_subsets: Vec<Vec<Tile>>,
    pub can_declare_win: bool,
    pub can_declare_kong: bool,
    pub current_discard: Option<Tile>,
    pub past_discards: Vec<Tile>,
}

impl GameSnapshot {
    pub fn of(room: &Room, player: &Player) -> Self {
        Self {
            room_id: room.id.clone(),
            in_progress: room.in_progress,
            username: player.username.clone(),
            is_host: player.is_host,
            state: player.state,
            tiles: player.hand.clone(),
            revealed_melds: player.revealed_melds.clone(),
            concealed_kongs: player.concealed_kongs.clone(),
            new_meld: player.new_meld.clone(),
            valid_meld_subsets: player.valid_meld_subsets.clone(),
            can_declare_win: player.can_declare_win,
            can_declare_kong: player.can_declare_kong,
            current_discard: room.current_discard,
            past_discards: room.past_discards.clone(),
        }
    }
}

/// Where an outbound event should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Targeted send to one player's connection.
    Player(PlayerUuid),

    /// Multicast to every connection seated in the room.
    Room(RoomId),

    /// Multicast to connections that are not yet seated anywhere.
    Lobby,
}

/// One event addressed to its recipient.
///
/// Engine operations return these in causal order; the gateway emits them in
/// that order while the room is still locked.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn player(uuid: &PlayerUuid, event: ServerEvent) -> Self {
        Self {
            to: Recipient::Player(uuid.clone()),
            event,
        }
    }

    pub fn room(id: &RoomId, event: ServerEvent) -> Self {
        Self {
            to: Recipient::Room(id.clone()),
            event,
        }
    }

    pub fn lobby(event: ServerEvent) -> Self {
        Self {
            to: Recipient::Lobby,
            event,
        }
    }
}

/// The ordered batch of events produced by one engine operation.
pub type EventPlan = Vec<Outbound>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{Suit, SuitedTile};

    #[test]
    fn parses_enter_game_with_optional_fields_missing() {
        let frame = r#"{
            "event": "enter_game",
            "payload": {"username": "nora", "player_uuid": "abc-123"}
        }"#;

        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            ClientEvent::EnterGame {
                username: "nora".into(),
                player_uuid: PlayerUuid::from("abc-123"),
                room_id: None,
                should_create_room: false,
            },
            event,
        );
    }

    #[test]
    fn rejects_payload_with_missing_required_field() {
        let frame = r#"{"event": "enter_game", "payload": {"username": "nora"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn parses_a_pass_claim() {
        let frame = r#"{"event": "update_claim_state", "payload": {"declared_meld": null}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(ClientEvent::UpdateClaimState { declared_meld: None }, event);

        let frame = r#"{"event": "update_claim_state", "payload": {"declared_meld": "PUNG"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            ClientEvent::UpdateClaimState {
                declared_meld: Some(MeldType::Pung)
            },
            event,
        );
    }

    #[test]
    fn parses_a_discard() {
        let frame = r#"{
            "event": "end_turn",
            "payload": {"discarded_tile": {"suited": {"suit": "character", "rank": 5}}}
        }"#;

        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            ClientEvent::EndTurn {
                discarded_tile: Tile::Suited(SuitedTile::new(Suit::Character, 5)),
            },
            event,
        );
    }

    #[test]
    fn server_events_tag_event_and_payload() {
        let event = ServerEvent::DeclareClaimWithTimer {
            start_time: 1234,
            ms_duration: 5000,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!("declare_claim_with_timer", json["event"]);
        assert_eq!(1234, json["payload"]["start_time"]);
        assert_eq!(5000, json["payload"]["ms_duration"]);
    }

    #[test]
    fn unit_events_serialize_without_payload() {
        let json = serde_json::to_value(&ServerEvent::EndGame).unwrap();
        assert_eq!("end_game", json["event"]);
        assert!(json.get("payload").is_none());
    }
}
