//! Per-seat player state.

use crate::{
    rules::{self, MeldType, SETS_NEEDED_TO_WIN},
    tile::Tile,
};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Opaque stable identity supplied by the client at join time. The server
/// never generates these; it only maps them to seats and connections.
#[derive(
    Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display(fmt = "{}", _0)]
#[serde(transparent)]
pub struct PlayerUuid(String);

impl PlayerUuid {
    pub fn new<S: Into<String>>(uuid: S) -> Self {
        Self(uuid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlayerUuid {
    fn from(uuid: &str) -> Self {
        Self::new(uuid)
    }
}

/// What a player is currently allowed (or required) to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    NoAction,
    DrawTile,
    DiscardTile,
    DeclareClaim,
    RevealMeld,
    Win,
    Loss,
    Draw,
}

impl PlayerState {
    /// Active states hold the turn; at most one player per room is active
    /// outside a claim window.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlayerState::DrawTile | PlayerState::DiscardTile | PlayerState::RevealMeld
        )
    }
}

/// One seat's full state within a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub uuid: PlayerUuid,
    pub username: String,

    /// Concealed tiles. Sorted at the deal; a drawn tile is appended at the
    /// end until the next discard.
    pub hand: Vec<Tile>,

    /// Melds revealed through claims, each a sorted triplet or quadruplet.
    /// The winner's end-of-game decomposition is appended here for display.
    pub revealed_melds: Vec<Vec<Tile>>,

    /// Four-of-a-kinds declared from the hand. Counted as completed sets but
    /// never shown face up.
    pub concealed_kongs: Vec<Vec<Tile>>,

    pub state: PlayerState,

    /// First `declare_claim_start` timestamp the client reported for the
    /// current claim window. Survives page reloads so the countdown can
    /// resume where it left off.
    pub declare_claim_start_time: Option<u64>,

    /// The meld this player declared in the current claim window; `None`
    /// both before responding and for an explicit pass.
    pub declared_meld_type: Option<MeldType>,

    /// Candidate tile subsets offered to complete an awarded claim.
    pub valid_meld_subsets: Vec<Vec<Tile>>,

    /// The in-progress meld while in `RevealMeld`, seeded with the claimed
    /// discard.
    pub new_meld: Vec<Tile>,

    pub can_declare_kong: bool,
    pub can_declare_win: bool,

    /// The first human seat in the room controls game start.
    pub is_host: bool,
    pub is_ai: bool,
}

impl Player {
    pub fn new(uuid: PlayerUuid, username: String, is_ai: bool) -> Self {
        Self {
            uuid,
            username,
            hand: Vec::new(),
            revealed_melds: Vec::new(),
            concealed_kongs: Vec::new(),
            state: PlayerState::NoAction,
            declare_claim_start_time: None,
            declared_meld_type: None,
            valid_meld_subsets: Vec::new(),
            new_meld: Vec::new(),
            can_declare_kong: false,
            can_declare_win: false,
            is_host: false,
            is_ai,
        }
    }

    /// Sets completed outside the concealed hand. Each one lowers the number
    /// of sets the concealed tiles still have to provide for a win.
    pub fn sets_completed(&self) -> usize {
        self.revealed_melds.len() + self.concealed_kongs.len()
    }

    /// Sets the concealed hand still has to provide for a win.
    pub fn target_sets(&self) -> usize {
        SETS_NEEDED_TO_WIN.saturating_sub(self.sets_completed())
    }

    /// Removes one copy of `tile` from the hand. Returns `false` if the tile
    /// is not there.
    pub fn remove_tile(&mut self, tile: Tile) -> bool {
        match self.hand.iter().position(|&held| held == tile) {
            Some(index) => {
                self.hand.remove(index);
                true
            }
            None => false,
        }
    }

    /// Recomputes the win/kong flags for a hand holding a fresh draw (or a
    /// freshly dealt fourteenth tile).
    pub fn refresh_flags(&mut self) {
        self.can_declare_win = rules::can_meld_concealed_hand(&self.hand, self.target_sets());
        self.can_declare_kong = rules::four_of_a_kind(&self.hand).is_some();
    }

    /// Clears all claim-window bookkeeping for this seat.
    pub fn reset_claim_state(&mut self) {
        self.declare_claim_start_time = None;
        self.declared_meld_type = None;
        self.valid_meld_subsets.clear();
        self.new_meld.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{Suit, SuitedTile, Tile};

    fn player() -> Player {
        Player::new(PlayerUuid::from("p1"), "test".into(), false)
    }

    #[test]
    fn remove_tile_takes_a_single_copy() {
        let tile = Tile::Suited(SuitedTile::new(Suit::Bamboo, 2));
        let mut player = player();
        player.hand = vec![tile, tile];

        assert!(player.remove_tile(tile));
        assert_eq!(vec![tile], player.hand);
        assert!(player.remove_tile(tile));
        assert!(!player.remove_tile(tile));
    }

    #[test]
    fn target_sets_shrinks_with_completed_sets() {
        let tile = Tile::Suited(SuitedTile::new(Suit::Dots, 9));
        let mut player = player();
        assert_eq!(4, player.target_sets());

        player.revealed_melds.push(vec![tile; 3]);
        player.concealed_kongs.push(vec![tile; 4]);
        assert_eq!(2, player.target_sets());
    }
}
