//! Tile identity and the draw wall.

use derive_more::From;
use lazy_static::lazy_static;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

/// Number of tiles in a wall without the bonus tiles.
pub const WALL_SIZE: usize = 136;

/// Number of tiles in a wall when flowers and seasons are included.
pub const WALL_SIZE_WITH_BONUS: usize = 144;

/// Tiles dealt to the dealer (seat 0). The dealer opens the game by
/// discarding, so they start one tile up.
pub const DEALER_HAND_SIZE: usize = 14;

/// Tiles dealt to every non-dealer seat.
pub const HAND_SIZE: usize = 13;

/// A single mahjong tile.
///
/// Two tiles compare equal iff both the suit and the kind match. The derived
/// `Ord` sorts by suit first and kind second, which is the order hands are
/// displayed in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tile {
    Suited(SuitedTile),
    Wind(Wind),
    Dragon(Dragon),
    Bonus(BonusTile),
}

impl Tile {
    /// Returns `true` for wind and dragon tiles.
    ///
    /// Honor tiles may appear in pungs and kongs but never in chows.
    pub fn is_honor(self) -> bool {
        matches!(self, Tile::Wind(..) | Tile::Dragon(..))
    }

    /// Returns `true` for flower and season tiles.
    pub fn is_bonus(self) -> bool {
        matches!(self, Tile::Bonus(..))
    }

    /// Returns the underlying suited tile for the three numeric suits.
    pub fn suited(self) -> Option<SuitedTile> {
        match self {
            Tile::Suited(tile) => Some(tile),
            _ => None,
        }
    }
}

/// The three numeric suits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Suit {
    Bamboo,
    Dots,
    Character,
}

/// A numbered tile in one of the three numeric suits. `rank` is always in
/// `1..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SuitedTile {
    pub suit: Suit,
    pub rank: u8,
}

impl SuitedTile {
    pub const fn new(suit: Suit, rank: u8) -> Self {
        Self { suit, rank }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Wind {
    East,
    South,
    West,
    North,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Dragon {
    Red,
    Green,
    White,
}

/// A flower or season tile. There is exactly one copy of each in the wall,
/// and they only take part in a game when bonus tiles are configured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BonusTile {
    pub kind: BonusKind,
    pub rank: u8,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BonusKind {
    Flower,
    Season,
}

lazy_static! {
    /// The full tile set without bonus tiles: four copies of each suited,
    /// wind, and dragon tile.
    static ref TILE_SET: Vec<Tile> = build_tile_set(false);

    /// The full tile set including the single copy of each flower and season.
    static ref TILE_SET_WITH_BONUS: Vec<Tile> = build_tile_set(true);
}

fn build_tile_set(include_bonus: bool) -> Vec<Tile> {
    let mut tiles = Vec::with_capacity(WALL_SIZE_WITH_BONUS);

    for suit in Suit::iter() {
        for rank in 1..=9 {
            for _ in 0..4 {
                tiles.push(Tile::Suited(SuitedTile { suit, rank }));
            }
        }
    }

    for wind in Wind::iter() {
        for _ in 0..4 {
            tiles.push(Tile::Wind(wind));
        }
    }

    for dragon in Dragon::iter() {
        for _ in 0..4 {
            tiles.push(Tile::Dragon(dragon));
        }
    }

    if include_bonus {
        for kind in BonusKind::iter() {
            for rank in 1..=4 {
                tiles.push(Tile::Bonus(BonusTile { kind, rank }));
            }
        }
    }

    tiles
}

/// Returns the unshuffled reference tile set.
///
/// Used by the wall builder and by tile-conservation checks that compare a
/// room's tiles against the nominal set.
pub fn reference_tile_set(include_bonus: bool) -> &'static [Tile] {
    if include_bonus {
        &TILE_SET_WITH_BONUS
    } else {
        &TILE_SET
    }
}

/// Builds a freshly shuffled wall.
///
/// The shuffle is an unbiased Fisher-Yates; the RNG is injected so tests can
/// run against a fixed seed.
pub fn build_wall<R: Rng + ?Sized>(include_bonus: bool, rng: &mut R) -> Vec<Tile> {
    let mut wall = reference_tile_set(include_bonus).to_vec();
    wall.shuffle(rng);
    wall
}

/// Deals starting hands for `seat_count` seats off the tail of the wall.
///
/// Seat 0 is the dealer and receives fourteen tiles; every other seat
/// receives thirteen. Each hand is sorted by (suit, kind) after the deal.
pub fn deal(wall: &mut Vec<Tile>, seat_count: usize) -> Vec<Vec<Tile>> {
    let mut hands = Vec::with_capacity(seat_count);

    for seat in 0..seat_count {
        let count = if seat == 0 {
            DEALER_HAND_SIZE
        } else {
            HAND_SIZE
        };

        let mut hand = Vec::with_capacity(count);
        for _ in 0..count {
            // The wall always has enough tiles for the opening deal.
            hand.push(wall.pop().expect("wall exhausted during the deal"));
        }
        hand.sort();
        hands.push(hand);
    }

    hands
}
