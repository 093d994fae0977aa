//! The hand analyzer: pure classification of tile sets against meld targets.
//!
//! Everything in this module is a side-effect-free function over tile slices.
//! The room engine calls into it at every decision point: claim legality,
//! claim ranking, win verification, and the end-of-game decomposition of a
//! winning hand into concrete melds.

use crate::tile::{Suit, SuitedTile, Tile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A standard winning hand is four melds plus one pair. Revealed melds and
/// concealed kongs each lower the number of sets the concealed tiles still
/// have to provide.
pub const SETS_NEEDED_TO_WIN: usize = 4;

/// Claim priority for a verified winning claim.
pub const RANK_WIN: u8 = 3;

/// Claim priority for a verified pung or kong claim.
pub const RANK_PUNG: u8 = 2;

/// Claim priority for a verified chow claim.
pub const RANK_CHOW: u8 = 1;

/// The meld a player can declare against a discard, or `Win` to take the
/// discard as the tile completing their hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeldType {
    Chow,
    Pung,
    Kong,
    Win,
}

impl MeldType {
    /// Number of tiles in the completed meld.
    pub fn meld_len(self) -> usize {
        match self {
            MeldType::Kong => 4,
            _ => 3,
        }
    }
}

/// The rank-pair offsets that, together with a discard, form a chow.
const CHOW_OFFSETS: [[i8; 2]; 3] = [[-2, -1], [-1, 1], [1, 2]];

/// Returns `true` if `hand` holds two tiles that form a chow with `discard`.
pub fn can_meld_chow(hand: &[Tile], discard: Tile) -> bool {
    !chow_subsets(hand, discard).is_empty()
}

/// Returns `true` if `hand` holds at least two copies of `discard`.
pub fn can_meld_pung(hand: &[Tile], discard: Tile) -> bool {
    hand.iter().filter(|&&tile| tile == discard).count() >= 2
}

/// Returns `true` if `hand` holds at least three copies of `discard`.
pub fn can_meld_kong(hand: &[Tile], discard: Tile) -> bool {
    hand.iter().filter(|&&tile| tile == discard).count() >= 3
}

/// The distinct rank pairs in `hand` that complete a chow with `discard`,
/// each returned as a two-tile subset.
fn chow_subsets(hand: &[Tile], discard: Tile) -> Vec<Vec<Tile>> {
    let discard = match discard.suited() {
        Some(tile) => tile,
        None => return Vec::new(),
    };

    let ranks: HashSet<u8> = hand
        .iter()
        .filter_map(|tile| tile.suited())
        .filter(|tile| tile.suit == discard.suit)
        .map(|tile| tile.rank)
        .collect();

    let mut subsets = Vec::new();
    for offsets in CHOW_OFFSETS {
        let wanted: Option<Vec<u8>> = offsets
            .iter()
            .map(|&offset| {
                let rank = discard.rank as i8 + offset;
                if (1..=9).contains(&rank) {
                    Some(rank as u8)
                } else {
                    None
                }
            })
            .collect();

        if let Some(wanted) = wanted {
            if wanted.iter().all(|rank| ranks.contains(rank)) {
                subsets.push(
                    wanted
                        .into_iter()
                        .map(|rank| Tile::Suited(SuitedTile::new(discard.suit, rank)))
                        .collect(),
                );
            }
        }
    }

    subsets
}

/// The concrete tile subsets a claimer can use to complete `meld_type` with
/// `discard`. Pung and kong have a single unambiguous subset; a chow may be
/// completable several ways, one subset per legal adjacent pair.
pub fn valid_subsets_for_meld(hand: &[Tile], discard: Tile, meld_type: MeldType) -> Vec<Vec<Tile>> {
    match meld_type {
        MeldType::Pung => vec![vec![discard; 2]],
        MeldType::Kong => vec![vec![discard; 3]],
        MeldType::Chow => chow_subsets(hand, discard),
        MeldType::Win => Vec::new(),
    }
}

/// The central winning-hand recognizer.
///
/// Returns `true` iff `tiles` partitions into exactly `target_sets` melds
/// (pungs or chows) plus exactly one pair. Honor tiles never appear in
/// chows; special hands (seven pairs and friends) are not recognized.
///
/// Honor kinds resolve first: a count of three is a pung, a count of two is
/// the single allowed pair, anything else fails the hand. Each numeric suit
/// then resolves independently: first without spending the pair, then by
/// tentatively removing each candidate pair in the suit until one choice lets
/// the remainder resolve.
pub fn can_meld_concealed_hand(tiles: &[Tile], target_sets: usize) -> bool {
    let mut set_count = 0;
    let mut pair_found = false;

    let (honors, suits) = match count_tiles(tiles) {
        Some(counts) => counts,
        // Bonus tiles never form melds.
        None => return false,
    };

    for &count in honors.values() {
        match count {
            3 => set_count += 1,
            2 if !pair_found => pair_found = true,
            _ => return false,
        }
    }

    for counter in suits.values() {
        if let Some(sets) = resolve_melds(counter, None) {
            set_count += sets;
            continue;
        }

        if pair_found {
            // The pair is spoken for and the suit cannot resolve without one.
            return false;
        }

        let candidates: Vec<u8> = counter
            .iter()
            .filter(|(_, &count)| count >= 2)
            .map(|(&rank, _)| rank)
            .collect();

        let mut resolved = false;
        for rank in candidates {
            if let Some(sets) = resolve_melds(counter, Some(rank)) {
                set_count += sets;
                pair_found = true;
                resolved = true;
                break;
            }
        }

        if !resolved {
            return false;
        }
    }

    pair_found && set_count == target_sets
}

/// Claim priority for `meld_type` against `discard`, or zero when the claim
/// is not legal for this hand.
///
/// `revealed_melds_count` covers both revealed melds and concealed kongs;
/// `is_chow_allowed` is true only for the player seated after the discarder.
pub fn rank_claim(
    hand: &[Tile],
    discard: Tile,
    meld_type: MeldType,
    revealed_melds_count: usize,
    is_chow_allowed: bool,
) -> u8 {
    match meld_type {
        MeldType::Win => {
            let mut tiles = hand.to_vec();
            tiles.push(discard);
            let target_sets = SETS_NEEDED_TO_WIN.saturating_sub(revealed_melds_count);
            if can_meld_concealed_hand(&tiles, target_sets) {
                RANK_WIN
            } else {
                0
            }
        }
        MeldType::Pung if can_meld_pung(hand, discard) => RANK_PUNG,
        MeldType::Kong if can_meld_kong(hand, discard) => RANK_PUNG,
        MeldType::Chow if is_chow_allowed && can_meld_chow(hand, discard) => RANK_CHOW,
        _ => 0,
    }
}

/// Reconstructs a concrete decomposition of a winning hand: `target_sets`
/// melds plus the pair, the pair last when it comes from the honor tiles.
///
/// Honor triples and the honor pair are consumed greedily (for honors the
/// greedy choice is the only choice); the numeric remainder is resolved by a
/// backtracking search trying pair, pung, then chow at the smallest remaining
/// kind. Any complete decomposition is acceptable, so the first one found
/// wins.
pub fn decompose_winning_hand(tiles: &[Tile], target_sets: usize) -> Option<Vec<Vec<Tile>>> {
    let (honors, suits) = count_tiles(tiles)?;

    let mut melds = Vec::new();
    let mut pair = None;
    let mut pairs_left = 1;

    for (&tile, &count) in &honors {
        match count {
            3 => melds.push(vec![tile; 3]),
            2 if pairs_left > 0 => {
                pair = Some(vec![tile; 2]);
                pairs_left = 0;
            }
            _ => return None,
        }
    }

    let numeric: Vec<(SuitedTile, u8)> = suits
        .iter()
        .flat_map(|(&suit, counter)| {
            counter
                .iter()
                .map(move |(&rank, &count)| (SuitedTile::new(suit, rank), count))
        })
        .collect();

    melds.extend(make_melds(&numeric, pairs_left)?);

    if let Some(pair) = pair {
        melds.push(pair);
    }

    // The pair counts as one entry alongside the melds.
    if melds.len() != target_sets + 1 {
        return None;
    }

    Some(melds)
}

/// Returns the tile a concealed kong could be declared with, if the hand
/// holds four copies of anything.
pub fn four_of_a_kind(tiles: &[Tile]) -> Option<Tile> {
    let mut counts = BTreeMap::new();
    for &tile in tiles {
        *counts.entry(tile).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .find(|&(_, count)| count == 4)
        .map(|(tile, _)| tile)
}

type SuitCounters = BTreeMap<Suit, BTreeMap<u8, u8>>;

/// Splits `tiles` into honor counts and per-suit rank counters. Returns
/// `None` if a bonus tile is present, since bonus tiles cannot meld.
fn count_tiles(tiles: &[Tile]) -> Option<(BTreeMap<Tile, u8>, SuitCounters)> {
    let mut honors = BTreeMap::new();
    let mut suits: SuitCounters = BTreeMap::new();

    for &tile in tiles {
        match tile.suited() {
            Some(suited) => {
                *suits
                    .entry(suited.suit)
                    .or_default()
                    .entry(suited.rank)
                    .or_default() += 1
            }
            None if tile.is_honor() => *honors.entry(tile).or_default() += 1,
            None => return None,
        }
    }

    Some((honors, suits))
}

/// Resolves one suit's counter into chows and pungs, optionally removing a
/// pair of `pair` first. Returns the number of sets consumed, or `None` if
/// the suit cannot fully resolve.
fn resolve_melds(counter: &BTreeMap<u8, u8>, pair: Option<u8>) -> Option<usize> {
    let mut counter = counter.clone();

    if let Some(rank) = pair {
        let count = counter.get_mut(&rank)?;
        *count -= 2;
        if *count == 0 {
            counter.remove(&rank);
        }
    }

    let chows = resolve_chows(&mut counter)?;
    if counter.is_empty() {
        return Some(chows);
    }

    let pungs = resolve_pungs(&mut counter)?;
    Some(chows + pungs)
}

/// Scans kinds 1..=7 in order consuming forced chows.
///
/// A count of 1, 2, or 4 at the scan position cannot be satisfied by pungs
/// alone, so a chow anchored there is mandatory; counts of 0 and 3 advance
/// the scan and leave the decision to pung resolution. Replacing three chows
/// with three pungs (or four chows with a chow and three pungs) consumes the
/// same tiles, so deferring counts of 3 loses no decompositions.
fn resolve_chows(counter: &mut BTreeMap<u8, u8>) -> Option<usize> {
    let mut sets = 0;
    let mut rank = 1;

    while rank <= 7 && !counter.is_empty() {
        match counter.get(&rank) {
            Some(&count) if matches!(count, 1 | 2 | 4) => {
                for wanted in rank..rank + 3 {
                    let count = counter.get_mut(&wanted)?;
                    *count -= 1;
                    if *count == 0 {
                        counter.remove(&wanted);
                    }
                }
                sets += 1;
            }
            _ => rank += 1,
        }
    }

    Some(sets)
}

/// After chow resolution every remaining kind must be an exact pung.
fn resolve_pungs(counter: &mut BTreeMap<u8, u8>) -> Option<usize> {
    let mut sets = 0;
    for &count in counter.values() {
        if count != 3 {
            return None;
        }
        sets += 1;
    }

    counter.clear();
    Some(sets)
}

/// Backtracking enumeration over sorted (tile, count) entries, trying pair,
/// pung, then chow at the smallest remaining kind.
fn make_melds(tiles: &[(SuitedTile, u8)], pairs_left: usize) -> Option<Vec<Vec<Tile>>> {
    let (&(tile, count), rest) = match tiles.split_first() {
        Some(split) => split,
        None => {
            return if pairs_left == 0 {
                Some(Vec::new())
            } else {
                None
            }
        }
    };

    if pairs_left > 0 && count >= 2 {
        let mut remaining = tiles.to_vec();
        remaining[0].1 -= 2;
        if remaining[0].1 == 0 {
            remaining.remove(0);
        }

        if let Some(mut melds) = make_melds(&remaining, pairs_left - 1) {
            melds.push(vec![Tile::Suited(tile); 2]);
            return Some(melds);
        }
    }

    if count >= 3 {
        let mut remaining = tiles.to_vec();
        remaining[0].1 -= 3;
        if remaining[0].1 == 0 {
            remaining.remove(0);
        }

        if let Some(mut melds) = make_melds(&remaining, pairs_left) {
            melds.push(vec![Tile::Suited(tile); 3]);
            return Some(melds);
        }
    }

    if rest.len() >= 2 {
        let second = rest[0].0;
        let third = rest[1].0;
        if tile.suit == second.suit
            && tile.suit == third.suit
            && second.rank == tile.rank + 1
            && third.rank == tile.rank + 2
        {
            let mut remaining = tiles.to_vec();
            for slot in remaining.iter_mut().take(3) {
                slot.1 -= 1;
            }
            remaining.retain(|&(_, count)| count > 0);

            if let Some(mut melds) = make_melds(&remaining, pairs_left) {
                melds.push(vec![
                    Tile::Suited(tile),
                    Tile::Suited(second),
                    Tile::Suited(third),
                ]);
                return Some(melds);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{Dragon, Wind};

    fn suited(suit: Suit, rank: u8) -> Tile {
        Tile::Suited(SuitedTile::new(suit, rank))
    }

    #[test]
    fn chow_needs_a_numeric_discard() {
        let hand = vec![suited(Suit::Bamboo, 3), suited(Suit::Bamboo, 5)];

        assert!(can_meld_chow(&hand, suited(Suit::Bamboo, 4)));
        assert!(!can_meld_chow(&hand, Tile::Wind(Wind::East)));
        assert!(!can_meld_chow(&hand, Tile::Dragon(Dragon::Red)));
    }

    #[test]
    fn chow_does_not_cross_suits() {
        let hand = vec![suited(Suit::Bamboo, 3), suited(Suit::Dots, 5)];
        assert!(!can_meld_chow(&hand, suited(Suit::Bamboo, 4)));
    }

    #[test]
    fn chow_offsets_stay_in_rank_bounds() {
        // Completing around a terminal tile only works from one side.
        let hand = vec![suited(Suit::Dots, 2), suited(Suit::Dots, 3)];
        assert!(can_meld_chow(&hand, suited(Suit::Dots, 1)));

        let hand = vec![suited(Suit::Dots, 7), suited(Suit::Dots, 8)];
        assert!(can_meld_chow(&hand, suited(Suit::Dots, 9)));
        assert!(!can_meld_chow(&hand, suited(Suit::Dots, 1)));
    }

    #[test]
    fn pung_and_kong_count_copies() {
        let discard = suited(Suit::Character, 5);
        let two = vec![discard; 2];
        let three = vec![discard; 3];

        assert!(can_meld_pung(&two, discard));
        assert!(!can_meld_kong(&two, discard));
        assert!(can_meld_kong(&three, discard));
    }

    #[test]
    fn chow_subsets_one_per_adjacent_pair() {
        // 2,2,2 3,3,3 5,5,5 in characters around a discarded 4 completes as
        // (2,3) or (3,5), but not (5,6).
        let mut hand = Vec::new();
        for rank in [2, 3, 5] {
            hand.extend(vec![suited(Suit::Character, rank); 3]);
        }

        let subsets = valid_subsets_for_meld(&hand, suited(Suit::Character, 4), MeldType::Chow);
        assert_eq!(2, subsets.len());
        assert!(subsets.contains(&vec![suited(Suit::Character, 2), suited(Suit::Character, 3)]));
        assert!(subsets.contains(&vec![suited(Suit::Character, 3), suited(Suit::Character, 5)]));
    }

    #[test]
    fn pung_and_kong_subsets_are_copies_of_the_discard() {
        let discard = suited(Suit::Bamboo, 7);
        let hand = vec![discard; 3];

        assert_eq!(
            vec![vec![discard; 2]],
            valid_subsets_for_meld(&hand, discard, MeldType::Pung),
        );
        assert_eq!(
            vec![vec![discard; 3]],
            valid_subsets_for_meld(&hand, discard, MeldType::Kong),
        );
    }

    #[test]
    fn chow_claim_rank_is_zero_when_not_next_in_turn() {
        let hand = vec![suited(Suit::Bamboo, 3), suited(Suit::Bamboo, 5)];
        let discard = suited(Suit::Bamboo, 4);

        assert_eq!(RANK_CHOW, rank_claim(&hand, discard, MeldType::Chow, 0, true));
        assert_eq!(0, rank_claim(&hand, discard, MeldType::Chow, 0, false));
    }

    #[test]
    fn win_rank_accounts_for_revealed_melds() {
        // One meld already revealed: 3 concealed sets plus the pair remain.
        let mut hand = Vec::new();
        hand.extend(vec![Tile::Wind(Wind::East); 3]);
        hand.extend(vec![Tile::Wind(Wind::South); 3]);
        hand.extend(vec![Tile::Dragon(Dragon::Green); 3]);
        hand.push(Tile::Dragon(Dragon::White));

        let discard = Tile::Dragon(Dragon::White);
        assert_eq!(RANK_WIN, rank_claim(&hand, discard, MeldType::Win, 1, false));
        assert_eq!(0, rank_claim(&hand, discard, MeldType::Win, 0, false));
    }

    #[test]
    fn four_of_a_kind_finds_the_quad() {
        let mut hand = vec![suited(Suit::Dots, 5); 4];
        hand.push(Tile::Wind(Wind::North));

        assert_eq!(Some(suited(Suit::Dots, 5)), four_of_a_kind(&hand));
        assert_eq!(None, four_of_a_kind(&hand[1..]));
    }

    #[test]
    fn bonus_tiles_never_meld() {
        use crate::tile::{BonusKind, BonusTile};

        let mut hand = vec![suited(Suit::Bamboo, 1); 2];
        hand.push(Tile::Bonus(BonusTile {
            kind: BonusKind::Flower,
            rank: 1,
        }));

        assert!(!can_meld_concealed_hand(&hand, 0));
    }

    #[test]
    fn decompose_reports_pair_and_melds() {
        let mut tiles = Vec::new();
        tiles.extend(vec![suited(Suit::Character, 8); 3]);
        tiles.extend([
            suited(Suit::Character, 3),
            suited(Suit::Character, 4),
            suited(Suit::Character, 5),
        ]);
        tiles.extend(vec![Tile::Dragon(Dragon::White); 2]);

        let melds = decompose_winning_hand(&tiles, 2).expect("hand should decompose");
        assert_eq!(3, melds.len());
        assert_eq!(1, melds.iter().filter(|meld| meld.len() == 2).count());
    }
}
