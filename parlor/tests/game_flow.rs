//! Integration tests driving the room engine through full game scenarios:
//! joining and starting, turn cycles, claim arbitration, kong replacement
//! draws, draw-games, and tile conservation over a complete AI-backed game.

use parlor::engine::{Engine, EngineConfig};
use parlor::messages::{Outbound, Recipient, ServerEvent};
use parlor::player::{PlayerState, PlayerUuid};
use parlor::room::{Room, RoomId};
use parlor::rules::MeldType;
use parlor::store::RoomStore;
use parlor::tile::{reference_tile_set, Dragon, Suit, SuitedTile, Tile, Wind};
use pretty_assertions::assert_eq;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

fn suited(suit: Suit, rank: u8) -> Tile {
    Tile::Suited(SuitedTile::new(suit, rank))
}

fn uuid(name: &str) -> PlayerUuid {
    PlayerUuid::from(name)
}

fn engine_with_seed(seed: u64) -> Engine {
    Engine::with_rng(EngineConfig::default(), Pcg64Mcg::seed_from_u64(seed))
}

/// Events from `plan` targeted at one player.
fn events_to<'a>(plan: &'a [Outbound], target: &PlayerUuid) -> Vec<&'a ServerEvent> {
    plan.iter()
        .filter(|outbound| outbound.to == Recipient::Player(target.clone()))
        .map(|outbound| &outbound.event)
        .collect()
}

/// Events from `plan` broadcast to the room.
fn events_to_room<'a>(plan: &'a [Outbound], room_id: &RoomId) -> Vec<&'a ServerEvent> {
    plan.iter()
        .filter(|outbound| outbound.to == Recipient::Room(room_id.clone()))
        .map(|outbound| &outbound.event)
        .collect()
}

/// Seats four human players in `room_id` through the engine.
fn join_four(engine: &mut Engine, store: &mut RoomStore, room_id: &RoomId) {
    for seat in 0..4 {
        engine
            .enter_game(
                store,
                &format!("player {}", seat),
                &uuid(&format!("p{}", seat)),
                Some(room_id.clone()),
                false,
            )
            .unwrap();
    }
}

/// Puts a hand-crafted mid-game position into the store: every player gets a
/// fixed hand, the given seat holds the turn in `DiscardTile`.
fn crafted_room(
    store: &mut RoomStore,
    room_id: &RoomId,
    hands: [Vec<Tile>; 4],
    wall: Vec<Tile>,
) {
    for seat in 0..4 {
        store
            .add_player(
                room_id,
                &format!("player {}", seat),
                &uuid(&format!("p{}", seat)),
                false,
                4,
            )
            .unwrap();
    }

    let room = store.room_mut(room_id).unwrap();
    room.in_progress = true;
    room.wall = wall;
    room.current_seat = 0;

    for (seat, hand) in hands.into_iter().enumerate() {
        let player = room
            .player_mut(&uuid(&format!("p{}", seat)))
            .unwrap();
        player.hand = hand;
        player.state = if seat == 0 {
            PlayerState::DiscardTile
        } else {
            PlayerState::NoAction
        };
    }
}

fn player_state(store: &RoomStore, room_id: &RoomId, name: &str) -> PlayerState {
    store
        .room(room_id)
        .unwrap()
        .player(&uuid(name))
        .unwrap()
        .state
}

/// Multiset of every tile a room currently accounts for.
fn room_tiles(room: &Room) -> Vec<Tile> {
    let mut tiles = room.wall.clone();

    for player in room.players.values() {
        tiles.extend(player.hand.iter().copied());
        for meld in &player.revealed_melds {
            tiles.extend(meld.iter().copied());
        }
        for kong in &player.concealed_kongs {
            tiles.extend(kong.iter().copied());
        }
    }

    tiles.extend(room.current_discard);
    tiles.extend(room.past_discards.iter().copied());
    tiles.sort();
    tiles
}

#[test]
fn four_way_join_and_dealer_start() {
    let mut engine = engine_with_seed(1);
    let mut store = RoomStore::new();
    let room_id = RoomId::from("FLOW0001");

    join_four(&mut engine, &mut store, &room_id);
    let plan = engine.start_game(&mut store, &uuid("p0")).unwrap();

    // The dealer is told to discard with fourteen tiles, everyone else idles
    // on thirteen.
    for seat in 0..4 {
        let target = uuid(&format!("p{}", seat));
        let events = events_to(&plan, &target);

        let tiles = events.iter().find_map(|event| match event {
            ServerEvent::UpdateTiles(tiles) => Some(tiles),
            _ => None,
        });
        assert_eq!(
            if seat == 0 { 14 } else { 13 },
            tiles.expect("every seat gets an update_tiles").len(),
        );

        let state = events.iter().find_map(|event| match event {
            ServerEvent::UpdateCurrentState(state) => Some(*state),
            _ => None,
        });
        assert_eq!(
            Some(if seat == 0 {
                PlayerState::DiscardTile
            } else {
                PlayerState::NoAction
            }),
            state,
        );
    }
}

#[test]
fn simple_turn_cycle_moves_the_discard_to_history() {
    let mut engine = engine_with_seed(2);
    let mut store = RoomStore::new();
    let room_id = RoomId::from("FLOW0002");

    join_four(&mut engine, &mut store, &room_id);
    engine.start_game(&mut store, &uuid("p0")).unwrap();

    let discarded = store.room(&room_id).unwrap().player(&uuid("p0")).unwrap().hand[0];
    let plan = engine.end_turn(&mut store, &uuid("p0"), discarded).unwrap();

    // Everyone sees the discard; the other three seats enter the claim
    // window.
    assert!(events_to_room(&plan, &room_id)
        .iter()
        .any(|event| matches!(event, ServerEvent::UpdateDiscardedTile(tile) if *tile == discarded)));
    for seat in 1..4 {
        assert_eq!(
            PlayerState::DeclareClaim,
            player_state(&store, &room_id, &format!("p{}", seat)),
        );
    }
    assert_eq!(
        Some(discarded),
        store.room(&room_id).unwrap().current_discard,
    );

    // All three pass; the window closes and seat 1 draws next.
    engine
        .update_claim_state(&mut store, &uuid("p1"), None)
        .unwrap();
    engine
        .update_claim_state(&mut store, &uuid("p2"), None)
        .unwrap();
    let plan = engine
        .update_claim_state(&mut store, &uuid("p3"), None)
        .unwrap();

    assert!(events_to(&plan, &uuid("p1"))
        .iter()
        .any(|event| matches!(event, ServerEvent::UpdateCurrentState(PlayerState::DrawTile))));
    assert_eq!(PlayerState::DrawTile, player_state(&store, &room_id, "p1"));

    let room = store.room(&room_id).unwrap();
    assert_eq!(None, room.current_discard);
    assert_eq!(vec![discarded], room.past_discards);
}

#[test]
fn chow_claims_are_restricted_to_the_next_seat() {
    let mut engine = engine_with_seed(3);
    let mut store = RoomStore::new();
    let room_id = RoomId::from("FLOW0003");

    let p0_hand = {
        let mut hand = vec![suited(Suit::Bamboo, 4)];
        hand.extend(vec![suited(Suit::Character, 1); 3]);
        hand.extend(vec![suited(Suit::Character, 9); 3]);
        hand.extend(vec![suited(Suit::Dots, 1); 3]);
        hand.extend(vec![suited(Suit::Dots, 9); 3]);
        hand.push(Tile::Wind(Wind::East));
        hand
    };
    // Seats 1 and 2 hold identical chow material around the bamboo 4.
    let claimant_hand = {
        let mut hand = vec![suited(Suit::Bamboo, 3), suited(Suit::Bamboo, 5)];
        hand.extend(vec![suited(Suit::Dots, 2); 2]);
        hand.extend(vec![suited(Suit::Dots, 4); 2]);
        hand.extend(vec![suited(Suit::Dots, 6); 2]);
        hand.extend(vec![suited(Suit::Character, 2); 2]);
        hand.extend(vec![suited(Suit::Character, 4); 2]);
        hand.push(Tile::Wind(Wind::South));
        hand
    };
    let p3_hand = {
        let mut hand = vec![Tile::Wind(Wind::North); 3];
        hand.extend(vec![Tile::Dragon(Dragon::Green); 3]);
        hand.extend(vec![Tile::Dragon(Dragon::Red); 3]);
        hand.extend([
            suited(Suit::Character, 6),
            suited(Suit::Character, 8),
            suited(Suit::Bamboo, 8),
            suited(Suit::Bamboo, 9),
        ]);
        hand
    };

    crafted_room(
        &mut store,
        &room_id,
        [
            p0_hand,
            claimant_hand.clone(),
            claimant_hand,
            p3_hand,
        ],
        vec![suited(Suit::Bamboo, 1); 10],
    );

    engine
        .end_turn(&mut store, &uuid("p0"), suited(Suit::Bamboo, 4))
        .unwrap();

    engine
        .update_claim_state(&mut store, &uuid("p1"), Some(MeldType::Chow))
        .unwrap();
    engine
        .update_claim_state(&mut store, &uuid("p2"), Some(MeldType::Chow))
        .unwrap();
    let plan = engine
        .update_claim_state(&mut store, &uuid("p3"), None)
        .unwrap();

    // Seat 1 is next in turn order, so only its chow ranks; seat 2's claim
    // is ignored.
    assert_eq!(PlayerState::RevealMeld, player_state(&store, &room_id, "p1"));
    assert_eq!(PlayerState::NoAction, player_state(&store, &room_id, "p2"));

    let subsets = events_to(&plan, &uuid("p1"))
        .iter()
        .find_map(|event| match event {
            ServerEvent::ValidTileSetsForMeld {
                valid_meld_subsets,
                new_meld,
                new_meld_target_length,
            } => Some((valid_meld_subsets.clone(), new_meld.clone(), *new_meld_target_length)),
            _ => None,
        })
        .expect("claimant is offered meld subsets");

    assert!(subsets
        .0
        .contains(&vec![suited(Suit::Bamboo, 3), suited(Suit::Bamboo, 5)]));
    assert_eq!(vec![suited(Suit::Bamboo, 4)], subsets.1);
    assert_eq!(3, subsets.2);

    // Completing the meld reveals it sorted and hands seat 1 the discard
    // turn.
    engine
        .complete_new_meld(
            &mut store,
            &uuid("p1"),
            vec![
                suited(Suit::Bamboo, 4),
                suited(Suit::Bamboo, 3),
                suited(Suit::Bamboo, 5),
            ],
        )
        .unwrap();

    let room = store.room(&room_id).unwrap();
    let claimant = room.player(&uuid("p1")).unwrap();
    assert_eq!(
        vec![vec![
            suited(Suit::Bamboo, 3),
            suited(Suit::Bamboo, 4),
            suited(Suit::Bamboo, 5),
        ]],
        claimant.revealed_melds,
    );
    assert_eq!(PlayerState::DiscardTile, claimant.state);
    assert_eq!(11, claimant.hand.len());
    assert_eq!(1, room.current_seat);
}

#[test]
fn winning_claim_beats_pung_and_position_breaks_win_ties() {
    let mut engine = engine_with_seed(4);
    let mut store = RoomStore::new();
    let room_id = RoomId::from("FLOW0004");

    let p0_hand = {
        let mut hand = vec![suited(Suit::Dots, 5)];
        hand.extend(vec![suited(Suit::Bamboo, 1), suited(Suit::Bamboo, 2), suited(Suit::Bamboo, 3)]);
        hand.extend(vec![suited(Suit::Bamboo, 4), suited(Suit::Bamboo, 5), suited(Suit::Bamboo, 6)]);
        hand.extend(vec![suited(Suit::Character, 1), suited(Suit::Character, 2), suited(Suit::Character, 3)]);
        hand.extend(vec![Tile::Wind(Wind::West); 3]);
        hand.push(Tile::Wind(Wind::East));
        hand
    };
    // Seat 1 wins by completing a chow around the dots 5.
    let p1_hand = {
        let mut hand = vec![suited(Suit::Dots, 3), suited(Suit::Dots, 4)];
        hand.extend(vec![suited(Suit::Bamboo, 7); 3]);
        hand.extend(vec![suited(Suit::Character, 6); 3]);
        hand.extend(vec![Tile::Dragon(Dragon::Red); 3]);
        hand.extend(vec![Tile::Wind(Wind::North); 2]);
        hand
    };
    // Seat 2 can only pung the dots 5.
    let p2_hand = {
        let mut hand = vec![suited(Suit::Dots, 5); 2];
        hand.extend(vec![
            suited(Suit::Bamboo, 8),
            suited(Suit::Bamboo, 9),
            suited(Suit::Character, 4),
            suited(Suit::Character, 5),
            suited(Suit::Dots, 1),
            suited(Suit::Dots, 2),
            suited(Suit::Dots, 9),
            suited(Suit::Character, 8),
            Tile::Wind(Wind::South),
            Tile::Wind(Wind::West),
            Tile::Dragon(Dragon::Green),
        ]);
        hand
    };
    // Seat 3 also wins with the dots 5, but sits further from the
    // discarder.
    let p3_hand = {
        let mut hand = vec![suited(Suit::Dots, 6), suited(Suit::Dots, 7)];
        hand.extend(vec![suited(Suit::Character, 7); 3]);
        hand.extend(vec![Tile::Wind(Wind::South); 3]);
        hand.extend(vec![Tile::Dragon(Dragon::White); 3]);
        hand.extend(vec![suited(Suit::Dots, 9); 2]);
        hand
    };

    crafted_room(
        &mut store,
        &room_id,
        [p0_hand, p1_hand, p2_hand, p3_hand],
        vec![suited(Suit::Bamboo, 1); 10],
    );

    engine
        .end_turn(&mut store, &uuid("p0"), suited(Suit::Dots, 5))
        .unwrap();

    // Registration order deliberately puts the farther winner first.
    engine
        .update_claim_state(&mut store, &uuid("p2"), Some(MeldType::Pung))
        .unwrap();
    engine
        .update_claim_state(&mut store, &uuid("p3"), Some(MeldType::Win))
        .unwrap();
    let plan = engine
        .update_claim_state(&mut store, &uuid("p1"), Some(MeldType::Win))
        .unwrap();

    // Both wins out-rank the pung; the seat closest after the discarder
    // takes the tie.
    assert_eq!(PlayerState::Win, player_state(&store, &room_id, "p1"));
    assert_eq!(PlayerState::Loss, player_state(&store, &room_id, "p0"));
    assert_eq!(PlayerState::Loss, player_state(&store, &room_id, "p2"));
    assert_eq!(PlayerState::Loss, player_state(&store, &room_id, "p3"));

    let room = store.room(&room_id).unwrap();
    assert!(!room.in_progress);

    // The winner's hand is fully decomposed for display: four sets plus the
    // pair, and an emptied concealed hand.
    let winner = room.player(&uuid("p1")).unwrap();
    assert!(winner.hand.is_empty());
    assert_eq!(5, winner.revealed_melds.len());
    assert!(winner
        .revealed_melds
        .contains(&vec![suited(Suit::Dots, 3), suited(Suit::Dots, 4), suited(Suit::Dots, 5)]));

    assert!(events_to_room(&plan, &room_id)
        .iter()
        .any(|event| matches!(event, ServerEvent::EndGame)));
}

#[test]
fn kong_claim_requires_a_replacement_draw() {
    let mut engine = engine_with_seed(5);
    let mut store = RoomStore::new();
    let room_id = RoomId::from("FLOW0005");

    let p0_hand = {
        let mut hand = vec![suited(Suit::Bamboo, 7)];
        hand.extend(vec![suited(Suit::Character, 1); 3]);
        hand.extend(vec![suited(Suit::Character, 2); 3]);
        hand.extend(vec![suited(Suit::Character, 3); 3]);
        hand.extend(vec![Tile::Wind(Wind::East); 3]);
        hand.push(Tile::Wind(Wind::West));
        hand
    };
    let p1_hand = {
        let mut hand = vec![suited(Suit::Bamboo, 7); 3];
        hand.extend(vec![suited(Suit::Dots, 1); 2]);
        hand.extend(vec![suited(Suit::Dots, 3); 2]);
        hand.extend(vec![suited(Suit::Dots, 5); 2]);
        hand.extend(vec![suited(Suit::Dots, 7); 2]);
        hand.extend(vec![Tile::Wind(Wind::South); 2]);
        hand
    };
    let replacement = suited(Suit::Character, 9);

    let p2_hand = {
        let mut hand = vec![Tile::Wind(Wind::North); 3];
        hand.extend(vec![Tile::Wind(Wind::South); 2]);
        hand.extend([
            suited(Suit::Dots, 2),
            suited(Suit::Dots, 4),
            suited(Suit::Dots, 6),
            suited(Suit::Dots, 8),
            suited(Suit::Character, 4),
            suited(Suit::Character, 5),
            suited(Suit::Character, 6),
            Tile::Dragon(Dragon::Red),
        ]);
        hand
    };
    let p3_hand = {
        let mut hand = vec![Tile::Dragon(Dragon::Green); 3];
        hand.extend(vec![Tile::Dragon(Dragon::White); 3]);
        hand.extend(vec![Tile::Wind(Wind::West); 3]);
        hand.extend([
            suited(Suit::Bamboo, 1),
            suited(Suit::Bamboo, 2),
            suited(Suit::Bamboo, 3),
            Tile::Wind(Wind::East),
        ]);
        hand
    };

    crafted_room(
        &mut store,
        &room_id,
        [p0_hand, p1_hand, p2_hand, p3_hand],
        vec![replacement],
    );

    engine
        .end_turn(&mut store, &uuid("p0"), suited(Suit::Bamboo, 7))
        .unwrap();

    engine
        .update_claim_state(&mut store, &uuid("p1"), Some(MeldType::Kong))
        .unwrap();
    engine
        .update_claim_state(&mut store, &uuid("p2"), None)
        .unwrap();
    engine
        .update_claim_state(&mut store, &uuid("p3"), None)
        .unwrap();

    assert_eq!(PlayerState::RevealMeld, player_state(&store, &room_id, "p1"));

    engine
        .complete_new_meld(&mut store, &uuid("p1"), vec![suited(Suit::Bamboo, 7); 4])
        .unwrap();

    // A four-tile meld sends the claimant back to the wall instead of
    // straight to the discard.
    assert_eq!(PlayerState::DrawTile, player_state(&store, &room_id, "p1"));

    let plan = engine.draw_tile(&mut store, &uuid("p1")).unwrap();
    assert!(events_to(&plan, &uuid("p1"))
        .iter()
        .any(|event| matches!(event, ServerEvent::ExtendTiles(tiles) if tiles == &vec![replacement])));

    let room = store.room(&room_id).unwrap();
    assert!(room.wall.is_empty());
    let claimant = room.player(&uuid("p1")).unwrap();
    assert_eq!(PlayerState::DiscardTile, claimant.state);
    assert_eq!(vec![vec![suited(Suit::Bamboo, 7); 4]], claimant.revealed_melds);
    assert_eq!(11, claimant.hand.len());
}

#[test]
fn exhausted_wall_ends_the_game_in_a_draw() {
    let mut engine = engine_with_seed(6);
    let mut store = RoomStore::new();
    let room_id = RoomId::from("FLOW0006");

    let p0_hand = {
        let mut hand = vec![suited(Suit::Character, 5)];
        hand.extend(vec![suited(Suit::Bamboo, 1); 3]);
        hand.extend(vec![suited(Suit::Bamboo, 2); 3]);
        hand.extend(vec![suited(Suit::Bamboo, 3); 3]);
        hand.extend(vec![suited(Suit::Character, 1); 3]);
        hand.push(Tile::Wind(Wind::East));
        hand
    };
    let p1_hand = {
        let mut hand = vec![suited(Suit::Dots, 1); 3];
        hand.extend(vec![suited(Suit::Dots, 2); 3]);
        hand.extend(vec![suited(Suit::Dots, 3); 3]);
        hand.extend(vec![Tile::Wind(Wind::North); 3]);
        hand.push(Tile::Wind(Wind::South));
        hand
    };
    let p2_hand = {
        let mut hand = vec![suited(Suit::Bamboo, 7); 3];
        hand.extend(vec![suited(Suit::Bamboo, 8); 3]);
        hand.extend(vec![suited(Suit::Bamboo, 9); 3]);
        hand.extend(vec![Tile::Wind(Wind::West); 3]);
        hand.push(Tile::Wind(Wind::South));
        hand
    };
    let p3_hand = {
        let mut hand = vec![suited(Suit::Character, 7); 3];
        hand.extend(vec![suited(Suit::Character, 8); 3]);
        hand.extend(vec![suited(Suit::Character, 9); 3]);
        hand.extend(vec![Tile::Dragon(Dragon::Green); 3]);
        hand.push(Tile::Dragon(Dragon::Red));
        hand
    };

    crafted_room(
        &mut store,
        &room_id,
        [p0_hand, p1_hand, p2_hand, p3_hand],
        Vec::new(),
    );

    engine
        .end_turn(&mut store, &uuid("p0"), suited(Suit::Character, 5))
        .unwrap();

    engine
        .update_claim_state(&mut store, &uuid("p1"), None)
        .unwrap();
    engine
        .update_claim_state(&mut store, &uuid("p2"), None)
        .unwrap();
    let plan = engine
        .update_claim_state(&mut store, &uuid("p3"), None)
        .unwrap();

    for seat in 0..4 {
        assert_eq!(
            PlayerState::Draw,
            player_state(&store, &room_id, &format!("p{}", seat)),
        );
    }
    assert!(!store.room(&room_id).unwrap().in_progress);
    assert!(events_to_room(&plan, &room_id)
        .iter()
        .any(|event| matches!(event, ServerEvent::EndGame)));
}

#[test]
fn full_game_against_ai_conserves_every_tile() {
    let mut engine = engine_with_seed(7);
    let mut store = RoomStore::new();
    let human = uuid("the-human");

    engine
        .enter_game(&mut store, "human", &human, None, false)
        .unwrap();
    let room_id = store.room_id_of(&human).unwrap().clone();

    engine.start_game(&mut store, &human).unwrap();

    let reference: Vec<Tile> = {
        let mut tiles = reference_tile_set(false).to_vec();
        tiles.sort();
        tiles
    };

    let mut steps = 0;
    loop {
        {
            let room = store.room(&room_id).unwrap();
            assert_eq!(reference, room_tiles(room), "tile conservation violated");

            let claiming = room
                .players
                .values()
                .filter(|player| player.state == PlayerState::DeclareClaim)
                .count();
            let active = room
                .players
                .values()
                .filter(|player| player.state.is_active())
                .count();
            if claiming > 0 {
                assert_eq!(3, claiming, "claim window must involve three seats");
                assert_eq!(0, active);
            } else {
                assert!(active <= 1, "more than one active player");
            }

            if !room.in_progress {
                break;
            }
        }

        let state = store
            .room(&room_id)
            .unwrap()
            .player(&human)
            .unwrap()
            .state;
        match state {
            PlayerState::DrawTile => {
                engine.draw_tile(&mut store, &human).unwrap();
            }
            PlayerState::DiscardTile => {
                let player = store.room(&room_id).unwrap().player(&human).unwrap();
                if player.can_declare_win {
                    engine.declare_win(&mut store, &human).unwrap();
                } else {
                    let tile = player.hand[0];
                    engine.end_turn(&mut store, &human, tile).unwrap();
                }
            }
            PlayerState::DeclareClaim => {
                engine.update_claim_state(&mut store, &human, None).unwrap();
            }
            other => panic!("human stuck in state {:?}", other),
        }

        steps += 1;
        assert!(steps < 2000, "game failed to terminate");
    }

    // Game over: every seat landed in a terminal state.
    let room = store.room(&room_id).unwrap();
    for player in room.players.values() {
        assert!(
            matches!(
                player.state,
                PlayerState::Win | PlayerState::Loss | PlayerState::Draw
            ),
            "{} ended in {:?}",
            player.uuid,
            player.state,
        );
    }
}
