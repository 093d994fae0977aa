//! The per-room state machine.
//!
//! Every operation locates a room through the store, validates the acting
//! player's state, mutates that one room, and returns an [`EventPlan`] for
//! the caller to emit. Nothing here performs I/O, so an operation plus its
//! plan emission can be made atomic per room by the transport layer.
//!
//! AI seats are driven to quiescence inside the same mutation: after any
//! operation that can hand the turn to an AI player, [`Engine::drive_ai`]
//! keeps acting for AI seats until a human owes the next move.

use crate::{
    messages::{EventPlan, OpponentView, Outbound, PlayerPatch, ServerEvent},
    player::{PlayerState, PlayerUuid},
    room::{ChatEntry, Room, RoomId},
    rules::{self, MeldType, RANK_WIN},
    store::{RoomFull, RoomStore},
    tile::{self, Tile},
};
use fehler::{throw, throws};
use rand::{distributions::Alphanumeric, Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("player {0} is not seated in any room")]
    UnknownPlayer(PlayerUuid),

    #[error("player {uuid} cannot {action} while in state {state:?}")]
    IllegalState {
        uuid: PlayerUuid,
        action: &'static str,
        state: PlayerState,
    },

    #[error("player {0} is not the host")]
    NotHost(PlayerUuid),

    #[error("the game is already in progress")]
    GameAlreadyStarted,

    #[error(transparent)]
    RoomFull(#[from] RoomFull),

    #[error("discarded tile is not in the player's hand")]
    TileNotInHand,

    #[error("player {0} already responded to this claim window")]
    DuplicateClaim(PlayerUuid),

    #[error("hand has no concealed four-of-a-kind")]
    NoConcealedKong,

    #[error("hand is not a winning hand")]
    NotAWinningHand,

    #[error("meld does not match any offered subset")]
    InvalidMeld,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub include_bonus: bool,
    pub max_players: usize,
    pub claim_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            include_bonus: false,
            max_players: 4,
            claim_timeout_ms: 5000,
        }
    }
}

/// The room engine. Holds only configuration and the RNG; all game state
/// lives in the store's rooms.
pub struct Engine {
    config: EngineConfig,
    rng: Pcg64Mcg,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_rng(config, Pcg64Mcg::from_entropy())
    }

    /// Engine with a caller-supplied RNG, for deterministic tests.
    pub fn with_rng(config: EngineConfig, rng: Pcg64Mcg) -> Self {
        Self { config, rng }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Places a player in a room: their existing room if they are already
    /// seated, an explicitly named room, a freshly created one, or whatever
    /// lobby matchmaking finds.
    #[throws(EngineError)]
    pub fn enter_game(
        &mut self,
        store: &mut RoomStore,
        username: &str,
        uuid: &PlayerUuid,
        room_id: Option<RoomId>,
        should_create_room: bool,
    ) -> EventPlan {
        let room_id = match store.room_id_of(uuid) {
            Some(id) => id.clone(),
            None => match room_id {
                Some(id) => id,
                None if should_create_room => store.generate_room_id(&mut self.rng),
                None => store.search_for_room(uuid, self.config.max_players, &mut self.rng),
            },
        };

        store.add_player(&room_id, username, uuid, false, self.config.max_players)?;

        let room = store
            .room_mut(&room_id)
            .unwrap_or_else(|| panic!("room {} vanished after join", room_id));
        let player = room.players.get(uuid).expect("player vanished after join");
        let username = player.username.clone();

        let mut plan = vec![
            Outbound::player(uuid, ServerEvent::UpdateRoomId(room_id.clone())),
            Outbound::player(
                uuid,
                ServerEvent::UpdatePlayer(PlayerPatch {
                    username: Some(username.clone()),
                    is_host: Some(player.is_host),
                    ..Default::default()
                }),
            ),
        ];

        let entry = ChatEntry::server(format!("{} joined the game", username));
        room.messages.push(entry.clone());
        plan.push(Outbound::room(&room_id, ServerEvent::TextMessage(entry)));
        Self::push_opponent_updates(room, &mut plan);

        info!(%uuid, %room_id, "player entered the game");
        plan
    }

    /// Host-only: fill empty seats with AI players, build and deal the wall,
    /// and hand the opening discard to the dealer.
    #[throws(EngineError)]
    pub fn start_game(&mut self, store: &mut RoomStore, uuid: &PlayerUuid) -> EventPlan {
        let room_id = match store.room_id_of(uuid) {
            Some(id) => id.clone(),
            None => throw!(EngineError::UnknownPlayer(uuid.clone())),
        };

        {
            let room = store.room(&room_id).expect("mapped room does not exist");
            let player = match room.player(uuid) {
                Some(player) => player,
                None => throw!(EngineError::UnknownPlayer(uuid.clone())),
            };

            if !player.is_host {
                throw!(EngineError::NotHost(uuid.clone()));
            }
            if room.in_progress {
                throw!(EngineError::GameAlreadyStarted);
            }
        }

        // Fill the table with AI seats so the game can start short-handed.
        let mut bot_number = 1;
        while store.room(&room_id).expect("room vanished").seats.len() < self.config.max_players {
            let suffix: String = (&mut self.rng)
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect();
            let ai_uuid = PlayerUuid::new(format!("bot-{}", suffix));

            store.add_player(
                &room_id,
                &format!("Bot {}", bot_number),
                &ai_uuid,
                true,
                self.config.max_players,
            )?;
            bot_number += 1;
        }

        let room = store.room_mut(&room_id).expect("room vanished");
        room.wall = tile::build_wall(self.config.include_bonus, &mut self.rng);
        room.current_seat = 0;
        room.current_discard = None;
        room.past_discards.clear();
        room.claimed.clear();
        room.in_progress = true;

        let hands = tile::deal(&mut room.wall, room.seats.len());
        for (seat, hand) in hands.into_iter().enumerate() {
            let seat_uuid = room.seats[seat].clone();
            let player = room.player_mut(&seat_uuid).expect("seat without player");

            player.hand = hand;
            player.reset_claim_state();
            player.state = if seat == 0 {
                PlayerState::DiscardTile
            } else {
                PlayerState::NoAction
            };

            if seat == 0 {
                player.refresh_flags();
            } else {
                player.can_declare_win = false;
                player.can_declare_kong = false;
            }
        }

        let mut plan = EventPlan::new();
        for seat_uuid in room.seats.clone() {
            let player = &room.players[&seat_uuid];
            plan.push(Outbound::player(
                &seat_uuid,
                ServerEvent::UpdateTiles(player.hand.clone()),
            ));
            plan.push(Outbound::player(
                &seat_uuid,
                ServerEvent::UpdateCurrentState(player.state),
            ));

            if player.state == PlayerState::DiscardTile {
                plan.push(Outbound::player(
                    &seat_uuid,
                    ServerEvent::UpdateCanDeclareWin(player.can_declare_win),
                ));
                plan.push(Outbound::player(
                    &seat_uuid,
                    ServerEvent::UpdateCanDeclareKong(player.can_declare_kong),
                ));
            }
        }

        let entry = ChatEntry::server("The game has started");
        room.messages.push(entry.clone());
        plan.push(Outbound::room(&room_id, ServerEvent::TextMessage(entry)));
        Self::push_opponent_updates(room, &mut plan);

        info!(%room_id, "game started");
        Self::drive_ai(room, &mut plan);
        plan
    }

    /// Draw the next wall tile into the player's hand.
    #[throws(EngineError)]
    pub fn draw_tile(&mut self, store: &mut RoomStore, uuid: &PlayerUuid) -> EventPlan {
        let room = Self::room_of_mut(store, uuid)?;
        Self::expect_state(room, uuid, PlayerState::DrawTile, "draw a tile")?;

        let mut plan = EventPlan::new();
        Self::do_draw(room, uuid, &mut plan);
        plan
    }

    /// Discard a tile, ending the turn and opening the claim window.
    #[throws(EngineError)]
    pub fn end_turn(
        &mut self,
        store: &mut RoomStore,
        uuid: &PlayerUuid,
        discarded_tile: Tile,
    ) -> EventPlan {
        let room = Self::room_of_mut(store, uuid)?;
        Self::expect_state(room, uuid, PlayerState::DiscardTile, "discard a tile")?;

        let player = room.player_mut(uuid).expect("seat without player");
        if !player.remove_tile(discarded_tile) {
            throw!(EngineError::TileNotInHand);
        }

        let mut plan = EventPlan::new();
        Self::do_discard(room, uuid, discarded_tile, &mut plan);
        Self::drive_ai(room, &mut plan);
        plan
    }

    /// Record the claim countdown's start time, first report wins. Replies
    /// with the timer event so a reloading client resumes mid-countdown.
    #[throws(EngineError)]
    pub fn declare_claim_start(
        &mut self,
        store: &mut RoomStore,
        uuid: &PlayerUuid,
        start_time: u64,
    ) -> EventPlan {
        let room = Self::room_of_mut(store, uuid)?;
        Self::expect_state(room, uuid, PlayerState::DeclareClaim, "start a claim countdown")?;

        let player = room.player_mut(uuid).expect("seat without player");
        let start = *player.declare_claim_start_time.get_or_insert(start_time);

        vec![Outbound::player(
            uuid,
            ServerEvent::DeclareClaimWithTimer {
                start_time: start,
                ms_duration: self.config.claim_timeout_ms,
            },
        )]
    }

    /// Submit a claim (or a pass) for the current discard. The window closes
    /// and arbitration runs once all three non-discarders have responded.
    #[throws(EngineError)]
    pub fn update_claim_state(
        &mut self,
        store: &mut RoomStore,
        uuid: &PlayerUuid,
        declared_meld: Option<MeldType>,
    ) -> EventPlan {
        let room = Self::room_of_mut(store, uuid)?;
        Self::expect_state(room, uuid, PlayerState::DeclareClaim, "claim a discard")?;

        if room.claimed.contains(uuid) {
            throw!(EngineError::DuplicateClaim(uuid.clone()));
        }

        let player = room.player_mut(uuid).expect("seat without player");
        player.declared_meld_type = declared_meld;
        room.claimed.push(uuid.clone());

        let mut plan = EventPlan::new();
        if room.claimed.len() + 1 >= room.seats.len() {
            Self::arbitrate_claims(room, &mut plan);
            Self::drive_ai(room, &mut plan);
        }
        plan
    }

    /// Finalize a claimed meld with the tiles the player chose.
    #[throws(EngineError)]
    pub fn complete_new_meld(
        &mut self,
        store: &mut RoomStore,
        uuid: &PlayerUuid,
        new_meld: Vec<Tile>,
    ) -> EventPlan {
        let room = Self::room_of_mut(store, uuid)?;
        Self::expect_state(room, uuid, PlayerState::RevealMeld, "reveal a meld")?;

        // The submitted meld must be the in-progress meld (the claimed
        // discard) plus exactly one of the offered subsets.
        let player = room.player(uuid).expect("seat without player");
        let subset = player
            .valid_meld_subsets
            .iter()
            .find(|subset| {
                let mut expected = player.new_meld.clone();
                expected.extend(subset.iter().copied());
                multiset_eq(&expected, &new_meld)
            })
            .cloned();

        let subset = match subset {
            Some(subset) => subset,
            None => throw!(EngineError::InvalidMeld),
        };

        let mut plan = EventPlan::new();
        Self::do_complete_meld(room, uuid, &subset, &mut plan);
        plan
    }

    /// Move an in-hand four-of-a-kind into the concealed kongs. The player
    /// draws a replacement tile before discarding.
    #[throws(EngineError)]
    pub fn declare_concealed_kong(&mut self, store: &mut RoomStore, uuid: &PlayerUuid) -> EventPlan {
        let room = Self::room_of_mut(store, uuid)?;
        Self::expect_state(room, uuid, PlayerState::DiscardTile, "declare a concealed kong")?;

        let player = room.player_mut(uuid).expect("seat without player");
        let tile = match rules::four_of_a_kind(&player.hand) {
            Some(tile) => tile,
            None => throw!(EngineError::NoConcealedKong),
        };

        for _ in 0..4 {
            player.remove_tile(tile);
        }
        player.concealed_kongs.push(vec![tile; 4]);
        player.state = PlayerState::DrawTile;
        player.can_declare_win = false;
        player.can_declare_kong = false;

        let mut plan = vec![
            Outbound::player(
                uuid,
                ServerEvent::UpdateConcealedKongs(player.concealed_kongs.clone()),
            ),
            Outbound::player(uuid, ServerEvent::UpdateTiles(player.hand.clone())),
            Outbound::player(uuid, ServerEvent::UpdateCurrentState(PlayerState::DrawTile)),
            Outbound::player(uuid, ServerEvent::UpdateCanDeclareWin(false)),
            Outbound::player(uuid, ServerEvent::UpdateCanDeclareKong(false)),
        ];
        Self::push_opponent_updates(room, &mut plan);
        plan
    }

    /// Verify and apply a win declared on the player's own turn.
    #[throws(EngineError)]
    pub fn declare_win(&mut self, store: &mut RoomStore, uuid: &PlayerUuid) -> EventPlan {
        let room = Self::room_of_mut(store, uuid)?;
        Self::expect_state(room, uuid, PlayerState::DiscardTile, "declare a win")?;

        let player = room.player(uuid).expect("seat without player");
        if !rules::can_meld_concealed_hand(&player.hand, player.target_sets()) {
            throw!(EngineError::NotAWinningHand);
        }

        let mut plan = EventPlan::new();
        Self::emit_winning_state(room, uuid, &mut plan);
        plan
    }

    /// Snapshot for a returning client; an empty response when the uuid has
    /// no active game.
    pub fn rejoin(&self, store: &RoomStore, uuid: &PlayerUuid) -> EventPlan {
        let snapshot = store.room_of(uuid).and_then(|room| {
            room.player(uuid)
                .map(|player| crate::messages::GameSnapshot::of(room, player))
        });

        vec![Outbound::player(uuid, ServerEvent::ExistingGameData(snapshot))]
    }

    /// Re-send the transient events that a freshly reloaded client cannot
    /// reconstruct from the snapshot alone.
    pub fn reemit_events(&self, store: &RoomStore, uuid: &PlayerUuid) -> EventPlan {
        let mut plan = EventPlan::new();
        let player = match store.room_of(uuid).and_then(|room| room.player(uuid)) {
            Some(player) => player,
            None => return plan,
        };

        match player.state {
            PlayerState::DeclareClaim => {
                if let Some(start) = player.declare_claim_start_time {
                    plan.push(Outbound::player(
                        uuid,
                        ServerEvent::DeclareClaimWithTimer {
                            start_time: start,
                            ms_duration: self.config.claim_timeout_ms,
                        },
                    ));
                }
            }
            PlayerState::RevealMeld => {
                plan.push(Outbound::player(
                    uuid,
                    ServerEvent::ValidTileSetsForMeld {
                        valid_meld_subsets: player.valid_meld_subsets.clone(),
                        new_meld: player.new_meld.clone(),
                        new_meld_target_length: player
                            .declared_meld_type
                            .map(MeldType::meld_len)
                            .unwrap_or(3),
                    },
                ));
            }
            _ => {}
        }

        plan
    }

    /// Chat from a seated player, broadcast to their room.
    #[throws(EngineError)]
    pub fn chat(&self, store: &mut RoomStore, uuid: &PlayerUuid, message: &str) -> EventPlan {
        let room = Self::room_of_mut(store, uuid)?;
        let username = match room.player(uuid) {
            Some(player) => player.username.clone(),
            None => throw!(EngineError::UnknownPlayer(uuid.clone())),
        };

        let room_id = room.id.clone();
        let entry = ChatEntry::player(format!("{}: {}", username, message));
        room.messages.push(entry.clone());
        vec![Outbound::room(&room_id, ServerEvent::TextMessage(entry))]
    }

    /// Remove a player from their room, deleting the room if it empties.
    #[throws(EngineError)]
    pub fn leave_game(&mut self, store: &mut RoomStore, uuid: &PlayerUuid) -> EventPlan {
        let username = store
            .room_of(uuid)
            .and_then(|room| room.player(uuid))
            .map(|player| player.username.clone());

        let room_id = match store.remove_player(uuid) {
            Some(id) => id,
            None => throw!(EngineError::UnknownPlayer(uuid.clone())),
        };

        let mut plan = EventPlan::new();
        if let Some(room) = store.room_mut(&room_id) {
            let entry = ChatEntry::server(format!(
                "{} left the game",
                username.unwrap_or_else(|| uuid.to_string()),
            ));
            room.messages.push(entry.clone());
            plan.push(Outbound::room(&room_id, ServerEvent::TextMessage(entry)));
            Self::push_opponent_updates(room, &mut plan);
        }

        store.delete_room_if_empty(&room_id);
        info!(%uuid, %room_id, "player left the game");
        plan
    }

    /// Watchdog entry point: close out a claim window whose clients never
    /// all responded. Synthesizes a pass for every seat still owing a
    /// response, then arbitrates as usual.
    ///
    /// `generation` guards against stale timers: the op is a no-op unless
    /// the room is still in the same claim window the timer was armed for.
    pub fn expire_claim_window(
        &mut self,
        store: &mut RoomStore,
        room_id: &RoomId,
        generation: u64,
    ) -> EventPlan {
        let mut plan = EventPlan::new();
        let room = match store.room_mut(room_id) {
            Some(room) => room,
            None => return plan,
        };

        if room.claim_generation != generation || !room.claim_window_open() {
            return plan;
        }

        let pending: Vec<PlayerUuid> = room
            .seats
            .iter()
            .filter(|uuid| {
                room.players
                    .get(*uuid)
                    .map(|player| player.state == PlayerState::DeclareClaim)
                    .unwrap_or(false)
                    && !room.claimed.contains(*uuid)
            })
            .cloned()
            .collect();

        for uuid in pending {
            warn!(%uuid, %room_id, "claim window expired, synthesizing a pass");
            room.player_mut(&uuid).expect("seat without player").declared_meld_type = None;
            room.claimed.push(uuid);
        }

        if room.claimed.len() + 1 >= room.seats.len() {
            Self::arbitrate_claims(room, &mut plan);
            Self::drive_ai(room, &mut plan);
        }
        plan
    }

    fn room_of_mut<'a>(
        store: &'a mut RoomStore,
        uuid: &PlayerUuid,
    ) -> Result<&'a mut Room, EngineError> {
        store
            .room_of_mut(uuid)
            .ok_or_else(|| EngineError::UnknownPlayer(uuid.clone()))
    }

    fn expect_state(
        room: &Room,
        uuid: &PlayerUuid,
        expected: PlayerState,
        action: &'static str,
    ) -> Result<(), EngineError> {
        let state = room
            .player(uuid)
            .ok_or_else(|| EngineError::UnknownPlayer(uuid.clone()))?
            .state;

        if state != expected {
            return Err(EngineError::IllegalState {
                uuid: uuid.clone(),
                action,
                state,
            });
        }
        Ok(())
    }

    /// Pop a wall tile into the player's hand, or end the game in a draw if
    /// the wall is out of tiles.
    fn do_draw(room: &mut Room, uuid: &PlayerUuid, plan: &mut EventPlan) {
        let drawn = match room.wall.pop() {
            Some(tile) => tile,
            None => {
                Self::end_in_draw(room, plan);
                return;
            }
        };

        let player = room.player_mut(uuid).expect("seat without player");
        player.hand.push(drawn);
        player.state = PlayerState::DiscardTile;
        player.refresh_flags();

        plan.push(Outbound::player(uuid, ServerEvent::ExtendTiles(vec![drawn])));
        plan.push(Outbound::player(
            uuid,
            ServerEvent::UpdateCurrentState(PlayerState::DiscardTile),
        ));
        plan.push(Outbound::player(
            uuid,
            ServerEvent::UpdateCanDeclareWin(player.can_declare_win),
        ));
        plan.push(Outbound::player(
            uuid,
            ServerEvent::UpdateCanDeclareKong(player.can_declare_kong),
        ));
        Self::push_opponent_updates(room, plan);
    }

    /// Publish a discard and open the claim window for the other seats.
    ///
    /// The discarding player's tile is already out of their hand.
    fn do_discard(room: &mut Room, uuid: &PlayerUuid, discarded: Tile, plan: &mut EventPlan) {
        debug_assert!(room.current_discard.is_none(), "unresolved discard");

        let seat = room.seat_of(uuid).expect("discarder is not seated");
        room.current_seat = seat;
        room.current_discard = Some(discarded);
        room.claimed.clear();
        room.claim_generation += 1;

        let player = room.player_mut(uuid).expect("seat without player");
        player.state = PlayerState::NoAction;
        player.can_declare_win = false;
        player.can_declare_kong = false;
        let hand = player.hand.clone();

        plan.push(Outbound::player(uuid, ServerEvent::UpdateTiles(hand)));
        plan.push(Outbound::player(
            uuid,
            ServerEvent::UpdateCurrentState(PlayerState::NoAction),
        ));
        plan.push(Outbound::room(
            &room.id,
            ServerEvent::UpdateDiscardedTile(discarded),
        ));

        for other in room.seats.clone() {
            if &other == uuid {
                continue;
            }

            let player = room.player_mut(&other).expect("seat without player");
            player.state = PlayerState::DeclareClaim;
            player.reset_claim_state();
            plan.push(Outbound::player(
                &other,
                ServerEvent::UpdateCurrentState(PlayerState::DeclareClaim),
            ));
        }

        Self::push_opponent_updates(room, plan);
    }

    /// Close the claim window: rank every submitted claim, pick the winner,
    /// and either reveal a meld, end the game on a win, or advance the turn.
    fn arbitrate_claims(room: &mut Room, plan: &mut EventPlan) {
        let discarded = match room.current_discard {
            Some(tile) => tile,
            None => {
                warn!(room_id = %room.id, "claim window closed without a discard");
                return;
            }
        };

        struct Candidate {
            uuid: PlayerUuid,
            rel_pos: usize,
            meld: MeldType,
            rank: u8,
        }

        // Claims rank in the order they arrived, which is the tie-break for
        // equal non-winning claims.
        let mut candidates = Vec::new();
        for uuid in &room.claimed {
            let player = match room.players.get(uuid) {
                Some(player) => player,
                None => continue,
            };
            let meld = match player.declared_meld_type {
                Some(meld) => meld,
                None => continue,
            };

            let seat = match room.seat_of(uuid) {
                Some(seat) => seat,
                None => continue,
            };
            let rel_pos = room.rel_pos(seat);
            let rank = rules::rank_claim(
                &player.hand,
                discarded,
                meld,
                player.sets_completed(),
                rel_pos == 1,
            );

            if rank > 0 {
                candidates.push(Candidate {
                    uuid: uuid.clone(),
                    rel_pos,
                    meld,
                    rank,
                });
            }
        }

        let top_rank = candidates.iter().map(|candidate| candidate.rank).max();
        let winner = match top_rank {
            // Simultaneous winning claims go to the seat closest after the
            // discarder; lesser claims go to whoever registered first.
            Some(rank) if rank == RANK_WIN => candidates
                .iter()
                .filter(|candidate| candidate.rank == RANK_WIN)
                .min_by_key(|candidate| candidate.rel_pos),
            Some(rank) => candidates.iter().find(|candidate| candidate.rank == rank),
            None => None,
        };

        let (winner_uuid, meld) = match winner {
            Some(candidate) => (candidate.uuid.clone(), candidate.meld),
            None => {
                // Nobody claimed: the discard is final, play moves on.
                room.past_discards.push(discarded);
                room.current_discard = None;
                Self::close_claim_window(room, None, plan);
                Self::advance_turn(room, plan);
                return;
            }
        };

        info!(room_id = %room.id, uuid = %winner_uuid, ?meld, "claim awarded");
        room.current_discard = None;
        Self::close_claim_window(room, Some(&winner_uuid), plan);

        if meld == MeldType::Win {
            let player = room.player_mut(&winner_uuid).expect("seat without player");
            player.hand.push(discarded);
            Self::emit_winning_state(room, &winner_uuid, plan);
            return;
        }

        // The claimant takes the turn and must complete the meld.
        room.current_seat = room.seat_of(&winner_uuid).expect("claimant is not seated");

        let player = room.player_mut(&winner_uuid).expect("seat without player");
        player.state = PlayerState::RevealMeld;
        player.new_meld = vec![discarded];
        player.valid_meld_subsets = rules::valid_subsets_for_meld(&player.hand, discarded, meld);
        player.declared_meld_type = Some(meld);

        let username = player.username.clone();
        plan.push(Outbound::player(
            &winner_uuid,
            ServerEvent::ValidTileSetsForMeld {
                valid_meld_subsets: player.valid_meld_subsets.clone(),
                new_meld: player.new_meld.clone(),
                new_meld_target_length: meld.meld_len(),
            },
        ));
        plan.push(Outbound::player(
            &winner_uuid,
            ServerEvent::UpdateCurrentState(PlayerState::RevealMeld),
        ));

        let entry = ChatEntry::server(format!("{} claimed the discarded tile", username));
        room.messages.push(entry.clone());
        plan.push(Outbound::room(&room.id, ServerEvent::TextMessage(entry)));
        Self::push_opponent_updates(room, plan);
    }

    /// Return every seat still in the claim window to `NoAction`, clearing
    /// claim bookkeeping. `winner` (if any) is left untouched for the
    /// follow-up transition.
    fn close_claim_window(room: &mut Room, winner: Option<&PlayerUuid>, plan: &mut EventPlan) {
        for uuid in room.seats.clone() {
            if Some(&uuid) == winner {
                continue;
            }

            let player = room.player_mut(&uuid).expect("seat without player");
            if player.state == PlayerState::DeclareClaim {
                player.state = PlayerState::NoAction;
                player.reset_claim_state();
                plan.push(Outbound::player(
                    &uuid,
                    ServerEvent::UpdateCurrentState(PlayerState::NoAction),
                ));
            } else {
                player.reset_claim_state();
            }
        }
        room.claimed.clear();
    }

    /// Move the turn to the next seat, or end the game in a draw when the
    /// wall is exhausted.
    fn advance_turn(room: &mut Room, plan: &mut EventPlan) {
        if room.wall.is_empty() {
            Self::end_in_draw(room, plan);
            return;
        }

        room.current_seat = (room.current_seat + 1) % room.seats.len();
        let uuid = room.current_uuid().expect("no seat at current index").clone();

        let player = room.player_mut(&uuid).expect("seat without player");
        player.state = PlayerState::DrawTile;

        plan.push(Outbound::player(
            &uuid,
            ServerEvent::UpdateCurrentState(PlayerState::DrawTile),
        ));
        Self::push_opponent_updates(room, plan);
    }

    /// Complete a claimed meld from `subset` (already validated against the
    /// offered subsets). A four-tile meld sends the player back to the wall
    /// for a replacement draw.
    fn do_complete_meld(room: &mut Room, uuid: &PlayerUuid, subset: &[Tile], plan: &mut EventPlan) {
        let player = room.player_mut(uuid).expect("seat without player");

        for &tile in subset {
            if !player.remove_tile(tile) {
                // Subsets are computed from the hand when the claim is
                // awarded and the hand cannot change in between.
                warn!(%uuid, "offered meld subset no longer in hand");
                return;
            }
        }

        let mut meld = player.new_meld.clone();
        meld.extend(subset.iter().copied());
        meld.sort();
        let is_kong = meld.len() == 4;
        player.revealed_melds.push(meld);

        player.new_meld.clear();
        player.valid_meld_subsets.clear();
        player.declared_meld_type = None;

        player.state = if is_kong {
            // A kong spends an extra tile, so the player draws a
            // replacement before discarding.
            PlayerState::DrawTile
        } else {
            PlayerState::DiscardTile
        };

        if player.state == PlayerState::DiscardTile {
            player.refresh_flags();
        } else {
            player.can_declare_win = false;
            player.can_declare_kong = false;
        }

        plan.push(Outbound::player(
            uuid,
            ServerEvent::UpdateTiles(player.hand.clone()),
        ));
        plan.push(Outbound::player(
            uuid,
            ServerEvent::UpdateCurrentState(player.state),
        ));
        plan.push(Outbound::player(
            uuid,
            ServerEvent::UpdateCanDeclareWin(player.can_declare_win),
        ));
        plan.push(Outbound::player(
            uuid,
            ServerEvent::UpdateCanDeclareKong(player.can_declare_kong),
        ));
        Self::push_opponent_updates(room, plan);
    }

    /// Broadcast the end-of-game state for a win: the winner's concealed
    /// hand is decomposed into melds for display, everyone else loses.
    fn emit_winning_state(room: &mut Room, winner: &PlayerUuid, plan: &mut EventPlan) {
        room.in_progress = false;

        let player = room.player_mut(winner).expect("seat without player");
        match rules::decompose_winning_hand(&player.hand, player.target_sets()) {
            Some(melds) => {
                player.revealed_melds.extend(melds);
                player.hand.clear();
            }
            // The hand was verified before we got here; log and fall through
            // so the game still ends.
            None => warn!(%winner, "winning hand failed to decompose"),
        }

        player.state = PlayerState::Win;
        player.reset_claim_state();
        player.can_declare_win = false;
        player.can_declare_kong = false;
        let winner_name = player.username.clone();
        let revealed = player.revealed_melds.clone();

        plan.push(Outbound::player(
            winner,
            ServerEvent::UpdatePlayer(PlayerPatch {
                state: Some(PlayerState::Win),
                revealed_melds: Some(revealed),
                ..Default::default()
            }),
        ));
        plan.push(Outbound::player(winner, ServerEvent::UpdateTiles(Vec::new())));
        plan.push(Outbound::player(
            winner,
            ServerEvent::UpdateCurrentState(PlayerState::Win),
        ));

        for uuid in room.seats.clone() {
            if &uuid == winner {
                continue;
            }

            let player = room.player_mut(&uuid).expect("seat without player");
            player.state = PlayerState::Loss;
            player.reset_claim_state();
            plan.push(Outbound::player(
                &uuid,
                ServerEvent::UpdateCurrentState(PlayerState::Loss),
            ));
        }
        room.claimed.clear();

        let entry = ChatEntry::server(format!("{} won the game", winner_name));
        room.messages.push(entry.clone());
        plan.push(Outbound::room(&room.id, ServerEvent::TextMessage(entry)));
        Self::push_opponent_updates(room, plan);
        plan.push(Outbound::room(&room.id, ServerEvent::EndGame));
    }

    /// End the game in a draw: the wall is out of tiles and nobody has won.
    fn end_in_draw(room: &mut Room, plan: &mut EventPlan) {
        info!(room_id = %room.id, "wall exhausted, game ends in a draw");
        room.in_progress = false;

        for uuid in room.seats.clone() {
            let player = room.player_mut(&uuid).expect("seat without player");
            player.state = PlayerState::Draw;
            player.reset_claim_state();
            plan.push(Outbound::player(
                &uuid,
                ServerEvent::UpdateCurrentState(PlayerState::Draw),
            ));
        }
        room.claimed.clear();

        let entry = ChatEntry::server("The wall is empty, the game is a draw");
        room.messages.push(entry.clone());
        plan.push(Outbound::room(&room.id, ServerEvent::TextMessage(entry)));
        plan.push(Outbound::room(&room.id, ServerEvent::EndGame));
    }

    /// Keep acting for AI seats until a human owes the next move (or the
    /// game ends). Runs inside the same room mutation as the operation that
    /// triggered it, so AI turns are atomic with the human action.
    fn drive_ai(room: &mut Room, plan: &mut EventPlan) {
        loop {
            if !room.in_progress {
                return;
            }

            if room.claim_window_open() {
                let pending: Vec<PlayerUuid> = room
                    .seats
                    .iter()
                    .filter(|uuid| {
                        let player = &room.players[*uuid];
                        player.is_ai
                            && player.state == PlayerState::DeclareClaim
                            && !room.claimed.contains(*uuid)
                    })
                    .cloned()
                    .collect();

                if pending.is_empty() {
                    // Waiting on human claim responses.
                    return;
                }

                // AI seats always pass on claims.
                for uuid in pending {
                    room.player_mut(&uuid)
                        .expect("seat without player")
                        .declared_meld_type = None;
                    room.claimed.push(uuid);
                }

                if room.claimed.len() + 1 >= room.seats.len() {
                    Self::arbitrate_claims(room, plan);
                    continue;
                }
                return;
            }

            let actor = room
                .seats
                .iter()
                .find(|uuid| {
                    let player = &room.players[*uuid];
                    player.is_ai && player.state.is_active()
                })
                .cloned();

            let uuid = match actor {
                Some(uuid) => uuid,
                None => return,
            };

            let player = &room.players[&uuid];
            match player.state {
                PlayerState::DrawTile => Self::do_draw(room, &uuid, plan),

                PlayerState::DiscardTile => {
                    if player.can_declare_win {
                        Self::emit_winning_state(room, &uuid, plan);
                        return;
                    }

                    let discarded = player.hand[0];
                    room.player_mut(&uuid)
                        .expect("seat without player")
                        .remove_tile(discarded);
                    Self::do_discard(room, &uuid, discarded, plan);
                }

                // AI seats never claim, so this is only reachable if a human
                // hands off mid-meld; finish with the first offered subset.
                PlayerState::RevealMeld => {
                    let subset = player.valid_meld_subsets.first().cloned();
                    match subset {
                        Some(subset) => Self::do_complete_meld(room, &uuid, &subset, plan),
                        None => return,
                    }
                }

                _ => return,
            }
        }
    }

    fn push_opponent_updates(room: &Room, plan: &mut EventPlan) {
        for uuid in &room.seats {
            let views: Vec<OpponentView> = room
                .opponents_of(uuid)
                .into_iter()
                .map(OpponentView::of)
                .collect();
            plan.push(Outbound::player(uuid, ServerEvent::UpdateOpponents(views)));
        }
    }
}

fn multiset_eq(left: &[Tile], right: &[Tile]) -> bool {
    let mut left = left.to_vec();
    let mut right = right.to_vec();
    left.sort();
    right.sort();
    left == right
}
