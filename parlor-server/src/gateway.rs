//! Binds inbound client events to engine operations.
//!
//! Every handler follows the same contract: validate the payload (serde has
//! already enforced field presence by the time a `ClientEvent` exists),
//! resolve the connection to a player identity, invoke the engine under the
//! server-state lock, and emit the resulting event plan while still holding
//! it. Failures are logged and dropped; clients recover by re-querying state
//! (`rejoin_game`, `reemit_events`).

use crate::config::ServerConfig;
use crate::connection::{ConnectionId, Connections};
use parlor::engine::{Engine, EngineError};
use parlor::messages::{ClientEvent, EventPlan, Outbound, PlayerPatch, ServerEvent};
use parlor::player::PlayerUuid;
use parlor::room::{ChatEntry, RoomId};
use parlor::store::RoomStore;
use rand::{distributions::Alphanumeric, Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

pub struct ServerState {
    pub engine: Engine,
    pub store: RoomStore,
    pub connections: Connections,

    claim_grace_ms: u64,

    /// Claim-window generation a watchdog timer is already armed for, per
    /// room. Prevents piling up duplicate timers for one window.
    watchdogs: HashMap<RoomId, u64>,
}

impl ServerState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            engine: Engine::with_rng(config.engine_config(), Pcg64Mcg::from_entropy()),
            store: RoomStore::new(),
            connections: Connections::default(),
            claim_grace_ms: config.claim_grace_ms,
            watchdogs: HashMap::new(),
        }
    }
}

pub type SharedState = Arc<Mutex<ServerState>>;

/// Locks the shared state, recovering from a poisoned lock.
///
/// An engine invariant violation that panics mid-operation may wedge the
/// room it was mutating; it must not take the lock (and with it every other
/// room and connection) down as well.
pub fn lock_state(state: &SharedState) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Entry point for every inbound frame. A frame that does not parse into a
/// known event with a complete payload is logged and dropped.
pub fn handle_frame(state: &SharedState, conn_id: ConnectionId, text: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            warn!(%conn_id, %err, "dropping malformed frame");
            return;
        }
    };

    dispatch(state, conn_id, event);
}

fn dispatch(state: &SharedState, conn_id: ConnectionId, event: ClientEvent) {
    let mut guard = lock_state(state);
    let st = &mut *guard;

    match event {
        ClientEvent::Ready { player_uuid } => {
            st.connections.bind_uuid(conn_id, player_uuid.clone());

            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(4)
                .map(char::from)
                .collect();
            let guest_name = format!("guest-{}", suffix);
            st.connections.set_guest_name(conn_id, guest_name.clone());

            if st.store.room_id_of(&player_uuid).is_none() {
                st.connections.enter_lobby(conn_id);
            }

            st.connections.send_to_conn(
                conn_id,
                &ServerEvent::UpdatePlayer(PlayerPatch {
                    username: Some(guest_name),
                    ..Default::default()
                }),
            );
            info!(%conn_id, %player_uuid, "connection ready");
        }

        ClientEvent::RejoinGame { player_uuid } => {
            st.connections.bind_uuid(conn_id, player_uuid.clone());
            let plan = st.engine.rejoin(&st.store, &player_uuid);
            st.connections.emit(&st.store, &plan);
        }

        ClientEvent::ReemitEvents => {
            if let Some(uuid) = st.connections.uuid_of(conn_id).cloned() {
                let plan = st.engine.reemit_events(&st.store, &uuid);
                st.connections.emit(&st.store, &plan);
            }
        }

        ClientEvent::EnterGame {
            username,
            player_uuid,
            room_id,
            should_create_room,
        } => {
            st.connections.bind_uuid(conn_id, player_uuid.clone());
            st.connections.leave_lobby(conn_id);

            match st.engine.enter_game(
                &mut st.store,
                &username,
                &player_uuid,
                room_id,
                should_create_room,
            ) {
                Ok(plan) => st.connections.emit(&st.store, &plan),
                Err(err) => warn!(%conn_id, %player_uuid, %err, "enter_game rejected"),
            }
        }

        ClientEvent::StartGame => run_op(state, st, conn_id, "start_game", |engine, store, uuid| {
            engine.start_game(store, uuid)
        }),

        ClientEvent::DrawTile => run_op(state, st, conn_id, "draw_tile", |engine, store, uuid| {
            engine.draw_tile(store, uuid)
        }),

        ClientEvent::EndTurn { discarded_tile } => {
            run_op(state, st, conn_id, "end_turn", move |engine, store, uuid| {
                engine.end_turn(store, uuid, discarded_tile)
            })
        }

        ClientEvent::DeclareClaimStart {
            declare_claim_start_time,
        } => run_op(
            state,
            st,
            conn_id,
            "declare_claim_start",
            move |engine, store, uuid| {
                engine.declare_claim_start(store, uuid, declare_claim_start_time)
            },
        ),

        ClientEvent::UpdateClaimState { declared_meld } => run_op(
            state,
            st,
            conn_id,
            "update_claim_state",
            move |engine, store, uuid| engine.update_claim_state(store, uuid, declared_meld),
        ),

        ClientEvent::CompleteNewMeld { new_meld } => run_op(
            state,
            st,
            conn_id,
            "complete_new_meld",
            move |engine, store, uuid| engine.complete_new_meld(store, uuid, new_meld),
        ),

        ClientEvent::DeclareConcealedKong => run_op(
            state,
            st,
            conn_id,
            "declare_concealed_kong",
            |engine, store, uuid| engine.declare_concealed_kong(store, uuid),
        ),

        ClientEvent::DeclareWin => run_op(state, st, conn_id, "declare_win", |engine, store, uuid| {
            engine.declare_win(store, uuid)
        }),

        ClientEvent::TextMessage { message } => {
            let uuid = st.connections.uuid_of(conn_id).cloned();
            let seated = uuid
                .as_ref()
                .map(|uuid| st.store.room_id_of(uuid).is_some())
                .unwrap_or(false);

            if seated {
                let uuid = uuid.expect("seated connection without uuid");
                match st.engine.chat(&mut st.store, &uuid, &message) {
                    Ok(plan) => st.connections.emit(&st.store, &plan),
                    Err(err) => warn!(%conn_id, %err, "chat rejected"),
                }
            } else {
                // Not seated anywhere: chat goes to the lobby under the
                // guest name.
                let name = st
                    .connections
                    .guest_name(conn_id)
                    .unwrap_or("guest")
                    .to_owned();
                let entry = ChatEntry::player(format!("{}: {}", name, message));
                let plan = vec![Outbound::lobby(ServerEvent::TextMessage(entry))];
                st.connections.emit(&st.store, &plan);
            }
        }

        ClientEvent::LeaveGame => {
            let uuid = match st.connections.uuid_of(conn_id).cloned() {
                Some(uuid) => uuid,
                None => {
                    warn!(%conn_id, "leave_game from unidentified connection");
                    return;
                }
            };

            match st.engine.leave_game(&mut st.store, &uuid) {
                Ok(plan) => {
                    st.connections.emit(&st.store, &plan);
                    st.connections.enter_lobby(conn_id);
                }
                Err(err) => warn!(%conn_id, %uuid, %err, "leave_game rejected"),
            }
        }
    }
}

/// Shared shape of the in-game handlers: resolve the player behind the
/// connection, run the engine operation, emit its plan, and arm the claim
/// watchdog if the operation left a claim window open.
fn run_op<F>(
    state: &SharedState,
    st: &mut ServerState,
    conn_id: ConnectionId,
    action: &'static str,
    op: F,
) where
    F: FnOnce(&mut Engine, &mut RoomStore, &PlayerUuid) -> Result<EventPlan, EngineError>,
{
    let uuid = match st.connections.uuid_of(conn_id).cloned() {
        Some(uuid) => uuid,
        None => {
            warn!(%conn_id, action, "event from unidentified connection");
            return;
        }
    };

    match op(&mut st.engine, &mut st.store, &uuid) {
        Ok(plan) => {
            st.connections.emit(&st.store, &plan);

            if let Some(room_id) = st.store.room_id_of(&uuid).cloned() {
                arm_watchdog(state, st, room_id);
            }
        }
        Err(err) => warn!(%conn_id, %uuid, action, %err, "dropping client event"),
    }
}

/// Arms a timer that force-closes the current claim window if the clients
/// never all respond. The clients own the countdown; this only backstops
/// windows orphaned by a disconnect.
fn arm_watchdog(state: &SharedState, st: &mut ServerState, room_id: RoomId) {
    let (window_open, generation) = match st.store.room(&room_id) {
        Some(room) => (room.claim_window_open(), room.claim_generation),
        None => return,
    };

    if !window_open || st.watchdogs.get(&room_id) == Some(&generation) {
        return;
    }
    st.watchdogs.insert(room_id.clone(), generation);

    let delay = Duration::from_millis(st.engine.config().claim_timeout_ms + st.claim_grace_ms);
    let state = Arc::clone(state);

    tokio::spawn(async move {
        sleep(delay).await;

        let mut guard = lock_state(&state);
        let st = &mut *guard;
        let plan = st
            .engine
            .expire_claim_window(&mut st.store, &room_id, generation);
        st.connections.emit(&st.store, &plan);

        // Expiry can cascade into AI turns that open the next window.
        arm_watchdog(&state, st, room_id);
    });
}
