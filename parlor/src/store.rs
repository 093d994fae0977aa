//! In-memory index of rooms, seated players, and open lobby rooms.

use crate::{
    player::{Player, PlayerUuid},
    room::{Room, RoomId},
};
use rand::{distributions::Alphanumeric, Rng};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

/// Room ids are eight characters from `[A-Za-z0-9]`.
pub const ROOM_ID_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the room already has a full table")]
pub struct RoomFull;

/// Top-level mapping of room ids to rooms and player uuids to rooms.
///
/// Everything here lives in process memory; when a room empties it is
/// deleted, and nothing survives a restart.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: HashMap<RoomId, Room>,

    /// Which room a seated player belongs to. Entries persist across
    /// disconnects so a returning uuid can be routed back to its game.
    room_by_uuid: HashMap<PlayerUuid, RoomId>,

    /// Rooms still accepting players through lobby matchmaking.
    open_rooms: Vec<RoomId>,
}

impl RoomStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Looks up a room, creating it with zero-value defaults if needed.
    pub fn get_or_create_room(&mut self, id: &RoomId) -> &mut Room {
        self.rooms
            .entry(id.clone())
            .or_insert_with(|| Room::new(id.clone()))
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn room_mut(&mut self, id: &RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(id)
    }

    pub fn room_id_of(&self, uuid: &PlayerUuid) -> Option<&RoomId> {
        self.room_by_uuid.get(uuid)
    }

    pub fn room_of(&self, uuid: &PlayerUuid) -> Option<&Room> {
        self.rooms.get(self.room_by_uuid.get(uuid)?)
    }

    pub fn room_of_mut(&mut self, uuid: &PlayerUuid) -> Option<&mut Room> {
        let id = self.room_by_uuid.get(uuid)?;
        self.rooms.get_mut(id)
    }

    /// Generates a fresh room id, retrying on the (unlikely) collision with
    /// an existing room.
    pub fn generate_room_id<R: Rng + ?Sized>(&self, rng: &mut R) -> RoomId {
        loop {
            let id: String = rng
                .sample_iter(&Alphanumeric)
                .take(ROOM_ID_LEN)
                .map(char::from)
                .collect();
            let id = RoomId::new(id);

            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    /// Finds the room a player should land in.
    ///
    /// A player already seated somewhere is routed back to that room. Failing
    /// that, the first open room with space wins; a room handing out its
    /// next-to-last seat is dropped from the open set. With no open room a
    /// fresh id is generated and marked open.
    pub fn search_for_room<R: Rng + ?Sized>(
        &mut self,
        uuid: &PlayerUuid,
        max_seats: usize,
        rng: &mut R,
    ) -> RoomId {
        if let Some(id) = self.room_by_uuid.get(uuid) {
            info!(%uuid, room_id = %id, "player is already seated in a room");
            return id.clone();
        }

        for index in 0..self.open_rooms.len() {
            let id = self.open_rooms[index].clone();
            let size = self.rooms.get(&id).map(|room| room.seats.len()).unwrap_or(0);

            if size < max_seats {
                if size + 1 >= max_seats {
                    self.open_rooms.remove(index);
                }
                info!(%uuid, room_id = %id, "found an open room");
                return id;
            }
        }

        let id = self.generate_room_id(rng);
        info!(%uuid, room_id = %id, "no open rooms, created a new one");
        self.open_rooms.push(id.clone());
        id
    }

    /// Seats a player in a room. Re-adding an already seated uuid is a no-op;
    /// the first human seat becomes the host.
    pub fn add_player(
        &mut self,
        room_id: &RoomId,
        username: &str,
        uuid: &PlayerUuid,
        is_ai: bool,
        max_seats: usize,
    ) -> Result<(), RoomFull> {
        if self.room_by_uuid.contains_key(uuid) {
            info!(%uuid, "player is already seated, not re-adding");
            return Ok(());
        }

        let room = self.get_or_create_room(room_id);
        if room.seats.len() >= max_seats {
            return Err(RoomFull);
        }

        let mut player = Player::new(uuid.clone(), username.to_owned(), is_ai);
        player.is_host = !is_ai && room.players.values().all(|seated| seated.is_ai);

        room.seats.push(uuid.clone());
        room.players.insert(uuid.clone(), player);
        if !is_ai {
            room.human_count += 1;
        }

        let full = room.seats.len() >= max_seats;
        self.room_by_uuid.insert(uuid.clone(), room_id.clone());
        if full {
            self.open_rooms.retain(|open| open != room_id);
        }

        Ok(())
    }

    /// Unseats a player, returning the room they left. The caller decides
    /// whether to delete an emptied room.
    pub fn remove_player(&mut self, uuid: &PlayerUuid) -> Option<RoomId> {
        let room_id = self.room_by_uuid.remove(uuid)?;

        if let Some(room) = self.rooms.get_mut(&room_id) {
            if let Some(player) = room.players.remove(uuid) {
                if !player.is_ai {
                    room.human_count = room.human_count.saturating_sub(1);
                }
            }
            room.seats.retain(|seated| seated != uuid);
        }

        Some(room_id)
    }

    /// Deletes the room if nobody is seated any more.
    pub fn delete_room_if_empty(&mut self, id: &RoomId) {
        let empty = self
            .rooms
            .get(id)
            .map(|room| room.seats.is_empty())
            .unwrap_or(false);

        if empty {
            info!(room_id = %id, "room is empty, deleting it");
            self.rooms.remove(id);
            self.open_rooms.retain(|open| open != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    fn uuid(name: &str) -> PlayerUuid {
        PlayerUuid::from(name)
    }

    #[test]
    fn generated_ids_are_eight_alphanumerics() {
        let store = RoomStore::new();
        let mut rng = Pcg64Mcg::seed_from_u64(1);

        let id = store.generate_room_id(&mut rng);
        assert_eq!(ROOM_ID_LEN, id.as_str().len());
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn search_reuses_the_existing_room() {
        let mut store = RoomStore::new();
        let mut rng = Pcg64Mcg::seed_from_u64(2);

        let first = store.search_for_room(&uuid("p1"), 4, &mut rng);
        store.add_player(&first, "one", &uuid("p1"), false, 4).unwrap();

        assert_eq!(first, store.search_for_room(&uuid("p1"), 4, &mut rng));
    }

    #[test]
    fn open_room_is_dropped_when_handing_out_the_last_seat() {
        let mut store = RoomStore::new();
        let mut rng = Pcg64Mcg::seed_from_u64(3);

        let id = store.search_for_room(&uuid("p1"), 4, &mut rng);
        for (index, name) in ["p1", "p2", "p3"].iter().enumerate() {
            store
                .add_player(&id, &format!("player {}", index), &uuid(name), false, 4)
                .unwrap();
        }

        // Three seats taken: the fourth searcher takes the last seat and the
        // room leaves the open set, so a fifth searcher gets a fresh room.
        assert_eq!(id, store.search_for_room(&uuid("p4"), 4, &mut rng));
        store.add_player(&id, "player 4", &uuid("p4"), false, 4).unwrap();

        assert_ne!(id, store.search_for_room(&uuid("p5"), 4, &mut rng));
    }

    #[test]
    fn add_player_is_idempotent_and_assigns_host() {
        let mut store = RoomStore::new();
        let id = RoomId::from("AAAA1111");

        store.add_player(&id, "bot", &uuid("bot1"), true, 4).unwrap();
        store.add_player(&id, "human", &uuid("h1"), false, 4).unwrap();
        store.add_player(&id, "human again", &uuid("h1"), false, 4).unwrap();

        let room = store.room(&id).unwrap();
        assert_eq!(2, room.seats.len());
        assert_eq!(1, room.human_count);

        // AI seats never host; the first human does, even when seated later.
        assert!(!room.player(&uuid("bot1")).unwrap().is_host);
        assert!(room.player(&uuid("h1")).unwrap().is_host);
    }

    #[test]
    fn full_room_rejects_additional_players() {
        let mut store = RoomStore::new();
        let id = RoomId::from("BBBB2222");

        for seat in 0..4 {
            store
                .add_player(&id, "p", &uuid(&format!("p{}", seat)), false, 4)
                .unwrap();
        }

        assert_eq!(Err(RoomFull), store.add_player(&id, "late", &uuid("p9"), false, 4));
    }

    #[test]
    fn removing_the_last_player_allows_room_deletion() {
        let mut store = RoomStore::new();
        let id = RoomId::from("CCCC3333");

        store.add_player(&id, "solo", &uuid("p1"), false, 4).unwrap();
        assert_eq!(Some(id.clone()), store.remove_player(&uuid("p1")));

        store.delete_room_if_empty(&id);
        assert!(store.room(&id).is_none());
    }
}
