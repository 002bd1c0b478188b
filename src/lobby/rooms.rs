//! Room directory
//!
//! A room is created when a match starts and records which actors have
//! attached a participant stream. Pairing and loadouts live elsewhere.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::ActorId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    /// Actors allowed in the room
    pub actors: Vec<ActorId>,
    /// Actors that have connected at least once
    pub joined: BTreeSet<ActorId>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(id: Uuid, actors: Vec<ActorId>) -> Self {
        Self {
            id,
            actors,
            joined: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room not found")]
    NotFound,

    #[error("{0} is not a member of this room")]
    NotMember(ActorId),
}

pub trait RoomDirectory: Send + Sync {
    /// Insert or replace the room with `room.id`
    fn create(&self, room: Room);

    fn get(&self, id: Uuid) -> Option<Room>;

    /// All rooms, newest first
    fn list(&self) -> Vec<Room>;

    fn join(&self, id: Uuid, actor_id: &str) -> Result<Room, RoomError>;
}

#[derive(Default)]
pub struct InMemoryRoomDirectory {
    rooms: RwLock<HashMap<Uuid, Room>>,
}

impl InMemoryRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomDirectory for InMemoryRoomDirectory {
    fn create(&self, room: Room) {
        self.rooms.write().insert(room.id, room);
    }

    fn get(&self, id: Uuid) -> Option<Room> {
        self.rooms.read().get(&id).cloned()
    }

    fn list(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.read().values().cloned().collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rooms
    }

    fn join(&self, id: Uuid, actor_id: &str) -> Result<Room, RoomError> {
        let mut rooms = self.rooms.write();
        let room = rooms.get_mut(&id).ok_or(RoomError::NotFound)?;
        if !room.actors.iter().any(|a| a == actor_id) {
            return Err(RoomError::NotMember(actor_id.to_string()));
        }
        room.joined.insert(actor_id.to_string());
        Ok(room.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_join_list() {
        let rooms = InMemoryRoomDirectory::new();
        let id = Uuid::new_v4();
        rooms.create(Room::new(id, vec!["a".into(), "b".into()]));

        let room = rooms.join(id, "a").unwrap();
        assert!(room.joined.contains("a"));
        assert_eq!(rooms.join(id, "z"), Err(RoomError::NotMember("z".into())));
        assert_eq!(rooms.join(Uuid::new_v4(), "a"), Err(RoomError::NotFound));

        assert_eq!(rooms.list().len(), 1);
        assert_eq!(rooms.get(id).unwrap().joined.len(), 1);
    }

    #[test]
    fn test_restart_replaces_room() {
        let rooms = InMemoryRoomDirectory::new();
        let id = Uuid::new_v4();
        rooms.create(Room::new(id, vec!["a".into(), "b".into()]));
        rooms.join(id, "a").unwrap();
        rooms.create(Room::new(id, vec!["c".into(), "d".into()]));

        let room = rooms.get(id).unwrap();
        assert!(room.joined.is_empty());
        assert_eq!(room.actors, vec!["c".to_string(), "d".to_string()]);
    }
}
