//! Narrow lobby collaborator used by the match start and stream paths

pub mod rooms;

pub use rooms::{InMemoryRoomDirectory, Room, RoomDirectory, RoomError};
