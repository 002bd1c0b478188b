//! WebSocket protocol message definitions
//! These are the wire types for observer streams

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{GameEvent, GameState, MatchResult};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Liveness probe, answered with the current tick
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// First message on every connection
    Connected { match_id: Uuid, tick: u64 },

    /// Pushed after every simulated tick
    Tick {
        /// State without the event list
        state: GameState,
        /// Events of this tick only
        events: Vec<GameEvent>,
    },

    /// Sent exactly once when the match finishes
    MatchComplete { result: MatchResult },

    /// Pong response
    Pong { tick: u64 },
}
