//! Snapshot building for broadcasts and polling

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

use super::GameState;

/// Polling view of a match: state without its transient event list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateView {
    pub match_id: Uuid,
    pub event_count: usize,
    pub state: GameState,
}

/// Builds outbound snapshot messages
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Tick message: the state with history stripped, plus this tick's events
    pub fn tick(state: &GameState) -> ServerMsg {
        ServerMsg::Tick {
            state: state.without_events(),
            events: state.events.clone(),
        }
    }

    pub fn view(match_id: Uuid, state: &GameState) -> StateView {
        StateView {
            match_id,
            event_count: state.events.len(),
            state: state.without_events(),
        }
    }
}
