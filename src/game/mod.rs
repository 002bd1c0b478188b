//! Game simulation modules

pub mod bot;
pub mod broadcast;
pub mod combat;
pub mod engine;
pub mod geometry;
pub mod r#match;
pub mod physics;
pub mod queue;
pub mod rng;
pub mod snapshot;
pub mod state;

pub use r#match::{
    ActionRequest, ActorConfig, GameMatch, MatchError, MatchHandle, MatchRegistry, MatchSettings,
    StartMatch, StartedMatch,
};
pub use snapshot::StateView;
pub use state::{ActorId, AgentAction, EndReason, EventKind, GameEvent, GameState, MatchResult};
