//! Movement and objective zone rules

use super::geometry::{Direction, Vec2, ARENA_SIZE};

/// Distance covered by a plain move (tenths)
pub const MOVE_DISTANCE: i32 = 10;
/// Distance covered by a dash (tenths)
pub const DASH_DISTANCE: i32 = 40;

/// Objective zone at the arena centre
pub const OBJECTIVE_CENTER: Vec2 = Vec2::new(ARENA_SIZE / 2, ARENA_SIZE / 2);
pub const OBJECTIVE_RADIUS: i64 = 60;
/// Score that ends the match immediately
pub const OBJECTIVE_WIN_SCORE: u32 = 300;

/// Physics helpers for the duel arena
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// New position after moving `distance` along `dir`, clamped to the arena
    pub fn step(position: Vec2, dir: Direction, distance: i32) -> Vec2 {
        position.add(Vec2::step(dir, distance)).clamp_to_arena()
    }

    /// Check if a point is inside the objective zone
    pub fn is_in_objective(position: Vec2) -> bool {
        position.distance_sq(OBJECTIVE_CENTER) <= OBJECTIVE_RADIUS * OBJECTIVE_RADIUS
    }
}
