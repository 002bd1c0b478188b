//! Scripted baseline strategies
//!
//! Bots only decide every `DECISION_WINDOW_TICKS` ticks and abstain in
//! between. All randomness comes from the match rng so a fixed seed and
//! strategy assignment reproduces the same decisions.

use serde::{Deserialize, Serialize};

use super::combat::{energy_cost, in_strike_range, ActionKind, RANGED_MAX, RANGED_MIN};
use super::geometry::Direction;
use super::physics::{PhysicsSystem, MOVE_DISTANCE, OBJECTIVE_CENTER};
use super::rng::DeterministicRng;
use super::state::{ActorState, AgentAction, GameState};

/// Ticks between decisions
pub const DECISION_WINDOW_TICKS: u64 = 3;

/// Preferred ranged band before jitter
const PREFERRED_RANGE_MIN: i64 = 80;
const PREFERRED_RANGE_MAX: i64 = 140;
const RANGE_JITTER: i32 = 15;

/// Close the gap with a dash beyond this distance
const DASH_ENGAGE_DISTANCE: i64 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStrategy {
    /// Closes distance and trades blows
    Melee,
    /// Holds a preferred band and kites
    Ranged,
    /// Contests the objective, strikes when something is legal
    Balanced,
}

impl BotStrategy {
    /// Guard roll probability in percent when the opponent threatens
    fn guard_chance(self) -> u32 {
        match self {
            BotStrategy::Melee => 15,
            BotStrategy::Ranged => 35,
            BotStrategy::Balanced => 25,
        }
    }
}

/// Pick an action for `actor_id` on the upcoming tick, or `None` to abstain
pub fn decide(strategy: BotStrategy, state: &mut GameState, actor_id: &str) -> Option<AgentAction> {
    let upcoming = state.tick + 1;
    if state.ended || upcoming % DECISION_WINDOW_TICKS != 0 {
        return None;
    }

    let me = state.actors.get(actor_id)?.clone();
    let opponent = state.opponent_of(actor_id)?.clone();
    let rng = &mut state.rng;

    let (kind, direction) = match strategy {
        BotStrategy::Melee => melee_plan(&me, &opponent, rng),
        BotStrategy::Ranged => ranged_plan(&me, &opponent, rng),
        BotStrategy::Balanced => balanced_plan(&me, &opponent, rng),
    };

    if kind == ActionKind::Noop {
        return None;
    }
    Some(AgentAction {
        actor_id: actor_id.to_string(),
        tick: upcoming,
        kind,
        direction,
        target: kind.is_strike().then(|| opponent.id.clone()),
    })
}

type Plan = (ActionKind, Option<Direction>);

fn ready(actor: &ActorState, kind: ActionKind) -> bool {
    actor.cooldown(kind) == 0 && actor.energy >= energy_cost(actor, kind)
}

fn can_strike(me: &ActorState, opponent: &ActorState, kind: ActionKind) -> bool {
    ready(me, kind) && in_strike_range(kind, me.position.distance_sq(opponent.position))
}

fn toward(me: &ActorState, other: &ActorState) -> Option<Direction> {
    Direction::from_vector(other.position.sub(me.position))
}

fn toward_objective(me: &ActorState) -> Option<Direction> {
    Direction::from_vector(OBJECTIVE_CENTER.sub(me.position))
}

/// Guard facing the opponent if the roll succeeds and guard is usable
fn maybe_guard(me: &ActorState, opponent: &ActorState, chance: u32, rng: &mut DeterministicRng) -> Option<Plan> {
    let threatened = opponent.position.distance_sq(me.position) <= RANGED_MAX * RANGED_MAX;
    if threatened && ready(me, ActionKind::Guard) && rng.chance(chance) {
        return Some((ActionKind::Guard, toward(me, opponent)));
    }
    None
}

fn melee_plan(me: &ActorState, opponent: &ActorState, rng: &mut DeterministicRng) -> Plan {
    if can_strike(me, opponent, ActionKind::Melee) {
        return (ActionKind::Melee, None);
    }
    if let Some(plan) = maybe_guard(me, opponent, BotStrategy::Melee.guard_chance(), rng) {
        return plan;
    }
    let distance_sq = me.position.distance_sq(opponent.position);
    let dash_budget = energy_cost(me, ActionKind::Dash) + energy_cost(me, ActionKind::Melee);
    if distance_sq > DASH_ENGAGE_DISTANCE * DASH_ENGAGE_DISTANCE
        && ready(me, ActionKind::Dash)
        && me.energy >= dash_budget
    {
        return (ActionKind::Dash, toward(me, opponent));
    }
    match toward(me, opponent) {
        Some(dir) => (ActionKind::Move, Some(dir)),
        None => (ActionKind::Noop, None),
    }
}

fn ranged_plan(me: &ActorState, opponent: &ActorState, rng: &mut DeterministicRng) -> Plan {
    let jitter = rng.range_inclusive(-RANGE_JITTER, RANGE_JITTER) as i64;
    let band_min = (PREFERRED_RANGE_MIN + jitter).max(RANGED_MIN);
    let band_max = (PREFERRED_RANGE_MAX + jitter).min(RANGED_MAX);
    let distance_sq = me.position.distance_sq(opponent.position);

    if distance_sq < band_min * band_min {
        // Too close: back off, dashing out of melee reach if possible.
        // Stacked on the opponent there is no bearing, so retreat behind.
        let away = Some(toward(me, opponent).unwrap_or(me.facing).opposite());
        if distance_sq < RANGED_MIN * RANGED_MIN && ready(me, ActionKind::Dash) {
            return (ActionKind::Dash, away);
        }
        if let Some(plan) = maybe_guard(me, opponent, BotStrategy::Ranged.guard_chance(), rng) {
            return plan;
        }
        if can_strike(me, opponent, ActionKind::Ranged) {
            return (ActionKind::Ranged, None);
        }
        return (ActionKind::Move, away);
    }

    if can_strike(me, opponent, ActionKind::Ranged) {
        return (ActionKind::Ranged, None);
    }

    if distance_sq > band_max * band_max {
        return (ActionKind::Move, toward(me, opponent));
    }

    if !PhysicsSystem::is_in_objective(me.position) {
        if let Some(dir) = toward_objective(me) {
            return (ActionKind::Move, Some(dir));
        }
    }
    if ready(me, ActionKind::Utility) && me.energy < 50 {
        return (ActionKind::Utility, None);
    }
    (ActionKind::Noop, None)
}

fn balanced_plan(me: &ActorState, opponent: &ActorState, rng: &mut DeterministicRng) -> Plan {
    if can_strike(me, opponent, ActionKind::Melee) {
        return (ActionKind::Melee, None);
    }
    if can_strike(me, opponent, ActionKind::Ranged) {
        return (ActionKind::Ranged, None);
    }
    if let Some(plan) = maybe_guard(me, opponent, BotStrategy::Balanced.guard_chance(), rng) {
        return plan;
    }
    if !PhysicsSystem::is_in_objective(me.position) {
        if let Some(dir) = toward_objective(me) {
            return (ActionKind::Move, Some(dir));
        }
    }
    // Holding the zone: step toward the opponent to bring it into range
    match toward(me, opponent) {
        Some(dir) if PhysicsSystem::is_in_objective(PhysicsSystem::step(me.position, dir, MOVE_DISTANCE)) => {
            (ActionKind::Move, Some(dir))
        }
        _ => (ActionKind::Noop, None),
    }
}
