//! Tick transition for the duel ruleset
//!
//! `advance_tick` is the whole simulation: given the current state and at
//! most one action per actor it produces the next state plus the events of
//! that tick. Illegal actions are recorded on the actor and otherwise
//! ignored, so a tick never fails. Illegal actions are never charged energy
//! or cooldown.

use std::collections::BTreeMap;

use serde_json::json;

use super::combat::{
    energy_cost, in_strike_range, strike_damage, ActionKind, ActionStats,
    DASH_BUFF_DURATION_TICKS, ENERGY_REGEN_PER_TICK, GUARD_DURATION_TICKS, UTILITY_DURATION_TICKS,
};
use super::geometry::Direction;
use super::physics::{PhysicsSystem, DASH_DISTANCE, MOVE_DISTANCE, OBJECTIVE_WIN_SCORE};
use super::state::{ActorId, AgentAction, EndReason, EventKind, GameEvent, GameState, StatusEffect};

/// Final-hp difference at or below which a tick-limit finish is a draw
pub const DRAW_EPSILON: f32 = 0.01;

/// An action that passed the pre-checks and awaits its phase
#[derive(Debug, Clone)]
struct Resolved {
    actor_id: ActorId,
    kind: ActionKind,
    direction: Option<Direction>,
    target_id: Option<ActorId>,
}

/// Advance `state` by one tick. An ended state is returned unchanged.
pub fn advance_tick(state: &GameState, actions: &BTreeMap<ActorId, AgentAction>) -> GameState {
    let mut next = state.clone();
    if next.ended {
        return next;
    }

    next.events.clear();
    next.tick += 1;
    let tick = next.tick;

    // 1-3: cooldowns, regen, status expiry
    for actor in next.actors.values_mut() {
        for remaining in actor.cooldowns.values_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        let regen = if actor.status.utility_active(tick) {
            ENERGY_REGEN_PER_TICK * 2
        } else {
            ENERGY_REGEN_PER_TICK
        };
        actor.energy += regen;
        actor.status.expire(tick);
        actor.clamp_vitals();
    }

    // 4: legality pre-checks, in actor id order
    let mut resolved = Vec::new();
    let actor_ids: Vec<ActorId> = next.actors.keys().cloned().collect();
    for actor_id in &actor_ids {
        let action = actions
            .get(actor_id)
            .cloned()
            .unwrap_or_else(|| AgentAction::noop(actor_id.clone(), tick));
        match check_action(&next, actor_id, &action) {
            Some(r) => resolved.push(r),
            None => mark_illegal(&mut next, actor_id),
        }
    }

    // 5: move and dash
    for r in resolved.iter().filter(|r| r.kind.is_movement()) {
        apply_movement(&mut next, r);
    }

    // 6: guard and utility
    for r in resolved
        .iter()
        .filter(|r| matches!(r.kind, ActionKind::Guard | ActionKind::Utility))
    {
        apply_status_action(&mut next, r);
    }

    // 7: strikes resolve simultaneously against post-movement positions
    let strikes: Vec<&Resolved> = resolved.iter().filter(|r| r.kind.is_strike()).collect();
    resolve_strikes(&mut next, &strikes);

    for actor in next.actors.values_mut() {
        actor.clamp_vitals();
    }

    check_knockout(&mut next);

    // 8: objective
    if !next.ended {
        score_objective(&mut next);
    }

    // 9: tick limit
    if !next.ended && next.tick >= next.max_ticks {
        decide_on_hp(&mut next);
    }

    next
}

/// Validate an action against the current state. `None` means illegal.
fn check_action(state: &GameState, actor_id: &str, action: &AgentAction) -> Option<Resolved> {
    let actor = state.actors.get(actor_id)?;
    let kind = action.kind;

    if kind == ActionKind::Noop {
        return Some(Resolved {
            actor_id: actor_id.to_string(),
            kind,
            direction: None,
            target_id: None,
        });
    }

    if kind.is_movement() && action.direction.is_none() {
        return None;
    }

    if actor.cooldown(kind) > 0 || actor.energy < energy_cost(actor, kind) {
        return None;
    }

    let target_id = if kind.is_strike() {
        let target = match &action.target {
            Some(id) => state.actors.get(id).filter(|t| t.id != actor_id)?,
            None => state.opponent_of(actor_id)?,
        };
        Some(target.id.clone())
    } else {
        None
    };

    Some(Resolved {
        actor_id: actor_id.to_string(),
        kind,
        direction: action.direction,
        target_id,
    })
}

fn mark_illegal(state: &mut GameState, actor_id: &str) {
    if let Some(actor) = state.actors.get_mut(actor_id) {
        actor.illegal_actions += 1;
    }
}

/// Deduct energy and arm the cooldown for an action that is being applied
fn charge(state: &mut GameState, actor_id: &str, kind: ActionKind) {
    if let Some(actor) = state.actors.get_mut(actor_id) {
        let cost = energy_cost(actor, kind);
        actor.energy = actor.energy.saturating_sub(cost);
        let cooldown = ActionStats::for_kind(kind).cooldown;
        if cooldown > 0 {
            actor.cooldowns.insert(kind, cooldown);
        }
    }
}

fn apply_movement(state: &mut GameState, r: &Resolved) {
    let Some(dir) = r.direction else { return };
    let tick = state.tick;
    charge(state, &r.actor_id, r.kind);

    let Some(actor) = state.actors.get_mut(&r.actor_id) else {
        return;
    };
    let distance = if r.kind == ActionKind::Dash {
        DASH_DISTANCE
    } else {
        MOVE_DISTANCE
    };
    actor.position = PhysicsSystem::step(actor.position, dir, distance);
    actor.facing = dir;

    if r.kind == ActionKind::Dash {
        let expires_at = tick + DASH_BUFF_DURATION_TICKS;
        actor.status.dash_buff = Some(StatusEffect { expires_at });
        state.events.push(GameEvent {
            tick,
            kind: EventKind::StatusApplied,
            actor_id: Some(r.actor_id.clone()),
            target_id: None,
            data: json!({ "status": "dash_buff", "expires_at": expires_at }),
        });
    }
}

fn apply_status_action(state: &mut GameState, r: &Resolved) {
    let tick = state.tick;
    charge(state, &r.actor_id, r.kind);

    let Some(actor) = state.actors.get_mut(&r.actor_id) else {
        return;
    };
    let (name, expires_at) = match r.kind {
        ActionKind::Guard => {
            if let Some(dir) = r.direction {
                actor.facing = dir;
            }
            let expires_at = tick + GUARD_DURATION_TICKS;
            actor.status.guard = Some(StatusEffect { expires_at });
            ("guard", expires_at)
        }
        _ => {
            let expires_at = tick + UTILITY_DURATION_TICKS;
            actor.status.utility = Some(StatusEffect { expires_at });
            ("utility", expires_at)
        }
    };
    let facing = actor.facing;

    state.events.push(GameEvent {
        tick,
        kind: EventKind::StatusApplied,
        actor_id: Some(r.actor_id.clone()),
        target_id: None,
        data: json!({ "status": name, "expires_at": expires_at, "facing": facing }),
    });
}

fn resolve_strikes(state: &mut GameState, strikes: &[&Resolved]) {
    let tick = state.tick;
    // `None` damage marks a strike that was out of range
    let mut hits: Vec<(ActorId, ActorId, ActionKind, Option<f32>)> = Vec::new();

    for r in strikes {
        let Some(target_id) = r.target_id.as_ref() else {
            continue;
        };
        let (Some(attacker), Some(defender)) =
            (state.actors.get(&r.actor_id), state.actors.get(target_id))
        else {
            continue;
        };

        let distance_sq = attacker.position.distance_sq(defender.position);
        if !in_strike_range(r.kind, distance_sq) {
            hits.push((r.actor_id.clone(), target_id.clone(), r.kind, None));
            continue;
        }
        let damage = strike_damage(r.kind, attacker, defender, tick);
        hits.push((r.actor_id.clone(), target_id.clone(), r.kind, Some(damage)));
    }

    for (attacker_id, target_id, kind, damage) in hits {
        let Some(damage) = damage else {
            mark_illegal(state, &attacker_id);
            continue;
        };

        charge(state, &attacker_id, kind);
        let toward = match (state.actors.get(&attacker_id), state.actors.get(&target_id)) {
            (Some(a), Some(t)) => Direction::from_vector(t.position.sub(a.position)),
            _ => None,
        };
        if let Some(attacker) = state.actors.get_mut(&attacker_id) {
            attacker.damage_dealt += damage;
            if let Some(dir) = toward {
                attacker.facing = dir;
            }
        }
        let remaining = match state.actors.get_mut(&target_id) {
            Some(target) => {
                target.hp = (target.hp - damage).max(0.0);
                target.hp
            }
            None => continue,
        };

        state.events.push(GameEvent {
            tick,
            kind: EventKind::Damage,
            actor_id: Some(attacker_id),
            target_id: Some(target_id),
            data: json!({ "action": kind, "amount": damage, "hp": remaining }),
        });
    }
}

fn check_knockout(state: &mut GameState) {
    let downed: Vec<ActorId> = state
        .actors
        .values()
        .filter(|a| a.hp <= 0.0)
        .map(|a| a.id.clone())
        .collect();
    if downed.is_empty() {
        return;
    }

    let survivor = state
        .actors
        .values()
        .find(|a| a.hp > 0.0)
        .map(|a| a.id.clone());
    end_match(state, survivor, EndReason::Knockout);
}

fn score_objective(state: &mut GameState) {
    let tick = state.tick;
    let scorers: Vec<ActorId> = state
        .actors
        .values()
        .filter(|a| PhysicsSystem::is_in_objective(a.position))
        .map(|a| a.id.clone())
        .collect();

    let mut reached = Vec::new();
    for id in scorers {
        let score = state.objective_scores.entry(id.clone()).or_insert(0);
        *score += 1;
        let score = *score;
        state.events.push(GameEvent {
            tick,
            kind: EventKind::ObjectiveScored,
            actor_id: Some(id.clone()),
            target_id: None,
            data: json!({ "score": score }),
        });
        if score >= OBJECTIVE_WIN_SCORE {
            reached.push(id);
        }
    }

    match reached.len() {
        0 => {}
        1 => {
            let winner = reached.pop();
            end_match(state, winner, EndReason::Objective);
        }
        _ => {
            // Both crossed the threshold together: hp decides
            let winner = hp_leader(state);
            end_match(state, winner, EndReason::Objective);
        }
    }
}

fn decide_on_hp(state: &mut GameState) {
    let winner = hp_leader(state);
    end_match(state, winner, EndReason::TickLimit);
}

/// Actor with strictly more hp, or `None` when within `DRAW_EPSILON`
fn hp_leader(state: &GameState) -> Option<ActorId> {
    let mut actors: Vec<_> = state.actors.values().collect();
    actors.sort_by(|a, b| b.hp.total_cmp(&a.hp));
    match actors.as_slice() {
        [first, second, ..] if first.hp - second.hp > DRAW_EPSILON => Some(first.id.clone()),
        [only] => Some(only.id.clone()),
        _ => None,
    }
}

fn end_match(state: &mut GameState, winner: Option<ActorId>, reason: EndReason) {
    state.ended = true;
    state.winner_id = winner.clone();
    state.end_reason = Some(reason);
    state.events.push(GameEvent {
        tick: state.tick,
        kind: EventKind::MatchEnded,
        actor_id: winner,
        target_id: None,
        data: json!({ "reason": reason }),
    });
}
