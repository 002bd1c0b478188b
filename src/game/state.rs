//! Authoritative game state and its value types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bot::BotStrategy;
use super::combat::{ActionKind, ArmorClass, COOLDOWN_KINDS};
use super::geometry::{Direction, Vec2};
use super::rng::DeterministicRng;

/// Actors are addressed by the opaque id their bearer credential maps to
pub type ActorId = String;

pub const HP_MAX: f32 = 100.0;
pub const ENERGY_MAX: u32 = 100;
pub const RULESET_DUEL_V1: &str = "duel-v1";

/// A timed status effect, active while `tick <= expires_at`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub expires_at: u64,
}

impl StatusEffect {
    pub fn is_active(&self, tick: u64) -> bool {
        tick <= self.expires_at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusEffects {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<StatusEffect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dash_buff: Option<StatusEffect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utility: Option<StatusEffect>,
}

impl StatusEffects {
    /// Drop every effect whose expiry tick has passed
    pub fn expire(&mut self, tick: u64) {
        for slot in [&mut self.guard, &mut self.dash_buff, &mut self.utility] {
            if slot.map_or(false, |s| !s.is_active(tick)) {
                *slot = None;
            }
        }
    }

    pub fn guard_active(&self, tick: u64) -> bool {
        self.guard.map_or(false, |s| s.is_active(tick))
    }

    pub fn dash_buff_active(&self, tick: u64) -> bool {
        self.dash_buff.map_or(false, |s| s.is_active(tick))
    }

    pub fn utility_active(&self, tick: u64) -> bool {
        self.utility.map_or(false, |s| s.is_active(tick))
    }
}

/// Per-actor simulation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    pub id: ActorId,
    pub hp: f32,
    pub energy: u32,
    pub position: Vec2,
    pub facing: Direction,
    pub armor: ArmorClass,
    /// Remaining ticks per action kind, 0 means ready
    pub cooldowns: BTreeMap<ActionKind, u32>,
    pub status: StatusEffects,
    pub damage_dealt: f32,
    pub illegal_actions: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cost_overrides: BTreeMap<ActionKind, u32>,
    /// Scripted strategy driving this actor, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<BotStrategy>,
}

impl ActorState {
    pub fn new(id: ActorId, position: Vec2, facing: Direction, armor: ArmorClass) -> Self {
        Self {
            id,
            hp: HP_MAX,
            energy: ENERGY_MAX,
            position,
            facing,
            armor,
            cooldowns: COOLDOWN_KINDS.iter().map(|k| (*k, 0)).collect(),
            status: StatusEffects::default(),
            damage_dealt: 0.0,
            illegal_actions: 0,
            cost_overrides: BTreeMap::new(),
            bot: None,
        }
    }

    pub fn cooldown(&self, kind: ActionKind) -> u32 {
        self.cooldowns.get(&kind).copied().unwrap_or(0)
    }

    pub fn clamp_vitals(&mut self) {
        self.hp = self.hp.clamp(0.0, HP_MAX);
        self.energy = self.energy.min(ENERGY_MAX);
    }
}

/// An action as submitted by an actor. `actor_id` is stamped by the queue
/// from the authenticated submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub actor_id: ActorId,
    pub tick: u64,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ActorId>,
}

impl AgentAction {
    pub fn noop(actor_id: ActorId, tick: u64) -> Self {
        Self {
            actor_id,
            tick,
            kind: ActionKind::Noop,
            direction: None,
            target: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Damage,
    StatusApplied,
    ObjectiveScored,
    MatchEnded,
}

/// Something that changed during the current tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub tick: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ActorId>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// An actor was reduced to zero hp
    Knockout,
    /// An actor reached the objective score threshold
    Objective,
    /// `max_ticks` reached, decided on hp
    TickLimit,
    /// Wall-clock watchdog fired
    Timeout,
}

/// Canonical per-match state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub seed: u32,
    pub tick: u64,
    pub max_ticks: u64,
    pub ruleset: String,
    pub actors: BTreeMap<ActorId, ActorState>,
    pub objective_scores: BTreeMap<ActorId, u32>,
    /// Events of the current tick only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<GameEvent>,
    pub winner_id: Option<ActorId>,
    pub end_reason: Option<EndReason>,
    pub ended: bool,
    /// Wall-clock milliseconds since the match started
    pub duration_ms: u64,
    pub rng: DeterministicRng,
}

impl GameState {
    pub fn new(seed: u32, max_ticks: u64, ruleset: String, actors: Vec<ActorState>) -> Self {
        let objective_scores = actors.iter().map(|a| (a.id.clone(), 0)).collect();
        Self {
            seed,
            tick: 0,
            max_ticks,
            ruleset,
            actors: actors.into_iter().map(|a| (a.id.clone(), a)).collect(),
            objective_scores,
            events: Vec::new(),
            winner_id: None,
            end_reason: None,
            ended: false,
            duration_ms: 0,
            rng: DeterministicRng::new(seed),
        }
    }

    /// The other participant, for the two-actor ruleset
    pub fn opponent_of(&self, id: &str) -> Option<&ActorState> {
        self.actors.values().find(|a| a.id != id)
    }

    /// Copy without the per-tick event list, for broadcasts and polling
    pub fn without_events(&self) -> Self {
        let mut copy = self.clone();
        copy.events = Vec::new();
        copy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationStats {
    pub ticks_played: u64,
    pub ticks_missed: u64,
    pub actions_queued: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSummary {
    pub id: ActorId,
    pub hp: f32,
    pub damage_dealt: f32,
    pub illegal_actions: u32,
}

/// Final outcome broadcast once per match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub winner_id: Option<ActorId>,
    pub end_reason: EndReason,
    pub final_tick: u64,
    pub actors: Vec<ActorSummary>,
    pub objective_scores: BTreeMap<ActorId, u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub participation: BTreeMap<ActorId, ParticipationStats>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}
