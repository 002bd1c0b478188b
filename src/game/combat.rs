//! Combat rules - action costs, cooldowns, strike ranges and damage

use serde::{Deserialize, Serialize};

use super::geometry::within_facing_arc;
use super::state::ActorState;

/// Energy regenerated per tick, doubled while the utility status is active
pub const ENERGY_REGEN_PER_TICK: u32 = 2;

/// Damage never drops below this after multipliers
pub const MIN_DAMAGE: f32 = 1.0;

/// Incoming damage multiplier when the attacker is inside the guard arc
pub const GUARD_MULTIPLIER: f32 = 0.5;
/// Outgoing damage multiplier while the dash buff is active
pub const DASH_BUFF_MULTIPLIER: f32 = 1.3;

pub const GUARD_DURATION_TICKS: u64 = 4;
pub const DASH_BUFF_DURATION_TICKS: u64 = 3;
pub const UTILITY_DURATION_TICKS: u64 = 10;

/// Melee connects at or below this distance (tenths)
pub const MELEE_RANGE: i64 = 25;
/// Ranged strikes are legal within `[RANGED_MIN, RANGED_MAX]`
pub const RANGED_MIN: i64 = 40;
pub const RANGED_MAX: i64 = 200;
/// Sweet spot band for the full ranged multiplier
const RANGED_SWEET_MIN: i64 = 80;
const RANGED_SWEET_MAX: i64 = 140;
/// Edges of the band that get discounted
const RANGED_NEAR_EDGE: i64 = 60;
const RANGED_FAR_EDGE: i64 = 170;

const RANGED_SWEET_MULTIPLIER: f32 = 1.2;
const RANGED_NEAR_MULTIPLIER: f32 = 0.75;
const RANGED_FAR_MULTIPLIER: f32 = 0.9;
const RANGED_BASELINE_MULTIPLIER: f32 = 1.0;

/// Action kinds an actor can submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Noop,
    Move,
    Dash,
    Guard,
    Melee,
    Ranged,
    Utility,
}

/// Kinds that carry their own cooldown counter
pub const COOLDOWN_KINDS: [ActionKind; 5] = [
    ActionKind::Dash,
    ActionKind::Guard,
    ActionKind::Melee,
    ActionKind::Ranged,
    ActionKind::Utility,
];

impl ActionKind {
    pub fn is_strike(self) -> bool {
        matches!(self, ActionKind::Melee | ActionKind::Ranged)
    }

    pub fn is_movement(self) -> bool {
        matches!(self, ActionKind::Move | ActionKind::Dash)
    }
}

/// Per-kind tuning
#[derive(Debug, Clone, Copy)]
pub struct ActionStats {
    pub energy_cost: u32,
    /// Ticks before the same kind can be used again
    pub cooldown: u32,
    pub base_damage: f32,
}

impl ActionStats {
    pub fn for_kind(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Noop | ActionKind::Move => Self {
                energy_cost: 0,
                cooldown: 0,
                base_damage: 0.0,
            },
            ActionKind::Dash => Self {
                energy_cost: 20,
                cooldown: 12,
                base_damage: 0.0,
            },
            ActionKind::Guard => Self {
                energy_cost: 10,
                cooldown: 10,
                base_damage: 0.0,
            },
            ActionKind::Melee => Self {
                energy_cost: 8,
                cooldown: 3,
                base_damage: 10.0,
            },
            ActionKind::Ranged => Self {
                energy_cost: 12,
                cooldown: 4,
                base_damage: 6.0,
            },
            ActionKind::Utility => Self {
                energy_cost: 25,
                cooldown: 40,
                base_damage: 0.0,
            },
        }
    }
}

/// Energy cost for `kind`, honouring the actor's overrides
pub fn energy_cost(actor: &ActorState, kind: ActionKind) -> u32 {
    actor
        .cost_overrides
        .get(&kind)
        .copied()
        .unwrap_or_else(|| ActionStats::for_kind(kind).energy_cost)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmorClass {
    Light,
    Medium,
    Heavy,
}

impl Default for ArmorClass {
    fn default() -> Self {
        Self::Medium
    }
}

impl ArmorClass {
    /// Incoming damage multiplier
    pub fn multiplier(self) -> f32 {
        match self {
            ArmorClass::Light => 1.15,
            ArmorClass::Medium => 1.0,
            ArmorClass::Heavy => 0.85,
        }
    }
}

/// Whether a strike of `kind` can land at the given squared distance
pub fn in_strike_range(kind: ActionKind, distance_sq: i64) -> bool {
    match kind {
        ActionKind::Melee => distance_sq <= MELEE_RANGE * MELEE_RANGE,
        ActionKind::Ranged => {
            distance_sq >= RANGED_MIN * RANGED_MIN && distance_sq <= RANGED_MAX * RANGED_MAX
        }
        _ => false,
    }
}

/// Piecewise ranged multiplier over the legal band
pub fn ranged_multiplier(distance_sq: i64) -> f32 {
    let sq = |d: i64| d * d;
    if distance_sq >= sq(RANGED_SWEET_MIN) && distance_sq <= sq(RANGED_SWEET_MAX) {
        RANGED_SWEET_MULTIPLIER
    } else if distance_sq < sq(RANGED_NEAR_EDGE) {
        RANGED_NEAR_MULTIPLIER
    } else if distance_sq > sq(RANGED_FAR_EDGE) {
        RANGED_FAR_MULTIPLIER
    } else {
        RANGED_BASELINE_MULTIPLIER
    }
}

/// Damage a legal, in-range strike of `kind` deals from `attacker` to
/// `defender` on `tick`
pub fn strike_damage(kind: ActionKind, attacker: &ActorState, defender: &ActorState, tick: u64) -> f32 {
    let stats = ActionStats::for_kind(kind);
    let distance_sq = attacker.position.distance_sq(defender.position);

    let mut damage = stats.base_damage * defender.armor.multiplier();

    if kind == ActionKind::Ranged {
        damage *= ranged_multiplier(distance_sq);
    }

    if defender.status.guard_active(tick)
        && within_facing_arc(defender.facing, attacker.position.sub(defender.position))
    {
        damage *= GUARD_MULTIPLIER;
    }

    if attacker.status.dash_buff_active(tick) {
        damage *= DASH_BUFF_MULTIPLIER;
    }

    damage.max(MIN_DAMAGE)
}
