//! Match controller and authoritative tick loop
//!
//! Each match is owned by one tokio task (`GameMatch::run`). Every command
//! and every tick is handled on that task, so the state needs no locks and
//! ticks for one match never overlap.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::SnapshotStore;
use crate::ws::protocol::ServerMsg;

use super::bot::{self, BotStrategy};
use super::broadcast::ConnectionRegistry;
use super::combat::{ActionKind, ArmorClass};
use super::engine::advance_tick;
use super::geometry::{Direction, Vec2};
use super::queue::{ActionQueues, QueueError};
use super::snapshot::{SnapshotBuilder, StateView};
use super::state::{
    ActorId, ActorState, ActorSummary, AgentAction, EndReason, GameState, MatchResult,
    ParticipationStats, RULESET_DUEL_V1,
};

/// Participants per match under the duel ruleset
pub const ACTORS_PER_MATCH: usize = 2;

/// Per-match runtime settings
#[derive(Debug, Clone)]
pub struct MatchSettings {
    pub tick_interval: Duration,
    /// Wall-clock ceiling checked at each wake-up
    pub match_timeout: Duration,
    pub queue_depth: usize,
    pub default_max_ticks: u64,
    /// Outbound buffer per observer connection
    pub connection_buffer: usize,
    /// How long an idle or finished match task lingers before it is evicted
    pub retention: Duration,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            match_timeout: Duration::from_secs(180),
            queue_depth: 8,
            default_max_ticks: 900,
            connection_buffer: 64,
            retention: Duration::from_secs(300),
        }
    }
}

/// Controller-level failures surfaced to callers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("Match already running")]
    Conflict,

    #[error("No active match")]
    NotRunning,

    #[error("Match not found")]
    NotFound,

    #[error("Unknown actor: {0}")]
    UnknownActor(ActorId),

    #[error("Queue full for {actor_id} (max depth {max_depth})")]
    QueueFull { actor_id: ActorId, max_depth: usize },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Match task unavailable")]
    Unavailable,
}

impl From<QueueError> for MatchError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::UnknownActor(id) => MatchError::UnknownActor(id),
            QueueError::Full { actor_id, max_depth } => MatchError::QueueFull { actor_id, max_depth },
        }
    }
}

/// One participant in a start request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    pub id: ActorId,
    pub spawn: Vec2,
    #[serde(default)]
    pub armor: ArmorClass,
    #[serde(default)]
    pub facing: Option<Direction>,
    #[serde(default)]
    pub cost_overrides: BTreeMap<ActionKind, u32>,
    #[serde(default)]
    pub bot: Option<BotStrategy>,
}

/// Privileged start request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMatch {
    #[serde(default)]
    pub match_id: Option<Uuid>,
    #[serde(default)]
    pub seed: Option<u32>,
    #[serde(default)]
    pub max_ticks: Option<u64>,
    #[serde(default)]
    pub ruleset: Option<String>,
    pub actors: Vec<ActorConfig>,
}

impl StartMatch {
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.actors.len() != ACTORS_PER_MATCH {
            return Err(MatchError::Validation(format!(
                "expected {} actors, got {}",
                ACTORS_PER_MATCH,
                self.actors.len()
            )));
        }
        let mut seen = HashSet::new();
        for actor in &self.actors {
            if actor.id.trim().is_empty() {
                return Err(MatchError::Validation("actor id must not be empty".into()));
            }
            if !seen.insert(actor.id.as_str()) {
                return Err(MatchError::Validation(format!("duplicate actor id {}", actor.id)));
            }
            if !actor.spawn.in_arena() {
                return Err(MatchError::Validation(format!("spawn of {} is outside the arena", actor.id)));
            }
        }
        if self.max_ticks == Some(0) {
            return Err(MatchError::Validation("max_ticks must be positive".into()));
        }
        Ok(())
    }
}

/// Returned from a successful start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedMatch {
    pub match_id: Uuid,
    pub seed: u32,
}

/// Action payload as submitted; the owner comes from authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub tick: Option<u64>,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub target: Option<ActorId>,
}

impl ActionRequest {
    fn into_action(self, actor_id: &str, current_tick: u64) -> AgentAction {
        AgentAction {
            actor_id: actor_id.to_string(),
            tick: self.tick.unwrap_or(current_tick),
            kind: self.kind,
            direction: self.direction,
            target: self.target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed,
    TimedOut,
}

/// Lifecycle of the match owned by one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Uninitialized,
    Running,
    Ended(Completion),
}

/// What the loop should do with its timer after a wake-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still running, keep the timer armed
    Rearm,
    /// Match finished on this wake-up
    Finished,
    /// Nothing running
    Idle,
}

/// Stateful per-match orchestrator
pub struct MatchController {
    match_id: Uuid,
    settings: MatchSettings,
    phase: MatchPhase,
    state: Option<GameState>,
    queues: ActionQueues,
    participation: BTreeMap<ActorId, ParticipationStats>,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    result: Option<MatchResult>,
    store: Arc<dyn SnapshotStore>,
    connections: ConnectionRegistry,
    current_tick: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl MatchController {
    pub fn new(match_id: Uuid, settings: MatchSettings, store: Arc<dyn SnapshotStore>) -> Self {
        let queues = ActionQueues::new(Vec::new(), settings.queue_depth);
        Self {
            match_id,
            settings,
            phase: MatchPhase::Uninitialized,
            state: None,
            queues,
            participation: BTreeMap::new(),
            started_at: Instant::now(),
            started_wall: Utc::now(),
            result: None,
            store,
            connections: ConnectionRegistry::new(match_id),
            current_tick: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn result(&self) -> Option<&MatchResult> {
        self.result.as_ref()
    }

    pub fn participation(&self, actor_id: &str) -> Option<&ParticipationStats> {
        self.participation.get(actor_id)
    }

    /// Build the initial state and persist tick 0. The caller arms the timer.
    pub fn start(&mut self, request: &StartMatch, now: Instant) -> Result<StartedMatch, MatchError> {
        if self.phase == MatchPhase::Running {
            return Err(MatchError::Conflict);
        }
        request.validate()?;

        let seed = request.seed.unwrap_or_else(rand::random);
        let max_ticks = request.max_ticks.unwrap_or(self.settings.default_max_ticks);
        let ruleset = request
            .ruleset
            .clone()
            .unwrap_or_else(|| RULESET_DUEL_V1.to_string());

        let actors: Vec<ActorState> = request
            .actors
            .iter()
            .map(|cfg| {
                let facing = cfg.facing.unwrap_or_else(|| {
                    let center = Vec2::new(super::geometry::ARENA_SIZE / 2, cfg.spawn.y);
                    Direction::from_vector(center.sub(cfg.spawn)).unwrap_or(Direction::E)
                });
                let mut actor = ActorState::new(cfg.id.clone(), cfg.spawn, facing, cfg.armor);
                actor.cost_overrides = cfg.cost_overrides.clone();
                actor.bot = cfg.bot;
                actor
            })
            .collect();

        // A fresh run reuses the id, so the previous run must not stay "latest"
        if let Err(e) = self.store.clear(self.match_id) {
            warn!(match_id = %self.match_id, error = %e, "Could not clear previous snapshots");
        }

        let state = GameState::new(seed, max_ticks, ruleset, actors);
        self.begin(state, now, Utc::now());

        info!(
            match_id = %self.match_id,
            seed,
            max_ticks,
            actors = ?request.actors.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
            "Match started"
        );

        Ok(StartedMatch {
            match_id: self.match_id,
            seed,
        })
    }

    /// Continue a match from a persisted snapshot
    pub fn resume(&mut self, state: GameState, now: Instant) -> bool {
        if self.phase == MatchPhase::Running || state.ended {
            return false;
        }
        let elapsed = Duration::from_millis(state.duration_ms);
        let started_at = now.checked_sub(elapsed).unwrap_or(now);
        let started_wall = Utc::now() - chrono::Duration::milliseconds(state.duration_ms as i64);

        info!(match_id = %self.match_id, tick = state.tick, "Resuming match from snapshot");
        self.begin(state, started_at, started_wall);
        true
    }

    fn begin(&mut self, state: GameState, started_at: Instant, started_wall: DateTime<Utc>) {
        let ids: Vec<ActorId> = state.actors.keys().cloned().collect();
        self.queues = ActionQueues::new(ids.clone(), self.settings.queue_depth);
        self.participation = ids
            .into_iter()
            .map(|id| (id, ParticipationStats::default()))
            .collect();
        self.started_at = started_at;
        self.started_wall = started_wall;
        self.result = None;
        self.current_tick.store(state.tick, Ordering::Relaxed);
        self.state = Some(state);
        self.phase = MatchPhase::Running;
        self.running.store(true, Ordering::Relaxed);
        self.persist();
    }

    /// Queue one action for an authenticated actor. Returns the queue depth.
    pub fn push(&mut self, actor_id: &str, request: ActionRequest) -> Result<usize, MatchError> {
        if self.phase != MatchPhase::Running {
            return Err(MatchError::NotRunning);
        }
        let tick = self.state.as_ref().map_or(0, |s| s.tick);
        let depth = self.queues.push(actor_id, request.into_action(actor_id, tick))?;
        if let Some(stats) = self.participation.get_mut(actor_id) {
            stats.actions_queued += 1;
        }
        Ok(depth)
    }

    /// Handle one scheduled wake-up
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.phase != MatchPhase::Running {
            return TickOutcome::Idle;
        }
        let Some(mut state) = self.state.take() else {
            return TickOutcome::Idle;
        };

        let elapsed = now.saturating_duration_since(self.started_at);
        state.duration_ms = elapsed.as_millis() as u64;

        if elapsed >= self.settings.match_timeout {
            warn!(
                match_id = %self.match_id,
                tick = state.tick,
                elapsed_ms = state.duration_ms,
                "Match exceeded wall-clock limit"
            );
            state.events.clear();
            state.ended = true;
            state.end_reason = Some(EndReason::Timeout);
            state.winner_id = None;
            self.state = Some(state);
            self.finalize(Completion::TimedOut);
            return TickOutcome::Finished;
        }

        self.queue_bot_actions(&mut state);

        let mut actions = BTreeMap::new();
        let ids: Vec<ActorId> = self.queues.actor_ids().cloned().collect();
        for id in ids {
            let stats = self.participation.entry(id.clone()).or_default();
            match self.queues.pop(&id) {
                Some(action) => {
                    stats.ticks_played += 1;
                    actions.insert(id, action);
                }
                None => stats.ticks_missed += 1,
            }
        }

        state.events.clear();
        let mut next = advance_tick(&state, &actions);
        next.duration_ms = state.duration_ms;

        self.current_tick.store(next.tick, Ordering::Relaxed);
        debug!(
            match_id = %self.match_id,
            tick = next.tick,
            events = next.events.len(),
            "Tick advanced"
        );

        let ended = next.ended;
        self.state = Some(next);
        self.persist();
        if let Some(state) = &self.state {
            self.connections.broadcast(&SnapshotBuilder::tick(state));
        }

        if ended {
            self.finalize(Completion::Completed);
            TickOutcome::Finished
        } else {
            TickOutcome::Rearm
        }
    }

    fn queue_bot_actions(&mut self, state: &mut GameState) {
        let bots: Vec<(ActorId, BotStrategy)> = state
            .actors
            .values()
            .filter_map(|a| a.bot.map(|s| (a.id.clone(), s)))
            .collect();

        for (id, strategy) in bots {
            let Some(action) = bot::decide(strategy, state, &id) else {
                continue;
            };
            match self.queues.push(&id, action) {
                Ok(_) => {
                    if let Some(stats) = self.participation.get_mut(&id) {
                        stats.actions_queued += 1;
                    }
                }
                Err(e) => debug!(match_id = %self.match_id, actor_id = %id, error = %e, "Bot action dropped"),
            }
        }
    }

    fn finalize(&mut self, completion: Completion) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let ended_at = Utc::now();
        let result = MatchResult {
            winner_id: state.winner_id.clone(),
            end_reason: state.end_reason.unwrap_or(EndReason::TickLimit),
            final_tick: state.tick,
            actors: state
                .actors
                .values()
                .map(|a| ActorSummary {
                    id: a.id.clone(),
                    hp: a.hp,
                    damage_dealt: a.damage_dealt,
                    illegal_actions: a.illegal_actions,
                })
                .collect(),
            objective_scores: state.objective_scores.clone(),
            participation: self.participation.clone(),
            started_at: self.started_wall,
            ended_at,
            duration_ms: state.duration_ms,
        };

        info!(
            match_id = %self.match_id,
            winner = ?result.winner_id,
            reason = ?result.end_reason,
            final_tick = result.final_tick,
            "Match ended"
        );

        if completion == Completion::TimedOut {
            self.persist();
        }
        self.phase = MatchPhase::Ended(completion);
        self.running.store(false, Ordering::Relaxed);
        self.connections.finish(&ServerMsg::MatchComplete {
            result: result.clone(),
        });
        self.result = Some(result);
    }

    /// Best-effort snapshot write; failures are logged and swallowed
    fn persist(&self) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        if let Err(e) = self.store.put(self.match_id, state.tick, state) {
            warn!(match_id = %self.match_id, tick = state.tick, error = %e, "Snapshot persist failed");
        }
    }

    pub fn view(&self) -> Option<StateView> {
        self.state
            .as_ref()
            .map(|state| SnapshotBuilder::view(self.match_id, state))
    }

    /// Register an observer; it first receives a `connected` message
    pub fn connect(&mut self, tx: mpsc::Sender<ServerMsg>) {
        let tick = self.state.as_ref().map_or(0, |s| s.tick);
        let hello = ServerMsg::Connected {
            match_id: self.match_id,
            tick,
        };
        if tx.try_send(hello).is_err() {
            return;
        }
        match self.phase {
            MatchPhase::Ended(_) => {
                // Late observers get the result and nothing else
                if let Some(result) = &self.result {
                    let _ = tx.try_send(ServerMsg::MatchComplete {
                        result: result.clone(),
                    });
                }
            }
            _ => self.connections.add(tx),
        }
    }
}

/// Commands delivered to a match task
pub enum MatchCommand {
    Start {
        request: StartMatch,
        reply: oneshot::Sender<Result<StartedMatch, MatchError>>,
    },
    Resume {
        state: GameState,
    },
    Submit {
        actor_id: ActorId,
        action: ActionRequest,
        reply: oneshot::Sender<Result<usize, MatchError>>,
    },
    View {
        reply: oneshot::Sender<Option<StateView>>,
    },
    Connect {
        tx: mpsc::Sender<ServerMsg>,
    },
}

/// Handle to a match task
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    commands: mpsc::Sender<MatchCommand>,
    current_tick: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    connection_buffer: usize,
}

impl MatchHandle {
    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn connection_buffer(&self) -> usize {
        self.connection_buffer
    }

    pub async fn start(&self, request: StartMatch) -> Result<StartedMatch, MatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(MatchCommand::Start { request, reply }).await?;
        rx.await.map_err(|_| MatchError::Unavailable)?
    }

    pub async fn resume(&self, state: GameState) -> Result<(), MatchError> {
        self.send(MatchCommand::Resume { state }).await
    }

    pub async fn submit(&self, actor_id: ActorId, action: ActionRequest) -> Result<usize, MatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(MatchCommand::Submit {
            actor_id,
            action,
            reply,
        })
        .await?;
        rx.await.map_err(|_| MatchError::Unavailable)?
    }

    pub async fn view(&self) -> Result<Option<StateView>, MatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(MatchCommand::View { reply }).await?;
        rx.await.map_err(|_| MatchError::Unavailable)
    }

    pub async fn connect(&self, tx: mpsc::Sender<ServerMsg>) -> Result<(), MatchError> {
        self.send(MatchCommand::Connect { tx }).await
    }

    async fn send(&self, cmd: MatchCommand) -> Result<(), MatchError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| MatchError::Unavailable)
    }
}

type MatchMap = DashMap<Uuid, MatchHandle>;

/// The authoritative match task
pub struct GameMatch {
    controller: MatchController,
    commands: mpsc::Receiver<MatchCommand>,
    timer: Option<Interval>,
    tick_interval: Duration,
    retention: Duration,
    /// Set while nothing is running; the task exits when it passes
    expires_at: Option<Instant>,
    registry: Option<Arc<MatchMap>>,
}

impl GameMatch {
    /// Create a match task and its handle
    pub fn new(id: Uuid, settings: MatchSettings, store: Arc<dyn SnapshotStore>) -> (Self, MatchHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(256);
        let tick_interval = settings.tick_interval;
        let retention = settings.retention;
        let connection_buffer = settings.connection_buffer;
        let controller = MatchController::new(id, settings, store);

        let handle = MatchHandle {
            id,
            commands: commands_tx,
            current_tick: controller.current_tick.clone(),
            running: controller.running.clone(),
            connection_buffer,
        };

        let game_match = Self {
            controller,
            commands: commands_rx,
            timer: None,
            tick_interval,
            retention,
            expires_at: Some(Instant::now() + retention),
            registry: None,
        };

        (game_match, handle)
    }

    /// Remove this match from `registry` when it expires
    fn evict_from(mut self, registry: Arc<MatchMap>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Serve commands and scheduled ticks until every handle is dropped or
    /// the match has sat idle past its retention period
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = next_wake(&mut self.timer) => {
                    match self.controller.tick(Instant::now()) {
                        TickOutcome::Rearm => {}
                        TickOutcome::Finished | TickOutcome::Idle => self.disarm_timer(),
                    }
                }
                _ = expiry(self.expires_at) => {
                    self.evict();
                    break;
                }
            }
        }
        debug!(match_id = %self.controller.match_id, "Match task stopped");
    }

    fn handle(&mut self, cmd: MatchCommand) {
        match cmd {
            MatchCommand::Start { request, reply } => {
                let result = self.controller.start(&request, Instant::now());
                if result.is_ok() {
                    self.arm_timer();
                }
                let _ = reply.send(result);
            }
            MatchCommand::Resume { state } => {
                if self.controller.resume(state, Instant::now()) {
                    self.arm_timer();
                }
            }
            MatchCommand::Submit {
                actor_id,
                action,
                reply,
            } => {
                let _ = reply.send(self.controller.push(&actor_id, action));
            }
            MatchCommand::View { reply } => {
                let _ = reply.send(self.controller.view());
            }
            MatchCommand::Connect { tx } => self.controller.connect(tx),
        }
    }

    fn arm_timer(&mut self) {
        let mut timer = interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.timer = Some(timer);
        self.expires_at = None;
    }

    fn disarm_timer(&mut self) {
        self.timer = None;
        self.expires_at = Some(Instant::now() + self.retention);
    }

    fn evict(&self) {
        let id = self.controller.match_id;
        if let Some(registry) = &self.registry {
            // A newer task may already own this id
            let running = &self.controller.running;
            registry.remove_if(&id, |_, handle| Arc::ptr_eq(&handle.running, running));
        }
        info!(match_id = %id, "Evicting idle match");
    }
}

/// Resolves at the next scheduled tick, or never when no timer is armed
async fn next_wake(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Registry of all matches known to this process
pub struct MatchRegistry {
    matches: Arc<MatchMap>,
    settings: MatchSettings,
    store: Arc<dyn SnapshotStore>,
}

impl MatchRegistry {
    pub fn new(settings: MatchSettings, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            matches: Arc::new(DashMap::new()),
            settings,
            store,
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    /// Existing handle for `id`, or a freshly spawned idle match task
    pub fn get_or_spawn(&self, id: Uuid) -> MatchHandle {
        match self.matches.entry(id) {
            Entry::Occupied(entry) if !entry.get().commands.is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                // The task exited before it could remove itself
                let handle = self.spawn(id);
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => entry.insert(self.spawn(id)).value().clone(),
        }
    }

    fn spawn(&self, id: Uuid) -> MatchHandle {
        let (game_match, handle) = GameMatch::new(id, self.settings.clone(), self.store.clone());
        tokio::spawn(game_match.evict_from(self.matches.clone()).run());
        handle
    }

    pub fn active_matches(&self) -> usize {
        self.matches.iter().filter(|m| m.value().is_running()).count()
    }

    pub fn total_matches(&self) -> usize {
        self.matches.len()
    }

    /// Restart every stored match whose latest snapshot is not ended
    pub async fn recover(&self) -> usize {
        let ids = match self.store.matches() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Could not list stored matches");
                return 0;
            }
        };

        let mut resumed = 0;
        for id in ids {
            let state = match self.store.latest(id) {
                Ok(Some(state)) if !state.ended => state,
                Ok(_) => continue,
                Err(e) => {
                    warn!(match_id = %id, error = %e, "Could not load snapshot");
                    continue;
                }
            };
            if self.get_or_spawn(id).resume(state).await.is_ok() {
                resumed += 1;
            }
        }
        resumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::DASH_DISTANCE;
    use crate::store::{MemorySnapshotStore, StoreError};
    use tokio_test::{assert_err, assert_ok};

    struct FailingStore;

    impl SnapshotStore for FailingStore {
        fn put(&self, _: Uuid, _: u64, _: &GameState) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")))
        }
        fn latest(&self, _: Uuid) -> Result<Option<GameState>, StoreError> {
            Ok(None)
        }
        fn matches(&self) -> Result<Vec<Uuid>, StoreError> {
            Ok(Vec::new())
        }
        fn clear(&self, _: Uuid) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn actor(id: &str, x: i32, y: i32) -> ActorConfig {
        ActorConfig {
            id: id.to_string(),
            spawn: Vec2::new(x, y),
            armor: ArmorClass::Medium,
            facing: None,
            cost_overrides: BTreeMap::new(),
            bot: None,
        }
    }

    fn request() -> StartMatch {
        StartMatch {
            match_id: None,
            seed: Some(42),
            max_ticks: Some(900),
            ruleset: None,
            actors: vec![actor("a", 200, 500), actor("b", 800, 500)],
        }
    }

    fn controller_with(settings: MatchSettings, store: Arc<dyn SnapshotStore>) -> MatchController {
        MatchController::new(Uuid::new_v4(), settings, store)
    }

    fn controller() -> MatchController {
        controller_with(MatchSettings::default(), Arc::new(MemorySnapshotStore::new()))
    }

    fn dash_east() -> ActionRequest {
        ActionRequest {
            tick: Some(0),
            kind: ActionKind::Dash,
            direction: Some(Direction::E),
            target: None,
        }
    }

    #[test]
    fn test_start_conflict_and_restart_after_end() {
        let mut c = controller();
        assert_eq!(c.phase(), MatchPhase::Uninitialized);
        assert_ok!(c.start(&request(), Instant::now()));
        assert_eq!(c.phase(), MatchPhase::Running);
        assert_eq!(assert_err!(c.start(&request(), Instant::now())), MatchError::Conflict);

        let mut short = request();
        short.max_ticks = Some(1);
        let mut c = controller();
        c.start(&short, Instant::now()).unwrap();
        assert_eq!(c.tick(Instant::now()), TickOutcome::Finished);
        assert_eq!(c.phase(), MatchPhase::Ended(Completion::Completed));
        assert_ok!(c.start(&request(), Instant::now()));
    }

    #[test]
    fn test_restart_replaces_stored_run() {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut c = controller_with(MatchSettings::default(), store.clone());
        let mut short = request();
        short.max_ticks = Some(5);
        let started = c.start(&short, Instant::now()).unwrap();
        while c.tick(Instant::now()) == TickOutcome::Rearm {}
        assert!(store.latest(started.match_id).unwrap().unwrap().ended);

        c.start(&request(), Instant::now()).unwrap();
        c.tick(Instant::now());

        let latest = store.latest(started.match_id).unwrap().unwrap();
        assert_eq!(latest.tick, 1);
        assert!(!latest.ended);
        assert_eq!(store.tick_count(started.match_id), 2);
    }

    #[test]
    fn test_start_validation() {
        let mut c = controller();
        let mut bad = request();
        bad.actors.pop();
        assert!(matches!(c.start(&bad, Instant::now()), Err(MatchError::Validation(_))));

        let mut dup = request();
        dup.actors[1].id = "a".into();
        assert!(matches!(c.start(&dup, Instant::now()), Err(MatchError::Validation(_))));

        let mut outside = request();
        outside.actors[0].spawn = Vec2::new(-1, 0);
        assert!(matches!(c.start(&outside, Instant::now()), Err(MatchError::Validation(_))));
        assert_eq!(c.phase(), MatchPhase::Uninitialized);
    }

    #[test]
    fn test_push_errors() {
        let mut c = controller();
        assert_eq!(assert_err!(c.push("a", dash_east())), MatchError::NotRunning);

        let settings = MatchSettings {
            queue_depth: 2,
            ..Default::default()
        };
        let mut c = controller_with(settings, Arc::new(MemorySnapshotStore::new()));
        c.start(&request(), Instant::now()).unwrap();

        assert_eq!(
            assert_err!(c.push("mallory", dash_east())),
            MatchError::UnknownActor("mallory".into())
        );
        assert_eq!(assert_ok!(c.push("a", dash_east())), 1);
        assert_eq!(assert_ok!(c.push("a", dash_east())), 2);
        assert!(matches!(c.push("a", dash_east()), Err(MatchError::QueueFull { .. })));
    }

    #[test]
    fn test_dash_scenario_and_missed_counter() {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut c = controller_with(MatchSettings::default(), store.clone());
        let started = c.start(&request(), Instant::now()).unwrap();
        assert_eq!(started.seed, 42);
        assert_eq!(store.tick_count(started.match_id), 1);

        c.push("a", dash_east()).unwrap();
        assert_eq!(c.tick(Instant::now()), TickOutcome::Rearm);

        let state = c.state().unwrap();
        let a = &state.actors["a"];
        assert_eq!(state.tick, 1);
        assert_eq!(a.position, Vec2::new(200 + DASH_DISTANCE, 500));
        assert!(a.cooldown(ActionKind::Dash) > 0);
        assert!(state.events.iter().all(|e| e.kind != crate::game::EventKind::Damage));

        assert_eq!(c.participation("b").unwrap().ticks_missed, 1);
        assert_eq!(c.participation("a").unwrap().ticks_played, 1);
        assert_eq!(c.participation("a").unwrap().ticks_missed, 0);
        assert_eq!(store.tick_count(started.match_id), 2);
    }

    #[test]
    fn test_watchdog_times_out_without_simulating() {
        let settings = MatchSettings {
            match_timeout: Duration::ZERO,
            ..Default::default()
        };
        let mut c = controller_with(settings, Arc::new(MemorySnapshotStore::new()));
        let t0 = Instant::now();
        c.start(&request(), t0).unwrap();
        c.push("a", dash_east()).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        c.connect(tx);

        assert_eq!(c.tick(t0 + Duration::from_millis(5)), TickOutcome::Finished);
        assert_eq!(c.phase(), MatchPhase::Ended(Completion::TimedOut));

        let state = c.state().unwrap();
        assert_eq!(state.tick, 0);
        assert!(state.ended);
        assert_eq!(state.end_reason, Some(EndReason::Timeout));
        assert_eq!(c.result().unwrap().end_reason, EndReason::Timeout);

        assert!(matches!(rx.try_recv(), Ok(ServerMsg::Connected { tick: 0, .. })));
        assert!(matches!(rx.try_recv(), Ok(ServerMsg::MatchComplete { .. })));
        assert!(rx.try_recv().is_err());

        assert_eq!(assert_err!(c.push("a", dash_east())), MatchError::NotRunning);
        assert_eq!(c.tick(Instant::now()), TickOutcome::Idle);
    }

    #[test]
    fn test_broadcast_ticks_and_single_completion() {
        let mut short = request();
        short.max_ticks = Some(3);
        let mut c = controller();
        c.start(&short, Instant::now()).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        c.connect(tx);
        for _ in 0..3 {
            c.tick(Instant::now());
        }

        let mut ticks = 0;
        let mut completes = 0;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                ServerMsg::Tick { state, .. } => {
                    ticks += 1;
                    assert!(state.events.is_empty());
                }
                ServerMsg::MatchComplete { result } => {
                    completes += 1;
                    assert_eq!(result.final_tick, 3);
                    assert_eq!(result.participation["a"].ticks_missed, 3);
                }
                _ => {}
            }
        }
        assert_eq!(ticks, 3);
        assert_eq!(completes, 1);
    }

    #[test]
    fn test_backlogged_observer_still_gets_completion() {
        let mut short = request();
        short.max_ticks = Some(4);
        let mut c = controller();
        c.start(&short, Instant::now()).unwrap();

        let (tx, mut rx) = mpsc::channel(2);
        c.connect(tx);
        while c.tick(Instant::now()) == TickOutcome::Rearm {}

        assert!(matches!(rx.try_recv(), Ok(ServerMsg::Connected { .. })));
        assert!(matches!(rx.try_recv(), Ok(ServerMsg::MatchComplete { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_persist_failure_does_not_stall() {
        let mut c = controller_with(MatchSettings::default(), Arc::new(FailingStore));
        c.start(&request(), Instant::now()).unwrap();
        assert_eq!(c.tick(Instant::now()), TickOutcome::Rearm);
        assert_eq!(c.tick(Instant::now()), TickOutcome::Rearm);
        assert_eq!(c.state().unwrap().tick, 2);
    }

    #[test]
    fn test_view_omits_events() {
        let mut c = controller();
        assert!(c.view().is_none());
        let mut req = request();
        req.actors[0].spawn = Vec2::new(490, 500);
        req.actors[1].spawn = Vec2::new(510, 500);
        c.start(&req, Instant::now()).unwrap();
        c.push(
            "a",
            ActionRequest {
                tick: None,
                kind: ActionKind::Melee,
                direction: None,
                target: None,
            },
        )
        .unwrap();
        c.tick(Instant::now());

        let view = c.view().unwrap();
        assert!(view.event_count > 0);
        assert!(view.state.events.is_empty());
    }

    #[test]
    fn test_bots_play_themselves() {
        let mut req = request();
        req.actors[0].bot = Some(BotStrategy::Melee);
        req.actors[1].bot = Some(BotStrategy::Ranged);
        req.max_ticks = Some(60);
        let mut c = controller();
        c.start(&req, Instant::now()).unwrap();
        while c.tick(Instant::now()) == TickOutcome::Rearm {}

        let stats = c.participation("a").unwrap();
        assert!(stats.actions_queued > 0);
        assert_eq!(stats.ticks_played + stats.ticks_missed, c.state().unwrap().tick);
    }

    #[test]
    fn test_resume_continues_from_snapshot() {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut c = controller_with(MatchSettings::default(), store.clone());
        let started = c.start(&request(), Instant::now()).unwrap();
        c.tick(Instant::now());
        c.tick(Instant::now());

        let snapshot = store.latest(started.match_id).unwrap().unwrap();
        let mut resumed = MatchController::new(started.match_id, MatchSettings::default(), store);
        assert!(resumed.resume(snapshot, Instant::now()));
        assert_eq!(resumed.tick(Instant::now()), TickOutcome::Rearm);
        assert_eq!(resumed.state().unwrap().tick, 3);
    }

    #[tokio::test]
    async fn test_match_task_round_trip() {
        let settings = MatchSettings {
            tick_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let registry = MatchRegistry::new(settings, Arc::new(MemorySnapshotStore::new()));
        let id = Uuid::new_v4();
        let handle = registry.get_or_spawn(id);

        let mut req = request();
        req.max_ticks = Some(20);
        let started = handle.start(req.clone()).await.unwrap();
        assert_eq!(started.match_id, id);
        assert_eq!(registry.get_or_spawn(id).start(req).await, Err(MatchError::Conflict));

        let (tx, mut rx) = mpsc::channel(32);
        handle.connect(tx).await.unwrap();
        assert_eq!(handle.submit("b".into(), dash_east()).await, Ok(1));

        let mut completed = false;
        while let Some(msg) = rx.recv().await {
            if let ServerMsg::MatchComplete { result } = msg {
                assert_eq!(result.final_tick, 20);
                completed = true;
            }
        }
        assert!(completed);
        assert!(!handle.is_running());

        let view = handle.view().await.unwrap().unwrap();
        assert!(view.state.ended);
        assert_eq!(handle.submit("a".into(), dash_east()).await, Err(MatchError::NotRunning));
    }

    #[tokio::test]
    async fn test_recover_resumes_only_unfinished_matches() {
        let store = Arc::new(MemorySnapshotStore::new());

        let live_id = Uuid::new_v4();
        let mut live = MatchController::new(live_id, MatchSettings::default(), store.clone());
        live.start(&request(), Instant::now()).unwrap();
        live.tick(Instant::now());

        let done_id = Uuid::new_v4();
        let mut short = request();
        short.max_ticks = Some(1);
        let mut done = MatchController::new(done_id, MatchSettings::default(), store.clone());
        done.start(&short, Instant::now()).unwrap();
        assert_eq!(done.tick(Instant::now()), TickOutcome::Finished);

        let settings = MatchSettings {
            tick_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let registry = MatchRegistry::new(settings, store);
        assert_eq!(registry.recover().await, 1);
        assert!(registry.get(&done_id).is_none());

        let handle = registry.get(&live_id).unwrap();
        let view = handle.view().await.unwrap().unwrap();
        assert!(view.state.tick >= 1);
        assert!(handle.is_running());

        let mut advanced = false;
        for _ in 0..200 {
            if handle.current_tick() > 1 {
                advanced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(advanced);
    }

    #[tokio::test]
    async fn test_idle_matches_are_evicted_after_retention() {
        let settings = MatchSettings {
            tick_interval: Duration::from_millis(5),
            retention: Duration::from_millis(100),
            ..Default::default()
        };
        let registry = MatchRegistry::new(settings, Arc::new(MemorySnapshotStore::new()));
        let id = Uuid::new_v4();
        let handle = registry.get_or_spawn(id);
        registry.get_or_spawn(Uuid::new_v4());

        let mut short = request();
        short.max_ticks = Some(3);
        handle.start(short).await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        handle.connect(tx).await.unwrap();
        while rx.recv().await.is_some() {}

        // Finished matches stay readable for a while
        assert!(handle.view().await.unwrap().unwrap().state.ended);
        assert_eq!(registry.total_matches(), 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(registry.total_matches(), 0);
        assert!(registry.get(&id).is_none());
        assert!(matches!(handle.view().await, Err(MatchError::Unavailable)));

        let fresh = registry.get_or_spawn(id);
        assert_ok!(fresh.start(request()).await);
        assert_eq!(registry.active_matches(), 1);
    }

    #[tokio::test]
    async fn test_stale_handle_is_replaced() {
        let registry = MatchRegistry::new(MatchSettings::default(), Arc::new(MemorySnapshotStore::new()));
        let id = Uuid::new_v4();
        let (game_match, handle) = GameMatch::new(id, MatchSettings::default(), Arc::new(MemorySnapshotStore::new()));
        drop(game_match);
        registry.matches.insert(id, handle.clone());

        let replaced = registry.get_or_spawn(id);
        assert!(!Arc::ptr_eq(&replaced.running, &handle.running));
        assert_ok!(replaced.start(request()).await);
    }
}
