// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ring 3 — the truth log: every accepted state change as an immutable,
//! totally ordered commit.
//!
//! All commits serialise through a single lock; the critical section is
//! O(constraints) plus O(snapshot) when one is due. Accepted commits receive
//! a strictly increasing [`CommitId`]; rejections are synthetic commits with
//! id −1 and never consume the counter. Within one tick, consecutive `Set`
//! commits of the same payload kind for the same subject coalesce in place —
//! the counter does not advance, and the folded payload is what replay sees.
//! Constraints gate every submission, folds included, so nothing reaches the
//! durable log unchecked.
//!
//! # Ordering invariants
//!
//! - Within accepted commits, `commit_id` reflects serialisation order.
//! - For any subject, the sequence of `(tick, commit_id)` is non-decreasing.
//! - Snapshots plus commit replay form a deterministic projection:
//!   [`TruthLog::reconstruct_at`] replays recorded history and never
//!   re-decides anything.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::authority::{AuthorityOwner, AuthorityScope, AuthorityTracker};
use crate::clock::{Tick, TickRange};
use crate::ident::NetId;
use crate::schema::{ItemStack, PayloadHash, SchemaKind, SchemaPayload};
use crate::space::FramedTransform;

/// Commit identifier. Accepted commits count up from 1; synthetic rejected
/// commits carry [`REJECTED_COMMIT_ID`].
pub type CommitId = i64;

/// Sentinel id carried by synthetic rejected commits.
pub const REJECTED_COMMIT_ID: CommitId = -1;

/// Default circular log capacity.
pub const DEFAULT_LOG_CAPACITY: usize = 32_768;

/// Default commits between snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 1000;

/// Snapshots retained in memory.
pub const SNAPSHOT_RETENTION: usize = 10;

/// Commit ids remembered per entity.
const RECENT_COMMITS_PER_ENTITY: usize = 16;

/// What a commit does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitOp {
    /// Replace the subject's state for the payload's schema.
    Set,
    /// Partial update; applied like `Set` for complete payloads but never
    /// coalesced.
    Patch,
    /// Entity came into existence.
    Spawn,
    /// Entity left the world.
    Despawn,
    /// Authority over the subject changed.
    AuthorityChange,
    /// Discrete event; does not fold into state fields.
    Event,
}

/// Outcome of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitResult {
    /// Appended to the log.
    Accepted,
    /// Refused; nothing changed.
    Rejected,
    /// Parked by the caller (recorded for statistics only).
    Deferred,
    /// Folded into an existing same-tick commit.
    Coalesced,
}

/// One entry in (or rejected from) the truth log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Monotone id for accepted commits; −1 for synthetic rejections.
    pub commit_id: CommitId,
    /// Entity the commit is about.
    pub subject: NetId,
    /// Operation.
    pub op: CommitOp,
    /// Normalised payload.
    pub payload: SchemaPayload,
    /// Tick the change is true at.
    pub tick: Tick,
    /// Epoch of the authority grant that admitted the write.
    pub authority_epoch: u32,
    /// Source the change originated from.
    pub source_id: NetId,
    /// Outcome.
    pub result: CommitResult,
    /// Rejection / coalesce reason, when any.
    pub reason: Option<String>,
    /// Wall-clock milliseconds, telemetry only.
    pub timestamp: Option<u64>,
    /// Content hash of the normalised payload.
    pub payload_hash: PayloadHash,
}

/// Commit submission.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// Entity the change is about.
    pub subject: NetId,
    /// Operation.
    pub op: CommitOp,
    /// Payload (normalised on entry).
    pub payload: SchemaPayload,
    /// Tick the change is true at.
    pub tick: Tick,
    /// Originating source.
    pub source_id: NetId,
    /// Claimed owner class of the writer.
    pub owner: AuthorityOwner,
    /// Claimed owner identity (checked for `Client` owners).
    pub owner_id: NetId,
}

/// Health truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthState {
    /// Current hit points.
    pub current: f32,
    /// Maximum hit points.
    pub maximum: f32,
}

/// AI truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AiTruth {
    /// Active goal.
    pub goal: crate::schema::AiGoal,
    /// Current target.
    pub target: NetId,
}

/// Per-entity folded view of the accepted commit sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTruth {
    /// Tick of the newest accepted commit.
    pub last_tick: Tick,
    /// Id of the newest accepted commit.
    pub last_commit_id: CommitId,
    /// Operation of the newest accepted commit.
    pub last_op: CommitOp,
    /// Schema of the newest accepted commit.
    pub last_schema: SchemaKind,
    /// Latest transform truth.
    pub transform: Option<FramedTransform>,
    /// Latest health truth.
    pub health: Option<HealthState>,
    /// Latest inventory truth.
    pub inventory: Option<Vec<ItemStack>>,
    /// Latest AI truth.
    pub ai_state: Option<AiTruth>,
    /// Recent accepted commit ids, newest last, bounded.
    pub recent_commits: VecDeque<CommitId>,
}

impl EntityTruth {
    fn new(commit: &Commit) -> Self {
        let mut truth = Self {
            last_tick: commit.tick,
            last_commit_id: commit.commit_id,
            last_op: commit.op,
            last_schema: commit.payload.kind(),
            transform: None,
            health: None,
            inventory: None,
            ai_state: None,
            recent_commits: VecDeque::new(),
        };
        truth.fold(commit);
        truth
    }

    /// Folds one accepted commit into the view. Deterministic: replay calls
    /// the same function the live path does.
    fn fold(&mut self, commit: &Commit) {
        self.last_tick = commit.tick;
        self.last_commit_id = commit.commit_id;
        self.last_op = commit.op;
        self.last_schema = commit.payload.kind();
        if self.recent_commits.len() == RECENT_COMMITS_PER_ENTITY {
            self.recent_commits.pop_front();
        }
        self.recent_commits.push_back(commit.commit_id);

        // Events annotate history without folding into state fields.
        if commit.op == CommitOp::Event {
            return;
        }
        match &commit.payload {
            SchemaPayload::Transform(t) => self.transform = Some(*t),
            SchemaPayload::Health { current, maximum } => {
                self.health = Some(HealthState {
                    current: *current,
                    maximum: *maximum,
                });
            }
            SchemaPayload::Inventory { items } => self.inventory = Some(items.clone()),
            SchemaPayload::AiState { goal, target } => {
                self.ai_state = Some(AiTruth {
                    goal: *goal,
                    target: *target,
                });
            }
            // Inputs and anim state feed presentation, not folded truth.
            SchemaPayload::Input { .. } | SchemaPayload::AnimState { .. } => {}
            SchemaPayload::Despawn { .. } => {}
        }
    }
}

/// Point-in-time clone of every entity's truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthSnapshot {
    /// Id of the last commit folded into this snapshot.
    pub commit_id: CommitId,
    /// Tick of that commit.
    pub tick: Tick,
    /// Wall-clock milliseconds, telemetry only.
    pub timestamp: Option<u64>,
    /// Entity states, deterministically ordered.
    pub entities: BTreeMap<NetId, EntityTruth>,
}

/// A registered commit constraint.
///
/// Constraints see the subject's current truth (if any) and the normalised
/// incoming commit; returning `Err` rejects the commit with that reason.
pub trait CommitConstraint: Send + Sync {
    /// Stable name, used in logs.
    fn name(&self) -> &'static str;

    /// Checks the commit. The reason string ends up on the rejected commit.
    fn check(&self, prior: Option<&EntityTruth>, commit: &Commit) -> Result<(), String>;
}

/// Rejects position jumps beyond `max_per_tick · max(1, Δtick)`.
#[derive(Debug, Clone, Copy)]
pub struct TeleportConstraint {
    /// Maximum allowed movement per tick, world units.
    pub max_per_tick: f32,
}

impl Default for TeleportConstraint {
    fn default() -> Self {
        Self { max_per_tick: 50.0 }
    }
}

impl CommitConstraint for TeleportConstraint {
    fn name(&self) -> &'static str {
        "Teleport"
    }

    fn check(&self, prior: Option<&EntityTruth>, commit: &Commit) -> Result<(), String> {
        if !matches!(commit.op, CommitOp::Set | CommitOp::Patch) {
            return Ok(());
        }
        let Some(next) = commit.payload.as_transform() else {
            return Ok(());
        };
        let Some(prev) = prior.and_then(|p| p.transform) else {
            return Ok(());
        };
        // Distance across frames is undefined; the frame change itself is
        // legitimate (e.g. boarding a parent).
        if prev.frame != next.frame {
            return Ok(());
        }
        let dt = (commit.tick - prior.map_or(commit.tick, |p| p.last_tick)).max(1) as f32;
        let allowed = self.max_per_tick * dt;
        let moved = prev.position.distance(next.position);
        if moved > allowed {
            return Err(format!(
                "Teleport: moved {moved:.2} over {dt:.0} tick(s), limit {allowed:.2}"
            ));
        }
        Ok(())
    }
}

/// Rejects health outside `[0, maximum · 1.10]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthRangeConstraint;

impl CommitConstraint for HealthRangeConstraint {
    fn name(&self) -> &'static str {
        "HealthRange"
    }

    fn check(&self, _prior: Option<&EntityTruth>, commit: &Commit) -> Result<(), String> {
        let Some((current, maximum)) = commit.payload.as_health() else {
            return Ok(());
        };
        if current < 0.0 {
            return Err(format!("HealthRange: current {current:.2} below zero"));
        }
        let cap = maximum * 1.10;
        if current > cap {
            return Err(format!(
                "HealthRange: current {current:.2} above cap {cap:.2} (maximum {maximum:.2})"
            ));
        }
        Ok(())
    }
}

/// Maps a payload schema to the authority scope its writes require.
#[must_use]
pub fn scope_for(kind: SchemaKind) -> AuthorityScope {
    match kind {
        SchemaKind::Transform | SchemaKind::Input => AuthorityScope::TRANSFORM,
        SchemaKind::Health => AuthorityScope::HEALTH,
        SchemaKind::Inventory => AuthorityScope::INVENTORY,
        SchemaKind::AiState => AuthorityScope::AI,
        SchemaKind::AnimState => AuthorityScope::ANIMATION,
        SchemaKind::Despawn => AuthorityScope::LIFECYCLE,
    }
}

/// Log construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct TruthLogConfig {
    /// Circular buffer capacity for accepted commits.
    pub capacity: usize,
    /// Commits between snapshots.
    pub snapshot_interval: u64,
}

impl Default for TruthLogConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }
}

struct TruthState {
    commits: VecDeque<Commit>,
    next_commit_id: CommitId,
    entities: BTreeMap<NetId, EntityTruth>,
    snapshots: VecDeque<TruthSnapshot>,
    last_snapshot_id: CommitId,
}

impl TruthState {
    fn commit_index(&self, id: CommitId) -> Option<usize> {
        let first = self.commits.front()?.commit_id;
        if id < first {
            return None;
        }
        let idx = (id - first) as usize;
        (idx < self.commits.len()).then_some(idx)
    }
}

/// Ring 3: the serialized write-ahead truth log.
pub struct TruthLog {
    state: Mutex<TruthState>,
    constraints: Vec<Box<dyn CommitConstraint>>,
    tracker: Arc<AuthorityTracker>,
    config: TruthLogConfig,
}

impl TruthLog {
    /// Creates a log with the default constraint set (teleport, health
    /// range) and a genesis snapshot at commit 0.
    #[must_use]
    pub fn new(config: TruthLogConfig, tracker: Arc<AuthorityTracker>) -> Self {
        Self::with_constraints(
            config,
            tracker,
            vec![
                Box::<TeleportConstraint>::default(),
                Box::<HealthRangeConstraint>::default(),
            ],
        )
    }

    /// Creates a log with an explicit constraint set.
    #[must_use]
    pub fn with_constraints(
        config: TruthLogConfig,
        tracker: Arc<AuthorityTracker>,
        constraints: Vec<Box<dyn CommitConstraint>>,
    ) -> Self {
        let genesis = TruthSnapshot {
            commit_id: 0,
            tick: 0,
            timestamp: wall_ms(),
            entities: BTreeMap::new(),
        };
        let mut snapshots = VecDeque::new();
        snapshots.push_back(genesis);
        Self {
            state: Mutex::new(TruthState {
                commits: VecDeque::new(),
                next_commit_id: 1,
                entities: BTreeMap::new(),
                snapshots,
                last_snapshot_id: 0,
            }),
            constraints,
            tracker,
            config,
        }
    }

    /// Registers an additional constraint. Applies to subsequent commits.
    pub fn push_constraint(&mut self, constraint: Box<dyn CommitConstraint>) {
        self.constraints.push(constraint);
    }

    /// Submits a state change. See the module docs for the algorithm.
    pub fn commit(&self, request: CommitRequest) -> Commit {
        let payload = request.payload.normalized();
        let payload_hash = payload.content_hash();
        let scope = scope_for(payload.kind());

        let authorized = self.tracker.can_write(
            request.subject,
            request.owner,
            request.owner_id,
            scope,
            request.tick,
        );
        let authority_epoch = self
            .tracker
            .authority_of(request.subject, scope)
            .map_or(0, |c| c.epoch);

        let mut commit = Commit {
            commit_id: REJECTED_COMMIT_ID,
            subject: request.subject,
            op: request.op,
            payload,
            tick: request.tick,
            authority_epoch,
            source_id: request.source_id,
            result: CommitResult::Rejected,
            reason: None,
            timestamp: wall_ms(),
            payload_hash,
        };

        if !authorized {
            commit.reason = Some(format!(
                "AuthorityDenied: {} (owner {}) may not write {} at tick {}",
                request.source_id,
                request.owner,
                payload_kind_label(&commit.payload),
                request.tick
            ));
            debug!(subject = %commit.subject, reason = ?commit.reason, "commit rejected");
            return commit;
        }

        let mut state = self.state.lock();

        // Per-subject (tick, commit_id) must be non-decreasing.
        if let Some(prior) = state.entities.get(&request.subject) {
            if commit.tick < prior.last_tick {
                commit.reason = Some(format!(
                    "StaleTick: tick {} behind subject truth at {}",
                    commit.tick, prior.last_tick
                ));
                return commit;
            }
        }

        // Constraints run on every submission, before coalescing: a payload
        // that folds into an existing commit ends up in the durable log all
        // the same, so it gets no free pass.
        for constraint in &self.constraints {
            let prior = state.entities.get(&request.subject);
            if let Err(reason) = constraint.check(prior, &commit) {
                warn!(
                    subject = %commit.subject,
                    constraint = constraint.name(),
                    %reason,
                    "commit rejected by constraint"
                );
                commit.reason = Some(reason);
                return commit;
            }
        }

        // Coalescing: same subject, same tick, Set-on-Set, same payload kind.
        if request.op == CommitOp::Set {
            if let Some(folded) = coalesce(&mut state, &commit) {
                return folded;
            }
        }
        // Events never coalesce, but an identical event repeated within one
        // tick is deduplicated by content hash.
        if request.op == CommitOp::Event {
            if let Some(duplicate) = dedup_event(&state, &commit) {
                return duplicate;
            }
        }

        commit.commit_id = state.next_commit_id;
        state.next_commit_id += 1;
        commit.result = CommitResult::Accepted;

        state
            .entities
            .entry(commit.subject)
            .and_modify(|truth| truth.fold(&commit))
            .or_insert_with(|| EntityTruth::new(&commit));
        if commit.op == CommitOp::Despawn {
            state.entities.remove(&commit.subject);
        }

        if state.commits.len() == self.config.capacity {
            state.commits.pop_front();
        }
        state.commits.push_back(commit.clone());

        if (commit.commit_id - state.last_snapshot_id) as u64 >= self.config.snapshot_interval {
            take_snapshot(&mut state, commit.commit_id, commit.tick);
        }
        commit
    }

    /// The id the next accepted commit will take, minus one.
    #[must_use]
    pub fn latest_commit_id(&self) -> CommitId {
        self.state.lock().next_commit_id - 1
    }

    /// Clone of the folded truth for `subject`.
    #[must_use]
    pub fn entity_state(&self, subject: NetId) -> Option<EntityTruth> {
        self.state.lock().entities.get(&subject).cloned()
    }

    /// Latest committed transform for `subject` (parent-lookup surface).
    #[must_use]
    pub fn transform_of(&self, subject: NetId) -> Option<FramedTransform> {
        self.state
            .lock()
            .entities
            .get(&subject)
            .and_then(|t| t.transform)
    }

    /// Accepted commits with id strictly greater than `from`.
    #[must_use]
    pub fn commits_since(&self, from: CommitId) -> Vec<Commit> {
        let state = self.state.lock();
        state
            .commits
            .iter()
            .filter(|c| c.commit_id > from)
            .cloned()
            .collect()
    }

    /// Accepted commits for `subject`, optionally from a tick onward.
    #[must_use]
    pub fn commits_for_entity(&self, subject: NetId, from_tick: Option<Tick>) -> Vec<Commit> {
        let state = self.state.lock();
        state
            .commits
            .iter()
            .filter(|c| c.subject == subject && from_tick.is_none_or(|t| c.tick >= t))
            .cloned()
            .collect()
    }

    /// Accepted commits whose tick lies in `[a, b]`.
    #[must_use]
    pub fn commits_in_tick_range(&self, a: Tick, b: Tick) -> Vec<Commit> {
        let range = TickRange::new(a, b);
        let state = self.state.lock();
        state
            .commits
            .iter()
            .filter(|c| range.contains(c.tick))
            .cloned()
            .collect()
    }

    /// The newest retained snapshot.
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<TruthSnapshot> {
        self.state.lock().snapshots.back().cloned()
    }

    /// Reconstructs the full truth state as of commit `commit_id`.
    ///
    /// Picks the newest snapshot at or before `commit_id` and replays the
    /// accepted commits after it, in order. Returns `None` when no snapshot
    /// qualifies or the required commits have been evicted — never a
    /// best-effort answer.
    #[must_use]
    pub fn reconstruct_at(&self, commit_id: CommitId) -> Option<BTreeMap<NetId, EntityTruth>> {
        let state = self.state.lock();
        if commit_id < 0 || commit_id > state.next_commit_id - 1 {
            return None;
        }
        let snapshot = state
            .snapshots
            .iter()
            .rev()
            .find(|s| s.commit_id <= commit_id)?;
        let mut entities = snapshot.entities.clone();
        if commit_id == snapshot.commit_id {
            return Some(entities);
        }
        // Every commit in (snapshot, target] must still be retained.
        let first_needed = snapshot.commit_id + 1;
        let start = state.commit_index(first_needed)?;
        let end = state.commit_index(commit_id)?;
        for idx in start..=end {
            let commit = &state.commits[idx];
            entities
                .entry(commit.subject)
                .and_modify(|truth| truth.fold(commit))
                .or_insert_with(|| EntityTruth::new(commit));
            if commit.op == CommitOp::Despawn {
                entities.remove(&commit.subject);
            }
        }
        Some(entities)
    }

    /// Restores log state from a persisted snapshot (resume path). Resets
    /// the commit counter to continue after the snapshot.
    pub fn restore_snapshot(&self, snapshot: TruthSnapshot) {
        let mut state = self.state.lock();
        state.entities = snapshot.entities.clone();
        state.next_commit_id = snapshot.commit_id + 1;
        state.last_snapshot_id = snapshot.commit_id;
        state.commits.clear();
        state.snapshots.clear();
        state.snapshots.push_back(snapshot);
    }

    /// Number of retained snapshots.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.state.lock().snapshots.len()
    }
}

fn payload_kind_label(payload: &SchemaPayload) -> &'static str {
    payload.kind().label()
}

/// Same-tick Set-on-Set coalescing. Folds the new payload into the subject's
/// last commit in place and returns the folded commit with its original id.
/// Callers have already run the constraint set over `incoming`; the stored
/// entry stays `Accepted` because its (now folded) payload passed the same
/// checks the original did.
fn coalesce(state: &mut TruthState, incoming: &Commit) -> Option<Commit> {
    let last_id = state.entities.get(&incoming.subject)?.last_commit_id;
    let idx = state.commit_index(last_id)?;
    let existing = &state.commits[idx];
    let foldable = existing.subject == incoming.subject
        && existing.tick == incoming.tick
        && existing.op == CommitOp::Set
        && existing.payload.kind() == incoming.payload.kind();
    if !foldable {
        return None;
    }
    let existing = &mut state.commits[idx];
    existing.payload = incoming.payload.clone();
    existing.payload_hash = incoming.payload_hash;
    existing.source_id = incoming.source_id;
    existing.timestamp = incoming.timestamp;
    let folded = existing.clone();
    if let Some(truth) = state.entities.get_mut(&incoming.subject) {
        // Re-fold without growing recent_commits: the id is unchanged.
        truth.recent_commits.pop_back();
        truth.fold(&folded);
    }
    let mut result = folded;
    result.result = CommitResult::Coalesced;
    Some(result)
}

/// Within-tick duplicate-event suppression by content hash.
fn dedup_event(state: &TruthState, incoming: &Commit) -> Option<Commit> {
    let duplicate = state.commits.iter().rev().take_while(|c| c.tick == incoming.tick).find(|c| {
        c.subject == incoming.subject
            && c.op == CommitOp::Event
            && c.payload_hash == incoming.payload_hash
    })?;
    let mut result = duplicate.clone();
    result.result = CommitResult::Coalesced;
    result.reason = Some("DuplicateEvent: identical event already committed this tick".to_owned());
    Some(result)
}

fn take_snapshot(state: &mut TruthState, commit_id: CommitId, tick: Tick) {
    let snapshot = TruthSnapshot {
        commit_id,
        tick,
        timestamp: wall_ms(),
        entities: state.entities.clone(),
    };
    if state.snapshots.len() == SNAPSHOT_RETENTION {
        state.snapshots.pop_front();
    }
    state.snapshots.push_back(snapshot);
    state.last_snapshot_id = commit_id;
    debug!(commit_id, tick, "snapshot taken");
}

fn wall_ms() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::AuthorityCoordinate;
    use crate::ident::EntityKind;
    use crate::math::{Quat, Vec3};
    use crate::space::SpaceFrame;

    fn subject() -> NetId {
        NetId::pack(EntityKind::Player, 1, 1)
    }

    fn source() -> NetId {
        NetId::pack(EntityKind::Player, 2, 1)
    }

    fn log() -> (TruthLog, Arc<AuthorityTracker>) {
        let tracker = Arc::new(AuthorityTracker::new());
        tracker
            .publish(
                subject(),
                AuthorityCoordinate::server(AuthorityScope::ALL, 1, 0),
            )
            .expect("grant");
        (TruthLog::new(TruthLogConfig::default(), tracker.clone()), tracker)
    }

    fn transform_at(x: f32, tick: Tick) -> CommitRequest {
        CommitRequest {
            subject: subject(),
            op: CommitOp::Set,
            payload: SchemaPayload::Transform(FramedTransform::world(
                Vec3::new(x, 0.0, 0.0),
                Quat::IDENTITY,
                Vec3::ZERO,
            )),
            tick,
            source_id: source(),
            owner: AuthorityOwner::Server,
            owner_id: NetId::INVALID,
        }
    }

    #[test]
    fn accepted_ids_are_dense_and_monotone() {
        let (log, _) = log();
        let a = log.commit(transform_at(0.0, 0));
        let b = log.commit(transform_at(10.0, 1));
        assert_eq!(a.result, CommitResult::Accepted);
        assert_eq!(a.commit_id, 1);
        assert_eq!(b.commit_id, 2);
        assert_eq!(log.latest_commit_id(), 2);
    }

    #[test]
    fn teleport_is_rejected_without_consuming_an_id() {
        let (log, _) = log();
        let first = log.commit(transform_at(0.0, 0));
        assert_eq!(first.result, CommitResult::Accepted);

        let jump = log.commit(transform_at(100.0, 1));
        assert_eq!(jump.result, CommitResult::Rejected);
        assert_eq!(jump.commit_id, REJECTED_COMMIT_ID);
        assert!(jump.reason.as_deref().is_some_and(|r| r.contains("Teleport")));

        // Truth unchanged, counter unchanged.
        let truth = log.entity_state(subject()).expect("truth");
        assert_eq!(
            truth.transform.map(|t| t.position),
            Some(Vec3::new(0.0, 0.0, 0.0))
        );
        assert_eq!(log.latest_commit_id(), 1);
    }

    #[test]
    fn teleport_budget_scales_with_tick_gap() {
        let (log, _) = log();
        let _ = log.commit(transform_at(0.0, 0));
        // 100 units over 3 ticks is within 50/tick.
        let ok = log.commit(transform_at(100.0, 3));
        assert_eq!(ok.result, CommitResult::Accepted);
    }

    #[test]
    fn health_range_enforced() {
        let (log, _) = log();
        let bad = log.commit(CommitRequest {
            payload: SchemaPayload::Health {
                current: 150.0,
                maximum: 100.0,
            },
            ..transform_at(0.0, 0)
        });
        assert_eq!(bad.result, CommitResult::Rejected);
        assert!(bad
            .reason
            .as_deref()
            .is_some_and(|r| r.contains("HealthRange")));

        // 10% overheal headroom is allowed.
        let edge = log.commit(CommitRequest {
            payload: SchemaPayload::Health {
                current: 110.0,
                maximum: 100.0,
            },
            ..transform_at(0.0, 0)
        });
        assert_eq!(edge.result, CommitResult::Accepted);
    }

    #[test]
    fn same_tick_set_coalesces_in_place() {
        let (log, _) = log();
        let a = log.commit(transform_at(1.0, 42));
        assert_eq!(a.result, CommitResult::Accepted);
        let b = log.commit(transform_at(2.0, 42));
        assert_eq!(b.result, CommitResult::Coalesced);
        assert_eq!(b.commit_id, a.commit_id);

        let truth = log.entity_state(subject()).expect("truth");
        assert_eq!(
            truth.transform.map(|t| t.position),
            Some(Vec3::new(2.0, 0.0, 0.0))
        );
        // Counter advanced exactly once across the pair.
        assert_eq!(log.latest_commit_id(), a.commit_id);
        assert_eq!(truth.recent_commits.len(), 1);
    }

    #[test]
    fn same_tick_fold_is_still_constraint_checked() {
        let (log, _) = log();
        let first = log.commit(transform_at(1.0, 42));
        assert_eq!(first.result, CommitResult::Accepted);

        // A same-tick teleport must not slip into the stored commit via the
        // coalesce path.
        let jump = log.commit(transform_at(100.0, 42));
        assert_eq!(jump.result, CommitResult::Rejected);
        assert_eq!(jump.commit_id, REJECTED_COMMIT_ID);
        assert!(jump.reason.as_deref().is_some_and(|r| r.contains("Teleport")));

        let stored = log.commits_for_entity(subject(), None);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].result, CommitResult::Accepted);
        assert_eq!(
            stored[0].payload.as_transform().map(|t| t.position),
            Some(Vec3::new(1.0, 0.0, 0.0))
        );
        assert_eq!(log.latest_commit_id(), first.commit_id);

        // An in-budget same-tick payload still folds normally afterwards.
        let folded = log.commit(transform_at(30.0, 42));
        assert_eq!(folded.result, CommitResult::Coalesced);
        assert_eq!(folded.commit_id, first.commit_id);
        let stored = log.commits_for_entity(subject(), None);
        assert_eq!(
            stored[0].payload.as_transform().map(|t| t.position),
            Some(Vec3::new(30.0, 0.0, 0.0))
        );
    }

    #[test]
    fn same_tick_health_fold_respects_range() {
        let (log, _) = log();
        let health = |current, tick| {
            log.commit(CommitRequest {
                payload: SchemaPayload::Health {
                    current,
                    maximum: 100.0,
                },
                ..transform_at(0.0, tick)
            })
        };
        let first = health(90.0, 7);
        assert_eq!(first.result, CommitResult::Accepted);

        let overfull = health(500.0, 7);
        assert_eq!(overfull.result, CommitResult::Rejected);
        assert!(overfull
            .reason
            .as_deref()
            .is_some_and(|r| r.contains("HealthRange")));

        let stored = log.commits_for_entity(subject(), None);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].result, CommitResult::Accepted);
        assert_eq!(stored[0].payload.as_health(), Some((90.0, 100.0)));
        let truth = log.entity_state(subject()).expect("truth");
        assert_eq!(truth.health.map(|h| h.current), Some(90.0));
    }

    #[test]
    fn events_never_coalesce_but_identical_ones_dedup() {
        let (log, _) = log();
        let event = |tick| {
            log.commit(CommitRequest {
                op: CommitOp::Event,
                payload: SchemaPayload::Despawn {
                    reason: crate::schema::DespawnReason::Death,
                },
                ..transform_at(0.0, tick)
            })
        };
        let a = event(5);
        assert_eq!(a.result, CommitResult::Accepted);
        let b = event(5);
        assert_eq!(b.result, CommitResult::Coalesced);
        assert_eq!(b.commit_id, a.commit_id);
        // Next tick the same event is fresh again.
        let c = event(6);
        assert_eq!(c.result, CommitResult::Accepted);
        assert_ne!(c.commit_id, a.commit_id);
    }

    #[test]
    fn authority_denied_is_a_rejected_commit() {
        let (log, _) = log();
        let denied = log.commit(CommitRequest {
            owner: AuthorityOwner::Client,
            owner_id: source(),
            ..transform_at(0.0, 0)
        });
        assert_eq!(denied.result, CommitResult::Rejected);
        assert!(denied
            .reason
            .as_deref()
            .is_some_and(|r| r.contains("AuthorityDenied")));
    }

    #[test]
    fn stale_tick_is_rejected() {
        let (log, _) = log();
        let _ = log.commit(transform_at(0.0, 10));
        let stale = log.commit(transform_at(1.0, 9));
        assert_eq!(stale.result, CommitResult::Rejected);
        assert!(stale
            .reason
            .as_deref()
            .is_some_and(|r| r.contains("StaleTick")));
    }

    #[test]
    fn snapshots_taken_on_interval_and_capped() {
        let tracker = Arc::new(AuthorityTracker::new());
        tracker
            .publish(
                subject(),
                AuthorityCoordinate::server(AuthorityScope::ALL, 1, 0),
            )
            .expect("grant");
        let log = TruthLog::new(
            TruthLogConfig {
                capacity: DEFAULT_LOG_CAPACITY,
                snapshot_interval: 10,
            },
            tracker,
        );
        for i in 0..200 {
            let _ = log.commit(transform_at(i as f32 * 0.1, i));
        }
        assert_eq!(log.snapshot_count(), SNAPSHOT_RETENTION);
        let latest = log.latest_snapshot().expect("snapshot");
        assert_eq!(latest.commit_id, 200);
    }

    #[test]
    fn replay_reproduces_state_at_commit() {
        let tracker = Arc::new(AuthorityTracker::new());
        tracker
            .publish(
                subject(),
                AuthorityCoordinate::server(AuthorityScope::ALL, 1, 0),
            )
            .expect("grant");
        let log = TruthLog::new(
            TruthLogConfig {
                capacity: DEFAULT_LOG_CAPACITY,
                snapshot_interval: 5,
            },
            tracker,
        );

        let mut states = Vec::new();
        for i in 0..20 {
            let c = log.commit(transform_at(i as f32, i));
            assert_eq!(c.result, CommitResult::Accepted);
            states.push((c.commit_id, log.entity_state(subject()).expect("truth")));
        }

        for (commit_id, live) in states {
            let rebuilt = log.reconstruct_at(commit_id).expect("replayable");
            assert_eq!(rebuilt.get(&subject()), Some(&live), "at commit {commit_id}");
        }
    }

    #[test]
    fn replay_out_of_range_is_absent() {
        let (log, _) = log();
        let _ = log.commit(transform_at(0.0, 0));
        assert!(log.reconstruct_at(99).is_none());
        assert!(log.reconstruct_at(-5).is_none());
    }

    #[test]
    fn despawn_removes_truth_deterministically() {
        let (log, _) = log();
        let _ = log.commit(transform_at(0.0, 0));
        let d = log.commit(CommitRequest {
            op: CommitOp::Despawn,
            payload: SchemaPayload::Despawn {
                reason: crate::schema::DespawnReason::Death,
            },
            ..transform_at(0.0, 1)
        });
        assert_eq!(d.result, CommitResult::Accepted);
        assert!(log.entity_state(subject()).is_none());

        let rebuilt = log.reconstruct_at(d.commit_id).expect("replayable");
        assert!(!rebuilt.contains_key(&subject()));
    }

    #[test]
    fn commit_queries_slice_the_log() {
        let (log, _) = log();
        for i in 0..5 {
            let _ = log.commit(transform_at(i as f32, i));
        }
        assert_eq!(log.commits_since(3).len(), 2);
        assert_eq!(log.commits_for_entity(subject(), Some(2)).len(), 3);
        assert_eq!(log.commits_in_tick_range(1, 3).len(), 3);
    }
}
