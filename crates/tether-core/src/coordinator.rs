// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The coordinator: the measure → decide → actuate → verify control loop.
//!
//! One cycle is one tick. In order: advance the clock, drain the info ring
//! (bounded), commit what the confidence engine accepts, apply accepted
//! commits through the memory actuator, queue read-back verifications, and
//! process the verifications that have come due. A cycle runs to completion
//! once started; cancellation is honoured between cycles.
//!
//! The coordinator owns scheduling and nothing else: rings own their
//! buffers, the tracker owns authority, and all cross-component movement is
//! enqueue-then-consume.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::actuator::{ActuatorError, MemoryActuator, MemoryHandle};
use crate::attribute::AttributeRing;
use crate::authority::{AuthorityOwner, AuthorityScope};
use crate::clock::{Tick, TickClock};
use crate::config::CoreConfig;
use crate::container::ContainerRing;
use crate::confidence::ConfidenceDecision;
use crate::ident::{EntityKind, NetId};
use crate::info::{InfoEntry, InfoKind, InfoRing, InfoStatus};
use crate::math::{Quat, Vec3};
use crate::resolve::{ReadResolver, ResponseBus};
use crate::schema::{SchemaKind, SchemaPayload};
use crate::space::{SpaceFrame, SpaceResolver};
use crate::truth::{
    scope_for, Commit, CommitId, CommitOp, CommitRequest, CommitResult, TruthLog, TruthLogConfig,
};

/// Verification entries retained at most; beyond this the oldest is dropped.
const VERIFICATION_QUEUE_CAP: usize = 4096;

/// Cycle reports retained for diagnostics.
const CYCLE_HISTORY_CAP: usize = 256;

/// Ticks between maintenance sweeps (reliability drift, info expiry).
const MAINTENANCE_INTERVAL: Tick = 128;

/// Bookkeeping for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Tick this cycle ran at.
    pub tick: Tick,
    /// Monotone cycle counter.
    pub cycle_count: u64,
    /// Info entries drained.
    pub observations_processed: usize,
    /// Commits accepted (including coalesced folds).
    pub committed: usize,
    /// Observations rejected (confidence or commit).
    pub rejected: usize,
    /// Observations deferred or waiting for more samples.
    pub deferred: usize,
    /// Immediate (snap) actuator writes.
    pub snaps: usize,
    /// Verifications that matched.
    pub verifications_ok: usize,
    /// Verifications that failed.
    pub verifications_failed: usize,
    /// Wall time spent in the cycle.
    pub processing_ms: f64,
    /// First error encountered, informational only.
    pub error: Option<String>,
}

/// The six sanity answers for a live entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SanityReport {
    /// Who is it?
    pub who: NetId,
    /// When is this true? `(tick, commit id)` of the newest truth.
    pub when: (Tick, CommitId),
    /// Who decided it? Owner class and authority epoch.
    pub who_decided: (AuthorityOwner, u32),
    /// What does it mean? Last operation and schema.
    pub what: (CommitOp, SchemaKind),
    /// In what frame?
    pub frame: SpaceFrame,
    /// How sure are we? Confidence at the last accepted submission.
    pub how_sure: f32,
}

#[derive(Debug, Clone)]
struct PendingVerification {
    subject: NetId,
    commit_id: CommitId,
    expected_position: Vec3,
    source: NetId,
    verify_at_tick: Tick,
}

/// The control loop and its wiring.
pub struct Coordinator {
    config: CoreConfig,
    clock: TickClock,
    container: Arc<ContainerRing>,
    info_ring: Arc<InfoRing>,
    truth: Arc<TruthLog>,
    attributes: Arc<AttributeRing>,
    resolver: Arc<ReadResolver>,
    bus: Arc<ResponseBus>,
    actuator: Arc<dyn MemoryActuator>,
    space: SpaceResolver,
    cancel: Arc<AtomicBool>,
    verifications: Mutex<VecDeque<PendingVerification>>,
    last_confidence: Mutex<FxHashMap<NetId, f32>>,
    history: Mutex<VecDeque<CycleReport>>,
    cycle_count: AtomicU64,
}

impl Coordinator {
    /// Builds a coordinator and all four rings from `config`.
    #[must_use]
    pub fn new(config: CoreConfig, actuator: Arc<dyn MemoryActuator>) -> Self {
        let tracker = Arc::new(crate::authority::AuthorityTracker::new());
        let container = Arc::new(ContainerRing::new(
            &config.pools,
            config.container_event_capacity,
            tracker.clone(),
        ));
        let ledger = Arc::new(crate::confidence::ReliabilityLedger::new());
        let info_ring = Arc::new(InfoRing::new(
            config.info_ring_capacity,
            ledger,
            config.freshness_half_life,
        ));
        let truth = Arc::new(TruthLog::new(
            TruthLogConfig {
                capacity: config.authority_ring_capacity,
                snapshot_interval: config.snapshot_interval,
            },
            tracker,
        ));
        let attributes = Arc::new(AttributeRing::new(config.gate));
        let resolver = Arc::new(ReadResolver::new(truth.clone(), attributes.clone()));
        let bus = Arc::new(ResponseBus::new(resolver.clone()));
        let clock = TickClock::new(config.tick_rate_hz);
        Self {
            config,
            clock,
            container,
            info_ring,
            truth,
            attributes,
            resolver,
            bus,
            actuator,
            space: SpaceResolver::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            verifications: Mutex::new(VecDeque::new()),
            last_confidence: Mutex::new(FxHashMap::default()),
            history: Mutex::new(VecDeque::new()),
            cycle_count: AtomicU64::new(0),
        }
    }

    /// The tick clock.
    #[must_use]
    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Ring 1.
    #[must_use]
    pub fn container(&self) -> &Arc<ContainerRing> {
        &self.container
    }

    /// Ring 2.
    #[must_use]
    pub fn info_ring(&self) -> &Arc<InfoRing> {
        &self.info_ring
    }

    /// Ring 3.
    #[must_use]
    pub fn truth(&self) -> &Arc<TruthLog> {
        &self.truth
    }

    /// Ring 4.
    #[must_use]
    pub fn attributes(&self) -> &Arc<AttributeRing> {
        &self.attributes
    }

    /// The read resolver.
    #[must_use]
    pub fn resolver(&self) -> &Arc<ReadResolver> {
        &self.resolver
    }

    /// The preconditioning bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<ResponseBus> {
        &self.bus
    }

    /// Cancellation handle; shared with whoever drives [`Coordinator::run`].
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Requests loop shutdown after the current cycle.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Registers an entity through Ring 1 and seeds its truth when an
    /// initial payload is supplied.
    #[allow(clippy::too_many_arguments)]
    pub fn register_entity(
        &self,
        kind: EntityKind,
        handle: MemoryHandle,
        frame: SpaceFrame,
        owner: AuthorityOwner,
        owner_id: NetId,
        scope: AuthorityScope,
        template_id: Option<u32>,
        initial: Option<SchemaPayload>,
    ) -> Result<NetId, crate::container::ContainerError> {
        let tick = self.clock.tick();
        let id = self
            .container
            .register(kind, handle, frame, owner, owner_id, scope, tick, template_id)?;
        if let Some(payload) = initial {
            let commit = self.truth.commit(CommitRequest {
                subject: id,
                op: CommitOp::Spawn,
                payload,
                tick,
                source_id: NetId::INVALID,
                owner,
                owner_id,
            });
            if matches!(commit.result, CommitResult::Accepted) {
                self.absorb_accepted_commit(&commit);
                self.last_confidence.lock().insert(id, 1.0);
            }
        }
        Ok(id)
    }

    /// Unregisters an entity: records a despawn commit, removes it from
    /// Ring 1, and drops its presentation state.
    pub fn unregister_entity(
        &self,
        id: NetId,
        reason: crate::schema::DespawnReason,
    ) -> Result<(), crate::container::ContainerError> {
        let tick = self.clock.tick();
        let entry = self
            .container
            .get(id)
            .ok_or(crate::container::ContainerError::Unknown(id))?;
        let _ = self.truth.commit(CommitRequest {
            subject: id,
            op: CommitOp::Despawn,
            payload: SchemaPayload::Despawn { reason },
            tick,
            source_id: NetId::INVALID,
            owner: entry.authority.owner,
            owner_id: entry.authority.owner_id,
        });
        self.container.unregister(id, tick, reason)?;
        self.attributes.remove_entity(id);
        self.resolver.cache().invalidate_subject(id);
        self.last_confidence.lock().remove(&id);
        Ok(())
    }

    /// Runs one full cycle and returns its report.
    pub fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let tick = self.clock.advance();
        self.bus.begin_tick(tick);
        let cycle_count = self.cycle_count.fetch_add(1, Ordering::AcqRel) + 1;

        let mut report = CycleReport {
            tick,
            cycle_count,
            ..CycleReport::default()
        };

        let applied = self.drain_info(tick, &mut report);
        self.queue_verifications(tick, &applied);
        self.process_due_verifications(tick, &mut report);

        if tick % MAINTENANCE_INTERVAL == 0 {
            self.run_maintenance(tick);
        }

        report.processing_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(
            tick,
            processed = report.observations_processed,
            committed = report.committed,
            rejected = report.rejected,
            "cycle complete"
        );
        if report.error.is_some() {
            info!(tick, error = ?report.error, "cycle finished with error");
        }

        let mut history = self.history.lock();
        if history.len() == CYCLE_HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(report.clone());
        report
    }

    /// Runs cycles at the configured tick rate until cancelled.
    pub fn run(&self) {
        let period = self.clock.tick_duration();
        while !self.cancel.load(Ordering::Acquire) {
            let report = self.run_cycle();
            let spent = std::time::Duration::from_secs_f64(report.processing_ms / 1000.0);
            if let Some(remaining) = period.checked_sub(spent) {
                std::thread::sleep(remaining);
            }
        }
        info!("coordinator loop cancelled");
    }

    /// Recent cycle reports, oldest first.
    #[must_use]
    pub fn recent_cycles(&self) -> Vec<CycleReport> {
        self.history.lock().iter().cloned().collect()
    }

    /// Answers the six sanity questions for a live entity.
    #[must_use]
    pub fn describe(&self, id: NetId) -> Option<SanityReport> {
        let entry = self.container.get(id)?;
        let truth = self.truth.entity_state(id);
        let (when, what) = truth.as_ref().map_or(
            ((entry.spawn_tick, 0), (CommitOp::Spawn, SchemaKind::Transform)),
            |t| ((t.last_tick, t.last_commit_id), (t.last_op, t.last_schema)),
        );
        let how_sure = self
            .last_confidence
            .lock()
            .get(&id)
            .copied()
            .unwrap_or(1.0);
        Some(SanityReport {
            who: id,
            when,
            who_decided: (entry.authority.owner, entry.authority.epoch),
            what,
            frame: entry.frame,
            how_sure,
        })
    }

    // ── Cycle stages ────────────────────────────────────────────────

    fn drain_info(&self, tick: Tick, report: &mut CycleReport) -> Vec<Commit> {
        let mut applied = Vec::new();
        for _ in 0..self.config.max_infos_per_cycle {
            let Some(entry) = self.info_ring.dequeue() else {
                break;
            };
            report.observations_processed += 1;

            // Predictions and queries are advisory; they never reach the log.
            if matches!(entry.kind, InfoKind::Prediction | InfoKind::Query) {
                let _ = self.info_ring.resolve(entry.id, InfoStatus::Deferred);
                report.deferred += 1;
                continue;
            }

            let confidence = entry
                .confidence
                .decayed(tick - entry.receive_tick, self.config.freshness_half_life);
            match confidence.decide(&self.config.thresholds) {
                ConfidenceDecision::Accept => {
                    self.commit_entry(&entry, confidence.effective(), tick, report, &mut applied);
                }
                ConfidenceDecision::Reject => {
                    let _ = self.info_ring.resolve(entry.id, InfoStatus::Rejected);
                    self.info_ring.ledger().note_rejected(entry.source);
                    self.info_ring.provide_feedback(entry.source, false, tick);
                    report.rejected += 1;
                }
                ConfidenceDecision::Defer | ConfidenceDecision::RequestMoreSamples => {
                    let _ = self.info_ring.resolve(entry.id, InfoStatus::Deferred);
                    self.info_ring.ledger().note_deferred(entry.source);
                    report.deferred += 1;
                }
            }
        }
        applied
    }

    fn commit_entry(
        &self,
        entry: &InfoEntry,
        effective_confidence: f32,
        tick: Tick,
        report: &mut CycleReport,
        applied: &mut Vec<Commit>,
    ) {
        let op = match entry.kind {
            InfoKind::Event => CommitOp::Event,
            _ => CommitOp::Set,
        };
        // The writer claims the owner class currently holding the scope; a
        // client grant then additionally pins the owner id to the source.
        let scope = scope_for(entry.schema);
        let owner = self
            .container
            .tracker()
            .authority_of(entry.subject, scope)
            .map_or(AuthorityOwner::Server, |c| c.owner);
        let commit = self.truth.commit(CommitRequest {
            subject: entry.subject,
            op,
            payload: entry.payload.clone(),
            tick: entry.observation_tick,
            source_id: entry.source,
            owner,
            owner_id: entry.source,
        });
        match commit.result {
            CommitResult::Accepted | CommitResult::Coalesced => {
                let _ = self.info_ring.resolve(entry.id, InfoStatus::Accepted);
                self.info_ring.ledger().note_accepted(entry.source);
                self.info_ring.provide_feedback(entry.source, true, tick);
                self.last_confidence
                    .lock()
                    .insert(entry.subject, effective_confidence);
                self.absorb_accepted_commit(&commit);
                report.committed += 1;
                if self.apply_commit(&commit, entry.kind, report) {
                    applied.push(commit);
                }
            }
            CommitResult::Rejected => {
                let _ = self.info_ring.resolve(entry.id, InfoStatus::Rejected);
                self.info_ring.ledger().note_rejected(entry.source);
                self.info_ring.provide_feedback(entry.source, false, tick);
                report.rejected += 1;
            }
            CommitResult::Deferred => {
                let _ = self.info_ring.resolve(entry.id, InfoStatus::Deferred);
                report.deferred += 1;
            }
        }
    }

    /// Pushes an accepted commit into presentation state and invalidates
    /// cached reads about its subject.
    fn absorb_accepted_commit(&self, commit: &Commit) {
        match &commit.payload {
            SchemaPayload::Transform(t) => {
                self.attributes.push_transform(commit.subject, commit.tick, *t);
            }
            SchemaPayload::Health { current, .. } => {
                self.attributes
                    .push_scalar(commit.subject, SchemaKind::Health, commit.tick, *current);
            }
            _ => {}
        }
        self.resolver.cache().invalidate_subject(commit.subject);
    }

    /// Applies a commit to game memory. Returns true when a transform write
    /// went out (and therefore needs verification).
    fn apply_commit(&self, commit: &Commit, kind: InfoKind, report: &mut CycleReport) -> bool {
        let Some(entry) = self.container.get(commit.subject) else {
            return false;
        };
        if entry.memory_handle.is_invalid() {
            return false;
        }
        match &commit.payload {
            SchemaPayload::Transform(t) => {
                let truth = self.truth.clone();
                let lookup = move |id: NetId| truth.transform_of(id);
                let world = self.space.to_world(*t, &lookup);
                if world.orphaned {
                    debug!(subject = %commit.subject, "transform resolved through absent parent");
                }
                let (pos, rot) = (world.transform.position, world.transform.rotation);
                // Corrections snap; ordinary observations go through the
                // game's own smoothing.
                let result = if kind == InfoKind::Correction {
                    report.snaps += 1;
                    self.actuator
                        .write_transform_immediate(entry.memory_handle, pos, rot)
                } else {
                    self.actuator.write_transform(entry.memory_handle, pos, rot)
                };
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        self.note_cycle_error(report, &e, commit.subject);
                        false
                    }
                }
            }
            SchemaPayload::Health { current, maximum } => {
                if let Err(e) =
                    self.actuator
                        .write_health(entry.memory_handle, *current, *maximum)
                {
                    self.note_cycle_error(report, &e, commit.subject);
                }
                false
            }
            _ => false,
        }
    }

    fn note_cycle_error(&self, report: &mut CycleReport, error: &ActuatorError, subject: NetId) {
        warn!(subject = %subject, %error, "actuator write failed");
        if report.error.is_none() {
            report.error = Some(format!("{subject}: {error}"));
        }
    }

    fn queue_verifications(&self, tick: Tick, applied: &[Commit]) {
        let truth = self.truth.clone();
        let lookup = move |id: NetId| truth.transform_of(id);
        let mut queue = self.verifications.lock();
        for commit in applied {
            let Some(t) = commit.payload.as_transform() else {
                continue;
            };
            let world = self.space.to_world(*t, &lookup);
            if queue.len() == VERIFICATION_QUEUE_CAP {
                queue.pop_front();
            }
            queue.push_back(PendingVerification {
                subject: commit.subject,
                commit_id: commit.commit_id,
                expected_position: world.transform.position,
                source: commit.source_id,
                verify_at_tick: tick + 1,
            });
        }
    }

    fn process_due_verifications(&self, tick: Tick, report: &mut CycleReport) {
        let due: Vec<PendingVerification> = {
            let mut queue = self.verifications.lock();
            let mut due = Vec::new();
            let mut rest = VecDeque::new();
            while let Some(v) = queue.pop_front() {
                if v.verify_at_tick <= tick {
                    due.push(v);
                } else {
                    rest.push_back(v);
                }
            }
            *queue = rest;
            due
        };

        for v in due {
            let Some(entry) = self.container.get(v.subject) else {
                // Despawned before verification came due; nothing to check.
                continue;
            };
            match self.read_back_with_retry(entry.memory_handle) {
                Ok(Some((pos, _rot))) => {
                    let distance = pos.distance(v.expected_position);
                    if distance > self.config.verification_threshold {
                        warn!(
                            subject = %v.subject,
                            commit = v.commit_id,
                            distance,
                            "verification failed: memory diverged from committed truth"
                        );
                        self.fail_verification(&v, tick, report);
                    } else {
                        report.verifications_ok += 1;
                    }
                }
                Ok(None) => self.fail_verification(&v, tick, report),
                Err(e) => {
                    warn!(subject = %v.subject, %e, "verification read failed");
                    self.fail_verification(&v, tick, report);
                }
            }
        }
    }

    /// One retry on actuator errors before the failure counts.
    fn read_back_with_retry(
        &self,
        handle: MemoryHandle,
    ) -> Result<Option<(Vec3, Quat)>, ActuatorError> {
        match self.actuator.read_transform(handle) {
            Err(_) => self.actuator.read_transform(handle),
            ok => ok,
        }
    }

    fn fail_verification(&self, v: &PendingVerification, tick: Tick, report: &mut CycleReport) {
        report.verifications_failed += 1;
        self.info_ring.ledger().note_verification_failure(v.source);
        self.info_ring.provide_feedback(v.source, false, tick);
    }

    fn run_maintenance(&self, tick: Tick) {
        self.info_ring.ledger().sweep_idle(tick - 2 * MAINTENANCE_INTERVAL);
        let expiry = (self.config.freshness_half_life * 4.0) as Tick;
        let expired = self.info_ring.expire_older_than(tick - expiry);
        if expired > 0 {
            debug!(tick, expired, "expired stale pending observations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::ConfidenceFlags;
    use crate::info::InfoSubmission;
    use crate::space::FramedTransform;
    use parking_lot::Mutex as PlMutex;

    /// Scripted in-memory actuator: records writes, serves reads.
    #[derive(Default)]
    struct ScriptedActuator {
        transforms: PlMutex<FxHashMap<MemoryHandle, (Vec3, Quat)>>,
        soft_writes: PlMutex<Vec<(MemoryHandle, Vec3)>>,
        snap_writes: PlMutex<Vec<(MemoryHandle, Vec3)>>,
    }

    impl MemoryActuator for ScriptedActuator {
        fn read_transform(
            &self,
            handle: MemoryHandle,
        ) -> Result<Option<(Vec3, Quat)>, ActuatorError> {
            Ok(self.transforms.lock().get(&handle).copied())
        }

        fn read_health(&self, _: MemoryHandle) -> Result<Option<(f32, f32)>, ActuatorError> {
            Ok(None)
        }

        fn write_transform(
            &self,
            handle: MemoryHandle,
            position: Vec3,
            rotation: Quat,
        ) -> Result<(), ActuatorError> {
            self.transforms.lock().insert(handle, (position, rotation));
            self.soft_writes.lock().push((handle, position));
            Ok(())
        }

        fn write_transform_immediate(
            &self,
            handle: MemoryHandle,
            position: Vec3,
            rotation: Quat,
        ) -> Result<(), ActuatorError> {
            self.transforms.lock().insert(handle, (position, rotation));
            self.snap_writes.lock().push((handle, position));
            Ok(())
        }

        fn write_health(&self, _: MemoryHandle, _: f32, _: f32) -> Result<(), ActuatorError> {
            Ok(())
        }
    }

    fn coordinator() -> (Coordinator, Arc<ScriptedActuator>) {
        let actuator = Arc::new(ScriptedActuator::default());
        (
            Coordinator::new(CoreConfig::default(), actuator.clone()),
            actuator,
        )
    }

    fn spawn_player(c: &Coordinator, handle: MemoryHandle) -> NetId {
        c.register_entity(
            EntityKind::Player,
            handle,
            SpaceFrame::World,
            AuthorityOwner::Server,
            NetId::INVALID,
            AuthorityScope::ALL,
            None,
            Some(SchemaPayload::Transform(FramedTransform::world(
                Vec3::ZERO,
                Quat::IDENTITY,
                Vec3::ZERO,
            ))),
        )
        .expect("register")
    }

    fn observe(c: &Coordinator, subject: NetId, x: f32, tick: Tick) {
        let _ = c.info_ring().enqueue(
            InfoSubmission {
                subject,
                source: NetId::INVALID,
                kind: InfoKind::Observation,
                payload: SchemaPayload::Transform(FramedTransform::world(
                    Vec3::new(x, 0.0, 0.0),
                    Quat::IDENTITY,
                    Vec3::ZERO,
                )),
                observation_tick: tick,
                value_score: 1.0,
                flags: ConfidenceFlags::FORCED_ACCEPT,
            },
            tick,
        );
    }

    #[test]
    fn cycle_drains_commits_and_applies() {
        let (c, actuator) = coordinator();
        let handle = MemoryHandle(0x10);
        let subject = spawn_player(&c, handle);

        observe(&c, subject, 1.0, c.clock().tick());
        let report = c.run_cycle();

        assert_eq!(report.observations_processed, 1);
        assert_eq!(report.committed, 1);
        assert_eq!(report.rejected, 0);
        assert_eq!(actuator.soft_writes.lock().len(), 1);

        let truth = c.truth().entity_state(subject).expect("truth");
        assert_eq!(
            truth.transform.map(|t| t.position),
            Some(Vec3::new(1.0, 0.0, 0.0))
        );
    }

    #[test]
    fn corrections_snap_instead_of_smoothing() {
        let (c, actuator) = coordinator();
        let handle = MemoryHandle(0x11);
        let subject = spawn_player(&c, handle);

        let tick = c.clock().tick();
        let _ = c.info_ring().enqueue(
            InfoSubmission {
                subject,
                source: NetId::INVALID,
                kind: InfoKind::Correction,
                payload: SchemaPayload::Transform(FramedTransform::world(
                    Vec3::new(2.0, 0.0, 0.0),
                    Quat::IDENTITY,
                    Vec3::ZERO,
                )),
                observation_tick: tick,
                value_score: 1.0,
                flags: ConfidenceFlags::FORCED_ACCEPT,
            },
            tick,
        );
        let report = c.run_cycle();
        assert_eq!(report.snaps, 1);
        assert_eq!(actuator.snap_writes.lock().len(), 1);
    }

    #[test]
    fn verification_passes_when_memory_matches() {
        let (c, _actuator) = coordinator();
        let handle = MemoryHandle(0x12);
        let subject = spawn_player(&c, handle);

        observe(&c, subject, 1.0, c.clock().tick());
        let first = c.run_cycle();
        assert_eq!(first.committed, 1);
        // The scripted actuator reflects writes back, so the read-back at
        // tick+1 matches.
        let second = c.run_cycle();
        assert_eq!(second.verifications_ok, 1);
        assert_eq!(second.verifications_failed, 0);
    }

    #[test]
    fn verification_failure_degrades_source_reliability() {
        let (c, actuator) = coordinator();
        let handle = MemoryHandle(0x13);
        let subject = spawn_player(&c, handle);
        let source = NetId::pack(EntityKind::Player, 5, 1);

        let tick = c.clock().tick();
        let _ = c.info_ring().enqueue(
            InfoSubmission {
                subject,
                source,
                kind: InfoKind::Observation,
                payload: SchemaPayload::Transform(FramedTransform::world(
                    Vec3::new(1.0, 0.0, 0.0),
                    Quat::IDENTITY,
                    Vec3::ZERO,
                )),
                observation_tick: tick,
                value_score: 1.0,
                flags: ConfidenceFlags::FORCED_ACCEPT,
            },
            tick,
        );
        let before = c.info_ring().ledger().reliability_of(source);
        let _ = c.run_cycle();
        // Sabotage memory between write and verification.
        actuator
            .transforms
            .lock()
            .insert(handle, (Vec3::new(50.0, 0.0, 0.0), Quat::IDENTITY));
        let report = c.run_cycle();
        assert_eq!(report.verifications_failed, 1);
        let after = c.info_ring().ledger().reliability_of(source);
        assert!(after < before);
        assert_eq!(
            c.info_ring()
                .ledger()
                .stats_of(source)
                .map(|s| s.verification_failures),
            Some(1)
        );
    }

    #[test]
    fn low_confidence_observations_are_rejected_with_feedback() {
        let (c, _) = coordinator();
        let subject = spawn_player(&c, MemoryHandle(0x14));
        let source = NetId::pack(EntityKind::Player, 6, 1);

        let tick = c.clock().tick();
        let _ = c.info_ring().enqueue(
            InfoSubmission {
                subject,
                source,
                kind: InfoKind::Observation,
                payload: SchemaPayload::Transform(FramedTransform::world(
                    Vec3::new(1.0, 0.0, 0.0),
                    Quat::IDENTITY,
                    Vec3::ZERO,
                )),
                observation_tick: tick,
                value_score: 0.05,
                flags: ConfidenceFlags::NONE,
            },
            tick,
        );
        let report = c.run_cycle();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.committed, 0);
        assert!(c.info_ring().ledger().reliability_of(source) < 0.5);
    }

    #[test]
    fn sanity_answers_are_complete_for_live_entities() {
        let (c, _) = coordinator();
        let subject = spawn_player(&c, MemoryHandle(0x15));
        observe(&c, subject, 1.0, c.clock().tick());
        let _ = c.run_cycle();

        let sanity = c.describe(subject).expect("live entity");
        assert_eq!(sanity.who, subject);
        assert!(sanity.when.0 >= 0);
        assert!(sanity.when.1 >= 1);
        assert_eq!(sanity.who_decided.0, AuthorityOwner::Server);
        assert!(sanity.who_decided.1 >= 1);
        assert_eq!(sanity.what.0, CommitOp::Set);
        assert_eq!(sanity.what.1, SchemaKind::Transform);
        assert_eq!(sanity.frame, SpaceFrame::World);
        assert!(sanity.how_sure > 0.0);
    }

    #[test]
    fn unregister_clears_presentation_and_identity() {
        let (c, _) = coordinator();
        let subject = spawn_player(&c, MemoryHandle(0x16));
        observe(&c, subject, 1.0, c.clock().tick());
        let _ = c.run_cycle();

        c.unregister_entity(subject, crate::schema::DespawnReason::Death)
            .expect("unregister");
        assert!(!c.container().is_alive(subject));
        assert!(c.truth().entity_state(subject).is_none());
        assert!(c.describe(subject).is_none());
        assert_eq!(c.attributes().newest_transform_tick(subject), None);
    }

    #[test]
    fn drain_respects_per_cycle_cap() {
        let config = CoreConfig {
            max_infos_per_cycle: 3,
            ..CoreConfig::default()
        };
        let c = Coordinator::new(config, Arc::new(ScriptedActuator::default()));
        let subject = spawn_player(&c, MemoryHandle(0x17));
        for i in 0..10 {
            observe(&c, subject, i as f32 * 0.1, c.clock().tick());
        }
        let report = c.run_cycle();
        assert_eq!(report.observations_processed, 3);
        assert_eq!(c.info_ring().stats().pending, 7);
    }

    #[test]
    fn cancelled_loop_stops() {
        let (c, _) = coordinator();
        c.cancel();
        // Returns immediately; no cycle runs.
        c.run();
        assert!(c.recent_cycles().is_empty());
    }
}
