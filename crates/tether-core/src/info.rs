// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ring 2 — the info ring: the inbox of untrusted observations.
//!
//! Inputs, observations, proposals, and corrections from every source land
//! here, get scored by the confidence engine, and wait for the coordinator's
//! per-tick drain. The ring is bounded: when full, the oldest entry is
//! evicted and counted — ingest never aborts. Entries keep per-subject FIFO
//! order; cross-subject ordering is not guaranteed.
//!
//! Status transitions are single-writer: an entry leaves `Pending` exactly
//! once, through [`InfoRing::resolve`].

use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::clock::{Tick, TickRange};
use crate::confidence::{Confidence, ConfidenceFlags, ReliabilityLedger};
use crate::ident::NetId;
use crate::schema::{PayloadHash, SchemaKind, SchemaPayload};

/// Default ring capacity.
pub const DEFAULT_INFO_CAPACITY: usize = 16_384;

/// Monotone identifier of an info entry.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InfoId(pub u64);

impl fmt::Debug for InfoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "info#{}", self.0)
    }
}

/// What kind of message an info entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfoKind {
    /// Player input sample.
    Input,
    /// Remote observation of entity state.
    Observation,
    /// Discrete game event.
    Event,
    /// Proposed state change awaiting authority.
    Proposal,
    /// Client-side prediction, advisory.
    Prediction,
    /// Read request routed through the ring.
    Query,
    /// Correction for previously reported state.
    Correction,
}

/// Lifecycle state of an info entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfoStatus {
    /// Awaiting the coordinator drain.
    Pending,
    /// Accepted and committed.
    Accepted,
    /// Rejected by confidence or constraints.
    Rejected,
    /// Parked for more evidence.
    Deferred,
    /// Overtaken by a newer entry before processing.
    Superseded,
    /// Aged out before processing.
    Expired,
}

/// One scored observation in the ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoEntry {
    /// Monotone id (arrival order).
    pub id: InfoId,
    /// Entity the observation is about.
    pub subject: NetId,
    /// Who reported it.
    pub source: NetId,
    /// Message kind.
    pub kind: InfoKind,
    /// Payload schema.
    pub schema: SchemaKind,
    /// Normalised payload.
    pub payload: SchemaPayload,
    /// Tick the source claims to have observed the state.
    pub observation_tick: Tick,
    /// Tick the ring received it.
    pub receive_tick: Tick,
    /// Confidence at receive time.
    pub confidence: Confidence,
    /// Content hash of the normalised payload.
    pub payload_hash: PayloadHash,
    /// Lifecycle status.
    pub status: InfoStatus,
}

/// Ingest parameters for one observation.
#[derive(Debug, Clone)]
pub struct InfoSubmission {
    /// Entity the observation is about.
    pub subject: NetId,
    /// Reporting source.
    pub source: NetId,
    /// Message kind.
    pub kind: InfoKind,
    /// Raw payload; normalised on ingest.
    pub payload: SchemaPayload,
    /// Tick the source observed the state.
    pub observation_tick: Tick,
    /// Source's claimed plausibility of the value, `[0, 1]`.
    pub value_score: f32,
    /// Forced-decision flags.
    pub flags: ConfidenceFlags,
}

/// Query filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct InfoFilter {
    /// Match a specific subject.
    pub subject: Option<NetId>,
    /// Match a specific source.
    pub source: Option<NetId>,
    /// Match a message kind.
    pub kind: Option<InfoKind>,
    /// Match a payload schema.
    pub schema: Option<SchemaKind>,
    /// Match observation ticks inside this range.
    pub tick_range: Option<TickRange>,
    /// Match a lifecycle status.
    pub status: Option<InfoStatus>,
    /// Minimum effective confidence.
    pub min_confidence: Option<f32>,
}

impl InfoFilter {
    fn matches(&self, entry: &InfoEntry) -> bool {
        self.subject.is_none_or(|s| entry.subject == s)
            && self.source.is_none_or(|s| entry.source == s)
            && self.kind.is_none_or(|k| entry.kind == k)
            && self.schema.is_none_or(|k| entry.schema == k)
            && self
                .tick_range
                .is_none_or(|r| r.contains(entry.observation_tick))
            && self.status.is_none_or(|s| entry.status == s)
            && self
                .min_confidence
                .is_none_or(|m| entry.confidence.effective() >= m)
    }
}

/// Status-transition failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InfoError {
    /// The entry is not in the ring (never existed or already evicted).
    #[error("unknown info entry {0:?}")]
    Unknown(InfoId),
    /// The entry already left `Pending`.
    #[error("info entry {id:?} already resolved to {status:?}")]
    AlreadyResolved {
        /// Offending entry.
        id: InfoId,
        /// Its settled status.
        status: InfoStatus,
    },
}

/// Ingest/processing counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InfoRingStats {
    /// Total entries ever enqueued.
    pub enqueued: u64,
    /// Entries evicted by capacity pressure.
    pub evicted: u64,
    /// Entries currently pending.
    pub pending: usize,
}

struct InfoState {
    entries: VecDeque<InfoEntry>,
    by_subject: FxHashMap<NetId, VecDeque<InfoId>>,
    next_id: u64,
    drain_cursor: u64,
    enqueued: u64,
    evicted: u64,
}

impl InfoState {
    fn index_of(&self, id: InfoId) -> Option<usize> {
        // Ids are dense arrival order; the front of the deque holds the
        // oldest retained id.
        let front = self.entries.front()?.id.0;
        if id.0 < front {
            return None;
        }
        let idx = (id.0 - front) as usize;
        (idx < self.entries.len()).then_some(idx)
    }
}

/// Ring 2: bounded observation queue with per-subject FIFO.
pub struct InfoRing {
    state: Mutex<InfoState>,
    capacity: usize,
    ledger: Arc<ReliabilityLedger>,
    freshness_half_life: f32,
}

impl InfoRing {
    /// Creates an empty ring.
    ///
    /// `capacity` of zero falls back to [`DEFAULT_INFO_CAPACITY`].
    #[must_use]
    pub fn new(capacity: usize, ledger: Arc<ReliabilityLedger>, freshness_half_life: f32) -> Self {
        Self {
            state: Mutex::new(InfoState {
                entries: VecDeque::new(),
                by_subject: FxHashMap::default(),
                next_id: 0,
                drain_cursor: 0,
                enqueued: 0,
                evicted: 0,
            }),
            capacity: if capacity == 0 {
                DEFAULT_INFO_CAPACITY
            } else {
                capacity
            },
            ledger,
            freshness_half_life,
        }
    }

    /// The shared reliability ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<ReliabilityLedger> {
        &self.ledger
    }

    /// Scores and appends an observation; returns its id.
    ///
    /// When the ring is full the oldest entry is evicted and counted; the
    /// enqueue itself never fails.
    pub fn enqueue(&self, submission: InfoSubmission, receive_tick: Tick) -> InfoId {
        let payload = submission.payload.normalized();
        let payload_hash = payload.content_hash();
        let age = receive_tick - submission.observation_tick;
        let confidence = Confidence::new(
            submission.value_score,
            self.ledger.reliability_of(submission.source),
        )
        .with_flags(submission.flags)
        .decayed(age, self.freshness_half_life);

        let mut state = self.state.lock();
        let id = InfoId(state.next_id);
        state.next_id += 1;
        state.enqueued += 1;

        if state.entries.len() == self.capacity {
            if let Some(old) = state.entries.pop_front() {
                state.evicted += 1;
                let drained = state.by_subject.get_mut(&old.subject).is_some_and(|fifo| {
                    fifo.retain(|&i| i != old.id);
                    fifo.is_empty()
                });
                if drained {
                    state.by_subject.remove(&old.subject);
                }
            }
        }

        let entry = InfoEntry {
            id,
            subject: submission.subject,
            source: submission.source,
            kind: submission.kind,
            schema: payload.kind(),
            payload,
            observation_tick: submission.observation_tick,
            receive_tick,
            confidence,
            payload_hash,
            status: InfoStatus::Pending,
        };
        trace!(id = ?entry.id, subject = %entry.subject, kind = ?entry.kind, "enqueued info");
        state
            .by_subject
            .entry(entry.subject)
            .or_default()
            .push_back(id);
        state.entries.push_back(entry);
        id
    }

    /// Pops the next pending entry in arrival order (clone; the entry stays
    /// queryable until evicted).
    #[must_use]
    pub fn dequeue(&self) -> Option<InfoEntry> {
        let mut state = self.state.lock();
        let front = state.entries.front()?.id.0;
        let start = state.drain_cursor.max(front);
        for offset in (start - front) as usize..state.entries.len() {
            if state.entries[offset].status == InfoStatus::Pending {
                let entry = state.entries[offset].clone();
                state.drain_cursor = entry.id.0 + 1;
                return Some(entry);
            }
        }
        state.drain_cursor = state.next_id;
        None
    }

    /// The next pending entry without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<InfoEntry> {
        let state = self.state.lock();
        let front = state.entries.front()?.id.0;
        let start = state.drain_cursor.max(front);
        ((start - front) as usize..state.entries.len())
            .map(|i| &state.entries[i])
            .find(|e| e.status == InfoStatus::Pending)
            .cloned()
    }

    /// Settles a pending entry. Fails if it already left `Pending`.
    pub fn resolve(&self, id: InfoId, status: InfoStatus) -> Result<(), InfoError> {
        let mut state = self.state.lock();
        let idx = state.index_of(id).ok_or(InfoError::Unknown(id))?;
        let entry = &mut state.entries[idx];
        if entry.status != InfoStatus::Pending {
            return Err(InfoError::AlreadyResolved {
                id,
                status: entry.status,
            });
        }
        entry.status = status;
        Ok(())
    }

    /// Marks every pending entry older than `cutoff` (by observation tick)
    /// as expired; returns how many were expired.
    pub fn expire_older_than(&self, cutoff: Tick) -> usize {
        let mut state = self.state.lock();
        let mut expired = 0;
        for entry in state.entries.iter_mut() {
            if entry.status == InfoStatus::Pending && entry.observation_tick < cutoff {
                entry.status = InfoStatus::Expired;
                expired += 1;
            }
        }
        expired
    }

    /// Forwards accuracy feedback to the reliability ledger.
    pub fn provide_feedback(&self, source: NetId, was_accurate: bool, tick: Tick) {
        self.ledger.provide_feedback(source, was_accurate, tick);
    }

    /// Entry lookup by id.
    #[must_use]
    pub fn get(&self, id: InfoId) -> Option<InfoEntry> {
        let state = self.state.lock();
        state.index_of(id).map(|i| state.entries[i].clone())
    }

    /// Pending ids for `subject`, oldest first.
    #[must_use]
    pub fn pending_for_subject(&self, subject: NetId) -> Vec<InfoId> {
        let state = self.state.lock();
        let Some(fifo) = state.by_subject.get(&subject) else {
            return Vec::new();
        };
        fifo.iter()
            .filter(|&&id| {
                state
                    .index_of(id)
                    .is_some_and(|i| state.entries[i].status == InfoStatus::Pending)
            })
            .copied()
            .collect()
    }

    /// All retained entries matching `filter`, arrival order.
    #[must_use]
    pub fn query(&self, filter: &InfoFilter) -> Vec<InfoEntry> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Retained entries about `subject`.
    #[must_use]
    pub fn by_subject(&self, subject: NetId) -> Vec<InfoEntry> {
        self.query(&InfoFilter {
            subject: Some(subject),
            ..InfoFilter::default()
        })
    }

    /// Retained entries of `kind`.
    #[must_use]
    pub fn by_kind(&self, kind: InfoKind) -> Vec<InfoEntry> {
        self.query(&InfoFilter {
            kind: Some(kind),
            ..InfoFilter::default()
        })
    }

    /// Retained entries observed inside `range`.
    #[must_use]
    pub fn in_tick_range(&self, range: TickRange) -> Vec<InfoEntry> {
        self.query(&InfoFilter {
            tick_range: Some(range),
            ..InfoFilter::default()
        })
    }

    /// Ingest counters.
    #[must_use]
    pub fn stats(&self) -> InfoRingStats {
        let state = self.state.lock();
        InfoRingStats {
            enqueued: state.enqueued,
            evicted: state.evicted,
            pending: state
                .entries
                .iter()
                .filter(|e| e.status == InfoStatus::Pending)
                .count(),
        }
    }
}
