// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Confidence scoring for untrusted observations.
//!
//! Every observation entering Ring 2 carries a [`Confidence`]: a claimed
//! value score, the source's track record, and a freshness term that decays
//! with age. The effective score is the product of the three, gated on having
//! at least one sample. The decision policy (accept / reject / ask for more /
//! defer) lives here so Ring 2 and the coordinator share one set of cuts.
//!
//! Source reliability is an exponential moving average over boolean accuracy
//! feedback, clamped away from 0 and 1 so no source is ever permanently
//! damned or blessed; idle sources drift back toward indifference.

use core::f32::consts::LN_2;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::clock::Tick;
use crate::ident::NetId;
use crate::math::exp_f32;
use crate::schema::PayloadHash;

/// Default accept cut for the effective score.
pub const DEFAULT_ACCEPT_THRESHOLD: f32 = 0.8;
/// Default reject cut for the effective score.
pub const DEFAULT_REJECT_THRESHOLD: f32 = 0.2;
/// Default freshness half-life, in ticks.
pub const DEFAULT_FRESHNESS_HALF_LIFE: f32 = 20.0;
/// EMA rate for reliability feedback.
pub const RELIABILITY_EMA_RATE: f32 = 0.05;
/// Reliability clamp bounds.
pub const RELIABILITY_CLAMP: (f32, f32) = (0.01, 0.99);
/// Per-sweep drift of idle sources toward 0.5.
pub const RELIABILITY_IDLE_DRIFT: f32 = 0.01;

/// Flag bits carried by a [`Confidence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConfidenceFlags(pub u8);

impl ConfidenceFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Bypass scoring: accept unconditionally (local authoritative writes).
    pub const FORCED_ACCEPT: Self = Self(1);
    /// Bypass scoring: reject unconditionally (operator ban, known-bad source).
    pub const FORCED_REJECT: Self = Self(1 << 1);

    /// True when `flag`'s bits are all set.
    #[inline]
    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }
}

/// Decision outcome for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfidenceDecision {
    /// Commit it.
    Accept,
    /// Drop it, feed negative reliability.
    Reject,
    /// Not enough evidence either way and too few samples to defer on.
    RequestMoreSamples,
    /// Park it; later observations may resolve the ambiguity.
    Defer,
}

/// Decision cuts, configurable per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// Effective score at or above which an observation is accepted.
    pub accept: f32,
    /// Effective score at or below which an observation is rejected.
    pub reject: f32,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            accept: DEFAULT_ACCEPT_THRESHOLD,
            reject: DEFAULT_REJECT_THRESHOLD,
        }
    }
}

/// Confidence in one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    /// Claimed plausibility of the value itself, in `[0, 1]`.
    pub value: f32,
    /// Source track record, in `[0, 1]`.
    pub source_reliability: f32,
    /// Age decay term, in `[0, 1]`.
    pub freshness: f32,
    /// Number of observations folded into this score.
    pub sample_count: u8,
    /// Forced-decision flags.
    pub flags: ConfidenceFlags,
}

impl Confidence {
    /// Fresh single-sample confidence from a value score and reliability.
    #[must_use]
    pub fn new(value: f32, source_reliability: f32) -> Self {
        Self {
            value: clamp01(value),
            source_reliability: clamp01(source_reliability),
            freshness: 1.0,
            sample_count: 1,
            flags: ConfidenceFlags::NONE,
        }
    }

    /// Returns a copy with `flags` set.
    #[must_use]
    pub fn with_flags(mut self, flags: ConfidenceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Effective score: `value · reliability · freshness`, zero when no
    /// samples back it.
    #[must_use]
    pub fn effective(&self) -> f32 {
        if self.sample_count == 0 {
            return 0.0;
        }
        clamp01(self.value * self.source_reliability * self.freshness)
    }

    /// Copy with freshness decayed by `age_ticks` at the given half-life.
    ///
    /// `freshness' = freshness · 2^(−age / half_life)`.
    #[must_use]
    pub fn decayed(&self, age_ticks: Tick, half_life: f32) -> Self {
        let age = age_ticks.max(0) as f32;
        let half_life = if half_life > 0.0 {
            half_life
        } else {
            DEFAULT_FRESHNESS_HALF_LIFE
        };
        let decay = exp_f32(-LN_2 * age / half_life);
        Self {
            freshness: clamp01(self.freshness * decay),
            ..*self
        }
    }

    /// Folds another observation of the same subject into this score.
    ///
    /// Sample-weighted mean for value, arithmetic mean for reliability, max
    /// for freshness, capped sum for sample count. Flags are unioned.
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        let n_a = f32::from(self.sample_count);
        let n_b = f32::from(other.sample_count);
        let total = n_a + n_b;
        let value = if total > 0.0 {
            (self.value * n_a + other.value * n_b) / total
        } else {
            0.0
        };
        Self {
            value: clamp01(value),
            source_reliability: clamp01((self.source_reliability + other.source_reliability) / 2.0),
            freshness: self.freshness.max(other.freshness),
            sample_count: self.sample_count.saturating_add(other.sample_count),
            flags: ConfidenceFlags(self.flags.0 | other.flags.0),
        }
    }

    /// Applies the decision policy.
    #[must_use]
    pub fn decide(&self, thresholds: &DecisionThresholds) -> ConfidenceDecision {
        if self.flags.contains(ConfidenceFlags::FORCED_ACCEPT) {
            return ConfidenceDecision::Accept;
        }
        if self.flags.contains(ConfidenceFlags::FORCED_REJECT) {
            return ConfidenceDecision::Reject;
        }
        let e = self.effective();
        if e >= thresholds.accept {
            ConfidenceDecision::Accept
        } else if e <= thresholds.reject {
            ConfidenceDecision::Reject
        } else if self.sample_count < 3 {
            ConfidenceDecision::RequestMoreSamples
        } else {
            ConfidenceDecision::Defer
        }
    }
}

#[inline]
fn clamp01(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Per-source accuracy statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceStats {
    /// Current reliability estimate.
    pub reliability: f32,
    /// Observations accepted into the truth log.
    pub accepted: u64,
    /// Observations rejected.
    pub rejected: u64,
    /// Observations deferred.
    pub deferred: u64,
    /// Actuator verifications that failed for this source's commits.
    pub verification_failures: u64,
}

#[derive(Debug, Clone, Copy)]
struct SourceRecord {
    stats: SourceStats,
    last_feedback: Tick,
}

impl SourceRecord {
    fn new() -> Self {
        Self {
            stats: SourceStats {
                reliability: 0.5,
                ..SourceStats::default()
            },
            last_feedback: 0,
        }
    }
}

/// Tracks per-source reliability and outcome counters.
#[derive(Debug, Default)]
pub struct ReliabilityLedger {
    sources: Mutex<FxHashMap<NetId, SourceRecord>>,
}

impl ReliabilityLedger {
    /// Creates an empty ledger. Unknown sources read as 0.5.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current reliability of `source` (0.5 when never seen).
    #[must_use]
    pub fn reliability_of(&self, source: NetId) -> f32 {
        self.sources
            .lock()
            .get(&source)
            .map_or(0.5, |r| r.stats.reliability)
    }

    /// Folds one boolean accuracy observation into the source's EMA.
    pub fn provide_feedback(&self, source: NetId, was_accurate: bool, tick: Tick) {
        let mut sources = self.sources.lock();
        let rec = sources.entry(source).or_insert_with(SourceRecord::new);
        let target = if was_accurate { 1.0 } else { 0.0 };
        let r = rec.stats.reliability;
        rec.stats.reliability =
            (r + RELIABILITY_EMA_RATE * (target - r)).clamp(RELIABILITY_CLAMP.0, RELIABILITY_CLAMP.1);
        rec.last_feedback = tick;
    }

    /// Counts an accepted observation.
    pub fn note_accepted(&self, source: NetId) {
        self.sources
            .lock()
            .entry(source)
            .or_insert_with(SourceRecord::new)
            .stats
            .accepted += 1;
    }

    /// Counts a rejected observation.
    pub fn note_rejected(&self, source: NetId) {
        self.sources
            .lock()
            .entry(source)
            .or_insert_with(SourceRecord::new)
            .stats
            .rejected += 1;
    }

    /// Counts a deferred observation.
    pub fn note_deferred(&self, source: NetId) {
        self.sources
            .lock()
            .entry(source)
            .or_insert_with(SourceRecord::new)
            .stats
            .deferred += 1;
    }

    /// Counts a failed actuator verification attributed to `source`.
    pub fn note_verification_failure(&self, source: NetId) {
        self.sources
            .lock()
            .entry(source)
            .or_insert_with(SourceRecord::new)
            .stats
            .verification_failures += 1;
    }

    /// Drifts sources with no feedback since `idle_before` toward 0.5.
    ///
    /// Run once per maintenance interval; a source that stays quiet neither
    /// keeps an inflated score nor serves a life sentence for old sins.
    pub fn sweep_idle(&self, idle_before: Tick) {
        let mut sources = self.sources.lock();
        for rec in sources.values_mut() {
            if rec.last_feedback < idle_before {
                let r = rec.stats.reliability;
                rec.stats.reliability = r + (0.5 - r).clamp(-RELIABILITY_IDLE_DRIFT, RELIABILITY_IDLE_DRIFT);
            }
        }
    }

    /// Snapshot of one source's stats.
    #[must_use]
    pub fn stats_of(&self, source: NetId) -> Option<SourceStats> {
        self.sources.lock().get(&source).map(|r| r.stats)
    }

    /// Snapshot of all tracked sources, unordered.
    #[must_use]
    pub fn all_stats(&self) -> Vec<(NetId, SourceStats)> {
        self.sources
            .lock()
            .iter()
            .map(|(id, r)| (*id, r.stats))
            .collect()
    }
}

/// One agreement bucket produced by [`build_consensus`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusGroup {
    /// Payload hash every member shares.
    pub hash: PayloadHash,
    /// Combined confidence of the members.
    pub confidence: Confidence,
    /// Number of member observations.
    pub observations: usize,
}

/// Result of consensus bucketing over same-subject observations.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusOutcome {
    /// The bucket with the highest combined effective confidence.
    pub winner: Option<ConsensusGroup>,
    /// Every bucket, sorted by descending effective confidence (hash breaks
    /// ties deterministically).
    pub groups: Vec<ConsensusGroup>,
}

impl ConsensusOutcome {
    /// True when at least two buckets disagree about the payload.
    #[must_use]
    pub fn contradictory(&self) -> bool {
        self.groups.len() >= 2
    }
}

/// Groups observations by payload hash and combines confidence per bucket.
///
/// Higher layers use the winner as the consensus value and treat the
/// presence of multiple buckets as a cue to request more samples.
#[must_use]
pub fn build_consensus(observations: &[(PayloadHash, Confidence)]) -> ConsensusOutcome {
    let mut buckets: FxHashMap<PayloadHash, ConsensusGroup> = FxHashMap::default();
    for (hash, confidence) in observations {
        buckets
            .entry(*hash)
            .and_modify(|g| {
                g.confidence = g.confidence.combine(confidence);
                g.observations += 1;
            })
            .or_insert(ConsensusGroup {
                hash: *hash,
                confidence: *confidence,
                observations: 1,
            });
    }
    let mut groups: Vec<ConsensusGroup> = buckets.into_values().collect();
    groups.sort_by(|a, b| {
        b.confidence
            .effective()
            .partial_cmp(&a.confidence.effective())
            .unwrap_or(core::cmp::Ordering::Equal)
            .then_with(|| a.hash.cmp(&b.hash))
    });
    ConsensusOutcome {
        winner: groups.first().copied(),
        groups,
    }
}
