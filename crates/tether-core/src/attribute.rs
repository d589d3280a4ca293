// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ring 4 — attribute presentation: bounded per-entity sample histories,
//! interpolation/extrapolation, and the write gate.
//!
//! Every accepted authoritative commit pushes a `(tick, value)` sample into
//! the subject's history, insertion-sorted and trimmed to a cap (32 for
//! transforms, 16 for scalars). Reads ask for a continuous time and get back
//! the best answer the history supports, tagged with how it was produced:
//! exact hit, interpolation between brackets, bounded dead-reckoning, or
//! nothing. Writes from subsystems pass through [`AttributeRing::gate_write`]
//! before touching game memory.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::clock::Tick;
use crate::ident::NetId;
use crate::math::{exp_f32, Quat, Vec3};
use crate::schema::SchemaKind;
use crate::space::{FramedTransform, SpaceFrame};

/// Transform samples retained per entity.
pub const TRANSFORM_HISTORY_CAP: usize = 32;

/// Scalar samples retained per entity per attribute.
pub const SCALAR_HISTORY_CAP: usize = 16;

/// Exponent rate for extrapolation confidence decay: `exp(−0.2 · Δ)`.
const EXTRAPOLATION_DECAY_RATE: f32 = 0.2;

/// Gating and sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Authority age (ticks) beyond which writes are allowed with a warning.
    pub max_stale_ticks: Tick,
    /// Positional divergence (world units) beyond which writes are corrected.
    pub max_position_divergence: f32,
    /// Rotational divergence (radians) beyond which writes are corrected.
    pub max_rotation_divergence: f32,
    /// Transform history cap (clamped to [`TRANSFORM_HISTORY_CAP`]).
    pub history_size: usize,
    /// Maximum ticks of dead-reckoning past the newest sample.
    pub max_extrapolate_ticks: Tick,
    /// Presentation delay behind authority, in ticks.
    pub interpolation_delay_ticks: Tick,
    /// Blend factor toward the authoritative value in corrections;
    /// 1.0 returns the authoritative value exactly.
    pub correction_blend_rate: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_stale_ticks: 10,
            max_position_divergence: 2.0,
            max_rotation_divergence: 0.785,
            history_size: TRANSFORM_HISTORY_CAP,
            max_extrapolate_ticks: 5,
            interpolation_delay_ticks: 2,
            correction_blend_rate: 1.0,
        }
    }
}

/// How a sampled value was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleMode {
    /// A sample existed at exactly the requested time.
    Exact,
    /// Interpolated between two bracketing samples.
    Interpolate,
    /// Dead-reckoned past the newest sample.
    Extrapolate,
    /// History could not answer.
    None,
}

/// A sampled transform with provenance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledTransform {
    /// The value, in the frame the samples were stored in.
    pub transform: FramedTransform,
    /// How it was produced.
    pub mode: SampleMode,
    /// Confidence in the answer, `[0, 1]`.
    pub confidence: f32,
    /// Continuous time the answer corresponds to (after presentation delay).
    pub time: f64,
}

/// Write-gate decision for a subsystem write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteDecision {
    /// Write it.
    Allow,
    /// Write it, but authority is stale; log it.
    AllowWithWarning,
    /// Do not write; no authority state exists.
    Block,
    /// Write this corrected transform instead.
    Correct {
        /// Corrected position.
        position: Vec3,
        /// Corrected rotation.
        rotation: Quat,
    },
}

#[derive(Debug, Clone, Copy)]
struct TransformSample {
    tick: Tick,
    transform: FramedTransform,
}

#[derive(Debug, Clone, Copy)]
struct ScalarSample {
    tick: Tick,
    value: f32,
}

#[derive(Debug, Default)]
struct AttributeHistory {
    transforms: VecDeque<TransformSample>,
    scalars: FxHashMap<SchemaKind, VecDeque<ScalarSample>>,
}

/// Ring 4: per-entity, per-attribute sample histories plus the write gate.
pub struct AttributeRing {
    entities: Mutex<FxHashMap<NetId, AttributeHistory>>,
    config: GateConfig,
}

impl AttributeRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self {
            entities: Mutex::new(FxHashMap::default()),
            config,
        }
    }

    /// The gating configuration.
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Pushes a transform sample, keeping insertion-sorted order and the
    /// history cap. A sample at an existing tick replaces it (coalesced
    /// commits re-announce the same tick).
    pub fn push_transform(&self, entity: NetId, tick: Tick, transform: FramedTransform) {
        let cap = self.config.history_size.clamp(2, TRANSFORM_HISTORY_CAP);
        let mut entities = self.entities.lock();
        let history = entities.entry(entity).or_default();
        let samples = &mut history.transforms;
        match samples.binary_search_by_key(&tick, |s| s.tick) {
            Ok(idx) => samples[idx].transform = transform,
            Err(idx) => {
                samples.insert(idx, TransformSample { tick, transform });
                if samples.len() > cap {
                    samples.pop_front();
                }
            }
        }
    }

    /// Pushes a scalar sample for one attribute.
    pub fn push_scalar(&self, entity: NetId, kind: SchemaKind, tick: Tick, value: f32) {
        let mut entities = self.entities.lock();
        let history = entities.entry(entity).or_default();
        let samples = history.scalars.entry(kind).or_default();
        match samples.binary_search_by_key(&tick, |s| s.tick) {
            Ok(idx) => samples[idx].value = value,
            Err(idx) => {
                samples.insert(idx, ScalarSample { tick, value });
                if samples.len() > SCALAR_HISTORY_CAP {
                    samples.pop_front();
                }
            }
        }
    }

    /// Drops all history for `entity` (despawn).
    pub fn remove_entity(&self, entity: NetId) {
        self.entities.lock().remove(&entity);
    }

    /// Tick of the newest transform sample for `entity`.
    #[must_use]
    pub fn newest_transform_tick(&self, entity: NetId) -> Option<Tick> {
        self.entities
            .lock()
            .get(&entity)
            .and_then(|h| h.transforms.back().map(|s| s.tick))
    }

    /// Samples the transform at continuous time `t` (in ticks).
    ///
    /// The requested time is shifted back by the configured interpolation
    /// delay; see the module docs for the bracket/extrapolate rules.
    #[must_use]
    pub fn sample_at(&self, entity: NetId, t: f64) -> SampledTransform {
        self.sample_at_capped(entity, t, self.config.max_extrapolate_ticks)
    }

    /// [`AttributeRing::sample_at`] with an explicit extrapolation cap, for
    /// callers (the read resolver) whose category budget differs from the
    /// ring default.
    #[must_use]
    pub fn sample_at_capped(
        &self,
        entity: NetId,
        t: f64,
        max_extrapolate_ticks: Tick,
    ) -> SampledTransform {
        let t_prime = t - self.config.interpolation_delay_ticks as f64;
        let entities = self.entities.lock();
        let Some(history) = entities.get(&entity) else {
            return none_at(t_prime);
        };
        let samples = &history.transforms;
        if samples.is_empty() {
            return none_at(t_prime);
        }

        // Greatest sample at or before t', least sample at or after t'.
        let mut below: Option<&TransformSample> = None;
        let mut above: Option<&TransformSample> = None;
        for s in samples {
            if (s.tick as f64) <= t_prime {
                below = Some(s);
            } else {
                above = Some(s);
                break;
            }
        }

        match (below, above) {
            (Some(b), Some(a)) => {
                if (b.tick as f64 - t_prime).abs() < f64::EPSILON {
                    return SampledTransform {
                        transform: b.transform,
                        mode: SampleMode::Exact,
                        confidence: 1.0,
                        time: t_prime,
                    };
                }
                let span = (a.tick - b.tick) as f32;
                let u = (((t_prime - b.tick as f64) as f32) / span).clamp(0.0, 1.0);
                let lerped = b
                    .transform
                    .lerp(a.transform, u)
                    .unwrap_or(b.transform);
                SampledTransform {
                    transform: lerped,
                    mode: SampleMode::Interpolate,
                    confidence: 1.0,
                    time: t_prime,
                }
            }
            (Some(b), None) => {
                let dt = (t_prime - b.tick as f64) as f32;
                if dt.abs() < f32::EPSILON {
                    return SampledTransform {
                        transform: b.transform,
                        mode: SampleMode::Exact,
                        confidence: 1.0,
                        time: t_prime,
                    };
                }
                if max_extrapolate_ticks <= 0 {
                    return none_at(t_prime);
                }
                // Projection depth clamps at the cap; confidence keeps
                // decaying with the full age so stale guesses rank low.
                let project_dt = dt.min(max_extrapolate_ticks as f32);
                let projected = FramedTransform {
                    position: b.transform.position + b.transform.velocity.scale(project_dt),
                    rotation: b.transform.rotation,
                    velocity: b.transform.velocity,
                    frame: b.transform.frame,
                };
                SampledTransform {
                    transform: projected,
                    mode: SampleMode::Extrapolate,
                    confidence: exp_f32(-EXTRAPOLATION_DECAY_RATE * dt),
                    time: t_prime,
                }
            }
            // Requested time predates all history: clamp to the oldest sample.
            (None, Some(a)) => SampledTransform {
                transform: a.transform,
                mode: SampleMode::Exact,
                confidence: 1.0,
                time: t_prime,
            },
            (None, None) => none_at(t_prime),
        }
    }

    /// Samples a scalar attribute at continuous time `t` (no delay shift, no
    /// extrapolation — scalars jump, they don't glide).
    #[must_use]
    pub fn scalar_at(&self, entity: NetId, kind: SchemaKind, t: f64) -> Option<(f32, SampleMode)> {
        let entities = self.entities.lock();
        let samples = entities.get(&entity)?.scalars.get(&kind)?;
        let mut below: Option<&ScalarSample> = None;
        let mut above: Option<&ScalarSample> = None;
        for s in samples {
            if (s.tick as f64) <= t {
                below = Some(s);
            } else {
                above = Some(s);
                break;
            }
        }
        match (below, above) {
            (Some(b), _) => Some((b.value, SampleMode::Exact)),
            (None, Some(a)) => Some((a.value, SampleMode::Exact)),
            (None, None) => None,
        }
    }

    /// Gates a subsystem transform write against authority.
    ///
    /// - No authority history → [`WriteDecision::Block`].
    /// - Newest authority older than `max_stale_ticks` →
    ///   [`WriteDecision::AllowWithWarning`].
    /// - Proposed transform diverging from interpolated authority beyond the
    ///   configured position/rotation bounds → [`WriteDecision::Correct`].
    /// - Otherwise [`WriteDecision::Allow`].
    #[must_use]
    pub fn gate_write(
        &self,
        entity: NetId,
        proposed: &FramedTransform,
        tick: Tick,
    ) -> WriteDecision {
        let Some(newest) = self.newest_transform_tick(entity) else {
            return WriteDecision::Block;
        };
        if tick - newest > self.config.max_stale_ticks {
            return WriteDecision::AllowWithWarning;
        }
        let sampled = self.sample_at(entity, tick as f64);
        if sampled.mode == SampleMode::None {
            return WriteDecision::AllowWithWarning;
        }
        let authority = sampled.transform;
        // Comparing across frames is meaningless; treat a frame change as an
        // authoritative correction back into the truth frame.
        if authority.frame != proposed.frame {
            return WriteDecision::Correct {
                position: authority.position,
                rotation: authority.rotation,
            };
        }
        let pos_div = authority.position.distance(proposed.position);
        let rot_div = authority.rotation.angle_to(proposed.rotation);
        if pos_div > self.config.max_position_divergence
            || rot_div > self.config.max_rotation_divergence
        {
            let blend = self.config.correction_blend_rate.clamp(0.0, 1.0);
            return WriteDecision::Correct {
                position: proposed.position.lerp(authority.position, blend),
                rotation: proposed.rotation.slerp(authority.rotation, blend),
            };
        }
        WriteDecision::Allow
    }
}

fn none_at(t_prime: f64) -> SampledTransform {
    SampledTransform {
        transform: FramedTransform::identity(SpaceFrame::World),
        mode: SampleMode::None,
        confidence: 0.0,
        time: t_prime,
    }
}
