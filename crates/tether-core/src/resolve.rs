// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The read resolver: the semantic choke point for subsystem reads.
//!
//! The core does not intercept arbitrary memory reads. Subsystems declare a
//! [`ReadCategory`] per request, and each category carries a staleness
//! budget: how old an answer may be, how confident it must be, and whether
//! dead-reckoning is acceptable. Resolution order per request:
//!
//! 1. in-TTL cache hit (re-checked against the requesting category),
//! 2. authority fallback within the staleness bound,
//! 3. presentation interpolation/extrapolation within budget,
//! 4. the category's stale-behavior handler.
//!
//! Answers with `decision == Allow` always satisfy the category budget;
//! predicted or degraded answers are marked `Substitute`, refusals `Block`.
//!
//! The [`ResponseBus`] pre-resolves everything a subsystem will need at the
//! start of its update so mid-update reads never block.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::attribute::{AttributeRing, SampleMode};
use crate::clock::{Tick, TickTime};
use crate::ident::NetId;
use crate::schema::{SchemaKind, SchemaPayload};
use crate::space::{FramedTransform, SpaceFrame};
use crate::truth::TruthLog;

/// Confidence floor below which resolved entries bypass the cache.
const CACHE_CONFIDENCE_FLOOR: f32 = 0.5;

/// Confidence reported for last-known fallbacks.
const LAST_KNOWN_CONFIDENCE: f32 = 0.3;

/// Why a read was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadCategory {
    /// Physics stepping; tight budget, soft convergence on staleness.
    Physics,
    /// Rendering; loose budget, never blocks.
    Render,
    /// AI decisions; moderate budget, never guesses.
    Ai,
    /// Cosmetic animation.
    AnimationCosmetic,
    /// Gameplay-linked animation (hit frames, root motion).
    AnimationGameplay,
    /// Outbound network synchronisation.
    NetworkSync,
}

/// What to do when a read's budget cannot be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaleBehavior {
    /// Refuse the read.
    ReturnNone,
    /// Serve the last authoritative value at low confidence.
    ReturnLastKnown,
    /// Dead-reckon from the last known velocity.
    Extrapolate,
    /// Serve stale authority at half confidence so the consumer converges.
    SoftConverge,
}

/// Per-category staleness budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryBudget {
    /// Maximum age (ticks) of an allowed answer.
    pub max_stale_ticks: Tick,
    /// Minimum confidence of an allowed answer.
    pub min_confidence: f32,
    /// Whether dead-reckoning is acceptable at all.
    pub extrapolate: bool,
    /// Maximum dead-reckoning depth in ticks.
    pub max_extrapolate_ticks: Tick,
    /// Fallback when the budget cannot be met.
    pub on_stale: StaleBehavior,
}

impl ReadCategory {
    /// The category's staleness budget.
    #[must_use]
    pub fn budget(self) -> CategoryBudget {
        match self {
            Self::Physics => CategoryBudget {
                max_stale_ticks: 2,
                min_confidence: 0.90,
                extrapolate: true,
                max_extrapolate_ticks: 3,
                on_stale: StaleBehavior::SoftConverge,
            },
            Self::Render => CategoryBudget {
                max_stale_ticks: 10,
                min_confidence: 0.50,
                extrapolate: true,
                max_extrapolate_ticks: 20,
                on_stale: StaleBehavior::Extrapolate,
            },
            Self::Ai => CategoryBudget {
                max_stale_ticks: 5,
                min_confidence: 0.80,
                extrapolate: false,
                max_extrapolate_ticks: 0,
                on_stale: StaleBehavior::ReturnNone,
            },
            Self::AnimationCosmetic => CategoryBudget {
                max_stale_ticks: 8,
                min_confidence: 0.60,
                extrapolate: true,
                max_extrapolate_ticks: 15,
                on_stale: StaleBehavior::Extrapolate,
            },
            Self::AnimationGameplay => CategoryBudget {
                max_stale_ticks: 3,
                min_confidence: 0.85,
                extrapolate: true,
                max_extrapolate_ticks: 5,
                on_stale: StaleBehavior::SoftConverge,
            },
            Self::NetworkSync => CategoryBudget {
                max_stale_ticks: 2,
                min_confidence: 0.90,
                extrapolate: true,
                max_extrapolate_ticks: 3,
                on_stale: StaleBehavior::SoftConverge,
            },
        }
    }
}

/// Where a read answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseSource {
    /// Served from the resolved cache.
    Cache,
    /// Directly from folded truth within the staleness bound.
    Authority,
    /// Interpolated presentation samples.
    Interpolated,
    /// Dead-reckoned presentation samples.
    Extrapolated,
    /// Stale-handler: last authoritative value.
    LastKnown,
    /// Stale-handler: stale authority at reduced confidence.
    StaleConverged,
    /// Nothing could answer.
    None,
}

/// What the consumer may do with the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadDecision {
    /// The answer meets the category budget.
    Allow,
    /// The answer is degraded or predicted; usable but not authoritative.
    Substitute,
    /// No usable answer; do not act.
    Block,
}

/// Resolved read answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    /// Provenance of the answer.
    pub source: ResponseSource,
    /// The value, when one exists.
    pub value: Option<SchemaPayload>,
    /// Confidence in the answer, `[0, 1]`.
    pub confidence: f32,
    /// Ticks the answer may be cached/used for.
    pub ttl_ticks: Tick,
    /// Consumer guidance.
    pub decision: ReadDecision,
    /// Tick the value corresponds to.
    pub source_tick: Tick,
    /// Human-readable note on degraded answers.
    pub reason: Option<&'static str>,
}

impl ReadResponse {
    fn blocked(reason: &'static str, tick: Tick) -> Self {
        Self {
            source: ResponseSource::None,
            value: None,
            confidence: 0.0,
            ttl_ticks: 0,
            decision: ReadDecision::Block,
            source_tick: tick,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedRead {
    response: ReadResponse,
    inserted_tick: Tick,
}

/// TTL cache of resolved reads, keyed `(subject, schema)`.
#[derive(Debug, Default)]
pub struct ResolvedCache {
    entries: Mutex<FxHashMap<(NetId, SchemaKind), CachedRead>>,
}

impl ResolvedCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, subject: NetId, schema: SchemaKind, now: Tick) -> Option<ReadResponse> {
        let entries = self.entries.lock();
        let cached = entries.get(&(subject, schema))?;
        if now - cached.inserted_tick > cached.response.ttl_ticks {
            return None;
        }
        Some(cached.response.clone())
    }

    fn insert(&self, subject: NetId, schema: SchemaKind, response: &ReadResponse, now: Tick) {
        if response.confidence < CACHE_CONFIDENCE_FLOOR || response.ttl_ticks == 0 {
            return;
        }
        self.entries.lock().insert(
            (subject, schema),
            CachedRead {
                response: response.clone(),
                inserted_tick: now,
            },
        );
    }

    /// Removes every cached read about `subject`. O(n) sweep.
    pub fn invalidate_subject(&self, subject: NetId) {
        self.entries.lock().retain(|(s, _), _| *s != subject);
    }

    /// Number of cached entries (diagnostics).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Resolves categorized reads against truth and presentation.
pub struct ReadResolver {
    truth: Arc<TruthLog>,
    attributes: Arc<AttributeRing>,
    cache: ResolvedCache,
}

impl ReadResolver {
    /// Creates a resolver over the given rings.
    #[must_use]
    pub fn new(truth: Arc<TruthLog>, attributes: Arc<AttributeRing>) -> Self {
        Self {
            truth,
            attributes,
            cache: ResolvedCache::new(),
        }
    }

    /// The resolved cache (shared for invalidation sweeps).
    #[must_use]
    pub fn cache(&self) -> &ResolvedCache {
        &self.cache
    }

    /// Resolves one read.
    #[must_use]
    pub fn resolve(
        &self,
        subject: NetId,
        schema: SchemaKind,
        category: ReadCategory,
        now: TickTime,
    ) -> ReadResponse {
        let budget = category.budget();

        // 1) Cache, re-validated against this category's budget so a loose
        //    category's entry cannot leak past a tight one.
        if let Some(cached) = self.cache.get(subject, schema, now.tick) {
            let age = now.tick - cached.source_tick;
            if cached.decision == ReadDecision::Allow
                && age <= budget.max_stale_ticks
                && cached.confidence >= budget.min_confidence
            {
                let mut hit = cached;
                hit.source = ResponseSource::Cache;
                return hit;
            }
        }

        let response = match schema {
            SchemaKind::Transform => self.resolve_transform(subject, &budget, now),
            _ => self.resolve_authority_only(subject, schema, &budget, now),
        };
        self.cache.insert(subject, schema, &response, now.tick);
        trace!(
            subject = %subject,
            schema = %schema,
            ?category,
            decision = ?response.decision,
            "read resolved"
        );
        response
    }

    fn resolve_transform(
        &self,
        subject: NetId,
        budget: &CategoryBudget,
        now: TickTime,
    ) -> ReadResponse {
        let newest = self.attributes.newest_transform_tick(subject);
        let truth_transform = self.truth.transform_of(subject);

        // 2) Authority fallback within the staleness bound. Folded truth is
        //    confidence 1.0 by definition, so only age can disqualify it.
        if let (Some(newest), Some(t)) = (newest, truth_transform) {
            let age = now.tick - newest;
            if age <= budget.max_stale_ticks {
                return ReadResponse {
                    source: ResponseSource::Authority,
                    value: Some(SchemaPayload::Transform(t)),
                    confidence: 1.0,
                    ttl_ticks: 1,
                    decision: ReadDecision::Allow,
                    source_tick: newest,
                    reason: None,
                };
            }
        }

        // 3) Presentation within budget.
        let cap = if budget.extrapolate {
            budget.max_extrapolate_ticks
        } else {
            0
        };
        let sampled = self
            .attributes
            .sample_at_capped(subject, now.as_continuous(), cap);
        match sampled.mode {
            SampleMode::Exact | SampleMode::Interpolate => {
                let source_tick = sampled.time.floor() as Tick;
                let age = now.tick - source_tick;
                if age <= budget.max_stale_ticks && sampled.confidence >= budget.min_confidence {
                    return ReadResponse {
                        source: ResponseSource::Interpolated,
                        value: Some(SchemaPayload::Transform(sampled.transform)),
                        confidence: sampled.confidence,
                        ttl_ticks: 1,
                        decision: ReadDecision::Allow,
                        source_tick,
                        reason: None,
                    };
                }
            }
            SampleMode::Extrapolate => {
                if sampled.confidence >= budget.min_confidence {
                    return ReadResponse {
                        source: ResponseSource::Extrapolated,
                        value: Some(SchemaPayload::Transform(sampled.transform)),
                        confidence: sampled.confidence,
                        ttl_ticks: 1,
                        decision: ReadDecision::Substitute,
                        source_tick: newest.unwrap_or(now.tick),
                        reason: Some("extrapolated within category budget"),
                    };
                }
            }
            SampleMode::None => {}
        }

        // 4) Stale-behavior handler.
        self.stale_fallback(budget, now, newest, truth_transform)
    }

    fn stale_fallback(
        &self,
        budget: &CategoryBudget,
        now: TickTime,
        newest: Option<Tick>,
        truth_transform: Option<FramedTransform>,
    ) -> ReadResponse {
        let Some(t) = truth_transform else {
            return ReadResponse::blocked("no authority state", now.tick);
        };
        let source_tick = newest.unwrap_or(now.tick);
        match budget.on_stale {
            StaleBehavior::ReturnNone => {
                ReadResponse::blocked("stale beyond category budget", now.tick)
            }
            StaleBehavior::ReturnLastKnown => ReadResponse {
                source: ResponseSource::LastKnown,
                value: Some(SchemaPayload::Transform(t)),
                confidence: LAST_KNOWN_CONFIDENCE,
                ttl_ticks: 1,
                decision: ReadDecision::Substitute,
                source_tick,
                reason: Some("last known authoritative value"),
            },
            StaleBehavior::Extrapolate => {
                let dt = (now.tick - source_tick).max(0) as f32;
                let projected = FramedTransform {
                    position: t.position + t.velocity.scale(dt),
                    rotation: t.rotation,
                    velocity: t.velocity,
                    frame: t.frame,
                };
                // Linear decay with depth; never fully confident, never zero
                // while we still have a velocity to reason from.
                let confidence = (1.0 - 0.05 * dt).clamp(0.05, 0.5);
                ReadResponse {
                    source: ResponseSource::Extrapolated,
                    value: Some(SchemaPayload::Transform(projected)),
                    confidence,
                    ttl_ticks: 1,
                    decision: ReadDecision::Substitute,
                    source_tick,
                    reason: Some("dead-reckoned past category budget"),
                }
            }
            StaleBehavior::SoftConverge => ReadResponse {
                source: ResponseSource::StaleConverged,
                value: Some(SchemaPayload::Transform(t)),
                confidence: 0.5,
                ttl_ticks: 1,
                decision: ReadDecision::Substitute,
                source_tick,
                reason: Some("stale authority at half confidence"),
            },
        }
    }

    /// Non-transform schemas resolve against folded truth only; presentation
    /// histories don't glide discrete state.
    fn resolve_authority_only(
        &self,
        subject: NetId,
        schema: SchemaKind,
        budget: &CategoryBudget,
        now: TickTime,
    ) -> ReadResponse {
        let Some(truth) = self.truth.entity_state(subject) else {
            return ReadResponse::blocked("no authority state", now.tick);
        };
        let value = match schema {
            SchemaKind::Health => truth.health.map(|h| SchemaPayload::Health {
                current: h.current,
                maximum: h.maximum,
            }),
            SchemaKind::Inventory => truth
                .inventory
                .as_ref()
                .map(|items| SchemaPayload::Inventory {
                    items: items.clone(),
                }),
            SchemaKind::AiState => truth.ai_state.map(|a| SchemaPayload::AiState {
                goal: a.goal,
                target: a.target,
            }),
            _ => None,
        };
        let Some(value) = value else {
            return ReadResponse::blocked("no truth for schema", now.tick);
        };
        let age = now.tick - truth.last_tick;
        if age <= budget.max_stale_ticks {
            return ReadResponse {
                source: ResponseSource::Authority,
                value: Some(value),
                confidence: 1.0,
                ttl_ticks: 1,
                decision: ReadDecision::Allow,
                source_tick: truth.last_tick,
                reason: None,
            };
        }
        match budget.on_stale {
            StaleBehavior::ReturnNone => {
                ReadResponse::blocked("stale beyond category budget", now.tick)
            }
            StaleBehavior::ReturnLastKnown | StaleBehavior::Extrapolate => ReadResponse {
                source: ResponseSource::LastKnown,
                value: Some(value),
                confidence: LAST_KNOWN_CONFIDENCE,
                ttl_ticks: 1,
                decision: ReadDecision::Substitute,
                source_tick: truth.last_tick,
                reason: Some("last known authoritative value"),
            },
            StaleBehavior::SoftConverge => ReadResponse {
                source: ResponseSource::StaleConverged,
                value: Some(value),
                confidence: 0.5,
                ttl_ticks: 1,
                decision: ReadDecision::Substitute,
                source_tick: truth.last_tick,
                reason: Some("stale authority at half confidence"),
            },
        }
    }
}

/// AI preconditioning result: which candidates the AI may reason about.
#[derive(Debug, Clone, Default)]
pub struct AiTargetResolution {
    /// Response for the reading entity itself.
    pub self_data: Option<ReadResponse>,
    /// Candidates whose reads were allowed at full budget.
    pub confident_targets: Vec<NetId>,
    /// Every candidate's response.
    pub responses: BTreeMap<NetId, ReadResponse>,
}

#[derive(Default)]
struct BusState {
    tick: Tick,
    physics: FxHashMap<NetId, ReadResponse>,
    render: FxHashMap<NetId, ReadResponse>,
    render_tick: Tick,
    ai: Option<AiTargetResolution>,
    animation: FxHashMap<NetId, ReadResponse>,
}

/// Pre-resolves every read a subsystem will need at the start of its update.
///
/// Snapshots are valid for the tick they were preconditioned in; render
/// carries for one additional tick to avoid flicker. The `get_*` accessors
/// never block and never resolve — a missing entry means the subsystem
/// skipped preconditioning.
pub struct ResponseBus {
    resolver: Arc<ReadResolver>,
    state: Mutex<BusState>,
}

impl ResponseBus {
    /// Creates a bus over `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<ReadResolver>) -> Self {
        Self {
            resolver,
            state: Mutex::new(BusState::default()),
        }
    }

    /// Starts a new tick: drops snapshots that are out of their validity
    /// window (render survives one extra tick).
    pub fn begin_tick(&self, tick: Tick) {
        let mut state = self.state.lock();
        if tick != state.tick {
            state.physics.clear();
            state.ai = None;
            state.animation.clear();
        }
        if tick - state.render_tick > 1 {
            state.render.clear();
        }
        state.tick = tick;
    }

    /// Pre-resolves physics reads for `entities`.
    pub fn precondition_physics(&self, entities: &[NetId], now: TickTime) {
        let mut resolved = FxHashMap::default();
        for &id in entities {
            resolved.insert(
                id,
                self.resolver
                    .resolve(id, SchemaKind::Transform, ReadCategory::Physics, now),
            );
        }
        let mut state = self.state.lock();
        state.tick = now.tick;
        state.physics = resolved;
    }

    /// Pre-resolves render reads for `entities`.
    ///
    /// Render never blocks: entities with no answer get a default transform
    /// as a substitute.
    pub fn precondition_render(&self, entities: &[NetId], now: TickTime) {
        let mut resolved = FxHashMap::default();
        for &id in entities {
            let mut response =
                self.resolver
                    .resolve(id, SchemaKind::Transform, ReadCategory::Render, now);
            if response.decision == ReadDecision::Block {
                response = ReadResponse {
                    source: ResponseSource::None,
                    value: Some(SchemaPayload::Transform(FramedTransform::identity(
                        SpaceFrame::World,
                    ))),
                    confidence: 0.05,
                    ttl_ticks: 1,
                    decision: ReadDecision::Substitute,
                    source_tick: now.tick,
                    reason: Some("default transform for unseen entity"),
                };
            }
            resolved.insert(id, response);
        }
        let mut state = self.state.lock();
        state.tick = now.tick;
        state.render_tick = now.tick;
        state.render = resolved;
    }

    /// Pre-resolves AI reads: the reader itself plus its candidate targets.
    ///
    /// AI never guesses: only candidates whose reads were fully allowed end
    /// up in `confident_targets`.
    pub fn precondition_ai(&self, reader: NetId, candidates: &[NetId], now: TickTime) {
        let self_data = Some(
            self.resolver
                .resolve(reader, SchemaKind::Transform, ReadCategory::Ai, now),
        );
        let mut responses = BTreeMap::new();
        let mut confident = Vec::new();
        for &id in candidates {
            let response = self
                .resolver
                .resolve(id, SchemaKind::Transform, ReadCategory::Ai, now);
            if response.decision == ReadDecision::Allow {
                confident.push(id);
            }
            responses.insert(id, response);
        }
        let mut state = self.state.lock();
        state.tick = now.tick;
        state.ai = Some(AiTargetResolution {
            self_data,
            confident_targets: confident,
            responses,
        });
    }

    /// Pre-resolves animation reads for `entities`, at gameplay budget when
    /// `gameplay_linked`.
    pub fn precondition_animation(&self, entities: &[NetId], gameplay_linked: bool, now: TickTime) {
        let category = if gameplay_linked {
            ReadCategory::AnimationGameplay
        } else {
            ReadCategory::AnimationCosmetic
        };
        let mut resolved = FxHashMap::default();
        for &id in entities {
            resolved.insert(
                id,
                self.resolver.resolve(id, SchemaKind::Transform, category, now),
            );
        }
        let mut state = self.state.lock();
        state.tick = now.tick;
        state.animation = resolved;
    }

    /// Preconditioned physics answer for `id`.
    #[must_use]
    pub fn get_physics_data(&self, id: NetId) -> Option<ReadResponse> {
        self.state.lock().physics.get(&id).cloned()
    }

    /// Preconditioned render answer for `id`.
    #[must_use]
    pub fn get_render_data(&self, id: NetId) -> Option<ReadResponse> {
        self.state.lock().render.get(&id).cloned()
    }

    /// Preconditioned AI resolution.
    #[must_use]
    pub fn get_ai_data(&self) -> Option<AiTargetResolution> {
        self.state.lock().ai.clone()
    }

    /// Preconditioned animation answer for `id`.
    #[must_use]
    pub fn get_animation_data(&self, id: NetId) -> Option<ReadResponse> {
        self.state.lock().animation.get(&id).cloned()
    }
}
