// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tether-core: the authoritative state-coordination core of a tick-based
//! multiplayer synchronization engine.
//!
//! Four rings turn untrusted observations into bounded, consistent answers:
//!
//! 1. **Container** ([`container`]) — the ontology: what exists, its kind,
//!    frame, and authority.
//! 2. **Info** ([`info`]) — the inbox of untrusted observations, scored by
//!    confidence.
//! 3. **Truth** ([`truth`]) — the write-ahead log of accepted state changes,
//!    with snapshots and deterministic replay.
//! 4. **Attribute** ([`attribute`]) — bounded sample histories that
//!    interpolate and extrapolate committed truth for presentation.
//!
//! The [`resolve`] layer answers categorized subsystem reads within
//! staleness budgets, and the [`coordinator`] drives the whole
//! measure → decide → actuate → verify cycle at a fixed tick rate. External
//! collaborators (the game-memory actuator, the network transport) are
//! consumed through the narrow seams in [`actuator`] and the ring APIs.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

/// Memory actuator boundary (opaque handles, read/write/snap seams).
pub mod actuator;
/// Ring 4: sample histories, interpolation, write gating.
pub mod attribute;
/// Scoped write authority and epoch-gated transfers.
pub mod authority;
/// Tick clock, tick time, tick ranges.
pub mod clock;
/// Core configuration and validation.
pub mod config;
/// Confidence scoring, reliability ledger, consensus bucketing.
pub mod confidence;
/// Ring 1: entity registry and event log.
pub mod container;
/// The control loop.
pub mod coordinator;
/// Pointer-free identity with generational slot reuse.
pub mod ident;
/// Ring 2: the bounded observation inbox.
pub mod info;
/// Deterministic vector/quaternion math.
pub mod math;
/// Snapshot persistence (CBOR) and resume.
pub mod persist;
/// Categorized read resolution and preconditioning.
pub mod resolve;
/// Typed, self-describing state payloads.
pub mod schema;
/// Reference frames and framed transforms.
pub mod space;
/// Ring 3: the write-ahead truth log.
pub mod truth;

// Re-exports for stable public API
pub use actuator::{ActuatorError, MemoryActuator, MemoryHandle};
pub use attribute::{AttributeRing, GateConfig, SampleMode, SampledTransform, WriteDecision};
pub use authority::{
    AuthorityCoordinate, AuthorityError, AuthorityOwner, AuthorityScope, AuthorityTracker,
};
pub use clock::{Tick, TickClock, TickRange, TickTime};
pub use config::{ConfigError, CoreConfig};
pub use confidence::{
    build_consensus, Confidence, ConfidenceDecision, ConfidenceFlags, ConsensusOutcome,
    DecisionThresholds, ReliabilityLedger, SourceStats,
};
pub use container::{
    ContainerEntry, ContainerError, ContainerEvent, ContainerEventKind, ContainerRing,
};
pub use coordinator::{Coordinator, CycleReport, SanityReport};
pub use ident::{EntityKind, IdentityError, IdentityRegistry, NetId, PoolCapacities};
pub use info::{InfoEntry, InfoFilter, InfoId, InfoKind, InfoRing, InfoStatus, InfoSubmission};
pub use math::{Quat, Vec3};
pub use persist::{load_snapshot, resume, save_latest, save_snapshot, PersistError};
pub use resolve::{
    AiTargetResolution, CategoryBudget, ReadCategory, ReadDecision, ReadResolver, ReadResponse,
    ResponseBus, ResponseSource, StaleBehavior,
};
pub use schema::{
    AiGoal, DespawnReason, ItemStack, PayloadHash, SchemaKind, SchemaPayload,
};
pub use space::{
    FrameError, FramedTransform, ParentLookup, SpaceFrame, SpaceResolver, WorldResolution,
};
pub use truth::{
    Commit, CommitConstraint, CommitId, CommitOp, CommitRequest, CommitResult, EntityTruth,
    HealthRangeConstraint, TeleportConstraint, TruthLog, TruthLogConfig, TruthSnapshot,
};
