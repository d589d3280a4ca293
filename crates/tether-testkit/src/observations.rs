// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Builder for info-ring submissions.

use tether_core::{
    ConfidenceFlags, FramedTransform, InfoKind, InfoSubmission, NetId, Quat, SchemaPayload, Tick,
    Vec3,
};

/// Fluent builder over [`InfoSubmission`].
///
/// Defaults: `Observation` kind, value score 1.0, no flags, observation
/// tick 0, origin transform payload.
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    subject: NetId,
    source: NetId,
    kind: InfoKind,
    payload: SchemaPayload,
    observation_tick: Tick,
    value_score: f32,
    flags: ConfidenceFlags,
}

impl ObservationBuilder {
    /// Starts a builder for `subject` reported by `source`.
    #[must_use]
    pub fn new(subject: NetId, source: NetId) -> Self {
        Self {
            subject,
            source,
            kind: InfoKind::Observation,
            payload: SchemaPayload::Transform(FramedTransform::world(
                Vec3::ZERO,
                Quat::IDENTITY,
                Vec3::ZERO,
            )),
            observation_tick: 0,
            value_score: 1.0,
            flags: ConfidenceFlags::NONE,
        }
    }

    /// Sets the message kind.
    #[must_use]
    pub fn kind(mut self, kind: InfoKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn payload(mut self, payload: SchemaPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Sets a World-frame transform payload at `position`.
    #[must_use]
    pub fn position(self, position: Vec3) -> Self {
        self.payload(SchemaPayload::Transform(FramedTransform::world(
            position,
            Quat::IDENTITY,
            Vec3::ZERO,
        )))
    }

    /// Sets a World-frame transform payload at `position` with `velocity`.
    #[must_use]
    pub fn moving(self, position: Vec3, velocity: Vec3) -> Self {
        self.payload(SchemaPayload::Transform(FramedTransform::world(
            position,
            Quat::IDENTITY,
            velocity,
        )))
    }

    /// Sets the observation tick.
    #[must_use]
    pub fn at_tick(mut self, tick: Tick) -> Self {
        self.observation_tick = tick;
        self
    }

    /// Sets the claimed value score.
    #[must_use]
    pub fn value_score(mut self, score: f32) -> Self {
        self.value_score = score;
        self
    }

    /// Sets forced-decision flags.
    #[must_use]
    pub fn flags(mut self, flags: ConfidenceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Builds the submission.
    #[must_use]
    pub fn build(self) -> InfoSubmission {
        InfoSubmission {
            subject: self.subject,
            source: self.source,
            kind: self.kind,
            payload: self.payload,
            observation_tick: self.observation_tick,
            value_score: self.value_score,
            flags: self.flags,
        }
    }
}
