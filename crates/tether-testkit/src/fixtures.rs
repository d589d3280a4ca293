// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pre-wired coordinator fixtures.

use std::sync::Arc;

use tether_core::{
    AuthorityOwner, AuthorityScope, CoreConfig, Coordinator, EntityKind, FramedTransform,
    MemoryHandle, NetId, Quat, SchemaPayload, SpaceFrame, Vec3,
};

use crate::actuator::MockActuator;

/// A coordinator wired to a [`MockActuator`], plus the mock itself.
pub struct CoreFixture {
    /// The coordinator under test.
    pub coordinator: Coordinator,
    /// The scripted actuator behind it.
    pub actuator: Arc<MockActuator>,
}

impl CoreFixture {
    /// Builds a fixture with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    /// Builds a fixture with an explicit configuration.
    #[must_use]
    pub fn with_config(config: CoreConfig) -> Self {
        let actuator = Arc::new(MockActuator::new());
        let coordinator = Coordinator::new(config, actuator.clone());
        Self {
            coordinator,
            actuator,
        }
    }
}

impl Default for CoreFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers a server-owned entity with full scope, a valid handle, and an
/// initial World transform at the origin. Returns its id.
pub fn spawn_server_entity(
    fixture: &CoreFixture,
    kind: EntityKind,
    handle: MemoryHandle,
) -> NetId {
    fixture.actuator.set_transform(handle, Vec3::ZERO, Quat::IDENTITY);
    fixture
        .coordinator
        .register_entity(
            kind,
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
        .expect("fixture registration failed")
}
