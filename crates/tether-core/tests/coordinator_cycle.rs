// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use tether_core::{
    persist, ConfidenceFlags, ContainerEventKind, CoreConfig, EntityKind, MemoryHandle, NetId,
    SchemaPayload, Vec3,
};
use tether_testkit::{spawn_server_entity, CoreFixture, ObservationBuilder};

#[test]
fn full_pipeline_observation_to_memory() {
    let fixture = CoreFixture::new();
    let subject = spawn_server_entity(&fixture, EntityKind::Player, MemoryHandle(0x500));
    let c = &fixture.coordinator;

    let tick = c.clock().tick();
    let _ = c.info_ring().enqueue(
        ObservationBuilder::new(subject, NetId::INVALID)
            .position(Vec3::new(3.0, 0.0, 0.0))
            .at_tick(tick)
            .flags(ConfidenceFlags::FORCED_ACCEPT)
            .build(),
        tick,
    );
    let report = c.run_cycle();

    assert_eq!(report.observations_processed, 1);
    assert_eq!(report.committed, 1);
    assert_eq!(report.error, None);

    // Truth, presentation, and game memory all agree.
    let truth = c.truth().entity_state(subject).expect("truth");
    assert_eq!(
        truth.transform.map(|t| t.position),
        Some(Vec3::new(3.0, 0.0, 0.0))
    );
    let written = fixture
        .actuator
        .transform(MemoryHandle(0x500))
        .expect("memory written");
    assert!(written.0.distance(Vec3::new(3.0, 0.0, 0.0)) < 1e-4);

    // Verification passes next cycle.
    let next = c.run_cycle();
    assert_eq!(next.verifications_ok, 1);
    assert_eq!(next.verifications_failed, 0);
}

#[test]
fn actuator_read_errors_retry_once_then_count_as_failures() {
    let fixture = CoreFixture::new();
    let subject = spawn_server_entity(&fixture, EntityKind::Player, MemoryHandle(0x501));
    let c = &fixture.coordinator;

    let tick = c.clock().tick();
    let _ = c.info_ring().enqueue(
        ObservationBuilder::new(subject, NetId::INVALID)
            .position(Vec3::new(1.0, 0.0, 0.0))
            .at_tick(tick)
            .flags(ConfidenceFlags::FORCED_ACCEPT)
            .build(),
        tick,
    );
    let _ = c.run_cycle();

    // One transient failure: the retry succeeds and verification passes.
    fixture.actuator.fail_next_reads(1);
    let report = c.run_cycle();
    assert_eq!(report.verifications_ok, 1);
    assert_eq!(report.verifications_failed, 0);
}

#[test]
fn persistent_actuator_timeouts_surface_as_verification_failures() {
    let fixture = CoreFixture::new();
    let subject = spawn_server_entity(&fixture, EntityKind::Player, MemoryHandle(0x502));
    let c = &fixture.coordinator;

    let tick = c.clock().tick();
    let _ = c.info_ring().enqueue(
        ObservationBuilder::new(subject, NetId::INVALID)
            .position(Vec3::new(1.0, 0.0, 0.0))
            .at_tick(tick)
            .flags(ConfidenceFlags::FORCED_ACCEPT)
            .build(),
        tick,
    );
    let _ = c.run_cycle();

    fixture.actuator.timeout_next_reads(2);
    let report = c.run_cycle();
    assert_eq!(report.verifications_ok, 0);
    assert_eq!(report.verifications_failed, 1);
}

#[test]
fn outbound_stream_carries_only_accepted_commits() {
    let fixture = CoreFixture::new();
    let subject = spawn_server_entity(&fixture, EntityKind::Player, MemoryHandle(0x503));
    let c = &fixture.coordinator;

    // One good observation, one teleport.
    for x in [1.0_f32, 400.0] {
        let tick = c.clock().tick();
        let _ = c.info_ring().enqueue(
            ObservationBuilder::new(subject, NetId::INVALID)
                .position(Vec3::new(x, 0.0, 0.0))
                .at_tick(tick)
                .flags(ConfidenceFlags::FORCED_ACCEPT)
                .build(),
            tick,
        );
        let _ = c.run_cycle();
    }

    // A broadcaster consuming commits_since sees accepted commits only.
    let stream = c.truth().commits_since(0);
    assert!(stream
        .iter()
        .all(|commit| commit.commit_id > 0 && commit.reason.is_none()));
    assert!(stream.iter().any(|commit| {
        commit
            .payload
            .as_transform()
            .is_some_and(|t| t.position.distance(Vec3::new(1.0, 0.0, 0.0)) < 1e-4)
    }));
    assert!(!stream.iter().any(|commit| {
        commit
            .payload
            .as_transform()
            .is_some_and(|t| t.position.x > 100.0)
    }));
}

#[test]
fn container_event_stream_records_lifecycle() {
    let fixture = CoreFixture::new();
    let c = &fixture.coordinator;
    let subject = spawn_server_entity(&fixture, EntityKind::Npc, MemoryHandle(0x504));
    c.unregister_entity(subject, tether_core::DespawnReason::Unloaded)
        .expect("unregister");

    let (events, head) = c.container().events_since(0);
    assert_eq!(head, 2);
    assert_eq!(events[0].kind, ContainerEventKind::Spawn);
    assert_eq!(events[1].kind, ContainerEventKind::Despawn);
    assert_eq!(events[0].entity, subject);
}

#[test]
fn snapshot_resume_round_trip() {
    let config = CoreConfig {
        snapshot_interval: 5,
        ..CoreConfig::default()
    };
    let fixture = CoreFixture::with_config(config);
    let subject = spawn_server_entity(&fixture, EntityKind::Player, MemoryHandle(0x505));
    let c = &fixture.coordinator;

    for i in 0..12 {
        let tick = c.clock().tick();
        let _ = c.info_ring().enqueue(
            ObservationBuilder::new(subject, NetId::INVALID)
                .position(Vec3::new(i as f32, 0.0, 0.0))
                .at_tick(tick)
                .flags(ConfidenceFlags::FORCED_ACCEPT)
                .build(),
            tick,
        );
        let _ = c.run_cycle();
    }

    let mut buf = Vec::new();
    let saved_at = persist::save_latest(c.truth(), &mut buf).expect("save");
    assert!(saved_at >= 5);

    // A fresh core resumes from the snapshot and replays the tail.
    let resumed = CoreFixture::with_config(CoreConfig {
        snapshot_interval: 5,
        ..CoreConfig::default()
    });
    let resumed_id = persist::resume(resumed.coordinator.truth(), buf.as_slice()).expect("resume");
    assert_eq!(resumed_id, saved_at);

    let tail = c.truth().commits_since(resumed_id);
    let restored = resumed
        .coordinator
        .truth()
        .entity_state(subject)
        .expect("restored truth");
    // Snapshot state plus tail replay covers the full history.
    assert_eq!(restored.last_commit_id, resumed_id);
    assert!(!tail.is_empty() || restored.last_commit_id == c.truth().latest_commit_id());
}

#[test]
fn sanity_six_tuple_is_answerable_for_every_live_entity() {
    let fixture = CoreFixture::new();
    let c = &fixture.coordinator;
    let mut subjects = Vec::new();
    for i in 0..4 {
        subjects.push(spawn_server_entity(
            &fixture,
            EntityKind::Npc,
            MemoryHandle(0x600 + i),
        ));
    }
    for &subject in &subjects {
        let tick = c.clock().tick();
        let _ = c.info_ring().enqueue(
            ObservationBuilder::new(subject, NetId::INVALID)
                .position(Vec3::new(1.0, 0.0, 0.0))
                .at_tick(tick)
                .flags(ConfidenceFlags::FORCED_ACCEPT)
                .build(),
            tick,
        );
    }
    let _ = c.run_cycle();

    for subject in subjects {
        let sanity = c.describe(subject).expect("live entity must be describable");
        assert_eq!(sanity.who, subject);
        assert!(sanity.when.1 > 0, "when: commit id must be set");
        assert!(sanity.who_decided.1 > 0, "who-decided: epoch must be set");
        assert!(sanity.how_sure > 0.0, "how-sure must be non-empty");
    }
}

#[test]
fn health_observations_flow_to_scalar_history() {
    let fixture = CoreFixture::new();
    let subject = spawn_server_entity(&fixture, EntityKind::Player, MemoryHandle(0x507));
    let c = &fixture.coordinator;

    let tick = c.clock().tick();
    let _ = c.info_ring().enqueue(
        ObservationBuilder::new(subject, NetId::INVALID)
            .payload(SchemaPayload::Health {
                current: 65.0,
                maximum: 100.0,
            })
            .at_tick(tick)
            .flags(ConfidenceFlags::FORCED_ACCEPT)
            .build(),
        tick,
    );
    let _ = c.run_cycle();

    let now = c.clock().tick() as f64;
    assert_eq!(
        c.attributes()
            .scalar_at(subject, tether_core::SchemaKind::Health, now)
            .map(|(v, _)| v),
        Some(65.0)
    );
    assert_eq!(
        c.truth()
            .entity_state(subject)
            .and_then(|t| t.health)
            .map(|h| h.current),
        Some(65.0)
    );
}
