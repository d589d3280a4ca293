// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use tether_core::{
    CommitOp, CommitRequest, CommitResult, EntityKind, InfoKind, MemoryHandle, NetId,
    SchemaPayload, Vec3,
};
use tether_testkit::{spawn_server_entity, CoreFixture, ObservationBuilder};

#[test]
fn teleport_commit_is_rejected_and_truth_unchanged() {
    let fixture = CoreFixture::new();
    let subject = spawn_server_entity(&fixture, EntityKind::Player, MemoryHandle(0x100));
    let truth = fixture.coordinator.truth();

    let p0 = truth.commit(CommitRequest {
        subject,
        op: CommitOp::Set,
        payload: ObservationBuilder::new(subject, NetId::INVALID)
            .position(Vec3::new(0.0, 0.0, 0.0))
            .build()
            .payload,
        tick: 0,
        source_id: NetId::INVALID,
        owner: tether_core::AuthorityOwner::Server,
        owner_id: NetId::INVALID,
    });
    assert_eq!(p0.result, CommitResult::Accepted);

    let p1 = truth.commit(CommitRequest {
        subject,
        op: CommitOp::Set,
        payload: ObservationBuilder::new(subject, NetId::INVALID)
            .position(Vec3::new(100.0, 0.0, 0.0))
            .build()
            .payload,
        tick: 1,
        source_id: NetId::INVALID,
        owner: tether_core::AuthorityOwner::Server,
        owner_id: NetId::INVALID,
    });
    assert_eq!(p1.result, CommitResult::Rejected);
    assert!(
        p1.reason.as_deref().expect("reason").contains("Teleport"),
        "reason must name the teleport constraint: {:?}",
        p1.reason
    );

    let state = truth.entity_state(subject).expect("truth state");
    assert_eq!(
        state.transform.map(|t| t.position),
        Some(Vec3::new(0.0, 0.0, 0.0)),
        "rejected commit must not move the entity"
    );
}

#[test]
fn teleporting_observation_degrades_source_through_the_full_pipeline() {
    let fixture = CoreFixture::new();
    let subject = spawn_server_entity(&fixture, EntityKind::Player, MemoryHandle(0x101));
    let source = NetId::pack(EntityKind::Player, 40, 1);
    let c = &fixture.coordinator;

    // A plausible observation, then an impossible jump from the same source.
    let tick = c.clock().tick();
    let _ = c.info_ring().enqueue(
        ObservationBuilder::new(subject, source)
            .kind(InfoKind::Observation)
            .position(Vec3::new(1.0, 0.0, 0.0))
            .at_tick(tick)
            .flags(tether_core::ConfidenceFlags::FORCED_ACCEPT)
            .build(),
        tick,
    );
    let _ = c.run_cycle();

    let tick = c.clock().tick();
    let _ = c.info_ring().enqueue(
        ObservationBuilder::new(subject, source)
            .kind(InfoKind::Observation)
            .position(Vec3::new(500.0, 0.0, 0.0))
            .at_tick(tick)
            .flags(tether_core::ConfidenceFlags::FORCED_ACCEPT)
            .build(),
        tick,
    );
    let before = c.info_ring().ledger().reliability_of(source);
    let report = c.run_cycle();

    assert_eq!(report.rejected, 1);
    assert!(c.info_ring().ledger().reliability_of(source) < before);

    // No accepted transform commit may exceed the movement budget.
    for pair in c
        .truth()
        .commits_for_entity(subject, None)
        .windows(2)
        .filter(|w| w[0].payload.as_transform().is_some() && w[1].payload.as_transform().is_some())
    {
        let a = pair[0].payload.as_transform().expect("transform");
        let b = pair[1].payload.as_transform().expect("transform");
        let dt = (pair[1].tick - pair[0].tick).max(1) as f32;
        assert!(a.position.distance(b.position) <= 50.0 * dt + 1e-3);
    }
}

#[test]
fn health_commits_outside_range_are_rejected() {
    let fixture = CoreFixture::new();
    let subject = spawn_server_entity(&fixture, EntityKind::Npc, MemoryHandle(0x102));
    let truth = fixture.coordinator.truth();

    let overfull = truth.commit(CommitRequest {
        subject,
        op: CommitOp::Set,
        payload: SchemaPayload::Health {
            current: 250.0,
            maximum: 100.0,
        },
        tick: 0,
        source_id: NetId::INVALID,
        owner: tether_core::AuthorityOwner::Server,
        owner_id: NetId::INVALID,
    });
    assert_eq!(overfull.result, CommitResult::Rejected);
    assert!(overfull
        .reason
        .as_deref()
        .expect("reason")
        .contains("HealthRange"));
}
