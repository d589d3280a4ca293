// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use std::sync::Arc;

use tether_core::{
    AuthorityCoordinate, AuthorityOwner, AuthorityScope, AuthorityTracker, CommitOp,
    CommitRequest, CommitResult, EntityKind, FramedTransform, NetId, Quat, SchemaPayload,
    TruthLog, TruthLogConfig, Vec3,
};

fn granted_log(snapshot_interval: u64, subjects: &[NetId]) -> TruthLog {
    let tracker = Arc::new(AuthorityTracker::new());
    for &s in subjects {
        tracker
            .publish(s, AuthorityCoordinate::server(AuthorityScope::ALL, 1, 0))
            .expect("grant");
    }
    TruthLog::new(
        TruthLogConfig {
            capacity: 8192,
            snapshot_interval,
        },
        tracker,
    )
}

fn set_transform(log: &TruthLog, subject: NetId, x: f32, tick: i64) -> tether_core::Commit {
    log.commit(CommitRequest {
        subject,
        op: CommitOp::Set,
        payload: SchemaPayload::Transform(FramedTransform::world(
            Vec3::new(x, 0.0, 0.0),
            Quat::IDENTITY,
            Vec3::ZERO,
        )),
        tick,
        source_id: NetId::INVALID,
        owner: AuthorityOwner::Server,
        owner_id: NetId::INVALID,
    })
}

fn set_health(log: &TruthLog, subject: NetId, current: f32, tick: i64) -> tether_core::Commit {
    log.commit(CommitRequest {
        subject,
        op: CommitOp::Set,
        payload: SchemaPayload::Health {
            current,
            maximum: 100.0,
        },
        tick,
        source_id: NetId::INVALID,
        owner: AuthorityOwner::Server,
        owner_id: NetId::INVALID,
    })
}

#[test]
fn replay_equals_live_state_at_every_commit() {
    let a = NetId::pack(EntityKind::Player, 1, 1);
    let b = NetId::pack(EntityKind::Npc, 2, 1);
    let log = granted_log(7, &[a, b]);

    // Interleaved history across two entities and two schemas, with live
    // state captured after every accepted commit.
    let mut captured = Vec::new();
    for tick in 0..40 {
        let subject = if tick % 2 == 0 { a } else { b };
        let commit = if tick % 5 == 0 {
            set_health(&log, subject, 100.0 - tick as f32, tick)
        } else {
            set_transform(&log, subject, tick as f32, tick)
        };
        assert_eq!(commit.result, CommitResult::Accepted);
        captured.push((
            commit.commit_id,
            log.entity_state(a),
            log.entity_state(b),
        ));
    }

    for (commit_id, live_a, live_b) in captured {
        let rebuilt = log
            .reconstruct_at(commit_id)
            .unwrap_or_else(|| panic!("commit {commit_id} must be replayable"));
        assert_eq!(rebuilt.get(&a), live_a.as_ref(), "entity a at {commit_id}");
        assert_eq!(rebuilt.get(&b), live_b.as_ref(), "entity b at {commit_id}");
    }
}

#[test]
fn replay_lands_exactly_on_snapshot_boundaries() {
    let subject = NetId::pack(EntityKind::Player, 1, 1);
    let log = granted_log(10, &[subject]);
    for tick in 0..30 {
        let c = set_transform(&log, subject, tick as f32, tick);
        assert_eq!(c.result, CommitResult::Accepted);
    }

    // Commit 10 and 20 are snapshot boundaries; replay there must not
    // include any later commit.
    for boundary in [10_i64, 20] {
        let rebuilt = log.reconstruct_at(boundary).expect("snapshot boundary");
        let truth = rebuilt.get(&subject).expect("subject");
        assert_eq!(truth.last_commit_id, boundary);
        assert_eq!(
            truth.transform.map(|t| t.position.x),
            Some((boundary - 1) as f32)
        );
    }
}

#[test]
fn replay_refuses_rather_than_guessing() {
    let subject = NetId::pack(EntityKind::Player, 1, 1);
    let log = granted_log(1000, &[subject]);
    let c = set_transform(&log, subject, 1.0, 0);
    assert_eq!(c.result, CommitResult::Accepted);

    // Beyond the log head: absent.
    assert!(log.reconstruct_at(c.commit_id + 10).is_none());
    // Negative ids: absent.
    assert!(log.reconstruct_at(-2).is_none());
}

#[test]
fn snapshot_retention_keeps_the_newest_ten() {
    let subject = NetId::pack(EntityKind::Player, 1, 1);
    let log = granted_log(10, &[subject]);
    for tick in 0..300 {
        let c = set_transform(&log, subject, (tick % 40) as f32, tick);
        assert_eq!(c.result, CommitResult::Accepted, "tick {tick}");
    }
    assert_eq!(log.snapshot_count(), 10);
    // The newest snapshot tracks the newest interval boundary.
    assert_eq!(log.latest_snapshot().expect("snapshot").commit_id, 300);
}
