// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ring 1 — the container: what exists, what kind of thing it is, which
//! frame it lives in, and who has authority over it.
//!
//! Entries are created by `register`, mutated only through the narrow update
//! operations, and destroyed by `unregister`, which also bumps the NetId
//! generation so stale references go absent. Every mutation appends a
//! by-value [`ContainerEvent`] to a bounded in-memory ring with a monotone
//! head; consumers poll [`ContainerRing::events_since`] rather than holding
//! references into the registry.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::actuator::MemoryHandle;
use crate::authority::{
    AuthorityCoordinate, AuthorityError, AuthorityOwner, AuthorityScope, AuthorityTracker,
};
use crate::clock::Tick;
use crate::ident::{EntityKind, IdentityError, IdentityRegistry, NetId, PoolCapacities};
use crate::schema::DespawnReason;
use crate::space::SpaceFrame;

/// Minimum event ring capacity; configs below this are raised to it.
pub const MIN_EVENT_CAPACITY: usize = 4096;

/// One registered entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEntry {
    /// Stable identity.
    pub net_id: NetId,
    /// Pool kind.
    pub kind: EntityKind,
    /// Opaque actuator handle (may be invalid for unbacked entities).
    pub memory_handle: MemoryHandle,
    /// Reference frame the entity's truth is expressed in.
    pub frame: SpaceFrame,
    /// Most recently published lifecycle authority grant.
    pub authority: AuthorityCoordinate,
    /// Tick the entity was registered.
    pub spawn_tick: Tick,
    /// Tick the entity was unregistered, once dead.
    pub despawn_tick: Option<Tick>,
    /// Live flag; false only in despawn event snapshots.
    pub alive: bool,
    /// Optional game template id.
    pub template_id: Option<u32>,
    /// Tick of the last mutation through this ring.
    pub last_update_tick: Tick,
}

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerEventKind {
    /// Entity registered.
    Spawn,
    /// Entity unregistered.
    Despawn,
    /// Memory handle replaced.
    HandleUpdated,
    /// Reference frame replaced.
    FrameUpdated,
    /// Authority transferred.
    AuthorityTransferred,
}

/// By-value record of one container mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEvent {
    /// Monotone sequence number (never reused).
    pub sequence: u64,
    /// Mutation kind.
    pub kind: ContainerEventKind,
    /// Affected entity.
    pub entity: NetId,
    /// Tick of the mutation.
    pub tick: Tick,
    /// Entry state before the mutation (absent for spawns).
    pub before: Option<ContainerEntry>,
    /// Entry state after the mutation (absent for despawns).
    pub after: Option<ContainerEntry>,
}

/// Container bookkeeping failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContainerError {
    /// No live entry for `id`.
    #[error("unknown entity {0}")]
    Unknown(NetId),
    /// Identity pool failure.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// Authority bookkeeping failure.
    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

/// Non-blocking validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerDiagnostic {
    /// An alive entry's NetId is not live in the identity registry.
    DeadIdentity(NetId),
    /// An entry's recorded authority epoch lags the tracker.
    EpochMismatch {
        /// Affected entity.
        entity: NetId,
        /// Epoch recorded in the entry.
        entry_epoch: u32,
        /// Highest epoch the tracker holds.
        tracker_epoch: u32,
    },
    /// An alive entry has no usable memory handle.
    InvalidHandle(NetId),
}

struct EventRing {
    events: VecDeque<ContainerEvent>,
    capacity: usize,
    head: u64,
}

impl EventRing {
    fn push(&mut self, mut event: ContainerEvent) {
        event.sequence = self.head;
        self.head += 1;
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Ring 1: entity registry plus event log.
///
/// Owns the identity pools; shares the [`AuthorityTracker`] with the rest of
/// the core so authority lookups hit the same state the commit path checks.
pub struct ContainerRing {
    identities: IdentityRegistry,
    tracker: Arc<AuthorityTracker>,
    entries: Mutex<FxHashMap<NetId, ContainerEntry>>,
    events: Mutex<EventRing>,
}

impl ContainerRing {
    /// Creates an empty container.
    #[must_use]
    pub fn new(
        capacities: &PoolCapacities,
        event_capacity: usize,
        tracker: Arc<AuthorityTracker>,
    ) -> Self {
        Self {
            identities: IdentityRegistry::new(capacities),
            tracker,
            entries: Mutex::new(FxHashMap::default()),
            events: Mutex::new(EventRing {
                events: VecDeque::new(),
                capacity: event_capacity.max(MIN_EVENT_CAPACITY),
                head: 0,
            }),
        }
    }

    /// The shared authority tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<AuthorityTracker> {
        &self.tracker
    }

    /// Registers a new entity and publishes its initial authority.
    ///
    /// The grant's epoch is drawn from the tracker's global counter; the
    /// caller supplies owner, scope, and (for client owners) the owner id.
    pub fn register(
        &self,
        kind: EntityKind,
        handle: MemoryHandle,
        frame: SpaceFrame,
        owner: AuthorityOwner,
        owner_id: NetId,
        scope: AuthorityScope,
        tick: Tick,
        template_id: Option<u32>,
    ) -> Result<NetId, ContainerError> {
        let net_id = self.identities.allocate(kind)?;
        let coord = AuthorityCoordinate {
            owner,
            scope,
            epoch: self.tracker.next_epoch(),
            owner_id,
            granted_at: tick,
            expires_at: Tick::MAX,
        };
        if let Err(e) = self.tracker.publish(net_id, coord) {
            // Roll the allocation back; the id was never visible.
            let _ = self.identities.free(net_id);
            return Err(e.into());
        }
        let entry = ContainerEntry {
            net_id,
            kind,
            memory_handle: handle,
            frame,
            authority: coord,
            spawn_tick: tick,
            despawn_tick: None,
            alive: true,
            template_id,
            last_update_tick: tick,
        };
        self.entries.lock().insert(net_id, entry.clone());
        self.push_event(ContainerEventKind::Spawn, net_id, tick, None, Some(entry));
        debug!(entity = %net_id, kind = %kind, "registered entity");
        Ok(net_id)
    }

    /// Unregisters `id`: removes the entry, frees the NetId (bumping its
    /// generation), drops authority, and emits a despawn event.
    pub fn unregister(
        &self,
        id: NetId,
        tick: Tick,
        reason: DespawnReason,
    ) -> Result<(), ContainerError> {
        let mut before = {
            let mut entries = self.entries.lock();
            entries.remove(&id).ok_or(ContainerError::Unknown(id))?
        };
        self.tracker.remove_entity(id);
        self.identities.free(id)?;
        before.alive = false;
        before.despawn_tick = Some(tick);
        debug!(entity = %id, ?reason, "unregistered entity");
        self.push_event(ContainerEventKind::Despawn, id, tick, Some(before), None);
        Ok(())
    }

    /// Snapshot of the entry for `id`.
    #[must_use]
    pub fn get(&self, id: NetId) -> Option<ContainerEntry> {
        self.entries.lock().get(&id).cloned()
    }

    /// True iff `id` is registered and its generation is current.
    #[must_use]
    pub fn is_alive(&self, id: NetId) -> bool {
        self.identities.is_alive(id) && self.entries.lock().contains_key(&id)
    }

    /// Replaces the memory handle.
    pub fn update_handle(
        &self,
        id: NetId,
        handle: MemoryHandle,
        tick: Tick,
    ) -> Result<(), ContainerError> {
        self.mutate(id, tick, ContainerEventKind::HandleUpdated, |e| {
            e.memory_handle = handle;
        })
    }

    /// Replaces the reference frame.
    pub fn update_frame(
        &self,
        id: NetId,
        frame: SpaceFrame,
        tick: Tick,
    ) -> Result<(), ContainerError> {
        self.mutate(id, tick, ContainerEventKind::FrameUpdated, |e| {
            e.frame = frame;
        })
    }

    /// Transfers authority over `coord.scope`, epoch-gated by the tracker.
    pub fn transfer_authority(
        &self,
        id: NetId,
        coord: AuthorityCoordinate,
        tick: Tick,
    ) -> Result<(), ContainerError> {
        if !self.is_alive(id) {
            return Err(ContainerError::Unknown(id));
        }
        self.tracker.transfer(id, coord)?;
        self.mutate(id, tick, ContainerEventKind::AuthorityTransferred, |e| {
            e.authority = coord;
        })
    }

    fn mutate(
        &self,
        id: NetId,
        tick: Tick,
        kind: ContainerEventKind,
        f: impl FnOnce(&mut ContainerEntry),
    ) -> Result<(), ContainerError> {
        let (before, after) = {
            let mut entries = self.entries.lock();
            let entry = entries.get_mut(&id).ok_or(ContainerError::Unknown(id))?;
            let before = entry.clone();
            f(entry);
            entry.last_update_tick = tick;
            (before, entry.clone())
        };
        self.push_event(kind, id, tick, Some(before), Some(after));
        Ok(())
    }

    /// Snapshot of every live entry, unordered.
    #[must_use]
    pub fn iter_all(&self) -> Vec<ContainerEntry> {
        self.entries.lock().values().cloned().collect()
    }

    /// Snapshot of live entries of `kind`.
    #[must_use]
    pub fn iter_kind(&self, kind: EntityKind) -> Vec<ContainerEntry> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Snapshot of live entries whose lifecycle authority is held by `owner`.
    #[must_use]
    pub fn iter_owner(&self, owner: AuthorityOwner) -> Vec<ContainerEntry> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.authority.owner == owner)
            .cloned()
            .collect()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no entities are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Events with sequence `≥ since` still held in the ring, plus the next
    /// sequence to poll from.
    ///
    /// If `since` has already been evicted the caller silently starts from
    /// the oldest retained event; the returned cursor lets it detect the gap.
    #[must_use]
    pub fn events_since(&self, since: u64) -> (Vec<ContainerEvent>, u64) {
        let ring = self.events.lock();
        let events: Vec<ContainerEvent> = ring
            .events
            .iter()
            .filter(|e| e.sequence >= since)
            .cloned()
            .collect();
        (events, ring.head)
    }

    /// Current event head (sequence the next event will take).
    #[must_use]
    pub fn event_head(&self) -> u64 {
        self.events.lock().head
    }

    fn push_event(
        &self,
        kind: ContainerEventKind,
        entity: NetId,
        tick: Tick,
        before: Option<ContainerEntry>,
        after: Option<ContainerEntry>,
    ) {
        self.events.lock().push(ContainerEvent {
            sequence: 0, // stamped by the ring
            kind,
            entity,
            tick,
            before,
            after,
        });
    }

    /// Diagnostic sweep: reports inconsistencies without blocking anything.
    #[must_use]
    pub fn validate(&self) -> Vec<ContainerDiagnostic> {
        let entries = self.entries.lock();
        let mut findings = Vec::new();
        for entry in entries.values() {
            if !self.identities.is_alive(entry.net_id) {
                findings.push(ContainerDiagnostic::DeadIdentity(entry.net_id));
            }
            let tracker_epoch = self.tracker.epoch_of(entry.net_id);
            if tracker_epoch < entry.authority.epoch {
                findings.push(ContainerDiagnostic::EpochMismatch {
                    entity: entry.net_id,
                    entry_epoch: entry.authority.epoch,
                    tracker_epoch,
                });
            }
            if entry.memory_handle.is_invalid() {
                findings.push(ContainerDiagnostic::InvalidHandle(entry.net_id));
            }
        }
        if !findings.is_empty() {
            warn!(count = findings.len(), "container validation findings");
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring() -> ContainerRing {
        ContainerRing::new(
            &PoolCapacities::default(),
            MIN_EVENT_CAPACITY,
            Arc::new(AuthorityTracker::new()),
        )
    }

    fn register_npc(ring: &ContainerRing, tick: Tick) -> NetId {
        ring.register(
            EntityKind::Npc,
            MemoryHandle(0xbeef),
            SpaceFrame::World,
            AuthorityOwner::Server,
            NetId::INVALID,
            AuthorityScope::ALL,
            tick,
            Some(42),
        )
        .expect("register")
    }

    #[test]
    fn register_publishes_authority_and_emits_spawn() {
        let ring = ring();
        let id = register_npc(&ring, 5);

        assert!(ring.is_alive(id));
        let entry = ring.get(id).expect("entry");
        assert_eq!(entry.spawn_tick, 5);
        assert_eq!(entry.template_id, Some(42));
        assert!(ring.tracker().can_write(
            id,
            AuthorityOwner::Server,
            NetId::INVALID,
            AuthorityScope::TRANSFORM,
            5
        ));

        let (events, head) = ring.events_since(0);
        assert_eq!(head, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ContainerEventKind::Spawn);
        assert!(events[0].before.is_none());
        assert_eq!(events[0].after.as_ref().map(|e| e.net_id), Some(id));
    }

    #[test]
    fn unregister_bumps_generation_and_clears_authority() {
        let ring = ring();
        let id = register_npc(&ring, 1);
        ring.unregister(id, 9, DespawnReason::Death).expect("unregister");

        assert!(!ring.is_alive(id));
        assert!(ring.get(id).is_none());
        assert!(!ring.tracker().can_write(
            id,
            AuthorityOwner::Server,
            NetId::INVALID,
            AuthorityScope::TRANSFORM,
            9
        ));

        // Slot reuse produces a different generation.
        let next = register_npc(&ring, 10);
        if next.slot() == id.slot() {
            assert_ne!(next.generation(), id.generation());
        }
        assert!(!ring.is_alive(id));

        let (events, _) = ring.events_since(0);
        let despawn = events
            .iter()
            .find(|e| e.kind == ContainerEventKind::Despawn)
            .expect("despawn event");
        let before = despawn.before.as_ref().expect("before snapshot");
        assert!(!before.alive);
        assert_eq!(before.despawn_tick, Some(9));
    }

    #[test]
    fn updates_emit_events_with_before_and_after() {
        let ring = ring();
        let id = register_npc(&ring, 1);
        ring.update_handle(id, MemoryHandle(0xcafe), 2).expect("handle");
        ring.update_frame(id, SpaceFrame::Physics, 3).expect("frame");

        let entry = ring.get(id).expect("entry");
        assert_eq!(entry.memory_handle, MemoryHandle(0xcafe));
        assert_eq!(entry.frame, SpaceFrame::Physics);
        assert_eq!(entry.last_update_tick, 3);

        let (events, _) = ring.events_since(1);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ContainerEventKind::HandleUpdated);
        assert_eq!(
            events[0].before.as_ref().map(|e| e.memory_handle),
            Some(MemoryHandle(0xbeef))
        );
        assert_eq!(events[1].kind, ContainerEventKind::FrameUpdated);
    }

    #[test]
    fn transfer_updates_entry_and_tracker_together() {
        let ring = ring();
        let id = register_npc(&ring, 1);
        let client = NetId::pack(EntityKind::Player, 0, 1);
        let coord = AuthorityCoordinate::client(
            AuthorityScope::TRANSFORM,
            ring.tracker().next_epoch(),
            client,
            2,
        );
        ring.transfer_authority(id, coord, 2).expect("transfer");

        assert!(ring.tracker().can_write(
            id,
            AuthorityOwner::Client,
            client,
            AuthorityScope::TRANSFORM,
            3
        ));
        let entry = ring.get(id).expect("entry");
        assert_eq!(entry.authority.owner, AuthorityOwner::Client);
    }

    #[test]
    fn events_since_reports_monotone_head_across_eviction() {
        let ring = ring();
        let id = register_npc(&ring, 0);
        for t in 0..(MIN_EVENT_CAPACITY as i64 + 10) {
            ring.update_frame(id, SpaceFrame::World, t).expect("update");
        }
        // head counts every event ever; ring retains only the newest window.
        let head = ring.event_head();
        assert_eq!(head, MIN_EVENT_CAPACITY as u64 + 11);
        let (events, _) = ring.events_since(0);
        assert_eq!(events.len(), MIN_EVENT_CAPACITY);
    }

    #[test]
    fn validate_flags_invalid_handles() {
        let ring = ring();
        let id = ring
            .register(
                EntityKind::Item,
                MemoryHandle::INVALID,
                SpaceFrame::World,
                AuthorityOwner::Server,
                NetId::INVALID,
                AuthorityScope::ALL,
                0,
                None,
            )
            .expect("register");
        let findings = ring.validate();
        assert!(findings.contains(&ContainerDiagnostic::InvalidHandle(id)));
    }
}
