// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pointer-free entity identity with ABA-safe slot reuse.
//!
//! Every cross-component reference in the engine is a [`NetId`] plus a lookup,
//! never a back-pointer. A `NetId` packs `(kind, index, generation)` into 64
//! bits; freeing a slot bumps its generation so a retained stale id resolves
//! to "absent" forever, even after the `(kind, index)` slot is reissued.
//!
//! # Invariants
//!
//! - An index is alive in exactly one generation at a time.
//! - Generation `0` is reserved: the all-zero id is the invalid id, and no
//!   live slot ever carries generation zero (wrap goes `u32::MAX → 1`).
//! - Equality is full 64-bit identity; "same slot" comparisons ignore the
//!   generation via [`NetId::slot`].

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The pool a [`NetId`] was allocated from.
///
/// Kinds partition identity space so that capacity exhaustion in one pool
/// (say, projectiles) never starves another (players).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    /// Player-controlled characters.
    Player = 1,
    /// Non-player characters.
    Npc = 2,
    /// Wildlife and other autonomous fauna.
    Animal = 3,
    /// Static structures.
    Building = 4,
    /// World items and inventory stacks.
    Item = 5,
    /// Squad / group aggregates.
    Squad = 6,
    /// Transient effects (projectiles, explosions).
    Effect = 7,
}

impl EntityKind {
    /// All kinds, in pool order.
    pub const ALL: [Self; 7] = [
        Self::Player,
        Self::Npc,
        Self::Animal,
        Self::Building,
        Self::Item,
        Self::Squad,
        Self::Effect,
    ];

    /// Decodes a kind from its wire byte.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Player),
            2 => Some(Self::Npc),
            3 => Some(Self::Animal),
            4 => Some(Self::Building),
            5 => Some(Self::Item),
            6 => Some(Self::Squad),
            7 => Some(Self::Effect),
            _ => None,
        }
    }

    /// Short lowercase label used in logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Npc => "npc",
            Self::Animal => "animal",
            Self::Building => "building",
            Self::Item => "item",
            Self::Squad => "squad",
            Self::Effect => "effect",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const INDEX_BITS: u32 = 24;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u64 = u32::MAX as u64;

/// Packed 64-bit entity identity: `(kind: 8, index: 24, generation: 32)`.
///
/// The all-zero value is [`NetId::INVALID`]; a zero generation field is
/// reserved for it and never issued for a live slot.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetId(u64);

impl NetId {
    /// The invalid identity (all zero bits).
    pub const INVALID: Self = Self(0);

    /// Packs the three fields into one id.
    ///
    /// `index` is truncated to 24 bits; callers allocate from pools small
    /// enough that truncation never occurs in practice.
    #[must_use]
    pub fn pack(kind: EntityKind, index: u32, generation: u32) -> Self {
        let raw = (u64::from(kind as u8) << 56)
            | ((u64::from(index) & INDEX_MASK) << 32)
            | u64::from(generation);
        Self(raw)
    }

    /// The raw packed value.
    #[inline]
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Reconstructs an id from its packed value.
    ///
    /// Returns `None` when the kind byte does not name a pool, except the
    /// all-zero invalid id which round-trips.
    #[must_use]
    pub fn from_u64(raw: u64) -> Option<Self> {
        if raw == 0 {
            return Some(Self::INVALID);
        }
        EntityKind::from_u8((raw >> 56) as u8).map(|_| Self(raw))
    }

    /// The pool this id belongs to, or `None` for the invalid id.
    #[must_use]
    pub fn kind(self) -> Option<EntityKind> {
        EntityKind::from_u8((self.0 >> 56) as u8)
    }

    /// Slot index within the pool.
    #[inline]
    #[must_use]
    pub fn index(self) -> u32 {
        ((self.0 >> 32) & INDEX_MASK) as u32
    }

    /// Generation the slot carried when this id was issued.
    #[inline]
    #[must_use]
    pub fn generation(self) -> u32 {
        (self.0 & GENERATION_MASK) as u32
    }

    /// True for the all-zero invalid id.
    #[inline]
    #[must_use]
    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }

    /// `(kind byte, index)` — identity of the slot, ignoring generation.
    #[inline]
    #[must_use]
    pub fn slot(self) -> (u8, u32) {
        ((self.0 >> 56) as u8, self.index())
    }
}

impl Default for NetId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "{}#{}@{}", kind, self.index(), self.generation()),
            None => f.write_str("netid:invalid"),
        }
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors from identity allocation and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The pool for `kind` has no free slots.
    #[error("identity pool exhausted for kind {kind}")]
    PoolExhausted {
        /// Pool that ran out.
        kind: EntityKind,
    },
    /// The id does not name a live slot in this allocator (stale generation,
    /// out-of-range index, wrong kind, or invalid).
    #[error("identity not live: {id}")]
    NotLive {
        /// Offending id.
        id: NetId,
    },
}

/// Fixed-capacity generational slot allocator for one [`EntityKind`].
///
/// `allocate` pops the lowest free index and stamps the slot's current
/// generation; `free` bumps the generation so outstanding copies of the old
/// id go stale atomically.
#[derive(Debug)]
pub struct NetIdAllocator {
    kind: EntityKind,
    generations: Vec<u32>,
    alive: Vec<bool>,
    free: Vec<u32>,
    live_count: usize,
}

impl NetIdAllocator {
    /// Creates an allocator with `capacity` slots, all free, generation 1.
    #[must_use]
    pub fn new(kind: EntityKind, capacity: usize) -> Self {
        let capacity = capacity.min((INDEX_MASK as usize) + 1);
        // Reverse order so allocation hands out index 0 first.
        let free = (0..capacity as u32).rev().collect();
        Self {
            kind,
            generations: vec![1; capacity],
            alive: vec![false; capacity],
            free,
            live_count: 0,
        }
    }

    /// Pool kind.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Total slot capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.generations.len()
    }

    /// Number of live slots.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Allocates the next free slot.
    ///
    /// Returns [`NetId::INVALID`] when the pool is exhausted; the registry
    /// surfaces that as [`IdentityError::PoolExhausted`].
    #[must_use]
    pub fn allocate(&mut self) -> NetId {
        let Some(index) = self.free.pop() else {
            return NetId::INVALID;
        };
        let slot = index as usize;
        self.alive[slot] = true;
        self.live_count += 1;
        NetId::pack(self.kind, index, self.generations[slot])
    }

    /// Frees a live slot and bumps its generation.
    pub fn free(&mut self, id: NetId) -> Result<(), IdentityError> {
        if !self.is_alive(id) {
            return Err(IdentityError::NotLive { id });
        }
        let slot = id.index() as usize;
        self.alive[slot] = false;
        self.live_count -= 1;
        // Generation 0 is reserved for the invalid id.
        self.generations[slot] = match self.generations[slot] {
            u32::MAX => 1,
            g => g + 1,
        };
        self.free.push(id.index());
        Ok(())
    }

    /// True iff `id` names a live slot at its issued generation.
    #[must_use]
    pub fn is_alive(&self, id: NetId) -> bool {
        if id.kind() != Some(self.kind) {
            return false;
        }
        let slot = id.index() as usize;
        slot < self.alive.len() && self.alive[slot] && self.generations[slot] == id.generation()
    }
}

/// Per-kind capacities for the identity registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCapacities {
    /// Player slots.
    pub players: usize,
    /// NPC slots.
    pub npcs: usize,
    /// Animal slots.
    pub animals: usize,
    /// Building slots.
    pub buildings: usize,
    /// Item slots.
    pub items: usize,
    /// Squad slots.
    pub squads: usize,
    /// Effect slots.
    pub effects: usize,
}

impl Default for PoolCapacities {
    fn default() -> Self {
        Self {
            players: 256,
            npcs: 4096,
            animals: 2048,
            buildings: 8192,
            items: 16384,
            squads: 512,
            effects: 1024,
        }
    }
}

impl PoolCapacities {
    fn for_kind(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Player => self.players,
            EntityKind::Npc => self.npcs,
            EntityKind::Animal => self.animals,
            EntityKind::Building => self.buildings,
            EntityKind::Item => self.items,
            EntityKind::Squad => self.squads,
            EntityKind::Effect => self.effects,
        }
    }
}

/// Thread-safe registry of one [`NetIdAllocator`] per [`EntityKind`].
///
/// Each pool sits behind its own mutex so allocation traffic in one kind
/// never contends with another. All operations are O(1) under the lock.
#[derive(Debug)]
pub struct IdentityRegistry {
    pools: Vec<parking_lot::Mutex<NetIdAllocator>>,
}

impl IdentityRegistry {
    /// Builds the registry from per-kind capacities.
    #[must_use]
    pub fn new(capacities: &PoolCapacities) -> Self {
        let pools = EntityKind::ALL
            .iter()
            .map(|&kind| parking_lot::Mutex::new(NetIdAllocator::new(kind, capacities.for_kind(kind))))
            .collect();
        Self { pools }
    }

    fn pool(&self, kind: EntityKind) -> &parking_lot::Mutex<NetIdAllocator> {
        // ALL is ordered by discriminant, which starts at 1.
        &self.pools[(kind as u8 as usize) - 1]
    }

    /// Allocates an id from `kind`'s pool.
    pub fn allocate(&self, kind: EntityKind) -> Result<NetId, IdentityError> {
        let id = self.pool(kind).lock().allocate();
        if id.is_invalid() {
            return Err(IdentityError::PoolExhausted { kind });
        }
        Ok(id)
    }

    /// Frees `id`, bumping its slot generation.
    pub fn free(&self, id: NetId) -> Result<(), IdentityError> {
        let kind = id.kind().ok_or(IdentityError::NotLive { id })?;
        self.pool(kind).lock().free(id)
    }

    /// True iff `id` is live at its issued generation.
    #[must_use]
    pub fn is_alive(&self, id: NetId) -> bool {
        id.kind()
            .is_some_and(|kind| self.pool(kind).lock().is_alive(id))
    }

    /// Live slot count for `kind`.
    #[must_use]
    pub fn live_count(&self, kind: EntityKind) -> usize {
        self.pool(kind).lock().live_count()
    }

    /// Capacity for `kind`.
    #[must_use]
    pub fn capacity(&self, kind: EntityKind) -> usize {
        self.pool(kind).lock().capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        let id = NetId::pack(EntityKind::Npc, 0x00ab_cdef, 7);
        assert_eq!(id.kind(), Some(EntityKind::Npc));
        assert_eq!(id.index(), 0x00ab_cdef);
        assert_eq!(id.generation(), 7);
        assert_eq!(NetId::from_u64(id.as_u64()), Some(id));
    }

    #[test]
    fn invalid_id_is_all_zero() {
        assert_eq!(NetId::INVALID.as_u64(), 0);
        assert!(NetId::INVALID.is_invalid());
        assert_eq!(NetId::INVALID.kind(), None);
        assert_eq!(NetId::from_u64(0), Some(NetId::INVALID));
    }

    #[test]
    fn generation_bumps_on_free_and_stale_id_goes_absent() {
        let mut alloc = NetIdAllocator::new(EntityKind::Player, 8);
        let first = alloc.allocate();
        assert_eq!(first.generation(), 1);
        assert!(alloc.is_alive(first));

        alloc.free(first).expect("free live id");
        assert!(!alloc.is_alive(first));

        // Same slot comes back with the next generation.
        let mut second = alloc.allocate();
        while second.index() != first.index() {
            second = alloc.allocate();
        }
        assert_eq!(second.slot(), first.slot());
        assert_eq!(second.generation(), 2);
        assert!(alloc.is_alive(second));
        assert!(!alloc.is_alive(first));
    }

    #[test]
    fn exhausted_pool_returns_invalid() {
        let mut alloc = NetIdAllocator::new(EntityKind::Squad, 2);
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(!a.is_invalid());
        assert!(!b.is_invalid());
        assert!(alloc.allocate().is_invalid());
    }

    #[test]
    fn registry_surfaces_exhaustion_as_error() {
        let caps = PoolCapacities {
            players: 1,
            ..PoolCapacities::default()
        };
        let reg = IdentityRegistry::new(&caps);
        let id = reg.allocate(EntityKind::Player).expect("first allocation");
        assert_eq!(
            reg.allocate(EntityKind::Player),
            Err(IdentityError::PoolExhausted {
                kind: EntityKind::Player
            })
        );
        reg.free(id).expect("free");
        assert!(reg.allocate(EntityKind::Player).is_ok());
    }

    #[test]
    fn double_free_is_rejected() {
        let mut alloc = NetIdAllocator::new(EntityKind::Item, 4);
        let id = alloc.allocate();
        alloc.free(id).expect("first free");
        assert_eq!(alloc.free(id), Err(IdentityError::NotLive { id }));
    }

    #[test]
    fn generation_wrap_skips_zero() {
        let mut alloc = NetIdAllocator::new(EntityKind::Effect, 1);
        alloc.generations[0] = u32::MAX;
        let id = alloc.allocate();
        assert_eq!(id.generation(), u32::MAX);
        alloc.free(id).expect("free");
        let next = alloc.allocate();
        assert_eq!(next.generation(), 1);
    }
}
