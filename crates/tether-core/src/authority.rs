// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scoped write authority: who may write what, per entity, per epoch.
//!
//! Authority is *scoped*: one entity may have server-owned inventory and
//! client-owned position at the same time. Each grant is an
//! [`AuthorityCoordinate`] covering a bitset of fields ([`AuthorityScope`])
//! for a tick window. Transfers are epoch-gated — a transfer whose epoch is
//! not strictly greater than every overlapping grant's epoch fails, and the
//! tracker's global epoch counter is the tiebreaker across competing
//! transfer requests.
//!
//! # Invariant
//!
//! At any tick, for any `(entity, scope bit)` there is at most one grant
//! whose scope contains that bit: grants held per entity are pairwise
//! scope-disjoint, maintained by carving overlapping bits out of older
//! grants on every publish/transfer.

use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Tick;
use crate::ident::NetId;

/// Who holds a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorityOwner {
    /// The authoritative server.
    Server,
    /// A connected client; [`AuthorityCoordinate::owner_id`] names which one.
    Client,
    /// The session host (listen-server player).
    Host,
    /// A local subsystem (physics, AI) granted temporary write access.
    Subsystem,
    /// Shared advisory authority; commits still run the ordinary
    /// confidence pipeline.
    Shared,
}

impl fmt::Display for AuthorityOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Server => "server",
            Self::Client => "client",
            Self::Host => "host",
            Self::Subsystem => "subsystem",
            Self::Shared => "shared",
        };
        f.write_str(s)
    }
}

/// Bitset of entity fields a grant covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct AuthorityScope(pub u32);

impl AuthorityScope {
    /// No fields.
    pub const EMPTY: Self = Self(0);
    /// Position / rotation / velocity.
    pub const TRANSFORM: Self = Self(1);
    /// Health and limb state.
    pub const HEALTH: Self = Self(1 << 1);
    /// Inventory contents.
    pub const INVENTORY: Self = Self(1 << 2);
    /// AI goals and targets.
    pub const AI: Self = Self(1 << 3);
    /// Animation state.
    pub const ANIMATION: Self = Self(1 << 4);
    /// Spawn / despawn lifecycle.
    pub const LIFECYCLE: Self = Self(1 << 5);
    /// Every field.
    pub const ALL: Self = Self(0x3f);

    /// True when no bits are set.
    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    #[inline]
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit is shared with `other`.
    #[inline]
    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Union of both scopes.
    #[inline]
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Bits of `self` not present in `other`.
    #[inline]
    #[must_use]
    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// One authority grant: owner, covered scope, epoch, and validity window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuthorityCoordinate {
    /// Holder class.
    pub owner: AuthorityOwner,
    /// Fields this grant covers.
    pub scope: AuthorityScope,
    /// Monotone-per-entity version of the grant.
    pub epoch: u32,
    /// Identity of the holder (meaningful for `Client`; invalid otherwise is
    /// accepted).
    pub owner_id: NetId,
    /// First tick the grant is valid.
    pub granted_at: Tick,
    /// Last tick the grant is valid (inclusive). `Tick::MAX` means open-ended.
    pub expires_at: Tick,
}

impl AuthorityCoordinate {
    /// Open-ended server grant over `scope` starting at `granted_at`.
    #[must_use]
    pub fn server(scope: AuthorityScope, epoch: u32, granted_at: Tick) -> Self {
        Self {
            owner: AuthorityOwner::Server,
            scope,
            epoch,
            owner_id: NetId::INVALID,
            granted_at,
            expires_at: Tick::MAX,
        }
    }

    /// Open-ended client grant over `scope` for `owner_id`.
    #[must_use]
    pub fn client(scope: AuthorityScope, epoch: u32, owner_id: NetId, granted_at: Tick) -> Self {
        Self {
            owner: AuthorityOwner::Client,
            scope,
            epoch,
            owner_id,
            granted_at,
            expires_at: Tick::MAX,
        }
    }

    /// True when `tick` lies inside `[granted_at, expires_at]`.
    #[inline]
    #[must_use]
    pub fn valid_at(&self, tick: Tick) -> bool {
        tick >= self.granted_at && tick <= self.expires_at
    }
}

/// Authority bookkeeping failures.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum AuthorityError {
    /// A transfer's epoch was not strictly greater than an overlapping
    /// existing grant's epoch.
    #[error("stale epoch {offered} (current {current}) for {entity}")]
    StaleEpoch {
        /// Entity whose authority was contested.
        entity: NetId,
        /// Epoch offered by the transfer.
        offered: u32,
        /// Highest overlapping epoch already held.
        current: u32,
    },
    /// The grant's scope was empty.
    #[error("empty scope grant for {entity}")]
    EmptyScope {
        /// Target entity.
        entity: NetId,
    },
}

type EntityGrants = Vec<AuthorityCoordinate>;

/// Tracks authority grants for every entity.
///
/// The table itself is read-locked for lookup; each entity's grant list sits
/// behind its own mutex so transfers for different entities never contend.
#[derive(Debug)]
pub struct AuthorityTracker {
    entities: RwLock<FxHashMap<NetId, Arc<Mutex<EntityGrants>>>>,
    next_epoch: AtomicU32,
}

impl AuthorityTracker {
    /// Creates an empty tracker with the epoch counter at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(FxHashMap::default()),
            next_epoch: AtomicU32::new(1),
        }
    }

    /// Draws the next value from the global epoch counter.
    ///
    /// Competing transfer requests are tie-broken by whoever drew the larger
    /// epoch; the counter never repeats.
    pub fn next_epoch(&self) -> u32 {
        self.next_epoch.fetch_add(1, Ordering::AcqRel)
    }

    fn grants_of(&self, entity: NetId) -> Option<Arc<Mutex<EntityGrants>>> {
        self.entities.read().get(&entity).cloned()
    }

    fn grants_or_insert(&self, entity: NetId) -> Arc<Mutex<EntityGrants>> {
        if let Some(g) = self.grants_of(entity) {
            return g;
        }
        self.entities
            .write()
            .entry(entity)
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Publishes an initial grant, carving its scope out of any overlapping
    /// older grants regardless of epoch.
    ///
    /// Used at registration time (Ring 1 owns the call); transfers go through
    /// [`AuthorityTracker::transfer`].
    pub fn publish(&self, entity: NetId, coord: AuthorityCoordinate) -> Result<(), AuthorityError> {
        if coord.scope.is_empty() {
            return Err(AuthorityError::EmptyScope { entity });
        }
        let grants = self.grants_or_insert(entity);
        let mut grants = grants.lock();
        carve(&mut grants, coord.scope);
        grants.push(coord);
        Ok(())
    }

    /// Transfers `coord.scope` to `coord`, epoch-gated.
    ///
    /// Succeeds only when `coord.epoch` is strictly greater than the epoch of
    /// every existing grant it overlaps.
    pub fn transfer(&self, entity: NetId, coord: AuthorityCoordinate) -> Result<(), AuthorityError> {
        if coord.scope.is_empty() {
            return Err(AuthorityError::EmptyScope { entity });
        }
        let grants = self.grants_or_insert(entity);
        let mut grants = grants.lock();
        let current = grants
            .iter()
            .filter(|g| g.scope.intersects(coord.scope))
            .map(|g| g.epoch)
            .max();
        if let Some(current) = current {
            if coord.epoch <= current {
                return Err(AuthorityError::StaleEpoch {
                    entity,
                    offered: coord.epoch,
                    current,
                });
            }
        }
        carve(&mut grants, coord.scope);
        grants.push(coord);
        Ok(())
    }

    /// Removes every grant for `entity` (entity despawn).
    pub fn remove_entity(&self, entity: NetId) {
        self.entities.write().remove(&entity);
    }

    /// True iff `owner`/`owner_id` may write `scope` on `entity` at `tick`.
    ///
    /// Requires a single grant covering all of `scope`, with matching owner,
    /// matching `owner_id` when the owner is `Client`, and `tick` inside the
    /// grant window.
    #[must_use]
    pub fn can_write(
        &self,
        entity: NetId,
        owner: AuthorityOwner,
        owner_id: NetId,
        scope: AuthorityScope,
        tick: Tick,
    ) -> bool {
        let Some(grants) = self.grants_of(entity) else {
            return false;
        };
        let grants = grants.lock();
        grants.iter().any(|g| {
            g.scope.contains(scope)
                && g.owner == owner
                && (g.owner != AuthorityOwner::Client || g.owner_id == owner_id)
                && g.valid_at(tick)
        })
    }

    /// The grant covering `scope` on `entity`, if one exists.
    #[must_use]
    pub fn authority_of(&self, entity: NetId, scope: AuthorityScope) -> Option<AuthorityCoordinate> {
        let grants = self.grants_of(entity)?;
        let grants = grants.lock();
        grants.iter().find(|g| g.scope.contains(scope)).copied()
    }

    /// All grants currently held on `entity`, scope-disjoint.
    #[must_use]
    pub fn grants(&self, entity: NetId) -> Vec<AuthorityCoordinate> {
        self.grants_of(entity)
            .map(|g| g.lock().clone())
            .unwrap_or_default()
    }

    /// Highest epoch held on `entity` across all scopes (0 when untracked).
    #[must_use]
    pub fn epoch_of(&self, entity: NetId) -> u32 {
        self.grants_of(entity)
            .map(|g| g.lock().iter().map(|c| c.epoch).max().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Removes `scope`'s bits from every grant in `grants`, dropping grants whose
/// scope becomes empty.
fn carve(grants: &mut EntityGrants, scope: AuthorityScope) {
    for g in grants.iter_mut() {
        g.scope = g.scope.difference(scope);
    }
    grants.retain(|g| !g.scope.is_empty());
}
