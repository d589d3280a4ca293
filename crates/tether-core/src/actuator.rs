// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The memory actuator boundary.
//!
//! The core never touches game memory itself. It holds opaque
//! [`MemoryHandle`]s in Ring 1 and hands them to an implementation of
//! [`MemoryActuator`] supplied by the embedder. Handles are kind-dependent
//! and meaningless to the core; Euler-angle conversion, pointer arithmetic,
//! and layout knowledge all live on the far side of this trait.
//!
//! Actuator calls may block briefly and carry an implementation-supplied
//! timeout. A timeout surfaces as [`ActuatorError::Timeout`] and is treated
//! by the coordinator as a verification failure, never a commit failure.

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{Quat, Vec3};

/// Opaque handle into the game process for one entity.
///
/// `0` is the invalid handle; registration with an invalid handle is legal
/// (entity exists but is not actuator-backed yet).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MemoryHandle(pub u64);

impl MemoryHandle {
    /// The invalid handle.
    pub const INVALID: Self = Self(0);

    /// True for the invalid handle.
    #[inline]
    #[must_use]
    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            f.write_str("handle:invalid")
        } else {
            write!(f, "handle:{:#x}", self.0)
        }
    }
}

/// Actuator I/O failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    /// The handle does not map to readable/writable memory.
    #[error("invalid memory handle {0:?}")]
    InvalidHandle(MemoryHandle),
    /// The underlying memory operation timed out.
    #[error("actuator operation timed out")]
    Timeout,
    /// The underlying memory operation failed.
    #[error("actuator i/o failed: {0}")]
    Io(String),
}

/// Reads and writes entity state in the game process.
///
/// Implementations are expected to be cheap to call from the coordinator
/// thread; long operations should carry their own internal timeout and
/// return [`ActuatorError::Timeout`] rather than block a cycle.
pub trait MemoryActuator: Send + Sync {
    /// Reads position and rotation, `Ok(None)` when the entity has no
    /// spatial representation right now.
    fn read_transform(&self, handle: MemoryHandle)
        -> Result<Option<(Vec3, Quat)>, ActuatorError>;

    /// Reads `(current, maximum)` health.
    fn read_health(&self, handle: MemoryHandle) -> Result<Option<(f32, f32)>, ActuatorError>;

    /// Soft transform write; the game's own smoothing may apply it over
    /// several frames.
    fn write_transform(
        &self,
        handle: MemoryHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), ActuatorError>;

    /// Hard snap: writes the transform immediately and zeroes the velocity
    /// stored alongside it, bypassing smoothing.
    fn write_transform_immediate(
        &self,
        handle: MemoryHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), ActuatorError>;

    /// Writes `(current, maximum)` health.
    fn write_health(
        &self,
        handle: MemoryHandle,
        current: f32,
        maximum: f32,
    ) -> Result<(), ActuatorError>;
}
