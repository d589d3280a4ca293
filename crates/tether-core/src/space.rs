// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reference frames and framed transforms.
//!
//! The canonical frame for truth is [`SpaceFrame::World`]; everything else is
//! a view. Transforms tagged with different frames must never be compared,
//! interpolated, or distanced — those operations fail with
//! [`FrameError::Mismatch`] rather than silently producing garbage.
//!
//! Converting to World walks parent transforms recursively through a
//! [`ParentLookup`] (implemented by the truth log). Parent references are
//! [`NetId`]s, never pointers, so cycles cannot arise from ownership — but a
//! hostile parent chain is still depth-bounded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ident::NetId;
use crate::math::{Quat, Vec3};

/// Maximum parent-chain depth [`SpaceResolver`] will walk before treating the
/// remainder as orphaned.
pub const MAX_PARENT_DEPTH: usize = 64;

/// Reference coordinate system for a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpaceFrame {
    /// Canonical world frame. Truth is stored here.
    World,
    /// Local to a parent entity's transform.
    Local(NetId),
    /// Attached to a named bone of a parent entity. The bone index is opaque
    /// to the core; the actuator resolves it. Spatially treated as
    /// [`SpaceFrame::Local`].
    Parented(NetId, u16),
    /// Animation root-motion accumulator, world-aligned.
    RootMotion,
    /// Physics-engine working frame, world-aligned.
    Physics,
    /// Camera view frame.
    View,
    /// Screen-space frame.
    Screen,
}

impl SpaceFrame {
    /// The parent entity, for parent-relative frames.
    #[must_use]
    pub fn parent(self) -> Option<NetId> {
        match self {
            Self::Local(parent) | Self::Parented(parent, _) => Some(parent),
            _ => None,
        }
    }

    /// True for frames whose coordinates coincide with World axes.
    #[must_use]
    pub fn is_world_aligned(self) -> bool {
        matches!(self, Self::World | Self::RootMotion | Self::Physics)
    }
}

/// Frame-safety violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Two transforms in different frames were combined.
    #[error("frame mismatch: {a:?} vs {b:?}")]
    Mismatch {
        /// Frame of the left operand.
        a: SpaceFrame,
        /// Frame of the right operand.
        b: SpaceFrame,
    },
    /// An operation required a World-frame transform.
    #[error("expected World frame, got {frame:?}")]
    NotWorld {
        /// The actual frame.
        frame: SpaceFrame,
    },
}

/// A rigid transform plus velocity, tagged with the frame it is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FramedTransform {
    /// Position in `frame`.
    pub position: Vec3,
    /// Orientation in `frame`.
    pub rotation: Quat,
    /// Linear velocity in `frame`.
    pub velocity: Vec3,
    /// Frame the other fields are expressed in.
    pub frame: SpaceFrame,
}

impl FramedTransform {
    /// Identity transform in `frame`.
    #[must_use]
    pub fn identity(frame: SpaceFrame) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            frame,
        }
    }

    /// World-frame transform from position/rotation/velocity.
    #[must_use]
    pub fn world(position: Vec3, rotation: Quat, velocity: Vec3) -> Self {
        Self {
            position,
            rotation,
            velocity,
            frame: SpaceFrame::World,
        }
    }

    /// Normalised copy: finite components, unit rotation. Frame unchanged.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            position: self.position.sanitized(),
            rotation: self.rotation.normalized(),
            velocity: self.velocity.sanitized(),
            frame: self.frame,
        }
    }

    /// Linear/spherical interpolation toward `rhs` by `u` (clamped to [0, 1]).
    ///
    /// Both transforms must share a frame.
    pub fn lerp(self, rhs: Self, u: f32) -> Result<Self, FrameError> {
        if self.frame != rhs.frame {
            return Err(FrameError::Mismatch {
                a: self.frame,
                b: rhs.frame,
            });
        }
        let u = u.clamp(0.0, 1.0);
        Ok(Self {
            position: self.position.lerp(rhs.position, u),
            rotation: self.rotation.slerp(rhs.rotation, u),
            velocity: self.velocity.lerp(rhs.velocity, u),
            frame: self.frame,
        })
    }

    /// Positional distance to `rhs`. Both transforms must share a frame.
    pub fn distance(self, rhs: Self) -> Result<f32, FrameError> {
        if self.frame != rhs.frame {
            return Err(FrameError::Mismatch {
                a: self.frame,
                b: rhs.frame,
            });
        }
        Ok(self.position.distance(rhs.position))
    }

    /// Re-tags the transform with `frame`, leaving coordinates untouched.
    ///
    /// Only correct for world-aligned frames or orphan fallbacks; the
    /// resolver is the sole intended caller.
    #[must_use]
    fn relabeled(self, frame: SpaceFrame) -> Self {
        Self { frame, ..self }
    }
}

/// Parent transform source for frame resolution.
///
/// Given an entity id, return its last committed transform (in whatever
/// frame that truth is stored); `None` means the entity is absent or has no
/// transform truth yet. Any closure over the truth log qualifies via the
/// blanket impl, so the resolver can run against live truth or a replayed
/// projection alike.
pub trait ParentLookup {
    /// Last committed transform of `id`, if any.
    fn transform_of(&self, id: NetId) -> Option<FramedTransform>;
}

impl<F> ParentLookup for F
where
    F: Fn(NetId) -> Option<FramedTransform>,
{
    fn transform_of(&self, id: NetId) -> Option<FramedTransform> {
        self(id)
    }
}

/// Result of resolving a transform into the World frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldResolution {
    /// The resolved transform, always tagged [`SpaceFrame::World`].
    pub transform: FramedTransform,
    /// True when a parent in the chain was absent and the local coordinates
    /// were passed through unchanged.
    pub orphaned: bool,
}

/// Converts framed transforms to and from the canonical World frame.
///
/// Stateless; all entity data comes from the [`ParentLookup`] passed per call
/// so the resolver can be used against live truth or a replayed projection.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpaceResolver;

impl SpaceResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Resolves `t` into the World frame.
    ///
    /// Parent-relative frames are composed recursively. If any parent lookup
    /// returns absent (or the chain exceeds [`MAX_PARENT_DEPTH`]), the
    /// transform is returned with its local coordinates unchanged, re-tagged
    /// World, and `orphaned` set — the caller decides whether that is worth a
    /// diagnostic.
    #[must_use]
    pub fn to_world(&self, t: FramedTransform, parents: &dyn ParentLookup) -> WorldResolution {
        self.to_world_depth(t, parents, 0)
    }

    fn to_world_depth(
        &self,
        t: FramedTransform,
        parents: &dyn ParentLookup,
        depth: usize,
    ) -> WorldResolution {
        match t.frame {
            SpaceFrame::World => WorldResolution {
                transform: t,
                orphaned: false,
            },
            SpaceFrame::RootMotion | SpaceFrame::Physics | SpaceFrame::View | SpaceFrame::Screen => {
                WorldResolution {
                    transform: t.relabeled(SpaceFrame::World),
                    orphaned: false,
                }
            }
            SpaceFrame::Local(parent) | SpaceFrame::Parented(parent, _) => {
                if depth >= MAX_PARENT_DEPTH {
                    return WorldResolution {
                        transform: t.relabeled(SpaceFrame::World),
                        orphaned: true,
                    };
                }
                let Some(parent_t) = parents.transform_of(parent) else {
                    return WorldResolution {
                        transform: t.relabeled(SpaceFrame::World),
                        orphaned: true,
                    };
                };
                let parent_world = self.to_world_depth(parent_t, parents, depth + 1);
                let p = parent_world.transform;
                let composed = FramedTransform {
                    position: p.position + p.rotation.rotate(t.position),
                    rotation: p.rotation.mul_quat(t.rotation).normalized(),
                    velocity: p.velocity + p.rotation.rotate(t.velocity),
                    frame: SpaceFrame::World,
                };
                WorldResolution {
                    transform: composed,
                    orphaned: parent_world.orphaned,
                }
            }
        }
    }

    /// Expresses a World-frame transform in `frame` (inverse of `to_world`).
    ///
    /// Fails with [`FrameError::NotWorld`] if `t` is not in the World frame.
    /// An absent parent yields the coordinates unchanged, re-tagged `frame`,
    /// with `orphaned` reported through the resolution.
    pub fn from_world(
        &self,
        t: FramedTransform,
        frame: SpaceFrame,
        parents: &dyn ParentLookup,
    ) -> Result<WorldResolution, FrameError> {
        if t.frame != SpaceFrame::World {
            return Err(FrameError::NotWorld { frame: t.frame });
        }
        match frame {
            SpaceFrame::World => Ok(WorldResolution {
                transform: t,
                orphaned: false,
            }),
            SpaceFrame::RootMotion | SpaceFrame::Physics | SpaceFrame::View | SpaceFrame::Screen => {
                Ok(WorldResolution {
                    transform: t.relabeled(frame),
                    orphaned: false,
                })
            }
            SpaceFrame::Local(parent) | SpaceFrame::Parented(parent, _) => {
                let Some(parent_t) = parents.transform_of(parent) else {
                    return Ok(WorldResolution {
                        transform: t.relabeled(frame),
                        orphaned: true,
                    });
                };
                let parent_world = self.to_world_depth(parent_t, parents, 0);
                let p = parent_world.transform;
                let inv = p.rotation.conjugate();
                let local = FramedTransform {
                    position: inv.rotate(t.position - p.position),
                    rotation: inv.mul_quat(t.rotation).normalized(),
                    velocity: inv.rotate(t.velocity - p.velocity),
                    frame,
                };
                Ok(WorldResolution {
                    transform: local,
                    orphaned: parent_world.orphaned,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::EntityKind;

    fn parent_id() -> NetId {
        NetId::pack(EntityKind::Npc, 1, 1)
    }

    fn no_parents(_: NetId) -> Option<FramedTransform> {
        None
    }

    #[test]
    fn world_transform_passes_through() {
        let resolver = SpaceResolver::new();
        let t = FramedTransform::world(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY, Vec3::ZERO);
        let out = resolver.to_world(t, &no_parents);
        assert!(!out.orphaned);
        assert_eq!(out.transform, t);
    }

    #[test]
    fn local_composes_with_parent_translation() {
        let resolver = SpaceResolver::new();
        let parent = parent_id();
        let lookup = move |id: NetId| {
            (id == parent).then(|| {
                FramedTransform::world(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY, Vec3::ZERO)
            })
        };
        let local = FramedTransform {
            position: Vec3::new(1.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            frame: SpaceFrame::Local(parent),
        };
        let out = resolver.to_world(local, &lookup);
        assert!(!out.orphaned);
        assert_eq!(out.transform.position, Vec3::new(11.0, 0.0, 0.0));
        assert_eq!(out.transform.frame, SpaceFrame::World);
    }

    #[test]
    fn absent_parent_flags_orphaned() {
        let resolver = SpaceResolver::new();
        let local = FramedTransform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            frame: SpaceFrame::Local(parent_id()),
        };
        let out = resolver.to_world(local, &no_parents);
        assert!(out.orphaned);
        // Local coordinates carried through unchanged.
        assert_eq!(out.transform.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(out.transform.frame, SpaceFrame::World);
    }

    #[test]
    fn lerp_across_frames_is_a_hard_error() {
        let a = FramedTransform::identity(SpaceFrame::World);
        let b = FramedTransform::identity(SpaceFrame::Physics);
        assert!(matches!(a.lerp(b, 0.5), Err(FrameError::Mismatch { .. })));
        assert!(matches!(a.distance(b), Err(FrameError::Mismatch { .. })));
    }

    #[test]
    fn from_world_requires_world_input() {
        let resolver = SpaceResolver::new();
        let t = FramedTransform::identity(SpaceFrame::Physics);
        let err = resolver
            .from_world(t, SpaceFrame::World, &no_parents)
            .unwrap_err();
        assert!(matches!(err, FrameError::NotWorld { .. }));
    }

    #[test]
    fn to_world_from_world_round_trips() {
        let resolver = SpaceResolver::new();
        let parent = parent_id();
        let s = libm::sinf(0.3);
        let c = libm::cosf(0.3);
        let lookup = move |id: NetId| {
            (id == parent).then(|| {
                FramedTransform::world(
                    Vec3::new(4.0, -2.0, 7.5),
                    Quat::new(0.0, s, 0.0, c).normalized(),
                    Vec3::new(0.5, 0.0, 0.0),
                )
            })
        };
        let local = FramedTransform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::IDENTITY,
            velocity: Vec3::new(0.0, 1.0, 0.0),
            frame: SpaceFrame::Local(parent),
        };
        let world = resolver.to_world(local, &lookup);
        let back = resolver
            .from_world(world.transform, SpaceFrame::Local(parent), &lookup)
            .expect("world input");
        assert!(!back.orphaned);
        assert!(back.transform.position.distance(local.position) < 1e-4);
        assert!(back.transform.rotation.angle_to(local.rotation) < 1e-3);
        assert!(back.transform.velocity.distance(local.velocity) < 1e-4);
    }
}
