// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed, self-describing state payloads.
//!
//! [`SchemaPayload`] is a closed sum over every state delta the engine can
//! carry. Meaning never depends on a memory layout: normalisation, hashing,
//! and extraction dispatch explicitly on the variant, and the content hash is
//! a BLAKE3 digest over a canonical little-endian encoding of the
//! *normalised* value — so two observations that normalise identically hash
//! identically, which is what dedup and consensus bucketing key on.

use core::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::ident::NetId;
use crate::math::Vec3;
use crate::space::FramedTransform;

/// Positions beyond this magnitude are clamped during normalisation.
const MAX_POSITION_ABS: f32 = 1.0e6;
/// Velocities beyond this magnitude are clamped during normalisation.
const MAX_VELOCITY_ABS: f32 = 1.0e4;

/// Discriminant of a [`SchemaPayload`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SchemaKind {
    /// Position / rotation / velocity.
    Transform = 1,
    /// Current and maximum health.
    Health = 2,
    /// Inventory contents.
    Inventory = 3,
    /// AI goal and target.
    AiState = 4,
    /// Player input sample.
    Input = 5,
    /// Entity removal.
    Despawn = 6,
    /// Animation state.
    AnimState = 7,
}

impl SchemaKind {
    /// Short lowercase label used in logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::Health => "health",
            Self::Inventory => "inventory",
            Self::AiState => "ai",
            Self::Input => "input",
            Self::Despawn => "despawn",
            Self::AnimState => "anim",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// BLAKE3 content hash of a canonical payload encoding.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PayloadHash(pub [u8; 32]);

impl PayloadHash {
    /// Canonical byte representation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PayloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payload:{}", hex::encode(&self.0[0..8]))
    }
}

/// One inventory stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item template id.
    pub template_id: u32,
    /// Stack count.
    pub count: u32,
    /// Inventory slot index.
    pub slot: u16,
}

/// AI behaviour goal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AiGoal {
    /// No active goal.
    Idle,
    /// Move toward a world position.
    MoveTo(Vec3),
    /// Attack an entity.
    Attack(NetId),
    /// Flee from an entity.
    Flee(NetId),
    /// Follow an entity.
    Follow(NetId),
}

/// Why an entity despawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DespawnReason {
    /// Killed in-world.
    Death,
    /// Region streamed out.
    Unloaded,
    /// Operator removal.
    Admin,
    /// Source stopped reporting the entity.
    Timeout,
}

/// A typed, interpretable state delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaPayload {
    /// Spatial state.
    Transform(FramedTransform),
    /// Health state.
    Health {
        /// Current hit points.
        current: f32,
        /// Maximum hit points.
        maximum: f32,
    },
    /// Full inventory replacement.
    Inventory {
        /// Stacks, canonically sorted by slot.
        items: Vec<ItemStack>,
    },
    /// AI behaviour state.
    AiState {
        /// Active goal.
        goal: AiGoal,
        /// Current target ([`NetId::INVALID`] for none).
        target: NetId,
    },
    /// Raw input sample from a player.
    Input {
        /// Movement direction, length ≤ 1 after normalisation.
        move_dir: Vec3,
        /// Pressed-button bitset.
        buttons: u32,
    },
    /// Entity removal.
    Despawn {
        /// Removal reason.
        reason: DespawnReason,
    },
    /// Animation state.
    AnimState {
        /// Clip id.
        clip: u32,
        /// Phase within the clip, wrapped into `[0, 1)`.
        phase: f32,
        /// True when the animation drives gameplay (hit frames, root motion).
        gameplay_linked: bool,
    },
}

impl SchemaPayload {
    /// The variant discriminant.
    #[must_use]
    pub fn kind(&self) -> SchemaKind {
        match self {
            Self::Transform(_) => SchemaKind::Transform,
            Self::Health { .. } => SchemaKind::Health,
            Self::Inventory { .. } => SchemaKind::Inventory,
            Self::AiState { .. } => SchemaKind::AiState,
            Self::Input { .. } => SchemaKind::Input,
            Self::Despawn { .. } => SchemaKind::Despawn,
            Self::AnimState { .. } => SchemaKind::AnimState,
        }
    }

    /// Returns the payload normalised into its canonical form.
    ///
    /// Normalisation is idempotent and total: every input, however hostile,
    /// maps to a value the rest of the pipeline can hold without re-checking.
    #[must_use]
    pub fn normalized(&self) -> Self {
        match self {
            Self::Transform(t) => {
                let t = t.normalized();
                let clamp_vec = |v: Vec3, cap: f32| {
                    Vec3::new(
                        v.x.clamp(-cap, cap),
                        v.y.clamp(-cap, cap),
                        v.z.clamp(-cap, cap),
                    )
                };
                Self::Transform(FramedTransform {
                    position: clamp_vec(t.position, MAX_POSITION_ABS),
                    rotation: t.rotation,
                    velocity: clamp_vec(t.velocity, MAX_VELOCITY_ABS),
                    frame: t.frame,
                })
            }
            Self::Health { current, maximum } => {
                let fix = |v: f32| if v.is_finite() { v } else { 0.0 };
                let maximum = fix(*maximum).max(0.0);
                Self::Health {
                    current: fix(*current),
                    maximum,
                }
            }
            Self::Inventory { items } => {
                let mut items = items.clone();
                items.sort_by_key(|s| (s.slot, s.template_id));
                items.retain(|s| s.count > 0);
                Self::Inventory { items }
            }
            Self::AiState { goal, target } => {
                let goal = match goal {
                    AiGoal::MoveTo(p) => AiGoal::MoveTo(p.sanitized()),
                    other => *other,
                };
                Self::AiState {
                    goal,
                    target: *target,
                }
            }
            Self::Input { move_dir, buttons } => {
                let mut dir = move_dir.sanitized();
                let len = dir.length();
                if len > 1.0 {
                    dir = dir.scale(1.0 / len);
                }
                Self::Input {
                    move_dir: dir,
                    buttons: *buttons,
                }
            }
            Self::Despawn { reason } => Self::Despawn { reason: *reason },
            Self::AnimState {
                clip,
                phase,
                gameplay_linked,
            } => {
                let phase = if phase.is_finite() {
                    phase.rem_euclid(1.0)
                } else {
                    0.0
                };
                Self::AnimState {
                    clip: *clip,
                    phase,
                    gameplay_linked: *gameplay_linked,
                }
            }
        }
    }

    /// Content hash of the canonical (normalised) encoding.
    #[must_use]
    pub fn content_hash(&self) -> PayloadHash {
        let mut hasher = Hasher::new();
        hasher.update(b"tether/payload:");
        let mut buf = Vec::with_capacity(64);
        self.normalized().encode_canonical(&mut buf);
        hasher.update(&buf);
        PayloadHash(hasher.finalize().into())
    }

    /// The transform, when this is a Transform payload.
    #[must_use]
    pub fn as_transform(&self) -> Option<&FramedTransform> {
        match self {
            Self::Transform(t) => Some(t),
            _ => None,
        }
    }

    /// `(current, maximum)`, when this is a Health payload.
    #[must_use]
    pub fn as_health(&self) -> Option<(f32, f32)> {
        match self {
            Self::Health { current, maximum } => Some((*current, *maximum)),
            _ => None,
        }
    }

    /// Canonical little-endian encoding. Stable across platforms; any change
    /// here is a breaking change to stored hashes.
    fn encode_canonical(&self, out: &mut Vec<u8>) {
        out.push(self.kind() as u8);
        match self {
            Self::Transform(t) => {
                encode_frame(&t.frame, out);
                for v in [
                    t.position.x,
                    t.position.y,
                    t.position.z,
                    t.rotation.x,
                    t.rotation.y,
                    t.rotation.z,
                    t.rotation.w,
                    t.velocity.x,
                    t.velocity.y,
                    t.velocity.z,
                ] {
                    out.extend_from_slice(&canonical_f32(v).to_le_bytes());
                }
            }
            Self::Health { current, maximum } => {
                out.extend_from_slice(&canonical_f32(*current).to_le_bytes());
                out.extend_from_slice(&canonical_f32(*maximum).to_le_bytes());
            }
            Self::Inventory { items } => {
                out.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for s in items {
                    out.extend_from_slice(&s.template_id.to_le_bytes());
                    out.extend_from_slice(&s.count.to_le_bytes());
                    out.extend_from_slice(&s.slot.to_le_bytes());
                }
            }
            Self::AiState { goal, target } => {
                match goal {
                    AiGoal::Idle => out.push(0),
                    AiGoal::MoveTo(p) => {
                        out.push(1);
                        for v in [p.x, p.y, p.z] {
                            out.extend_from_slice(&canonical_f32(v).to_le_bytes());
                        }
                    }
                    AiGoal::Attack(id) => {
                        out.push(2);
                        out.extend_from_slice(&id.as_u64().to_le_bytes());
                    }
                    AiGoal::Flee(id) => {
                        out.push(3);
                        out.extend_from_slice(&id.as_u64().to_le_bytes());
                    }
                    AiGoal::Follow(id) => {
                        out.push(4);
                        out.extend_from_slice(&id.as_u64().to_le_bytes());
                    }
                }
                out.extend_from_slice(&target.as_u64().to_le_bytes());
            }
            Self::Input { move_dir, buttons } => {
                for v in [move_dir.x, move_dir.y, move_dir.z] {
                    out.extend_from_slice(&canonical_f32(v).to_le_bytes());
                }
                out.extend_from_slice(&buttons.to_le_bytes());
            }
            Self::Despawn { reason } => {
                out.push(match reason {
                    DespawnReason::Death => 0,
                    DespawnReason::Unloaded => 1,
                    DespawnReason::Admin => 2,
                    DespawnReason::Timeout => 3,
                });
            }
            Self::AnimState {
                clip,
                phase,
                gameplay_linked,
            } => {
                out.extend_from_slice(&clip.to_le_bytes());
                out.extend_from_slice(&canonical_f32(*phase).to_le_bytes());
                out.push(u8::from(*gameplay_linked));
            }
        }
    }
}

/// Maps every NaN to one bit pattern and `-0.0` to `+0.0` so hashing is
/// injective over observable values.
fn canonical_f32(v: f32) -> u32 {
    if v.is_nan() {
        return f32::NAN.to_bits();
    }
    if v == 0.0 {
        return 0.0_f32.to_bits();
    }
    v.to_bits()
}

fn encode_frame(frame: &crate::space::SpaceFrame, out: &mut Vec<u8>) {
    use crate::space::SpaceFrame;
    match frame {
        SpaceFrame::World => out.push(0),
        SpaceFrame::Local(parent) => {
            out.push(1);
            out.extend_from_slice(&parent.as_u64().to_le_bytes());
        }
        SpaceFrame::Parented(parent, bone) => {
            out.push(2);
            out.extend_from_slice(&parent.as_u64().to_le_bytes());
            out.extend_from_slice(&bone.to_le_bytes());
        }
        SpaceFrame::RootMotion => out.push(3),
        SpaceFrame::Physics => out.push(4),
        SpaceFrame::View => out.push(5),
        SpaceFrame::Screen => out.push(6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;
    use crate::space::SpaceFrame;

    #[test]
    fn hash_is_stable_under_normalisation() {
        let raw = SchemaPayload::Transform(FramedTransform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::new(0.0, 0.0, 0.0, 2.0), // non-unit
            velocity: Vec3::ZERO,
            frame: SpaceFrame::World,
        });
        assert_eq!(raw.content_hash(), raw.normalized().content_hash());
    }

    #[test]
    fn distinct_payloads_hash_differently() {
        let a = SchemaPayload::Health {
            current: 50.0,
            maximum: 100.0,
        };
        let b = SchemaPayload::Health {
            current: 51.0,
            maximum: 100.0,
        };
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn kind_discriminants_do_not_collide_in_hashes() {
        let health = SchemaPayload::Health {
            current: 0.0,
            maximum: 0.0,
        };
        let input = SchemaPayload::Input {
            move_dir: Vec3::ZERO,
            buttons: 0,
        };
        assert_ne!(health.content_hash(), input.content_hash());
    }

    #[test]
    fn inventory_normalises_to_slot_order_and_drops_empties() {
        let p = SchemaPayload::Inventory {
            items: vec![
                ItemStack {
                    template_id: 7,
                    count: 0,
                    slot: 0,
                },
                ItemStack {
                    template_id: 2,
                    count: 1,
                    slot: 5,
                },
                ItemStack {
                    template_id: 9,
                    count: 3,
                    slot: 1,
                },
            ],
        };
        let SchemaPayload::Inventory { items } = p.normalized() else {
            unreachable!()
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].slot, 1);
        assert_eq!(items[1].slot, 5);
    }

    #[test]
    fn input_direction_is_clamped_to_unit_length() {
        let p = SchemaPayload::Input {
            move_dir: Vec3::new(3.0, 4.0, 0.0),
            buttons: 1,
        };
        let SchemaPayload::Input { move_dir, .. } = p.normalized() else {
            unreachable!()
        };
        assert!((move_dir.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn anim_phase_wraps_into_unit_interval() {
        let p = SchemaPayload::AnimState {
            clip: 3,
            phase: 2.25,
            gameplay_linked: false,
        };
        let SchemaPayload::AnimState { phase, .. } = p.normalized() else {
            unreachable!()
        };
        assert!((phase - 0.25).abs() < 1e-6);
    }

    #[test]
    fn negative_zero_hashes_like_positive_zero() {
        let a = SchemaPayload::Health {
            current: 0.0,
            maximum: 100.0,
        };
        let b = SchemaPayload::Health {
            current: -0.0,
            maximum: 100.0,
        };
        assert_eq!(a.content_hash(), b.content_hash());
    }
}
