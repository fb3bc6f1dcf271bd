//! Avatar data model
//!
//! The same [`AvatarData`] shape is used for mirrored remote avatars and for
//! this client's outbound avatar. Optional fields stand for "use the
//! skeleton/model default" and are never encoded as magic numbers.

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};
use uuid::Uuid;

use crate::math::{Bounds, Quaternion, Transform, Vantage, Vector3};

/// Maximum number of face blendshape coefficients carried per avatar
pub const MAX_BLENDSHAPE_COEFFICIENTS: usize = 256;

/// A single joint pose. `None` means the skeleton default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub position: Option<Vector3>,
    pub rotation: Option<Quaternion>,
}

impl Joint {
    /// Split into the wire value and its default flags
    pub fn to_raw(&self) -> (Vantage, JointFlags) {
        let vantage = Vantage::new(
            self.position.unwrap_or_default(),
            self.rotation.unwrap_or_default(),
        );
        let flags = JointFlags {
            translation_is_default: self.position.is_none(),
            rotation_is_default: self.rotation.is_none(),
        };
        (vantage, flags)
    }

    /// Rebuild from a wire value and its default flags
    pub fn from_raw(vantage: Vantage, flags: JointFlags) -> Self {
        Self {
            position: (!flags.translation_is_default).then_some(vantage.position),
            rotation: (!flags.rotation_is_default).then_some(vantage.rotation),
        }
    }
}

/// Which components of a joint are at their default value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointFlags {
    pub translation_is_default: bool,
    pub rotation_is_default: bool,
}

/// An attachment model on one of the avatar's joints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub model_url: String,
    pub joint_name: String,
    /// `None` for soft attachments that follow the joint's animation
    pub transform: Option<Transform>,
}

impl Attachment {
    pub fn to_raw(&self) -> RawAttachment {
        RawAttachment {
            model_url: self.model_url.clone(),
            joint_name: self.joint_name.clone(),
            transform: self.transform.unwrap_or_default(),
            is_soft: self.transform.is_none(),
        }
    }

    pub fn from_raw(raw: RawAttachment) -> Self {
        Self {
            transform: (!raw.is_soft).then_some(raw.transform),
            model_url: raw.model_url,
            joint_name: raw.joint_name,
        }
    }
}

/// Attachment as exchanged with the transport
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAttachment {
    pub model_url: String,
    pub joint_name: String,
    pub transform: Transform,
    pub is_soft: bool,
}

/// Skeleton bone kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoneType {
    #[default]
    SkeletonRoot,
    SkeletonChild,
    NonSkeletonRoot,
    NonSkeletonChild,
}

impl BoneType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::SkeletonRoot),
            1 => Some(Self::SkeletonChild),
            2 => Some(Self::NonSkeletonRoot),
            3 => Some(Self::NonSkeletonChild),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A single skeleton bone descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub bone_type: BoneType,
    pub default_transform: Transform,
    pub index: i32,
    pub parent_index: i32,
    pub name: String,
}

/// Bitset of hand, face and collision flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdditionalFlags(u16);

impl AdditionalFlags {
    pub const LEFT_HAND_POINTING: Self = Self(1 << 0);
    pub const RIGHT_HAND_POINTING: Self = Self(1 << 1);
    pub const INDEX_FINGER_POINTING: Self = Self(1 << 2);
    pub const HEAD_HAS_SCRIPTED_BLENDSHAPES: Self = Self(1 << 3);
    pub const HAS_PROCEDURAL_EYE_MOVEMENT: Self = Self(1 << 4);
    pub const HAS_AUDIO_FACE_MOVEMENT: Self = Self(1 << 5);
    pub const HAS_PROCEDURAL_EYE_FACE_MOVEMENT: Self = Self(1 << 6);
    pub const HAS_PROCEDURAL_BLINK_FACE_MOVEMENT: Self = Self(1 << 7);
    pub const COLLIDES_WITH_AVATARS: Self = Self(1 << 8);
    /// Read only, set by the mixer for avatars in a priority zone
    pub const HAS_PRIORITY: Self = Self(1 << 9);

    /// Mask of the three hand-state bits
    pub const HAND_STATE: Self = Self(0b111);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & 0x03ff)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, flag: Self, enabled: bool) {
        if enabled {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }
}

impl BitOr for AdditionalFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AdditionalFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The avatar (and joint) this avatar's local position is relative to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentInfo {
    pub id: Uuid,
    pub joint_index: u16,
}

impl ParentInfo {
    /// Decode the transport form, where a nil id means "no parent"
    pub fn from_raw(raw: ParentInfo) -> Option<Self> {
        (!raw.id.is_nil()).then_some(raw)
    }

    pub fn to_raw(parent: Option<&ParentInfo>) -> ParentInfo {
        parent.copied().unwrap_or(ParentInfo {
            id: Uuid::nil(),
            joint_index: 0,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HandControllers {
    pub left: Vantage,
    pub right: Vantage,
}

/// Facial expression data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceTrackerInfo {
    pub left_eye_blink: f32,
    pub right_eye_blink: f32,
    pub average_loudness: f32,
    pub brow_audio_lift: f32,
    /// At most [`MAX_BLENDSHAPE_COEFFICIENTS`] entries are transmitted
    pub blendshape_coefficients: Vec<f32>,
}

/// Far grab joint poses
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GrabJoints {
    pub left: Vantage,
    pub right: Vantage,
    pub mouse: Vantage,
}

/// What is grabbed and how it is held
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrabData {
    pub target: Uuid,
    pub joint_index: i32,
    /// Offset of the grabbed object relative to the grabbing joint
    pub offset: Vantage,
}

/// A grab action instance, identified by a transport-assigned id
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrabAction {
    pub id: Uuid,
    pub data: GrabData,
}

/// Why a remote avatar went away
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    #[default]
    Unknown,
    Network,
    Ignored,
    TheyEnteredBubble,
    YouEnteredBubble,
}

impl DisconnectReason {
    /// Unrecognized codes map to `Unknown`
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Network,
            2 => Self::Ignored,
            3 => Self::TheyEnteredBubble,
            4 => Self::YouEnteredBubble,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Main avatar state, sent for this client and mirrored for others
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarData {
    pub display_name: String,
    pub skeleton_model_url: String,
    pub look_at_snapping_enabled: bool,
    pub verification_failed: bool,
    pub global_position: Vector3,
    pub orientation: Quaternion,
    pub scale: f32,
    pub bounds: Bounds,
    pub look_at_position: Vector3,
    pub audio_loudness: f32,
    pub sensor_to_world: Transform,
    pub additional_flags: AdditionalFlags,
    pub parent: Option<ParentInfo>,
    /// Position relative to `parent`
    pub local_position: Vector3,
    pub hand_controllers: HandControllers,
    pub face_tracker_info: FaceTrackerInfo,
    pub grab_joints: GrabJoints,
    pub pose: Vec<Joint>,
    pub attachments: Vec<Attachment>,
    pub skeleton: Vec<Bone>,
}

impl Default for AvatarData {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            skeleton_model_url: String::new(),
            look_at_snapping_enabled: false,
            verification_failed: false,
            global_position: Vector3::ZERO,
            orientation: Quaternion::IDENTITY,
            scale: 1.0,
            bounds: Bounds::default(),
            look_at_position: Vector3::ZERO,
            audio_loudness: 0.0,
            sensor_to_world: Transform::IDENTITY,
            additional_flags: AdditionalFlags::empty(),
            parent: None,
            local_position: Vector3::ZERO,
            hand_controllers: HandControllers::default(),
            face_tracker_info: FaceTrackerInfo::default(),
            grab_joints: GrabJoints::default(),
            pose: Vec::new(),
            attachments: Vec::new(),
            skeleton: Vec::new(),
        }
    }
}

impl AvatarData {
    /// Position, orientation and scale as one transform
    pub fn transform(&self) -> Transform {
        Transform {
            translation: self.global_position,
            rotation: self.orientation,
            scale: self.scale,
        }
    }
}

/// Mirror of one remote participant's avatar
///
/// `id` is fixed for the mirror's lifetime. A transport slot that starts
/// reporting another id gets a fresh mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAvatar {
    pub id: Uuid,
    pub data: AvatarData,
    pub grab_actions: Vec<GrabAction>,
}

impl RemoteAvatar {
    pub(crate) fn new(id: Uuid) -> Self {
        Self {
            id,
            data: AvatarData::default(),
            grab_actions: Vec::new(),
        }
    }
}
