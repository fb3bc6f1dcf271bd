//! Avatar mirroring

pub mod data;
pub mod engine;
pub mod view;

pub use data::{
    AdditionalFlags, Attachment, AvatarData, Bone, BoneType, DisconnectReason, FaceTrackerInfo,
    GrabAction, GrabData, GrabJoints, HandControllers, Joint, JointFlags, ParentInfo, RemoteAvatar,
};
pub use engine::{AvatarEvent, AvatarSyncEngine};
pub use view::CameraView;
