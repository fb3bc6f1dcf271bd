//! Transport collaborator interface
//!
//! The transport owns the network session, protocol and codecs. This crate
//! only drives it through the indexed accessors below. Every call takes the
//! session id and, where relevant, a 0-based index into the transport's
//! current snapshot. Reads that are "not ready yet" return
//! [`TransportError::Unavailable`]; callers retry on the next tick.

pub mod memory;

use bytes::Bytes;
use std::sync::Arc;
use uuid::Uuid;

use crate::audio::format::AudioFormat;
use crate::audio::pipeline::CodecParams;
use crate::avatars::data::{
    AdditionalFlags, Bone, FaceTrackerInfo, GrabData, GrabJoints, HandControllers, JointFlags,
    ParentInfo, RawAttachment,
};
use crate::avatars::view::CameraView;
use crate::config::SessionParams;
use crate::context::VersionInfo;
use crate::error::TransportResult;
use crate::math::{Bounds, Quaternion, Transform, Vantage, Vector3};
use crate::messages::message::{MessageKind, MessageTypes};

pub use memory::MemoryTransport;

/// Opaque id of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u32);

/// Session lifecycle and connection
pub trait SessionTransport {
    fn create_session(&self, params: &SessionParams) -> TransportResult<SessionId>;

    fn destroy_session(&self, session: SessionId) -> TransportResult<()>;

    /// Request a move to `location`; the outcome shows up in `connection_status`
    fn connect(&self, session: SessionId, location: &str) -> TransportResult<()>;

    /// 0 = disconnected, 1 = connected, anything else is unrecognized
    fn connection_status(&self, session: SessionId) -> TransportResult<i32>;

    /// This client's session uuid, available once connected
    fn session_uuid(&self, session: SessionId) -> TransportResult<Uuid>;

    fn version(&self) -> TransportResult<VersionInfo>;
}

/// Roster of assignment nodes
pub trait NodeTransport {
    fn refresh_nodes(&self, session: SessionId) -> TransportResult<()>;

    fn node_count(&self, session: SessionId) -> TransportResult<usize>;

    fn node_uuid(&self, session: SessionId, index: usize) -> TransportResult<Uuid>;

    fn node_active(&self, session: SessionId, index: usize) -> TransportResult<bool>;

    fn node_type(&self, session: SessionId, index: usize) -> TransportResult<u8>;

    /// Human readable address; transports that do not track it report `Unavailable`
    fn node_address(&self, _session: SessionId, _index: usize) -> TransportResult<String> {
        Err(crate::error::TransportError::Unavailable)
    }
}

/// Avatar mirroring and this client's outbound avatar
pub trait AvatarTransport {
    fn enable_avatars(&self, session: SessionId) -> TransportResult<()>;

    /// Advance the internal avatar buffers
    fn update_avatars(&self, session: SessionId) -> TransportResult<()>;

    // Culling views

    fn set_view_count(&self, session: SessionId, count: usize) -> TransportResult<()>;
    fn set_view(&self, session: SessionId, index: usize, view: &CameraView) -> TransportResult<()>;

    // Disconnections since the last update

    fn disconnection_count(&self, session: SessionId) -> TransportResult<usize>;
    fn disconnection_uuid(&self, session: SessionId, index: usize) -> TransportResult<Uuid>;
    fn disconnection_reason(&self, session: SessionId, index: usize) -> TransportResult<u8>;

    // Remote avatars by slot

    fn avatar_count(&self, session: SessionId) -> TransportResult<usize>;
    fn avatar_uuid(&self, session: SessionId, slot: usize) -> TransportResult<Uuid>;
    fn avatar_display_name(&self, session: SessionId, slot: usize) -> TransportResult<String>;
    fn avatar_skeleton_model_url(&self, session: SessionId, slot: usize) -> TransportResult<String>;
    fn avatar_look_at_snapping(&self, session: SessionId, slot: usize) -> TransportResult<bool>;
    fn avatar_verification_failed(&self, session: SessionId, slot: usize) -> TransportResult<bool>;
    fn avatar_global_position(&self, session: SessionId, slot: usize) -> TransportResult<Vector3>;
    fn avatar_orientation(&self, session: SessionId, slot: usize) -> TransportResult<Quaternion>;
    fn avatar_scale(&self, session: SessionId, slot: usize) -> TransportResult<f32>;
    fn avatar_bounding_box(&self, session: SessionId, slot: usize) -> TransportResult<Bounds>;
    fn avatar_look_at_position(&self, session: SessionId, slot: usize) -> TransportResult<Vector3>;
    fn avatar_audio_loudness(&self, session: SessionId, slot: usize) -> TransportResult<f32>;
    fn avatar_sensor_to_world(&self, session: SessionId, slot: usize) -> TransportResult<Transform>;
    fn avatar_additional_flags(&self, session: SessionId, slot: usize) -> TransportResult<AdditionalFlags>;
    fn avatar_parent_info(&self, session: SessionId, slot: usize) -> TransportResult<ParentInfo>;
    fn avatar_local_position(&self, session: SessionId, slot: usize) -> TransportResult<Vector3>;
    fn avatar_hand_controllers(&self, session: SessionId, slot: usize) -> TransportResult<HandControllers>;
    fn avatar_face_tracker_info(&self, session: SessionId, slot: usize) -> TransportResult<FaceTrackerInfo>;
    fn avatar_grab_joints(&self, session: SessionId, slot: usize) -> TransportResult<GrabJoints>;

    fn avatar_joint_count(&self, session: SessionId, slot: usize) -> TransportResult<usize>;
    fn avatar_joint(&self, session: SessionId, slot: usize, joint: usize) -> TransportResult<Vantage>;
    fn avatar_joint_flags(&self, session: SessionId, slot: usize, joint: usize) -> TransportResult<JointFlags>;

    fn avatar_attachment_count(&self, session: SessionId, slot: usize) -> TransportResult<usize>;
    fn avatar_attachment(&self, session: SessionId, slot: usize, index: usize) -> TransportResult<RawAttachment>;

    fn avatar_bone_count(&self, session: SessionId, slot: usize) -> TransportResult<usize>;
    fn avatar_bone(&self, session: SessionId, slot: usize, index: usize) -> TransportResult<Bone>;

    fn avatar_grab_count(&self, session: SessionId, slot: usize) -> TransportResult<usize>;
    fn avatar_grab(&self, session: SessionId, slot: usize, index: usize) -> TransportResult<(Uuid, GrabData)>;

    /// Whether the slot's data changed since it was last asked
    fn avatar_changed(&self, session: SessionId, slot: usize) -> TransportResult<bool>;

    // This client's avatar

    fn set_my_display_name(&self, session: SessionId, name: &str) -> TransportResult<()>;
    fn set_my_skeleton_model_url(&self, session: SessionId, url: &str) -> TransportResult<()>;
    fn set_my_look_at_snapping(&self, session: SessionId, enabled: bool) -> TransportResult<()>;
    fn set_my_global_position(&self, session: SessionId, position: Vector3) -> TransportResult<()>;
    fn set_my_orientation(&self, session: SessionId, orientation: Quaternion) -> TransportResult<()>;
    fn set_my_scale(&self, session: SessionId, scale: f32) -> TransportResult<()>;
    fn set_my_bounding_box(&self, session: SessionId, bounds: Bounds) -> TransportResult<()>;
    fn set_my_look_at(&self, session: SessionId, position: Vector3) -> TransportResult<()>;
    fn set_my_audio_loudness(&self, session: SessionId, loudness: f32) -> TransportResult<()>;
    fn set_my_sensor_to_world(&self, session: SessionId, transform: Transform) -> TransportResult<()>;
    fn set_my_additional_flags(&self, session: SessionId, flags: AdditionalFlags) -> TransportResult<()>;
    fn set_my_parent_info(&self, session: SessionId, parent: ParentInfo) -> TransportResult<()>;
    fn set_my_local_position(&self, session: SessionId, position: Vector3) -> TransportResult<()>;
    fn set_my_hand_controllers(&self, session: SessionId, controllers: HandControllers) -> TransportResult<()>;
    fn set_my_face_tracker_info(&self, session: SessionId, info: &FaceTrackerInfo) -> TransportResult<()>;
    fn set_my_grab_joints(&self, session: SessionId, joints: GrabJoints) -> TransportResult<()>;

    fn set_my_joint_count(&self, session: SessionId, count: usize) -> TransportResult<()>;
    fn set_my_joint(&self, session: SessionId, index: usize, joint: Vantage) -> TransportResult<()>;
    fn set_my_joint_flags_count(&self, session: SessionId, count: usize) -> TransportResult<()>;
    fn set_my_joint_flags(&self, session: SessionId, index: usize, flags: JointFlags) -> TransportResult<()>;

    fn set_my_attachment_count(&self, session: SessionId, count: usize) -> TransportResult<()>;
    fn set_my_attachment(&self, session: SessionId, index: usize, attachment: &RawAttachment) -> TransportResult<()>;

    fn set_my_bone_count(&self, session: SessionId, count: usize) -> TransportResult<()>;
    fn set_my_bone(&self, session: SessionId, index: usize, bone: &Bone) -> TransportResult<()>;

    /// Start a grab; the transport assigns the grab id
    fn my_avatar_grab(&self, session: SessionId, grab: GrabData) -> TransportResult<()>;
    fn my_avatar_release_grab(&self, session: SessionId, grab_id: Uuid) -> TransportResult<()>;
}

/// Raw input side of a negotiated audio stream
///
/// May be called from a real-time audio thread.
pub trait AudioInputBuffer: Send + Sync {
    /// Queue raw samples for the mixer, returning the bytes accepted
    fn write(&self, data: &[u8]) -> usize;
}

/// Raw output side of a negotiated audio stream
///
/// May be called from a real-time audio thread.
pub trait AudioOutputBuffer: Send + Sync {
    /// Fill `data` with mixer output, returning the bytes produced
    fn read(&self, data: &mut [u8]) -> usize;
}

/// Audio streaming with the mixer
pub trait AudioTransport {
    fn enable_audio(&self, session: SessionId) -> TransportResult<()>;
    fn set_audio_output_buffer_frames(&self, session: SessionId, frames: u32) -> TransportResult<()>;

    fn set_audio_input_format(&self, session: SessionId, format: AudioFormat) -> TransportResult<()>;
    fn set_audio_output_format(&self, session: SessionId, format: AudioFormat) -> TransportResult<()>;

    /// Current input handle, `None` while negotiation is pending
    fn audio_input_handle(&self, session: SessionId) -> TransportResult<Option<Arc<dyn AudioInputBuffer>>>;
    /// Current output handle, `None` while negotiation is pending
    fn audio_output_handle(&self, session: SessionId) -> TransportResult<Option<Arc<dyn AudioOutputBuffer>>>;

    fn set_audio_input_echo(&self, session: SessionId, enabled: bool) -> TransportResult<()>;
    fn set_audio_input_muted(&self, session: SessionId, muted: bool) -> TransportResult<()>;
    fn audio_input_muted_by_mixer(&self, session: SessionId) -> TransportResult<bool>;
    fn set_audio_vantage(&self, session: SessionId, vantage: Vantage) -> TransportResult<()>;
    fn set_audio_bounds(&self, session: SessionId, bounds: Bounds) -> TransportResult<()>;
    fn set_audio_injector_gain(&self, session: SessionId, gain: f32) -> TransportResult<()>;

    fn set_audio_codec_params(&self, session: SessionId, codec: &str, params: CodecParams) -> TransportResult<()>;
    fn selected_audio_codec(&self, session: SessionId) -> TransportResult<String>;
}

/// Channel messaging
pub trait MessageTransport {
    fn enable_messages(&self, session: SessionId, types: MessageTypes) -> TransportResult<()>;

    fn subscribe(&self, session: SessionId, channel: &str) -> TransportResult<()>;
    fn unsubscribe(&self, session: SessionId, channel: &str) -> TransportResult<()>;

    fn clear_messages(&self, session: SessionId, types: MessageTypes) -> TransportResult<()>;
    fn update_messages(&self, session: SessionId, types: MessageTypes) -> TransportResult<()>;

    fn message_count(&self, session: SessionId, kind: MessageKind) -> TransportResult<usize>;
    fn message_payload(&self, session: SessionId, kind: MessageKind, index: usize) -> TransportResult<Bytes>;
    fn message_size(&self, session: SessionId, kind: MessageKind, index: usize) -> TransportResult<usize>;
    fn message_channel(&self, session: SessionId, kind: MessageKind, index: usize) -> TransportResult<String>;
    fn message_sender(&self, session: SessionId, kind: MessageKind, index: usize) -> TransportResult<Uuid>;
    fn message_local_only(&self, session: SessionId, kind: MessageKind, index: usize) -> TransportResult<bool>;

    fn send_message(
        &self,
        session: SessionId,
        kind: MessageKind,
        channel: &str,
        payload: &[u8],
        local_only: bool,
    ) -> TransportResult<()>;
}

/// The full transport surface consumed by this crate
pub trait Transport:
    SessionTransport + NodeTransport + AvatarTransport + AudioTransport + MessageTransport + Send + Sync
{
}

impl<T> Transport for T where
    T: SessionTransport + NodeTransport + AvatarTransport + AudioTransport + MessageTransport + Send + Sync
{
}

/// Shared handle to a transport
pub type SharedTransport = Arc<dyn Transport>;
