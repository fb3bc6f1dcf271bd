//! In-process transport
//!
//! Keeps a scripted world in memory: remote avatars, nodes and inbound
//! messages are pushed in through the scripting methods and become visible
//! the way a networked transport would expose them, after the matching
//! `update_*` call. Audio handles are backed by
//! [`RingBuffer`](crate::audio::buffer::RingBuffer)s.

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    AudioInputBuffer, AudioOutputBuffer, AudioTransport, AvatarTransport, MessageTransport,
    NodeTransport, SessionId, SessionTransport,
};
use crate::audio::buffer::{create_shared_buffer, SharedRingBuffer};
use crate::audio::format::{decode_samples, encode_samples, AudioFormat};
use crate::audio::pipeline::CodecParams;
use crate::avatars::data::{
    AdditionalFlags, Attachment, AvatarData, Bone, DisconnectReason, FaceTrackerInfo, GrabData,
    GrabJoints, HandControllers, Joint, JointFlags, ParentInfo, RawAttachment,
};
use crate::avatars::view::CameraView;
use crate::config::SessionParams;
use crate::context::VersionInfo;
use crate::error::{TransportError, TransportResult};
use crate::math::{Bounds, Quaternion, Transform, Vantage, Vector3};
use crate::messages::message::{MessageKind, MessageTypes};

/// Seconds of audio each in-memory ring buffer can hold
const RING_SECONDS: usize = 1;

/// A node as scripted into the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// `None` makes the uuid read fail
    pub uuid: Option<Uuid>,
    pub active: bool,
    pub node_type: u8,
    pub address: Option<String>,
}

/// A message held by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub kind: MessageKind,
    pub channel: String,
    pub payload: Bytes,
    /// `None` makes the sender read fail
    pub sender: Option<Uuid>,
    pub local_only: bool,
}

/// Audio controls last set by the client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioSettings {
    pub enabled: bool,
    pub output_buffer_frames: u32,
    pub input_format: Option<AudioFormat>,
    pub output_format: Option<AudioFormat>,
    pub echo: bool,
    pub input_muted: bool,
    pub vantage: Vantage,
    pub bounds: Bounds,
    pub injector_gain: f32,
    pub codec_params: Vec<(String, CodecParams)>,
}

#[derive(Debug, Clone)]
struct AvatarRecord {
    id: Uuid,
    data: AvatarData,
    grabs: Vec<(Uuid, GrabData)>,
    changed: bool,
    withheld: bool,
}

impl AvatarRecord {
    fn new(id: Uuid, data: AvatarData) -> Self {
        Self {
            id,
            data,
            grabs: Vec::new(),
            changed: true,
            withheld: false,
        }
    }
}

/// This client's avatar as written through the setters
#[derive(Debug, Clone, Default)]
struct LocalAvatar {
    data: AvatarData,
    joints: Vec<Vantage>,
    joint_flags: Vec<JointFlags>,
    attachments: Vec<RawAttachment>,
    grabs: Vec<(Uuid, GrabData)>,
}

impl LocalAvatar {
    fn snapshot(&self) -> AvatarData {
        let mut data = self.data.clone();
        data.pose = self
            .joints
            .iter()
            .enumerate()
            .map(|(i, vantage)| Joint::from_raw(*vantage, self.joint_flags.get(i).copied().unwrap_or_default()))
            .collect();
        data.attachments = self.attachments.iter().cloned().map(Attachment::from_raw).collect();
        data
    }
}

struct Inner {
    next_session: u32,
    sessions: HashSet<SessionId>,
    calls: Vec<&'static str>,

    // Session
    auto_connect: bool,
    status: i32,
    session_uuid: Option<Uuid>,
    location: Option<String>,
    version: VersionInfo,

    // Nodes
    nodes: Vec<NodeRecord>,
    node_refreshes: usize,

    // Avatars
    avatars_enabled: bool,
    staged_avatars: Vec<AvatarRecord>,
    visible_avatars: Vec<AvatarRecord>,
    staged_disconnections: Vec<(Uuid, u8)>,
    disconnections: Vec<(Uuid, u8)>,
    /// Whether `disconnections` was counted since the last update
    disconnections_read: bool,
    disconnections_withheld: bool,
    views: Vec<Option<CameraView>>,
    local: LocalAvatar,

    // Audio
    audio: AudioSettings,
    audio_ready: bool,
    input_ring: Option<SharedRingBuffer>,
    output_ring: Option<SharedRingBuffer>,
    muted_by_mixer: bool,
    selected_codec: Option<String>,

    // Messages
    message_types: MessageTypes,
    subscriptions: HashSet<String>,
    staged_messages: Vec<RawMessage>,
    text_inbox: Vec<RawMessage>,
    data_inbox: Vec<RawMessage>,
    sent_messages: Vec<RawMessage>,
}

impl Inner {
    fn new() -> Self {
        Self {
            next_session: 1,
            sessions: HashSet::new(),
            calls: Vec::new(),
            auto_connect: true,
            status: 0,
            session_uuid: None,
            location: None,
            version: VersionInfo {
                year: 2024,
                major: 1,
                minor: 0,
                commit: "memory".into(),
                number: "1.0".into(),
                full: "2024.1.0-memory".into(),
            },
            nodes: Vec::new(),
            node_refreshes: 0,
            avatars_enabled: false,
            staged_avatars: Vec::new(),
            visible_avatars: Vec::new(),
            staged_disconnections: Vec::new(),
            disconnections: Vec::new(),
            disconnections_read: false,
            disconnections_withheld: false,
            views: Vec::new(),
            local: LocalAvatar::default(),
            audio: AudioSettings::default(),
            audio_ready: true,
            input_ring: None,
            output_ring: None,
            muted_by_mixer: false,
            selected_codec: None,
            message_types: MessageTypes::NONE,
            subscriptions: HashSet::new(),
            staged_messages: Vec::new(),
            text_inbox: Vec::new(),
            data_inbox: Vec::new(),
            sent_messages: Vec::new(),
        }
    }

    fn avatar(&self, slot: usize) -> TransportResult<&AvatarRecord> {
        if !self.avatars_enabled {
            return Err(TransportError::Unavailable);
        }
        item(&self.visible_avatars, slot)
    }

    fn avatar_mut(&mut self, slot: usize) -> TransportResult<&mut AvatarRecord> {
        if !self.avatars_enabled {
            return Err(TransportError::Unavailable);
        }
        item_mut(&mut self.visible_avatars, slot)
    }

    fn disconnection(&self, index: usize) -> TransportResult<(Uuid, u8)> {
        if self.disconnections_withheld {
            return Err(TransportError::Unavailable);
        }
        item(&self.disconnections, index).copied()
    }

    fn node(&self, index: usize) -> TransportResult<&NodeRecord> {
        item(&self.nodes, index)
    }

    fn inbox(&self, kind: MessageKind) -> TransportResult<&Vec<RawMessage>> {
        if !self.message_types.contains(kind.mask()) {
            return Err(TransportError::MessageTypeDisabled);
        }
        Ok(match kind {
            MessageKind::Text => &self.text_inbox,
            MessageKind::Data => &self.data_inbox,
        })
    }

    fn message(&self, kind: MessageKind, index: usize) -> TransportResult<&RawMessage> {
        item(self.inbox(kind)?, index)
    }
}

fn item<T>(items: &[T], index: usize) -> TransportResult<&T> {
    items.get(index).ok_or(TransportError::IndexOutOfRange {
        index,
        count: items.len(),
    })
}

fn item_mut<T>(items: &mut [T], index: usize) -> TransportResult<&mut T> {
    let count = items.len();
    items
        .get_mut(index)
        .ok_or(TransportError::IndexOutOfRange { index, count })
}

fn ring_for(format: &AudioFormat) -> SharedRingBuffer {
    create_shared_buffer(
        format.sample_rate as usize * format.channel_count as usize * RING_SECONDS,
        format.sample_type.bytes_per_sample(),
    )
}

fn check_format(format: &AudioFormat) -> TransportResult<()> {
    if format.sample_rate == 0 || format.channel_count == 0 {
        return Err(TransportError::Rejected(format!("unsupported audio format {:?}", format)));
    }
    Ok(())
}

/// In-process [`Transport`](super::Transport)
pub struct MemoryTransport {
    inner: Mutex<Inner>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Lock the state after checking that `session` is live
    fn session(&self, session: SessionId) -> TransportResult<MutexGuard<'_, Inner>> {
        let inner = self.inner.lock();
        if inner.sessions.contains(&session) {
            Ok(inner)
        } else {
            Err(TransportError::InvalidSession)
        }
    }

    fn with_avatar<T>(
        &self,
        session: SessionId,
        slot: usize,
        read: impl FnOnce(&AvatarRecord) -> T,
    ) -> TransportResult<T> {
        let inner = self.session(session)?;
        inner.avatar(slot).map(read)
    }

    fn with_local(&self, session: SessionId, write: impl FnOnce(&mut LocalAvatar)) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        write(&mut inner.local);
        Ok(())
    }

    fn with_message<T>(
        &self,
        session: SessionId,
        kind: MessageKind,
        index: usize,
        read: impl FnOnce(&RawMessage) -> TransportResult<T>,
    ) -> TransportResult<T> {
        let inner = self.session(session)?;
        inner.message(kind, index).and_then(read)
    }

    // Session scripting

    /// Whether `connect` immediately reports a connected status
    pub fn set_auto_connect(&self, enabled: bool) {
        self.inner.lock().auto_connect = enabled;
    }

    pub fn set_connection_status(&self, code: i32) {
        self.inner.lock().status = code;
    }

    /// Last location passed to `connect`
    pub fn location(&self) -> Option<String> {
        self.inner.lock().location.clone()
    }

    pub fn live_sessions(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Names of the avatar and view calls made so far, in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.lock().calls.clone()
    }

    // Node scripting

    pub fn set_nodes(&self, nodes: Vec<NodeRecord>) {
        self.inner.lock().nodes = nodes;
    }

    pub fn node_refreshes(&self) -> usize {
        self.inner.lock().node_refreshes
    }

    // Avatar scripting

    /// Add a remote avatar; it appears after the next `update_avatars`
    pub fn push_avatar(&self, id: Uuid, data: AvatarData) {
        self.inner.lock().staged_avatars.push(AvatarRecord::new(id, data));
    }

    /// Replace a remote avatar's data and mark it changed
    pub fn update_avatar(&self, id: Uuid, data: AvatarData) -> bool {
        let mut inner = self.inner.lock();
        match inner.staged_avatars.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.data = data;
                record.changed = true;
                true
            }
            None => false,
        }
    }

    /// Mark a remote avatar changed without touching its data
    pub fn touch_avatar(&self, id: Uuid) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.staged_avatars.iter_mut().find(|r| r.id == id) {
            record.changed = true;
        }
    }

    /// Remove a remote avatar and queue its disconnection
    pub fn disconnect_avatar(&self, id: Uuid, reason: DisconnectReason) {
        self.disconnect_avatar_with_code(id, reason.code());
    }

    /// Like [`disconnect_avatar`](Self::disconnect_avatar) with a raw reason code
    pub fn disconnect_avatar_with_code(&self, id: Uuid, code: u8) {
        let mut inner = self.inner.lock();
        inner.staged_avatars.retain(|r| r.id != id);
        inner.staged_disconnections.push((id, code));
    }

    /// Remove a remote avatar without reporting a disconnection
    pub fn forget_avatar(&self, id: Uuid) {
        self.inner.lock().staged_avatars.retain(|r| r.id != id);
    }

    /// Clear a remote avatar's pending change as if it had been read
    pub fn settle_avatar(&self, id: Uuid) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.staged_avatars.iter_mut().find(|r| r.id == id) {
            record.changed = false;
        }
    }

    /// Put a different avatar into `old`'s slot without reporting a disconnection
    pub fn replace_avatar(&self, old: Uuid, id: Uuid, data: AvatarData) -> bool {
        let mut inner = self.inner.lock();
        match inner.staged_avatars.iter_mut().find(|r| r.id == old) {
            Some(record) => {
                *record = AvatarRecord::new(id, data);
                true
            }
            None => false,
        }
    }

    pub fn set_avatar_grabs(&self, id: Uuid, grabs: Vec<(Uuid, GrabData)>) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.staged_avatars.iter_mut().find(|r| r.id == id) {
            record.grabs = grabs;
            record.changed = true;
        }
    }

    /// While withheld, the avatar's display name reads as unavailable
    pub fn withhold_avatar(&self, id: Uuid, withheld: bool) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.staged_avatars.iter_mut().find(|r| r.id == id) {
            record.withheld = withheld;
        }
    }

    /// While withheld, disconnection uuids and reasons read as unavailable
    pub fn withhold_disconnections(&self, withheld: bool) {
        self.inner.lock().disconnections_withheld = withheld;
    }

    /// Camera views last sent by the client
    pub fn views(&self) -> Vec<Option<CameraView>> {
        self.inner.lock().views.clone()
    }

    /// This client's avatar as written through the setters
    pub fn local_avatar(&self) -> AvatarData {
        self.inner.lock().local.snapshot()
    }

    /// This client's active grabs with their assigned ids
    pub fn local_grabs(&self) -> Vec<(Uuid, GrabData)> {
        self.inner.lock().local.grabs.clone()
    }

    // Audio scripting

    /// Whether handle requests complete; while false they stay pending
    pub fn set_audio_ready(&self, ready: bool) {
        self.inner.lock().audio_ready = ready;
    }

    pub fn set_muted_by_mixer(&self, muted: bool) {
        self.inner.lock().muted_by_mixer = muted;
    }

    pub fn audio_settings(&self) -> AudioSettings {
        self.inner.lock().audio.clone()
    }

    /// Queue mixer output, encoded in the negotiated output format
    pub fn push_output_samples(&self, samples: &[f32]) -> usize {
        let inner = self.inner.lock();
        let (Some(ring), Some(format)) = (&inner.output_ring, inner.audio.output_format) else {
            return 0;
        };

        let width = format.sample_type.bytes_per_sample();
        let mut bytes = vec![0u8; samples.len() * width];
        let encoded = encode_samples(format.sample_type, samples, &mut bytes);
        ring.push_slice(&bytes[..encoded * width]) / width
    }

    /// Drain everything written to the input buffer, decoded to floats
    pub fn take_input_samples(&self) -> Vec<f32> {
        let inner = self.inner.lock();
        let (Some(ring), Some(format)) = (&inner.input_ring, inner.audio.input_format) else {
            return Vec::new();
        };

        let bytes = ring.drain();
        let mut samples = vec![0.0; bytes.len() / format.sample_type.bytes_per_sample()];
        decode_samples(format.sample_type, &bytes, &mut samples);
        samples
    }

    // Message scripting

    /// Queue an inbound message; delivered on `update_messages` if subscribed
    pub fn inject_message(
        &self,
        kind: MessageKind,
        channel: &str,
        payload: impl Into<Bytes>,
        sender: Option<Uuid>,
        local_only: bool,
    ) {
        self.inner.lock().staged_messages.push(RawMessage {
            kind,
            channel: channel.to_string(),
            payload: payload.into(),
            sender,
            local_only,
        });
    }

    /// Messages sent by the client, in order
    pub fn sent_messages(&self) -> Vec<RawMessage> {
        self.inner.lock().sent_messages.clone()
    }

    pub fn subscriptions(&self) -> HashSet<String> {
        self.inner.lock().subscriptions.clone()
    }

    pub fn message_types(&self) -> MessageTypes {
        self.inner.lock().message_types
    }
}

impl SessionTransport for MemoryTransport {
    fn create_session(&self, params: &SessionParams) -> TransportResult<SessionId> {
        let mut inner = self.inner.lock();
        let id = SessionId(inner.next_session);
        inner.next_session += 1;
        inner.sessions.insert(id);
        tracing::debug!("Memory session {:?} created for {}", id, params.app.name);
        Ok(id)
    }

    fn destroy_session(&self, session: SessionId) -> TransportResult<()> {
        let mut inner = self.inner.lock();
        if !inner.sessions.remove(&session) {
            return Err(TransportError::InvalidSession);
        }
        if inner.sessions.is_empty() {
            inner.status = 0;
            inner.input_ring = None;
            inner.output_ring = None;
        }
        Ok(())
    }

    fn connect(&self, session: SessionId, location: &str) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        inner.location = Some(location.to_string());
        if inner.auto_connect {
            inner.status = 1;
            if inner.session_uuid.is_none() {
                inner.session_uuid = Some(Uuid::new_v4());
            }
        }
        Ok(())
    }

    fn connection_status(&self, session: SessionId) -> TransportResult<i32> {
        Ok(self.session(session)?.status)
    }

    fn session_uuid(&self, session: SessionId) -> TransportResult<Uuid> {
        self.session(session)?.session_uuid.ok_or(TransportError::Unavailable)
    }

    fn version(&self) -> TransportResult<VersionInfo> {
        Ok(self.inner.lock().version.clone())
    }
}

impl NodeTransport for MemoryTransport {
    fn refresh_nodes(&self, session: SessionId) -> TransportResult<()> {
        self.session(session)?.node_refreshes += 1;
        Ok(())
    }

    fn node_count(&self, session: SessionId) -> TransportResult<usize> {
        Ok(self.session(session)?.nodes.len())
    }

    fn node_uuid(&self, session: SessionId, index: usize) -> TransportResult<Uuid> {
        self.session(session)?
            .node(index)?
            .uuid
            .ok_or(TransportError::Unavailable)
    }

    fn node_active(&self, session: SessionId, index: usize) -> TransportResult<bool> {
        Ok(self.session(session)?.node(index)?.active)
    }

    fn node_type(&self, session: SessionId, index: usize) -> TransportResult<u8> {
        Ok(self.session(session)?.node(index)?.node_type)
    }

    fn node_address(&self, session: SessionId, index: usize) -> TransportResult<String> {
        self.session(session)?
            .node(index)?
            .address
            .clone()
            .ok_or(TransportError::Unavailable)
    }
}

impl AvatarTransport for MemoryTransport {
    fn enable_avatars(&self, session: SessionId) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        inner.avatars_enabled = true;
        inner.calls.push("enable_avatars");
        Ok(())
    }

    fn update_avatars(&self, session: SessionId) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        if !inner.avatars_enabled {
            return Err(TransportError::Unavailable);
        }
        inner.calls.push("update_avatars");

        let previous = std::mem::take(&mut inner.visible_avatars);
        let mut visible = inner.staged_avatars.clone();
        for record in &mut visible {
            // A change nobody read yet stays pending
            if previous.iter().any(|p| p.id == record.id && p.changed) {
                record.changed = true;
            }
        }
        for record in &mut inner.staged_avatars {
            record.changed = false;
        }
        inner.visible_avatars = visible;

        // Disconnections nobody counted carry over into the next update
        let staged = std::mem::take(&mut inner.staged_disconnections);
        if inner.disconnections_read {
            inner.disconnections = staged;
        } else {
            inner.disconnections.extend(staged);
        }
        inner.disconnections_read = false;
        Ok(())
    }

    fn set_view_count(&self, session: SessionId, count: usize) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        inner.views.resize(count, None);
        inner.calls.push("set_view_count");
        Ok(())
    }

    fn set_view(&self, session: SessionId, index: usize, view: &CameraView) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        *item_mut(&mut inner.views, index)? = Some(*view);
        inner.calls.push("set_view");
        Ok(())
    }

    fn disconnection_count(&self, session: SessionId) -> TransportResult<usize> {
        let mut inner = self.session(session)?;
        if inner.disconnections_withheld {
            return Err(TransportError::Unavailable);
        }
        inner.disconnections_read = true;
        Ok(inner.disconnections.len())
    }

    fn disconnection_uuid(&self, session: SessionId, index: usize) -> TransportResult<Uuid> {
        Ok(self.session(session)?.disconnection(index)?.0)
    }

    fn disconnection_reason(&self, session: SessionId, index: usize) -> TransportResult<u8> {
        Ok(self.session(session)?.disconnection(index)?.1)
    }

    fn avatar_count(&self, session: SessionId) -> TransportResult<usize> {
        let inner = self.session(session)?;
        if !inner.avatars_enabled {
            return Err(TransportError::Unavailable);
        }
        Ok(inner.visible_avatars.len())
    }

    fn avatar_uuid(&self, session: SessionId, slot: usize) -> TransportResult<Uuid> {
        self.with_avatar(session, slot, |r| r.id)
    }

    fn avatar_display_name(&self, session: SessionId, slot: usize) -> TransportResult<String> {
        self.with_avatar(session, slot, |r| {
            if r.withheld {
                Err(TransportError::Unavailable)
            } else {
                Ok(r.data.display_name.clone())
            }
        })?
    }

    fn avatar_skeleton_model_url(&self, session: SessionId, slot: usize) -> TransportResult<String> {
        self.with_avatar(session, slot, |r| r.data.skeleton_model_url.clone())
    }

    fn avatar_look_at_snapping(&self, session: SessionId, slot: usize) -> TransportResult<bool> {
        self.with_avatar(session, slot, |r| r.data.look_at_snapping_enabled)
    }

    fn avatar_verification_failed(&self, session: SessionId, slot: usize) -> TransportResult<bool> {
        self.with_avatar(session, slot, |r| r.data.verification_failed)
    }

    fn avatar_global_position(&self, session: SessionId, slot: usize) -> TransportResult<Vector3> {
        self.with_avatar(session, slot, |r| r.data.global_position)
    }

    fn avatar_orientation(&self, session: SessionId, slot: usize) -> TransportResult<Quaternion> {
        self.with_avatar(session, slot, |r| r.data.orientation)
    }

    fn avatar_scale(&self, session: SessionId, slot: usize) -> TransportResult<f32> {
        self.with_avatar(session, slot, |r| r.data.scale)
    }

    fn avatar_bounding_box(&self, session: SessionId, slot: usize) -> TransportResult<Bounds> {
        self.with_avatar(session, slot, |r| r.data.bounds)
    }

    fn avatar_look_at_position(&self, session: SessionId, slot: usize) -> TransportResult<Vector3> {
        self.with_avatar(session, slot, |r| r.data.look_at_position)
    }

    fn avatar_audio_loudness(&self, session: SessionId, slot: usize) -> TransportResult<f32> {
        self.with_avatar(session, slot, |r| r.data.audio_loudness)
    }

    fn avatar_sensor_to_world(&self, session: SessionId, slot: usize) -> TransportResult<Transform> {
        self.with_avatar(session, slot, |r| r.data.sensor_to_world)
    }

    fn avatar_additional_flags(&self, session: SessionId, slot: usize) -> TransportResult<AdditionalFlags> {
        self.with_avatar(session, slot, |r| r.data.additional_flags)
    }

    fn avatar_parent_info(&self, session: SessionId, slot: usize) -> TransportResult<ParentInfo> {
        self.with_avatar(session, slot, |r| ParentInfo::to_raw(r.data.parent.as_ref()))
    }

    fn avatar_local_position(&self, session: SessionId, slot: usize) -> TransportResult<Vector3> {
        self.with_avatar(session, slot, |r| r.data.local_position)
    }

    fn avatar_hand_controllers(&self, session: SessionId, slot: usize) -> TransportResult<HandControllers> {
        self.with_avatar(session, slot, |r| r.data.hand_controllers)
    }

    fn avatar_face_tracker_info(&self, session: SessionId, slot: usize) -> TransportResult<FaceTrackerInfo> {
        self.with_avatar(session, slot, |r| r.data.face_tracker_info.clone())
    }

    fn avatar_grab_joints(&self, session: SessionId, slot: usize) -> TransportResult<GrabJoints> {
        self.with_avatar(session, slot, |r| r.data.grab_joints)
    }

    fn avatar_joint_count(&self, session: SessionId, slot: usize) -> TransportResult<usize> {
        self.with_avatar(session, slot, |r| r.data.pose.len())
    }

    fn avatar_joint(&self, session: SessionId, slot: usize, joint: usize) -> TransportResult<Vantage> {
        self.with_avatar(session, slot, |r| item(&r.data.pose, joint).map(|j| j.to_raw().0))?
    }

    fn avatar_joint_flags(&self, session: SessionId, slot: usize, joint: usize) -> TransportResult<JointFlags> {
        self.with_avatar(session, slot, |r| item(&r.data.pose, joint).map(|j| j.to_raw().1))?
    }

    fn avatar_attachment_count(&self, session: SessionId, slot: usize) -> TransportResult<usize> {
        self.with_avatar(session, slot, |r| r.data.attachments.len())
    }

    fn avatar_attachment(&self, session: SessionId, slot: usize, index: usize) -> TransportResult<RawAttachment> {
        self.with_avatar(session, slot, |r| item(&r.data.attachments, index).map(Attachment::to_raw))?
    }

    fn avatar_bone_count(&self, session: SessionId, slot: usize) -> TransportResult<usize> {
        self.with_avatar(session, slot, |r| r.data.skeleton.len())
    }

    fn avatar_bone(&self, session: SessionId, slot: usize, index: usize) -> TransportResult<Bone> {
        self.with_avatar(session, slot, |r| item(&r.data.skeleton, index).cloned())?
    }

    fn avatar_grab_count(&self, session: SessionId, slot: usize) -> TransportResult<usize> {
        self.with_avatar(session, slot, |r| r.grabs.len())
    }

    fn avatar_grab(&self, session: SessionId, slot: usize, index: usize) -> TransportResult<(Uuid, GrabData)> {
        self.with_avatar(session, slot, |r| item(&r.grabs, index).copied())?
    }

    fn avatar_changed(&self, session: SessionId, slot: usize) -> TransportResult<bool> {
        let mut inner = self.session(session)?;
        let record = inner.avatar_mut(slot)?;
        Ok(std::mem::replace(&mut record.changed, false))
    }

    fn set_my_display_name(&self, session: SessionId, name: &str) -> TransportResult<()> {
        self.with_local(session, |l| l.data.display_name = name.to_string())
    }

    fn set_my_skeleton_model_url(&self, session: SessionId, url: &str) -> TransportResult<()> {
        self.with_local(session, |l| l.data.skeleton_model_url = url.to_string())
    }

    fn set_my_look_at_snapping(&self, session: SessionId, enabled: bool) -> TransportResult<()> {
        self.with_local(session, |l| l.data.look_at_snapping_enabled = enabled)
    }

    fn set_my_global_position(&self, session: SessionId, position: Vector3) -> TransportResult<()> {
        self.with_local(session, |l| l.data.global_position = position)
    }

    fn set_my_orientation(&self, session: SessionId, orientation: Quaternion) -> TransportResult<()> {
        self.with_local(session, |l| l.data.orientation = orientation)
    }

    fn set_my_scale(&self, session: SessionId, scale: f32) -> TransportResult<()> {
        self.with_local(session, |l| l.data.scale = scale)
    }

    fn set_my_bounding_box(&self, session: SessionId, bounds: Bounds) -> TransportResult<()> {
        self.with_local(session, |l| l.data.bounds = bounds)
    }

    fn set_my_look_at(&self, session: SessionId, position: Vector3) -> TransportResult<()> {
        self.with_local(session, |l| l.data.look_at_position = position)
    }

    fn set_my_audio_loudness(&self, session: SessionId, loudness: f32) -> TransportResult<()> {
        self.with_local(session, |l| l.data.audio_loudness = loudness)
    }

    fn set_my_sensor_to_world(&self, session: SessionId, transform: Transform) -> TransportResult<()> {
        self.with_local(session, |l| l.data.sensor_to_world = transform)
    }

    fn set_my_additional_flags(&self, session: SessionId, flags: AdditionalFlags) -> TransportResult<()> {
        self.with_local(session, |l| l.data.additional_flags = flags)
    }

    fn set_my_parent_info(&self, session: SessionId, parent: ParentInfo) -> TransportResult<()> {
        self.with_local(session, |l| l.data.parent = ParentInfo::from_raw(parent))
    }

    fn set_my_local_position(&self, session: SessionId, position: Vector3) -> TransportResult<()> {
        self.with_local(session, |l| l.data.local_position = position)
    }

    fn set_my_hand_controllers(&self, session: SessionId, controllers: HandControllers) -> TransportResult<()> {
        self.with_local(session, |l| l.data.hand_controllers = controllers)
    }

    fn set_my_face_tracker_info(&self, session: SessionId, info: &FaceTrackerInfo) -> TransportResult<()> {
        self.with_local(session, |l| l.data.face_tracker_info = info.clone())
    }

    fn set_my_grab_joints(&self, session: SessionId, joints: GrabJoints) -> TransportResult<()> {
        self.with_local(session, |l| l.data.grab_joints = joints)
    }

    fn set_my_joint_count(&self, session: SessionId, count: usize) -> TransportResult<()> {
        self.with_local(session, |l| l.joints.resize(count, Vantage::default()))
    }

    fn set_my_joint(&self, session: SessionId, index: usize, joint: Vantage) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        *item_mut(&mut inner.local.joints, index)? = joint;
        Ok(())
    }

    fn set_my_joint_flags_count(&self, session: SessionId, count: usize) -> TransportResult<()> {
        self.with_local(session, |l| l.joint_flags.resize(count, JointFlags::default()))
    }

    fn set_my_joint_flags(&self, session: SessionId, index: usize, flags: JointFlags) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        *item_mut(&mut inner.local.joint_flags, index)? = flags;
        Ok(())
    }

    fn set_my_attachment_count(&self, session: SessionId, count: usize) -> TransportResult<()> {
        self.with_local(session, |l| l.attachments.resize(count, RawAttachment::default()))
    }

    fn set_my_attachment(&self, session: SessionId, index: usize, attachment: &RawAttachment) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        *item_mut(&mut inner.local.attachments, index)? = attachment.clone();
        Ok(())
    }

    fn set_my_bone_count(&self, session: SessionId, count: usize) -> TransportResult<()> {
        self.with_local(session, |l| l.data.skeleton.resize(count, Bone::default()))
    }

    fn set_my_bone(&self, session: SessionId, index: usize, bone: &Bone) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        *item_mut(&mut inner.local.data.skeleton, index)? = bone.clone();
        Ok(())
    }

    fn my_avatar_grab(&self, session: SessionId, grab: GrabData) -> TransportResult<()> {
        self.with_local(session, |l| l.grabs.push((Uuid::new_v4(), grab)))
    }

    fn my_avatar_release_grab(&self, session: SessionId, grab_id: Uuid) -> TransportResult<()> {
        self.with_local(session, |l| l.grabs.retain(|(id, _)| *id != grab_id))
    }
}

impl AudioTransport for MemoryTransport {
    fn enable_audio(&self, session: SessionId) -> TransportResult<()> {
        self.session(session)?.audio.enabled = true;
        Ok(())
    }

    fn set_audio_output_buffer_frames(&self, session: SessionId, frames: u32) -> TransportResult<()> {
        self.session(session)?.audio.output_buffer_frames = frames;
        Ok(())
    }

    fn set_audio_input_format(&self, session: SessionId, format: AudioFormat) -> TransportResult<()> {
        check_format(&format)?;
        let mut inner = self.session(session)?;
        inner.audio.input_format = Some(format);
        inner.input_ring = Some(ring_for(&format));
        Ok(())
    }

    fn set_audio_output_format(&self, session: SessionId, format: AudioFormat) -> TransportResult<()> {
        check_format(&format)?;
        let mut inner = self.session(session)?;
        inner.audio.output_format = Some(format);
        inner.output_ring = Some(ring_for(&format));
        Ok(())
    }

    fn audio_input_handle(&self, session: SessionId) -> TransportResult<Option<Arc<dyn AudioInputBuffer>>> {
        let inner = self.session(session)?;
        if !inner.audio.enabled || !inner.audio_ready {
            return Ok(None);
        }
        Ok(inner
            .input_ring
            .clone()
            .map(|ring| ring as Arc<dyn AudioInputBuffer>))
    }

    fn audio_output_handle(&self, session: SessionId) -> TransportResult<Option<Arc<dyn AudioOutputBuffer>>> {
        let inner = self.session(session)?;
        if !inner.audio.enabled || !inner.audio_ready {
            return Ok(None);
        }
        Ok(inner
            .output_ring
            .clone()
            .map(|ring| ring as Arc<dyn AudioOutputBuffer>))
    }

    fn set_audio_input_echo(&self, session: SessionId, enabled: bool) -> TransportResult<()> {
        self.session(session)?.audio.echo = enabled;
        Ok(())
    }

    fn set_audio_input_muted(&self, session: SessionId, muted: bool) -> TransportResult<()> {
        self.session(session)?.audio.input_muted = muted;
        Ok(())
    }

    fn audio_input_muted_by_mixer(&self, session: SessionId) -> TransportResult<bool> {
        Ok(self.session(session)?.muted_by_mixer)
    }

    fn set_audio_vantage(&self, session: SessionId, vantage: Vantage) -> TransportResult<()> {
        self.session(session)?.audio.vantage = vantage;
        Ok(())
    }

    fn set_audio_bounds(&self, session: SessionId, bounds: Bounds) -> TransportResult<()> {
        self.session(session)?.audio.bounds = bounds;
        Ok(())
    }

    fn set_audio_injector_gain(&self, session: SessionId, gain: f32) -> TransportResult<()> {
        self.session(session)?.audio.injector_gain = gain;
        Ok(())
    }

    fn set_audio_codec_params(&self, session: SessionId, codec: &str, params: CodecParams) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        inner.audio.codec_params.retain(|(name, _)| name != codec);
        inner.audio.codec_params.push((codec.to_string(), params));

        // The mixer picks the most recently allowed codec
        if params.allowed {
            inner.selected_codec = Some(codec.to_string());
        } else if inner.selected_codec.as_deref() == Some(codec) {
            inner.selected_codec = None;
        }
        Ok(())
    }

    fn selected_audio_codec(&self, session: SessionId) -> TransportResult<String> {
        self.session(session)?
            .selected_codec
            .clone()
            .ok_or(TransportError::Unavailable)
    }
}

impl MessageTransport for MemoryTransport {
    fn enable_messages(&self, session: SessionId, types: MessageTypes) -> TransportResult<()> {
        self.session(session)?.message_types |= types;
        Ok(())
    }

    fn subscribe(&self, session: SessionId, channel: &str) -> TransportResult<()> {
        self.session(session)?.subscriptions.insert(channel.to_string());
        Ok(())
    }

    fn unsubscribe(&self, session: SessionId, channel: &str) -> TransportResult<()> {
        self.session(session)?.subscriptions.remove(channel);
        Ok(())
    }

    fn clear_messages(&self, session: SessionId, types: MessageTypes) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        if types.contains(MessageTypes::TEXT) {
            inner.text_inbox.clear();
        }
        if types.contains(MessageTypes::DATA) {
            inner.data_inbox.clear();
        }
        Ok(())
    }

    fn update_messages(&self, session: SessionId, types: MessageTypes) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        let deliverable = MessageTypes::from_bits(types.bits() & inner.message_types.bits());

        let staged = std::mem::take(&mut inner.staged_messages);
        let mut pending = Vec::new();
        for message in staged {
            if !deliverable.contains(message.kind.mask()) {
                pending.push(message);
            } else if inner.subscriptions.contains(&message.channel) {
                let kind = message.kind;
                match kind {
                    MessageKind::Text => inner.text_inbox.push(message),
                    MessageKind::Data => inner.data_inbox.push(message),
                }
            }
        }
        inner.staged_messages = pending;
        Ok(())
    }

    fn message_count(&self, session: SessionId, kind: MessageKind) -> TransportResult<usize> {
        Ok(self.session(session)?.inbox(kind)?.len())
    }

    fn message_payload(&self, session: SessionId, kind: MessageKind, index: usize) -> TransportResult<Bytes> {
        self.with_message(session, kind, index, |m| Ok(m.payload.clone()))
    }

    fn message_size(&self, session: SessionId, kind: MessageKind, index: usize) -> TransportResult<usize> {
        self.with_message(session, kind, index, |m| Ok(m.payload.len()))
    }

    fn message_channel(&self, session: SessionId, kind: MessageKind, index: usize) -> TransportResult<String> {
        self.with_message(session, kind, index, |m| Ok(m.channel.clone()))
    }

    fn message_sender(&self, session: SessionId, kind: MessageKind, index: usize) -> TransportResult<Uuid> {
        self.with_message(session, kind, index, |m| m.sender.ok_or(TransportError::Unavailable))
    }

    fn message_local_only(&self, session: SessionId, kind: MessageKind, index: usize) -> TransportResult<bool> {
        self.with_message(session, kind, index, |m| Ok(m.local_only))
    }

    fn send_message(
        &self,
        session: SessionId,
        kind: MessageKind,
        channel: &str,
        payload: &[u8],
        local_only: bool,
    ) -> TransportResult<()> {
        let mut inner = self.session(session)?;
        let message = RawMessage {
            kind,
            channel: channel.to_string(),
            payload: Bytes::copy_from_slice(payload),
            sender: Some(inner.session_uuid.unwrap_or_else(Uuid::nil)),
            local_only,
        };

        // Loop back to this client, as the mixer does for its own subscriptions
        inner.staged_messages.push(message.clone());
        inner.sent_messages.push(message);
        Ok(())
    }
}
