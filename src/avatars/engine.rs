//! Remote avatar mirroring and outbound avatar state
//!
//! Mirrors are kept in transport slot order so they can be refreshed by
//! index, with a side map from avatar id to slot for host lookups. Slots
//! are only meaningful within one transport snapshot, so every tick
//! applies disconnections before it grows or refreshes anything. Mirrors
//! past the transport's count are trimmed once the refresh has realigned
//! any avatar that moved to another slot.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::avatars::data::{
    AdditionalFlags, Attachment, AvatarData, Bone, DisconnectReason, FaceTrackerInfo, GrabAction,
    GrabData, GrabJoints, HandControllers, Joint, ParentInfo, RemoteAvatar,
    MAX_BLENDSHAPE_COEFFICIENTS,
};
use crate::avatars::view::CameraView;
use crate::context::Session;
use crate::error::TransportResult;
use crate::math::{Bounds, Quaternion, Transform, Vector3};
use crate::transport::{SessionId, Transport};

/// Changes to the set of mirrored avatars
#[derive(Debug, Clone, PartialEq)]
pub enum AvatarEvent {
    /// A new mirror was created; its data arrives with a later `Updated`
    Connected(RemoteAvatar),
    /// A mirror was removed
    Disconnected {
        avatar: RemoteAvatar,
        reason: DisconnectReason,
    },
    /// A mirror's data was replaced
    Updated(RemoteAvatar),
}

/// Mirrors remote avatars and publishes this client's avatar
pub struct AvatarSyncEngine {
    session: Arc<Session>,
    mirrors: Vec<RemoteAvatar>,
    slots: HashMap<Uuid, usize>,
    /// Mirrors still waiting for their first complete read
    unpopulated: HashSet<Uuid>,
    views: Option<Vec<CameraView>>,
    events_tx: Sender<AvatarEvent>,
    events_rx: Receiver<AvatarEvent>,
}

impl AvatarSyncEngine {
    pub fn new(session: Arc<Session>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            session,
            mirrors: Vec::new(),
            slots: HashMap::new(),
            unpopulated: HashSet::new(),
            views: None,
            events_tx,
            events_rx,
        }
    }

    /// Start receiving avatar data
    pub fn enable(&self) {
        match self
            .session
            .live()
            .and_then(|(transport, id)| transport.enable_avatars(id))
        {
            Ok(()) => tracing::debug!("Avatar mixing enabled"),
            Err(e) => tracing::warn!("Failed to enable avatars: {}", e),
        }
    }

    /// Views pushed to the mixer for culling before every update
    pub fn set_camera_views(&mut self, views: impl Into<Vec<CameraView>>) {
        self.views = Some(views.into());
    }

    /// Stop pushing camera views
    pub fn clear_camera_views(&mut self) {
        self.views = None;
    }

    /// Mirrors in transport slot order
    pub fn others(&self) -> &[RemoteAvatar] {
        if self.session.is_alive() {
            &self.mirrors
        } else {
            &[]
        }
    }

    /// Mirror with the given avatar id
    pub fn get(&self, id: Uuid) -> Option<&RemoteAvatar> {
        if !self.session.is_alive() {
            return None;
        }
        self.slots.get(&id).and_then(|&slot| self.mirrors.get(slot))
    }

    /// Events raised by [`tick`](Self::tick), in detection order
    pub fn events(&self) -> &Receiver<AvatarEvent> {
        &self.events_rx
    }

    /// Take every pending event
    pub fn drain_events(&self) -> Vec<AvatarEvent> {
        self.events_rx.try_iter().collect()
    }

    /// Reconcile mirrors with the transport
    ///
    /// Views, update, disconnections, growth, refresh, trim. Any step that
    /// cannot be read is retried on the next tick.
    pub fn tick(&mut self) {
        let session = self.session.clone();
        let Ok((transport, id)) = session.live() else {
            return;
        };

        if let Some(views) = &self.views {
            if let Err(e) = push_views(transport, id, views) {
                tracing::debug!("Failed to push camera views: {}", e);
            }
        }

        if let Err(e) = transport.update_avatars(id) {
            tracing::trace!("Avatar update unavailable: {}", e);
            return;
        }

        if let Err(e) = self.reconcile_disconnections(transport, id) {
            if e.is_transient() {
                tracing::debug!("Disconnections unavailable, deferring avatar sync: {}", e);
            } else {
                tracing::warn!("Failed to read disconnections: {}", e);
            }
            return;
        }

        let count = match transport.avatar_count(id) {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::trace!("Avatar count unavailable: {}", e);
                None
            }
        };

        if let Some(count) = count {
            if let Err(e) = self.grow(transport, id, count) {
                tracing::trace!("Avatar growth stopped: {}", e);
            }
        }

        self.refresh(transport, id);

        if let Some(count) = count {
            self.trim(count);
        }
    }

    fn emit(&self, event: AvatarEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Rebuild the id map; the lowest slot wins if an id appears twice
    fn reindex(&mut self) {
        self.slots.clear();
        for (slot, mirror) in self.mirrors.iter().enumerate() {
            self.slots.entry(mirror.id).or_insert(slot);
        }
    }

    fn reconcile_disconnections(
        &mut self,
        transport: &dyn Transport,
        id: SessionId,
    ) -> TransportResult<()> {
        let count = transport.disconnection_count(id)?;
        for index in 0..count {
            let uuid = transport.disconnection_uuid(id, index)?;
            let reason = DisconnectReason::from_code(transport.disconnection_reason(id, index)?);

            if let Some(slot) = self.slots.get(&uuid).copied() {
                let avatar = self.mirrors.remove(slot);
                self.reindex();
                self.unpopulated.remove(&uuid);
                tracing::debug!("Avatar {} disconnected ({:?})", uuid, reason);
                self.emit(AvatarEvent::Disconnected { avatar, reason });
            }
        }
        Ok(())
    }

    fn grow(&mut self, transport: &dyn Transport, id: SessionId, count: usize) -> TransportResult<()> {
        while self.mirrors.len() < count {
            let slot = self.mirrors.len();
            let mirror = RemoteAvatar::new(transport.avatar_uuid(id, slot)?);

            tracing::debug!("Avatar {} connected in slot {}", mirror.id, slot);
            self.slots.entry(mirror.id).or_insert(slot);
            self.unpopulated.insert(mirror.id);
            self.emit(AvatarEvent::Connected(mirror.clone()));
            self.mirrors.push(mirror);
        }
        Ok(())
    }

    fn refresh(&mut self, transport: &dyn Transport, id: SessionId) {
        for slot in 0..self.mirrors.len() {
            let uuid = match transport.avatar_uuid(id, slot) {
                Ok(uuid) => uuid,
                Err(e) => {
                    tracing::trace!("Slot {} unavailable: {}", slot, e);
                    continue;
                }
            };

            if uuid != self.mirrors[slot].id {
                self.realign(slot, uuid);
            }

            let (data, grabs) = match read_avatar(transport, id, slot) {
                Ok(read) => read,
                Err(e) => {
                    tracing::trace!("Avatar {} incomplete: {}", uuid, e);
                    continue;
                }
            };

            // Always consume the flag; a fresh mirror takes its first read regardless
            let changed = transport.avatar_changed(id, slot) == Ok(true);
            if self.unpopulated.remove(&uuid) || changed {
                let mirror = &mut self.mirrors[slot];
                mirror.data = data;
                mirror.grab_actions = grabs;
                let updated = mirror.clone();
                self.emit(AvatarEvent::Updated(updated));
            }
        }
    }

    /// `slot` now holds `uuid`; move its mirror here if a later slot has it
    fn realign(&mut self, slot: usize, uuid: Uuid) {
        match self.mirrors[slot + 1..].iter().position(|m| m.id == uuid) {
            Some(offset) => {
                self.mirrors.swap(slot, slot + 1 + offset);
                self.reindex();
                tracing::debug!("Avatar {} moved to slot {}", uuid, slot);
            }
            None => self.replace_slot(slot, uuid),
        }
    }

    /// The transport reused `slot` for another avatar without reporting a disconnection
    fn replace_slot(&mut self, slot: usize, uuid: Uuid) {
        let avatar = std::mem::replace(&mut self.mirrors[slot], RemoteAvatar::new(uuid));
        self.reindex();
        self.unpopulated.remove(&avatar.id);
        self.unpopulated.insert(uuid);
        tracing::debug!("Slot {} reused: {} replaced by {}", slot, avatar.id, uuid);

        self.emit(AvatarEvent::Disconnected {
            avatar,
            reason: DisconnectReason::Unknown,
        });
        self.emit(AvatarEvent::Connected(self.mirrors[slot].clone()));
    }

    /// Drop mirrors past the transport's avatar count
    fn trim(&mut self, count: usize) {
        if self.mirrors.len() <= count {
            return;
        }

        let gone: Vec<RemoteAvatar> = self.mirrors.drain(count..).collect();
        self.reindex();
        for avatar in gone {
            if !self.slots.contains_key(&avatar.id) {
                self.unpopulated.remove(&avatar.id);
            }
            tracing::debug!("Avatar {} no longer present", avatar.id);
            self.emit(AvatarEvent::Disconnected {
                avatar,
                reason: DisconnectReason::Unknown,
            });
        }
    }

    fn apply(
        &self,
        what: &str,
        call: impl FnOnce(&dyn Transport, SessionId) -> TransportResult<()>,
    ) {
        if let Err(e) = self.session.live().and_then(|(transport, id)| call(transport, id)) {
            tracing::debug!("Failed to send avatar {}: {}", what, e);
        }
    }

    /// Publish every field of this client's avatar
    ///
    /// Each field is sent independently; a failed field does not stop the others.
    pub fn send(&self, data: &AvatarData) {
        self.send_display_name(&data.display_name);
        self.send_skeleton_model_url(&data.skeleton_model_url);
        self.send_look_at_snapping(data.look_at_snapping_enabled);
        self.send_global_position(data.global_position);
        self.send_orientation(data.orientation);
        self.send_scale(data.scale);
        self.send_bounds(data.bounds);
        self.send_look_at(data.look_at_position);
        self.send_audio_loudness(data.audio_loudness);
        self.send_sensor_to_world(data.sensor_to_world);
        self.send_additional_flags(data.additional_flags);
        self.send_parent(data.parent.as_ref());
        self.send_local_position(data.local_position);
        self.send_hand_controllers(data.hand_controllers);
        self.send_face_tracker_info(&data.face_tracker_info);
        self.send_grab_joints(data.grab_joints);
        self.send_pose(&data.pose);
        self.send_attachments(&data.attachments);
        self.send_skeleton(&data.skeleton);
    }

    pub fn send_display_name(&self, name: &str) {
        self.apply("display name", |t, id| t.set_my_display_name(id, name));
    }

    pub fn send_skeleton_model_url(&self, url: &str) {
        self.apply("skeleton model url", |t, id| t.set_my_skeleton_model_url(id, url));
    }

    pub fn send_look_at_snapping(&self, enabled: bool) {
        self.apply("look-at snapping", |t, id| t.set_my_look_at_snapping(id, enabled));
    }

    pub fn send_global_position(&self, position: Vector3) {
        self.apply("global position", |t, id| t.set_my_global_position(id, position));
    }

    pub fn send_orientation(&self, orientation: Quaternion) {
        self.apply("orientation", |t, id| t.set_my_orientation(id, orientation));
    }

    pub fn send_scale(&self, scale: f32) {
        self.apply("scale", |t, id| t.set_my_scale(id, scale));
    }

    pub fn send_bounds(&self, bounds: Bounds) {
        self.apply("bounds", |t, id| t.set_my_bounding_box(id, bounds));
    }

    pub fn send_look_at(&self, position: Vector3) {
        self.apply("look-at", |t, id| t.set_my_look_at(id, position));
    }

    pub fn send_audio_loudness(&self, loudness: f32) {
        self.apply("audio loudness", |t, id| t.set_my_audio_loudness(id, loudness));
    }

    pub fn send_sensor_to_world(&self, transform: Transform) {
        self.apply("sensor to world", |t, id| t.set_my_sensor_to_world(id, transform));
    }

    /// [`AdditionalFlags::HAS_PRIORITY`] is set by the mixer and is not sent
    pub fn send_additional_flags(&self, flags: AdditionalFlags) {
        let mut flags = flags;
        flags.set(AdditionalFlags::HAS_PRIORITY, false);
        self.apply("additional flags", |t, id| t.set_my_additional_flags(id, flags));
    }

    pub fn send_parent(&self, parent: Option<&ParentInfo>) {
        let raw = ParentInfo::to_raw(parent);
        self.apply("parent", |t, id| t.set_my_parent_info(id, raw));
    }

    pub fn send_local_position(&self, position: Vector3) {
        self.apply("local position", |t, id| t.set_my_local_position(id, position));
    }

    pub fn send_hand_controllers(&self, controllers: HandControllers) {
        self.apply("hand controllers", |t, id| t.set_my_hand_controllers(id, controllers));
    }

    /// Blendshape coefficients beyond [`MAX_BLENDSHAPE_COEFFICIENTS`] are dropped
    pub fn send_face_tracker_info(&self, info: &FaceTrackerInfo) {
        if info.blendshape_coefficients.len() > MAX_BLENDSHAPE_COEFFICIENTS {
            let mut info = info.clone();
            info.blendshape_coefficients.truncate(MAX_BLENDSHAPE_COEFFICIENTS);
            self.apply("face tracker info", |t, id| t.set_my_face_tracker_info(id, &info));
        } else {
            self.apply("face tracker info", |t, id| t.set_my_face_tracker_info(id, info));
        }
    }

    pub fn send_grab_joints(&self, joints: GrabJoints) {
        self.apply("grab joints", |t, id| t.set_my_grab_joints(id, joints));
    }

    /// Send the pose with its per-joint default flags
    pub fn send_pose(&self, pose: &[Joint]) {
        self.apply("pose", |t, id| {
            t.set_my_joint_count(id, pose.len())?;
            t.set_my_joint_flags_count(id, pose.len())?;
            for (index, joint) in pose.iter().enumerate() {
                let (vantage, flags) = joint.to_raw();
                t.set_my_joint(id, index, vantage)?;
                t.set_my_joint_flags(id, index, flags)?;
            }
            Ok(())
        });
    }

    pub fn send_attachments(&self, attachments: &[Attachment]) {
        self.apply("attachments", |t, id| {
            t.set_my_attachment_count(id, attachments.len())?;
            for (index, attachment) in attachments.iter().enumerate() {
                t.set_my_attachment(id, index, &attachment.to_raw())?;
            }
            Ok(())
        });
    }

    pub fn send_skeleton(&self, skeleton: &[Bone]) {
        self.apply("skeleton", |t, id| {
            t.set_my_bone_count(id, skeleton.len())?;
            for (index, bone) in skeleton.iter().enumerate() {
                t.set_my_bone(id, index, bone)?;
            }
            Ok(())
        });
    }

    /// Start a grab; the transport assigns its id
    pub fn grab(&self, data: GrabData) {
        self.apply("grab", |t, id| t.my_avatar_grab(id, data));
    }

    pub fn release_grab(&self, grab_id: Uuid) {
        self.apply("grab release", |t, id| t.my_avatar_release_grab(id, grab_id));
    }
}

fn push_views(transport: &dyn Transport, id: SessionId, views: &[CameraView]) -> TransportResult<()> {
    transport.set_view_count(id, views.len())?;
    for (index, view) in views.iter().enumerate() {
        transport.set_view(id, index, view)?;
    }
    Ok(())
}

/// Read every field of one slot; any unavailable field fails the whole read
fn read_avatar(
    transport: &dyn Transport,
    id: SessionId,
    slot: usize,
) -> TransportResult<(AvatarData, Vec<GrabAction>)> {
    let mut face_tracker_info = transport.avatar_face_tracker_info(id, slot)?;
    face_tracker_info
        .blendshape_coefficients
        .truncate(MAX_BLENDSHAPE_COEFFICIENTS);

    let joint_count = transport.avatar_joint_count(id, slot)?;
    let mut pose = Vec::with_capacity(joint_count);
    for joint in 0..joint_count {
        pose.push(Joint::from_raw(
            transport.avatar_joint(id, slot, joint)?,
            transport.avatar_joint_flags(id, slot, joint)?,
        ));
    }

    let attachment_count = transport.avatar_attachment_count(id, slot)?;
    let mut attachments = Vec::with_capacity(attachment_count);
    for index in 0..attachment_count {
        attachments.push(Attachment::from_raw(transport.avatar_attachment(id, slot, index)?));
    }

    let bone_count = transport.avatar_bone_count(id, slot)?;
    let mut skeleton = Vec::with_capacity(bone_count);
    for index in 0..bone_count {
        skeleton.push(transport.avatar_bone(id, slot, index)?);
    }

    let grab_count = transport.avatar_grab_count(id, slot)?;
    let mut grabs = Vec::with_capacity(grab_count);
    for index in 0..grab_count {
        let (grab_id, data) = transport.avatar_grab(id, slot, index)?;
        grabs.push(GrabAction { id: grab_id, data });
    }

    let data = AvatarData {
        display_name: transport.avatar_display_name(id, slot)?,
        skeleton_model_url: transport.avatar_skeleton_model_url(id, slot)?,
        look_at_snapping_enabled: transport.avatar_look_at_snapping(id, slot)?,
        verification_failed: transport.avatar_verification_failed(id, slot)?,
        global_position: transport.avatar_global_position(id, slot)?,
        orientation: transport.avatar_orientation(id, slot)?,
        scale: transport.avatar_scale(id, slot)?,
        bounds: transport.avatar_bounding_box(id, slot)?,
        look_at_position: transport.avatar_look_at_position(id, slot)?,
        audio_loudness: transport.avatar_audio_loudness(id, slot)?,
        sensor_to_world: transport.avatar_sensor_to_world(id, slot)?,
        additional_flags: transport.avatar_additional_flags(id, slot)?,
        parent: ParentInfo::from_raw(transport.avatar_parent_info(id, slot)?),
        local_position: transport.avatar_local_position(id, slot)?,
        hand_controllers: transport.avatar_hand_controllers(id, slot)?,
        face_tracker_info,
        grab_joints: transport.avatar_grab_joints(id, slot)?,
        pose,
        attachments,
        skeleton,
    };

    Ok((data, grabs))
}
