//! Avatar mirroring against the in-memory transport

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use shared_space_client::avatars::{
    Attachment, AvatarData, AvatarEvent, AvatarSyncEngine, Bone, BoneType, DisconnectReason,
    GrabData, Joint, ParentInfo,
};
use shared_space_client::math::{Transform, Vantage, Vector3};
use shared_space_client::{ClientConfig, ConnectionContext, MemoryTransport};

fn setup() -> (Arc<MemoryTransport>, ConnectionContext, AvatarSyncEngine) {
    let transport = Arc::new(MemoryTransport::new());
    let context = ConnectionContext::new(transport.clone(), &ClientConfig::default()).unwrap();
    let engine = AvatarSyncEngine::new(context.session());
    engine.enable();
    (transport, context, engine)
}

fn named(name: &str) -> AvatarData {
    AvatarData {
        display_name: name.to_string(),
        ..Default::default()
    }
}

#[test]
fn unchanged_slots_yield_no_updates() {
    let (transport, _context, mut engine) = setup();
    let id = Uuid::new_v4();
    transport.push_avatar(id, named("Ada"));

    engine.tick();
    assert_eq!(engine.drain_events().len(), 2);

    for _ in 0..10 {
        engine.tick();
    }
    assert!(engine.drain_events().is_empty());

    transport.touch_avatar(id);
    engine.tick();
    let events = engine.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], AvatarEvent::Updated(a) if a.id == id));
}

#[test]
fn disconnect_then_regrow_in_same_tick() {
    let (transport, _context, mut engine) = setup();
    let first = Uuid::new_v4();
    transport.push_avatar(first, named("First"));
    engine.tick();
    engine.drain_events();

    // Slot 0 is freed and refilled before the next tick
    transport.disconnect_avatar(first, DisconnectReason::Network);
    let second = Uuid::new_v4();
    transport.push_avatar(second, named("Second"));
    engine.tick();

    let events = engine.drain_events();
    assert_eq!(events.len(), 3);
    match &events[0] {
        AvatarEvent::Disconnected { avatar, reason } => {
            assert_eq!(avatar.id, first);
            assert_eq!(avatar.data.display_name, "First");
            assert_eq!(*reason, DisconnectReason::Network);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(&events[1], AvatarEvent::Connected(a) if a.id == second));
    assert!(matches!(&events[2], AvatarEvent::Updated(a) if a.id == second && a.data.display_name == "Second"));

    assert!(engine.get(first).is_none());
    assert_eq!(engine.others().len(), 1);
}

#[test]
fn reused_slot_gets_fresh_mirror() {
    let (transport, _context, mut engine) = setup();
    let old = Uuid::new_v4();
    transport.push_avatar(old, named("Old"));
    engine.tick();
    engine.drain_events();

    let new = Uuid::new_v4();
    transport.replace_avatar(old, new, named("New"));
    engine.tick();

    let events = engine.drain_events();
    assert!(matches!(
        &events[0],
        AvatarEvent::Disconnected { avatar, reason: DisconnectReason::Unknown } if avatar.id == old
    ));
    assert!(matches!(&events[1], AvatarEvent::Connected(a) if a.id == new));
    assert!(matches!(&events[2], AvatarEvent::Updated(a) if a.id == new && a.data.display_name == "New"));
    assert_eq!(engine.get(new).map(|a| a.data.display_name.as_str()), Some("New"));
}

#[test]
fn unreadable_field_keeps_previous_data() {
    let (transport, _context, mut engine) = setup();
    let id = Uuid::new_v4();
    transport.push_avatar(id, named("Ada"));
    engine.tick();
    engine.drain_events();

    transport.withhold_avatar(id, true);
    transport.update_avatar(id, named("Changed"));
    for _ in 0..3 {
        engine.tick();
    }
    assert!(engine.drain_events().is_empty());
    assert_eq!(engine.get(id).map(|a| a.data.display_name.as_str()), Some("Ada"));

    // The pending change is picked up once the field is readable again
    transport.withhold_avatar(id, false);
    engine.tick();
    assert_eq!(engine.get(id).map(|a| a.data.display_name.as_str()), Some("Changed"));
}

#[test]
fn unreadable_disconnections_defer_sync() {
    let (transport, _context, mut engine) = setup();
    let gone = Uuid::new_v4();
    transport.push_avatar(gone, named("Gone"));
    engine.tick();
    engine.drain_events();

    transport.withhold_disconnections(true);
    transport.disconnect_avatar(gone, DisconnectReason::Ignored);
    transport.push_avatar(Uuid::new_v4(), named("Later"));
    engine.tick();
    assert!(engine.drain_events().is_empty());
    assert_eq!(engine.others().len(), 1);

    // The deferred disconnection keeps its reason once readable
    transport.withhold_disconnections(false);
    engine.tick();
    let events = engine.drain_events();
    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[0],
        AvatarEvent::Disconnected { avatar, reason: DisconnectReason::Ignored } if avatar.id == gone
    ));
    assert!(matches!(&events[1], AvatarEvent::Connected(a) if a.data.display_name.is_empty()));
    assert!(matches!(&events[2], AvatarEvent::Updated(a) if a.data.display_name == "Later"));
}

#[test]
fn deferred_disconnection_leaves_others_alone() {
    let (transport, _context, mut engine) = setup();
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for (id, name) in ids.iter().zip(["A", "B", "C"]) {
        transport.push_avatar(*id, named(name));
    }
    engine.tick();
    engine.drain_events();

    transport.withhold_disconnections(true);
    transport.disconnect_avatar(ids[0], DisconnectReason::Ignored);
    engine.tick();
    transport.withhold_disconnections(false);
    engine.tick();
    engine.tick();

    let events = engine.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        AvatarEvent::Disconnected { avatar, reason: DisconnectReason::Ignored } if avatar.id == ids[0]
    ));

    let mirrored: Vec<Uuid> = engine.others().iter().map(|a| a.id).collect();
    assert_eq!(mirrored, ids[1..].to_vec());
    assert_eq!(engine.get(ids[2]).map(|a| a.data.display_name.as_str()), Some("C"));
}

#[test]
fn vanished_avatars_are_trimmed() {
    let (transport, _context, mut engine) = setup();
    let kept = Uuid::new_v4();
    let vanished = Uuid::new_v4();
    transport.push_avatar(kept, named("Kept"));
    transport.push_avatar(vanished, named("Vanished"));
    engine.tick();
    engine.drain_events();

    transport.forget_avatar(vanished);
    engine.tick();
    let events = engine.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        AvatarEvent::Disconnected { avatar, reason: DisconnectReason::Unknown }
            if avatar.id == vanished && avatar.data.display_name == "Vanished"
    ));
    assert_eq!(engine.others().len(), 1);
    assert!(engine.get(vanished).is_none());
}

#[test]
fn shifted_avatars_keep_their_mirrors() {
    let (transport, _context, mut engine) = setup();
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for (id, name) in ids.iter().zip(["A", "B", "C"]) {
        transport.push_avatar(*id, named(name));
    }
    engine.tick();
    engine.drain_events();

    // Slot 0 is vacated without a disconnection and the rest move down
    transport.forget_avatar(ids[0]);
    engine.tick();

    let events = engine.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        AvatarEvent::Disconnected { avatar, reason: DisconnectReason::Unknown } if avatar.id == ids[0]
    ));

    let mirrored: Vec<Uuid> = engine.others().iter().map(|a| a.id).collect();
    assert_eq!(mirrored, ids[1..].to_vec());
    assert_eq!(engine.get(ids[1]).map(|a| a.data.display_name.as_str()), Some("B"));
    assert_eq!(engine.get(ids[2]).map(|a| a.data.display_name.as_str()), Some("C"));
}

#[test]
fn fresh_mirror_populates_without_change_flag() {
    let (transport, _context, mut engine) = setup();
    let old = Uuid::new_v4();
    transport.push_avatar(old, named("Old"));
    engine.tick();
    engine.drain_events();

    let new = Uuid::new_v4();
    transport.replace_avatar(old, new, named("New"));
    transport.settle_avatar(new);
    engine.tick();

    let events = engine.drain_events();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[1], AvatarEvent::Connected(a) if a.id == new));
    assert!(matches!(&events[2], AvatarEvent::Updated(a) if a.id == new && a.data.display_name == "New"));
    assert_eq!(engine.get(new).map(|a| a.data.display_name.as_str()), Some("New"));

    // Populated once; later ticks wait for a real change
    engine.tick();
    assert!(engine.drain_events().is_empty());
}

#[test]
fn unknown_disconnect_reason() {
    let (transport, _context, mut engine) = setup();
    let id = Uuid::new_v4();
    transport.push_avatar(id, named("Ada"));
    engine.tick();
    engine.drain_events();

    transport.disconnect_avatar_with_code(id, 42);
    engine.tick();
    assert!(matches!(
        engine.drain_events().as_slice(),
        [AvatarEvent::Disconnected { reason: DisconnectReason::Unknown, .. }]
    ));
}

#[test]
fn full_data_round_trip() {
    let (transport, _context, mut engine) = setup();
    let id = Uuid::new_v4();
    let parent = Uuid::new_v4();
    let data = AvatarData {
        display_name: "Full".into(),
        skeleton_model_url: "https://example.com/avatar.fst".into(),
        global_position: Vector3::new(1.0, 2.0, 3.0),
        scale: 0.5,
        parent: Some(ParentInfo {
            id: parent,
            joint_index: 7,
        }),
        pose: vec![
            Joint {
                position: Some(Vector3::new(0.0, 1.0, 0.0)),
                rotation: None,
            },
            Joint::default(),
        ],
        attachments: vec![Attachment {
            model_url: "https://example.com/hat.fst".into(),
            joint_name: "Head".into(),
            transform: Some(Transform::IDENTITY),
        }],
        skeleton: vec![Bone {
            bone_type: BoneType::SkeletonRoot,
            default_transform: Transform::IDENTITY,
            index: 0,
            parent_index: -1,
            name: "Hips".into(),
        }],
        ..Default::default()
    };
    transport.push_avatar(id, data.clone());
    let grab = GrabData {
        target: Uuid::new_v4(),
        joint_index: 3,
        offset: Vantage::default(),
    };
    let grab_id = Uuid::new_v4();
    transport.set_avatar_grabs(id, vec![(grab_id, grab)]);

    engine.tick();
    let mirror = engine.get(id).unwrap();
    assert_eq!(mirror.data, data);
    assert_eq!(mirror.grab_actions.len(), 1);
    assert_eq!(mirror.grab_actions[0].id, grab_id);
    assert_eq!(mirror.grab_actions[0].data, grab);
}

#[test]
fn send_publishes_local_avatar() {
    let (transport, _context, engine) = setup();
    let data = AvatarData {
        display_name: "Me".into(),
        global_position: Vector3::new(4.0, 0.0, 4.0),
        pose: vec![
            Joint {
                position: None,
                rotation: Some(Default::default()),
            },
            Joint {
                position: Some(Vector3::new(0.1, 0.2, 0.3)),
                rotation: None,
            },
        ],
        attachments: vec![Attachment {
            model_url: "https://example.com/cape.fst".into(),
            joint_name: "Spine".into(),
            transform: None,
        }],
        ..Default::default()
    };

    engine.send(&data);
    let local = transport.local_avatar();
    assert_eq!(local.display_name, "Me");
    assert_eq!(local.global_position, data.global_position);
    assert_eq!(local.pose, data.pose);
    assert_eq!(local.attachments, data.attachments);
}

#[test]
fn grab_and_release() {
    let (transport, _context, engine) = setup();
    engine.grab(GrabData {
        target: Uuid::new_v4(),
        joint_index: 1,
        offset: Vantage::default(),
    });

    let grabs = transport.local_grabs();
    assert_eq!(grabs.len(), 1);
    engine.release_grab(grabs[0].0);
    assert!(transport.local_grabs().is_empty());
}

#[test]
fn destroyed_session_is_neutral() {
    let (transport, context, mut engine) = setup();
    transport.push_avatar(Uuid::new_v4(), named("Ada"));
    engine.tick();
    engine.drain_events();

    context.destroy();
    engine.tick();
    assert!(engine.others().is_empty());
    assert!(engine.drain_events().is_empty());
}

#[derive(Debug, Clone)]
enum WorldOp {
    Join,
    Leave(usize),
    Change(usize),
    Reuse(usize),
    Tick,
}

fn op_strategy() -> impl Strategy<Value = WorldOp> {
    prop_oneof![
        3 => Just(WorldOp::Join),
        2 => (0usize..8).prop_map(WorldOp::Leave),
        3 => (0usize..8).prop_map(WorldOp::Change),
        1 => (0usize..8).prop_map(WorldOp::Reuse),
        4 => Just(WorldOp::Tick),
    ]
}

proptest! {
    /// Mirror ids never change and every mirror carries only its own avatar's data.
    #[test]
    fn prop_mirror_identity_is_stable(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (transport, _context, mut engine) = setup();
        let mut present: Vec<Uuid> = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut version = 0u32;

        for op in ops {
            match op {
                WorldOp::Join => {
                    let id = Uuid::new_v4();
                    transport.push_avatar(id, named(&id.to_string()));
                    present.push(id);
                }
                WorldOp::Leave(i) if !present.is_empty() => {
                    let id = present.remove(i % present.len());
                    transport.disconnect_avatar(id, DisconnectReason::Network);
                }
                WorldOp::Change(i) if !present.is_empty() => {
                    let id = present[i % present.len()];
                    version += 1;
                    let mut data = named(&id.to_string());
                    data.audio_loudness = version as f32;
                    transport.update_avatar(id, data);
                }
                WorldOp::Reuse(i) if !present.is_empty() => {
                    let slot = i % present.len();
                    let id = Uuid::new_v4();
                    transport.replace_avatar(present[slot], id, named(&id.to_string()));
                    present[slot] = id;
                }
                WorldOp::Tick => engine.tick(),
                _ => {}
            }

            for event in engine.drain_events() {
                match event {
                    AvatarEvent::Connected(avatar) => {
                        prop_assert!(seen.insert(avatar.id), "mirror {} connected twice", avatar.id);
                    }
                    AvatarEvent::Updated(avatar) => {
                        prop_assert!(seen.contains(&avatar.id));
                        prop_assert_eq!(avatar.data.display_name, avatar.id.to_string());
                    }
                    AvatarEvent::Disconnected { avatar, .. } => {
                        prop_assert!(seen.contains(&avatar.id));
                    }
                }
            }

            for mirror in engine.others() {
                if !mirror.data.display_name.is_empty() {
                    prop_assert_eq!(&mirror.data.display_name, &mirror.id.to_string());
                }
            }
        }

        engine.tick();
        let mirrored: Vec<Uuid> = engine.others().iter().map(|a| a.id).collect();
        prop_assert_eq!(mirrored, present);
    }
}
