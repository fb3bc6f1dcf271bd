//! Session lifecycle, status and node roster

use std::sync::Arc;
use uuid::Uuid;

use shared_space_client::audio::AudioFormat;
use shared_space_client::config::AudioConfig;
use shared_space_client::messages::MessageKind;
use shared_space_client::transport::memory::NodeRecord;
use shared_space_client::{
    AudioDuplexPipeline, AvatarSyncEngine, ClientConfig, ConnectionContext, ConnectionStatus,
    MemoryTransport, MessageBus, MessageTypes, NodeType,
};

fn setup() -> (Arc<MemoryTransport>, ConnectionContext) {
    let transport = Arc::new(MemoryTransport::new());
    let context = ConnectionContext::new(transport.clone(), &ClientConfig::default()).unwrap();
    (transport, context)
}

fn node(node_type: u8, address: Option<&str>) -> NodeRecord {
    NodeRecord {
        uuid: Some(Uuid::new_v4()),
        active: true,
        node_type,
        address: address.map(str::to_string),
    }
}

#[test]
fn connect_reports_status() {
    let (transport, context) = setup();
    assert_eq!(context.status(), ConnectionStatus::Disconnected);
    assert_eq!(context.session_uuid(), None);

    context.connect("hifi://sandbox");
    assert_eq!(transport.location().as_deref(), Some("hifi://sandbox"));
    assert_eq!(context.status(), ConnectionStatus::Connected);
    assert!(context.session_uuid().is_some());
}

#[test]
fn pending_connect_stays_disconnected() {
    let (transport, context) = setup();
    transport.set_auto_connect(false);
    context.connect("hifi://sandbox");
    assert_eq!(context.status(), ConnectionStatus::Disconnected);

    transport.set_connection_status(5);
    assert_eq!(context.status(), ConnectionStatus::Unknown);
    transport.set_connection_status(-3);
    assert_eq!(context.status(), ConnectionStatus::Error);
}

#[test]
fn roster_reads_every_node() {
    let (transport, context) = setup();
    let mixer = node(b'M', Some("127.0.0.1:48000"));
    let avatars = NodeRecord {
        active: false,
        ..node(b'W', None)
    };
    transport.set_nodes(vec![mixer.clone(), avatars.clone(), node(b'?', None)]);

    let nodes = context.nodes().unwrap();
    assert_eq!(transport.node_refreshes(), 1);
    assert_eq!(nodes.len(), 3);

    assert_eq!(nodes[0].node_type, NodeType::AudioMixer);
    assert_eq!(Some(nodes[0].uuid), mixer.uuid);
    assert!(nodes[0].active);
    assert_eq!(nodes[0].address.as_deref(), Some("127.0.0.1:48000"));

    assert_eq!(nodes[1].node_type, NodeType::AvatarMixer);
    assert!(!nodes[1].active);
    assert_eq!(nodes[1].address, None);

    assert_eq!(nodes[2].node_type, NodeType::Other(b'?'));
}

#[test]
fn unreadable_node_discards_roster() {
    let (transport, context) = setup();
    transport.set_nodes(vec![
        node(b'D', None),
        NodeRecord {
            uuid: None,
            ..node(b'm', None)
        },
    ]);
    assert_eq!(context.nodes(), None);

    transport.set_nodes(Vec::new());
    assert_eq!(context.nodes(), Some(Vec::new()));
}

#[test]
fn version_is_reported() {
    let (_transport, context) = setup();
    let version = context.version().unwrap();
    assert_eq!(version.year, 2024);
    assert_eq!(version.full, "2024.1.0-memory");
}

#[test]
fn destroy_is_idempotent() {
    let (transport, context) = setup();
    assert_eq!(transport.live_sessions(), 1);

    context.destroy();
    context.destroy();
    assert!(context.is_destroyed());
    assert_eq!(transport.live_sessions(), 0);

    drop(context);
    assert_eq!(transport.live_sessions(), 0);
}

#[test]
fn components_are_neutral_after_destroy() {
    let (transport, context) = setup();
    context.connect("hifi://sandbox");
    transport.set_nodes(vec![node(b'D', None)]);

    let mut avatars = AvatarSyncEngine::new(context.session());
    avatars.enable();
    let mut messages = MessageBus::new(context.session());
    messages.enable(MessageTypes::TEXT);
    messages.subscribe("Chat");
    let mut audio = AudioDuplexPipeline::new(context.session(), &AudioConfig::default());
    audio.enable();
    audio.start_input(AudioFormat::float(48000, 1));

    transport.push_avatar(Uuid::new_v4(), Default::default());
    transport.inject_message(MessageKind::Text, "Chat", "hello", Some(Uuid::new_v4()), false);
    avatars.tick();
    messages.tick();
    audio.tick();
    assert_eq!(avatars.others().len(), 1);
    assert_eq!(messages.text_messages().len(), 1);
    assert!(audio.input().is_some());

    context.destroy();
    assert_eq!(context.status(), ConnectionStatus::Error);
    assert_eq!(context.nodes(), None);
    assert_eq!(context.session_uuid(), None);
    assert_eq!(context.version(), None);
    assert!(avatars.others().is_empty());
    assert!(messages.text_messages().is_empty());
    assert!(audio.input().is_none());

    // Ticking and sending after destroy are no-ops
    avatars.tick();
    messages.tick();
    audio.tick();
    messages.send_text_message("Chat", "late", false);
    assert!(transport.sent_messages().is_empty());
}
