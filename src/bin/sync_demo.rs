//! Sync Demo Host
//!
//! Ticks every component against an in-process transport with one scripted
//! remote avatar, a chat channel and an echoing audio mixer.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use shared_space_client::{
    audio::{
        AudioEvent, AudioFormat, AudioInputWriter, AudioOutputReader, InputFilter, OutputFilter,
    },
    avatars::{AvatarData, AvatarEvent, AvatarSyncEngine, DisconnectReason, Joint},
    constants::*,
    math::{Bounds, Quaternion, Transform, Vector3},
    messages::{MessageBus, MessageTypes},
    transport::memory::NodeRecord,
    AudioDuplexPipeline, ClientConfig, ConnectionContext, MemoryTransport,
};

/// Device block size used by the simulated audio thread
const DEVICE_FRAMES: usize = 480;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting shared space sync demo");

    let config = ClientConfig::load_or_default()?;
    let location = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_LOCATION.to_string());
    let max_ticks: Option<u64> = std::env::args().nth(2).and_then(|n| n.parse().ok());

    let transport = Arc::new(MemoryTransport::new());
    let context = ConnectionContext::new(transport.clone(), &config)?;
    context.connect(&location);
    tracing::info!("Status after connect: {:?}", context.status());
    if let Some(version) = context.version() {
        tracing::info!("Transport version {}", version.full);
    }

    let mut avatars = AvatarSyncEngine::new(context.session());
    avatars.enable();

    let mut messages = MessageBus::new(context.session());
    messages.enable(MessageTypes::TEXT);
    messages.enable(MessageTypes::DATA);
    messages.subscribe("Chat");

    let mut audio = AudioDuplexPipeline::new(context.session(), &config.audio);
    audio.enable();
    audio.set_echo(true);
    audio.set_bounds(Bounds::new(Vector3::new(1.0, 2.0, 1.0), Vector3::ZERO));
    audio.start_input(AudioFormat::float(DEFAULT_SAMPLE_RATE, 1));
    audio.start_output(AudioFormat::float(DEFAULT_SAMPLE_RATE, 2));

    transport.set_nodes(vec![
        NodeRecord {
            uuid: Some(Uuid::new_v4()),
            active: true,
            node_type: b'M',
            address: Some("127.0.0.1:48000".into()),
        },
        NodeRecord {
            uuid: Some(Uuid::new_v4()),
            active: true,
            node_type: b'W',
            address: Some("127.0.0.1:48001".into()),
        },
    ]);

    // One remote visitor walking in a circle
    let visitor = Uuid::new_v4();
    transport.push_avatar(
        visitor,
        AvatarData {
            display_name: "Visitor".into(),
            pose: vec![Joint::default(); 4],
            ..Default::default()
        },
    );

    let running = Arc::new(AtomicBool::new(true));
    let mut audio_thread = None;
    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_interval_ms));
    let mut tick: u64 = 0;

    tracing::info!("Starting main loop - press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }

        tick += 1;
        if max_ticks.is_some_and(|max| tick > max) {
            break;
        }

        // Script the remote side
        let angle = tick as f32 * 0.05;
        transport.update_avatar(
            visitor,
            AvatarData {
                display_name: "Visitor".into(),
                global_position: Vector3::new(angle.cos() * 3.0, 0.0, angle.sin() * 3.0),
                orientation: Quaternion::new(0.0, (angle / 2.0).sin(), 0.0, (angle / 2.0).cos()),
                pose: vec![Joint::default(); 4],
                ..Default::default()
            },
        );
        if tick == 300 {
            transport.disconnect_avatar(visitor, DisconnectReason::Network);
        }

        // Mixer echo
        let echoed = transport.take_input_samples();
        if !echoed.is_empty() {
            let stereo: Vec<f32> = echoed.iter().flat_map(|&s| [s, s]).collect();
            transport.push_output_samples(&stereo);
        }

        // Host side
        avatars.tick();
        messages.tick();
        audio.tick();

        avatars.send(&AvatarData {
            display_name: "Demo".into(),
            global_position: Vector3::new(0.0, 0.0, 0.0),
            ..Default::default()
        });
        audio.set_transform(Transform::IDENTITY);

        for event in avatars.drain_events() {
            match event {
                AvatarEvent::Connected(avatar) => tracing::info!("Avatar {} connected", avatar.id),
                AvatarEvent::Disconnected { avatar, reason } => {
                    tracing::info!("Avatar {} left ({:?})", avatar.data.display_name, reason)
                }
                AvatarEvent::Updated(avatar) if tick % 60 == 0 => {
                    tracing::info!(
                        "Avatar {} at {:?}",
                        avatar.data.display_name,
                        avatar.data.global_position
                    );
                }
                AvatarEvent::Updated(_) => {}
            }
        }

        for message in messages.drain_events() {
            if let Some(text) = message.text() {
                tracing::info!("[{}] {}: {}", message.channel, message.sender, text);
            }
        }

        for event in audio.drain_events() {
            match event {
                AudioEvent::InputReady(writer) => {
                    tracing::info!("Audio input ready: {:?}", writer.format());
                    let reader = audio.output();
                    audio_thread = Some(spawn_audio_thread(writer, reader, running.clone())?);
                }
                AudioEvent::OutputReady(reader) => {
                    tracing::info!("Audio output ready: {:?}", reader.format());
                }
            }
        }

        if tick % 120 == 0 {
            messages.send_text_message("Chat", &format!("tick {}", tick), true);
            if let Some(nodes) = context.nodes() {
                let roster = serde_json::to_string(&nodes)?;
                tracing::info!("{} avatars, roster {}", avatars.others().len(), roster);
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    if let Some(handle) = audio_thread {
        let _ = handle.join();
    }

    messages.close();
    context.destroy();
    tracing::info!("Demo finished after {} ticks", tick);
    Ok(())
}

/// Simulated device callbacks: a stereo microphone and a stereo speaker
fn spawn_audio_thread(
    writer: AudioInputWriter,
    reader: Option<AudioOutputReader>,
    running: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("demo-audio".into())
        .spawn(move || {
            let mut input = InputFilter::new(writer);
            let mut output = reader.map(OutputFilter::new);
            let mut capture = vec![0.0f32; DEVICE_FRAMES * 2];
            let mut playback = vec![0.0f32; DEVICE_FRAMES * 2];
            let mut phase = 0.0f32;

            while running.load(Ordering::Relaxed) {
                for frame in capture.chunks_exact_mut(2) {
                    let sample = (phase * std::f32::consts::TAU).sin() * 0.25;
                    frame.fill(sample);
                    phase = (phase + 440.0 / DEFAULT_SAMPLE_RATE as f32) % 1.0;
                }
                input.process(&mut capture, 2);

                if let Some(output) = output.as_mut() {
                    output.process(&mut playback, 2);
                }

                thread::sleep(Duration::from_millis(10));
            }
        })
}
