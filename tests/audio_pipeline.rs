//! Duplex audio negotiation and streaming against the in-memory transport

use proptest::prelude::*;
use std::sync::Arc;

use shared_space_client::audio::{
    remap_channels, AudioDuplexPipeline, AudioEvent, AudioFormat, CodecParams, InputFilter,
    OutputFilter, SampleType, StreamState,
};
use shared_space_client::config::AudioConfig;
use shared_space_client::math::{Bounds, Quaternion, Transform, Vector3};
use shared_space_client::{ClientConfig, ConnectionContext, MemoryTransport};

fn setup() -> (Arc<MemoryTransport>, ConnectionContext, AudioDuplexPipeline) {
    let transport = Arc::new(MemoryTransport::new());
    let context = ConnectionContext::new(transport.clone(), &ClientConfig::default()).unwrap();
    let pipeline = AudioDuplexPipeline::new(context.session(), &AudioConfig::default());
    (transport, context, pipeline)
}

fn input_ready_count(events: &[AudioEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, AudioEvent::InputReady(_)))
        .count()
}

#[test]
fn states_follow_negotiation() {
    let (transport, _context, mut audio) = setup();
    assert_eq!(audio.input_state(), StreamState::Disabled);

    audio.enable();
    assert_eq!(audio.input_state(), StreamState::Enabled);
    assert_eq!(audio.output_state(), StreamState::Enabled);
    assert_eq!(transport.audio_settings().output_buffer_frames, 2);

    transport.set_audio_ready(false);
    audio.start_input(AudioFormat::float(48000, 1));
    assert_eq!(audio.input_state(), StreamState::Requested);

    for _ in 0..3 {
        audio.tick();
    }
    assert_eq!(audio.input_state(), StreamState::Requested);
    assert!(audio.input().is_none());
    assert!(audio.drain_events().is_empty());

    transport.set_audio_ready(true);
    audio.tick();
    assert_eq!(audio.input_state(), StreamState::Ready);
    assert_eq!(audio.output_state(), StreamState::Enabled);
    assert!(audio.input().is_some());
}

#[test]
fn rejected_format_keeps_state() {
    let (transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_output(AudioFormat::float(48000, 0));
    assert_eq!(audio.output_state(), StreamState::Enabled);
    assert_eq!(transport.audio_settings().output_format, None);

    audio.tick();
    assert!(audio.output().is_none());
}

#[test]
fn ready_is_raised_once() {
    let (_transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_input(AudioFormat::float(48000, 1));
    audio.start_output(AudioFormat::float(48000, 2));

    audio.tick();
    let events = audio.drain_events();
    assert_eq!(input_ready_count(&events), 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, AudioEvent::OutputReady(r) if r.channel_count() == 2)));

    for _ in 0..5 {
        audio.tick();
    }
    assert!(audio.drain_events().is_empty());
}

#[test]
fn restart_renegotiates() {
    let (_transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_input(AudioFormat::float(48000, 1));
    audio.tick();
    audio.drain_events();

    audio.start_input(AudioFormat::float(24000, 2));
    assert_eq!(audio.input_state(), StreamState::Requested);
    assert!(audio.input().is_none());

    audio.tick();
    let events = audio.drain_events();
    assert_eq!(input_ready_count(&events), 1);
    match &events[0] {
        AudioEvent::InputReady(writer) => {
            assert_eq!(writer.format(), AudioFormat::float(24000, 2));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn restart_retires_previous_writer() {
    let (transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_input(AudioFormat::float(48000, 1));
    audio.tick();
    let old = audio.input().unwrap();
    let mut old_filter = InputFilter::new(old.clone());

    audio.start_input(AudioFormat::float(48000, 2));
    audio.tick();
    assert_eq!(audio.input_state(), StreamState::Ready);
    assert!(!old.is_bound());

    // The old writer still downmixes to mono but must not reach the stereo stream
    let mut capture = [0.2f32, 0.4, 0.6, 0.8];
    assert_eq!(old_filter.process(&mut capture, 2), 0);
    assert_eq!(old.write(&[0.5, 0.5], None), 0);
    assert!(transport.take_input_samples().is_empty());

    let current = audio.input().unwrap();
    assert_eq!(current.channel_count(), 2);
    assert!(current.is_bound());
    let mut filter = InputFilter::new(current);
    let mut capture = [0.2f32, 0.4, 0.6, 0.8];
    assert_eq!(filter.process(&mut capture, 2), 4);
    assert_eq!(transport.take_input_samples(), vec![0.2, 0.4, 0.6, 0.8]);
}

#[test]
fn restart_retires_previous_reader() {
    let (transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_output(AudioFormat::float(48000, 2));
    audio.tick();
    let old = audio.output().unwrap();

    audio.start_output(AudioFormat::float(48000, 1));
    audio.tick();
    assert_eq!(audio.output_state(), StreamState::Ready);
    assert!(!old.is_bound());

    transport.push_output_samples(&[0.5, -0.5]);
    let mut out = [1.0f32; 4];
    assert_eq!(old.read(&mut out), 0);
    assert_eq!(out, [0.0; 4]);

    let current = audio.output().unwrap();
    assert_eq!(current.channel_count(), 1);
    let mut out = [1.0f32; 2];
    assert_eq!(current.read(&mut out), 2);
    assert_eq!(out, [0.5, -0.5]);
}

#[test]
fn lost_handle_returns_to_requested() {
    let (transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_input(AudioFormat::float(48000, 1));
    audio.tick();
    let writer = audio.input().unwrap();

    transport.set_audio_ready(false);
    audio.tick();
    assert_eq!(audio.input_state(), StreamState::Requested);
    assert!(!writer.is_bound());
    assert_eq!(writer.write(&[0.1, 0.2], None), 0);

    transport.set_audio_ready(true);
    audio.tick();
    assert_eq!(audio.input_state(), StreamState::Ready);
    assert!(writer.is_bound());
    assert_eq!(input_ready_count(&audio.drain_events()), 2);
}

#[test]
fn written_samples_reach_mixer() {
    let (transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_input(AudioFormat::float(48000, 1));
    audio.tick();
    let writer = audio.input().unwrap();

    assert_eq!(writer.write(&[0.25, -0.5, 0.75, 1.0], Some(3)), 3);
    assert_eq!(transport.take_input_samples(), vec![0.25, -0.5, 0.75]);
}

#[test]
fn int16_samples_are_quantized() {
    let (transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_input(AudioFormat::new(SampleType::SignedInt16, 16000, 1));
    audio.tick();
    let writer = audio.input().unwrap();

    assert_eq!(writer.write(&[0.5, -0.5, 0.0], None), 3);
    let samples = transport.take_input_samples();
    assert_eq!(samples.len(), 3);
    assert!((samples[0] - 0.5).abs() < 1e-3);
    assert!((samples[1] + 0.5).abs() < 1e-3);
    assert_eq!(samples[2], 0.0);
}

#[test]
fn reader_pads_with_silence() {
    let (transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_output(AudioFormat::float(48000, 2));
    audio.tick();
    let reader = audio.output().unwrap();

    transport.push_output_samples(&[0.1, 0.2, 0.3, 0.4]);
    let mut out = [9.0f32; 8];
    assert_eq!(reader.read(&mut out), 4);
    assert_eq!(out, [0.1, 0.2, 0.3, 0.4, 0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn filters_remap_device_layouts() {
    let (transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_input(AudioFormat::float(48000, 1));
    audio.start_output(AudioFormat::float(48000, 1));
    audio.tick();

    let mut input = InputFilter::new(audio.input().unwrap());
    let mut capture = [0.5f32, 0.25, -1.0, -1.0];
    assert_eq!(input.process(&mut capture, 2), 2);
    assert_eq!(capture, [0.0; 4]);
    assert_eq!(transport.take_input_samples(), vec![0.375, -1.0]);

    let mut output = OutputFilter::new(audio.output().unwrap());
    transport.push_output_samples(&[0.5, -0.5]);
    let mut playback = [1.0f32; 6];
    assert_eq!(output.process(&mut playback, 2), 4);
    assert_eq!(playback, [0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
}

#[test]
fn unsupported_layout_drops_block() {
    let (transport, _context, mut audio) = setup();
    audio.enable();
    audio.start_input(AudioFormat::float(48000, 2));
    audio.tick();

    let mut input = InputFilter::new(audio.input().unwrap());
    let mut capture = [0.5f32; 6];
    assert_eq!(input.process(&mut capture, 3), 0);
    assert_eq!(capture, [0.0; 6]);
    assert!(transport.take_input_samples().is_empty());
}

#[test]
fn destroyed_session_silences_streams() {
    let (transport, context, mut audio) = setup();
    audio.enable();
    audio.start_input(AudioFormat::float(48000, 1));
    audio.start_output(AudioFormat::float(48000, 1));
    audio.tick();
    let writer = audio.input().unwrap();
    let reader = audio.output().unwrap();
    transport.push_output_samples(&[0.5; 4]);
    audio.drain_events();

    context.destroy();
    assert_eq!(writer.write(&[0.1; 4], None), 0);
    let mut out = [1.0f32; 4];
    assert_eq!(reader.read(&mut out), 0);
    assert_eq!(out, [0.0; 4]);
    assert!(audio.input().is_none());
    assert!(audio.output().is_none());

    audio.tick();
    assert!(audio.drain_events().is_empty());
}

#[test]
fn controls_reach_transport() {
    let (transport, _context, mut audio) = setup();
    audio.enable();
    audio.set_echo(true);
    audio.set_input_muted(true);
    audio.set_injector_gain(0.5);
    let bounds = Bounds::new(Vector3::new(1.0, 2.0, 1.0), Vector3::ZERO);
    audio.set_bounds(bounds);
    audio.set_transform(Transform {
        translation: Vector3::new(1.0, 0.0, -1.0),
        rotation: Quaternion::IDENTITY,
        scale: 2.0,
    });

    let settings = transport.audio_settings();
    assert!(settings.enabled);
    assert!(settings.echo);
    assert!(settings.input_muted);
    assert_eq!(settings.injector_gain, 0.5);
    assert_eq!(settings.bounds, bounds);
    assert_eq!(settings.vantage.position, Vector3::new(1.0, 0.0, -1.0));

    assert!(!audio.input_muted_by_mixer());
    transport.set_muted_by_mixer(true);
    assert!(audio.input_muted_by_mixer());
}

#[test]
fn codec_selection() {
    let (_transport, _context, audio) = setup();
    assert_eq!(audio.selected_codec(), None);

    audio.set_codec_params("opus", CodecParams::default());
    audio.set_codec_params(
        "pcm",
        CodecParams {
            allowed: false,
            ..Default::default()
        },
    );
    assert_eq!(audio.selected_codec().as_deref(), Some("opus"));

    audio.set_codec_params(
        "opus",
        CodecParams {
            allowed: false,
            ..Default::default()
        },
    );
    assert_eq!(audio.selected_codec(), None);
}

proptest! {
    #[test]
    fn prop_downmix_stays_in_range(
        channels in 2u16..8,
        samples in prop::collection::vec(-4.0f32..4.0, 0..256),
    ) {
        let mut out = Vec::new();
        prop_assert!(remap_channels(&samples, channels, 1, &mut out));
        prop_assert_eq!(out.len(), samples.len() / channels as usize);
        prop_assert!(out.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn prop_mono_to_stereo_duplicates(samples in prop::collection::vec(-1.0f32..1.0, 0..256)) {
        let mut out = Vec::new();
        prop_assert!(remap_channels(&samples, 1, 2, &mut out));
        prop_assert_eq!(out.len(), samples.len() * 2);
        for (frame, &sample) in out.chunks_exact(2).zip(&samples) {
            prop_assert_eq!(frame[0], sample);
            prop_assert_eq!(frame[1], sample);
        }
    }

    #[test]
    fn prop_input_filter_zeroes_device(
        device_channels in 1u16..5,
        samples in prop::collection::vec(-1.0f32..1.0, 0..128),
    ) {
        let (_transport, _context, mut audio) = setup();
        audio.enable();
        audio.start_input(AudioFormat::float(48000, 1));
        audio.tick();

        let mut filter = InputFilter::new(audio.input().unwrap());
        let mut device = samples.clone();
        filter.process(&mut device, device_channels);
        prop_assert!(device.iter().all(|&s| s == 0.0));
    }
}
