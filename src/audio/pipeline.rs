//! Duplex audio negotiation with the mixer
//!
//! Each direction moves through `Disabled -> Enabled -> Requested -> Ready`.
//! Starting a direction pushes its format to the transport; the handle
//! shows up asynchronously and is picked up by [`AudioDuplexPipeline::tick`].
//! The handle itself lives in a lock-free slot shared with every writer or
//! reader handed out, so the audio thread never waits on the tick thread.
//! Each `start_*` call opens a new slot; a lost handle that comes back
//! within the same negotiation rebinds the existing one.

use arc_swap::ArcSwapOption;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audio::format::AudioFormat;
use crate::audio::stream::{AudioInputWriter, AudioOutputReader, InputBinding, OutputBinding};
use crate::config::AudioConfig;
use crate::context::Session;
use crate::error::TransportResult;
use crate::math::{Bounds, Transform};
use crate::transport::{SessionId, Transport};

/// Negotiation state of one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamState {
    #[default]
    Disabled,
    Enabled,
    /// Format sent, waiting for a handle
    Requested,
    Ready,
}

/// Codec tuning passed to the mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecParams {
    /// Whether the mixer may select this codec
    pub allowed: bool,
    pub encoder_vbr: bool,
    pub encoder_fec: bool,
    /// Bits per second
    pub encoder_bitrate: i32,
    /// 0 to 10
    pub encoder_complexity: i32,
    /// Expected packet loss in percent
    pub encoder_packet_loss: i32,
}

impl Default for CodecParams {
    fn default() -> Self {
        Self {
            allowed: true,
            encoder_vbr: true,
            encoder_fec: true,
            encoder_bitrate: 128_000,
            encoder_complexity: 10,
            encoder_packet_loss: 0,
        }
    }
}

/// Emitted once per `Requested -> Ready` transition
#[derive(Debug, Clone)]
pub enum AudioEvent {
    InputReady(AudioInputWriter),
    OutputReady(AudioOutputReader),
}

/// Per-direction bookkeeping
struct Direction<B> {
    state: StreamState,
    format: Option<AudioFormat>,
    slot: Arc<ArcSwapOption<B>>,
}

impl<B> Direction<B> {
    fn new() -> Self {
        Self {
            state: StreamState::Disabled,
            format: None,
            slot: Arc::new(ArcSwapOption::empty()),
        }
    }

    fn invalidate(&self) {
        self.slot.store(None);
    }

    /// Unbind every writer or reader handed out so far and start a new slot
    fn renew(&mut self) {
        self.invalidate();
        self.slot = Arc::new(ArcSwapOption::empty());
    }
}

/// Negotiates and streams audio with the mixer
pub struct AudioDuplexPipeline {
    session: Arc<Session>,
    output_buffer_frames: u32,
    input: Direction<InputBinding>,
    output: Direction<OutputBinding>,
    events_tx: Sender<AudioEvent>,
    events_rx: Receiver<AudioEvent>,
}

impl AudioDuplexPipeline {
    pub fn new(session: Arc<Session>, config: &AudioConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            session,
            output_buffer_frames: config.output_buffer_frames,
            input: Direction::new(),
            output: Direction::new(),
            events_tx,
            events_rx,
        }
    }

    /// Enable audio for both directions
    pub fn enable(&mut self) {
        let result = self.session.live().and_then(|(transport, id)| {
            transport.enable_audio(id)?;
            transport.set_audio_output_buffer_frames(id, self.output_buffer_frames)
        });

        match result {
            Ok(()) => {
                for state in [&mut self.input.state, &mut self.output.state] {
                    if *state == StreamState::Disabled {
                        *state = StreamState::Enabled;
                    }
                }
                tracing::debug!("Audio enabled, output buffer {} frames", self.output_buffer_frames);
            }
            Err(e) => tracing::warn!("Failed to enable audio: {}", e),
        }
    }

    /// Request an input stream in `format`
    ///
    /// Writers from a previous negotiation are unbound for good.
    pub fn start_input(&mut self, format: AudioFormat) {
        self.input.renew();
        let result = self
            .session
            .live()
            .and_then(|(transport, id)| transport.set_audio_input_format(id, format));

        match result {
            Ok(()) => {
                self.input.format = Some(format);
                self.input.state = StreamState::Requested;
                tracing::debug!("Audio input requested: {:?}", format);
            }
            Err(e) => tracing::warn!("Failed to request audio input: {}", e),
        }
    }

    /// Request an output stream in `format`
    ///
    /// Readers from a previous negotiation are unbound for good.
    pub fn start_output(&mut self, format: AudioFormat) {
        self.output.renew();
        let result = self
            .session
            .live()
            .and_then(|(transport, id)| transport.set_audio_output_format(id, format));

        match result {
            Ok(()) => {
                self.output.format = Some(format);
                self.output.state = StreamState::Requested;
                tracing::debug!("Audio output requested: {:?}", format);
            }
            Err(e) => tracing::warn!("Failed to request audio output: {}", e),
        }
    }

    /// Poll the transport for pending or lost handles
    pub fn tick(&mut self) {
        let session = self.session.clone();
        let Ok((transport, id)) = session.live() else {
            return;
        };

        self.poll_input(transport, id);
        self.poll_output(transport, id);
    }

    fn poll_input(&mut self, transport: &dyn Transport, id: SessionId) {
        let (Some(format), StreamState::Requested | StreamState::Ready) =
            (self.input.format, self.input.state)
        else {
            return;
        };

        match transport.audio_input_handle(id) {
            Ok(Some(handle)) => {
                let current = self.input.slot.load();
                let same = (*current)
                    .as_ref()
                    .is_some_and(|b| same_handle(&b.handle, &handle));
                if !same {
                    self.input.slot.store(Some(Arc::new(InputBinding { handle, format })));
                }

                if self.input.state == StreamState::Requested {
                    self.input.state = StreamState::Ready;
                    tracing::debug!("Audio input ready");
                    let writer =
                        AudioInputWriter::new(self.session.clone(), self.input.slot.clone(), format);
                    let _ = self.events_tx.send(AudioEvent::InputReady(writer));
                }
            }
            Ok(None) if self.input.state == StreamState::Ready => {
                tracing::debug!("Audio input handle lost, renegotiating");
                self.input.invalidate();
                self.input.state = StreamState::Requested;
            }
            Ok(None) => {}
            Err(e) => tracing::trace!("Audio input handle unavailable: {}", e),
        }
    }

    fn poll_output(&mut self, transport: &dyn Transport, id: SessionId) {
        let (Some(format), StreamState::Requested | StreamState::Ready) =
            (self.output.format, self.output.state)
        else {
            return;
        };

        match transport.audio_output_handle(id) {
            Ok(Some(handle)) => {
                let current = self.output.slot.load();
                let same = (*current)
                    .as_ref()
                    .is_some_and(|b| same_handle(&b.handle, &handle));
                if !same {
                    self.output.slot.store(Some(Arc::new(OutputBinding { handle, format })));
                }

                if self.output.state == StreamState::Requested {
                    self.output.state = StreamState::Ready;
                    tracing::debug!("Audio output ready");
                    let reader =
                        AudioOutputReader::new(self.session.clone(), self.output.slot.clone(), format);
                    let _ = self.events_tx.send(AudioEvent::OutputReady(reader));
                }
            }
            Ok(None) if self.output.state == StreamState::Ready => {
                tracing::debug!("Audio output handle lost, renegotiating");
                self.output.invalidate();
                self.output.state = StreamState::Requested;
            }
            Ok(None) => {}
            Err(e) => tracing::trace!("Audio output handle unavailable: {}", e),
        }
    }

    /// Events raised by [`tick`](Self::tick)
    pub fn events(&self) -> &Receiver<AudioEvent> {
        &self.events_rx
    }

    /// Take every pending event
    pub fn drain_events(&self) -> Vec<AudioEvent> {
        self.events_rx.try_iter().collect()
    }

    pub fn input_state(&self) -> StreamState {
        self.input.state
    }

    pub fn output_state(&self) -> StreamState {
        self.output.state
    }

    /// Writer for the current input stream, while ready
    pub fn input(&self) -> Option<AudioInputWriter> {
        let format = self.input.format?;
        (self.input.state == StreamState::Ready && self.session.is_alive())
            .then(|| AudioInputWriter::new(self.session.clone(), self.input.slot.clone(), format))
    }

    /// Reader for the current output stream, while ready
    pub fn output(&self) -> Option<AudioOutputReader> {
        let format = self.output.format?;
        (self.output.state == StreamState::Ready && self.session.is_alive())
            .then(|| AudioOutputReader::new(self.session.clone(), self.output.slot.clone(), format))
    }

    fn apply(
        &self,
        what: &str,
        call: impl FnOnce(&dyn Transport, SessionId) -> TransportResult<()>,
    ) {
        if let Err(e) = self.session.live().and_then(|(transport, id)| call(transport, id)) {
            tracing::debug!("Failed to set audio {}: {}", what, e);
        }
    }

    /// Ask the mixer to echo this client's input back
    pub fn set_echo(&self, enabled: bool) {
        self.apply("echo", |t, id| t.set_audio_input_echo(id, enabled));
    }

    /// Client-side input mute
    pub fn set_input_muted(&self, muted: bool) {
        self.apply("input mute", |t, id| t.set_audio_input_muted(id, muted));
    }

    /// Whether the mixer has muted this client's input
    pub fn input_muted_by_mixer(&self) -> bool {
        self.session
            .live()
            .and_then(|(transport, id)| transport.audio_input_muted_by_mixer(id))
            .unwrap_or(false)
    }

    /// Listener position and orientation for spatialization
    pub fn set_transform(&self, transform: Transform) {
        self.apply("transform", |t, id| t.set_audio_vantage(id, transform.vantage()));
    }

    /// Listener bounds; output stays silent without volume
    pub fn set_bounds(&self, bounds: Bounds) {
        if !bounds.has_volume() {
            tracing::warn!("Audio bounds have no volume, the mixer will send no output");
        }
        self.apply("bounds", |t, id| t.set_audio_bounds(id, bounds));
    }

    /// Gain applied to audio injectors
    pub fn set_injector_gain(&self, gain: f32) {
        self.apply("injector gain", |t, id| t.set_audio_injector_gain(id, gain));
    }

    pub fn set_codec_params(&self, codec: &str, params: CodecParams) {
        self.apply("codec params", |t, id| t.set_audio_codec_params(id, codec, params));
    }

    /// Codec the mixer selected, once negotiated
    pub fn selected_codec(&self) -> Option<String> {
        self.session
            .live()
            .and_then(|(transport, id)| transport.selected_audio_codec(id))
            .ok()
    }
}

/// Compare handles by the object they point to
fn same_handle<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
