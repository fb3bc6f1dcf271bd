//! Writer and reader bound to negotiated audio handles
//!
//! Both are cheap to clone and safe to move onto a real-time audio thread.
//! Each call loads the current handle from a shared [`ArcSwapOption`]; the
//! tick thread may replace or clear it at any time without locking. A
//! handle loaded by an in-flight call stays alive until that call returns.

use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::Arc;

use crate::audio::format::{decode_samples, encode_samples, AudioFormat};
use crate::context::Session;
use crate::transport::{AudioInputBuffer, AudioOutputBuffer};

/// Bytes converted per chunk on the audio thread
const CHUNK_BYTES: usize = 4096;

/// Negotiated input handle and its format
pub(crate) struct InputBinding {
    pub handle: Arc<dyn AudioInputBuffer>,
    pub format: AudioFormat,
}

/// Negotiated output handle and its format
pub(crate) struct OutputBinding {
    pub handle: Arc<dyn AudioOutputBuffer>,
    pub format: AudioFormat,
}

pub(crate) type InputSlot = Arc<ArcSwapOption<InputBinding>>;
pub(crate) type OutputSlot = Arc<ArcSwapOption<OutputBinding>>;

/// Feeds interleaved input samples to the mixer
#[derive(Clone)]
pub struct AudioInputWriter {
    session: Arc<Session>,
    slot: InputSlot,
    format: AudioFormat,
}

impl AudioInputWriter {
    pub(crate) fn new(session: Arc<Session>, slot: InputSlot, format: AudioFormat) -> Self {
        Self {
            session,
            slot,
            format,
        }
    }

    /// Format negotiated when this writer was handed out
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Negotiated channel count
    pub fn channel_count(&self) -> u16 {
        self.format.channel_count
    }

    /// Whether writes currently reach a handle
    pub fn is_bound(&self) -> bool {
        self.session.is_alive() && self.slot.load().is_some()
    }

    /// Write interleaved samples, returning how many were accepted
    ///
    /// `length` limits the number of samples taken from `samples`. Writes
    /// after the session is destroyed or while the handle is being
    /// renegotiated are dropped.
    pub fn write(&self, samples: &[f32], length: Option<usize>) -> usize {
        if !self.session.is_alive() {
            return 0;
        }

        let guard = self.slot.load();
        let Some(binding) = &*guard else {
            return 0;
        };

        let length = length.map_or(samples.len(), |len| len.min(samples.len()));
        let sample_type = binding.format.sample_type;
        let width = sample_type.bytes_per_sample();

        let mut chunk = [0u8; CHUNK_BYTES];
        let mut written = 0;
        for part in samples[..length].chunks(CHUNK_BYTES / width) {
            let bytes = encode_samples(sample_type, part, &mut chunk) * width;
            let accepted = binding.handle.write(&chunk[..bytes]);
            written += accepted / width;
            if accepted < bytes {
                break;
            }
        }

        written
    }
}

impl fmt::Debug for AudioInputWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioInputWriter")
            .field("format", &self.format)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Pulls interleaved output samples from the mixer
#[derive(Clone)]
pub struct AudioOutputReader {
    session: Arc<Session>,
    slot: OutputSlot,
    format: AudioFormat,
}

impl AudioOutputReader {
    pub(crate) fn new(session: Arc<Session>, slot: OutputSlot, format: AudioFormat) -> Self {
        Self {
            session,
            slot,
            format,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn channel_count(&self) -> u16 {
        self.format.channel_count
    }

    pub fn is_bound(&self) -> bool {
        self.session.is_alive() && self.slot.load().is_some()
    }

    /// Fill `out` with mixer output, returning how many samples were produced
    ///
    /// Anything not produced is left as silence.
    pub fn read(&self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        if !self.session.is_alive() {
            return 0;
        }

        let guard = self.slot.load();
        let Some(binding) = &*guard else {
            return 0;
        };

        let sample_type = binding.format.sample_type;
        let width = sample_type.bytes_per_sample();

        let mut chunk = [0u8; CHUNK_BYTES];
        let mut produced = 0;
        for part in out.chunks_mut(CHUNK_BYTES / width) {
            let wanted = part.len() * width;
            let got = binding.handle.read(&mut chunk[..wanted]);
            produced += decode_samples(sample_type, &chunk[..got], part);
            if got < wanted {
                break;
            }
        }

        produced
    }
}

impl fmt::Debug for AudioOutputReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioOutputReader")
            .field("format", &self.format)
            .field("bound", &self.is_bound())
            .finish()
    }
}
