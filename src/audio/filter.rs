//! Device-side audio filters with channel remapping
//!
//! A filter sits between a platform audio callback and a negotiated stream.
//! Device buffers may carry a different channel count than the stream; the
//! supported conversions are pass-through, downmix to mono and mono to
//! stereo. Other layouts drop the block.

use crate::audio::stream::{AudioInputWriter, AudioOutputReader};

/// Remap interleaved `input` with `from` channels into `out` with `to` channels
///
/// Returns false, leaving `out` empty, for unsupported layouts. A trailing
/// partial frame is ignored.
pub fn remap_channels(input: &[f32], from: u16, to: u16, out: &mut Vec<f32>) -> bool {
    out.clear();
    if from == 0 || to == 0 {
        return false;
    }

    let whole = input.len() / from as usize * from as usize;
    if from == to {
        out.extend_from_slice(&input[..whole]);
        return true;
    }

    let from = from as usize;
    match to {
        // Downmix: sum, divide, clamp
        1 => {
            out.extend(
                input
                    .chunks_exact(from)
                    .map(|frame| (frame.iter().sum::<f32>() / from as f32).clamp(-1.0, 1.0)),
            );
            true
        }
        2 if from == 1 => {
            out.reserve(input.len() * 2);
            for &sample in input {
                out.push(sample);
                out.push(sample);
            }
            true
        }
        _ => false,
    }
}

/// Moves captured device audio into the mixer input stream
///
/// The device buffer is zeroed after every call.
pub struct InputFilter {
    writer: AudioInputWriter,
    scratch: Vec<f32>,
    warned: bool,
}

impl InputFilter {
    pub fn new(writer: AudioInputWriter) -> Self {
        Self {
            writer,
            scratch: Vec::new(),
            warned: false,
        }
    }

    pub fn writer(&self) -> &AudioInputWriter {
        &self.writer
    }

    /// Consume one block of interleaved device samples
    ///
    /// Returns the number of stream samples written.
    pub fn process(&mut self, device: &mut [f32], device_channels: u16) -> usize {
        let target = self.writer.channel_count();
        let written = if remap_channels(device, device_channels, target, &mut self.scratch) {
            self.writer.write(&self.scratch, None)
        } else {
            if !self.warned {
                tracing::warn!(
                    "Unsupported input remap from {} to {} channels, dropping audio",
                    device_channels,
                    target
                );
                self.warned = true;
            }
            0
        };

        device.fill(0.0);
        written
    }
}

/// Fills a device playback buffer from the mixer output stream
pub struct OutputFilter {
    reader: AudioOutputReader,
    scratch: Vec<f32>,
    remapped: Vec<f32>,
    warned: bool,
}

impl OutputFilter {
    pub fn new(reader: AudioOutputReader) -> Self {
        Self {
            reader,
            scratch: Vec::new(),
            remapped: Vec::new(),
            warned: false,
        }
    }

    pub fn reader(&self) -> &AudioOutputReader {
        &self.reader
    }

    /// Fill one block of interleaved device samples
    ///
    /// Unfilled or unsupported output is silence. Returns the number of
    /// device samples produced.
    pub fn process(&mut self, device: &mut [f32], device_channels: u16) -> usize {
        let source = self.reader.channel_count();
        if device_channels == 0 || source == 0 {
            device.fill(0.0);
            return 0;
        }

        let frames = device.len() / device_channels as usize;
        self.scratch.resize(frames * source as usize, 0.0);
        let read = self.reader.read(&mut self.scratch);

        if !remap_channels(&self.scratch, source, device_channels, &mut self.remapped) {
            if !self.warned {
                tracing::warn!(
                    "Unsupported output remap from {} to {} channels, playing silence",
                    source,
                    device_channels
                );
                self.warned = true;
            }
            device.fill(0.0);
            return 0;
        }

        device.fill(0.0);
        let count = self.remapped.len().min(device.len());
        device[..count].copy_from_slice(&self.remapped[..count]);

        // Samples produced, scaled to the device layout
        (read / source as usize * device_channels as usize).min(count)
    }
}
