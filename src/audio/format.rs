//! Audio formats and raw sample conversion
//!
//! Samples of multiple channels are always interleaved. The transport
//! exchanges raw little-endian bytes; the public API works in `f32`.

use serde::{Deserialize, Serialize};

/// Supported sample encodings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    /// Signed 16-bit little-endian integer
    SignedInt16,
    /// IEEE 754 single precision float
    #[default]
    Float,
}

impl SampleType {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::SignedInt16 => 2,
            Self::Float => 4,
        }
    }
}

/// Negotiated stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_type: SampleType,
    /// Samples per channel per second (usually 8000 to 96000)
    pub sample_rate: u32,
    /// Number of interleaved channels (usually 1 to 8)
    pub channel_count: u16,
}

impl AudioFormat {
    pub const fn new(sample_type: SampleType, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_type,
            sample_rate,
            channel_count,
        }
    }

    /// Float samples at the given rate and channel count
    pub const fn float(sample_rate: u32, channel_count: u16) -> Self {
        Self::new(SampleType::Float, sample_rate, channel_count)
    }

    /// Size of one interleaved frame in bytes
    pub fn frame_bytes(&self) -> usize {
        self.sample_type.bytes_per_sample() * self.channel_count as usize
    }
}

/// Encode samples into `out`, returning the number of samples encoded
///
/// Encodes as many whole samples as fit.
pub fn encode_samples(sample_type: SampleType, samples: &[f32], out: &mut [u8]) -> usize {
    let width = sample_type.bytes_per_sample();
    let count = samples.len().min(out.len() / width);

    for (sample, bytes) in samples[..count].iter().zip(out.chunks_exact_mut(width)) {
        match sample_type {
            SampleType::Float => bytes.copy_from_slice(&sample.to_le_bytes()),
            SampleType::SignedInt16 => {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                bytes.copy_from_slice(&value.to_le_bytes());
            }
        }
    }

    count
}

/// Decode raw bytes into `out`, returning the number of samples decoded
pub fn decode_samples(sample_type: SampleType, bytes: &[u8], out: &mut [f32]) -> usize {
    let width = sample_type.bytes_per_sample();
    let count = out.len().min(bytes.len() / width);

    for (sample, raw) in out[..count].iter_mut().zip(bytes.chunks_exact(width)) {
        *sample = match sample_type {
            SampleType::Float => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            SampleType::SignedInt16 => i16::from_le_bytes([raw[0], raw[1]]) as f32 / i16::MAX as f32,
        };
    }

    count
}
