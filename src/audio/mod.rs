//! Duplex audio streaming with the mixer

pub mod buffer;
pub mod filter;
pub mod format;
pub mod pipeline;
pub mod stream;

pub use buffer::RingBuffer;
pub use filter::{remap_channels, InputFilter, OutputFilter};
pub use format::{AudioFormat, SampleType};
pub use pipeline::{AudioDuplexPipeline, AudioEvent, CodecParams, StreamState};
pub use stream::{AudioInputWriter, AudioOutputReader};
