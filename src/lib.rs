//! # Shared Space Client
//!
//! Client-side state synchronization for a shared multi-user virtual space.
//!
//! The network session, wire protocol and codecs belong to an opaque
//! [`Transport`](transport::Transport). This crate drives it once per host
//! tick and keeps the application's view in sync: remote avatars are
//! mirrored, channel messages are relayed and duplex audio is negotiated
//! and streamed.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            HOST APPLICATION                              │
//! │        tick() once per frame              audio thread (real-time)       │
//! └──────┬───────────────┬───────────────┬──────────────────┬────────────────┘
//!        │               │               │                  │
//!        ▼               ▼               ▼                  ▼
//! ┌─────────────┐ ┌─────────────┐ ┌──────────────┐  ┌───────────────────────┐
//! │ Connection  │ │ AvatarSync  │ │ MessageBus   │  │ InputFilter           │
//! │ Context     │ │ Engine      │ │              │  │ OutputFilter          │
//! │ status,     │ │ views →     │ │ clear →      │  │  (channel remap)      │
//! │ nodes       │ │ update →    │ │ update →     │  └──────────┬────────────┘
//! │             │ │ disconnect →│ │ read batch   │             │
//! │             │ │ grow →      │ │              │  ┌──────────▼────────────┐
//! │             │ │ refresh     │ │              │  │ Writer / Reader       │
//! │             │ │             │ │              │  │  (lock-free handle)   │
//! └──────┬──────┘ └──────┬──────┘ └──────┬───────┘  └──────────▲────────────┘
//!        │               │               │                     │ swap
//!        │               │               │          ┌──────────┴────────────┐
//!        │               │               │          │ AudioDuplexPipeline   │
//!        │               │               │          │  Requested → Ready    │
//!        │               │               │          └──────────┬────────────┘
//!        ▼               ▼               ▼                     ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                     Transport (shared Session handle)                    │
//! │        indexed accessors, "not ready" reads retried next tick            │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Components never call each other. Each one raises its notifications on a
//! channel the host drains after ticking.

pub mod audio;
pub mod avatars;
pub mod config;
pub mod context;
pub mod error;
pub mod math;
pub mod messages;
pub mod transport;

pub use audio::{AudioDuplexPipeline, AudioEvent, AudioFormat, SampleType};
pub use avatars::{AvatarData, AvatarEvent, AvatarSyncEngine, RemoteAvatar};
pub use config::ClientConfig;
pub use context::{ConnectionContext, ConnectionStatus, NodeType, RemoteNode, Session};
pub use error::{Error, Result, TransportError};
pub use messages::{Message, MessageBus, MessageTypes};
pub use transport::{MemoryTransport, SharedTransport, Transport};

/// Library-wide constants
pub mod constants {
    /// Output buffering depth, in frames, configured when audio is enabled
    pub const DEFAULT_OUTPUT_BUFFER_FRAMES: u32 = 2;

    /// Suggested interval between host ticks
    pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;

    /// Default sample rate for audio streams
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Location the demo connects to when none is given
    pub const DEFAULT_LOCATION: &str = "localhost";
}
