//! # Audio Caster
//!
//! Realtime multi-channel audio capture client that hands captured audio to
//! an encoder and streams it to a remote server, reconnecting on its own when
//! the link drops.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Audio engine (cpal / JACK)          realtime thread                 │
//! │   src ports ──► in_1 .. in_N ──► CaptureHandoff (audio::capture)     │
//! │                                     │ no locks, no allocation        │
//! │                     ┌───────────────┼───────────────┐                │
//! │                     ▼               ▼               ▼                │
//! │               ChannelBuffer   ChannelBuffer   ChannelBuffer (SPSC)   │
//! └─────────────────────┼───────────────┼───────────────┼────────────────┘
//!                       └───────────────┼───────────────┘
//!                                       ▼
//!                   DrainWorker (stream::drain)       drain thread
//!                   one frame from every channel, or nothing
//!                                       │
//!                                       ▼
//!                   Streamer (network::streamer)  ◄── ConnectionSupervisor
//!                   Opus encode, TCP link, archive     (stream::supervisor)
//!                                                      1 Hz reconnect loop
//! ```
//!
//! Port wiring (`audio::wiring`) runs once at startup and flips the session's
//! process-enabled flag; until then the capture callback does nothing.

pub mod app;
pub mod archive;
pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;
pub mod status;
pub mod stream;

pub use error::{Error, Result};
pub use session::{SessionContext, SessionSettings, SessionStatus};

/// Application-wide constants
pub mod constants {
    /// Sample rate assumed until the engine reports one
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Rate the cpal engine asks devices for; native to the Opus encoder
    pub const PREFERRED_SAMPLE_RATE: u32 = 48000;

    /// Per-channel ring buffer size in bytes
    pub const DEFAULT_BUFFER_BYTES: usize = 1_000_000;

    /// Samples per channel in one frame handed to the streamer
    pub const FRAME_SAMPLES: usize = 2048;

    /// Default archive bit depth
    pub const DEFAULT_BIT_DEPTH: u16 = 16;

    /// Default engine client name
    pub const DEFAULT_CLIENT_NAME: &str = "caster";

    /// Connection supervisor tick
    pub const SUPERVISOR_TICK_MS: u64 = 1000;

    /// Default wait before reconnecting after a forced disconnect
    pub const DEFAULT_RECONNECT_SECS: u64 = 10;

    /// Largest block the cpal engine hands to the process callback at once
    pub const MAX_BLOCK_FRAMES: usize = 8192;
}
