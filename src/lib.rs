//! # R-Hat Live
//!
//! Real-time session client for a multimodal conversational agent, with a
//! local multi-object tracker the agent can drive through tool calls.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            SessionController                             │
//! │                                                                          │
//! │  ┌────────────┐   ┌──────────────┐          ┌────────────────────────┐   │
//! │  │ Microphone │──▶│ AudioCapture │──Block──▶│                        │   │
//! │  └────────────┘   └──────────────┘  queue   │                        │   │
//! │                                             │   ProtocolMultiplexer  │   │
//! │  ┌────────────┐   ┌──────────────┐  Drop    │                        │   │
//! │  │   Camera   │──▶│VideoPipeline │──queue──▶│  send-audio loop  ──┐  │   │
//! │  └────────────┘   └──────┬───────┘          │  send-video loop  ──┼──┼───┼──▶ agent
//! │                          │ latest frame     │  receive loop    ◀──┘  │   │    bridge
//! │                          ▼                  │    │   │     │         │   │   (WebSocket)
//! │                   ┌──────────────┐          └────┼───┼─────┼─────────┘   │
//! │                   │  FrameSlot   │               │   │     │             │
//! │                   └──┬────────┬──┘   transcripts │   │     │ AUDIO_OUTPUT│
//! │                      │        │      AI state    │   │     ▼             │
//! │                      │        │   ┌──────────────┘   │ ┌──────────────┐  │
//! │                      │        │   │       TOOL_CALL  │ │AudioPlayback │  │
//! │                      │        │   ▼                  ▼ └──────────────┘  │
//! │                      │        │ ┌──────────┐  ┌────────────────┐         │
//! │                      │        └▶│EventSink │◀─│ ToolCallBridge │         │
//! │                      │          └────┬─────┘  └───────┬────────┘         │
//! │                      ▼               │                ▼                  │
//! │              ┌────────────────┐      │        ┌────────────────┐         │
//! │              │tracking ticker │──────┴───────▶│ TrackingEngine │         │
//! │              └────────────────┘               └────────────────┘         │
//! └──────────────────────────────────┬───────────────────────────────────────┘
//!                                    ▼
//!                      control API (HTTP + /ws events)
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod tools;
pub mod tracking;
pub mod ui;
pub mod video;

pub use error::{Error, Result};
pub use session::SessionController;

/// Application-wide constants
pub mod constants {
    /// Microphone rate expected by the agent
    pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 16_000;

    /// Rate of audio returned by the agent
    pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

    /// Samples per captured audio frame
    pub const DEFAULT_FRAME_SIZE: usize = 4096;

    /// Video frames sent per second
    pub const DEFAULT_FRAME_RATE: u32 = 2;

    /// JPEG quality for sent frames
    pub const DEFAULT_JPEG_QUALITY: u8 = 70;

    /// Frames held while the send-video loop is busy
    pub const DEFAULT_VIDEO_QUEUE_CAPACITY: usize = 2;

    /// Default agent bridge endpoint
    pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8765";

    /// Default control API port
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Minimum identification score for `highlightObject`
    pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.15;
}
