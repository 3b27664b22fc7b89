//! Camera frame handling
//!
//! Frames are submitted from whatever owns the camera. Each submission
//! replaces the latest-frame slot (read by tool calls and the tracking
//! ticker) and, while a session is sending, is offered to a droppable
//! queue drained at the configured frame rate.

pub mod frame;
pub mod pipeline;

pub use frame::{FrameSlot, VideoFrame};
pub use pipeline::VideoPipeline;
