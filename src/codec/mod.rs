//! Media codecs for the wire protocol
//!
//! PCM16 conversion for audio, JPEG encoding for video frames, and the
//! base64 transport encoding both use on the wire.

pub mod jpeg;
pub mod pcm;
pub mod transport;

pub use jpeg::{EncoderStats, JpegEncoder};
pub use pcm::{f32_to_pcm16, pcm16_to_f32};
pub use transport::{decode_base64, encode_base64};
