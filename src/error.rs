//! Error types for the live session and tracking engine

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Vision error: {0}")]
    Vision(#[from] VisionError),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Media encoding and decoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JPEG encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("PCM16 payload has odd length: {0} bytes")]
    OddPcmLength(usize),
}

/// Transport errors on the duplex connection
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

/// Malformed or unexpected wire messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("Unexpected binary frame ({0} bytes)")]
    UnexpectedBinary(usize),
}

/// Tracking engine errors
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Frame is empty ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("Tracker initialization failed: {0}")]
    InitFailed(String),
}

/// Errors raised by the detection and identification collaborators
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    #[error("Identification failed: {0}")]
    IdentificationFailed(String),
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
