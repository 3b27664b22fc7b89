//! Base64 transport encoding for binary payloads carried in JSON

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;

use crate::error::CodecError;

/// Encode a binary payload for a JSON `data` field
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode a JSON `data` field
pub fn decode_base64(data: &str) -> Result<Bytes, CodecError> {
    STANDARD
        .decode(data.trim())
        .map(Bytes::from)
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))
}
