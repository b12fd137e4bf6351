//! Text encoding for sealed blobs on the wire (standard, padded base64).

use base64::{engine::general_purpose::STANDARD, DecodeError, Engine as _};

pub fn encode_blob(blob: &[u8]) -> String {
    STANDARD.encode(blob)
}

/// Malformed input is rejected as a whole; no partial bytes are returned.
pub fn decode_blob(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD.decode(encoded)
}
