use crate::infrastructure::error::RemoteError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub fn encode_document(document: &str) -> String {
    STANDARD.encode(document.as_bytes())
}

/// Reverses [`encode_document`]. The contents API wraps its base64 at 60
/// columns, so embedded whitespace is dropped before decoding.
pub fn decode_document(encoded: &str) -> Result<String, RemoteError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|error| RemoteError::InvalidPayload(format!("content is not base64: {error}")))?;
    String::from_utf8(bytes)
        .map_err(|error| RemoteError::InvalidPayload(format!("content is not UTF-8: {error}")))
}
