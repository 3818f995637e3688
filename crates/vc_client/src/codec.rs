//! Base64 helpers shared by both cipher components.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::ChatError;

pub(crate) fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s)
}

/// Version-0 envelope body: plain base64 of the UTF-8 text.
pub(crate) fn encode_plain(text: &str) -> String {
    encode(text.as_bytes())
}

/// Reverse a version-0 envelope exactly; no data loss, no confidentiality.
pub(crate) fn decode_plain(encoded: &str) -> Result<String, ChatError> {
    let bytes = decode(encoded).map_err(|_| ChatError::DecryptionFailed)?;
    String::from_utf8(bytes).map_err(|_| ChatError::DecryptionFailed)
}
