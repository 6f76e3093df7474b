use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Returns the payload of a `data:<mime>;base64,<payload>` string, that is
/// everything after the first comma.
pub fn split_data_url(image: &str) -> Option<&str> {
    image.split_once(',').map(|(_, payload)| payload)
}

/// Decodes standard base64, ignoring any ASCII whitespace (line-wrapped
/// MIME output included).
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: Vec<u8> = payload
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(compact)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
