//! `data:<mime>;base64,<payload>` URIs used for audio and custom avatars.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Error returned when a string is not a base64 data URI.
#[derive(Debug, thiserror::Error)]
pub enum DataUriError {
    /// The string does not start with `data:`.
    #[error("not a data URI")]
    MissingScheme,
    /// There is no `,` separating header and payload.
    #[error("data URI has no payload separator")]
    MissingPayload,
    /// The header does not declare base64 encoding.
    #[error("data URI is not base64-encoded")]
    NotBase64,
    /// The payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Payload(#[from] base64::DecodeError),
}

/// Encodes `bytes` as a base64 data URI with the given MIME type.
#[must_use]
pub fn encode(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

/// Splits a base64 data URI into its MIME type and decoded bytes.
///
/// Parameters after the MIME type (e.g. `;codecs=opus`) are kept as part
/// of the returned MIME string.
///
/// # Errors
///
/// Returns [`DataUriError`] if the URI is not a well-formed base64 data URI.
pub fn decode(uri: &str) -> Result<(String, Vec<u8>), DataUriError> {
    let rest = uri.strip_prefix("data:").ok_or(DataUriError::MissingScheme)?;
    let (header, payload) = rest.split_once(',').ok_or(DataUriError::MissingPayload)?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or(DataUriError::NotBase64)?;
    let bytes = STANDARD.decode(payload.trim())?;
    Ok((mime.to_string(), bytes))
}

/// Guesses a MIME type from a file extension, for files read from disk.
#[must_use]
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "webm" => "audio/webm",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime)
}
