use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// An image carried as `data:<mime>;base64,<payload>`.
///
/// The payload is kept base64-encoded; images only get decoded when they
/// leave the process (download, file write).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    mime_type: String,
    payload: String,
}

impl DataUrl {
    pub fn new(mime_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            payload: payload.into(),
        }
    }

    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, BASE64.encode(bytes))
    }

    /// Parses a data URL the way the processing endpoint reads one: the
    /// payload is everything after the first comma, and a string without a
    /// comma is taken as a bare payload. `fallback_mime` is used when the
    /// header carries no media type.
    pub fn parse(raw: &str, fallback_mime: &str) -> Self {
        let (header, payload) = match raw.split_once(',') {
            Some((header, payload)) => (Some(header), payload),
            None => (None, raw),
        };
        let mime_type = header
            .and_then(|header| header.strip_prefix("data:"))
            .and_then(|meta| meta.split(';').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(fallback_mime);
        Self::new(mime_type, payload)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn is_empty(&self) -> bool {
        self.payload.trim().is_empty()
    }

    pub fn decode(&self) -> anyhow::Result<Vec<u8>> {
        BASE64
            .decode(self.payload.trim().as_bytes())
            .map_err(|err| anyhow::anyhow!("image payload is not valid base64: {err}"))
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.payload)
    }
}

/// Strips a data URL down to its base64 payload.
pub fn strip_data_url_prefix(raw: &str) -> &str {
    match raw.find(',') {
        Some(idx) => &raw[idx + 1..],
        None => raw,
    }
}

pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.trim().to_ascii_lowercase().starts_with("image/")
}
