use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// One image known to the session: an uploaded subject or reference, or a
/// generated result.
///
/// `payload` is base64 image bytes, with or without a `data:` URL prefix.
/// `display_url` is whatever a renderer needs to show the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub display_url: String,
    pub payload: String,
    pub name: String,
}

impl ImageRecord {
    pub fn new(
        display_url: impl Into<String>,
        payload: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: new_record_id(),
            display_url: display_url.into(),
            payload: payload.into(),
            name: name.into(),
        }
    }

    /// A generated image: displayed and transmitted as the same data URL.
    pub fn from_data_url(data_url: impl Into<String>, name: impl Into<String>) -> Self {
        let data_url = data_url.into();
        Self::new(data_url.clone(), data_url, name)
    }

    pub fn raw_base64(&self) -> &str {
        strip_data_url_prefix(&self.payload)
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.raw_base64().trim().as_bytes())
    }
}

/// Session-unique identifier. Only used for keying and removal lookup.
pub fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Returns the part after the first comma, or the whole input when there is
/// no comma.
pub fn strip_data_url_prefix(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, data)) if !data.is_empty() => data,
        _ => payload,
    }
}

pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}

pub fn png_data_url(base64_data: &str) -> String {
    format!("{PNG_DATA_URL_PREFIX}{base64_data}")
}

pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension.trim().to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}
