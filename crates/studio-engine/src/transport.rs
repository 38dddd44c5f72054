use std::io::Cursor;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use studio_contracts::models::ImageConfig;

use crate::error::StudioError;

/// One ordered entry of a request: inline image bytes or an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    InlineImage { mime_type: String, data: String },
    Text(String),
}

impl RequestPart {
    pub fn png(data: impl Into<String>) -> Self {
        Self::InlineImage {
            mime_type: "image/png".to_string(),
            data: data.into(),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::InlineImage { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": data,
                }
            }),
            Self::Text(text) => json!({ "text": text }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub model: String,
    pub parts: Vec<RequestPart>,
    pub image_config: Option<ImageConfig>,
}

impl GenerateRequest {
    /// `generateContent` body.
    pub fn to_payload(&self) -> Value {
        let mut generation_config = Map::new();
        generation_config.insert(
            "responseModalities".to_string(),
            Value::Array(vec![Value::String("IMAGE".to_string())]),
        );
        if let Some(image_config) = self.image_config {
            generation_config.insert(
                "imageConfig".to_string(),
                json!({
                    "aspectRatio": image_config.aspect_ratio,
                    "imageSize": image_config.image_size,
                }),
            );
        }
        json!({
            "contents": [{
                "role": "user",
                "parts": self.parts.iter().map(RequestPart::to_value).collect::<Vec<Value>>(),
            }],
            "generationConfig": Value::Object(generation_config),
        })
    }
}

pub trait ImageTransport: Send + Sync {
    fn name(&self) -> &str;
    fn generate_content(&self, request: &GenerateRequest) -> Result<Value, StudioError>;
}

/// Replaceable API key shared between the transport and the host.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    inner: Arc<RwLock<Option<String>>>,
}

impl Credential {
    pub fn new(key: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(key)),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, key: impl Into<String>) {
        let key = key.into();
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(key.trim().to_string()).filter(|value| !value.is_empty());
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

pub struct GeminiTransport {
    api_base: String,
    credential: Credential,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiTransport {
    pub fn new(api_base: impl Into<String>, credential: Credential, timeout: Duration) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            credential,
            timeout,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl ImageTransport for GeminiTransport {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate_content(&self, request: &GenerateRequest) -> Result<Value, StudioError> {
        let api_key = self.credential.get().ok_or(StudioError::MissingCredential)?;
        let endpoint = self.endpoint_for_model(&request.model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .timeout(self.timeout)
            .json(&request.to_payload())
            .send()
            .map_err(|err| {
                StudioError::Transport(format!("Gemini request failed ({endpoint}): {err}"))
            })?;
        response_json_or_error(response)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, StudioError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| StudioError::Transport(format!("Gemini response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(StudioError::Api {
            status: status.as_u16(),
            message: truncate_text(&body, 512),
        });
    }
    serde_json::from_str(&body).map_err(|err| StudioError::InvalidResponse(err.to_string()))
}

/// Offline transport: answers every request with a solid-color PNG derived
/// from the request parts, wrapped in the service's response envelope.
#[derive(Debug, Clone)]
pub struct DryrunTransport {
    size: u32,
}

impl Default for DryrunTransport {
    fn default() -> Self {
        Self { size: 64 }
    }
}

impl DryrunTransport {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }
}

impl ImageTransport for DryrunTransport {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_content(&self, request: &GenerateRequest) -> Result<Value, StudioError> {
        let (r, g, b) = color_from_parts(&request.parts);
        let mut image = RgbImage::new(self.size, self.size);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| StudioError::Transport(format!("dryrun encode failed: {err}")))?;
        Ok(json!({
            "candidates": [{
                "content": {
                    "parts": [{
                        "inlineData": {
                            "mimeType": "image/png",
                            "data": BASE64.encode(&bytes),
                        }
                    }]
                }
            }],
            "modelVersion": request.model,
        }))
    }
}

fn color_from_parts(parts: &[RequestPart]) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    for part in parts {
        match part {
            RequestPart::InlineImage { data, .. } => hasher.update(data.as_bytes()),
            RequestPart::Text(text) => hasher.update(text.as_bytes()),
        }
    }
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
