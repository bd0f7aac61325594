use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const ANIMAL_HEAD_PROMPT: &str = "Analyze the image to identify any human faces. For each face found, replace only the facial area with a cartoon animal head in the distinct artistic style of 'Tom and Jerry'. The generated head must not include a neck. It should be scaled to appropriately cover the person's entire face, from chin to hairline, while seamlessly blending with the original image's hair and shoulders. Crucially, if the person is wearing glasses or has other distinct facial accessories or features (like a mole or a scar), these features must be accurately and comically represented on the new cartoon animal head. The goal is to maintain the original image's lighting and composition while protecting identity. Do not alter any other part of the image.";

const API_KEY_HEADER: &str = "x-goog-api-key";
const LOGGED_BODY_MAX_CHARS: usize = 512;

/// Base64 image bytes as exchanged with the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The request never produced an HTTP response.
    Transport(String),
    /// The model answered with a non-success status.
    Status { status: u16, body: String },
    /// The model answered 2xx but the payload held no usable image.
    MissingImage(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(detail) => write!(f, "model request failed: {detail}"),
            Self::Status { status, body } => write!(f, "model returned {status}: {body}"),
            Self::MissingImage(detail) => write!(f, "model returned no image: {detail}"),
        }
    }
}

impl std::error::Error for ModelError {}

/// A generative model that edits one image according to a text instruction.
///
/// The credential is passed on every call; implementations hold no key.
pub trait ImageModel: Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, api_key: &str, image: &InlineImage, prompt: &str)
        -> Result<InlineImage, ModelError>;
}

pub struct GeminiImageModel {
    api_base: String,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiImageModel {
    pub fn new(api_base: &str, model: &str, timeout: Duration) -> Self {
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_base: if api_base.is_empty() {
                DEFAULT_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            model: if model.trim().is_empty() {
                DEFAULT_MODEL.to_string()
            } else {
                model.trim().to_string()
            },
            timeout,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        let model_path = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn build_payload(image: &InlineImage, prompt: &str) -> Value {
        json!({
            "contents": [
                {
                    "role": "user",
                    "parts": [
                        {
                            "inlineData": {
                                "data": image.data,
                                "mimeType": image.mime_type,
                            }
                        },
                        { "text": prompt },
                    ],
                }
            ],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
            },
        })
    }
}

impl ImageModel for GeminiImageModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn edit(
        &self,
        api_key: &str,
        image: &InlineImage,
        prompt: &str,
    ) -> Result<InlineImage, ModelError> {
        let payload = Self::build_payload(image, prompt);
        let response = self
            .http
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .map_err(|err| ModelError::Transport(err.without_url().to_string()))?;

        let status = response.status();
        let body = response.text().map_err(|err| {
            ModelError::Transport(format!("response body read failed: {}", err.without_url()))
        })?;
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: truncate_text(&body, LOGGED_BODY_MAX_CHARS),
            });
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            ModelError::MissingImage(format!(
                "invalid JSON payload ({err}): {}",
                truncate_text(&body, LOGGED_BODY_MAX_CHARS)
            ))
        })?;
        extract_first_inline_image(&parsed)
            .ok_or_else(|| ModelError::MissingImage(truncate_text(&body, LOGGED_BODY_MAX_CHARS)))
    }
}

/// Finds the first part carrying inline image data in the first candidate.
pub fn extract_first_inline_image(response: &Value) -> Option<InlineImage> {
    let parts = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)?;

    parts.iter().find_map(|part| {
        let inline = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)?;
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        Some(InlineImage {
            data: data.to_string(),
            mime_type: mime_type.to_string(),
        })
    })
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{
        extract_first_inline_image, truncate_text, GeminiImageModel, InlineImage,
        ANIMAL_HEAD_PROMPT, DEFAULT_API_BASE,
    };

    #[test]
    fn endpoint_normalizes_base_and_model_path() {
        let model = GeminiImageModel::new(
            "https://example.test/v1beta/",
            "gemini-2.5-flash-image",
            Duration::from_secs(5),
        );
        assert_eq!(
            model.endpoint(),
            "https://example.test/v1beta/models/gemini-2.5-flash-image:generateContent"
        );

        let prefixed = GeminiImageModel::new("", "models/custom", Duration::from_secs(5));
        assert_eq!(
            prefixed.endpoint(),
            format!("{DEFAULT_API_BASE}/models/custom:generateContent")
        );
    }

    #[test]
    fn payload_carries_image_then_prompt_with_image_modality() {
        let image = InlineImage {
            data: "AAAA".to_string(),
            mime_type: "image/jpeg".to_string(),
        };
        let payload = GeminiImageModel::build_payload(&image, ANIMAL_HEAD_PROMPT);
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(payload["contents"][0]["role"], json!("user"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("AAAA"));
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[1]["text"], json!(ANIMAL_HEAD_PROMPT));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
    }

    #[test]
    fn extract_skips_text_parts_and_reads_first_candidate_only() {
        let response = json!({
            "candidates": [
                {"content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"data": "", "mimeType": "image/png"}},
                    {"inline_data": {"data": "QUJD", "mime_type": "image/webp"}}
                ]}},
                {"content": {"parts": [{"inlineData": {"data": "SECOND"}}]}}
            ]
        });
        let image = extract_first_inline_image(&response).expect("image");
        assert_eq!(image.data, "QUJD");
        assert_eq!(image.mime_type, "image/webp");
    }

    #[test]
    fn extract_returns_none_without_inline_data() {
        assert_eq!(extract_first_inline_image(&json!({})), None);
        assert_eq!(
            extract_first_inline_image(&json!({
                "candidates": [{"content": {"parts": [{"text": "I can't do that"}]}}]
            })),
            None
        );
    }

    #[test]
    fn truncate_text_appends_ellipsis() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
