//! `POST /api/process-image`: forwards one image to the model with the fixed
//! prompt and normalizes whatever comes back.
//!
//! Callers only ever see the fixed public messages below. Upstream bodies and
//! configuration details go to the server log.

use std::fmt;

use animask_contracts::data_url::{strip_data_url_prefix, DataUrl};
use animask_contracts::events::{EventPayload, EventWriter};
use animask_contracts::wire::{ErrorBody, ProcessImageRequest, ProcessImageSuccess};
use serde_json::Value;

use crate::model::{truncate_text, ImageModel, InlineImage, ModelError, ANIMAL_HEAD_PROMPT};

const LOGGED_BODY_MAX_CHARS: usize = 512;

pub const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method not allowed. Use POST.";
pub const CONFIGURATION_ERROR_MESSAGE: &str =
    "Server configuration error. Please contact the administrator.";
pub const INVALID_JSON_MESSAGE: &str = "Invalid JSON payload.";
pub const MISSING_FIELDS_MESSAGE: &str = "Both imageDataUrl and mimeType are required.";
pub const INVALID_IMAGE_MESSAGE: &str = "Invalid image data provided.";
pub const PAYLOAD_TOO_LARGE_MESSAGE: &str = "Image payload too large.";
pub const UPSTREAM_FAILED_MESSAGE: &str = "Image generation failed. Please try again later.";
pub const NO_IMAGE_MESSAGE: &str = "No image data received from Gemini.";
pub const NOT_FOUND_MESSAGE: &str = "Not found.";
pub const UNEXPECTED_ERROR_MESSAGE: &str = "Unexpected server error. Please try again.";

pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;
pub const OUTPUT_MIME_TYPE: &str = "image/png";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Validation,
    Configuration,
    Upstream,
    Network,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Configuration => "configuration",
            Self::Upstream => "upstream",
            Self::Network => "network",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: &'static str,
    pub detail: String,
    /// Upstream response body, kept for the server log only.
    pub body: Option<String>,
}

impl EndpointError {
    fn validation(status: u16, message: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            status,
            message,
            detail: detail.into(),
            body: None,
        }
    }

    pub fn not_found(path: &str) -> Self {
        Self::validation(404, NOT_FOUND_MESSAGE, format!("no route for {path}"))
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            status: 500,
            message: UNEXPECTED_ERROR_MESSAGE,
            detail: detail.into(),
            body: None,
        }
    }

    fn configuration(detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Configuration,
            status: 500,
            message: CONFIGURATION_ERROR_MESSAGE,
            detail: detail.into(),
            body: None,
        }
    }

    fn from_model(err: ModelError) -> Self {
        match err {
            ModelError::Transport(detail) => Self {
                kind: ErrorKind::Network,
                status: 502,
                message: UPSTREAM_FAILED_MESSAGE,
                detail,
                body: None,
            },
            ModelError::Status { status, body } => Self {
                kind: ErrorKind::Upstream,
                status: upstream_error_status(status),
                message: UPSTREAM_FAILED_MESSAGE,
                detail: format!("upstream returned {status}"),
                body: Some(truncate_text(&body, LOGGED_BODY_MAX_CHARS)),
            },
            ModelError::MissingImage(body) => Self {
                kind: ErrorKind::Upstream,
                status: 502,
                message: NO_IMAGE_MESSAGE,
                detail: "no inline image in first candidate".to_string(),
                body: Some(truncate_text(&body, LOGGED_BODY_MAX_CHARS)),
            },
        }
    }
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

impl std::error::Error for EndpointError {}

/// A JSON response ready to be written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: Value,
}

impl EndpointResponse {
    pub fn success(image: &DataUrl) -> Self {
        Self {
            status: 200,
            body: serde_json::to_value(ProcessImageSuccess {
                image_data: image.to_string(),
            })
            .unwrap_or(Value::Null),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: serde_json::to_value(ErrorBody::new(message)).unwrap_or(Value::Null),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.body).unwrap_or_else(|_| "{}".to_string())
    }
}

pub struct ProcessingEndpoint {
    model: Box<dyn ImageModel>,
    api_key: Option<String>,
    events: EventWriter,
}

impl ProcessingEndpoint {
    pub fn new(model: Box<dyn ImageModel>, api_key: Option<String>, events: EventWriter) -> Self {
        Self {
            model,
            api_key: api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            events,
        }
    }

    pub fn handle(&self, method: &str, body: &[u8]) -> EndpointResponse {
        match self.process(method, body) {
            Ok(image) => {
                let mut payload = EventPayload::new();
                payload.insert("status".to_string(), Value::from(200));
                payload.insert("mime_type".to_string(), Value::from(image.mime_type()));
                payload.insert("model".to_string(), Value::from(self.model.name()));
                self.log("request_succeeded", payload);
                EndpointResponse::success(&image)
            }
            Err(err) => self.reject(&err),
        }
    }

    /// Logs `err` and renders its public response.
    pub fn reject(&self, err: &EndpointError) -> EndpointResponse {
        self.log_failure(err);
        EndpointResponse::error(err.status, err.message)
    }

    fn process(&self, method: &str, body: &[u8]) -> Result<DataUrl, EndpointError> {
        if !method.eq_ignore_ascii_case("POST") {
            return Err(EndpointError::validation(
                405,
                METHOD_NOT_ALLOWED_MESSAGE,
                format!("method {method} rejected"),
            ));
        }

        let Some(api_key) = self.api_key.as_deref() else {
            return Err(EndpointError::configuration("GEMINI_API_KEY is not configured."));
        };

        if body.len() > MAX_BODY_BYTES {
            return Err(EndpointError::validation(
                413,
                PAYLOAD_TOO_LARGE_MESSAGE,
                format!("body of {} bytes exceeds {MAX_BODY_BYTES}", body.len()),
            ));
        }

        let request: ProcessImageRequest = serde_json::from_slice(body).map_err(|err| {
            EndpointError::validation(400, INVALID_JSON_MESSAGE, format!("body parse failed: {err}"))
        })?;

        let image_data_url = request
            .image_data_url
            .as_deref()
            .filter(|value| !value.trim().is_empty());
        let mime_type = request
            .mime_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let (Some(image_data_url), Some(mime_type)) = (image_data_url, mime_type) else {
            return Err(EndpointError::validation(
                400,
                MISSING_FIELDS_MESSAGE,
                "imageDataUrl or mimeType missing",
            ));
        };

        let data = strip_data_url_prefix(image_data_url).trim();
        if data.is_empty() {
            return Err(EndpointError::validation(
                400,
                INVALID_IMAGE_MESSAGE,
                "empty base64 payload after data URL prefix",
            ));
        }

        let input = InlineImage {
            data: data.to_string(),
            mime_type: mime_type.to_string(),
        };
        let output = self
            .model
            .edit(api_key, &input, ANIMAL_HEAD_PROMPT)
            .map_err(EndpointError::from_model)?;

        // The model's output is always served as PNG, whatever it reports.
        Ok(DataUrl::new(OUTPUT_MIME_TYPE, output.data))
    }

    fn log_failure(&self, err: &EndpointError) {
        eprintln!("{}", failure_log_line(err));
        let mut payload = EventPayload::new();
        payload.insert("status".to_string(), Value::from(err.status));
        payload.insert("kind".to_string(), Value::from(err.kind.as_str()));
        payload.insert("message".to_string(), Value::from(err.message));
        payload.insert("detail".to_string(), Value::from(err.detail.clone()));
        if let Some(body) = err.body.as_ref() {
            payload.insert("body".to_string(), Value::from(body.clone()));
        }
        self.log("request_failed", payload);
    }

    fn log(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("animask: event log write failed: {err:#}");
        }
    }
}

/// The stderr line for a failed request. Carries the upstream body so it
/// reaches the server log even without an event file.
fn failure_log_line(err: &EndpointError) -> String {
    let mut line = format!(
        "animask: request failed ({}, {}): {}",
        err.status,
        err.kind.as_str(),
        err.detail
    );
    if let Some(body) = err.body.as_deref().filter(|body| !body.trim().is_empty()) {
        line.push_str(" body=");
        line.push_str(body);
    }
    line
}

/// Upstream statuses are passed through when they are errors; anything else
/// becomes a 502 so the caller never sees a success code on failure.
fn upstream_error_status(status: u16) -> u16 {
    if (400..=599).contains(&status) {
        status
    } else {
        502
    }
}
