use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use animask_contracts::data_url::DataUrl;
use animask_contracts::wire::{ErrorBody, ProcessImageRequest, ProcessImageSuccess};
use reqwest::blocking::Client as HttpClient;

use crate::endpoint::{
    ErrorKind, INVALID_IMAGE_MESSAGE, NO_IMAGE_MESSAGE, OUTPUT_MIME_TYPE, UPSTREAM_FAILED_MESSAGE,
};
use crate::model::{ImageModel, InlineImage, ModelError, ANIMAL_HEAD_PROMPT};

pub const PROCESS_FAILED_MESSAGE: &str =
    "Failed to process the image with the AI model. Please try again later.";
pub const MISSING_IMAGE_DATA_MESSAGE: &str = "The server did not return processed image data.";
pub const NETWORK_FAILURE_MESSAGE: &str =
    "Could not reach the processing endpoint. Please check your connection and try again.";

/// A failed processing call, already reduced to the message the user sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProcessFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProcessFailure {}

/// Turns an uploaded image into its processed counterpart.
pub trait ImageProcessor: Send + Sync {
    fn name(&self) -> &str;
    fn process(&self, image: &DataUrl) -> Result<DataUrl, ProcessFailure>;
}

/// Talks to a processing endpoint over HTTP. One request per call, no retry.
pub struct EndpointClient {
    endpoint: String,
    timeout: Duration,
    http: HttpClient,
}

impl EndpointClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ImageProcessor for EndpointClient {
    fn name(&self) -> &str {
        "endpoint"
    }

    fn process(&self, image: &DataUrl) -> Result<DataUrl, ProcessFailure> {
        let request = ProcessImageRequest::new(image.to_string(), image.mime_type());
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .map_err(|_| ProcessFailure::new(ErrorKind::Network, NETWORK_FAILURE_MESSAGE))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|_| ProcessFailure::new(ErrorKind::Network, NETWORK_FAILURE_MESSAGE))?;
        if !status.is_success() {
            return Err(ProcessFailure::new(
                ErrorKind::Upstream,
                error_message_from_body(&body),
            ));
        }

        serde_json::from_str::<ProcessImageSuccess>(&body)
            .ok()
            .map(|success| success.image_data)
            .filter(|data| !data.trim().is_empty())
            .map(|data| DataUrl::parse(&data, OUTPUT_MIME_TYPE))
            .filter(|image| !image.is_empty())
            .ok_or_else(|| ProcessFailure::new(ErrorKind::Upstream, MISSING_IMAGE_DATA_MESSAGE))
    }
}

/// Extracts `{error}` from a failure body, or the generic message when the
/// body is not that shape.
pub fn error_message_from_body(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|parsed| parsed.error.trim().to_string())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| PROCESS_FAILED_MESSAGE.to_string())
}

/// Calls the model directly with a key the user stored locally.
pub struct DirectClient {
    model: Arc<dyn ImageModel>,
    api_key: String,
}

impl DirectClient {
    pub fn new(model: Arc<dyn ImageModel>, api_key: impl Into<String>) -> Self {
        Self {
            model,
            api_key: api_key.into(),
        }
    }
}

impl ImageProcessor for DirectClient {
    fn name(&self) -> &str {
        self.model.name()
    }

    fn process(&self, image: &DataUrl) -> Result<DataUrl, ProcessFailure> {
        if image.is_empty() {
            return Err(ProcessFailure::new(
                ErrorKind::Validation,
                INVALID_IMAGE_MESSAGE,
            ));
        }
        let input = InlineImage {
            data: image.payload().trim().to_string(),
            mime_type: image.mime_type().to_string(),
        };
        match self.model.edit(&self.api_key, &input, ANIMAL_HEAD_PROMPT) {
            Ok(output) => Ok(DataUrl::new(OUTPUT_MIME_TYPE, output.data)),
            Err(ModelError::Transport(_)) => Err(ProcessFailure::new(
                ErrorKind::Network,
                UPSTREAM_FAILED_MESSAGE,
            )),
            Err(ModelError::Status { .. }) => Err(ProcessFailure::new(
                ErrorKind::Upstream,
                UPSTREAM_FAILED_MESSAGE,
            )),
            Err(ModelError::MissingImage(_)) => {
                Err(ProcessFailure::new(ErrorKind::Upstream, NO_IMAGE_MESSAGE))
            }
        }
    }
}
