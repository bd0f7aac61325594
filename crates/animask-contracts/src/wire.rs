use serde::{Deserialize, Serialize};

pub const PROCESS_IMAGE_PATH: &str = "/api/process-image";

/// Body of `POST /api/process-image`.
///
/// Both fields are optional on the way in so that a missing field is a 400,
/// not a JSON parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessImageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ProcessImageRequest {
    pub fn new(image_data_url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            image_data_url: Some(image_data_url.into()),
            mime_type: Some(mime_type.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessImageSuccess {
    pub image_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ErrorBody, ProcessImageRequest, ProcessImageSuccess};

    #[test]
    fn request_uses_camel_case_fields() -> anyhow::Result<()> {
        let request = ProcessImageRequest::new("data:image/png;base64,AAAA", "image/png");
        let value = serde_json::to_value(&request)?;
        assert_eq!(
            value,
            json!({"imageDataUrl": "data:image/png;base64,AAAA", "mimeType": "image/png"})
        );
        Ok(())
    }

    #[test]
    fn request_tolerates_missing_fields() -> anyhow::Result<()> {
        let request: ProcessImageRequest = serde_json::from_str(r#"{"mimeType":"image/png"}"#)?;
        assert_eq!(request.image_data_url, None);
        assert_eq!(request.mime_type.as_deref(), Some("image/png"));
        Ok(())
    }

    #[test]
    fn response_bodies_match_wire_shape() -> anyhow::Result<()> {
        let ok = serde_json::to_value(ProcessImageSuccess {
            image_data: "data:image/png;base64,AAAA".to_string(),
        })?;
        assert_eq!(ok, json!({"imageData": "data:image/png;base64,AAAA"}));
        let err = serde_json::to_value(ErrorBody::new("nope"))?;
        assert_eq!(err, json!({"error": "nope"}));
        Ok(())
    }
}
