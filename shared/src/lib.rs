use serde::{Deserialize, Serialize};

pub const DETECTED_MESSAGE: &str = "Successfully Detected";
pub const NO_IMAGE_ERROR: &str = "No image uploaded";

/// Body returned by `POST /api/identify-disease`.
///
/// A success carries `message`, `image`, `detected`, `cause` and
/// `recommendation`. A missing upload carries only `error`, any other
/// failure only `message`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IdentifyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl IdentifyResponse {
    pub fn detected(
        image: String,
        detected: String,
        cause: String,
        recommendation: String,
    ) -> Self {
        Self {
            success: true,
            message: Some(DETECTED_MESSAGE.to_string()),
            error: None,
            image: Some(image),
            detected: Some(detected),
            cause: Some(cause),
            recommendation: Some(recommendation),
        }
    }

    pub fn missing_input(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            image: None,
            detected: None,
            cause: None,
            recommendation: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            error: None,
            image: None,
            detected: None,
            cause: None,
            recommendation: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub labels: usize,
}
