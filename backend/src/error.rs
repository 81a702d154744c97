use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::{IdentifyResponse, NO_IMAGE_ERROR};

use crate::classifier::ClassifierError;
use crate::explain::ExplanationError;

/// Everything that can abort an identification request. Only a missing
/// upload is the caller's fault; the rest are reported as server errors
/// carrying the underlying message.
#[derive(Debug, thiserror::Error)]
pub enum IdentifyError {
    #[error("{}", NO_IMAGE_ERROR)]
    MissingImage,
    #[error("Multipart error: {0}")]
    Multipart(String),
    #[error("Uploaded image exceeds the {limit} byte limit")]
    ImageTooLarge { limit: usize },
    #[error("Cannot identify image file: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to encode image as JPEG: {0}")]
    Encode(#[source] image::ImageError),
    #[error(transparent)]
    Classification(#[from] ClassifierError),
    #[error(transparent)]
    Explanation(#[from] ExplanationError),
    #[error("Worker pool error: {0}")]
    Worker(#[from] actix_web::error::BlockingError),
}

impl ResponseError for IdentifyError {
    fn status_code(&self) -> StatusCode {
        match self {
            IdentifyError::MissingImage => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            IdentifyError::MissingImage => IdentifyResponse::missing_input(NO_IMAGE_ERROR),
            other => IdentifyResponse::failure(other.to_string()),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
