pub mod gemini;

use async_trait::async_trait;

pub use gemini::GeminiClient;

pub const NO_CAUSE: &str = "No cause found";
pub const NO_RECOMMENDATION: &str = "No recommendation found";

#[derive(Debug, thiserror::Error)]
pub enum ExplanationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("Generative API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// A text-generation backend. `Ok(None)` means the service answered but
/// produced no usable text.
#[async_trait]
pub trait Explainer: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Option<String>, ExplanationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub cause: String,
    pub recommendation: String,
}

pub fn cause_prompt(label: &str) -> String {
    format!("Explain the cause of {} in full detail.", label)
}

pub fn recommendation_prompt(label: &str) -> String {
    format!("Provide full recommendations for managing {}.", label)
}

/// Asks for the cause, then the recommendation. Either failure aborts.
pub async fn explain(
    explainer: &dyn Explainer,
    label: &str,
) -> Result<Explanation, ExplanationError> {
    let cause = explainer
        .generate(&cause_prompt(label))
        .await?
        .unwrap_or_else(|| NO_CAUSE.to_string());

    let recommendation = explainer
        .generate(&recommendation_prompt(label))
        .await?
        .unwrap_or_else(|| NO_RECOMMENDATION.to_string());

    Ok(Explanation {
        cause,
        recommendation,
    })
}
