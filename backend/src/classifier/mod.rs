pub mod config;
pub mod model;
pub mod preprocess;

use std::path::PathBuf;

use image::DynamicImage;

pub use config::LabelSet;
pub use model::TorchClassifier;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid model configuration {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid label table: {0}")]
    Labels(String),
    #[error("Invalid preprocessor configuration: {0}")]
    Preprocessor(String),
    #[error("Model error: {0}")]
    Model(#[from] tch::TchError),
    #[error("Unexpected model output: {0}")]
    Output(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub index: usize,
    pub label: String,
    pub confidence: f32,
}

/// An image classifier loaded once at startup and shared read-only
/// between requests.
pub trait Classifier: Send + Sync {
    fn classify(&self, image: &DynamicImage) -> Result<Prediction, ClassifierError>;

    fn labels(&self) -> &LabelSet;
}
