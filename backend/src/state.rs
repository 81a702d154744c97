use std::sync::Arc;

use crate::classifier::Classifier;
use crate::explain::Explainer;

/// Built once in `main` and shared read-only by every worker.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<dyn Classifier>,
    pub explainer: Arc<dyn Explainer>,
    pub upload_limit_bytes: usize,
}

impl AppState {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        explainer: Arc<dyn Explainer>,
        upload_limit_bytes: usize,
    ) -> Self {
        Self {
            classifier,
            explainer,
            upload_limit_bytes,
        }
    }
}
