use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::analysis::VqaResult;
use crate::error::AnalysisError;
use crate::models::VisualQa;

/// Default answer length limit.
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Free-text questions about one or more registered images.
pub struct VqaService {
    model: Arc<dyn VisualQa>,
}

impl VqaService {
    pub fn new(model: Arc<dyn VisualQa>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Answer a trimmed, non-empty `question` about existing image files.
    pub async fn answer(
        &self,
        paths: &[PathBuf],
        question: &str,
        max_tokens: usize,
    ) -> Result<VqaResult, AnalysisError> {
        let started = Instant::now();

        let model = self.model_name().to_string();
        let result = VqaResult::new(question, model.clone());

        match self.model.answer(paths, question, max_tokens).await {
            Ok(answer) => {
                debug!(images = paths.len(), model = %model, "Question answered");
                Ok(result.complete(answer, paths.len(), started))
            }
            Err(e) => {
                let err = e.into_model_error(&model);
                warn!(images = paths.len(), error = %err, "Visual question answering failed");
                Ok(result.fail(err.to_string()))
            }
        }
    }
}
