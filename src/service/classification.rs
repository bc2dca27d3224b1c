use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::analysis::ClassificationResult;
use crate::error::AnalysisError;
use crate::models::Classifier;
use crate::registry::ImageEntity;
use crate::validation::validate_members;

/// Pathology classification of registered images.
pub struct ClassificationService {
    classifier: Arc<dyn Classifier>,
}

impl ClassificationService {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    pub fn model_name(&self) -> &str {
        self.classifier.model_name()
    }

    pub fn supported_pathologies(&self) -> &[String] {
        self.classifier.supported_pathologies()
    }

    /// Classify one registered image whose file is known to exist.
    ///
    /// `pathologies` restricts the reported scores; `None` or an empty list
    /// reports all of them. Findings at or above `threshold` (already
    /// checked to lie in [0, 1]) are positive.
    pub async fn classify(
        &self,
        entity: &ImageEntity,
        pathologies: Option<&[String]>,
        threshold: f64,
    ) -> Result<ClassificationResult, AnalysisError> {
        let started = Instant::now();

        let filter = match pathologies {
            Some(p) if !p.is_empty() => {
                Some(validate_members("pathologies", p, self.supported_pathologies())?)
            }
            _ => None,
        };

        let model = self.model_name().to_string();
        let result = ClassificationResult::new(model.clone(), threshold);

        match self.classifier.classify(&entity.path).await {
            Ok(mut scores) => {
                if let Some(filter) = filter {
                    scores.retain(|name, _| filter.contains(name));
                }
                debug!(
                    image_id = %entity.id,
                    model = %model,
                    scores = scores.len(),
                    "Classification completed"
                );
                Ok(result.complete(scores, started))
            }
            Err(e) => {
                let err = e.into_model_error(&model);
                warn!(image_id = %entity.id, error = %err, "Classification failed");
                Ok(result.fail(err.to_string()))
            }
        }
    }
}
