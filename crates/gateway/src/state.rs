use classifier::{Classifier, ClassifyError, InferenceBackend, OutputFormat, Prediction};
use std::{sync::Arc, time::Duration};

/// Shared handler state: the loaded classifier and the per-request bound.
pub struct AppState<B: InferenceBackend> {
    pub classifier: Arc<Classifier<B>>,
    pub timeout: Duration,
}

impl<B: InferenceBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            classifier: Arc::clone(&self.classifier),
            timeout: self.timeout,
        }
    }
}

impl<B: InferenceBackend + Send + 'static> AppState<B> {
    pub fn new(classifier: Arc<Classifier<B>>, timeout: Duration) -> Self {
        Self {
            classifier,
            timeout,
        }
    }

    pub async fn classify(&self, bytes: Vec<u8>) -> Result<Prediction, ClassifyError> {
        self.classifier
            .classify_with_timeout(bytes, self.timeout)
            .await
    }

    pub fn output_format(&self) -> OutputFormat {
        self.classifier.output_format()
    }
}
