use std::time::Duration;
use thiserror::Error;

/// Failure kinds of the classification pipeline.
///
/// `Startup` and `Configuration` are raised while loading and must stop the
/// process from serving. The remaining kinds are per request.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("label set has {labels} entries but the model produces {outputs} scores")]
    Configuration { labels: usize, outputs: usize },

    #[error("invalid input image: {0}")]
    InvalidInput(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl ClassifyError {
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            ClassifyError::Startup(_) | ClassifyError::Configuration { .. }
        )
    }

    /// Short stable name, used as a metric attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifyError::Startup(_) => "startup",
            ClassifyError::Configuration { .. } => "configuration",
            ClassifyError::InvalidInput(_) => "invalid_input",
            ClassifyError::Inference(_) => "inference",
            ClassifyError::Timeout(_) => "timeout",
        }
    }
}
