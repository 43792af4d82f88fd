pub mod backend;
pub mod config;
pub mod error;
pub mod labels;
pub mod postprocessing;
pub mod service;

// Re-export commonly used types for convenience
pub use backend::{InferenceBackend, InferenceOutput};
pub use config::{ClassifierConfig, ExecutionProvider};
pub use error::ClassifyError;
pub use labels::LabelSet;
pub use postprocessing::{OutputFormat, Prediction, ScoreActivation};
pub use service::Classifier;
