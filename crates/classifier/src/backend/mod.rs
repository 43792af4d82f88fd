use crate::config::ExecutionProvider;
use ndarray::{Array, ArrayD, IxDyn};
use std::path::Path;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// Seam over the model runtime.
///
/// `infer` takes `&mut self` because runtimes such as ONNX Runtime need
/// exclusive access to a session while it runs; callers serialize access.
pub trait InferenceBackend {
    fn load_model(path: &Path, provider: ExecutionProvider) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Run one forward pass on a batch of size 1
    fn infer(&mut self, input: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput>;
}

#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub scores: ArrayD<f32>, // [1, num_classes] per-class scores
}
