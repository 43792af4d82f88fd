use super::{InferenceBackend, InferenceOutput};
use crate::config::ExecutionProvider;
use ndarray::{Array, IxDyn};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::path::Path;

/// ONNX Runtime session for a single-input, single-output classifier.
pub struct OrtBackend {
    session: Session,
}

impl OrtBackend {
    /// Load model with specified execution provider
    pub fn load_model_with_provider(
        path: &Path,
        provider: ExecutionProvider,
    ) -> anyhow::Result<Self> {
        if !path.is_file() {
            anyhow::bail!("model file {} does not exist", path.display());
        }

        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        #[allow(unused_mut)]
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        match provider {
            #[cfg(feature = "cuda")]
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])?;
            }
            #[cfg(not(feature = "cuda"))]
            ExecutionProvider::Cuda => {
                anyhow::bail!("CUDA execution provider requested but the `cuda` feature is disabled");
            }
            ExecutionProvider::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_file(path)?;

        tracing::info!(path = %path.display(), "Model loaded");
        Ok(Self { session })
    }
}

impl InferenceBackend for OrtBackend {
    fn load_model(path: &Path, provider: ExecutionProvider) -> anyhow::Result<Self> {
        Self::load_model_with_provider(path, provider)
    }

    fn infer(&mut self, input: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let scores = outputs[0].try_extract_array::<f32>()?;

        Ok(InferenceOutput {
            scores: scores.into_owned(),
        })
    }
}
