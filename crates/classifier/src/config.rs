use crate::postprocessing::{OutputFormat, ScoreActivation};
use preprocess::{Normalization, PreprocessConfig, ResizeMode, TensorLayout};
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

const DEFAULT_MODEL_PATH: &str = "models/residue/model.onnx";
const DEFAULT_LABELS_PATH: &str = "models/residue/labels.txt";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda,
}

impl FromStr for ExecutionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!(
                "{} is not a supported execution provider. Use `cpu` or `cuda`.",
                other
            )),
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionProvider::Cpu => f.write_str("cpu"),
            ExecutionProvider::Cuda => f.write_str("cuda"),
        }
    }
}

/// Everything that is bound to one deployed model artifact.
///
/// Resolution, resize mode, normalization and layout have to match how the
/// model was trained and exported. The defaults describe the 180x180 residue
/// model fed stretched `[0, 1]` inputs; a 224x224 model fed center-cropped
/// `[-1, 1]` inputs is a separate deployment with its own values.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub preprocess: PreprocessConfig,
    pub activation: ScoreActivation,
    pub output_format: OutputFormat,
    pub execution_provider: ExecutionProvider,
    pub timeout: Duration,
}

impl ClassifierConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Values that are set but do not parse are errors; falling back to a
    /// default would bind the model to the wrong preprocessing.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let model_path = env::var("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_path);

        let labels_path = env::var("LABELS_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.labels_path);

        let input_width =
            parse_var::<u32>("INPUT_WIDTH")?.unwrap_or(defaults.preprocess.input_size.0);
        let input_height =
            parse_var::<u32>("INPUT_HEIGHT")?.unwrap_or(defaults.preprocess.input_size.1);

        if input_width == 0 || input_height == 0 {
            anyhow::bail!("input size must be non-zero, got {}x{}", input_width, input_height);
        }

        let timeout_ms = parse_var::<u64>("INFERENCE_TIMEOUT_MS")?.unwrap_or(DEFAULT_TIMEOUT_MS);

        Ok(Self {
            model_path,
            labels_path,
            preprocess: PreprocessConfig {
                input_size: (input_width, input_height),
                resize: parse_var::<ResizeMode>("RESIZE_MODE")?
                    .unwrap_or(defaults.preprocess.resize),
                normalization: parse_var::<Normalization>("NORMALIZATION")?
                    .unwrap_or(defaults.preprocess.normalization),
                layout: parse_var::<TensorLayout>("TENSOR_LAYOUT")?
                    .unwrap_or(defaults.preprocess.layout),
            },
            activation: parse_var("SCORE_ACTIVATION")?.unwrap_or(defaults.activation),
            output_format: parse_var("OUTPUT_FORMAT")?.unwrap_or(defaults.output_format),
            execution_provider: parse_var("EXECUTION_PROVIDER")?
                .unwrap_or(defaults.execution_provider),
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: PathBuf::from(DEFAULT_LABELS_PATH),
            preprocess: PreprocessConfig::default(),
            activation: ScoreActivation::default(),
            output_format: OutputFormat::default(),
            execution_provider: ExecutionProvider::default(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

fn parse_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", name, value, e)),
        Err(_) => Ok(None),
    }
}
