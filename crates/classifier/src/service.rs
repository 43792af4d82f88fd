use crate::{
    backend::{InferenceBackend, InferenceOutput},
    config::ClassifierConfig,
    error::ClassifyError,
    labels::LabelSet,
    postprocessing::{OutputFormat, PostProcessor, Prediction, class_scores},
};
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, Meter},
};
use preprocess::{CpuPreProcessor, Preprocess, decode_image};
use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

struct Metrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    failures: Counter<u64>,
}

fn init_metrics(meter: &Meter) -> Metrics {
    let latency_buckets = [
        0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0,
    ];
    let duration = meter
        .f64_histogram("classification_duration_seconds")
        .with_description("Time to classify one image (decode + preprocess + infer + decode)")
        .with_unit("s")
        .with_boundaries(latency_buckets.to_vec())
        .build();
    let requests = meter
        .u64_counter("classification_requests_total")
        .with_description("Total classification requests")
        .build();
    let failures = meter
        .u64_counter("classification_failures_total")
        .with_description("Classification requests that failed, by error kind")
        .build();

    Metrics {
        duration,
        requests,
        failures,
    }
}

/// Point after which nobody is waiting for a request's result any more.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    fn after(timeout: Duration) -> Option<Self> {
        Instant::now()
            .checked_add(timeout)
            .map(|at| Self { at, timeout })
    }

    fn check(deadline: Option<Self>) -> Result<(), ClassifyError> {
        match deadline {
            Some(d) if Instant::now() >= d.at => Err(ClassifyError::Timeout(d.timeout)),
            _ => Ok(()),
        }
    }
}

/// Immutable handle over a loaded model and its label set.
///
/// Share it through an `Arc`; forward passes are serialized on an internal
/// lock while decoding, preprocessing and label lookup run concurrently.
pub struct Classifier<B: InferenceBackend> {
    backend: Mutex<B>,
    labels: LabelSet,
    preprocessor: CpuPreProcessor,
    postprocessor: PostProcessor,
    output_format: OutputFormat,
    metrics: Metrics,
}

impl<B: InferenceBackend> Classifier<B> {
    /// Load the model and label files named by `config`.
    pub fn load(config: &ClassifierConfig) -> Result<Self, ClassifyError> {
        tracing::info!(
            model_path = %config.model_path.display(),
            provider = %config.execution_provider,
            "Loading model"
        );
        let backend = B::load_model(&config.model_path, config.execution_provider).map_err(|e| {
            ClassifyError::Startup(format!(
                "failed to load model {}: {:#}",
                config.model_path.display(),
                e
            ))
        })?;

        let labels = LabelSet::load(&config.labels_path)?;

        Self::new(backend, labels, config)
    }

    /// Bind a loaded backend to its labels and preprocessing.
    ///
    /// Runs one warm-up forward pass on an all-zero input so a wrong input
    /// resolution or a label file that does not match the output layer is
    /// caught here rather than on the first request.
    pub fn new(
        mut backend: B,
        labels: LabelSet,
        config: &ClassifierConfig,
    ) -> Result<Self, ClassifyError> {
        let preprocessor = CpuPreProcessor::new(config.preprocess);

        let warmup = Array::<f32, IxDyn>::zeros(IxDyn(&preprocessor.input_shape()));
        let output = backend.infer(&warmup).map_err(|e| {
            ClassifyError::Startup(format!(
                "warm-up forward pass with input shape {:?} failed: {:#}",
                preprocessor.input_shape(),
                e
            ))
        })?;
        let outputs = class_scores(&output)
            .map_err(|e| ClassifyError::Startup(format!("unusable model output: {}", e)))?
            .len();

        if outputs != labels.len() {
            return Err(ClassifyError::Configuration {
                labels: labels.len(),
                outputs,
            });
        }

        tracing::info!(
            classes = outputs,
            input_shape = ?preprocessor.input_shape(),
            normalization = %config.preprocess.normalization,
            "Classifier ready"
        );

        Ok(Self {
            backend: Mutex::new(backend),
            labels,
            preprocessor,
            postprocessor: PostProcessor::new(config.activation),
            output_format: config.output_format,
            metrics: init_metrics(&global::meter("classifier")),
        })
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    /// Classify an encoded image (PNG, JPEG, ...).
    #[tracing::instrument(skip_all, fields(bytes = bytes.len()))]
    pub fn classify(&self, bytes: &[u8]) -> Result<Prediction, ClassifyError> {
        let start = Instant::now();
        let result = self.run(bytes, None);
        self.record(start, &result);
        result
    }

    /// Classify an already decoded image.
    #[tracing::instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn classify_image(&self, image: &DynamicImage) -> Result<Prediction, ClassifyError> {
        let start = Instant::now();
        let result = self.predict(image, None);
        self.record(start, &result);
        result
    }

    /// Classify and render the result for display.
    pub fn classify_text(&self, bytes: &[u8]) -> Result<String, ClassifyError> {
        self.classify(bytes)
            .map(|prediction| prediction.format(self.output_format))
    }

    fn run(&self, bytes: &[u8], deadline: Option<Deadline>) -> Result<Prediction, ClassifyError> {
        decode_image(bytes)
            .map_err(|e| ClassifyError::InvalidInput(format!("{:#}", e)))
            .and_then(|image| self.predict(&image, deadline))
    }

    fn predict(
        &self,
        image: &DynamicImage,
        deadline: Option<Deadline>,
    ) -> Result<Prediction, ClassifyError> {
        let input = self
            .preprocessor
            .preprocess_image(image)
            .map_err(|e| ClassifyError::InvalidInput(format!("{:#}", e)))?;
        Deadline::check(deadline)?;

        let output = self.forward(&input, deadline)?;
        let prediction = self.postprocessor.decode(&output, &self.labels)?;

        tracing::debug!(
            label = %prediction.label,
            confidence = prediction.confidence,
            "Image classified"
        );

        Ok(prediction)
    }

    fn forward(
        &self,
        input: &Array<f32, IxDyn>,
        deadline: Option<Deadline>,
    ) -> Result<InferenceOutput, ClassifyError> {
        let _infer_span = tracing::info_span!("model_inference").entered();

        let mut backend = self.backend.lock().map_err(|_| {
            ClassifyError::Inference("model backend poisoned by an earlier panic".to_string())
        })?;
        // The wait for the lock can outlast the caller
        Deadline::check(deadline)?;

        backend
            .infer(input)
            .map_err(|e| ClassifyError::Inference(format!("{:#}", e)))
    }

    fn record(&self, start: Instant, result: &Result<Prediction, ClassifyError>) {
        self.metrics.requests.add(1, &[]);
        match result {
            Ok(_) => self
                .metrics
                .duration
                .record(start.elapsed().as_secs_f64(), &[]),
            Err(e) => {
                tracing::warn!(error = %e, kind = e.kind(), "Classification failed");
                self.metrics
                    .failures
                    .add(1, &[KeyValue::new("kind", e.kind())]);
            }
        }
    }
}

impl<B: InferenceBackend + Send + 'static> Classifier<B> {
    /// Run [`Classifier::classify`] on the blocking pool, bounded by `timeout`.
    ///
    /// Once the deadline has passed the request stops before its forward
    /// pass. A forward pass already running when it expires finishes in the
    /// background and its result is dropped. Each call is recorded once.
    #[tracing::instrument(skip_all, fields(bytes = bytes.len()))]
    pub async fn classify_with_timeout(
        self: &Arc<Self>,
        bytes: Vec<u8>,
        timeout: Duration,
    ) -> Result<Prediction, ClassifyError> {
        let start = Instant::now();
        let deadline = Deadline::after(timeout);
        let classifier = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || classifier.run(&bytes, deadline));

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ClassifyError::Inference(format!(
                "classification task failed: {}",
                e
            ))),
            Err(_) => Err(ClassifyError::Timeout(timeout)),
        };

        self.record(start, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionProvider, postprocessing::OutputFormat};
    use image::{ImageFormat, Rgb, RgbImage};
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::{
        InMemoryMetricExporter, PeriodicReader, SdkMeterProvider,
        data::{AggregatedMetrics, MetricData, ResourceMetrics},
    };
    use std::{io::Cursor, path::Path};

    /// Stalls on any non-zero input, answers the startup pass immediately.
    struct StallingModel;

    impl InferenceBackend for StallingModel {
        fn load_model(_path: &Path, _provider: ExecutionProvider) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn infer(&mut self, input: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
            if input.iter().any(|&v| v != 0.0) {
                std::thread::sleep(Duration::from_millis(300));
            }
            Ok(InferenceOutput {
                scores: Array::from_elem(IxDyn(&[1, 2]), 0.5),
            })
        }
    }

    fn png() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        RgbImage::from_pixel(4, 4, Rgb([80, 80, 80]))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn counter_total(metrics: &[ResourceMetrics], name: &str) -> u64 {
        metrics
            .last()
            .into_iter()
            .flat_map(|rm| rm.scope_metrics())
            .flat_map(|sm| sm.metrics())
            .filter(|m| m.name() == name)
            .map(|m| match m.data() {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                    sum.data_points().map(|dp| dp.value()).sum()
                }
                _ => 0,
            })
            .sum()
    }

    fn histogram_count(metrics: &[ResourceMetrics], name: &str) -> u64 {
        metrics
            .last()
            .into_iter()
            .flat_map(|rm| rm.scope_metrics())
            .flat_map(|sm| sm.metrics())
            .filter(|m| m.name() == name)
            .map(|m| match m.data() {
                AggregatedMetrics::F64(MetricData::Histogram(histogram)) => {
                    histogram.data_points().map(|dp| dp.count()).sum()
                }
                _ => 0,
            })
            .sum()
    }

    #[tokio::test]
    async fn timed_out_request_is_recorded_once() {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();

        let labels = LabelSet::new(vec!["a".to_string(), "b".to_string()]).unwrap();
        let config = ClassifierConfig {
            output_format: OutputFormat::Label,
            ..ClassifierConfig::default()
        };
        let mut classifier = Classifier::new(StallingModel, labels, &config).unwrap();
        classifier.metrics = init_metrics(&provider.meter("classifier-test"));
        let classifier = Arc::new(classifier);

        let err = classifier
            .classify_with_timeout(png(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Timeout(_)), "got {:?}", err);

        // Let the abandoned forward pass run to completion
        tokio::time::sleep(Duration::from_millis(600)).await;

        provider.force_flush().unwrap();
        let metrics = exporter.get_finished_metrics().unwrap();

        assert_eq!(counter_total(&metrics, "classification_requests_total"), 1);
        assert_eq!(counter_total(&metrics, "classification_failures_total"), 1);
        assert_eq!(histogram_count(&metrics, "classification_duration_seconds"), 0);
    }

    #[test]
    fn expired_deadline_is_a_timeout() {
        let deadline = Deadline::after(Duration::ZERO);

        assert!(matches!(
            Deadline::check(deadline),
            Err(ClassifyError::Timeout(t)) if t == Duration::ZERO
        ));
        assert!(Deadline::check(Deadline::after(Duration::from_secs(60))).is_ok());
        assert!(Deadline::check(None).is_ok());
    }
}
