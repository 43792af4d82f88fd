use crate::{backend::InferenceOutput, error::ClassifyError, labels::LabelSet};
use serde::Serialize;
use std::{fmt, str::FromStr};

/// Slack allowed above 1.0 before scores stop counting as probabilities.
const PROBABILITY_TOLERANCE: f32 = 1e-4;

/// What the model's output layer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreActivation {
    /// Scores are already probabilities (the model ends in softmax)
    #[default]
    Identity,
    /// Scores are logits; softmax is applied before decoding
    Softmax,
}

impl FromStr for ScoreActivation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "identity" | "none" | "probabilities" => Ok(Self::Identity),
            "softmax" | "logits" => Ok(Self::Softmax),
            other => Err(format!(
                "{} is not a supported score activation. Use `identity` or `softmax`.",
                other
            )),
        }
    }
}

/// How a prediction is rendered for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Label,
    LabelWithConfidence,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "label" => Ok(Self::Label),
            "label_with_confidence" | "confidence" => Ok(Self::LabelWithConfidence),
            other => Err(format!(
                "{} is not a supported output format. Use `label` or `label_with_confidence`.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class_index: usize,
    pub label: String,
    /// Probability of the winning class, in `[0, 1]`
    pub confidence: f32,
    /// Full distribution over the label set
    pub scores: Vec<f32>,
}

impl Prediction {
    pub fn format(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Label => self.label.clone(),
            OutputFormat::LabelWithConfidence => {
                format!("{} ({:.2})", self.label, self.confidence)
            }
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(OutputFormat::LabelWithConfidence))
    }
}

pub struct PostProcessor {
    pub activation: ScoreActivation,
}

impl PostProcessor {
    pub fn new(activation: ScoreActivation) -> Self {
        Self { activation }
    }

    /// Reduce a forward-pass output to the winning label.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn decode(
        &self,
        output: &InferenceOutput,
        labels: &LabelSet,
    ) -> Result<Prediction, ClassifyError> {
        let scores = class_scores(output).map_err(ClassifyError::Inference)?;

        if scores.len() != labels.len() {
            return Err(ClassifyError::Inference(format!(
                "model produced {} scores for {} labels",
                scores.len(),
                labels.len()
            )));
        }

        decode_scores(scores, labels, self.activation)
    }
}

/// Strip the batch axis from a batch-of-one output.
///
/// Accepts `[N]`, `[1, N]` and any shape whose leading dimensions are all 1.
pub fn class_scores(output: &InferenceOutput) -> Result<Vec<f32>, String> {
    let shape = output.scores.shape();

    let Some((&num_classes, leading)) = shape.split_last() else {
        return Err("model produced a scalar output".to_string());
    };

    if leading.iter().any(|&d| d != 1) {
        return Err(format!(
            "expected a single-image output, got shape {:?}",
            shape
        ));
    }

    if num_classes == 0 {
        return Err("model produced an empty score vector".to_string());
    }

    Ok(output.scores.iter().copied().collect())
}

/// Apply the activation, take the argmax and look up its label.
pub fn decode_scores(
    scores: Vec<f32>,
    labels: &LabelSet,
    activation: ScoreActivation,
) -> Result<Prediction, ClassifyError> {
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ClassifyError::Inference(
            "model produced non-finite scores".to_string(),
        ));
    }

    let scores = match activation {
        ScoreActivation::Identity => scores,
        ScoreActivation::Softmax => softmax(&scores),
    };

    let (class_index, max_score) = argmax(&scores)
        .ok_or_else(|| ClassifyError::Inference("model produced no scores".to_string()))?;

    if !(-PROBABILITY_TOLERANCE..=1.0 + PROBABILITY_TOLERANCE).contains(&max_score) {
        return Err(ClassifyError::Inference(format!(
            "top score {} is not a probability; configure the softmax activation for logit outputs",
            max_score
        )));
    }

    let label = labels.get(class_index).ok_or_else(|| {
        ClassifyError::Inference(format!("class index {} has no label", class_index))
    })?;

    Ok(Prediction {
        class_index,
        label: label.to_string(),
        confidence: max_score.clamp(0.0, 1.0),
        scores,
    })
}

/// Index and value of the largest score; the lowest index wins ties.
#[inline]
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        match best {
            Some((_, max)) if score <= max => {}
            _ => best = Some((i, score)),
        }
    }
    best
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
