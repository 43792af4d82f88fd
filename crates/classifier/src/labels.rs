use crate::error::ClassifyError;
use std::{fs, path::Path};

/// Ordered class names; position `i` names the model's output `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new(labels: Vec<String>) -> Result<Self, ClassifyError> {
        if labels.is_empty() {
            return Err(ClassifyError::Startup("label set is empty".to_string()));
        }

        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                tracing::warn!(label = %label, index = i, "Duplicate label in label set");
            }
        }

        Ok(Self { labels })
    }

    /// Load a label file: one label per line, in model output order.
    ///
    /// Surrounding whitespace (including `\r`) is trimmed and blank lines are
    /// skipped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClassifyError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ClassifyError::Startup(format!(
                "failed to read label file {}: {}",
                path.display(),
                e
            ))
        })?;

        let labels = Self::parse(&contents)?;
        tracing::debug!(path = %path.display(), count = labels.len(), "Loaded labels");
        Ok(labels)
    }

    pub fn parse(contents: &str) -> Result<Self, ClassifyError> {
        Self::new(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}
