//! Model and training configuration.

use std::{borrow::Cow, fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result, text::Padding};

/// Hyper-parameters of a [`SentimentCnn`](crate::SentimentCnn) and its training run.
///
/// Every field has a default, so a config file only lists what it overrides:
///
/// ```json
/// {
///   "window_sizes": [1, 2],
///   "learning_rate": 0.05,
///   "epochs": 20
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// One convolution per window size, in words.
    pub window_sizes: Vec<usize>,
    pub n_classes: usize,
    pub learning_rate: f64,
    /// Weights of the convolutions and the output layer start in `[-init_range, init_range)`.
    pub init_range: f64,
    /// Lower bound on the target-class probability when seeding its gradient.
    pub result_threshold: f64,
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub epochs: usize,
    /// Running loss is logged every this many examples.
    pub log_every: usize,
    /// Share of the samples held out for evaluation.
    pub test_split: f64,
    /// Class names by index; empty means classes are only known by index.
    pub classes: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            window_sizes: vec![1, 2, 3],
            n_classes: 5,
            learning_rate: 0.03,
            init_range: 0.01,
            result_threshold: 0.001,
            min_tokens: 3,
            max_tokens: 64,
            epochs: 10,
            log_every: 100,
            test_split: 0.2,
            classes: Vec::new(),
        }
    }
}

impl ModelConfig {
    /// Reads a JSON config from `path` and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(Error::InvalidConfig(message.to_string()));
        if self.window_sizes.is_empty() {
            return invalid("window_sizes must not be empty");
        }
        if self.window_sizes.contains(&0) {
            return invalid("window sizes must be positive");
        }
        if self.n_classes < 2 {
            return invalid("n_classes must be at least 2");
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return invalid("learning_rate must be positive");
        }
        if self.init_range.is_nan() || self.init_range <= 0.0 {
            return invalid("init_range must be positive");
        }
        if !(0.0..1.0).contains(&self.result_threshold) || self.result_threshold == 0.0 {
            return invalid("result_threshold must be in (0, 1)");
        }
        let largest_window = self.window_sizes.iter().copied().max().unwrap_or(1);
        if self.min_tokens < largest_window {
            return Err(Error::InvalidConfig(format!(
                "min_tokens ({}) must be at least the largest window size ({largest_window})",
                self.min_tokens
            )));
        }
        if self.max_tokens < self.min_tokens {
            return invalid("max_tokens must be at least min_tokens");
        }
        if self.log_every == 0 {
            return invalid("log_every must be positive");
        }
        if !(0.0..1.0).contains(&self.test_split) {
            return invalid("test_split must be in [0, 1)");
        }
        if !self.classes.is_empty() {
            if self.classes.len() != self.n_classes {
                return Err(Error::InvalidConfig(format!(
                    "{} class names given for {} classes",
                    self.classes.len(),
                    self.n_classes
                )));
            }
            for (i, name) in self.classes.iter().enumerate() {
                if self.classes[..i].contains(name) {
                    return Err(Error::InvalidConfig(format!("duplicate class name {name:?}")));
                }
            }
        }
        Ok(())
    }

    pub fn padding(&self) -> Padding {
        Padding {
            min_tokens: self.min_tokens,
            max_tokens: self.max_tokens,
        }
    }

    /// Name of class `index`, or the index itself when no names are configured.
    pub fn class_name(&self, index: usize) -> Cow<'_, str> {
        match self.classes.get(index) {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(index.to_string()),
        }
    }

    /// Index of the class called `name`; unknown names fall back to class `0`.
    pub fn label_index(&self, name: &str) -> usize {
        if let Some(index) = self.classes.iter().position(|class| class == name) {
            return index;
        }
        if self.classes.is_empty()
            && let Ok(index) = name.parse::<usize>()
            && index < self.n_classes
        {
            return index;
        }
        warn!(label = name, "unknown class label, using class 0");
        0
    }
}
