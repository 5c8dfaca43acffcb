//! Per-provider stamp weights.
//!
//! Weights arrive from scorer configuration as numbers or strings
//! (`"1.25"`). Parsing is lenient: a leading numeric prefix is used, and
//! anything unparseable, negative or non-finite counts as zero.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A weight as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightValue {
    /// Numeric weight.
    Number(f64),
    /// Weight written as text.
    Text(String),
    /// Anything else (null, objects); always zero.
    Other(serde_json::Value),
}

impl From<f64> for WeightValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for WeightValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for WeightValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl WeightValue {
    /// Numeric value, zero when unusable.
    pub fn value(&self) -> f64 {
        let raw = match self {
            Self::Number(n) => *n,
            Self::Text(text) => parse_leading_float(text).unwrap_or(0.0),
            Self::Other(_) => 0.0,
        };
        if raw.is_finite() && raw > 0.0 {
            raw
        } else {
            0.0
        }
    }
}

/// Parse the longest numeric prefix of `text` (`"2.5 pts"` → 2.5).
fn parse_leading_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    (1..=end)
        .rev()
        .filter(|i| trimmed.is_char_boundary(*i))
        .find_map(|i| trimmed[..i].parse::<f64>().ok())
}

/// Round to two decimals for display.
pub fn display_weight(weight: f64) -> f64 {
    (weight * 100.0).round() / 100.0
}

/// Provider id → weight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StampWeights(BTreeMap<String, WeightValue>);

impl StampWeights {
    /// Empty weight set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a provider's weight.
    pub fn insert(&mut self, provider: impl Into<String>, weight: impl Into<WeightValue>) {
        self.0.insert(provider.into(), weight.into());
    }

    /// Builder form of [`StampWeights::insert`].
    pub fn with(mut self, provider: impl Into<String>, weight: impl Into<WeightValue>) -> Self {
        self.insert(provider, weight);
        self
    }

    /// Weight of a provider; zero when absent or unparseable.
    pub fn weight(&self, provider: &str) -> f64 {
        self.0.get(provider).map(WeightValue::value).unwrap_or(0.0)
    }

    /// Weight rounded to two decimals.
    pub fn display(&self, provider: &str) -> f64 {
        display_weight(self.weight(provider))
    }

    /// Whether the provider counts towards the score.
    pub fn includes(&self, provider: &str) -> bool {
        self.weight(provider) > 0.0
    }

    /// Number of configured providers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no weights are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<WeightValue>> FromIterator<(K, V)> for StampWeights {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
