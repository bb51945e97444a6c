//! Stage output produced by work units

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::metrics::{MetricsMap, UsageMetrics};

/// Output from a single work unit or route selector invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Structured result merged into the next stage's input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Map<String, Value>>,
    /// Unprocessed result text
    #[serde(default)]
    pub raw: String,
    /// Usage contributions keyed by producer
    #[serde(default, skip_serializing_if = "MetricsMap::is_empty")]
    pub usage_metrics: MetricsMap,
}

impl StageOutput {
    /// Create an output carrying only raw text
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            raw: text.into(),
            ..Self::default()
        }
    }

    /// Create an output from a structured JSON object.
    ///
    /// The raw text is the compact JSON rendering. Non-object values are kept
    /// only as raw text.
    pub fn structured(value: Value) -> Self {
        let raw = value.to_string();
        match value {
            Value::Object(map) => Self {
                structured: Some(map),
                raw,
                usage_metrics: MetricsMap::new(),
            },
            _ => Self::raw(raw),
        }
    }

    /// Replace the raw text
    pub fn with_raw(mut self, text: impl Into<String>) -> Self {
        self.raw = text.into();
        self
    }

    /// Record a usage contribution; repeated producers are summed
    pub fn with_usage(mut self, producer: impl Into<String>, metrics: UsageMetrics) -> Self {
        *self.usage_metrics.entry(producer.into()).or_default() += metrics;
        self
    }

    /// Whether there is structured output to merge
    pub fn has_structured(&self) -> bool {
        self.structured.as_ref().is_some_and(|m| !m.is_empty())
    }

    /// Look up a structured field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.structured.as_ref().and_then(|m| m.get(key))
    }

    /// Structured output as a JSON value, or the raw text as a string value
    pub fn to_value(&self) -> Value {
        match &self.structured {
            Some(map) => Value::Object(map.clone()),
            None => Value::String(self.raw.clone()),
        }
    }
}
