//! Kickoff input mapping

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// String-keyed input handed to a kickoff and threaded through its stages.
///
/// This is a value type: cloning produces a fully independent deep copy, so
/// a kickoff or parallel branch that owns a clone can never observe writes
/// made through another one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KickoffInput(Map<String, Value>);

impl KickoffInput {
    /// Create an empty input
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build an input from a JSON value.
    ///
    /// Returns `None` unless the value is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Insert or overwrite a key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a string value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Look up an integer value
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the input has no keys
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merge structured stage output into this input.
    ///
    /// Keys from `structured` overwrite existing keys, so merging several
    /// outputs one after another leaves the last writer's value in place.
    pub fn merge(&mut self, structured: &Map<String, Value>) {
        for (key, value) in structured {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying map
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Render as a JSON object value
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for KickoffInput {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for KickoffInput {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Build a [`KickoffInput`] from a `serde_json::json!` object literal.
///
/// Non-object literals yield an empty input.
#[macro_export]
macro_rules! kickoff_input {
    ($($json:tt)+) => {
        $crate::pipeline::KickoffInput::from_value(::serde_json::json!($($json)+))
            .unwrap_or_default()
    };
}
