//! Execution state threaded through a graph run.

use crate::error::StepError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mapping from string keys to JSON values, shared by every step of a run.
///
/// The engine imposes no schema; each step reads the keys it needs and
/// writes the keys it produces.
///
/// # Examples
///
/// ```
/// use amime_core::State;
/// use serde_json::json;
///
/// let mut state = State::new();
/// state.insert("x", 1);
/// state.insert("input_data", json!({"task": "sort a list"}));
///
/// assert_eq!(state.get("x"), Some(&json!(1)));
/// assert!(state.require_str("x").is_err());
/// assert!(state.contains_key("input_data"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    data: Map<String, Value>,
}

impl State {
    /// Creates a new empty state.
    pub fn new() -> Self {
        Self { data: Map::new() }
    }

    /// Inserts a value with the given key.
    ///
    /// If the key already exists, the previous value is replaced and
    /// returned.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    /// Returns a reference to the value for the given key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns a mutable reference to the value for the given key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    /// Returns the value for `key`, or [`StepError::MissingKey`].
    pub fn require(&self, key: &str) -> Result<&Value, StepError> {
        self.data
            .get(key)
            .ok_or_else(|| StepError::MissingKey(key.to_string()))
    }

    /// Returns the string stored under `key`.
    ///
    /// Fails with [`StepError::MissingKey`] when absent and
    /// [`StepError::InvalidValue`] when the value is not a string.
    pub fn require_str(&self, key: &str) -> Result<&str, StepError> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| StepError::InvalidValue {
                key: key.to_string(),
                expected: "a string",
            })
    }

    /// Returns the object stored under `key`.
    pub fn require_object(&self, key: &str) -> Result<&Map<String, Value>, StepError> {
        self.require(key)?
            .as_object()
            .ok_or_else(|| StepError::InvalidValue {
                key: key.to_string(),
                expected: "an object",
            })
    }

    /// Removes a value by key and returns it.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Returns `true` if the state contains a value for the given key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns an iterator over all keys in the state.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Returns an iterator over all entries in the state.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    /// Returns the number of entries in the state.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the state contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Removes all entries from the state.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Consumes the state and returns the underlying map.
    pub fn into_map(self) -> Map<String, Value> {
        self.data
    }
}

impl From<Map<String, Value>> for State {
    fn from(data: Map<String, Value>) -> Self {
        Self { data }
    }
}

impl From<State> for Value {
    fn from(state: State) -> Self {
        Value::Object(state.data)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for State {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            data: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
