//! Per-request parameter bags.
//!
//! A [`ParameterBag`] holds the raw values a caller supplied for one
//! render+execute cycle. Values are kept as text exactly as received; the
//! mapper normalizes them into [`ParamValue`]s when it needs structure.

use serde_json::Value;
use std::collections::BTreeMap;

/// Raw caller parameters, keyed by name.
///
/// `None` marks a name the caller sent explicitly without a value. Keys are
/// ordered so that logging the bag is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterBag {
    values: BTreeMap<String, Option<String>>,
}

impl ParameterBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to a raw string value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), Some(value.into()));
    }

    /// Bind `name` to an explicit null.
    pub fn insert_null(&mut self, name: impl Into<String>) {
        self.values.insert(name.into(), None);
    }

    /// Look up a bound, non-null value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.as_deref())
    }

    /// Iterate over every entry, including explicit nulls.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterBag
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = Self::new();
        for (k, v) in iter {
            bag.insert(k, v);
        }
        bag
    }
}

/// A parameter after parse-or-fallback normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// The raw text parsed as JSON.
    Structured(Value),
    /// Text that is not JSON, kept verbatim.
    Raw(String),
}

impl ParamValue {
    /// Parse `raw` as structured data, falling back to the raw text.
    ///
    /// Scalars count too: `"5"` binds the number 5 and `"false"` the
    /// boolean, so tests like `<if test="active">` see typed values.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Raw(raw.to_string()),
        }
    }

    /// View the value as JSON for expression evaluation.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Structured(v) => v.clone(),
            Self::Raw(s) => Value::String(s.clone()),
        }
    }
}
