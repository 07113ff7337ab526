use serde_json::Value;
use std::fmt;

/// One segment of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeySegment {
    Text(String),
    Number(i64),
    Flag(bool),
}

impl From<&str> for KeySegment {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for KeySegment {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<u32> for KeySegment {
    fn from(value: u32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<bool> for KeySegment {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

/// Identity of a cached query: an ordered sequence of primitive segments.
///
/// Two keys address the same cache entry iff their canonical serializations
/// match, so the canonical form is the only thing the store ever indexes by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QueryKey {
    segments: Vec<KeySegment>,
}

impl QueryKey {
    #[must_use]
    pub fn root(name: &str) -> Self {
        Self {
            segments: vec![KeySegment::from(name)],
        }
    }

    /// Append a segment, e.g. `QueryKey::root("posts").push(page)`.
    #[must_use]
    pub fn push(mut self, segment: impl Into<KeySegment>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Canonical cache key: the JSON array rendering of the segments,
    /// e.g. `["posts",2]`. String escaping comes from `serde_json`, so
    /// segment text can never collide with the array syntax.
    #[must_use]
    pub fn canonical(&self) -> String {
        let values: Vec<Value> = self
            .segments
            .iter()
            .map(|segment| match segment {
                KeySegment::Text(text) => Value::String(text.clone()),
                KeySegment::Number(number) => Value::from(*number),
                KeySegment::Flag(flag) => Value::Bool(*flag),
            })
            .collect();
        Value::Array(values).to_string()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}
