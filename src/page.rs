//! A single page of search results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, SearchError};

/// One response from the search endpoint.
///
/// The body must be a JSON object with an `entries` array. Entry contents
/// are opaque and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct SearchPage {
    raw: Value,
}

impl SearchPage {
    /// Wraps a decoded response body, checking the `entries` contract.
    pub fn from_value(raw: Value) -> Result<Self> {
        match raw.get("entries") {
            Some(Value::Array(_)) => Ok(Self { raw }),
            Some(_) => Err(SearchError::Parse("`entries` is not an array".into())),
            None => Err(SearchError::Parse("response has no `entries` field".into())),
        }
    }

    /// Decodes a page from response bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: Value = serde_json::from_slice(bytes)?;
        Self::from_value(raw)
    }

    /// Builds a page holding the given entries.
    pub fn with_entries(entries: Vec<Value>) -> Self {
        Self {
            raw: serde_json::json!({ "entries": entries }),
        }
    }

    /// The result entries of this page.
    pub fn entries(&self) -> &[Value] {
        self.raw
            .get("entries")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of entries on this page.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// An empty page marks the end of the result set.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// The full response body.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Consumes the page, returning the full response body.
    pub fn into_raw(self) -> Value {
        self.raw
    }
}

impl TryFrom<Value> for SearchPage {
    type Error = SearchError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<SearchPage> for Value {
    fn from(page: SearchPage) -> Self {
        page.raw
    }
}
