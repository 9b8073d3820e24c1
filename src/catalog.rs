//! Item metadata and the hit shape shared by every search entry point.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata stored next to an item's vector.
pub type Metadata = Map<String, Value>;

/// One ranked item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SearchHit {
    /// Title used as the rerank candidate text. Missing titles rank as empty.
    pub fn title(&self) -> &str {
        self.metadata
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<SearchHit>,
}

impl From<Vec<SearchHit>> for SearchResponse {
    fn from(items: Vec<SearchHit>) -> Self {
        Self { items }
    }
}

/// Metadata filter in the index's own expression language, forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterPredicate(pub Map<String, Value>);

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Invalid filters JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid filters JSON: filters must be a JSON object")]
    NotAnObject,
}

impl FilterPredicate {
    /// Parse a filter sent as a form string.
    ///
    /// Blank input means "no filter". Anything else must be a JSON object.
    pub fn parse(raw: &str) -> Result<Option<Self>, FilterError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Ok(Self::from_map(map)),
            _ => Err(FilterError::NotAnObject),
        }
    }

    /// `None` for an empty map, so callers never send `{}` to the index.
    pub fn from_map(map: Map<String, Value>) -> Option<Self> {
        if map.is_empty() {
            None
        } else {
            Some(Self(map))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Render a metadata value as plain text; `None` for null, blank or missing.
pub fn value_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| value_text(Some(item)))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
