//! Character models as returned by the upstream API.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// One character exactly as the upstream returned it.
///
/// Only `id` is interpreted; everything else is kept verbatim so the stored
/// copy is always the fetched content.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRecord {
    id: i64,
    raw: Map<String, Value>,
}

impl UpstreamRecord {
    /// Build a record from a decoded JSON value.
    ///
    /// Returns `None` unless the value is an object with an integer `id`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(raw) => {
                let id = raw.get("id")?.as_i64()?;
                Some(Self { id, raw })
            }
            _ => None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// The `name` attribute, if the upstream sent one.
    pub fn name(&self) -> Option<&str> {
        self.raw.get("name").and_then(Value::as_str)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Serialize the record back to its JSON form.
    pub fn to_json(&self) -> String {
        Value::Object(self.raw.clone()).to_string()
    }
}

impl Serialize for UpstreamRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

/// Filter parameters accepted by `/characters` and forwarded upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterFilter {
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

impl CharacterFilter {
    /// Query pairs to forward upstream, skipping unset and blank values.
    pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("species", self.species.as_deref()),
            ("status", self.status.as_deref()),
            ("origin", self.origin.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|v| (k, v))
        })
        .collect()
    }
}
