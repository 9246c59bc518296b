//! Corpus sample records.
//!
//! A sample is one JSON object from a shard line. The raw object is kept
//! as-is so it can be written back verbatim next to the wrapped unit; the
//! accessors below give a typed view of the fields the pipeline reads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One snippet record with its provenance metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample {
    raw: Map<String, Value>,
}

impl Sample {
    pub fn from_map(raw: Map<String, Value>) -> Self {
        Self { raw }
    }

    /// Parse a single JSON line. Invalid UTF-8 is a parse error.
    pub fn from_json(line: impl AsRef<[u8]>) -> serde_json::Result<Self> {
        serde_json::from_slice(line.as_ref())
    }

    /// The underlying JSON object.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Provenance URL, `<class-path>#L<start>-L<end>`.
    pub fn url(&self) -> Option<&str> {
        self.raw.get("url").and_then(Value::as_str)
    }

    /// Snippet body: `code` if present, else `function`.
    pub fn code(&self) -> Option<&str> {
        self.first_present(&["code", "function"])
    }

    /// Project identifier: `repo` if present, else `nwo`.
    pub fn project(&self) -> Option<&str> {
        self.first_present(&["repo", "nwo"])
    }

    /// Number of entries in `function_tokens`, if the field is a sequence.
    pub fn token_count(&self) -> Option<usize> {
        self.raw
            .get("function_tokens")
            .and_then(Value::as_array)
            .map(Vec::len)
    }

    /// First field of `keys` that is present wins, even when it is not a string.
    fn first_present(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.raw.get(*k))
            .and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for Sample {
    fn from(raw: Map<String, Value>) -> Self {
        Self::from_map(raw)
    }
}
