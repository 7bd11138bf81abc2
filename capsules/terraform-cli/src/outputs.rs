use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// A whole output line of the form `::{...}::`.
static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^::(\{.*\})::$").expect("marker pattern is valid"));

/// Variables captured from structured markers, kept in first-seen key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedVars {
    entries: Vec<(String, String)>,
}

impl CapturedVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or overwrite. A repeated key keeps its original position and
    /// takes the newer value; the previous value is returned.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Serialize for CapturedVars {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Marker {
    #[serde(default)]
    pub outputs: Map<String, Value>,
}

/// Parse a structured marker line.
///
/// Returns `None` when the line is ordinary output.
pub fn parse_marker(line: &str) -> Option<Result<Marker, serde_json::Error>> {
    let captures = MARKER.captures(line.trim())?;
    let body = captures.get(1)?.as_str();
    Some(serde_json::from_str(body))
}

/// Feeds output lines through the marker parser and accumulates variables.
#[derive(Debug, Default)]
pub struct OutputCollector {
    vars: CapturedVars,
}

impl OutputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&mut self, line: &str) {
        match parse_marker(line) {
            None => {}
            Some(Ok(marker)) => {
                for (key, value) in marker.outputs {
                    let value = match value {
                        Value::String(text) => text,
                        other => other.to_string(),
                    };
                    if let Some(previous) = self.vars.insert(key.clone(), value) {
                        debug!(key = %key, previous = %previous, "output variable overwritten");
                    }
                }
            }
            Some(Err(err)) => {
                warn!(error = %err, "ignoring malformed output marker");
            }
        }
    }

    pub fn vars(&self) -> &CapturedVars {
        &self.vars
    }

    pub fn into_vars(self) -> CapturedVars {
        self.vars
    }
}
