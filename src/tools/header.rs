//! Flat key/value header that carries tool parameters between runs.
//!
//! Keys are `"<tool>.<parameter>"`, values are JSON. The whole header renders
//! as one comment line, `# {...}`, suitable as the first line of a saved
//! spectrum table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header(BTreeMap<String, Value>);

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(tool: &str, parameter: &str) -> String {
        format!("{tool}.{parameter}")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// `# {json}`; an empty header still renders as `# {}`.
    pub fn to_line(&self) -> String {
        let body = serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string());
        format!("# {body}")
    }

    /// Parse a line written by [`Header::to_line`].
    ///
    /// Anything that is not a `#`-prefixed JSON object yields an empty header.
    pub fn parse_line(line: &str) -> Self {
        let Some(body) = line.trim_start().strip_prefix('#') else {
            return Self::default();
        };
        serde_json::from_str(body.trim()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn line_round_trip() {
        let mut h = Header::new();
        h.insert(Header::key("smooth.boxcar", "width"), json!(7.5));
        h.insert(Header::key("width.pew", "limits"), json!([[4000.0, 4200.0]]));
        let line = h.to_line();
        assert!(line.starts_with("# {"));
        assert_eq!(Header::parse_line(&line), h);
    }

    #[test]
    fn malformed_line_gives_empty_header() {
        assert!(Header::parse_line("wave flux").is_empty());
        assert!(Header::parse_line("# not json").is_empty());
        assert!(Header::parse_line("# [1, 2]").is_empty());
    }
}
