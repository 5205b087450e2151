// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use crate::event::Event;

/// Static key/value annotations merged into every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    entries: Vec<(String, String)>,
}

impl Enrichment {
    #[must_use]
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// Parses comma-separated `key=value` pairs, e.g. `host=web,env=prod`.
    ///
    /// Only the first `=` separates key from value. Empty segments are ignored.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut entries: Vec<(String, String)> = Vec::new();
        for segment in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .filter(|(key, _)| !key.trim().is_empty())
                .ok_or_else(|| ConfigError::InvalidEnrichment(segment.to_string()))?;
            let key = key.trim().to_string();
            // a repeated key keeps its first position and takes the last value
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value.to_string(),
                None => entries.push((key, value.to_string())),
            }
        }
        Ok(Self { entries })
    }

    /// Merges every entry into the event; entries win over existing fields.
    pub fn apply(&self, event: &mut Event) {
        for (key, value) in &self.entries {
            event.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enrichment_overrides_existing_field() {
        let enrichment = Enrichment::parse("host=h1").unwrap();
        let mut event =
            Event::from_value(json!({"line": "x", "host": "h0", "name": "web1"})).unwrap();
        enrichment.apply(&mut event);

        assert_eq!(event.get("host"), Some(&json!("h1")));
        let keys: Vec<&String> = event.fields().keys().collect();
        assert_eq!(keys, vec!["line", "host", "name"]);
    }

    #[test]
    fn test_enrichment_appends_new_fields_in_order() {
        let enrichment = Enrichment::parse("host=myhost, env=prod").unwrap();
        let mut event = Event::log("hello", "web1", "nginx");
        enrichment.apply(&mut event);

        let keys: Vec<&String> = event.fields().keys().collect();
        assert_eq!(keys, vec!["line", "name", "image", "host", "env"]);
    }

    #[test]
    fn test_parse() {
        assert!(Enrichment::parse("").unwrap().is_empty());
        assert_eq!(
            Enrichment::parse("url=http://x?a=b,,").unwrap().entries(),
            &[("url".to_string(), "http://x?a=b".to_string())]
        );
        assert_eq!(
            Enrichment::parse("a=1,b=2,a=3").unwrap().entries(),
            &[
                ("a".to_string(), "3".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
        assert!(matches!(
            Enrichment::parse("host"),
            Err(ConfigError::InvalidEnrichment(_))
        ));
        assert!(Enrichment::parse("=value").is_err());
    }
}
