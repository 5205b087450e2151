// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Routing policy: which events pass, and with which destination token.
//!
//! Every event kind routes to its own token. A kind whose token is empty is
//! disabled and its events are dropped. Events that have a token must then
//! clear four independent identity checks against the container name and
//! image:
//!
//! - `match_by_name` / `match_by_image`: the field must match when set
//! - `skip_by_name` / `skip_by_image`: the field must not match when set
//!
//! Patterns are compiled once when the policy is built. An empty pattern
//! disables its check.

use regex::Regex;
use tracing::trace;

use crate::errors::ConfigError;
use crate::event::{Event, Kind};

/// Destination token per event kind, `None` when the kind is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokens {
    pub logs: Option<String>,
    pub stats: Option<String>,
    pub events: Option<String>,
}

impl Tokens {
    /// Builds tokens from raw strings, treating empty or blank strings as unset.
    #[must_use]
    pub fn new(logs: Option<String>, stats: Option<String>, events: Option<String>) -> Self {
        Self {
            logs: non_empty(logs),
            stats: non_empty(stats),
            events: non_empty(events),
        }
    }

    #[must_use]
    pub fn for_kind(&self, kind: Kind) -> Option<&str> {
        match kind {
            Kind::Log => self.logs.as_deref(),
            Kind::Stats => self.stats.as_deref(),
            Kind::Lifecycle => self.events.as_deref(),
        }
    }

    /// Fills every unset token with `fallback`.
    #[must_use]
    pub fn or_fallback(self, fallback: Option<&str>) -> Self {
        let fallback = non_empty(fallback.map(str::to_string));
        Self {
            logs: self.logs.or_else(|| fallback.clone()),
            stats: self.stats.or_else(|| fallback.clone()),
            events: self.events.or(fallback),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_none() && self.stats.is_none() && self.events.is_none()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Raw include/exclude patterns as read from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patterns {
    pub match_by_name: Option<String>,
    pub match_by_image: Option<String>,
    pub skip_by_name: Option<String>,
    pub skip_by_image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    tokens: Tokens,
    match_by_name: Option<Regex>,
    match_by_image: Option<Regex>,
    skip_by_name: Option<Regex>,
    skip_by_image: Option<Regex>,
}

impl RoutingPolicy {
    pub fn new(tokens: Tokens, patterns: &Patterns) -> Result<Self, ConfigError> {
        Ok(Self {
            tokens,
            match_by_name: compile("matchByName", patterns.match_by_name.as_deref())?,
            match_by_image: compile("matchByImage", patterns.match_by_image.as_deref())?,
            skip_by_name: compile("skipByName", patterns.skip_by_name.as_deref())?,
            skip_by_image: compile("skipByImage", patterns.skip_by_image.as_deref())?,
        })
    }

    pub fn tokens(&self) -> &Tokens {
        &self.tokens
    }

    /// Returns the token to forward `event` with, or `None` to drop it.
    pub fn route(&self, event: &Event) -> Option<&str> {
        let Some(kind) = event.kind() else {
            trace!("Dropping event without line, type or stats");
            return None;
        };
        let Some(token) = self.tokens.for_kind(kind) else {
            trace!("Dropping {} event: no token configured", kind);
            return None;
        };
        if !self.admits(&event.name(), &event.image()) {
            trace!("Dropping {} event for {}: filtered out", kind, event.name());
            return None;
        }
        Some(token)
    }

    /// Applies the four identity checks; every configured check must hold.
    pub fn admits(&self, name: &str, image: &str) -> bool {
        let included =
            |re: &Option<Regex>, value: &str| re.as_ref().map_or(true, |re| re.is_match(value));
        let excluded =
            |re: &Option<Regex>, value: &str| re.as_ref().is_some_and(|re| re.is_match(value));

        included(&self.match_by_name, name)
            && included(&self.match_by_image, image)
            && !excluded(&self.skip_by_name, name)
            && !excluded(&self.skip_by_image, image)
    }
}

fn compile(name: &'static str, pattern: Option<&str>) -> Result<Option<Regex>, ConfigError> {
    match pattern {
        None | Some("") => Ok(None),
        Some(pattern) => Regex::new(pattern)
            .map(Some)
            .map_err(|source| ConfigError::InvalidPattern { name, source }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn logs_only(token: &str) -> Tokens {
        Tokens::new(Some(token.to_string()), None, None)
    }

    fn policy(patterns: Patterns) -> RoutingPolicy {
        RoutingPolicy::new(logs_only("LT1"), &patterns).unwrap()
    }

    #[test]
    fn test_token_routing() {
        let policy = policy(Patterns::default());
        assert_eq!(policy.route(&Event::log("hello", "web1", "nginx")), Some("LT1"));
        assert_eq!(
            policy.route(&Event::stats(json!({"cpu": 3}), "web1", "nginx")),
            None
        );
        assert_eq!(policy.route(&Event::lifecycle("start", "web1", "nginx")), None);
    }

    #[test]
    fn test_each_kind_uses_its_token() {
        let tokens = Tokens::new(
            Some("L".to_string()),
            Some("S".to_string()),
            Some("E".to_string()),
        );
        let policy = RoutingPolicy::new(tokens, &Patterns::default()).unwrap();
        assert_eq!(policy.route(&Event::log("x", "a", "b")), Some("L"));
        assert_eq!(policy.route(&Event::stats(json!({}), "a", "b")), Some("S"));
        assert_eq!(policy.route(&Event::lifecycle("die", "a", "b")), Some("E"));
    }

    #[test]
    fn test_event_without_kind_is_dropped() {
        let policy = policy(Patterns::default());
        let event = Event::from_value(json!({"name": "web1", "image": "nginx"})).unwrap();
        assert_eq!(policy.route(&event), None);
    }

    #[test]
    fn test_match_by_name() {
        let policy = policy(Patterns {
            match_by_name: Some("^web".to_string()),
            ..Default::default()
        });
        assert_eq!(policy.route(&Event::log("x", "web-1", "nginx")), Some("LT1"));
        assert_eq!(policy.route(&Event::log("x", "db-1", "nginx")), None);
    }

    #[test]
    fn test_skip_by_image() {
        let policy = policy(Patterns {
            skip_by_image: Some("nginx".to_string()),
            ..Default::default()
        });
        assert_eq!(policy.route(&Event::log("hello", "web1", "nginx")), None);
        assert_eq!(policy.route(&Event::log("hello", "web1", "redis")), Some("LT1"));
    }

    #[test]
    fn test_missing_name_and_image_match_as_empty_text() {
        let event = Event::from_value(json!({"line": "x"})).unwrap();

        let skip = policy(Patterns {
            skip_by_name: Some("undefined".to_string()),
            skip_by_image: Some(".+".to_string()),
            ..Default::default()
        });
        assert_eq!(skip.route(&event), Some("LT1"));

        let require = policy(Patterns {
            match_by_name: Some("^$".to_string()),
            ..Default::default()
        });
        assert_eq!(require.route(&event), Some("LT1"));

        let require_image = policy(Patterns {
            match_by_image: Some(".".to_string()),
            ..Default::default()
        });
        assert_eq!(require_image.route(&event), None);
    }

    #[test]
    fn test_empty_pattern_is_inactive() {
        let policy = policy(Patterns {
            match_by_name: Some(String::new()),
            skip_by_name: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(policy.route(&Event::log("x", "anything", "any")), Some("LT1"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = RoutingPolicy::new(
            logs_only("LT1"),
            &Patterns {
                skip_by_name: Some("(".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidPattern {
                name: "skipByName",
                ..
            })
        ));
    }

    #[test]
    fn test_tokens_fallback() {
        let tokens = Tokens::new(Some("L".to_string()), Some(" ".to_string()), None)
            .or_fallback(Some("F"));
        assert_eq!(tokens.for_kind(Kind::Log), Some("L"));
        assert_eq!(tokens.for_kind(Kind::Stats), Some("F"));
        assert_eq!(tokens.for_kind(Kind::Lifecycle), Some("F"));
        assert!(Tokens::default().or_fallback(Some("")).is_empty());
    }

    // Each check is either unset, set and matching, or set and not matching.
    #[derive(Debug, Clone, Copy)]
    enum Check {
        Unset,
        Matching,
        NotMatching,
    }

    fn check() -> impl Strategy<Value = Check> {
        prop_oneof![Just(Check::Unset), Just(Check::Matching), Just(Check::NotMatching)]
    }

    fn pattern(check: Check) -> Option<String> {
        match check {
            Check::Unset => None,
            Check::Matching => Some("^target".to_string()),
            Check::NotMatching => Some("^other".to_string()),
        }
    }

    proptest! {
        #[test]
        fn filter_truth_table(
            match_name in check(),
            match_image in check(),
            skip_name in check(),
            skip_image in check(),
        ) {
            let policy = policy(Patterns {
                match_by_name: pattern(match_name),
                match_by_image: pattern(match_image),
                skip_by_name: pattern(skip_name),
                skip_by_image: pattern(skip_image),
            });
            let expected = !matches!(match_name, Check::NotMatching)
                && !matches!(match_image, Check::NotMatching)
                && !matches!(skip_name, Check::Matching)
                && !matches!(skip_image, Check::Matching);

            let routed = policy.route(&Event::log("x", "target-name", "target-image"));
            prop_assert_eq!(routed.is_some(), expected);
        }
    }
}
