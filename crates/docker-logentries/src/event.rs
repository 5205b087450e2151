// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Events flowing from container sources to the remote collector.
//!
//! An event is a JSON object whose fields keep their insertion order, so the
//! serialized record mirrors the order in which the source produced them. The
//! kind of an event is not tagged explicitly by sources: it is resolved from
//! which payload field is present (`line`, `type` or `stats`).

use serde_json::{Map, Value};

/// Kind of an event, resolved from its payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Container log line, carries `line`.
    Log,
    /// Resource usage sample, carries `stats`.
    Stats,
    /// Runtime lifecycle event, carries `type`.
    Lifecycle,
}

impl Kind {
    pub const fn field(self) -> &'static str {
        match self {
            Kind::Log => "line",
            Kind::Stats => "stats",
            Kind::Lifecycle => "type",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kind::Log => write!(f, "log"),
            Kind::Stats => write!(f, "stats"),
            Kind::Lifecycle => write!(f, "lifecycle"),
        }
    }
}

/// A single event record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    #[must_use]
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builds an event from a JSON value, `None` unless it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    #[must_use]
    pub fn log(line: &str, name: &str, image: &str) -> Self {
        Self::with_payload("line", Value::from(line), name, image)
    }

    #[must_use]
    pub fn stats(stats: Value, name: &str, image: &str) -> Self {
        Self::with_payload("stats", stats, name, image)
    }

    #[must_use]
    pub fn lifecycle(kind: &str, name: &str, image: &str) -> Self {
        Self::with_payload("type", Value::from(kind), name, image)
    }

    fn with_payload(field: &str, payload: Value, name: &str, image: &str) -> Self {
        let mut fields = Map::new();
        fields.insert(field.to_string(), payload);
        fields.insert("name".to_string(), Value::from(name));
        fields.insert("image".to_string(), Value::from(image));
        Self { fields }
    }

    /// Resolves the kind of this event.
    ///
    /// A payload field only counts when it holds a truthy value: an empty
    /// `line` does not make a log event. When several are present, `line`
    /// wins over `type`, which wins over `stats`. Events without any payload
    /// have no kind and are never forwarded.
    #[must_use]
    pub fn kind(&self) -> Option<Kind> {
        [Kind::Log, Kind::Lifecycle, Kind::Stats]
            .into_iter()
            .find(|kind| self.fields.get(kind.field()).is_some_and(is_truthy))
    }

    /// Container name coerced to text, empty when absent.
    #[must_use]
    pub fn name(&self) -> String {
        self.text("name")
    }

    /// Container image coerced to text, empty when absent.
    #[must_use]
    pub fn image(&self) -> String {
        self.text("image")
    }

    fn text(&self, field: &str) -> String {
        match self.fields.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field, replacing the previous value in place.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
