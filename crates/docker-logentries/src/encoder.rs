// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Token-prefixed line encoding used by the Logentries token TCP input.
//!
//! Each forwarded event becomes one record:
//!
//! ```text
//! <token> <json object>\n
//! ```

use crate::event::Event;

/// One encoded, newline-terminated record ready to be written to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record(String);

impl Record {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Encodes `event` under `token`.
#[must_use]
pub fn encode(token: &str, event: &Event) -> Record {
    // serializing a map of JSON values cannot fail
    let body = serde_json::Value::Object(event.fields().clone()).to_string();
    let mut line = String::with_capacity(token.len() + body.len() + 2);
    line.push_str(token);
    line.push(' ');
    line.push_str(&body);
    line.push('\n');
    Record(line)
}
