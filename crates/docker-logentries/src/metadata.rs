// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Token lookup from the container metadata service.
//!
//! Only consulted when no token was configured at all. The service answers
//! with a JSON object of the container's labels.

use std::time::Duration;

use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::ConfigError;
use crate::policy::Tokens;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Token labels of the container. Any other label is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenLabels {
    #[serde(rename = "logentries.token")]
    pub token: Option<String>,
    #[serde(rename = "logentries.logstoken")]
    pub logs: Option<String>,
    #[serde(rename = "logentries.statstoken")]
    pub stats: Option<String>,
    #[serde(rename = "logentries.eventstoken")]
    pub events: Option<String>,
}

impl TokenLabels {
    /// Channel specific labels win over `logentries.token`.
    #[must_use]
    pub fn into_tokens(self) -> Tokens {
        Tokens::new(self.logs, self.stats, self.events).or_fallback(self.token.as_deref())
    }
}

pub async fn fetch_labels(client: &reqwest::Client, url: &str) -> Result<TokenLabels, ConfigError> {
    let response = client
        .get(url)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|source| ConfigError::MetadataUnreachable {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ConfigError::MetadataStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|source| ConfigError::MetadataUnreachable {
            url: url.to_string(),
            source,
        })?;
    serde_json::from_slice(&body).map_err(|e| ConfigError::MetadataParse(e.to_string()))
}

/// Returns `config` unchanged when it carries a token, otherwise a copy with
/// the tokens found in the metadata service labels.
pub async fn resolve_tokens(config: Config) -> Result<Config, ConfigError> {
    if !config.tokens.is_empty() {
        return Ok(config);
    }

    info!(
        "No token configured, looking up container labels at {}",
        config.metadata_url
    );
    let client = reqwest::Client::builder()
        .timeout(METADATA_TIMEOUT)
        .build()
        .map_err(|source| ConfigError::MetadataUnreachable {
            url: config.metadata_url.clone(),
            source,
        })?;
    let labels = fetch_labels(&client, &config.metadata_url).await?;
    let tokens = labels.into_tokens();
    debug!(
        "Metadata tokens: logs={} stats={} events={}",
        tokens.logs.is_some(),
        tokens.stats.is_some(),
        tokens.events.is_some()
    );
    Ok(config.with_tokens(tokens))
}
