// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::connection::{ConnectionConfig, ReconnectPolicy};
use crate::enricher::Enrichment;
use crate::errors::ConfigError;
use crate::policy::{Patterns, RoutingPolicy, Tokens};
use crate::source::{Channel, STDIN_PATH};

pub const DEFAULT_SERVER: &str = "data.logentries.com";
pub const DEFAULT_PLAIN_PORT: u16 = 80;
pub const DEFAULT_SECURE_PORT: u16 = 443;
pub const DEFAULT_METADATA_URL: &str = "http://rancher-metadata/latest/self/container/labels";
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Where each channel reads its events from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePaths {
    pub logs: Option<String>,
    pub stats: Option<String>,
    pub events: Option<String>,
}

impl Default for SourcePaths {
    fn default() -> Self {
        Self {
            logs: Some(STDIN_PATH.to_string()),
            stats: None,
            events: None,
        }
    }
}

impl SourcePaths {
    pub fn for_channel(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Logs => self.logs.as_deref(),
            Channel::Stats => self.stats.as_deref(),
            Channel::DockerEvents => self.events.as_deref(),
        }
    }
}

/// Forwarder configuration. Built once at startup and never mutated after.
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination token per channel
    pub tokens: Tokens,
    /// Collector host name
    pub server: String,
    pub port: u16,
    /// Use TLS towards the collector
    pub secure: bool,
    /// Include/exclude patterns on container name and image
    pub patterns: Patterns,
    /// Static fields added to every event
    pub enrichment: Enrichment,
    pub logs: bool,
    pub stats: bool,
    pub docker_events: bool,
    /// Labels endpoint queried when no token is configured
    pub metadata_url: String,
    pub connect_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    /// Records buffered between the sources and the connection
    pub queue_capacity: usize,
    pub sources: SourcePaths,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tokens: Tokens::default(),
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PLAIN_PORT,
            secure: false,
            patterns: Patterns::default(),
            enrichment: Enrichment::default(),
            logs: true,
            stats: true,
            docker_events: true,
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            connect_timeout: None,
            reconnect: ReconnectPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sources: SourcePaths::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from `LOGENTRIES_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create configuration from any variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let tokens = Tokens::new(
            var("LOGENTRIES_LOGSTOKEN"),
            var("LOGENTRIES_STATSTOKEN"),
            var("LOGENTRIES_EVENTSTOKEN"),
        )
        .or_fallback(var("LOGENTRIES_TOKEN").as_deref());

        let secure = parse_bool("LOGENTRIES_SECURE", var("LOGENTRIES_SECURE"), false)?;
        let port = match var("LOGENTRIES_PORT") {
            Some(raw) => parse_port(&raw)?,
            None if secure => DEFAULT_SECURE_PORT,
            None => DEFAULT_PLAIN_PORT,
        };

        let patterns = Patterns {
            match_by_name: var("LOGENTRIES_MATCH_BY_NAME"),
            match_by_image: var("LOGENTRIES_MATCH_BY_IMAGE"),
            skip_by_name: var("LOGENTRIES_SKIP_BY_NAME"),
            skip_by_image: var("LOGENTRIES_SKIP_BY_IMAGE"),
        };

        let enrichment = match var("LOGENTRIES_ADD") {
            Some(raw) => Enrichment::parse(&raw)?,
            None => Enrichment::default(),
        };

        let connect_timeout = parse_millis("LOGENTRIES_CONNECT_TIMEOUT_MS", var("LOGENTRIES_CONNECT_TIMEOUT_MS"))?
            .filter(|timeout| !timeout.is_zero());
        let reconnect = ReconnectPolicy {
            max: parse_millis(
                "LOGENTRIES_RECONNECT_MAX_BACKOFF_MS",
                var("LOGENTRIES_RECONNECT_MAX_BACKOFF_MS"),
            )?
            .unwrap_or(defaults.reconnect.max),
            ..defaults.reconnect
        };
        let queue_capacity = match var("LOGENTRIES_QUEUE_CAPACITY") {
            Some(raw) => parse_number("LOGENTRIES_QUEUE_CAPACITY", &raw)?,
            None => DEFAULT_QUEUE_CAPACITY,
        };

        let sources = SourcePaths {
            logs: var("LOGENTRIES_LOGS_SOURCE").or(defaults.sources.logs),
            stats: var("LOGENTRIES_STATS_SOURCE"),
            events: var("LOGENTRIES_EVENTS_SOURCE"),
        };

        let config = Self {
            tokens,
            server: var("LOGENTRIES_SERVER").unwrap_or(defaults.server),
            port,
            secure,
            patterns,
            enrichment,
            logs: parse_bool("LOGENTRIES_LOGS", var("LOGENTRIES_LOGS"), true)?,
            stats: parse_bool("LOGENTRIES_STATS", var("LOGENTRIES_STATS"), true)?,
            docker_events: parse_bool(
                "LOGENTRIES_DOCKER_EVENTS",
                var("LOGENTRIES_DOCKER_EVENTS"),
                true,
            )?,
            metadata_url: var("LOGENTRIES_METADATA_URL").unwrap_or(defaults.metadata_url),
            connect_timeout,
            reconnect,
            queue_capacity,
            sources,
            log_level: var("LOGENTRIES_LOG_LEVEL")
                .map(|level| level.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port.to_string()));
        }
        if !(1..=MAX_QUEUE_CAPACITY).contains(&self.queue_capacity) {
            return Err(ConfigError::InvalidNumber {
                name: "LOGENTRIES_QUEUE_CAPACITY",
                value: self.queue_capacity.to_string(),
            });
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }
        // patterns are compiled here once so bad ones fail at startup
        RoutingPolicy::new(self.tokens.clone(), &self.patterns)?;
        Ok(())
    }

    /// A channel is active when its flag is on and it has a token.
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        let flag = match channel {
            Channel::Logs => self.logs,
            Channel::Stats => self.stats,
            Channel::DockerEvents => self.docker_events,
        };
        flag && self.tokens.for_kind(channel.kind()).is_some()
    }

    pub fn enabled_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|channel| self.channel_enabled(*channel))
            .collect()
    }

    #[must_use]
    pub fn with_tokens(self, tokens: Tokens) -> Self {
        Self { tokens, ..self }
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: self.connect_timeout,
            reconnect: self.reconnect,
        }
    }
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort(raw.to_string())),
    }
}

fn parse_bool(name: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool { name, value: raw }),
    }
}

fn parse_number(name: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: raw.to_string(),
        })
}

fn parse_millis(name: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    raw.map(|raw| parse_number(name, &raw).map(|ms| Duration::from_millis(ms as u64)))
        .transpose()
}
