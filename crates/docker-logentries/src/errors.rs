// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for configuration, connection and forwarding.

/// Errors detected while building the configuration, before any connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port '{0}': must be an integer between 1 and 65535")]
    InvalidPort(String),

    #[error("Invalid boolean '{value}' for {name}")]
    InvalidBool { name: &'static str, value: String },

    #[error("Invalid number '{value}' for {name}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("Invalid regular expression for {name}: {source}")]
    InvalidPattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid log level '{0}': expected trace, debug, info, warn or error")]
    InvalidLogLevel(String),

    #[error("Invalid enrichment entry '{0}': expected key=value")]
    InvalidEnrichment(String),

    #[error("you should enable either stats, logs or dockerEvents")]
    NoChannelEnabled,

    #[error("Unable to reach metadata service at {url}: {source}")]
    MetadataUnreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Metadata service at {url} answered with status {status}")]
    MetadataStatus { url: String, status: u16 },

    #[error("Unable to parse metadata response: {0}")]
    MetadataParse(String),
}

/// Errors raised while establishing a transport to the remote endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connection to {target} failed: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {target} timed out")]
    Timeout { target: String },

    #[error("peer {target} could not be authenticated: {reason}")]
    Untrusted { target: String, reason: String },

    #[error("invalid server name '{0}'")]
    InvalidServerName(String),
}

impl ConnectError {
    /// Whether retrying the connection can ever succeed.
    ///
    /// Trust failures are never retried: sending data to a peer whose identity
    /// could not be verified is refused outright.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectError::Untrusted { .. } | ConnectError::InvalidServerName(_)
        )
    }
}

/// Fatal errors that stop the forwarder.
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Unable to open source {path}: {source}")]
    Source {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::InvalidPort("http".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid port 'http': must be an integer between 1 and 65535"
        );
        assert_eq!(
            ConfigError::NoChannelEnabled.to_string(),
            "you should enable either stats, logs or dockerEvents"
        );
    }

    #[test]
    fn test_connect_error_fatality() {
        let io = ConnectError::Io {
            target: "localhost:80".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(!io.is_fatal());
        assert!(!ConnectError::Timeout {
            target: "localhost:80".to_string()
        }
        .is_fatal());
        assert!(ConnectError::Untrusted {
            target: "localhost:443".to_string(),
            reason: "UnknownIssuer".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn test_forwarder_error_is_transparent() {
        let error: ForwarderError = ConfigError::NoChannelEnabled.into();
        assert_eq!(
            error.to_string(),
            "you should enable either stats, logs or dockerEvents"
        );
    }
}
