// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transports to the remote collector: plain TCP or TLS over TCP.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::errors::{ConnectError, ForwarderError};

/// A connected, bidirectional byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Establishes new transports to a fixed endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// `host:port` of the endpoint, for diagnostics.
    fn target(&self) -> &str;

    async fn connect(&self) -> Result<BoxedTransport, ConnectError>;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    target: String,
}

impl TcpConnector {
    #[must_use]
    pub fn new(server: &str, port: u16) -> Self {
        Self {
            target: format!("{}:{}", server, port),
        }
    }

    async fn connect_tcp(&self) -> Result<TcpStream, ConnectError> {
        let stream = TcpStream::connect(&self.target)
            .await
            .map_err(|source| ConnectError::Io {
                target: self.target.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", self.target, e);
        }
        Ok(stream)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn target(&self) -> &str {
        &self.target
    }

    async fn connect(&self) -> Result<BoxedTransport, ConnectError> {
        Ok(Box::new(self.connect_tcp().await?))
    }
}

/// TLS connector that refuses any peer whose certificate does not verify.
#[derive(Clone)]
pub struct TlsConnector {
    tcp: TcpConnector,
    server_name: ServerName<'static>,
    tls: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Builds a connector trusting the platform's native root certificates.
    pub fn with_native_roots(server: &str, port: u16) -> Result<Self, ForwarderError> {
        let loaded = rustls_native_certs::load_native_certs();
        for e in &loaded.errors {
            warn!("Failed to load a native root certificate: {}", e);
        }
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
        debug!("Loaded {added} native root certificates ({ignored} ignored)");
        if roots.is_empty() {
            return Err(ForwarderError::Tls(
                "no trusted root certificates available".to_string(),
            ));
        }
        let config = client_config(roots)?;
        Ok(Self::with_config(server, port, Arc::new(config))?)
    }

    pub fn with_config(
        server: &str,
        port: u16,
        config: Arc<ClientConfig>,
    ) -> Result<Self, ConnectError> {
        let server_name = ServerName::try_from(server.to_string())
            .map_err(|_| ConnectError::InvalidServerName(server.to_string()))?;
        Ok(Self {
            tcp: TcpConnector::new(server, port),
            server_name,
            tls: tokio_rustls::TlsConnector::from(config),
        })
    }
}

/// Client configuration verifying peers against `roots`, ring provider.
pub fn client_config(roots: RootCertStore) -> Result<ClientConfig, ForwarderError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ForwarderError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

#[async_trait]
impl Connector for TlsConnector {
    fn target(&self) -> &str {
        self.tcp.target()
    }

    async fn connect(&self) -> Result<BoxedTransport, ConnectError> {
        let stream = self.tcp.connect_tcp().await?;
        let tls_stream = self
            .tls
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| handshake_error(self.target(), e))?;
        Ok(Box::new(tls_stream))
    }
}

/// Classifies a failed handshake.
///
/// Certificate problems mean the peer identity could not be verified, which
/// is never retried. Anything else is an ordinary transport failure.
fn handshake_error(target: &str, error: std::io::Error) -> ConnectError {
    let tls_error = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());
    match tls_error {
        Some(
            e @ (rustls::Error::InvalidCertificate(_)
            | rustls::Error::NoCertificatesPresented
            | rustls::Error::InvalidCertRevocationList(_)),
        ) => ConnectError::Untrusted {
            target: target.to_string(),
            reason: e.to_string(),
        },
        _ => ConnectError::Io {
            target: target.to_string(),
            source: error,
        },
    }
}
