// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Always-on output connection to the remote collector.
//!
//! ```text
//!            connect ok
//! Connecting ──────────▶ Open ──┐ remote EOF / transport error
//!     ▲                         │ (shutdown not requested)
//!     └─────────────────────────┘
//!
//! shutdown requested in any state ──▶ Closed (final)
//! ```
//!
//! A close that was not requested by the shutdown coordinator leads straight
//! back to connecting against the same endpoint. The record whose write
//! failed is kept and written first on the next transport; records still
//! waiting in the queue are untouched. Failed connect attempts are retried
//! with a bounded exponential backoff. A trust failure during the TLS
//! handshake is returned as a fatal error and never retried.
//!
//! Shutdown disables reconnection first. Records already queued at that
//! point are still written, over the open transport or a single final
//! connection, before the transport is closed.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::encoder::Record;
use crate::errors::ConnectError;
use crate::transport::{BoxedTransport, Connector};

const READ_BUFFER_SIZE: usize = 512;

/// Delay between consecutive failed connect attempts.
///
/// The first attempt after a close is always immediate. A zero `max`
/// retries without any delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay after `failures` consecutive failed attempts.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = failures.saturating_sub(1).min(16);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Upper bound on a single connect attempt, TLS handshake included.
    pub connect_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

/// Counters reported when the connection shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub records_written: u64,
    pub bytes_written: u64,
    pub connections: u64,
    pub failed_attempts: u64,
}

impl ForwardStats {
    pub fn reconnects(&self) -> u64 {
        self.connections.saturating_sub(1)
    }
}

/// Why an open transport stopped being used.
#[derive(Debug)]
enum Closed {
    /// Shutdown requested; queued records were flushed.
    Shutdown,
    /// Every producer is gone and the queue is empty.
    Drained,
    /// The peer closed the connection.
    Remote,
    /// Reading from or writing to the transport failed.
    Failed(std::io::Error),
}

/// What woke the forwarding loop up.
enum Step {
    Shutdown,
    Read(std::io::Result<usize>),
    Record(Option<Record>),
}

pub struct ResilientConnection<C> {
    connector: C,
    config: ConnectionConfig,
    stats: ForwardStats,
}

impl<C: Connector> ResilientConnection<C> {
    #[must_use]
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        Self {
            connector,
            config,
            stats: ForwardStats::default(),
        }
    }

    pub fn target(&self) -> &str {
        self.connector.target()
    }

    /// Drains `records` into the endpoint until `shutdown` is cancelled or
    /// every producer has gone away.
    ///
    /// Transport failures are absorbed by reconnecting. Only fatal connect
    /// errors are returned.
    pub async fn run(
        mut self,
        mut records: mpsc::Receiver<Record>,
        shutdown: CancellationToken,
    ) -> Result<ForwardStats, ConnectError> {
        let mut pending: Option<Record> = None;
        loop {
            let connected = tokio::select! {
                biased;
                () = shutdown.cancelled() => None,
                transport = self.connect() => Some(transport?),
            };
            let transport = match connected {
                Some(transport) => transport,
                None => match self.last_attempt(&mut records, &mut pending).await? {
                    Some(transport) => transport,
                    None => break,
                },
            };
            self.stats.connections += 1;
            if self.stats.connections == 1 {
                info!("Connected to {}", self.target());
            } else {
                debug!("Reconnected to {}", self.target());
            }

            match self
                .forward(transport, &mut records, &mut pending, &shutdown)
                .await
            {
                Closed::Shutdown | Closed::Drained => break,
                Closed::Remote => debug!("{} closed the connection", self.target()),
                Closed::Failed(e) => debug!("Connection to {} failed: {}", self.target(), e),
            }
        }
        if pending.is_some() {
            debug!("Dropping one unwritten record at shutdown");
        }
        debug!(
            records = self.stats.records_written,
            reconnects = self.stats.reconnects(),
            "Output connection closed"
        );
        Ok(self.stats)
    }

    /// Connects, retrying transient failures until success or a fatal error.
    async fn connect(&mut self) -> Result<BoxedTransport, ConnectError> {
        let mut failures: u32 = 0;
        loop {
            match self.attempt().await {
                Ok(transport) => return Ok(transport),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    self.stats.failed_attempts += 1;
                    let delay = self.config.reconnect.delay(failures);
                    warn!(attempt = failures, "{}, retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Once shutdown is requested, connects a single time, and only if
    /// records are still waiting to be written.
    async fn last_attempt(
        &self,
        records: &mut mpsc::Receiver<Record>,
        pending: &mut Option<Record>,
    ) -> Result<Option<BoxedTransport>, ConnectError> {
        if pending.is_none() {
            *pending = records.try_recv().ok();
        }
        if pending.is_none() {
            return Ok(None);
        }
        match self.attempt().await {
            Ok(transport) => Ok(Some(transport)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!("Dropping queued records at shutdown: {}", e);
                Ok(None)
            }
        }
    }

    async fn attempt(&self) -> Result<BoxedTransport, ConnectError> {
        match self.config.connect_timeout {
            None => self.connector.connect().await,
            Some(limit) => tokio::time::timeout(limit, self.connector.connect())
                .await
                .map_err(|_| ConnectError::Timeout {
                    target: self.target().to_string(),
                })?,
        }
    }

    async fn forward(
        &mut self,
        transport: BoxedTransport,
        records: &mut mpsc::Receiver<Record>,
        pending: &mut Option<Record>,
        shutdown: &CancellationToken,
    ) -> Closed {
        let (mut reader, mut writer) = tokio::io::split(transport);

        if let Some(record) = pending.take() {
            if let Err(e) = self.write(&mut writer, &record).await {
                *pending = Some(record);
                return Closed::Failed(e);
            }
        }

        let mut discard = [0u8; READ_BUFFER_SIZE];
        loop {
            let step = tokio::select! {
                biased;
                () = shutdown.cancelled() => Step::Shutdown,
                read = reader.read(&mut discard) => Step::Read(read),
                record = records.recv() => Step::Record(record),
            };
            match step {
                Step::Shutdown => {
                    self.flush_queued(&mut writer, records).await;
                    return Closed::Shutdown;
                }
                Step::Read(Ok(0)) => return Closed::Remote,
                Step::Read(Ok(n)) => trace!("Discarding {} bytes sent by {}", n, self.target()),
                Step::Read(Err(e)) => return Closed::Failed(e),
                Step::Record(None) => {
                    close(&mut writer).await;
                    return Closed::Drained;
                }
                Step::Record(Some(record)) => {
                    if let Err(e) = self.write(&mut writer, &record).await {
                        *pending = Some(record);
                        return Closed::Failed(e);
                    }
                }
            }
        }
    }

    /// Writes whatever is already queued, then closes the transport.
    async fn flush_queued<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        records: &mut mpsc::Receiver<Record>,
    ) {
        while let Ok(record) = records.try_recv() {
            if let Err(e) = self.write(writer, &record).await {
                debug!("Dropping queued records at shutdown: {}", e);
                return;
            }
        }
        close(writer).await;
    }

    async fn write<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        record: &Record,
    ) -> std::io::Result<()> {
        writer.write_all(record.as_bytes()).await?;
        writer.flush().await?;
        self.stats.records_written += 1;
        self.stats.bytes_written += record.len() as u64;
        Ok(())
    }
}

async fn close<W: AsyncWrite + Unpin>(writer: &mut W) {
    if let Err(e) = writer.shutdown().await {
        trace!("Error closing transport: {}", e);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    use crate::event::Event;
    use crate::encoder::encode;

    /// Hands out prepared connect outcomes in order, then refuses.
    #[derive(Clone, Default)]
    struct ScriptedConnector {
        outcomes: Arc<Mutex<VecDeque<Result<BoxedTransport, ConnectError>>>>,
        attempts: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn push_transport(&self) -> DuplexStream {
            let (client, server) = tokio::io::duplex(4096);
            self.outcomes
                .lock()
                .unwrap()
                .push_back(Ok(Box::new(client)));
            server
        }

        fn push_error(&self, error: ConnectError) {
            self.outcomes.lock().unwrap().push_back(Err(error));
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn target(&self) -> &str {
            "collector:10000"
        }

        async fn connect(&self) -> Result<BoxedTransport, ConnectError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.outcomes.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(refused()))
        }
    }

    fn refused() -> ConnectError {
        ConnectError::Io {
            target: "collector:10000".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        }
    }

    fn fast_retries() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: None,
            reconnect: ReconnectPolicy {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(5),
            },
        }
    }

    fn record(line: &str) -> Record {
        encode("T", &Event::log(line, "web", "nginx"))
    }

    async fn read_line(reader: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    }

    #[test]
    fn test_reconnect_policy_delay() {
        let policy = ReconnectPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(10), Duration::from_secs(1));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(1));

        let immediate = ReconnectPolicy {
            initial: Duration::from_millis(100),
            max: Duration::ZERO,
        };
        assert_eq!(immediate.delay(5), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_reconnects_after_remote_close() {
        let connector = ScriptedConnector::default();
        let first = connector.push_transport();
        let second = connector.push_transport();

        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let connection = ResilientConnection::new(connector.clone(), fast_retries());
        let run = tokio::spawn(connection.run(rx, shutdown.clone()));

        let mut first = BufReader::new(first);
        tx.send(record("one")).await.unwrap();
        assert!(read_line(&mut first).await.contains("\"line\":\"one\""));
        drop(first);

        let mut second = BufReader::new(second);
        tx.send(record("two")).await.unwrap();
        assert!(read_line(&mut second).await.contains("\"line\":\"two\""));

        shutdown.cancel();
        let stats = run.await.unwrap().unwrap();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.reconnects(), 1);
        assert_eq!(stats.records_written, 2);
        assert_eq!(connector.attempts(), 2);
        assert_eq!(read_line(&mut second).await, "");
    }

    #[tokio::test]
    async fn test_no_reconnect_after_shutdown() {
        let connector = ScriptedConnector::default();
        let server = connector.push_transport();

        let (_tx, rx) = mpsc::channel::<Record>(8);
        let shutdown = CancellationToken::new();
        let connection = ResilientConnection::new(connector.clone(), fast_retries());
        let run = tokio::spawn(connection.run(rx, shutdown.clone()));

        let mut server = BufReader::new(server);
        while connector.attempts() == 0 {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
        let stats = run.await.unwrap().unwrap();

        assert_eq!(stats.connections, 1);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(read_line(&mut server).await, "");
    }

    #[tokio::test]
    async fn test_records_wait_while_connecting() {
        let connector = ScriptedConnector::default();
        connector.push_error(refused());
        connector.push_error(refused());
        let server = connector.push_transport();

        let (tx, rx) = mpsc::channel(8);
        tx.send(record("queued-1")).await.unwrap();
        tx.send(record("queued-2")).await.unwrap();
        drop(tx);

        let connection = ResilientConnection::new(connector.clone(), fast_retries());
        let stats = connection
            .run(rx, CancellationToken::new())
            .await
            .unwrap();

        let mut server = BufReader::new(server);
        assert!(read_line(&mut server).await.contains("queued-1"));
        assert!(read_line(&mut server).await.contains("queued-2"));
        assert_eq!(stats.failed_attempts, 2);
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.records_written, 2);
    }

    #[tokio::test]
    async fn test_queued_records_flushed_on_shutdown() {
        let connector = ScriptedConnector::default();
        let server = connector.push_transport();

        let (tx, rx) = mpsc::channel(8);
        tx.send(record("last")).await.unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let connection = ResilientConnection::new(connector.clone(), fast_retries());
        let stats = connection.run(rx, shutdown).await.unwrap();

        let mut server = BufReader::new(server);
        assert!(read_line(&mut server).await.contains("last"));
        assert_eq!(read_line(&mut server).await, "");
        assert_eq!(stats.records_written, 1);
        drop(tx);
    }

    #[tokio::test]
    async fn test_untrusted_peer_is_fatal() {
        let connector = ScriptedConnector::default();
        connector.push_error(ConnectError::Untrusted {
            target: "collector:443".to_string(),
            reason: "invalid peer certificate: UnknownIssuer".to_string(),
        });

        let (_tx, rx) = mpsc::channel::<Record>(8);
        let connection = ResilientConnection::new(connector.clone(), fast_retries());
        let result = connection.run(rx, CancellationToken::new()).await;

        assert!(matches!(result, Err(ConnectError::Untrusted { .. })));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_retried() {
        struct Hanging;

        #[async_trait]
        impl Connector for Hanging {
            fn target(&self) -> &str {
                "collector:10000"
            }

            async fn connect(&self) -> Result<BoxedTransport, ConnectError> {
                std::future::pending().await
            }
        }

        let config = ConnectionConfig {
            connect_timeout: Some(Duration::from_secs(1)),
            ..fast_retries()
        };
        let connection = ResilientConnection::new(Hanging, config);
        let (_tx, rx) = mpsc::channel::<Record>(1);
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(connection.run(rx, shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown.cancel();
        let stats = run.await.unwrap().unwrap();
        assert!(stats.failed_attempts >= 5);
        assert_eq!(stats.connections, 0);
    }
}
