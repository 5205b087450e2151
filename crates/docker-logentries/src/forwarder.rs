// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;
use crate::connection::{ForwardStats, ResilientConnection};
use crate::errors::ForwarderError;
use crate::multiplexer::Multiplexer;
use crate::shutdown::ShutdownCoordinator;
use crate::source::SourceHandle;
use crate::transport::Connector;

/// Streams every enabled source to a single collector connection.
pub struct Forwarder<C> {
    config: Arc<Config>,
    multiplexer: Multiplexer,
    connection: ResilientConnection<C>,
}

impl<C: Connector> Forwarder<C> {
    /// Fails before any connection attempt when the configuration is invalid
    /// or no source feeds an enabled channel.
    pub fn new(
        config: Arc<Config>,
        sources: Vec<SourceHandle>,
        connector: C,
    ) -> Result<Self, ForwarderError> {
        config.validate()?;
        let multiplexer = Multiplexer::new(&config, sources)?;
        let connection = ResilientConnection::new(connector, config.connection());
        Ok(Self {
            config,
            multiplexer,
            connection,
        })
    }

    /// Runs until every source has closed and the queued records are written,
    /// or until a fatal connection error.
    pub async fn run(self) -> Result<ForwardStats, ForwarderError> {
        let (records_tx, records_rx) = mpsc::channel(self.config.queue_capacity);
        let coordinator = ShutdownCoordinator::new();

        let channels: Vec<String> = self
            .multiplexer
            .channels()
            .iter()
            .map(ToString::to_string)
            .collect();
        info!(
            "Streaming started to {} for {}",
            self.connection.target(),
            channels.join(", ")
        );

        let sources = self.multiplexer.run(records_tx, coordinator.clone());
        let output = self.connection.run(records_rx, coordinator.cancel_token());
        tokio::pin!(sources);
        tokio::pin!(output);

        let stats = tokio::select! {
            () = &mut sources => {
                debug!("All sources closed, waiting for the output connection");
                output.await?
            }
            result = &mut output => {
                // a fatal connection error stops everything, sources included
                let stats = result?;
                sources.await;
                stats
            }
        };

        info!(
            records = stats.records_written,
            bytes = stats.bytes_written,
            reconnects = stats.reconnects(),
            "Streaming finished"
        );
        Ok(stats)
    }
}
