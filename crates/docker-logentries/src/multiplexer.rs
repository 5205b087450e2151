// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fan-in of every source into the single output queue.
//!
//! Each source runs in its own task and pushes its events through the
//! pipeline (enrich, route, encode) into a bounded queue drained by the output
//! connection. A full queue suspends the source tasks until the connection
//! catches up, so a slow or reconnecting endpoint never causes unbounded
//! buffering.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::encoder::{encode, Record};
use crate::enricher::Enrichment;
use crate::errors::ConfigError;
use crate::event::Event;
use crate::policy::RoutingPolicy;
use crate::shutdown::ShutdownCoordinator;
use crate::source::{Channel, SourceHandle};

/// Enrich, route and encode a single event.
#[derive(Debug, Clone)]
pub struct Pipeline {
    enrichment: Enrichment,
    policy: RoutingPolicy,
}

impl Pipeline {
    #[must_use]
    pub fn new(enrichment: Enrichment, policy: RoutingPolicy) -> Self {
        Self { enrichment, policy }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let policy = RoutingPolicy::new(config.tokens.clone(), &config.patterns)?;
        Ok(Self::new(config.enrichment.clone(), policy))
    }

    /// Returns the encoded record, or `None` when the event is dropped.
    pub fn process(&self, mut event: Event) -> Option<Record> {
        self.enrichment.apply(&mut event);
        let token = self.policy.route(&event)?;
        Some(encode(token, &event))
    }
}

/// Number of sources still running.
///
/// Reaching zero notifies the shutdown coordinator. Closing more sources than
/// were opened is ignored so the count can never wrap.
#[derive(Debug)]
pub struct OpenSources {
    remaining: usize,
    coordinator: ShutdownCoordinator,
}

impl OpenSources {
    #[must_use]
    pub fn new(count: usize, coordinator: ShutdownCoordinator) -> Self {
        Self {
            remaining: count,
            coordinator,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Records one closed source and returns how many remain.
    pub fn close_one(&mut self) -> usize {
        if self.remaining == 0 {
            warn!("Source closed after every source was already accounted for");
            return 0;
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            self.coordinator.all_sources_closed();
        }
        self.remaining
    }
}

pub struct Multiplexer {
    sources: Vec<SourceHandle>,
    pipeline: Arc<Pipeline>,
}

impl Multiplexer {
    /// Keeps the sources whose channel is enabled in `config`.
    ///
    /// Fails with [`ConfigError::NoChannelEnabled`] when none is left.
    pub fn new(config: &Config, sources: Vec<SourceHandle>) -> Result<Self, ConfigError> {
        let pipeline = Pipeline::from_config(config)?;
        let sources: Vec<SourceHandle> = sources
            .into_iter()
            .filter(|source| {
                let enabled = config.channel_enabled(source.channel());
                if !enabled {
                    debug!("Ignoring {} source: channel disabled", source.channel());
                }
                enabled
            })
            .collect();
        if sources.is_empty() {
            return Err(ConfigError::NoChannelEnabled);
        }
        Ok(Self {
            sources,
            pipeline: Arc::new(pipeline),
        })
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.sources.iter().map(SourceHandle::channel).collect()
    }

    /// Runs every source to completion.
    ///
    /// Each source completion, graceful or not, is counted exactly once; the
    /// last one triggers `coordinator`.
    pub async fn run(self, output: mpsc::Sender<Record>, coordinator: ShutdownCoordinator) {
        let mut open = OpenSources::new(self.sources.len(), coordinator);
        let mut tasks = JoinSet::new();
        for source in self.sources {
            tasks.spawn(pump(source, Arc::clone(&self.pipeline), output.clone()));
        }
        drop(output);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(channel) => info!("{} source closed", channel),
                Err(e) => error!("Source task failed: {}", e),
            }
            let remaining = open.close_one();
            debug!("{} source(s) still open", remaining);
        }
    }
}

async fn pump(
    source: SourceHandle,
    pipeline: Arc<Pipeline>,
    output: mpsc::Sender<Record>,
) -> Channel {
    let (channel, mut events) = source.into_parts();
    while let Some(event) = events.next().await {
        let Some(record) = pipeline.process(event) else {
            continue;
        };
        trace!("Queueing {} bytes from {} source", record.len(), channel);
        if output.send(record).await.is_err() {
            debug!("Output connection gone, stopping {} source", channel);
            break;
        }
    }
    channel
}
