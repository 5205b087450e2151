// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use docker_logentries::{
    config::Config,
    errors::ForwarderError,
    forwarder::Forwarder,
    metadata,
    source::SourceHandle,
    transport::{Connector, TcpConnector, TlsConnector},
};

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> ExitCode {
    let log_level = env::var("LOGENTRIES_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", log_level);

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), ForwarderError> {
    let config = Config::from_env()?;
    let config = Arc::new(metadata::resolve_tokens(config).await?);

    let sources = open_sources(&config).await?;
    if config.secure {
        let connector = TlsConnector::with_native_roots(&config.server, config.port)?;
        forward(config, sources, connector).await
    } else {
        let connector = TcpConnector::new(&config.server, config.port);
        forward(config, sources, connector).await
    }
}

async fn forward<C: Connector>(
    config: Arc<Config>,
    sources: Vec<SourceHandle>,
    connector: C,
) -> Result<(), ForwarderError> {
    let stats = Forwarder::new(config, sources, connector)?.run().await?;
    info!(
        "Forwarded {} records over {} connection(s)",
        stats.records_written, stats.connections
    );
    Ok(())
}

/// Opens one newline-delimited JSON source per active channel.
async fn open_sources(config: &Config) -> Result<Vec<SourceHandle>, ForwarderError> {
    let mut sources = Vec::new();
    for channel in config.enabled_channels() {
        let Some(path) = config.sources.for_channel(channel) else {
            warn!("No source configured for {}, skipping", channel);
            continue;
        };
        let source = SourceHandle::open(channel, path)
            .await
            .map_err(|source| ForwarderError::Source {
                path: path.to_string(),
                source,
            })?;
        sources.push(source);
    }
    Ok(sources)
}
