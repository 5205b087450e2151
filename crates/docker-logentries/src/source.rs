// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Source handles: independently closing producers of events.
//!
//! The forwarder does not know how events are collected from the container
//! runtime. Each enabled channel hands it a lazy stream of [`Event`]s; the end
//! of the stream is the only completion signal it relies on.

use std::pin::Pin;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, SplitStream};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::event::{Event, Kind};

/// Path meaning "read from standard input".
pub const STDIN_PATH: &str = "-";

/// Channels a source can feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Logs,
    Stats,
    DockerEvents,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Logs, Channel::Stats, Channel::DockerEvents];

    /// Kind of the events this channel produces.
    #[must_use]
    pub const fn kind(self) -> Kind {
        match self {
            Channel::Logs => Kind::Log,
            Channel::Stats => Kind::Stats,
            Channel::DockerEvents => Kind::Lifecycle,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Logs => write!(f, "logs"),
            Channel::Stats => write!(f, "stats"),
            Channel::DockerEvents => write!(f, "dockerEvents"),
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// One producer of events for a channel.
pub struct SourceHandle {
    channel: Channel,
    events: EventStream,
}

impl SourceHandle {
    pub fn new<S>(channel: Channel, events: S) -> Self
    where
        S: Stream<Item = Event> + Send + 'static,
    {
        Self {
            channel,
            events: Box::pin(events),
        }
    }

    /// Source fed through a channel; it closes once every sender is dropped.
    pub fn from_receiver(channel: Channel, receiver: mpsc::Receiver<Event>) -> Self {
        Self::new(channel, ReceiverStream::new(receiver))
    }

    /// Source reading newline-delimited JSON objects.
    ///
    /// Lines that are not JSON objects, including lines that are not valid
    /// UTF-8, are skipped. A read error ends the source just like end of input
    /// does.
    pub fn from_reader<R>(channel: Channel, reader: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        let events = SplitStream::new(reader.split(b'\n'))
            .map_while(move |line| match line {
                Ok(line) => Some(line),
                Err(e) => {
                    warn!("Error reading {} source: {}", channel, e);
                    None
                }
            })
            .filter_map(move |line| parse_line(channel, &line));
        Self::new(channel, events)
    }

    /// Opens a newline-delimited JSON source from a file path or [`STDIN_PATH`].
    pub async fn open(channel: Channel, path: &str) -> std::io::Result<Self> {
        if path == STDIN_PATH {
            debug!("Reading {} events from stdin", channel);
            return Ok(Self::from_reader(channel, BufReader::new(tokio::io::stdin())));
        }
        let file = tokio::fs::File::open(path).await?;
        debug!("Reading {} events from {}", channel, path);
        Ok(Self::from_reader(channel, BufReader::new(file)))
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn into_parts(self) -> (Channel, EventStream) {
        (self.channel, self.events)
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

fn parse_line(channel: Channel, line: &[u8]) -> Option<Event> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice(line).map(Event::from_value) {
        Ok(Some(event)) => Some(event),
        Ok(None) => {
            warn!("Skipping {} record that is not a JSON object", channel);
            None
        }
        Err(e) => {
            warn!("Skipping malformed {} record: {}", channel, e);
            None
        }
    }
}
