// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # docker-logentries
//!
//! Forwards container logs, resource statistics and lifecycle events to a
//! Logentries-style collector over a single long-lived TCP or TLS connection.
//!
//! ## Pipeline
//!
//! Every enabled channel is a [`source::SourceHandle`]. Events flow through:
//! - [`enricher`]: static fields added to every event
//! - [`policy`]: token selection and name/image include/exclude checks
//! - [`encoder`]: `<token> <json>\n` records
//! - [`multiplexer`]: fan-in of all sources into one bounded queue
//! - [`connection`]: the always-reconnecting output connection
//!
//! [`shutdown`] closes the connection for good once every source has ended.
//! [`forwarder::Forwarder`] wires everything together.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod connection;
pub mod encoder;
pub mod enricher;
pub mod errors;
pub mod event;
pub mod forwarder;
pub mod metadata;
pub mod multiplexer;
pub mod policy;
pub mod shutdown;
pub mod source;
pub mod transport;
