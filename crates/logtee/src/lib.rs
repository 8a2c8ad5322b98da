// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Core of the `logtee` logging driver.
//!
//! A container runtime hands the driver a pipe carrying a framed stream of log
//! records. The driver replicates every record to a configurable set of
//! backends and serves read requests by re-encoding one backend's history back
//! into the same frame format.
//!
//! ```text
//!   producer pipe ──> ingest pump ──> FanoutLogger ──┬──> backend A
//!                                                    ├──> backend B
//!                                                    └──> ...
//!
//!   caller <── LogStream <── read-back pump <── LogWatcher <── readable backend
//! ```
//!
//! - **[`entry`]**: the log record model and its protobuf wire message
//! - **[`codec`]**: length-prefixed frame codec shared by ingest and read-back
//! - **[`backend`]**: the backend capability and the name → constructor factory
//! - **[`watch`]**: push-style supply of records used to serve reads
//! - **[`fanout`]**: replicates records to every backend, aggregating failures
//! - **[`driver`]**: the session registry behind the runtime's driver contract
//! - **[`pump`]**: the ingest and read-back tasks
//! - **[`backends`]**: built-in `local` and `json-file` backends

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backend;
pub mod backends;
pub mod codec;
pub mod driver;
pub mod entry;
pub mod errors;
pub mod fanout;
pub mod pump;
pub mod watch;

pub use backend::{Backend, BackendFactory, LogReader, ReadConfig, SessionInfo};
pub use codec::LogEntryCodec;
pub use driver::{Capability, Driver, LogStream};
pub use entry::{LogRecord, PartialMetadata};
pub use errors::{BackendError, DriverError, FrameError, MultipleError};
pub use fanout::{BackendSpec, FanoutLogger};
pub use watch::{LogWatcher, WatchEvent, WatchProducer};
