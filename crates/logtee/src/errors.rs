// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the codec, the backends and the session registry.

use std::fmt;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The length prefix announced more bytes than the codec accepts.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    /// The stream closed in the middle of a frame.
    #[error("stream ended inside a frame ({remaining} bytes left over)")]
    Truncated { remaining: usize },

    #[error("failed to decode log entry: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("failed to encode log entry: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("timestamp {0}ns cannot be represented")]
    TimestampOutOfRange(i128),
}

/// Errors reported by a single backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown log option '{key}' for backend {backend}")]
    UnknownOption { backend: String, key: String },

    #[error("invalid value '{value}' for log option '{key}'")]
    InvalidOption { key: String, value: String },

    #[error("no log path available for backend {0}")]
    MissingPath(String),

    #[error("backend {0} is closed")]
    Closed(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// One backend's contribution to a [`MultipleError`].
#[derive(Debug)]
pub struct BackendFailure {
    pub backend: String,
    pub error: BackendError,
}

/// Failures of several backends for the same operation.
///
/// Renders as `"<message>; <backend>: <error>; ..."` in backend order.
#[derive(Debug)]
pub struct MultipleError {
    message: &'static str,
    failures: Vec<BackendFailure>,
}

impl MultipleError {
    #[must_use]
    pub fn new(message: &'static str, failures: Vec<BackendFailure>) -> Self {
        Self { message, failures }
    }

    #[must_use]
    pub fn failures(&self) -> &[BackendFailure] {
        &self.failures
    }

    /// Names of the failing backends, in configuration order.
    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.backend.as_str())
    }
}

impl fmt::Display for MultipleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.backend, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultipleError {}

/// Errors returned by the driver contract operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no backends configured: set the 'drivers' log option")]
    NoBackends,

    #[error("no such backend: {0}")]
    UnknownBackend(String),

    #[error("failed to create backend {name}: {source}")]
    BackendInit {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("logging already started for {0}")]
    AlreadyStarted(String),

    #[error("container {0} already has an active logging session")]
    ContainerBusy(String),

    #[error("no logging session for {0}")]
    SessionNotFound(String),

    #[error("no logging session for container {0}")]
    ContainerNotFound(String),

    #[error("failed to open log pipe {path}: {source}")]
    OpenPipe {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
