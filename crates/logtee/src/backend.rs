// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The capability a log persistence backend exposes to the fan-out logger,
//! and the factory that turns backend names into live instances.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::backends::{json_file::JsonFileBackend, local::LocalBackend};
use crate::entry::LogRecord;
use crate::errors::{BackendError, DriverError};
use crate::watch::LogWatcher;

/// What the runtime tells the driver about the container being logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub container_id: String,
    pub container_name: String,
    pub container_image_name: String,
    /// Path the runtime suggests for persisted logs.
    pub log_path: String,
    /// Log options. For a backend, only the options addressed to it.
    pub config: HashMap<String, String>,
}

/// Hints for a read request. Backends interpret them as best they can.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadConfig {
    pub since: Option<OffsetDateTime>,
    pub until: Option<OffsetDateTime>,
    /// Number of most recent records to return; negative means all.
    pub tail: i64,
    pub follow: bool,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            tail: -1,
            follow: false,
        }
    }
}

/// A log persistence backend.
///
/// `log` and `read_logs` may be called concurrently; `close` is called once,
/// after the last `log`.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Persists one record. The backend owns its copy.
    async fn log(&self, record: LogRecord) -> Result<(), BackendError>;

    async fn close(&self) -> Result<(), BackendError>;

    /// Read support, if this backend has any.
    fn as_reader(&self) -> Option<&dyn LogReader> {
        None
    }
}

/// Read-back support offered by some backends.
pub trait LogReader: Send + Sync {
    /// Starts serving records matching `config` through a watch. Must be
    /// called from within a tokio runtime.
    fn read_logs(&self, config: ReadConfig) -> LogWatcher;
}

type Constructor =
    Arc<dyn Fn(&SessionInfo) -> Result<Box<dyn Backend>, BackendError> + Send + Sync>;

/// Closed registry of backend constructors keyed by name.
#[derive(Clone)]
pub struct BackendFactory {
    constructors: HashMap<String, Constructor>,
}

impl fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendFactory")
            .field("backends", &self.names())
            .finish()
    }
}

impl Default for BackendFactory {
    /// A factory with the built-in `local` and `json-file` backends.
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register(LocalBackend::NAME, |info| {
            LocalBackend::new(info).map(|b| Box::new(b) as Box<dyn Backend>)
        });
        factory.register(JsonFileBackend::NAME, |info| {
            JsonFileBackend::new(info).map(|b| Box::new(b) as Box<dyn Backend>)
        });
        factory
    }
}

impl BackendFactory {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers `constructor` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&SessionInfo) -> Result<Box<dyn Backend>, BackendError> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    /// Registered backend names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds the backend called `name` with the backend-specific `info`.
    pub fn create(&self, name: &str, info: &SessionInfo) -> Result<Box<dyn Backend>, DriverError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| DriverError::UnknownBackend(name.to_string()))?;
        constructor(info).map_err(|source| DriverError::BackendInit {
            name: name.to_string(),
            source,
        })
    }
}
