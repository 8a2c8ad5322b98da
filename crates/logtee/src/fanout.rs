// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Replicates every record to a configured set of backends.
//!
//! Backends are selected with the `drivers` log option, a comma separated list
//! of names. Any option named `<backend>:<key>` is handed to that backend only,
//! as `<key>`:
//!
//! ```text
//! --log-opt drivers=local,json-file --log-opt local:path=/var/log/app.frames
//! ```

use std::collections::HashMap;

use futures_util::future::join_all;
use tracing::{debug, error, info};

use crate::backend::{Backend, BackendFactory, ReadConfig, SessionInfo};
use crate::entry::LogRecord;
use crate::errors::{BackendError, BackendFailure, DriverError, MultipleError};
use crate::watch::LogWatcher;

/// Log option holding the ordered list of backend names.
pub const DRIVERS_OPTION: &str = "drivers";

/// One configured backend and the options addressed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub name: String,
    pub options: HashMap<String, String>,
}

impl BackendSpec {
    /// Derives the ordered backend list from a session's log options.
    pub fn from_config(config: &HashMap<String, String>) -> Result<Vec<BackendSpec>, DriverError> {
        let names = config.get(DRIVERS_OPTION).ok_or(DriverError::NoBackends)?;

        let specs: Vec<BackendSpec> = names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| BackendSpec {
                name: name.to_string(),
                options: backend_options(name, config),
            })
            .collect();

        if specs.is_empty() {
            return Err(DriverError::NoBackends);
        }
        Ok(specs)
    }
}

/// Options of the form `<backend>:<key>` for `backend`, with the prefix removed.
#[must_use]
pub fn backend_options(backend: &str, config: &HashMap<String, String>) -> HashMap<String, String> {
    config
        .iter()
        .filter_map(|(key, value)| match key.split_once(':') {
            Some((name, option)) if name == backend => Some((option.to_string(), value.clone())),
            _ => None,
        })
        .collect()
}

/// A set of backends behaving as one.
pub struct FanoutLogger {
    backends: Vec<Box<dyn Backend>>,
}

impl std::fmt::Debug for FanoutLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutLogger")
            .field("backends", &self.backend_names())
            .finish()
    }
}

impl FanoutLogger {
    /// Instantiates every backend in `specs`, in order.
    ///
    /// If any backend is unknown or fails to start, the ones already created
    /// are closed and the whole construction fails.
    pub async fn new(
        specs: &[BackendSpec],
        info: &SessionInfo,
        factory: &BackendFactory,
    ) -> Result<FanoutLogger, DriverError> {
        let mut backends: Vec<Box<dyn Backend>> = Vec::with_capacity(specs.len());

        for spec in specs {
            let backend_info = SessionInfo {
                config: spec.options.clone(),
                ..info.clone()
            };
            info!(
                container_id = %info.container_id,
                "adding backend {} with config {:?}", spec.name, backend_info.config
            );

            match factory.create(&spec.name, &backend_info) {
                Ok(backend) => backends.push(backend),
                Err(e) => {
                    error!("could not create backend {}: {}", spec.name, e);
                    let partial = FanoutLogger { backends };
                    if let Err(close_err) = partial.close().await {
                        error!("failed to release backends after init failure: {}", close_err);
                    }
                    return Err(e);
                }
            }
        }

        Ok(FanoutLogger { backends })
    }

    /// Wraps already constructed backends.
    #[must_use]
    pub fn from_backends(backends: Vec<Box<dyn Backend>>) -> FanoutLogger {
        FanoutLogger { backends }
    }

    #[must_use]
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Sends a copy of `record` to every backend and waits for all of them.
    ///
    /// Failures do not stop delivery to the other backends; they are returned
    /// together once every backend has answered.
    pub async fn log(&self, record: &LogRecord) -> Result<(), MultipleError> {
        let results = join_all(
            self.backends
                .iter()
                .map(|backend| backend.log(record.clone())),
        )
        .await;

        self.collect_failures("failed to log on some backends", results)
    }

    /// Closes every backend, even if some fail.
    pub async fn close(&self) -> Result<(), MultipleError> {
        let results = join_all(self.backends.iter().map(|backend| backend.close())).await;
        self.collect_failures("failed to close some backends", results)
    }

    /// Reads through the first backend that supports reading, or an empty
    /// watch when none does.
    pub fn read_logs(&self, config: ReadConfig) -> LogWatcher {
        for backend in &self.backends {
            if let Some(reader) = backend.as_reader() {
                debug!("reading logs from backend {}", backend.name());
                return reader.read_logs(config);
            }
        }
        debug!("no configured backend supports reading");
        LogWatcher::empty()
    }

    fn collect_failures(
        &self,
        message: &'static str,
        results: Vec<Result<(), BackendError>>,
    ) -> Result<(), MultipleError> {
        let failures: Vec<BackendFailure> = self
            .backends
            .iter()
            .zip(results)
            .filter_map(|(backend, result)| {
                result.err().map(|error| BackendFailure {
                    backend: backend.name().to_string(),
                    error,
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MultipleError::new(message, failures))
        }
    }
}
