// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Session registry implementing the runtime's logging driver contract.
//!
//! Each started session owns one [`FanoutLogger`] and one ingest task. The
//! registry maps pipe paths to sessions and container ids to their logger.
//! Its lock is only held to read or mutate those maps, never while a pump or
//! a backend runs.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::net::unix::pipe;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendFactory, ReadConfig, SessionInfo};
use crate::errors::DriverError;
use crate::fanout::{BackendSpec, FanoutLogger};
use crate::pump;

/// Default capacity, in bytes, of the in-memory stream returned by reads.
pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

/// What the driver advertises to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub read_logs: bool,
}

struct Session {
    id: u64,
    container_id: String,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Session>,
    loggers: HashMap<String, Arc<FanoutLogger>>,
    next_id: u64,
}

impl Registry {
    fn check_available(&self, file: &str, container_id: &str) -> Result<(), DriverError> {
        if self.sessions.contains_key(file) {
            return Err(DriverError::AlreadyStarted(file.to_string()));
        }
        if self.loggers.contains_key(container_id) {
            return Err(DriverError::ContainerBusy(container_id.to_string()));
        }
        Ok(())
    }

    fn remove(&mut self, file: &str) -> Option<Session> {
        let session = self.sessions.remove(file)?;
        self.loggers.remove(&session.container_id);
        Some(session)
    }

    /// Removes the session on `file` only if it is still session `id`.
    fn remove_if_current(&mut self, file: &str, id: u64) -> bool {
        match self.sessions.get(file) {
            Some(session) if session.id == id => self.remove(file).is_some(),
            _ => false,
        }
    }
}

/// The logging driver.
///
/// Cloning is cheap; clones share the same sessions.
#[derive(Clone)]
pub struct Driver {
    factory: Arc<BackendFactory>,
    registry: Arc<Mutex<Registry>>,
    read_buffer: usize,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("factory", &self.factory)
            .field("read_buffer", &self.read_buffer)
            .finish_non_exhaustive()
    }
}

impl Driver {
    #[must_use]
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            factory: Arc::new(factory),
            registry: Arc::new(Mutex::new(Registry::default())),
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }

    /// Sets the capacity of the streams returned by [`Driver::read_logs`].
    #[must_use]
    pub fn with_read_buffer(mut self, read_buffer: usize) -> Self {
        self.read_buffer = read_buffer.max(1);
        self
    }

    /// Opens the FIFO at `file` and starts logging it for `info`'s container.
    pub async fn start_logging(&self, file: &str, info: SessionInfo) -> Result<(), DriverError> {
        let pipe = open_pipe(file)?;
        self.start_logging_from(file, info, pipe).await
    }

    /// Starts a session reading frames from an already open `pipe`.
    ///
    /// On error nothing is registered, no task is started and every backend
    /// created along the way is closed again.
    pub async fn start_logging_from<R>(
        &self,
        file: &str,
        info: SessionInfo,
        pipe: R,
    ) -> Result<(), DriverError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.registry
            .lock()
            .await
            .check_available(file, &info.container_id)?;

        let specs = BackendSpec::from_config(&info.config)?;
        let logger = Arc::new(FanoutLogger::new(&specs, &info, &self.factory).await?);

        let mut registry = self.registry.lock().await;
        // Another start may have won while the backends were being created.
        if let Err(e) = registry.check_available(file, &info.container_id) {
            drop(registry);
            close_logger(file, &logger).await;
            return Err(e);
        }

        registry.next_id += 1;
        let id = registry.next_id;
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(run_session(
            Arc::clone(&self.registry),
            id,
            file.to_string(),
            pipe,
            Arc::clone(&logger),
            cancel_token.clone(),
        ));

        registry.sessions.insert(
            file.to_string(),
            Session {
                id,
                container_id: info.container_id.clone(),
                cancel_token,
                task,
            },
        );
        registry.loggers.insert(info.container_id.clone(), logger);
        drop(registry);

        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        info!(
            pipe = file,
            container_id = %info.container_id,
            "started logging to {}", names.join(",")
        );
        Ok(())
    }

    /// Stops the session on `file` and waits until its pipe is released and
    /// its backends are closed.
    pub async fn stop_logging(&self, file: &str) -> Result<(), DriverError> {
        let session = self
            .registry
            .lock()
            .await
            .remove(file)
            .ok_or_else(|| DriverError::SessionNotFound(file.to_string()))?;

        session.cancel_token.cancel();
        if let Err(e) = session.task.await {
            error!(pipe = file, "logging task failed: {}", e);
        }
        info!(pipe = file, container_id = %session.container_id, "stopped logging");
        Ok(())
    }

    /// Serves `config` from the first readable backend of the container's
    /// session.
    ///
    /// The returned stream carries frames in the ingest format. It ends when
    /// the backend has nothing more to send; dropping it or cancelling its
    /// token ends the read early.
    pub async fn read_logs(
        &self,
        info: &SessionInfo,
        config: ReadConfig,
    ) -> Result<LogStream, DriverError> {
        let logger = self
            .registry
            .lock()
            .await
            .loggers
            .get(&info.container_id)
            .cloned()
            .ok_or_else(|| DriverError::ContainerNotFound(info.container_id.clone()))?;

        debug!(container_id = %info.container_id, "reading logs with {:?}", config);
        let watcher = logger.read_logs(config);
        drop(logger);

        let (output, reader) = tokio::io::duplex(self.read_buffer);
        let cancel_token = CancellationToken::new();
        let pump_token = cancel_token.clone();
        tokio::spawn(async move {
            pump::read_back(watcher, output, &pump_token).await;
        });

        Ok(LogStream {
            reader,
            cancel_token,
        })
    }

    #[must_use]
    pub fn capabilities(&self) -> Capability {
        Capability { read_logs: true }
    }

    /// Stops every active session.
    pub async fn shutdown(&self) {
        let sessions: Vec<(String, Session)> = {
            let mut registry = self.registry.lock().await;
            registry.loggers.clear();
            registry.sessions.drain().collect()
        };
        if sessions.is_empty() {
            return;
        }

        info!("stopping {} logging sessions", sessions.len());
        for (_, session) in &sessions {
            session.cancel_token.cancel();
        }
        for (file, session) in sessions {
            if let Err(e) = session.task.await {
                error!(pipe = %file, "logging task failed: {}", e);
            }
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.registry.lock().await.sessions.len()
    }
}

fn open_pipe(file: &str) -> Result<pipe::Receiver, DriverError> {
    let mut options = pipe::OpenOptions::new();
    // Holding a write end keeps the open from failing before the runtime
    // connects its writer.
    #[cfg(target_os = "linux")]
    options.read_write(true);
    options
        .open_receiver(file)
        .map_err(|source| DriverError::OpenPipe {
            path: file.to_string(),
            source,
        })
}

async fn run_session<R>(
    registry: Arc<Mutex<Registry>>,
    id: u64,
    file: String,
    pipe: R,
    logger: Arc<FanoutLogger>,
    cancel_token: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let exit = pump::ingest(&file, pipe, &logger, &cancel_token).await;

    if registry.lock().await.remove_if_current(&file, id) {
        debug!(pipe = %file, "session ended on its own: {:?}", exit);
    }
    close_logger(&file, &logger).await;
}

async fn close_logger(file: &str, logger: &FanoutLogger) {
    if let Err(e) = logger.close().await {
        warn!(pipe = file, "{}", e);
    }
}

/// Frames produced by a read, readable with [`tokio::io::AsyncReadExt`].
///
/// Dropping the stream ends the read.
#[derive(Debug)]
pub struct LogStream {
    reader: DuplexStream,
    cancel_token: CancellationToken,
}

impl LogStream {
    /// Ends the read without waiting for the backend.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

impl AsyncRead for LogStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::entry::LogRecord;
    use crate::errors::BackendError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Backend for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn log(&self, _record: LogRecord) -> Result<(), BackendError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), BackendError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn driver(closes: &Arc<AtomicUsize>) -> Driver {
        let mut factory = BackendFactory::empty();
        let closes = Arc::clone(closes);
        factory.register("counting", move |_| {
            Ok(Box::new(Counting {
                closes: Arc::clone(&closes),
            }) as Box<dyn Backend>)
        });
        Driver::new(factory)
    }

    fn info(container_id: &str) -> SessionInfo {
        SessionInfo {
            container_id: container_id.to_string(),
            config: [("drivers".to_string(), "counting".to_string())]
                .into_iter()
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_capabilities_advertise_reads() {
        let driver = Driver::new(BackendFactory::empty());
        assert_eq!(driver.capabilities(), Capability { read_logs: true });
    }

    #[tokio::test]
    async fn test_conflicting_start_closes_its_backends() {
        let closes = Arc::new(AtomicUsize::new(0));
        let driver = driver(&closes);
        let (_w1, r1) = tokio::io::duplex(64);
        let (_w2, r2) = tokio::io::duplex(64);

        driver.start_logging_from("/p1", info("c1"), r1).await.unwrap();
        let err = driver
            .start_logging_from("/p2", info("c1"), r2)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::ContainerBusy(ref id) if id == "c1"));
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(driver.active_sessions().await, 1);

        driver.stop_logging("/p1").await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let closes = Arc::new(AtomicUsize::new(0));
        let driver = driver(&closes);
        let mut writers = Vec::new();
        for i in 0..3 {
            let (w, r) = tokio::io::duplex(64);
            writers.push(w);
            driver
                .start_logging_from(&format!("/p{i}"), info(&format!("c{i}")), r)
                .await
                .unwrap();
        }

        driver.shutdown().await;
        assert_eq!(driver.active_sessions().await, 0);
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        assert!(matches!(
            driver.stop_logging("/p0").await,
            Err(DriverError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_pipe_is_an_open_error() {
        let closes = Arc::new(AtomicUsize::new(0));
        let driver = driver(&closes);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.fifo");

        let err = driver
            .start_logging(path.to_str().unwrap(), info("c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::OpenPipe { .. }));
        assert_eq!(driver.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_read() {
        let closes = Arc::new(AtomicUsize::new(0));
        let driver = driver(&closes);
        let (_w, r) = tokio::io::duplex(64);
        driver.start_logging_from("/p", info("c"), r).await.unwrap();

        let stream = driver.read_logs(&info("c"), ReadConfig::default()).await.unwrap();
        let token = stream.cancel_token();
        assert!(!token.is_cancelled());
        drop(stream);
        assert!(token.is_cancelled());
    }
}
