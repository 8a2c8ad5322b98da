// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Frame file backend with read support.
//!
//! Records are appended to a file in the same frame format used on the pipe.
//! Reads replay the file, filtered by the read hints, and can keep following
//! newly logged records.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::backend::{Backend, LogReader, ReadConfig, SessionInfo};
use crate::backends::{open_append, output_path};
use crate::codec::{encode_frame, LogEntryCodec};
use crate::entry::LogRecord;
use crate::errors::BackendError;
use crate::watch::{LogWatcher, WatchProducer, DEFAULT_WATCH_CAPACITY};

const FOLLOW_CAPACITY: usize = 1024;

struct Open {
    file: File,
    followers: broadcast::Sender<LogRecord>,
}

struct Inner {
    path: PathBuf,
    // None once closed.
    state: Mutex<Option<Open>>,
}

/// Appends frames to `<log path>.local`, or to the `path` option.
pub struct LocalBackend {
    inner: Arc<Inner>,
}

impl LocalBackend {
    pub const NAME: &'static str = "local";

    pub fn new(info: &SessionInfo) -> Result<Self, BackendError> {
        let path = output_path(Self::NAME, info, "local")?;
        let file = open_append(&path)?;
        let (followers, _) = broadcast::channel(FOLLOW_CAPACITY);
        debug!("local backend writing to {}", path.display());

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                state: Mutex::new(Some(Open { file, followers })),
            }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn log(&self, record: LogRecord) -> Result<(), BackendError> {
        let frame = encode_frame(&record)?;

        let mut state = self.inner.state.lock().await;
        let open = state
            .as_mut()
            .ok_or_else(|| BackendError::Closed(Self::NAME.to_string()))?;
        open.file.write_all(&frame).await?;
        open.file.flush().await?;
        // No followers is not an error.
        let _ = open.followers.send(record);
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        let open = self.inner.state.lock().await.take();
        if let Some(mut open) = open {
            open.file.flush().await?;
        }
        Ok(())
    }

    fn as_reader(&self) -> Option<&dyn LogReader> {
        Some(self)
    }
}

impl LogReader for LocalBackend {
    fn read_logs(&self, config: ReadConfig) -> LogWatcher {
        let (watcher, producer) = LogWatcher::new(DEFAULT_WATCH_CAPACITY);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.serve(&config, &producer).await {
                producer.fail(e);
            }
        });
        watcher
    }
}

impl Inner {
    async fn serve(
        &self,
        config: &ReadConfig,
        producer: &WatchProducer,
    ) -> Result<(), BackendError> {
        // Snapshot the file length and subscribe together so that every record
        // is either in the snapshot or delivered live, never both.
        let (len, followers) = {
            let state = self.state.lock().await;
            let len = match tokio::fs::metadata(&self.path).await {
                Ok(metadata) => metadata.len(),
                Err(e) if e.kind() == ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            };
            let followers = match state.as_ref() {
                Some(open) if config.follow && !until_passed(config) => {
                    Some(open.followers.subscribe())
                }
                _ => None,
            };
            (len, followers)
        };

        for record in self.history(len, config).await? {
            if !producer.send(record).await {
                return Ok(());
            }
        }

        let Some(mut followers) = followers else {
            return Ok(());
        };
        loop {
            let received = tokio::select! {
                received = followers.recv() => received,
                () = producer.consumer_gone() => return Ok(()),
            };
            match received {
                Ok(record) => {
                    if config.until.is_some_and(|until| record.timestamp >= until) {
                        return Ok(());
                    }
                    if in_window(&record, config) && !producer.send(record).await {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("log follower fell behind, {} records skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    /// The first `len` bytes of the file, decoded and filtered.
    async fn history(
        &self,
        len: u64,
        config: &ReadConfig,
    ) -> Result<VecDeque<LogRecord>, BackendError> {
        let mut records = VecDeque::new();
        if len == 0 || config.tail == 0 {
            return Ok(records);
        }

        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::new();
        file.take(len).read_to_end(&mut bytes).await?;

        let tail = usize::try_from(config.tail).ok();
        let mut buf = BytesMut::from(&bytes[..]);
        let mut codec = LogEntryCodec::default();
        while let Some(record) = codec.decode_eof(&mut buf)? {
            if !in_window(&record, config) {
                continue;
            }
            records.push_back(record);
            if tail.is_some_and(|tail| records.len() > tail) {
                records.pop_front();
            }
        }
        Ok(records)
    }
}

fn in_window(record: &LogRecord, config: &ReadConfig) -> bool {
    config.since.map_or(true, |since| record.timestamp >= since)
        && config.until.map_or(true, |until| record.timestamp < until)
}

fn until_passed(config: &ReadConfig) -> bool {
    config
        .until
        .is_some_and(|until| until <= OffsetDateTime::now_utc())
}
