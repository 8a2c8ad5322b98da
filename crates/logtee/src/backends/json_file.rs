// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Write-only backend storing one JSON object per line.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::{Backend, SessionInfo};
use crate::backends::{open_append, output_path};
use crate::entry::LogRecord;
use crate::errors::BackendError;

#[derive(Serialize)]
struct JsonLine<'a> {
    log: &'a str,
    stream: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    time: OffsetDateTime,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    partial: bool,
}

/// Appends `{"log","stream","time"}` lines to `<log path>.json`, or to the
/// `path` option. Complete lines get their trailing newline back in `log`.
pub struct JsonFileBackend {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonFileBackend {
    pub const NAME: &'static str = "json-file";

    pub fn new(info: &SessionInfo) -> Result<Self, BackendError> {
        let path = output_path(Self::NAME, info, "json")?;
        let file = open_append(&path)?;
        debug!("json-file backend writing to {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn to_json_line(record: &LogRecord) -> Result<Vec<u8>, BackendError> {
    let mut log = String::from_utf8_lossy(&record.line).into_owned();
    if !record.partial {
        log.push('\n');
    }
    let mut line = serde_json::to_vec(&JsonLine {
        log: &log,
        stream: &record.source,
        time: record.timestamp,
        partial: record.partial,
    })?;
    line.push(b'\n');
    Ok(line)
}

#[async_trait]
impl Backend for JsonFileBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn log(&self, record: LogRecord) -> Result<(), BackendError> {
        let line = to_json_line(&record)?;

        let mut file = self.file.lock().await;
        let file = file
            .as_mut()
            .ok_or_else(|| BackendError::Closed(Self::NAME.to_string()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        let file = self.file.lock().await.take();
        if let Some(mut file) = file {
            file.flush().await?;
        }
        Ok(())
    }
}
