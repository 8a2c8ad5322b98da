// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records and their protobuf wire representation.
//!
//! The wire message mirrors the log entry exchanged between a container
//! runtime and its logging plugins, so frames produced here can be consumed by
//! the runtime directly:
//!
//! ```text
//! message LogEntry {
//!   string source = 1;
//!   int64 time_nano = 2;
//!   bytes line = 3;
//!   bool partial = 4;
//!   PartialLogEntryMetadata partial_log_metadata = 5;
//! }
//!
//! message PartialLogEntryMetadata {
//!   bool last = 1;
//!   string id = 2;
//!   int32 ordinal = 3;
//! }
//! ```

use time::OffsetDateTime;

use crate::errors::FrameError;

/// Position of a fragment within a line that was split across several records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMetadata {
    /// Identifies the logical line all fragments belong to.
    pub id: String,
    /// Set on the final fragment.
    pub last: bool,
    /// 1-based position of the fragment.
    pub ordinal: i32,
}

/// One line (or line fragment) emitted by a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub line: Vec<u8>,
    /// Stream the line came from, usually `stdout` or `stderr`.
    pub source: String,
    pub timestamp: OffsetDateTime,
    pub partial: bool,
    /// Only meaningful when `partial` is set.
    pub partial_meta: Option<PartialMetadata>,
}

impl LogRecord {
    #[must_use]
    pub fn new(
        line: impl Into<Vec<u8>>,
        source: impl Into<String>,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            line: line.into(),
            source: source.into(),
            timestamp,
            partial: false,
            partial_meta: None,
        }
    }

    /// Marks the record as a fragment of a longer line.
    #[must_use]
    pub fn with_partial(mut self, meta: PartialMetadata) -> Self {
        self.partial = true;
        self.partial_meta = Some(meta);
        self
    }
}

/// Wire form of [`PartialMetadata`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct PartialLogEntryMetadata {
    #[prost(bool, tag = "1")]
    pub last: bool,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(int32, tag = "3")]
    pub ordinal: i32,
}

/// Wire form of [`LogRecord`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct LogEntry {
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(int64, tag = "2")]
    pub time_nano: i64,
    #[prost(bytes = "vec", tag = "3")]
    pub line: Vec<u8>,
    #[prost(bool, tag = "4")]
    pub partial: bool,
    #[prost(message, optional, tag = "5")]
    pub partial_log_metadata: Option<PartialLogEntryMetadata>,
}

impl TryFrom<&LogRecord> for LogEntry {
    type Error = FrameError;

    fn try_from(record: &LogRecord) -> Result<Self, Self::Error> {
        let nanos = record.timestamp.unix_timestamp_nanos();
        let time_nano = i64::try_from(nanos).map_err(|_| FrameError::TimestampOutOfRange(nanos))?;

        // Fragment metadata only travels with fragments.
        let partial_log_metadata = if record.partial {
            record
                .partial_meta
                .as_ref()
                .map(|meta| PartialLogEntryMetadata {
                    last: meta.last,
                    id: meta.id.clone(),
                    ordinal: meta.ordinal,
                })
        } else {
            None
        };

        Ok(LogEntry {
            source: record.source.clone(),
            time_nano,
            line: record.line.clone(),
            partial: record.partial,
            partial_log_metadata,
        })
    }
}

impl TryFrom<LogEntry> for LogRecord {
    type Error = FrameError;

    fn try_from(entry: LogEntry) -> Result<Self, Self::Error> {
        let nanos = i128::from(entry.time_nano);
        let timestamp = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|_| FrameError::TimestampOutOfRange(nanos))?;

        let partial_meta = if entry.partial {
            entry
                .partial_log_metadata
                .map(|meta| PartialMetadata {
                    id: meta.id,
                    last: meta.last,
                    ordinal: meta.ordinal,
                })
        } else {
            None
        };

        Ok(LogRecord {
            line: entry.line,
            source: entry.source,
            timestamp,
            partial: entry.partial,
            partial_meta,
        })
    }
}
