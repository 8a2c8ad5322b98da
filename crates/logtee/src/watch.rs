// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Push-style supply of records used to serve read requests.
//!
//! A backend keeps the [`WatchProducer`] half and pushes records into it; the
//! read-back pump owns the [`LogWatcher`] half. Besides records, the watch
//! carries an error signal and a "producer gone" signal flowing to the
//! consumer, and a "consumer gone" signal flowing back to the producer.
//! Dropping either half raises its side's "gone" signal.

use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::entry::LogRecord;
use crate::errors::BackendError;

/// Default number of records buffered between producer and consumer.
pub const DEFAULT_WATCH_CAPACITY: usize = 256;

/// Next thing that happened on a watch.
#[derive(Debug)]
pub enum WatchEvent {
    Record(LogRecord),
    Error(BackendError),
    ProducerGone,
}

/// Consumer half of a watch.
#[derive(Debug)]
pub struct LogWatcher {
    records: mpsc::Receiver<LogRecord>,
    errors: mpsc::Receiver<BackendError>,
    producer_gone: CancellationToken,
    consumer_gone: CancellationToken,
}

/// Producer half of a watch, held by the backend serving the read.
#[derive(Debug)]
pub struct WatchProducer {
    records: mpsc::Sender<LogRecord>,
    errors: mpsc::Sender<BackendError>,
    producer_gone: CancellationToken,
    consumer_gone: CancellationToken,
}

impl LogWatcher {
    #[must_use]
    pub fn new(capacity: usize) -> (LogWatcher, WatchProducer) {
        let (records_tx, records_rx) = mpsc::channel(capacity.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let producer_gone = CancellationToken::new();
        let consumer_gone = CancellationToken::new();

        let watcher = LogWatcher {
            records: records_rx,
            errors: errors_rx,
            producer_gone: producer_gone.clone(),
            consumer_gone: consumer_gone.clone(),
        };
        let producer = WatchProducer {
            records: records_tx,
            errors: errors_tx,
            producer_gone,
            consumer_gone,
        };
        (watcher, producer)
    }

    /// A watch whose producer is already gone. Reading it yields nothing.
    #[must_use]
    pub fn empty() -> LogWatcher {
        let (watcher, _producer) = LogWatcher::new(1);
        watcher
    }

    /// Waits for the next record, error or end of production. Buffered
    /// records and a pending error are always reported before
    /// [`WatchEvent::ProducerGone`]. Cancel safe.
    pub async fn next_event(&mut self) -> WatchEvent {
        tokio::select! {
            biased;
            Some(record) = self.records.recv() => WatchEvent::Record(record),
            Some(error) = self.errors.recv() => WatchEvent::Error(error),
            () = self.producer_gone.cancelled() => WatchEvent::ProducerGone,
            else => WatchEvent::ProducerGone,
        }
    }

    /// Tells the producer nobody is reading any more.
    pub fn close(&self) {
        self.consumer_gone.cancel();
    }
}

impl Drop for LogWatcher {
    fn drop(&mut self) {
        self.consumer_gone.cancel();
    }
}

impl WatchProducer {
    /// Pushes a record, waiting for buffer space. Returns `false` once the
    /// consumer is gone, after which the caller should stop producing.
    pub async fn send(&self, record: LogRecord) -> bool {
        tokio::select! {
            sent = self.records.send(record) => sent.is_ok(),
            () = self.consumer_gone.cancelled() => false,
        }
    }

    /// Reports a read failure and ends production.
    pub fn fail(self, error: BackendError) {
        // Capacity 1 and a single call per producer, so this only fails if
        // the consumer already left.
        let _ = self.errors.try_send(error);
    }

    pub fn consumer_gone(&self) -> WaitForCancellationFuture<'_> {
        self.consumer_gone.cancelled()
    }

    #[must_use]
    pub fn is_consumer_gone(&self) -> bool {
        self.consumer_gone.is_cancelled()
    }
}

impl Drop for WatchProducer {
    fn drop(&mut self) {
        self.producer_gone.cancel();
    }
}
