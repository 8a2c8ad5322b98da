// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streaming tasks bridging byte streams and the fan-out logger.
//!
//! - [`ingest`] decodes frames from a producer pipe and logs each record.
//! - [`read_back`] drains a [`LogWatcher`] and writes every record as a frame.
//!
//! Both stop promptly when their cancellation token fires, even while waiting
//! on input or on a backend.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::codec::LogEntryCodec;
use crate::entry::LogRecord;
use crate::errors::{BackendError, FrameError};
use crate::fanout::FanoutLogger;
use crate::watch::{LogWatcher, WatchEvent};

/// Why an ingest pump stopped.
#[derive(Debug)]
pub enum IngestExit {
    /// The producer closed the pipe between frames.
    EndOfStream,
    Cancelled,
    /// The pipe carried something that is not a valid frame.
    Failed(FrameError),
}

/// Why a read-back pump stopped.
#[derive(Debug)]
pub enum ReadBackExit {
    /// The backend has nothing more to send.
    Completed,
    Cancelled,
    /// The output stream went away or rejected a frame.
    WriteFailed(FrameError),
    /// The backend reported a read failure.
    SourceFailed(BackendError),
}

/// Reads frames from `pipe` and hands each record to `logger` until the pipe
/// closes, a frame is invalid, or `cancel_token` fires.
///
/// Backend failures are reported and do not stop the pump. The pipe is
/// released before returning; closing the logger is left to the caller.
pub async fn ingest<R>(
    pipe_name: &str,
    pipe: R,
    logger: &FanoutLogger,
    cancel_token: &CancellationToken,
) -> IngestExit
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(pipe, LogEntryCodec::default());
    let mut logged: u64 = 0;

    let exit = loop {
        let frame = tokio::select! {
            frame = frames.next() => frame,
            () = cancel_token.cancelled() => break IngestExit::Cancelled,
        };

        let record = match frame {
            Some(Ok(record)) => record,
            Some(Err(e)) => break IngestExit::Failed(e),
            None => break IngestExit::EndOfStream,
        };

        trace!(pipe = pipe_name, "received {} byte line", record.line.len());
        tokio::select! {
            result = logger.log(&record) => {
                if let Err(e) = result {
                    warn!(pipe = pipe_name, "{}", e);
                }
                logged += 1;
            }
            () = cancel_token.cancelled() => break IngestExit::Cancelled,
        }
    };

    drop(frames);
    match &exit {
        IngestExit::EndOfStream => {
            debug!(pipe = pipe_name, "pipe closed after {} records", logged);
        }
        IngestExit::Cancelled => {
            debug!(pipe = pipe_name, "ingest cancelled after {} records", logged);
        }
        IngestExit::Failed(e) => error!(pipe = pipe_name, "error reading log pipe: {}", e),
    }
    exit
}

/// Forwards records from `watcher` to `output` as frames until the watch ends,
/// fails, the output breaks, or `cancel_token` fires.
///
/// On return the backend has been told the consumer is gone and the output has
/// been shut down.
pub async fn read_back<W>(
    mut watcher: LogWatcher,
    output: W,
    cancel_token: &CancellationToken,
) -> ReadBackExit
where
    W: AsyncWrite + Unpin,
{
    let mut frames = FramedWrite::new(output, LogEntryCodec::default());
    let mut sent: u64 = 0;

    let exit = loop {
        let event = tokio::select! {
            event = watcher.next_event() => event,
            () = cancel_token.cancelled() => break ReadBackExit::Cancelled,
        };

        match event {
            WatchEvent::Record(record) => {
                tokio::select! {
                    result = frames.send(record) => {
                        if let Err(e) = result {
                            break ReadBackExit::WriteFailed(e);
                        }
                        sent += 1;
                    }
                    () = cancel_token.cancelled() => break ReadBackExit::Cancelled,
                }
            }
            WatchEvent::Error(e) => break ReadBackExit::SourceFailed(e),
            WatchEvent::ProducerGone => break ReadBackExit::Completed,
        }
    };

    watcher.close();
    drop(watcher);
    if let Err(e) = SinkExt::<LogRecord>::close(&mut frames).await {
        debug!("failed to close read stream: {}", e);
    }

    match &exit {
        ReadBackExit::Completed => debug!("read finished after {} records", sent),
        ReadBackExit::Cancelled => debug!("read cancelled after {} records", sent),
        ReadBackExit::WriteFailed(e) => warn!("error writing log stream: {}", e),
        ReadBackExit::SourceFailed(e) => error!("error reading logs from backend: {}", e),
    }
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::codec::encode_frame;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use time::OffsetDateTime;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;
    use tracing_test::traced_test;

    struct Collect {
        records: Arc<Mutex<Vec<LogRecord>>>,
    }

    #[async_trait]
    impl Backend for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        async fn log(&self, record: LogRecord) -> Result<(), BackendError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }

        async fn close(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    struct Stuck;

    #[async_trait]
    impl Backend for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn log(&self, _record: LogRecord) -> Result<(), BackendError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn close(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn record(line: &str, secs: i64) -> LogRecord {
        LogRecord::new(
            line,
            "stdout",
            OffsetDateTime::from_unix_timestamp(secs).unwrap(),
        )
    }

    fn collecting_logger() -> (FanoutLogger, Arc<Mutex<Vec<LogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let logger = FanoutLogger::from_backends(vec![Box::new(Collect {
            records: Arc::clone(&records),
        })]);
        (logger, records)
    }

    async fn read_all_frames(mut reader: tokio::io::DuplexStream) -> Vec<LogRecord> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.unwrap();
        FramedRead::new(&bytes[..], LogEntryCodec::default())
            .map(|frame| frame.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_ingest_logs_records_in_order() {
        let (logger, records) = collecting_logger();
        let mut pipe = Vec::new();
        for (i, line) in ["one", "two", "three"].iter().enumerate() {
            pipe.extend_from_slice(&encode_frame(&record(line, i as i64)).unwrap());
        }

        let exit = ingest("test", &pipe[..], &logger, &CancellationToken::new()).await;
        assert!(matches!(exit, IngestExit::EndOfStream));

        let lines: Vec<Vec<u8>> = records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.line.clone())
            .collect();
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_ingest_stops_on_corrupt_frame() {
        let (logger, records) = collecting_logger();
        let mut pipe = encode_frame(&record("good", 1)).unwrap().to_vec();
        pipe.extend_from_slice(&[0, 0, 0, 3, 0x1a, 0x64, 0x00]);
        pipe.extend_from_slice(&encode_frame(&record("never", 2)).unwrap());

        let exit = ingest("test", &pipe[..], &logger, &CancellationToken::new()).await;
        assert!(matches!(exit, IngestExit::Failed(FrameError::Decode(_))));
        assert_eq!(records.lock().unwrap().len(), 1);
        assert!(logs_contain("error reading log pipe"));
    }

    #[tokio::test]
    async fn test_ingest_cancelled_while_waiting_for_input() {
        let (logger, _) = collecting_logger();
        let (_writer, reader) = tokio::io::duplex(64);
        let cancel_token = CancellationToken::new();

        let canceller = cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let exit = timeout(
            Duration::from_secs(1),
            ingest("test", reader, &logger, &cancel_token),
        )
        .await
        .expect("ingest should stop on cancellation");
        assert!(matches!(exit, IngestExit::Cancelled));
    }

    #[tokio::test]
    async fn test_ingest_cancelled_while_backend_blocks() {
        let logger = FanoutLogger::from_backends(vec![Box::new(Stuck)]);
        let (mut writer, reader) = tokio::io::duplex(1024);
        writer
            .write_all(&encode_frame(&record("hang", 1)).unwrap())
            .await
            .unwrap();
        let cancel_token = CancellationToken::new();

        let canceller = cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let exit = timeout(
            Duration::from_secs(1),
            ingest("test", reader, &logger, &cancel_token),
        )
        .await
        .expect("ingest should not wait for a stuck backend once cancelled");
        assert!(matches!(exit, IngestExit::Cancelled));
    }

    #[tokio::test]
    async fn test_read_back_reencodes_records() {
        let (watcher, producer) = LogWatcher::new(8);
        let (output, reader) = tokio::io::duplex(4096);
        let expected = vec![
            record("a", 1),
            record("b", 2).with_partial(crate::entry::PartialMetadata {
                id: "p".to_string(),
                last: true,
                ordinal: 3,
            }),
        ];

        let to_send = expected.clone();
        tokio::spawn(async move {
            for r in to_send {
                producer.send(r).await;
            }
        });

        let exit = read_back(watcher, output, &CancellationToken::new()).await;
        assert!(matches!(exit, ReadBackExit::Completed));
        assert_eq!(read_all_frames(reader).await, expected);
    }

    #[tokio::test]
    async fn test_read_back_empty_watch_ends_cleanly() {
        let (output, reader) = tokio::io::duplex(64);
        let exit = read_back(LogWatcher::empty(), output, &CancellationToken::new()).await;
        assert!(matches!(exit, ReadBackExit::Completed));
        assert!(read_all_frames(reader).await.is_empty());
    }

    #[tokio::test]
    async fn test_read_back_cancellation_does_not_wait_for_watch() {
        let (watcher, producer) = LogWatcher::new(8);
        let (output, reader) = tokio::io::duplex(64);
        let cancel_token = CancellationToken::new();

        let pump_token = cancel_token.clone();
        let pump = tokio::spawn(async move { read_back(watcher, output, &pump_token).await });

        tokio::task::yield_now().await;
        cancel_token.cancel();

        let exit = timeout(Duration::from_millis(200), pump)
            .await
            .expect("pump should exit promptly")
            .unwrap();
        assert!(matches!(exit, ReadBackExit::Cancelled));
        assert!(producer.is_consumer_gone());
        assert!(read_all_frames(reader).await.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_read_back_surfaces_backend_error() {
        let (watcher, producer) = LogWatcher::new(8);
        let (output, _reader) = tokio::io::duplex(64);
        producer.fail(BackendError::Other("corrupt log file".to_string()));

        let exit = read_back(watcher, output, &CancellationToken::new()).await;
        assert!(matches!(exit, ReadBackExit::SourceFailed(_)));
        assert!(logs_contain("corrupt log file"));
    }

    #[tokio::test]
    async fn test_read_back_stops_when_reader_goes_away() {
        let (watcher, producer) = LogWatcher::new(8);
        let (output, reader) = tokio::io::duplex(16);
        drop(reader);

        tokio::spawn(async move {
            while producer.send(record("spam", 1)).await {}
        });

        let exit = timeout(
            Duration::from_secs(1),
            read_back(watcher, output, &CancellationToken::new()),
        )
        .await
        .expect("pump should notice the closed output");
        assert!(matches!(exit, ReadBackExit::WriteFailed(_)));
    }
}
