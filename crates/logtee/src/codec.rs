// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Frame codec shared by the ingest and read-back paths.
//!
//! Each frame is a 4-byte big-endian payload length followed by one protobuf
//! encoded [`LogEntry`]. The codec plugs into `tokio_util::codec::FramedRead`
//! and `FramedWrite`; a clean close between frames ends the stream, while a
//! close inside a frame surfaces as [`FrameError::Truncated`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder};

use crate::entry::{LogEntry, LogRecord};
use crate::errors::FrameError;

/// Size of the length prefix in bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest payload accepted by default, matching the runtime's own decoder.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_000_000;

#[derive(Debug, Clone, Copy)]
pub struct LogEntryCodec {
    max_frame_size: usize,
}

impl Default for LogEntryCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl LogEntryCodec {
    /// Limits are capped at `u32::MAX`, the largest length the prefix can carry.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as usize),
        }
    }

    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for LogEntryCodec {
    type Item = LogRecord;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&src[..HEADER_SIZE]);
        let size = u32::from_be_bytes(header) as usize;
        if size > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        if src.len() < HEADER_SIZE + size {
            src.reserve(HEADER_SIZE + size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(size);
        let entry = LogEntry::decode(payload.freeze())?;
        LogRecord::try_from(entry).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(record) => Ok(Some(record)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated {
                remaining: src.len(),
            }),
        }
    }
}

impl Encoder<LogRecord> for LogEntryCodec {
    type Error = FrameError;

    fn encode(&mut self, record: LogRecord, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<&LogRecord>::encode(self, &record, dst)
    }
}

impl Encoder<&LogRecord> for LogEntryCodec {
    type Error = FrameError;

    fn encode(&mut self, record: &LogRecord, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let entry = LogEntry::try_from(record)?;
        let size = entry.encoded_len();
        let too_large = FrameError::TooLarge {
            size,
            max: self.max_frame_size,
        };
        if size > self.max_frame_size {
            return Err(too_large);
        }
        let prefix = u32::try_from(size).map_err(|_| too_large)?;

        dst.reserve(HEADER_SIZE + size);
        dst.put_u32(prefix);
        entry.encode(dst)?;
        Ok(())
    }
}

/// Encodes a single record into a standalone frame.
pub fn encode_frame(record: &LogRecord) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::new();
    Encoder::<&LogRecord>::encode(&mut LogEntryCodec::default(), record, &mut buf)?;
    Ok(buf.freeze())
}
