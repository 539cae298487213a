// Chunk stream framing: splits/reassembles RTMP messages into fixed-size
// chunks, tracked per chunk-stream-id.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::RTMP_READ_TIMEOUT_SECONDS;
use crate::error::{Result, RtmpError};
use crate::log::Logger;
use crate::{log_debug, log_trace};

/// A message as reassembled from one or more chunks, still message-type tagged
/// but not yet interpreted by the message codec.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub chunk_stream_id: u32,
    pub timestamp: u32,
    pub message_type_id: u8,
    pub message_stream_id: u32,
    pub body: Vec<u8>,
}

#[derive(Clone)]
struct ChunkStreamState {
    timestamp: u32,
    message_length: usize,
    message_type_id: u8,
    message_stream_id: u32,
    has_extended_timestamp: bool,
    /// Bytes of the in-progress message body accumulated so far
    partial: Vec<u8>,
}

/// Reassembles chunks for every active chunk-stream-id into complete
/// [`RawMessage`]s, enforcing the negotiated chunk size and a hard ceiling
/// on assembled message size.
pub struct ChunkReader {
    chunk_size: usize,
    max_body_size: usize,
    read_timeout: Duration,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkReader {
    pub fn new(chunk_size: usize, max_body_size: usize) -> ChunkReader {
        ChunkReader {
            chunk_size,
            max_body_size,
            read_timeout: Duration::from_secs(RTMP_READ_TIMEOUT_SECONDS),
            streams: HashMap::new(),
        }
    }

    /// Adjusts the chunk size in response to a `SetChunkSize` message
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size;
    }

    /// Reads chunks from `stream` until a complete message is assembled.
    pub async fn read_message<S>(&mut self, stream: &mut S, logger: &Logger) -> Result<RawMessage>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Some(msg) = self.read_one_chunk(stream, logger).await? {
                return Ok(msg);
            }
        }
    }

    async fn read_u8_timed<S: AsyncRead + Unpin>(&self, stream: &mut S) -> Result<u8> {
        match timeout(self.read_timeout, stream.read_u8()).await {
            Ok(r) => Ok(r?),
            Err(_) => Err(RtmpError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out reading chunk header",
            ))),
        }
    }

    async fn read_exact_timed<S: AsyncRead + Unpin>(&self, stream: &mut S, buf: &mut [u8]) -> Result<()> {
        match timeout(self.read_timeout, stream.read_exact(buf)).await {
            Ok(r) => {
                r?;
                Ok(())
            }
            Err(_) => Err(RtmpError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out reading chunk body",
            ))),
        }
    }

    /// Reads and processes a single chunk. Returns `Some(message)` once the
    /// chunk completes an in-progress message.
    async fn read_one_chunk<S>(&mut self, stream: &mut S, logger: &Logger) -> Result<Option<RawMessage>>
    where
        S: AsyncRead + Unpin,
    {
        let start_byte = self.read_u8_timed(stream).await?;
        let format = start_byte >> 6;
        let basic_id = start_byte & 0x3f;

        let chunk_stream_id: u32 = match basic_id {
            0 => return Err(RtmpError::ExtendedChunkStreamUnsupported),
            1 => return Err(RtmpError::ExtendedChunkStreamUnsupported),
            id => id as u32,
        };

        log_trace!(
            logger,
            format!("chunk format={} chunk_stream_id={}", format, chunk_stream_id)
        );

        let mut timestamp_field: u32 = 0;
        let mut message_length: Option<usize> = None;
        let mut message_type_id: Option<u8> = None;
        let mut message_stream_id: Option<u32> = None;

        match format {
            0 => {
                let mut header = [0u8; 11];
                self.read_exact_timed(stream, &mut header).await?;
                timestamp_field = u24_be(&header[0..3]);
                message_length = Some(u24_be(&header[3..6]) as usize);
                message_type_id = Some(header[6]);
                message_stream_id = Some(u32::from_be_bytes([header[7], header[8], header[9], header[10]]));
            }
            1 => {
                let mut header = [0u8; 7];
                self.read_exact_timed(stream, &mut header).await?;
                timestamp_field = u24_be(&header[0..3]);
                message_length = Some(u24_be(&header[3..6]) as usize);
                message_type_id = Some(header[6]);
            }
            2 => {
                let mut header = [0u8; 3];
                self.read_exact_timed(stream, &mut header).await?;
                timestamp_field = u24_be(&header[0..3]);
            }
            3 => {}
            _ => unreachable!("format is a 2-bit field"),
        }

        let extended_timestamp_present = timestamp_field == 0xFFFFFF;

        let predecessor = self.streams.get(&chunk_stream_id).cloned();

        if format != 0 && predecessor.is_none() {
            return Err(RtmpError::OutOfOrderChunk { format, chunk_stream_id });
        }

        let mut extended_ts_continuation = false;
        if format == 3 {
            if let Some(pred) = &predecessor {
                // Format 3 carries an extended timestamp only when the
                // in-progress message itself started with one.
                extended_ts_continuation = pred.has_extended_timestamp && pred.partial.len() < pred.message_length;
            }
        }

        let read_extended = extended_timestamp_present || extended_ts_continuation;
        let full_timestamp = if read_extended {
            let mut ext = [0u8; 4];
            self.read_exact_timed(stream, &mut ext).await?;
            u32::from_be_bytes(ext)
        } else {
            timestamp_field
        };

        let (resolved_length, resolved_type, resolved_stream_id, is_new_message, base_timestamp, has_extended_timestamp) =
            match format {
                0 => (
                    message_length.unwrap(),
                    message_type_id.unwrap(),
                    message_stream_id.unwrap(),
                    true,
                    full_timestamp,
                    extended_timestamp_present,
                ),
                1 => {
                    let pred = predecessor.as_ref().unwrap();
                    (
                        message_length.unwrap(),
                        message_type_id.unwrap(),
                        pred.message_stream_id,
                        true,
                        pred.timestamp.wrapping_add(full_timestamp),
                        extended_timestamp_present,
                    )
                }
                2 => {
                    let pred = predecessor.as_ref().unwrap();
                    (
                        pred.message_length,
                        pred.message_type_id,
                        pred.message_stream_id,
                        true,
                        pred.timestamp.wrapping_add(full_timestamp),
                        extended_timestamp_present,
                    )
                }
                3 => {
                    let pred = predecessor.as_ref().unwrap();
                    if pred.partial.len() < pred.message_length {
                        // Continuation of an in-progress message: keep predecessor metadata.
                        (
                            pred.message_length,
                            pred.message_type_id,
                            pred.message_stream_id,
                            false,
                            pred.timestamp,
                            pred.has_extended_timestamp,
                        )
                    } else {
                        // A new message reusing the predecessor's full metadata.
                        let ts = if extended_ts_continuation { full_timestamp } else { pred.timestamp.wrapping_add(0) };
                        (
                            pred.message_length,
                            pred.message_type_id,
                            pred.message_stream_id,
                            true,
                            ts,
                            pred.has_extended_timestamp,
                        )
                    }
                }
                _ => unreachable!(),
            };

        if resolved_length > self.max_body_size {
            return Err(RtmpError::BodyTooLarge(resolved_length));
        }

        let mut state = if is_new_message {
            ChunkStreamState {
                timestamp: base_timestamp,
                message_length: resolved_length,
                message_type_id: resolved_type,
                message_stream_id: resolved_stream_id,
                has_extended_timestamp: has_extended_timestamp,
                partial: Vec::with_capacity(resolved_length.min(self.max_body_size)),
            }
        } else {
            predecessor.unwrap()
        };

        let remaining = state.message_length - state.partial.len();
        let to_read = remaining.min(self.chunk_size);

        let mut buf = vec![0u8; to_read];
        self.read_exact_timed(stream, &mut buf).await?;
        state.partial.extend_from_slice(&buf);

        let complete = state.partial.len() >= state.message_length;

        let result = if complete {
            log_debug!(
                logger,
                format!(
                    "assembled message type={} len={} chunk_stream_id={}",
                    state.message_type_id,
                    state.message_length,
                    chunk_stream_id
                )
            );
            Some(RawMessage {
                chunk_stream_id,
                timestamp: state.timestamp,
                message_type_id: state.message_type_id,
                message_stream_id: state.message_stream_id,
                body: std::mem::take(&mut state.partial),
            })
        } else {
            None
        };

        self.streams.insert(chunk_stream_id, state);

        Ok(result)
    }
}

fn u24_be(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32)
}

/// Writes messages as format-0 chunks, split at the negotiated chunk size.
/// This core always emits format 0 for simplicity; real encoders use
/// deltas to save bytes, which is an optimization rather than a protocol
/// requirement.
pub struct ChunkWriter {
    chunk_size: usize,
}

impl ChunkWriter {
    pub fn new(chunk_size: usize) -> ChunkWriter {
        ChunkWriter { chunk_size }
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size;
    }

    /// Encodes `message` as a sequence of chunks and appends the bytes to `out`.
    pub fn encode_message(&self, out: &mut Vec<u8>, msg: &RawMessage) {
        let mut offset = 0usize;
        let mut first = true;

        while offset < msg.body.len() || (msg.body.is_empty() && first) {
            let basic_id = msg.chunk_stream_id as u8 & 0x3f;

            if first {
                out.push(0x00 | basic_id);
                let ts = if msg.timestamp >= 0xFFFFFF { 0xFFFFFF } else { msg.timestamp };
                out.extend_from_slice(&ts.to_be_bytes()[1..4]);
                out.extend_from_slice(&(msg.body.len() as u32).to_be_bytes()[1..4]);
                out.push(msg.message_type_id);
                out.extend_from_slice(&msg.message_stream_id.to_be_bytes());
                if msg.timestamp >= 0xFFFFFF {
                    out.extend_from_slice(&msg.timestamp.to_be_bytes());
                }
            } else {
                out.push(0xC0 | basic_id);
                if msg.timestamp >= 0xFFFFFF {
                    out.extend_from_slice(&msg.timestamp.to_be_bytes());
                }
            }

            let remaining = msg.body.len() - offset;
            let take = remaining.min(self.chunk_size);
            out.extend_from_slice(&msg.body[offset..offset + take]);
            offset += take;
            first = false;

            if msg.body.is_empty() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogConfig;

    fn logger() -> Logger {
        Logger::new(LogConfig::default())
    }

    #[tokio::test]
    async fn test_round_trip_single_chunk_message() {
        let msg = RawMessage {
            chunk_stream_id: 3,
            timestamp: 100,
            message_type_id: 20,
            message_stream_id: 1,
            body: b"hello world".to_vec(),
        };

        let writer = ChunkWriter::new(128);
        let mut bytes = Vec::new();
        writer.encode_message(&mut bytes, &msg);

        let mut cursor = std::io::Cursor::new(bytes);
        let mut reader = ChunkReader::new(128, 1024 * 1024);
        let decoded = reader.read_message(&mut cursor, &logger()).await.unwrap();

        assert_eq!(decoded.chunk_stream_id, 3);
        assert_eq!(decoded.timestamp, 100);
        assert_eq!(decoded.message_type_id, 20);
        assert_eq!(decoded.message_stream_id, 1);
        assert_eq!(decoded.body, b"hello world");
    }

    #[tokio::test]
    async fn test_round_trip_multi_chunk_message() {
        let body: Vec<u8> = (0..300u32).map(|v| (v % 256) as u8).collect();
        let msg = RawMessage {
            chunk_stream_id: 4,
            timestamp: 0,
            message_type_id: 9,
            message_stream_id: 1,
            body: body.clone(),
        };

        let writer = ChunkWriter::new(128);
        let mut bytes = Vec::new();
        writer.encode_message(&mut bytes, &msg);

        let mut cursor = std::io::Cursor::new(bytes);
        let mut reader = ChunkReader::new(128, 1024 * 1024);
        let decoded = reader.read_message(&mut cursor, &logger()).await.unwrap();

        assert_eq!(decoded.body, body);
    }

    #[tokio::test]
    async fn test_body_too_large_rejected() {
        let mut header = vec![0x03u8]; // format 0, chunk stream id 3
        header.extend_from_slice(&0u32.to_be_bytes()[1..4]); // timestamp
        header.extend_from_slice(&(20_000_000u32).to_be_bytes()[1..4]); // length
        header.push(8);
        header.extend_from_slice(&1u32.to_be_bytes());

        let mut cursor = std::io::Cursor::new(header);
        let mut reader = ChunkReader::new(128, 1024 * 1024);
        let err = reader.read_message(&mut cursor, &logger()).await.unwrap_err();
        assert!(matches!(err, RtmpError::BodyTooLarge(20_000_000)));
    }

    #[tokio::test]
    async fn test_message_stream_id_is_big_endian() {
        // chunk_stream_id=25, timestamp=11641233, message_type_id=20,
        // message_stream_id=0x035D173D=56432445, length=20.
        let mut header = vec![0x19u8];
        header.extend_from_slice(&11_641_233u32.to_be_bytes()[1..4]);
        header.extend_from_slice(&20u32.to_be_bytes()[1..4]);
        header.push(20);
        header.extend_from_slice(&[0x03, 0x5d, 0x17, 0x3d]);
        header.extend_from_slice(&[1u8, 2, 3, 4]);
        header.extend_from_slice(&[0u8; 16]);

        let mut cursor = std::io::Cursor::new(header);
        let mut reader = ChunkReader::new(20, 1024 * 1024);
        let decoded = reader.read_message(&mut cursor, &logger()).await.unwrap();

        assert_eq!(decoded.chunk_stream_id, 25);
        assert_eq!(decoded.timestamp, 11_641_233);
        assert_eq!(decoded.message_type_id, 20);
        assert_eq!(decoded.message_stream_id, 56_432_445);
        assert_eq!(decoded.body.len(), 20);
        assert_eq!(&decoded.body[..4], &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_extended_timestamp_continuation_round_trips() {
        let body: Vec<u8> = (0..300u32).map(|v| (v % 256) as u8).collect();
        let msg = RawMessage {
            chunk_stream_id: 4,
            timestamp: 0xFFFFFF + 10,
            message_type_id: 9,
            message_stream_id: 1,
            body: body.clone(),
        };

        let writer = ChunkWriter::new(128);
        let mut bytes = Vec::new();
        writer.encode_message(&mut bytes, &msg);

        let mut cursor = std::io::Cursor::new(bytes);
        let mut reader = ChunkReader::new(128, 1024 * 1024);
        let decoded = reader.read_message(&mut cursor, &logger()).await.unwrap();

        assert_eq!(decoded.timestamp, 0xFFFFFF + 10);
        assert_eq!(decoded.body, body);
    }

    #[tokio::test]
    async fn test_extended_chunk_stream_id_rejected() {
        let cursor_bytes = vec![0x00u8, 0x00, 0x00];
        let mut cursor = std::io::Cursor::new(cursor_bytes);
        let mut reader = ChunkReader::new(128, 1024 * 1024);
        let err = reader.read_message(&mut cursor, &logger()).await.unwrap_err();
        assert!(matches!(err, RtmpError::ExtendedChunkStreamUnsupported));
    }

    #[tokio::test]
    async fn test_format1_without_predecessor_is_out_of_order() {
        let mut header = vec![0x40u8 | 5]; // format 1, chunk stream id 5
        header.extend_from_slice(&0u32.to_be_bytes()[1..4]);
        header.extend_from_slice(&10u32.to_be_bytes()[1..4]);
        header.push(8);

        let mut cursor = std::io::Cursor::new(header);
        let mut reader = ChunkReader::new(128, 1024 * 1024);
        let err = reader.read_message(&mut cursor, &logger()).await.unwrap_err();
        assert!(matches!(
            err,
            RtmpError::OutOfOrderChunk { format: 1, chunk_stream_id: 5 }
        ));
    }
}
