// Window-acknowledgement flow control wrapped around the chunk layer.
//
// This layer owns the conversation's byte counters and transparently acts
// on SetChunkSize / SetWindowAckSize / Acknowledge so that callers above it
// only ever see application-level messages.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::chunk::{ChunkReader, ChunkWriter, RawMessage};
use crate::error::{Result, RtmpError};
use crate::log::Logger;
use crate::{log_debug, log_trace};

pub const MESSAGE_TYPE_SET_CHUNK_SIZE: u8 = 1;
pub const MESSAGE_TYPE_ABORT: u8 = 2;
pub const MESSAGE_TYPE_ACKNOWLEDGEMENT: u8 = 3;
pub const MESSAGE_TYPE_USER_CONTROL: u8 = 4;
pub const MESSAGE_TYPE_WINDOW_ACK_SIZE: u8 = 5;
pub const MESSAGE_TYPE_SET_PEER_BANDWIDTH: u8 = 6;
pub const MESSAGE_TYPE_AUDIO: u8 = 8;
pub const MESSAGE_TYPE_VIDEO: u8 = 9;
pub const MESSAGE_TYPE_DATA_AMF0: u8 = 18;
pub const MESSAGE_TYPE_SHARED_OBJECT_AMF0: u8 = 19;
pub const MESSAGE_TYPE_COMMAND_AMF0: u8 = 20;

const DEFAULT_CHUNK_STREAM_ID_PROTOCOL: u32 = 2;

/// Owns the read/write halves of the chunk layer plus the window
/// acknowledgement bookkeeping for a single connection.
pub struct RawMessageIo {
    reader: ChunkReader,
    writer: ChunkWriter,

    bytes_read_total: u64,
    bytes_read_at_last_ack: u64,
    read_window: Option<u32>,

    bytes_written_total: u64,
    write_ack_limit: Option<(u32, u32)>,
    last_peer_ack: u64,
}

impl RawMessageIo {
    pub fn new(chunk_size: usize, max_body_size: usize) -> RawMessageIo {
        RawMessageIo {
            reader: ChunkReader::new(chunk_size, max_body_size),
            writer: ChunkWriter::new(chunk_size),
            bytes_read_total: 0,
            bytes_read_at_last_ack: 0,
            read_window: None,
            bytes_written_total: 0,
            write_ack_limit: None,
            last_peer_ack: 0,
        }
    }

    /// Reads the next application message, transparently consuming protocol
    /// control messages and emitting `Acknowledge` when the read window is
    /// crossed.
    pub async fn read_message<S>(&mut self, stream: &mut S, logger: &Logger) -> Result<RawMessage>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let msg = self.reader.read_message(stream, logger).await?;
            self.bytes_read_total += msg.body.len() as u64 + header_cost_estimate();

            if let Some(window) = self.read_window {
                if self.bytes_read_total - self.bytes_read_at_last_ack >= window as u64 {
                    self.bytes_read_at_last_ack = self.bytes_read_total;
                    self.send_acknowledge(stream, logger).await?;
                }
            }

            match msg.message_type_id {
                MESSAGE_TYPE_SET_CHUNK_SIZE => {
                    if msg.body.len() >= 4 {
                        let size = u32::from_be_bytes([msg.body[0], msg.body[1], msg.body[2], msg.body[3]]) & 0x7FFFFFFF;
                        log_debug!(logger, format!("peer set chunk size to {}", size));
                        self.reader.set_chunk_size(size as usize);
                    }
                    continue;
                }
                MESSAGE_TYPE_WINDOW_ACK_SIZE => {
                    if msg.body.len() >= 4 {
                        let window = u32::from_be_bytes([msg.body[0], msg.body[1], msg.body[2], msg.body[3]]);
                        log_debug!(logger, format!("peer window ack size set to {}", window));
                        self.read_window = Some(window);
                    }
                    continue;
                }
                MESSAGE_TYPE_ACKNOWLEDGEMENT => {
                    if msg.body.len() >= 4 {
                        let ack = u32::from_be_bytes([msg.body[0], msg.body[1], msg.body[2], msg.body[3]]);
                        log_trace!(logger, format!("received ack {}", ack));
                        self.last_peer_ack = ack as u64;
                    }
                    continue;
                }
                _ => return Ok(msg),
            }
        }
    }

    async fn send_acknowledge<S>(&mut self, stream: &mut S, logger: &Logger) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let value = (self.bytes_read_total & 0xFFFFFFFF) as u32;
        log_trace!(logger, format!("emitting acknowledge {}", value));
        let msg = RawMessage {
            chunk_stream_id: DEFAULT_CHUNK_STREAM_ID_PROTOCOL,
            timestamp: 0,
            message_type_id: MESSAGE_TYPE_ACKNOWLEDGEMENT,
            message_stream_id: 0,
            body: value.to_be_bytes().to_vec(),
        };
        self.write_message_raw(stream, &msg).await
    }

    /// Sets the window acknowledgement size this side enforces on its own
    /// writes (i.e. what we told the peer via `SetWindowAckSize`).
    pub fn set_write_ack_window(&mut self, window: u32) {
        self.write_ack_limit = Some((0, window));
    }

    /// Writes an application message, enforcing the outbound ack window if one
    /// was negotiated.
    pub async fn write_message<S>(&mut self, stream: &mut S, msg: &RawMessage, logger: &Logger) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        if let Some((_, window)) = self.write_ack_limit {
            let projected = self.bytes_written_total + msg.body.len() as u64;
            if projected > self.last_peer_ack + window as u64 {
                return Err(RtmpError::AckWindowExceeded {
                    ack_value: self.last_peer_ack as u32,
                    window,
                });
            }
        }

        if msg.message_type_id == MESSAGE_TYPE_SET_CHUNK_SIZE && msg.body.len() >= 4 {
            let size = u32::from_be_bytes([msg.body[0], msg.body[1], msg.body[2], msg.body[3]]);
            self.writer.set_chunk_size(size as usize);
        }

        self.write_message_raw(stream, msg).await?;
        let _ = logger;
        Ok(())
    }

    async fn write_message_raw<S>(&mut self, stream: &mut S, msg: &RawMessage) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let mut bytes = Vec::new();
        self.writer.encode_message(&mut bytes, msg);
        self.bytes_written_total += msg.body.len() as u64;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read_total
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written_total
    }
}

/// Rough per-message protocol overhead (basic + message header, ignoring
/// inter-chunk repetition), good enough for acknowledgement-window timing.
fn header_cost_estimate() -> u64 {
    12
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogConfig;

    fn logger() -> Logger {
        Logger::new(LogConfig::default())
    }

    #[tokio::test]
    async fn test_set_chunk_size_applied_transparently() {
        let (mut client, mut server) = tokio::io::duplex(1 << 16);

        let set_chunk_size = RawMessage {
            chunk_stream_id: 2,
            timestamp: 0,
            message_type_id: MESSAGE_TYPE_SET_CHUNK_SIZE,
            message_stream_id: 0,
            body: 4096u32.to_be_bytes().to_vec(),
        };

        let data = RawMessage {
            chunk_stream_id: 4,
            timestamp: 0,
            message_type_id: MESSAGE_TYPE_AUDIO,
            message_stream_id: 1,
            body: vec![0xAF, 0x01, 0x02, 0x03],
        };

        let mut writer_io = RawMessageIo::new(128, 1024 * 1024);
        writer_io.write_message(&mut client, &set_chunk_size, &logger()).await.unwrap();
        writer_io.write_message(&mut client, &data, &logger()).await.unwrap();

        let mut reader_io = RawMessageIo::new(128, 1024 * 1024);
        let received = reader_io.read_message(&mut server, &logger()).await.unwrap();

        assert_eq!(received.message_type_id, MESSAGE_TYPE_AUDIO);
        assert_eq!(received.body, vec![0xAF, 0x01, 0x02, 0x03]);
    }

    #[tokio::test]
    async fn test_ack_window_exceeded_without_peer_ack() {
        let (mut client, _server) = tokio::io::duplex(1 << 20);

        let mut writer_io = RawMessageIo::new(128, 1024 * 1024);
        writer_io.set_write_ack_window(100);

        let big = RawMessage {
            chunk_stream_id: 4,
            timestamp: 0,
            message_type_id: MESSAGE_TYPE_VIDEO,
            message_stream_id: 1,
            body: vec![0u8; 200],
        };

        let err = writer_io.write_message(&mut client, &big, &logger()).await.unwrap_err();
        assert!(matches!(err, RtmpError::AckWindowExceeded { .. }));
    }
}
