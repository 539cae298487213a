// Connection state machine: handshake + connect/createStream/play/publish
// command exchange for either the client or server role.

mod auth;
mod client;
mod server;
mod url;

pub use auth::*;
pub use client::*;
pub use server::*;
pub use url::*;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::CoreConfig;
use crate::error::Result;
use crate::log::Logger;
use crate::message::Message;
use crate::raw_message::RawMessageIo;
use crate::util::ByteCounter;

const CHUNK_STREAM_ID_PROTOCOL: u32 = 2;
const CHUNK_STREAM_ID_COMMAND: u32 = 3;
const CHUNK_STREAM_ID_AUDIO: u32 = 4;
const CHUNK_STREAM_ID_VIDEO: u32 = 5;
const CHUNK_STREAM_ID_DATA: u32 = 6;
const DEFAULT_MESSAGE_STREAM_ID: u32 = 1;

/// Shared connection plumbing used by both [`Client`] and [`ServerConn`]:
/// the byte-counted transport, the raw message layer, and the negotiated
/// outcome of the control exchange.
pub struct Connection<S> {
    stream: ByteCounter<S>,
    io: RawMessageIo,
    pub(crate) logger: Logger,
    pub publish: bool,
    pub url: RtmpUrl,
    message_stream_id: u32,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(stream: S, config: &CoreConfig, logger: Logger, url: RtmpUrl, publish: bool) -> Connection<S> {
        let mut io = RawMessageIo::new(config.chunk_size, config.max_body_size);
        io.set_write_ack_window(config.window_ack_size);
        Connection {
            stream: ByteCounter::new(stream),
            io,
            logger,
            publish,
            url,
            message_stream_id: DEFAULT_MESSAGE_STREAM_ID,
        }
    }

    /// Assembles a `Connection` out of a byte-counted stream and raw message
    /// layer that already carry a connect exchange's traffic, used by
    /// [`ServerConn::accept`] once the negotiated url/role are finally known.
    pub(crate) fn from_parts(stream: ByteCounter<S>, io: RawMessageIo, logger: Logger, url: RtmpUrl, publish: bool) -> Connection<S> {
        Connection {
            stream,
            io,
            logger,
            publish,
            url,
            message_stream_id: DEFAULT_MESSAGE_STREAM_ID,
        }
    }

    pub async fn read_message(&mut self) -> Result<Message> {
        let (_, msg) = self.read_message_timed().await?;
        Ok(msg)
    }

    /// Reads the next application message along with the absolute timestamp
    /// (DTS, for Audio/Video) its chunks carried. The Track Reader needs
    /// this to drive the analyze-period timeout and to stamp access units.
    pub async fn read_message_timed(&mut self) -> Result<(u32, Message)> {
        let raw = self.io.read_message(&mut self.stream, &self.logger).await?;
        let timestamp = raw.timestamp;
        Ok((timestamp, Message::from_raw(&raw)?))
    }

    pub async fn write_message(&mut self, chunk_stream_id: u32, msg: &Message) -> Result<()> {
        self.write_message_at(chunk_stream_id, 0, msg).await
    }

    /// Writes a message stamped with an explicit timestamp, used by the
    /// Track Writer for Audio/Video frames.
    pub async fn write_message_at(&mut self, chunk_stream_id: u32, timestamp: u32, msg: &Message) -> Result<()> {
        let raw = msg.to_raw(chunk_stream_id, timestamp, self.message_stream_id);
        self.io.write_message(&mut self.stream, &raw, &self.logger).await
    }

    pub async fn write_command(&mut self, msg: &Message) -> Result<()> {
        self.write_message(CHUNK_STREAM_ID_COMMAND, msg).await
    }

    pub async fn write_data(&mut self, msg: &Message) -> Result<()> {
        self.write_message(CHUNK_STREAM_ID_DATA, msg).await
    }

    pub async fn write_audio(&mut self, msg: &Message) -> Result<()> {
        self.write_message(CHUNK_STREAM_ID_AUDIO, msg).await
    }

    pub async fn write_video(&mut self, msg: &Message) -> Result<()> {
        self.write_message(CHUNK_STREAM_ID_VIDEO, msg).await
    }

    pub async fn write_audio_at(&mut self, timestamp: u32, msg: &Message) -> Result<()> {
        self.write_message_at(CHUNK_STREAM_ID_AUDIO, timestamp, msg).await
    }

    pub async fn write_video_at(&mut self, timestamp: u32, msg: &Message) -> Result<()> {
        self.write_message_at(CHUNK_STREAM_ID_VIDEO, timestamp, msg).await
    }

    pub fn bytes_received(&self) -> u64 {
        self.stream.bytes_read()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.stream.bytes_written()
    }

    /// Closing is the caller's responsibility on the underlying transport
    /// (shutting down a TcpStream, dropping a TLS session, ...); this core
    /// exposes no transport-level close of its own beyond dropping the
    /// Connection.
    pub fn close(self) -> S {
        self.stream.into_inner()
    }
}
