// RTMP / Extended RTMP protocol core: handshake, chunk framing, AMF0
// codec, connection state machine, and codec-typed track reader/writer.

pub mod adapter;
pub mod amf;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod log;
pub mod message;
pub mod raw_message;
pub mod track;
pub mod util;

pub use adapter::{ExternalFormat, FromStream, ToStream, UnitSink};
pub use config::CoreConfig;
pub use connection::{Client, RtmpUrl, ServerConn};
pub use error::{Result, RtmpError};
pub use message::{FourCc, Message};
pub use track::{AccessUnit, AudioTrack, Track, TrackReader, TrackWriter, VideoTrack};
