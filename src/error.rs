// Crate-wide error type

use thiserror::Error;

/// Errors surfaced by every layer of the RTMP core
#[derive(Error, Debug)]
pub enum RtmpError {
    // Framing (chunk stream layer)
    #[error("short buffer: needed {needed} bytes, {available} available")]
    ShortBuffer { needed: usize, available: usize },

    #[error("invalid chunk header: {0}")]
    InvalidChunkHeader(String),

    #[error("extended chunk stream ids (0/1 basic header forms) are not supported on read")]
    ExtendedChunkStreamUnsupported,

    #[error("chunk size {0} exceeds the configured maximum")]
    ChunkSizeTooLarge(usize),

    #[error("message body of {0} bytes exceeds the configured maximum")]
    BodyTooLarge(usize),

    #[error("out of order chunk: format {format} received for chunk stream {chunk_stream_id} with no compatible predecessor state")]
    OutOfOrderChunk { format: u8, chunk_stream_id: u32 },

    // AMF0
    #[error("unsupported AMF0 marker byte 0x{0:02x}")]
    UnsupportedMarker(u8),

    #[error("invalid AMF0 object: {0}")]
    InvalidObject(String),

    // Handshake
    #[error("unsupported handshake version byte {0}")]
    UnsupportedVersion(u8),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    // Flow control
    #[error("write would exceed acknowledgement window (ack={ack_value}, window={window})")]
    AckWindowExceeded { ack_value: u32, window: u32 },

    // Connection / command exchange
    #[error("unexpected command {name:?} (transaction id {transaction_id})")]
    UnexpectedCommand { name: String, transaction_id: f64 },

    #[error("bad result for command {0:?}")]
    BadResult(String),

    #[error("invalid connect arguments: {0}")]
    InvalidConnect(String),

    #[error("invalid play arguments: {0}")]
    InvalidPlayArguments(String),

    #[error("invalid publish arguments: {0}")]
    InvalidPublishArguments(String),

    #[error("invalid RTMP URL: {0}")]
    InvalidURL(String),

    #[error("server requires Adobe authentication: realm salt={salt:?} challenge={challenge:?}")]
    NeedAuth { salt: String, challenge: String },

    #[error("Adobe authentication failed")]
    AuthenticationFailed,

    // Track reader/writer
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("no supported codecs found in the stream")]
    NoSupportedCodecs,

    #[error("track parameters are not yet available for {0}")]
    MissingTrackParameters(String),

    #[error("invalid decoder configuration record: {0}")]
    InvalidDecoderConfig(String),

    #[error("only a single G.711 track is allowed per direction")]
    MultipleG711NotAllowed,

    #[error("unsupported sample rate {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("multitrack wrapper type {0} is not supported")]
    UnsupportedMultitrack(u8),

    // Transport
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RtmpError>;
