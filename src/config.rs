// Core configuration

use crate::util::{get_env_bool, get_env_u32};

pub const RTMP_CHUNK_SIZE_DEFAULT: usize = 128;
pub const RTMP_MIN_CHUNK_SIZE: usize = 128;
pub const RTMP_MAX_CHUNK_SIZE: usize = 10 * 1024 * 1024;

pub const RTMP_WINDOW_ACK_SIZE_DEFAULT: u32 = 2_500_000;
pub const RTMP_PEER_BANDWIDTH_DEFAULT: u32 = 2_500_000;

/// Safe ceiling on an assembled message body, regardless of the negotiated
/// chunk size, so a misbehaving peer cannot force unbounded buffering.
pub const RTMP_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// How long the Track Reader keeps sniffing the stream before giving up on
/// an announced-but-never-configured track, or on bitstream sniffing with
/// no metadata at all.
pub const TRACK_ANALYZE_PERIOD_MS: i64 = 2_000;

/// Timeout applied to the handshake and to each blocking chunk-header read
/// on the connection's I/O path.
pub const RTMP_READ_TIMEOUT_SECONDS: u64 = 30;

/// Core-level knobs, loaded from the environment by hosts that want
/// environment-driven configuration; library users may also construct this
/// directly.
#[derive(Clone)]
pub struct CoreConfig {
    /// Chunk size advertised by this side of the connection
    pub chunk_size: usize,

    /// Window acknowledgement size advertised by this side
    pub window_ack_size: u32,

    /// Peer bandwidth advertised (server -> client only)
    pub peer_bandwidth: u32,

    /// Maximum accepted assembled message body, in bytes
    pub max_body_size: usize,

    /// Track analyze period, in milliseconds
    pub analyze_period_ms: i64,

    /// Read timeout applied to handshake and chunk-header reads, in seconds
    pub read_timeout_seconds: u64,

    /// True to log every protocol-level event at debug level
    pub log_requests: bool,

    /// True to request the RC4-obfuscated (version 6) handshake when
    /// connecting as a client. A server always echoes back whichever
    /// version the client requested, so this has no effect on the server
    /// role.
    pub obfuscated_handshake: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            chunk_size: RTMP_CHUNK_SIZE_DEFAULT,
            window_ack_size: RTMP_WINDOW_ACK_SIZE_DEFAULT,
            peer_bandwidth: RTMP_PEER_BANDWIDTH_DEFAULT,
            max_body_size: RTMP_MAX_BODY_SIZE,
            analyze_period_ms: TRACK_ANALYZE_PERIOD_MS,
            read_timeout_seconds: RTMP_READ_TIMEOUT_SECONDS,
            log_requests: true,
            obfuscated_handshake: false,
        }
    }
}

impl CoreConfig {
    /// Loads configuration from environment variables, falling back to the
    /// protocol defaults for anything unset or invalid.
    pub fn load_from_env() -> CoreConfig {
        let defaults = CoreConfig::default();

        let chunk_size =
            get_env_u32("RTMP_CHUNK_SIZE", defaults.chunk_size as u32) as usize;
        let chunk_size = chunk_size.clamp(RTMP_MIN_CHUNK_SIZE, RTMP_MAX_CHUNK_SIZE);

        CoreConfig {
            chunk_size,
            window_ack_size: get_env_u32("RTMP_WINDOW_ACK_SIZE", defaults.window_ack_size),
            peer_bandwidth: get_env_u32("RTMP_PEER_BANDWIDTH", defaults.peer_bandwidth),
            max_body_size: defaults.max_body_size,
            analyze_period_ms: defaults.analyze_period_ms,
            read_timeout_seconds: get_env_u32(
                "RTMP_READ_TIMEOUT_SECONDS",
                defaults.read_timeout_seconds as u32,
            ) as u64,
            log_requests: get_env_bool("RTMP_LOG_REQUESTS", defaults.log_requests),
            obfuscated_handshake: get_env_bool("RTMP_OBFUSCATED_HANDSHAKE", defaults.obfuscated_handshake),
        }
    }
}
