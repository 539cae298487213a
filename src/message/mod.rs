// Message codec: the tagged union of every RTMP and E-RTMP message type,
// built on top of the raw chunk-assembled message.

mod audio;
mod command;
mod user_control;
mod video;

pub use audio::*;
pub use command::*;
pub use user_control::*;
pub use video::*;

use crate::chunk::RawMessage;
use crate::error::{Result, RtmpError};
use crate::raw_message::{
    MESSAGE_TYPE_ABORT, MESSAGE_TYPE_ACKNOWLEDGEMENT, MESSAGE_TYPE_AUDIO, MESSAGE_TYPE_COMMAND_AMF0,
    MESSAGE_TYPE_DATA_AMF0, MESSAGE_TYPE_SET_CHUNK_SIZE, MESSAGE_TYPE_SET_PEER_BANDWIDTH,
    MESSAGE_TYPE_SHARED_OBJECT_AMF0, MESSAGE_TYPE_USER_CONTROL, MESSAGE_TYPE_VIDEO,
    MESSAGE_TYPE_WINDOW_ACK_SIZE,
};

/// A 4-byte codec identifier, used by the E-RTMP extended audio/video
/// message family (`avc1`, `hvc1`, `av01`, `vp09`, `mp4a`, `Opus`, `ac-3`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub fn from_bytes(b: &[u8]) -> Result<FourCc> {
        if b.len() < 4 {
            return Err(RtmpError::ShortBuffer { needed: 4, available: b.len() });
        }
        Ok(FourCc([b[0], b[1], b[2], b[3]]))
    }
}

impl std::fmt::Display for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// The negotiated dynamic/limit type argument of `SetPeerBandwidth`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBandwidthLimitType {
    Hard,
    Soft,
    Dynamic,
}

impl PeerBandwidthLimitType {
    fn to_byte(self) -> u8 {
        match self {
            PeerBandwidthLimitType::Hard => 0,
            PeerBandwidthLimitType::Soft => 1,
            PeerBandwidthLimitType::Dynamic => 2,
        }
    }

    fn from_byte(b: u8) -> PeerBandwidthLimitType {
        match b {
            0 => PeerBandwidthLimitType::Hard,
            1 => PeerBandwidthLimitType::Soft,
            _ => PeerBandwidthLimitType::Dynamic,
        }
    }
}

/// Every message this core recognizes, unified over the plain RTMP and
/// E-RTMP message families.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SetChunkSize(u32),
    Abort(u32),
    Acknowledge(u32),
    SetWindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: PeerBandwidthLimitType },
    UserControl(UserControlEvent),
    CommandAmf0(Command),
    DataAmf0(DataMessage),
    Audio(AudioPayload),
    Video(VideoPayload),
}

impl Message {
    /// Decodes a message from its chunk-assembled wire form
    pub fn from_raw(raw: &RawMessage) -> Result<Message> {
        let body = &raw.body;

        let read_u32 = |b: &[u8]| -> Result<u32> {
            if b.len() < 4 {
                return Err(RtmpError::ShortBuffer { needed: 4, available: b.len() });
            }
            Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        };

        match raw.message_type_id {
            MESSAGE_TYPE_SET_CHUNK_SIZE => Ok(Message::SetChunkSize(read_u32(body)? & 0x7FFFFFFF)),
            MESSAGE_TYPE_ABORT => Ok(Message::Abort(read_u32(body)?)),
            MESSAGE_TYPE_ACKNOWLEDGEMENT => Ok(Message::Acknowledge(read_u32(body)?)),
            MESSAGE_TYPE_WINDOW_ACK_SIZE => Ok(Message::SetWindowAckSize(read_u32(body)?)),
            MESSAGE_TYPE_SET_PEER_BANDWIDTH => {
                if body.len() < 5 {
                    return Err(RtmpError::ShortBuffer { needed: 5, available: body.len() });
                }
                Ok(Message::SetPeerBandwidth {
                    size: read_u32(body)?,
                    limit_type: PeerBandwidthLimitType::from_byte(body[4]),
                })
            }
            MESSAGE_TYPE_USER_CONTROL => Ok(Message::UserControl(UserControlEvent::decode(body)?)),
            MESSAGE_TYPE_COMMAND_AMF0 | MESSAGE_TYPE_SHARED_OBJECT_AMF0 => {
                Ok(Message::CommandAmf0(Command::decode(body)?))
            }
            MESSAGE_TYPE_DATA_AMF0 => Ok(Message::DataAmf0(DataMessage::decode(body)?)),
            MESSAGE_TYPE_AUDIO => Ok(Message::Audio(AudioPayload::decode(body)?)),
            MESSAGE_TYPE_VIDEO => Ok(Message::Video(VideoPayload::decode(body)?)),
            other => Err(RtmpError::InvalidChunkHeader(format!("unsupported message type {}", other))),
        }
    }

    /// Encodes the message onto a chunk stream id and message stream id,
    /// producing the RawMessage the chunk layer can frame.
    pub fn to_raw(&self, chunk_stream_id: u32, timestamp: u32, message_stream_id: u32) -> RawMessage {
        let (message_type_id, body) = match self {
            Message::SetChunkSize(size) => (MESSAGE_TYPE_SET_CHUNK_SIZE, size.to_be_bytes().to_vec()),
            Message::Abort(id) => (MESSAGE_TYPE_ABORT, id.to_be_bytes().to_vec()),
            Message::Acknowledge(v) => (MESSAGE_TYPE_ACKNOWLEDGEMENT, v.to_be_bytes().to_vec()),
            Message::SetWindowAckSize(v) => (MESSAGE_TYPE_WINDOW_ACK_SIZE, v.to_be_bytes().to_vec()),
            Message::SetPeerBandwidth { size, limit_type } => {
                let mut body = size.to_be_bytes().to_vec();
                body.push(limit_type.to_byte());
                (MESSAGE_TYPE_SET_PEER_BANDWIDTH, body)
            }
            Message::UserControl(ev) => (MESSAGE_TYPE_USER_CONTROL, ev.encode()),
            Message::CommandAmf0(cmd) => (MESSAGE_TYPE_COMMAND_AMF0, cmd.encode()),
            Message::DataAmf0(data) => (MESSAGE_TYPE_DATA_AMF0, data.encode()),
            Message::Audio(payload) => (MESSAGE_TYPE_AUDIO, payload.encode()),
            Message::Video(payload) => (MESSAGE_TYPE_VIDEO, payload.encode()),
        };

        RawMessage {
            chunk_stream_id,
            timestamp,
            message_type_id,
            message_stream_id,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::AMF0Value;

    #[test]
    fn test_command_round_trip_through_raw() {
        let msg = Message::CommandAmf0(Command::new("connect", 1.0, vec![AMF0Value::Null]));
        let raw = msg.to_raw(3, 0, 0);
        let decoded = Message::from_raw(&raw).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_set_peer_bandwidth_round_trip() {
        let msg = Message::SetPeerBandwidth {
            size: 2_500_000,
            limit_type: PeerBandwidthLimitType::Dynamic,
        };
        let raw = msg.to_raw(2, 0, 0);
        let decoded = Message::from_raw(&raw).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_user_control_round_trip() {
        let msg = Message::UserControl(UserControlEvent::StreamBegin(1));
        let raw = msg.to_raw(2, 0, 0);
        let decoded = Message::from_raw(&raw).unwrap();
        assert_eq!(decoded, msg);
    }
}
