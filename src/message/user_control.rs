// User Control (Event) message sub-types

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Result, RtmpError};

#[derive(Debug, Clone, PartialEq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
}

const EVENT_STREAM_BEGIN: u16 = 0;
const EVENT_STREAM_EOF: u16 = 1;
const EVENT_STREAM_DRY: u16 = 2;
const EVENT_SET_BUFFER_LENGTH: u16 = 3;
const EVENT_STREAM_IS_RECORDED: u16 = 4;
const EVENT_PING_REQUEST: u16 = 6;
const EVENT_PING_RESPONSE: u16 = 7;

impl UserControlEvent {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; 2];
        match self {
            UserControlEvent::StreamBegin(id) => {
                BigEndian::write_u16(&mut out, EVENT_STREAM_BEGIN);
                out.extend_from_slice(&id.to_be_bytes());
            }
            UserControlEvent::StreamEof(id) => {
                BigEndian::write_u16(&mut out, EVENT_STREAM_EOF);
                out.extend_from_slice(&id.to_be_bytes());
            }
            UserControlEvent::StreamDry(id) => {
                BigEndian::write_u16(&mut out, EVENT_STREAM_DRY);
                out.extend_from_slice(&id.to_be_bytes());
            }
            UserControlEvent::SetBufferLength { stream_id, buffer_ms } => {
                BigEndian::write_u16(&mut out, EVENT_SET_BUFFER_LENGTH);
                out.extend_from_slice(&stream_id.to_be_bytes());
                out.extend_from_slice(&buffer_ms.to_be_bytes());
            }
            UserControlEvent::StreamIsRecorded(id) => {
                BigEndian::write_u16(&mut out, EVENT_STREAM_IS_RECORDED);
                out.extend_from_slice(&id.to_be_bytes());
            }
            UserControlEvent::PingRequest(ts) => {
                BigEndian::write_u16(&mut out, EVENT_PING_REQUEST);
                out.extend_from_slice(&ts.to_be_bytes());
            }
            UserControlEvent::PingResponse(ts) => {
                BigEndian::write_u16(&mut out, EVENT_PING_RESPONSE);
                out.extend_from_slice(&ts.to_be_bytes());
            }
        }
        out
    }

    pub fn decode(body: &[u8]) -> Result<UserControlEvent> {
        if body.len() < 2 {
            return Err(RtmpError::ShortBuffer { needed: 2, available: body.len() });
        }
        let event_type = BigEndian::read_u16(&body[0..2]);

        let read_u32 = |off: usize| -> Result<u32> {
            if body.len() < off + 4 {
                return Err(RtmpError::ShortBuffer { needed: off + 4, available: body.len() });
            }
            Ok(BigEndian::read_u32(&body[off..off + 4]))
        };

        match event_type {
            EVENT_STREAM_BEGIN => Ok(UserControlEvent::StreamBegin(read_u32(2)?)),
            EVENT_STREAM_EOF => Ok(UserControlEvent::StreamEof(read_u32(2)?)),
            EVENT_STREAM_DRY => Ok(UserControlEvent::StreamDry(read_u32(2)?)),
            EVENT_SET_BUFFER_LENGTH => Ok(UserControlEvent::SetBufferLength {
                stream_id: read_u32(2)?,
                buffer_ms: read_u32(6)?,
            }),
            EVENT_STREAM_IS_RECORDED => Ok(UserControlEvent::StreamIsRecorded(read_u32(2)?)),
            EVENT_PING_REQUEST => Ok(UserControlEvent::PingRequest(read_u32(2)?)),
            EVENT_PING_RESPONSE => Ok(UserControlEvent::PingResponse(read_u32(2)?)),
            other => Err(RtmpError::InvalidChunkHeader(format!(
                "unsupported user control event type {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_begin_round_trip() {
        let ev = UserControlEvent::StreamBegin(1);
        let bytes = ev.encode();
        assert_eq!(UserControlEvent::decode(&bytes).unwrap(), ev);
    }

    #[test]
    fn test_set_buffer_length_round_trip() {
        let ev = UserControlEvent::SetBufferLength { stream_id: 1, buffer_ms: 100 };
        let bytes = ev.encode();
        assert_eq!(UserControlEvent::decode(&bytes).unwrap(), ev);
    }
}
