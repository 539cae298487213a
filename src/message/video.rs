// Video message payloads: legacy single-byte-header video and the
// Enhanced RTMP (E-RTMP) extended video message family.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Result, RtmpError};

use super::FourCc;

pub const VIDEO_FOURCC_AVC: FourCc = FourCc(*b"avc1");
pub const VIDEO_FOURCC_HEVC: FourCc = FourCc(*b"hvc1");
pub const VIDEO_FOURCC_AV1: FourCc = FourCc(*b"av01");
pub const VIDEO_FOURCC_VP9: FourCc = FourCc(*b"vp09");

/// Legacy codec id (low nibble of the single-byte video header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyVideoCodec {
    H264,
    Other(u8),
}

impl LegacyVideoCodec {
    fn from_id(id: u8) -> LegacyVideoCodec {
        match id {
            7 => LegacyVideoCodec::H264,
            other => LegacyVideoCodec::Other(other),
        }
    }

    fn to_id(self) -> u8 {
        match self {
            LegacyVideoCodec::H264 => 7,
            LegacyVideoCodec::Other(id) => id,
        }
    }
}

/// H.264's own AVC-packet sub-type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    SequenceHeader,
    Nalu,
    EndOfSequence,
}

impl AvcPacketType {
    fn from_byte(b: u8) -> Result<AvcPacketType> {
        match b {
            0 => Ok(AvcPacketType::SequenceHeader),
            1 => Ok(AvcPacketType::Nalu),
            2 => Ok(AvcPacketType::EndOfSequence),
            other => Err(RtmpError::InvalidChunkHeader(format!(
                "unknown AVC packet type {}",
                other
            ))),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            AvcPacketType::SequenceHeader => 0,
            AvcPacketType::Nalu => 1,
            AvcPacketType::EndOfSequence => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VideoPayload {
    /// Legacy single-byte-header video message
    Legacy {
        frame_type: u8,
        codec: LegacyVideoCodec,
        /// Present only for H.264 (codec id 7); `pts_delta_ms` is the 24-bit
        /// composition time offset carried alongside AVC NALU packets.
        avc: Option<(AvcPacketType, u32)>,
        payload: Vec<u8>,
    },
    ExSequenceStart {
        fourcc: FourCc,
        decoder_config: Vec<u8>,
    },
    ExSequenceEnd {
        fourcc: FourCc,
    },
    /// CodedFrames carries an explicit PTS-delta (ms); AVC/HEVC payload is
    /// AVCC-packed, AV1/VP9 payload is raw.
    ExCodedFrames {
        fourcc: FourCc,
        pts_delta_ms: u32,
        payload: Vec<u8>,
    },
    /// CodedFrames with an implicit zero PTS-delta (the PTS==DTS fast path)
    ExFramesX {
        fourcc: FourCc,
        payload: Vec<u8>,
    },
    ExMetadata {
        fourcc: FourCc,
        payload: Vec<u8>,
    },
    ExMultitrack {
        track_id: u8,
        inner: Box<VideoPayload>,
    },
    ExMpeg2TsSequenceStart {
        fourcc: FourCc,
        payload: Vec<u8>,
    },
}

const FRAME_TYPE_MASK: u8 = 0xF0;
const EX_TYPE_MASK: u8 = 0x0F;
const IS_EXTENDED_MASK: u8 = 0x80;

const EX_TYPE_SEQUENCE_START: u8 = 0;
const EX_TYPE_CODED_FRAMES: u8 = 1;
const EX_TYPE_SEQUENCE_END: u8 = 2;
const EX_TYPE_FRAMES_X: u8 = 3;
const EX_TYPE_METADATA: u8 = 4;
const EX_TYPE_MULTITRACK: u8 = 5;
const EX_TYPE_MPEG2TS_SEQUENCE_START: u8 = 6;

pub const MULTITRACK_TYPE_ONE_TRACK: u8 = 0;

impl VideoPayload {
    pub fn decode(body: &[u8]) -> Result<VideoPayload> {
        if body.is_empty() {
            return Err(RtmpError::ShortBuffer { needed: 1, available: 0 });
        }

        let header = body[0];

        if header & IS_EXTENDED_MASK != 0 {
            Self::decode_extended(header, &body[1..])
        } else {
            let frame_type = (header & FRAME_TYPE_MASK) >> 4;
            let codec = LegacyVideoCodec::from_id(header & 0x0F);
            Self::decode_legacy(frame_type, codec, &body[1..])
        }
    }

    fn decode_legacy(frame_type: u8, codec: LegacyVideoCodec, rest: &[u8]) -> Result<VideoPayload> {
        if codec != LegacyVideoCodec::H264 {
            return Ok(VideoPayload::Legacy {
                frame_type,
                codec,
                avc: None,
                payload: rest.to_vec(),
            });
        }

        if rest.len() < 4 {
            return Err(RtmpError::ShortBuffer { needed: 4, available: rest.len() });
        }

        let packet_type = AvcPacketType::from_byte(rest[0])?;
        let pts_delta_ms = u24_be(&rest[1..4]);
        let payload = rest[4..].to_vec();

        Ok(VideoPayload::Legacy {
            frame_type,
            codec,
            avc: Some((packet_type, pts_delta_ms)),
            payload,
        })
    }

    fn decode_extended(header: u8, rest: &[u8]) -> Result<VideoPayload> {
        let ex_type = header & EX_TYPE_MASK;

        if ex_type == EX_TYPE_MULTITRACK {
            if rest.len() < 6 {
                return Err(RtmpError::ShortBuffer { needed: 6, available: rest.len() });
            }
            let multitrack_type = rest[0] >> 4;
            let wrapped_ex_type = rest[0] & 0x0F;
            if multitrack_type != MULTITRACK_TYPE_ONE_TRACK {
                return Err(RtmpError::UnsupportedMultitrack(multitrack_type));
            }
            let fourcc = FourCc::from_bytes(&rest[1..5])?;
            let track_id = rest[5];
            let wrapped_header = 0x80 | wrapped_ex_type;
            let mut inner_body = vec![wrapped_header];
            inner_body.extend_from_slice(&fourcc.0);
            inner_body.extend_from_slice(&rest[6..]);
            let inner = Self::decode_extended(wrapped_header, &inner_body[1..])?;
            return Ok(VideoPayload::ExMultitrack {
                track_id,
                inner: Box::new(inner),
            });
        }

        if rest.len() < 4 {
            return Err(RtmpError::ShortBuffer { needed: 4, available: rest.len() });
        }
        let fourcc = FourCc::from_bytes(&rest[0..4])?;
        let payload = &rest[4..];

        match ex_type {
            EX_TYPE_SEQUENCE_START => Ok(VideoPayload::ExSequenceStart {
                fourcc,
                decoder_config: payload.to_vec(),
            }),
            EX_TYPE_SEQUENCE_END => Ok(VideoPayload::ExSequenceEnd { fourcc }),
            EX_TYPE_CODED_FRAMES => {
                if matches!(fourcc, VIDEO_FOURCC_AVC) || matches!(fourcc, VIDEO_FOURCC_HEVC) {
                    if payload.len() < 3 {
                        return Err(RtmpError::ShortBuffer { needed: 3, available: payload.len() });
                    }
                    let pts_delta_ms = u24_be(&payload[0..3]);
                    Ok(VideoPayload::ExCodedFrames {
                        fourcc,
                        pts_delta_ms,
                        payload: payload[3..].to_vec(),
                    })
                } else {
                    Ok(VideoPayload::ExCodedFrames {
                        fourcc,
                        pts_delta_ms: 0,
                        payload: payload.to_vec(),
                    })
                }
            }
            EX_TYPE_FRAMES_X => Ok(VideoPayload::ExFramesX {
                fourcc,
                payload: payload.to_vec(),
            }),
            EX_TYPE_METADATA => Ok(VideoPayload::ExMetadata {
                fourcc,
                payload: payload.to_vec(),
            }),
            EX_TYPE_MPEG2TS_SEQUENCE_START => Ok(VideoPayload::ExMpeg2TsSequenceStart {
                fourcc,
                payload: payload.to_vec(),
            }),
            other => Err(RtmpError::InvalidChunkHeader(format!(
                "unsupported extended video type {}",
                other
            ))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            VideoPayload::Legacy { frame_type, codec, avc, payload } => {
                out.push((frame_type << 4) | codec.to_id());
                if let Some((packet_type, pts_delta_ms)) = avc {
                    out.push(packet_type.to_byte());
                    out.extend_from_slice(&pts_delta_ms.to_be_bytes()[1..4]);
                }
                out.extend_from_slice(payload);
            }
            VideoPayload::ExSequenceStart { fourcc, decoder_config } => {
                out.push(0x80 | EX_TYPE_SEQUENCE_START);
                out.extend_from_slice(&fourcc.0);
                out.extend_from_slice(decoder_config);
            }
            VideoPayload::ExSequenceEnd { fourcc } => {
                out.push(0x80 | EX_TYPE_SEQUENCE_END);
                out.extend_from_slice(&fourcc.0);
            }
            VideoPayload::ExCodedFrames { fourcc, pts_delta_ms, payload } => {
                out.push(0x80 | EX_TYPE_CODED_FRAMES);
                out.extend_from_slice(&fourcc.0);
                if matches!(*fourcc, VIDEO_FOURCC_AVC) || matches!(*fourcc, VIDEO_FOURCC_HEVC) {
                    out.extend_from_slice(&pts_delta_ms.to_be_bytes()[1..4]);
                }
                out.extend_from_slice(payload);
            }
            VideoPayload::ExFramesX { fourcc, payload } => {
                out.push(0x80 | EX_TYPE_FRAMES_X);
                out.extend_from_slice(&fourcc.0);
                out.extend_from_slice(payload);
            }
            VideoPayload::ExMetadata { fourcc, payload } => {
                out.push(0x80 | EX_TYPE_METADATA);
                out.extend_from_slice(&fourcc.0);
                out.extend_from_slice(payload);
            }
            VideoPayload::ExMpeg2TsSequenceStart { fourcc, payload } => {
                out.push(0x80 | EX_TYPE_MPEG2TS_SEQUENCE_START);
                out.extend_from_slice(&fourcc.0);
                out.extend_from_slice(payload);
            }
            VideoPayload::ExMultitrack { track_id, inner } => {
                let inner_bytes = inner.encode();
                let wrapped_ex_type = inner_bytes[0] & 0x0F;
                let fourcc = &inner_bytes[1..5];

                out.push(0x80 | EX_TYPE_MULTITRACK);
                out.push((MULTITRACK_TYPE_ONE_TRACK << 4) | wrapped_ex_type);
                out.extend_from_slice(fourcc);
                out.push(*track_id);
                out.extend_from_slice(&inner_bytes[5..]);
            }
        }
        out
    }
}

fn u24_be(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32)
}

#[allow(dead_code)]
fn read_u32(b: &[u8]) -> u32 {
    BigEndian::read_u32(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_h264_config_round_trip() {
        let payload = VideoPayload::Legacy {
            frame_type: 1,
            codec: LegacyVideoCodec::H264,
            avc: Some((AvcPacketType::SequenceHeader, 0)),
            payload: vec![0x01, 0x42, 0x00, 0x1e],
        };
        let bytes = payload.encode();
        let decoded = VideoPayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_extended_sequence_start_round_trip() {
        let payload = VideoPayload::ExSequenceStart {
            fourcc: VIDEO_FOURCC_HEVC,
            decoder_config: vec![1, 2, 3, 4],
        };
        let bytes = payload.encode();
        let decoded = VideoPayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_extended_coded_frames_av1_no_pts_delta() {
        let payload = VideoPayload::ExCodedFrames {
            fourcc: VIDEO_FOURCC_AV1,
            pts_delta_ms: 0,
            payload: vec![9, 9, 9],
        };
        let bytes = payload.encode();
        let decoded = VideoPayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_multitrack_one_track_round_trip() {
        let inner = VideoPayload::ExFramesX {
            fourcc: VIDEO_FOURCC_AVC,
            payload: vec![1, 2, 3],
        };
        let payload = VideoPayload::ExMultitrack {
            track_id: 1,
            inner: Box::new(inner),
        };
        let bytes = payload.encode();
        let decoded = VideoPayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_multitrack_rejects_non_zero_type() {
        let bytes = vec![0x80 | EX_TYPE_MULTITRACK, (1 << 4) | EX_TYPE_FRAMES_X, b'a', b'v', b'c', b'1', 0];
        let err = VideoPayload::decode(&bytes).unwrap_err();
        assert!(matches!(err, RtmpError::UnsupportedMultitrack(1)));
    }
}
