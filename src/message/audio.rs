// Audio message payloads: legacy single-byte-header audio and the
// Enhanced RTMP extended audio message family.

use crate::error::{Result, RtmpError};

use super::FourCc;

pub const AUDIO_FOURCC_AC3: FourCc = FourCc(*b"ac-3");
pub const AUDIO_FOURCC_OPUS: FourCc = FourCc(*b"Opus");
pub const AUDIO_FOURCC_MP4A: FourCc = FourCc(*b"mp4a");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyAudioCodec {
    /// codec id 7
    PcmaG711,
    /// codec id 8
    PcmuG711,
    /// codec id 2
    Mp3,
    /// codec id 10
    Mpeg4Audio,
    /// codec id 3, linear PCM little-endian
    LinearPcmLe,
    Other(u8),
}

impl LegacyAudioCodec {
    fn from_id(id: u8) -> LegacyAudioCodec {
        match id {
            2 => LegacyAudioCodec::Mp3,
            3 => LegacyAudioCodec::LinearPcmLe,
            7 => LegacyAudioCodec::PcmaG711,
            8 => LegacyAudioCodec::PcmuG711,
            10 => LegacyAudioCodec::Mpeg4Audio,
            other => LegacyAudioCodec::Other(other),
        }
    }

    fn to_id(self) -> u8 {
        match self {
            LegacyAudioCodec::Mp3 => 2,
            LegacyAudioCodec::LinearPcmLe => 3,
            LegacyAudioCodec::PcmaG711 => 7,
            LegacyAudioCodec::PcmuG711 => 8,
            LegacyAudioCodec::Mpeg4Audio => 10,
            LegacyAudioCodec::Other(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacType {
    Config,
    RawAu,
}

impl AacType {
    fn from_byte(b: u8) -> Result<AacType> {
        match b {
            0 => Ok(AacType::Config),
            1 => Ok(AacType::RawAu),
            other => Err(RtmpError::InvalidChunkHeader(format!(
                "unknown AAC packet type {}",
                other
            ))),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            AacType::Config => 0,
            AacType::RawAu => 1,
        }
    }
}

/// Channel-order enum carried by `AudioExMultichannelConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Unspecified,
    Native,
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MultichannelMapping {
    Native(u32),
    Custom(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultichannelConfig {
    pub order: ChannelOrder,
    pub channel_count: u8,
    pub mapping: Option<MultichannelMapping>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioPayload {
    Legacy {
        codec: LegacyAudioCodec,
        /// Sample-rate code: 0=5.5kHz 1=11kHz 2=22kHz 3=44kHz
        rate_code: u8,
        /// true = 16-bit samples, false = 8-bit
        is_16bit: bool,
        is_stereo: bool,
        /// Present only for Mpeg4Audio
        aac_type: Option<AacType>,
        payload: Vec<u8>,
    },
    ExSequenceStart {
        fourcc: FourCc,
        decoder_config: Vec<u8>,
    },
    ExSequenceEnd {
        fourcc: FourCc,
    },
    ExCodedFrames {
        fourcc: FourCc,
        payload: Vec<u8>,
    },
    ExMultichannelConfig {
        fourcc: FourCc,
        config: MultichannelConfig,
    },
    ExMultitrack {
        track_id: u8,
        inner: Box<AudioPayload>,
    },
}

const EX_TYPE_SEQUENCE_START: u8 = 0;
const EX_TYPE_CODED_FRAMES: u8 = 1;
const EX_TYPE_SEQUENCE_END: u8 = 2;
const EX_TYPE_MULTICHANNEL_CONFIG: u8 = 4;
const EX_TYPE_MULTITRACK: u8 = 5;

const MULTITRACK_TYPE_ONE_TRACK: u8 = 0;
const IS_EXTENDED_MASK: u8 = 0x80;
const EX_TYPE_MASK: u8 = 0x0F;

impl AudioPayload {
    pub fn decode(body: &[u8]) -> Result<AudioPayload> {
        if body.is_empty() {
            return Err(RtmpError::ShortBuffer { needed: 1, available: 0 });
        }

        let header = body[0];

        if header & IS_EXTENDED_MASK != 0 {
            Self::decode_extended(header, &body[1..])
        } else {
            let rate_code = (header >> 2) & 0x03;
            let is_16bit = header & 0x02 != 0;
            let is_stereo = header & 0x01 != 0;
            let codec = LegacyAudioCodec::from_id(header >> 4);
            Self::decode_legacy(codec, rate_code, is_16bit, is_stereo, &body[1..])
        }
    }

    fn decode_legacy(
        codec: LegacyAudioCodec,
        rate_code: u8,
        is_16bit: bool,
        is_stereo: bool,
        rest: &[u8],
    ) -> Result<AudioPayload> {
        if codec != LegacyAudioCodec::Mpeg4Audio {
            return Ok(AudioPayload::Legacy {
                codec,
                rate_code,
                is_16bit,
                is_stereo,
                aac_type: None,
                payload: rest.to_vec(),
            });
        }

        if rest.is_empty() {
            // Known-broken encoders sometimes send an empty AAC payload; surface
            // it rather than guessing, the Track Reader decides what to do.
            return Ok(AudioPayload::Legacy {
                codec,
                rate_code,
                is_16bit,
                is_stereo,
                aac_type: None,
                payload: Vec::new(),
            });
        }

        let aac_type = AacType::from_byte(rest[0])?;
        Ok(AudioPayload::Legacy {
            codec,
            rate_code,
            is_16bit,
            is_stereo,
            aac_type: Some(aac_type),
            payload: rest[1..].to_vec(),
        })
    }

    fn decode_extended(header: u8, rest: &[u8]) -> Result<AudioPayload> {
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
            let mut inner_body = vec![fourcc.0[0], fourcc.0[1], fourcc.0[2], fourcc.0[3]];
            inner_body.extend_from_slice(&rest[6..]);
            let inner = Self::decode_extended(0x80 | wrapped_ex_type, &inner_body)?;
            return Ok(AudioPayload::ExMultitrack {
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
            EX_TYPE_SEQUENCE_START => Ok(AudioPayload::ExSequenceStart {
                fourcc,
                decoder_config: payload.to_vec(),
            }),
            EX_TYPE_SEQUENCE_END => Ok(AudioPayload::ExSequenceEnd { fourcc }),
            EX_TYPE_CODED_FRAMES => Ok(AudioPayload::ExCodedFrames {
                fourcc,
                payload: payload.to_vec(),
            }),
            EX_TYPE_MULTICHANNEL_CONFIG => {
                if payload.is_empty() {
                    return Err(RtmpError::ShortBuffer { needed: 1, available: 0 });
                }
                let order = match payload[0] {
                    0 => ChannelOrder::Unspecified,
                    1 => ChannelOrder::Native,
                    2 => ChannelOrder::Custom,
                    other => {
                        return Err(RtmpError::InvalidChunkHeader(format!(
                            "unknown channel order {}",
                            other
                        )))
                    }
                };
                if payload.len() < 2 {
                    return Err(RtmpError::ShortBuffer { needed: 2, available: payload.len() });
                }
                let channel_count = payload[1];
                let mapping = match order {
                    ChannelOrder::Native => {
                        if payload.len() < 6 {
                            return Err(RtmpError::ShortBuffer { needed: 6, available: payload.len() });
                        }
                        let flags = u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
                        Some(MultichannelMapping::Native(flags))
                    }
                    ChannelOrder::Custom => {
                        let needed = 2 + channel_count as usize;
                        if payload.len() < needed {
                            return Err(RtmpError::ShortBuffer { needed, available: payload.len() });
                        }
                        Some(MultichannelMapping::Custom(payload[2..needed].to_vec()))
                    }
                    ChannelOrder::Unspecified => None,
                };
                Ok(AudioPayload::ExMultichannelConfig {
                    fourcc,
                    config: MultichannelConfig { order, channel_count, mapping },
                })
            }
            other => Err(RtmpError::InvalidChunkHeader(format!(
                "unsupported extended audio type {}",
                other
            ))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            AudioPayload::Legacy { codec, rate_code, is_16bit, is_stereo, aac_type, payload } => {
                let header = (codec.to_id() << 4)
                    | (rate_code << 2)
                    | (if *is_16bit { 0x02 } else { 0 })
                    | (if *is_stereo { 0x01 } else { 0 });
                out.push(header);
                if let Some(aac) = aac_type {
                    out.push(aac.to_byte());
                }
                out.extend_from_slice(payload);
            }
            AudioPayload::ExSequenceStart { fourcc, decoder_config } => {
                out.push(0x80 | EX_TYPE_SEQUENCE_START);
                out.extend_from_slice(&fourcc.0);
                out.extend_from_slice(decoder_config);
            }
            AudioPayload::ExSequenceEnd { fourcc } => {
                out.push(0x80 | EX_TYPE_SEQUENCE_END);
                out.extend_from_slice(&fourcc.0);
            }
            AudioPayload::ExCodedFrames { fourcc, payload } => {
                out.push(0x80 | EX_TYPE_CODED_FRAMES);
                out.extend_from_slice(&fourcc.0);
                out.extend_from_slice(payload);
            }
            AudioPayload::ExMultichannelConfig { fourcc, config } => {
                out.push(0x80 | EX_TYPE_MULTICHANNEL_CONFIG);
                out.extend_from_slice(&fourcc.0);
                out.push(match config.order {
                    ChannelOrder::Unspecified => 0,
                    ChannelOrder::Native => 1,
                    ChannelOrder::Custom => 2,
                });
                out.push(config.channel_count);
                match &config.mapping {
                    Some(MultichannelMapping::Native(flags)) => out.extend_from_slice(&flags.to_be_bytes()),
                    Some(MultichannelMapping::Custom(map)) => out.extend_from_slice(map),
                    None => {}
                }
            }
            AudioPayload::ExMultitrack { track_id, inner } => {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_mpeg4_config_round_trip() {
        let payload = AudioPayload::Legacy {
            codec: LegacyAudioCodec::Mpeg4Audio,
            rate_code: 3,
            is_16bit: true,
            is_stereo: true,
            aac_type: Some(AacType::Config),
            payload: vec![0x12, 0x10],
        };
        let bytes = payload.encode();
        let decoded = AudioPayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_legacy_g711_round_trip() {
        let payload = AudioPayload::Legacy {
            codec: LegacyAudioCodec::PcmaG711,
            rate_code: 0,
            is_16bit: true,
            is_stereo: false,
            aac_type: None,
            payload: vec![1, 2, 3],
        };
        let bytes = payload.encode();
        let decoded = AudioPayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_extended_opus_sequence_start_round_trip() {
        let payload = AudioPayload::ExSequenceStart {
            fourcc: AUDIO_FOURCC_OPUS,
            decoder_config: b"OpusHead".to_vec(),
        };
        let bytes = payload.encode();
        let decoded = AudioPayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_multichannel_config_native_round_trip() {
        let payload = AudioPayload::ExMultichannelConfig {
            fourcc: AUDIO_FOURCC_MP4A,
            config: MultichannelConfig {
                order: ChannelOrder::Native,
                channel_count: 2,
                mapping: Some(MultichannelMapping::Native(0x03)),
            },
        };
        let bytes = payload.encode();
        let decoded = AudioPayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_empty_aac_payload_is_tolerated() {
        let bytes = vec![(10 << 4) | (3 << 2) | 0x02 | 0x01];
        let decoded = AudioPayload::decode(&bytes).unwrap();
        assert!(matches!(
            decoded,
            AudioPayload::Legacy { aac_type: None, .. }
        ));
    }
}
