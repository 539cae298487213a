// Per-codec audio decoder parameter sets

use crate::error::{Result, RtmpError};

#[derive(Debug, Clone, PartialEq)]
pub struct Mpeg4AudioParams {
    /// Raw AudioSpecificConfig bytes
    pub asc: Vec<u8>,
}

impl Mpeg4AudioParams {
    pub fn from_audio_specific_config(data: &[u8]) -> Result<Mpeg4AudioParams> {
        if data.is_empty() {
            return Err(RtmpError::InvalidDecoderConfig("empty AudioSpecificConfig".to_string()));
        }
        Ok(Mpeg4AudioParams { asc: data.to_vec() })
    }

    /// Sample rate implied by the 4-bit frequency index in the ASC, or
    /// `None` for the escape value (explicit rate follows, not handled here).
    pub fn sample_rate(&self) -> Option<u32> {
        const RATES: [u32; 13] = [
            96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
        ];
        if self.asc.len() < 2 {
            return None;
        }
        let freq_index = ((self.asc[0] & 0x07) << 1) | (self.asc[1] >> 7);
        RATES.get(freq_index as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mpeg1ChannelMode {
    Mono,
    Stereo,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mpeg1AudioParams {
    pub sample_rate: u32,
    pub channel_mode: Mpeg1ChannelMode,
}

impl Mpeg1AudioParams {
    /// Maps a sample rate to the legacy Audio message's 2-bit rate code.
    /// The legacy header only distinguishes {5512, 11025, 22050, 44100} Hz.
    pub fn rate_code(sample_rate: u32) -> Result<u8> {
        match sample_rate {
            5512 => Ok(0),
            11025 => Ok(1),
            22050 => Ok(2),
            44100 => Ok(3),
            other => Err(RtmpError::UnsupportedSampleRate(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ac3Params {
    /// Raw AC-3-specific-box bytes (dac3), opaque to this core
    pub dac3: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpusParams {
    pub channel_count: u8,
    pub pre_skip: u16,
    pub sample_rate: u32,
}

const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";

impl OpusParams {
    /// Builds the Opus ID header ("OpusHead") carried by `AudioExSequenceStart`
    pub fn to_id_header(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(19);
        out.extend_from_slice(OPUS_HEAD_MAGIC);
        out.push(1); // version
        out.push(self.channel_count);
        out.extend_from_slice(&self.pre_skip.to_le_bytes());
        out.extend_from_slice(&self.sample_rate.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // output gain
        out.push(0); // channel mapping family 0
        out
    }

    pub fn from_id_header(data: &[u8]) -> Result<OpusParams> {
        if data.len() < 19 || &data[0..8] != OPUS_HEAD_MAGIC {
            return Err(RtmpError::InvalidDecoderConfig("not an OpusHead".to_string()));
        }
        Ok(OpusParams {
            channel_count: data[9],
            pre_skip: u16::from_le_bytes([data[10], data[11]]),
            sample_rate: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
        })
    }

    /// The standard pre-skip used by the Track Writer when none is known
    pub const DEFAULT_PRE_SKIP: u16 = 3840;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct G711Params {
    pub mu_law: bool,
    pub sample_rate: u32,
    pub channels: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LpcmParams {
    pub bit_depth: u8,
    pub sample_rate: u32,
    pub channels: u8,
}

impl LpcmParams {
    /// LPCM as carried over RTMP is big-endian; convert to little-endian
    /// samples before handing them to the rest of the pipeline.
    pub fn be_to_le_samples(&self, data: &[u8]) -> Vec<u8> {
        if self.bit_depth <= 8 {
            return data.to_vec();
        }
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks_exact(2) {
            out.push(chunk[1]);
            out.push(chunk[0]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_id_header_round_trip() {
        let params = OpusParams { channel_count: 2, pre_skip: 3840, sample_rate: 48000 };
        let header = params.to_id_header();
        let decoded = OpusParams::from_id_header(&header).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_mpeg1_rate_code() {
        assert_eq!(Mpeg1AudioParams::rate_code(44100).unwrap(), 3);
        assert!(matches!(
            Mpeg1AudioParams::rate_code(48000).unwrap_err(),
            RtmpError::UnsupportedSampleRate(48000)
        ));
    }

    #[test]
    fn test_lpcm_byte_swap() {
        let params = LpcmParams { bit_depth: 16, sample_rate: 48000, channels: 2 };
        let be = vec![0x01, 0x02, 0x03, 0x04];
        let le = params.be_to_le_samples(&be);
        assert_eq!(le, vec![0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn test_aac_sample_rate_from_asc() {
        // 2 bytes: object type=2 (AAC LC), freq_index=4 (44100), channel=2
        let asc = vec![0b0001_0010, 0b0001_0000];
        let params = Mpeg4AudioParams::from_audio_specific_config(&asc).unwrap();
        assert_eq!(params.sample_rate(), Some(44100));
    }
}
