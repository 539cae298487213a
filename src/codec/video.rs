// Per-codec video decoder parameter sets

use crate::error::{Result, RtmpError};

use super::avcc::{
    h264_nal_unit_type, h265_nal_unit_type, pack_avcc_nalus, split_avcc_nalus, H264_NAL_PPS, H264_NAL_SPS,
    H265_NAL_PPS, H265_NAL_SPS, H265_NAL_VPS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct H264Params {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    pub profile: u8,
    pub profile_compat: u8,
    pub level: u8,
}

impl H264Params {
    /// A conservative baseline-profile default, substituted by the Track
    /// Writer when no real parameter set is available but a client refuses
    /// to play without an early decoder config.
    pub fn default_params() -> H264Params {
        H264Params {
            sps: vec![0x67, 0x42, 0x00, 0x1e, 0x96, 0x54, 0x05, 0x01, 0xe9],
            pps: vec![0x68, 0xce, 0x3c, 0x80],
            profile: 0x42,
            profile_compat: 0x00,
            level: 0x1e,
        }
    }

    /// Parses an AVCDecoderConfigurationRecord, extracting SPS/PPS
    pub fn from_avc_decoder_config(data: &[u8]) -> Result<H264Params> {
        if data.len() < 7 {
            return Err(RtmpError::InvalidDecoderConfig("AVCC record too short".to_string()));
        }
        let profile = data[1];
        let profile_compat = data[2];
        let level = data[3];

        let num_sps = (data[5] & 0x1F) as usize;
        let mut pos = 6;
        let mut sps = None;
        for _ in 0..num_sps {
            if pos + 2 > data.len() {
                return Err(RtmpError::InvalidDecoderConfig("truncated SPS entry".to_string()));
            }
            let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;
            if pos + len > data.len() {
                return Err(RtmpError::InvalidDecoderConfig("SPS length exceeds record".to_string()));
            }
            if sps.is_none() {
                sps = Some(data[pos..pos + len].to_vec());
            }
            pos += len;
        }

        if pos >= data.len() {
            return Err(RtmpError::InvalidDecoderConfig("missing PPS count".to_string()));
        }
        let num_pps = data[pos] as usize;
        pos += 1;
        let mut pps = None;
        for _ in 0..num_pps {
            if pos + 2 > data.len() {
                return Err(RtmpError::InvalidDecoderConfig("truncated PPS entry".to_string()));
            }
            let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;
            if pos + len > data.len() {
                return Err(RtmpError::InvalidDecoderConfig("PPS length exceeds record".to_string()));
            }
            if pps.is_none() {
                pps = Some(data[pos..pos + len].to_vec());
            }
            pos += len;
        }

        match (sps, pps) {
            (Some(sps), Some(pps)) => Ok(H264Params { sps, pps, profile, profile_compat, level }),
            _ => Err(RtmpError::InvalidDecoderConfig("AVCC record missing SPS/PPS".to_string())),
        }
    }

    /// Sniffs SPS/PPS out of an AVCC-packed AU, for legacy streams that never
    /// send an explicit `Video{type=Config}` message.
    pub fn sniff_from_au(payload: &[u8]) -> Option<H264Params> {
        let nalus = split_avcc_nalus(payload).ok()?;
        let sps = nalus.iter().find(|n| h264_nal_unit_type(n) == Some(H264_NAL_SPS))?;
        let pps = nalus.iter().find(|n| h264_nal_unit_type(n) == Some(H264_NAL_PPS))?;

        Some(H264Params {
            sps: sps.to_vec(),
            pps: pps.to_vec(),
            profile: sps.get(1).copied().unwrap_or(0x42),
            profile_compat: sps.get(2).copied().unwrap_or(0),
            level: sps.get(3).copied().unwrap_or(0x1e),
        })
    }

    pub fn to_avc_decoder_config(&self) -> Vec<u8> {
        let mut out = vec![1, self.profile, self.profile_compat, self.level, 0xFF, 0xE1];
        out.extend_from_slice(&(self.sps.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.sps);
        out.push(1);
        out.extend_from_slice(&(self.pps.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.pps);
        out
    }

    pub fn pack_au<'a>(nalus: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
        pack_avcc_nalus(nalus)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct H265Params {
    pub vps: Vec<u8>,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl H265Params {
    pub fn default_params() -> H265Params {
        H265Params {
            vps: vec![0x40, 0x01, 0x0c],
            sps: vec![0x42, 0x01, 0x01],
            pps: vec![0x44, 0x01],
        }
    }

    /// Sniffs VPS/SPS/PPS from an AVCC-packed keyframe AU, per the legacy
    /// OBS (<= 29.1) H.265-over-RTMP path that never sends a proper HVCC
    /// sequence header.
    pub fn sniff_from_au(payload: &[u8]) -> Option<H265Params> {
        let nalus = split_avcc_nalus(payload).ok()?;
        let vps = nalus.iter().find(|n| h265_nal_unit_type(n) == Some(H265_NAL_VPS))?;
        let sps = nalus.iter().find(|n| h265_nal_unit_type(n) == Some(H265_NAL_SPS))?;
        let pps = nalus.iter().find(|n| h265_nal_unit_type(n) == Some(H265_NAL_PPS))?;

        Some(H265Params {
            vps: vps.to_vec(),
            sps: sps.to_vec(),
            pps: pps.to_vec(),
        })
    }

    /// Minimal HVCC (HEVCDecoderConfigurationRecord) carrying exactly one
    /// array each of VPS/SPS/PPS, sufficient for clients to initialize a
    /// decoder.
    pub fn from_hevc_decoder_config(data: &[u8]) -> Result<H265Params> {
        if data.len() < 23 {
            return Err(RtmpError::InvalidDecoderConfig("HVCC record too short".to_string()));
        }
        let num_arrays = data[22] as usize;
        let mut pos = 23;

        let mut vps = None;
        let mut sps = None;
        let mut pps = None;

        for _ in 0..num_arrays {
            if pos + 3 > data.len() {
                return Err(RtmpError::InvalidDecoderConfig("truncated NAL array header".to_string()));
            }
            let nal_type = data[pos] & 0x3F;
            let num_nalus = u16::from_be_bytes([data[pos + 1], data[pos + 2]]) as usize;
            pos += 3;

            for _ in 0..num_nalus {
                if pos + 2 > data.len() {
                    return Err(RtmpError::InvalidDecoderConfig("truncated NAL entry".to_string()));
                }
                let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
                pos += 2;
                if pos + len > data.len() {
                    return Err(RtmpError::InvalidDecoderConfig("NAL length exceeds record".to_string()));
                }
                let nalu = data[pos..pos + len].to_vec();
                pos += len;

                match nal_type {
                    t if t == H265_NAL_VPS && vps.is_none() => vps = Some(nalu),
                    t if t == H265_NAL_SPS && sps.is_none() => sps = Some(nalu),
                    t if t == H265_NAL_PPS && pps.is_none() => pps = Some(nalu),
                    _ => {}
                }
            }
        }

        match (vps, sps, pps) {
            (Some(vps), Some(sps), Some(pps)) => Ok(H265Params { vps, sps, pps }),
            _ => Err(RtmpError::InvalidDecoderConfig("HVCC record missing VPS/SPS/PPS".to_string())),
        }
    }

    pub fn to_hevc_decoder_config(&self) -> Vec<u8> {
        let mut out = vec![0u8; 22];
        out[0] = 1; // configurationVersion
        out.push(3); // numOfArrays

        for (nal_type, nalu) in [
            (H265_NAL_VPS, &self.vps),
            (H265_NAL_SPS, &self.sps),
            (H265_NAL_PPS, &self.pps),
        ] {
            out.push(nal_type & 0x3F);
            out.extend_from_slice(&1u16.to_be_bytes());
            out.extend_from_slice(&(nalu.len() as u16).to_be_bytes());
            out.extend_from_slice(nalu);
        }

        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Av1Params {
    /// Raw AV1CodecConfigurationRecord bytes, opaque to this core
    pub config_obus: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vp9Params {
    /// Raw VPCodecConfigurationRecord bytes, opaque to this core
    pub config: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h264_decoder_config_round_trip() {
        let params = H264Params {
            sps: vec![0x67, 0x42, 0x00, 0x1e],
            pps: vec![0x68, 0xce],
            profile: 0x42,
            profile_compat: 0x00,
            level: 0x1e,
        };
        let config = params.to_avc_decoder_config();
        let decoded = H264Params::from_avc_decoder_config(&config).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_h264_sniff_from_au() {
        let au = pack_avcc_nalus(vec![&[0x67, 1, 2][..], &[0x68, 3, 4][..], &[0x65, 9, 9, 9][..]]);
        let params = H264Params::sniff_from_au(&au).unwrap();
        assert_eq!(params.sps, vec![0x67, 1, 2]);
        assert_eq!(params.pps, vec![0x68, 3, 4]);
    }

    #[test]
    fn test_h265_decoder_config_round_trip() {
        let params = H265Params {
            vps: vec![0x40, 1, 2],
            sps: vec![0x42, 3, 4],
            pps: vec![0x44, 5, 6],
        };
        let config = params.to_hevc_decoder_config();
        let decoded = H265Params::from_hevc_decoder_config(&config).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_h265_sniff_from_au() {
        let vps_byte = H265_NAL_VPS << 1;
        let sps_byte = H265_NAL_SPS << 1;
        let pps_byte = H265_NAL_PPS << 1;
        let au = pack_avcc_nalus(vec![&[vps_byte, 1][..], &[sps_byte, 2][..], &[pps_byte, 3][..]]);
        let params = H265Params::sniff_from_au(&au).unwrap();
        assert_eq!(params.vps, vec![vps_byte, 1]);
        assert_eq!(params.sps, vec![sps_byte, 2]);
        assert_eq!(params.pps, vec![pps_byte, 3]);
    }
}
