// Length-prefixed NAL unit helpers shared by H.264 and H.265: both the
// legacy AVCDecoderConfigurationRecord and per-access-unit payloads pack
// NAL units behind a 4-byte big-endian length (AVCC "NALU length" style).

use crate::error::{Result, RtmpError};

/// Splits an AVCC-packed access unit (4-byte length + NAL bytes, repeated)
/// into its constituent NAL units.
pub fn split_avcc_nalus(data: &[u8]) -> Result<Vec<&[u8]>> {
    let mut nalus = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if pos + 4 > data.len() {
            return Err(RtmpError::InvalidDecoderConfig("truncated NALU length prefix".to_string()));
        }
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        pos += 4;
        if pos + len > data.len() {
            return Err(RtmpError::InvalidDecoderConfig("NALU length exceeds payload".to_string()));
        }
        nalus.push(&data[pos..pos + len]);
        pos += len;
    }

    Ok(nalus)
}

/// Packs NAL units into AVCC form (4-byte big-endian length + bytes, repeated)
pub fn pack_avcc_nalus<'a>(nalus: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for nalu in nalus {
        out.extend_from_slice(&(nalu.len() as u32).to_be_bytes());
        out.extend_from_slice(nalu);
    }
    out
}

/// H.264 NAL unit type: low 5 bits of the first byte
pub fn h264_nal_unit_type(nalu: &[u8]) -> Option<u8> {
    nalu.first().map(|b| b & 0x1F)
}

/// H.265 NAL unit type: bits 1-6 of the first byte
pub fn h265_nal_unit_type(nalu: &[u8]) -> Option<u8> {
    nalu.first().map(|b| (b >> 1) & 0x3F)
}

pub const H264_NAL_SPS: u8 = 7;
pub const H264_NAL_PPS: u8 = 8;

pub const H265_NAL_VPS: u8 = 32;
pub const H265_NAL_SPS: u8 = 33;
pub const H265_NAL_PPS: u8 = 34;

/// H.264 IDR slice: a frame that does not depend on any other frame
pub const H264_NAL_IDR_SLICE: u8 = 5;

/// H.265 IDR/CRA slice types, any of which marks a key frame
pub const H265_NAL_IDR_W_RADL: u8 = 19;
pub const H265_NAL_IDR_N_LP: u8 = 20;
pub const H265_NAL_CRA_NUT: u8 = 21;

/// True if an AVCC-packed H.264 access unit contains an IDR slice
pub fn h264_au_is_key_frame(payload: &[u8]) -> bool {
    match split_avcc_nalus(payload) {
        Ok(nalus) => nalus.iter().any(|n| h264_nal_unit_type(n) == Some(H264_NAL_IDR_SLICE)),
        Err(_) => false,
    }
}

/// True if an AVCC-packed H.265 access unit contains an IDR or CRA slice
pub fn h265_au_is_key_frame(payload: &[u8]) -> bool {
    match split_avcc_nalus(payload) {
        Ok(nalus) => nalus.iter().any(|n| {
            matches!(h265_nal_unit_type(n), Some(H265_NAL_IDR_W_RADL) | Some(H265_NAL_IDR_N_LP) | Some(H265_NAL_CRA_NUT))
        }),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_pack_round_trip() {
        let nalus: Vec<&[u8]> = vec![&[0x67, 1, 2], &[0x68, 3, 4, 5]];
        let packed = pack_avcc_nalus(nalus.clone());
        let split = split_avcc_nalus(&packed).unwrap();
        assert_eq!(split, nalus);
    }

    #[test]
    fn test_truncated_length_prefix_is_rejected() {
        let err = split_avcc_nalus(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, RtmpError::InvalidDecoderConfig(_)));
    }

    #[test]
    fn test_nal_unit_types() {
        assert_eq!(h264_nal_unit_type(&[0x67]), Some(H264_NAL_SPS));
        assert_eq!(h264_nal_unit_type(&[0x68]), Some(H264_NAL_PPS));
    }
}
