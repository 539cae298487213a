// Codec-typed track model shared by the Track Reader and Track Writer:
// the demuxer/muxer layer that sits between raw RTMP/E-RTMP messages and
// an external media pipeline.

mod reader;
mod writer;

pub use reader::*;
pub use writer::*;

use crate::codec::{
    Ac3Params, Av1Params, G711Params, H264Params, H265Params, LpcmParams, Mpeg1AudioParams, Mpeg4AudioParams,
    OpusParams, Vp9Params,
};

/// A codec-typed video track handle
#[derive(Debug, Clone, PartialEq)]
pub enum VideoTrack {
    H264(H264Params),
    H265(H265Params),
    Av1(Av1Params),
    Vp9(Vp9Params),
}

/// A codec-typed audio track handle
#[derive(Debug, Clone, PartialEq)]
pub enum AudioTrack {
    Mpeg4Audio(Mpeg4AudioParams),
    Mpeg1Audio(Mpeg1AudioParams),
    Ac3(Ac3Params),
    Opus(OpusParams),
    G711(G711Params),
    Lpcm(LpcmParams),
}

/// Either kind of track, as exposed by the Track Reader/Writer
#[derive(Debug, Clone, PartialEq)]
pub enum Track {
    Video(VideoTrack),
    Audio(AudioTrack),
}

impl Track {
    pub fn is_video(&self) -> bool {
        matches!(self, Track::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Track::Audio(_))
    }

    /// The clock rate an access unit's DTS/PTS is expressed in. RTMP
    /// timestamps are always millisecond-resolution (1 kHz), regardless of
    /// the media codec's own sample rate.
    pub fn clock_rate(&self) -> u32 {
        1000
    }
}

/// A single decoded access unit (video frame or audio frame) handed to a
/// Track Reader's per-track callback, or accepted by a Track Writer's
/// per-codec write method.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessUnit {
    /// Decode timestamp, milliseconds
    pub dts: u32,
    /// `PTS - DTS`, milliseconds (always 0 for audio and for the `FramesX`
    /// video fast path)
    pub pts_delta: u32,
    /// True for video AUs that do not depend on any other frame; always
    /// true for audio
    pub key_frame: bool,
    /// Codec-native payload: AVCC-packed NAL units for H.264/H.265, raw
    /// OBUs/frames for AV1/VP9, raw frames for every audio codec
    pub payload: Vec<u8>,
}

impl AccessUnit {
    pub fn pts(&self) -> u32 {
        self.dts.wrapping_add(self.pts_delta)
    }
}
