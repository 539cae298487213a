// Track Writer: muxes a user-supplied ordered list of codec-typed tracks
// into an outbound RTMP/E-RTMP stream.
//
// On construction, emits a single `onMetaData` data message describing
// every track, then a decoder-config message per track (legacy where a
// legacy form exists for the primary track, extended sequence start
// otherwise). Per-access-unit methods then emit wire frames, wrapping
// anything beyond the first track of its kind in the Multitrack message.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::amf::{AMF0Object, AMF0Value};
use crate::codec::{H264Params, H265Params, Mpeg1AudioParams, Mpeg1ChannelMode};
use crate::config::CoreConfig;
use crate::connection::Connection;
use crate::error::{Result, RtmpError};
use crate::message::{
    AacType, AudioPayload, AvcPacketType, DataMessage, LegacyAudioCodec, LegacyVideoCodec, Message, VideoPayload,
    AUDIO_FOURCC_AC3, AUDIO_FOURCC_MP4A, AUDIO_FOURCC_OPUS, VIDEO_FOURCC_AV1, VIDEO_FOURCC_AVC, VIDEO_FOURCC_HEVC,
    VIDEO_FOURCC_VP9,
};

use super::{AccessUnit, AudioTrack, VideoTrack};

fn fourcc_num(fourcc: crate::message::FourCc) -> f64 {
    u32::from_be_bytes(fourcc.0) as f64
}

fn video_codec_id(track: &VideoTrack) -> f64 {
    match track {
        VideoTrack::H264(_) => 7.0,
        VideoTrack::H265(_) => fourcc_num(VIDEO_FOURCC_HEVC),
        VideoTrack::Av1(_) => fourcc_num(VIDEO_FOURCC_AV1),
        VideoTrack::Vp9(_) => fourcc_num(VIDEO_FOURCC_VP9),
    }
}

fn audio_codec_id(track: &AudioTrack) -> f64 {
    match track {
        AudioTrack::Mpeg4Audio(_) => 10.0,
        AudioTrack::Mpeg1Audio(_) => 2.0,
        AudioTrack::G711(p) => {
            if p.mu_law {
                8.0
            } else {
                7.0
            }
        }
        AudioTrack::Lpcm(_) => 3.0,
        AudioTrack::Ac3(_) => fourcc_num(AUDIO_FOURCC_AC3),
        AudioTrack::Opus(_) => fourcc_num(AUDIO_FOURCC_OPUS),
    }
}

fn track_id_info_map(fourccs: impl Iterator<Item = f64>) -> AMF0Object {
    fourccs
        .enumerate()
        .map(|(i, num)| (i.to_string(), AMF0Value::Object(vec![("fourCc".to_string(), AMF0Value::num(num))])))
        .collect()
}

/// Conventional legacy Audio message header byte used for every AAC
/// message, real codec parameters live in the AudioSpecificConfig instead.
const AAC_LEGACY_HEADER_RATE_CODE: u8 = 3;

/// Muxes codec-typed tracks onto a [`Connection`], the reverse of [`super::TrackReader`].
pub struct TrackWriter<S> {
    conn: Connection<S>,
    video_tracks: Vec<VideoTrack>,
    audio_tracks: Vec<AudioTrack>,
}

impl<S> TrackWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Registers the given tracks, writing `onMetaData` and a decoder-config
    /// message for each. The first track of each kind is the primary
    /// (unwrapped) track; later ones are secondary, carried in E-RTMP
    /// Multitrack wrappers keyed by their position.
    pub async fn new(conn: Connection<S>, tracks: Vec<super::Track>, _config: &CoreConfig) -> Result<TrackWriter<S>> {
        let mut video_tracks = Vec::new();
        let mut audio_tracks = Vec::new();
        for t in tracks {
            match t {
                super::Track::Video(v) => video_tracks.push(v),
                super::Track::Audio(a) => audio_tracks.push(a),
            }
        }

        if audio_tracks.len() > 1
            && audio_tracks
                .iter()
                .any(|a| matches!(a, AudioTrack::G711(_) | AudioTrack::Lpcm(_) | AudioTrack::Mpeg1Audio(_)))
        {
            return Err(RtmpError::MultipleG711NotAllowed);
        }

        let mut writer = TrackWriter { conn, video_tracks, audio_tracks };
        writer.write_metadata().await?;
        writer.write_configs().await?;
        Ok(writer)
    }

    async fn write_metadata(&mut self) -> Result<()> {
        let mut meta: AMF0Object = Vec::new();

        if let Some(primary) = self.video_tracks.first() {
            meta.push(("videocodecid".to_string(), AMF0Value::num(video_codec_id(primary))));
            meta.push(("videodatarate".to_string(), AMF0Value::num(0.0)));
        }
        if let Some(primary) = self.audio_tracks.first() {
            meta.push(("audiocodecid".to_string(), AMF0Value::num(audio_codec_id(primary))));
            meta.push(("audiodatarate".to_string(), AMF0Value::num(0.0)));
        }
        if self.video_tracks.len() > 1 {
            let map = track_id_info_map(self.video_tracks.iter().map(video_codec_id));
            meta.push(("videoTrackIdInfoMap".to_string(), AMF0Value::Object(map)));
        }
        if self.audio_tracks.len() > 1 {
            let map = track_id_info_map(self.audio_tracks.iter().map(audio_codec_id));
            meta.push(("audioTrackIdInfoMap".to_string(), AMF0Value::Object(map)));
        }

        let data = DataMessage {
            values: vec![AMF0Value::str("@setDataFrame"), AMF0Value::str("onMetaData"), AMF0Value::Object(meta)],
        };
        self.conn.write_data(&Message::DataAmf0(data)).await
    }

    async fn write_configs(&mut self) -> Result<()> {
        for i in 0..self.video_tracks.len() {
            self.write_video_config(i as u8).await?;
        }
        for i in 0..self.audio_tracks.len() {
            self.write_audio_config(i as u8).await?;
        }
        Ok(())
    }

    fn video_track(&self, track_id: u8) -> Result<&VideoTrack> {
        self.video_tracks
            .get(track_id as usize)
            .ok_or_else(|| RtmpError::MissingTrackParameters(format!("video track {}", track_id)))
    }

    fn audio_track(&self, track_id: u8) -> Result<&AudioTrack> {
        self.audio_tracks
            .get(track_id as usize)
            .ok_or_else(|| RtmpError::MissingTrackParameters(format!("audio track {}", track_id)))
    }

    fn wrap_video_multitrack(track_id: u8, inner: VideoPayload) -> VideoPayload {
        if track_id == 0 {
            inner
        } else {
            VideoPayload::ExMultitrack { track_id, inner: Box::new(inner) }
        }
    }

    fn wrap_audio_multitrack(track_id: u8, inner: AudioPayload) -> AudioPayload {
        if track_id == 0 {
            inner
        } else {
            AudioPayload::ExMultitrack { track_id, inner: Box::new(inner) }
        }
    }

    async fn write_video_config(&mut self, track_id: u8) -> Result<()> {
        let track = self.video_track(track_id)?.clone();

        if track_id == 0 {
            if let VideoTrack::H264(params) = &track {
                let effective = if params.sps.is_empty() || params.pps.is_empty() {
                    H264Params::default_params()
                } else {
                    params.clone()
                };
                let payload = VideoPayload::Legacy {
                    frame_type: 1,
                    codec: LegacyVideoCodec::H264,
                    avc: Some((AvcPacketType::SequenceHeader, 0)),
                    payload: effective.to_avc_decoder_config(),
                };
                self.conn.write_video_at(0, &Message::Video(payload)).await?;
                return Ok(());
            }
        }

        let (fourcc, decoder_config) = match &track {
            VideoTrack::H264(params) => {
                let effective = if params.sps.is_empty() || params.pps.is_empty() {
                    H264Params::default_params()
                } else {
                    params.clone()
                };
                (VIDEO_FOURCC_AVC, effective.to_avc_decoder_config())
            }
            VideoTrack::H265(params) => {
                let effective = if params.sps.is_empty() || params.pps.is_empty() || params.vps.is_empty() {
                    H265Params::default_params()
                } else {
                    params.clone()
                };
                (VIDEO_FOURCC_HEVC, effective.to_hevc_decoder_config())
            }
            VideoTrack::Av1(params) => (VIDEO_FOURCC_AV1, params.config_obus.clone()),
            VideoTrack::Vp9(params) => (VIDEO_FOURCC_VP9, params.config.clone()),
        };

        let payload = Self::wrap_video_multitrack(track_id, VideoPayload::ExSequenceStart { fourcc, decoder_config });
        self.conn.write_video_at(0, &Message::Video(payload)).await
    }

    async fn write_audio_config(&mut self, track_id: u8) -> Result<()> {
        let track = self.audio_track(track_id)?.clone();

        match &track {
            AudioTrack::Mpeg4Audio(params) if track_id == 0 => {
                let payload = AudioPayload::Legacy {
                    codec: LegacyAudioCodec::Mpeg4Audio,
                    rate_code: AAC_LEGACY_HEADER_RATE_CODE,
                    is_16bit: true,
                    is_stereo: true,
                    aac_type: Some(AacType::Config),
                    payload: params.asc.clone(),
                };
                self.conn.write_audio_at(0, &Message::Audio(payload)).await
            }
            AudioTrack::Mpeg4Audio(params) => {
                let payload = Self::wrap_audio_multitrack(
                    track_id,
                    AudioPayload::ExSequenceStart { fourcc: AUDIO_FOURCC_MP4A, decoder_config: params.asc.clone() },
                );
                self.conn.write_audio_at(0, &Message::Audio(payload)).await
            }
            AudioTrack::Ac3(params) => {
                let payload = Self::wrap_audio_multitrack(
                    track_id,
                    AudioPayload::ExSequenceStart { fourcc: AUDIO_FOURCC_AC3, decoder_config: params.dac3.clone() },
                );
                self.conn.write_audio_at(0, &Message::Audio(payload)).await
            }
            AudioTrack::Opus(params) => {
                let payload = Self::wrap_audio_multitrack(
                    track_id,
                    AudioPayload::ExSequenceStart { fourcc: AUDIO_FOURCC_OPUS, decoder_config: params.to_id_header() },
                );
                self.conn.write_audio_at(0, &Message::Audio(payload)).await
            }
            // MPEG-1 Audio, G.711 and LPCM carry no decoder-config message
            AudioTrack::Mpeg1Audio(_) | AudioTrack::G711(_) | AudioTrack::Lpcm(_) => Ok(()),
        }
    }

    /// Writes an H.264 access unit. Track 0 uses the legacy `Video{type=AU}`
    /// form; any other track uses the extended `avc1` coded-frames form.
    pub async fn write_h264(&mut self, track_id: u8, au: &AccessUnit) -> Result<()> {
        self.video_track(track_id)?;

        if track_id == 0 {
            let payload = VideoPayload::Legacy {
                frame_type: if au.key_frame { 1 } else { 2 },
                codec: LegacyVideoCodec::H264,
                avc: Some((AvcPacketType::Nalu, au.pts_delta)),
                payload: au.payload.clone(),
            };
            return self.conn.write_video_at(au.dts, &Message::Video(payload)).await;
        }

        self.write_extended_video(track_id, VIDEO_FOURCC_AVC, au).await
    }

    /// Writes an H.265 access unit, always via the extended `hvc1` form
    pub async fn write_h265(&mut self, track_id: u8, au: &AccessUnit) -> Result<()> {
        self.video_track(track_id)?;
        self.write_extended_video(track_id, VIDEO_FOURCC_HEVC, au).await
    }

    /// Writes an AV1 access unit, via the extended `av01` form
    pub async fn write_av1(&mut self, track_id: u8, au: &AccessUnit) -> Result<()> {
        self.video_track(track_id)?;
        self.write_extended_video(track_id, VIDEO_FOURCC_AV1, au).await
    }

    /// Writes a VP9 access unit, via the extended `vp09` form
    pub async fn write_vp9(&mut self, track_id: u8, au: &AccessUnit) -> Result<()> {
        self.video_track(track_id)?;
        self.write_extended_video(track_id, VIDEO_FOURCC_VP9, au).await
    }

    async fn write_extended_video(&mut self, track_id: u8, fourcc: crate::message::FourCc, au: &AccessUnit) -> Result<()> {
        let inner = if au.pts_delta == 0 {
            VideoPayload::ExFramesX { fourcc, payload: au.payload.clone() }
        } else {
            VideoPayload::ExCodedFrames { fourcc, pts_delta_ms: au.pts_delta, payload: au.payload.clone() }
        };
        let payload = Self::wrap_video_multitrack(track_id, inner);
        self.conn.write_video_at(au.dts, &Message::Video(payload)).await
    }

    /// Writes an MPEG-4 Audio (AAC) access unit. Track 0 uses the legacy
    /// `Audio{aac_type=AU}` form; any other track uses `mp4a` coded frames.
    pub async fn write_mpeg4_audio(&mut self, track_id: u8, au: &AccessUnit) -> Result<()> {
        self.audio_track(track_id)?;

        if track_id == 0 {
            let payload = AudioPayload::Legacy {
                codec: LegacyAudioCodec::Mpeg4Audio,
                rate_code: AAC_LEGACY_HEADER_RATE_CODE,
                is_16bit: true,
                is_stereo: true,
                aac_type: Some(AacType::RawAu),
                payload: au.payload.clone(),
            };
            return self.conn.write_audio_at(au.dts, &Message::Audio(payload)).await;
        }

        let inner = AudioPayload::ExCodedFrames { fourcc: AUDIO_FOURCC_MP4A, payload: au.payload.clone() };
        let payload = Self::wrap_audio_multitrack(track_id, inner);
        self.conn.write_audio_at(au.dts, &Message::Audio(payload)).await
    }

    /// Writes an MPEG-1 Audio (MP3) access unit. Primary track only: the
    /// legacy Audio message has no multitrack-capable extended form for MP3.
    pub async fn write_mpeg1_audio(&mut self, track_id: u8, au: &AccessUnit) -> Result<()> {
        if track_id != 0 {
            return Err(RtmpError::UnsupportedCodec("MPEG-1 Audio on a secondary track".to_string()));
        }
        let params = match self.audio_track(track_id)? {
            AudioTrack::Mpeg1Audio(p) => *p,
            _ => return Err(RtmpError::MissingTrackParameters("MPEG-1 Audio track".to_string())),
        };
        let rate_code = Mpeg1AudioParams::rate_code(params.sample_rate)?;
        let payload = AudioPayload::Legacy {
            codec: LegacyAudioCodec::Mp3,
            rate_code,
            is_16bit: true,
            is_stereo: params.channel_mode == Mpeg1ChannelMode::Stereo,
            aac_type: None,
            payload: au.payload.clone(),
        };
        self.conn.write_audio_at(au.dts, &Message::Audio(payload)).await
    }

    /// Writes an AC-3 access unit, via the extended `ac-3` form
    pub async fn write_ac3(&mut self, track_id: u8, au: &AccessUnit) -> Result<()> {
        self.audio_track(track_id)?;
        let inner = AudioPayload::ExCodedFrames { fourcc: AUDIO_FOURCC_AC3, payload: au.payload.clone() };
        let payload = Self::wrap_audio_multitrack(track_id, inner);
        self.conn.write_audio_at(au.dts, &Message::Audio(payload)).await
    }

    /// Writes an Opus access unit, via the extended `Opus` form
    pub async fn write_opus(&mut self, track_id: u8, au: &AccessUnit) -> Result<()> {
        self.audio_track(track_id)?;
        let inner = AudioPayload::ExCodedFrames { fourcc: AUDIO_FOURCC_OPUS, payload: au.payload.clone() };
        let payload = Self::wrap_audio_multitrack(track_id, inner);
        self.conn.write_audio_at(au.dts, &Message::Audio(payload)).await
    }

    /// Writes a G.711 access unit. Primary track only.
    pub async fn write_g711(&mut self, track_id: u8, au: &AccessUnit) -> Result<()> {
        if track_id != 0 {
            return Err(RtmpError::UnsupportedCodec("G.711 on a secondary track".to_string()));
        }
        let params = match self.audio_track(track_id)? {
            AudioTrack::G711(p) => *p,
            _ => return Err(RtmpError::MissingTrackParameters("G.711 track".to_string())),
        };
        let rate_code = Mpeg1AudioParams::rate_code(params.sample_rate).unwrap_or(0);
        let codec = if params.mu_law { LegacyAudioCodec::PcmuG711 } else { LegacyAudioCodec::PcmaG711 };
        let payload = AudioPayload::Legacy {
            codec,
            rate_code,
            is_16bit: true,
            is_stereo: params.channels > 1,
            aac_type: None,
            payload: au.payload.clone(),
        };
        self.conn.write_audio_at(au.dts, &Message::Audio(payload)).await
    }

    /// Writes an LPCM access unit, converting the internal little-endian
    /// samples back to the big-endian wire representation. Primary track only.
    pub async fn write_lpcm(&mut self, track_id: u8, au: &AccessUnit) -> Result<()> {
        if track_id != 0 {
            return Err(RtmpError::UnsupportedCodec("LPCM on a secondary track".to_string()));
        }
        let params = match self.audio_track(track_id)? {
            AudioTrack::Lpcm(p) => *p,
            _ => return Err(RtmpError::MissingTrackParameters("LPCM track".to_string())),
        };
        let rate_code = Mpeg1AudioParams::rate_code(params.sample_rate).unwrap_or(0);
        let wire_payload = params.be_to_le_samples(&au.payload);
        let payload = AudioPayload::Legacy {
            codec: LegacyAudioCodec::LinearPcmLe,
            rate_code,
            is_16bit: params.bit_depth > 8,
            is_stereo: params.channels > 1,
            aac_type: None,
            payload: wire_payload,
        };
        self.conn.write_audio_at(au.dts, &Message::Audio(payload)).await
    }

    pub fn into_connection(self) -> Connection<S> {
        self.conn
    }

    pub fn video_tracks(&self) -> &[VideoTrack] {
        &self.video_tracks
    }

    pub fn audio_tracks(&self) -> &[AudioTrack] {
        &self.audio_tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{H264Params, Mpeg4AudioParams, OpusParams};
    use crate::log::{LogConfig, Logger};
    use tokio::io::AsyncReadExt;

    async fn harness() -> (Connection<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (a, b) = tokio::io::duplex(1 << 20);
        let cfg = CoreConfig::default();
        let conn = Connection::new(
            a,
            &cfg,
            Logger::new(LogConfig::default()),
            crate::connection::RtmpUrl {
                scheme: "rtmp".to_string(),
                host: "h".to_string(),
                port: None,
                user: None,
                pass: None,
                app: "live".to_string(),
                stream_key: "k".to_string(),
                query: None,
            },
            false,
        );
        (conn, b)
    }

    #[tokio::test]
    async fn test_h264_primary_emits_metadata_config_and_au() {
        let (conn, mut peer) = harness().await;
        let tracks = vec![super::super::Track::Video(VideoTrack::H264(H264Params {
            sps: vec![0x67, 0x42, 0x00, 0x1e],
            pps: vec![0x68, 0xce],
            profile: 0x42,
            profile_compat: 0,
            level: 0x1e,
        }))];
        let cfg = CoreConfig::default();
        let mut writer = TrackWriter::new(conn, tracks, &cfg).await.unwrap();

        writer
            .write_h264(0, &AccessUnit { dts: 40, pts_delta: 0, key_frame: true, payload: vec![1, 2, 3] })
            .await
            .unwrap();

        let conn = writer.into_connection();
        drop(conn);

        let mut bytes = Vec::new();
        peer.read_to_end(&mut bytes).await.unwrap();
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_g711_tracks_rejected() {
        let (conn, _peer) = harness().await;
        let tracks = vec![
            super::super::Track::Audio(AudioTrack::G711(crate::codec::G711Params {
                mu_law: true,
                sample_rate: 8000,
                channels: 1,
            })),
            super::super::Track::Audio(AudioTrack::G711(crate::codec::G711Params {
                mu_law: true,
                sample_rate: 8000,
                channels: 1,
            })),
        ];
        let cfg = CoreConfig::default();
        let err = TrackWriter::new(conn, tracks, &cfg).await.unwrap_err();
        assert!(matches!(err, RtmpError::MultipleG711NotAllowed));
    }

    #[tokio::test]
    async fn test_opus_secondary_track_wrapped_in_multitrack() {
        let (conn, mut peer) = harness().await;
        let tracks = vec![
            super::super::Track::Audio(AudioTrack::Mpeg4Audio(Mpeg4AudioParams { asc: vec![0x12, 0x10] })),
            super::super::Track::Audio(AudioTrack::Opus(OpusParams { channel_count: 2, pre_skip: 3840, sample_rate: 48000 })),
        ];
        let cfg = CoreConfig::default();
        let mut writer = TrackWriter::new(conn, tracks, &cfg).await.unwrap();

        writer
            .write_opus(1, &AccessUnit { dts: 20, pts_delta: 0, key_frame: true, payload: vec![9, 9] })
            .await
            .unwrap();

        let conn = writer.into_connection();
        drop(conn);
        let mut bytes = Vec::new();
        peer.read_to_end(&mut bytes).await.unwrap();
        assert!(!bytes.is_empty());
    }
}
