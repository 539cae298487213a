// Track Reader: demultiplexes an inbound RTMP/E-RTMP media stream into
// codec-typed tracks and access units.
//
// Bootstraps by reading messages for an analyze period, sniffing decoder
// configuration either from an explicit Config/SequenceStart message or,
// for legacy streams that never send one, from the first keyframe's own
// bitstream. Anything still unconfigured when the period elapses is
// dropped; if nothing at all got configured, initialization fails.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::amf::AMF0Value;
use crate::codec::{
    h264_au_is_key_frame, h265_au_is_key_frame, Ac3Params, Av1Params, G711Params, H264Params, H265Params,
    LpcmParams, Mpeg1AudioParams, Mpeg1ChannelMode, Mpeg4AudioParams, OpusParams, Vp9Params,
};
use crate::config::CoreConfig;
use crate::connection::Connection;
use crate::error::{Result, RtmpError};
use crate::message::{
    AacType, AudioPayload, AvcPacketType, LegacyAudioCodec, LegacyVideoCodec, Message, VideoPayload,
    AUDIO_FOURCC_AC3, AUDIO_FOURCC_MP4A, AUDIO_FOURCC_OPUS, VIDEO_FOURCC_AV1, VIDEO_FOURCC_AVC, VIDEO_FOURCC_HEVC,
    VIDEO_FOURCC_VP9,
};

use super::{AccessUnit, AudioTrack, Track, VideoTrack};

/// Identifies a track within a stream that may carry a primary video and
/// audio track (unwrapped messages) plus any number of secondary tracks
/// (wrapped in a Multitrack message, keyed by the E-RTMP track id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackRef {
    PrimaryVideo,
    PrimaryAudio,
    SecondaryVideo(u8),
    SecondaryAudio(u8),
}

fn legacy_rate_from_code(code: u8) -> u32 {
    match code {
        0 => 5512,
        1 => 11025,
        2 => 22050,
        _ => 44100,
    }
}

/// Demuxes audio/video messages off a [`Connection`] into codec-typed
/// tracks and access units.
pub struct TrackReader<S> {
    conn: Connection<S>,
    analyze_period: Duration,
    known: Vec<(TrackRef, Track)>,
    pending: VecDeque<(usize, AccessUnit)>,
    /// Set once an `onMetaData` frame has been seen: whether it announced a
    /// primary video/audio track at all. `None` means no metadata arrived
    /// yet, so initialization falls all the way back to bitstream sniffing.
    expected_video: Option<bool>,
    expected_audio: Option<bool>,
}

impl<S> TrackReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(conn: Connection<S>, config: &CoreConfig) -> TrackReader<S> {
        TrackReader {
            conn,
            analyze_period: Duration::from_millis(config.analyze_period_ms.max(0) as u64),
            known: Vec::new(),
            pending: VecDeque::new(),
            expected_video: None,
            expected_audio: None,
        }
    }

    /// Reads messages for the configured analyze period, returning every
    /// track whose decoder configuration was resolved in that window.
    pub async fn initialize(&mut self) -> Result<Vec<Track>> {
        let deadline = Instant::now() + self.analyze_period;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let read = tokio::time::timeout(remaining, self.conn.read_message_timed()).await;
            let (timestamp, msg) = match read {
                Ok(Ok(v)) => v,
                Ok(Err(RtmpError::Io(e))) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            };

            self.ingest(msg, timestamp)?;

            // Metadata announced which tracks to expect: stop as soon as
            // every one of them has resolved decoder parameters, rather
            // than waiting out the whole analyze period.
            if self.metadata_satisfied() {
                break;
            }
        }

        if self.known.is_empty() {
            return Err(RtmpError::NoSupportedCodecs);
        }

        Ok(self.known.iter().map(|(_, t)| t.clone()).collect())
    }

    /// Reads the next access unit, draining anything buffered during
    /// `initialize` first. Returns `Ok(None)` once the peer closes cleanly.
    pub async fn read_unit(&mut self) -> Result<Option<(usize, AccessUnit)>> {
        if let Some(item) = self.pending.pop_front() {
            return Ok(Some(item));
        }

        loop {
            let (timestamp, msg) = match self.conn.read_message_timed().await {
                Ok(v) => v,
                Err(RtmpError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e),
            };

            self.ingest(msg, timestamp)?;
            if let Some(item) = self.pending.pop_front() {
                return Ok(Some(item));
            }
        }
    }

    pub fn into_connection(self) -> Connection<S> {
        self.conn
    }

    fn ingest(&mut self, msg: Message, timestamp: u32) -> Result<()> {
        match msg {
            Message::Video(payload) => {
                if let Some((track_ref, au)) = self.ingest_video(TrackRef::PrimaryVideo, payload, timestamp)? {
                    let idx = self.index_of(track_ref).expect("registered before yielding a frame");
                    self.pending.push_back((idx, au));
                }
            }
            Message::Audio(payload) => {
                if let Some((track_ref, au)) = self.ingest_audio(TrackRef::PrimaryAudio, payload, timestamp)? {
                    let idx = self.index_of(track_ref).expect("registered before yielding a frame");
                    self.pending.push_back((idx, au));
                }
            }
            Message::DataAmf0(data) if data.frame_name() == "onMetaData" => {
                self.ingest_metadata(data.metadata());
            }
            _ => {}
        }
        Ok(())
    }

    /// Reads `videocodecid`/`audiocodecid` off an `onMetaData` payload to
    /// learn which primary tracks the encoder intends to send. A numeric
    /// codec id of 0, a missing field, or an unrecognized string id all mean
    /// "absent" per spec.
    fn ingest_metadata(&mut self, meta: Option<&AMF0Value>) {
        let Some(meta) = meta else { return };
        self.expected_video = Some(Self::codec_announced(meta.get("videocodecid")));
        self.expected_audio = Some(Self::codec_announced(meta.get("audiocodecid")));
    }

    fn codec_announced(value: Option<&AMF0Value>) -> bool {
        match value {
            Some(AMF0Value::Number(n)) => *n != 0.0,
            Some(AMF0Value::String(s)) => matches!(s.as_str(), "avc1" | "hvc1" | "av01" | "mp4a"),
            _ => false,
        }
    }

    /// True once every track `onMetaData` announced has resolved decoder
    /// parameters. `false` if no metadata has arrived yet, which keeps
    /// [`Self::initialize`] running the full analyze period to fall back to
    /// bitstream sniffing.
    fn metadata_satisfied(&self) -> bool {
        match (self.expected_video, self.expected_audio) {
            (Some(video), Some(audio)) => {
                let video_ok = !video || self.index_of(TrackRef::PrimaryVideo).is_some();
                let audio_ok = !audio || self.index_of(TrackRef::PrimaryAudio).is_some();
                video_ok && audio_ok
            }
            _ => false,
        }
    }

    fn index_of(&self, r: TrackRef) -> Option<usize> {
        self.known.iter().position(|(tr, _)| *tr == r)
    }

    fn video_registered(&self, r: TrackRef) -> bool {
        self.index_of(r).is_some()
    }

    fn audio_registered(&self, r: TrackRef) -> bool {
        self.index_of(r).is_some()
    }

    fn register_video(&mut self, r: TrackRef, track: VideoTrack) {
        if let Some(i) = self.index_of(r) {
            self.known[i].1 = Track::Video(track);
        } else {
            self.known.push((r, Track::Video(track)));
        }
    }

    fn register_audio(&mut self, r: TrackRef, track: AudioTrack) {
        if let Some(i) = self.index_of(r) {
            self.known[i].1 = Track::Audio(track);
        } else {
            self.known.push((r, Track::Audio(track)));
        }
    }

    fn ingest_video(
        &mut self,
        track_ref: TrackRef,
        payload: VideoPayload,
        timestamp: u32,
    ) -> Result<Option<(TrackRef, AccessUnit)>> {
        match payload {
            VideoPayload::Legacy { codec: LegacyVideoCodec::H264, avc, payload, .. } => match avc {
                Some((AvcPacketType::SequenceHeader, _)) => {
                    let params = H264Params::from_avc_decoder_config(&payload)?;
                    self.register_video(track_ref, VideoTrack::H264(params));
                    Ok(None)
                }
                Some((AvcPacketType::Nalu, pts_delta)) => {
                    if !self.video_registered(track_ref) {
                        match H264Params::sniff_from_au(&payload) {
                            Some(params) => self.register_video(track_ref, VideoTrack::H264(params)),
                            None => return Ok(None),
                        }
                    }
                    let key_frame = h264_au_is_key_frame(&payload);
                    Ok(Some((track_ref, AccessUnit { dts: timestamp, pts_delta, key_frame, payload })))
                }
                Some((AvcPacketType::EndOfSequence, _)) => Ok(None),
                None => Err(RtmpError::MissingTrackParameters("legacy H.264 AVC packet type".to_string())),
            },
            // Legacy codec id 12 (HEVC) was never standardized but is what
            // older OBS builds send: a bare AVCC access unit with no
            // Config/SequenceHeader sub-header at all.
            VideoPayload::Legacy { codec: LegacyVideoCodec::Other(12), payload, .. } => {
                if !self.video_registered(track_ref) {
                    match H265Params::sniff_from_au(&payload) {
                        Some(params) => self.register_video(track_ref, VideoTrack::H265(params)),
                        None => return Ok(None),
                    }
                }
                let key_frame = h265_au_is_key_frame(&payload);
                Ok(Some((track_ref, AccessUnit { dts: timestamp, pts_delta: 0, key_frame, payload })))
            }
            VideoPayload::Legacy { codec: LegacyVideoCodec::Other(id), .. } => {
                Err(RtmpError::UnsupportedCodec(format!("legacy video codec id {}", id)))
            }
            VideoPayload::ExSequenceStart { fourcc, decoder_config } => {
                let track = match fourcc {
                    VIDEO_FOURCC_AVC => VideoTrack::H264(H264Params::from_avc_decoder_config(&decoder_config)?),
                    VIDEO_FOURCC_HEVC => VideoTrack::H265(H265Params::from_hevc_decoder_config(&decoder_config)?),
                    VIDEO_FOURCC_AV1 => VideoTrack::Av1(Av1Params { config_obus: decoder_config }),
                    VIDEO_FOURCC_VP9 => VideoTrack::Vp9(Vp9Params { config: decoder_config }),
                    other => return Err(RtmpError::UnsupportedCodec(format!("video fourcc {}", other))),
                };
                self.register_video(track_ref, track);
                Ok(None)
            }
            VideoPayload::ExSequenceEnd { .. } => Ok(None),
            VideoPayload::ExCodedFrames { fourcc, pts_delta_ms, payload } => {
                if !self.video_registered(track_ref) {
                    return Err(RtmpError::MissingTrackParameters(format!(
                        "{} coded frame before sequence start",
                        fourcc
                    )));
                }
                let key_frame = match fourcc {
                    VIDEO_FOURCC_AVC => h264_au_is_key_frame(&payload),
                    VIDEO_FOURCC_HEVC => h265_au_is_key_frame(&payload),
                    _ => true,
                };
                Ok(Some((track_ref, AccessUnit { dts: timestamp, pts_delta: pts_delta_ms, key_frame, payload })))
            }
            VideoPayload::ExFramesX { fourcc, payload } => {
                if !self.video_registered(track_ref) {
                    return Err(RtmpError::MissingTrackParameters(format!(
                        "{} frame before sequence start",
                        fourcc
                    )));
                }
                let key_frame = match fourcc {
                    VIDEO_FOURCC_AVC => h264_au_is_key_frame(&payload),
                    VIDEO_FOURCC_HEVC => h265_au_is_key_frame(&payload),
                    _ => true,
                };
                Ok(Some((track_ref, AccessUnit { dts: timestamp, pts_delta: 0, key_frame, payload })))
            }
            VideoPayload::ExMetadata { .. } => Ok(None),
            VideoPayload::ExMpeg2TsSequenceStart { .. } => {
                Err(RtmpError::UnsupportedCodec("MPEG-2 TS sequence start video".to_string()))
            }
            VideoPayload::ExMultitrack { track_id, inner } => {
                self.ingest_video(TrackRef::SecondaryVideo(track_id), *inner, timestamp)
            }
        }
    }

    fn ingest_audio(
        &mut self,
        track_ref: TrackRef,
        payload: AudioPayload,
        timestamp: u32,
    ) -> Result<Option<(TrackRef, AccessUnit)>> {
        match payload {
            AudioPayload::Legacy { codec: LegacyAudioCodec::Mpeg4Audio, aac_type, payload, .. } => match aac_type {
                Some(AacType::Config) => {
                    let params = Mpeg4AudioParams::from_audio_specific_config(&payload)?;
                    self.register_audio(track_ref, AudioTrack::Mpeg4Audio(params));
                    Ok(None)
                }
                Some(AacType::RawAu) => {
                    if !self.audio_registered(track_ref) {
                        return Ok(None);
                    }
                    Ok(Some((track_ref, AccessUnit { dts: timestamp, pts_delta: 0, key_frame: true, payload })))
                }
                None => Ok(None),
            },
            AudioPayload::Legacy { codec: LegacyAudioCodec::Mp3, rate_code, is_stereo, payload, .. } => {
                if !self.audio_registered(track_ref) {
                    let channel_mode = if is_stereo { Mpeg1ChannelMode::Stereo } else { Mpeg1ChannelMode::Mono };
                    self.register_audio(
                        track_ref,
                        AudioTrack::Mpeg1Audio(Mpeg1AudioParams {
                            sample_rate: legacy_rate_from_code(rate_code),
                            channel_mode,
                        }),
                    );
                }
                Ok(Some((track_ref, AccessUnit { dts: timestamp, pts_delta: 0, key_frame: true, payload })))
            }
            AudioPayload::Legacy { codec, rate_code, is_stereo, payload, .. }
                if codec == LegacyAudioCodec::PcmaG711 || codec == LegacyAudioCodec::PcmuG711 =>
            {
                if !self.audio_registered(track_ref) {
                    self.register_audio(
                        track_ref,
                        AudioTrack::G711(G711Params {
                            mu_law: codec == LegacyAudioCodec::PcmuG711,
                            sample_rate: legacy_rate_from_code(rate_code),
                            channels: if is_stereo { 2 } else { 1 },
                        }),
                    );
                }
                Ok(Some((track_ref, AccessUnit { dts: timestamp, pts_delta: 0, key_frame: true, payload })))
            }
            AudioPayload::Legacy { codec: LegacyAudioCodec::LinearPcmLe, rate_code, is_16bit, is_stereo, payload, .. } => {
                if !self.audio_registered(track_ref) {
                    self.register_audio(
                        track_ref,
                        AudioTrack::Lpcm(LpcmParams {
                            bit_depth: if is_16bit { 16 } else { 8 },
                            sample_rate: legacy_rate_from_code(rate_code),
                            channels: if is_stereo { 2 } else { 1 },
                        }),
                    );
                }
                Ok(Some((track_ref, AccessUnit { dts: timestamp, pts_delta: 0, key_frame: true, payload })))
            }
            AudioPayload::Legacy { codec: LegacyAudioCodec::Other(id), .. } => {
                Err(RtmpError::UnsupportedCodec(format!("legacy audio codec id {}", id)))
            }
            AudioPayload::ExSequenceStart { fourcc, decoder_config } => {
                let track = match fourcc {
                    AUDIO_FOURCC_MP4A => AudioTrack::Mpeg4Audio(Mpeg4AudioParams::from_audio_specific_config(&decoder_config)?),
                    AUDIO_FOURCC_AC3 => AudioTrack::Ac3(Ac3Params { dac3: decoder_config }),
                    AUDIO_FOURCC_OPUS => AudioTrack::Opus(OpusParams::from_id_header(&decoder_config)?),
                    other => return Err(RtmpError::UnsupportedCodec(format!("audio fourcc {}", other))),
                };
                self.register_audio(track_ref, track);
                Ok(None)
            }
            AudioPayload::ExSequenceEnd { .. } => Ok(None),
            AudioPayload::ExCodedFrames { fourcc, payload } => {
                if !self.audio_registered(track_ref) {
                    return Err(RtmpError::MissingTrackParameters(format!(
                        "{} coded frame before sequence start",
                        fourcc
                    )));
                }
                Ok(Some((track_ref, AccessUnit { dts: timestamp, pts_delta: 0, key_frame: true, payload })))
            }
            AudioPayload::ExMultichannelConfig { .. } => Ok(None),
            AudioPayload::ExMultitrack { track_id, inner } => {
                self.ingest_audio(TrackRef::SecondaryAudio(track_id), *inner, timestamp)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogConfig, Logger};
    use crate::message::{AvcPacketType, LegacyVideoCodec};

    fn config() -> CoreConfig {
        CoreConfig { analyze_period_ms: 50, ..CoreConfig::default() }
    }

    async fn harness() -> (TrackReader<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (a, b) = tokio::io::duplex(1 << 20);
        let cfg = config();
        let conn = Connection::new(a, &cfg, Logger::new(LogConfig::default()), crate::connection::RtmpUrl {
            scheme: "rtmp".to_string(),
            host: "h".to_string(),
            port: None,
            user: None,
            pass: None,
            app: "live".to_string(),
            stream_key: "k".to_string(),
            query: None,
        }, true);
        (TrackReader::new(conn, &cfg), b)
    }

    #[tokio::test]
    async fn test_sniffs_h264_from_keyframe_without_config() {
        let (mut reader, mut peer) = harness().await;

        let au = H264Params::pack_au(vec![&[0x67, 1, 2][..], &[0x68, 3, 4][..], &[0x65, 9, 9][..]]);
        let payload = VideoPayload::Legacy {
            frame_type: 1,
            codec: LegacyVideoCodec::H264,
            avc: Some((AvcPacketType::Nalu, 0)),
            payload: au,
        };
        let raw = Message::Video(payload).to_raw(5, 40, 1);
        let mut bytes = Vec::new();
        crate::chunk::ChunkWriter::new(128).encode_message(&mut bytes, &raw);
        use tokio::io::AsyncWriteExt;
        peer.write_all(&bytes).await.unwrap();
        drop(peer);

        let tracks = reader.initialize().await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert!(tracks[0].is_video());

        let (idx, unit) = reader.read_unit().await.unwrap().unwrap();
        assert_eq!(idx, 0);
        assert!(unit.key_frame);
    }

    #[tokio::test]
    async fn test_no_supported_codecs_when_stream_closes_empty() {
        let (mut reader, peer) = harness().await;
        drop(peer);
        let err = reader.initialize().await.unwrap_err();
        assert!(matches!(err, RtmpError::NoSupportedCodecs));
    }

    #[tokio::test]
    async fn test_onmetadata_audio_only_stops_initialize_before_analyze_period() {
        use crate::message::{AacType, AudioPayload, LegacyAudioCodec};

        let (a, mut peer) = tokio::io::duplex(1 << 20);
        // Long analyze period: if the metadata early-exit didn't fire, this
        // test would take a second to complete.
        let cfg = CoreConfig { analyze_period_ms: 1_000, ..CoreConfig::default() };
        let conn = Connection::new(a, &cfg, Logger::new(LogConfig::default()), crate::connection::RtmpUrl {
            scheme: "rtmp".to_string(),
            host: "h".to_string(),
            port: None,
            user: None,
            pass: None,
            app: "live".to_string(),
            stream_key: "k".to_string(),
            query: None,
        }, true);
        let mut reader = TrackReader::new(conn, &cfg);

        let meta = AMF0Value::Object(vec![
            ("audiocodecid".to_string(), AMF0Value::Number(10.0)),
        ]);
        let data = crate::message::DataMessage {
            values: vec![AMF0Value::str("onMetaData"), meta],
        };
        let meta_raw = Message::DataAmf0(data).to_raw(0, 0, 0);
        let mut bytes = Vec::new();
        crate::chunk::ChunkWriter::new(128).encode_message(&mut bytes, &meta_raw);

        let asc = vec![0x12, 0x10];
        let payload = AudioPayload::Legacy {
            codec: LegacyAudioCodec::Mpeg4Audio,
            rate_code: 3,
            is_16bit: true,
            is_stereo: true,
            aac_type: Some(AacType::Config),
            payload: asc,
        };
        let audio_raw = Message::Audio(payload).to_raw(4, 0, 1);
        crate::chunk::ChunkWriter::new(128).encode_message(&mut bytes, &audio_raw);

        use tokio::io::AsyncWriteExt;
        peer.write_all(&bytes).await.unwrap();

        let started = std::time::Instant::now();
        let tracks = reader.initialize().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(tracks.len(), 1);
        assert!(tracks[0].is_audio());
    }
}
