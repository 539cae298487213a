// FromStream: bridges an external media pipeline's elementary streams onto
// a Track Writer, handling clock-rate conversion and H.264/H.265 DTS
// extraction so the caller only ever has to hand over presentation-ordered
// frames.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::CoreConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::log::Logger;
use crate::log_warning;

use super::clock::pts_to_millis;
use super::dts::H26xDtsExtractor;
use crate::track::{AccessUnit, AudioTrack, Track, TrackWriter, VideoTrack};

/// One elementary stream as reported by the external pipeline. Built by the
/// caller from whatever format descriptors their own pipeline uses;
/// `Unsupported` carries a label through purely so construction can log
/// what got dropped.
pub enum ExternalFormat {
    Video(VideoTrack, u32),
    Audio(AudioTrack, u32),
    Unsupported(String),
}

enum Slot {
    Video { track_id: u8, clock_rate: u32, dts: Option<H26xDtsExtractor<(bool, Vec<u8>)>> },
    Audio { track_id: u8, clock_rate: u32 },
    Dropped,
}

/// Feeds presentation-ordered frames from an external media pipeline into a
/// [`TrackWriter`], converting timestamps and extracting DTS along the way.
pub struct FromStream<S> {
    writer: TrackWriter<S>,
    slots: Vec<Slot>,
    logger: Logger,
}

/// Reorder window (in access units) used for the H.264/H.265 DTS
/// extractor. Deep enough for the common IBBP GOP structures seen over RTMP.
const DEFAULT_REORDER_WINDOW: usize = 2;

impl<S> FromStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Enumerates `formats` in order, dropping unsupported ones (logging a
    /// warning for each), and initializes a Track Writer with the rest.
    pub async fn new(conn: Connection<S>, formats: Vec<ExternalFormat>, config: &CoreConfig, logger: Logger) -> Result<FromStream<S>> {
        let mut tracks = Vec::new();
        let mut slots = Vec::with_capacity(formats.len());
        let mut next_video_id = 0u8;
        let mut next_audio_id = 0u8;

        for format in formats {
            match format {
                ExternalFormat::Video(track, clock_rate) => {
                    let track_id = next_video_id;
                    next_video_id += 1;
                    let dts = matches!(track, VideoTrack::H264(_) | VideoTrack::H265(_))
                        .then(|| H26xDtsExtractor::new(DEFAULT_REORDER_WINDOW));
                    tracks.push(Track::Video(track));
                    slots.push(Slot::Video { track_id, clock_rate, dts });
                }
                ExternalFormat::Audio(track, clock_rate) => {
                    let track_id = next_audio_id;
                    next_audio_id += 1;
                    tracks.push(Track::Audio(track));
                    slots.push(Slot::Audio { track_id, clock_rate });
                }
                ExternalFormat::Unsupported(label) => {
                    log_warning!(logger, format!("dropping unsupported source format: {}", label));
                    slots.push(Slot::Dropped);
                }
            }
        }

        let writer = TrackWriter::new(conn, tracks, config).await?;
        Ok(FromStream { writer, slots, logger })
    }

    /// Pushes one presentation-ordered frame from source slot `index` (the
    /// position it had in the `formats` list passed to [`FromStream::new`]).
    /// `pts` is in the source's own clock rate. A no-op for a dropped slot.
    pub async fn push_frame(&mut self, index: usize, pts: u64, key_frame: bool, payload: Vec<u8>) -> Result<()> {
        let logger = &self.logger;
        let Some(slot) = self.slots.get_mut(index) else {
            log_warning!(logger, format!("push_frame on unknown source slot {}", index));
            return Ok(());
        };

        match slot {
            Slot::Video { track_id, clock_rate, dts } => {
                let track_id = *track_id;
                let pts_ms = pts_to_millis(pts, *clock_rate);

                let (dts_ms, pts_delta, key_frame, payload) = match dts {
                    Some(extractor) => match extractor.push(pts_ms, key_frame, (key_frame, payload)) {
                        Some((d, delta, (kf, p))) => (d, delta, kf, p),
                        None => return Ok(()),
                    },
                    None => (pts_ms, 0, key_frame, payload),
                };

                let au = AccessUnit { dts: dts_ms, pts_delta, key_frame, payload };
                let track = self.writer.video_tracks()[track_id as usize].clone();
                match track {
                    VideoTrack::H264(_) => self.writer.write_h264(track_id, &au).await,
                    VideoTrack::H265(_) => self.writer.write_h265(track_id, &au).await,
                    VideoTrack::Av1(_) => self.writer.write_av1(track_id, &au).await,
                    VideoTrack::Vp9(_) => self.writer.write_vp9(track_id, &au).await,
                }
            }
            Slot::Audio { track_id, clock_rate } => {
                let track_id = *track_id;
                let dts_ms = pts_to_millis(pts, *clock_rate);
                let au = AccessUnit { dts: dts_ms, pts_delta: 0, key_frame: true, payload };
                let track = self.writer.audio_tracks()[track_id as usize].clone();
                match track {
                    AudioTrack::Mpeg4Audio(_) => self.writer.write_mpeg4_audio(track_id, &au).await,
                    AudioTrack::Mpeg1Audio(_) => self.writer.write_mpeg1_audio(track_id, &au).await,
                    AudioTrack::Ac3(_) => self.writer.write_ac3(track_id, &au).await,
                    AudioTrack::Opus(_) => self.writer.write_opus(track_id, &au).await,
                    AudioTrack::G711(_) => self.writer.write_g711(track_id, &au).await,
                    AudioTrack::Lpcm(_) => self.writer.write_lpcm(track_id, &au).await,
                }
            }
            Slot::Dropped => Ok(()),
        }
    }

    pub fn into_connection(self) -> Connection<S> {
        self.writer.into_connection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::H264Params;
    use crate::log::LogConfig;

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
    async fn test_drops_frames_until_first_key_frame() {
        let (conn, _peer) = harness().await;
        let cfg = CoreConfig::default();
        let formats = vec![ExternalFormat::Video(
            VideoTrack::H264(H264Params {
                sps: vec![0x67, 1, 2],
                pps: vec![0x68, 3],
                profile: 0x42,
                profile_compat: 0,
                level: 0x1e,
            }),
            90_000,
        )];
        let mut from_stream = FromStream::new(conn, formats, &cfg, Logger::new_disabled()).await.unwrap();

        from_stream.push_frame(0, 0, false, vec![1, 2, 3]).await.unwrap();
        from_stream.push_frame(0, 3000, false, vec![4, 5, 6]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_format_slot_is_a_no_op() {
        let (conn, _peer) = harness().await;
        let cfg = CoreConfig::default();
        let formats = vec![ExternalFormat::Unsupported("theora".to_string())];
        let mut from_stream = FromStream::new(conn, formats, &cfg, Logger::new_disabled()).await.unwrap();
        from_stream.push_frame(0, 0, true, vec![]).await.unwrap();
    }
}
