// ToStream: bridges a Track Reader's decoded access units to an external
// media pipeline, by handing each decoded unit to a caller-supplied sink.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

use crate::track::{AccessUnit, Track, TrackReader};

/// Receives codec-typed access units decoded off an inbound RTMP stream.
/// Implemented by whatever internal media pipeline a caller wires in.
pub trait UnitSink: Send {
    fn on_unit(&mut self, track_index: usize, track: &Track, unit: AccessUnit);
}

/// Pumps a [`TrackReader`] and forwards every decoded access unit to a
/// [`UnitSink`], for as long as the peer keeps the connection open.
pub struct ToStream<S, K> {
    reader: TrackReader<S>,
    sink: K,
}

impl<S, K> ToStream<S, K>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    K: UnitSink,
{
    pub fn new(reader: TrackReader<S>, sink: K) -> ToStream<S, K> {
        ToStream { reader, sink }
    }

    /// Runs the analyze-period initialization and returns the resolved
    /// tracks, before `run` starts pumping access units.
    pub async fn initialize(&mut self) -> Result<Vec<Track>> {
        self.reader.initialize().await
    }

    /// Pumps access units into the sink until the peer closes the stream.
    pub async fn run(&mut self, tracks: &[Track]) -> Result<()> {
        while let Some((idx, unit)) = self.reader.read_unit().await? {
            if let Some(track) = tracks.get(idx) {
                self.sink.on_unit(idx, track, unit);
            }
        }
        Ok(())
    }

    pub fn into_reader(self) -> TrackReader<S> {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::H264Params;
    use crate::config::CoreConfig;
    use crate::connection::{Connection, RtmpUrl};
    use crate::log::{LogConfig, Logger};
    use crate::message::{AvcPacketType, LegacyVideoCodec, Message, VideoPayload};
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;

    struct CollectingSink(Arc<Mutex<Vec<(usize, AccessUnit)>>>);

    impl UnitSink for CollectingSink {
        fn on_unit(&mut self, track_index: usize, _track: &Track, unit: AccessUnit) {
            self.0.lock().unwrap().push((track_index, unit));
        }
    }

    #[tokio::test]
    async fn test_pumps_decoded_units_into_sink() {
        let (a, mut peer) = tokio::io::duplex(1 << 20);
        let cfg = CoreConfig { analyze_period_ms: 30, ..CoreConfig::default() };
        let conn = Connection::new(
            a,
            &cfg,
            Logger::new(LogConfig::default()),
            RtmpUrl {
                scheme: "rtmp".to_string(),
                host: "h".to_string(),
                port: None,
                user: None,
                pass: None,
                app: "live".to_string(),
                stream_key: "k".to_string(),
                query: None,
            },
            true,
        );
        let reader = TrackReader::new(conn, &cfg);

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
        peer.write_all(&bytes).await.unwrap();
        drop(peer);

        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut to_stream = ToStream::new(reader, CollectingSink(collected.clone()));
        let tracks = to_stream.initialize().await.unwrap();
        to_stream.run(&tracks).await.unwrap();

        let collected = collected.lock().unwrap();
        assert_eq!(collected.len(), 1);
        assert!(collected[0].1.key_frame);
    }
}
