//! Opus-over-TCP streamer
//!
//! Encodes drained frames, optionally archives them to WAV, and pushes the
//! packets to the server. A failed write drops the link and raises the
//! forced-disconnect flag for the supervisor; encoding and archiving carry
//! on while the link is down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::archive::WavArchive;
use crate::codec::OpusEncoder;
use crate::config::{AppConfig, ServerConfig};
use crate::error::StreamError;
use crate::network::link::ServerLink;
use crate::protocol::PacketWriter;
use crate::status::{BytesWritten, StatusReporter};
use crate::stream::{Frame, Streamer};

pub struct OpusStreamer {
    server: ServerConfig,
    title: Option<String>,
    status: Arc<StatusReporter>,
    encoder: OpusEncoder,
    archive: Option<WavArchive>,
    link: Option<ServerLink>,
    writer: PacketWriter,
    interleaved: Vec<f32>,
    /// Samples per channel encoded so far
    timestamp: u32,
    /// When the link last dropped, until the supervisor takes it
    forced_disconnect: Option<Instant>,
    metadata_sent: bool,
}

impl OpusStreamer {
    /// Opus carries at most two channels; wider layouts are refused here.
    pub fn new(
        config: &AppConfig,
        status: Arc<StatusReporter>,
        channels: usize,
        sample_rate: u32,
        archive: Option<WavArchive>,
    ) -> Result<Self, StreamError> {
        if !(1..=2).contains(&channels) {
            return Err(StreamError::UnsupportedLayout(format!(
                "{} channels, Opus streams carry 1 or 2",
                channels
            )));
        }
        let encoder = OpusEncoder::new(&config.encoder, sample_rate, channels)?;

        Ok(Self {
            server: config.server.clone(),
            title: config.metadata.title.clone(),
            status,
            encoder,
            archive,
            link: None,
            writer: PacketWriter::new(),
            interleaved: Vec::new(),
            timestamp: 0,
            forced_disconnect: None,
            metadata_sent: false,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn drop_link(&mut self, reason: &str) {
        if let Some(link) = self.link.take() {
            link.shutdown();
            tracing::warn!("Lost connection to {}: {}", link.peer(), reason);
        }
        self.forced_disconnect = Some(Instant::now());
        self.status.server(&format!("Disconnected: {}", reason));
        self.status.bytes_written(BytesWritten::NoData);
    }

    /// Send one packet; on failure the link is dropped
    fn send(&mut self, packet: &[u8]) -> Result<usize, StreamError> {
        let Some(link) = self.link.as_mut() else {
            return Err(StreamError::NotConnected);
        };
        match link.send(packet) {
            Ok(n) => Ok(n),
            Err(e) => {
                let reason = e.to_string();
                self.drop_link(&reason);
                Err(StreamError::Disconnected(reason))
            }
        }
    }

    fn send_metadata(&mut self) -> Result<usize, StreamError> {
        if self.metadata_sent {
            return Ok(0);
        }
        let Some(title) = self.title.clone() else {
            self.metadata_sent = true;
            return Ok(0);
        };
        let packet = self.writer.metadata(self.timestamp, &title);
        let sent = self.send(&packet)?;
        self.metadata_sent = true;
        tracing::debug!("Sent metadata: {}", title);
        Ok(sent)
    }
}

impl Streamer for OpusStreamer {
    fn connect(&mut self) -> Result<(), StreamError> {
        if let Some(old) = self.link.take() {
            old.shutdown();
        }

        let mut link = ServerLink::connect(&self.server)?;
        self.writer.reset();
        let hello = self.writer.hello(
            self.encoder.opus_rate(),
            self.encoder.channels() as u8,
            self.encoder.frame_size() as u16,
        );
        link.send(&hello)
            .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;

        self.status
            .general(&format!("Streaming to {}", link.peer()));
        self.link = Some(link);
        Ok(())
    }

    fn reconnect_timeout(&self) -> Duration {
        self.server.reconnect_timeout()
    }

    fn take_forced_disconnect(&mut self) -> Option<Instant> {
        self.forced_disconnect.take()
    }

    fn handle_output(&mut self, frame: &Frame<'_>, sample_rate: u32) -> Result<(), StreamError> {
        if frame.channel_count() != self.encoder.channels() {
            return Err(StreamError::UnsupportedLayout(format!(
                "frame has {} channels, encoder expects {}",
                frame.channel_count(),
                self.encoder.channels()
            )));
        }
        if sample_rate != self.encoder.sample_rate() {
            return Err(StreamError::UnsupportedLayout(format!(
                "frame rate {} Hz, encoder runs at {} Hz",
                sample_rate,
                self.encoder.sample_rate()
            )));
        }

        if let Some(archive) = self.archive.as_mut() {
            archive.write_frame(frame)?;
        }

        self.interleaved.clear();
        frame.interleave_into(&mut self.interleaved);
        let packets = self.encoder.push(&self.interleaved)?;

        if self.link.is_none() {
            self.timestamp = self
                .timestamp
                .wrapping_add((packets.len() * self.encoder.frame_size()) as u32);
            return Err(StreamError::NotConnected);
        }

        let mut written = self.send_metadata()?;
        for payload in packets {
            let packet = self.writer.audio(self.timestamp, &payload);
            self.timestamp = self
                .timestamp
                .wrapping_add(self.encoder.frame_size() as u32);
            written += self.send(&packet)?;
        }

        self.status
            .bytes_written(BytesWritten::Count(written as u64));
        Ok(())
    }

    fn reset_metadata(&mut self) {
        self.metadata_sent = false;
    }

    fn finish(&mut self) -> Result<(), StreamError> {
        for payload in self.encoder.flush()? {
            if self.link.is_none() {
                break;
            }
            let packet = self.writer.audio(self.timestamp, &payload);
            self.timestamp = self
                .timestamp
                .wrapping_add(self.encoder.frame_size() as u32);
            if let Err(e) = self.send(&packet) {
                tracing::warn!("Final packet not sent: {}", e);
            }
        }
        if let Some(link) = self.link.take() {
            tracing::info!(
                "Closing link to {} after {} bytes",
                link.peer(),
                link.bytes_sent()
            );
            link.shutdown();
        }
        match self.archive.as_mut() {
            Some(archive) => archive.finish(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PacketHeader, PacketKind, HEADER_LEN};
    use crate::status::OutputControl;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};

    fn config(address: String, title: Option<&str>) -> AppConfig {
        let mut config = AppConfig::default();
        config.server.address = address;
        config.server.connect_timeout_ms = 500;
        config.metadata.title = title.map(str::to_string);
        config
    }

    fn read_packet(peer: &mut TcpStream) -> (PacketHeader, Vec<u8>) {
        let mut header = [0u8; HEADER_LEN];
        peer.read_exact(&mut header).unwrap();
        let header = PacketHeader::decode(&header).unwrap();
        let mut payload = vec![0u8; header.length as usize];
        peer.read_exact(&mut payload).unwrap();
        (header, payload)
    }

    fn status() -> Arc<StatusReporter> {
        Arc::new(StatusReporter::new(OutputControl::all()))
    }

    #[test]
    fn test_rejects_wide_layouts() {
        let err = OpusStreamer::new(&AppConfig::default(), status(), 4, 48000, None)
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::UnsupportedLayout(_)));
    }

    #[test]
    fn test_streams_hello_metadata_then_audio() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut streamer =
            OpusStreamer::new(&config(addr, Some("Morning show")), status(), 2, 48000, None)
                .unwrap();
        streamer.connect().unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let channels = vec![vec![0.0f32; 2048], vec![0.0f32; 2048]];
        streamer
            .handle_output(&Frame::new(&channels, 2048), 48000)
            .unwrap();

        let (hello, payload) = read_packet(&mut peer);
        assert_eq!(hello.kind, PacketKind::Hello);
        assert_eq!(payload.len(), 7);

        let (meta, payload) = read_packet(&mut peer);
        assert_eq!(meta.kind, PacketKind::Metadata);
        assert_eq!(payload, b"Morning show");

        let (first, _) = read_packet(&mut peer);
        let (second, _) = read_packet(&mut peer);
        assert_eq!(first.kind, PacketKind::Audio);
        assert_eq!(first.timestamp, 0);
        assert_eq!(second.timestamp, 960);
        assert_eq!(second.sequence, 3);
    }

    #[test]
    fn test_not_connected_still_archives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("show.wav");
        let archive = WavArchive::create(&path, 1, 48000, 16).unwrap();

        let mut streamer = OpusStreamer::new(
            &config("127.0.0.1:1".into(), None),
            status(),
            1,
            48000,
            Some(archive),
        )
        .unwrap();

        let channels = vec![vec![0.1f32; 2048]];
        let result = streamer.handle_output(&Frame::new(&channels, 2048), 48000);
        assert!(matches!(result, Err(StreamError::NotConnected)));
        streamer.finish().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 2048);
    }

    #[test]
    fn test_write_failure_raises_forced_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let reporter = status();

        let mut streamer =
            OpusStreamer::new(&config(addr, None), reporter.clone(), 1, 48000, None).unwrap();
        streamer.connect().unwrap();
        drop(listener.accept().unwrap());

        let channels = vec![vec![0.0f32; 2048]];
        let started = Instant::now();
        let mut disconnected = false;
        for _ in 0..200 {
            match streamer.handle_output(&Frame::new(&channels, 2048), 48000) {
                Err(StreamError::Disconnected(_)) => {
                    disconnected = true;
                    break;
                }
                Ok(()) => std::thread::sleep(Duration::from_millis(5)),
                Err(e) => panic!("unexpected {:?}", e),
            }
        }

        assert!(disconnected);
        assert!(!streamer.is_connected());
        let dropped_at = streamer.take_forced_disconnect().unwrap();
        assert!(dropped_at >= started && dropped_at <= Instant::now());
        assert!(streamer.take_forced_disconnect().is_none());
        assert_eq!(reporter.last_output_status().as_deref(), Some(""));
    }

    #[test]
    fn test_accepts_cd_rate_engine() {
        let mut streamer =
            OpusStreamer::new(&AppConfig::default(), status(), 2, 44100, None).unwrap();
        assert_eq!(streamer.encoder.opus_rate(), 48000);

        let channels = vec![vec![0.0f32; 2048], vec![0.0f32; 2048]];
        assert!(matches!(
            streamer.handle_output(&Frame::new(&channels, 2048), 44100),
            Err(StreamError::NotConnected)
        ));
    }

    #[test]
    fn test_hello_announces_encoded_rate() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut streamer =
            OpusStreamer::new(&config(addr, None), status(), 1, 44100, None).unwrap();
        streamer.connect().unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let (hello, payload) = read_packet(&mut peer);
        assert_eq!(hello.kind, PacketKind::Hello);
        let rate = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert_eq!(rate, 48000);
        assert_eq!(payload[4], 1);
    }

    #[test]
    fn test_rejects_mismatched_frames() {
        let mut streamer =
            OpusStreamer::new(&AppConfig::default(), status(), 2, 48000, None).unwrap();
        let channels = vec![vec![0.0f32; 16]];
        assert!(matches!(
            streamer.handle_output(&Frame::new(&channels, 16), 48000),
            Err(StreamError::UnsupportedLayout(_))
        ));
    }
}
