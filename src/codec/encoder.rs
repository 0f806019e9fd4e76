//! Opus encoder wrapper
//!
//! Capture frames are fixed at the session's frame length, which Opus does
//! not accept, so the encoder keeps an interleaved backlog and emits one
//! packet per complete Opus frame. Input at a rate libopus does not run at
//! goes through a [`RateConverter`] to 48 kHz first.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::codec::resample::RateConverter;
use crate::config::{OpusApplication, OpusBandwidth, OpusConfig, OpusSignal};
use crate::error::CodecError;

/// Rates libopus encodes at natively
const OPUS_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Rate non-native input is converted to
const OPUS_FALLBACK_RATE: u32 = 48000;

/// Opus encoder with internal re-framing
pub struct OpusEncoder {
    encoder: Encoder,
    converter: Option<RateConverter>,
    /// Rate of the samples handed to `push`
    sample_rate: u32,
    /// Rate the Opus stream runs at
    opus_rate: u32,
    channels: usize,
    frame_size: usize,
    /// Interleaved samples not yet encoded
    backlog: Vec<f32>,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    converted: Vec<f32>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    pub fn new(config: &OpusConfig, sample_rate: u32, channels: usize) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::EncoderInit(format!(
                    "Unsupported channel count: {}",
                    channels
                )))
            }
        };

        let application = match config.application {
            OpusApplication::Voip => Application::Voip,
            OpusApplication::Audio => Application::Audio,
            OpusApplication::LowDelay => Application::LowDelay,
        };

        let (opus_rate, converter) = if OPUS_RATES.contains(&sample_rate) {
            (sample_rate, None)
        } else {
            let converter = RateConverter::new(sample_rate, OPUS_FALLBACK_RATE, channels)?;
            (OPUS_FALLBACK_RATE, Some(converter))
        };

        let mut encoder = Encoder::new(opus_rate, opus_channels, application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;
        Self::configure_encoder(&mut encoder, config)?;

        let frame_size = OpusConfig::frame_size_from_ms(opus_rate, config.frame_ms);
        if frame_size == 0 {
            return Err(CodecError::InvalidFrameSize(frame_size));
        }

        tracing::debug!(
            "Opus encoder: {} Hz, {} ch, {} samples/frame, {} bps",
            opus_rate,
            channels,
            frame_size,
            config.bitrate
        );

        Ok(Self {
            encoder,
            converter,
            sample_rate,
            opus_rate,
            channels,
            frame_size,
            backlog: Vec::with_capacity(frame_size * channels * 4),
            // Max Opus packet is about 1275 bytes per frame
            encode_buffer: vec![0u8; 4000],
            converted: Vec::new(),
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    fn configure_encoder(encoder: &mut Encoder, config: &OpusConfig) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_vbr(config.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;
        if config.vbr && config.cvbr {
            encoder
                .set_vbr_constraint(true)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set CVBR: {}", e)))?;
        }

        encoder
            .set_complexity(config.complexity as i32)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set complexity: {}", e)))?;

        encoder
            .set_inband_fec(config.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;
        if config.fec {
            encoder
                .set_packet_loss_perc(config.packet_loss_perc as i32)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;
        }

        encoder
            .set_dtx(config.dtx)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set DTX: {}", e)))?;

        let signal = match config.signal {
            OpusSignal::Auto => opus::Signal::Auto,
            OpusSignal::Voice => opus::Signal::Voice,
            OpusSignal::Music => opus::Signal::Music,
        };
        encoder
            .set_signal(signal)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set signal type: {}", e)))?;

        let bandwidth = match config.max_bandwidth {
            OpusBandwidth::Narrowband => opus::Bandwidth::Narrowband,
            OpusBandwidth::Mediumband => opus::Bandwidth::Mediumband,
            OpusBandwidth::Wideband => opus::Bandwidth::Wideband,
            OpusBandwidth::Superwideband => opus::Bandwidth::Superwideband,
            OpusBandwidth::Fullband => opus::Bandwidth::Fullband,
        };
        encoder
            .set_bandwidth(bandwidth)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bandwidth: {}", e)))?;

        Ok(())
    }

    /// Queue interleaved samples and encode every complete Opus frame.
    ///
    /// `samples.len()` must be a multiple of the channel count.
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<Bytes>, CodecError> {
        if samples.len() % self.channels != 0 {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }
        match self.converter.as_mut() {
            Some(converter) => {
                self.converted.clear();
                converter.process_into(samples, &mut self.converted)?;
                self.backlog.extend_from_slice(&self.converted);
            }
            None => self.backlog.extend_from_slice(samples),
        }
        self.encode_backlog()
    }

    fn encode_backlog(&mut self) -> Result<Vec<Bytes>, CodecError> {

        let chunk = self.samples_per_frame();
        let mut packets = Vec::with_capacity(self.backlog.len() / chunk);
        let mut offset = 0;
        while self.backlog.len() - offset >= chunk {
            let packet = Self::encode_chunk(
                &mut self.encoder,
                &mut self.encode_buffer,
                &self.backlog[offset..offset + chunk],
            )?;
            self.frames_encoded += 1;
            self.bytes_produced += packet.len() as u64;
            packets.push(packet);
            offset += chunk;
        }
        self.backlog.drain(..offset);
        Ok(packets)
    }

    /// Encode whatever is left, padded with silence to full frames
    pub fn flush(&mut self) -> Result<Vec<Bytes>, CodecError> {
        if let Some(converter) = self.converter.as_mut() {
            self.converted.clear();
            converter.flush_into(&mut self.converted)?;
            self.backlog.extend_from_slice(&self.converted);
        }
        let mut packets = self.encode_backlog()?;
        if self.backlog.is_empty() {
            return Ok(packets);
        }
        self.backlog.resize(self.samples_per_frame(), 0.0);
        let packet = Self::encode_chunk(&mut self.encoder, &mut self.encode_buffer, &self.backlog)?;
        self.backlog.clear();
        self.frames_encoded += 1;
        self.bytes_produced += packet.len() as u64;
        packets.push(packet);
        Ok(packets)
    }

    fn encode_chunk(
        encoder: &mut Encoder,
        buffer: &mut [u8],
        samples: &[f32],
    ) -> Result<Bytes, CodecError> {
        let size = encoder
            .encode_float(samples, buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;
        Ok(Bytes::copy_from_slice(&buffer[..size]))
    }

    /// Rate the encoder accepts input at
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Rate of the encoded stream; differs from the input rate when resampling
    pub fn opus_rate(&self) -> u32 {
        self.opus_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Opus frame size in samples (per channel)
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Total samples per Opus frame (all channels)
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels
    }

    /// Interleaved samples waiting for a full frame
    pub fn pending_samples(&self) -> usize {
        self.backlog.len()
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_creation() {
        let encoder = OpusEncoder::new(&OpusConfig::default(), 48000, 2).unwrap();
        assert_eq!(encoder.frame_size(), 960);
        assert_eq!(encoder.samples_per_frame(), 1920);
    }

    #[test]
    fn test_rejects_more_than_two_channels() {
        assert!(matches!(
            OpusEncoder::new(&OpusConfig::default(), 48000, 3),
            Err(CodecError::EncoderInit(_))
        ));
    }

    #[test]
    fn test_reframes_capture_frames() {
        let mut encoder = OpusEncoder::new(&OpusConfig::default(), 48000, 2).unwrap();

        // One 2048-sample capture frame covers two 960-sample Opus frames
        let packets = encoder.push(&vec![0.0f32; 2048 * 2]).unwrap();
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| !p.is_empty()));
        assert_eq!(encoder.pending_samples(), (2048 - 1920) * 2);

        let tail = encoder.flush().unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(encoder.pending_samples(), 0);
        assert_eq!(encoder.stats().frames_encoded, 3);
    }

    #[test]
    fn test_resamples_cd_rate_input() {
        let mut encoder = OpusEncoder::new(&OpusConfig::default(), 44100, 2).unwrap();
        assert_eq!(encoder.sample_rate(), 44100);
        assert_eq!(encoder.opus_rate(), 48000);
        assert_eq!(encoder.frame_size(), 960);

        // Half a second at 44.1 kHz is about 25 frames of 20 ms once converted
        let mut packets = Vec::new();
        for _ in 0..10 {
            packets.extend(encoder.push(&vec![0.0f32; 2205 * 2]).unwrap());
        }
        packets.extend(encoder.flush().unwrap());
        assert!((24..=28).contains(&packets.len()), "{} packets", packets.len());
        assert_eq!(encoder.pending_samples(), 0);
    }

    #[test]
    fn test_native_rates_skip_resampling() {
        for rate in OPUS_RATES {
            let encoder = OpusEncoder::new(&OpusConfig::default(), rate, 1).unwrap();
            assert_eq!(encoder.opus_rate(), rate);
        }
    }

    #[test]
    fn test_rejects_ragged_input() {
        let mut encoder = OpusEncoder::new(&OpusConfig::default(), 48000, 2).unwrap();
        assert!(matches!(
            encoder.push(&[0.0; 3]),
            Err(CodecError::InvalidFrameSize(3))
        ));
    }

    #[test]
    fn test_low_delay_frames() {
        let config = OpusConfig {
            application: OpusApplication::LowDelay,
            frame_ms: 2.5,
            ..Default::default()
        };
        let mut encoder = OpusEncoder::new(&config, 48000, 1).unwrap();
        assert_eq!(encoder.frame_size(), 120);
        assert_eq!(encoder.push(&[0.0; 240]).unwrap().len(), 2);
    }
}
