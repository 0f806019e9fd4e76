//! Sample rate conversion ahead of the Opus encoder
//!
//! libopus only runs at 8, 12, 16, 24 or 48 kHz. Capture at any other rate
//! is converted to 48 kHz here.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::CodecError;

/// Input frames per resampler chunk
const CHUNK_FRAMES: usize = 1024;

/// Interleaved-in, interleaved-out wrapper around a fixed-input sinc resampler
pub struct RateConverter {
    resampler: SincFixedIn<f32>,
    channels: usize,
    /// Planar input not yet converted
    pending: Vec<Vec<f32>>,
}

impl RateConverter {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self, CodecError> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let ratio = output_rate as f64 / input_rate.max(1) as f64;
        let resampler = SincFixedIn::new(ratio, 1.0, params, CHUNK_FRAMES, channels)
            .map_err(|e| CodecError::EncoderInit(format!("resampler: {}", e)))?;

        tracing::info!(
            "Resampling {} Hz -> {} Hz for the encoder ({} ch)",
            input_rate,
            output_rate,
            channels
        );

        Ok(Self {
            resampler,
            channels,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
        })
    }

    /// Queue interleaved samples and append every converted chunk to `out`
    pub fn process_into(
        &mut self,
        interleaved: &[f32],
        out: &mut Vec<f32>,
    ) -> Result<(), CodecError> {
        for (i, sample) in interleaved.iter().enumerate() {
            self.pending[i % self.channels].push(*sample);
        }
        self.drain_chunks(out)
    }

    /// Pad what is left with silence to one chunk and convert it
    pub fn flush_into(&mut self, out: &mut Vec<f32>) -> Result<(), CodecError> {
        if self.pending[0].is_empty() {
            return Ok(());
        }
        let needed = self.resampler.input_frames_next();
        for channel in &mut self.pending {
            if channel.len() < needed {
                channel.resize(needed, 0.0);
            }
        }
        self.drain_chunks(out)
    }

    fn drain_chunks(&mut self, out: &mut Vec<f32>) -> Result<(), CodecError> {
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending[0].len() < needed {
                return Ok(());
            }

            let chunk: Vec<&[f32]> = self.pending.iter().map(|c| &c[..needed]).collect();
            let converted = self
                .resampler
                .process(&chunk, None)
                .map_err(|e| CodecError::EncodingFailed(format!("resampler: {}", e)))?;

            let frames = converted.first().map_or(0, Vec::len);
            out.reserve(frames * self.channels);
            for i in 0..frames {
                for channel in &converted {
                    out.push(channel[i]);
                }
            }
            for channel in &mut self.pending {
                channel.drain(..needed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_44k1_to_48k() {
        let mut converter = RateConverter::new(44100, 48000, 2).unwrap();
        let mut out = Vec::new();

        // One second of stereo input
        converter.process_into(&vec![0.0; 44100 * 2], &mut out).unwrap();
        converter.flush_into(&mut out).unwrap();

        assert_eq!(out.len() % 2, 0);
        let frames = out.len() / 2;
        // Roughly a second at the output rate, give or take the padded tail
        assert!(frames > 47000 && frames < 50000, "got {} frames", frames);
    }

    #[test]
    fn test_holds_partial_chunk() {
        let mut converter = RateConverter::new(44100, 48000, 1).unwrap();
        let mut out = Vec::new();
        converter.process_into(&[0.1; 100], &mut out).unwrap();
        assert!(out.is_empty());

        converter.flush_into(&mut out).unwrap();
        assert!(!out.is_empty());
    }
}
