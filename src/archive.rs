//! Local WAV archive of the outgoing stream

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::StreamError;
use crate::stream::Frame;

/// Writes every forwarded frame to a WAV file.
///
/// 16 and 24 bit archives store integer PCM; 32 bit stores float.
pub struct WavArchive {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    bit_depth: u16,
    frames_written: u64,
}

impl WavArchive {
    pub fn create(
        path: &Path,
        channels: usize,
        sample_rate: u32,
        bit_depth: u16,
    ) -> Result<Self, StreamError> {
        let sample_format = match bit_depth {
            16 | 24 => SampleFormat::Int,
            32 => SampleFormat::Float,
            other => {
                return Err(StreamError::Archive(format!(
                    "unsupported bit depth {}",
                    other
                )))
            }
        };
        let spec = WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: bit_depth,
            sample_format,
        };

        let writer = WavWriter::create(path, spec)
            .map_err(|e| StreamError::Archive(format!("{}: {}", path.display(), e)))?;

        tracing::info!(
            "Archiving to {} ({} ch, {} Hz, {} bit)",
            path.display(),
            channels,
            sample_rate,
            bit_depth
        );

        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            bit_depth,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write_frame(&mut self, frame: &Frame<'_>) -> Result<(), StreamError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(StreamError::Archive("archive already finished".into()));
        };

        for i in 0..frame.samples_per_channel() {
            for c in 0..frame.channel_count() {
                let sample = frame.channel(c)[i];
                let result = match self.bit_depth {
                    16 => writer.write_sample(to_int(sample, i16::MAX as f32) as i16),
                    24 => writer.write_sample(to_int(sample, 8_388_607.0)),
                    _ => writer.write_sample(sample),
                };
                result.map_err(|e| StreamError::Archive(e.to_string()))?;
            }
        }
        self.frames_written += 1;
        Ok(())
    }

    /// Patch the header and close the file. Safe to call twice.
    pub fn finish(&mut self) -> Result<(), StreamError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| StreamError::Archive(e.to_string()))?;
            tracing::debug!(
                "Archive {} closed after {} frames",
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }
}

fn to_int(sample: f32, scale: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) * scale).round() as i32
}
