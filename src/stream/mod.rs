//! Drain side of the capture pipeline and the streamer boundary
//!
//! The drain worker pulls channel-aligned frames out of the capture buffers
//! and hands them to a [`Streamer`]. The connection supervisor keeps the
//! streamer's server link alive.

pub mod drain;
pub mod supervisor;

pub use drain::DrainWorker;
pub use supervisor::{Clock, ConnectionState, ConnectionSupervisor, MonotonicClock, TickOutcome};

use std::time::{Duration, Instant};

use crate::error::StreamError;

/// One frame of audio: the same number of samples for every channel
pub struct Frame<'a> {
    channels: &'a [Vec<f32>],
    samples: usize,
}

impl<'a> Frame<'a> {
    /// Each entry of `channels` must hold at least `samples` samples.
    pub fn new(channels: &'a [Vec<f32>], samples: usize) -> Self {
        Self { channels, samples }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index][..self.samples]
    }

    /// Append the frame to `out` as interleaved samples
    pub fn interleave_into(&self, out: &mut Vec<f32>) {
        out.reserve(self.samples * self.channels.len());
        for i in 0..self.samples {
            for channel in self.channels {
                out.push(channel[i]);
            }
        }
    }
}

/// Encoder and streaming endpoint the drain worker feeds
pub trait Streamer: Send {
    /// (Re)establish the server connection
    fn connect(&mut self) -> Result<(), StreamError>;

    /// How long to wait after a forced disconnect before reconnecting
    fn reconnect_timeout(&self) -> Duration;

    /// When the link was dropped, if it was dropped since the last call.
    /// Clears the flag.
    fn take_forced_disconnect(&mut self) -> Option<Instant>;

    /// Encode and send one frame.
    ///
    /// `StreamError::Disconnected` and `StreamError::NotConnected` are
    /// recoverable; anything else ends the session.
    fn handle_output(&mut self, frame: &Frame<'_>, sample_rate: u32) -> Result<(), StreamError>;

    /// Forget which display metadata was sent so it goes out again
    fn reset_metadata(&mut self);

    /// Flush pending output at session end
    fn finish(&mut self) -> Result<(), StreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interleaves_in_channel_order() {
        let channels = vec![vec![1.0, 2.0, 99.0], vec![-1.0, -2.0, 99.0]];
        let frame = Frame::new(&channels, 2);

        let mut out = Vec::new();
        frame.interleave_into(&mut out);

        assert_eq!(frame.channel_count(), 2);
        assert_eq!(frame.channel(1), &[-1.0, -2.0]);
        assert_eq!(out, vec![1.0, -1.0, 2.0, -2.0]);
    }
}
