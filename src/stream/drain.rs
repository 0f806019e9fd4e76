//! Drain worker
//!
//! Polls the channel buffers and forwards a frame only when every channel
//! holds a full one. There is no wakeup from the capture side; the loop
//! sleeps a bounded interval derived from the frame length and the buffer
//! headroom between polls.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::buffer::{ChannelConsumer, SAMPLE_WIDTH};
use crate::error::StreamError;
use crate::session::{SessionContext, SessionStatus};
use crate::stream::{Frame, Streamer};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between drain polls.
///
/// Half a frame keeps latency low; a quarter of the ring's duration keeps the
/// capture side from filling the ring between two polls.
pub fn poll_interval(frame_samples: usize, sample_rate: u32, buffer_bytes: usize) -> Duration {
    let rate = sample_rate.max(1) as f64;
    let frame_secs = frame_samples as f64 / rate;
    let headroom_secs = (buffer_bytes / SAMPLE_WIDTH) as f64 / rate;
    let secs = (frame_secs / 2.0).min(headroom_secs / 4.0);
    Duration::from_secs_f64(secs).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

/// Number of frames covering `duration` of audio, rounded up
pub fn frames_for_duration(duration: Duration, frame_samples: usize, sample_rate: u32) -> u64 {
    let samples = (duration.as_nanos() * sample_rate as u128).div_ceil(1_000_000_000);
    samples.div_ceil(frame_samples.max(1) as u128) as u64
}

/// Totals reported when the worker exits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub frames_forwarded: u64,
}

/// Consumer side of the capture handoff
pub struct DrainWorker<S: Streamer> {
    session: Arc<SessionContext>,
    consumers: Vec<ChannelConsumer>,
    streamer: Arc<Mutex<S>>,
    scratch: Vec<Vec<f32>>,
    poll_interval: Duration,
    frame_limit: Option<u64>,
    frames_forwarded: u64,
}

impl<S: Streamer> DrainWorker<S> {
    /// `consumers[i]` must be the read half of channel `i`'s buffer.
    pub fn new(
        session: Arc<SessionContext>,
        consumers: Vec<ChannelConsumer>,
        streamer: Arc<Mutex<S>>,
    ) -> Self {
        let frame_samples = session.frame_samples();
        let rate = session.sample_rate();
        let scratch = vec![vec![0.0; frame_samples]; consumers.len()];
        let poll_interval = poll_interval(frame_samples, rate, session.buffer_bytes());
        let frame_limit = session
            .settings()
            .duration
            .map(|d| frames_for_duration(d, frame_samples, rate));

        tracing::debug!(
            "Drain worker: {} channels, {} samples/frame, polling every {:?}",
            consumers.len(),
            frame_samples,
            poll_interval
        );

        Self {
            session,
            consumers,
            streamer,
            scratch,
            poll_interval,
            frame_limit,
            frames_forwarded: 0,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded
    }

    /// True when every channel holds at least one full frame
    pub fn frame_ready(&self) -> bool {
        let frame_bytes = self.session.frame_bytes();
        self.consumers
            .iter()
            .all(|c| c.available_to_read() >= frame_bytes)
    }

    fn limit_reached(&self) -> bool {
        self.frame_limit
            .is_some_and(|limit| self.frames_forwarded >= limit)
    }

    /// Forward every frame that is ready right now.
    ///
    /// Returns the number of frames forwarded. Errors are the streamer's
    /// unrecoverable ones.
    pub fn poll(&mut self) -> Result<usize, StreamError> {
        if !self.session.capture_enabled() {
            return Ok(0);
        }

        let rate = self.session.sample_rate();
        let mut forwarded = 0;
        while self.frame_ready() && !self.limit_reached() {
            for (consumer, buffer) in self.consumers.iter_mut().zip(self.scratch.iter_mut()) {
                consumer.read_samples(buffer);
            }

            let frame = Frame::new(&self.scratch, self.session.frame_samples());
            match self.streamer.lock().handle_output(&frame, rate) {
                Ok(()) => {}
                Err(StreamError::Disconnected(reason)) => {
                    tracing::warn!("Frame dropped, link lost: {}", reason);
                }
                Err(StreamError::NotConnected) => {}
                Err(e) => return Err(e),
            }
            self.frames_forwarded += 1;
            forwarded += 1;
        }
        Ok(forwarded)
    }

    /// Poll until the session stops or the capture duration is reached.
    pub fn run(mut self) -> DrainSummary {
        while !self.session.stop_requested() {
            if let Err(e) = self.poll() {
                tracing::error!("Streamer failed: {}", e);
                self.session.fail(SessionStatus::StreamFailed);
                self.session.request_stop();
                break;
            }
            if self.limit_reached() {
                tracing::info!(
                    "Capture duration reached after {} frames",
                    self.frames_forwarded
                );
                self.session.request_stop();
                break;
            }
            thread::sleep(self.poll_interval);
        }

        DrainSummary {
            frames_forwarded: self.frames_forwarded,
        }
    }
}
