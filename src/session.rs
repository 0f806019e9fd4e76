//! Session-wide state shared by the realtime callback and the worker threads
//!
//! Everything here that more than one thread touches is an atomic flag or
//! counter. The engine's realtime thread reads these without ever taking a
//! lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use crate::audio::buffer::SAMPLE_WIDTH;
use crate::constants::{
    DEFAULT_BIT_DEPTH, DEFAULT_BUFFER_BYTES, DEFAULT_SAMPLE_RATE, FRAME_SAMPLES,
};
use crate::error::ConfigError;

/// Terminal status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionStatus {
    Ok = 0,
    /// Capture overruns were recorded
    Overrun = 1,
    /// The audio engine shut the client down
    EngineLost = 2,
    /// The streamer failed in a way the supervisor cannot repair
    StreamFailed = 3,
}

impl SessionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionStatus::Overrun,
            2 => SessionStatus::EngineLost,
            3 => SessionStatus::StreamFailed,
            _ => SessionStatus::Ok,
        }
    }

    /// Process exit code for this status
    pub fn exit_code(self) -> i32 {
        match self {
            SessionStatus::Ok => 0,
            // EPIPE, the code the capture client has always used for overruns
            SessionStatus::Overrun => 32,
            SessionStatus::EngineLost => 2,
            SessionStatus::StreamFailed => 3,
        }
    }
}

/// Static session parameters, fixed before any thread starts
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub channels: usize,
    pub bit_depth: u16,
    /// Per-channel ring capacity in bytes
    pub buffer_bytes: usize,
    /// Samples per channel in one forwarded frame
    pub frame_samples: usize,
    /// Stop after this much captured audio
    pub duration: Option<Duration>,
    /// Local archive of the captured audio
    pub output_path: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            channels: 2,
            bit_depth: DEFAULT_BIT_DEPTH,
            buffer_bytes: DEFAULT_BUFFER_BYTES,
            frame_samples: FRAME_SAMPLES,
            duration: None,
            output_path: None,
        }
    }
}

impl SessionSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels == 0 {
            return Err(ConfigError::Invalid("at least one channel is required".into()));
        }
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(ConfigError::Invalid(format!(
                "bit depth must be 16, 24 or 32, got {}",
                self.bit_depth
            )));
        }
        if self.frame_samples == 0 {
            return Err(ConfigError::Invalid("frame size must be non-zero".into()));
        }
        let frame_bytes = self.frame_samples * SAMPLE_WIDTH;
        if self.buffer_bytes < frame_bytes {
            return Err(ConfigError::Invalid(format!(
                "buffer size {} bytes cannot hold one {}-byte frame",
                self.buffer_bytes, frame_bytes
            )));
        }
        Ok(())
    }
}

/// Shared session record
pub struct SessionContext {
    settings: SessionSettings,
    sample_rate: AtomicU32,
    capture_enabled: AtomicBool,
    process_enabled: AtomicBool,
    connected: AtomicBool,
    stop_requested: AtomicBool,
    status: AtomicU8,
    overruns: AtomicU64,
}

impl SessionContext {
    pub fn new(settings: SessionSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            sample_rate: AtomicU32::new(DEFAULT_SAMPLE_RATE),
            capture_enabled: AtomicBool::new(false),
            process_enabled: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            status: AtomicU8::new(SessionStatus::Ok as u8),
            overruns: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn channels(&self) -> usize {
        self.settings.channels
    }

    pub fn bit_depth(&self) -> u16 {
        self.settings.bit_depth
    }

    pub fn buffer_bytes(&self) -> usize {
        self.settings.buffer_bytes
    }

    pub fn frame_samples(&self) -> usize {
        self.settings.frame_samples
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.settings.output_path.as_deref()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn set_sample_rate(&self, rate: u32) {
        self.sample_rate.store(rate, Ordering::Relaxed);
    }

    pub fn capture_enabled(&self) -> bool {
        self.capture_enabled.load(Ordering::Acquire)
    }

    pub fn set_capture_enabled(&self, enabled: bool) {
        self.capture_enabled.store(enabled, Ordering::Release);
    }

    pub fn process_enabled(&self) -> bool {
        self.process_enabled.load(Ordering::Acquire)
    }

    /// Set once by port wiring; the capture callback is a no-op before this.
    pub fn enable_processing(&self) {
        self.process_enabled.store(true, Ordering::Release);
    }

    /// Whether the downstream streaming link is up
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Record a failure. The first failure wins; later ones do not overwrite it.
    pub fn fail(&self, status: SessionStatus) {
        let _ = self.status.compare_exchange(
            SessionStatus::Ok as u8,
            status as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Bytes in one channel's share of a frame
    pub fn frame_bytes(&self) -> usize {
        self.settings.frame_samples * SAMPLE_WIDTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let session = SessionContext::new(SessionSettings::default()).unwrap();
        assert_eq!(session.channels(), 2);
        assert_eq!(session.buffer_bytes(), 1_000_000);
        assert_eq!(session.frame_bytes(), 2048 * 4);
        assert!(!session.process_enabled());
        assert!(!session.capture_enabled());
        assert_eq!(session.status(), SessionStatus::Ok);
    }

    #[test]
    fn test_rejects_buffer_smaller_than_frame() {
        let settings = SessionSettings {
            buffer_bytes: 1024,
            ..Default::default()
        };
        assert!(SessionContext::new(settings).is_err());
    }

    #[test]
    fn test_rejects_odd_bit_depth() {
        let settings = SessionSettings {
            bit_depth: 12,
            ..Default::default()
        };
        assert!(SessionContext::new(settings).is_err());
    }

    #[test]
    fn test_first_failure_wins() {
        let session = SessionContext::new(SessionSettings::default()).unwrap();
        session.fail(SessionStatus::EngineLost);
        session.fail(SessionStatus::Overrun);
        assert_eq!(session.status(), SessionStatus::EngineLost);
        assert_eq!(session.status().exit_code(), 2);
    }
}
