//! Status callbacks from the streamer and the supervisor
//!
//! Three channels of status: general, server and output throughput. Each
//! can be switched off through the config's `output_control` string.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Throughput sampling window; a figure is reported once it is exceeded
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(2);

/// Bytes-written notification from the streamer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytesWritten {
    Count(u64),
    /// Nothing is flowing; resets the sampling window
    NoData,
}

/// Which status callbacks get logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputControl {
    pub general: bool,
    pub server: bool,
    pub output: bool,
}

impl OutputControl {
    pub fn all() -> Self {
        Self {
            general: true,
            server: true,
            output: true,
        }
    }

    /// Parse a control string such as `"GENERAL,SERVER"`. Names not present
    /// are switched off; an empty string switches everything on.
    pub fn parse(control: &str) -> Self {
        if control.trim().is_empty() {
            return Self::all();
        }
        let control = control.to_ascii_uppercase();
        Self {
            general: control.contains("GENERAL"),
            server: control.contains("SERVER"),
            output: control.contains("OUTPUT"),
        }
    }
}

impl Default for OutputControl {
    fn default() -> Self {
        Self::all()
    }
}

/// Rolling throughput over a multi-second window
#[derive(Debug, Default)]
pub struct ThroughputMeter {
    window_start: Option<Instant>,
    window_bytes: u64,
    total_bytes: u64,
}

impl ThroughputMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification.
    ///
    /// Returns a line to report: the kbps figure when a window closes, or an
    /// empty line when the window is reset.
    pub fn record(&mut self, event: BytesWritten, now: Instant) -> Option<String> {
        let count = match event {
            BytesWritten::NoData => {
                self.window_start = None;
                return Some(String::new());
            }
            BytesWritten::Count(count) => count,
        };

        let start = match self.window_start {
            Some(start) => start,
            None => {
                self.window_start = Some(now);
                self.window_bytes = 0;
                now
            }
        };
        self.window_bytes += count;
        self.total_bytes += count;

        let elapsed = now.saturating_duration_since(start).as_secs();
        if elapsed > THROUGHPUT_WINDOW.as_secs() {
            let bytes_per_sec = self.window_bytes / elapsed;
            let kbps = bytes_per_sec * 8 / 1000;
            self.window_start = None;
            return Some(format!("{} Kbps", kbps));
        }
        None
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// Sink for status callbacks
pub struct StatusReporter {
    control: OutputControl,
    meter: Mutex<ThroughputMeter>,
    last_server: Mutex<Option<String>>,
    last_output: Mutex<Option<String>>,
}

impl StatusReporter {
    pub fn new(control: OutputControl) -> Self {
        Self {
            control,
            meter: Mutex::new(ThroughputMeter::new()),
            last_server: Mutex::new(None),
            last_output: Mutex::new(None),
        }
    }

    pub fn general(&self, message: &str) {
        if self.control.general {
            tracing::info!(target: "caster::status", "GENERAL: {}", message);
        }
    }

    pub fn server(&self, message: &str) {
        *self.last_server.lock() = Some(message.to_string());
        if self.control.server {
            tracing::info!(target: "caster::status", "SERVER: {}", message);
        }
    }

    pub fn bytes_written(&self, event: BytesWritten) {
        self.bytes_written_at(event, Instant::now());
    }

    /// Totals are always kept; the OUTPUT line only when that stream is on
    pub fn bytes_written_at(&self, event: BytesWritten, now: Instant) {
        let line = self.meter.lock().record(event, now);
        if !self.control.output {
            return;
        }
        if let Some(line) = line {
            tracing::info!(target: "caster::status", "OUTPUT: {}", line);
            *self.last_output.lock() = Some(line);
        }
    }

    pub fn last_server_status(&self) -> Option<String> {
        self.last_server.lock().clone()
    }

    pub fn last_output_status(&self) -> Option<String> {
        self.last_output.lock().clone()
    }

    pub fn total_bytes(&self) -> u64 {
        self.meter.lock().total_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_control_parse() {
        let control = OutputControl::parse("GENERAL, server");
        assert!(control.general);
        assert!(control.server);
        assert!(!control.output);
        assert_eq!(OutputControl::parse(""), OutputControl::all());
    }

    #[test]
    fn test_throughput_reported_after_window() {
        let mut meter = ThroughputMeter::new();
        let t0 = Instant::now();

        assert_eq!(meter.record(BytesWritten::Count(4000), t0), None);
        assert_eq!(meter.record(BytesWritten::Count(4000), t0 + Duration::from_secs(2)), None);
        // 12000 bytes over 3 s = 4000 B/s = 32 kbps
        assert_eq!(
            meter.record(BytesWritten::Count(4000), t0 + Duration::from_secs(3)),
            Some("32 Kbps".to_string())
        );
        assert_eq!(meter.total_bytes(), 12000);

        // Next window starts fresh
        let t1 = t0 + Duration::from_secs(10);
        assert_eq!(meter.record(BytesWritten::Count(1000), t1), None);
    }

    #[test]
    fn test_no_data_resets_window() {
        let mut meter = ThroughputMeter::new();
        let t0 = Instant::now();

        meter.record(BytesWritten::Count(100_000), t0);
        assert_eq!(meter.record(BytesWritten::NoData, t0), Some(String::new()));

        // The earlier bytes no longer count towards the next figure
        meter.record(BytesWritten::Count(3000), t0 + Duration::from_secs(5));
        assert_eq!(
            meter.record(BytesWritten::Count(0), t0 + Duration::from_secs(8)),
            Some("8 Kbps".to_string())
        );
    }

    #[test]
    fn test_reporter_tracks_last_lines() {
        let reporter = StatusReporter::new(OutputControl::all());
        reporter.server("Connecting in 3 seconds");
        reporter.bytes_written(BytesWritten::NoData);

        assert_eq!(
            reporter.last_server_status().as_deref(),
            Some("Connecting in 3 seconds")
        );
        assert_eq!(reporter.last_output_status().as_deref(), Some(""));
    }

    #[test]
    fn test_reporter_output_disabled() {
        let reporter = StatusReporter::new(OutputControl::parse("SERVER"));
        reporter.bytes_written(BytesWritten::Count(10));
        assert_eq!(reporter.total_bytes(), 10);
        assert_eq!(reporter.last_output_status(), None);
    }
}
