//! In-memory engine and streamer shared by the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use audio_caster::audio::engine::ShutdownCallback;
use audio_caster::audio::{AudioEngine, PortFlags, PortId, ProcessHandler, ProcessScope};
use audio_caster::error::{EngineError, StreamError};
use audio_caster::stream::{Frame, Streamer};

/// Engine with a fixed port list that plays scripted blocks on activation
pub struct FakeEngine {
    pub name: String,
    pub rate: u32,
    /// `(name, flags)` in enumeration order
    pub ports: Vec<(String, PortFlags)>,
    pub inputs: Vec<String>,
    pub connect_attempts: Vec<(String, String)>,
    pub connections: Vec<(String, String)>,
    /// Sources that refuse connection
    pub refuse: Vec<String>,
    /// Each block holds one buffer per registered input
    pub blocks: Vec<Vec<Vec<f32>>>,
    /// Drop the client right after the scripted blocks
    pub shutdown_after_blocks: Option<String>,
    pub shutdown: Option<ShutdownCallback>,
    pub activated: bool,
    pub closed: bool,
}

pub fn output() -> PortFlags {
    PortFlags {
        output: true,
        input: false,
    }
}

pub fn input() -> PortFlags {
    PortFlags {
        output: false,
        input: true,
    }
}

impl FakeEngine {
    pub fn new(ports: &[(&str, PortFlags)]) -> Self {
        Self {
            name: "caster".to_string(),
            rate: 48000,
            ports: ports.iter().map(|(n, f)| (n.to_string(), *f)).collect(),
            inputs: Vec::new(),
            connect_attempts: Vec::new(),
            connections: Vec::new(),
            refuse: Vec::new(),
            blocks: Vec::new(),
            shutdown_after_blocks: None,
            shutdown: None,
            activated: false,
            closed: false,
        }
    }

    /// Two capture ports on "system", two monitor outputs and an input
    pub fn studio() -> Self {
        Self::new(&[
            ("system:capture_1", output()),
            ("system:playback_1", input()),
            ("system:capture_2", output()),
            ("mixer:monitor_l", output()),
            ("mixer:monitor_r", output()),
        ])
    }
}

impl AudioEngine for FakeEngine {
    fn client_name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn register_input_port(&mut self, name: &str) -> Result<PortId, EngineError> {
        self.inputs.push(name.to_string());
        Ok(PortId(self.inputs.len() - 1))
    }

    fn port_name(&self, port: PortId) -> Option<String> {
        self.inputs
            .get(port.0)
            .map(|short| format!("{}:{}", self.name, short))
    }

    fn ports(&self, pattern: Option<&str>) -> Vec<String> {
        self.ports
            .iter()
            .map(|(name, _)| name.clone())
            .filter(|name| pattern.map_or(true, |p| name.contains(p)))
            .collect()
    }

    fn port_flags(&self, name: &str) -> Option<PortFlags> {
        self.ports.iter().find(|(n, _)| n == name).map(|(_, f)| *f)
    }

    fn connect(&mut self, source: &str, destination: &str) -> Result<(), EngineError> {
        self.connect_attempts
            .push((source.to_string(), destination.to_string()));
        if self.refuse.iter().any(|r| r == source) {
            return Err(EngineError::Connect {
                from: source.to_string(),
                to: destination.to_string(),
                reason: "refused".to_string(),
            });
        }
        self.connections
            .push((source.to_string(), destination.to_string()));
        Ok(())
    }

    fn on_shutdown(&mut self, callback: ShutdownCallback) {
        self.shutdown = Some(callback);
    }

    fn activate(&mut self, mut handler: Box<dyn ProcessHandler>) -> Result<(), EngineError> {
        self.activated = true;
        for block in &self.blocks {
            let frames = block.first().map_or(0, Vec::len);
            handler.process(&ProcessScope::new(frames, block));
        }
        if let Some(reason) = self.shutdown_after_blocks.take() {
            if let Some(callback) = self.shutdown.take() {
                callback(reason);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Frames the fake streamer received, one `Vec` per channel
pub type FrameLog = Arc<Mutex<Vec<Vec<Vec<f32>>>>>;

/// Streamer that records every frame it is handed
pub struct FakeStreamer {
    pub frames: FrameLog,
    pub refuse_connect: bool,
    /// When the link dropped, reported on the next supervisor tick
    pub forced: Option<Instant>,
    pub connects: u32,
    pub finished: Arc<Mutex<bool>>,
}

impl FakeStreamer {
    pub fn new(frames: FrameLog) -> Self {
        Self {
            frames,
            refuse_connect: false,
            forced: None,
            connects: 0,
            finished: Arc::new(Mutex::new(false)),
        }
    }
}

impl Streamer for FakeStreamer {
    fn connect(&mut self) -> Result<(), StreamError> {
        self.connects += 1;
        if self.refuse_connect {
            return Err(StreamError::ConnectionFailed("refused".into()));
        }
        Ok(())
    }

    fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn take_forced_disconnect(&mut self) -> Option<Instant> {
        self.forced.take()
    }

    fn handle_output(&mut self, frame: &Frame<'_>, _sample_rate: u32) -> Result<(), StreamError> {
        self.frames.lock().push(
            (0..frame.channel_count())
                .map(|c| frame.channel(c).to_vec())
                .collect(),
        );
        Ok(())
    }

    fn reset_metadata(&mut self) {}

    fn finish(&mut self) -> Result<(), StreamError> {
        *self.finished.lock() = true;
        Ok(())
    }
}

/// `frames` samples of a ramp starting at `offset`
pub fn ramp(offset: f32, frames: usize) -> Vec<f32> {
    (0..frames).map(|i| offset + i as f32 * 1e-4).collect()
}
