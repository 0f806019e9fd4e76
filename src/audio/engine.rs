//! Audio engine boundary
//!
//! The capture client talks to its audio engine only through [`AudioEngine`].
//! Ports are addressed by their full `client:port` name, the way JACK names
//! them; the ports this client registers are additionally addressed by
//! [`PortId`], which is also the channel index.

use crate::error::EngineError;

/// Index of one of our own registered input ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub usize);

/// Capabilities of an engine-visible port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortFlags {
    /// Port produces audio (can be a connection source)
    pub output: bool,
    /// Port consumes audio (can be a connection destination)
    pub input: bool,
}

impl PortFlags {
    pub fn is_output(&self) -> bool {
        self.output
    }

    pub fn is_input(&self) -> bool {
        self.input
    }
}

/// One block of audio as seen by the process callback
pub struct ProcessScope<'a> {
    frames: usize,
    ports: &'a [Vec<f32>],
}

impl<'a> ProcessScope<'a> {
    /// `ports[i]` must hold at least `frames` samples for every registered port.
    pub fn new(frames: usize, ports: &'a [Vec<f32>]) -> Self {
        Self { frames, ports }
    }

    /// Frames in this block
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// The block's samples for one of our input ports
    pub fn port_buffer(&self, port: PortId) -> &[f32] {
        match self.ports.get(port.0) {
            Some(buffer) => &buffer[..self.frames.min(buffer.len())],
            None => &[],
        }
    }
}

/// Realtime process callback. Called on the engine's timing thread.
pub trait ProcessHandler: Send + 'static {
    fn process(&mut self, scope: &ProcessScope<'_>);
}

/// Called at most once when the engine drops the client
pub type ShutdownCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// Operations the capture client needs from an audio engine
pub trait AudioEngine {
    /// Name this client registered under
    fn client_name(&self) -> &str;

    /// Current engine sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Register a new input port named `client:name`
    fn register_input_port(&mut self, name: &str) -> Result<PortId, EngineError>;

    /// Full name of one of our ports
    fn port_name(&self, port: PortId) -> Option<String>;

    /// All engine-visible port names in enumeration order, optionally
    /// restricted to names containing `pattern`
    fn ports(&self, pattern: Option<&str>) -> Vec<String>;

    /// Flags of a port by full name
    fn port_flags(&self, name: &str) -> Option<PortFlags>;

    /// Connect a source port to a destination port
    fn connect(&mut self, source: &str, destination: &str) -> Result<(), EngineError>;

    /// Register the callback invoked when the engine drops this client
    fn on_shutdown(&mut self, callback: ShutdownCallback);

    /// Install the process callback and start delivering blocks
    fn activate(&mut self, handler: Box<dyn ProcessHandler>) -> Result<(), EngineError>;

    /// Stop delivering blocks and release the client
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_buffer_is_trimmed_to_block() {
        let ports = vec![vec![1.0; 16], vec![2.0; 16]];
        let scope = ProcessScope::new(4, &ports);

        assert_eq!(scope.frames(), 4);
        assert_eq!(scope.port_buffer(PortId(1)), &[2.0; 4]);
        assert!(scope.port_buffer(PortId(7)).is_empty());
    }
}
