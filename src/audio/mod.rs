//! Audio subsystem: engine boundary, per-channel buffers and capture

pub mod buffer;
pub mod capture;
pub mod device;
pub mod engine;
pub mod wiring;

pub use buffer::{channel_buffer, ChannelConsumer, ChannelProducer};
pub use capture::CaptureHandoff;
pub use device::CpalEngine;
pub use engine::{AudioEngine, PortFlags, PortId, ProcessHandler, ProcessScope};
pub use wiring::{wire_ports, WiringMode};
