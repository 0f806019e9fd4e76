//! cpal-backed audio engine
//!
//! Presents every input channel of every cpal input device as an output port
//! named `<device>:capture_<n>`, and this client's inputs as `<client>:in_<n>`.
//! All connected sources must belong to one device so that every channel is
//! driven by the same clock.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::engine::{
    AudioEngine, PortFlags, PortId, ProcessHandler, ProcessScope, ShutdownCallback,
};
use crate::constants::{DEFAULT_SAMPLE_RATE, MAX_BLOCK_FRAMES, PREFERRED_SAMPLE_RATE};
use crate::error::EngineError;

/// A hardware channel exposed as a source port
#[derive(Debug, Clone)]
struct SourcePort {
    name: String,
    device: String,
    channel: usize,
}

/// Input device summary taken at open time
#[derive(Debug, Clone)]
struct DeviceSummary {
    name: String,
    channels: u16,
    sample_rate: u32,
}

/// Audio engine client on top of a cpal host
pub struct CpalEngine {
    client_name: String,
    host: cpal::Host,
    devices: Vec<DeviceSummary>,
    sources: Vec<SourcePort>,
    /// Registered input ports (short names)
    inputs: Vec<String>,
    /// Device channel routed into each input port
    routes: Vec<Option<usize>>,
    /// Device every connection so far comes from
    device: Option<String>,
    default_rate: u32,
    shutdown: Arc<Mutex<Option<ShutdownCallback>>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalEngine {
    /// Open a client on the selected host and snapshot its input devices.
    pub fn open(client_name: &str) -> Result<Self, EngineError> {
        let host = select_host()?;

        let default_rate = host
            .default_input_device()
            .and_then(|d| input_format(&d))
            .map(|(_, rate)| rate)
            .unwrap_or(DEFAULT_SAMPLE_RATE);

        let mut devices = Vec::new();
        let mut sources = Vec::new();
        let input_devices = host
            .input_devices()
            .map_err(|e| EngineError::ClientOpen(format!("{}: {}", client_name, e)))?;

        for device in input_devices {
            let Ok(name) = device.name() else { continue };
            let Some((channels, sample_rate)) = input_format(&device) else { continue };

            for channel in 0..channels as usize {
                sources.push(SourcePort {
                    name: format!("{}:capture_{}", name, channel + 1),
                    device: name.clone(),
                    channel,
                });
            }
            devices.push(DeviceSummary {
                name,
                channels,
                sample_rate,
            });
        }

        tracing::info!(
            "Opened engine client {} on {} ({} source ports)",
            client_name,
            host.id().name(),
            sources.len()
        );

        Ok(Self {
            client_name: client_name.to_string(),
            host,
            devices,
            sources,
            inputs: Vec::new(),
            routes: Vec::new(),
            device: None,
            default_rate,
            shutdown: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        })
    }

    fn full_input_name(&self, short: &str) -> String {
        format!("{}:{}", self.client_name, short)
    }

    fn input_index(&self, full_name: &str) -> Option<usize> {
        self.inputs
            .iter()
            .position(|short| self.full_input_name(short) == full_name)
    }

    fn connected_device(&self) -> Option<&DeviceSummary> {
        let name = self.device.as_ref()?;
        self.devices.iter().find(|d| &d.name == name)
    }

    fn find_device(&self, name: &str) -> Result<cpal::Device, EngineError> {
        let devices = self
            .host
            .input_devices()
            .map_err(|e| EngineError::CpalError(e.to_string()))?;

        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }
        Err(EngineError::UnknownPort(name.to_string()))
    }
}

impl AudioEngine for CpalEngine {
    fn client_name(&self) -> &str {
        &self.client_name
    }

    fn sample_rate(&self) -> u32 {
        self.connected_device()
            .map(|d| d.sample_rate)
            .unwrap_or(self.default_rate)
    }

    fn register_input_port(&mut self, name: &str) -> Result<PortId, EngineError> {
        if self.thread_handle.is_some() || self.inputs.iter().any(|n| n == name) {
            return Err(EngineError::PortRegistration(name.to_string()));
        }
        self.inputs.push(name.to_string());
        self.routes.push(None);
        Ok(PortId(self.inputs.len() - 1))
    }

    fn port_name(&self, port: PortId) -> Option<String> {
        self.inputs.get(port.0).map(|short| self.full_input_name(short))
    }

    fn ports(&self, pattern: Option<&str>) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.name.clone())
            .chain(self.inputs.iter().map(|short| self.full_input_name(short)))
            .filter(|name| pattern.map_or(true, |p| name.contains(p)))
            .collect()
    }

    fn port_flags(&self, name: &str) -> Option<PortFlags> {
        if self.sources.iter().any(|s| s.name == name) {
            return Some(PortFlags {
                output: true,
                input: false,
            });
        }
        self.input_index(name).map(|_| PortFlags {
            output: false,
            input: true,
        })
    }

    fn connect(&mut self, source: &str, destination: &str) -> Result<(), EngineError> {
        let connect_error = |reason: &str| EngineError::Connect {
            from: source.to_string(),
            to: destination.to_string(),
            reason: reason.to_string(),
        };

        let port = self
            .sources
            .iter()
            .find(|s| s.name == source)
            .cloned()
            .ok_or_else(|| connect_error("no such source port"))?;
        let index = self
            .input_index(destination)
            .ok_or_else(|| connect_error("no such input port"))?;

        if let Some(device) = &self.device {
            if device != &port.device {
                return Err(connect_error("sources must share one device clock"));
            }
        }
        if self.thread_handle.is_some() {
            return Err(connect_error("client is already active"));
        }

        self.routes[index] = Some(port.channel);
        self.device = Some(port.device);
        Ok(())
    }

    fn on_shutdown(&mut self, callback: ShutdownCallback) {
        *self.shutdown.lock() = Some(callback);
    }

    fn activate(&mut self, mut handler: Box<dyn ProcessHandler>) -> Result<(), EngineError> {
        if self.thread_handle.is_some() {
            return Err(EngineError::AlreadyActive);
        }
        let summary = self
            .connected_device()
            .cloned()
            .ok_or_else(|| EngineError::StreamError("no source ports connected".to_string()))?;
        let device = self.find_device(&summary.name)?;

        let config = StreamConfig {
            channels: summary.channels,
            sample_rate: cpal::SampleRate(summary.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let device_channels = summary.channels as usize;
        let routes = self.routes.clone();
        let mut scratch: Vec<Vec<f32>> = vec![vec![0.0; MAX_BLOCK_FRAMES]; routes.len()];

        let (ready_tx, ready_rx) = bounded::<Result<(), EngineError>>(1);
        let running = self.running.clone();
        let shutdown = self.shutdown.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("engine-{}", self.client_name))
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let total = data.len() / device_channels;
                        let mut offset = 0;
                        while offset < total {
                            let frames = (total - offset).min(MAX_BLOCK_FRAMES);
                            for (port, route) in routes.iter().enumerate() {
                                let buffer = &mut scratch[port][..frames];
                                match route {
                                    Some(channel) => {
                                        for (i, sample) in buffer.iter_mut().enumerate() {
                                            let index = (offset + i) * device_channels + channel;
                                            *sample = data[index];
                                        }
                                    }
                                    None => buffer.fill(0.0),
                                }
                            }
                            handler.process(&ProcessScope::new(frames, &scratch));
                            offset += frames;
                        }
                    },
                    move |err| {
                        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                            if let Some(callback) = shutdown.lock().take() {
                                callback(err.to_string());
                            }
                        } else {
                            tracing::warn!("Engine stream error: {}", err);
                        }
                    },
                    None,
                );

                let stream = match start_stream(stream) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Keep the stream alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
            })
            .map_err(|e| EngineError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.thread_handle = Some(handle);
                tracing::info!(
                    "Engine active: {} @ {} Hz, {} ports",
                    summary.name,
                    summary.sample_rate,
                    self.inputs.len()
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(EngineError::StreamError("stream did not start".to_string()))
            }
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Engine client {} closed", self.client_name);
        }
    }
}

impl Drop for CpalEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Channel count and rate to open `device` with.
///
/// Keeps the device's default channel layout but runs it at
/// [`PREFERRED_SAMPLE_RATE`] when the device supports that rate for f32 input.
fn input_format(device: &cpal::Device) -> Option<(u16, u32)> {
    let default = device.default_input_config().ok()?;
    let channels = default.channels();
    let preferred = cpal::SampleRate(PREFERRED_SAMPLE_RATE);

    let supports_preferred = device
        .supported_input_configs()
        .map(|mut ranges| {
            ranges.any(|range| {
                range.channels() == channels
                    && range.sample_format() == cpal::SampleFormat::F32
                    && range.min_sample_rate() <= preferred
                    && preferred <= range.max_sample_rate()
            })
        })
        .unwrap_or(false);

    if supports_preferred {
        Some((channels, PREFERRED_SAMPLE_RATE))
    } else {
        Some((channels, default.sample_rate().0))
    }
}

fn start_stream(
    built: Result<cpal::Stream, cpal::BuildStreamError>,
) -> Result<cpal::Stream, EngineError> {
    let stream = built.map_err(|e| EngineError::StreamError(e.to_string()))?;
    stream
        .play()
        .map_err(|e| EngineError::StreamError(e.to_string()))?;
    Ok(stream)
}

#[cfg(all(feature = "jack", target_os = "linux"))]
fn select_host() -> Result<cpal::Host, EngineError> {
    cpal::host_from_id(cpal::HostId::Jack).map_err(|_| {
        EngineError::ClientOpen("JACK server not running?".to_string())
    })
}

#[cfg(not(all(feature = "jack", target_os = "linux")))]
fn select_host() -> Result<cpal::Host, EngineError> {
    Ok(cpal::default_host())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_ports_are_outputs() {
        // Only meaningful on machines with an audio host; CI may have none
        let Ok(mut engine) = CpalEngine::open("caster-test") else {
            return;
        };
        for name in engine.ports(Some(":capture_")) {
            let flags = engine.port_flags(&name).unwrap();
            assert!(flags.is_output());
            assert!(!flags.is_input());
        }

        let port = engine.register_input_port("in_1").unwrap();
        assert_eq!(engine.port_name(port).as_deref(), Some("caster-test:in_1"));
        assert!(engine.port_flags("caster-test:in_1").unwrap().is_input());
        assert!(engine.register_input_port("in_1").is_err());
        assert!(engine.connect("nowhere:capture_1", "caster-test:in_1").is_err());
    }
}
