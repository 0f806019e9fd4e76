//! One-time port registration and wiring
//!
//! Registers one input port per channel and connects them, either to an
//! explicit list of source ports or to the first two output ports whose name
//! contains a pattern. Any failure here is fatal to the session.

use crate::audio::engine::{AudioEngine, PortId};
use crate::error::WiringError;
use crate::session::SessionContext;

/// How input ports get connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WiringMode {
    /// Connect input port `i` to `sources[i]`
    Explicit(Vec<String>),
    /// Connect inputs 0 and 1 to the first two matching output ports
    Pattern(String),
}

impl WiringMode {
    /// Channel count implied by the mode
    pub fn channels(&self) -> usize {
        match self {
            WiringMode::Explicit(sources) => sources.len(),
            WiringMode::Pattern(_) => 2,
        }
    }
}

/// Name of the local input port for channel `index` (zero-based)
pub fn input_port_name(index: usize) -> String {
    format!("in_{}", index + 1)
}

/// Register the session's input ports, connect them and enable processing.
///
/// Returns the registered ports in channel order. On error the caller is
/// expected to close the engine client and exit.
pub fn wire_ports<E: AudioEngine + ?Sized>(
    engine: &mut E,
    mode: &WiringMode,
    session: &SessionContext,
) -> Result<Vec<PortId>, WiringError> {
    let channels = session.channels();
    if mode.channels() != channels {
        return Err(WiringError::SourceCount {
            expected: channels,
            actual: mode.channels(),
        });
    }

    let mut ports = Vec::with_capacity(channels);
    for index in 0..channels {
        ports.push(engine.register_input_port(&input_port_name(index))?);
    }

    match mode {
        WiringMode::Explicit(sources) => connect_explicit(engine, sources, &ports)?,
        WiringMode::Pattern(pattern) => connect_first_two(engine, pattern, &ports)?,
    }

    session.enable_processing();
    tracing::info!("Wired {} input ports on {}", channels, engine.client_name());
    Ok(ports)
}

fn connect_explicit<E: AudioEngine + ?Sized>(
    engine: &mut E,
    sources: &[String],
    ports: &[PortId],
) -> Result<(), WiringError> {
    for (source, port) in sources.iter().zip(ports) {
        let destination = local_name(engine, *port)?;
        engine.connect(source, &destination)?;
        tracing::debug!("Connected {} -> {}", source, destination);
    }
    Ok(())
}

fn connect_first_two<E: AudioEngine + ?Sized>(
    engine: &mut E,
    pattern: &str,
    ports: &[PortId],
) -> Result<(), WiringError> {
    let matches: Vec<String> = engine
        .ports(None)
        .into_iter()
        .filter(|name| name.contains(pattern))
        .filter(|name| engine.port_flags(name).is_some_and(|flags| flags.is_output()))
        .take(2)
        .collect();

    if matches.len() < 2 {
        return Err(WiringError::NotEnoughMatches {
            pattern: pattern.to_string(),
        });
    }

    for (source, port) in matches.iter().zip(ports) {
        let destination = local_name(engine, *port)?;
        tracing::info!("Connecting to port {}", source);
        engine.connect(source, &destination)?;
    }
    Ok(())
}

fn local_name<E: AudioEngine + ?Sized>(engine: &E, port: PortId) -> Result<String, WiringError> {
    engine
        .port_name(port)
        .ok_or_else(|| crate::error::EngineError::UnknownPort(input_port_name(port.0)).into())
}
