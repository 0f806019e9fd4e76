//! Error types for the capture client

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Port wiring error: {0}")]
    Wiring(#[from] WiringError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cannot open engine client {0}")]
    ClientOpen(String),

    #[error("Cannot register input port \"{0}\"")]
    PortRegistration(String),

    #[error("Unknown port: {0}")]
    UnknownPort(String),

    #[error("Cannot connect {from} to {to}: {reason}")]
    Connect {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Engine client is already active")]
    AlreadyActive,

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Port wiring failures. All of them are fatal at setup.
#[derive(Error, Debug)]
pub enum WiringError {
    #[error("Expected {expected} source ports, got {actual}")]
    SourceCount { expected: usize, actual: usize },

    #[error("Could not find at least two output ports matching ({pattern})")]
    NotEnoughMatches { pattern: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Streaming endpoint errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Not connected to server")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected from server: {0}")]
    Disconnected(String),

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported stream layout: {0}")]
    UnsupportedLayout(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot open config file ({path}): {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Cannot parse config file ({path}): {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
