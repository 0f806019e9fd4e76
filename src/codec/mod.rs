//! Opus codec wrapper
//!
//! Encodes interleaved capture frames into Opus packets for the server link.

pub mod encoder;
pub mod resample;

pub use encoder::{EncoderStats, OpusEncoder};
pub use resample::RateConverter;
