//! Server link and the Opus streamer built on it

pub mod link;
pub mod streamer;

pub use link::ServerLink;
pub use streamer::OpusStreamer;
