//! Realtime capture handoff
//!
//! Runs on the engine's own timing thread. Copies each block into the
//! per-channel rings and returns; a block that does not fit is dropped for
//! that channel and counted as an overrun. Nothing on this path allocates,
//! locks, sleeps or logs.

use std::sync::Arc;

use crate::audio::buffer::{ChannelProducer, SAMPLE_WIDTH};
use crate::audio::engine::{PortId, ProcessHandler, ProcessScope};
use crate::session::SessionContext;

/// Process callback feeding one channel buffer per registered input port
pub struct CaptureHandoff {
    session: Arc<SessionContext>,
    producers: Vec<ChannelProducer>,
}

impl CaptureHandoff {
    /// `producers[i]` receives the audio of input port `i`.
    pub fn new(session: Arc<SessionContext>, producers: Vec<ChannelProducer>) -> Self {
        Self { session, producers }
    }

    /// Handle one engine block
    pub fn capture(&mut self, scope: &ProcessScope<'_>) {
        if !self.session.connected() {
            return;
        }
        if !self.session.process_enabled() || !self.session.capture_enabled() {
            return;
        }

        let required = scope.frames() * SAMPLE_WIDTH;
        if required == 0 {
            return;
        }
        for (chn, producer) in self.producers.iter_mut().enumerate() {
            if producer.available_to_write() < required {
                self.session.record_overrun();
                continue;
            }
            if producer.write_samples(scope.port_buffer(PortId(chn))) == 0 {
                self.session.record_overrun();
            }
        }
    }
}

impl ProcessHandler for CaptureHandoff {
    fn process(&mut self, scope: &ProcessScope<'_>) {
        self.capture(scope);
    }
}
