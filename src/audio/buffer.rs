//! Lock-free per-channel byte ring for the capture handoff
//!
//! Each channel gets one single-producer single-consumer ring. The producer
//! half lives inside the engine's realtime callback, the consumer half inside
//! the drain worker. Neither side ever blocks on the other.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Width in bytes of one captured sample (native-endian f32)
pub const SAMPLE_WIDTH: usize = std::mem::size_of::<f32>();

/// Create a channel buffer of `capacity` bytes and split it into its two halves.
///
/// `capacity` must be non-zero; session configuration validates this before
/// any buffer is created.
pub fn channel_buffer(capacity: usize) -> (ChannelProducer, ChannelConsumer) {
    let (prod, cons) = HeapRb::<u8>::new(capacity).split();
    (ChannelProducer { inner: prod }, ChannelConsumer { inner: cons })
}

/// Write half of a channel buffer, owned by the capture callback
pub struct ChannelProducer {
    inner: HeapProd<u8>,
}

impl ChannelProducer {
    /// Copy all of `bytes` into the ring, or nothing at all.
    ///
    /// Returns the number of bytes written, which is either `bytes.len()` or
    /// zero when the ring lacks space for the whole span.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        if bytes.len() > self.inner.vacant_len() {
            return 0;
        }
        self.inner.push_slice(bytes)
    }

    /// Copy a block of samples into the ring with the same all-or-nothing rule.
    ///
    /// Returns the number of bytes written.
    pub fn write_samples(&mut self, samples: &[f32]) -> usize {
        let required = samples.len() * SAMPLE_WIDTH;
        if required > self.inner.vacant_len() {
            return 0;
        }
        for sample in samples {
            self.inner.push_slice(&sample.to_ne_bytes());
        }
        required
    }

    pub fn available_to_write(&self) -> usize {
        self.inner.vacant_len()
    }
}

/// Read half of a channel buffer, owned by the drain worker
pub struct ChannelConsumer {
    inner: HeapCons<u8>,
}

impl ChannelConsumer {
    /// Read up to `out.len()` bytes. Callers check `available_to_read` first
    /// when they need the full span.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.inner.pop_slice(out)
    }

    /// Fill `out` with samples if the ring holds enough bytes for all of them.
    ///
    /// Returns the number of samples read: `out.len()` or zero.
    pub fn read_samples(&mut self, out: &mut [f32]) -> usize {
        if out.len() * SAMPLE_WIDTH > self.inner.occupied_len() {
            return 0;
        }
        let mut raw = [0u8; SAMPLE_WIDTH];
        for sample in out.iter_mut() {
            self.inner.pop_slice(&mut raw);
            *sample = f32::from_ne_bytes(raw);
        }
        out.len()
    }

    pub fn available_to_read(&self) -> usize {
        self.inner.occupied_len()
    }
}
