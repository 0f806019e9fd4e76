//! Wire format between the caster and the streaming server
//!
//! Every packet is a fixed 20-byte header followed by the payload:
//!
//! ```text
//! +-------+------+----------+-----------+-----------+---------+
//! | magic | kind | reserved | sequence  | timestamp | length  |
//! | 4     | 1    | 3        | 4 (BE)    | 4 (BE)    | 4 (BE)  |
//! +-------+------+----------+-----------+-----------+---------+
//! ```
//!
//! `timestamp` counts samples per channel since the stream started.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Packet magic, "CAST"
pub const MAGIC: [u8; 4] = *b"CAST";

/// Header length in bytes
pub const HEADER_LEN: usize = 20;

/// Payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// One Opus packet
    Audio = 1,
    /// UTF-8 display title
    Metadata = 2,
    /// Stream parameters, sent once per connection
    Hello = 3,
}

impl PacketKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Audio),
            2 => Some(Self::Metadata),
            3 => Some(Self::Hello),
            _ => None,
        }
    }
}

/// A decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub sequence: u32,
    pub timestamp: u32,
    pub length: u32,
}

impl PacketHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&MAGIC);
        buf.put_u8(self.kind as u8);
        buf.put_bytes(0, 3);
        buf.put_u32(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.length);
    }

    /// Parse a header from the front of `buf`.
    ///
    /// Returns `None` on a short buffer, a bad magic or an unknown kind.
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN || buf[..4] != MAGIC {
            return None;
        }
        buf.advance(4);
        let kind = PacketKind::from_u8(buf.get_u8())?;
        buf.advance(3);
        Some(Self {
            kind,
            sequence: buf.get_u32(),
            timestamp: buf.get_u32(),
            length: buf.get_u32(),
        })
    }
}

/// Stamps outgoing packets with sequence numbers and timestamps
#[derive(Debug, Default)]
pub struct PacketWriter {
    sequence: u32,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new sequence, e.g. after a reconnect
    pub fn reset(&mut self) {
        self.sequence = 0;
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn audio(&mut self, timestamp: u32, payload: &[u8]) -> Bytes {
        self.packet(PacketKind::Audio, timestamp, payload)
    }

    pub fn metadata(&mut self, timestamp: u32, title: &str) -> Bytes {
        self.packet(PacketKind::Metadata, timestamp, title.as_bytes())
    }

    /// Stream parameters: sample rate (u32), channels (u8), Opus frame size (u16)
    pub fn hello(&mut self, sample_rate: u32, channels: u8, frame_size: u16) -> Bytes {
        let mut payload = BytesMut::with_capacity(7);
        payload.put_u32(sample_rate);
        payload.put_u8(channels);
        payload.put_u16(frame_size);
        self.packet(PacketKind::Hello, 0, &payload)
    }

    fn packet(&mut self, kind: PacketKind, timestamp: u32, payload: &[u8]) -> Bytes {
        let header = PacketHeader {
            kind,
            sequence: self.sequence,
            timestamp,
            length: payload.len() as u32,
        };
        self.sequence = self.sequence.wrapping_add(1);

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        header.encode(&mut buf);
        buf.put_slice(payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_packet_layout() {
        let mut writer = PacketWriter::new();
        let packet = writer.audio(960, &[0xAA, 0xBB]);

        assert_eq!(packet.len(), HEADER_LEN + 2);
        assert_eq!(&packet[..4], b"CAST");
        assert_eq!(packet[4], PacketKind::Audio as u8);
        assert_eq!(&packet[HEADER_LEN..], &[0xAA, 0xBB]);

        let header = PacketHeader::decode(&packet).unwrap();
        assert_eq!(header.sequence, 0);
        assert_eq!(header.timestamp, 960);
        assert_eq!(header.length, 2);
    }

    #[test]
    fn test_sequence_advances_and_resets() {
        let mut writer = PacketWriter::new();
        writer.metadata(0, "a");
        let second = writer.audio(0, &[]);
        assert_eq!(PacketHeader::decode(&second).unwrap().sequence, 1);

        writer.reset();
        let packet = writer.hello(48000, 2, 960);
        let header = PacketHeader::decode(&packet).unwrap();
        assert_eq!(header.sequence, 0);
        assert_eq!(header.kind, PacketKind::Hello);
        assert_eq!(header.length, 7);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(PacketHeader::decode(&[0u8; 8]).is_none());
        assert!(PacketHeader::decode(&[0u8; HEADER_LEN]).is_none());

        let mut bad_kind = PacketWriter::new().audio(0, &[]).to_vec();
        bad_kind[4] = 0x7F;
        assert!(PacketHeader::decode(&bad_kind).is_none());
    }
}
