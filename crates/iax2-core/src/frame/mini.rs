//! Mini frames: unreliable media frames with a compact header
//!
//! Audio: `|0| source call number (15) | timestamp low 16 |`
//!
//! Video: `| 0x0000 |1| source call number (15) |M| timestamp low 15 |`

use std::net::SocketAddr;

use bytes::Bytes;

use super::remote::Remote;
use crate::error::FrameError;
use crate::wire::{WireReader, WireWriter};

/// Audio mini frame header length
pub const MINI_HEADER_LEN: usize = 4;

/// Video mini frame header length
pub const VIDEO_MINI_HEADER_LEN: usize = 6;

/// Media carried by a mini frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiniKind {
    Audio,
    /// `marker` flags the last packet of a video frame
    Video { marker: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiniFrame {
    pub remote: Remote,
    /// Low 16 bits (audio) or low 15 bits (video) of the call timestamp
    pub timestamp: u16,
    pub kind: MiniKind,
    pub data: Bytes,
}

impl MiniFrame {
    pub fn audio(remote: Remote, timestamp: u32, data: Bytes) -> Self {
        Self {
            remote,
            timestamp: timestamp as u16,
            kind: MiniKind::Audio,
            data,
        }
    }

    pub fn video(remote: Remote, timestamp: u32, marker: bool, data: Bytes) -> Self {
        Self {
            remote,
            timestamp: (timestamp & 0x7FFF) as u16,
            kind: MiniKind::Video { marker },
            data,
        }
    }

    pub fn header_len(&self) -> usize {
        match self.kind {
            MiniKind::Audio => MINI_HEADER_LEN,
            MiniKind::Video { .. } => VIDEO_MINI_HEADER_LEN,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(self.header_len() + self.data.len());
        match self.kind {
            MiniKind::Audio => {
                w.write_u16(self.remote.source_call_number & 0x7FFF);
                w.write_u16(self.timestamp);
            }
            MiniKind::Video { marker } => {
                w.write_u16(0);
                w.write_u16(0x8000 | self.remote.source_call_number);
                let marker = if marker { 0x8000 } else { 0 };
                w.write_u16(marker | (self.timestamp & 0x7FFF));
            }
        }
        w.write_slice(&self.data);
        w.freeze()
    }

    /// Decode a datagram whose first halfword has the full frame flag clear
    pub fn decode(data: &[u8], source: SocketAddr) -> Result<Self, FrameError> {
        if data.len() < MINI_HEADER_LEN {
            return Err(FrameError::TooShort {
                required: MINI_HEADER_LEN,
                available: data.len(),
            });
        }
        let mut r = WireReader::new(data);
        let first = r.read_u16()?;

        if first == 0 {
            if data.len() < VIDEO_MINI_HEADER_LEN {
                return Err(FrameError::TooShort {
                    required: VIDEO_MINI_HEADER_LEN,
                    available: data.len(),
                });
            }
            let callno = r.read_u16()? & 0x7FFF;
            let ts = r.read_u16()?;
            return Ok(Self {
                remote: Remote::new(source, callno, 0),
                timestamp: ts & 0x7FFF,
                kind: MiniKind::Video {
                    marker: ts & 0x8000 != 0,
                },
                data: r.read_rest(),
            });
        }

        let timestamp = r.read_u16()?;
        Ok(Self {
            remote: Remote::new(source, first, 0),
            timestamp,
            kind: MiniKind::Audio,
            data: r.read_rest(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4570".parse().unwrap()
    }

    #[test]
    fn test_audio_mini_frame() {
        let frame = MiniFrame::audio(Remote::new(addr(), 7, 9), 0x0001_2345, Bytes::from_static(b"xyz"));
        let bytes = frame.encode();
        assert_eq!(bytes.as_ref(), &[0, 7, 0x23, 0x45, b'x', b'y', b'z']);
        let decoded = MiniFrame::decode(&bytes, addr()).unwrap();
        assert_eq!(decoded.timestamp, 0x2345);
        assert_eq!(decoded.remote.source_call_number, 7);
        assert_eq!(decoded.kind, MiniKind::Audio);
        assert_eq!(decoded.data.as_ref(), b"xyz");
    }

    #[test]
    fn test_video_mini_frame() {
        let frame = MiniFrame::video(Remote::new(addr(), 300, 1), 0x1_8001, true, Bytes::from_static(b"v"));
        let bytes = frame.encode();
        assert_eq!(bytes.as_ref(), &[0, 0, 0x81, 0x2c, 0x80, 0x01, b'v']);
        let decoded = MiniFrame::decode(&bytes, addr()).unwrap();
        assert_eq!(decoded.kind, MiniKind::Video { marker: true });
        assert_eq!(decoded.timestamp, 1);
        assert_eq!(decoded.remote.source_call_number, 300);
    }

    #[test]
    fn test_short_mini_frames() {
        assert!(matches!(
            MiniFrame::decode(&[0, 1, 2], addr()),
            Err(FrameError::TooShort { required: 4, available: 3 })
        ));
        assert!(matches!(
            MiniFrame::decode(&[0, 0, 0x80, 1], addr()),
            Err(FrameError::TooShort { required: 6, available: 4 })
        ));
    }
}
