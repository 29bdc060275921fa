//! IAX2 frame model
//!
//! Every datagram is either a [`FullFrame`] (reliable, 12-byte header, carries
//! signalling and the occasional media frame) or a [`MiniFrame`] (unreliable,
//! 4 or 6-byte header, bulk media). The top bit of the first halfword tells
//! them apart; a zero first halfword marks a video mini frame.

pub mod full;
pub mod mini;
pub mod remote;
pub mod types;

pub use full::{FullFrame, FullFrameBody, FULL_HEADER_LEN, RETRANSMIT_FLAG_OFFSET};
pub use mini::{MiniFrame, MiniKind, MINI_HEADER_LEN, VIDEO_MINI_HEADER_LEN};
pub use remote::{connection_token, Remote, MAX_CALL_NUMBER};
pub use types::{
    compress_subclass, decompress_subclass, ControlSubclass, FrameType, ProtocolSubclass,
};

use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::FrameError;

/// Header format of a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Full,
    Mini,
    VideoMini,
}

impl FrameKind {
    /// Bytes at the start of the datagram that are never encrypted
    pub fn cleartext_len(self) -> usize {
        match self {
            FrameKind::Full => 4,
            FrameKind::Mini => 2,
            FrameKind::VideoMini => 4,
        }
    }
}

/// Media carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Routing information available without decrypting the datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub kind: FrameKind,
    /// Call numbers as seen in the header; `dest_call_number` is 0 for mini frames
    pub remote: Remote,
}

impl Route {
    pub fn connection_token(&self) -> String {
        self.remote.connection_token()
    }
}

/// A decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Full(FullFrame),
    Mini(MiniFrame),
}

impl Frame {
    /// Classify and decode a datagram received from `source`
    pub fn decode(data: &[u8], source: SocketAddr) -> Result<Self, FrameError> {
        let route = Self::peek_route(data, source)?;
        match route.kind {
            FrameKind::Full => FullFrame::decode(data, source).map(Frame::Full),
            FrameKind::Mini | FrameKind::VideoMini => MiniFrame::decode(data, source).map(Frame::Mini),
        }
    }

    /// Read only the cleartext prefix of a datagram
    pub fn peek_route(data: &[u8], source: SocketAddr) -> Result<Route, FrameError> {
        if data.len() < MINI_HEADER_LEN {
            return Err(FrameError::TooShort {
                required: MINI_HEADER_LEN,
                available: data.len(),
            });
        }
        let first = u16::from_be_bytes([data[0], data[1]]);
        let second = u16::from_be_bytes([data[2], data[3]]);

        let (kind, src, dst) = if first & full::FULL_FRAME_FLAG != 0 {
            if data.len() < FULL_HEADER_LEN {
                return Err(FrameError::TooShort {
                    required: FULL_HEADER_LEN,
                    available: data.len(),
                });
            }
            (FrameKind::Full, first, second)
        } else if first == 0 {
            if data.len() < VIDEO_MINI_HEADER_LEN {
                return Err(FrameError::TooShort {
                    required: VIDEO_MINI_HEADER_LEN,
                    available: data.len(),
                });
            }
            (FrameKind::VideoMini, second, 0)
        } else {
            (FrameKind::Mini, first, 0)
        };

        Ok(Route {
            kind,
            remote: Remote::new(source, src, dst),
        })
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Full(f) => f.encode(),
            Frame::Mini(m) => m.encode(),
        }
    }

    pub fn remote(&self) -> &Remote {
        match self {
            Frame::Full(f) => &f.remote,
            Frame::Mini(m) => &m.remote,
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Full(_) => FrameKind::Full,
            Frame::Mini(MiniFrame {
                kind: MiniKind::Audio,
                ..
            }) => FrameKind::Mini,
            Frame::Mini(_) => FrameKind::VideoMini,
        }
    }

    /// Timestamp as carried on the wire (truncated for mini frames)
    pub fn timestamp(&self) -> u32 {
        match self {
            Frame::Full(f) => f.timestamp,
            Frame::Mini(m) => m.timestamp as u32,
        }
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            Frame::Full(f) => match f.frame_type() {
                FrameType::Voice => Some(MediaKind::Audio),
                FrameType::Video => Some(MediaKind::Video),
                _ => None,
            },
            Frame::Mini(m) => match m.kind {
                MiniKind::Audio => Some(MediaKind::Audio),
                MiniKind::Video { .. } => Some(MediaKind::Video),
            },
        }
    }

    /// Routing key of the call this frame belongs to
    pub fn connection_token(&self) -> String {
        self.remote().connection_token()
    }
}

impl From<FullFrame> for Frame {
    fn from(f: FullFrame) -> Self {
        Frame::Full(f)
    }
}

impl From<MiniFrame> for Frame {
    fn from(m: MiniFrame) -> Self {
        Frame::Mini(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;

    fn addr() -> SocketAddr {
        "10.0.0.5:4569".parse().unwrap()
    }

    #[test]
    fn test_classification() {
        let full = FullFrame::new(
            Remote::new(addr(), 12, 34),
            100,
            FullFrameBody::Voice {
                codec: Codec::Gsm,
                data: Bytes::from_static(&[1; 33]),
            },
        );
        let decoded = Frame::decode(&full.encode(), addr()).unwrap();
        assert_eq!(decoded.kind(), FrameKind::Full);
        assert_eq!(decoded.media_kind(), Some(MediaKind::Audio));
        assert_eq!(decoded.connection_token(), "iax2:10.0.0.5-12");

        let mini = MiniFrame::audio(Remote::new(addr(), 12, 34), 100, Bytes::from_static(b"a"));
        let decoded = Frame::decode(&mini.encode(), addr()).unwrap();
        assert_eq!(decoded.kind(), FrameKind::Mini);
        assert_eq!(decoded.media_kind(), Some(MediaKind::Audio));

        let video = MiniFrame::video(Remote::new(addr(), 12, 34), 100, false, Bytes::new());
        let decoded = Frame::decode(&video.encode(), addr()).unwrap();
        assert_eq!(decoded.kind(), FrameKind::VideoMini);
        assert_eq!(decoded.media_kind(), Some(MediaKind::Video));

        let ping = FullFrame::new(
            Remote::new(addr(), 12, 34),
            100,
            FullFrameBody::protocol(ProtocolSubclass::Ping),
        );
        assert_eq!(Frame::from(ping).media_kind(), None);
    }

    #[test]
    fn test_undersized_datagrams_are_rejected() {
        assert!(Frame::decode(&[0x80, 1, 0], addr()).is_err());
        assert!(matches!(
            Frame::decode(&[0x80, 1, 0, 0, 0, 0, 0, 0], addr()),
            Err(FrameError::TooShort { required: 12, available: 8 })
        ));
    }

    #[test]
    fn test_peek_route_ignores_payload() {
        // full frame header followed by what would be ciphertext
        let mut data = vec![0x80, 0x05, 0x00, 0x07];
        data.extend_from_slice(&[0xEE; 28]);
        let route = Frame::peek_route(&data, addr()).unwrap();
        assert_eq!(route.kind, FrameKind::Full);
        assert_eq!(route.remote.source_call_number, 5);
        assert_eq!(route.remote.dest_call_number, 7);
        assert_eq!(route.connection_token(), "iax2:10.0.0.5-5");
    }
}
