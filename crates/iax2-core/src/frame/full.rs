//! Full frames: reliable frames with the 12-byte header
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|     Source Call Number      |R|   Destination Call Number   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    OSeqno     |    ISeqno     |  Frame Type   |C|  Subclass   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::net::SocketAddr;

use bytes::Bytes;

use super::remote::Remote;
use super::types::{
    compress_subclass, decompress_subclass, ControlSubclass, FrameType, ProtocolSubclass,
};
use crate::codec::Codec;
use crate::error::FrameError;
use crate::ie::IeList;
use crate::wire::{WireReader, WireWriter};

/// Size of the full frame header
pub const FULL_HEADER_LEN: usize = 12;

/// Flag in the first halfword marking a full frame
pub const FULL_FRAME_FLAG: u16 = 0x8000;

/// Flag in the second halfword marking a retransmission
pub const RETRANSMIT_FLAG: u16 = 0x8000;

/// Byte offset of the halfword holding the retransmit flag
pub const RETRANSMIT_FLAG_OFFSET: usize = 2;

/// Typed payload of a full frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FullFrameBody {
    Dtmf(char),
    Voice { codec: Codec, data: Bytes },
    Video { codec: Codec, data: Bytes },
    Control { subclass: ControlSubclass, data: Bytes },
    Null,
    Protocol { subclass: ProtocolSubclass, ies: IeList },
    Text(String),
    Image { format: i32, data: Bytes },
    Html { subclass: i32, data: Bytes },
    /// Comfort noise; subclass is the noise level
    Cng { level: i32, data: Bytes },
}

impl FullFrameBody {
    /// Protocol frame without elements
    pub fn protocol(subclass: ProtocolSubclass) -> Self {
        FullFrameBody::Protocol {
            subclass,
            ies: IeList::new(),
        }
    }

    pub fn control(subclass: ControlSubclass) -> Self {
        FullFrameBody::Control {
            subclass,
            data: Bytes::new(),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            FullFrameBody::Dtmf(_) => FrameType::Dtmf,
            FullFrameBody::Voice { .. } => FrameType::Voice,
            FullFrameBody::Video { .. } => FrameType::Video,
            FullFrameBody::Control { .. } => FrameType::Control,
            FullFrameBody::Null => FrameType::Null,
            FullFrameBody::Protocol { .. } => FrameType::Protocol,
            FullFrameBody::Text(_) => FrameType::Text,
            FullFrameBody::Image { .. } => FrameType::Image,
            FullFrameBody::Html { .. } => FrameType::Html,
            FullFrameBody::Cng { .. } => FrameType::Cng,
        }
    }

    /// Logical subclass before compression
    pub fn subclass(&self) -> i32 {
        match self {
            FullFrameBody::Dtmf(digit) => *digit as i32,
            FullFrameBody::Voice { codec, .. } | FullFrameBody::Video { codec, .. } => {
                codec.bit() as i32
            }
            FullFrameBody::Control { subclass, .. } => *subclass as i32,
            FullFrameBody::Null => 0,
            FullFrameBody::Protocol { subclass, .. } => *subclass as i32,
            FullFrameBody::Text(_) => 0,
            FullFrameBody::Image { format, .. } => *format,
            FullFrameBody::Html { subclass, .. } => *subclass,
            FullFrameBody::Cng { level, .. } => *level,
        }
    }

    /// Protocol subclass, if this is a protocol frame
    pub fn protocol_subclass(&self) -> Option<ProtocolSubclass> {
        match self {
            FullFrameBody::Protocol { subclass, .. } => Some(*subclass),
            _ => None,
        }
    }

    fn encode_payload(&self, w: &mut WireWriter) {
        match self {
            FullFrameBody::Dtmf(_) | FullFrameBody::Null => {}
            FullFrameBody::Voice { data, .. }
            | FullFrameBody::Video { data, .. }
            | FullFrameBody::Control { data, .. }
            | FullFrameBody::Image { data, .. }
            | FullFrameBody::Html { data, .. }
            | FullFrameBody::Cng { data, .. } => w.write_slice(data),
            FullFrameBody::Protocol { ies, .. } => w.write_slice(&ies.encode_all()),
            FullFrameBody::Text(text) => {
                w.write_slice(text.as_bytes());
                w.write_u8(0);
            }
        }
    }

    fn decode(frame_type: FrameType, subclass: i32, payload: &[u8]) -> Result<Self, FrameError> {
        let invalid = || FrameError::InvalidSubclass {
            frame_type: frame_type as u8,
            subclass,
        };
        let data = || Bytes::copy_from_slice(payload);

        Ok(match frame_type {
            FrameType::Dtmf => {
                let digit = u8::try_from(subclass)
                    .ok()
                    .map(char::from)
                    .filter(is_dtmf_digit)
                    .ok_or_else(invalid)?;
                FullFrameBody::Dtmf(digit)
            }
            FrameType::Voice => {
                let codec = codec_for(subclass).filter(|c| c.is_audio()).ok_or_else(invalid)?;
                FullFrameBody::Voice { codec, data: data() }
            }
            FrameType::Video => {
                let codec = codec_for(subclass).filter(|c| c.is_video()).ok_or_else(invalid)?;
                FullFrameBody::Video { codec, data: data() }
            }
            FrameType::Control => FullFrameBody::Control {
                subclass: ControlSubclass::from_i32(subclass).ok_or_else(invalid)?,
                data: data(),
            },
            FrameType::Null => FullFrameBody::Null,
            FrameType::Protocol => FullFrameBody::Protocol {
                subclass: ProtocolSubclass::from_i32(subclass).ok_or_else(invalid)?,
                ies: IeList::decode_all(payload)?,
            },
            FrameType::Text => {
                let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
                let text = std::str::from_utf8(&payload[..end])
                    .map_err(|e| FrameError::InvalidPayload(format!("text frame: {}", e)))?;
                FullFrameBody::Text(text.to_string())
            }
            FrameType::Image => FullFrameBody::Image {
                format: subclass,
                data: data(),
            },
            FrameType::Html => FullFrameBody::Html { subclass, data: data() },
            FrameType::Cng => FullFrameBody::Cng {
                level: subclass,
                data: data(),
            },
        })
    }
}

fn codec_for(subclass: i32) -> Option<Codec> {
    u32::try_from(subclass).ok().and_then(Codec::from_bit)
}

/// Digits a DTMF frame may carry
pub fn is_dtmf_digit(c: &char) -> bool {
    matches!(c, '0'..='9' | '*' | '#' | 'A'..='D')
}

/// A decoded or to-be-sent full frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullFrame {
    pub remote: Remote,
    pub timestamp: u32,
    pub out_seq_no: u8,
    pub in_seq_no: u8,
    pub retransmitted: bool,
    pub body: FullFrameBody,
}

impl FullFrame {
    /// New outgoing frame; sequence numbers are filled in when it is sent
    pub fn new(remote: Remote, timestamp: u32, body: FullFrameBody) -> Self {
        Self {
            remote,
            timestamp,
            out_seq_no: 0,
            in_seq_no: 0,
            retransmitted: false,
            body,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.body.frame_type()
    }

    pub fn protocol_subclass(&self) -> Option<ProtocolSubclass> {
        self.body.protocol_subclass()
    }

    pub fn is_protocol(&self, subclass: ProtocolSubclass) -> bool {
        self.protocol_subclass() == Some(subclass)
    }

    /// Whether sending this frame advances the call's outgoing sequence number.
    ///
    /// Only protocol `Ack` and `Vnak` are exempt.
    pub fn increments_in_seq_no(&self) -> bool {
        !matches!(
            self.protocol_subclass(),
            Some(ProtocolSubclass::Ack) | Some(ProtocolSubclass::Vnak)
        )
    }

    /// Frames the peer must acknowledge
    pub fn expects_ack(&self) -> bool {
        !matches!(
            self.protocol_subclass(),
            Some(ProtocolSubclass::Ack)
                | Some(ProtocolSubclass::Inval)
                | Some(ProtocolSubclass::Vnak)
                | Some(ProtocolSubclass::Pong)
                | Some(ProtocolSubclass::LagRp)
        )
    }

    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(FULL_HEADER_LEN + 64);
        w.write_u16(FULL_FRAME_FLAG | self.remote.source_call_number);
        let retransmit = if self.retransmitted { RETRANSMIT_FLAG } else { 0 };
        w.write_u16(retransmit | self.remote.dest_call_number);
        w.write_u32(self.timestamp);
        w.write_u8(self.out_seq_no);
        w.write_u8(self.in_seq_no);
        w.write_u8(self.frame_type() as u8);
        w.write_u8(compress_subclass(self.body.subclass()));
        self.body.encode_payload(&mut w);
        w.freeze()
    }

    /// Decode a datagram already known to carry the full frame flag
    pub fn decode(data: &[u8], source: SocketAddr) -> Result<Self, FrameError> {
        if data.len() < FULL_HEADER_LEN {
            return Err(FrameError::TooShort {
                required: FULL_HEADER_LEN,
                available: data.len(),
            });
        }
        let mut r = WireReader::new(data);
        let src = r.read_u16()?;
        let dst = r.read_u16()?;
        let timestamp = r.read_u32()?;
        let out_seq_no = r.read_u8()?;
        let in_seq_no = r.read_u8()?;
        let type_byte = r.read_u8()?;
        let subclass = decompress_subclass(r.read_u8()?);

        let frame_type =
            FrameType::from_u8(type_byte).ok_or(FrameError::InvalidFrameType(type_byte))?;
        let body = FullFrameBody::decode(frame_type, subclass, r.peek(r.remaining())?)?;

        Ok(Self {
            remote: Remote::new(source, src, dst),
            timestamp,
            out_seq_no,
            in_seq_no,
            retransmitted: dst & RETRANSMIT_FLAG != 0,
            body,
        })
    }
}
