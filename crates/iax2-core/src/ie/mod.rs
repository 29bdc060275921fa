//! Information elements carried in protocol frames
//!
//! An element is a `(type, length, payload)` triple. Every type code has a
//! fixed payload shape ([`IeKind`]); decoding a payload that does not fit its
//! shape, or an unknown type code, yields an [`IeValue::Invalid`] element which
//! [`IeList::get`] and [`IeData`] never hand to call logic.

mod call_token;
mod data;
mod datetime;

pub use call_token::{TokenSigner, CALL_TOKEN_MAX_AGE_SECS, TOKEN_SECRET_LEN};
pub use data::IeData;
pub use datetime::{pack_datetime, unpack_datetime};

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;
use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::IeError;
use crate::wire::{WireReader, WireWriter};

/// `AuthMethods` bit: plaintext password
pub const AUTH_PLAINTEXT: u16 = 0x0001;
/// `AuthMethods` bit: MD5 challenge/response
pub const AUTH_MD5: u16 = 0x0002;
/// `AuthMethods` bit: RSA signature
pub const AUTH_RSA: u16 = 0x0004;

/// `Encryption` bit: AES-128
pub const ENCRYPT_AES128: u16 = 0x0001;

/// Protocol version carried in the `Version` element
pub const IAX_PROTOCOL_VERSION: u16 = 2;

/// Maximum payload of a single element
pub const MAX_IE_PAYLOAD: usize = 255;

/// Payload shape of an element type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IeKind {
    String,
    U8,
    U16,
    U32,
    Empty,
    Binary,
    SockAddr,
    DateTime,
}

macro_rules! ie_types {
    ($($name:ident = $code:literal => $kind:ident,)*) => {
        /// Information element type code
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum IeType {
            $($name = $code,)*
        }

        impl IeType {
            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(IeType::$name),)*
                    _ => None,
                }
            }

            pub fn kind(self) -> IeKind {
                match self {
                    $(IeType::$name => IeKind::$kind,)*
                }
            }

            /// Human readable text, kept (lossily) even when it is not valid UTF-8
            pub fn is_display_text(self) -> bool {
                matches!(
                    self,
                    IeType::CallingName | IeType::Cause | IeType::DeviceType | IeType::Language
                )
            }
        }
    };
}

ie_types! {
    CalledNumber = 1 => String,
    CallingNumber = 2 => String,
    CallingAni = 3 => String,
    CallingName = 4 => String,
    CalledContext = 5 => String,
    Username = 6 => String,
    Password = 7 => String,
    Capability = 8 => U32,
    Format = 9 => U32,
    Language = 10 => String,
    Version = 11 => U16,
    AdsiCpe = 12 => U16,
    Dnid = 13 => String,
    AuthMethods = 14 => U16,
    Challenge = 15 => String,
    Md5Result = 16 => String,
    RsaResult = 17 => String,
    ApparentAddr = 18 => SockAddr,
    Refresh = 19 => U16,
    DpStatus = 20 => U16,
    CallNo = 21 => U16,
    Cause = 22 => String,
    IaxUnknown = 23 => U8,
    MsgCount = 24 => U16,
    AutoAnswer = 25 => Empty,
    MusicOnHold = 26 => Empty,
    TransferId = 27 => U32,
    Rdnis = 28 => String,
    Provisioning = 29 => Binary,
    AesProvisioning = 30 => Empty,
    DateTime = 31 => DateTime,
    DeviceType = 32 => String,
    ServiceIdent = 33 => Binary,
    FirmwareVer = 34 => U16,
    FwBlockDesc = 35 => U32,
    FwBlockData = 36 => Binary,
    ProvVer = 37 => U32,
    CallingPres = 38 => U8,
    CallingTon = 39 => U8,
    CallingTns = 40 => U16,
    SamplingRate = 41 => U16,
    CauseCode = 42 => U8,
    Encryption = 43 => U16,
    EncKey = 44 => Binary,
    CodecPrefs = 45 => String,
    RrJitter = 46 => U32,
    RrLoss = 47 => U32,
    RrPkts = 48 => U32,
    RrDelay = 49 => U16,
    RrDropped = 50 => U32,
    RrOoo = 51 => U32,
    Variable = 52 => String,
    OspToken = 53 => Binary,
    CallToken = 54 => Binary,
}

/// Decoded element payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IeValue {
    String(String),
    U8(u8),
    U16(u16),
    U32(u32),
    Empty,
    Binary(Bytes),
    SockAddr(SocketAddrV4),
    DateTime(NaiveDateTime),
    /// Payload that did not decode; never forwarded to call logic
    Invalid(Bytes),
}

impl IeValue {
    fn kind(&self) -> Option<IeKind> {
        Some(match self {
            IeValue::String(_) => IeKind::String,
            IeValue::U8(_) => IeKind::U8,
            IeValue::U16(_) => IeKind::U16,
            IeValue::U32(_) => IeKind::U32,
            IeValue::Empty => IeKind::Empty,
            IeValue::Binary(_) => IeKind::Binary,
            IeValue::SockAddr(_) => IeKind::SockAddr,
            IeValue::DateTime(_) => IeKind::DateTime,
            IeValue::Invalid(_) => return None,
        })
    }

    /// Payload length on the wire
    pub fn wire_len(&self) -> usize {
        match self {
            IeValue::String(s) => s.len(),
            IeValue::U8(_) => 1,
            IeValue::U16(_) => 2,
            IeValue::U32(_) | IeValue::DateTime(_) => 4,
            IeValue::Empty => 0,
            IeValue::Binary(b) | IeValue::Invalid(b) => b.len(),
            IeValue::SockAddr(_) => 16,
        }
    }
}

/// A single information element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ie {
    type_code: u8,
    value: IeValue,
}

impl Ie {
    /// Build an element, checking the value has the shape its type requires
    pub fn new(ie_type: IeType, value: IeValue) -> Result<Self, IeError> {
        let type_code = ie_type as u8;
        if value.kind() != Some(ie_type.kind()) {
            return Err(IeError::BadValue {
                type_code,
                reason: format!("expected {:?} payload", ie_type.kind()),
            });
        }
        let length = value.wire_len();
        if length > MAX_IE_PAYLOAD {
            return Err(IeError::TooLong { type_code, length });
        }
        Ok(Self { type_code, value })
    }

    pub fn string(ie_type: IeType, value: impl Into<String>) -> Result<Self, IeError> {
        Self::new(ie_type, IeValue::String(value.into()))
    }

    pub fn u8(ie_type: IeType, value: u8) -> Result<Self, IeError> {
        Self::new(ie_type, IeValue::U8(value))
    }

    pub fn u16(ie_type: IeType, value: u16) -> Result<Self, IeError> {
        Self::new(ie_type, IeValue::U16(value))
    }

    pub fn u32(ie_type: IeType, value: u32) -> Result<Self, IeError> {
        Self::new(ie_type, IeValue::U32(value))
    }

    pub fn empty(ie_type: IeType) -> Result<Self, IeError> {
        Self::new(ie_type, IeValue::Empty)
    }

    pub fn binary(ie_type: IeType, value: impl Into<Bytes>) -> Result<Self, IeError> {
        Self::new(ie_type, IeValue::Binary(value.into()))
    }

    /// Type of the element, `None` for an unknown type code
    pub fn ie_type(&self) -> Option<IeType> {
        IeType::from_code(self.type_code)
    }

    pub fn type_code(&self) -> u8 {
        self.type_code
    }

    pub fn value(&self) -> &IeValue {
        &self.value
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.value, IeValue::Invalid(_)) && self.ie_type().is_some()
    }

    /// Size of the element on the wire, header included
    pub fn binary_size(&self) -> usize {
        self.value.wire_len() + 2
    }

    /// Decode one element payload according to its type code
    pub fn decode(type_code: u8, payload: &[u8]) -> Self {
        let value = match IeType::from_code(type_code) {
            Some(ie_type) => decode_value(ie_type.kind(), payload)
                .or_else(|| lossy_text(ie_type, payload))
                .unwrap_or_else(|| IeValue::Invalid(Bytes::copy_from_slice(payload))),
            None => IeValue::Invalid(Bytes::copy_from_slice(payload)),
        };
        Self { type_code, value }
    }

    fn encode(&self, w: &mut WireWriter) {
        w.write_u8(self.type_code);
        w.write_u8(self.value.wire_len() as u8);
        match &self.value {
            IeValue::String(s) => w.write_slice(s.as_bytes()),
            IeValue::U8(v) => w.write_u8(*v),
            IeValue::U16(v) => w.write_u16(*v),
            IeValue::U32(v) => w.write_u32(*v),
            IeValue::Empty => {}
            IeValue::Binary(b) | IeValue::Invalid(b) => w.write_slice(b),
            IeValue::SockAddr(addr) => {
                // sockaddr_in image: family in host (little-endian) order, rest network order
                w.write_slice(&2u16.to_le_bytes());
                w.write_u16(addr.port());
                w.write_slice(&addr.ip().octets());
                w.write_slice(&[0u8; 8]);
            }
            IeValue::DateTime(dt) => w.write_u32(pack_datetime(dt)),
        }
    }
}

/// Latin-1 names and causes from older peers; the result must still fit one element
fn lossy_text(ie_type: IeType, payload: &[u8]) -> Option<IeValue> {
    if !ie_type.is_display_text() {
        return None;
    }
    let text = String::from_utf8_lossy(payload).into_owned();
    (text.len() <= MAX_IE_PAYLOAD).then_some(IeValue::String(text))
}

fn decode_value(kind: IeKind, payload: &[u8]) -> Option<IeValue> {
    let mut r = WireReader::new(payload);
    let value = match kind {
        IeKind::String => IeValue::String(String::from_utf8(payload.to_vec()).ok()?),
        IeKind::U8 if payload.len() == 1 => IeValue::U8(r.read_u8().ok()?),
        IeKind::U16 if payload.len() == 2 => IeValue::U16(r.read_u16().ok()?),
        IeKind::U32 if payload.len() == 4 => IeValue::U32(r.read_u32().ok()?),
        IeKind::Empty if payload.is_empty() => IeValue::Empty,
        IeKind::Binary => IeValue::Binary(Bytes::copy_from_slice(payload)),
        IeKind::SockAddr if payload.len() == 16 => {
            r.read_slice(2).ok()?;
            let port = r.read_u16().ok()?;
            let ip = r.read_u32().ok()?;
            IeValue::SockAddr(SocketAddrV4::new(Ipv4Addr::from(ip), port))
        }
        IeKind::DateTime if payload.len() == 4 => IeValue::DateTime(unpack_datetime(r.read_u32().ok()?)?),
        _ => return None,
    };
    Some(value)
}

/// Ordered list of elements; insertion order is wire order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IeList {
    items: Vec<Ie>,
}

impl IeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ie: Ie) {
        self.items.push(ie);
    }

    /// Builder-style push
    pub fn with(mut self, ie: Ie) -> Self {
        self.items.push(ie);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ie> {
        self.items.iter()
    }

    /// First valid element of the given type
    pub fn get(&self, ie_type: IeType) -> Option<&IeValue> {
        self.items
            .iter()
            .find(|ie| ie.is_valid() && ie.type_code == ie_type as u8)
            .map(|ie| &ie.value)
    }

    pub fn contains(&self, ie_type: IeType) -> bool {
        self.get(ie_type).is_some()
    }

    /// Total encoded size
    pub fn binary_size(&self) -> usize {
        self.items.iter().filter(|ie| ie.is_valid()).map(Ie::binary_size).sum()
    }

    /// Decode every element in `data`.
    ///
    /// An element whose declared length runs past the end of the buffer ends
    /// the list. That is only an error when nothing could be read before it.
    pub fn decode_all(data: &[u8]) -> Result<Self, IeError> {
        let mut r = WireReader::new(data);
        let mut list = IeList::new();

        while r.remaining() >= 2 {
            let type_code = r.read_u8()?;
            let length = r.read_u8()? as usize;
            let payload = match r.read_slice(length) {
                Ok(p) => p,
                Err(_) => {
                    debug!(
                        type_code,
                        length,
                        remaining = r.remaining(),
                        "information element runs past end of frame"
                    );
                    if list.is_empty() {
                        return Err(IeError::Truncated);
                    }
                    break;
                }
            };

            let ie = Ie::decode(type_code, payload);
            if !ie.is_valid() {
                debug!(type_code, length, "ignoring invalid information element");
            }
            list.push(ie);
        }

        Ok(list)
    }

    /// Encode the valid elements in order
    pub fn encode_all(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(self.binary_size());
        for ie in self.items.iter().filter(|ie| ie.is_valid()) {
            ie.encode(&mut w);
        }
        w.freeze()
    }
}

impl From<Vec<Ie>> for IeList {
    fn from(items: Vec<Ie>) -> Self {
        Self { items }
    }
}

impl IntoIterator for IeList {
    type Item = Ie;
    type IntoIter = std::vec::IntoIter<Ie>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
