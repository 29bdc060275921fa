//! Frame type tags, subclass enumerations and subclass compression

use std::fmt;

/// Full frame type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Dtmf = 1,
    Voice = 2,
    Video = 3,
    Control = 4,
    Null = 5,
    Protocol = 6,
    Text = 7,
    Image = 8,
    Html = 9,
    Cng = 10,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => FrameType::Dtmf,
            2 => FrameType::Voice,
            3 => FrameType::Video,
            4 => FrameType::Control,
            5 => FrameType::Null,
            6 => FrameType::Protocol,
            7 => FrameType::Text,
            8 => FrameType::Image,
            9 => FrameType::Html,
            10 => FrameType::Cng,
            _ => return None,
        })
    }
}

/// IAX2 protocol command carried in a `Protocol` full frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolSubclass {
    New = 1,
    Ping = 2,
    Pong = 3,
    Ack = 4,
    Hangup = 5,
    Reject = 6,
    Accept = 7,
    AuthReq = 8,
    AuthRep = 9,
    Inval = 10,
    LagRq = 11,
    LagRp = 12,
    RegReq = 13,
    RegAuth = 14,
    RegAck = 15,
    RegRej = 16,
    RegRel = 17,
    Vnak = 18,
    DpReq = 19,
    DpRep = 20,
    Dial = 21,
    TxReq = 22,
    TxCnt = 23,
    TxAcc = 24,
    TxReady = 25,
    TxRel = 26,
    TxRej = 27,
    Quelch = 28,
    Unquelch = 29,
    Poke = 30,
    Mwi = 32,
    Unsupport = 33,
    Transfer = 34,
    Provision = 35,
    FwDownl = 36,
    FwData = 37,
    TxMedia = 38,
    RtKey = 39,
    CallToken = 40,
}

impl ProtocolSubclass {
    pub fn from_i32(value: i32) -> Option<Self> {
        use ProtocolSubclass::*;
        Some(match value {
            1 => New,
            2 => Ping,
            3 => Pong,
            4 => Ack,
            5 => Hangup,
            6 => Reject,
            7 => Accept,
            8 => AuthReq,
            9 => AuthRep,
            10 => Inval,
            11 => LagRq,
            12 => LagRp,
            13 => RegReq,
            14 => RegAuth,
            15 => RegAck,
            16 => RegRej,
            17 => RegRel,
            18 => Vnak,
            19 => DpReq,
            20 => DpRep,
            21 => Dial,
            22 => TxReq,
            23 => TxCnt,
            24 => TxAcc,
            25 => TxReady,
            26 => TxRel,
            27 => TxRej,
            28 => Quelch,
            29 => Unquelch,
            30 => Poke,
            32 => Mwi,
            33 => Unsupport,
            34 => Transfer,
            35 => Provision,
            36 => FwDownl,
            37 => FwData,
            38 => TxMedia,
            39 => RtKey,
            40 => CallToken,
            _ => return None,
        })
    }

    /// Commands this stack recognises but does not act on beyond acknowledging
    pub fn is_inert(self) -> bool {
        use ProtocolSubclass::*;
        matches!(
            self,
            RegReq
                | RegAuth
                | RegAck
                | RegRej
                | RegRel
                | DpReq
                | DpRep
                | Dial
                | TxReq
                | TxCnt
                | TxAcc
                | TxReady
                | TxRel
                | TxRej
                | Mwi
                | Unsupport
                | Transfer
                | Provision
                | FwDownl
                | FwData
                | TxMedia
                | RtKey
        )
    }
}

impl fmt::Display for ProtocolSubclass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Session control subclass carried in a `Control` full frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlSubclass {
    Hangup = 1,
    Ring = 2,
    Ringing = 3,
    Answer = 4,
    Busy = 5,
    TakeOffHook = 6,
    OffHook = 7,
    Congestion = 8,
    FlashHook = 9,
    Wink = 10,
    Option = 11,
    KeyRadio = 12,
    UnkeyRadio = 13,
    Progress = 14,
    Proceeding = 15,
    Hold = 16,
    Unhold = 17,
}

impl ControlSubclass {
    pub fn from_i32(value: i32) -> Option<Self> {
        use ControlSubclass::*;
        Some(match value {
            1 => Hangup,
            2 => Ring,
            3 => Ringing,
            4 => Answer,
            5 => Busy,
            6 => TakeOffHook,
            7 => OffHook,
            8 => Congestion,
            9 => FlashHook,
            10 => Wink,
            11 => Option,
            12 => KeyRadio,
            13 => UnkeyRadio,
            14 => Progress,
            15 => Proceeding,
            16 => Hold,
            17 => Unhold,
            _ => return None,
        })
    }
}

/// Sentinel subclass meaning "no subclass"
pub const SUBCLASS_NONE: i32 = -1;

/// Compress a subclass value into its one-byte wire form.
///
/// Values below 0x80 are sent literally, -1 becomes 0xFF and larger values are
/// sent as `0x80 | n` where `n` is the index of their lowest set bit.
pub fn compress_subclass(value: i32) -> u8 {
    if value == SUBCLASS_NONE {
        return 0xFF;
    }
    if (0..0x80).contains(&value) {
        return value as u8;
    }
    for bit in 0..31 {
        if value & (1 << bit) != 0 {
            return 0x80 | bit as u8;
        }
    }
    // only reachable for negative values other than -1
    0xFF
}

/// Inverse of [`compress_subclass`]
pub fn decompress_subclass(byte: u8) -> i32 {
    if byte == 0xFF {
        SUBCLASS_NONE
    } else if byte & 0x80 != 0 {
        1 << (byte & 0x1F)
    } else {
        byte as i32
    }
}
