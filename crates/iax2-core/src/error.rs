use std::io;
use thiserror::Error;

/// Result type for IAX2 operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised by the byte cursor when a read or write runs past the buffer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes left to satisfy a read
    #[error("Buffer overrun: need {needed} bytes but only {available} remain")]
    Overrun {
        needed: usize,
        available: usize,
    },
}

/// Error raised while decoding or encoding an IAX2 frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Datagram shorter than the header it claims to carry
    #[error("Frame too short: need {required} bytes but have {available}")]
    TooShort {
        required: usize,
        available: usize,
    },

    /// Unknown frame type byte in a full frame header
    #[error("Invalid frame type: {0}")]
    InvalidFrameType(u8),

    /// Subclass value not valid for the frame type
    #[error("Invalid subclass {subclass} for frame type {frame_type}")]
    InvalidSubclass {
        frame_type: u8,
        subclass: i32,
    },

    /// Payload could not be interpreted (bad text encoding, missing DTMF digit, ...)
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Cursor error while reading the header
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// Information elements in a protocol frame could not be decoded
    #[error("Information element error: {0}")]
    Ie(#[from] IeError),
}

/// Error raised by the information element codec
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IeError {
    /// The element list ended in the middle of an element and nothing valid was read
    #[error("Truncated information element list")]
    Truncated,

    /// Payload length does not fit the element's fixed size
    #[error("Information element {type_code} has bad length {length}")]
    BadLength {
        type_code: u8,
        length: usize,
    },

    /// Payload content is not valid for the element type
    #[error("Information element {type_code} has invalid value: {reason}")]
    BadValue {
        type_code: u8,
        reason: String,
    },

    /// Value too large to be carried in a single element (max 255 bytes)
    #[error("Information element {type_code} payload of {length} bytes exceeds 255")]
    TooLong {
        type_code: u8,
        length: usize,
    },
}

impl From<WireError> for IeError {
    fn from(_: WireError) -> Self {
        IeError::Truncated
    }
}

/// Error raised by the payload encryption transform
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Encrypted region is not a whole number of AES blocks
    #[error("Encrypted payload of {0} bytes is not a multiple of 16")]
    NotBlockAligned(usize),

    /// Datagram too short to hold the cleartext header plus one block
    #[error("Encrypted frame too short: need {required} bytes but have {available}")]
    TooShort {
        required: usize,
        available: usize,
    },

    /// Decrypted padding length points past the end of the payload
    #[error("Invalid padding length {0}")]
    BadPadding(usize),

    /// Encryption was requested before a key was derived
    #[error("No encryption key has been derived")]
    NoKey,
}

/// Error type for IAX2 operations
#[derive(Debug, Error)]
pub enum Error {
    /// Frame decode/encode error
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Information element error
    #[error("Information element error: {0}")]
    Ie(#[from] IeError),

    /// Encryption error
    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    /// Socket level error
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal channel closed (worker gone)
    #[error("Internal channel closed")]
    ChannelClosed,

    /// No live call has the given id
    #[error("Call not found: {0}")]
    CallNotFound(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// All 32767 local call numbers are in use
    #[error("No free local call numbers")]
    CallNumbersExhausted,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
