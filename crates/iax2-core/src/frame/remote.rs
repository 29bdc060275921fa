use std::fmt;
use std::net::SocketAddr;

/// Prefix of every connection token
pub const TOKEN_PREFIX: &str = "iax2:";

/// Largest call number that fits the 15-bit header field
pub const MAX_CALL_NUMBER: u16 = 0x7FFF;

/// One direction of a call's UDP association.
///
/// On a received frame `source_call_number` is the peer's call number and
/// `dest_call_number` ours. On a frame we send it is the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Remote {
    pub address: SocketAddr,
    pub source_call_number: u16,
    pub dest_call_number: u16,
}

impl Remote {
    pub fn new(address: SocketAddr, source_call_number: u16, dest_call_number: u16) -> Self {
        Self {
            address,
            source_call_number: source_call_number & MAX_CALL_NUMBER,
            dest_call_number: dest_call_number & MAX_CALL_NUMBER,
        }
    }

    /// Routing key of the call this frame came from: `iax2:<ip>-<source call number>`
    pub fn connection_token(&self) -> String {
        connection_token(&self.address, self.source_call_number)
    }

    /// The same association seen from the other end
    pub fn reversed(&self) -> Self {
        Self {
            address: self.address,
            source_call_number: self.dest_call_number,
            dest_call_number: self.source_call_number,
        }
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} src={} dst={}",
            self.address, self.source_call_number, self.dest_call_number
        )
    }
}

/// Build the routing key for a peer address and the peer's call number
pub fn connection_token(address: &SocketAddr, source_call_number: u16) -> String {
    format!("{}{}-{}", TOKEN_PREFIX, address.ip(), source_call_number)
}
