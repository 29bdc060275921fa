//! Events reported to the application

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;

use crate::call::CallPhase;
use crate::codec::Codec;

/// Identifies a call within one endpoint; it is the local call number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u16);

impl CallId {
    pub fn call_number(self) -> u16 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Event emitted by an [`Iax2Endpoint`](crate::Iax2Endpoint)
#[derive(Debug, Clone, PartialEq)]
pub enum Iax2Event {
    /// A peer called us and the call was accepted; it rings until answered
    IncomingCall {
        call_id: CallId,
        connection_token: String,
        remote: SocketAddr,
        calling_number: Option<String>,
        calling_name: Option<String>,
        called_number: Option<String>,
        codec: Codec,
    },
    /// Our `New` was accepted
    CallSetUp { call_id: CallId, codec: Codec },
    /// The far end is ringing
    CallAlerting { call_id: CallId },
    /// The call was answered
    CallConnected { call_id: CallId },
    /// Media can flow in both directions
    CallEstablished { call_id: CallId },
    AudioReceived {
        call_id: CallId,
        codec: Codec,
        timestamp: u32,
        data: Bytes,
    },
    VideoReceived {
        call_id: CallId,
        timestamp: u32,
        data: Bytes,
    },
    DtmfReceived { call_id: CallId, digit: char },
    TextReceived { call_id: CallId, text: String },
    CallHeld { call_id: CallId },
    CallResumed { call_id: CallId },
    /// Result of a Ping/Pong or LagRq/LagRp exchange
    Status {
        call_id: CallId,
        round_trip: Option<Duration>,
        lag: Option<Duration>,
    },
    PhaseChanged { call_id: CallId, phase: CallPhase },
    /// The call is gone
    CallCleared { call_id: CallId, reason: String },
}

impl Iax2Event {
    pub fn call_id(&self) -> CallId {
        match self {
            Iax2Event::IncomingCall { call_id, .. }
            | Iax2Event::CallSetUp { call_id, .. }
            | Iax2Event::CallAlerting { call_id }
            | Iax2Event::CallConnected { call_id }
            | Iax2Event::CallEstablished { call_id }
            | Iax2Event::AudioReceived { call_id, .. }
            | Iax2Event::VideoReceived { call_id, .. }
            | Iax2Event::DtmfReceived { call_id, .. }
            | Iax2Event::TextReceived { call_id, .. }
            | Iax2Event::CallHeld { call_id }
            | Iax2Event::CallResumed { call_id }
            | Iax2Event::Status { call_id, .. }
            | Iax2Event::PhaseChanged { call_id, .. }
            | Iax2Event::CallCleared { call_id, .. } => *call_id,
        }
    }
}
