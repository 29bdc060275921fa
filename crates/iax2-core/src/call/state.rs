use std::fmt;

/// Lifecycle flags of a call. Flags are only ever added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallFlags(u8);

impl CallFlags {
    pub const NEWED: CallFlags = CallFlags(0x01);
    pub const ACCEPTED: CallFlags = CallFlags(0x02);
    pub const RINGING: CallFlags = CallFlags(0x04);
    pub const ANSWERED: CallFlags = CallFlags(0x08);
    pub const AUTHORISED: CallFlags = CallFlags(0x10);
    pub const TERMINATING: CallFlags = CallFlags(0x20);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn set(&mut self, flag: CallFlags) {
        self.0 |= flag.0;
    }

    pub fn contains(self, flag: CallFlags) -> bool {
        self.0 & flag.0 == flag.0
    }
}

/// Generic call phase reported to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CallPhase {
    SetUp,
    Alerting,
    Connected,
    Established,
    Releasing,
    Released,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallPhase::SetUp => "SetUp",
            CallPhase::Alerting => "Alerting",
            CallPhase::Connected => "Connected",
            CallPhase::Established => "Established",
            CallPhase::Releasing => "Releasing",
            CallPhase::Released => "Released",
        };
        f.write_str(s)
    }
}

/// Which side placed the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}
