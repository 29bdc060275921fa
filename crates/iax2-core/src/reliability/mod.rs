//! Sequence numbering, acknowledgement matching and retransmission

mod retransmit;
mod sequence;
mod waiting;

pub use retransmit::{
    Resend, RetransmissionRegistry, TickOutcome, TrackedFrame, INITIAL_RETRY_INTERVAL,
    MAX_RETRIES, MAX_RETRY_INTERVAL,
};
pub use sequence::{SequenceCheck, SequenceTracker};
pub use waiting::{AckAction, WaitingForAck};
