use tracing::trace;

use crate::frame::FullFrame;

/// Outcome of checking an incoming full frame against the expected sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// The next expected frame (or one that does not take part in sequencing)
    InOrder,
    /// Already seen; re-acknowledge and do not process again
    Duplicate,
    /// Frames are missing before this one
    Ahead { expected: u8, received: u8 },
}

/// Per-call in/out sequence counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    out_seq: u8,
    in_seq: u8,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next outgoing sequence number
    pub fn out_seq(&self) -> u8 {
        self.out_seq
    }

    /// Next sequence number expected from the peer
    pub fn in_seq(&self) -> u8 {
        self.in_seq
    }

    /// Stamp an outgoing frame and advance the outgoing counter if it counts
    pub fn stamp_outgoing(&mut self, frame: &mut FullFrame) {
        frame.out_seq_no = self.out_seq;
        frame.in_seq_no = self.in_seq;
        if frame.increments_in_seq_no() {
            self.out_seq = self.out_seq.wrapping_add(1);
        }
    }

    /// Validate an incoming frame and advance the incoming counter when it is in order
    pub fn check_incoming(&mut self, frame: &FullFrame) -> SequenceCheck {
        if !frame.increments_in_seq_no() {
            return SequenceCheck::InOrder;
        }
        let diff = frame.out_seq_no.wrapping_sub(self.in_seq) as i8;
        match diff {
            0 => {
                self.in_seq = self.in_seq.wrapping_add(1);
                SequenceCheck::InOrder
            }
            d if d < 0 => SequenceCheck::Duplicate,
            _ => {
                trace!(expected = self.in_seq, received = frame.out_seq_no, "frame ahead of sequence");
                SequenceCheck::Ahead {
                    expected: self.in_seq,
                    received: frame.out_seq_no,
                }
            }
        }
    }

    /// Back to zero, used when a `New` is re-sent after a call token challenge
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
