use crate::frame::{FullFrame, ProtocolSubclass};

/// What to do once the peer acknowledges the awaited frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    RingingAcked,
    AnswerAcked,
}

/// One-slot record of the last sent frame whose `Ack` drives the call forward.
///
/// `seq_no` is the outgoing sequence counter after the frame went out, which is
/// what the peer's `Ack` carries as its in-sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitingForAck {
    pending: Option<(u32, u8, AckAction)>,
}

impl WaitingForAck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, timestamp: u32, seq_no: u8, action: AckAction) {
        self.pending = Some((timestamp, seq_no, action));
    }

    pub fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Match an incoming `Ack`; on a match the slot is cleared and its action returned
    pub fn match_ack(&mut self, ack: &FullFrame) -> Option<AckAction> {
        if !ack.is_protocol(ProtocolSubclass::Ack) {
            return None;
        }
        match self.pending {
            Some((timestamp, seq_no, action))
                if timestamp == ack.timestamp && seq_no == ack.in_seq_no =>
            {
                self.pending = None;
                Some(action)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FullFrameBody, Remote};

    fn ack(timestamp: u32, in_seq: u8) -> FullFrame {
        let mut f = FullFrame::new(
            Remote::new("127.0.0.1:4569".parse().unwrap(), 2, 1),
            timestamp,
            FullFrameBody::protocol(ProtocolSubclass::Ack),
        );
        f.in_seq_no = in_seq;
        f
    }

    #[test]
    fn test_matching_ack_clears_slot() {
        let mut w = WaitingForAck::new();
        w.set(1234, 5, AckAction::RingingAcked);
        assert_eq!(w.match_ack(&ack(1234, 5)), Some(AckAction::RingingAcked));
        assert!(!w.is_waiting());
        assert_eq!(w.match_ack(&ack(1234, 5)), None);
    }

    #[test]
    fn test_mismatched_ack_leaves_slot() {
        let mut w = WaitingForAck::new();
        w.set(1234, 5, AckAction::AnswerAcked);
        assert_eq!(w.match_ack(&ack(1235, 5)), None);
        assert_eq!(w.match_ack(&ack(1234, 4)), None);
        assert!(w.is_waiting());
    }
}
