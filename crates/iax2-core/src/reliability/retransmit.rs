//! Endpoint-wide registry of full frames awaiting acknowledgement

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::frame::{FullFrame, ProtocolSubclass, RETRANSMIT_FLAG_OFFSET};

/// First retry interval
pub const INITIAL_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound of the retry interval
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Resends before a frame is abandoned
pub const MAX_RETRIES: u32 = 10;

/// Retry interval grows by this factor on every timeout
const BACKOFF_FACTOR: u32 = 4;

/// A full frame in flight
#[derive(Debug, Clone)]
pub struct TrackedFrame {
    pub frame: FullFrame,
    /// Datagram exactly as sent (encrypted when the call encrypts)
    pub bytes: Bytes,
    /// Key of the owning call
    pub owner: String,
    pub destination: SocketAddr,
    pub resends: u32,
    interval: Duration,
    next_send: Instant,
}

impl TrackedFrame {
    fn matches_ack(&self, ack: &FullFrame) -> bool {
        let out = &self.frame.remote;
        let inb = &ack.remote;

        let same_association = out.address == inb.address
            && out.source_call_number == inb.dest_call_number
            && (out.dest_call_number == 0 || out.dest_call_number == inb.source_call_number);
        if !same_association {
            return false;
        }

        if self.frame.is_protocol(ProtocolSubclass::New)
            && self.frame.out_seq_no == 0
            && self.frame.in_seq_no == 0
        {
            return true;
        }

        self.frame.timestamp == ack.timestamp && self.frame.in_seq_no == ack.out_seq_no
    }

    fn is_final(&self) -> bool {
        matches!(
            self.frame.protocol_subclass(),
            Some(ProtocolSubclass::Hangup) | Some(ProtocolSubclass::Reject)
        )
    }

    fn mark_retransmitted(&mut self) {
        if self.frame.retransmitted {
            return;
        }
        self.frame.retransmitted = true;
        let mut bytes = BytesMut::from(self.bytes.as_ref());
        if let Some(b) = bytes.get_mut(RETRANSMIT_FLAG_OFFSET) {
            *b |= 0x80;
        }
        self.bytes = bytes.freeze();
    }
}

/// Datagram to put back on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resend {
    pub owner: String,
    pub destination: SocketAddr,
    pub bytes: Bytes,
}

/// Result of one pass over the registry
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub resend: Vec<Resend>,
    pub dropped: Vec<TrackedFrame>,
}

/// Mutex-guarded list of unacknowledged full frames
#[derive(Debug, Default)]
pub struct RetransmissionRegistry {
    frames: Mutex<Vec<TrackedFrame>>,
}

impl RetransmissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a frame that has just been sent
    pub fn track(&self, frame: FullFrame, bytes: Bytes, owner: String, now: Instant) {
        let destination = frame.remote.address;
        self.frames.lock().push(TrackedFrame {
            frame,
            bytes,
            owner,
            destination,
            resends: 0,
            interval: INITIAL_RETRY_INTERVAL,
            next_send: now + INITIAL_RETRY_INTERVAL,
        });
    }

    /// Remove and return the first tracked frame the incoming frame acknowledges
    pub fn on_ack_received(&self, ack: &FullFrame) -> Option<TrackedFrame> {
        let mut frames = self.frames.lock();
        let idx = frames.iter().position(|t| t.matches_ack(ack))?;
        let tracked = frames.remove(idx);
        debug!(
            owner = %tracked.owner,
            subclass = ?tracked.frame.protocol_subclass(),
            timestamp = tracked.frame.timestamp,
            "frame acknowledged"
        );
        Some(tracked)
    }

    /// Collect frames whose retry timer expired by `now`.
    ///
    /// Each expiry either schedules a resend with a longer interval or, once the
    /// frame has been resent `MAX_RETRIES` times, drops it.
    pub fn tick(&self, now: Instant) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let mut frames = self.frames.lock();
        let mut i = 0;
        while i < frames.len() {
            if frames[i].next_send > now {
                i += 1;
                continue;
            }
            if frames[i].resends >= MAX_RETRIES {
                let dropped = frames.remove(i);
                warn!(
                    owner = %dropped.owner,
                    subclass = ?dropped.frame.protocol_subclass(),
                    "giving up on unacknowledged frame"
                );
                outcome.dropped.push(dropped);
                continue;
            }

            let t = &mut frames[i];
            t.resends += 1;
            t.interval = (t.interval * BACKOFF_FACTOR).min(MAX_RETRY_INTERVAL);
            t.next_send = now + t.interval;
            t.mark_retransmitted();
            outcome.resend.push(Resend {
                owner: t.owner.clone(),
                destination: t.destination,
                bytes: t.bytes.clone(),
            });
            i += 1;
        }
        outcome
    }

    /// Everything still outstanding for a call, marked as retransmissions (used on `Vnak`)
    pub fn resend_all(&self, owner: &str) -> Vec<Resend> {
        let mut frames = self.frames.lock();
        frames
            .iter_mut()
            .filter(|t| t.owner == owner)
            .map(|t| {
                t.mark_retransmitted();
                Resend {
                    owner: t.owner.clone(),
                    destination: t.destination,
                    bytes: t.bytes.clone(),
                }
            })
            .collect()
    }

    /// Forget a finished call's frames. A final `Hangup` or `Reject` stays
    /// until it is acknowledged or runs out of retries.
    pub fn purge_call(&self, owner: &str) -> usize {
        let mut frames = self.frames.lock();
        let before = frames.len();
        frames.retain(|t| t.owner != owner || t.is_final());
        before - frames.len()
    }

    pub fn pending_for(&self, owner: &str) -> usize {
        self.frames.lock().iter().filter(|t| t.owner == owner).count()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FullFrameBody, Remote};

    fn peer() -> SocketAddr {
        "127.0.0.1:4570".parse().unwrap()
    }

    fn outbound(sc: ProtocolSubclass, ts: u32, oseq: u8, iseq: u8, dest: u16) -> FullFrame {
        let mut f = FullFrame::new(Remote::new(peer(), 10, dest), ts, FullFrameBody::protocol(sc));
        f.out_seq_no = oseq;
        f.in_seq_no = iseq;
        f
    }

    fn inbound(sc: ProtocolSubclass, ts: u32, oseq: u8, src: u16) -> FullFrame {
        let mut f = FullFrame::new(Remote::new(peer(), src, 10), ts, FullFrameBody::protocol(sc));
        f.out_seq_no = oseq;
        f
    }

    fn track(reg: &RetransmissionRegistry, f: FullFrame, now: Instant) {
        let bytes = f.encode();
        reg.track(f, bytes, "call-10".into(), now);
    }

    #[test]
    fn test_retry_schedule_then_drop() {
        let reg = RetransmissionRegistry::new();
        let start = Instant::now();
        track(&reg, outbound(ProtocolSubclass::Ping, 100, 3, 2, 20), start);

        // walk a simulated clock in 100ms steps and record when resends happen
        let mut resend_times = Vec::new();
        let mut dropped_at = None;
        let mut elapsed = Duration::ZERO;
        while elapsed < Duration::from_secs(120) && dropped_at.is_none() {
            elapsed += Duration::from_millis(100);
            let out = reg.tick(start + elapsed);
            if !out.resend.is_empty() {
                assert_eq!(out.resend.len(), 1);
                assert_eq!(out.resend[0].bytes[2] & 0x80, 0x80);
                resend_times.push(elapsed.as_millis() as u64);
            }
            if !out.dropped.is_empty() {
                dropped_at = Some(elapsed.as_millis() as u64);
            }
        }

        let expected: Vec<u64> = vec![500, 2500, 10500, 20500, 30500, 40500, 50500, 60500, 70500, 80500];
        assert_eq!(resend_times, expected);
        assert_eq!(dropped_at, Some(90500));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_ack_matching_rules() {
        let reg = RetransmissionRegistry::new();
        let now = Instant::now();
        track(&reg, outbound(ProtocolSubclass::Ping, 500, 4, 7, 20), now);

        // wrong timestamp
        assert!(reg.on_ack_received(&inbound(ProtocolSubclass::Pong, 501, 7, 20)).is_none());
        // wrong sequence
        assert!(reg.on_ack_received(&inbound(ProtocolSubclass::Pong, 500, 6, 20)).is_none());
        // wrong peer call number
        assert!(reg.on_ack_received(&inbound(ProtocolSubclass::Pong, 500, 7, 21)).is_none());

        let hit = reg.on_ack_received(&inbound(ProtocolSubclass::Pong, 500, 7, 20)).unwrap();
        assert!(hit.frame.is_protocol(ProtocolSubclass::Ping));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_new_matches_any_reply_from_the_association() {
        let reg = RetransmissionRegistry::new();
        track(&reg, outbound(ProtocolSubclass::New, 3, 0, 0, 0), Instant::now());
        let accept = inbound(ProtocolSubclass::Accept, 99, 0, 55);
        assert!(reg.on_ack_received(&accept).is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_purge_keeps_final_frames() {
        let reg = RetransmissionRegistry::new();
        let now = Instant::now();
        track(&reg, outbound(ProtocolSubclass::Ping, 1, 1, 0, 20), now);
        track(&reg, outbound(ProtocolSubclass::LagRq, 2, 2, 0, 20), now);
        track(&reg, outbound(ProtocolSubclass::Hangup, 3, 3, 0, 20), now);
        assert_eq!(reg.purge_call("call-10"), 2);
        assert_eq!(reg.pending_for("call-10"), 1);
        assert_eq!(reg.purge_call("other"), 0);
    }

    #[test]
    fn test_resend_all_for_vnak() {
        let reg = RetransmissionRegistry::new();
        let now = Instant::now();
        track(&reg, outbound(ProtocolSubclass::Ping, 1, 1, 0, 20), now);
        track(&reg, outbound(ProtocolSubclass::LagRq, 2, 2, 0, 20), now);
        let resent = reg.resend_all("call-10");
        assert_eq!(resent.len(), 2);
        assert!(resent.iter().all(|r| r.bytes[2] & 0x80 != 0 && r.destination == peer()));
        assert!(reg.resend_all("nobody").is_empty());
    }
}
