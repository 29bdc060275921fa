//! Audio timestamp bookkeeping

use crate::codec::CodecLengths;

/// Decides the timestamp of each outgoing audio chunk and whether it must go
/// out as a full voice frame.
///
/// Mini frames only carry the low 16 bits of the timestamp, so a full frame is
/// needed for the first chunk, whenever the low half wraps, and whenever more
/// than 65536 ms passed since the last full frame.
#[derive(Debug, Clone)]
pub struct AudioTimestamper {
    lengths: CodecLengths,
    next_ts: u32,
    last_ts: Option<u32>,
    last_full_ts: Option<u32>,
}

impl AudioTimestamper {
    pub fn new(lengths: CodecLengths, start_ts: u32) -> Self {
        Self {
            lengths,
            next_ts: start_ts,
            last_ts: None,
            last_full_ts: None,
        }
    }

    /// Timestamp for a chunk of `byte_len` encoded bytes, and whether it needs a full frame
    pub fn next_chunk(&mut self, byte_len: usize) -> (u32, bool) {
        let ts = self.next_ts;
        let full = match (self.last_full_ts, self.last_ts) {
            (None, _) => true,
            (Some(last_full), Some(last)) => {
                ts.wrapping_sub(last_full) > 0x1_0000 || (ts & 0xFFFF) < (last & 0xFFFF)
            }
            (Some(last_full), None) => ts.wrapping_sub(last_full) > 0x1_0000,
        };
        if full {
            self.last_full_ts = Some(ts);
        }
        self.last_ts = Some(ts);
        self.next_ts = ts.wrapping_add(self.lengths.duration_of(byte_len));
        (ts, full)
    }

    /// Push the clock forward, e.g. after a gap in sending
    pub fn resync(&mut self, now_ts: u32) {
        if now_ts > self.next_ts {
            self.next_ts = now_ts;
        }
    }
}

/// Rebuild a 32-bit timestamp from the 16 bits a mini frame carries,
/// using the last full voice frame as the reference
pub fn rebuild_mini_timestamp(last_full_ts: u32, mini_ts: u16) -> u32 {
    let mut ts = (last_full_ts & 0xFFFF_0000) | mini_ts as u32;
    if ts < last_full_ts && last_full_ts - ts > 0x8000 {
        ts = ts.wrapping_add(0x1_0000);
    }
    ts
}
