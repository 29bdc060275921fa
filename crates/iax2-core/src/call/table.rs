use std::net::SocketAddr;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::CallCommand;
use crate::error::{Error, Result};
use crate::frame::MAX_CALL_NUMBER;

/// Where to deliver work for a live call
#[derive(Debug, Clone)]
pub(crate) struct CallEntry {
    pub commands: mpsc::UnboundedSender<CallCommand>,
    pub peer: SocketAddr,
}

/// Live calls of an endpoint, by local call number and by the peer's socket and call number
#[derive(Debug)]
pub(crate) struct CallTable {
    by_number: DashMap<u16, CallEntry>,
    by_peer: DashMap<(SocketAddr, u16), u16>,
    next_number: Mutex<u16>,
}

impl CallTable {
    pub fn new() -> Self {
        Self {
            by_number: DashMap::new(),
            by_peer: DashMap::new(),
            next_number: Mutex::new(1),
        }
    }

    /// Reserve an unused local call number in 1..=32767
    pub fn allocate(&self, peer: SocketAddr, commands: mpsc::UnboundedSender<CallCommand>) -> Result<u16> {
        let mut next = self.next_number.lock();
        for _ in 0..MAX_CALL_NUMBER {
            let candidate = *next;
            *next = candidate % MAX_CALL_NUMBER + 1;
            if let Entry::Vacant(slot) = self.by_number.entry(candidate) {
                slot.insert(CallEntry {
                    commands: commands.clone(),
                    peer,
                });
                return Ok(candidate);
            }
        }
        Err(Error::CallNumbersExhausted)
    }

    /// Route frames from `peer` carrying `peer_call_number` as source to the call with `number`.
    ///
    /// Keyed by the full socket address: callers behind one NAT share an IP
    /// and often reuse the same call numbers.
    pub fn register_peer(&self, peer: SocketAddr, peer_call_number: u16, number: u16) {
        self.by_peer.insert((peer, peer_call_number), number);
    }

    pub fn lookup_peer(&self, peer: SocketAddr, peer_call_number: u16) -> Option<u16> {
        self.by_peer.get(&(peer, peer_call_number)).map(|n| *n)
    }

    /// Call for a full frame addressed to `number`, provided it came from that call's peer
    pub fn number_for_peer(&self, number: u16, source: SocketAddr) -> Option<u16> {
        self.by_number
            .get(&number)
            .filter(|entry| entry.peer == source)
            .map(|_| number)
    }

    pub fn sender(&self, number: u16) -> Option<mpsc::UnboundedSender<CallCommand>> {
        self.by_number.get(&number).map(|e| e.commands.clone())
    }

    pub fn remove(&self, number: u16) {
        self.by_number.remove(&number);
        self.by_peer.retain(|_, n| *n != number);
    }

    pub fn numbers(&self) -> Vec<u16> {
        let mut numbers: Vec<u16> = self.by_number.iter().map(|e| *e.key()).collect();
        numbers.sort_unstable();
        numbers
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }
}
