//! Datagram transport for the endpoint
//!
//! The endpoint owns one socket. A receive loop turns datagrams into
//! [`TransportEvent`]s and a [`Transmitter`] task drains the outgoing queue, so
//! call processors never touch the socket themselves.

mod udp;

pub use udp::UdpTransport;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{Error, Result};

/// Largest datagram the receive loop accepts
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Event produced by a transport's receive loop
#[derive(Debug, Clone)]
pub enum TransportEvent {
    DatagramReceived { bytes: Bytes, source: SocketAddr },
    Error { error: String },
    Closed,
}

/// A socket that can send datagrams
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> Result<()>;

    fn local_addr(&self) -> Result<SocketAddr>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Datagram queued for sending
#[derive(Debug, Clone)]
pub struct OutgoingDatagram {
    pub bytes: Bytes,
    pub destination: SocketAddr,
}

/// Handle to the outgoing queue
#[derive(Debug, Clone)]
pub struct Transmitter {
    queue: mpsc::UnboundedSender<OutgoingDatagram>,
}

impl Transmitter {
    /// Spawn the task that sends queued datagrams on `transport`
    pub fn spawn<T: Transport + ?Sized>(transport: Arc<T>) -> (Self, JoinHandle<()>) {
        let (queue, mut rx) = mpsc::unbounded_channel::<OutgoingDatagram>();
        let handle = tokio::spawn(async move {
            while let Some(datagram) = rx.recv().await {
                if transport.is_closed() {
                    break;
                }
                trace!(
                    destination = %datagram.destination,
                    len = datagram.bytes.len(),
                    "sending datagram"
                );
                if let Err(e) = transport.send_to(&datagram.bytes, datagram.destination).await {
                    warn!(destination = %datagram.destination, "failed to send datagram: {}", e);
                }
            }
        });
        (Self { queue }, handle)
    }

    /// A transmitter that feeds a channel instead of a socket
    pub fn from_sender(queue: mpsc::UnboundedSender<OutgoingDatagram>) -> Self {
        Self { queue }
    }

    pub fn send(&self, bytes: Bytes, destination: SocketAddr) -> Result<()> {
        self.queue
            .send(OutgoingDatagram { bytes, destination })
            .map_err(|_| Error::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transmitter_delivers_in_order() {
        let (a, mut a_events) = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (b, _b_events) = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let a_addr = a.local_addr().unwrap();

        let (tx, _handle) = Transmitter::spawn(Arc::new(b.clone()));
        tx.send(Bytes::from_static(b"one"), a_addr).unwrap();
        tx.send(Bytes::from_static(b"two"), a_addr).unwrap();

        for expected in [&b"one"[..], &b"two"[..]] {
            match a_events.recv().await.unwrap() {
                TransportEvent::DatagramReceived { bytes, source } => {
                    assert_eq!(bytes.as_ref(), expected);
                    assert_eq!(source, b.local_addr().unwrap());
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        a.close().await.unwrap();
        b.close().await.unwrap();
    }
}
