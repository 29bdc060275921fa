use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info};

use super::{Transport, TransportEvent, MAX_DATAGRAM_SIZE};
use crate::error::{Error, Result};

/// UDP socket shared by the receive loop and the transmitter
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: UdpSocket,
    closed: AtomicBool,
    shutdown: Notify,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl UdpTransport {
    /// Bind a socket and start its receive loop
    pub async fn bind(addr: SocketAddr) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("failed to bind {}: {}", addr, e)))?;
        info!("IAX2 UDP transport bound to {}", socket.local_addr()?);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket,
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
                events_tx,
            }),
        };
        transport.spawn_receive_loop();
        Ok((transport, events_rx))
    }

    /// Stop the receive loop and refuse further sends
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.shutdown.notify_one();
    }

    fn spawn_receive_loop(&self) {
        let transport = self.clone();
        tokio::spawn(async move {
            let inner = &transport.inner;
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            while !inner.closed.load(Ordering::Relaxed) {
                let result = tokio::select! {
                    r = inner.socket.recv_from(&mut buf) => r,
                    _ = inner.shutdown.notified() => break,
                };
                match result {
                    Ok((len, source)) => {
                        let event = TransportEvent::DatagramReceived {
                            bytes: Bytes::copy_from_slice(&buf[..len]),
                            source,
                        };
                        if inner.events_tx.send(event).is_err() {
                            debug!("transport event receiver dropped, stopping receive loop");
                            break;
                        }
                    }
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        // ICMP port unreachable surfaces here on some platforms; keep going
                        error!("Error receiving UDP datagram: {}", e);
                        let _ = inner.events_tx.send(TransportEvent::Error {
                            error: format!("Error receiving datagram: {}", e),
                        });
                    }
                }
            }
            let _ = inner.events_tx.send(TransportEvent::Closed);
            debug!("IAX2 UDP receive loop exited");
        });
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Transport("transport is closed".into()));
        }
        self.inner
            .socket
            .send_to(bytes, destination)
            .await
            .map_err(|e| Error::Transport(format!("failed to send to {}: {}", destination, e)))?;
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    async fn close(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.inner.socket.local_addr().ok())
            .field("closed", &self.is_closed())
            .finish()
    }
}
