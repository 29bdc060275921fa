//! IAX2 endpoint
//!
//! [`Iax2Endpoint`] owns the UDP socket and runs three tasks:
//!
//! - the transmitter, which drains the outgoing datagram queue
//! - the dispatcher, which routes every received datagram to its call processor
//!   or handles it statelessly when no call matches
//! - the retransmission ticker, which resends unacknowledged full frames
//!
//! Calls are addressed by [`CallId`], which is the local call number.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::call::{CallCommand, CallContext, CallDirection, CallProcessor, CallTable};
use crate::codec::MediaFormatProvider;
use crate::config::Iax2Config;
use crate::error::{Error, FrameError, Result};
use crate::events::{CallId, Iax2Event};
use crate::frame::{Frame, FrameKind, FullFrame, FullFrameBody, ProtocolSubclass, Route};
use crate::frame::full::is_dtmf_digit;
use crate::ie::{Ie, IeData, IeList, IeType, TokenSigner};
use crate::reliability::RetransmissionRegistry;
use crate::transport::{Transmitter, Transport, TransportEvent, UdpTransport};

/// How long [`Iax2Endpoint::shutdown`] waits for calls to clear
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// An IAX2 peer bound to one UDP socket
pub struct Iax2Endpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    ctx: Arc<CallContext>,
    transport: UdpTransport,
    signer: TokenSigner,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Iax2Endpoint {
    /// Bind the socket from `config` and start the endpoint's tasks.
    ///
    /// Events for every call are delivered on the returned receiver.
    pub async fn bind(config: Iax2Config) -> Result<(Self, mpsc::UnboundedReceiver<Iax2Event>)> {
        let media = Arc::new(config.media_formats());
        Self::with_media_formats(config, media).await
    }

    /// Like [`bind`](Self::bind) with a custom source of codec information
    pub async fn with_media_formats(
        config: Iax2Config,
        media: Arc<dyn MediaFormatProvider>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Iax2Event>)> {
        config.validate()?;

        let (transport, transport_events) = UdpTransport::bind(config.listen_addr).await?;
        let (transmitter, transmitter_task) = Transmitter::spawn(Arc::new(transport.clone()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tick = config.retransmit_tick();
        let ctx = Arc::new(CallContext {
            config: Arc::new(config),
            media,
            transmitter,
            registry: Arc::new(RetransmissionRegistry::new()),
            calls: Arc::new(CallTable::new()),
            events: events_tx,
        });

        let inner = Arc::new(EndpointInner {
            ctx: ctx.clone(),
            transport,
            signer: TokenSigner::new(),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let dispatcher = tokio::spawn(run_dispatcher(inner.clone(), transport_events));
        let ticker = tokio::spawn(run_retransmit_ticker(ctx, tick));
        inner.tasks.lock().extend([transmitter_task, dispatcher, ticker]);

        info!("IAX2 endpoint listening on {}", inner.transport.local_addr()?);
        Ok((Self { inner }, events_rx))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.transport.local_addr()
    }

    /// Place a call to `destination` for `called_number`
    pub fn make_call(&self, destination: SocketAddr, called_number: &str) -> Result<CallId> {
        self.ensure_open()?;
        let ctx = &self.inner.ctx;
        let (tx, rx) = mpsc::unbounded_channel();
        let number = ctx.calls.allocate(destination, tx.clone())?;
        let call_id = CallId(number);

        let processor = CallProcessor::new(
            call_id,
            CallDirection::Outgoing,
            destination,
            0,
            ctx.clone(),
            tx,
            rx,
            Some(called_number.to_string()),
        );
        tokio::spawn(processor.run());
        info!(call = %call_id, %destination, called_number, "placing call");
        Ok(call_id)
    }

    /// Answer a ringing incoming call
    pub fn answer(&self, call_id: CallId) -> Result<()> {
        self.command(call_id, CallCommand::Answer)
    }

    pub fn hangup(&self, call_id: CallId, reason: &str) -> Result<()> {
        self.command(call_id, CallCommand::Hangup(reason.to_string()))
    }

    /// Send one DTMF digit (`0-9`, `*`, `#`, `A-D`)
    pub fn send_dtmf(&self, call_id: CallId, digit: char) -> Result<()> {
        if !is_dtmf_digit(&digit) {
            return Err(FrameError::InvalidPayload(format!("invalid DTMF digit {:?}", digit)).into());
        }
        self.command(call_id, CallCommand::SendDtmf(digit))
    }

    pub fn send_text(&self, call_id: CallId, text: &str) -> Result<()> {
        self.command(call_id, CallCommand::SendText(text.to_string()))
    }

    /// Send one chunk of audio encoded with the call's negotiated codec
    pub fn send_audio(&self, call_id: CallId, data: Bytes) -> Result<()> {
        self.command(call_id, CallCommand::SendAudio(data))
    }

    pub fn hold(&self, call_id: CallId) -> Result<()> {
        self.command(call_id, CallCommand::Hold)
    }

    pub fn unhold(&self, call_id: CallId) -> Result<()> {
        self.command(call_id, CallCommand::Unhold)
    }

    /// Calls that have not been cleared yet
    pub fn active_calls(&self) -> Vec<CallId> {
        self.inner.ctx.calls.numbers().into_iter().map(CallId).collect()
    }

    /// Hang up every call, wait briefly for them to clear and close the socket
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("IAX2 endpoint shutting down");

        for number in self.inner.ctx.calls.numbers() {
            if let Some(tx) = self.inner.ctx.calls.sender(number) {
                let _ = tx.send(CallCommand::Hangup("Endpoint shutting down".to_string()));
            }
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while self.inner.ctx.calls.len() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // let the transmitter flush the final hangups
        tokio::time::sleep(Duration::from_millis(20)).await;

        self.inner.stop();
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("endpoint is shut down".into()));
        }
        Ok(())
    }

    fn command(&self, call_id: CallId, command: CallCommand) -> Result<()> {
        let tx = self
            .inner
            .ctx
            .calls
            .sender(call_id.call_number())
            .ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        tx.send(command)?;
        Ok(())
    }
}

impl Drop for Iax2Endpoint {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.stop();
    }
}

impl std::fmt::Debug for Iax2Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iax2Endpoint")
            .field("transport", &self.inner.transport)
            .field("calls", &self.inner.ctx.calls.len())
            .finish()
    }
}

impl EndpointInner {
    fn stop(&self) {
        self.transport.shutdown();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    fn dispatch(&self, bytes: Bytes, source: SocketAddr) {
        let route = match Frame::peek_route(&bytes, source) {
            Ok(route) => route,
            Err(e) => {
                debug!(%source, "dropping malformed datagram: {}", e);
                return;
            }
        };

        let calls = &self.ctx.calls;
        let number = if route.kind == FrameKind::Full && route.remote.dest_call_number != 0 {
            calls.number_for_peer(route.remote.dest_call_number, source)
        } else {
            calls.lookup_peer(source, route.remote.source_call_number)
        };

        if let Some(tx) = number.and_then(|n| calls.sender(n)) {
            if tx.send(CallCommand::Datagram { bytes, source }).is_err() {
                trace!(%source, "call processor already gone");
            }
            return;
        }

        self.handle_unknown(bytes, route);
    }

    /// Frames that belong to no live call
    fn handle_unknown(&self, bytes: Bytes, route: Route) {
        let source = route.remote.address;
        let frame = match Frame::decode(&bytes, source) {
            Ok(Frame::Full(frame)) => frame,
            Ok(Frame::Mini(_)) => {
                trace!(%source, "dropping mini frame for unknown call");
                return;
            }
            Err(e) => {
                debug!(%source, "dropping undecodable frame for unknown call: {}", e);
                return;
            }
        };

        match frame.protocol_subclass() {
            Some(ProtocolSubclass::New) => self.on_new_call(frame, bytes),
            Some(ProtocolSubclass::Ack) => {
                // acknowledgement of a final Hangup/Reject of a cleared call
                self.ctx.registry.on_ack_received(&frame);
            }
            Some(ProtocolSubclass::Poke) => {
                self.reply_stateless(&frame, FullFrameBody::protocol(ProtocolSubclass::Pong));
            }
            Some(ProtocolSubclass::Inval) => {}
            other => {
                debug!(%source, subclass = ?other, "frame for unknown call, replying Inval");
                self.reply_stateless(&frame, FullFrameBody::protocol(ProtocolSubclass::Inval));
            }
        }
    }

    fn on_new_call(&self, frame: FullFrame, bytes: Bytes) {
        let source = frame.remote.address;
        let FullFrameBody::Protocol { ies, .. } = &frame.body else {
            return;
        };

        if self.ctx.config.require_call_token {
            let data = IeData::from_list(ies);
            match data.call_token {
                Some(token) if !token.is_empty() => {
                    if !self.signer.verify(&token, source.ip()) {
                        debug!(%source, "dropping New with an invalid call token");
                        return;
                    }
                }
                _ => {
                    debug!(%source, "challenging New with a call token");
                    self.send_call_token(&frame);
                    return;
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let number = match self.ctx.calls.allocate(source, tx.clone()) {
            Ok(number) => number,
            Err(e) => {
                error!(%source, "cannot accept call: {}", e);
                let body = match Ie::string(IeType::Cause, "No free call numbers") {
                    Ok(cause) => FullFrameBody::Protocol {
                        subclass: ProtocolSubclass::Reject,
                        ies: IeList::new().with(cause),
                    },
                    Err(_) => FullFrameBody::protocol(ProtocolSubclass::Reject),
                };
                self.reply_stateless(&frame, body);
                return;
            }
        };
        self.ctx
            .calls
            .register_peer(source, frame.remote.source_call_number, number);

        let call_id = CallId(number);
        let processor = CallProcessor::new(
            call_id,
            CallDirection::Incoming,
            source,
            frame.remote.source_call_number,
            self.ctx.clone(),
            tx.clone(),
            rx,
            None,
        );
        // queued before the processor starts so the New is its first frame
        if tx.send(CallCommand::Datagram { bytes, source }).is_err() {
            return;
        }
        debug!(call = %call_id, %source, "new incoming call");
        tokio::spawn(processor.run());
    }

    fn send_call_token(&self, new: &FullFrame) {
        let token = self.signer.generate(new.remote.address.ip());
        match Ie::binary(IeType::CallToken, Bytes::from(token.into_bytes())) {
            Ok(ie) => self.reply_stateless(
                new,
                FullFrameBody::Protocol {
                    subclass: ProtocolSubclass::CallToken,
                    ies: IeList::new().with(ie),
                },
            ),
            Err(e) => warn!("failed to build call token element: {}", e),
        }
    }

    /// Answer a frame without any call state, mirroring its numbering
    fn reply_stateless(&self, to: &FullFrame, body: FullFrameBody) {
        let mut reply = FullFrame::new(to.remote.reversed(), to.timestamp, body);
        reply.out_seq_no = to.in_seq_no;
        reply.in_seq_no = to.out_seq_no.wrapping_add(1);
        if let Err(e) = self.ctx.transmitter.send(reply.encode(), to.remote.address) {
            warn!("failed to queue stateless reply: {}", e);
        }
    }
}

async fn run_dispatcher(inner: Arc<EndpointInner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::DatagramReceived { bytes, source } => inner.dispatch(bytes, source),
            TransportEvent::Error { error } => debug!("transport error: {}", error),
            TransportEvent::Closed => break,
        }
    }
    debug!("IAX2 dispatcher stopped");
}

async fn run_retransmit_ticker(ctx: Arc<CallContext>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let outcome = ctx.registry.tick(Instant::now());
        for resend in outcome.resend {
            trace!(owner = %resend.owner, destination = %resend.destination, "retransmitting frame");
            if ctx.transmitter.send(resend.bytes, resend.destination).is_err() {
                return;
            }
        }
        for dropped in outcome.dropped {
            debug!(
                owner = %dropped.owner,
                subclass = ?dropped.frame.protocol_subclass(),
                "giving up on unacknowledged frame"
            );
        }
    }
}
