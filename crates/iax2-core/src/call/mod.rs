//! Per-call state machine
//!
//! Every call runs on its own task as a [`CallProcessor`]. The endpoint's
//! dispatcher, the application API and the call's timers all talk to it through
//! one queue of [`CallCommand`]s, so a call's state is only ever touched by a
//! single task. Outgoing frames go through the shared transmitter and every
//! full frame that expects an acknowledgement is handed to the endpoint's
//! retransmission registry.

mod auth;
mod media;
mod state;
mod table;
mod timers;

pub use auth::{generate_challenge, md5_response, select_method, verify_response, AuthChoice};
pub use media::{rebuild_mini_timestamp, AudioTimestamper};
pub use state::{CallDirection, CallFlags, CallPhase};
pub use timers::TimerKind;

pub(crate) use table::CallTable;
use timers::CallTimers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::codec::{Codec, CodecSet, MediaFormatProvider};
use crate::config::Iax2Config;
use crate::crypto::Iax2Encryption;
use crate::error::Result;
use crate::events::{CallId, Iax2Event};
use crate::frame::{
    ControlSubclass, Frame, FrameKind, FullFrame, FullFrameBody, MiniFrame, MiniKind,
    ProtocolSubclass, Remote,
};
use crate::ie::{
    Ie, IeData, IeList, IeType, IeValue, AUTH_MD5, AUTH_PLAINTEXT, ENCRYPT_AES128, IAX_PROTOCOL_VERSION,
};
use crate::reliability::{
    AckAction, RetransmissionRegistry, SequenceCheck, SequenceTracker, WaitingForAck,
};
use crate::transport::Transmitter;

/// Q.850 normal clearing
const CAUSE_NORMAL_CLEARING: u8 = 16;
/// Q.850 call rejected
const CAUSE_CALL_REJECTED: u8 = 21;
/// Q.850 bearer capability not implemented
const CAUSE_BEARER_NOT_IMPLEMENTED: u8 = 58;

/// Work queued for a call processor
#[derive(Debug)]
pub(crate) enum CallCommand {
    /// Datagram routed to this call by the dispatcher, still encrypted if the call encrypts
    Datagram { bytes: Bytes, source: SocketAddr },
    Answer,
    Hangup(String),
    SendDtmf(char),
    SendText(String),
    SendAudio(Bytes),
    Hold,
    Unhold,
    Timer(TimerKind),
}

/// Endpoint-wide state every call shares
pub(crate) struct CallContext {
    pub config: Arc<Iax2Config>,
    pub media: Arc<dyn MediaFormatProvider>,
    pub transmitter: Transmitter,
    pub registry: Arc<RetransmissionRegistry>,
    pub calls: Arc<CallTable>,
    pub events: mpsc::UnboundedSender<Iax2Event>,
}

/// State machine of a single call
pub(crate) struct CallProcessor {
    id: CallId,
    direction: CallDirection,
    /// Association as seen on frames we send
    remote: Remote,
    ctx: Arc<CallContext>,
    commands: mpsc::UnboundedReceiver<CallCommand>,
    timers: CallTimers,
    seq: SequenceTracker,
    waiting: WaitingForAck,
    flags: CallFlags,
    phase: CallPhase,
    encryption: Iax2Encryption,
    /// Whether both sides asked for AES-128
    encryption_negotiated: bool,
    started: Instant,
    last_full_ts: u32,
    codec: Option<Codec>,
    audio_out: Option<AudioTimestamper>,
    last_voice_in_ts: u32,
    quelched: bool,
    hangup_sent: bool,
    clear_reason: Option<String>,
    /// Number we dial on an outgoing call
    called_number: Option<String>,
    /// Token the peer handed us in a `CallToken` frame
    call_token: Option<Bytes>,
    /// Challenge we sent in `AuthReq`
    challenge: Option<String>,
    /// Outcome of checking the peer's `AuthRep`
    auth_verified: Option<bool>,
    /// Elements of the peer's `New`
    peer_info: IeData,
}

impl CallProcessor {
    /// Build the processor for a call whose number is already reserved in the call table.
    ///
    /// `commands_tx` must be the sender of `commands`; the timers post through it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: CallId,
        direction: CallDirection,
        peer: SocketAddr,
        peer_call_number: u16,
        ctx: Arc<CallContext>,
        commands_tx: mpsc::UnboundedSender<CallCommand>,
        commands: mpsc::UnboundedReceiver<CallCommand>,
        called_number: Option<String>,
    ) -> Self {
        Self {
            id,
            direction,
            remote: Remote::new(peer, id.call_number(), peer_call_number),
            ctx,
            commands,
            timers: CallTimers::new(commands_tx),
            seq: SequenceTracker::new(),
            waiting: WaitingForAck::new(),
            flags: CallFlags::empty(),
            phase: CallPhase::SetUp,
            encryption: Iax2Encryption::new(),
            encryption_negotiated: false,
            started: Instant::now(),
            last_full_ts: 0,
            codec: None,
            audio_out: None,
            last_voice_in_ts: 0,
            quelched: false,
            hangup_sent: false,
            clear_reason: None,
            called_number,
            call_token: None,
            challenge: None,
            auth_verified: None,
            peer_info: IeData::default(),
        }
    }

    /// Drive the call until it terminates
    pub async fn run(mut self) {
        debug!(call = %self.id, direction = ?self.direction, peer = %self.remote.address, "call processor started");

        if self.direction == CallDirection::Outgoing {
            if let Err(e) = self.send_new() {
                warn!(call = %self.id, "failed to send New: {}", e);
                self.terminate(format!("Failed to send New: {}", e));
            }
        }

        while !self.flags.contains(CallFlags::TERMINATING) {
            let Some(command) = self.commands.recv().await else {
                break;
            };
            if let Err(e) = self.handle_command(command) {
                warn!(call = %self.id, "error handling call command: {}", e);
            }
        }

        self.teardown();
    }

    fn handle_command(&mut self, command: CallCommand) -> Result<()> {
        match command {
            CallCommand::Datagram { bytes, source } => self.on_datagram(bytes, source),
            CallCommand::Answer => self.answer(),
            CallCommand::Hangup(reason) => {
                self.hangup(reason);
                Ok(())
            }
            CallCommand::SendDtmf(digit) => self.send_user_frame(FullFrameBody::Dtmf(digit)),
            CallCommand::SendText(text) => self.send_user_frame(FullFrameBody::Text(text)),
            CallCommand::SendAudio(data) => self.send_audio(data),
            CallCommand::Hold => self.send_user_frame(FullFrameBody::control(ControlSubclass::Hold)),
            CallCommand::Unhold => {
                self.send_user_frame(FullFrameBody::control(ControlSubclass::Unhold))
            }
            CallCommand::Timer(kind) => self.on_timer(kind),
        }
    }

    // === Receiving ===

    fn on_datagram(&mut self, bytes: Bytes, source: SocketAddr) -> Result<()> {
        if source != self.remote.address {
            debug!(call = %self.id, %source, "dropping datagram from unexpected address");
            return Ok(());
        }

        let plain = if self.encryption.is_enabled() {
            let kind = match Frame::peek_route(&bytes, source) {
                Ok(route) => route.kind,
                Err(e) => {
                    debug!(call = %self.id, "dropping unparseable datagram: {}", e);
                    return Ok(());
                }
            };
            match self.encryption.decrypt(&bytes, kind) {
                Ok(plain) => plain,
                Err(e) => {
                    debug!(call = %self.id, "dropping frame that failed to decrypt: {}", e);
                    return Ok(());
                }
            }
        } else {
            bytes
        };

        match Frame::decode(&plain, source) {
            Ok(Frame::Full(frame)) => self.on_full_frame(frame),
            Ok(Frame::Mini(frame)) => {
                self.on_mini_frame(frame);
                Ok(())
            }
            Err(e) => {
                debug!(call = %self.id, "dropping undecodable frame: {}", e);
                Ok(())
            }
        }
    }

    fn on_full_frame(&mut self, frame: FullFrame) -> Result<()> {
        trace!(
            call = %self.id,
            frame_type = ?frame.frame_type(),
            subclass = ?frame.protocol_subclass(),
            ts = frame.timestamp,
            oseq = frame.out_seq_no,
            iseq = frame.in_seq_no,
            "received full frame"
        );

        if self.remote.dest_call_number == 0
            && frame.remote.source_call_number != 0
            && !frame.is_protocol(ProtocolSubclass::CallToken)
        {
            self.remote.dest_call_number = frame.remote.source_call_number;
            self.ctx.calls.register_peer(
                frame.remote.address,
                frame.remote.source_call_number,
                self.id.call_number(),
            );
            debug!(call = %self.id, peer_call_number = self.remote.dest_call_number, "learned peer call number");
        }

        match self.seq.check_incoming(&frame) {
            SequenceCheck::InOrder => {}
            SequenceCheck::Duplicate => {
                trace!(call = %self.id, oseq = frame.out_seq_no, "duplicate frame, re-acknowledging");
                return self.send_ack(&frame);
            }
            SequenceCheck::Ahead { expected, received } => {
                debug!(call = %self.id, expected, received, "frame ahead of sequence, sending Vnak");
                return self.send_vnak();
            }
        }

        // The caller encrypts from its AuthRep onwards, so our Ack must already use the key
        if self.direction == CallDirection::Incoming && frame.is_protocol(ProtocolSubclass::AuthRep) {
            self.check_auth_reply(&frame)?;
        }

        if needs_ack(&frame) {
            self.send_ack(&frame)?;
        }

        self.process_full_frame(frame)
    }

    fn process_full_frame(&mut self, frame: FullFrame) -> Result<()> {
        match &frame.body {
            FullFrameBody::Protocol { subclass, ies } => self.on_protocol(*subclass, ies, &frame),
            FullFrameBody::Control { subclass, .. } => self.on_control(*subclass),
            FullFrameBody::Voice { codec, data } => {
                self.last_voice_in_ts = frame.timestamp;
                self.emit(Iax2Event::AudioReceived {
                    call_id: self.id,
                    codec: *codec,
                    timestamp: frame.timestamp,
                    data: data.clone(),
                });
                Ok(())
            }
            FullFrameBody::Video { data, .. } => {
                self.emit(Iax2Event::VideoReceived {
                    call_id: self.id,
                    timestamp: frame.timestamp,
                    data: data.clone(),
                });
                Ok(())
            }
            FullFrameBody::Dtmf(digit) => {
                self.emit(Iax2Event::DtmfReceived { call_id: self.id, digit: *digit });
                Ok(())
            }
            FullFrameBody::Text(text) => {
                self.emit(Iax2Event::TextReceived {
                    call_id: self.id,
                    text: text.clone(),
                });
                Ok(())
            }
            FullFrameBody::Null
            | FullFrameBody::Image { .. }
            | FullFrameBody::Html { .. }
            | FullFrameBody::Cng { .. } => {
                trace!(call = %self.id, frame_type = ?frame.frame_type(), "ignoring frame");
                Ok(())
            }
        }
    }

    fn on_protocol(&mut self, subclass: ProtocolSubclass, ies: &IeList, frame: &FullFrame) -> Result<()> {
        use ProtocolSubclass as P;

        match subclass {
            P::Ack => {
                self.ctx.registry.on_ack_received(frame);
                if let Some(action) = self.waiting.match_ack(frame) {
                    self.on_ack_action(action);
                }
                Ok(())
            }
            P::Ping => self.reply(frame, P::Pong),
            P::LagRq => self.reply(frame, P::LagRp),
            P::Pong => {
                self.ctx.registry.on_ack_received(frame);
                let round_trip = self.elapsed_since(frame.timestamp);
                trace!(call = %self.id, ?round_trip, "pong");
                self.emit(Iax2Event::Status {
                    call_id: self.id,
                    round_trip: Some(round_trip),
                    lag: None,
                });
                Ok(())
            }
            P::LagRp => {
                self.ctx.registry.on_ack_received(frame);
                let lag = self.elapsed_since(frame.timestamp);
                self.emit(Iax2Event::Status {
                    call_id: self.id,
                    round_trip: None,
                    lag: Some(lag),
                });
                Ok(())
            }
            P::New if self.direction == CallDirection::Incoming => self.on_new(ies),
            P::Accept if self.direction == CallDirection::Outgoing => {
                self.ctx.registry.on_ack_received(frame);
                self.on_accept(ies);
                Ok(())
            }
            P::AuthReq if self.direction == CallDirection::Outgoing => {
                self.ctx.registry.on_ack_received(frame);
                self.on_auth_request(ies)
            }
            P::AuthRep if self.direction == CallDirection::Incoming => self.on_auth_reply(),
            P::CallToken if self.direction == CallDirection::Outgoing => {
                self.ctx.registry.on_ack_received(frame);
                self.on_call_token(ies)
            }
            P::Reject => {
                self.ctx.registry.on_ack_received(frame);
                let data = IeData::from_list(ies);
                let reason = data.cause.unwrap_or_else(|| "Call rejected".to_string());
                info!(call = %self.id, %reason, "call rejected by peer");
                self.hangup_sent = true;
                self.terminate(reason);
                Ok(())
            }
            P::Hangup => {
                let data = IeData::from_list(ies);
                let reason = data.cause.unwrap_or_else(|| "Remote hangup".to_string());
                info!(call = %self.id, %reason, "peer hung up");
                self.hangup_sent = true;
                self.terminate(reason);
                Ok(())
            }
            P::Inval => {
                info!(call = %self.id, "peer invalidated the call");
                self.hangup_sent = true;
                self.terminate("Call invalidated by peer".to_string());
                Ok(())
            }
            P::Vnak => {
                let owner = self.owner();
                for resend in self.ctx.registry.resend_all(&owner) {
                    self.ctx.transmitter.send(resend.bytes, resend.destination)?;
                }
                Ok(())
            }
            P::Quelch => {
                debug!(call = %self.id, "peer asked us to stop sending audio");
                self.quelched = true;
                Ok(())
            }
            P::Unquelch => {
                self.quelched = false;
                Ok(())
            }
            P::Poke => self.reply(frame, P::Pong),
            other => {
                debug!(call = %self.id, subclass = %other, "ignoring protocol frame");
                Ok(())
            }
        }
    }

    fn on_control(&mut self, subclass: ControlSubclass) -> Result<()> {
        match subclass {
            ControlSubclass::Ringing if self.direction == CallDirection::Outgoing => {
                self.flags.set(CallFlags::RINGING);
                self.set_phase(CallPhase::Alerting);
                self.emit(Iax2Event::CallAlerting { call_id: self.id });
            }
            ControlSubclass::Answer if self.direction == CallDirection::Outgoing => {
                if self.flags.contains(CallFlags::ANSWERED) {
                    return Ok(());
                }
                self.flags.set(CallFlags::ANSWERED);
                self.set_phase(CallPhase::Connected);
                self.emit(Iax2Event::CallConnected { call_id: self.id });
                self.establish();
            }
            ControlSubclass::Hangup => {
                self.hangup_sent = true;
                self.terminate("Remote hangup".to_string());
            }
            ControlSubclass::Busy => self.hangup("Remote party busy".to_string()),
            ControlSubclass::Congestion => self.hangup("Remote congestion".to_string()),
            ControlSubclass::Hold => self.emit(Iax2Event::CallHeld { call_id: self.id }),
            ControlSubclass::Unhold => self.emit(Iax2Event::CallResumed { call_id: self.id }),
            other => trace!(call = %self.id, subclass = ?other, "ignoring control frame"),
        }
        Ok(())
    }

    fn on_mini_frame(&mut self, frame: MiniFrame) {
        if !self.flags.contains(CallFlags::ACCEPTED) {
            trace!(call = %self.id, "dropping media before the call was accepted");
            return;
        }
        match frame.kind {
            MiniKind::Audio => {
                let Some(codec) = self.codec else { return };
                let timestamp = rebuild_mini_timestamp(self.last_voice_in_ts, frame.timestamp);
                self.emit(Iax2Event::AudioReceived {
                    call_id: self.id,
                    codec,
                    timestamp,
                    data: frame.data,
                });
            }
            MiniKind::Video { .. } => {
                self.emit(Iax2Event::VideoReceived {
                    call_id: self.id,
                    timestamp: frame.timestamp as u32,
                    data: frame.data,
                });
            }
        }
    }

    fn on_ack_action(&mut self, action: AckAction) {
        match action {
            AckAction::RingingAcked => self.set_phase(CallPhase::Alerting),
            AckAction::AnswerAcked => self.establish(),
        }
    }

    fn on_timer(&mut self, kind: TimerKind) -> Result<()> {
        match kind {
            TimerKind::NoResponse => {
                info!(call = %self.id, "no response from peer");
                self.hangup("No answer".to_string());
                Ok(())
            }
            TimerKind::StatusCheck => {
                if self.phase != CallPhase::Established {
                    return Ok(());
                }
                self.send_protocol(ProtocolSubclass::Ping, IeList::new())?;
                self.send_protocol(ProtocolSubclass::LagRq, IeList::new())?;
                Ok(())
            }
        }
    }

    // === Calling side ===

    fn send_new(&mut self) -> Result<()> {
        let ctx = self.ctx.clone();
        let config = &ctx.config;
        let called_number = self.called_number.clone().unwrap_or_default();

        let mut ies = IeList::new()
            .with(Ie::u16(IeType::Version, IAX_PROTOCOL_VERSION)?)
            .with(Ie::string(IeType::CalledNumber, called_number.as_str())?)
            .with(Ie::string(IeType::Dnid, called_number)?)
            .with(Ie::string(IeType::CallingNumber, config.local_number.as_str())?)
            .with(Ie::string(IeType::CallingName, config.local_name.as_str())?);
        if let Some(user) = &config.user_name {
            ies.push(Ie::string(IeType::Username, user.as_str())?);
        }
        ies.push(Ie::u32(IeType::Format, ctx.media.preferred_codec().bit())?);
        ies.push(Ie::u32(IeType::Capability, ctx.media.capability_mask().mask())?);
        ies.push(Ie::string(IeType::CalledContext, config.called_context.as_str())?);
        if config.encryption {
            ies.push(Ie::u16(IeType::Encryption, ENCRYPT_AES128)?);
        }
        ies.push(Ie::new(
            IeType::DateTime,
            IeValue::DateTime(Utc::now().naive_utc()),
        )?);
        ies.push(Ie::binary(IeType::CallToken, self.call_token.clone().unwrap_or_default())?);

        self.flags.set(CallFlags::NEWED);
        self.send_protocol(ProtocolSubclass::New, ies)?;
        self.timers.start_once(TimerKind::NoResponse, config.no_response_timeout());
        info!(call = %self.id, peer = %self.remote.address, "sent New");
        Ok(())
    }

    fn on_call_token(&mut self, ies: &IeList) -> Result<()> {
        if self.flags.contains(CallFlags::ACCEPTED) {
            return Ok(());
        }
        let data = IeData::from_list(ies);
        let Some(token) = data.call_token.filter(|t| !t.is_empty()) else {
            warn!(call = %self.id, "CallToken frame without a token");
            return Ok(());
        };
        debug!(call = %self.id, "peer demands a call token, re-sending New");

        self.call_token = Some(token);
        self.ctx.registry.purge_call(&self.owner());
        self.seq.reset();
        self.send_new()
    }

    fn on_auth_request(&mut self, ies: &IeList) -> Result<()> {
        let data = IeData::from_list(ies);
        let challenge = data.challenge.clone().unwrap_or_default();
        let password = self.ctx.config.password.clone().unwrap_or_default();

        let reply = match select_method(data.auth_methods.unwrap_or(0)) {
            AuthChoice::Md5 => IeList::new().with(Ie::string(
                IeType::Md5Result,
                md5_response(&challenge, &password),
            )?),
            AuthChoice::Plaintext => IeList::new().with(Ie::string(IeType::Password, password.as_str())?),
            AuthChoice::Unsupported => {
                warn!(call = %self.id, methods = ?data.auth_methods, "no supported authentication method offered");
                self.send_protocol(ProtocolSubclass::Inval, IeList::new())?;
                return Ok(());
            }
        };

        self.send_protocol(ProtocolSubclass::AuthRep, reply)?;
        self.timers
            .start_once(TimerKind::NoResponse, self.ctx.config.no_response_timeout());

        if self.ctx.config.encryption && data.wants_aes128() {
            self.encryption.set_challenge_and_password(&challenge, &password);
            self.encryption.enable()?;
            self.encryption_negotiated = true;
            debug!(call = %self.id, "encryption enabled");
        }
        Ok(())
    }

    fn on_accept(&mut self, ies: &IeList) {
        if self.flags.contains(CallFlags::ACCEPTED) {
            return;
        }
        self.timers.stop(TimerKind::NoResponse);

        let data = IeData::from_list(ies);
        let supported = self.ctx.media.supported_codecs();
        let codec = data
            .format
            .and_then(Codec::from_bit)
            .filter(|c| supported.contains(c))
            .unwrap_or_else(|| self.ctx.media.preferred_codec());

        self.flags.set(CallFlags::ACCEPTED);
        self.codec = Some(codec);
        info!(call = %self.id, %codec, "call accepted");
        self.emit(Iax2Event::CallSetUp { call_id: self.id, codec });
    }

    // === Called side ===

    fn on_new(&mut self, ies: &IeList) -> Result<()> {
        if self.flags.contains(CallFlags::NEWED) {
            return Ok(());
        }
        self.flags.set(CallFlags::NEWED);
        self.peer_info = IeData::from_list(ies);
        info!(
            call = %self.id,
            peer = %self.remote.address,
            calling = ?self.peer_info.calling_number,
            called = ?self.peer_info.called_number,
            "incoming New"
        );

        if self.ctx.config.password.is_none() {
            self.flags.set(CallFlags::AUTHORISED);
            return self.accept_or_reject();
        }

        let challenge = generate_challenge();
        let mut ies = IeList::new()
            .with(Ie::u16(IeType::AuthMethods, AUTH_MD5 | AUTH_PLAINTEXT)?)
            .with(Ie::string(IeType::Challenge, challenge.as_str())?);
        if let Some(user) = &self.peer_info.user_name {
            ies.push(Ie::string(IeType::Username, user.as_str())?);
        }
        if self.ctx.config.encryption && self.peer_info.wants_aes128() {
            ies.push(Ie::u16(IeType::Encryption, ENCRYPT_AES128)?);
            self.encryption_negotiated = true;
        }
        self.challenge = Some(challenge);
        self.send_protocol(ProtocolSubclass::AuthReq, ies)?;
        self.timers
            .start_once(TimerKind::NoResponse, self.ctx.config.no_response_timeout());
        Ok(())
    }

    /// Verify an `AuthRep` and switch encryption on before it is acknowledged
    fn check_auth_reply(&mut self, frame: &FullFrame) -> Result<()> {
        let FullFrameBody::Protocol { ies, .. } = &frame.body else {
            return Ok(());
        };
        let data = IeData::from_list(ies);
        let (Some(challenge), Some(password)) = (&self.challenge, &self.ctx.config.password) else {
            self.auth_verified = Some(false);
            return Ok(());
        };

        let ok = verify_response(
            challenge,
            password,
            data.md5_result.as_deref(),
            data.password.as_deref(),
        );
        self.auth_verified = Some(ok);
        if ok && self.encryption_negotiated {
            self.encryption.set_challenge_and_password(challenge, password);
            self.encryption.enable()?;
            debug!(call = %self.id, "encryption enabled");
        }
        Ok(())
    }

    fn on_auth_reply(&mut self) -> Result<()> {
        if self.flags.contains(CallFlags::AUTHORISED) {
            return Ok(());
        }
        self.timers.stop(TimerKind::NoResponse);
        match self.auth_verified.take() {
            Some(true) => {
                self.flags.set(CallFlags::AUTHORISED);
                self.accept_or_reject()
            }
            _ => {
                warn!(call = %self.id, peer = %self.remote.address, "authentication failed");
                self.reject("Authentication failed", CAUSE_CALL_REJECTED)
            }
        }
    }

    fn accept_or_reject(&mut self) -> Result<()> {
        let offered = self.peer_info.capability.unwrap_or(0) | self.peer_info.format.unwrap_or(0);
        let remote = CodecSet::from_mask(offered);
        let remote_preferred = self.peer_info.format.and_then(Codec::from_bit);
        trace!(
            call = %self.id,
            remote = ?self.ctx.media.build_remote_capability_table(remote),
            "remote capabilities"
        );

        let Some(codec) = self.ctx.media.choose_codec(remote_preferred, remote) else {
            info!(call = %self.id, offered, "no common codec");
            return self.reject("Unable to negotiate codec", CAUSE_BEARER_NOT_IMPLEMENTED);
        };

        self.codec = Some(codec);
        self.send_protocol(
            ProtocolSubclass::Accept,
            IeList::new().with(Ie::u32(IeType::Format, codec.bit())?),
        )?;
        self.flags.set(CallFlags::ACCEPTED);
        info!(call = %self.id, %codec, "call accepted");

        self.emit(Iax2Event::IncomingCall {
            call_id: self.id,
            connection_token: self.remote.reversed().connection_token(),
            remote: self.remote.address,
            calling_number: self.peer_info.calling_number.clone(),
            calling_name: self.peer_info.calling_name.clone(),
            called_number: self.peer_info.called_number.clone(),
            codec,
        });

        let ts = self.send_full_now(FullFrameBody::control(ControlSubclass::Ringing))?;
        // counter after sending: the peer's Ack echoes it as its in-seq, not the frame's out-seq
        self.waiting.set(ts, self.seq.out_seq(), AckAction::RingingAcked);
        self.flags.set(CallFlags::RINGING);
        Ok(())
    }

    fn answer(&mut self) -> Result<()> {
        if self.direction != CallDirection::Incoming
            || !self.flags.contains(CallFlags::ACCEPTED)
            || self.flags.contains(CallFlags::ANSWERED)
        {
            debug!(call = %self.id, "ignoring answer request in this state");
            return Ok(());
        }
        let ts = self.send_full_now(FullFrameBody::control(ControlSubclass::Answer))?;
        // counter after sending: the peer's Ack echoes it as its in-seq, not the frame's out-seq
        self.waiting.set(ts, self.seq.out_seq(), AckAction::AnswerAcked);
        self.flags.set(CallFlags::ANSWERED);
        self.set_phase(CallPhase::Connected);
        self.emit(Iax2Event::CallConnected { call_id: self.id });
        Ok(())
    }

    fn reject(&mut self, cause: &str, cause_code: u8) -> Result<()> {
        let ies = IeList::new()
            .with(Ie::string(IeType::Cause, cause)?)
            .with(Ie::u8(IeType::CauseCode, cause_code)?);
        self.send_protocol(ProtocolSubclass::Reject, ies)?;
        self.hangup_sent = true;
        self.terminate(cause.to_string());
        Ok(())
    }

    // === Both sides ===

    fn establish(&mut self) {
        if self.phase >= CallPhase::Established {
            return;
        }
        self.set_phase(CallPhase::Established);
        self.emit(Iax2Event::CallEstablished { call_id: self.id });
        self.timers
            .start_periodic(TimerKind::StatusCheck, self.ctx.config.status_check_interval());
    }

    fn send_user_frame(&mut self, body: FullFrameBody) -> Result<()> {
        if !self.flags.contains(CallFlags::ACCEPTED) {
            debug!(call = %self.id, frame_type = ?body.frame_type(), "call not accepted yet, dropping frame");
            return Ok(());
        }
        self.send_full_now(body).map(|_| ())
    }

    fn send_audio(&mut self, data: Bytes) -> Result<()> {
        if self.phase < CallPhase::Connected {
            trace!(call = %self.id, "call not connected, dropping audio");
            return Ok(());
        }
        if self.quelched {
            return Ok(());
        }
        let Some(codec) = self.codec else { return Ok(()) };
        let Some(lengths) = self.ctx.media.codec_lengths(codec) else {
            debug!(call = %self.id, %codec, "codec has no audio framing, dropping audio");
            return Ok(());
        };

        let now = self.now_ts();
        let stamper = self
            .audio_out
            .get_or_insert_with(|| AudioTimestamper::new(lengths, now));
        stamper.resync(now);
        let (ts, full) = stamper.next_chunk(data.len());

        if full {
            let frame = FullFrame::new(self.remote, ts, FullFrameBody::Voice { codec, data });
            return self.send_full(frame);
        }

        let plain = MiniFrame::audio(self.remote, ts, data).encode();
        let bytes = if self.encryption.is_enabled() {
            self.encryption.encrypt(&plain, FrameKind::Mini)?
        } else {
            plain
        };
        self.ctx.transmitter.send(bytes, self.remote.address)
    }

    /// Send a hangup with its cause unless one already went out, then terminate
    fn hangup(&mut self, reason: String) {
        if self.flags.contains(CallFlags::TERMINATING) {
            return;
        }
        if !self.hangup_sent {
            self.hangup_sent = true;
            if let Err(e) = self.send_hangup(&reason) {
                warn!(call = %self.id, "failed to send Hangup: {}", e);
            }
        }
        self.terminate(reason);
    }

    fn send_hangup(&mut self, reason: &str) -> Result<()> {
        let ies = IeList::new()
            .with(Ie::string(IeType::Cause, reason)?)
            .with(Ie::u8(IeType::CauseCode, CAUSE_NORMAL_CLEARING)?);
        self.send_protocol(ProtocolSubclass::Hangup, ies).map(|_| ())
    }

    fn terminate(&mut self, reason: String) {
        if self.flags.contains(CallFlags::TERMINATING) {
            return;
        }
        info!(call = %self.id, %reason, "call terminating");
        self.flags.set(CallFlags::TERMINATING);
        self.clear_reason = Some(reason);
        self.timers.stop_all();
        self.set_phase(CallPhase::Releasing);
    }

    fn teardown(&mut self) {
        self.timers.stop_all();
        let mut dropped = 0usize;
        while self.commands.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            trace!(call = %self.id, dropped, "discarded queued work of a cleared call");
        }

        self.ctx.registry.purge_call(&self.owner());
        self.ctx.calls.remove(self.id.call_number());
        self.set_phase(CallPhase::Released);

        let reason = self
            .clear_reason
            .take()
            .unwrap_or_else(|| "Call processor stopped".to_string());
        debug!(call = %self.id, %reason, "call cleared");
        self.emit(Iax2Event::CallCleared { call_id: self.id, reason });
    }

    // === Sending ===

    fn send_ack(&mut self, to: &FullFrame) -> Result<()> {
        let ack = FullFrame::new(self.remote, to.timestamp, FullFrameBody::protocol(ProtocolSubclass::Ack));
        self.send_full(ack)
    }

    fn send_vnak(&mut self) -> Result<()> {
        let ts = self.now_ts();
        let vnak = FullFrame::new(self.remote, ts, FullFrameBody::protocol(ProtocolSubclass::Vnak));
        self.send_full(vnak)
    }

    /// Answer a probe, echoing its timestamp
    fn reply(&mut self, to: &FullFrame, subclass: ProtocolSubclass) -> Result<()> {
        let frame = FullFrame::new(self.remote, to.timestamp, FullFrameBody::protocol(subclass));
        self.send_full(frame)
    }

    fn send_protocol(&mut self, subclass: ProtocolSubclass, ies: IeList) -> Result<u32> {
        self.send_full_now(FullFrameBody::Protocol { subclass, ies })
    }

    /// Send a full frame stamped with the next call timestamp and return that timestamp
    fn send_full_now(&mut self, body: FullFrameBody) -> Result<u32> {
        let ts = self.next_full_ts();
        self.send_full(FullFrame::new(self.remote, ts, body))?;
        Ok(ts)
    }

    fn send_full(&mut self, mut frame: FullFrame) -> Result<()> {
        self.seq.stamp_outgoing(&mut frame);
        let plain = frame.encode();
        let bytes = if self.encryption.is_enabled() && !frame.is_protocol(ProtocolSubclass::New) {
            self.encryption.encrypt(&plain, FrameKind::Full)?
        } else {
            plain
        };

        trace!(
            call = %self.id,
            frame_type = ?frame.frame_type(),
            subclass = ?frame.protocol_subclass(),
            ts = frame.timestamp,
            oseq = frame.out_seq_no,
            iseq = frame.in_seq_no,
            "sending full frame"
        );

        if frame.expects_ack() {
            self.ctx
                .registry
                .track(frame, bytes.clone(), self.owner(), Instant::now());
        }
        self.ctx.transmitter.send(bytes, self.remote.address)
    }

    // === Helpers ===

    fn owner(&self) -> String {
        self.id.to_string()
    }

    fn now_ts(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Full frame timestamps are strictly increasing
    fn next_full_ts(&mut self) -> u32 {
        let ts = self.now_ts().max(self.last_full_ts.wrapping_add(1));
        self.last_full_ts = ts;
        ts
    }

    fn elapsed_since(&self, timestamp: u32) -> Duration {
        Duration::from_millis(self.now_ts().saturating_sub(timestamp) as u64)
    }

    fn set_phase(&mut self, phase: CallPhase) {
        if phase <= self.phase {
            return;
        }
        debug!(call = %self.id, from = %self.phase, to = %phase, "call phase changed");
        self.phase = phase;
        self.emit(Iax2Event::PhaseChanged { call_id: self.id, phase });
    }

    fn emit(&self, event: Iax2Event) {
        if self.ctx.events.send(event).is_err() {
            trace!(call = %self.id, "event receiver dropped");
        }
    }
}

/// Every full frame is acknowledged except acknowledgements, probes and their kin
fn needs_ack(frame: &FullFrame) -> bool {
    !matches!(
        frame.protocol_subclass(),
        Some(ProtocolSubclass::Ack)
            | Some(ProtocolSubclass::Inval)
            | Some(ProtocolSubclass::Vnak)
            | Some(ProtocolSubclass::Ping)
            | Some(ProtocolSubclass::LagRq)
    )
}
