//! End-to-end call flows between two endpoints on the loopback interface

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{expect_event, init_test_logging, loopback_config, start};
use rvoip_iax2_core::frame::{FullFrame, FullFrameBody, ProtocolSubclass};
use rvoip_iax2_core::ie::IeData;
use rvoip_iax2_core::prelude::*;
use tokio::net::UdpSocket;

/// Answer the incoming call on `callee` and wait until both sides are established
async fn connect(
    caller: &Iax2Endpoint,
    caller_events: &mut tokio::sync::mpsc::UnboundedReceiver<Iax2Event>,
    callee: &Iax2Endpoint,
    callee_events: &mut tokio::sync::mpsc::UnboundedReceiver<Iax2Event>,
) -> (CallId, CallId) {
    let outgoing = caller
        .make_call(callee.local_addr().unwrap(), "100")
        .unwrap();

    let incoming = match expect_event(callee_events, |e| matches!(e, Iax2Event::IncomingCall { .. })).await {
        Iax2Event::IncomingCall { call_id, .. } => call_id,
        _ => unreachable!(),
    };
    expect_event(caller_events, |e| matches!(e, Iax2Event::CallAlerting { .. })).await;

    callee.answer(incoming).unwrap();
    expect_event(caller_events, |e| matches!(e, Iax2Event::CallEstablished { .. })).await;
    expect_event(callee_events, |e| matches!(e, Iax2Event::CallEstablished { .. })).await;
    (outgoing, incoming)
}

#[tokio::test]
async fn test_basic_call_media_and_hangup() {
    init_test_logging();
    let (alice, mut alice_events) = start(loopback_config().local_number("2000").local_name("Alice")).await;
    let (bob, mut bob_events) = start(loopback_config().local_number("3000")).await;

    let outgoing = alice.make_call(bob.local_addr().unwrap(), "3000").unwrap();

    match expect_event(&mut bob_events, |e| matches!(e, Iax2Event::IncomingCall { .. })).await {
        Iax2Event::IncomingCall {
            calling_number,
            calling_name,
            called_number,
            codec,
            connection_token,
            ..
        } => {
            assert_eq!(calling_number.as_deref(), Some("2000"));
            assert_eq!(calling_name.as_deref(), Some("Alice"));
            assert_eq!(called_number.as_deref(), Some("3000"));
            assert_eq!(codec, Codec::Ulaw);
            assert_eq!(connection_token, format!("iax2:127.0.0.1-{}", outgoing.call_number()));
        }
        _ => unreachable!(),
    }
    let incoming = bob.active_calls()[0];

    match expect_event(&mut alice_events, |e| matches!(e, Iax2Event::CallSetUp { .. })).await {
        Iax2Event::CallSetUp { call_id, codec } => {
            assert_eq!(call_id, outgoing);
            assert_eq!(codec, Codec::Ulaw);
        }
        _ => unreachable!(),
    }
    expect_event(&mut alice_events, |e| matches!(e, Iax2Event::CallAlerting { .. })).await;

    bob.answer(incoming).unwrap();
    expect_event(&mut alice_events, |e| matches!(e, Iax2Event::CallConnected { .. })).await;
    expect_event(&mut alice_events, |e| matches!(e, Iax2Event::CallEstablished { .. })).await;
    expect_event(&mut bob_events, |e| matches!(e, Iax2Event::CallEstablished { .. })).await;

    // first chunk goes out as a full voice frame, the second as a mini frame
    alice.send_audio(outgoing, Bytes::from(vec![0xFFu8; 160])).unwrap();
    alice.send_audio(outgoing, Bytes::from(vec![0x7Fu8; 160])).unwrap();
    let first = match expect_event(&mut bob_events, |e| matches!(e, Iax2Event::AudioReceived { .. })).await {
        Iax2Event::AudioReceived { codec, timestamp, data, .. } => {
            assert_eq!(codec, Codec::Ulaw);
            assert_eq!(data.len(), 160);
            assert_eq!(data[0], 0xFF);
            timestamp
        }
        _ => unreachable!(),
    };
    match expect_event(&mut bob_events, |e| matches!(e, Iax2Event::AudioReceived { .. })).await {
        Iax2Event::AudioReceived { timestamp, data, .. } => {
            assert_eq!(data[0], 0x7F);
            assert!(timestamp >= first + 20, "{} then {}", first, timestamp);
        }
        _ => unreachable!(),
    }

    alice.send_dtmf(outgoing, '5').unwrap();
    match expect_event(&mut bob_events, |e| matches!(e, Iax2Event::DtmfReceived { .. })).await {
        Iax2Event::DtmfReceived { call_id, digit } => {
            assert_eq!(call_id, incoming);
            assert_eq!(digit, '5');
        }
        _ => unreachable!(),
    }

    bob.send_text(incoming, "hello alice").unwrap();
    match expect_event(&mut alice_events, |e| matches!(e, Iax2Event::TextReceived { .. })).await {
        Iax2Event::TextReceived { text, .. } => assert_eq!(text, "hello alice"),
        _ => unreachable!(),
    }

    alice.hold(outgoing).unwrap();
    expect_event(&mut bob_events, |e| matches!(e, Iax2Event::CallHeld { .. })).await;
    alice.unhold(outgoing).unwrap();
    expect_event(&mut bob_events, |e| matches!(e, Iax2Event::CallResumed { .. })).await;

    alice.hangup(outgoing, "Normal clearing").unwrap();
    match expect_event(&mut bob_events, |e| matches!(e, Iax2Event::CallCleared { .. })).await {
        Iax2Event::CallCleared { call_id, reason } => {
            assert_eq!(call_id, incoming);
            assert_eq!(reason, "Normal clearing");
        }
        _ => unreachable!(),
    }
    expect_event(&mut alice_events, |e| matches!(e, Iax2Event::CallCleared { .. })).await;

    assert!(alice.active_calls().is_empty());
    assert!(bob.active_calls().is_empty());
    assert!(matches!(alice.answer(outgoing), Err(Error::CallNotFound(_))));

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_codec_mismatch_is_rejected() {
    init_test_logging();
    let (alice, mut alice_events) = start(loopback_config().codecs(vec![Codec::Gsm])).await;
    let (bob, mut bob_events) = start(loopback_config().codecs(vec![Codec::Ulaw])).await;

    alice.make_call(bob.local_addr().unwrap(), "100").unwrap();

    match expect_event(&mut alice_events, |e| matches!(e, Iax2Event::CallCleared { .. })).await {
        Iax2Event::CallCleared { reason, .. } => assert_eq!(reason, "Unable to negotiate codec"),
        _ => unreachable!(),
    }
    // the callee never rang
    match expect_event(&mut bob_events, |e| {
        matches!(e, Iax2Event::CallCleared { .. } | Iax2Event::IncomingCall { .. })
    })
    .await
    {
        Iax2Event::CallCleared { reason, .. } => assert_eq!(reason, "Unable to negotiate codec"),
        other => panic!("callee should not see the call: {:?}", other),
    }

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_preferred_codec_wins() {
    init_test_logging();
    let (alice, mut alice_events) = start(loopback_config().codecs(vec![Codec::Gsm, Codec::Ulaw])).await;
    let (bob, mut bob_events) = start(loopback_config().codecs(vec![Codec::Ulaw, Codec::Gsm])).await;

    alice.make_call(bob.local_addr().unwrap(), "100").unwrap();
    match expect_event(&mut bob_events, |e| matches!(e, Iax2Event::IncomingCall { .. })).await {
        Iax2Event::IncomingCall { codec, .. } => assert_eq!(codec, Codec::Gsm),
        _ => unreachable!(),
    }
    match expect_event(&mut alice_events, |e| matches!(e, Iax2Event::CallSetUp { .. })).await {
        Iax2Event::CallSetUp { codec, .. } => assert_eq!(codec, Codec::Gsm),
        _ => unreachable!(),
    }

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_md5_authentication_with_encryption() {
    init_test_logging();
    let (alice, mut alice_events) = start(
        loopback_config()
            .user_name("alice")
            .password("s3cret")
            .encryption(true),
    )
    .await;
    let (bob, mut bob_events) = start(loopback_config().password("s3cret").encryption(true)).await;

    let (outgoing, incoming) = connect(&alice, &mut alice_events, &bob, &mut bob_events).await;

    alice.send_dtmf(outgoing, '#').unwrap();
    match expect_event(&mut bob_events, |e| matches!(e, Iax2Event::DtmfReceived { .. })).await {
        Iax2Event::DtmfReceived { digit, .. } => assert_eq!(digit, '#'),
        _ => unreachable!(),
    }
    bob.send_audio(incoming, Bytes::from(vec![0x55u8; 160])).unwrap();
    bob.send_audio(incoming, Bytes::from(vec![0x56u8; 160])).unwrap();
    for expected in [0x55u8, 0x56] {
        match expect_event(&mut alice_events, |e| matches!(e, Iax2Event::AudioReceived { .. })).await {
            Iax2Event::AudioReceived { data, .. } => assert_eq!(data[0], expected),
            _ => unreachable!(),
        }
    }

    bob.hangup(incoming, "bye").unwrap();
    match expect_event(&mut alice_events, |e| matches!(e, Iax2Event::CallCleared { .. })).await {
        Iax2Event::CallCleared { reason, .. } => assert_eq!(reason, "bye"),
        _ => unreachable!(),
    }

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    init_test_logging();
    let (alice, mut alice_events) = start(loopback_config().password("guess")).await;
    let (bob, mut bob_events) = start(loopback_config().password("s3cret")).await;

    alice.make_call(bob.local_addr().unwrap(), "100").unwrap();
    match expect_event(&mut alice_events, |e| matches!(e, Iax2Event::CallCleared { .. })).await {
        Iax2Event::CallCleared { reason, .. } => assert_eq!(reason, "Authentication failed"),
        _ => unreachable!(),
    }
    match expect_event(&mut bob_events, |e| {
        matches!(e, Iax2Event::CallCleared { .. } | Iax2Event::IncomingCall { .. })
    })
    .await
    {
        Iax2Event::CallCleared { .. } => {}
        other => panic!("unauthenticated call reached the application: {:?}", other),
    }

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_call_token_challenge() {
    init_test_logging();
    let (alice, mut alice_events) = start(loopback_config()).await;
    let (bob, mut bob_events) = start(loopback_config().require_call_token(true)).await;

    let (outgoing, _incoming) = connect(&alice, &mut alice_events, &bob, &mut bob_events).await;
    alice.hangup(outgoing, "done").unwrap();
    expect_event(&mut bob_events, |e| matches!(e, Iax2Event::CallCleared { .. })).await;

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unanswered_new_is_retransmitted_then_times_out() {
    init_test_logging();
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (alice, mut alice_events) = start(loopback_config().no_response_timeout(Duration::from_millis(1500))).await;

    let call = alice.make_call(silent.local_addr().unwrap(), "100").unwrap();

    let mut buf = [0u8; 1500];
    let (len, from) = silent.recv_from(&mut buf).await.unwrap();
    let first = FullFrame::decode(&buf[..len], from).unwrap();
    assert!(first.is_protocol(ProtocolSubclass::New));
    assert!(!first.retransmitted);
    match &first.body {
        FullFrameBody::Protocol { ies, .. } => {
            let data = IeData::from_list(ies);
            assert_eq!(data.version, Some(2));
            assert_eq!(data.called_number.as_deref(), Some("100"));
            assert_eq!(data.call_token, Some(Bytes::new()));
        }
        _ => unreachable!(),
    }

    let (len, from) = tokio::time::timeout(Duration::from_secs(2), silent.recv_from(&mut buf))
        .await
        .expect("New is resent")
        .unwrap();
    let resent = FullFrame::decode(&buf[..len], from).unwrap();
    assert!(resent.retransmitted);
    assert_eq!(resent.timestamp, first.timestamp);
    assert_eq!(resent.remote.source_call_number, call.call_number());

    match expect_event(&mut alice_events, |e| matches!(e, Iax2Event::CallCleared { .. })).await {
        Iax2Event::CallCleared { call_id, reason } => {
            assert_eq!(call_id, call);
            assert_eq!(reason, "No answer");
        }
        _ => unreachable!(),
    }

    alice.shutdown().await.unwrap();
}
