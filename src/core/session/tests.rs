use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::test_support::{ScriptedConnector, ScriptedTransport};
use super::*;
use crate::auth::{AuthError, StaticToken};

const START: &str = r#"{"action":"start","content-type":"audio/l16;rate=16000"}"#;
const STOP: &str = r#"{"action":"stop"}"#;

fn endpoint() -> SessionEndpoint {
    SessionEndpoint {
        url: "wss://stt.example.test/v1/recognize?model=en-US_BroadbandModel".to_string(),
        initial_control: OutboundFrame::text(START),
        terminal_control: OutboundFrame::text(STOP),
    }
}

async fn open_session(
    transport: &Arc<ScriptedTransport>,
    config: SessionConfig,
) -> (
    StreamSession<Value>,
    mpsc::UnboundedReceiver<SessionEvent<Value>>,
) {
    let connector = ScriptedConnector::new(transport.clone());
    let (tx, rx) = mpsc::unbounded_channel();
    let session = SessionBuilder::new(JsonDecoder::<Value>::new())
        .config(config)
        .observer(channel_observer(tx))
        .connect(&connector, &StaticToken::new("tok"), endpoint())
        .await
        .unwrap();
    (session, rx)
}

fn drain_events(rx: &mut mpsc::UnboundedReceiver<SessionEvent<Value>>) -> Vec<SessionEvent<Value>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn closed_events(events: &[SessionEvent<Value>]) -> Vec<Termination> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Closed(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

fn text_of(frame: &OutboundFrame) -> &str {
    std::str::from_utf8(&frame.payload).unwrap()
}

async fn wait_for_state(session: &StreamSession<Value>, state: SessionState) {
    let mut changes = session.state_changes();
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .unwrap();
}

// =============================================================================
// Connect
// =============================================================================

#[tokio::test]
async fn test_connect_sends_bearer_header_and_starts_streaming() {
    let transport = ScriptedTransport::new();
    let connector = ScriptedConnector::new(transport.clone());
    let session = SessionBuilder::new(JsonDecoder::<Value>::new())
        .connect(&connector, &StaticToken::new("tok"), endpoint())
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Streaming);
    assert!(session.is_request_open());

    let requests = connector.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].0.starts_with("wss://stt.example.test/v1/recognize"));
    assert!(
        requests[0]
            .1
            .contains(&("Authorization".to_string(), "Bearer tok".to_string()))
    );

    session.close().await;
}

#[tokio::test]
async fn test_rejected_handshake_is_a_connection_error() {
    let transport = ScriptedTransport::new();
    let connector = ScriptedConnector::new(transport.clone());
    connector.reject_with(401);

    let result = SessionBuilder::new(JsonDecoder::<Value>::new())
        .connect(&connector, &StaticToken::new("bad"), endpoint())
        .await;

    match result {
        Err(SessionError::Connection(TransportError::Rejected { status, .. })) => {
            assert_eq!(status, 401)
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_missing_credential_fails_before_opening() {
    let transport = ScriptedTransport::new();
    let connector = ScriptedConnector::new(transport.clone());

    let result = SessionBuilder::new(JsonDecoder::<Value>::new())
        .connect(&connector, &StaticToken::new(""), endpoint())
        .await;

    assert!(matches!(
        result,
        Err(SessionError::Credential(AuthError::Missing(_)))
    ));
    assert!(connector.requests().is_empty());
}

// =============================================================================
// Outbound ordering
// =============================================================================

#[tokio::test]
async fn test_frames_are_sent_in_enqueue_order_bracketed_by_control_messages() {
    let transport = ScriptedTransport::new();
    let (session, mut events) = open_session(&transport, SessionConfig::default()).await;

    for i in 0..100u8 {
        session.send_audio(vec![i; 4]).unwrap();
    }
    let termination = session.close().await;

    assert_eq!(termination, Termination::Normal);
    assert_eq!(session.state(), SessionState::Closed);

    let sent = transport.sent();
    assert_eq!(sent.len(), 102);
    assert_eq!(text_of(&sent[0]), START);
    for (i, frame) in sent[1..101].iter().enumerate() {
        assert_eq!(frame.kind, FrameKind::Binary);
        assert_eq!(&frame.payload[..], &[i as u8; 4]);
    }
    assert_eq!(text_of(&sent[101]), STOP);

    assert_eq!(transport.closes(), vec![CloseReason::normal()]);
    assert_eq!(
        closed_events(&drain_events(&mut events)),
        vec![Termination::Normal]
    );
}

#[tokio::test]
async fn test_initial_control_precedes_immediate_writes() {
    let transport = ScriptedTransport::new();
    transport.set_send_delay(Duration::from_millis(5));
    let (session, _events) = open_session(&transport, SessionConfig::default()).await;

    session.send_audio(Bytes::from_static(b"pcm")).unwrap();
    session.close().await;

    let sent = transport.sent();
    assert_eq!(text_of(&sent[0]), START);
    assert_eq!(&sent[1].payload[..], b"pcm");
}

#[tokio::test]
async fn test_empty_audio_is_ignored() {
    let transport = ScriptedTransport::new();
    let (session, _events) = open_session(&transport, SessionConfig::default()).await;

    session.send_audio(Bytes::new()).unwrap();
    session.close().await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|f| !f.is_empty()));
}

#[tokio::test]
async fn test_writes_after_close_are_rejected() {
    let transport = ScriptedTransport::new();
    let (session, _events) = open_session(&transport, SessionConfig::default()).await;
    session.close().await;

    let err = session.send_audio(vec![1u8, 2, 3]).unwrap_err();
    assert!(matches!(err, SessionError::NotStreaming(SessionState::Closed)));
    assert!(session.stop().is_ok(), "no open request after close");
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn test_stop_then_close_sends_stop_once() {
    let transport = ScriptedTransport::new();
    let (session, _events) = open_session(&transport, SessionConfig::default()).await;

    session.send_audio(vec![0u8; 8]).unwrap();
    session.stop().unwrap();
    assert!(!session.is_request_open());
    session.stop().unwrap();
    session.close().await;

    let stops = transport
        .sent()
        .iter()
        .filter(|f| f.kind == FrameKind::Text && text_of(f) == STOP)
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn test_new_request_on_same_connection() {
    let transport = ScriptedTransport::new();
    let (session, _events) = open_session(&transport, SessionConfig::default()).await;

    session.send_audio(vec![1u8]).unwrap();
    session.stop().unwrap();
    session.start_request(OutboundFrame::text(START)).unwrap();
    assert!(session.is_request_open());
    session.send_audio(vec![2u8]).unwrap();
    session.close().await;

    let sent: Vec<String> = transport
        .sent()
        .iter()
        .map(|f| match f.kind {
            FrameKind::Text => text_of(f).to_string(),
            FrameKind::Binary => format!("audio:{}", f.payload[0]),
        })
        .collect();
    assert_eq!(
        sent,
        vec![START, "audio:1", STOP, START, "audio:2", STOP]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_is_idempotent_under_concurrency() {
    let transport = ScriptedTransport::new();
    let (session, mut events) = open_session(&transport, SessionConfig::default()).await;
    session.send_audio(vec![9u8; 16]).unwrap();

    let (first, second) = tokio::join!(session.close(), session.close());
    let third = session.close().await;

    assert_eq!(first, Termination::Normal);
    assert_eq!(second, Termination::Normal);
    assert_eq!(third, Termination::Normal);
    assert_eq!(transport.closes().len(), 1);
    assert_eq!(closed_events(&drain_events(&mut events)).len(), 1);

    let stops = transport
        .sent()
        .iter()
        .filter(|f| f.kind == FrameKind::Text && text_of(f) == STOP)
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_bounded_when_peer_stalls() {
    let transport = ScriptedTransport::new();
    transport.stall_sends();
    transport.ignore_close();
    let config = SessionConfig {
        drain_timeout: Duration::from_secs(30),
        close_timeout: Duration::from_secs(5),
        receiver_exit_timeout: Duration::from_secs(30),
        ..SessionConfig::default()
    };
    let (session, mut events) = open_session(&transport, config).await;
    session.send_audio(vec![0u8; 32]).unwrap();

    let started = tokio::time::Instant::now();
    let termination = session.close().await;
    let elapsed = started.elapsed();

    assert_eq!(termination, Termination::Cancelled);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(elapsed >= Duration::from_secs(60), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(70), "elapsed {elapsed:?}");
    assert!(transport.sent().is_empty());
    assert_eq!(
        closed_events(&drain_events(&mut events)),
        vec![Termination::Cancelled]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drop_without_close_shuts_down_gracefully() {
    let transport = ScriptedTransport::new();
    let (session, mut events) = open_session(&transport, SessionConfig::default()).await;
    session.send_audio(Bytes::from_static(b"pcm")).unwrap();
    let state = session.state_changes();

    drop(session);

    assert_eq!(*state.borrow(), SessionState::Closed);
    let sent = transport.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(text_of(&sent[0]), START);
    assert_eq!(&sent[1].payload[..], b"pcm");
    assert_eq!(text_of(&sent[2]), STOP);
    assert_eq!(transport.closes(), vec![CloseReason::normal()]);
    assert_eq!(
        closed_events(&drain_events(&mut events)),
        vec![Termination::Normal]
    );
}

#[tokio::test]
async fn test_drop_on_current_thread_runtime_aborts_loops() {
    let transport = ScriptedTransport::new();
    let (session, mut events) = open_session(&transport, SessionConfig::default()).await;
    let state = session.state_changes();

    drop(session);

    assert_eq!(*state.borrow(), SessionState::Closed);
    assert!(transport.closes().is_empty());
    assert!(closed_events(&drain_events(&mut events)).is_empty());
}

// =============================================================================
// Inbound
// =============================================================================

#[tokio::test]
async fn test_fragmented_message_is_dispatched_once() {
    let transport = ScriptedTransport::new();
    let (session, mut events) = open_session(&transport, SessionConfig::default()).await;

    transport.push_frame(FrameKind::Text, Bytes::from_static(b"{\"resu"), false);
    transport.push_frame(FrameKind::Text, Bytes::from_static(b"lts\":[],\"result_"), false);
    transport.push_frame(FrameKind::Text, Bytes::from_static(b"index\":0}"), true);

    match events.recv().await {
        Some(SessionEvent::Message(value)) => {
            assert_eq!(value, json!({"results": [], "result_index": 0}))
        }
        other => panic!("unexpected event: {other:?}"),
    }

    session.close().await;
    let rest = drain_events(&mut events);
    assert_eq!(rest.len(), 1);
    assert!(matches!(rest[0], SessionEvent::Closed(Termination::Normal)));
}

#[tokio::test]
async fn test_messages_are_delivered_in_arrival_order() {
    let transport = ScriptedTransport::new();
    let (session, mut events) = open_session(&transport, SessionConfig::default()).await;

    for i in 0..20 {
        transport.push_text(&format!("{{\"seq\":{i}}}"));
    }
    for i in 0..20 {
        match events.recv().await {
            Some(SessionEvent::Message(value)) => assert_eq!(value["seq"], i),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    session.close().await;
}

#[tokio::test]
async fn test_decode_failure_does_not_end_session() {
    let transport = ScriptedTransport::new();
    let (session, mut events) = open_session(&transport, SessionConfig::default()).await;

    transport.push_text("{not json");
    transport.push_text(r#"{"state":"listening"}"#);

    match events.recv().await {
        Some(SessionEvent::DecodeFailed { raw, .. }) => {
            assert_eq!(raw.as_text().unwrap(), "{not json")
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match events.recv().await {
        Some(SessionEvent::Message(value)) => assert_eq!(value["state"], "listening"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(session.close().await, Termination::Normal);
}

#[tokio::test]
async fn test_oversize_message_closes_session_abnormally() {
    let transport = ScriptedTransport::new();
    let config = SessionConfig {
        max_message_size: 16,
        ..SessionConfig::default()
    };
    let (session, mut events) = open_session(&transport, config).await;

    transport.push_frame(FrameKind::Text, Bytes::from_static(b"{\"results\":"), false);
    transport.push_frame(FrameKind::Text, Bytes::from_static(b"[1,2,3]}"), true);
    transport.push_text("{}");

    wait_for_state(&session, SessionState::Closed).await;
    assert!(matches!(
        session.send_audio(vec![1u8]),
        Err(SessionError::NotStreaming(SessionState::Closed))
    ));

    let termination = session.close().await;
    assert_eq!(termination, Termination::PayloadTooLarge { size: 19, max: 16 });
    assert_eq!(transport.closes(), vec![CloseReason::payload_too_large()]);

    let events = drain_events(&mut events);
    assert_eq!(events.len(), 1, "no message dispatched after the overflow");
    assert_eq!(closed_events(&events), vec![termination]);
}

#[tokio::test]
async fn test_peer_close_ends_session() {
    let transport = ScriptedTransport::new();
    let (session, mut events) = open_session(&transport, SessionConfig::default()).await;

    let reason = CloseReason::new(CloseCode::Away, "session timed out");
    transport.push_close(Some(reason.clone()));

    wait_for_state(&session, SessionState::Closed).await;
    let termination = session.close().await;
    assert_eq!(termination, Termination::RemoteClosed(Some(reason)));
    assert!(transport.closes().is_empty());
    assert_eq!(
        closed_events(&drain_events(&mut events)),
        vec![termination]
    );
}

#[tokio::test]
async fn test_receive_error_ends_session() {
    let transport = ScriptedTransport::new();
    let (session, _events) = open_session(&transport, SessionConfig::default()).await;

    transport.push_error(TransportError::Receive("connection reset".into()));

    wait_for_state(&session, SessionState::Closed).await;
    assert!(matches!(
        session.close().await,
        Termination::ReceiveFailed(_)
    ));
}

#[tokio::test]
async fn test_send_failure_ends_session() {
    let transport = ScriptedTransport::new();
    transport.fail_sends_after(1);
    let (session, mut events) = open_session(&transport, SessionConfig::default()).await;

    session.send_audio(vec![1u8; 10]).unwrap();
    wait_for_state(&session, SessionState::Closed).await;

    assert!(matches!(
        session.send_audio(vec![2u8]),
        Err(SessionError::NotStreaming(SessionState::Closed))
    ));
    let termination = session.close().await;
    assert!(matches!(termination, Termination::SendFailed(_)));
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(
        closed_events(&drain_events(&mut events)),
        vec![termination]
    );
}

#[tokio::test]
async fn test_observer_added_after_connect_sees_later_events() {
    let transport = ScriptedTransport::new();
    let (session, _events) = open_session(&transport, SessionConfig::default()).await;

    let (tx, mut late) = mpsc::unbounded_channel();
    session.subscribe(channel_observer(tx));
    transport.push_text(r#"{"n":1}"#);

    match late.recv().await {
        Some(SessionEvent::Message(value)) => assert_eq!(value["n"], 1),
        other => panic!("unexpected event: {other:?}"),
    }
    session.close().await;
}
