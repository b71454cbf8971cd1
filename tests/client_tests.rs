#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Full-stack integration tests: socket.io client over the engine.io
//! layer with a scripted transport.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{handshake_frame, wait_until, ManualTimer, MockHandle, MockTransport};
use socketio_client::{
    Client, EmitOptions, EngineClient, Event, Payload, SocketError, Transport,
};

/// Client over a single polling-style mock transport whose handshake
/// carries `sid`.
fn scripted_client(sid: &str) -> (Client, MockHandle) {
    let (transport, handle) =
        MockTransport::polling_with_handshake(handshake_frame(sid, &[], 25000, 5000));
    let engine = EngineClient::builder()
        .with_raw_url("http://server.test/socket.io/")
        .with_transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_supported_transports(vec![transport as Arc<dyn Transport>])
        .build()
        .expect("engine builds");
    let client = Client::builder()
        .with_engine_client(engine)
        .build()
        .expect("client builds");
    (client, handle)
}

// ── Scenario: polling happy path ────────────────────────────────────

#[tokio::test]
async fn connect_handshake_namespace_connect_and_event_delivery() {
    let (client, handle) = scripted_client("abc");

    let connects = Arc::new(AtomicUsize::new(0));
    {
        let connects = Arc::clone(&connects);
        client.on("connect", move || {
            connects.fetch_add(1, Ordering::Relaxed);
        });
    }
    let hi_args: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
    {
        let hi_args = Arc::clone(&hi_args);
        client.on("hi", move |world: String| {
            hi_args.lock().unwrap().push(world);
        });
    }

    client.connect(CancellationToken::new()).await.unwrap();

    // The namespace Connect frame goes out once the engine handshake
    // lands; no local "connect" yet.
    wait_until("namespace connect sent", || {
        handle.sent().contains(&b"40".to_vec())
    })
    .await;
    assert_eq!(connects.load(Ordering::Relaxed), 0);
    assert!(!client.is_connected("/"));

    // Server acknowledges the namespace: local "connect" fires.
    handle.inject(b"40").await;
    wait_until("connect fired", || connects.load(Ordering::Relaxed) == 1).await;
    assert!(client.is_connected("/"));

    // Event traffic flows to the registered typed handler.
    handle.inject(b"42[\"hi\",\"world\"]").await;
    wait_until("hi handler invoked", || {
        hi_args.lock().unwrap().as_slice() == ["world"]
    })
    .await;

    // A repeated Open mid-session is tolerated without triggering a
    // second namespace connect.
    handle
        .inject(&handshake_frame("abc2", &[], 25000, 5000))
        .await;
    wait_until("sid refreshed", || client.engine().sid() == "abc2").await;

    // Exactly one Connect frame was sent for this connect() call.
    let connect_frames = handle
        .sent()
        .into_iter()
        .filter(|frame| frame == b"40")
        .count();
    assert_eq!(connect_frames, 1);
}

#[tokio::test]
async fn handshake_auth_data_rides_the_connect_frame() {
    let (client, handle) = scripted_client("abc");
    client
        .set_handshake_data(serde_json::json!({"token": "abc"}))
        .unwrap();

    client.connect(CancellationToken::new()).await.unwrap();

    wait_until("authed connect sent", || {
        handle.sent().contains(&b"40{\"token\":\"abc\"}".to_vec())
    })
    .await;
}

// ── Scenario: ack with success ──────────────────────────────────────

#[tokio::test]
async fn ack_resolves_the_handler_and_clears_the_entry() {
    let (client, handle) = scripted_client("abc");
    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    let replies: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
    let timeouts = Arc::new(AtomicUsize::new(0));
    {
        let replies = Arc::clone(&replies);
        let timeouts = Arc::clone(&timeouts);
        client
            .emit_with(
                "ping",
                EmitOptions::new()
                    .with_ack(move |reply: String| {
                        replies.lock().unwrap().push(reply);
                    })
                    .with_timeout(Duration::from_secs(30), move || {
                        timeouts.fetch_add(1, Ordering::Relaxed);
                    }),
            )
            .await
            .unwrap();
    }

    // Counter starts at 1 for this client.
    wait_until("event with ack id sent", || {
        handle.sent().contains(&b"421[\"ping\"]".to_vec())
    })
    .await;
    assert_eq!(client.pending_acks(), 1);

    handle.inject(b"431[\"pong\"]").await;
    wait_until("ack handler invoked", || {
        replies.lock().unwrap().as_slice() == ["pong"]
    })
    .await;
    assert_eq!(client.pending_acks(), 0);
    assert_eq!(timeouts.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn ack_without_timeout_is_resolved_from_the_table() {
    let (client, handle) = scripted_client("abc");
    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    let replies: Arc<StdMutex<Vec<(String, i64)>>> = Arc::new(StdMutex::new(Vec::new()));
    {
        let replies = Arc::clone(&replies);
        client
            .emit_with(
                "compute",
                EmitOptions::new().with_ack(move |op: String, result: i64| {
                    replies.lock().unwrap().push((op, result));
                }),
            )
            .await
            .unwrap();
    }

    handle.inject(b"431[\"square\",49]").await;
    wait_until("typed ack delivered", || {
        replies.lock().unwrap().as_slice() == [("square".to_string(), 49)]
    })
    .await;
    assert_eq!(client.pending_acks(), 0);
}

// ── Scenario: ack with timeout ──────────────────────────────────────

#[tokio::test]
async fn silent_server_fires_the_timeout_and_late_acks_are_ignored() {
    let (client, handle) = scripted_client("abc");
    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    let acked = Arc::new(AtomicUsize::new(0));
    let timeouts = Arc::new(AtomicUsize::new(0));
    {
        let acked = Arc::clone(&acked);
        let timeouts = Arc::clone(&timeouts);
        client
            .emit_with(
                "ping",
                EmitOptions::new()
                    .with_ack(move |_: Vec<Payload>| {
                        acked.fetch_add(1, Ordering::Relaxed);
                    })
                    .with_timeout(Duration::from_millis(50), move || {
                        timeouts.fetch_add(1, Ordering::Relaxed);
                    }),
            )
            .await
            .unwrap();
    }

    wait_until("timeout fired", || timeouts.load(Ordering::Relaxed) == 1).await;
    assert_eq!(client.pending_acks(), 0);

    // A late ack finds no callback and is ignored.
    handle.inject(b"431[\"late\"]").await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(acked.load(Ordering::Relaxed), 0);
    assert_eq!(client.pending_acks(), 0);
}

#[tokio::test]
async fn the_timer_seam_drives_ack_timeouts() {
    let timer = ManualTimer::new();
    let (transport, handle) =
        MockTransport::polling_with_handshake(handshake_frame("abc", &[], 25000, 5000));
    let engine = EngineClient::builder()
        .with_raw_url("http://server.test/socket.io/")
        .with_transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_supported_transports(vec![transport as Arc<dyn Transport>])
        .build()
        .unwrap();
    let client = Client::builder()
        .with_engine_client(engine)
        .with_timer(timer.clone())
        .build()
        .unwrap();

    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    let timeouts = Arc::new(AtomicUsize::new(0));
    {
        let timeouts = Arc::clone(&timeouts);
        client
            .emit_with(
                "ping",
                EmitOptions::new().with_timeout(Duration::from_secs(3600), move || {
                    timeouts.fetch_add(1, Ordering::Relaxed);
                }),
            )
            .await
            .unwrap();
    }

    assert_eq!(client.pending_acks(), 1);
    wait_until("timeout task armed", || {
        // The task registers with the manual timer before selecting.
        timer.fire();
        timeouts.load(Ordering::Relaxed) == 1
    })
    .await;
    assert_eq!(client.pending_acks(), 0);
}

// ── Scenario: connect error ─────────────────────────────────────────

#[tokio::test]
async fn connect_error_reaches_error_handlers_and_the_session_survives() {
    let (client, handle) = scripted_client("abc");

    let errors: Arc<StdMutex<Vec<serde_json::Value>>> = Arc::new(StdMutex::new(Vec::new()));
    let connects = Arc::new(AtomicUsize::new(0));
    let events = Arc::new(AtomicUsize::new(0));
    {
        let errors = Arc::clone(&errors);
        client.on("error", move |payload: serde_json::Value| {
            errors.lock().unwrap().push(payload);
        });
        let connects = Arc::clone(&connects);
        client.on("connect", move || {
            connects.fetch_add(1, Ordering::Relaxed);
        });
        let events = Arc::clone(&events);
        client.on("later", move || {
            events.fetch_add(1, Ordering::Relaxed);
        });
    }

    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    handle.inject(b"44{\"message\":\"bad auth\"}").await;
    wait_until("error handler invoked", || !errors.lock().unwrap().is_empty()).await;
    assert_eq!(
        errors.lock().unwrap()[0],
        serde_json::json!({"message": "bad auth"})
    );
    assert_eq!(connects.load(Ordering::Relaxed), 0);

    // The session keeps processing frames.
    handle.inject(b"42[\"later\"]").await;
    wait_until("later event delivered", || events.load(Ordering::Relaxed) == 1).await;
}

#[tokio::test]
async fn plain_text_connect_error_arrives_as_a_json_string() {
    let (client, handle) = scripted_client("abc");

    let errors: Arc<StdMutex<Vec<serde_json::Value>>> = Arc::new(StdMutex::new(Vec::new()));
    {
        let errors = Arc::clone(&errors);
        client.on("error", move |payload: serde_json::Value| {
            errors.lock().unwrap().push(payload);
        });
    }

    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    handle.inject(b"44Boom").await;
    wait_until("error handler invoked", || !errors.lock().unwrap().is_empty()).await;
    assert_eq!(errors.lock().unwrap()[0], serde_json::json!("Boom"));
}

// ── Binary isolation ────────────────────────────────────────────────

#[tokio::test]
async fn binary_packets_never_reach_user_handlers() {
    let (client, handle) = scripted_client("abc");

    let any_calls = Arc::new(AtomicUsize::new(0));
    {
        let any_calls = Arc::clone(&any_calls);
        client.on_any(move |_: Vec<Payload>| {
            any_calls.fetch_add(1, Ordering::Relaxed);
        });
    }

    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    // BinaryEvent and BinaryAck are dropped before dispatch.
    handle.inject(b"451-[\"file\",{\"_placeholder\":true,\"num\":0}]").await;
    handle.inject(b"461-[{\"_placeholder\":true,\"num\":0}]").await;
    // A plain event afterwards still arrives.
    handle.inject(b"42[\"plain\"]").await;

    wait_until("plain event delivered", || {
        any_calls.load(Ordering::Relaxed) == 1
    })
    .await;
}

// ── Namespaces and wildcard handlers ────────────────────────────────

#[tokio::test]
async fn namespaced_events_and_emits_use_the_namespace_prefix() {
    let (client, handle) = scripted_client("abc");

    let chat_messages: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
    {
        let chat_messages = Arc::clone(&chat_messages);
        client.on_ns("/chat", "message", move |text: String| {
            chat_messages.lock().unwrap().push(text);
        });
    }

    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    handle.inject(b"42/chat,[\"message\",\"hello\"]").await;
    wait_until("namespaced event delivered", || {
        chat_messages.lock().unwrap().as_slice() == ["hello"]
    })
    .await;

    client
        .emit_ns("/chat", ("message", "back"), EmitOptions::new())
        .await
        .unwrap();
    wait_until("namespaced emit sent", || {
        handle
            .sent()
            .contains(&b"42/chat,[\"message\",\"back\"]".to_vec())
    })
    .await;
}

#[tokio::test]
async fn wildcard_handlers_receive_the_event_name_first() {
    let (client, handle) = scripted_client("abc");

    let seen: Arc<StdMutex<Vec<(String, String)>>> = Arc::new(StdMutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        client.on_any(move |name: String, first: String| {
            seen.lock().unwrap().push((name, first));
        });
    }

    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    handle.inject(b"42[\"greeting\",\"hello\"]").await;
    wait_until("wildcard invoked", || {
        seen.lock().unwrap().as_slice() == [("greeting".to_string(), "hello".to_string())]
    })
    .await;
}

// ── Emit form errors ────────────────────────────────────────────────

#[tokio::test]
async fn mixed_event_forms_fail_synchronously() {
    let (client, _handle) = scripted_client("abc");
    let result = client
        .emit((Event::new("x").with_payload(&1).unwrap(), 2))
        .await;
    assert!(matches!(result, Err(SocketError::MixedEventForm)));
}

#[tokio::test]
async fn empty_event_names_fail_synchronously() {
    let (client, handle) = scripted_client("abc");
    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    let result = client.emit(Event::new("")).await;
    assert!(result.is_err());
}

// ── Ack id monotonicity across one session ──────────────────────────

#[tokio::test]
async fn ack_ids_are_assigned_in_increasing_order() {
    let (client, handle) = scripted_client("abc");
    client.connect(CancellationToken::new()).await.unwrap();
    wait_until("session up", || handle.sent().contains(&b"40".to_vec())).await;

    for _ in 0..3 {
        client
            .emit_with("seq", EmitOptions::new().with_ack(|_: Vec<Payload>| {}))
            .await
            .unwrap();
    }

    wait_until("three acked emits sent", || {
        let sent = handle.sent();
        sent.contains(&b"421[\"seq\"]".to_vec())
            && sent.contains(&b"422[\"seq\"]".to_vec())
            && sent.contains(&b"423[\"seq\"]".to_vec())
    })
    .await;
    assert_eq!(client.pending_acks(), 3);
}
