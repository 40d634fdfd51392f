//! End-to-end client tests against an in-process WebSocket server.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use voicewire::{
    ClientConfig, ClientError, ConnectionState, Frame, HeartbeatConfig, ReconnectConfig,
    TransportError, VoiceClient,
};

fn test_client(addr: SocketAddr, heartbeat: Duration) -> VoiceClient {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    VoiceClient::new(ClientConfig {
        endpoint: format!("ws://{addr}/session"),
        api_key: Some("test-key".to_string()),
        device_id: "aa:bb:cc:dd:ee:ff".to_string(),
        connect_timeout: Some(Duration::from_secs(2)),
        heartbeat: HeartbeatConfig {
            interval: heartbeat,
            probe_grace: Duration::from_millis(150),
        },
        reconnect: ReconnectConfig {
            base_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_attempts: 3,
            offline_poll_interval: Duration::from_millis(200),
            probe: None,
        },
        ..Default::default()
    })
    .expect("valid test configuration")
}

#[tokio::test]
async fn hello_reaches_server_before_any_heartbeat() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = seen_tx.send(serde_json::from_str(text.as_str()).unwrap());
            }
        }
    });

    let client = test_client(addr, Duration::from_millis(500));
    client.initialize().await.unwrap();
    client.send_hello().await.unwrap();

    let first = timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first["type"], "hello");
    assert_eq!(first["transport"], "websocket");
    assert_eq!(first["audio_params"]["sample_rate"], 16000);

    client.destroy().await;
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let client = test_client(addr, Duration::from_secs(30));
    client.initialize().await.unwrap();
    client.initialize().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    // A second initialize must not open a second socket.
    assert_eq!(client.metrics().total_connections, 1);

    client.destroy().await;
}

#[tokio::test]
async fn inbound_frames_are_classified_by_precedence() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        for frame in [
            json!({"type": "hello", "session_id": "sess-1",
                   "audio_params": {"format": "opus", "sample_rate": 16000,
                                    "channels": 1, "frame_duration": 60}}),
            json!({"type": "chat", "text": "hi there"}),
            json!({"type": "mcp", "session_id": "sess-1",
                   "payload": {"jsonrpc": "2.0", "id": 3, "method": "tools/call",
                               "params": {"name": "set_volume", "arguments": {"level": 4}}}}),
            json!({"type": "iot", "commands": [{"name": "Lamp", "method": "on"}]}),
        ] {
            ws.send(Message::Text(frame.to_string().into())).await.unwrap();
        }
        // Keep the connection open while the client consumes.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = test_client(addr, Duration::from_secs(30));

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Frame>();
    let (tool_tx, mut tool_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Frame>();
    client.on_message(move |frame| {
        let tx = msg_tx.clone();
        async move {
            let _ = tx.send(frame);
        }
    });
    client.on_tool_call(move |call| {
        let tx = tool_tx.clone();
        async move {
            let _ = tx.send(call);
        }
    });
    client.on_event(move |frame| {
        let tx = event_tx.clone();
        async move {
            let _ = tx.send(frame);
        }
    });

    client.initialize().await.unwrap();

    // Hello has no dedicated classification and falls back to message.
    let hello = timeout(Duration::from_secs(2), msg_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(hello, Frame::Hello { .. }));

    let chat = timeout(Duration::from_secs(2), msg_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match chat {
        Frame::Chat { text, .. } => assert_eq!(text, "hi there"),
        other => panic!("expected chat, got {other:?}"),
    }

    let call = timeout(Duration::from_secs(2), tool_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call.name, "set_volume");
    assert_eq!(call.arguments["level"], 4);
    assert_eq!(call.session_id.as_deref(), Some("sess-1"));

    let event = timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, Frame::Iot { .. }));

    // The server hello's session id is recorded on the connection.
    assert_eq!(client.snapshot().session_id.as_deref(), Some("sess-1"));

    client.destroy().await;
}

#[tokio::test]
async fn silent_server_triggers_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<u32>();
    tokio::spawn(async move {
        let mut count = 0u32;
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            count += 1;
            let _ = conn_tx.send(count);
            tokio::spawn(async move {
                // Accept the handshake but never answer anything.
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let client = test_client(addr, Duration::from_millis(200));
    client.initialize().await.unwrap();

    let first = timeout(Duration::from_secs(2), conn_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, 1);

    // The heartbeat re-probe finds the server silent; the client tears the
    // connection down and reconnects.
    let second = timeout(Duration::from_secs(5), conn_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, 2);

    client.destroy().await;
}

#[tokio::test]
async fn manual_disconnect_suppresses_reconnection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<u32>();
    tokio::spawn(async move {
        let mut count = 0u32;
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            count += 1;
            let _ = conn_tx.send(count);
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
                // Socket dropped here once the client goes away.
            });
        }
    });

    let client = test_client(addr, Duration::from_secs(30));
    client.initialize().await.unwrap();
    let first = timeout(Duration::from_secs(2), conn_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, 1);

    client.disconnect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    // The server observes the close; with a 100 ms reconnect base, any
    // reconnect attempt would show up well within this window.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(conn_rx.try_recv().is_err());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert!(!client.is_connected());

    client.destroy().await;
}

#[tokio::test]
async fn exhausted_reconnects_end_in_error_state() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Close immediately and stop listening so reconnects are refused.
        drop(ws);
        drop(listener);
    });

    let client = test_client(addr, Duration::from_secs(30));
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    client.on_error(move |error| {
        let tx = err_tx.clone();
        async move {
            let _ = tx.send(error);
        }
    });
    client.initialize().await.unwrap();
    server.await.unwrap();

    let exhausted = timeout(Duration::from_secs(10), async {
        while let Some(error) = err_rx.recv().await {
            if matches!(
                error,
                ClientError::Transport(TransportError::RetriesExhausted { .. })
            ) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(exhausted);
    assert_eq!(client.connection_state(), ConnectionState::Error);

    client.destroy().await;
}

#[tokio::test]
async fn audio_frames_are_binary_with_v3_header() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (bin_tx, mut bin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Binary(data) = msg {
                let _ = bin_tx.send(data.to_vec());
            }
        }
    });

    let client = test_client(addr, Duration::from_secs(30));
    client.initialize().await.unwrap();

    let payload = bytes::Bytes::from(vec![0xABu8; 10]);
    client.send_audio_data(payload, Some(3)).await.unwrap();

    let framed = timeout(Duration::from_secs(2), bin_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(framed.len(), 14);
    assert_eq!(u16::from_be_bytes([framed[2], framed[3]]), 10);
    assert_eq!(&framed[4..], vec![0xABu8; 10].as_slice());

    client.destroy().await;
}

#[tokio::test]
async fn undecodable_text_is_dropped_without_breaking_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text("not json at all".to_string().into()))
            .await
            .unwrap();
        ws.send(Message::Text(
            json!({"type": "chat", "text": "still alive"}).to_string().into(),
        ))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = test_client(addr, Duration::from_secs(30));
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Frame>();
    client.on_message(move |frame| {
        let tx = msg_tx.clone();
        async move {
            let _ = tx.send(frame);
        }
    });
    client.initialize().await.unwrap();

    let frame = timeout(Duration::from_secs(2), msg_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match frame {
        Frame::Chat { text, .. } => assert_eq!(text, "still alive"),
        other => panic!("expected chat, got {other:?}"),
    }
    assert!(client.is_connected());

    client.destroy().await;
}
