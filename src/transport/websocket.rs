//! WebSocket transport.
//!
//! One background task owns the socket for its whole lifetime: an outer
//! loop drives reconnection with exponential backoff, an inner pump
//! multiplexes outbound frames, inbound traffic and the heartbeat timer
//! over a single `select!`. The public methods only touch shared state and
//! channels, so they never block on the network.
//!
//! Liveness is heartbeat-based: a heartbeat frame goes out every interval,
//! and when two full intervals pass with no inbound traffic the next
//! heartbeat doubles as a re-probe with a short grace deadline. A silent
//! connection is torn down and re-established rather than trusted.
//! Staleness is judged from any inbound traffic, not heartbeat responses
//! alone: any frame from the server proves the link alive.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::Request;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant as TokioInstant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::{MAX_PENDING_MESSAGES, MAX_PENDING_MESSAGE_AGE};
use crate::error::{classify_error, ErrorKind, TransportError, TransportResult};
use crate::protocol::{
    decode_audio_frame, encode_audio_frame, BinaryProtocolVersion, Frame, ProtocolCodec,
};
use crate::transport::{
    ConnectionMetrics, ConnectionSnapshot, ConnectionState, PendingMessage, Transport,
    TransportConfig, TransportEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Backpressure bound on frames queued toward the connection task.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Frame handed from the public send methods to the connection task.
enum Outbound {
    Text(String),
    Binary(Bytes),
}

/// State shared between the transport handle and its connection task.
struct Shared {
    snapshot: Mutex<ConnectionSnapshot>,
    pending: Mutex<VecDeque<PendingMessage>>,
    metrics: Mutex<ConnectionMetrics>,
    connected: AtomicBool,
    connecting: AtomicBool,
    manual_disconnect: AtomicBool,
    reconnect_attempts: AtomicU32,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let mut snapshot = self.snapshot.lock();
        snapshot.state = state;
        snapshot.connected = state == ConnectionState::Connected;
        if state != ConnectionState::Connected {
            snapshot.connect_time = None;
        }
    }

    fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        {
            let mut snapshot = self.snapshot.lock();
            snapshot.state = ConnectionState::Connected;
            snapshot.connected = true;
            snapshot.connect_time = Some(SystemTime::now());
            snapshot.last_error = None;
        }
        self.metrics.lock().successful_connections += 1;
    }

    fn record_error(&self, error: &TransportError) {
        self.snapshot.lock().last_error = Some((error.kind(), error.to_string()));
    }

    fn emit(&self, event: TransportEvent) {
        // The receiver may have been dropped by the orchestrator; events are
        // then discarded.
        let _ = self.events.send(event);
    }
}

/// How the inner pump ended.
enum PumpEnd {
    /// Outbound channel closed by a manual disconnect.
    Manual,
    /// Connection died; reconnection may follow.
    Dead(TransportError),
}

/// WebSocket [`Transport`] with automatic reconnection, heartbeat liveness
/// and a bounded pending queue for frames sent during an outage.
pub struct WebSocketTransport {
    shared: Arc<Shared>,
    config: Mutex<Option<TransportConfig>>,
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                snapshot: Mutex::new(ConnectionSnapshot::default()),
                pending: Mutex::new(VecDeque::new()),
                metrics: Mutex::new(ConnectionMetrics::default()),
                connected: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                manual_disconnect: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                events: events_tx,
            }),
            config: Mutex::new(None),
            outbound: Mutex::new(None),
            task: Mutex::new(None),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    fn outbound_sender(&self) -> TransportResult<mpsc::Sender<Outbound>> {
        self.outbound.lock().clone().ok_or(TransportError::NotConnected)
    }

    /// Drain the pending queue through the live connection, oldest first,
    /// discarding entries past the age window.
    async fn drain_pending(
        &self,
        codec: &Arc<dyn ProtocolCodec>,
        sender: &mpsc::Sender<Outbound>,
    ) -> TransportResult<()> {
        loop {
            let next = self.shared.pending.lock().pop_front();
            let Some(pending) = next else {
                return Ok(());
            };
            if pending.is_stale(MAX_PENDING_MESSAGE_AGE) {
                tracing::debug!(
                    frame_type = pending.frame.frame_type(),
                    "dropping stale pending frame"
                );
                continue;
            }
            let text = codec.encode(&pending.frame)?;
            sender
                .send(Outbound::Text(text))
                .await
                .map_err(|_| TransportError::SendFailed("connection task stopped".to_string()))?;
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, config: TransportConfig) -> TransportResult<()> {
        if self.shared.connected.load(Ordering::SeqCst)
            || self.shared.connecting.load(Ordering::SeqCst)
            || self.shared.snapshot.lock().state == ConnectionState::Reconnecting
        {
            tracing::debug!("connect called while connection is active, ignoring");
            return Ok(());
        }

        self.shared.connecting.store(true, Ordering::SeqCst);
        self.shared.manual_disconnect.store(false, Ordering::SeqCst);
        self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting);
        self.shared.metrics.lock().total_connections += 1;

        let result = open_socket(&config).await;
        self.shared.connecting.store(false, Ordering::SeqCst);

        let ws = match result {
            Ok(ws) => ws,
            Err(err) => {
                // The initial attempt surfaces its error to the caller;
                // automatic reconnection only covers established connections.
                self.shared.metrics.lock().failed_connections += 1;
                self.shared.record_error(&err);
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        self.shared.mark_connected();
        *self.config.lock() = Some(config.clone());

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        *self.outbound.lock() = Some(outbound_tx);
        let handle = tokio::spawn(run_connection(
            Arc::clone(&self.shared),
            config,
            outbound_rx,
            ws,
        ));
        *self.task.lock() = Some(handle);

        self.shared.emit(TransportEvent::Connected);
        tracing::info!("websocket connected");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.shared.manual_disconnect.store(true, Ordering::SeqCst);

        // Dropping the sender stops the pump; aborting covers a task parked
        // in a reconnect backoff sleep.
        drop(self.outbound.lock().take());
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.shared.pending.lock().clear();

        let was_active = self.shared.connected.swap(false, Ordering::SeqCst)
            || self.shared.snapshot.lock().state != ConnectionState::Disconnected;
        self.shared.set_state(ConnectionState::Disconnected);
        if was_active {
            self.shared.emit(TransportEvent::Disconnected {
                reason: "client disconnect".to_string(),
            });
            tracing::info!("websocket disconnected");
        }
        Ok(())
    }

    async fn send_frame(&self, frame: Frame) -> TransportResult<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            let codec = self
                .config
                .lock()
                .as_ref()
                .map(|c| Arc::clone(&c.codec))
                .ok_or(TransportError::NotConnected)?;
            let sender = self.outbound_sender()?;
            // Frames parked by a send that raced a completing reconnect go
            // out first, in FIFO order.
            self.drain_pending(&codec, &sender).await?;
            let text = codec.encode(&frame)?;
            return sender
                .send(Outbound::Text(text))
                .await
                .map_err(|_| TransportError::SendFailed("connection task stopped".to_string()));
        }

        if self.shared.snapshot.lock().state == ConnectionState::Reconnecting {
            {
                let mut pending = self.shared.pending.lock();
                if pending.len() >= MAX_PENDING_MESSAGES {
                    tracing::warn!("pending queue full, dropping oldest frame");
                    pending.pop_front();
                }
                tracing::debug!(
                    frame_type = frame.frame_type(),
                    "queueing frame until reconnected"
                );
                pending.push_back(PendingMessage::new(frame));
            }
            // The reconnect may have completed between the state check and
            // the enqueue; drain now instead of waiting for the next outage.
            if self.shared.connected.load(Ordering::SeqCst) {
                let codec = self.config.lock().as_ref().map(|c| Arc::clone(&c.codec));
                if let (Some(codec), Ok(sender)) = (codec, self.outbound_sender()) {
                    self.drain_pending(&codec, &sender).await?;
                }
            }
            return Ok(());
        }

        Err(TransportError::NotConnected)
    }

    async fn send_hello(&self, frame: Frame) -> TransportResult<()> {
        tracing::debug!("sending session hello");
        self.send_frame(frame).await
    }

    async fn send_audio(
        &self,
        data: Bytes,
        version: Option<BinaryProtocolVersion>,
    ) -> TransportResult<()> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let configured = self
            .config
            .lock()
            .as_ref()
            .map(|c| c.protocol_version)
            .ok_or(TransportError::NotConnected)?;
        let framed = encode_audio_frame(&data, version.unwrap_or(configured));
        self.outbound_sender()?
            .send(Outbound::Binary(framed))
            .await
            .map_err(|_| TransportError::SendFailed("connection task stopped".to_string()))
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        self.shared.snapshot.lock().clone()
    }

    fn set_session_id(&self, session_id: Option<String>) {
        self.shared.snapshot.lock().session_id = session_id;
    }

    fn metrics(&self) -> ConnectionMetrics {
        self.shared.metrics.lock().clone()
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().take()
    }

    async fn destroy(&self) {
        let _ = self.disconnect().await;
        *self.config.lock() = None;
    }
}

/// Open the socket with the session handshake headers, under the configured
/// deadline.
async fn open_socket(config: &TransportConfig) -> TransportResult<WsStream> {
    let url = Url::parse(&config.url).map_err(|e| TransportError::ConnectionFailed {
        kind: ErrorKind::Unknown,
        message: format!("invalid endpoint url: {e}"),
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::ConnectionFailed {
            kind: ErrorKind::DnsResolutionFailed,
            message: "endpoint url has no host".to_string(),
        })?;
    let host_header = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let request = Request::builder()
        .uri(config.url.as_str())
        .header("Host", host_header)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key())
        .header("Authorization", format!("Bearer {}", config.auth_token))
        .header(
            "Protocol-Version",
            config.protocol_version.as_number().to_string(),
        )
        .header("Device-Id", config.device_id.as_str())
        .header("Client-Id", config.client_id.as_str())
        .body(())
        .map_err(|e| TransportError::ConnectionFailed {
            kind: ErrorKind::Unknown,
            message: format!("failed to build handshake request: {e}"),
        })?;

    match tokio::time::timeout(config.connect_timeout, connect_async(request)).await {
        Ok(Ok((stream, response))) => {
            tracing::debug!(status = %response.status(), "websocket handshake complete");
            Ok(stream)
        }
        Ok(Err(e)) => {
            let message = e.to_string();
            Err(TransportError::ConnectionFailed {
                kind: classify_error(&message),
                message,
            })
        }
        Err(_) => Err(TransportError::ConnectionFailed {
            kind: ErrorKind::NetworkTimeout,
            message: format!(
                "connection attempt timed out after {:?}",
                config.connect_timeout
            ),
        }),
    }
}

/// Outer connection loop: pump the live socket, then reconnect with backoff
/// until the budget runs out or a manual disconnect intervenes.
async fn run_connection(
    shared: Arc<Shared>,
    config: TransportConfig,
    mut outbound: mpsc::Receiver<Outbound>,
    first: WsStream,
) {
    let mut stream = first;
    loop {
        let end = pump(&shared, &config, stream, &mut outbound).await;
        shared.connected.store(false, Ordering::SeqCst);

        match end {
            PumpEnd::Manual => {
                shared.set_state(ConnectionState::Disconnected);
                return;
            }
            PumpEnd::Dead(err) => {
                if shared.manual_disconnect.load(Ordering::SeqCst) {
                    shared.set_state(ConnectionState::Disconnected);
                    return;
                }
                tracing::warn!(error = %err, "connection lost");
                shared.record_error(&err);
                shared.set_state(ConnectionState::Reconnecting);
                shared.emit(TransportEvent::Disconnected {
                    reason: err.to_string(),
                });
            }
        }

        stream = loop {
            if shared.manual_disconnect.load(Ordering::SeqCst) {
                shared.set_state(ConnectionState::Disconnected);
                return;
            }
            if !config.reconnect.is_online() {
                // Offline polling does not consume reconnect attempts.
                tracing::debug!("device offline, polling connectivity");
                tokio::time::sleep(config.reconnect.offline_poll_interval).await;
                continue;
            }

            let made = shared.reconnect_attempts.load(Ordering::SeqCst);
            if !config.reconnect.should_retry(made) {
                let err = TransportError::RetriesExhausted { attempts: made };
                tracing::error!(attempts = made, "reconnection budget exhausted");
                shared.record_error(&err);
                shared.set_state(ConnectionState::Error);
                shared.emit(TransportEvent::Error(err));
                return;
            }

            let attempt = made + 1;
            shared.reconnect_attempts.store(attempt, Ordering::SeqCst);
            let delay = config.reconnect.delay_for_attempt(attempt);
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnection attempt"
            );
            tokio::time::sleep(delay).await;
            if shared.manual_disconnect.load(Ordering::SeqCst) {
                shared.set_state(ConnectionState::Disconnected);
                return;
            }

            shared.metrics.lock().total_connections += 1;
            match open_socket(&config).await {
                Ok(ws) => {
                    shared.reconnect_attempts.store(0, Ordering::SeqCst);
                    shared.mark_connected();
                    shared.emit(TransportEvent::Connected);
                    tracing::info!(attempt, "reconnected");
                    break ws;
                }
                Err(err) => {
                    shared.metrics.lock().failed_connections += 1;
                    tracing::warn!(attempt, error = %err, "reconnection attempt failed");
                    shared.record_error(&err);
                }
            }
        };
    }
}

/// Inner loop over one established socket.
async fn pump(
    shared: &Arc<Shared>,
    config: &TransportConfig,
    stream: WsStream,
    outbound: &mut mpsc::Receiver<Outbound>,
) -> PumpEnd {
    let (mut sink, mut inbound) = stream.split();

    // Flush frames parked during the outage, oldest first; anything past the
    // age window is dropped.
    let parked: Vec<PendingMessage> = shared.pending.lock().drain(..).collect();
    let mut parked = parked.into_iter();
    while let Some(pending) = parked.next() {
        if pending.is_stale(MAX_PENDING_MESSAGE_AGE) {
            tracing::debug!(
                frame_type = pending.frame.frame_type(),
                "dropping stale pending frame"
            );
            continue;
        }
        let text = match config.codec.encode(&pending.frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode pending frame, dropping");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            let mut queue = shared.pending.lock();
            queue.push_back(pending);
            queue.extend(parked);
            return PumpEnd::Dead(TransportError::SendFailed(e.to_string()));
        }
    }

    let mut last_inbound = Instant::now();
    let mut probing = false;
    let mut heartbeat = tokio::time::interval_at(
        TokioInstant::now() + config.heartbeat.interval,
        config.heartbeat.interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let probe_deadline = tokio::time::sleep(Duration::from_secs(86_400));
    tokio::pin!(probe_deadline);

    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        return PumpEnd::Dead(TransportError::SendFailed(e.to_string()));
                    }
                }
                Some(Outbound::Binary(data)) => {
                    if let Err(e) = sink.send(Message::Binary(data)).await {
                        return PumpEnd::Dead(TransportError::SendFailed(e.to_string()));
                    }
                }
                None => return PumpEnd::Manual,
            },

            incoming = inbound.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    last_inbound = Instant::now();
                    probing = false;
                    let text = text.to_string();
                    if is_heartbeat(&text) {
                        tracing::trace!("heartbeat acknowledged");
                    }
                    shared.emit(TransportEvent::Message(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    last_inbound = Instant::now();
                    probing = false;
                    shared.emit(TransportEvent::AudioData(strip_framing(
                        data,
                        config.protocol_version,
                    )));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    last_inbound = Instant::now();
                    probing = false;
                }
                Some(Ok(Message::Close(frame))) => {
                    let message = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return PumpEnd::Dead(TransportError::ConnectionFailed {
                        kind: classify_error(&message),
                        message,
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let message = e.to_string();
                    return PumpEnd::Dead(TransportError::ConnectionFailed {
                        kind: classify_error(&message),
                        message,
                    });
                }
                None => {
                    return PumpEnd::Dead(TransportError::ConnectionFailed {
                        kind: ErrorKind::WebSocketError,
                        message: "stream ended".to_string(),
                    });
                }
            },

            _ = heartbeat.tick() => {
                let frame = Frame::Heartbeat {
                    session_id: shared.snapshot.lock().session_id.clone(),
                    timestamp: Some(unix_millis()),
                };
                match config.codec.encode(&frame) {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            return PumpEnd::Dead(TransportError::SendFailed(e.to_string()));
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to encode heartbeat frame"),
                }
                if !probing && last_inbound.elapsed() >= config.heartbeat.interval * 2 {
                    // Silent for two full intervals: the heartbeat just sent
                    // is a re-probe with a short deadline for any sign of
                    // life. One quiet interval alone is tolerated as jitter.
                    probing = true;
                    probe_deadline
                        .as_mut()
                        .reset(TokioInstant::now() + config.heartbeat.probe_grace);
                }
            },

            _ = &mut probe_deadline, if probing => {
                return PumpEnd::Dead(TransportError::HeartbeatTimeout);
            },
        }
    }
}

/// Strip the binary audio framing from an inbound payload. v1 carries no
/// header; an unparseable v2/v3 frame passes through raw rather than being
/// silently dropped.
fn strip_framing(data: Bytes, version: BinaryProtocolVersion) -> Bytes {
    if version == BinaryProtocolVersion::V1 {
        return data;
    }
    match decode_audio_frame(&data, version) {
        Ok((_, payload)) => {
            let offset = data.len() - payload.len();
            data.slice(offset..)
        }
        Err(e) => {
            tracing::warn!(error = %e, "unparseable inbound audio frame, passing through raw");
            data
        }
    }
}

/// Shallow check for a heartbeat response, used for liveness tracing without
/// a full decode.
fn is_heartbeat(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "heartbeat"))
        .unwrap_or(false)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeartbeatConfig, ReconnectConfig};
    use crate::protocol::create_codec;

    fn test_config(url: &str) -> TransportConfig {
        TransportConfig {
            url: url.to_string(),
            auth_token: "token".to_string(),
            device_id: "aa:bb:cc:dd:ee:ff".to_string(),
            client_id: "client-1".to_string(),
            protocol_version: BinaryProtocolVersion::V1,
            connect_timeout: Duration::from_millis(500),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            codec: create_codec("sdkwork").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_send_before_connect_is_rejected() {
        let transport = WebSocketTransport::new();
        assert!(matches!(
            transport.send_frame(Frame::text_message("hi")).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.send_audio(Bytes::from_static(b"\x01"), None).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_surfaces_classified_error() {
        let transport = WebSocketTransport::new();
        // Port 1 on localhost refuses immediately.
        let result = transport.connect(test_config("ws://127.0.0.1:1/session")).await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectionFailed { .. })
        ));

        let snapshot = transport.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.last_error.is_some());

        let metrics = transport.metrics();
        assert_eq!(metrics.total_connections, 1);
        assert_eq!(metrics.failed_connections, 1);
        assert_eq!(metrics.successful_connections, 0);
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let transport = WebSocketTransport::new();
        let result = transport.connect(test_config("not a url")).await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_pending_queue_is_bounded() {
        let transport = WebSocketTransport::new();
        transport.shared.set_state(ConnectionState::Reconnecting);

        for i in 0..(MAX_PENDING_MESSAGES + 5) {
            transport
                .send_frame(Frame::text_message(format!("m{i}")))
                .await
                .unwrap();
        }

        let pending = transport.shared.pending.lock();
        assert_eq!(pending.len(), MAX_PENDING_MESSAGES);
        // Oldest entries were evicted.
        match &pending.front().unwrap().frame {
            Frame::Chat { text, .. } => assert_eq!(text, "m5"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    /// Local server that records every inbound text frame.
    async fn recording_server() -> (std::net::SocketAddr, mpsc::UnboundedReceiver<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = seen_tx.send(text.to_string());
                }
            }
        });
        (addr, seen_rx)
    }

    fn chat_text(wire: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(wire).unwrap();
        value["text"].as_str().unwrap_or_default().to_string()
    }

    async fn next_frame(seen: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), seen.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_stale_pending_frames_are_dropped_at_flush() {
        let (addr, mut seen) = recording_server().await;
        let transport = WebSocketTransport::new();

        {
            let mut pending = transport.shared.pending.lock();
            pending.push_back(PendingMessage {
                frame: Frame::text_message("stale"),
                enqueued_at: Instant::now()
                    .checked_sub(Duration::from_secs(60))
                    .unwrap(),
            });
            pending.push_back(PendingMessage::new(Frame::text_message("fresh-1")));
            pending.push_back(PendingMessage::new(Frame::text_message("fresh-2")));
        }

        transport
            .connect(test_config(&format!("ws://{addr}/session")))
            .await
            .unwrap();

        // Fresh entries arrive in FIFO order.
        assert_eq!(chat_text(&next_frame(&mut seen).await), "fresh-1");
        assert_eq!(chat_text(&next_frame(&mut seen).await), "fresh-2");

        // A frame sent after the flush arrives next: the stale entry was
        // discarded, not delayed behind the queue.
        transport
            .send_frame(Frame::text_message("sentinel"))
            .await
            .unwrap();
        assert_eq!(chat_text(&next_frame(&mut seen).await), "sentinel");

        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connected_send_drains_parked_frames_first() {
        let (addr, mut seen) = recording_server().await;
        let transport = WebSocketTransport::new();
        transport
            .connect(test_config(&format!("ws://{addr}/session")))
            .await
            .unwrap();

        // A frame parked by a send that raced a completing reconnect.
        transport
            .shared
            .pending
            .lock()
            .push_back(PendingMessage::new(Frame::text_message("raced")));

        transport
            .send_frame(Frame::text_message("after"))
            .await
            .unwrap();

        assert_eq!(chat_text(&next_frame(&mut seen).await), "raced");
        assert_eq!(chat_text(&next_frame(&mut seen).await), "after");
        assert!(transport.shared.pending.lock().is_empty());

        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_quiet() {
        let transport = WebSocketTransport::new();
        let mut events = transport.subscribe().unwrap();

        transport.disconnect().await.unwrap();
        assert_eq!(transport.snapshot().state, ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_is_single_consumer() {
        let transport = WebSocketTransport::new();
        assert!(transport.subscribe().is_some());
        assert!(transport.subscribe().is_none());
    }

    #[test]
    fn test_heartbeat_shallow_detection() {
        assert!(is_heartbeat(r#"{"type":"heartbeat","timestamp":1}"#));
        assert!(!is_heartbeat(r#"{"type":"chat","text":"hi"}"#));
        assert!(!is_heartbeat("not json"));
    }

    #[test]
    fn test_strip_framing_v3() {
        let payload = vec![7u8; 12];
        let framed = encode_audio_frame(&payload, BinaryProtocolVersion::V3);
        let stripped = strip_framing(framed, BinaryProtocolVersion::V3);
        assert_eq!(stripped.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_strip_framing_v1_passthrough() {
        let data = Bytes::from_static(b"\x01\x02\x03");
        let stripped = strip_framing(data.clone(), BinaryProtocolVersion::V1);
        assert_eq!(stripped, data);
    }
}
