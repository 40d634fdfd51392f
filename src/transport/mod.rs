//! Transport abstraction and implementations.
//!
//! [`Transport`] is the capability contract every transport satisfies;
//! WebSocket is the concrete implementation, MQTT and WukongIM are
//! fail-fast stubs. Connection state is owned exclusively by the active
//! transport and exposed read-only through [`ConnectionSnapshot`].
//!
//! Events flow to the orchestrator as a closed sum type
//! ([`TransportEvent`]) over an unbounded channel, so handling stays
//! exhaustive at compile time rather than keyed by event-name strings.

mod stubs;
mod websocket;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub use stubs::{MqttTransport, WukongImTransport};
pub use websocket::WebSocketTransport;

use crate::config::{HeartbeatConfig, ReconnectConfig, TransportKind};
use crate::error::{ErrorKind, TransportError, TransportResult};
use crate::protocol::{BinaryProtocolVersion, Frame, ProtocolCodec};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection; also the terminal state after a manual disconnect
    #[default]
    Disconnected,
    /// Connection attempt in flight
    Connecting,
    /// Established and usable
    Connected,
    /// Lost unexpectedly; reconnection cycle active
    Reconnecting,
    /// Broken; terminal once the reconnect budget is exhausted
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Read-only view of the transport's connection state.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub connected: bool,
    /// Session id assigned by the backend, recorded by the orchestrator
    /// from the server hello.
    pub session_id: Option<String>,
    /// Last connection error, classified.
    pub last_error: Option<(ErrorKind, String)>,
    /// When the current connection was established.
    pub connect_time: Option<SystemTime>,
}

impl ConnectionSnapshot {
    /// Time since the current connection was established, if connected.
    pub fn uptime(&self) -> Option<Duration> {
        self.connect_time
            .and_then(|t| SystemTime::now().duration_since(t).ok())
    }
}

/// Events emitted by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// Connection established (initial or after reconnect)
    Connected,
    /// Connection ended
    Disconnected { reason: String },
    /// Inbound JSON text frame, not yet decoded
    Message(String),
    /// Inbound binary audio payload (framing already stripped)
    AudioData(Bytes),
    /// Connection-level error
    Error(TransportError),
}

/// Monotonic connection counters. Diagnostics and reconnection tuning only,
/// never correctness decisions.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetrics {
    pub total_connections: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
}

impl ConnectionMetrics {
    /// Fraction of connection attempts that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            self.successful_connections as f64 / self.total_connections as f64
        }
    }
}

/// Outbound frame parked while the transport is reconnecting.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub frame: Frame,
    pub enqueued_at: Instant,
}

impl PendingMessage {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            enqueued_at: Instant::now(),
        }
    }

    /// Whether this message has outlived the pending-queue age window.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.enqueued_at.elapsed() > max_age
    }
}

/// Connection parameters for one connection generation. Immutable once
/// passed to [`Transport::connect`].
#[derive(Clone)]
pub struct TransportConfig {
    pub url: String,
    pub auth_token: String,
    pub device_id: String,
    pub client_id: String,
    pub protocol_version: BinaryProtocolVersion,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    /// Codec used for heartbeat frames and pending-queue flushes.
    pub codec: Arc<dyn ProtocolCodec>,
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("url", &self.url)
            .field("device_id", &self.device_id)
            .field("client_id", &self.client_id)
            .field("protocol_version", &self.protocol_version)
            .field("connect_timeout", &self.connect_timeout)
            .field("codec", &self.codec.variant())
            .finish()
    }
}

/// Capability contract for session transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection. Idempotent while a connection is established or
    /// an attempt is in flight.
    async fn connect(&self, config: TransportConfig) -> TransportResult<()>;

    /// Manually close the connection. Suppresses reconnection until the
    /// next `connect`.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Send a control frame. Queued while reconnecting, rejected with
    /// [`TransportError::NotConnected`] in any other non-connected state.
    async fn send_frame(&self, frame: Frame) -> TransportResult<()>;

    /// Send the session handshake frame. Same delivery rules as
    /// [`Transport::send_frame`].
    async fn send_hello(&self, frame: Frame) -> TransportResult<()>;

    /// Send binary audio, framed for `version` (falls back to the
    /// configured protocol version). Never queued: if the socket is not
    /// open the call fails immediately (stale audio is worse than dropped
    /// audio).
    async fn send_audio(
        &self,
        data: Bytes,
        version: Option<BinaryProtocolVersion>,
    ) -> TransportResult<()>;

    fn is_connected(&self) -> bool;

    /// Current connection state, read-only.
    fn snapshot(&self) -> ConnectionSnapshot;

    /// Record the backend-assigned session id into the snapshot.
    fn set_session_id(&self, session_id: Option<String>);

    fn metrics(&self) -> ConnectionMetrics;

    /// Take the event receiver. Single consumer; returns `None` after the
    /// first call.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Tear down the transport and release the socket. The instance is not
    /// reusable afterwards.
    async fn destroy(&self);
}

/// Create the transport for the configured kind.
pub fn create_transport(kind: TransportKind) -> Arc<dyn Transport> {
    match kind {
        TransportKind::WebSocket => Arc::new(WebSocketTransport::new()),
        TransportKind::Mqtt => Arc::new(MqttTransport),
        TransportKind::WukongIm => Arc::new(WukongImTransport),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }

    #[test]
    fn test_metrics_success_rate() {
        let mut metrics = ConnectionMetrics::default();
        assert_eq!(metrics.success_rate(), 0.0);

        metrics.total_connections = 4;
        metrics.successful_connections = 3;
        metrics.failed_connections = 1;
        assert!((metrics.success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pending_message_staleness() {
        let pending = PendingMessage::new(Frame::text_message("x"));
        assert!(!pending.is_stale(Duration::from_secs(30)));
        assert!(pending.is_stale(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_factory_returns_stub_for_mqtt() {
        let transport = create_transport(TransportKind::Mqtt);
        assert!(!transport.is_connected());
        let result = transport.send_frame(Frame::text_message("x")).await;
        assert!(matches!(result, Err(TransportError::NotImplemented("mqtt"))));
    }
}
