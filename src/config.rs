//! Client and transport configuration.
//!
//! `ClientConfig` is what applications construct; `normalize()` validates it
//! and resolves the auth token, defaults and identifiers exactly once, at
//! client construction time. The reconnection and heartbeat knobs live here
//! so the transport state machine stays free of magic numbers.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::protocol::AudioParams;

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Grace period after a re-probe heartbeat before the connection is declared dead.
pub const DEFAULT_PROBE_GRACE: Duration = Duration::from_secs(2);
/// Upper bound on the pending-message queue length.
pub const MAX_PENDING_MESSAGES: usize = 100;
/// Pending messages older than this at flush time are discarded.
pub const MAX_PENDING_MESSAGE_AGE: Duration = Duration::from_secs(30);

/// Which transport carries the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// WebSocket (the only fully implemented transport)
    #[default]
    WebSocket,
    /// MQTT (interface-only stub)
    Mqtt,
    /// WukongIM (interface-only stub)
    WukongIm,
}

impl TransportKind {
    /// Parse a transport kind from its configuration string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "websocket" | "ws" => Some(TransportKind::WebSocket),
            "mqtt" => Some(TransportKind::Mqtt),
            "wukong" | "wukongim" => Some(TransportKind::WukongIm),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Mqtt => write!(f, "mqtt"),
            TransportKind::WukongIm => write!(f, "wukongim"),
        }
    }
}

/// Probe invoked before a reconnection attempt to check whether the device
/// is network-reachable at all. When it reports offline the reconnect loop
/// polls instead of consuming a reconnect attempt.
pub type ConnectivityProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Reconnection policy.
#[derive(Clone)]
pub struct ReconnectConfig {
    /// Base delay before the first reconnection attempt.
    pub base_interval: Duration,
    /// Delays are capped at this value.
    pub max_interval: Duration,
    /// Exponential backoff multiplier.
    pub multiplier: f64,
    /// Attempts before giving up permanently.
    pub max_attempts: u32,
    /// Poll period while the connectivity probe reports offline.
    pub offline_poll_interval: Duration,
    /// Optional connectivity probe; `None` means always reachable.
    pub probe: Option<ConnectivityProbe>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(1000),
            max_interval: Duration::from_millis(30_000),
            multiplier: 1.5,
            max_attempts: 5,
            offline_poll_interval: Duration::from_secs(5),
            probe: None,
        }
    }
}

impl std::fmt::Debug for ReconnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectConfig")
            .field("base_interval", &self.base_interval)
            .field("max_interval", &self.max_interval)
            .field("multiplier", &self.multiplier)
            .field("max_attempts", &self.max_attempts)
            .field("offline_poll_interval", &self.offline_poll_interval)
            .field("probe", &self.probe.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl ReconnectConfig {
    /// Delay for a given attempt: `min(base * multiplier^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_interval.as_millis() as f64;
        let delay = base * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = delay.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Whether the device currently looks network-reachable.
    pub fn is_online(&self) -> bool {
        self.probe.as_ref().map(|p| p()).unwrap_or(true)
    }
}

/// Heartbeat liveness configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between heartbeat frames.
    pub interval: Duration,
    /// Wait after the re-probe heartbeat before declaring the connection dead.
    pub probe_grace: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            probe_grace: DEFAULT_PROBE_GRACE,
        }
    }
}

/// Application-facing configuration for a [`crate::VoiceClient`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `wss://host/v1/session`.
    pub endpoint: String,
    /// API key credential. Used when no bearer authorization is given.
    pub api_key: Option<String>,
    /// Bearer authorization credential. Preferred over `api_key` when both
    /// are present.
    pub authorization: Option<String>,
    /// Stable device identifier. Required.
    pub device_id: String,
    /// Client instance identifier; generated when empty.
    pub client_id: Option<String>,
    /// Protocol variant selecting the codec: `"sdkwork"` (default) or
    /// `"xiaozhi"`.
    pub protocol_variant: Option<String>,
    /// Binary audio protocol version advertised in the handshake (1, 2, 3).
    pub protocol_version: Option<u16>,
    /// Transport selection; defaults to WebSocket.
    pub transport: TransportKind,
    /// Audio parameters; defaults to opus/16000/mono/60ms.
    pub audio: Option<AudioParams>,
    /// Connection attempt deadline.
    pub connect_timeout: Option<Duration>,
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
    /// Heartbeat policy.
    pub heartbeat: HeartbeatConfig,
}

/// Validated configuration, produced once by [`ClientConfig::normalize`].
#[derive(Debug, Clone)]
pub struct NormalizedConfig {
    pub endpoint: String,
    pub auth_token: String,
    pub device_id: String,
    pub client_id: String,
    pub protocol_variant: String,
    pub protocol_version: u16,
    pub transport: TransportKind,
    pub audio: AudioParams,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
}

impl ClientConfig {
    /// Validate and resolve the configuration.
    ///
    /// Auth resolution prefers `authorization` over `api_key`; a missing
    /// credential or empty `device_id` is a fatal configuration error.
    pub fn normalize(self) -> ClientResult<NormalizedConfig> {
        if self.endpoint.trim().is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "endpoint is required".to_string(),
            ));
        }
        if self.device_id.trim().is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "device_id is required".to_string(),
            ));
        }

        let auth_token = match (&self.authorization, &self.api_key) {
            (Some(bearer), _) if !bearer.trim().is_empty() => {
                // Accept either a bare token or a full "Bearer x" value.
                bearer
                    .trim()
                    .strip_prefix("Bearer ")
                    .unwrap_or(bearer.trim())
                    .to_string()
            }
            (_, Some(key)) if !key.trim().is_empty() => key.trim().to_string(),
            _ => {
                return Err(ClientError::InvalidConfiguration(
                    "either authorization or api_key is required".to_string(),
                ));
            }
        };

        let protocol_version = self.protocol_version.unwrap_or(1);
        if !(1..=3).contains(&protocol_version) {
            return Err(ClientError::InvalidConfiguration(format!(
                "unsupported binary protocol version: {}",
                protocol_version
            )));
        }

        Ok(NormalizedConfig {
            endpoint: self.endpoint,
            auth_token,
            device_id: self.device_id,
            client_id: self
                .client_id
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            protocol_variant: self
                .protocol_variant
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "sdkwork".to_string()),
            protocol_version,
            transport: self.transport,
            audio: self.audio.unwrap_or_default(),
            connect_timeout: self.connect_timeout.unwrap_or(Duration::from_secs(10)),
            reconnect: self.reconnect,
            heartbeat: self.heartbeat,
        })
    }
}
