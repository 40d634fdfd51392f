//! Error taxonomy for the SDK.
//!
//! Errors are layered the same way the crate is: `ProtocolError` for codec
//! failures, `TransportError` for connection-level failures, `ClientError`
//! for everything surfaced through the public client API. Connection errors
//! additionally carry a classification tag used for diagnostics and metrics,
//! never for control flow.

use thiserror::Error;

/// Classification of a connection-level error.
///
/// Derived from the underlying error text at the moment the error occurs
/// and attached to the emitted error and the stored connection snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect or handshake exceeded its deadline
    NetworkTimeout,
    /// Remote actively refused the connection
    ConnectionRefused,
    /// Host name could not be resolved
    DnsResolutionFailed,
    /// Cross-origin rejection (browser-hosted runtimes)
    CorsError,
    /// Credentials rejected (401)
    AuthenticationFailed,
    /// Credentials accepted but access denied (403)
    AuthorizationFailed,
    /// Any other WebSocket protocol failure
    WebSocketError,
    /// Unclassifiable
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorKind::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorKind::DnsResolutionFailed => "DNS_RESOLUTION_FAILED",
            ErrorKind::CorsError => "CORS_ERROR",
            ErrorKind::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorKind::AuthorizationFailed => "AUTHORIZATION_FAILED",
            ErrorKind::WebSocketError => "WEBSOCKET_ERROR",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Classify a connection error from its message text.
pub fn classify_error(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        ErrorKind::NetworkTimeout
    } else if lower.contains("connection refused") || lower.contains("econnrefused") {
        ErrorKind::ConnectionRefused
    } else if lower.contains("dns") || lower.contains("name or service not known") {
        ErrorKind::DnsResolutionFailed
    } else if lower.contains("cors") || lower.contains("cross-origin") {
        ErrorKind::CorsError
    } else if lower.contains("401") || lower.contains("unauthorized") {
        ErrorKind::AuthenticationFailed
    } else if lower.contains("403") || lower.contains("forbidden") {
        ErrorKind::AuthorizationFailed
    } else if lower.contains("websocket") || lower.contains("handshake") {
        ErrorKind::WebSocketError
    } else {
        ErrorKind::Unknown
    }
}

/// Errors from the wire protocol codec and the binary audio framing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame could not be serialized to its wire form
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// Wire text could not be parsed back into a frame
    #[error("failed to decode frame: {0}")]
    Decode(String),

    /// Frame kind exists but the active protocol variant does not carry it
    #[error("frame type '{frame_type}' is not supported by protocol variant '{variant}'")]
    UnsupportedType {
        variant: &'static str,
        frame_type: &'static str,
    },

    /// Codec factory was asked for a variant it does not know
    #[error("unknown protocol variant: {0}")]
    UnknownVariant(String),

    /// Binary audio frame too short or structurally invalid
    #[error("invalid binary audio frame: {0}")]
    InvalidBinaryFrame(String),
}

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation requires an established connection
    #[error("transport is not connected")]
    NotConnected,

    /// Connection attempt or established connection failed
    #[error("connection failed ({kind}): {message}")]
    ConnectionFailed { kind: ErrorKind, message: String },

    /// Reconnection budget exhausted; terminal until a fresh connect
    #[error("connection lost after {attempts} reconnection attempts")]
    RetriesExhausted { attempts: u32 },

    /// Liveness probe confirmed the connection is dead
    #[error("heartbeat timed out after re-probe")]
    HeartbeatTimeout,

    /// Outbound write failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Transport kind satisfies the interface but has no implementation
    #[error("transport '{0}' is not implemented")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Classification tag for this error, if it is a connection error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::ConnectionFailed { kind, .. } => *kind,
            TransportError::HeartbeatTimeout => ErrorKind::NetworkTimeout,
            TransportError::NotConnected
            | TransportError::RetriesExhausted { .. }
            | TransportError::SendFailed(_) => ErrorKind::WebSocketError,
            _ => ErrorKind::Unknown,
        }
    }
}

/// Errors surfaced through the public client API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// `initialize()` has not completed
    #[error("client is not initialized")]
    NotInitialized,

    /// Configuration rejected at construction time
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Audio decoder failure (init, decode, or use-after-free)
    #[error("audio decoder error: {0}")]
    Decoder(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
