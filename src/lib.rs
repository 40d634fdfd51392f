//! Device-side client SDK for real-time voice assistant sessions.
//!
//! The crate is layered the way the data flows:
//!
//! - [`protocol`]: typed wire frames, the variant-selected JSON codec and
//!   the versioned binary audio framing
//! - [`transport`]: connection lifecycle over WebSocket with reconnection,
//!   heartbeat liveness and a bounded pending queue (MQTT and WukongIM are
//!   fail-fast stubs)
//! - [`audio`]: off-thread Opus decoding into 16-bit PCM
//! - [`client`]: the public orchestrator wiring the layers together and
//!   classifying inbound frames into application callbacks
//!
//! ```no_run
//! use voicewire::{ClientConfig, VoiceClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = VoiceClient::new(ClientConfig {
//!     endpoint: "wss://voice.example.com/v1/session".to_string(),
//!     api_key: Some("sk-...".to_string()),
//!     device_id: "aa:bb:cc:dd:ee:ff".to_string(),
//!     ..Default::default()
//! })?;
//!
//! client.on_message(|frame| async move {
//!     println!("inbound: {:?}", frame);
//! });
//!
//! client.initialize().await?;
//! client.send_hello().await?;
//! client.send("hello there").await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

pub use audio::{AudioStreamPayload, DecodedAudio, OpusDecoderHandle};
pub use client::{ToolCallRequest, VoiceClient};
pub use config::{ClientConfig, HeartbeatConfig, ReconnectConfig, TransportKind};
pub use error::{ClientError, ClientResult, ErrorKind, ProtocolError, TransportError};
pub use protocol::{
    AudioParams, BinaryProtocolVersion, Features, Frame, ListenMode, ListenState, TtsState,
};
pub use transport::{ConnectionMetrics, ConnectionSnapshot, ConnectionState, TransportEvent};
