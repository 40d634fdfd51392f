//! Wire protocol frame types.
//!
//! Every frame exchanged with the backend is JSON text with a mandatory
//! `type` discriminator, modelled here as one tagged union. A frame carries
//! exactly one `type`; the payload shape is fixed by that tag. Open-ended
//! payloads (MCP bodies, IoT descriptors) stay as `serde_json::Value` at
//! this boundary and are validated by the orchestrator before they cross
//! into application code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Negotiated audio stream parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    /// Codec name, e.g. "opus"
    pub format: String,
    /// Samples per second
    pub sample_rate: u32,
    /// Channel count
    pub channels: u32,
    /// Frame duration in milliseconds
    pub frame_duration: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            format: "opus".to_string(),
            sample_rate: 16_000,
            channels: 1,
            frame_duration: 60,
        }
    }
}

/// Capability flags advertised in the hello handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aec: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<bool>,
}

/// Listening control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenState {
    Start,
    Stop,
    Detect,
}

/// Listening mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenMode {
    Manual,
    Auto,
    Realtime,
}

/// TTS playback state reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    Stop,
    SentenceStart,
}

/// One protocol frame, tagged by `type`.
///
/// Client-originated and server-originated kinds share the union; the codec
/// for a given variant decides which kinds it accepts on each path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Session handshake, both directions. The server reply carries the
    /// assigned `session_id` and the negotiated audio parameters.
    #[serde(rename = "hello")]
    Hello {
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        transport: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio_params: Option<AudioParams>,
        #[serde(skip_serializing_if = "Option::is_none")]
        features: Option<Features>,
    },

    /// Listening control (client → server).
    #[serde(rename = "listen")]
    Listen {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        state: ListenState,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<ListenMode>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// Chat text message.
    #[serde(rename = "chat")]
    Chat {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        chat_context: Option<Value>,
    },

    /// Instant-messaging frame (sdkwork variant only).
    #[serde(rename = "im")]
    Im {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        payload: Value,
    },

    /// Image payload (sdkwork variant only).
    #[serde(rename = "image")]
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        payload: Value,
    },

    /// Vision request/result (sdkwork variant only).
    #[serde(rename = "vision")]
    Vision {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        payload: Value,
    },

    /// MCP envelope; the payload is a JSON-RPC style body whose `method`
    /// selects the operation (`tools/call` carries tool invocations).
    #[serde(rename = "mcp")]
    Mcp {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        payload: Value,
    },

    /// Abort the current server activity.
    #[serde(rename = "abort")]
    Abort {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// IoT descriptor/state exchange and device events.
    #[serde(rename = "iot")]
    Iot {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        descriptors: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        states: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        commands: Option<Value>,
    },

    /// Liveness probe, both directions.
    #[serde(rename = "heartbeat")]
    Heartbeat {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Recognized speech (server → client).
    #[serde(rename = "stt")]
    Stt {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        text: String,
    },

    /// TTS playback state (server → client).
    #[serde(rename = "tts")]
    Tts {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        state: TtsState,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// Assistant output metadata such as emotion (server → client).
    #[serde(rename = "llm")]
    Llm {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        emotion: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// System-level command from the server (e.g. reboot, update).
    #[serde(rename = "system")]
    System {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        command: String,
    },

    /// Session termination notice.
    #[serde(rename = "goodbye")]
    Goodbye {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl Frame {
    /// The wire `type` tag of this frame.
    pub fn frame_type(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Listen { .. } => "listen",
            Frame::Chat { .. } => "chat",
            Frame::Im { .. } => "im",
            Frame::Image { .. } => "image",
            Frame::Vision { .. } => "vision",
            Frame::Mcp { .. } => "mcp",
            Frame::Abort { .. } => "abort",
            Frame::Iot { .. } => "iot",
            Frame::Heartbeat { .. } => "heartbeat",
            Frame::Stt { .. } => "stt",
            Frame::Tts { .. } => "tts",
            Frame::Llm { .. } => "llm",
            Frame::System { .. } => "system",
            Frame::Goodbye { .. } => "goodbye",
        }
    }

    /// The `session_id` carried by this frame, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Frame::Hello { session_id, .. }
            | Frame::Listen { session_id, .. }
            | Frame::Chat { session_id, .. }
            | Frame::Im { session_id, .. }
            | Frame::Image { session_id, .. }
            | Frame::Vision { session_id, .. }
            | Frame::Mcp { session_id, .. }
            | Frame::Abort { session_id, .. }
            | Frame::Iot { session_id, .. }
            | Frame::Heartbeat { session_id, .. }
            | Frame::Stt { session_id, .. }
            | Frame::Tts { session_id, .. }
            | Frame::Llm { session_id, .. }
            | Frame::System { session_id, .. }
            | Frame::Goodbye { session_id } => session_id.as_deref(),
        }
    }

    /// Build a minimal chat frame wrapping a bare string.
    pub fn text_message(text: impl Into<String>) -> Self {
        Frame::Chat {
            session_id: None,
            text: text.into(),
            chat_context: None,
        }
    }
}
