//! Client orchestrator: the public entry point of the SDK.
//!
//! `VoiceClient` validates configuration once, wires the codec, transport
//! and audio decoder together, and routes every inbound frame to exactly
//! one application callback by a fixed classification precedence:
//!
//! 1. chat/IM frame kinds are delivered as a **message**
//! 2. MCP frames whose method is `tools/call` become a **tool call**
//! 3. IoT/system frame kinds are delivered as an **event**
//! 4. everything else falls back to **message**, never silently dropped

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::{AudioStreamPayload, OpusDecoderHandle};
use crate::config::{ClientConfig, NormalizedConfig};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{
    create_codec, AudioParams, BinaryProtocolVersion, Features, Frame, ListenMode, ListenState,
    ProtocolCodec,
};
use crate::transport::{
    create_transport, ConnectionMetrics, ConnectionSnapshot, ConnectionState, Transport,
    TransportConfig, TransportEvent,
};

type AsyncCallback<T> = Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Tool invocation extracted from an MCP `tools/call` frame.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// JSON-RPC request id, echoed back in the tool result.
    pub id: Option<Value>,
    pub name: String,
    pub arguments: Value,
    pub session_id: Option<String>,
}

/// Where a decoded inbound frame is routed.
#[derive(Debug)]
enum Classified {
    Message(Frame),
    ToolCall(ToolCallRequest),
    Event(Frame),
}

/// Route one inbound frame by the classification precedence.
fn classify(frame: Frame) -> Classified {
    match frame {
        f @ (Frame::Chat { .. }
        | Frame::Im { .. }
        | Frame::Stt { .. }
        | Frame::Tts { .. }
        | Frame::Llm { .. }) => Classified::Message(f),
        Frame::Mcp {
            session_id,
            payload,
        } => {
            if payload.get("method").and_then(Value::as_str) == Some("tools/call") {
                if let Some(call) = parse_tool_call(session_id.clone(), &payload) {
                    return Classified::ToolCall(call);
                }
                tracing::warn!("malformed tools/call payload, delivering as message");
            }
            Classified::Message(Frame::Mcp {
                session_id,
                payload,
            })
        }
        f @ (Frame::Iot { .. } | Frame::System { .. } | Frame::Goodbye { .. }) => {
            Classified::Event(f)
        }
        f => Classified::Message(f),
    }
}

fn parse_tool_call(session_id: Option<String>, payload: &Value) -> Option<ToolCallRequest> {
    let params = payload.get("params")?;
    let name = params.get("name")?.as_str()?.to_string();
    Some(ToolCallRequest {
        id: payload.get("id").cloned(),
        name,
        arguments: params.get("arguments").cloned().unwrap_or(Value::Null),
        session_id,
    })
}

#[derive(Default)]
struct Callbacks {
    on_message: Mutex<Option<AsyncCallback<Frame>>>,
    on_event: Mutex<Option<AsyncCallback<Frame>>>,
    on_audio_stream: Mutex<Option<AsyncCallback<AudioStreamPayload>>>,
    on_tool_call: Mutex<Option<AsyncCallback<ToolCallRequest>>>,
    on_error: Mutex<Option<AsyncCallback<ClientError>>>,
}

impl Callbacks {
    fn clear(&self) {
        *self.on_message.lock() = None;
        *self.on_event.lock() = None;
        *self.on_audio_stream.lock() = None;
        *self.on_tool_call.lock() = None;
        *self.on_error.lock() = None;
    }
}

async fn invoke<T>(slot: &Mutex<Option<AsyncCallback<T>>>, value: T) {
    let callback = slot.lock().clone();
    match callback {
        Some(callback) => callback(value).await,
        None => tracing::debug!("no subscriber for inbound event"),
    }
}

/// Device-side voice session client.
///
/// Construct with [`VoiceClient::new`], then [`VoiceClient::initialize`]
/// before any send. All sends fail with [`ClientError::NotInitialized`]
/// until initialization completes.
pub struct VoiceClient {
    config: NormalizedConfig,
    codec: Arc<dyn ProtocolCodec>,
    transport: Arc<dyn Transport>,
    decoder: Arc<OpusDecoderHandle>,
    /// Audio parameters, updated from the server hello.
    audio_params: Arc<Mutex<AudioParams>>,
    callbacks: Arc<Callbacks>,
    initialized: AtomicBool,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceClient {
    /// Validate the configuration and construct the codec/transport pair.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let config = config.normalize()?;
        let codec = create_codec(&config.protocol_variant)?;
        let transport = create_transport(config.transport);
        let audio_params = Arc::new(Mutex::new(config.audio.clone()));
        Ok(Self {
            config,
            codec,
            transport,
            decoder: Arc::new(OpusDecoderHandle::new()),
            audio_params,
            callbacks: Arc::new(Callbacks::default()),
            initialized: AtomicBool::new(false),
            dispatch_task: Mutex::new(None),
        })
    }

    /// Bring the client up: decoder first, then the transport connection,
    /// then the inbound dispatch task. Idempotent once initialized; a
    /// decoder or connection failure leaves the client uninitialized.
    pub async fn initialize(&self) -> ClientResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            tracing::debug!("initialize called twice, ignoring");
            return Ok(());
        }

        self.decoder.ready().await?;

        let transport_config = TransportConfig {
            url: self.config.endpoint.clone(),
            auth_token: self.config.auth_token.clone(),
            device_id: self.config.device_id.clone(),
            client_id: self.config.client_id.clone(),
            protocol_version: BinaryProtocolVersion::from_number(Some(
                self.config.protocol_version,
            )),
            connect_timeout: self.config.connect_timeout,
            reconnect: self.config.reconnect.clone(),
            heartbeat: self.config.heartbeat.clone(),
            codec: Arc::clone(&self.codec),
        };
        self.transport.connect(transport_config).await?;

        if let Some(events) = self.transport.subscribe() {
            let task = tokio::spawn(dispatch_events(
                Arc::clone(&self.transport),
                Arc::clone(&self.codec),
                Arc::clone(&self.decoder),
                Arc::clone(&self.audio_params),
                Arc::clone(&self.callbacks),
                events,
            ));
            *self.dispatch_task.lock() = Some(task);
        }

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(variant = self.codec.variant(), "client initialized");
        Ok(())
    }

    fn ensure_initialized(&self) -> ClientResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::NotInitialized)
        }
    }

    /// Send the session handshake advertising the configured capabilities.
    pub async fn send_hello(&self) -> ClientResult<()> {
        self.ensure_initialized()?;
        let frame = Frame::Hello {
            version: Some(u32::from(self.config.protocol_version)),
            transport: Some(self.config.transport.to_string()),
            session_id: None,
            audio_params: Some(self.audio_params.lock().clone()),
            features: Some(Features {
                aec: None,
                mcp: Some(true),
            }),
        };
        self.transport.send_hello(frame).await?;
        Ok(())
    }

    /// Send a bare string, auto-wrapped into a minimal text message frame.
    pub async fn send(&self, text: impl Into<String>) -> ClientResult<()> {
        self.ensure_initialized()?;
        self.transport
            .send_frame(Frame::text_message(text))
            .await?;
        Ok(())
    }

    /// Send a protocol frame as-is.
    pub async fn send_frame(&self, frame: Frame) -> ClientResult<()> {
        self.ensure_initialized()?;
        self.transport.send_frame(frame).await?;
        Ok(())
    }

    /// Send compressed audio. `version` overrides the configured binary
    /// framing for this frame only.
    pub async fn send_audio_data(
        &self,
        data: Bytes,
        version: Option<u16>,
    ) -> ClientResult<()> {
        self.ensure_initialized()?;
        self.transport
            .send_audio(data, version.map(|v| BinaryProtocolVersion::from_number(Some(v))))
            .await?;
        Ok(())
    }

    /// Report device state as an IoT event frame.
    pub async fn send_event(&self, states: Value) -> ClientResult<()> {
        self.ensure_initialized()?;
        self.transport
            .send_frame(Frame::Iot {
                session_id: None,
                descriptors: None,
                states: Some(states),
                commands: None,
            })
            .await?;
        Ok(())
    }

    /// Start listening in the given mode.
    pub async fn start_listen(&self, mode: ListenMode) -> ClientResult<()> {
        self.send_listen(ListenState::Start, Some(mode), None).await
    }

    /// Stop listening.
    pub async fn stop_listen(&self) -> ClientResult<()> {
        self.send_listen(ListenState::Stop, None, None).await
    }

    /// Report a detected wake word.
    pub async fn wake_word_detected(&self, text: impl Into<String>) -> ClientResult<()> {
        self.send_listen(ListenState::Detect, None, Some(text.into()))
            .await
    }

    async fn send_listen(
        &self,
        state: ListenState,
        mode: Option<ListenMode>,
        text: Option<String>,
    ) -> ClientResult<()> {
        self.ensure_initialized()?;
        self.transport
            .send_frame(Frame::Listen {
                session_id: None,
                state,
                mode,
                text,
            })
            .await?;
        Ok(())
    }

    /// Abort the server's current activity.
    pub async fn abort(&self, reason: Option<String>) -> ClientResult<()> {
        self.ensure_initialized()?;
        self.transport
            .send_frame(Frame::Abort {
                session_id: None,
                reason,
            })
            .await?;
        Ok(())
    }

    pub fn on_message<F, Fut>(&self, f: F)
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.callbacks.on_message.lock() = Some(Arc::new(move |frame| Box::pin(f(frame))));
    }

    pub fn on_event<F, Fut>(&self, f: F)
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.callbacks.on_event.lock() = Some(Arc::new(move |frame| Box::pin(f(frame))));
    }

    pub fn on_audio_stream<F, Fut>(&self, f: F)
    where
        F: Fn(AudioStreamPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.callbacks.on_audio_stream.lock() =
            Some(Arc::new(move |payload| Box::pin(f(payload))));
    }

    pub fn on_tool_call<F, Fut>(&self, f: F)
    where
        F: Fn(ToolCallRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.callbacks.on_tool_call.lock() = Some(Arc::new(move |call| Box::pin(f(call))));
    }

    pub fn on_error<F, Fut>(&self, f: F)
    where
        F: Fn(ClientError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.callbacks.on_error.lock() = Some(Arc::new(move |error| Box::pin(f(error))));
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.snapshot().state
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.transport.snapshot()
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.transport.metrics()
    }

    /// Close the connection without tearing the client down.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.transport.disconnect().await?;
        Ok(())
    }

    /// Tear everything down: transport, dispatch task, callbacks, decoder.
    /// Safe to call before `initialize` or more than once.
    pub async fn destroy(&self) {
        if let Some(task) = self.dispatch_task.lock().take() {
            task.abort();
        }
        self.transport.destroy().await;
        self.decoder.free();
        self.callbacks.clear();
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("client destroyed");
    }
}

/// Inbound dispatch loop. Runs until the transport's event channel closes
/// or the client is destroyed.
async fn dispatch_events(
    transport: Arc<dyn Transport>,
    codec: Arc<dyn ProtocolCodec>,
    decoder: Arc<OpusDecoderHandle>,
    audio_params: Arc<Mutex<AudioParams>>,
    callbacks: Arc<Callbacks>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(text) => {
                // Decode failure is non-fatal: log and drop, never tear down
                // the connection.
                let frame = match codec.decode(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable frame");
                        continue;
                    }
                };
                handle_frame(&transport, &audio_params, &callbacks, frame).await;
            }
            TransportEvent::AudioData(data) => match decoder.decode(data).await {
                Ok(decoded) => {
                    let payload = AudioStreamPayload::new(&audio_params.lock().clone(), decoded);
                    invoke(&callbacks.on_audio_stream, payload).await;
                }
                Err(e) => invoke(&callbacks.on_error, e).await,
            },
            TransportEvent::Error(e) => {
                invoke(&callbacks.on_error, ClientError::Transport(e)).await;
            }
            TransportEvent::Connected => tracing::info!("session transport connected"),
            TransportEvent::Disconnected { reason } => {
                tracing::info!(%reason, "session transport disconnected");
            }
        }
    }
}

async fn handle_frame(
    transport: &Arc<dyn Transport>,
    audio_params: &Arc<Mutex<AudioParams>>,
    callbacks: &Arc<Callbacks>,
    frame: Frame,
) {
    match &frame {
        // Session bookkeeping happens before classification.
        Frame::Hello {
            session_id,
            audio_params: negotiated,
            ..
        } => {
            transport.set_session_id(session_id.clone());
            if let Some(params) = negotiated {
                *audio_params.lock() = params.clone();
            }
            tracing::info!(session_id = session_id.as_deref(), "session established");
        }
        // Heartbeat responses are transport liveness, not application data.
        Frame::Heartbeat { .. } => return,
        _ => {}
    }

    match classify(frame) {
        Classified::Message(frame) => invoke(&callbacks.on_message, frame).await,
        Classified::ToolCall(call) => invoke(&callbacks.on_tool_call, call).await,
        Classified::Event(frame) => invoke(&callbacks.on_event, frame).await,
    }
}
