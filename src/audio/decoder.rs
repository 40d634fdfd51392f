//! Off-thread Opus decoder.
//!
//! `opus::Decoder` is synchronous and stateful, so a single worker thread
//! owns it and the async side talks to it over channels. The handle is
//! cheap to share; decode calls await a oneshot reply from the worker.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ClientError, ClientResult};
use crate::protocol::AudioParams;

/// Fixed decoder sample rate.
const SAMPLE_RATE: u32 = 16_000;
/// Largest possible opus frame: 120ms at 48kHz.
const MAX_FRAME_SAMPLES: usize = 5760;

/// PCM output of one decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    /// Samples per channel. Mono decoding yields one entry.
    pub channel_data: Vec<Vec<i16>>,
    /// Samples decoded, per channel.
    pub samples_decoded: usize,
    pub sample_rate: u32,
}

impl DecodedAudio {
    fn from_f32_mono(samples: &[f32], sample_rate: u32) -> Self {
        let converted: Vec<i16> = samples.iter().copied().map(sample_to_i16).collect();
        Self {
            samples_decoded: converted.len(),
            channel_data: vec![converted],
            sample_rate,
        }
    }
}

/// Decoded-audio unit emitted to the application, carrying the session's
/// audio parameters alongside the PCM data.
#[derive(Debug, Clone)]
pub struct AudioStreamPayload {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub frame_duration: u32,
    pub data: DecodedAudio,
}

impl AudioStreamPayload {
    pub fn new(params: &AudioParams, data: DecodedAudio) -> Self {
        Self {
            format: params.format.clone(),
            sample_rate: params.sample_rate,
            channels: params.channels,
            frame_duration: params.frame_duration,
            data,
        }
    }
}

/// Clamp to [-1, 1] and scale to the i16 range. The scale factor is
/// asymmetric: 32767 for non-negative samples, 32768 for negative ones, so
/// -1.0 maps exactly to i16::MIN.
fn sample_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped >= 0.0 {
        (clamped * 32767.0) as i16
    } else {
        (clamped * 32768.0) as i16
    }
}

enum DecoderCommand {
    Decode {
        data: Bytes,
        reply: oneshot::Sender<Result<DecodedAudio, String>>,
    },
    Shutdown,
}

/// Handle to the decoder worker thread.
///
/// Await [`OpusDecoderHandle::ready`] before submitting frames; call
/// [`OpusDecoderHandle::free`] on teardown. Decoding after `free` is an
/// invalid operation and fails explicitly.
pub struct OpusDecoderHandle {
    commands: mpsc::UnboundedSender<DecoderCommand>,
    init_rx: Mutex<Option<oneshot::Receiver<Result<(), String>>>>,
    ready: AtomicBool,
    closed: AtomicBool,
}

impl OpusDecoderHandle {
    /// Spawn the worker thread. Initialization completes asynchronously;
    /// await [`OpusDecoderHandle::ready`] for the result.
    pub fn new() -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (init_tx, init_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("opus-decoder".to_string())
            .spawn(move || run_worker(command_rx, init_tx))
            .ok();
        Self {
            commands,
            init_rx: Mutex::new(Some(init_rx)),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Wait for worker initialization. Idempotent once initialized.
    pub async fn ready(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Decoder("decoder has been freed".to_string()));
        }
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        let init_rx = self.init_rx.lock().take();
        match init_rx {
            Some(rx) => match rx.await {
                Ok(Ok(())) => {
                    self.ready.store(true, Ordering::SeqCst);
                    Ok(())
                }
                Ok(Err(message)) => Err(ClientError::Decoder(message)),
                Err(_) => Err(ClientError::Decoder(
                    "decoder worker exited before initialization".to_string(),
                )),
            },
            None => Err(ClientError::Decoder(
                "decoder failed to initialize".to_string(),
            )),
        }
    }

    /// Decode one opus frame into PCM.
    ///
    /// Empty input is rejected here rather than handed to the codec; decode
    /// failures come back as errors and leave the worker usable.
    pub async fn decode(&self, data: Bytes) -> ClientResult<DecodedAudio> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Decoder("decoder has been freed".to_string()));
        }
        if data.is_empty() {
            tracing::warn!("skipping empty audio payload");
            return Err(ClientError::Decoder("empty audio payload".to_string()));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(DecoderCommand::Decode {
                data,
                reply: reply_tx,
            })
            .map_err(|_| ClientError::Decoder("decoder worker stopped".to_string()))?;
        match reply_rx.await {
            Ok(Ok(decoded)) => Ok(decoded),
            Ok(Err(message)) => Err(ClientError::Decoder(message)),
            Err(_) => Err(ClientError::Decoder("decoder worker stopped".to_string())),
        }
    }

    /// Tear the worker down. Further `decode` calls fail.
    pub fn free(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(DecoderCommand::Shutdown);
    }
}

impl Default for OpusDecoderHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OpusDecoderHandle {
    fn drop(&mut self) {
        self.free();
    }
}

fn run_worker(
    mut commands: mpsc::UnboundedReceiver<DecoderCommand>,
    init_tx: oneshot::Sender<Result<(), String>>,
) {
    let mut decoder = match opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono) {
        Ok(decoder) => {
            let _ = init_tx.send(Ok(()));
            decoder
        }
        Err(e) => {
            let _ = init_tx.send(Err(format!("failed to create opus decoder: {e}")));
            return;
        }
    };

    let mut pcm = vec![0f32; MAX_FRAME_SAMPLES];
    while let Some(command) = commands.blocking_recv() {
        match command {
            DecoderCommand::Decode { data, reply } => {
                let result = decoder
                    .decode_float(&data, &mut pcm, false)
                    .map(|samples| DecodedAudio::from_f32_mono(&pcm[..samples], SAMPLE_RATE))
                    .map_err(|e| format!("opus decode failed: {e}"));
                let _ = reply.send(result);
            }
            DecoderCommand::Shutdown => break,
        }
    }
}
