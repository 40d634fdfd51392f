//! Audio decode pipeline.
//!
//! Inbound compressed audio is decoded off the async runtime on a dedicated
//! worker thread, then converted to 16-bit PCM for playback. The pipeline
//! never blocks the transport's receive loop and decode failures never tear
//! down the connection.

mod decoder;

pub use decoder::{AudioStreamPayload, DecodedAudio, OpusDecoderHandle};
