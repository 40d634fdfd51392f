//! Versioned wire protocol: JSON control frames plus binary audio framing.
//!
//! The JSON side is a tagged union ([`Frame`]) translated by a
//! variant-specific [`ProtocolCodec`]; the binary side is the headered audio
//! framing in [`binary`]. The two never mix: control frames are WebSocket
//! text messages, audio is WebSocket binary.

pub mod binary;
mod codec;
mod messages;

pub use binary::{
    decode_audio_frame, encode_audio_frame, encode_audio_frame_at, AudioFrameHeader,
    BinaryProtocolVersion, FRAME_TYPE_OPUS, V2_HEADER_LEN, V3_HEADER_LEN,
};
pub use codec::{create_codec, supported_variants, ProtocolCodec, SdkWorkCodec, XiaozhiCodec};
pub use messages::{
    AudioParams, Features, Frame, ListenMode, ListenState, TtsState,
};
