//! Protocol codec: frame ⇄ wire text.
//!
//! One codec instance handles exactly one protocol variant, selected at
//! client construction. The variants are structurally compatible supersets
//! of the same tagged union, so they share [`Frame`] and differ only in
//! which frame kinds they accept. Binary audio frames never pass through
//! this codec; see [`super::binary`].

use std::sync::Arc;

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::messages::Frame;

/// Bidirectional, lossless translation between frames and wire text.
pub trait ProtocolCodec: Send + Sync {
    /// The variant string this codec was created for.
    fn variant(&self) -> &'static str;

    /// Serialize a frame to wire text.
    fn encode(&self, frame: &Frame) -> ProtocolResult<String>;

    /// Parse wire text back into a frame.
    ///
    /// Decode failures are non-fatal to the connection; callers log and
    /// drop the frame.
    fn decode(&self, text: &str) -> ProtocolResult<Frame>;
}

/// Full protocol variant; accepts every frame kind.
pub struct SdkWorkCodec;

impl ProtocolCodec for SdkWorkCodec {
    fn variant(&self) -> &'static str {
        "sdkwork"
    }

    fn encode(&self, frame: &Frame) -> ProtocolResult<String> {
        serde_json::to_string(frame).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode(&self, text: &str) -> ProtocolResult<Frame> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Legacy protocol variant. Same union minus the `im`/`image`/`vision`
/// kinds, which the legacy backend never defined.
pub struct XiaozhiCodec;

impl XiaozhiCodec {
    fn check_supported(&self, frame: &Frame) -> ProtocolResult<()> {
        match frame {
            Frame::Im { .. } | Frame::Image { .. } | Frame::Vision { .. } => {
                Err(ProtocolError::UnsupportedType {
                    variant: self.variant(),
                    frame_type: frame.frame_type(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl ProtocolCodec for XiaozhiCodec {
    fn variant(&self) -> &'static str {
        "xiaozhi"
    }

    fn encode(&self, frame: &Frame) -> ProtocolResult<String> {
        self.check_supported(frame)?;
        serde_json::to_string(frame).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode(&self, text: &str) -> ProtocolResult<Frame> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        self.check_supported(&frame)
            .map_err(|_| ProtocolError::Decode(format!(
                "frame type '{}' not defined by variant 'xiaozhi'",
                frame.frame_type()
            )))?;
        Ok(frame)
    }
}

/// Create the codec for a protocol variant string.
///
/// Adding a variant means adding an arm here; call sites stay unchanged.
pub fn create_codec(variant: &str) -> ProtocolResult<Arc<dyn ProtocolCodec>> {
    match variant.to_lowercase().as_str() {
        "sdkwork" => Ok(Arc::new(SdkWorkCodec)),
        "xiaozhi" => Ok(Arc::new(XiaozhiCodec)),
        other => Err(ProtocolError::UnknownVariant(other.to_string())),
    }
}

/// Variant strings accepted by [`create_codec`].
pub fn supported_variants() -> Vec<&'static str> {
    vec!["sdkwork", "xiaozhi"]
}
