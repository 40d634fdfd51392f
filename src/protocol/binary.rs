//! Binary audio framing.
//!
//! Audio bypasses the JSON codec and travels as raw WebSocket binary
//! messages in one of three framings:
//!
//! - **v1**: payload as-is, no header.
//! - **v2**: 16-byte header, all fields big-endian:
//!   `u16 version | u16 type (0 = opus) | u32 reserved | u32 timestamp_ms | u32 payload_size`
//! - **v3**: 4-byte header, big-endian:
//!   `u8 type | u8 reserved | u16 payload_size`

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

/// v2 header length in bytes.
pub const V2_HEADER_LEN: usize = 16;
/// v3 header length in bytes.
pub const V3_HEADER_LEN: usize = 4;
/// Payload type tag for opus audio.
pub const FRAME_TYPE_OPUS: u8 = 0;

/// Binary audio framing version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryProtocolVersion {
    /// Raw payload, no header
    #[default]
    V1,
    /// 16-byte header with timestamp
    V2,
    /// Compact 4-byte header
    V3,
}

impl BinaryProtocolVersion {
    /// Map a numeric protocol version; anything unrecognized falls back to v1.
    pub fn from_number(version: Option<u16>) -> Self {
        match version {
            Some(2) => BinaryProtocolVersion::V2,
            Some(3) => BinaryProtocolVersion::V3,
            _ => BinaryProtocolVersion::V1,
        }
    }

    /// Numeric form used in config and the handshake header.
    pub fn as_number(&self) -> u16 {
        match self {
            BinaryProtocolVersion::V1 => 1,
            BinaryProtocolVersion::V2 => 2,
            BinaryProtocolVersion::V3 => 3,
        }
    }
}

/// Decoded fields of a v2/v3 frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFrameHeader {
    pub version: u16,
    pub frame_type: u8,
    /// Milliseconds; only present on v2, zero on v3.
    pub timestamp_ms: u32,
    pub payload_size: u32,
}

fn timestamp_now_ms() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// Frame an outbound audio payload for the given protocol version.
pub fn encode_audio_frame(payload: &[u8], version: BinaryProtocolVersion) -> Bytes {
    encode_audio_frame_at(payload, version, timestamp_now_ms())
}

/// Same as [`encode_audio_frame`] with an explicit timestamp (v2 only).
pub fn encode_audio_frame_at(
    payload: &[u8],
    version: BinaryProtocolVersion,
    timestamp_ms: u32,
) -> Bytes {
    match version {
        BinaryProtocolVersion::V1 => Bytes::copy_from_slice(payload),
        BinaryProtocolVersion::V2 => {
            let mut buf = BytesMut::with_capacity(V2_HEADER_LEN + payload.len());
            buf.put_u16(2);
            buf.put_u16(FRAME_TYPE_OPUS as u16);
            buf.put_u32(0); // reserved
            buf.put_u32(timestamp_ms);
            buf.put_u32(payload.len() as u32);
            buf.put_slice(payload);
            buf.freeze()
        }
        BinaryProtocolVersion::V3 => {
            let mut buf = BytesMut::with_capacity(V3_HEADER_LEN + payload.len());
            buf.put_u8(FRAME_TYPE_OPUS);
            buf.put_u8(0); // reserved
            buf.put_u16(payload.len() as u16);
            buf.put_slice(payload);
            buf.freeze()
        }
    }
}

/// Parse an inbound v2/v3 frame into its header and payload slice.
///
/// v1 has no header; callers hand the payload straight to the decoder.
pub fn decode_audio_frame(
    data: &[u8],
    version: BinaryProtocolVersion,
) -> ProtocolResult<(AudioFrameHeader, &[u8])> {
    match version {
        BinaryProtocolVersion::V1 => Ok((
            AudioFrameHeader {
                version: 1,
                frame_type: FRAME_TYPE_OPUS,
                timestamp_ms: 0,
                payload_size: data.len() as u32,
            },
            data,
        )),
        BinaryProtocolVersion::V2 => {
            if data.len() < V2_HEADER_LEN {
                return Err(ProtocolError::InvalidBinaryFrame(format!(
                    "v2 frame shorter than header: {} bytes",
                    data.len()
                )));
            }
            let header = AudioFrameHeader {
                version: u16::from_be_bytes([data[0], data[1]]),
                frame_type: u16::from_be_bytes([data[2], data[3]]) as u8,
                timestamp_ms: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
                payload_size: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            };
            let payload = &data[V2_HEADER_LEN..];
            if payload.len() != header.payload_size as usize {
                return Err(ProtocolError::InvalidBinaryFrame(format!(
                    "v2 payload_size {} does not match remaining {} bytes",
                    header.payload_size,
                    payload.len()
                )));
            }
            Ok((header, payload))
        }
        BinaryProtocolVersion::V3 => {
            if data.len() < V3_HEADER_LEN {
                return Err(ProtocolError::InvalidBinaryFrame(format!(
                    "v3 frame shorter than header: {} bytes",
                    data.len()
                )));
            }
            let header = AudioFrameHeader {
                version: 3,
                frame_type: data[0],
                timestamp_ms: 0,
                payload_size: u16::from_be_bytes([data[2], data[3]]) as u32,
            };
            let payload = &data[V3_HEADER_LEN..];
            if payload.len() != header.payload_size as usize {
                return Err(ProtocolError::InvalidBinaryFrame(format!(
                    "v3 payload_size {} does not match remaining {} bytes",
                    header.payload_size,
                    payload.len()
                )));
            }
            Ok((header, payload))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_passthrough() {
        let payload = vec![1u8, 2, 3, 4];
        let framed = encode_audio_frame(&payload, BinaryProtocolVersion::V1);
        assert_eq!(framed.as_ref(), payload.as_slice());

        let (header, body) = decode_audio_frame(&framed, BinaryProtocolVersion::V1).unwrap();
        assert_eq!(header.payload_size, 4);
        assert_eq!(body, payload.as_slice());
    }

    #[test]
    fn test_v2_round_trip() {
        let payload: Vec<u8> = (0..50).collect();
        let framed = encode_audio_frame_at(&payload, BinaryProtocolVersion::V2, 987_654);
        assert_eq!(framed.len(), V2_HEADER_LEN + payload.len());

        let (header, body) = decode_audio_frame(&framed, BinaryProtocolVersion::V2).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.frame_type, FRAME_TYPE_OPUS);
        assert_eq!(header.timestamp_ms, 987_654);
        assert_eq!(header.payload_size, payload.len() as u32);
        assert_eq!(body, payload.as_slice());
    }

    #[test]
    fn test_v3_round_trip() {
        let payload: Vec<u8> = (0..25).collect();
        let framed = encode_audio_frame(&payload, BinaryProtocolVersion::V3);
        assert_eq!(framed.len(), V3_HEADER_LEN + payload.len());

        let (header, body) = decode_audio_frame(&framed, BinaryProtocolVersion::V3).unwrap();
        assert_eq!(header.version, 3);
        assert_eq!(header.payload_size, payload.len() as u32);
        assert_eq!(body, payload.as_slice());
    }

    #[test]
    fn test_v3_ten_byte_payload_layout() {
        // 10-byte payload framed at v3 is 14 bytes; bytes [2..4] carry the
        // big-endian payload size
        let payload = vec![0xAAu8; 10];
        let framed = encode_audio_frame(&payload, BinaryProtocolVersion::V3);
        assert_eq!(framed.len(), 14);
        assert_eq!(u16::from_be_bytes([framed[2], framed[3]]), 10);
    }

    #[test]
    fn test_v2_header_is_big_endian() {
        let framed = encode_audio_frame_at(&[0u8; 3], BinaryProtocolVersion::V2, 0x0102_0304);
        assert_eq!(&framed[0..2], &[0x00, 0x02]); // version
        assert_eq!(&framed[8..12], &[0x01, 0x02, 0x03, 0x04]); // timestamp
        assert_eq!(&framed[12..16], &[0x00, 0x00, 0x00, 0x03]); // payload_size
    }

    #[test]
    fn test_truncated_frames_rejected() {
        assert!(decode_audio_frame(&[0u8; 8], BinaryProtocolVersion::V2).is_err());
        assert!(decode_audio_frame(&[0u8; 2], BinaryProtocolVersion::V3).is_err());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut framed =
            encode_audio_frame_at(&[1u8, 2, 3], BinaryProtocolVersion::V2, 0).to_vec();
        framed.push(9); // extra trailing byte
        assert!(decode_audio_frame(&framed, BinaryProtocolVersion::V2).is_err());
    }

    #[test]
    fn test_version_mapping() {
        assert_eq!(
            BinaryProtocolVersion::from_number(None),
            BinaryProtocolVersion::V1
        );
        assert_eq!(
            BinaryProtocolVersion::from_number(Some(1)),
            BinaryProtocolVersion::V1
        );
        assert_eq!(
            BinaryProtocolVersion::from_number(Some(2)),
            BinaryProtocolVersion::V2
        );
        assert_eq!(
            BinaryProtocolVersion::from_number(Some(3)),
            BinaryProtocolVersion::V3
        );
        assert_eq!(BinaryProtocolVersion::V3.as_number(), 3);
    }
}
