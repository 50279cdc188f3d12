//! Frame encoding and decoding for the weft wire protocol.
//!
//! Every frame starts with a fixed 10-byte header in network byte order:
//!
//! ```text
//! +--------+--------+--------------------+--------------------+-----------------+
//! | Type   | Flags  | Stream ID          | Length             | Payload         |
//! | 1 byte | 1 byte | 4 bytes (BE32)     | 4 bytes (BE32)     | Length bytes    |
//! +--------+--------+--------------------+--------------------+-----------------+
//! ```
//!
//! Decoding is incremental: [`decode`] reports how many more bytes it needs
//! when the input ends inside a frame, and rejects oversize frames as soon as
//! the header is complete.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::core::ErrorCode;
use crate::core::constants::*;

/// Stream identifier. The high bit is reserved, leaving 31 significant bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId(u32);

impl StreamId {
    /// The session-level id carried only by GoAway.
    pub const ZERO: Self = Self(0);
    /// Highest allocatable id.
    pub const MAX: Self = Self(MAX_STREAM_ID);

    /// Wrap a raw id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id value.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Odd ids belong to the client.
    pub fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }

    /// Even, non-zero ids belong to the server.
    pub fn is_server_initiated(self) -> bool {
        self.0 != 0 && self.0 % 2 == 0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StreamId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Opens a new stream.
    OpenStream = FRAME_TYPE_OPEN_STREAM,
    /// Stream payload.
    Data = FRAME_TYPE_DATA,
    /// Flow-control credit.
    WindowUpdate = FRAME_TYPE_WINDOW_UPDATE,
    /// Abrupt stream termination.
    StreamReset = FRAME_TYPE_STREAM_RESET,
    /// Half-close of the sender's direction.
    FinWrite = FRAME_TYPE_FIN_WRITE,
    /// Session shutdown.
    GoAway = FRAME_TYPE_GO_AWAY,
}

impl FrameType {
    /// Parse frame type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            FRAME_TYPE_OPEN_STREAM => Some(Self::OpenStream),
            FRAME_TYPE_DATA => Some(Self::Data),
            FRAME_TYPE_WINDOW_UPDATE => Some(Self::WindowUpdate),
            FRAME_TYPE_STREAM_RESET => Some(Self::StreamReset),
            FRAME_TYPE_FIN_WRITE => Some(Self::FinWrite),
            FRAME_TYPE_GO_AWAY => Some(Self::GoAway),
            _ => None,
        }
    }

    /// Convert frame type to its byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Fixed payload length for this type, if it has one.
    fn fixed_len(self) -> Option<u32> {
        match self {
            Self::OpenStream | Self::FinWrite => Some(0),
            Self::WindowUpdate | Self::StreamReset => Some(4),
            Self::Data | Self::GoAway => None,
        }
    }
}

/// Frame flags. No flags are defined; every bit is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Create flags from a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if reserved bits are valid (must be zero).
    pub fn is_valid(self) -> bool {
        self.0 == 0
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame type.
    pub frame_type: FrameType,
    /// Frame flags.
    pub flags: FrameFlags,
    /// Target stream, or zero for GoAway.
    pub stream_id: StreamId,
    /// Payload length in bytes.
    pub length: u32,
}

impl FrameHeader {
    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.frame_type.as_byte();
        buf[1] = self.flags.as_byte();
        buf[2..6].copy_from_slice(&self.stream_id.value().to_be_bytes());
        buf[6..10].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Parse and validate a header.
    ///
    /// Checks everything that can be checked without the payload, including
    /// the length limit.
    pub fn from_bytes(bytes: &[u8], max_frame_size: u32) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let frame_type = FrameType::from_byte(bytes[0]).ok_or(FrameError::InvalidType(bytes[0]))?;

        let flags = FrameFlags::from_byte(bytes[1]);
        if !flags.is_valid() {
            return Err(FrameError::InvalidFlags(bytes[1]));
        }

        let raw_id = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let length = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);

        if length > max_frame_size {
            return Err(FrameError::TooLarge {
                length,
                max: max_frame_size,
            });
        }

        let id_ok = match frame_type {
            FrameType::GoAway => raw_id == 0,
            _ => raw_id != 0 && raw_id <= MAX_STREAM_ID,
        };
        if !id_ok {
            return Err(FrameError::InvalidStreamId {
                frame_type,
                stream_id: raw_id,
            });
        }

        match frame_type.fixed_len() {
            Some(expected) if expected != length => {
                return Err(FrameError::BadPayloadLength {
                    frame_type,
                    expected: expected as usize,
                    actual: length as usize,
                });
            }
            None if frame_type == FrameType::GoAway
                && (length as usize) < GO_AWAY_FIXED_SIZE =>
            {
                return Err(FrameError::BadPayloadLength {
                    frame_type,
                    expected: GO_AWAY_FIXED_SIZE,
                    actual: length as usize,
                });
            }
            _ => {}
        }

        Ok(Self {
            frame_type,
            flags,
            stream_id: StreamId(raw_id),
            length,
        })
    }
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Open a new stream.
    OpenStream {
        /// Id chosen by the opener.
        stream_id: StreamId,
    },
    /// Stream payload.
    Data {
        /// Target stream.
        stream_id: StreamId,
        /// Opaque bytes.
        payload: Bytes,
    },
    /// Return flow-control credit.
    WindowUpdate {
        /// Target stream.
        stream_id: StreamId,
        /// Bytes of credit returned, never zero.
        increment: u32,
    },
    /// Abruptly terminate a stream.
    StreamReset {
        /// Target stream.
        stream_id: StreamId,
        /// Why.
        code: ErrorCode,
    },
    /// Half-close the sender's direction.
    FinWrite {
        /// Target stream.
        stream_id: StreamId,
    },
    /// Shut down the session.
    GoAway {
        /// Highest peer-opened stream id the sender processed.
        last_stream_id: StreamId,
        /// Final session error code.
        code: ErrorCode,
        /// Free-form diagnostic bytes.
        debug: Bytes,
    },
}

impl Frame {
    /// Frame type of this variant.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::OpenStream { .. } => FrameType::OpenStream,
            Frame::Data { .. } => FrameType::Data,
            Frame::WindowUpdate { .. } => FrameType::WindowUpdate,
            Frame::StreamReset { .. } => FrameType::StreamReset,
            Frame::FinWrite { .. } => FrameType::FinWrite,
            Frame::GoAway { .. } => FrameType::GoAway,
        }
    }

    /// Stream id carried in the header.
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::OpenStream { stream_id }
            | Frame::Data { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::StreamReset { stream_id, .. }
            | Frame::FinWrite { stream_id } => *stream_id,
            Frame::GoAway { .. } => StreamId::ZERO,
        }
    }

    /// Payload length in bytes.
    pub fn payload_len(&self) -> usize {
        match self {
            Frame::OpenStream { .. } | Frame::FinWrite { .. } => 0,
            Frame::Data { payload, .. } => payload.len(),
            Frame::WindowUpdate { .. } | Frame::StreamReset { .. } => 4,
            Frame::GoAway { debug, .. } => GO_AWAY_FIXED_SIZE + debug.len(),
        }
    }

    /// Header describing this frame.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            frame_type: self.frame_type(),
            flags: FrameFlags::NONE,
            stream_id: self.stream_id(),
            length: self.payload_len() as u32,
        }
    }

    /// Total size on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        encode(self, &mut buf);
        buf.freeze()
    }

    fn from_parts(header: FrameHeader, mut payload: Bytes) -> Result<Self, FrameError> {
        let stream_id = header.stream_id;
        let frame = match header.frame_type {
            FrameType::OpenStream => Frame::OpenStream { stream_id },
            FrameType::FinWrite => Frame::FinWrite { stream_id },
            FrameType::Data => Frame::Data { stream_id, payload },
            FrameType::WindowUpdate => {
                let increment = read_u32(&payload[..4]);
                if increment == 0 {
                    return Err(FrameError::ZeroWindowIncrement);
                }
                Frame::WindowUpdate {
                    stream_id,
                    increment,
                }
            }
            FrameType::StreamReset => Frame::StreamReset {
                stream_id,
                code: ErrorCode::from_u32(read_u32(&payload[..4])),
            },
            FrameType::GoAway => {
                let last_stream_id = StreamId(read_u32(&payload[0..4]) & MAX_STREAM_ID);
                let code = ErrorCode::from_u32(read_u32(&payload[4..8]));
                let debug = payload.split_off(GO_AWAY_FIXED_SIZE);
                Frame::GoAway {
                    last_stream_id,
                    code,
                    debug,
                }
            }
        };
        Ok(frame)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Append the wire encoding of `frame` to `dst`.
pub fn encode(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(frame.encoded_len());
    dst.put_slice(&frame.header().to_bytes());
    match frame {
        Frame::OpenStream { .. } | Frame::FinWrite { .. } => {}
        Frame::Data { payload, .. } => dst.put_slice(payload),
        Frame::WindowUpdate { increment, .. } => dst.put_u32(*increment),
        Frame::StreamReset { code, .. } => dst.put_u32(code.as_u32()),
        Frame::GoAway {
            last_stream_id,
            code,
            debug,
        } => {
            dst.put_u32(last_stream_id.value());
            dst.put_u32(code.as_u32());
            dst.put_slice(debug);
        }
    }
}

/// Result of an incremental [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame and the number of input bytes it occupied.
    Frame {
        /// The decoded frame.
        frame: Frame,
        /// Bytes consumed from the front of the input.
        consumed: usize,
    },
    /// The input ends inside a frame; at least this many more bytes are needed.
    NeedMoreData(usize),
}

/// Decode one frame from the front of `src`.
pub fn decode(src: &[u8], max_frame_size: u32) -> Result<Decoded, FrameError> {
    if src.len() < HEADER_SIZE {
        return Ok(Decoded::NeedMoreData(HEADER_SIZE - src.len()));
    }

    let header = FrameHeader::from_bytes(&src[..HEADER_SIZE], max_frame_size)?;
    let total = HEADER_SIZE + header.length as usize;
    if src.len() < total {
        return Ok(Decoded::NeedMoreData(total - src.len()));
    }

    let payload = Bytes::copy_from_slice(&src[HEADER_SIZE..total]);
    let frame = Frame::from_parts(header, payload)?;
    Ok(Decoded::Frame {
        frame,
        consumed: total,
    })
}

/// Decode one frame from the front of `src`, splitting it off on success.
///
/// Like [`decode`], but the payload is split out of the receive buffer
/// instead of copied.
pub fn decode_buf(src: &mut BytesMut, max_frame_size: u32) -> Result<Decoded, FrameError> {
    if src.len() < HEADER_SIZE {
        return Ok(Decoded::NeedMoreData(HEADER_SIZE - src.len()));
    }
    let header = FrameHeader::from_bytes(&src[..HEADER_SIZE], max_frame_size)?;
    let total = HEADER_SIZE + header.length as usize;
    if src.len() < total {
        return Ok(Decoded::NeedMoreData(total - src.len()));
    }

    let mut raw = src.split_to(total);
    let payload = raw.split_off(HEADER_SIZE).freeze();
    let frame = Frame::from_parts(header, payload)?;
    Ok(Decoded::Frame {
        frame,
        consumed: total,
    })
}

/// Errors that can occur during frame parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Header is incomplete.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Declared length exceeds the configured maximum.
    #[error("frame too large: {length} bytes exceeds maximum {max}")]
    TooLarge {
        /// Declared payload length.
        length: u32,
        /// Configured maximum.
        max: u32,
    },

    /// Invalid frame type.
    #[error("invalid frame type: 0x{0:02x}")]
    InvalidType(u8),

    /// Invalid flags (reserved bits set).
    #[error("invalid flags: 0x{0:02x} (reserved bits must be 0)")]
    InvalidFlags(u8),

    /// Stream id not allowed for this frame type.
    #[error("invalid stream id {stream_id} for {frame_type:?} frame")]
    InvalidStreamId {
        /// Frame type.
        frame_type: FrameType,
        /// Raw id from the header.
        stream_id: u32,
    },

    /// Payload length does not fit the frame type.
    #[error("bad {frame_type:?} payload length: expected {expected}, got {actual}")]
    BadPayloadLength {
        /// Frame type.
        frame_type: FrameType,
        /// Required (or minimum, for GoAway) length.
        expected: usize,
        /// Declared length.
        actual: usize,
    },

    /// WindowUpdate with an increment of zero.
    #[error("window update increment must be non-zero")]
    ZeroWindowIncrement,
}

impl FrameError {
    /// Code reported to the peer for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            FrameError::TooLarge { .. } | FrameError::BadPayloadLength { .. } => {
                ErrorCode::FRAME_SIZE_ERROR
            }
            _ => ErrorCode::PROTOCOL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u32 = DEFAULT_MAX_FRAME_SIZE;

    fn decode_one(bytes: &[u8]) -> Frame {
        match decode(bytes, MAX).unwrap() {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                frame
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_frame_type_roundtrip() {
        for t in [
            FrameType::OpenStream,
            FrameType::Data,
            FrameType::WindowUpdate,
            FrameType::StreamReset,
            FrameType::FinWrite,
            FrameType::GoAway,
        ] {
            assert_eq!(FrameType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(FrameType::from_byte(0x00), None);
        assert_eq!(FrameType::from_byte(0x07), None);
    }

    #[test]
    fn test_stream_id_parity() {
        assert!(StreamId::new(1).is_client_initiated());
        assert!(!StreamId::new(1).is_server_initiated());
        assert!(StreamId::new(2).is_server_initiated());
        assert!(!StreamId::ZERO.is_server_initiated());
        assert!(!StreamId::ZERO.is_client_initiated());
    }

    #[test]
    fn test_data_frame_layout() {
        let frame = Frame::Data {
            stream_id: StreamId::new(3),
            payload: Bytes::from_static(b"hi"),
        };
        assert_eq!(hex::encode(frame.to_bytes()), "020000000003000000026869");
        assert_eq!(decode_one(&frame.to_bytes()), frame);
    }

    #[test]
    fn test_control_frame_layouts() {
        let open = Frame::OpenStream {
            stream_id: StreamId::new(1),
        };
        assert_eq!(hex::encode(open.to_bytes()), "01000000000100000000");

        let update = Frame::WindowUpdate {
            stream_id: StreamId::new(2),
            increment: 0x0001_0000,
        };
        assert_eq!(
            hex::encode(update.to_bytes()),
            "0300000000020000000400010000"
        );

        let reset = Frame::StreamReset {
            stream_id: StreamId::new(5),
            code: ErrorCode::STREAM_CANCELLED,
        };
        assert_eq!(hex::encode(reset.to_bytes()), "0400000000050000000400000006");

        let go_away = Frame::GoAway {
            last_stream_id: StreamId::new(7),
            code: ErrorCode::PROTOCOL_ERROR,
            debug: Bytes::from_static(b"x"),
        };
        assert_eq!(
            hex::encode(go_away.to_bytes()),
            "06000000000000000009000000070000000178"
        );

        for frame in [open, update, reset, go_away] {
            assert_eq!(decode_one(&frame.to_bytes()), frame);
        }
    }

    #[test]
    fn test_partial_input_needs_more() {
        let bytes = Frame::Data {
            stream_id: StreamId::new(1),
            payload: Bytes::from_static(b"hello"),
        }
        .to_bytes();

        assert_eq!(decode(&bytes[..4], MAX).unwrap(), Decoded::NeedMoreData(6));
        assert_eq!(
            decode(&bytes[..HEADER_SIZE + 2], MAX).unwrap(),
            Decoded::NeedMoreData(3)
        );
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut buf = BytesMut::new();
        encode(
            &Frame::OpenStream {
                stream_id: StreamId::new(1),
            },
            &mut buf,
        );
        encode(
            &Frame::FinWrite {
                stream_id: StreamId::new(1),
            },
            &mut buf,
        );

        for expected in [FrameType::OpenStream, FrameType::FinWrite] {
            match decode_buf(&mut buf, MAX).unwrap() {
                Decoded::Frame { frame, consumed } => {
                    assert_eq!(frame.frame_type(), expected);
                    assert_eq!(consumed, HEADER_SIZE);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(buf.is_empty());
        assert_eq!(
            decode_buf(&mut buf, MAX).unwrap(),
            Decoded::NeedMoreData(HEADER_SIZE)
        );
    }

    #[test]
    fn test_decode_buf_reports_missing_payload() {
        let mut buf = BytesMut::new();
        encode(
            &Frame::Data {
                stream_id: StreamId::new(3),
                payload: Bytes::from(vec![1u8; 100]),
            },
            &mut buf,
        );
        let mut partial = buf.split_to(HEADER_SIZE + 40);

        assert_eq!(
            decode_buf(&mut partial, MAX).unwrap(),
            Decoded::NeedMoreData(60)
        );
        // Nothing is consumed until the frame is complete.
        assert_eq!(partial.len(), HEADER_SIZE + 40);

        partial.unsplit(buf);
        match decode_buf(&mut partial, MAX).unwrap() {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(frame.payload_len(), 100);
                assert_eq!(consumed, HEADER_SIZE + 100);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(partial.is_empty());
    }

    #[test]
    fn test_oversize_rejected_from_header() {
        // Only the header is present; the length alone is enough to reject.
        let header = hex::decode("02000000000100100000").unwrap();
        let err = decode(&header, 1024).unwrap_err();
        assert_eq!(
            err,
            FrameError::TooLarge {
                length: 0x0010_0000,
                max: 1024
            }
        );
        assert_eq!(err.code(), ErrorCode::FRAME_SIZE_ERROR);
    }

    #[test]
    fn test_structural_violations() {
        let cases: &[(&str, FrameError)] = &[
            ("09000000000100000000", FrameError::InvalidType(0x09)),
            ("01010000000100000000", FrameError::InvalidFlags(0x01)),
            (
                "02000000000000000000",
                FrameError::InvalidStreamId {
                    frame_type: FrameType::Data,
                    stream_id: 0,
                },
            ),
            (
                "01008000000100000000",
                FrameError::InvalidStreamId {
                    frame_type: FrameType::OpenStream,
                    stream_id: 0x8000_0001,
                },
            ),
            (
                "06000000000100000008",
                FrameError::InvalidStreamId {
                    frame_type: FrameType::GoAway,
                    stream_id: 1,
                },
            ),
            (
                "05000000000100000001",
                FrameError::BadPayloadLength {
                    frame_type: FrameType::FinWrite,
                    expected: 0,
                    actual: 1,
                },
            ),
            (
                "06000000000000000004",
                FrameError::BadPayloadLength {
                    frame_type: FrameType::GoAway,
                    expected: GO_AWAY_FIXED_SIZE,
                    actual: 4,
                },
            ),
            ("0300000000010000000400000000", FrameError::ZeroWindowIncrement),
        ];

        for (input, expected) in cases {
            let bytes = hex::decode(input).unwrap();
            assert_eq!(&decode(&bytes, MAX).unwrap_err(), expected, "input {input}");
        }
    }

    #[test]
    fn test_unknown_error_code_preserved() {
        let bytes = hex::decode("040000000003000000040000abcd").unwrap();
        match decode_one(&bytes) {
            Frame::StreamReset { code, .. } => assert_eq!(code.as_u32(), 0xabcd),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
