//! Protocol constants.
//!
//! Values in the wire-format section are fixed by the protocol and MUST NOT be
//! changed without breaking interoperability. Defaults are deployment settings
//! that both peers are expected to share.

use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Frame header size (type + flags + stream id + length).
pub const HEADER_SIZE: usize = 1 + 1 + 4 + 4;

/// Highest usable stream id (the top bit of the id field is reserved).
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Largest flow-control window either side may advertise.
pub const MAX_WINDOW: u32 = 0x7FFF_FFFF;

/// Size of the fixed part of a GoAway payload (last stream id + error code).
pub const GO_AWAY_FIXED_SIZE: usize = 8;

/// Connection preface written by the client when the preface handshake is on.
pub const PREFACE: &[u8; 8] = b"WEFT/1\r\n";

// =============================================================================
// FRAME TYPES
// =============================================================================

/// Opens a new stream.
pub const FRAME_TYPE_OPEN_STREAM: u8 = 0x01;

/// Carries stream payload.
pub const FRAME_TYPE_DATA: u8 = 0x02;

/// Returns flow-control credit to the sender.
pub const FRAME_TYPE_WINDOW_UPDATE: u8 = 0x03;

/// Abruptly terminates both directions of a stream.
pub const FRAME_TYPE_STREAM_RESET: u8 = 0x04;

/// Half-closes the sender's direction of a stream.
pub const FRAME_TYPE_FIN_WRITE: u8 = 0x05;

/// Session-level shutdown carrying a final error code.
pub const FRAME_TYPE_GO_AWAY: u8 = 0x06;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Initial per-stream window in each direction.
pub const DEFAULT_INITIAL_WINDOW: u32 = 256 * 1024;

/// Largest payload carried by a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Smallest `max_frame_size` a deployment may configure.
pub const MIN_MAX_FRAME_SIZE: u32 = 1024;

/// Largest `max_frame_size` a deployment may configure.
pub const MAX_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Inbound streams that may wait for `accept_stream` before new ones are refused.
pub const DEFAULT_ACCEPT_BACKLOG: usize = 128;

/// How long a closing session waits for the peer's GoAway.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum number of bytes read from the transport per call.
pub const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Locally reset stream ids remembered so the peer's in-flight frames for
/// them are dropped without a reply.
pub const RESET_ID_MEMORY: usize = 1024;
