//! Weft wire protocol - transport layer
//!
//! This module turns a reliable byte transport into a sequence of frames:
//!
//! - **Frame encoding/decoding**: [`Frame`], [`FrameHeader`], [`encode`], [`decode`]
//! - **Framed I/O**: [`FrameReader`] and [`FrameWriter`] over tokio halves
//!   (requires the `session` feature)
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Session Layer                   │
//! │   streams, flow control, shutdown       │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   frame codec, framed reader/writer     │
//! ├─────────────────────────────────────────┤
//! │    Reliable byte stream (TCP, pipe)     │
//! └─────────────────────────────────────────┘
//! ```

#[cfg(feature = "session")]
mod codec;
mod frame;

#[cfg(feature = "session")]
pub use codec::*;
pub use frame::*;
