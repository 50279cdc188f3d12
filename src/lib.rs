//! # Weft
//!
//! Many independent, bidirectional byte streams multiplexed over one
//! reliable, ordered transport (a TCP connection, a pipe, anything that is
//! `AsyncRead + AsyncWrite`).
//!
//! - **Streams**: each with its own open/half-close/reset lifecycle
//! - **Flow control**: per-stream credit windows, so a slow reader on one
//!   stream never blocks another
//! - **Clean shutdown**: a GoAway exchange that reports why each side ended
//! - **Plain tokio I/O**: a [`Stream`](session::Stream) works with
//!   `tokio::io::copy`, `AsyncReadExt` and `AsyncWriteExt`
//!
//! ## Feature Flags
//!
//! - `session` (default): the tokio-based session layer. Without it only the
//!   pure frame codec and error types are built.
//!
//! ## Modules
//!
//! - [`core`]: Constants and error types (always included)
//! - [`transport`]: Frame codec, plus framed reader/writer with `session`
//! - [`session`]: Sessions and streams (requires `session` feature)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//! use weft::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let tcp = tokio::net::TcpStream::connect("127.0.0.1:4000").await?;
//! let session = Session::client(tcp);
//!
//! let mut stream = session.open_stream()?;
//! stream.write_all(b"hello").await?;
//! stream.close_write().await?;
//!
//! let mut reply = Vec::new();
//! stream.read_to_end(&mut reply).await?;
//!
//! session.close().await?;
//! let outcome = session.wait().await;
//! assert!(outcome.is_clean());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Frame codec (always included); framed I/O is feature-gated inside
pub mod transport;

// Session layer (feature-gated)
#[cfg(feature = "session")]
#[cfg_attr(docsrs, doc(cfg(feature = "session")))]
pub mod session;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{ErrorCode, MuxError, MuxResult, get_error};

    pub use crate::transport::{Frame, FrameType, StreamId};

    #[cfg(feature = "session")]
    pub use crate::session::{Config, Handshake, Outcome, Role, Session, Stream};
}

// Re-export commonly used items at crate root
pub use crate::core::{ErrorCode, MuxError, MuxResult, get_error};

#[cfg(feature = "session")]
pub use crate::session::{Config, ConfigBuilder, Handshake, Outcome, Role, Session, Stream};
