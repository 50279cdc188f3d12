//! Weft session layer
//!
//! A [`Session`] wraps one transport and carries any number of [`Stream`]s:
//!
//! - **Streams**: independent, bidirectional, half-closable byte streams
//!   implementing tokio's `AsyncRead` and `AsyncWrite`
//! - **Flow control**: per-stream credit windows so one slow consumer never
//!   stalls another stream
//! - **Shutdown**: a GoAway exchange that settles a local and a remote
//!   [`Outcome`]
//!
//! Each session runs one reader task (the only reader of the transport) and
//! one writer task (the only writer). Callers never touch the transport.

mod config;
mod reader;
#[allow(clippy::module_inception)]
mod session;
mod shutdown;
mod stream;
mod table;
mod window;
mod writer;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{Config, ConfigBuilder, ConfigError, Handshake};
pub use session::Session;
pub use shutdown::Outcome;
pub use stream::{HalfState, Stream};
pub use table::Role;
pub use window::{RecvWindow, SendWindow, WindowError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
