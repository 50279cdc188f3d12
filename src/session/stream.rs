//! Stream state machine and the caller-facing [`Stream`] handle.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker, ready};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;
use tracing::debug;

use super::lock;
use super::session::Shared;
use super::window::{RecvWindow, SendWindow, WindowError};
use crate::core::{ErrorCode, MuxError, MuxResult};
use crate::transport::{Frame, StreamId};

/// State of one direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfState {
    /// Data may flow.
    Open,
    /// FIN sent or received; buffered data may still be drained.
    HalfClosed,
    /// Finished gracefully.
    Closed,
    /// Terminated abruptly.
    Reset,
}

impl HalfState {
    fn is_terminal(self) -> bool {
        matches!(self, HalfState::Closed | HalfState::Reset)
    }
}

/// What happened to an inbound Data frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DataOutcome {
    /// Appended to the receive buffer.
    Buffered,
    /// Dropped because the stream is already reset.
    Ignored,
    /// The read half no longer accepts data.
    NotReadable,
}

struct StreamState {
    read: HalfState,
    write: HalfState,
    recv_buf: VecDeque<Bytes>,
    buffered: usize,
    recv_window: RecvWindow,
    send_window: SendWindow,
    error: Option<MuxError>,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl StreamState {
    fn error(&self) -> MuxError {
        self.error.clone().unwrap_or(MuxError::StreamClosed)
    }
}

/// Stream state shared by the read loop and the owning handle.
pub(crate) struct StreamShared {
    id: StreamId,
    state: Mutex<StreamState>,
}

impl fmt::Debug for StreamShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("StreamShared")
            .field("id", &self.id)
            .field("read", &state.read)
            .field("write", &state.write)
            .field("buffered", &state.buffered)
            .finish()
    }
}

impl StreamShared {
    pub(crate) fn new(id: StreamId, send_window: SendWindow, recv_window: RecvWindow) -> Self {
        Self {
            id,
            state: Mutex::new(StreamState {
                read: HalfState::Open,
                write: HalfState::Open,
                recv_buf: VecDeque::new(),
                buffered: 0,
                recv_window,
                send_window,
                error: None,
                read_waker: None,
                write_waker: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    /// Half states as `(read, write)`.
    #[cfg(test)]
    pub(crate) fn halves(&self) -> (HalfState, HalfState) {
        let state = lock(&self.state);
        (state.read, state.write)
    }

    pub(crate) fn is_terminal(&self) -> bool {
        let state = lock(&self.state);
        state.read.is_terminal() && state.write.is_terminal()
    }

    /// Buffer an inbound Data payload.
    pub(crate) fn on_data(&self, payload: Bytes) -> Result<DataOutcome, WindowError> {
        let waker = {
            let mut state = lock(&self.state);
            match state.read {
                HalfState::Open => {}
                HalfState::Reset => return Ok(DataOutcome::Ignored),
                HalfState::HalfClosed | HalfState::Closed => return Ok(DataOutcome::NotReadable),
            }
            state.recv_window.consume(payload.len() as u32)?;
            if payload.is_empty() {
                return Ok(DataOutcome::Buffered);
            }
            state.buffered += payload.len();
            state.recv_buf.push_back(payload);
            state.read_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(DataOutcome::Buffered)
    }

    /// Apply peer credit.
    pub(crate) fn on_window_update(&self, increment: u32) -> Result<(), WindowError> {
        let waker = {
            let mut state = lock(&self.state);
            if state.write.is_terminal() {
                return Ok(());
            }
            state.send_window.credit(increment)?;
            state.write_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Peer finished writing. Returns false if the read half had already
    /// finished, which makes the FIN a protocol error.
    pub(crate) fn on_fin(&self) -> bool {
        let waker = {
            let mut state = lock(&self.state);
            if state.read != HalfState::Open {
                return state.read == HalfState::Reset;
            }
            state.read = HalfState::HalfClosed;
            state.read_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Terminate every half that has not finished gracefully.
    ///
    /// Returns false if there was nothing left to reset.
    pub(crate) fn reset(&self, err: MuxError) -> bool {
        let (read_waker, write_waker) = {
            let mut state = lock(&self.state);
            let mut changed = false;
            if !state.read.is_terminal() {
                state.read = HalfState::Reset;
                changed = true;
            }
            if !state.write.is_terminal() {
                state.write = HalfState::Reset;
                changed = true;
            }
            if !changed {
                return false;
            }
            if state.error.is_none() {
                state.error = Some(err);
            }
            (state.read_waker.take(), state.write_waker.take())
        };
        for waker in [read_waker, write_waker].into_iter().flatten() {
            waker.wake();
        }
        true
    }

    /// Close from the owning handle. Returns true if the peer must be told
    /// with a StreamReset.
    fn close_local(&self) -> bool {
        let mut state = lock(&self.state);
        let was_reset = state.read == HalfState::Reset || state.write == HalfState::Reset;
        let graceful = matches!(state.read, HalfState::HalfClosed | HalfState::Closed)
            && matches!(state.write, HalfState::HalfClosed | HalfState::Closed);

        if state.read != HalfState::Closed {
            state.read = HalfState::Reset;
        }
        if state.write != HalfState::Closed {
            state.write = HalfState::Reset;
        }
        if state.error.is_none() {
            state.error = Some(MuxError::StreamClosed);
        }
        !was_reset && !graceful
    }

    /// Start a half-close. Returns true if a FinWrite must be sent.
    fn begin_close_write(&self) -> MuxResult<bool> {
        let mut state = lock(&self.state);
        match state.write {
            HalfState::Open => {
                state.write = HalfState::HalfClosed;
                Ok(true)
            }
            HalfState::HalfClosed | HalfState::Closed => Ok(false),
            HalfState::Reset => Err(state.error()),
        }
    }

    fn finish_close_write(&self) {
        let mut state = lock(&self.state);
        if state.write == HalfState::HalfClosed {
            state.write = HalfState::Closed;
        }
    }

    /// Copy buffered data out. Yields the WindowUpdate increment to send, if any.
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<MuxResult<Option<u32>>> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        if state.read == HalfState::Reset {
            return Poll::Ready(Err(state.error()));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(None));
        }

        if state.buffered > 0 {
            let mut copied = 0;
            while buf.remaining() > 0 {
                let Some(chunk) = state.recv_buf.front_mut() else {
                    break;
                };
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                chunk.advance(n);
                if chunk.is_empty() {
                    state.recv_buf.pop_front();
                }
                copied += n;
            }
            state.buffered -= copied;

            // The peer sends nothing more after FIN, so no credit is returned.
            let update = match state.read {
                HalfState::Open => state.recv_window.release(copied as u32),
                _ => None,
            };
            return Poll::Ready(Ok(update));
        }

        match state.read {
            HalfState::HalfClosed => {
                state.read = HalfState::Closed;
                Poll::Ready(Ok(None))
            }
            HalfState::Open => {
                state.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
            HalfState::Closed | HalfState::Reset => Poll::Ready(Ok(None)),
        }
    }

    /// Take up to `want` bytes of send credit.
    fn poll_reserve(&self, cx: &mut Context<'_>, want: usize) -> Poll<MuxResult<usize>> {
        let mut state = lock(&self.state);
        match state.write {
            HalfState::Open => {}
            HalfState::HalfClosed | HalfState::Closed => {
                return Poll::Ready(Err(MuxError::StreamClosed));
            }
            HalfState::Reset => return Poll::Ready(Err(state.error())),
        }

        let n = state.send_window.reserve(want);
        if n == 0 {
            state.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        Poll::Ready(Ok(n))
    }
}

/// One bidirectional stream of a [`Session`](super::Session).
///
/// Implements [`AsyncRead`] and [`AsyncWrite`]. Dropping the handle closes
/// the stream: if either direction is still open the peer receives a
/// StreamReset with `STREAM_CANCELLED`.
pub struct Stream {
    shared: Arc<StreamShared>,
    session: Arc<Shared>,
    flush: Option<oneshot::Receiver<MuxResult<()>>>,
    fin: Option<oneshot::Receiver<MuxResult<()>>>,
    closed: bool,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.shared.id())
            .finish_non_exhaustive()
    }
}

impl Stream {
    pub(crate) fn new(shared: Arc<StreamShared>, session: Arc<Shared>) -> Self {
        Self {
            shared,
            session,
            flush: None,
            fin: None,
            closed: false,
        }
    }

    /// Stream id.
    pub fn id(&self) -> StreamId {
        self.shared.id()
    }

    /// Half-close: the peer reads EOF once it drains what was written.
    ///
    /// Resolves once the FinWrite frame is on the wire. Calling it again is a
    /// no-op.
    pub async fn close_write(&mut self) -> MuxResult<()> {
        std::future::poll_fn(|cx| self.poll_close_write(cx)).await
    }

    /// Close both directions immediately.
    ///
    /// Data still buffered in either direction is discarded. Later reads and
    /// writes fail with [`MuxError::StreamClosed`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if self.shared.close_local() {
            debug!(stream_id = %self.id(), "stream cancelled");
            let _ = self.session.send_reset(self.id(), ErrorCode::STREAM_CANCELLED);
        }
        self.session.remove_stream(&self.shared);
    }

    fn poll_close_write(&mut self, cx: &mut Context<'_>) -> Poll<MuxResult<()>> {
        if self.fin.is_none() {
            if !self.shared.begin_close_write()? {
                return Poll::Ready(Ok(()));
            }
            self.fin = Some(self.session.send_tracked(Frame::FinWrite {
                stream_id: self.id(),
            }));
        }
        let Some(ack) = self.fin.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        let result = ready!(Pin::new(ack).poll(cx));
        self.fin = None;
        self.shared.finish_close_write();
        self.release_if_done();
        Poll::Ready(result.unwrap_or_else(|_| Err(self.session.terminal_error())))
    }

    fn release_if_done(&self) {
        if self.shared.is_terminal() {
            self.session.remove_stream(&self.shared);
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match ready!(this.shared.poll_read(cx, buf)) {
            Ok(update) => {
                if let Some(increment) = update {
                    let _ = this.session.send(Frame::WindowUpdate {
                        stream_id: this.id(),
                        increment,
                    });
                }
                this.release_if_done();
                Poll::Ready(Ok(()))
            }
            Err(err) => Poll::Ready(Err(err.into())),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let want = buf.len().min(this.session.max_frame_size());
        let n = match ready!(this.shared.poll_reserve(cx, want)) {
            Ok(n) => n,
            Err(err) => return Poll::Ready(Err(err.into())),
        };

        let frame = Frame::Data {
            stream_id: this.id(),
            payload: Bytes::copy_from_slice(&buf[..n]),
        };
        match this.session.send(frame) {
            Ok(()) => Poll::Ready(Ok(n)),
            Err(err) => Poll::Ready(Err(err.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let session = &this.session;
        let ack = this.flush.get_or_insert_with(|| session.request_flush());

        let result = ready!(Pin::new(ack).poll(cx));
        this.flush = None;
        match result {
            Ok(Ok(())) => Poll::Ready(Ok(())),
            Ok(Err(err)) => Poll::Ready(Err(err.into())),
            Err(_) => Poll::Ready(Err(this.session.terminal_error().into())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_close_write(cx).map_err(io::Error::from)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}
