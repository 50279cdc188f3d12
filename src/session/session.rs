//! Session: owns the transport and multiplexes streams over it.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use super::config::{Config, ConfigError, Handshake};
use super::shutdown::{Outcome, OutcomeCell};
use super::stream::{DataOutcome, Stream, StreamShared};
use super::table::{Lookup, Role, StreamTable};
use super::window::{RecvWindow, SendWindow};
use super::writer::WriteRequest;
use super::{lock, reader, writer};
use crate::core::constants::GO_AWAY_FIXED_SIZE;
use crate::core::{ErrorCode, MuxError, MuxResult};
use crate::transport::{Frame, FrameReader, FrameWriter, StreamId};

/// State shared by the session handle, its streams and its tasks.
pub(crate) struct Shared {
    role: Role,
    config: Config,
    table: Mutex<StreamTable>,
    accept: Mutex<VecDeque<Arc<StreamShared>>>,
    accept_notify: Notify,
    writer: mpsc::UnboundedSender<WriteRequest>,
    outcome: OutcomeCell,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Shared {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn outcome(&self) -> &OutcomeCell {
        &self.outcome
    }

    pub(crate) fn max_frame_size(&self) -> usize {
        self.config.max_frame_size as usize
    }

    /// The error handed to callers once teardown has begun.
    pub(crate) fn terminal_error(&self) -> MuxError {
        self.outcome
            .local()
            .unwrap_or(MuxError::SessionClosed(ErrorCode::SESSION_CLOSED))
    }

    fn is_dying(&self) -> bool {
        lock(&self.table).is_closed()
    }

    /// Queue a frame without waiting for it to be written.
    pub(crate) fn send(&self, frame: Frame) -> MuxResult<()> {
        self.writer
            .send(WriteRequest::Frame(frame, None))
            .map_err(|_| self.terminal_error())
    }

    /// Queue a frame and get notified once it has been flushed.
    pub(crate) fn send_tracked(&self, frame: Frame) -> oneshot::Receiver<MuxResult<()>> {
        let (tx, rx) = oneshot::channel();
        // A closed queue drops `tx`, which the receiver reports as an error.
        let _ = self.writer.send(WriteRequest::Frame(frame, Some(tx)));
        rx
    }

    /// Get notified once everything queued so far has been flushed.
    pub(crate) fn request_flush(&self) -> oneshot::Receiver<MuxResult<()>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.writer.send(WriteRequest::Flush(tx));
        rx
    }

    fn new_stream(&self, id: StreamId) -> Arc<StreamShared> {
        Arc::new(StreamShared::new(
            id,
            SendWindow::new(self.config.initial_window),
            RecvWindow::new(
                self.config.initial_window,
                self.config.window_update_threshold,
            ),
        ))
    }

    pub(crate) fn remove_stream(&self, stream: &Arc<StreamShared>) {
        let mut table = lock(&self.table);
        let registered = table
            .get(stream.id())
            .is_some_and(|entry| Arc::ptr_eq(entry, stream));
        if registered {
            table.remove(stream.id());
        }
    }

    fn open_stream(self: &Arc<Self>) -> MuxResult<Stream> {
        let stream = {
            let mut table = lock(&self.table);
            if table.is_closed() {
                return Err(self.terminal_error());
            }
            let id = table.allocate_local()?;
            let stream = self.new_stream(id);
            table.insert(stream.clone());
            // Queued under the table lock so OpenStream frames leave in id order.
            self.send(Frame::OpenStream { stream_id: id })?;
            stream
        };
        debug!(stream_id = %stream.id(), "stream opened");
        Ok(Stream::new(stream, self.clone()))
    }

    fn try_accept(self: &Arc<Self>) -> MuxResult<Option<Stream>> {
        let next = lock(&self.accept).pop_front();
        if let Some(stream) = next {
            debug!(stream_id = %stream.id(), "stream accepted");
            return Ok(Some(Stream::new(stream, self.clone())));
        }
        match self.outcome.local() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    /// Tear down after an error that ends the exchange on both sides.
    pub(crate) fn fail(self: &Arc<Self>, err: MuxError) {
        self.die(err.clone());
        self.outcome.set_remote(err, Bytes::new());
    }

    pub(crate) fn die(self: &Arc<Self>, err: MuxError) {
        let _ = self.die_with(err, Bytes::new());
    }

    /// Start teardown. Returns the GoAway acknowledgement for the first call
    /// and `None` once teardown already began.
    fn die_with(
        self: &Arc<Self>,
        err: MuxError,
        debug: Bytes,
    ) -> Option<oneshot::Receiver<MuxResult<()>>> {
        if !self.outcome.set_local(err.clone()) {
            return None;
        }
        debug!(%err, "session closing");

        // Closing the table and draining the accept queue under one table lock
        // keeps `on_open` from registering a stream in between.
        let (streams, pending, last_stream_id) = {
            let mut table = lock(&self.table);
            let last = table.highest_remote();
            let pending = std::mem::take(&mut *lock(&self.accept));
            (table.close(), pending, last)
        };
        for stream in streams.iter().chain(&pending) {
            stream.reset(err.clone());
        }
        drop(pending);
        self.accept_notify.notify_waiters();

        let max_debug = self.max_frame_size() - GO_AWAY_FIXED_SIZE;
        let debug = if debug.len() > max_debug {
            debug.slice(..max_debug)
        } else {
            debug
        };
        let ack = self.send_tracked(Frame::GoAway {
            last_stream_id,
            code: err.code(),
            debug,
        });
        let _ = self.writer.send(WriteRequest::Shutdown);

        if !self.outcome.has_remote() {
            self.spawn_shutdown_timer();
        }
        Some(ack)
    }

    /// Give up on the peer's GoAway after `shutdown_timeout`.
    fn spawn_shutdown_timer(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let limit = self.config.shutdown_timeout;
        let remote_known = self.outcome.remote_known();
        let weak = Arc::downgrade(self);
        handle.spawn(async move {
            if tokio::time::timeout(limit, remote_known).await.is_ok() {
                return;
            }
            if let Some(shared) = weak.upgrade() {
                warn!(?limit, "peer did not answer GoAway");
                shared.outcome.set_remote(
                    MuxError::SessionClosed(ErrorCode::SHUTDOWN_TIMEOUT),
                    Bytes::new(),
                );
                for task in lock(&shared.tasks).drain(..) {
                    task.abort();
                }
            }
        });
    }

    fn route(&self, id: StreamId, what: &str) -> MuxResult<Option<Arc<StreamShared>>> {
        match lock(&self.table).lookup(id) {
            Lookup::Live(stream) => Ok(Some(stream)),
            Lookup::Stale => Ok(None),
            Lookup::Unopened => Err(MuxError::violation(
                ErrorCode::PROTOCOL_ERROR,
                format!("{what} for unopened stream {id}"),
            )),
        }
    }

    /// Reset `id` on the peer and drop its frames still in flight.
    pub(crate) fn send_reset(&self, id: StreamId, code: ErrorCode) -> MuxResult<()> {
        lock(&self.table).note_reset(id);
        self.send(Frame::StreamReset {
            stream_id: id,
            code,
        })
    }

    /// Answer data or FIN on a finished stream.
    ///
    /// Frames for a stream this side reset were sent before the peer saw the
    /// reset and are dropped. Anything else gets one StreamReset, or ends the
    /// session in strict mode.
    fn reject_closed(&self, id: StreamId, stream: Option<&Arc<StreamShared>>) -> MuxResult<()> {
        if lock(&self.table).was_reset(id) {
            trace!(stream_id = %id, "dropping frame for reset stream");
            return Ok(());
        }
        if self.config.strict {
            return Err(MuxError::violation(
                ErrorCode::STREAM_CLOSED,
                format!("frame for closed stream {id}"),
            ));
        }
        if let Some(stream) = stream {
            stream.reset(MuxError::StreamReset(ErrorCode::STREAM_CLOSED));
            self.remove_stream(stream);
        }
        self.send_reset(id, ErrorCode::STREAM_CLOSED)
    }

    /// Apply one inbound frame. An error is session-fatal.
    pub(crate) fn handle_frame(self: &Arc<Self>, frame: Frame) -> MuxResult<()> {
        if self.is_dying() && !matches!(frame, Frame::GoAway { .. }) {
            return Ok(());
        }

        match frame {
            Frame::OpenStream { stream_id } => self.on_open(stream_id),
            Frame::Data { stream_id, payload } => {
                let Some(stream) = self.route(stream_id, "data")? else {
                    return self.reject_closed(stream_id, None);
                };
                match stream.on_data(payload) {
                    Ok(DataOutcome::Buffered | DataOutcome::Ignored) => Ok(()),
                    Ok(DataOutcome::NotReadable) => self.reject_closed(stream_id, Some(&stream)),
                    Err(err) => Err(MuxError::violation(
                        ErrorCode::FLOW_CONTROL_ERROR,
                        format!("stream {stream_id}: {err}"),
                    )),
                }
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => match self.route(stream_id, "window update")? {
                Some(stream) => stream.on_window_update(increment).map_err(|err| {
                    MuxError::violation(
                        ErrorCode::FLOW_CONTROL_ERROR,
                        format!("stream {stream_id}: {err}"),
                    )
                }),
                None => Ok(()),
            },
            Frame::StreamReset { stream_id, code } => {
                if let Some(stream) = self.route(stream_id, "reset")? {
                    debug!(%stream_id, %code, "stream reset by peer");
                    stream.reset(MuxError::StreamReset(code));
                    self.remove_stream(&stream);
                }
                Ok(())
            }
            Frame::FinWrite { stream_id } => {
                let Some(stream) = self.route(stream_id, "fin")? else {
                    return self.reject_closed(stream_id, None);
                };
                if stream.on_fin() {
                    Ok(())
                } else {
                    self.reject_closed(stream_id, Some(&stream))
                }
            }
            Frame::GoAway {
                last_stream_id,
                code,
                debug,
            } => {
                self.on_go_away(last_stream_id, code, debug);
                Ok(())
            }
        }
    }

    fn on_open(self: &Arc<Self>, id: StreamId) -> MuxResult<()> {
        let refused = {
            let mut table = lock(&self.table);
            if table.is_closed() {
                return Ok(());
            }
            table
                .accept_remote(id)
                .map_err(|reason| MuxError::violation(ErrorCode::PROTOCOL_ERROR, reason))?;

            let mut accept = lock(&self.accept);
            if accept.len() >= self.config.accept_backlog {
                true
            } else {
                let stream = self.new_stream(id);
                table.insert(stream.clone());
                accept.push_back(stream);
                false
            }
        };

        if refused {
            warn!(stream_id = %id, "accept backlog full, refusing stream");
            return self.send_reset(id, ErrorCode::ACCEPT_QUEUE_FULL);
        }
        self.accept_notify.notify_one();
        Ok(())
    }

    fn on_go_away(self: &Arc<Self>, last_stream_id: StreamId, code: ErrorCode, debug: Bytes) {
        debug!(%last_stream_id, %code, "GoAway received");
        self.outcome
            .set_remote(MuxError::SessionClosed(code), debug);

        let refused = {
            let mut table = lock(&self.table);
            let refused = table.local_above(last_stream_id);
            for stream in &refused {
                table.remove(stream.id());
            }
            refused
        };
        for stream in &refused {
            stream.reset(MuxError::StreamReset(ErrorCode::STREAM_REFUSED));
        }

        let local = if code == ErrorCode::NO_ERROR {
            ErrorCode::NO_ERROR
        } else {
            ErrorCode::REMOTE_GONE_AWAY
        };
        self.die(MuxError::SessionClosed(local));
    }
}

/// A multiplexed session over one transport.
///
/// Construction spawns a reader task and a writer task on the current tokio
/// runtime, so it must be called from within one. Dropping the session starts
/// a clean shutdown and resets every stream still open.
pub struct Session {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.shared.role)
            .field("streams", &self.num_streams())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    /// Client side of a transport with the default configuration.
    pub fn client<T>(transport: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::spawn(transport, Role::Client, Config::default())
    }

    /// Server side of a transport with the default configuration.
    pub fn server<T>(transport: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::spawn(transport, Role::Server, Config::default())
    }

    /// Either side of a transport with a custom configuration.
    pub fn with_config<T>(transport: T, role: Role, config: Config) -> Result<Self, ConfigError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        Ok(Self::spawn(transport, role, config))
    }

    fn spawn<T>(transport: T, role: Role, config: Config) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(transport);
        let (tx, rx) = mpsc::unbounded_channel();
        let preface = config.handshake == Handshake::Preface;
        let frame_reader = FrameReader::new(read_half, config.max_frame_size);
        let frame_writer = FrameWriter::new(write_half);

        let shared = Arc::new(Shared {
            role,
            table: Mutex::new(StreamTable::new(role)),
            accept: Mutex::new(VecDeque::new()),
            accept_notify: Notify::new(),
            writer: tx,
            outcome: OutcomeCell::new(),
            tasks: Mutex::new(Vec::with_capacity(2)),
            config,
        });

        let writer_task = tokio::spawn(writer::run(
            frame_writer,
            rx,
            shared.clone(),
            preface && role == Role::Client,
        ));
        let reader_task = tokio::spawn(reader::run(
            frame_reader,
            shared.clone(),
            preface && role == Role::Server,
        ));
        lock(&shared.tasks).extend([writer_task.abort_handle(), reader_task.abort_handle()]);

        debug!(?role, "session started");
        Self { shared }
    }

    /// Open a new stream. Does not wait for the peer.
    pub fn open_stream(&self) -> MuxResult<Stream> {
        self.shared.open_stream()
    }

    /// Wait for the peer to open a stream.
    ///
    /// Fails with the session's terminal error once it has shut down.
    pub async fn accept_stream(&self) -> MuxResult<Stream> {
        loop {
            let mut notified = pin!(self.shared.accept_notify.notified());
            notified.as_mut().enable();

            if let Some(stream) = self.shared.try_accept()? {
                return Ok(stream);
            }
            notified.await;
        }
    }

    /// Shut down cleanly with `NO_ERROR`.
    pub async fn close(&self) -> MuxResult<()> {
        self.close_with(ErrorCode::NO_ERROR, Bytes::new()).await
    }

    /// Shut down, sending `code` and `debug` in the GoAway.
    ///
    /// Resolves once the GoAway is written. Calling it after shutdown began
    /// returns the terminal error.
    pub async fn close_with(&self, code: ErrorCode, debug: impl Into<Bytes>) -> MuxResult<()> {
        let Some(ack) = self
            .shared
            .die_with(MuxError::SessionClosed(code), debug.into())
        else {
            return Err(self.shared.terminal_error());
        };
        match ack.await {
            Ok(result) => result,
            Err(_) => Err(self.shared.terminal_error()),
        }
    }

    /// Wait until both this side's and the peer's outcome are known.
    pub async fn wait(&self) -> Outcome {
        self.shared.outcome.wait().await
    }

    /// Which side of the transport this session is.
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Streams currently registered.
    pub fn num_streams(&self) -> usize {
        lock(&self.shared.table).len()
    }

    /// Whether teardown has begun.
    pub fn is_closed(&self) -> bool {
        self.shared.outcome.local().is_some()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.die(MuxError::SessionClosed(ErrorCode::NO_ERROR));
    }
}
