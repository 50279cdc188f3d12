//! The session's single write path.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::session::Shared;
use crate::core::constants::PREFACE;
use crate::core::{MuxError, MuxResult};
use crate::transport::{Frame, FrameWriter};

/// Acknowledgement sent once a request is on the wire.
pub(crate) type Ack = oneshot::Sender<MuxResult<()>>;

/// Work for the writer task.
#[derive(Debug)]
pub(crate) enum WriteRequest {
    /// Write a frame, optionally acknowledging after the next flush.
    Frame(Frame, Option<Ack>),
    /// Acknowledge after everything queued so far is flushed.
    Flush(Ack),
    /// Flush, shut down the transport write half and stop.
    Shutdown,
}

async fn bounded<F>(limit: Option<Duration>, op: F) -> MuxResult<()>
where
    F: Future<Output = io::Result<()>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, op).await {
            Ok(result) => result.map_err(MuxError::from),
            Err(_) => Err(MuxError::WriteTimeout),
        },
        None => op.await.map_err(MuxError::from),
    }
}

/// Drain write requests until shutdown.
///
/// Requests are written in arrival order. The transport is flushed whenever
/// the queue runs dry, and pending acknowledgements are answered with the
/// flush result. After the first failure nothing more is written.
pub(crate) async fn run<W>(
    mut writer: FrameWriter<W>,
    mut requests: mpsc::UnboundedReceiver<WriteRequest>,
    shared: Arc<Shared>,
    send_preface: bool,
) where
    W: AsyncWrite + Unpin,
{
    let limit = shared.config().write_timeout;
    let mut failed: Option<MuxError> = None;
    let mut acks: Vec<Ack> = Vec::new();

    if send_preface {
        if let Err(err) = bounded(limit, writer.write_raw(PREFACE)).await {
            warn!(%err, "connection preface not sent");
            shared.die(err.clone());
            failed = Some(err);
        }
    }

    let mut shutdown = false;
    while !shutdown {
        let Some(first) = requests.recv().await else {
            break;
        };

        let mut next = Some(first);
        while let Some(request) = next.take() {
            match request {
                WriteRequest::Frame(frame, ack) => {
                    if failed.is_none() {
                        trace!(
                            frame_type = ?frame.frame_type(),
                            stream_id = %frame.stream_id(),
                            length = frame.payload_len(),
                            "frame sent"
                        );
                        if let Err(err) = bounded(limit, writer.write_frame(&frame)).await {
                            failed = Some(err);
                        }
                    }
                    acks.extend(ack);
                }
                WriteRequest::Flush(ack) => acks.push(ack),
                WriteRequest::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
            next = requests.try_recv().ok();
        }

        if failed.is_none() {
            if let Err(err) = bounded(limit, writer.flush()).await {
                failed = Some(err);
            }
        }

        let result = match &failed {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        };
        for ack in acks.drain(..) {
            let _ = ack.send(result.clone());
        }

        if let Some(err) = &failed {
            warn!(%err, "transport write failed");
            shared.die(err.clone());
            break;
        }
    }

    if failed.is_none() {
        if let Err(err) = bounded(limit, writer.shutdown()).await {
            debug!(%err, "transport shutdown failed");
        }
    }

    // Anything still queued will never be written.
    requests.close();
    let err = failed.unwrap_or_else(|| shared.terminal_error());
    while let Ok(request) = requests.try_recv() {
        match request {
            WriteRequest::Frame(_, Some(ack)) | WriteRequest::Flush(ack) => {
                let _ = ack.send(Err(err.clone()));
            }
            WriteRequest::Frame(_, None) | WriteRequest::Shutdown => {}
        }
    }
    debug!("writer stopped");
}
