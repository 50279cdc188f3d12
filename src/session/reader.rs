//! The session's read loop: the only reader of the transport.

use std::io;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tracing::{debug, trace, warn};

use super::session::Shared;
use crate::core::MuxError;
use crate::core::constants::PREFACE;
use crate::transport::FrameReader;

/// Read and dispatch frames until the transport ends or the session settles.
pub(crate) async fn run<R>(mut reader: FrameReader<R>, shared: Arc<Shared>, expect_preface: bool)
where
    R: AsyncRead + Unpin,
{
    if expect_preface {
        if let Err(err) = reader.read_preface(PREFACE).await {
            warn!(%err, "connection preface rejected");
            shared.fail(err);
            return;
        }
    }

    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                trace!(
                    frame_type = ?frame.frame_type(),
                    stream_id = %frame.stream_id(),
                    length = frame.payload_len(),
                    "frame received"
                );
                if let Err(err) = shared.handle_frame(frame) {
                    warn!(%err, "protocol violation");
                    shared.die(err);
                }
                if shared.outcome().is_settled() {
                    break;
                }
            }
            Ok(None) => {
                debug!("transport closed by peer");
                let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "transport closed by peer");
                shared.fail(MuxError::from(eof));
                break;
            }
            Err(err) => {
                warn!(%err, "transport read failed");
                shared.fail(err);
                break;
            }
        }
    }
    debug!("reader stopped");
}
