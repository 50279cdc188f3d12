//! Echo server: every accepted stream gets its bytes back.

use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use weft::prelude::*;

use crate::EchoError;

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener) -> Result<(), EchoError> {
    info!(addr = %listener.local_addr()?, "echo server listening");
    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true)?;
        tokio::spawn(handle_connection(socket, peer));
    }
}

async fn handle_connection(socket: TcpStream, peer: SocketAddr) {
    let session = Session::server(socket);
    info!(%peer, "session started");

    let mut streams = 0u64;
    while let Ok(stream) = session.accept_stream().await {
        streams += 1;
        tokio::spawn(echo(stream));
    }

    let outcome = session.wait().await;
    if outcome.is_clean() {
        info!(%peer, streams, "session closed");
    } else {
        let (local, remote) = outcome.codes();
        warn!(%peer, streams, %local, %remote, "session ended with error");
    }
}

async fn echo(stream: Stream) {
    let id = stream.id();
    let (mut reader, mut writer) = tokio::io::split(stream);

    let result = async {
        let copied = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.shutdown().await?;
        Ok::<_, std::io::Error>(copied)
    }
    .await;

    match result {
        Ok(bytes) => debug!(stream_id = %id, bytes, "echo finished"),
        Err(err) => {
            let (code, session_wide) = get_error(&err);
            debug!(stream_id = %id, %code, session_wide, "echo aborted");
        }
    }
}
