//! Benchmark client: many concurrent echo round trips over one session.

use std::fmt;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};
use weft::prelude::*;

use crate::{EchoConfig, EchoError};

/// Result of one benchmark run.
#[derive(Debug)]
pub struct Report {
    /// Streams echoed.
    pub streams: usize,
    /// Bytes sent in each direction.
    pub bytes: u64,
    /// Wall time from first open to session close.
    pub elapsed: Duration,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs_f64().max(f64::EPSILON);
        let mib = self.bytes as f64 / (1024.0 * 1024.0);
        write!(
            f,
            "{} streams, {:.1} MiB each way in {:.3}s ({:.1} MiB/s)",
            self.streams,
            mib,
            secs,
            mib / secs
        )
    }
}

/// Connect, echo `config.payload` bytes on `config.streams` streams and
/// close the session cleanly.
pub async fn bench(config: &EchoConfig) -> Result<Report, EchoError> {
    let socket = TcpStream::connect(config.addr).await?;
    socket.set_nodelay(true)?;
    let session = Session::client(socket);
    info!(addr = %config.addr, streams = config.streams, "benchmark connected");

    let mut payload = vec![0u8; config.payload];
    rand::thread_rng().fill(&mut payload[..]);

    let started = Instant::now();
    let mut tasks = Vec::with_capacity(config.streams);
    for _ in 0..config.streams {
        let stream = session.open_stream()?;
        tasks.push(tokio::spawn(round_trip(stream, payload.clone())));
    }
    for task in tasks {
        task.await??;
    }

    session.close().await?;
    let outcome = session.wait().await;
    let elapsed = started.elapsed();
    debug!(?outcome, "session finished");

    Ok(Report {
        streams: config.streams,
        bytes: (config.streams * config.payload) as u64,
        elapsed,
    })
}

async fn round_trip(stream: Stream, payload: Vec<u8>) -> Result<(), EchoError> {
    let id = stream.id().value();
    let (mut reader, mut writer) = tokio::io::split(stream);

    let sender = tokio::spawn(async move {
        writer.write_all(&payload).await?;
        writer.shutdown().await?;
        Ok::<_, std::io::Error>(payload)
    });

    let mut echoed = Vec::new();
    reader.read_to_end(&mut echoed).await?;
    let payload = sender.await??;

    if echoed != payload {
        return Err(EchoError::Mismatch { stream: id });
    }
    Ok(())
}
