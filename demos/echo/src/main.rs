//! Weft Echo Example
//!
//! An echo server and a throughput benchmark that drives many concurrent
//! streams over a single TCP connection.
//!
//! Environment variables:
//! - WEFT_MODE: "server", "bench" or "local" (server and bench in one process)
//! - WEFT_ADDR: Listen address (server) or target (bench), default 127.0.0.1:19999
//! - WEFT_STREAMS: Concurrent streams per benchmark run, default 64
//! - WEFT_PAYLOAD: Bytes echoed per stream, default 1048576
//! - WEFT_LOG_LEVEL: trace|debug|info|warn|error

mod client;
mod server;

use std::env;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::{Level, error, info};

/// Errors that end the demo.
#[derive(Debug, Error)]
pub enum EchoError {
    /// Bad environment variable.
    #[error("invalid {name}: {value:?}")]
    Env {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// Socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Session or stream failure.
    #[error("mux error: {0}")]
    Mux(#[from] weft::MuxError),

    /// Echoed bytes did not match what was sent.
    #[error("stream {stream}: echo mismatch")]
    Mismatch {
        /// Stream whose echo differed.
        stream: u32,
    },

    /// A benchmark task panicked.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Settings read from the environment.
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Run mode.
    pub mode: Mode,
    /// Listen or connect address.
    pub addr: SocketAddr,
    /// Streams opened by the benchmark.
    pub streams: usize,
    /// Bytes echoed per stream.
    pub payload: usize,
}

/// What the process does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Accept connections and echo every stream.
    Server,
    /// Connect and run the benchmark once.
    Bench,
    /// Listen on an ephemeral port and benchmark against it.
    Local,
}

fn var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, EchoError> {
    match var(name) {
        Some(value) => value.parse().map_err(|_| EchoError::Env { name, value }),
        None => Ok(default),
    }
}

impl EchoConfig {
    fn from_env() -> Result<Self, EchoError> {
        let mode = match var("WEFT_MODE").as_deref() {
            None | Some("local") => Mode::Local,
            Some("server") => Mode::Server,
            Some("bench") => Mode::Bench,
            Some(other) => {
                return Err(EchoError::Env {
                    name: "WEFT_MODE",
                    value: other.to_string(),
                });
            }
        };
        let default_addr = SocketAddr::from(([127, 0, 0, 1], 19999));

        Ok(Self {
            mode,
            addr: parsed("WEFT_ADDR", default_addr)?,
            streams: parsed("WEFT_STREAMS", 64)?,
            payload: parsed("WEFT_PAYLOAD", 1024 * 1024)?,
        })
    }
}

fn init_logging() {
    let level = var("WEFT_LOG_LEVEL")
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: EchoConfig) -> Result<(), EchoError> {
    match config.mode {
        Mode::Server => {
            let listener = tokio::net::TcpListener::bind(config.addr).await?;
            server::serve(listener).await
        }
        Mode::Bench => {
            let report = client::bench(&config).await?;
            println!("{report}");
            Ok(())
        }
        Mode::Local => {
            let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
            let addr = listener.local_addr()?;
            let server = tokio::spawn(server::serve(listener));

            let report = client::bench(&EchoConfig { addr, ..config }).await?;
            println!("{report}");
            server.abort();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = match EchoConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };
    info!(?config, "weft-echo starting");

    if let Err(e) = run(config).await {
        error!("{e}");
        std::process::exit(1);
    }
}
