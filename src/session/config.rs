//! Session configuration.

use std::time::Duration;

use thiserror::Error;

use crate::core::constants::*;

/// Errors produced when validating a [`Config`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Initial window is zero or above the protocol maximum.
    #[error("initial window {0} must be in 1..={max}", max = MAX_WINDOW)]
    InitialWindow(u32),

    /// Update threshold is zero or larger than the window.
    #[error("window update threshold {threshold} must be in 1..={window}")]
    UpdateThreshold {
        /// Requested threshold.
        threshold: u32,
        /// Configured initial window.
        window: u32,
    },

    /// Max frame size outside the supported range.
    #[error("max frame size {0} must be in {min}..={max}", min = MIN_MAX_FRAME_SIZE, max = MAX_MAX_FRAME_SIZE)]
    MaxFrameSize(u32),

    /// Accept backlog of zero.
    #[error("accept backlog must be at least 1")]
    AcceptBacklog,

    /// Zero write or shutdown timeout.
    #[error("{0} timeout must be non-zero")]
    ZeroTimeout(&'static str),
}

/// Optional bytes exchanged before the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handshake {
    /// Frames start immediately.
    #[default]
    None,
    /// The client writes [`PREFACE`] and the server checks it.
    Preface,
}

/// Session configuration.
///
/// Both peers must agree on `initial_window`, `max_frame_size` and
/// `handshake`; none of them are negotiated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-stream credit in each direction at open time.
    pub initial_window: u32,

    /// Freed receive bytes that trigger a WindowUpdate.
    pub window_update_threshold: u32,

    /// Largest frame payload sent or accepted.
    pub max_frame_size: u32,

    /// Un-accepted inbound streams kept before refusing new ones.
    pub accept_backlog: usize,

    /// Bound on each transport write. `None` waits forever.
    pub write_timeout: Option<Duration>,

    /// How long to wait for the peer's GoAway after local teardown.
    pub shutdown_timeout: Duration,

    /// Treat data or FIN for closed streams as session-fatal.
    pub strict: bool,

    /// Connection preface mode.
    pub handshake: Handshake,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_window: DEFAULT_INITIAL_WINDOW,
            window_update_threshold: DEFAULT_INITIAL_WINDOW / 2,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            accept_backlog: DEFAULT_ACCEPT_BACKLOG,
            write_timeout: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            strict: false,
            handshake: Handshake::None,
        }
    }
}

impl Config {
    /// Start building a configuration from defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Check every field against protocol limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_window == 0 || self.initial_window > MAX_WINDOW {
            return Err(ConfigError::InitialWindow(self.initial_window));
        }
        if self.window_update_threshold == 0 || self.window_update_threshold > self.initial_window
        {
            return Err(ConfigError::UpdateThreshold {
                threshold: self.window_update_threshold,
                window: self.initial_window,
            });
        }
        if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&self.max_frame_size) {
            return Err(ConfigError::MaxFrameSize(self.max_frame_size));
        }
        if self.accept_backlog == 0 {
            return Err(ConfigError::AcceptBacklog);
        }
        if self.write_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroTimeout("write"));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("shutdown"));
        }
        Ok(())
    }
}

/// Builder for [`Config`].
#[derive(Debug)]
pub struct ConfigBuilder {
    config: Config,
    threshold_set: bool,
}

impl ConfigBuilder {
    /// Create a new builder holding the defaults.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            threshold_set: false,
        }
    }

    /// Set the initial per-stream window.
    ///
    /// Unless set explicitly, the update threshold follows at half this value.
    pub fn initial_window(mut self, window: u32) -> Self {
        self.config.initial_window = window;
        self
    }

    /// Set the WindowUpdate coalescing threshold.
    pub fn window_update_threshold(mut self, threshold: u32) -> Self {
        self.config.window_update_threshold = threshold;
        self.threshold_set = true;
        self
    }

    /// Set the maximum frame payload.
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the accept backlog.
    pub fn accept_backlog(mut self, backlog: usize) -> Self {
        self.config.accept_backlog = backlog;
        self
    }

    /// Bound every transport write.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = Some(timeout);
        self
    }

    /// Set the GoAway wait after local teardown.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Enable or disable strict handling of frames for closed streams.
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    /// Set the connection preface mode.
    pub fn handshake(mut self, handshake: Handshake) -> Self {
        self.config.handshake = handshake;
        self
    }

    /// Validate and build the configuration.
    pub fn build(mut self) -> Result<Config, ConfigError> {
        if !self.threshold_set {
            self.config.window_update_threshold = (self.config.initial_window / 2).max(1);
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
