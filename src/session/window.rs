//! Per-stream flow-control windows.

use thiserror::Error;

use crate::core::constants::MAX_WINDOW;

/// Flow-control accounting failures. Both are session-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WindowError {
    /// Credit would push the send window past the protocol maximum.
    #[error("window overflow: {available} + {increment} exceeds {max}", max = MAX_WINDOW)]
    Overflow {
        /// Credit before the update.
        available: u32,
        /// Increment received.
        increment: u32,
    },

    /// Peer sent more data than the advertised window.
    #[error("window overrun: received {received} bytes with {window} bytes of window")]
    Overrun {
        /// Bytes in the offending frame.
        received: u32,
        /// Window left before the frame.
        window: u32,
    },
}

/// Outbound credit granted by the peer.
#[derive(Debug, Clone, Copy)]
pub struct SendWindow {
    available: u32,
}

impl SendWindow {
    /// Create a window holding `initial` bytes of credit.
    pub fn new(initial: u32) -> Self {
        Self { available: initial }
    }

    /// Bytes that may be sent right now.
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Take up to `want` bytes of credit, returning how much was taken.
    pub fn reserve(&mut self, want: usize) -> usize {
        let n = want.min(self.available as usize);
        self.available -= n as u32;
        n
    }

    /// Add credit from a WindowUpdate.
    pub fn credit(&mut self, increment: u32) -> Result<(), WindowError> {
        match self.available.checked_add(increment) {
            Some(next) if next <= MAX_WINDOW => {
                self.available = next;
                Ok(())
            }
            _ => Err(WindowError::Overflow {
                available: self.available,
                increment,
            }),
        }
    }
}

/// Inbound window advertised to the peer.
#[derive(Debug, Clone, Copy)]
pub struct RecvWindow {
    window: u32,
    pending: u32,
    threshold: u32,
}

impl RecvWindow {
    /// Create a window of `initial` bytes that releases credit in chunks of at
    /// least `threshold` bytes.
    pub fn new(initial: u32, threshold: u32) -> Self {
        Self {
            window: initial,
            pending: 0,
            threshold: threshold.max(1),
        }
    }

    /// Bytes the peer may still send.
    pub fn remaining(&self) -> u32 {
        self.window
    }

    /// Account for `n` received bytes.
    pub fn consume(&mut self, n: u32) -> Result<(), WindowError> {
        if n > self.window {
            return Err(WindowError::Overrun {
                received: n,
                window: self.window,
            });
        }
        self.window -= n;
        Ok(())
    }

    /// Account for `n` bytes handed to the application.
    ///
    /// Returns the increment to advertise once enough freed bytes have
    /// accumulated.
    pub fn release(&mut self, n: u32) -> Option<u32> {
        self.pending = self.pending.saturating_add(n);
        if self.pending < self.threshold {
            return None;
        }
        let increment = self.pending;
        self.pending = 0;
        self.window = self.window.saturating_add(increment);
        Some(increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_window_reserve() {
        let mut window = SendWindow::new(100);
        assert_eq!(window.reserve(30), 30);
        assert_eq!(window.reserve(100), 70);
        assert_eq!(window.reserve(10), 0);
        assert_eq!(window.available(), 0);

        window.credit(50).unwrap();
        assert_eq!(window.reserve(80), 50);
    }

    #[test]
    fn test_send_window_overflow() {
        let mut window = SendWindow::new(MAX_WINDOW - 10);
        window.credit(10).unwrap();
        assert_eq!(
            window.credit(1),
            Err(WindowError::Overflow {
                available: MAX_WINDOW,
                increment: 1
            })
        );

        let mut window = SendWindow::new(1);
        assert!(window.credit(u32::MAX).is_err());
        assert_eq!(window.available(), 1);
    }

    #[test]
    fn test_recv_window_overrun() {
        let mut window = RecvWindow::new(100, 50);
        window.consume(60).unwrap();
        window.consume(40).unwrap();
        assert_eq!(
            window.consume(1),
            Err(WindowError::Overrun {
                received: 1,
                window: 0
            })
        );
    }

    #[test]
    fn test_recv_window_coalesces_updates() {
        let mut window = RecvWindow::new(100, 50);
        window.consume(100).unwrap();

        assert_eq!(window.release(20), None);
        assert_eq!(window.release(20), None);
        assert_eq!(window.release(20), Some(60));
        assert_eq!(window.remaining(), 60);
        assert_eq!(window.release(40), None);
    }
}
