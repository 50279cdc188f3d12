//! Two-slot session outcome: how we ended and how the peer ended.

use bytes::Bytes;
use tokio::sync::watch;

use crate::core::{ErrorCode, MuxError};

#[derive(Debug, Clone, Default)]
struct Slots {
    local: Option<MuxError>,
    remote: Option<MuxError>,
    debug: Bytes,
}

impl Slots {
    fn settled(&self) -> bool {
        self.local.is_some() && self.remote.is_some()
    }
}

/// Write-once cell for the local and remote session errors.
///
/// Each slot accepts its first value only. Waiters are released once both
/// slots are filled.
#[derive(Debug)]
pub(crate) struct OutcomeCell {
    tx: watch::Sender<Slots>,
}

impl OutcomeCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Slots::default());
        Self { tx }
    }

    /// Record why this side ended. Returns true for the first call.
    pub(crate) fn set_local(&self, err: MuxError) -> bool {
        self.tx.send_if_modified(|slots| {
            if slots.local.is_some() {
                return false;
            }
            slots.local = Some(err);
            true
        })
    }

    /// Record why the peer ended, with its GoAway debug data.
    pub(crate) fn set_remote(&self, err: MuxError, debug: Bytes) -> bool {
        self.tx.send_if_modified(|slots| {
            if slots.remote.is_some() {
                return false;
            }
            slots.remote = Some(err);
            slots.debug = debug;
            true
        })
    }

    pub(crate) fn local(&self) -> Option<MuxError> {
        self.tx.borrow().local.clone()
    }

    pub(crate) fn has_remote(&self) -> bool {
        self.tx.borrow().remote.is_some()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.tx.borrow().settled()
    }

    /// Resolve once the peer's outcome is known.
    pub(crate) fn remote_known(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.wait_for(|slots| slots.remote.is_some()).await;
        }
    }

    /// Resolve once both outcomes are known.
    pub(crate) async fn wait(&self) -> Outcome {
        let mut rx = self.tx.subscribe();
        let slots = match rx.wait_for(Slots::settled).await {
            Ok(slots) => slots.clone(),
            Err(_) => self.tx.borrow().clone(),
        };
        Outcome::from(slots)
    }
}

/// Final result of a session, as returned by
/// [`Session::wait`](super::Session::wait).
#[derive(Debug, Clone)]
pub struct Outcome {
    local: MuxError,
    remote: MuxError,
    debug: Bytes,
}

impl Outcome {
    /// Why this side shut down.
    pub fn local_error(&self) -> &MuxError {
        &self.local
    }

    /// Why the peer shut down, as far as this side could tell.
    pub fn remote_error(&self) -> &MuxError {
        &self.remote
    }

    /// Debug data from the peer's GoAway, if any.
    pub fn debug(&self) -> &[u8] {
        &self.debug
    }

    /// `(local, remote)` error codes.
    pub fn codes(&self) -> (ErrorCode, ErrorCode) {
        (self.local.code(), self.remote.code())
    }

    /// Both sides agreed on a clean shutdown.
    pub fn is_clean(&self) -> bool {
        self.codes() == (ErrorCode::NO_ERROR, ErrorCode::NO_ERROR)
    }
}

impl From<Slots> for Outcome {
    fn from(slots: Slots) -> Self {
        let missing = || MuxError::SessionClosed(ErrorCode::SESSION_CLOSED);
        Self {
            local: slots.local.unwrap_or_else(missing),
            remote: slots.remote.unwrap_or_else(missing),
            debug: slots.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_slots_are_write_once() {
        let cell = OutcomeCell::new();
        assert!(cell.set_local(MuxError::SessionClosed(ErrorCode::NO_ERROR)));
        assert!(!cell.set_local(MuxError::WriteTimeout));
        assert_eq!(cell.local().unwrap().code(), ErrorCode::NO_ERROR);
        assert!(!cell.is_settled());

        assert!(cell.set_remote(
            MuxError::SessionClosed(ErrorCode::PROTOCOL_ERROR),
            Bytes::from_static(b"bye")
        ));
        assert!(!cell.set_remote(MuxError::StreamClosed, Bytes::new()));
        assert!(cell.is_settled());
    }

    #[tokio::test]
    async fn test_wait_releases_after_both_slots() {
        let cell = Arc::new(OutcomeCell::new());
        let waiter = tokio::spawn({
            let cell = cell.clone();
            async move { cell.wait().await }
        });

        cell.set_remote(
            MuxError::SessionClosed(ErrorCode::NO_ERROR),
            Bytes::from_static(b"done"),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        cell.set_local(MuxError::SessionClosed(ErrorCode::NO_ERROR));
        let outcome = waiter.await.unwrap();
        assert!(outcome.is_clean());
        assert_eq!(outcome.debug(), b"done");
    }

    #[tokio::test]
    async fn test_remote_known() {
        let cell = OutcomeCell::new();
        let known = cell.remote_known();
        cell.set_remote(MuxError::WriteTimeout, Bytes::new());
        tokio::time::timeout(Duration::from_secs(1), known)
            .await
            .unwrap();
        assert!(cell.has_remote());
    }
}
