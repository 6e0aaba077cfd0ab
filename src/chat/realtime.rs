//! Realtime Sessions
//!
//! Cancellation handles for realtime chat streams, keyed by session id.
//! Cancelling a handle stops the vendor call at the next suspension point
//! and closes the stream with a `cancelled` chunk.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// Handle for controlling a realtime stream
#[derive(Clone)]
pub struct StreamHandle {
    /// Stream ID
    pub id: String,
    pub session_id: String,
    cancel_tx: Arc<watch::Sender<bool>>,
    started_at: Instant,
}

impl StreamHandle {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            cancel_tx: Arc::new(cancel_tx),
            started_at: Instant::now(),
        }
    }

    /// Cancel the stream
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Resolves once the stream is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_tx.subscribe();
        // The sender lives as long as self, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Registry of live realtime streams
#[derive(Default)]
pub struct RealtimeSessions {
    sessions: Mutex<HashMap<String, StreamHandle>>,
}

impl RealtimeSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream for a session
    ///
    /// A newer request for the same session supersedes the old stream,
    /// which is cancelled.
    pub fn register(&self, session_id: &str) -> StreamHandle {
        let handle = StreamHandle::new(session_id);
        if let Some(previous) = self.sessions.lock().insert(session_id.to_string(), handle.clone()) {
            debug!("Superseding realtime stream {} for session {}", previous.id, session_id);
            previous.cancel();
        }
        handle
    }

    /// Cancel the live stream of a session; false if there is none
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.sessions.lock().remove(session_id) {
            Some(handle) => {
                info!(
                    "Cancelled realtime session {} after {:?}",
                    session_id,
                    handle.elapsed()
                );
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget a finished stream
    ///
    /// Only removes the entry if it still belongs to `handle`.
    pub fn remove(&self, handle: &StreamHandle) {
        let mut sessions = self.sessions.lock();
        if sessions.get(&handle.session_id).is_some_and(|h| h.id == handle.id) {
            sessions.remove(&handle.session_id);
        }
    }

    /// Cancel every live stream; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<StreamHandle> = self.sessions.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.cancel();
        }
        drained.len()
    }

    pub fn active(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let sessions = RealtimeSessions::new();
        let handle = sessions.register("s1");
        assert!(!handle.is_cancelled());

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };

        assert!(sessions.cancel("s1"));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_cancelled());
        assert!(!sessions.cancel("s1"));
    }

    #[test]
    fn test_register_supersedes() {
        let sessions = RealtimeSessions::new();
        let first = sessions.register("s1");
        let second = sessions.register("s1");

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(sessions.active(), 1);

        // A stale handle doesn't remove the newer stream
        sessions.remove(&first);
        assert_eq!(sessions.active(), 1);
        sessions.remove(&second);
        assert_eq!(sessions.active(), 0);
    }

    #[test]
    fn test_cancel_all() {
        let sessions = RealtimeSessions::new();
        let a = sessions.register("a");
        let b = sessions.register("b");
        assert_eq!(sessions.cancel_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
        assert_eq!(sessions.active(), 0);
    }
}
