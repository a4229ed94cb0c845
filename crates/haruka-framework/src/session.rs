//! Cancellable background sessions owned by modules.
//!
//! A long-running command (a repeat loop, a countdown) starts a session and
//! keeps its [`SessionHandle`]. Stopping it goes through the handle, never
//! through shared flags, so two sessions can't trample each other's state.
//!
//! [`SessionSet`] tracks at most one session per key (usually a chat id).
//! Dropping the set cancels everything it tracks, so sessions die with the
//! module instance that owns them.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to one running session.
#[derive(Debug)]
pub struct SessionHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawns `body` with a fresh cancellation token.
    ///
    /// `body` must watch the token and return once it is cancelled.
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_with(CancellationToken::new(), body)
    }

    fn spawn_with<F, Fut>(token: CancellationToken, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(body(token.clone()));
        Self { token, task }
    }

    /// Asks the session to stop.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the session and waits for it to exit.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

/// At most one live session per key.
#[derive(Debug, Default)]
pub struct SessionSet {
    parent: CancellationToken,
    sessions: Mutex<HashMap<i64, SessionHandle>>,
}

impl SessionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session for `key`.
    ///
    /// Returns `false` and leaves the running session alone if one is already
    /// live for that key.
    pub fn start<F, Fut>(&self, key: i64, body: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(&key)
            && !existing.is_finished()
            && !existing.is_cancelled()
        {
            return false;
        }
        let handle = SessionHandle::spawn_with(self.parent.child_token(), body);
        sessions.insert(key, handle);
        debug!(key, "Session started");
        true
    }

    /// Cancels the session for `key`. Returns `false` if none was live.
    pub fn stop(&self, key: i64) -> bool {
        match self.sessions.lock().remove(&key) {
            Some(handle) => {
                let live = !handle.is_finished();
                handle.cancel();
                live
            }
            None => false,
        }
    }

    /// Returns `true` if a session for `key` is still running.
    pub fn is_active(&self, key: i64) -> bool {
        self.sessions
            .lock()
            .get(&key)
            .is_some_and(|h| !h.is_finished() && !h.is_cancelled())
    }

    /// Cancels every session in the set.
    pub fn stop_all(&self) {
        self.parent.cancel();
        self.sessions.lock().clear();
    }
}

impl Drop for SessionSet {
    fn drop(&mut self) {
        self.parent.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn ticker(counter: Arc<AtomicU32>) -> impl FnOnce(CancellationToken) -> futures::future::BoxFuture<'static, ()> {
        move |token| {
            Box::pin(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_stop() {
        let counter = Arc::new(AtomicU32::new(0));
        let handle = SessionHandle::spawn(ticker(Arc::clone(&counter)));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.stop().await;
        let seen = counter.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_session_per_key() {
        let sessions = SessionSet::new();
        let a = Arc::new(AtomicU32::new(0));
        let b = Arc::new(AtomicU32::new(0));

        assert!(sessions.start(7, ticker(Arc::clone(&a))));
        assert!(!sessions.start(7, ticker(Arc::clone(&b))));
        assert!(sessions.start(8, ticker(Arc::clone(&b))));
        assert!(sessions.is_active(7));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(sessions.stop(7));
        assert!(!sessions.is_active(7));
        assert!(!sessions.stop(7));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_sessions() {
        let counter = Arc::new(AtomicU32::new(0));
        let sessions = SessionSet::new();
        sessions.start(1, ticker(Arc::clone(&counter)));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(sessions);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
