//! Cooperative cancellation (§4.F `CancellationToken` / `CancellationSource`).
//!
//! A token is a fire-once observable: `is_cancelled` only ever moves from
//! `false` to `true`, and every registered listener is invoked exactly once,
//! on the next scheduling tick if registered after the fact. A source lazily
//! materializes its token on first access, returning a shared pre-cancelled
//! singleton if cancellation happened before anyone observed it — an
//! allocation optimization the spec marks as optional (§9).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;

type Listener = Box<dyn FnOnce() + Send>;

struct TokenInner {
    cancelled: AtomicBool,
    listeners: DashMap<usize, Listener>,
    next_listener_id: AtomicUsize,
}

/// A handle returned by [`CancellationToken::on_cancelled`] that removes the
/// listener if dropped before it fires.
pub struct ListenerDisposer {
    inner: Arc<TokenInner>,
    id: usize,
}

impl ListenerDisposer {
    pub fn dispose(self) {
        self.inner.listeners.remove(&self.id);
    }
}

/// An observable, fire-once cancellation signal.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                listeners: DashMap::new(),
                next_listener_id: AtomicUsize::new(0),
            }),
        }
    }

    fn pre_cancelled() -> Self {
        let token = Self::new();
        token.inner.cancelled.store(true, Ordering::SeqCst);
        token
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register a handler to run when cancellation fires. If already
    /// cancelled, the handler runs on the next scheduling tick instead of
    /// synchronously, matching §4.F's contract.
    pub fn on_cancelled<F>(&self, handler: F) -> ListenerDisposer
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        if self.is_cancelled() {
            tokio::spawn(async move {
                handler();
            });
        } else {
            self.inner.listeners.insert(id, Box::new(handler));
        }
        ListenerDisposer {
            inner: self.inner.clone(),
            id,
        }
    }

    /// Fire the token exactly once, invoking every registered listener.
    /// Idempotent: firing an already-cancelled token is a no-op.
    fn fire(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<usize> = self.inner.listeners.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, listener)) = self.inner.listeners.remove(&id) {
                listener();
            }
        }
    }
}

static PRE_CANCELLED: OnceLock<CancellationToken> = OnceLock::new();

fn pre_cancelled_singleton() -> CancellationToken {
    PRE_CANCELLED.get_or_init(CancellationToken::pre_cancelled).clone()
}

enum SourceState {
    Fresh,
    Cancelled,
    Materialized(CancellationToken),
}

/// The cancel-side of a [`CancellationToken`]: owns the decision to cancel,
/// optionally backed by a shared file for cross-process signaling (§4.F,
/// §6) — used when the receiving peer is a separate process that cannot
/// observe in-process state directly.
pub struct CancellationSource {
    state: Mutex<SourceState>,
    file_path: Option<PathBuf>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SourceState::Fresh),
            file_path: None,
        }
    }

    /// A source whose cancellation is mirrored by the presence of a file at
    /// `path`: the sending peer creates it, this side's `is_cancelled`
    /// observes it.
    pub fn with_file(path: PathBuf) -> Self {
        Self {
            state: Mutex::new(SourceState::Fresh),
            file_path: Some(path),
        }
    }

    /// Materialize (or fetch) the observable token. Lazily allocates on
    /// first access; if cancellation already happened, returns the shared
    /// pre-cancelled singleton rather than allocating a fresh token.
    pub fn token(&self) -> CancellationToken {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            SourceState::Materialized(token) => token.clone(),
            SourceState::Cancelled => pre_cancelled_singleton(),
            SourceState::Fresh => {
                let token = CancellationToken::new();
                *state = SourceState::Materialized(token.clone());
                token
            }
        }
    }

    /// Check (and, for file-backed sources, possibly trigger) cancellation.
    pub fn is_cancelled(&self) -> bool {
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match &*state {
                SourceState::Cancelled => return true,
                SourceState::Materialized(token) if token.is_cancelled() => return true,
                _ => {}
            }
        }

        if let Some(path) = &self.file_path {
            if path.exists() {
                self.cancel();
                return true;
            }
        }
        false
    }

    /// Fire the token. For file-backed sources, attempts to create the
    /// signal file; failure to create it means the remote peer will never
    /// observe the request and the cancellation is silently dropped.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            SourceState::Materialized(token) => token.fire(),
            SourceState::Cancelled => {}
            SourceState::Fresh => *state = SourceState::Cancelled,
        }
        drop(state);

        if let Some(path) = &self.file_path {
            let _ = std::fs::File::create(path);
        }
    }

    /// Best-effort cleanup of the backing file once cancelled. Does not
    /// itself cancel the token.
    pub fn dispose(&self) {
        if self.is_cancelled() {
            if let Some(path) = &self.file_path {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn fires_exactly_once() {
        let source = CancellationSource::new();
        let token = source.token();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        token.on_cancelled(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        source.cancel();
        source.cancel();
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_listener_invoked_on_next_tick() {
        let source = CancellationSource::new();
        let token = source.token();
        source.cancel();
        assert!(token.is_cancelled());

        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        token.on_cancelled(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_before_token_access_yields_precancelled_singleton() {
        let source = CancellationSource::new();
        source.cancel();
        let token = source.token();
        assert!(token.is_cancelled());
    }

    #[test]
    fn is_cancelled_monotonic_never_reverts() {
        let source = CancellationSource::new();
        assert!(!source.is_cancelled());
        source.cancel();
        assert!(source.is_cancelled());
    }

    #[test]
    fn file_backed_source_observes_external_file_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cancel.flag");
        let source = CancellationSource::with_file(path.clone());
        assert!(!source.is_cancelled());
        std::fs::File::create(&path).unwrap();
        assert!(source.is_cancelled());
    }

    #[test]
    fn dispose_removes_file_once_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cancel.flag");
        let source = CancellationSource::with_file(path.clone());
        source.cancel();
        assert!(path.exists());
        source.dispose();
        assert!(!path.exists());
    }
}
