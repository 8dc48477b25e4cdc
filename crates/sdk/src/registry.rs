//! Cancellation registry for in-flight calls.
//!
//! Every RPC issued by the facade registers a [`CancellationToken`] here
//! under a unique handle. Teardown ([`CallRegistry::cancel_all`]) walks the
//! registry and cancels every observed entry, so closing the client aborts
//! outstanding unary calls and streams without waiting for them.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Opaque identifier for a registered call.
pub type CallHandle = u64;

/// Concurrent registry mapping call handles to cancellation tokens.
///
/// Registration never blocks and never fails. Unregistration is idempotent.
/// `cancel_all` is best-effort: calls registered concurrently with teardown
/// may be missed, in which case the closed connection aborts them instead.
#[derive(Debug, Default)]
pub struct CallRegistry {
    /// Monotonically increasing handle allocator.
    next_handle: AtomicU64,

    /// Active calls.
    calls: DashMap<CallHandle, CancellationToken>,
}

impl CallRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cancellation token, returning its unique handle.
    pub fn register(&self, token: CancellationToken) -> CallHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.calls.insert(handle, token);
        handle
    }

    /// Removes a handle from the registry.
    ///
    /// Unknown or already-removed handles are a no-op; returns whether an
    /// entry was actually removed.
    pub fn unregister(&self, handle: CallHandle) -> bool {
        self.calls.remove(&handle).is_some()
    }

    /// Cancels every currently registered call.
    ///
    /// Tokens are cancelled at most once each (cancellation is idempotent)
    /// and entries stay registered; the owning call removes its own entry
    /// when it observes the cancellation.
    pub fn cancel_all(&self) {
        for entry in &self.calls {
            entry.value().cancel();
        }
    }

    /// Number of currently registered calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Returns true if no calls are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn register_allocates_unique_handles() {
        let registry = CallRegistry::new();
        let a = registry.register(CancellationToken::new());
        let b = registry.register(CancellationToken::new());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = CallRegistry::new();
        let handle = registry.register(CancellationToken::new());

        assert!(registry.unregister(handle));
        assert!(!registry.unregister(handle), "double removal is a no-op");
        assert!(!registry.unregister(9999), "unknown handle is a no-op");
        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_all_cancels_every_registered_token() {
        let registry = CallRegistry::new();
        let tokens: Vec<_> = (0..5).map(|_| CancellationToken::new()).collect();
        for token in &tokens {
            registry.register(token.clone());
        }

        registry.cancel_all();

        for token in &tokens {
            assert!(token.is_cancelled());
        }
        // Entries remain until their owners unregister them.
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn cancel_all_twice_is_harmless() {
        let registry = CallRegistry::new();
        let token = CancellationToken::new();
        registry.register(token.clone());

        registry.cancel_all();
        registry.cancel_all();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn registry_is_empty_after_concurrent_register_unregister() {
        let registry = Arc::new(CallRegistry::new());

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let handle = registry.register(CancellationToken::new());
                tokio::task::yield_now().await;
                assert!(registry.unregister(handle));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(registry.is_empty());
    }
}
