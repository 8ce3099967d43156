//! Cancellation contexts
//!
//! A [`LockContext`] is the signal a lease holder watches to decide whether it
//! may still assume ownership. Contexts form a tree: cancelling a context
//! cancels every context derived from it, never its ancestors.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::watch;

/// Cloneable cancellation context
#[derive(Clone)]
pub struct LockContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    cancelled: watch::Sender<bool>,
    parent: Option<LockContext>,
}

impl LockContext {
    /// Root context, cancelled only by an explicit `cancel()`
    pub fn background() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<LockContext>) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner { cancelled, parent }),
        }
    }

    /// Derive a context that is cancelled together with `self`
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    /// Cancel this context and all contexts derived from it. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.borrow()
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(LockContext::is_cancelled)
    }

    /// Resolves once this context or any ancestor is cancelled
    pub fn cancelled(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut own = self.inner.cancelled.subscribe();
            match &self.inner.parent {
                Some(parent) => {
                    tokio::select! {
                        _ = wait_for_cancel(&mut own) => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => wait_for_cancel(&mut own).await,
            }
        })
    }

    /// True when both handles refer to the same context
    pub fn same_as(&self, other: &LockContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for LockContext {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for LockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockContext")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    // The sender lives as long as the context borrowed by the caller, so
    // `wait_for` only returns once the flag flips.
    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        futures::future::pending::<()>().await;
    }
}
