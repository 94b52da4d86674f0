//! Request-scoped cancellation context.
//!
//! # Responsibilities
//! - Carry a cooperative cancellation signal through a request
//! - Derive children bound to a deadline
//! - Remember why a context ended (deadline vs upstream cancellation)
//!
//! # Design Decisions
//! - Lives in request extensions so any layer can replace it
//! - Children observe parent cancellation; never the reverse
//! - A derived deadline never outlives the parent's deadline
//! - The deadline timer is owned by a guard and released on drop
//! - A timeout too large to represent as an instant means no own deadline

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::http::Request;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The context's deadline elapsed.
    DeadlineExceeded,
    /// Cancelled explicitly, usually because the client went away.
    Canceled,
}

#[derive(Debug)]
struct ContextInner {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: OnceLock<CancelCause>,
    parent: Option<RequestContext>,
}

/// Cancellable context attached to a request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    /// Create a root context with no deadline.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                token: CancellationToken::new(),
                deadline: None,
                cause: OnceLock::new(),
                parent: None,
            }),
        }
    }

    /// Derive a child that is cancelled once `timeout` elapses.
    ///
    /// The returned guard owns the deadline timer. Dropping it stops the
    /// timer and cancels the child, so it must be held for as long as the
    /// child is in use. A `timeout` such as `Duration::MAX` that overflows
    /// the clock leaves the child with only its parent's deadline, if any.
    pub fn with_timeout(&self, timeout: Duration) -> (RequestContext, DeadlineGuard) {
        let own = Instant::now().checked_add(timeout);
        let deadline = match (self.inner.deadline, own) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };

        let child = RequestContext {
            inner: Arc::new(ContextInner {
                token: self.inner.token.child_token(),
                deadline,
                cause: OnceLock::new(),
                parent: Some(self.clone()),
            }),
        };

        let timer = deadline.map(|deadline| {
            let timer_ctx = child.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        timer_ctx.cancel_with(CancelCause::DeadlineExceeded);
                    }
                    _ = timer_ctx.cancelled() => {}
                }
            })
        });

        let guard = DeadlineGuard {
            ctx: child.clone(),
            timer,
        };
        (child, guard)
    }

    /// A fresh context that shares nothing with this one and is never
    /// cancelled by it.
    pub fn detached(&self) -> RequestContext {
        RequestContext::new()
    }

    /// Cancel this context and all of its children.
    pub fn cancel(&self) {
        self.cancel_with(CancelCause::Canceled);
    }

    fn cancel_with(&self, cause: CancelCause) {
        if self.inner.token.is_cancelled() {
            return;
        }
        let _ = self.inner.cause.set(cause);
        self.inner.token.cancel();
    }

    /// Resolves once the context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Why the context ended, or `None` while it is still live.
    pub fn cause(&self) -> Option<CancelCause> {
        if !self.inner.token.is_cancelled() {
            return None;
        }
        if let Some(cause) = self.inner.cause.get() {
            return Some(*cause);
        }
        // Cancelled through the parent token.
        match &self.inner.parent {
            Some(parent) => parent.cause().or(Some(CancelCause::Canceled)),
            None => Some(CancelCause::Canceled),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases a deadline timer when dropped.
#[derive(Debug)]
pub struct DeadlineGuard {
    ctx: RequestContext,
    timer: Option<JoinHandle<()>>,
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
        self.ctx.cancel();
    }
}

/// Access to the [`RequestContext`] stored in a request.
pub trait RequestContextExt {
    /// The attached context, or a fresh root context when none is set.
    fn context(&self) -> RequestContext;

    /// Replace the attached context.
    fn set_context(&mut self, ctx: RequestContext);
}

impl<B> RequestContextExt for Request<B> {
    fn context(&self) -> RequestContext {
        self.extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default()
    }

    fn set_context(&mut self, ctx: RequestContext) {
        self.extensions_mut().insert(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_cancels_with_cause() {
        let root = RequestContext::new();
        let (ctx, _guard) = root.with_timeout(Duration::from_millis(20));
        assert_eq!(ctx.cause(), None);

        ctx.cancelled().await;
        assert_eq!(ctx.cause(), Some(CancelCause::DeadlineExceeded));
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancel_is_not_a_deadline() {
        let root = RequestContext::new();
        let (ctx, _guard) = root.with_timeout(Duration::from_secs(60));
        root.cancel();

        ctx.cancelled().await;
        assert_eq!(ctx.cause(), Some(CancelCause::Canceled));
    }

    #[tokio::test]
    async fn test_guard_drop_releases_child() {
        let root = RequestContext::new();
        let (ctx, guard) = root.with_timeout(Duration::from_secs(60));
        drop(guard);
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cause(), Some(CancelCause::Canceled));
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_deadline_capped_by_parent() {
        let root = RequestContext::new();
        let (outer, _g1) = root.with_timeout(Duration::from_millis(30));
        let (inner, _g2) = outer.with_timeout(Duration::from_secs(60));
        assert_eq!(inner.deadline(), outer.deadline());

        inner.cancelled().await;
        assert_eq!(inner.cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_has_no_deadline() {
        let root = RequestContext::new();
        let (ctx, guard) = root.with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!ctx.is_cancelled());
        drop(guard);
        assert_eq!(ctx.cause(), Some(CancelCause::Canceled));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_keeps_parent_deadline() {
        let root = RequestContext::new();
        let (outer, _g1) = root.with_timeout(Duration::from_millis(20));
        let (inner, _g2) = outer.with_timeout(Duration::MAX);
        assert_eq!(inner.deadline(), outer.deadline());

        inner.cancelled().await;
        assert_eq!(inner.cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cause_is_sticky() {
        let root = RequestContext::new();
        let (ctx, guard) = root.with_timeout(Duration::from_millis(10));
        ctx.cancelled().await;
        drop(guard);
        assert_eq!(ctx.cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_detached_survives_cancellation() {
        let root = RequestContext::new();
        let (ctx, _guard) = root.with_timeout(Duration::from_millis(5));
        let detached = ctx.detached();
        ctx.cancelled().await;
        assert!(!detached.is_cancelled());
        assert!(detached.deadline().is_none());
    }

    #[test]
    fn test_request_extension_roundtrip() {
        let mut req = Request::new(());
        let ctx = RequestContext::new();
        req.set_context(ctx.clone());
        ctx.cancel();
        assert!(req.context().is_cancelled());
        assert!(!Request::new(()).context().is_cancelled());
    }
}
