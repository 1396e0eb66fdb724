//! Caller context: deadline plus cancellation.
//!
//! A [`Context`] bounds everything the driver does on behalf of one caller:
//! waiting for a connection, fetching credentials, the RPC itself, and the
//! receive loop of a stream. Deriving a child context (`with_timeout`,
//! `with_deadline`) tightens the deadline and links cancellation one way:
//! cancelling the parent cancels the child, never the reverse.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::DriverError;

/// Deadline and cancellation scope of one caller.
#[derive(Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Context {
    /// A context with no deadline and its own cancellation root.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn with_token(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel,
        }
    }

    /// Derives a child bounded by `now + timeout` (or the parent's deadline,
    /// whichever is sooner).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a child bounded by `deadline` (or the parent's deadline,
    /// whichever is sooner).
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
        }
    }

    /// The effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and everything derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The context error as of now, if the context is already done.
    pub fn error(&self) -> Option<DriverError> {
        if self.cancel.is_cancelled() {
            return Some(DriverError::Canceled);
        }
        if matches!(self.deadline, Some(d) if d <= Instant::now()) {
            return Some(DriverError::DeadlineExceeded);
        }
        None
    }

    /// Resolves once the context is done, with the matching error.
    ///
    /// Never resolves for a background context; callers race it against the
    /// work they are bounding.
    pub async fn done(&self) -> DriverError {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = self.cancel.cancelled() => DriverError::Canceled,
            _ = deadline => DriverError::DeadlineExceeded,
        }
    }

    /// Runs `fut` until it completes or the context fires, whichever is
    /// first. A completed future wins over a simultaneously-done context.
    pub async fn run_until_done<F, T>(&self, fut: F) -> Result<T, DriverError>
    where
        F: Future<Output = T>,
    {
        tokio::pin!(fut);
        tokio::select! {
            biased;
            out = &mut fut => Ok(out),
            err = self.done() => Err(err),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_context_never_fires() {
        let ctx = Context::background();
        assert!(ctx.error().is_none());
        let out = ctx.run_until_done(async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn deadline_produces_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let err = ctx
            .run_until_done(std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::DeadlineExceeded));
        assert!(matches!(ctx.error(), Some(DriverError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn cancel_produces_canceled() {
        let ctx = Context::background();
        let child = ctx.with_timeout(Duration::from_secs(60));
        let waiter = tokio::spawn(async move {
            child.run_until_done(std::future::pending::<()>()).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, DriverError::Canceled));
    }

    #[tokio::test]
    async fn cancelling_child_leaves_parent_alive() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn child_deadline_never_exceeds_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(3600));
        assert!(child.deadline().unwrap() <= parent.deadline().unwrap());
    }
}
