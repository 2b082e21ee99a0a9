use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::FsError;

/// Cancellation and deadline carried through every backend call.
///
/// Cloning a context shares its cancellation state. Children created with
/// [`Context::child`] or [`Context::with_timeout`] are cancelled with their
/// parent but may be cancelled on their own without affecting it.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context whose deadline is the earlier of `deadline` and the parent's.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Why the context ended, or `None` while it is still live.
    pub fn err(&self) -> Option<FsError> {
        if self.token.is_cancelled() {
            return Some(FsError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(FsError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    pub fn check(&self) -> Result<(), FsError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Run `fut` unless the context ends first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, FsError>
    where
        F: std::future::Future<Output = Result<T, FsError>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.done() => Err(self.err().unwrap_or(FsError::Cancelled)),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_live_context_has_no_error() {
        let ctx = Context::new();
        assert!(ctx.err().is_none());
        assert!(ctx.check().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children_only() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(matches!(child.err(), Some(FsError::Cancelled)));
        assert!(parent.err().is_none());

        let child = parent.child();
        parent.cancel();
        assert!(matches!(child.err(), Some(FsError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_secs(5));
        assert!(ctx.err().is_none());
        ctx.done().await;
        assert!(matches!(ctx.err(), Some(FsError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_deadline_never_extends_parent() {
        let parent = Context::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_millis(10));
        let res: Result<(), FsError> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(FsError::DeadlineExceeded)));
    }
}
