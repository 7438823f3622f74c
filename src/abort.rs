//! The single-shot cancellation primitive shared by the navigation manager, the scheduler, and
//! every `ActionContext`.
//!
//! One [`AbortToken`] is minted per navigation epoch (`§3`, `§5`). Firing it is irreversible: a
//! token is fired at most once and is never un-fired. Cloning an `AbortToken` gives a cheap
//! handle to the same underlying signal, so the manager, the live `ActionRun`, and any
//! `on_cleanup` closures registered against it all observe the same fire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cancellation signal tied to one navigation epoch.
#[derive(Clone, Debug)]
pub struct AbortToken(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    fired: AtomicBool,
    notify: Notify,
}

impl AbortToken {
    /// Mint a fresh, unfired token.
    pub fn new() -> Self {
        AbortToken(Arc::new(Inner {
            fired: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    /// Fire the token, waking every `fired()` waiter. Idempotent: firing an already-fired token
    /// is a no-op.
    pub fn fire(&self) {
        if !self.0.fired.swap(true, Ordering::SeqCst) {
            self.0.notify.notify_waiters();
        }
    }

    /// True once `fire()` has been called.
    pub fn is_fired(&self) -> bool {
        self.0.fired.load(Ordering::SeqCst)
    }

    /// Resolve once the token fires. Resolves immediately if it has already fired.
    pub async fn fired(&self) {
        if self.is_fired() {
            return;
        }
        let notified = self.0.notify.notified();
        tokio::pin!(notified);
        // Enable the waiter *before* re-checking the flag so a fire() racing with this call
        // can't be missed between the check and the await.
        notified.as_mut().enable();
        if self.is_fired() {
            return;
        }
        notified.await;
    }

    /// Returns `Ok(value)` if `fut` resolves first, or `Err(())` if this token fires first.
    pub async fn race<F, T>(&self, fut: F) -> Result<T, ()>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::pin!(fut);
        let abort = self.fired();
        tokio::pin!(abort);
        tokio::select! {
            biased;
            () = &mut abort => Err(()),
            out = &mut fut => Ok(out),
        }
    }
}

impl Default for AbortToken {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for AbortToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for AbortToken {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_at_most_once_and_wakes_waiters() {
        let token = AbortToken::new();
        assert!(!token.is_fired());

        let waiter = tokio::spawn({
            let token = token.clone();
            async move {
                token.fired().await;
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.fire();
        token.fire(); // idempotent

        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should resolve after fire")
            .unwrap();
        assert!(token.is_fired());
    }

    #[tokio::test]
    async fn fired_resolves_immediately_if_already_fired() {
        let token = AbortToken::new();
        token.fire();
        tokio::time::timeout(Duration::from_millis(10), token.fired())
            .await
            .expect("already-fired token resolves immediately");
    }

    #[tokio::test]
    async fn race_prefers_abort_when_it_wins() {
        let token = AbortToken::new();
        token.fire();
        let result = token.race(async { 42 }).await;
        // Both branches are ready immediately; `biased` ordering favors the abort arm.
        assert_eq!(result, Err(()));
    }

    #[tokio::test]
    async fn race_returns_future_output_when_not_aborted() {
        let token = AbortToken::new();
        let result = token.race(async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
