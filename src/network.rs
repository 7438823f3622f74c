//! C2: the network request tracker.
//!
//! Counts in-flight requests for one page and lets callers wait for "network idle": zero pending
//! requests held for a debounce window. Used by the navigation manager to decide a page is ready,
//! and available directly to actions that want to wait out an XHR burst mid-run.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::abort::AbortToken;
use crate::driver::{DriverAdapter, RequestKey, RequestSubscriptionHandlers, Subscription};
use crate::error::CoreError;

/// Tunables for one [`NetworkTracker`] (`§9`).
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct NetworkTrackerConfig {
    /// How long the pending count must stay at zero before `wait_for_idle` returns.
    pub idle_debounce: Duration,
    /// Overall deadline for `wait_for_idle`.
    pub max_wait: Duration,
    /// A single request pending longer than this is presumed stuck and evicted from the pending
    /// tally on the next GC tick, rather than blocking `wait_for_idle` forever.
    pub request_timeout: Duration,
}

impl NetworkTrackerConfig {
    /// A short debounce suited to a tracker used on its own, outside the navigation manager,
    /// where callers want a quick answer once requests stop firing.
    pub fn standalone() -> Self {
        NetworkTrackerConfig {
            idle_debounce: Duration::from_millis(500),
            max_wait: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// A longer debounce suited to a tracker wired into the navigation manager, where a short
    /// quiet window is routinely produced by same-page XHR chains that aren't done yet.
    pub fn lifecycle_integrated() -> Self {
        NetworkTrackerConfig {
            idle_debounce: Duration::from_secs(30),
            max_wait: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for NetworkTrackerConfig {
    fn default() -> Self {
        Self::standalone()
    }
}

struct PendingEntry {
    count: u32,
    started_at: Instant,
}

struct State {
    pending: HashMap<RequestKey, PendingEntry>,
    version: u64,
}

struct Shared {
    config: NetworkTrackerConfig,
    state: Mutex<State>,
    changed: Notify,
}

/// Tracks in-flight requests for one page. Cheap to clone; clones share the same counters.
#[derive(Clone)]
pub struct NetworkTracker(std::sync::Arc<Shared>);

impl NetworkTracker {
    pub fn new(config: NetworkTrackerConfig) -> Self {
        NetworkTracker(std::sync::Arc::new(Shared {
            config,
            state: Mutex::new(State {
                pending: HashMap::new(),
                version: 0,
            }),
            changed: Notify::new(),
        }))
    }

    /// Subscribe to `adapter`'s request events. Drop (or cancel) the returned [`Subscription`] to
    /// stop tracking.
    pub fn attach(&self, adapter: &DriverAdapter) -> Subscription {
        let on_start = {
            let this = self.clone();
            std::sync::Arc::new(move |key: RequestKey| this.request_started(key))
        };
        let on_finish = {
            let this = self.clone();
            std::sync::Arc::new(move |key: RequestKey| this.request_settled(key))
        };
        let on_fail = {
            let this = self.clone();
            std::sync::Arc::new(move |key: RequestKey| this.request_settled(key))
        };
        adapter.subscribe_requests(RequestSubscriptionHandlers {
            on_start,
            on_finish,
            on_fail,
        })
    }

    fn request_started(&self, key: RequestKey) {
        if key.is_ignored_scheme() {
            return;
        }
        let mut state = self.0.state.lock().expect("network tracker mutex poisoned");
        let now = Instant::now();
        state
            .pending
            .entry(key)
            .and_modify(|entry| entry.count += 1)
            .or_insert(PendingEntry { count: 1, started_at: now });
        state.version += 1;
        drop(state);
        self.0.changed.notify_waiters();
    }

    fn request_settled(&self, key: RequestKey) {
        let mut state = self.0.state.lock().expect("network tracker mutex poisoned");
        if let Some(entry) = state.pending.get_mut(&key) {
            entry.count = entry.count.saturating_sub(1);
            if entry.count == 0 {
                state.pending.remove(&key);
            }
            state.version += 1;
        }
        drop(state);
        self.0.changed.notify_waiters();
    }

    /// Drop any entry pending longer than `request_timeout` (`§4.2` step 3). Called on every
    /// `wait_for_idle` tick so one stuck request doesn't wedge the wait forever.
    fn evict_expired(&self) {
        let mut state = self.0.state.lock().expect("network tracker mutex poisoned");
        let timeout = self.0.config.request_timeout;
        let now = Instant::now();
        let before = state.pending.len();
        state.pending.retain(|_, entry| now.duration_since(entry.started_at) < timeout);
        if state.pending.len() != before {
            state.version += 1;
            drop(state);
            self.0.changed.notify_waiters();
        }
    }

    /// Current number of distinct in-flight request keys.
    pub fn pending_count(&self) -> usize {
        self.0.state.lock().expect("network tracker mutex poisoned").pending.len()
    }

    /// Forget all pending requests and bump the change version. Called at the start of a new
    /// navigation epoch so a prior page's stragglers don't block the new page's idle wait.
    pub fn reset(&self) {
        let mut state = self.0.state.lock().expect("network tracker mutex poisoned");
        state.pending.clear();
        state.version += 1;
        drop(state);
        self.0.changed.notify_waiters();
    }

    /// Wait until the pending count is zero and stays zero for the configured debounce window,
    /// the configured deadline elapses (`Err(CoreError::Timeout)`), or `abort` fires
    /// (`Err(CoreError::ActionStopped)`).
    pub async fn wait_for_idle(&self, abort: &AbortToken) -> Result<(), CoreError> {
        const GC_TICK: Duration = Duration::from_millis(100);
        let deadline = Instant::now() + self.0.config.max_wait;
        loop {
            self.evict_expired();
            if Instant::now() >= deadline {
                return Err(CoreError::Timeout);
            }
            let baseline = self.version();
            if self.pending_count() == 0 {
                let debounce = self.0.config.idle_debounce;
                match abort.race(tokio::time::timeout(debounce, self.wait_for_version_change(baseline))).await {
                    Err(()) => return Err(CoreError::ActionStopped),
                    Ok(Ok(())) => continue,  // changed mid-debounce, re-evaluate
                    Ok(Err(_elapsed)) => return Ok(()), // stayed idle for the whole window
                }
            } else {
                // Re-tick on a short timer rather than blocking on a version change so a stuck
                // request gets GC'd promptly instead of only at the next unrelated state change.
                match abort.race(tokio::time::timeout(GC_TICK, self.wait_for_version_change(baseline))).await {
                    Err(()) => return Err(CoreError::ActionStopped),
                    Ok(Ok(())) => continue,
                    Ok(Err(_elapsed)) => continue,
                }
            }
        }
    }

    fn version(&self) -> u64 {
        self.0.state.lock().expect("network tracker mutex poisoned").version
    }

    async fn wait_for_version_change(&self, baseline: u64) {
        loop {
            let notified = self.0.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.version() != baseline {
                return;
            }
            notified.await;
            if self.version() != baseline {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idle_immediately_when_nothing_pending() {
        let tracker = NetworkTracker::new(NetworkTrackerConfig {
            idle_debounce: Duration::from_millis(20),
            max_wait: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        });
        let abort = AbortToken::new();
        tokio::time::timeout(Duration::from_millis(200), tracker.wait_for_idle(&abort))
            .await
            .expect("should not hang")
            .expect("should resolve idle");
    }

    #[tokio::test]
    async fn waits_for_in_flight_request_to_settle() {
        let tracker = NetworkTracker::new(NetworkTrackerConfig {
            idle_debounce: Duration::from_millis(20),
            max_wait: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        });
        let key = RequestKey::new("GET", "https://example.com/data");
        tracker.request_started(key.clone());
        assert_eq!(tracker.pending_count(), 1);

        let abort = AbortToken::new();
        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.wait_for_idle(&abort).await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tracker.request_settled(key);

        let result = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("should not hang")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn aborts_when_token_fires() {
        let tracker = NetworkTracker::new(NetworkTrackerConfig {
            idle_debounce: Duration::from_millis(500),
            max_wait: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        });
        tracker.request_started(RequestKey::new("GET", "https://example.com/slow"));
        let abort = AbortToken::new();
        let token = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.fire();
        });
        let result = tokio::time::timeout(Duration::from_secs(1), tracker.wait_for_idle(&abort))
            .await
            .expect("should not hang");
        assert!(matches!(result, Err(CoreError::ActionStopped)));
    }

    #[tokio::test]
    async fn times_out_when_never_idle() {
        let tracker = NetworkTracker::new(NetworkTrackerConfig {
            idle_debounce: Duration::from_millis(500),
            max_wait: Duration::from_millis(50),
            request_timeout: Duration::from_secs(30),
        });
        tracker.request_started(RequestKey::new("GET", "https://example.com/forever"));
        let abort = AbortToken::new();
        let result = tokio::time::timeout(Duration::from_secs(1), tracker.wait_for_idle(&abort))
            .await
            .expect("should not hang");
        assert!(matches!(result, Err(CoreError::Timeout)));
    }

    #[tokio::test]
    async fn stuck_request_is_evicted_after_its_own_timeout() {
        let tracker = NetworkTracker::new(NetworkTrackerConfig {
            idle_debounce: Duration::from_millis(20),
            max_wait: Duration::from_secs(2),
            request_timeout: Duration::from_millis(50),
        });
        tracker.request_started(RequestKey::new("GET", "https://example.com/stuck"));
        assert_eq!(tracker.pending_count(), 1);

        let abort = AbortToken::new();
        let result = tokio::time::timeout(Duration::from_secs(1), tracker.wait_for_idle(&abort))
            .await
            .expect("should not hang");
        assert!(result.is_ok());
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn ignored_scheme_never_counted() {
        let tracker = NetworkTracker::new(NetworkTrackerConfig::standalone());
        tracker.request_started(RequestKey::new("GET", "data:text/plain,hi"));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn duplicate_keys_refcount_until_all_settle() {
        let tracker = NetworkTracker::new(NetworkTrackerConfig::standalone());
        let key = RequestKey::new("GET", "https://example.com/poll");
        tracker.request_started(key.clone());
        tracker.request_started(key.clone());
        assert_eq!(tracker.pending_count(), 1);
        tracker.request_settled(key.clone());
        assert_eq!(tracker.pending_count(), 1);
        tracker.request_settled(key);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn reset_clears_pending() {
        let tracker = NetworkTracker::new(NetworkTrackerConfig::standalone());
        tracker.request_started(RequestKey::new("GET", "https://example.com/x"));
        tracker.reset();
        assert_eq!(tracker.pending_count(), 0);
    }
}
