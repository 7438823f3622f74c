//! C6: the action execution context.
//!
//! Every running [`crate::trigger::ActionRun`] gets one [`ActionContext`]: the URL it started
//! against, the [`AbortToken`] for its navigation epoch, and a handle back to the rest of the
//! commander. Actions are expected to check [`ActionContext::is_stopped`] (or better, thread
//! everything through [`ActionContext::wait`]/[`ActionContext::for_each`]/[`ActionContext::commander`],
//! which all race against the token for you) rather than poll in a tight loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::abort::AbortToken;
use crate::driver::DriverAdapter;
use crate::error::CoreError;
use crate::navigation::NavigationManager;
use crate::network::NetworkTracker;
use crate::page_session::PageSessionFactory;
use crate::safety::SoftDriver;

/// The surface of a [`crate::commander::Commander`] the action/trigger layer needs, without
/// depending on the `commander` module directly (which depends on this one).
pub trait CommanderHandle: Send + Sync {
    fn driver(&self) -> &DriverAdapter;
    fn navigation(&self) -> &NavigationManager;
    fn page_sessions(&self) -> &PageSessionFactory;
    fn network(&self) -> &NetworkTracker;
}

/// What one running action sees of the world.
#[derive(Clone)]
pub struct ActionContext {
    handle: Arc<dyn CommanderHandle>,
    token: AbortToken,
    url: String,
}

impl ActionContext {
    pub fn new(handle: Arc<dyn CommanderHandle>, token: AbortToken, url: String) -> Self {
        ActionContext { handle, token, url }
    }

    /// The URL the trigger matched against when this action started.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn abort_token(&self) -> &AbortToken {
        &self.token
    }

    /// True once this action's epoch has ended (a new navigation preempted it).
    pub fn is_stopped(&self) -> bool {
        self.token.is_fired()
    }

    /// `Err(CoreError::ActionStopped)` if the action has been preempted, `Ok(())` otherwise.
    pub fn check_stopped(&self) -> Result<(), CoreError> {
        if self.is_stopped() {
            Err(CoreError::ActionStopped)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, or return early with `ActionStopped` if preempted first.
    pub async fn wait(&self, duration: Duration) -> Result<(), CoreError> {
        match self.token.race(tokio::time::sleep(duration)).await {
            Ok(()) => Ok(()),
            Err(()) => Err(CoreError::ActionStopped),
        }
    }

    /// Run `f` once per item, stopping as soon as the action is preempted or `f` returns an
    /// error. Each call to `f` races against the abort token independently, so a preemption
    /// during a long-running `f` is observed promptly instead of only between items.
    pub async fn for_each<I, F, Fut>(&self, items: I, f: F) -> Result<(), CoreError>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = Result<(), CoreError>>,
    {
        for item in items {
            self.check_stopped()?;
            match self.token.race(f(item)).await {
                Ok(result) => result?,
                Err(()) => return Err(CoreError::ActionStopped),
            }
        }
        Ok(())
    }

    /// Register a closure to run when this action's page session ends.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        self.handle.page_sessions().on_cleanup(cleanup);
    }

    /// The navigation-safety-wrapped driver surface (`§4.7`): every call races against this
    /// action's abort token and classifies navigation-transient driver errors automatically.
    /// This is the surface actions should reach for by default.
    pub fn commander(&self) -> SoftDriver<'_> {
        SoftDriver::new(self.handle.driver(), &self.token)
    }

    /// The unwrapped driver adapter, for callers that need to opt out of the safety wrapping
    /// (e.g. a deliberate probe that expects and handles a transient error itself).
    pub fn raw_commander(&self) -> &DriverAdapter {
        self.handle.driver()
    }

    pub fn network(&self) -> &NetworkTracker {
        self.handle.network()
    }

    pub fn navigation(&self) -> &NavigationManager {
        self.handle.navigation()
    }
}
