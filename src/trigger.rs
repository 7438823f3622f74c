//! C5: the trigger registry and scheduler.
//!
//! A [`Trigger`] binds a URL pattern (and, optionally, an extra async [`Condition`]) to an
//! action closure. The [`Scheduler`] watches the navigation manager for new epochs; each time one
//! starts, it gives the previous epoch's action a graceful window to notice its `AbortToken` and
//! stop on its own, waits for the new page to settle, then picks the highest-priority trigger
//! whose pattern (and condition) matches and starts its action tied to the new epoch.
//!
//! A trigger whose action doesn't stop within the graceful deadline is logged and abandoned
//! rather than force-aborted: the scheduler simply stops waiting for it and moves on. The task
//! keeps running in the background until it eventually notices its token fired on its own.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::Shared;
use futures_util::FutureExt;

use crate::abort::AbortToken;
use crate::action::{ActionContext, CommanderHandle};
use crate::driver::DriverAdapter;
use crate::navigation::{BeforeNavigateEvent, ListenerHandle, NavigationEvent, NavigationManager};
use crate::pattern::UrlPattern;
use crate::safety::SoftDriver;

/// What an action closure returns.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), crate::error::CoreError>> + Send>>;
/// An action closure: takes the context for its run, returns a boxed future.
pub type ActionFn = Arc<dyn Fn(ActionContext) -> ActionFuture + Send + Sync>;

/// What a [`Trigger`]'s condition sees when deciding whether to fire.
pub struct TriggerContext {
    handle: Arc<dyn CommanderHandle>,
    url: String,
    token: AbortToken,
}

impl TriggerContext {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn abort_token(&self) -> &AbortToken {
        &self.token
    }

    pub fn commander(&self) -> SoftDriver<'_> {
        SoftDriver::new(self.handle.driver(), &self.token)
    }

    pub fn raw_commander(&self) -> &DriverAdapter {
        self.handle.driver()
    }
}

/// An extra async predicate a [`Trigger`] can require beyond its URL pattern matching.
#[async_trait]
pub trait Condition: Send + Sync {
    async fn evaluate(&self, ctx: &TriggerContext) -> bool;
}

/// One registered URL-triggered action.
#[derive(Clone)]
pub struct Trigger {
    pub id: String,
    pub pattern: UrlPattern,
    /// Higher fires first; ties keep registration order.
    pub priority: i32,
    pub condition: Option<Arc<dyn Condition>>,
    pub action: ActionFn,
}

impl Trigger {
    pub fn new(id: impl Into<String>, pattern: UrlPattern, action: ActionFn) -> Self {
        Trigger {
            id: id.into(),
            pattern,
            priority: 0,
            condition: None,
            action,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: Arc<dyn Condition>) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// A flat store of registered triggers.
#[derive(Clone, Default)]
pub struct TriggerRegistry {
    triggers: Vec<Trigger>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        TriggerRegistry::default()
    }

    pub fn register(&mut self, trigger: Trigger) {
        self.triggers.retain(|t| t.id != trigger.id);
        self.triggers.push(trigger);
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.id != id);
        self.triggers.len() != before
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Triggers whose pattern matches `url`, highest priority first. `sort_by` is stable, so
    /// triggers of equal priority keep their registration order.
    pub fn matching(&self, url: &str) -> Vec<Trigger> {
        let mut matches: Vec<Trigger> = self.triggers.iter().filter(|t| t.pattern.matches(url)).cloned().collect();
        matches.sort_by(|a, b| b.priority.cmp(&a.priority));
        matches
    }
}

struct ActionRun {
    trigger_id: String,
    token: AbortToken,
    handle: tokio::task::JoinHandle<Result<(), crate::error::CoreError>>,
}

type StopFuture = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

struct Inner {
    handle: Arc<dyn CommanderHandle>,
    navigation: NavigationManager,
    registry: Mutex<TriggerRegistry>,
    current_run: Mutex<Option<ActionRun>>,
    stop_in_flight: Mutex<Option<StopFuture>>,
    graceful_stop_deadline: Duration,
    listener_handles: Mutex<Vec<ListenerHandle>>,
}

/// Watches [`NavigationManager`] lifecycle events and starts the matching trigger's action once a
/// page settles (`§4.5`: `before_navigate` stops the previous action, `page_ready` starts the
/// next one).
#[derive(Clone)]
pub struct Scheduler(Arc<Inner>);

impl Scheduler {
    pub fn new(handle: Arc<dyn CommanderHandle>, navigation: NavigationManager, graceful_stop_deadline: Duration) -> Self {
        let scheduler = Scheduler(Arc::new(Inner {
            handle,
            navigation: navigation.clone(),
            registry: Mutex::new(TriggerRegistry::new()),
            current_run: Mutex::new(None),
            stop_in_flight: Mutex::new(None),
            graceful_stop_deadline,
            listener_handles: Mutex::new(Vec::new()),
        }));
        scheduler.wire(&navigation);
        scheduler
    }

    fn wire(&self, navigation: &NavigationManager) {
        let stop_scheduler = self.clone();
        let before_handle = navigation.on_before_navigate(Arc::new(move |_event: &BeforeNavigateEvent| {
            let stop_scheduler = stop_scheduler.clone();
            tokio::spawn(async move {
                stop_scheduler.stop_current_action().await;
            });
        }));

        let start_scheduler = self.clone();
        let ready_handle = navigation.on_page_ready(Arc::new(move |event: &NavigationEvent| {
            let start_scheduler = start_scheduler.clone();
            let event = event.clone();
            tokio::spawn(async move {
                start_scheduler.handle_page_ready(event).await;
            });
        }));

        *self.0.listener_handles.lock().expect("scheduler mutex poisoned") = vec![before_handle, ready_handle];
    }

    pub fn register(&self, trigger: Trigger) {
        self.0.registry.lock().expect("scheduler mutex poisoned").register(trigger);
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.0.registry.lock().expect("scheduler mutex poisoned").unregister(id)
    }

    pub fn trigger_count(&self) -> usize {
        self.0.registry.lock().expect("scheduler mutex poisoned").len()
    }

    /// Fired once `event`'s epoch has gone network-idle. Awaits `stop_current_action` (a no-op if
    /// `before_navigate`'s call already finished) so a trigger never starts before the previous
    /// page's action has actually settled (`§4.5`).
    async fn handle_page_ready(&self, event: NavigationEvent) {
        self.stop_current_action().await;

        if self.0.navigation.should_abort(&event.token) {
            return; // superseded by a newer navigation before we got here
        }

        let url = self.0.navigation.current_url();
        let Some(trigger) = self.select_for(&url, &event.token).await else {
            return;
        };
        if self.0.navigation.should_abort(&event.token) {
            return; // superseded while evaluating the trigger's condition
        }

        tracing::info!(trigger_id = %trigger.id, url = %url, "trigger matched; starting action");
        self.spawn_action(trigger, event.token.clone(), url);
    }

    async fn select_for(&self, url: &str, token: &AbortToken) -> Option<Trigger> {
        let candidates = self.0.registry.lock().expect("scheduler mutex poisoned").matching(url);
        for trigger in candidates {
            let passes = match &trigger.condition {
                None => true,
                Some(condition) => {
                    let ctx = TriggerContext {
                        handle: self.0.handle.clone(),
                        url: url.to_string(),
                        token: token.clone(),
                    };
                    condition.evaluate(&ctx).await
                }
            };
            if passes {
                return Some(trigger);
            }
        }
        None
    }

    fn spawn_action(&self, trigger: Trigger, token: AbortToken, url: String) {
        let ctx = ActionContext::new(self.0.handle.clone(), token.clone(), url);
        let action = trigger.action.clone();
        let trigger_id = trigger.id.clone();
        let handle = tokio::spawn(async move { action(ctx).await });
        *self.0.current_run.lock().expect("scheduler mutex poisoned") = Some(ActionRun { trigger_id, token, handle });
    }

    /// Give the currently running action up to the graceful-stop deadline to notice its
    /// (already-fired) `AbortToken` and return; abandon it with a warning otherwise.
    ///
    /// Concurrent callers (the `before_navigate` listener and `handle_page_ready`'s own call)
    /// share one in-flight stop rather than racing: the second caller finds a stop already
    /// running and awaits its completion instead of returning immediately with nothing stopped
    /// (`§4.5`, `§8`: concurrent callers settle after the same completion instant).
    pub async fn stop_current_action(&self) {
        let shared = {
            let mut guard = self.0.stop_in_flight.lock().expect("scheduler mutex poisoned");
            if let Some(shared) = guard.as_ref() {
                shared.clone()
            } else {
                let this = self.clone();
                let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move { this.run_stop_current_action().await });
                let shared = fut.shared();
                *guard = Some(shared.clone());
                shared
            }
        };
        shared.await;
        let mut guard = self.0.stop_in_flight.lock().expect("scheduler mutex poisoned");
        // Only clear the cache if it's still ours: a later call may have already replaced it.
        if guard.as_ref().is_some_and(|current| current.peek().is_some()) {
            *guard = None;
        }
    }

    async fn run_stop_current_action(&self) {
        let prev = self.0.current_run.lock().expect("scheduler mutex poisoned").take();
        let Some(run) = prev else { return };
        let trigger_id = run.trigger_id.clone();
        match tokio::time::timeout(self.0.graceful_stop_deadline, run.handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(action_err))) => {
                tracing::warn!(trigger_id = %trigger_id, error = %action_err, "action returned an error while stopping");
            }
            Ok(Err(join_err)) => {
                tracing::warn!(trigger_id = %trigger_id, error = %join_err, "action task panicked");
            }
            Err(_elapsed) => {
                tracing::warn!(
                    trigger_id = %trigger_id,
                    deadline_secs = self.0.graceful_stop_deadline.as_secs_f64(),
                    "action did not stop within the graceful deadline; abandoning it"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::PageRef;
    use crate::navigation::NavigationConfig;
    use crate::network::NetworkTracker;
    use crate::page_session::PageSessionFactory;
    use crate::testing::FakeBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubHandle {
        driver: DriverAdapter,
        navigation: NavigationManager,
        page_sessions: PageSessionFactory,
        network: NetworkTracker,
    }

    impl CommanderHandle for StubHandle {
        fn driver(&self) -> &DriverAdapter {
            &self.driver
        }
        fn navigation(&self) -> &NavigationManager {
            &self.navigation
        }
        fn page_sessions(&self) -> &PageSessionFactory {
            &self.page_sessions
        }
        fn network(&self) -> &NetworkTracker {
            &self.network
        }
    }

    fn scheduler_with(backend: FakeBackend) -> (Scheduler, NavigationManager) {
        let adapter = DriverAdapter::new(Arc::new(backend), PageRef::new("p1"));
        // A short debounce so these tests don't have to wait out the 30s lifecycle-integrated
        // default to see `page_ready` fire.
        let network = NetworkTracker::new(crate::network::NetworkTrackerConfig {
            idle_debounce: Duration::from_millis(20),
            max_wait: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        });
        let navigation = NavigationManager::new(adapter.clone(), network.clone(), NavigationConfig::default());
        let page_sessions = PageSessionFactory::new(&navigation);
        let handle: Arc<dyn CommanderHandle> = Arc::new(StubHandle {
            driver: adapter,
            navigation: navigation.clone(),
            page_sessions,
            network,
        });
        let scheduler = Scheduler::new(handle, navigation.clone(), Duration::from_millis(200));
        (scheduler, navigation)
    }

    #[tokio::test]
    async fn matching_orders_by_priority_then_registration() {
        let mut registry = TriggerRegistry::new();
        registry.register(Trigger::new("low", UrlPattern::from_str("*vacancy*").unwrap(), noop_action()).with_priority(1));
        registry.register(Trigger::new("high", UrlPattern::from_str("*vacancy*").unwrap(), noop_action()).with_priority(5));
        registry.register(Trigger::new("mid-a", UrlPattern::from_str("*vacancy*").unwrap(), noop_action()).with_priority(3));
        registry.register(Trigger::new("mid-b", UrlPattern::from_str("*vacancy*").unwrap(), noop_action()).with_priority(3));

        let ids: Vec<_> = registry.matching("https://h.example/vacancy/1").into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["high", "mid-a", "mid-b", "low"]);
    }

    #[tokio::test]
    async fn navigation_starts_the_matching_trigger_once() {
        let backend = FakeBackend::new();
        let (scheduler, navigation) = scheduler_with(backend);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = runs.clone();
        scheduler.register(Trigger::new(
            "vacancy-apply",
            UrlPattern::from_str("*vacancy*").unwrap(),
            Arc::new(move |_ctx: ActionContext| {
                let runs2 = runs2.clone();
                Box::pin(async move {
                    runs2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as ActionFuture
            }),
        ));

        navigation.navigate("https://h.example/vacancy/42").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_navigation_preempts_the_first_action() {
        let backend = FakeBackend::new();
        let (scheduler, navigation) = scheduler_with(backend);
        let stopped = Arc::new(AtomicUsize::new(0));
        let stopped2 = stopped.clone();
        scheduler.register(Trigger::new(
            "long-runner",
            UrlPattern::from_str("*vacancy*").unwrap(),
            Arc::new(move |ctx: ActionContext| {
                let stopped2 = stopped2.clone();
                Box::pin(async move {
                    match ctx.wait(Duration::from_secs(5)).await {
                        Err(crate::error::CoreError::ActionStopped) => {
                            stopped2.fetch_add(1, Ordering::SeqCst);
                        }
                        _ => {}
                    }
                    Ok(())
                }) as ActionFuture
            }),
        ));

        navigation.navigate("https://h.example/vacancy/1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        navigation.navigate("https://h.example/vacancy/2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    /// Two concurrent callers of `stop_current_action` share one in-flight stop rather than the
    /// second one returning immediately with the action still running.
    #[tokio::test]
    async fn concurrent_stop_calls_share_the_same_in_flight_stop() {
        let backend = FakeBackend::new();
        let (scheduler, navigation) = scheduler_with(backend);
        let stopped = Arc::new(AtomicUsize::new(0));
        let stopped2 = stopped.clone();
        scheduler.register(Trigger::new(
            "long-runner",
            UrlPattern::from_str("*vacancy*").unwrap(),
            Arc::new(move |ctx: ActionContext| {
                let stopped2 = stopped2.clone();
                Box::pin(async move {
                    match ctx.wait(Duration::from_secs(5)).await {
                        Err(crate::error::CoreError::ActionStopped) => {
                            stopped2.fetch_add(1, Ordering::SeqCst);
                        }
                        _ => {}
                    }
                    Ok(())
                }) as ActionFuture
            }),
        ));
        navigation.navigate("https://h.example/vacancy/1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        navigation.current_abort_token().fire();

        let (first, second) = tokio::join!(scheduler.stop_current_action(), scheduler.stop_current_action());
        let _ = (first, second);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    fn noop_action() -> ActionFn {
        Arc::new(|_ctx: ActionContext| Box::pin(async { Ok(()) }) as ActionFuture)
    }
}
