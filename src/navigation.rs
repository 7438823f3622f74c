//! C3: the navigation manager.
//!
//! Tracks one page's navigation epoch: an [`AbortToken`] minted each time the page starts
//! navigating, fired the moment the *next* navigation starts (whether driven by [`navigate`](NavigationManager::navigate)
//! or an externally observed frame-navigation event — a link click, a JS redirect, anything).
//! Every other live thing tied to the old epoch — the running action, `on_cleanup` closures, the
//! network tracker's wait — races against that token and loses as soon as it fires.
//!
//! A redirect chain that happens *while we're already loading* does not mint a new epoch: it
//! stabilizes the in-flight one at its final URL (`§9`, scenario S3). The manager only leaves
//! `Loading` once the network goes idle, at which point it fires `navigation_complete` and
//! `page_ready` together; this is what lets an externally-triggered, multi-hop redirect chain
//! settle before the scheduler ever looks at the URL.
//!
//! Five lifecycle events are exposed as typed registration methods, each returning a
//! [`ListenerHandle`] whose `Drop` deregisters it (`§6`): [`on_before_navigate`](NavigationManager::on_before_navigate),
//! [`on_navigation_start`](NavigationManager::on_navigation_start), [`on_url_change`](NavigationManager::on_url_change),
//! [`on_navigation_complete`](NavigationManager::on_navigation_complete), [`on_page_ready`](NavigationManager::on_page_ready).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::future::Shared;
use futures_util::FutureExt;

use crate::abort::AbortToken;
use crate::driver::{DriverAdapter, FrameNavigatedEvent, PageRef, Subscription};
use crate::error::CoreError;
use crate::network::NetworkTracker;

/// Tunables for one [`NavigationManager`].
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct NavigationConfig {
    pub goto_timeout: Duration,
    /// How long a redirect hop observed while already `Loading` must go unfollowed by another
    /// before `url_change` fires for it. Debounces a multi-hop redirect chain down to one event
    /// at its final URL instead of one per hop.
    pub redirect_stabilization: Duration,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        NavigationConfig {
            goto_timeout: Duration::from_secs(30),
            redirect_stabilization: Duration::from_secs(1),
        }
    }
}

/// Whether the manager believes the page is settled or mid-navigation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationPhase {
    Idle,
    Loading,
}

/// An RAII registration: dropping it (or calling `.cancel()`) deregisters the listener.
pub type ListenerHandle = Subscription;

#[derive(Clone, Debug)]
pub struct BeforeNavigateEvent {
    pub previous_url: String,
    pub next_url: String,
}

#[derive(Clone, Debug)]
pub struct NavigationEvent {
    pub token: AbortToken,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct UrlChangeEvent {
    pub url: String,
}

type BeforeNavigateListener = Arc<dyn Fn(&BeforeNavigateEvent) + Send + Sync>;
type EpochListener = Arc<dyn Fn(&NavigationEvent) + Send + Sync>;
type UrlChangeListener = Arc<dyn Fn(&UrlChangeEvent) + Send + Sync>;

/// A registry of listeners of one event kind, each keyed by an id so it can be individually
/// removed when its [`ListenerHandle`] drops.
struct ListenerList<F> {
    next_id: u64,
    entries: Vec<(u64, F)>,
}

impl<F> ListenerList<F> {
    fn new() -> Self {
        ListenerList {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    fn register(&mut self, listener: F) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }
}

type ReadyFuture = Shared<Pin<Box<dyn Future<Output = Result<(), Arc<CoreError>>> + Send>>>;

struct State {
    phase: NavigationPhase,
    token: AbortToken,
    url: String,
}

struct Inner {
    config: NavigationConfig,
    adapter: DriverAdapter,
    tracker: NetworkTracker,
    state: Mutex<State>,
    before_navigate: Mutex<ListenerList<BeforeNavigateListener>>,
    navigation_start: Mutex<ListenerList<EpochListener>>,
    url_change: Mutex<ListenerList<UrlChangeListener>>,
    navigation_complete: Mutex<ListenerList<EpochListener>>,
    page_ready: Mutex<ListenerList<EpochListener>>,
    ready_wait: Mutex<Option<ReadyFuture>>,
    /// Bumped on every redirect hop observed while `Loading`; a pending stabilize task checks
    /// this before firing so only the last hop in a chain produces a `url_change` event.
    redirect_generation: AtomicU64,
}

/// Owns one page's navigation state machine. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct NavigationManager(Arc<Inner>);

impl NavigationManager {
    pub fn new(adapter: DriverAdapter, tracker: NetworkTracker, config: NavigationConfig) -> Self {
        NavigationManager(Arc::new(Inner {
            config,
            adapter,
            tracker,
            state: Mutex::new(State {
                phase: NavigationPhase::Idle,
                token: AbortToken::new(),
                url: String::new(),
            }),
            before_navigate: Mutex::new(ListenerList::new()),
            navigation_start: Mutex::new(ListenerList::new()),
            url_change: Mutex::new(ListenerList::new()),
            navigation_complete: Mutex::new(ListenerList::new()),
            page_ready: Mutex::new(ListenerList::new()),
            ready_wait: Mutex::new(None),
            redirect_generation: AtomicU64::new(0),
        }))
    }

    fn subscribe<F: Send + Sync + 'static>(
        &self,
        list: fn(&Inner) -> &Mutex<ListenerList<F>>,
        listener: F,
    ) -> ListenerHandle {
        let id = list(&self.0).lock().expect("navigation manager mutex poisoned").register(listener);
        let weak: Weak<Inner> = Arc::downgrade(&self.0);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                list(&inner).lock().expect("navigation manager mutex poisoned").remove(id);
            }
        })
    }

    /// Fires just before the previous epoch's token is fired, while its URL is still current.
    pub fn on_before_navigate(&self, listener: BeforeNavigateListener) -> ListenerHandle {
        self.subscribe(|inner| &inner.before_navigate, listener)
    }

    /// Fires the moment a new navigation epoch begins (own `navigate()` call or an externally
    /// observed one), immediately after the previous epoch's token fires.
    pub fn on_navigation_start(&self, listener: EpochListener) -> ListenerHandle {
        self.subscribe(|inner| &inner.navigation_start, listener)
    }

    /// Fires whenever the current URL changes without starting a new epoch (a redirect hop
    /// while already `Loading`).
    pub fn on_url_change(&self, listener: UrlChangeListener) -> ListenerHandle {
        self.subscribe(|inner| &inner.url_change, listener)
    }

    /// Fires once the epoch's network goes idle and the manager returns to `Idle`.
    pub fn on_navigation_complete(&self, listener: EpochListener) -> ListenerHandle {
        self.subscribe(|inner| &inner.navigation_complete, listener)
    }

    /// Fires alongside `navigation_complete`; kept distinct so a caller can depend on "page is
    /// ready for actions" without coupling to the phase-transition naming.
    pub fn on_page_ready(&self, listener: EpochListener) -> ListenerHandle {
        self.subscribe(|inner| &inner.page_ready, listener)
    }

    /// Feed a frame-navigation event observed by the driver into the state machine. Call this
    /// from the subscription installed via [`DriverAdapter::subscribe_frame_navigated`].
    pub fn on_frame_navigated(&self, event: FrameNavigatedEvent) {
        if !event.is_main_frame {
            return;
        }
        let token = {
            let mut state = self.0.state.lock().expect("navigation manager mutex poisoned");
            match state.phase {
                NavigationPhase::Loading => {
                    state.url = event.url.clone();
                    let epoch_token = state.token.clone();
                    drop(state);
                    self.schedule_redirect_stabilize(epoch_token, event.url);
                    return;
                }
                NavigationPhase::Idle => self.start_new_epoch_locked(&mut state, event.url),
            }
        };
        self.spawn_finish_epoch(token);
    }

    /// Debounce a redirect hop: fire `url_change` for `url` only if no further hop arrives
    /// within `redirect_stabilization` and `token`'s epoch is still current.
    fn schedule_redirect_stabilize(&self, token: AbortToken, url: String) {
        let generation = self.0.redirect_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        let delay = self.0.config.redirect_stabilization;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.should_abort(&token) {
                return;
            }
            if this.0.redirect_generation.load(Ordering::SeqCst) != generation {
                return; // superseded by a later hop in the same chain
            }
            this.fire_url_change(&url);
        });
    }

    fn start_new_epoch_locked(&self, state: &mut State, url: String) -> AbortToken {
        let before = BeforeNavigateEvent {
            previous_url: state.url.clone(),
            next_url: url.clone(),
        };
        for (_, listener) in &self.0.before_navigate.lock().expect("navigation manager mutex poisoned").entries {
            listener(&before);
        }

        state.token.fire();
        state.token = AbortToken::new();
        state.phase = NavigationPhase::Loading;
        state.url = url;
        self.0.tracker.reset();
        *self.0.ready_wait.lock().expect("navigation manager mutex poisoned") = None;

        let event = NavigationEvent {
            token: state.token.clone(),
            url: state.url.clone(),
        };
        for (_, listener) in &self.0.navigation_start.lock().expect("navigation manager mutex poisoned").entries {
            listener(&event);
        }
        event.token
    }

    fn fire_url_change(&self, url: &str) {
        let event = UrlChangeEvent { url: url.to_string() };
        for (_, listener) in &self.0.url_change.lock().expect("navigation manager mutex poisoned").entries {
            listener(&event);
        }
    }

    fn fire_navigation_complete(&self, token: &AbortToken, url: &str) {
        let event = NavigationEvent {
            token: token.clone(),
            url: url.to_string(),
        };
        for (_, listener) in &self.0.navigation_complete.lock().expect("navigation manager mutex poisoned").entries {
            listener(&event);
        }
    }

    fn fire_page_ready(&self, token: &AbortToken, url: &str) {
        let event = NavigationEvent {
            token: token.clone(),
            url: url.to_string(),
        };
        for (_, listener) in &self.0.page_ready.lock().expect("navigation manager mutex poisoned").entries {
            listener(&event);
        }
    }

    /// Wait for `token`'s epoch to go network-idle, then hand off to [`Self::complete_navigation`].
    /// A no-op if a newer epoch has already superseded `token`, or if the idle wait itself times
    /// out (the manager just stays `Loading`).
    fn spawn_finish_epoch(&self, token: AbortToken) {
        let this = self.clone();
        tokio::spawn(async move {
            if this.should_abort(&token) {
                return;
            }
            if this.wait_for_page_ready().await.is_err() {
                return;
            }
            this.complete_navigation(&token);
        });
    }

    /// Transition `token`'s epoch `Loading -> Idle` and fire `navigation_complete` then
    /// `page_ready`. A no-op if `token` no longer names the current epoch.
    fn complete_navigation(&self, token: &AbortToken) {
        let url = {
            let mut state = self.0.state.lock().expect("navigation manager mutex poisoned");
            if state.token != *token {
                return;
            }
            state.phase = NavigationPhase::Idle;
            state.url.clone()
        };
        self.fire_navigation_complete(token, &url);
        self.fire_page_ready(token, &url);
    }

    /// Drive the page to `url`. Preempts any in-flight action tied to the previous epoch.
    ///
    /// Returns `Ok(true)` once the navigation has been *initiated* (the driver's `goto` resolved);
    /// the page may still be settling network requests — wait on
    /// [`on_page_ready`](Self::on_page_ready) or call
    /// [`wait_for_page_ready`](Self::wait_for_page_ready) for that. If `goto` fails with a
    /// navigation-transient error (the page moved on before `goto` itself resolved), the epoch is
    /// completed immediately and `Ok(false)` is returned rather than propagating the race as an
    /// error (`§4.3`). Any other `goto` failure propagates as `Err`.
    pub async fn navigate(&self, url: &str) -> Result<bool, CoreError> {
        url::Url::parse(url).map_err(|e| CoreError::InvariantViolated(format!("navigate target is not a valid URL: {e}")))?;

        let token = {
            let mut state = self.0.state.lock().expect("navigation manager mutex poisoned");
            self.start_new_epoch_locked(&mut state, url.to_string())
        };
        match self.0.adapter.goto(url, self.0.config.goto_timeout).await {
            Ok(()) => {
                self.spawn_finish_epoch(token);
                Ok(true)
            }
            Err(e) => match e.reclassify() {
                CoreError::NavigationTransient(_) => {
                    self.complete_navigation(&token);
                    Ok(false)
                }
                other => Err(other),
            },
        }
    }

    /// The abort token for whichever epoch is current right now.
    pub fn current_abort_token(&self) -> AbortToken {
        self.0.state.lock().expect("navigation manager mutex poisoned").token.clone()
    }

    /// True if `token` no longer names the current epoch (it has been superseded, or has fired).
    pub fn should_abort(&self, token: &AbortToken) -> bool {
        token.is_fired() || *token != self.current_abort_token()
    }

    pub fn page(&self) -> PageRef {
        self.0.adapter.page().clone()
    }

    pub fn adapter(&self) -> &DriverAdapter {
        &self.0.adapter
    }

    pub fn current_url(&self) -> String {
        self.0.state.lock().expect("navigation manager mutex poisoned").url.clone()
    }

    pub fn phase(&self) -> NavigationPhase {
        self.0.state.lock().expect("navigation manager mutex poisoned").phase
    }

    /// Wait for the current epoch's page to become "ready": network idle per the attached
    /// [`NetworkTracker`]. Concurrent callers within the same epoch share one underlying wait
    /// rather than each polling the tracker independently.
    pub async fn wait_for_page_ready(&self) -> Result<(), CoreError> {
        let token = self.current_abort_token();
        let shared = {
            let mut guard = self.0.ready_wait.lock().expect("navigation manager mutex poisoned");
            if let Some(shared) = guard.as_ref() {
                shared.clone()
            } else {
                let tracker = self.0.tracker.clone();
                let wait_token = token.clone();
                let fut: Pin<Box<dyn Future<Output = Result<(), Arc<CoreError>>> + Send>> = Box::pin(async move {
                    tracker.wait_for_idle(&wait_token).await.map_err(Arc::new)
                });
                let shared = fut.shared();
                *guard = Some(shared.clone());
                shared
            }
        };
        let result = shared.await;
        {
            let mut guard = self.0.ready_wait.lock().expect("navigation manager mutex poisoned");
            // Only clear the cache if it's still ours: a newer epoch may have already replaced
            // it via start_new_epoch_locked.
            if guard.as_ref().is_some_and(|current| current.peek().is_some()) {
                *guard = None;
            }
        }
        result.map_err(|e| rehydrate(&e))
    }
}

/// Clone an `Arc<CoreError>`'s contents back into an owned `CoreError` for a secondary waiter on
/// a shared future. `Driver` errors lose their concrete source (`CoreError` holds a boxed
/// `dyn Error` that isn't `Clone`) and are reported as `InvariantViolated` instead.
fn rehydrate(e: &CoreError) -> CoreError {
    match e {
        CoreError::ActionStopped => CoreError::ActionStopped,
        CoreError::NavigationTransient(m) => CoreError::NavigationTransient(m.clone()),
        CoreError::Timeout => CoreError::Timeout,
        CoreError::DriverUnknown => CoreError::DriverUnknown,
        CoreError::BadSelector(s) => CoreError::BadSelector(s.clone()),
        CoreError::InvariantViolated(s) => CoreError::InvariantViolated(s.clone()),
        CoreError::Driver(inner) => CoreError::InvariantViolated(format!("driver error (shared wait): {inner}")),
    }
}
