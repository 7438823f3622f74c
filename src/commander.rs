//! The commander façade: wires C1-C7 together into one handle per page.
//!
//! `Commander` is the crate's single public entry point. Constructing one takes a concrete
//! [`DriverBackend`](crate::driver::DriverBackend) and starts the navigation manager, network
//! tracker, page session factory, and scheduler bound to it; from there, callers drive the page
//! with [`Commander::navigate`] and register [`Trigger`]s that run automatically as navigation
//! happens.

use std::sync::{Arc, Mutex, OnceLock};

use crate::action::CommanderHandle;
use crate::config::CoreConfig;
use crate::driver::{DriverAdapter, DriverBackend, PageRef, Subscription};
use crate::error::CoreError;
use crate::navigation::{NavigationManager, NavigationPhase};
use crate::network::NetworkTracker;
use crate::page_session::PageSessionFactory;
use crate::trigger::{Scheduler, Trigger};

struct Inner {
    driver: DriverAdapter,
    network: NetworkTracker,
    navigation: NavigationManager,
    page_sessions: PageSessionFactory,
    scheduler: OnceLock<Scheduler>,
    request_subscription: Mutex<Option<Subscription>>,
    frame_subscription: Mutex<Option<Subscription>>,
    config: CoreConfig,
}

/// The crate's public entry point: one page's lifecycle state machine plus its trigger
/// scheduler. Cheap to clone; clones share the same underlying commander.
#[derive(Clone)]
pub struct Commander(Arc<Inner>);

impl Commander {
    pub fn new(backend: Arc<dyn DriverBackend>, page: PageRef, config: CoreConfig) -> Self {
        let driver = DriverAdapter::new(backend, page);
        let network = NetworkTracker::new(config.network);
        let navigation = NavigationManager::new(driver.clone(), network.clone(), config.navigation);
        let page_sessions = PageSessionFactory::new(&navigation);

        let request_subscription = network.attach(&driver);
        let frame_subscription = {
            let navigation = navigation.clone();
            driver.subscribe_frame_navigated(Arc::new(move |event| navigation.on_frame_navigated(event)))
        };

        let commander = Commander(Arc::new(Inner {
            driver,
            network,
            navigation: navigation.clone(),
            page_sessions,
            scheduler: OnceLock::new(),
            request_subscription: Mutex::new(Some(request_subscription)),
            frame_subscription: Mutex::new(Some(frame_subscription)),
            config,
        }));

        let handle: Arc<dyn CommanderHandle> = Arc::new(commander.clone());
        let deadline = commander.0.config.graceful_stop_deadline;
        let scheduler = Scheduler::new(handle, navigation, deadline);
        commander
            .0
            .scheduler
            .set(scheduler)
            .unwrap_or_else(|_| panic!("scheduler initialized exactly once in Commander::new"));

        commander
    }

    pub fn page(&self) -> PageRef {
        self.0.navigation.page()
    }

    pub fn current_url(&self) -> String {
        self.0.navigation.current_url()
    }

    pub fn phase(&self) -> NavigationPhase {
        self.0.navigation.phase()
    }

    /// Navigate the page to `url`. Preempts whatever action is currently running. Returns
    /// `Ok(false)` rather than an error if `goto` raced a navigation that was already underway
    /// (`§4.3`); any other failure propagates.
    pub async fn navigate(&self, url: &str) -> Result<bool, CoreError> {
        self.0.navigation.navigate(url).await
    }

    pub fn register_trigger(&self, trigger: Trigger) {
        self.scheduler().register(trigger);
    }

    pub fn unregister_trigger(&self, id: &str) -> bool {
        self.scheduler().unregister(id)
    }

    pub fn trigger_count(&self) -> usize {
        self.scheduler().trigger_count()
    }

    fn scheduler(&self) -> &Scheduler {
        self.0.scheduler.get().expect("scheduler initialized in Commander::new")
    }

    /// Tear the commander down in a fixed order: stop the running action, detach the network
    /// and navigation event subscriptions, then run every registered page-session cleanup.
    pub async fn shutdown(&self) {
        self.scheduler().stop_current_action().await;

        if let Some(sub) = self.0.request_subscription.lock().expect("commander mutex poisoned").take() {
            sub.cancel();
        }
        if let Some(sub) = self.0.frame_subscription.lock().expect("commander mutex poisoned").take() {
            sub.cancel();
        }
        self.0.network.reset();

        self.0.page_sessions.end_all();
    }
}

impl CommanderHandle for Commander {
    fn driver(&self) -> &DriverAdapter {
        &self.0.driver
    }

    fn navigation(&self) -> &NavigationManager {
        &self.0.navigation
    }

    fn page_sessions(&self) -> &PageSessionFactory {
        &self.0.page_sessions
    }

    fn network(&self) -> &NetworkTracker {
        &self.0.network
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkTrackerConfig;
    use crate::pattern::UrlPattern;
    use crate::testing::FakeBackend;
    use crate::trigger::{ActionFuture, Trigger};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// A short debounce so tests don't have to wait out the 30s lifecycle-integrated default to
    /// see `page_ready` fire.
    fn fast_config() -> CoreConfig {
        CoreConfig {
            network: NetworkTrackerConfig {
                idle_debounce: Duration::from_millis(20),
                max_wait: Duration::from_secs(5),
                request_timeout: Duration::from_secs(30),
            },
            ..CoreConfig::default()
        }
    }

    #[tokio::test]
    async fn construction_wires_an_idle_commander() {
        let commander = Commander::new(Arc::new(FakeBackend::new()), PageRef::new("p1"), fast_config());
        assert_eq!(commander.phase(), NavigationPhase::Idle);
        assert_eq!(commander.trigger_count(), 0);
    }

    #[tokio::test]
    async fn navigate_runs_registered_trigger() {
        let commander = Commander::new(Arc::new(FakeBackend::new()), PageRef::new("p1"), fast_config());
        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = runs.clone();
        commander.register_trigger(Trigger::new(
            "vacancy",
            UrlPattern::from_str("*vacancy*").unwrap(),
            Arc::new(move |_ctx| {
                let runs2 = runs2.clone();
                Box::pin(async move {
                    runs2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as ActionFuture
            }),
        ));

        commander.navigate("https://h.example/vacancy/1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_ends_page_session_cleanups() {
        let commander = Commander::new(Arc::new(FakeBackend::new()), PageRef::new("p1"), fast_config());
        let cleaned = Arc::new(AtomicUsize::new(0));
        let cleaned2 = cleaned.clone();
        commander.page_sessions().on_cleanup(move || {
            cleaned2.fetch_add(1, Ordering::SeqCst);
        });
        commander.shutdown().await;
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }
}
