//! C4: page session scoping.
//!
//! A [`PageSession`] is a cleanup registry bound to one navigation epoch. Anything that should
//! not outlive the current page — a driver event subscription, a spawned watcher, a DOM-derived
//! cache entry — registers a closure with [`PageSession::on_cleanup`] instead of trying to track
//! navigation itself. The moment the epoch's [`AbortToken`] fires, every registered closure runs,
//! in registration order, exactly once.
//!
//! [`PageSessionFactory`] hands out the session for whichever epoch is current and retires the
//! previous one automatically when [`NavigationManager`] starts a new one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::abort::AbortToken;
use crate::driver::{PageRef, Subscription};
use crate::navigation::{ListenerHandle, NavigationEvent, NavigationManager};

struct Inner {
    page: PageRef,
    token: AbortToken,
    cleanups: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    ended: AtomicBool,
}

/// A cleanup registry scoped to one navigation epoch. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct PageSession(Arc<Inner>);

impl PageSession {
    pub fn new(page: PageRef, token: AbortToken) -> Self {
        let session = PageSession(Arc::new(Inner {
            page,
            token,
            cleanups: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        }));
        let watcher = session.clone();
        tokio::spawn(async move {
            watcher.0.token.fired().await;
            watcher.end_all();
        });
        session
    }

    pub fn page(&self) -> &PageRef {
        &self.0.page
    }

    pub fn abort_token(&self) -> &AbortToken {
        &self.0.token
    }

    /// True while the session's epoch is still current.
    pub fn is_active(&self) -> bool {
        !self.0.ended.load(Ordering::SeqCst) && !self.0.token.is_fired()
    }

    /// Register a closure to run when this session ends. Runs immediately, inline, if the
    /// session has already ended.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        if self.0.ended.load(Ordering::SeqCst) {
            cleanup();
            return;
        }
        self.0.cleanups.lock().expect("page session mutex poisoned").push(Box::new(cleanup));
    }

    /// Tie a driver event [`Subscription`]'s lifetime to this session: it's cancelled when the
    /// session ends.
    pub fn add_event_listener(&self, subscription: Subscription) {
        self.on_cleanup(move || subscription.cancel());
    }

    /// Run `f` only if the session is still active, otherwise skip it and return `None`.
    pub fn if_active<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        if self.is_active() {
            Some(f())
        } else {
            None
        }
    }

    /// Run every registered cleanup, in registration order, exactly once.
    pub fn end_all(&self) {
        if self.0.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let cleanups = std::mem::take(&mut *self.0.cleanups.lock().expect("page session mutex poisoned"));
        for cleanup in cleanups {
            cleanup();
        }
    }
}

struct FactoryInner {
    current: Mutex<PageSession>,
    listener: std::sync::OnceLock<ListenerHandle>,
}

/// Hands out the [`PageSession`] for whichever navigation epoch is current, retiring the previous
/// one the moment [`NavigationManager`] starts a new epoch.
#[derive(Clone)]
pub struct PageSessionFactory(Arc<FactoryInner>);

impl PageSessionFactory {
    pub fn new(manager: &NavigationManager) -> Self {
        let page = manager.page();
        let initial = PageSession::new(page.clone(), manager.current_abort_token());
        let factory = PageSessionFactory(Arc::new(FactoryInner {
            current: Mutex::new(initial),
            listener: std::sync::OnceLock::new(),
        }));

        let bound = factory.clone();
        let listener = manager.on_navigation_start(Arc::new(move |event: &NavigationEvent| {
            let new_session = PageSession::new(page.clone(), event.token.clone());
            let old = {
                let mut guard = bound.0.current.lock().expect("page session factory mutex poisoned");
                std::mem::replace(&mut *guard, new_session)
            };
            old.end_all();
        }));
        factory
            .0
            .listener
            .set(listener)
            .unwrap_or_else(|_| panic!("listener initialized exactly once in PageSessionFactory::new"));

        factory
    }

    /// The session for the currently active navigation epoch.
    pub fn current(&self) -> PageSession {
        self.0.current.lock().expect("page session factory mutex poisoned").clone()
    }

    pub fn on_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        self.current().on_cleanup(cleanup);
    }

    pub fn add_event_listener(&self, subscription: Subscription) {
        self.current().add_event_listener(subscription);
    }

    pub fn if_active<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        self.current().if_active(f)
    }

    /// End the current session immediately, without waiting for the next navigation.
    pub fn end_all(&self) {
        self.current().end_all();
    }
}
