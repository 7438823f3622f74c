//! C1: the driver adapter.
//!
//! Everything above this module talks to a page through [`DriverAdapter`], never through a
//! concrete WebDriver/CDP client. The adapter hides two things from its callers: which of the two
//! supported driver shapes (`§4.1`) is actually plugged in, and the `:nth-of-type(N)` pseudo-
//! selector rewrite one of those shapes can't parse natively.
//!
//! Concrete drivers are out of scope here; this module only defines the [`DriverBackend`]
//! contract a concrete driver must satisfy and the adapter built on top of it. See
//! [`crate::testing`] for a fake backend used by this crate's own tests.
//!
//! `create_locator` is folded into [`DriverAdapter::query_one`]/[`DriverAdapter::query_all`]
//! rather than kept as a separate operation: a [`Locator`] here is already the deferred handle
//! a driver hands back for a selector (the opaque element reference `click`/`fill`/etc. take), so
//! resolving one *is* querying for it. There is no distinct unresolved-selector representation to
//! construct ahead of a query.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as Json;

use crate::error::CoreError;

/// Identifies a page within a driver session. Cheap to clone and compare.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageRef(Arc<str>);

impl PageRef {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        PageRef(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which of the two supported driver shapes is behind a [`DriverBackend`] (`§4.1`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverKind {
    /// Exposes a locator-builder API scoped by a page/frame context; does not understand the
    /// `:nth-of-type(N)` pseudo-selector, so the adapter rewrites it into an indexed query.
    A,
    /// Exposes single/plural query methods directly, without a separate context object, and
    /// understands `:nth-of-type(N)` natively.
    B,
}

/// A resolved reference to a concrete DOM element, as handed back by a [`DriverBackend`] query.
/// Opaque outside of the concrete driver that produced it.
#[derive(Clone, Debug)]
pub struct Locator(pub Json);

/// What `wait_for` should block until.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitCondition {
    Visible,
    Attached,
}

/// Options accepted by [`DriverAdapter::click`].
#[derive(Clone, Debug, Default)]
pub struct ClickOptions {
    pub force: bool,
}

/// A `(method, url)` pair identifying one network request, for the request tracker (`§4.2`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        RequestKey {
            method: method.into(),
            url: url.into(),
        }
    }

    /// `data:` and `blob:` requests never complete in the way the tracker expects and are
    /// excluded from the pending tally (`§4.2`).
    pub fn is_ignored_scheme(&self) -> bool {
        self.url.starts_with("data:") || self.url.starts_with("blob:")
    }
}

/// A main-frame navigation observed by the driver's frame-navigation event stream.
#[derive(Clone, Debug)]
pub struct FrameNavigatedEvent {
    pub url: String,
    pub is_main_frame: bool,
}

pub type RequestStartHandler = Arc<dyn Fn(RequestKey) + Send + Sync>;
pub type RequestFinishHandler = Arc<dyn Fn(RequestKey) + Send + Sync>;
pub type FrameNavigatedHandler = Arc<dyn Fn(FrameNavigatedEvent) + Send + Sync>;

/// Handlers a caller registers with [`DriverBackend::subscribe_requests`].
#[derive(Clone)]
pub struct RequestSubscriptionHandlers {
    pub on_start: RequestStartHandler,
    pub on_finish: RequestFinishHandler,
    pub on_fail: RequestFinishHandler,
}

/// An active event subscription. Dropping it (or calling [`Subscription::cancel`] explicitly)
/// unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that does nothing on drop, for backends with nothing to unregister.
    pub fn noop() -> Self {
        Subscription { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// The capability surface a concrete driver backend implements (`§4.1`).
///
/// `DriverAdapter` is the only thing that calls this trait directly; every other module goes
/// through the adapter so that the `:nth-of-type(N)` rewrite and driver-kind branching happen in
/// exactly one place.
#[async_trait]
pub trait DriverBackend: Send + Sync {
    fn kind(&self) -> DriverKind;

    async fn query_one(&self, page: &PageRef, selector: &str) -> Result<Option<Locator>, CoreError>;
    async fn query_all(&self, page: &PageRef, selector: &str) -> Result<Vec<Locator>, CoreError>;
    async fn count(&self, page: &PageRef, selector: &str) -> Result<usize, CoreError>;
    /// Block until `selector` satisfies `condition` or `timeout` elapses. Implementations may
    /// use a native wait; the adapter only falls back to polling for the synthetic
    /// `:nth-of-type(N)` rewrite.
    async fn wait_for(
        &self,
        page: &PageRef,
        selector: &str,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<(), CoreError>;

    /// The element's tag name, lower-cased. Needed to compute `:nth-of-type` indices and by the
    /// text-selector normalization contract (`§6`).
    async fn tag_name(&self, page: &PageRef, locator: &Locator) -> Result<String, CoreError>;

    async fn text_content(&self, page: &PageRef, locator: &Locator) -> Result<Option<String>, CoreError>;
    async fn input_value(&self, page: &PageRef, locator: &Locator) -> Result<String, CoreError>;
    async fn get_attribute(
        &self,
        page: &PageRef,
        locator: &Locator,
        name: &str,
    ) -> Result<Option<String>, CoreError>;
    async fn is_visible(&self, page: &PageRef, locator: &Locator) -> Result<bool, CoreError>;
    async fn is_enabled(&self, page: &PageRef, locator: &Locator) -> Result<bool, CoreError>;

    async fn click(&self, page: &PageRef, locator: &Locator, opts: ClickOptions) -> Result<(), CoreError>;
    async fn type_text(&self, page: &PageRef, locator: &Locator, text: &str) -> Result<(), CoreError>;
    async fn fill(&self, page: &PageRef, locator: &Locator, text: &str) -> Result<(), CoreError>;
    async fn focus(&self, page: &PageRef, locator: &Locator) -> Result<(), CoreError>;

    /// Evaluate `script` against `locator` in page context, passing `args` as its argument list.
    async fn eval_on_element(
        &self,
        page: &PageRef,
        locator: &Locator,
        script: &str,
        args: Vec<Json>,
    ) -> Result<Json, CoreError>;
    /// Evaluate `script` in the main-frame page context. `args` MUST arrive spread across the
    /// function's parameter list, not wrapped as a single array argument (`§6`, scenario S6).
    async fn eval_on_page(&self, page: &PageRef, script: &str, args: Vec<Json>) -> Result<Json, CoreError>;

    async fn current_url(&self, page: &PageRef) -> Result<String, CoreError>;
    async fn goto(&self, page: &PageRef, url: &str, timeout: Duration) -> Result<(), CoreError>;

    /// Subscribe to request lifecycle events for `page`. Only requests with a scheme other than
    /// `data:`/`blob:` are expected to be reported; the tracker still filters defensively.
    fn subscribe_requests(&self, page: &PageRef, handlers: RequestSubscriptionHandlers) -> Subscription;
    /// Subscribe to main-frame navigation events for `page`.
    fn subscribe_frame_navigated(&self, page: &PageRef, handler: FrameNavigatedHandler) -> Subscription;
}

/// Probes a driver handle's shape to decide which [`DriverKind`] it is, per the capability-probe
/// contract in `§4.1`. A concrete driver implements this over whatever introspection its client
/// library exposes (e.g. "does this client have a `find` builder scoped to a frame context").
pub trait DriverProbe {
    fn has_scoped_locator_builder(&self) -> bool;
    fn has_unscoped_query_methods(&self) -> bool;
}

/// Resolve a [`DriverKind`] from a probe, failing closed if neither shape matches.
pub fn detect_driver_kind(probe: &dyn DriverProbe) -> Result<DriverKind, CoreError> {
    if probe.has_scoped_locator_builder() {
        Ok(DriverKind::A)
    } else if probe.has_unscoped_query_methods() {
        Ok(DriverKind::B)
    } else {
        Err(CoreError::DriverUnknown)
    }
}

fn nth_of_type_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<base>.+):nth-of-type\((?P<n>\d+)\)$").expect("static pattern is valid regex"))
}

/// If `selector` ends in a `:nth-of-type(N)` pseudo-selector, split it into its base selector and
/// the 1-based index. `N` of `0` never matches anything and is reported as such rather than
/// panicking on the subtraction.
fn parse_nth_of_type(selector: &str) -> Option<(String, usize)> {
    let caps = nth_of_type_re().captures(selector)?;
    let n: usize = caps["n"].parse().ok()?;
    Some((caps["base"].to_string(), n))
}

/// The uniform façade every other module talks to a page through.
#[derive(Clone)]
pub struct DriverAdapter {
    backend: Arc<dyn DriverBackend>,
    page: PageRef,
}

impl DriverAdapter {
    pub fn new(backend: Arc<dyn DriverBackend>, page: PageRef) -> Self {
        DriverAdapter { backend, page }
    }

    pub fn kind(&self) -> DriverKind {
        self.backend.kind()
    }

    pub fn page(&self) -> &PageRef {
        &self.page
    }

    /// Needs the driver-A rewrite: the selector ends in `:nth-of-type(N)` and the backend is the
    /// shape that can't parse it natively.
    fn needs_nth_of_type_rewrite(&self, selector: &str) -> Option<(String, usize)> {
        if self.backend.kind() != DriverKind::A {
            return None;
        }
        parse_nth_of_type(selector)
    }

    pub async fn query_one(&self, selector: &str) -> Result<Option<Locator>, CoreError> {
        if let Some((base, n)) = self.needs_nth_of_type_rewrite(selector) {
            let all = self.backend.query_all(&self.page, &base).await?;
            return Ok(n.checked_sub(1).and_then(|i| all.into_iter().nth(i)));
        }
        self.backend.query_one(&self.page, selector).await
    }

    pub async fn query_all(&self, selector: &str) -> Result<Vec<Locator>, CoreError> {
        if let Some((base, n)) = self.needs_nth_of_type_rewrite(selector) {
            let all = self.backend.query_all(&self.page, &base).await?;
            return Ok(n.checked_sub(1).and_then(|i| all.into_iter().nth(i)).into_iter().collect());
        }
        self.backend.query_all(&self.page, selector).await
    }

    pub async fn count(&self, selector: &str) -> Result<usize, CoreError> {
        if let Some((base, n)) = self.needs_nth_of_type_rewrite(selector) {
            let all = self.backend.query_all(&self.page, &base).await?;
            return Ok(if n >= 1 && all.len() >= n { 1 } else { 0 });
        }
        self.backend.count(&self.page, selector).await
    }

    pub async fn wait_for(&self, selector: &str, condition: WaitCondition, timeout: Duration) -> Result<(), CoreError> {
        if self.needs_nth_of_type_rewrite(selector).is_some() {
            return self.poll_wait_for(selector, condition, timeout).await;
        }
        self.backend.wait_for(&self.page, selector, condition, timeout).await
    }

    async fn poll_wait_for(&self, selector: &str, condition: WaitCondition, timeout: Duration) -> Result<(), CoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(locator) = self.query_one(selector).await? {
                let ready = match condition {
                    WaitCondition::Attached => true,
                    WaitCondition::Visible => self.backend.is_visible(&self.page, &locator).await.unwrap_or(false),
                };
                if ready {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn tag_name(&self, locator: &Locator) -> Result<String, CoreError> {
        self.backend.tag_name(&self.page, locator).await
    }

    pub async fn text_content(&self, locator: &Locator) -> Result<Option<String>, CoreError> {
        self.backend.text_content(&self.page, locator).await
    }

    pub async fn input_value(&self, locator: &Locator) -> Result<String, CoreError> {
        self.backend.input_value(&self.page, locator).await
    }

    pub async fn get_attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>, CoreError> {
        self.backend.get_attribute(&self.page, locator, name).await
    }

    pub async fn is_visible(&self, locator: &Locator) -> Result<bool, CoreError> {
        self.backend.is_visible(&self.page, locator).await
    }

    pub async fn is_enabled(&self, locator: &Locator) -> Result<bool, CoreError> {
        self.backend.is_enabled(&self.page, locator).await
    }

    pub async fn click(&self, locator: &Locator, opts: ClickOptions) -> Result<(), CoreError> {
        self.backend.click(&self.page, locator, opts).await
    }

    pub async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), CoreError> {
        self.backend.type_text(&self.page, locator, text).await
    }

    pub async fn fill(&self, locator: &Locator, text: &str) -> Result<(), CoreError> {
        self.backend.fill(&self.page, locator, text).await
    }

    pub async fn focus(&self, locator: &Locator) -> Result<(), CoreError> {
        self.backend.focus(&self.page, locator).await
    }

    pub async fn eval_on_element(&self, locator: &Locator, script: &str, args: Vec<Json>) -> Result<Json, CoreError> {
        self.backend.eval_on_element(&self.page, locator, script, args).await
    }

    pub async fn eval_on_page(&self, script: &str, args: Vec<Json>) -> Result<Json, CoreError> {
        self.backend.eval_on_page(&self.page, script, args).await
    }

    pub async fn current_url(&self) -> Result<String, CoreError> {
        self.backend.current_url(&self.page).await
    }

    pub async fn goto(&self, url: &str, timeout: Duration) -> Result<(), CoreError> {
        self.backend.goto(&self.page, url, timeout).await
    }

    pub fn subscribe_requests(&self, handlers: RequestSubscriptionHandlers) -> Subscription {
        self.backend.subscribe_requests(&self.page, handlers)
    }

    pub fn subscribe_frame_navigated(&self, handler: FrameNavigatedHandler) -> Subscription {
        self.backend.subscribe_frame_navigated(&self.page, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nth_of_type_suffix() {
        assert_eq!(
            parse_nth_of_type("li.row:nth-of-type(3)"),
            Some(("li.row".to_string(), 3))
        );
        assert_eq!(parse_nth_of_type("li.row"), None);
    }

    #[test]
    fn zero_index_never_matches() {
        let (_, n) = parse_nth_of_type("li:nth-of-type(0)").unwrap();
        assert_eq!(n.checked_sub(1), None);
    }

    #[test]
    fn detect_driver_kind_prefers_scoped_builder() {
        struct BothProbe;
        impl DriverProbe for BothProbe {
            fn has_scoped_locator_builder(&self) -> bool {
                true
            }
            fn has_unscoped_query_methods(&self) -> bool {
                true
            }
        }
        assert_eq!(detect_driver_kind(&BothProbe).unwrap(), DriverKind::A);
    }

    #[test]
    fn detect_driver_kind_fails_closed() {
        struct NeitherProbe;
        impl DriverProbe for NeitherProbe {
            fn has_scoped_locator_builder(&self) -> bool {
                false
            }
            fn has_unscoped_query_methods(&self) -> bool {
                false
            }
        }
        assert!(matches!(detect_driver_kind(&NeitherProbe), Err(CoreError::DriverUnknown)));
    }
}
