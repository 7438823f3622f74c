//! C7: the navigation-safety decorator.
//!
//! Wraps the raw [`DriverAdapter`] surface so every call (a) races against the caller's
//! [`AbortToken`], turning a preemption into `ActionStopped` instead of letting the underlying
//! driver call fail with some transport-specific error, and (b) classifies a driver error that
//! *does* come back, via [`CoreError::classify_message`], so navigation-induced failures and
//! timeouts read the same regardless of which concrete driver raised them (`§4.7`).
//!
//! A read-only query that races a mid-flight navigation (the element's frame got torn down
//! underneath it) degrades to a safe default instead of propagating: a destroyed execution
//! context doesn't mean the element is broken, it means the page moved on. Mutating operations
//! (`click`/`type_text`/`fill`/`focus`) have no safe default to degrade to and keep propagating.

use std::future::Future;
use std::time::Duration;

use serde_json::Value as Json;

use crate::abort::AbortToken;
use crate::driver::{ClickOptions, DriverAdapter, Locator, WaitCondition};
use crate::error::CoreError;

/// A navigation-safe view of one [`DriverAdapter`], scoped to one action's [`AbortToken`].
pub struct SoftDriver<'a> {
    adapter: &'a DriverAdapter,
    token: &'a AbortToken,
}

impl<'a> SoftDriver<'a> {
    pub fn new(adapter: &'a DriverAdapter, token: &'a AbortToken) -> Self {
        SoftDriver { adapter, token }
    }

    async fn run<T>(&self, fut: impl Future<Output = Result<T, CoreError>>) -> Result<T, CoreError> {
        match self.token.race(fut).await {
            Err(()) => Err(CoreError::ActionStopped),
            Ok(Err(e)) => Err(soften(e)),
            Ok(Ok(value)) => Ok(value),
        }
    }

    /// Like [`SoftDriver::run`], but a navigation-transient failure substitutes `default` rather
    /// than propagating (`§4.7`): the caller is asking a WORKING-state question about an element
    /// whose page moved on mid-query, not one that's actually broken.
    async fn soft<T>(&self, fut: impl Future<Output = Result<T, CoreError>>, default: T) -> Result<T, CoreError> {
        match self.run(fut).await {
            Err(CoreError::NavigationTransient(_)) => Ok(default),
            other => other,
        }
    }

    pub async fn query_one(&self, selector: &str) -> Result<Option<Locator>, CoreError> {
        self.soft(self.adapter.query_one(selector), None).await
    }

    pub async fn query_all(&self, selector: &str) -> Result<Vec<Locator>, CoreError> {
        self.soft(self.adapter.query_all(selector), Vec::new()).await
    }

    pub async fn count(&self, selector: &str) -> Result<usize, CoreError> {
        self.soft(self.adapter.count(selector), 0).await
    }

    pub async fn wait_for(&self, selector: &str, condition: WaitCondition, timeout: Duration) -> Result<(), CoreError> {
        self.run(self.adapter.wait_for(selector, condition, timeout)).await
    }

    pub async fn click(&self, locator: &Locator, opts: ClickOptions) -> Result<(), CoreError> {
        self.run(self.adapter.click(locator, opts)).await
    }

    pub async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), CoreError> {
        self.run(self.adapter.type_text(locator, text)).await
    }

    pub async fn fill(&self, locator: &Locator, text: &str) -> Result<(), CoreError> {
        self.run(self.adapter.fill(locator, text)).await
    }

    pub async fn focus(&self, locator: &Locator) -> Result<(), CoreError> {
        self.run(self.adapter.focus(locator)).await
    }

    pub async fn text_content(&self, locator: &Locator) -> Result<Option<String>, CoreError> {
        self.soft(self.adapter.text_content(locator), None).await
    }

    pub async fn input_value(&self, locator: &Locator) -> Result<String, CoreError> {
        self.soft(self.adapter.input_value(locator), String::new()).await
    }

    pub async fn get_attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>, CoreError> {
        self.soft(self.adapter.get_attribute(locator, name), None).await
    }

    pub async fn is_visible(&self, locator: &Locator) -> Result<bool, CoreError> {
        self.soft(self.adapter.is_visible(locator), false).await
    }

    pub async fn is_enabled(&self, locator: &Locator) -> Result<bool, CoreError> {
        self.soft(self.adapter.is_enabled(locator), false).await
    }

    pub async fn eval_on_element(&self, locator: &Locator, script: &str, args: Vec<Json>) -> Result<Json, CoreError> {
        self.run(self.adapter.eval_on_element(locator, script, args)).await
    }

    pub async fn eval_on_page(&self, script: &str, args: Vec<Json>) -> Result<Json, CoreError> {
        self.run(self.adapter.eval_on_page(script, args)).await
    }

    pub async fn current_url(&self) -> Result<String, CoreError> {
        self.run(self.adapter.current_url()).await
    }
}

/// Reclassify a driver-sourced error whose message matches a known transient/timeout marker.
fn soften(error: CoreError) -> CoreError {
    error.reclassify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::PageRef;
    use crate::testing::FakeBackend;
    use std::sync::Arc;

    fn adapter_with(backend: FakeBackend) -> DriverAdapter {
        DriverAdapter::new(Arc::new(backend), PageRef::new("p1"))
    }

    #[tokio::test]
    async fn classifies_transient_driver_errors() {
        let backend = FakeBackend::new().with_current_url_error("Execution context was destroyed");
        let adapter = adapter_with(backend);
        let token = AbortToken::new();
        let soft = SoftDriver::new(&adapter, &token);
        let result = soft.current_url().await;
        assert!(matches!(result, Err(CoreError::NavigationTransient(_))));
    }

    #[tokio::test]
    async fn reports_action_stopped_when_token_fires_first() {
        let backend = FakeBackend::new().with_current_url_delay(Duration::from_secs(5));
        let adapter = adapter_with(backend);
        let token = AbortToken::new();
        token.fire();
        let soft = SoftDriver::new(&adapter, &token);
        let result = soft.current_url().await;
        assert!(matches!(result, Err(CoreError::ActionStopped)));
    }

    #[tokio::test]
    async fn passes_through_unclassified_errors() {
        let backend = FakeBackend::new().with_current_url_error("element is not clickable at point (1,2)");
        let adapter = adapter_with(backend);
        let token = AbortToken::new();
        let soft = SoftDriver::new(&adapter, &token);
        let result = soft.current_url().await;
        assert!(matches!(result, Err(CoreError::Driver(_))));
    }

    /// Scenario S5: a destroyed execution context mid-query degrades to the safe default instead
    /// of propagating an error.
    #[tokio::test]
    async fn is_visible_degrades_to_false_on_destroyed_context() {
        let backend = FakeBackend::new()
            .with_elements("#x", &["e1"])
            .with_visible_error("Execution context was destroyed");
        let adapter = adapter_with(backend);
        let token = AbortToken::new();
        let soft = SoftDriver::new(&adapter, &token);
        let locator = soft.query_one("#x").await.unwrap().unwrap();
        let visible = soft.is_visible(&locator).await.unwrap();
        assert!(!visible);
    }

    #[tokio::test]
    async fn count_degrades_to_zero_on_navigation_transient() {
        let backend = FakeBackend::new().with_query_error("frame was detached");
        let adapter = adapter_with(backend);
        let token = AbortToken::new();
        let soft = SoftDriver::new(&adapter, &token);
        let count = soft.count("#missing").await.unwrap();
        assert_eq!(count, 0);
    }
}
