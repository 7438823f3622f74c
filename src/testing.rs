//! A fully in-memory [`DriverBackend`] used by this crate's own tests.
//!
//! Not part of the public API surface real drivers are built against — just a fake with enough
//! knobs to exercise the adapter, the safety wrapper, and selector normalization without a real
//! browser. Gated behind `cfg(test)` and the `test_helpers` feature for downstream crates that
//! want to write their own tests against this crate's contracts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::driver::{
    ClickOptions, DriverBackend, DriverKind, FrameNavigatedEvent, FrameNavigatedHandler, Locator, PageRef,
    RequestSubscriptionHandlers, Subscription, WaitCondition,
};
use crate::error::CoreError;

#[derive(Debug)]
struct FakeDriverError(String);

impl fmt::Display for FakeDriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for FakeDriverError {}

fn driver_err(message: impl Into<String>) -> CoreError {
    CoreError::Driver(Box::new(FakeDriverError(message.into())))
}

#[derive(Default)]
struct FakeState {
    query_results: HashMap<String, Vec<String>>,
    tag_names: HashMap<String, String>,
    texts: HashMap<String, String>,
    attrs: HashMap<(String, String), String>,
    visible: HashMap<String, bool>,
    enabled: HashMap<String, bool>,
    visible_error: Option<String>,
    query_error: Option<String>,
    current_url: String,
    current_url_error: Option<String>,
    current_url_delay: Option<Duration>,
    goto_error: Option<String>,
    eval_on_page_calls: Vec<(String, Vec<Json>)>,
    frame_handlers: Vec<FrameNavigatedHandler>,
}

/// An in-memory stand-in for a real driver, built by chaining `with_*` configuration calls.
pub struct FakeBackend {
    kind: DriverKind,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        FakeBackend {
            kind: DriverKind::B,
            state: Mutex::new(FakeState {
                current_url: "https://example.com".to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn with_kind(mut self, kind: DriverKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_elements(self, selector: &str, ids: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .query_results
            .insert(selector.to_string(), ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_tag(self, id: &str, tag: &str) -> Self {
        self.state.lock().unwrap().tag_names.insert(id.to_string(), tag.to_string());
        self
    }

    pub fn with_text(self, id: &str, text: &str) -> Self {
        self.state.lock().unwrap().texts.insert(id.to_string(), text.to_string());
        self
    }

    pub fn with_attribute(self, id: &str, name: &str, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .attrs
            .insert((id.to_string(), name.to_string()), value.to_string());
        self
    }

    pub fn with_visible(self, id: &str, visible: bool) -> Self {
        self.state.lock().unwrap().visible.insert(id.to_string(), visible);
        self
    }

    /// Every `is_visible` call fails with `message` instead of consulting `with_visible`.
    pub fn with_visible_error(self, message: &str) -> Self {
        self.state.lock().unwrap().visible_error = Some(message.to_string());
        self
    }

    /// Every `query_one`/`query_all`/`count` call fails with `message`.
    pub fn with_query_error(self, message: &str) -> Self {
        self.state.lock().unwrap().query_error = Some(message.to_string());
        self
    }

    pub fn with_current_url_error(self, message: &str) -> Self {
        self.state.lock().unwrap().current_url_error = Some(message.to_string());
        self
    }

    pub fn with_current_url_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().current_url_delay = Some(delay);
        self
    }

    pub fn with_goto_error(self, message: &str) -> Self {
        self.state.lock().unwrap().goto_error = Some(message.to_string());
        self
    }

    /// Every `(script, args)` pair `eval_on_page` was called with, in call order.
    pub fn eval_on_page_calls(&self) -> Vec<(String, Vec<Json>)> {
        self.state.lock().unwrap().eval_on_page_calls.clone()
    }

    /// Synthesize a main/sub-frame navigation event to every registered listener.
    pub fn fire_frame_navigated(&self, url: &str, is_main_frame: bool) {
        let handlers = self.state.lock().unwrap().frame_handlers.clone();
        for handler in handlers {
            handler(FrameNavigatedEvent {
                url: url.to_string(),
                is_main_frame,
            });
        }
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriverBackend for FakeBackend {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    async fn query_one(&self, _page: &PageRef, selector: &str) -> Result<Option<Locator>, CoreError> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.query_error {
            return Err(driver_err(message.clone()));
        }
        Ok(state
            .query_results
            .get(selector)
            .and_then(|ids| ids.first())
            .map(|id| Locator(Json::String(id.clone()))))
    }

    async fn query_all(&self, _page: &PageRef, selector: &str) -> Result<Vec<Locator>, CoreError> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.query_error {
            return Err(driver_err(message.clone()));
        }
        Ok(state
            .query_results
            .get(selector)
            .map(|ids| ids.iter().map(|id| Locator(Json::String(id.clone()))).collect())
            .unwrap_or_default())
    }

    async fn count(&self, page: &PageRef, selector: &str) -> Result<usize, CoreError> {
        Ok(self.query_all(page, selector).await?.len())
    }

    async fn wait_for(&self, page: &PageRef, selector: &str, condition: WaitCondition, _timeout: Duration) -> Result<(), CoreError> {
        let found = self.query_one(page, selector).await?;
        match (found, condition) {
            (Some(_), _) => Ok(()),
            (None, _) => Err(CoreError::Timeout),
        }
    }

    async fn tag_name(&self, _page: &PageRef, locator: &Locator) -> Result<String, CoreError> {
        let id = locator_id(locator);
        Ok(self.state.lock().unwrap().tag_names.get(&id).cloned().unwrap_or_else(|| "div".to_string()))
    }

    async fn text_content(&self, _page: &PageRef, locator: &Locator) -> Result<Option<String>, CoreError> {
        let id = locator_id(locator);
        Ok(self.state.lock().unwrap().texts.get(&id).cloned())
    }

    async fn input_value(&self, _page: &PageRef, locator: &Locator) -> Result<String, CoreError> {
        let id = locator_id(locator);
        Ok(self.state.lock().unwrap().texts.get(&id).cloned().unwrap_or_default())
    }

    async fn get_attribute(&self, _page: &PageRef, locator: &Locator, name: &str) -> Result<Option<String>, CoreError> {
        let id = locator_id(locator);
        Ok(self.state.lock().unwrap().attrs.get(&(id, name.to_string())).cloned())
    }

    async fn is_visible(&self, _page: &PageRef, locator: &Locator) -> Result<bool, CoreError> {
        let id = locator_id(locator);
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.visible_error {
            return Err(driver_err(message.clone()));
        }
        Ok(state.visible.get(&id).copied().unwrap_or(true))
    }

    async fn is_enabled(&self, _page: &PageRef, locator: &Locator) -> Result<bool, CoreError> {
        let id = locator_id(locator);
        Ok(self.state.lock().unwrap().enabled.get(&id).copied().unwrap_or(true))
    }

    async fn click(&self, _page: &PageRef, _locator: &Locator, _opts: ClickOptions) -> Result<(), CoreError> {
        Ok(())
    }

    async fn type_text(&self, _page: &PageRef, _locator: &Locator, _text: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn fill(&self, _page: &PageRef, _locator: &Locator, _text: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn focus(&self, _page: &PageRef, _locator: &Locator) -> Result<(), CoreError> {
        Ok(())
    }

    async fn eval_on_element(&self, _page: &PageRef, _locator: &Locator, _script: &str, _args: Vec<Json>) -> Result<Json, CoreError> {
        Ok(Json::Null)
    }

    async fn eval_on_page(&self, _page: &PageRef, script: &str, args: Vec<Json>) -> Result<Json, CoreError> {
        let mut state = self.state.lock().unwrap();
        state.eval_on_page_calls.push((script.to_string(), args.clone()));
        Ok(Json::Array(args))
    }

    async fn current_url(&self, _page: &PageRef) -> Result<String, CoreError> {
        let (delay, error, url) = {
            let state = self.state.lock().unwrap();
            (state.current_url_delay, state.current_url_error.clone(), state.current_url.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = error {
            return Err(driver_err(message));
        }
        Ok(url)
    }

    async fn goto(&self, _page: &PageRef, url: &str, _timeout: Duration) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.goto_error.clone() {
            return Err(driver_err(message));
        }
        state.current_url = url.to_string();
        Ok(())
    }

    fn subscribe_requests(&self, _page: &PageRef, _handlers: RequestSubscriptionHandlers) -> Subscription {
        Subscription::noop()
    }

    fn subscribe_frame_navigated(&self, _page: &PageRef, handler: FrameNavigatedHandler) -> Subscription {
        self.state.lock().unwrap().frame_handlers.push(handler);
        Subscription::noop()
    }
}

fn locator_id(locator: &Locator) -> String {
    locator.0.as_str().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverAdapter;
    use std::sync::Arc;

    #[tokio::test]
    async fn query_and_read_back_element_state() {
        let backend = FakeBackend::new()
            .with_elements("li.row", &["e1", "e2"])
            .with_tag("e1", "li")
            .with_text("e1", "Vacancy #1")
            .with_attribute("e1", "data-qa", "row-1");
        let adapter = DriverAdapter::new(Arc::new(backend), PageRef::new("p1"));
        let all = adapter.query_all("li.row").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(adapter.tag_name(&all[0]).await.unwrap(), "li");
        assert_eq!(adapter.text_content(&all[0]).await.unwrap().as_deref(), Some("Vacancy #1"));
        assert_eq!(adapter.get_attribute(&all[0], "data-qa").await.unwrap().as_deref(), Some("row-1"));
    }

    #[tokio::test]
    async fn eval_on_page_forwards_args_unchanged() {
        let backend = FakeBackend::new();
        let adapter = DriverAdapter::new(Arc::new(backend), PageRef::new("p1"));
        let args = vec![Json::from(1), Json::from("two"), Json::from(3.0)];
        let result = adapter.eval_on_page("(a, b, c) => [a, b, c]", args.clone()).await.unwrap();
        assert_eq!(result, Json::Array(args));
    }
}
