//! A page-lifecycle state machine coupled with a stoppable page-trigger scheduler for browser
//! automation.
//!
//! [`Commander`](commander::Commander) is the crate's entry point: construct one over a concrete
//! [`DriverBackend`](driver::DriverBackend), register [`Trigger`](trigger::Trigger)s, and call
//! [`navigate`](commander::Commander::navigate). Each navigation mints a fresh
//! [`AbortToken`](abort::AbortToken) epoch; whatever trigger matched the previous page's URL is
//! given a graceful window to notice its token fired and stop before the next one starts.
//!
//! This crate has no opinion on which WebDriver/CDP client backs it — see [`driver`] for the
//! contract a concrete driver implements, and [`testing`] for an in-memory fake used by this
//! crate's own test suite.
//!
//! ```text
//!                    ┌─────────────┐
//!   navigate() ─────▶│ Navigation   │── epoch start ──▶ Scheduler ──▶ Trigger action
//!                    │ Manager (C3) │                     (C5)         (C6 context)
//!                    └─────┬────────┘
//!                          │ idle wait
//!                    ┌─────▼────────┐
//!                    │ Network      │
//!                    │ Tracker (C2) │
//!                    └──────────────┘
//! ```

pub mod abort;
pub mod action;
pub mod commander;
pub mod config;
pub mod driver;
pub mod error;
pub mod navigation;
pub mod network;
pub mod page_session;
pub mod pattern;
pub mod safety;
pub mod selector;
#[cfg(any(test, feature = "test_helpers"))]
pub mod testing;
pub mod trigger;

pub use abort::AbortToken;
pub use commander::Commander;
pub use config::CoreConfig;
pub use error::CoreError;
pub use pattern::UrlPattern;
pub use trigger::{ActionFn, ActionFuture, Condition, Trigger, TriggerContext, TriggerRegistry};
