//! Injected logging handle.
//!
//! Components receive a [`Telemetry`] at construction instead of logging
//! through a process-wide subscriber. Work wrapped in [`Telemetry::in_scope`]
//! runs with the handle's dispatcher as the scoped default and inside a span
//! naming the component, so pool threads and `log` records bridged through
//! `tracing-log` end up in the same place as the caller's events.

use tracing::dispatcher::{self, Dispatch};

#[derive(Clone)]
pub struct Telemetry {
    dispatch: Dispatch,
    component: &'static str,
}

impl Telemetry {
    pub fn new(dispatch: Dispatch) -> Self {
        Self {
            dispatch,
            component: "fire_bulk",
        }
    }

    /// Captures whatever dispatcher is the default on the calling thread.
    pub fn current() -> Self {
        Self::new(dispatcher::get_default(|d| d.clone()))
    }

    /// Discards everything.
    pub fn disabled() -> Self {
        Self::new(Dispatch::none())
    }

    /// Same dispatcher, different component name.
    pub fn for_component(&self, component: &'static str) -> Self {
        Self {
            dispatch: self.dispatch.clone(),
            component,
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, || {
            let span = tracing::info_span!("component", name = self.component);
            let _enter = span.enter();
            f()
        })
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::current()
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("component", &self.component)
            .finish()
    }
}
