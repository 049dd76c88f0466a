//! Per-channel notification handlers.
//!
//! One handler per method; registering again replaces the previous one.
//! Handler errors and panics are logged and contained so one broken handler
//! cannot affect the channel or any other handler.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use super::dispatch::panic_message;
use super::envelope::Method;

/// Notification handler callback
pub type NotificationHandler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// What happened to a dispatched notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran successfully
    Handled,
    /// No handler is registered for the method
    Unhandled,
    /// The handler returned an error or panicked
    Failed(String),
}

/// Method → handler table for one channel.
#[derive(Default)]
pub struct NotificationRouter {
    handlers: RwLock<HashMap<Method, NotificationHandler>>,
}

impl NotificationRouter {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`. Returns `true` if it replaced one.
    pub fn on<F>(&self, method: Method, handler: F) -> bool
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .insert(method, Arc::new(handler))
            .is_some()
    }

    /// Remove the handler for `method`.
    pub fn off(&self, method: &Method) -> bool {
        self.handlers.write().remove(method).is_some()
    }

    /// Drop every handler.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Run the handler for `method`, if any.
    pub fn dispatch(&self, method: &Method, params: &Value) -> DispatchOutcome {
        // Clone out so the handler runs without the lock held.
        let handler = self.handlers.read().get(method).cloned();
        let Some(handler) = handler else {
            debug!(method = %method, "no handler for notification");
            return DispatchOutcome::Unhandled;
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(err)) => {
                warn!(method = %method, error = %err, "notification handler failed");
                DispatchOutcome::Failed(format!("{err:#}"))
            }
            Err(panic) => {
                let message = panic_message(panic);
                warn!(method = %method, panic = %message, "notification handler panicked");
                DispatchOutcome::Failed(message)
            }
        }
    }
}
