//! Per-connection session state.

use crate::proxy::backend::Backend;
use std::time::Duration;

/// State carried by one inbound client connection.
///
/// Connectors live here and nowhere else; they are torn down when the
/// session closes or when a re-bind replaces the backend set.
pub struct SessionContext {
    /// DN the client authenticated as, once a merged Bind succeeded.
    pub bound_as: Option<String>,
    /// Connectors in backend-declaration order.
    pub backends: Vec<Box<dyn Backend>>,
    /// Wall-clock bound per merged operation.
    pub deadline: Duration,
}

impl SessionContext {
    pub fn new(deadline: Duration) -> Self {
        Self {
            bound_as: None,
            backends: Vec::new(),
            deadline,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound_as.is_some()
    }

    /// Tears down and drops all connectors.
    pub async fn reset_backends(&mut self) {
        for backend in &mut self.backends {
            backend.teardown().await;
        }
        self.backends.clear();
    }

    /// Full teardown at end of session.
    pub async fn close(&mut self) {
        self.bound_as = None;
        self.reset_backends().await;
    }
}
