//! Application state shared across handlers.

use std::sync::Arc;

use scanwatch_core::{AdapterState, MetricsAggregator, MetricsSnapshot};
use tokio::sync::watch;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    metrics: Arc<MetricsAggregator>,
    adapter_state: watch::Receiver<AdapterState>,
}

impl AppState {
    /// Create state over a running monitor's counters and adapter state.
    #[must_use]
    pub fn new(
        metrics: Arc<MetricsAggregator>,
        adapter_state: watch::Receiver<AdapterState>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                metrics,
                adapter_state,
            }),
        }
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Last adapter state reported.
    #[must_use]
    pub fn adapter_state(&self) -> AdapterState {
        *self.inner.adapter_state.borrow()
    }
}
