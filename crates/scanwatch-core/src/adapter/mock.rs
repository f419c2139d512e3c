//! Scripted in-memory adapter.
//!
//! Behaves like a well-mannered driver: a successful start emits
//! [`AdapterEvent::ScanStart`], a stop while scanning emits
//! [`AdapterEvent::ScanStop`], and the first [`Adapter::state`] read announces
//! the initial state. Tests push further events with [`MockAdapter::emit`] and
//! [`MockAdapter::set_state`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use super::{Adapter, AdapterError, AdapterEvent, AdapterEvents, AdapterResult, AdapterState};

/// A call made against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `start_scanning`.
    Start {
        /// Service filter passed in.
        service_filters: Vec<Uuid>,
        /// Duplicate flag passed in.
        allow_duplicates: bool,
    },
    /// `stop_scanning`.
    Stop,
}

/// In-memory [`Adapter`].
#[derive(Debug)]
pub struct MockAdapter {
    events_tx: mpsc::UnboundedSender<AdapterEvent>,
    events_rx: Mutex<Option<AdapterEvents>>,
    state: Mutex<AdapterState>,
    initialized: AtomicBool,
    scanning: AtomicBool,
    failing_starts: AtomicUsize,
    failing_stops: AtomicUsize,
    hang_starts: AtomicBool,
    calls: Mutex<Vec<MockCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockAdapter {
    /// Mock that reports `initial` on its first state read.
    #[must_use]
    pub fn new(initial: AdapterState) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            state: Mutex::new(initial),
            initialized: AtomicBool::new(false),
            scanning: AtomicBool::new(false),
            failing_starts: AtomicUsize::new(0),
            failing_stops: AtomicUsize::new(0),
            hang_starts: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Mock that powers on as soon as it is initialized.
    #[must_use]
    pub fn powered_on() -> Self {
        Self::new(AdapterState::PoweredOn)
    }

    /// Push an arbitrary event.
    pub fn emit(&self, event: AdapterEvent) {
        // The receiver may be gone once the monitor has shut down.
        let _ = self.events_tx.send(event);
    }

    /// Change state and announce it. Leaving `poweredOn` drops any scan.
    pub fn set_state(&self, state: AdapterState) {
        *lock(&self.state) = state;
        if !state.is_powered_on() {
            self.scanning.store(false, Ordering::SeqCst);
        }
        self.emit(AdapterEvent::StateChange(state));
    }

    /// Make the next `count` start calls fail.
    pub fn fail_next_starts(&self, count: usize) {
        self.failing_starts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` stop calls fail.
    pub fn fail_next_stops(&self, count: usize) {
        self.failing_stops.store(count, Ordering::SeqCst);
    }

    /// Make start calls never complete, like a wedged controller.
    pub fn hang_starts(&self, hang: bool) {
        self.hang_starts.store(hang, Ordering::SeqCst);
    }

    /// Every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Number of start calls.
    #[must_use]
    pub fn start_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::Start { .. }))
            .count()
    }

    /// Number of stop calls.
    #[must_use]
    pub fn stop_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::Stop))
            .count()
    }

    /// Whether the mock believes it is scanning.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::powered_on()
    }
}

impl Adapter for MockAdapter {
    fn take_events(&self) -> Option<AdapterEvents> {
        lock(&self.events_rx).take()
    }

    async fn state(&self) -> AdapterResult<AdapterState> {
        let state = *lock(&self.state);
        if !self.initialized.swap(true, Ordering::SeqCst) && state != AdapterState::Unknown {
            self.emit(AdapterEvent::StateChange(state));
        }
        Ok(state)
    }

    async fn start_scanning(
        &self,
        service_filters: &[Uuid],
        allow_duplicates: bool,
    ) -> AdapterResult<()> {
        lock(&self.calls).push(MockCall::Start {
            service_filters: service_filters.to_vec(),
            allow_duplicates,
        });
        tokio::task::yield_now().await;

        if self.hang_starts.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if Self::take_failure(&self.failing_starts) {
            return Err(AdapterError::StartScan {
                message: "mock start failure".to_owned(),
            });
        }
        if !lock(&self.state).is_powered_on() {
            return Err(AdapterError::StartScan {
                message: "adapter is not powered on".to_owned(),
            });
        }
        if !self.scanning.swap(true, Ordering::SeqCst) {
            self.emit(AdapterEvent::ScanStart);
        }
        Ok(())
    }

    async fn stop_scanning(&self) -> AdapterResult<()> {
        lock(&self.calls).push(MockCall::Stop);
        tokio::task::yield_now().await;

        if Self::take_failure(&self.failing_stops) {
            return Err(AdapterError::StopScan {
                message: "mock stop failure".to_owned(),
            });
        }
        if self.scanning.swap(false, Ordering::SeqCst) {
            self.emit(AdapterEvent::ScanStop);
        }
        Ok(())
    }
}
