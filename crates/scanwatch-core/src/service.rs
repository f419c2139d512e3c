//! Top-level monitor orchestration.
//!
//! [`MonitorService`] wires an [`Adapter`] to the controller, the metrics and
//! the warning tap:
//!
//! ```text
//! adapter events ──► dispatch ──┬─► ScanController (state / scan events)
//!                               ├─► MetricsAggregator (discoveries)
//!                               └─► DiagnosticHub ─► WarningTap (warnings)
//! summary ticker ──► MetricsAggregator::snapshot ──► summary lines
//! ```
//!
//! The run ends when the shutdown token is cancelled or the adapter's event
//! stream closes; the shutdown sequence then runs exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{Adapter, AdapterEvent, AdapterEvents, AdapterState, Peripheral};
use crate::config::RunOptions;
use crate::controller::ScanController;
use crate::diagnostics::DiagnosticHub;
use crate::error::{MonitorError, Result};
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::summary;
use crate::tap::{TapHandle, WarningTap};

struct SummaryTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs one monitoring session against an adapter.
pub struct MonitorService<A: Adapter> {
    adapter: Arc<A>,
    options: Arc<RunOptions>,
    metrics: Arc<MetricsAggregator>,
    diagnostics: Arc<DiagnosticHub>,
    controller: Arc<ScanController<A>>,
    shutdown: CancellationToken,
    shutdown_started: AtomicBool,
    state_tx: watch::Sender<AdapterState>,
    summary: Mutex<Option<SummaryTask>>,
    tap: Mutex<Option<TapHandle>>,
    events: Mutex<Option<AdapterEvents>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A: Adapter> MonitorService<A> {
    /// Create a service. `diagnostics` should be the hub the adapter writes to.
    #[must_use]
    pub fn new(adapter: Arc<A>, options: RunOptions, diagnostics: Arc<DiagnosticHub>) -> Self {
        let options = Arc::new(options);
        let metrics = Arc::new(MetricsAggregator::new());
        let shutdown = CancellationToken::new();
        let controller = Arc::new(ScanController::new(
            Arc::clone(&adapter),
            Arc::clone(&metrics),
            Arc::clone(&options),
            shutdown.clone(),
        ));
        let (state_tx, _) = watch::channel(AdapterState::Unknown);

        Self {
            adapter,
            options,
            metrics,
            diagnostics,
            controller,
            shutdown,
            shutdown_started: AtomicBool::new(false),
            state_tx,
            summary: Mutex::new(None),
            tap: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    /// Token that ends the run when cancelled. Safe to cancel repeatedly.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Shared counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        Arc::clone(&self.metrics)
    }

    /// Last adapter state seen, as a watch channel.
    #[must_use]
    pub fn adapter_state(&self) -> watch::Receiver<AdapterState> {
        self.state_tx.subscribe()
    }

    /// The scan controller.
    #[must_use]
    pub fn controller(&self) -> Arc<ScanController<A>> {
        Arc::clone(&self.controller)
    }

    /// Run until shutdown is requested or the adapter stream ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the event stream is unavailable, the adapter
    /// cannot be initialized, or the stream closes unexpectedly. The shutdown
    /// sequence has run in every case.
    pub async fn run(&self) -> Result<()> {
        let outcome = self.run_until_shutdown().await;
        self.shutdown().await;
        if let Err(err) = &outcome {
            error!(error = %err, code = err.error_code(), "monitor stopped on error");
        }
        outcome
    }

    async fn run_until_shutdown(&self) -> Result<()> {
        let mut events = self
            .adapter
            .take_events()
            .ok_or(MonitorError::EventStreamClosed)?;

        *lock(&self.tap) = Some(WarningTap::install(
            &self.diagnostics,
            Arc::clone(&self.metrics),
        ));
        self.spawn_summary();

        let initial = self.adapter.state().await?;
        debug!(state = %initial, "adapter initialized");
        info!(
            simulate = self.options.simulate,
            allow_duplicates = self.options.allow_duplicates,
            device = %self.options.device_label(),
            "monitor running"
        );

        let outcome = loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break Ok(()),
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break Err(MonitorError::EventStreamClosed),
                },
            }
        };

        *lock(&self.events) = Some(events);
        outcome
    }

    // Never awaits: adapter calls triggered here run as controller tasks.
    fn dispatch(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::StateChange(state) => {
                self.state_tx.send_replace(state);
                self.controller.on_state_change(state);
            }
            AdapterEvent::ScanStart => self.controller.on_scan_start(),
            AdapterEvent::ScanStop => self.controller.on_scan_stop(),
            AdapterEvent::Discover(peripheral) => self.on_discover(&peripheral),
            AdapterEvent::Warning(message) => self.diagnostics.warn_text(message),
        }
    }

    fn on_discover(&self, peripheral: &Peripheral) {
        self.metrics.record_discovery(&peripheral.address);
        if self.options.log_discoveries {
            println!(
                "[discover] {} rssi={} connectable={} name={}",
                peripheral.address,
                peripheral
                    .rssi
                    .map_or_else(|| "?".to_owned(), |rssi| rssi.to_string()),
                peripheral
                    .connectable
                    .map_or_else(|| "?".to_owned(), |c| c.to_string()),
                peripheral.advertisement.local_name.as_deref().unwrap_or("-"),
            );
        }
    }

    fn spawn_summary(&self) {
        let cancel = self.shutdown.child_token();
        let metrics = Arc::clone(&self.metrics);
        let period = self.options.summary_interval();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        _ = ticker.tick() => print_summary(&metrics.snapshot(), false),
                    }
                }
            }
        });

        *lock(&self.summary) = Some(SummaryTask { cancel, handle });
    }

    /// Run the shutdown sequence: stop the summary ticker, stop the
    /// controller (simulate task and scan), fold in events already queued,
    /// print the final summary and release the warning tap.
    ///
    /// Returns the final snapshot, or `None` if shutdown had already begun.
    pub async fn shutdown(&self) -> Option<MetricsSnapshot> {
        if self.shutdown_started.swap(true, Ordering::AcqRel) {
            debug!("shutdown already in progress");
            return None;
        }
        info!("monitor shutting down");
        self.shutdown.cancel();

        let summary = lock(&self.summary).take();
        if let Some(task) = summary {
            task.cancel.cancel();
            if let Err(err) = task.handle.await {
                warn!(error = %err, "summary task ended abnormally");
            }
        }

        self.controller.shutdown().await;

        // Give the adapter a moment to report the final stop.
        tokio::task::yield_now().await;
        let events = lock(&self.events).take();
        if let Some(mut events) = events {
            while let Ok(event) = events.try_recv() {
                self.dispatch(event);
            }
        }

        let snapshot = self.metrics.snapshot();
        print_summary(&snapshot, true);

        if let Some(tap) = lock(&self.tap).take() {
            tap.release();
        }
        info!("monitor stopped");
        Some(snapshot)
    }
}

fn print_summary(snapshot: &MetricsSnapshot, is_final: bool) {
    for line in summary::report(snapshot, Utc::now(), is_final) {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapter::mock::MockAdapter;
    use crate::classifier::WarningCategory;
    use crate::diagnostics::{DiagnosticSink, RecordingSink};

    struct Harness {
        adapter: Arc<MockAdapter>,
        service: Arc<MonitorService<MockAdapter>>,
        sink: Arc<RecordingSink>,
        hub: Arc<DiagnosticHub>,
        run: JoinHandle<Result<()>>,
    }

    fn start(adapter: MockAdapter, options: RunOptions) -> Harness {
        let adapter = Arc::new(adapter);
        let sink = Arc::new(RecordingSink::default());
        let hub = Arc::new(DiagnosticHub::new(sink.clone()));
        let service = Arc::new(MonitorService::new(
            Arc::clone(&adapter),
            options,
            Arc::clone(&hub),
        ));
        let run = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.run().await }
        });
        Harness {
            adapter,
            service,
            sink,
            hub,
            run,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_cycle_scenario() {
        let h = start(MockAdapter::powered_on(), RunOptions::default());
        let metrics = h.service.metrics();

        wait_until(|| metrics.snapshot().scan_starts == 1).await;
        assert_eq!(h.adapter.start_calls(), 1);
        assert_eq!(*h.service.adapter_state().borrow(), AdapterState::PoweredOn);

        h.adapter.set_state(AdapterState::PoweredOff);
        wait_until(|| metrics.snapshot().state_changes == 2).await;

        h.service.shutdown_token().cancel();
        h.service.shutdown_token().cancel();
        h.run.await.unwrap().unwrap();

        assert_eq!(h.adapter.stop_calls(), 0);
        assert_eq!(metrics.snapshot().state_changes, 2);
        assert!(h.service.shutdown().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discoveries_and_final_report() {
        let h = start(MockAdapter::powered_on(), RunOptions::default());
        let metrics = h.service.metrics();
        wait_until(|| metrics.snapshot().scan_starts == 1).await;

        for _ in 0..12 {
            h.adapter
                .emit(AdapterEvent::Discover(Peripheral::new("AA:BB:CC:DD:EE:01")));
        }
        for _ in 0..3 {
            h.adapter
                .emit(AdapterEvent::Discover(Peripheral::new("AA:BB:CC:DD:EE:02")));
        }
        wait_until(|| metrics.snapshot().discoveries == 15).await;

        h.service.shutdown_token().cancel();
        h.run.await.unwrap().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.discovery_count("AA:BB:CC:DD:EE:01"), 12);
        // The shutdown stop is folded into the final counters.
        assert_eq!(h.adapter.stop_calls(), 1);
        assert_eq!(snapshot.scan_stops, 1);

        let lines = summary::report(&snapshot, Utc::now(), true);
        assert_eq!(
            lines.last().unwrap(),
            "[summary:final] top devices: AA:BB:CC:DD:EE:01=12, AA:BB:CC:DD:EE:02=3"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_warnings_flow_through_tap_and_tap_is_released() {
        let h = start(MockAdapter::powered_on(), RunOptions::default());
        let metrics = h.service.metrics();
        let original: Arc<dyn DiagnosticSink> = h.sink.clone();
        wait_until(|| metrics.snapshot().state_changes == 1).await;
        assert!(!h.hub.is_current(&original));

        h.adapter.emit(AdapterEvent::Warning(
            "onSocketData: Caught illegal packet: HCI event packet too short".into(),
        ));
        h.adapter
            .emit(AdapterEvent::Warning("hci: controller busy".into()));
        wait_until(|| metrics.snapshot().warnings_total == 2).await;

        h.service.shutdown_token().cancel();
        h.run.await.unwrap().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hci_illegal_total, 1);
        assert_eq!(
            snapshot.illegal_count(WarningCategory::SocketEventTooShort),
            1
        );

        let lines = h.sink.lines();
        assert!(lines[0].contains("[hci-illegal:socket_event_too_short] onSocketData"));
        assert_eq!(lines[1], "hci: controller busy");
        assert!(h.hub.is_current(&original));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_mode_through_service() {
        let options = RunOptions {
            simulate: true,
            simulate_on_ms: 15_000,
            simulate_off_ms: 500,
            ..RunOptions::default()
        };
        let h = start(MockAdapter::powered_on(), options);
        let metrics = h.service.metrics();

        wait_until(|| metrics.snapshot().simulate_cycles == 2).await;
        h.service.shutdown_token().cancel();
        h.run.await.unwrap().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.simulate_cycles, snapshot.simulate_pause_count);
        assert!(snapshot.simulate_resume_count >= snapshot.simulate_cycles);
        assert!(!h.service.controller().simulate_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_start_does_not_stall_events_or_shutdown() {
        let adapter = MockAdapter::powered_on();
        adapter.hang_starts(true);
        let h = start(adapter, RunOptions::default());
        let metrics = h.service.metrics();

        wait_until(|| h.adapter.start_calls() == 1).await;
        h.adapter.emit(AdapterEvent::Warning(
            "processCmdCompleteEvent: illegal packet".into(),
        ));
        h.adapter
            .emit(AdapterEvent::Discover(Peripheral::new("AA:BB:CC:DD:EE:03")));
        wait_until(|| metrics.snapshot().warnings_total == 1).await;
        wait_until(|| metrics.snapshot().discoveries == 1).await;

        h.service.shutdown_token().cancel();
        tokio::time::timeout(Duration::from_secs(3), h.run)
            .await
            .expect("run must finish after cancel")
            .unwrap()
            .unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hci_illegal_total, 1);
        assert_eq!(snapshot.scan_starts, 0);
    }

    #[tokio::test]
    async fn test_missing_event_stream_is_fatal() {
        let adapter = Arc::new(MockAdapter::powered_on());
        let _stolen = adapter.take_events();
        let service = MonitorService::new(
            Arc::clone(&adapter),
            RunOptions::default(),
            Arc::new(DiagnosticHub::new(Arc::new(RecordingSink::default()))),
        );

        let err = service.run().await.unwrap_err();
        assert!(matches!(err, MonitorError::EventStreamClosed));
        assert!(err.is_fatal());
        assert_eq!(adapter.start_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_shutdown_runs_once() {
        let adapter = Arc::new(MockAdapter::powered_on());
        let service = Arc::new(MonitorService::new(
            adapter,
            RunOptions::default(),
            Arc::new(DiagnosticHub::new(Arc::new(RecordingSink::default()))),
        ));

        let a = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.shutdown().await.is_some() }
        });
        let b = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.shutdown().await.is_some() }
        });
        let ran = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(ran.iter().filter(|ran| **ran).count(), 1);
        assert!(service.shutdown_token().is_cancelled());
    }
}
