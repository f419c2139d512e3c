//! Scan lifecycle control.
//!
//! [`ScanController`] reacts to adapter state and scan events, decides when to
//! start and stop scanning, and in simulate mode runs a cycle task that
//! alternates scan-on and scan-off windows while the adapter stays powered.
//!
//! The controller tracks a [`ScanIntent`] (what it believes scanning should
//! be) separately from what the adapter reports. Every state change bumps a
//! power epoch; a start call that completes after a newer state change is
//! ignored, so the most recent intent always wins.
//!
//! Start requests made on a state change run as tracked tasks, so event
//! handling never waits on the adapter. Shutdown cancels any request still
//! in flight and joins it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{Adapter, AdapterState};
use crate::config::RunOptions;
use crate::error::MonitorError;
use crate::metrics::MetricsAggregator;

/// The controller's belief about whether scanning should be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanIntent {
    /// Adapter not (yet) powered on.
    Unknown,
    /// A start succeeded and no stop has been requested since.
    ExpectedOn,
    /// Scanning was stopped or failed to start.
    ExpectedOff,
}

/// Coarse lifecycle phase, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    /// No state reported yet.
    Idle,
    /// Adapter in any state other than powered on.
    PoweredOff,
    /// Powered on, not scanning, nothing requested.
    PoweredOn,
    /// Start requested, adapter has not confirmed.
    ScanRequested,
    /// Adapter confirmed scanning.
    Scanning,
    /// Simulate off-window.
    SimulatePaused,
    /// Shutdown in progress; no further requests are issued.
    ShuttingDown,
}

struct SimulateTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ControllerState {
    phase: ControllerPhase,
    intent: ScanIntent,
    powered: bool,
    epoch: u64,
    simulate: Option<SimulateTask>,
    starts: JoinSet<()>,
}

/// Drives scanning on an [`Adapter`].
pub struct ScanController<A: Adapter> {
    adapter: Arc<A>,
    metrics: Arc<MetricsAggregator>,
    options: Arc<RunOptions>,
    shutdown: CancellationToken,
    // Cancels adapter calls still in flight at shutdown.
    requests: CancellationToken,
    state: Mutex<ControllerState>,
}

impl<A: Adapter> ScanController<A> {
    /// Create a controller. Simulate tasks are children of `shutdown`.
    #[must_use]
    pub fn new(
        adapter: Arc<A>,
        metrics: Arc<MetricsAggregator>,
        options: Arc<RunOptions>,
        shutdown: CancellationToken,
    ) -> Self {
        let requests = shutdown.child_token();
        Self {
            adapter,
            metrics,
            options,
            shutdown,
            requests,
            state: Mutex::new(ControllerState {
                phase: ControllerPhase::Idle,
                intent: ScanIntent::Unknown,
                powered: false,
                epoch: 0,
                simulate: None,
                starts: JoinSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current scan intent.
    #[must_use]
    pub fn intent(&self) -> ScanIntent {
        self.lock().intent
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ControllerPhase {
        self.lock().phase
    }

    /// Whether a simulate cycle task is live.
    #[must_use]
    pub fn simulate_running(&self) -> bool {
        self.lock()
            .simulate
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Handle an adapter state change.
    ///
    /// Never waits on the adapter: a start request is spawned and its result
    /// applied when it completes, unless a newer state change came first.
    pub fn on_state_change(self: &Arc<Self>, state: AdapterState) {
        self.metrics.record_state_change();
        println!("[monitor] state={state}");
        info!(state = %state, "adapter state changed");

        let mut inner = self.lock();
        if inner.phase == ControllerPhase::ShuttingDown {
            return;
        }
        inner.epoch += 1;
        inner.powered = state.is_powered_on();
        // Reap requests that already finished.
        while inner.starts.try_join_next().is_some() {}

        if !inner.powered {
            // The adapter has already dropped any scan; nothing to stop.
            inner.intent = ScanIntent::Unknown;
            inner.phase = ControllerPhase::PoweredOff;
            if let Some(task) = inner.simulate.take() {
                debug!("cancelling simulate cycle on power loss");
                task.cancel.cancel();
            }
        } else if self.options.simulate {
            self.launch_simulate(&mut inner);
        } else if inner.intent != ScanIntent::ExpectedOn {
            let epoch = Self::begin_start(&mut inner);
            let this = Arc::clone(self);
            inner.starts.spawn(async move {
                this.finish_start(epoch).await;
            });
        }
    }

    /// Handle the adapter's scan-start event.
    pub fn on_scan_start(&self) {
        self.metrics.record_scan_start();
        println!(
            "[monitor] scanning started allowDuplicates={} extended={} deviceId={}",
            self.options.allow_duplicates,
            self.options.extended,
            self.options.device_label(),
        );

        let mut inner = self.lock();
        if inner.phase != ControllerPhase::ShuttingDown {
            inner.phase = ControllerPhase::Scanning;
        }
    }

    /// Handle the adapter's scan-stop event.
    pub fn on_scan_stop(&self) {
        self.metrics.record_scan_stop();
        println!("[monitor] scan stopped");

        let mut inner = self.lock();
        if matches!(
            inner.phase,
            ControllerPhase::Scanning | ControllerPhase::ScanRequested
        ) {
            inner.phase = if inner.simulate.is_some() {
                ControllerPhase::SimulatePaused
            } else {
                ControllerPhase::PoweredOn
            };
        }
    }

    fn launch_simulate(self: &Arc<Self>, inner: &mut ControllerState) {
        if inner
            .simulate
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
        {
            debug!("simulate cycle already running");
            return;
        }

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(Arc::clone(self).run_simulate(cancel.clone()));
        inner.simulate = Some(SimulateTask { cancel, handle });
        info!(
            on_ms = self.options.simulate_on_ms,
            off_ms = self.options.simulate_off_ms,
            "simulate cycle started"
        );
    }

    async fn run_simulate(self: Arc<Self>, cancel: CancellationToken) {
        let on = self.options.simulate_on();
        let off = self.options.simulate_off();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if self.intent() != ScanIntent::ExpectedOn {
                self.metrics.record_simulate_resume();
                debug!("simulate resume");
                self.request_start().await;
            }

            if !wait_or_cancel(on, &cancel).await {
                break;
            }

            self.request_stop("simulate pause").await;
            self.metrics.record_simulate_pause();
            self.metrics.record_simulate_cycle_complete();
            {
                let mut inner = self.lock();
                if inner.phase != ControllerPhase::ShuttingDown && inner.powered {
                    inner.phase = ControllerPhase::SimulatePaused;
                }
            }

            if !off.is_zero() && !wait_or_cancel(off, &cancel).await {
                break;
            }
        }
        debug!("simulate cycle exited");
    }

    /// Ask the adapter to start scanning.
    ///
    /// Returns `true` if the call succeeded, even when a newer state change
    /// made its result stale.
    pub async fn request_start(&self) -> bool {
        let epoch = {
            let mut inner = self.lock();
            if inner.phase == ControllerPhase::ShuttingDown {
                return false;
            }
            Self::begin_start(&mut inner)
        };
        self.finish_start(epoch).await
    }

    fn begin_start(inner: &mut ControllerState) -> u64 {
        if inner.phase != ControllerPhase::Scanning {
            inner.phase = ControllerPhase::ScanRequested;
        }
        inner.epoch
    }

    async fn finish_start(&self, epoch: u64) -> bool {
        if self.lock().epoch != epoch {
            debug!("skipping start for superseded state");
            return false;
        }

        let result = tokio::select! {
            biased;
            () = self.requests.cancelled() => {
                debug!("scan start abandoned at shutdown");
                return false;
            }
            result = self.adapter.start_scanning(&[], self.options.allow_duplicates) => result,
        };

        let mut inner = self.lock();
        let current = inner.epoch == epoch;
        match result {
            Ok(()) => {
                if current {
                    inner.intent = ScanIntent::ExpectedOn;
                } else {
                    debug!("ignoring stale scan start completion");
                }
                true
            }
            Err(err) => {
                let err = MonitorError::from(err);
                eprintln!("[monitor] scan start failed: {err}");
                warn!(error = %err, code = err.error_code(), "scan start failed");
                if current {
                    inner.intent = ScanIntent::ExpectedOff;
                    if inner.phase == ControllerPhase::ScanRequested {
                        inner.phase = ControllerPhase::PoweredOn;
                    }
                }
                false
            }
        }
    }

    /// Ask the adapter to stop scanning. Failures are logged only.
    pub async fn request_stop(&self, reason: &str) {
        println!("[monitor] scan stop requested ({reason})");
        self.lock().intent = ScanIntent::ExpectedOff;

        if let Err(err) = self.adapter.stop_scanning().await {
            let err = MonitorError::from(err);
            eprintln!("[monitor] scan stop failed: {err}");
            warn!(error = %err, code = err.error_code(), reason, "scan stop failed");
        }
    }

    /// Enter shutdown: abandon in-flight start requests, cancel and join the
    /// simulate task, then stop scanning if the adapter is powered. Later
    /// events are ignored.
    pub async fn shutdown(&self) {
        let (task, mut starts, powered) = {
            let mut inner = self.lock();
            inner.phase = ControllerPhase::ShuttingDown;
            (
                inner.simulate.take(),
                std::mem::take(&mut inner.starts),
                inner.powered,
            )
        };
        self.requests.cancel();

        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(err) = task.handle.await {
                warn!(error = %err, "simulate task ended abnormally");
            }
        }
        while let Some(joined) = starts.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "scan start task ended abnormally");
            }
        }

        if powered {
            self.request_stop("shutdown").await;
        }
    }
}

#[cfg(test)]
impl<A: Adapter> ScanController<A> {
    /// Wait for every spawned start request to finish.
    pub(crate) async fn settle(&self) {
        let mut starts = std::mem::take(&mut self.lock().starts);
        while starts.join_next().await.is_some() {}
    }
}

/// Sleep for `duration`; `false` if cancelled first.
async fn wait_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
