//! Warning tap: classify and count every diagnostic warning.
//!
//! [`WarningTap::install`] wraps the sink currently installed in a
//! [`DiagnosticHub`]. Each warning is counted through the
//! [`MetricsAggregator`]; illegal-packet warnings are re-emitted with a
//! timestamp and `[hci-illegal:<category>]` prefix, everything else is
//! forwarded untouched.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, error};

use crate::classifier::WarningCategory;
use crate::diagnostics::{render_args, DiagnosticArg, DiagnosticHub, DiagnosticSink};
use crate::error::MonitorError;
use crate::metrics::MetricsAggregator;

/// Sink installed by the tap.
struct TapSink {
    prior: Arc<dyn DiagnosticSink>,
    metrics: Arc<MetricsAggregator>,
}

impl TapSink {
    fn classify(&self, args: &[DiagnosticArg]) -> Result<Option<WarningCategory>, MonitorError> {
        panic::catch_unwind(AssertUnwindSafe(|| {
            let text = render_args(args);
            self.metrics.record_warning(&text)
        }))
        .map_err(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            MonitorError::ClassificationFailed(reason)
        })
    }
}

impl DiagnosticSink for TapSink {
    fn warn(&self, args: &[DiagnosticArg]) {
        match self.classify(args) {
            Ok(Some(category)) => {
                let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                let mut annotated = Vec::with_capacity(args.len() + 1);
                annotated.push(DiagnosticArg::Text(format!(
                    "[{stamp}] [hci-illegal:{category}]"
                )));
                annotated.extend_from_slice(args);
                self.prior.warn(&annotated);
            }
            Ok(None) => self.prior.warn(args),
            Err(err) => {
                error!(error = %err, "warning tap failed");
                self.prior
                    .warn(&[DiagnosticArg::Text(format!("[warning-tap] {err}"))]);
                self.prior.warn(args);
            }
        }
    }
}

/// Installer for the warning tap.
pub struct WarningTap;

impl WarningTap {
    /// Wrap the hub's current sink. Warnings are counted until the returned
    /// handle is released or dropped.
    #[must_use = "dropping the handle uninstalls the tap"]
    pub fn install(hub: &Arc<DiagnosticHub>, metrics: Arc<MetricsAggregator>) -> TapHandle {
        let prior = hub.current();
        let tap: Arc<dyn DiagnosticSink> = Arc::new(TapSink {
            prior: Arc::clone(&prior),
            metrics,
        });
        hub.replace(tap);
        debug!("warning tap installed");

        TapHandle {
            hub: Arc::clone(hub),
            prior,
            released: AtomicBool::new(false),
        }
    }
}

/// Deactivation handle for an installed tap.
pub struct TapHandle {
    hub: Arc<DiagnosticHub>,
    prior: Arc<dyn DiagnosticSink>,
    released: AtomicBool,
}

impl TapHandle {
    /// Put the prior sink back. Only the first call has an effect.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.hub.replace(Arc::clone(&self.prior));
        debug!("warning tap released");
    }

    /// Whether [`release`](Self::release) has run.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for TapHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for TapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapHandle")
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}
