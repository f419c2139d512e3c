//! # scanwatch
//!
//! BLE scanning diagnostic monitor.
//!
//! This binary:
//! - Keeps a scan running across adapter power transitions
//! - Optionally pauses and resumes scanning on a fixed cycle (`--simulate`)
//! - Counts and annotates HCI illegal-packet warnings
//! - Prints periodic and final summaries, and optionally serves them over HTTP
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package scanwatch -- --simulate --log-discoveries
//!
//! # Production
//! scanwatch --config /etc/scanwatch/config.toml --log-dir /var/log/scanwatch
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

#[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
compile_error!("enable the `bluetooth` or `mock-bluetooth` feature");

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::CommandFactory;
use scanwatch::cli::{Cli, ParseOutcome};
use scanwatch::logging::{self, LogSettings};
use scanwatch::state::AppState;
use scanwatch_core::{Adapter, DiagnosticHub, MonitorService, RunOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn main() -> ExitCode {
    let cli = match Cli::parse_args() {
        ParseOutcome::Run(cli) => cli,
        ParseOutcome::Exit => return ExitCode::SUCCESS,
        ParseOutcome::Invalid => return ExitCode::FAILURE,
    };

    let options = match RunOptions::load(cli.config.as_deref(), &cli.overrides()) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("scanwatch: {err}");
            eprintln!("{}", Cli::command().render_usage());
            return ExitCode::from(err.exit_code());
        }
    };

    if let Err(err) = logging::init(&LogSettings::from_options(&options)) {
        eprintln!("scanwatch: {err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("scanwatch: building tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(options)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "scanwatch failed");
            eprintln!("scanwatch: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(options: RunOptions) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        device = %options.device_label(),
        "starting scanwatch"
    );

    let diagnostics = Arc::new(DiagnosticHub::stderr());
    let adapter = Arc::new(build_adapter(&options, &diagnostics));
    monitor(adapter, options, diagnostics).await
}

async fn monitor<A: Adapter>(
    adapter: Arc<A>,
    options: RunOptions,
    diagnostics: Arc<DiagnosticHub>,
) -> anyhow::Result<()> {
    let status_addr = options.status_addr;
    let service = MonitorService::new(adapter, options, diagnostics);
    let shutdown = service.shutdown_token();

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let status = match status_addr {
        Some(addr) => {
            let listener = scanwatch::api::bind(addr)
                .await
                .with_context(|| format!("binding status API on {addr}"))?;
            let state = AppState::new(service.metrics(), service.adapter_state());
            Some(tokio::spawn(scanwatch::api::serve(
                listener,
                state,
                shutdown.clone(),
            )))
        }
        None => None,
    };

    let outcome = service.run().await;

    if let Some(status) = status {
        shutdown.cancel();
        match status.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "status API stopped with error"),
            Err(err) => warn!(error = %err, "status API task failed"),
        }
    }

    info!("scanwatch stopped");
    outcome.context("monitor failed")
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                    () = shutdown.cancelled() => return,
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    () = shutdown.cancelled() => return,
                }
            }
        }
    }

    #[cfg(not(unix))]
    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        () = shutdown.cancelled() => return,
    }

    shutdown.cancel();
}

#[cfg(feature = "bluetooth")]
fn build_adapter(
    options: &RunOptions,
    diagnostics: &Arc<DiagnosticHub>,
) -> scanwatch_core::BluezAdapter {
    if options.extended {
        debug!("BlueZ backend has no extended-scan switch; --extended only changes the report");
    }
    scanwatch_core::BluezAdapter::new(options.adapter_name(), Arc::clone(diagnostics))
}

#[cfg(all(feature = "mock-bluetooth", not(feature = "bluetooth")))]
fn build_adapter(
    _options: &RunOptions,
    _diagnostics: &Arc<DiagnosticHub>,
) -> scanwatch_core::MockAdapter {
    warn!("built without Bluetooth support; running against a mock adapter");
    scanwatch_core::MockAdapter::powered_on()
}
