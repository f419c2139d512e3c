//! # scanwatch-core
//!
//! Core logic for the scanwatch BLE scanning diagnostic monitor.
//!
//! This crate provides:
//! - Scan lifecycle control that follows adapter power state
//! - A simulate mode that pauses and resumes scanning on a fixed cycle
//! - Classification and counting of HCI illegal-packet warnings
//! - Run metrics and periodic human-readable summaries
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`adapter`] - Adapter boundary, BlueZ backend and scripted mock
//! - [`classifier`] - Warning text to [`WarningCategory`] mapping
//! - [`metrics`] - Thread-safe run counters and snapshots
//! - [`summary`] - Summary line formatting
//! - [`diagnostics`] - Swappable diagnostic sink shared with the adapter
//! - [`tap`] - Warning interception and annotation
//! - [`controller`] - Scan intent state machine and simulate loop
//! - [`service`] - Top-level orchestration and shutdown
//! - [`config`] - Run option loading and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod adapter;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod service;
pub mod summary;
pub mod tap;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use adapter::bluez::BluezAdapter;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use adapter::mock::MockAdapter;
pub use adapter::{
    Adapter, AdapterError, AdapterEvent, AdapterEvents, AdapterResult, AdapterState, Peripheral,
};
pub use classifier::{classify, WarningCategory};
pub use config::{default_config_path, ConfigOverrides, RunOptions};
pub use controller::{ControllerPhase, ScanController, ScanIntent};
pub use diagnostics::{DiagnosticArg, DiagnosticHub, DiagnosticSink, StderrSink};
pub use error::{MonitorError, Result};
pub use metrics::{DeviceCount, KindCount, MetricsAggregator, MetricsSnapshot};
pub use service::MonitorService;
pub use tap::{TapHandle, WarningTap};
