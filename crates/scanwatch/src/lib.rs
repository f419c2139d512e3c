//! # scanwatch
//!
//! Command-line front end and status API for the scanwatch BLE monitor.
//!
//! The monitoring logic lives in `scanwatch-core`; this crate adds argument
//! parsing, logging setup and the optional HTTP status endpoints.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod cli;
pub mod logging;
pub mod state;
