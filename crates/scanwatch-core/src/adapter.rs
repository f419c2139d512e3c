//! Bluetooth adapter boundary.
//!
//! The monitor talks to the scanning subsystem through the [`Adapter`] trait
//! and receives everything the subsystem reports as a single ordered stream of
//! [`AdapterEvent`]s.
//!
//! Backends:
//!
//! - [`bluez`] - BlueZ via `bluer` (feature `bluetooth`)
//! - [`mock`] - scripted in-memory adapter (tests and feature `mock-bluetooth`)

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

#[cfg(feature = "bluetooth")]
pub mod bluez;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;

/// Power/availability state reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum AdapterState {
    /// Not yet initialized.
    Unknown,
    /// Being reset by the stack.
    Resetting,
    /// No LE-capable adapter.
    Unsupported,
    /// Access to the adapter was denied.
    Unauthorized,
    /// Present but powered off.
    PoweredOff,
    /// Powered on and usable.
    PoweredOn,
}

impl AdapterState {
    /// Map a BlueZ `Powered` property onto a state.
    #[must_use]
    pub const fn from_powered(powered: bool) -> Self {
        if powered {
            Self::PoweredOn
        } else {
            Self::PoweredOff
        }
    }

    /// Whether scanning is possible in this state.
    #[must_use]
    pub const fn is_powered_on(self) -> bool {
        matches!(self, Self::PoweredOn)
    }

    /// Name used in operator output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Resetting => "resetting",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "poweredOff",
            Self::PoweredOn => "poweredOn",
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advertisement payload fields the monitor cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Advertised local name.
    pub local_name: Option<String>,
}

/// A discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peripheral {
    /// Device address, e.g. `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Whether the advertisement was connectable; `None` if the backend cannot tell.
    pub connectable: Option<bool>,
    /// Advertisement data.
    pub advertisement: Advertisement,
}

impl Peripheral {
    /// Peripheral with just an address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            rssi: None,
            connectable: None,
            advertisement: Advertisement::default(),
        }
    }
}

/// Everything an adapter reports, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// Adapter state changed.
    StateChange(AdapterState),
    /// Scanning actually started.
    ScanStart,
    /// Scanning actually stopped.
    ScanStop,
    /// A peripheral was seen.
    Discover(Peripheral),
    /// Diagnostic text from the stack.
    Warning(String),
}

/// Errors raised by adapter backends.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The requested adapter does not exist.
    #[error("Bluetooth adapter '{name}' not found")]
    NotFound {
        /// Adapter name, e.g. `hci1`.
        name: String,
    },

    /// The Bluetooth session could not be established.
    #[error("Failed to open Bluetooth session: {message}")]
    Session {
        /// Underlying error.
        message: String,
    },

    /// Start-scanning was rejected.
    #[error("Failed to start scanning: {message}")]
    StartScan {
        /// Underlying error.
        message: String,
    },

    /// Stop-scanning was rejected.
    #[error("Failed to stop scanning: {message}")]
    StopScan {
        /// Underlying error.
        message: String,
    },

    /// The event stream was already taken by another consumer.
    #[error("Adapter event stream already taken")]
    EventsTaken,
}

/// Result type for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Receiving end of an adapter's event stream.
pub type AdapterEvents = mpsc::UnboundedReceiver<AdapterEvent>;

/// Capabilities the monitor needs from a scanning subsystem.
pub trait Adapter: Send + Sync + 'static {
    /// Take the event stream. Only the first call returns `Some`.
    fn take_events(&self) -> Option<AdapterEvents>;

    /// Current state. The first call initializes the adapter, which then
    /// reports its state through a [`AdapterEvent::StateChange`].
    fn state(&self) -> impl Future<Output = AdapterResult<AdapterState>> + Send;

    /// Start scanning, optionally restricted to `service_filters`.
    fn start_scanning(
        &self,
        service_filters: &[Uuid],
        allow_duplicates: bool,
    ) -> impl Future<Output = AdapterResult<()>> + Send;

    /// Stop scanning.
    fn stop_scanning(&self) -> impl Future<Output = AdapterResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(AdapterState::PoweredOn.to_string(), "poweredOn");
        assert_eq!(AdapterState::PoweredOff.to_string(), "poweredOff");
        assert_eq!(
            serde_json::to_string(&AdapterState::PoweredOn).unwrap(),
            "\"poweredOn\""
        );
    }

    #[test]
    fn test_from_powered() {
        assert!(AdapterState::from_powered(true).is_powered_on());
        assert_eq!(AdapterState::from_powered(false), AdapterState::PoweredOff);
        assert!(!AdapterState::Resetting.is_powered_on());
    }
}
