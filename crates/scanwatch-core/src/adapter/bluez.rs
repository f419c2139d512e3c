//! BlueZ backend built on `bluer`.
//!
//! The D-Bus session is opened lazily on the first [`Adapter::state`] call.
//! From then on a watcher task turns `Powered` property changes into
//! [`AdapterEvent::StateChange`]. Scanning runs in its own task that owns the
//! discovery stream; dropping the stream is what stops discovery in BlueZ.

use std::sync::{Arc, Mutex, PoisonError};

use bluer::{AdapterProperty, DiscoveryFilter, DiscoveryTransport, Session};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Adapter, AdapterError, AdapterEvent, AdapterEvents, AdapterResult, AdapterState, Advertisement,
    Peripheral,
};
use crate::diagnostics::{DiagnosticArg, DiagnosticHub};

struct Connected {
    // Keeps the D-Bus connection alive for the adapter handle.
    _session: Session,
    adapter: bluer::Adapter,
}

struct Discovery {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// [`Adapter`] backed by the BlueZ daemon.
pub struct BluezAdapter {
    adapter_name: Option<String>,
    diagnostics: Arc<DiagnosticHub>,
    events_tx: mpsc::UnboundedSender<AdapterEvent>,
    events_rx: Mutex<Option<AdapterEvents>>,
    connected: OnceCell<Connected>,
    discovery: tokio::sync::Mutex<Option<Discovery>>,
    cancel: CancellationToken,
}

impl BluezAdapter {
    /// Create a backend for `adapter_name` (`hci<n>`) or the default adapter.
    ///
    /// Nothing touches D-Bus until the first state read.
    #[must_use]
    pub fn new(adapter_name: Option<String>, diagnostics: Arc<DiagnosticHub>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            adapter_name,
            diagnostics,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            connected: OnceCell::new(),
            discovery: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    async fn connect(&self) -> AdapterResult<&Connected> {
        self.connected
            .get_or_try_init(|| async {
                let session = Session::new().await.map_err(|e| AdapterError::Session {
                    message: e.to_string(),
                })?;

                let adapter = match &self.adapter_name {
                    Some(name) => session.adapter(name).map_err(|_| AdapterError::NotFound {
                        name: name.clone(),
                    })?,
                    None => session
                        .default_adapter()
                        .await
                        .map_err(|e| AdapterError::Session {
                            message: e.to_string(),
                        })?,
                };

                // `Session::adapter` does not check existence; the first
                // property read does.
                let powered = adapter
                    .is_powered()
                    .await
                    .map_err(|_| AdapterError::NotFound {
                        name: adapter.name().to_owned(),
                    })?;

                info!(adapter = adapter.name(), powered, "BlueZ adapter opened");
                self.spawn_power_watch(adapter.clone());
                let _ = self
                    .events_tx
                    .send(AdapterEvent::StateChange(AdapterState::from_powered(powered)));

                Ok(Connected {
                    _session: session,
                    adapter,
                })
            })
            .await
    }

    fn spawn_power_watch(&self, adapter: bluer::Adapter) {
        let events_tx = self.events_tx.clone();
        let diagnostics = Arc::clone(&self.diagnostics);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let events = match adapter.events().await {
                Ok(events) => events,
                Err(err) => {
                    diagnostics.warn(&[
                        "bluez: adapter event stream unavailable:".into(),
                        anyhow::Error::new(err).into(),
                    ]);
                    return;
                }
            };
            futures::pin_mut!(events);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.next() => match event {
                        Some(bluer::AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered))) => {
                            let state = AdapterState::from_powered(powered);
                            if events_tx.send(AdapterEvent::StateChange(state)).is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => {
                            diagnostics.warn_text("bluez: adapter event stream ended");
                            break;
                        }
                    },
                }
            }
        });
    }
}

impl Drop for BluezAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Adapter for BluezAdapter {
    fn take_events(&self) -> Option<AdapterEvents> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn state(&self) -> AdapterResult<AdapterState> {
        let connected = self.connect().await?;
        let powered = connected
            .adapter
            .is_powered()
            .await
            .map_err(|e| AdapterError::Session {
                message: e.to_string(),
            })?;
        Ok(AdapterState::from_powered(powered))
    }

    async fn start_scanning(
        &self,
        service_filters: &[Uuid],
        allow_duplicates: bool,
    ) -> AdapterResult<()> {
        let connected = self.connect().await?;
        let mut discovery = self.discovery.lock().await;
        if discovery.as_ref().is_some_and(|d| !d.task.is_finished()) {
            debug!("discovery already running");
            return Ok(());
        }

        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: allow_duplicates,
            uuids: service_filters.iter().copied().collect(),
            ..DiscoveryFilter::default()
        };

        let cancel = self.cancel.child_token();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_discovery(
            connected.adapter.clone(),
            filter,
            allow_duplicates,
            DiscoveryLink {
                cancel: cancel.clone(),
                events_tx: self.events_tx.clone(),
                diagnostics: Arc::clone(&self.diagnostics),
                ready: ready_tx,
            },
        ));

        match ready_rx.await {
            Ok(Ok(())) => {
                *discovery = Some(Discovery { cancel, task });
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AdapterError::StartScan {
                message: "discovery task exited before starting".to_owned(),
            }),
        }
    }

    async fn stop_scanning(&self) -> AdapterResult<()> {
        let Some(discovery) = self.discovery.lock().await.take() else {
            debug!("stop requested with no discovery running");
            return Ok(());
        };
        discovery.cancel.cancel();
        discovery.task.await.map_err(|e| AdapterError::StopScan {
            message: e.to_string(),
        })
    }
}

/// Channels a discovery task reports through.
struct DiscoveryLink {
    cancel: CancellationToken,
    events_tx: mpsc::UnboundedSender<AdapterEvent>,
    diagnostics: Arc<DiagnosticHub>,
    ready: oneshot::Sender<AdapterResult<()>>,
}

fn start_error(err: &bluer::Error) -> AdapterError {
    AdapterError::StartScan {
        message: err.to_string(),
    }
}

async fn run_discovery(
    adapter: bluer::Adapter,
    filter: DiscoveryFilter,
    allow_duplicates: bool,
    link: DiscoveryLink,
) {
    let DiscoveryLink {
        cancel,
        events_tx,
        diagnostics,
        ready,
    } = link;

    if let Err(err) = adapter.set_discovery_filter(filter).await {
        let _ = ready.send(Err(start_error(&err)));
        return;
    }

    let stream: bluer::Result<BoxStream<'_, bluer::AdapterEvent>> = if allow_duplicates {
        adapter
            .discover_devices_with_changes()
            .await
            .map(StreamExt::boxed)
    } else {
        adapter.discover_devices().await.map(StreamExt::boxed)
    };
    let mut stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(start_error(&err)));
            return;
        }
    };

    let _ = ready.send(Ok(()));
    let _ = events_tx.send(AdapterEvent::ScanStart);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = stream.next() => match event {
                Some(bluer::AdapterEvent::DeviceAdded(address)) => {
                    match read_peripheral(&adapter, address).await {
                        Ok(peripheral) => {
                            if events_tx.send(AdapterEvent::Discover(peripheral)).is_err() {
                                break;
                            }
                        }
                        Err(err) => diagnostics.warn(&[
                            DiagnosticArg::Text(format!("bluez: cannot read device {address}:")),
                            anyhow::Error::new(err).into(),
                        ]),
                    }
                }
                Some(_) => {}
                None => {
                    warn!("BlueZ discovery stream ended");
                    diagnostics.warn_text("bluez: discovery session ended unexpectedly");
                    break;
                }
            },
        }
    }

    // Dropping the stream ends the BlueZ discovery session.
    drop(stream);
    let _ = events_tx.send(AdapterEvent::ScanStop);
}

async fn read_peripheral(
    adapter: &bluer::Adapter,
    address: bluer::Address,
) -> bluer::Result<Peripheral> {
    let device = adapter.device(address)?;
    let rssi = device.rssi().await?;
    let local_name = device.name().await?;

    Ok(Peripheral {
        address: address.to_string(),
        rssi,
        // BlueZ does not expose the advertising PDU type.
        connectable: None,
        advertisement: Advertisement { local_name },
    })
}
