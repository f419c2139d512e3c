//! Run-lifetime counters.
//!
//! [`MetricsAggregator`] owns every counter of a monitoring run. All mutation
//! goes through its `record_*` methods and all reads through [`snapshot`],
//! which copies the whole aggregate under one lock so the sum invariants
//! (`hci_illegal_total` vs. per-kind counts, `discoveries` vs. per-address
//! counts) hold in every snapshot.
//!
//! [`snapshot`]: MetricsAggregator::snapshot

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::classifier::{self, WarningCategory};

/// Counter map that remembers first-seen order of its keys.
#[derive(Debug, Clone)]
struct OrderedCounts<K> {
    index: HashMap<K, usize>,
    entries: Vec<(K, u64)>,
}

impl<K: Clone + Eq + Hash> OrderedCounts<K> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn increment(&mut self, key: &K) {
        if let Some(&slot) = self.index.get(key) {
            self.entries[slot].1 += 1;
        } else {
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push((key.clone(), 1));
        }
    }
}

#[derive(Debug)]
struct Counters {
    warnings_total: u64,
    hci_illegal_total: u64,
    discoveries: u64,
    state_changes: u64,
    scan_starts: u64,
    scan_stops: u64,
    hci_illegal_by_kind: OrderedCounts<WarningCategory>,
    discoveries_by_address: OrderedCounts<String>,
    simulate_cycles: u64,
    simulate_pause_count: u64,
    simulate_resume_count: u64,
}

/// Thread-safe owner of all run counters.
#[derive(Debug)]
pub struct MetricsAggregator {
    started_at: DateTime<Utc>,
    counters: Mutex<Counters>,
}

impl MetricsAggregator {
    /// Create an aggregator stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::started_at(Utc::now())
    }

    /// Create an aggregator with an explicit start time.
    #[must_use]
    pub fn started_at(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            counters: Mutex::new(Counters {
                warnings_total: 0,
                hci_illegal_total: 0,
                discoveries: 0,
                state_changes: 0,
                scan_starts: 0,
                scan_stops: 0,
                hci_illegal_by_kind: OrderedCounts::new(),
                discoveries_by_address: OrderedCounts::new(),
                simulate_cycles: 0,
                simulate_pause_count: 0,
                simulate_resume_count: 0,
            }),
        }
    }

    // A panic while holding the lock cannot leave a counter half-written,
    // so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a diagnostic warning, classifying it on the way.
    ///
    /// Every warning bumps `warnings_total`. Illegal-packet warnings also bump
    /// `hci_illegal_total` and their per-kind entry, and their category is
    /// returned so the caller can annotate the message.
    pub fn record_warning(&self, raw: &str) -> Option<WarningCategory> {
        let category = classifier::classify(raw);
        let mut counters = self.lock();
        counters.warnings_total += 1;
        if let Some(category) = category {
            counters.hci_illegal_total += 1;
            counters.hci_illegal_by_kind.increment(&category);
        }
        category
    }

    /// Count one discovery event for `address`.
    pub fn record_discovery(&self, address: &str) {
        let mut counters = self.lock();
        counters.discoveries += 1;
        counters.discoveries_by_address.increment(&address.to_owned());
    }

    /// Count an adapter state change.
    pub fn record_state_change(&self) {
        self.lock().state_changes += 1;
    }

    /// Count a scan-start event reported by the adapter.
    pub fn record_scan_start(&self) {
        self.lock().scan_starts += 1;
    }

    /// Count a scan-stop event reported by the adapter.
    pub fn record_scan_stop(&self) {
        self.lock().scan_stops += 1;
    }

    /// Count a simulate pause.
    pub fn record_simulate_pause(&self) {
        self.lock().simulate_pause_count += 1;
    }

    /// Count a simulate resume.
    pub fn record_simulate_resume(&self) {
        self.lock().simulate_resume_count += 1;
    }

    /// Count a completed simulate cycle.
    pub fn record_simulate_cycle_complete(&self) {
        self.lock().simulate_cycles += 1;
    }

    /// Copy every counter as of a single instant.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.lock();
        MetricsSnapshot {
            started_at: self.started_at,
            warnings_total: counters.warnings_total,
            hci_illegal_total: counters.hci_illegal_total,
            discoveries: counters.discoveries,
            state_changes: counters.state_changes,
            scan_starts: counters.scan_starts,
            scan_stops: counters.scan_stops,
            hci_illegal_by_kind: counters
                .hci_illegal_by_kind
                .entries
                .iter()
                .map(|(kind, count)| KindCount {
                    kind: *kind,
                    count: *count,
                })
                .collect(),
            discoveries_by_address: counters
                .discoveries_by_address
                .entries
                .iter()
                .map(|(address, count)| DeviceCount {
                    address: address.clone(),
                    count: *count,
                })
                .collect(),
            simulate_cycles: counters.simulate_cycles,
            simulate_pause_count: counters.simulate_pause_count,
            simulate_resume_count: counters.simulate_resume_count,
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Count of one illegal-packet category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct KindCount {
    /// Warning category.
    pub kind: WarningCategory,
    /// Occurrences so far.
    pub count: u64,
}

/// Discovery count for one device address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceCount {
    /// Device address as reported by the adapter.
    #[schema(example = "AA:BB:CC:DD:EE:01")]
    pub address: String,
    /// Discovery events so far.
    pub count: u64,
}

/// Immutable point-in-time copy of the run counters.
///
/// Per-kind and per-address lists are in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MetricsSnapshot {
    /// When the run started (UTC).
    pub started_at: DateTime<Utc>,
    /// All diagnostic warnings seen.
    pub warnings_total: u64,
    /// Warnings classified as illegal packets.
    pub hci_illegal_total: u64,
    /// Discovery events.
    pub discoveries: u64,
    /// Adapter state changes.
    pub state_changes: u64,
    /// Scan-start events from the adapter.
    pub scan_starts: u64,
    /// Scan-stop events from the adapter.
    pub scan_stops: u64,
    /// Illegal-packet counts by category.
    pub hci_illegal_by_kind: Vec<KindCount>,
    /// Discovery counts by device address.
    pub discoveries_by_address: Vec<DeviceCount>,
    /// Completed simulate cycles.
    pub simulate_cycles: u64,
    /// Simulate pauses.
    pub simulate_pause_count: u64,
    /// Simulate resumes.
    pub simulate_resume_count: u64,
}

impl MetricsSnapshot {
    /// Number of distinct device addresses discovered.
    #[must_use]
    pub fn unique_devices(&self) -> usize {
        self.discoveries_by_address.len()
    }

    /// Count recorded for one category, zero if never seen.
    #[must_use]
    pub fn illegal_count(&self, kind: WarningCategory) -> u64 {
        self.hci_illegal_by_kind
            .iter()
            .find(|entry| entry.kind == kind)
            .map_or(0, |entry| entry.count)
    }

    /// Count recorded for one address, zero if never seen.
    #[must_use]
    pub fn discovery_count(&self, address: &str) -> u64 {
        self.discoveries_by_address
            .iter()
            .find(|entry| entry.address == address)
            .map_or(0, |entry| entry.count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn assert_sums_hold(snapshot: &MetricsSnapshot) {
        let kinds: u64 = snapshot.hci_illegal_by_kind.iter().map(|e| e.count).sum();
        let devices: u64 = snapshot.discoveries_by_address.iter().map(|e| e.count).sum();
        assert_eq!(snapshot.hci_illegal_total, kinds);
        assert_eq!(snapshot.discoveries, devices);
    }

    #[test]
    fn test_unclassified_warning_only_counts_total() {
        let metrics = MetricsAggregator::new();
        assert_eq!(metrics.record_warning("adapter busy"), None);

        let snap = metrics.snapshot();
        assert_eq!(snap.warnings_total, 1);
        assert_eq!(snap.hci_illegal_total, 0);
        assert!(snap.hci_illegal_by_kind.is_empty());
    }

    #[test]
    fn test_classified_warning_counts_kind() {
        let metrics = MetricsAggregator::new();
        let category =
            metrics.record_warning("onSocketData: Caught illegal packet: ACL packet too long");
        assert_eq!(category, Some(WarningCategory::SocketAclMalformed));
        metrics.record_warning("onSocketData: Caught illegal packet: ACL packet too long");
        metrics.record_warning("processCmdCompleteEvent: illegal packet");

        let snap = metrics.snapshot();
        assert_eq!(snap.warnings_total, 3);
        assert_eq!(snap.hci_illegal_total, 3);
        assert_eq!(snap.illegal_count(WarningCategory::SocketAclMalformed), 2);
        assert_eq!(snap.illegal_count(WarningCategory::CmdCompleteMalformed), 1);
        assert_eq!(snap.illegal_count(WarningCategory::SocketOther), 0);
        assert_sums_hold(&snap);
    }

    #[test]
    fn test_discoveries_keep_first_seen_order() {
        let metrics = MetricsAggregator::new();
        metrics.record_discovery("AA:BB:CC:DD:EE:02");
        metrics.record_discovery("AA:BB:CC:DD:EE:01");
        metrics.record_discovery("AA:BB:CC:DD:EE:02");

        let snap = metrics.snapshot();
        assert_eq!(snap.discoveries, 3);
        assert_eq!(snap.unique_devices(), 2);
        assert_eq!(snap.discoveries_by_address[0].address, "AA:BB:CC:DD:EE:02");
        assert_eq!(snap.discovery_count("AA:BB:CC:DD:EE:02"), 2);
        assert_sums_hold(&snap);
    }

    #[test]
    fn test_lifecycle_counters() {
        let metrics = MetricsAggregator::new();
        metrics.record_state_change();
        metrics.record_scan_start();
        metrics.record_scan_stop();
        metrics.record_scan_start();
        metrics.record_simulate_resume();
        metrics.record_simulate_pause();
        metrics.record_simulate_cycle_complete();

        let snap = metrics.snapshot();
        assert_eq!(snap.state_changes, 1);
        assert_eq!(snap.scan_starts, 2);
        assert_eq!(snap.scan_stops, 1);
        assert_eq!(snap.simulate_resume_count, 1);
        assert_eq!(snap.simulate_pause_count, 1);
        assert_eq!(snap.simulate_cycles, 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let metrics = Arc::new(MetricsAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        metrics.record_discovery(&format!("AA:BB:CC:DD:EE:{:02X}", i % 4));
                        if worker % 2 == 0 {
                            metrics.record_warning(
                                "processLeExtendedAdvertisingReport: illegal packet (too short)",
                            );
                        }
                        let snap = metrics.snapshot();
                        let kinds: u64 = snap.hci_illegal_by_kind.iter().map(|e| e.count).sum();
                        assert_eq!(snap.hci_illegal_total, kinds);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.discoveries, 4000);
        assert_eq!(snap.unique_devices(), 4);
        assert_eq!(snap.hci_illegal_total, 2000);
        assert_eq!(snap.illegal_count(WarningCategory::ExtAdvTooShort), 2000);
        assert_sums_hold(&snap);
    }
}
