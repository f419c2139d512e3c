//! Human-readable run summaries.
//!
//! [`report`] turns a [`MetricsSnapshot`] into the fixed set of summary lines
//! printed on every tick and once more at shutdown.

use chrono::{DateTime, Utc};

use crate::metrics::MetricsSnapshot;

/// Maximum illegal-packet categories listed per summary.
pub const MAX_KINDS: usize = 10;

/// Maximum devices listed per summary.
pub const MAX_DEVICES: usize = 5;

/// Whole seconds since `started_at`, never less than one.
#[must_use]
pub fn elapsed_secs(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (now - started_at).num_milliseconds().max(0);
    u64::try_from(millis / 1000).unwrap_or(0).max(1)
}

/// Format a snapshot as summary lines.
#[must_use]
pub fn report(snapshot: &MetricsSnapshot, now: DateTime<Utc>, is_final: bool) -> Vec<String> {
    let prefix = if is_final { "[summary:final]" } else { "[summary]" };
    let mut lines = Vec::with_capacity(4);

    lines.push(format!(
        "{prefix} elapsed={}s warnings={} hciIllegal={} discoveries={} uniqueDevices={} \
         stateChanges={} scanStarts={} scanStops={}",
        elapsed_secs(snapshot.started_at, now),
        snapshot.warnings_total,
        snapshot.hci_illegal_total,
        snapshot.discoveries,
        snapshot.unique_devices(),
        snapshot.state_changes,
        snapshot.scan_starts,
        snapshot.scan_stops,
    ));

    if snapshot.simulate_cycles > 0
        || snapshot.simulate_pause_count > 0
        || snapshot.simulate_resume_count > 0
    {
        lines.push(format!(
            "{prefix} simulate cycles={} pauses={} resumes={}",
            snapshot.simulate_cycles,
            snapshot.simulate_pause_count,
            snapshot.simulate_resume_count,
        ));
    }

    let kinds = top_entries(
        snapshot
            .hci_illegal_by_kind
            .iter()
            .map(|entry| (entry.kind.as_str(), entry.count)),
        MAX_KINDS,
    );
    if !kinds.is_empty() {
        lines.push(format!("{prefix} hci-illegal kinds: {kinds}"));
    }

    let devices = top_entries(
        snapshot
            .discoveries_by_address
            .iter()
            .map(|entry| (entry.address.as_str(), entry.count)),
        MAX_DEVICES,
    );
    if !devices.is_empty() {
        lines.push(format!("{prefix} top devices: {devices}"));
    }

    lines
}

/// `name=count` pairs by descending count; the stable sort keeps first-seen
/// order for ties.
fn top_entries<'a>(entries: impl Iterator<Item = (&'a str, u64)>, limit: usize) -> String {
    let mut entries: Vec<_> = entries.collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries
        .iter()
        .take(limit)
        .map(|(name, count)| format!("{name}={count}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::metrics::MetricsAggregator;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-15T03:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_elapsed_is_at_least_one_second() {
        assert_eq!(elapsed_secs(start(), start()), 1);
        assert_eq!(elapsed_secs(start(), start() + Duration::milliseconds(999)), 1);
        assert_eq!(elapsed_secs(start(), start() + Duration::milliseconds(2999)), 2);
        assert_eq!(elapsed_secs(start(), start() - Duration::seconds(5)), 1);
        assert_eq!(elapsed_secs(start(), start() + Duration::seconds(90)), 90);
    }

    #[test]
    fn test_empty_run_prints_only_primary_line() {
        let metrics = MetricsAggregator::started_at(start());
        let lines = report(&metrics.snapshot(), start() + Duration::seconds(30), false);

        assert_eq!(
            lines,
            vec![
                "[summary] elapsed=30s warnings=0 hciIllegal=0 discoveries=0 uniqueDevices=0 \
                 stateChanges=0 scanStarts=0 scanStops=0"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_top_devices_sorted_by_count() {
        let metrics = MetricsAggregator::started_at(start());
        for _ in 0..3 {
            metrics.record_discovery("AA:BB:CC:DD:EE:02");
        }
        for _ in 0..12 {
            metrics.record_discovery("AA:BB:CC:DD:EE:01");
        }

        let lines = report(&metrics.snapshot(), start() + Duration::seconds(5), false);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "[summary] top devices: AA:BB:CC:DD:EE:01=12, AA:BB:CC:DD:EE:02=3"
        );
    }

    #[test]
    fn test_device_list_is_capped_and_ties_keep_first_seen() {
        let metrics = MetricsAggregator::started_at(start());
        for i in 1..=7 {
            metrics.record_discovery(&format!("AA:BB:CC:DD:EE:0{i}"));
        }

        let lines = report(&metrics.snapshot(), start(), false);
        assert_eq!(
            lines[1],
            "[summary] top devices: AA:BB:CC:DD:EE:01=1, AA:BB:CC:DD:EE:02=1, \
             AA:BB:CC:DD:EE:03=1, AA:BB:CC:DD:EE:04=1, AA:BB:CC:DD:EE:05=1"
        );
    }

    #[test]
    fn test_final_summary_with_all_sections() {
        let metrics = MetricsAggregator::started_at(start());
        metrics.record_warning("onSocketData: illegal packet");
        metrics.record_warning("processLeExtendedAdvertisingReport: illegal packet (too short)");
        metrics.record_warning("processLeExtendedAdvertisingReport: illegal packet (too short)");
        metrics.record_warning("adapter busy");
        metrics.record_discovery("AA:BB:CC:DD:EE:01");
        metrics.record_simulate_resume();

        let lines = report(&metrics.snapshot(), start() + Duration::seconds(61), true);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("[summary:final] elapsed=61s warnings=4 hciIllegal=3"));
        assert_eq!(
            lines[1],
            "[summary:final] simulate cycles=0 pauses=0 resumes=1"
        );
        assert_eq!(
            lines[2],
            "[summary:final] hci-illegal kinds: ext_adv_too_short=2, socket_other=1"
        );
        assert_eq!(lines[3], "[summary:final] top devices: AA:BB:CC:DD:EE:01=1");
    }
}
