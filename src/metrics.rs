//! Historical Sync Metrics
//!
//! Thin helpers over the `metrics` facade. The consuming application decides
//! where the numbers go by installing a recorder; without one these are
//! no-ops.

use std::time::{SystemTime, UNIX_EPOCH};

/// Gauge: total blocks in a source's sync range.
pub(crate) fn record_total_blocks(network: &str, source: &str, blocks: u64) {
    metrics::gauge!(
        "historical_total_blocks",
        blocks as f64,
        "network" => network.to_owned(),
        "source" => source.to_owned()
    );
}

/// Gauge: blocks already present in the sync store at startup.
pub(crate) fn record_cached_blocks(network: &str, source: &str, blocks: u64) {
    metrics::gauge!(
        "historical_cached_blocks",
        blocks as f64,
        "network" => network.to_owned(),
        "source" => source.to_owned()
    );
}

/// Counter: blocks completed by finished sync tasks.
pub(crate) fn increment_completed_blocks(network: &str, source: &str, blocks: u64) {
    metrics::counter!(
        "historical_completed_blocks",
        blocks,
        "network" => network.to_owned(),
        "source" => source.to_owned()
    );
}

/// Gauge: wall-clock start of the historical sync run, epoch milliseconds.
pub(crate) fn record_start_timestamp() {
    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0);
    metrics::gauge!("historical_start_timestamp", epoch_ms);
}
