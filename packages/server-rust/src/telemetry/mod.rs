//! Metric aggregation worker.
//!
//! Counters live in a dedicated background worker, not in the
//! request-handling pool: components push increments through a cheap
//! fire-and-forget handle and the worker owns the registry. Snapshot export
//! only happens when a telemetry ticker is registered at boot; with
//! telemetry disabled the worker still accumulates counters, it just never
//! exports them.

use std::collections::BTreeMap;

use sidekick_core::MetricRegistry;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::supervisor::ProcessHandle;

/// Commands understood by the aggregation worker.
#[derive(Debug)]
enum MetricCommand {
    Increment { name: String, amount: u64 },
    Snapshot,
    Read { reply: oneshot::Sender<BTreeMap<String, u64>> },
}

/// Destination for exported snapshots. The wire format and transport are
/// out of scope for the supervision core; the default sink logs the payload.
pub trait TelemetrySink: Send + 'static {
    /// Called on every snapshot, including empty ones; an empty snapshot is
    /// a non-fatal no-op for the sink to absorb.
    fn export(&mut self, snapshot: &BTreeMap<String, u64>);
}

/// Default sink: structured log output.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn export(&mut self, snapshot: &BTreeMap<String, u64>) {
        if snapshot.is_empty() {
            debug!("telemetry snapshot empty, nothing to export");
        } else {
            info!(?snapshot, "telemetry snapshot");
        }
    }
}

/// Cheap cloneable handle for pushing counter increments from anywhere.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    tx: mpsc::Sender<MetricCommand>,
}

impl MetricHandle {
    /// Fire-and-forget increment; never blocks the caller. If the worker is
    /// gone or saturated the increment is dropped with a debug log — losing
    /// a counter tick is preferable to stalling a request.
    pub fn increment(&self, name: impl Into<String>, amount: u64) {
        let command = MetricCommand::Increment {
            name: name.into(),
            amount,
        };
        if let Err(err) = self.tx.try_send(command) {
            debug!(error = %err, "metric increment dropped");
        }
    }

    /// Asks the worker to drain the counters into the export sink.
    /// Fire-and-forget, same delivery policy as increments.
    pub fn request_snapshot(&self) {
        if let Err(err) = self.tx.try_send(MetricCommand::Snapshot) {
            debug!(error = %err, "snapshot request dropped");
        }
    }

    /// Reads the current counter values without resetting them. Returns an
    /// empty map when the worker is gone.
    pub async fn values(&self) -> BTreeMap<String, u64> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(MetricCommand::Read { reply }).await.is_err() {
            warn!("metric aggregator unavailable");
            return BTreeMap::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// The aggregation worker, spawned once per process.
pub struct MetricAggregator;

impl MetricAggregator {
    /// Spawns the worker and returns the increment handle plus the process
    /// handle the boot sequence attaches to the supervisor.
    #[must_use]
    pub fn spawn(sink: impl TelemetrySink) -> (MetricHandle, ProcessHandle) {
        let (tx, rx) = mpsc::channel(1024);
        let handle = tokio::spawn(run_worker(rx, sink));
        (
            MetricHandle { tx },
            ProcessHandle::Task {
                name: "metric-aggregator".to_owned(),
                handle,
            },
        )
    }
}

async fn run_worker(mut rx: mpsc::Receiver<MetricCommand>, mut sink: impl TelemetrySink) {
    let registry = MetricRegistry::new();
    while let Some(command) = rx.recv().await {
        match command {
            MetricCommand::Increment { name, amount } => registry.increment(&name, amount),
            MetricCommand::Snapshot => {
                let snapshot = registry.drain();
                sink.export(&snapshot);
            }
            MetricCommand::Read { reply } => {
                let _ = reply.send(registry.snapshot());
            }
        }
    }
    debug!("metric aggregator channel closed");
}

/// Resident memory of this process in KiB, when the platform exposes it.
#[must_use]
pub fn resident_memory_kib() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        parse_statm_resident_kib(&statm, 4096)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Logs current memory usage; warns when the configured ceiling is crossed.
pub fn log_memory_usage() {
    let Some(resident_kib) = resident_memory_kib() else {
        return;
    };
    match crate::limits::get() {
        Some(limits) if resident_kib * 1024 > limits.memory_ceiling_bytes => {
            warn!(
                resident_kib,
                ceiling_bytes = limits.memory_ceiling_bytes,
                "memory usage above the configured ceiling"
            );
        }
        _ => debug!(resident_kib, "memory usage"),
    }
}

/// Parses the resident-set field (second column) of `/proc/self/statm`.
#[cfg(target_os = "linux")]
fn parse_statm_resident_kib(statm: &str, page_bytes: u64) -> Option<u64> {
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * page_bytes / 1024)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub exports: Arc<AtomicU32>,
        pub payloads: Arc<Mutex<Vec<BTreeMap<String, u64>>>>,
    }

    impl TelemetrySink for RecordingSink {
        fn export(&mut self, snapshot: &BTreeMap<String, u64>) {
            self.exports.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().push(snapshot.clone());
        }
    }

    #[tokio::test]
    async fn increments_accumulate_in_the_worker() {
        let (handle, _process) = MetricAggregator::spawn(LogSink);
        handle.increment("invocation", 1);
        handle.increment("invocation", 1);
        handle.increment("crash", 1);

        let values = handle.values().await;
        assert_eq!(values.get("invocation"), Some(&2));
        assert_eq!(values.get("crash"), Some(&1));
    }

    #[tokio::test]
    async fn snapshot_drains_counters_into_the_sink() {
        let sink = RecordingSink::default();
        let (handle, _process) = MetricAggregator::spawn(sink.clone());
        handle.increment("invocation", 1);
        handle.request_snapshot();

        // Commands are ordered on the channel, so a read observes the drain.
        let values = handle.values().await;
        assert!(values.is_empty());

        assert_eq!(sink.exports.load(Ordering::SeqCst), 1);
        let payloads = sink.payloads.lock();
        assert_eq!(payloads[0].get("invocation"), Some(&1));
    }

    #[tokio::test]
    async fn empty_snapshot_is_a_tolerated_no_op() {
        let sink = RecordingSink::default();
        let (handle, _process) = MetricAggregator::spawn(sink.clone());
        handle.request_snapshot();
        handle.request_snapshot();

        let _ = handle.values().await;
        assert_eq!(sink.exports.load(Ordering::SeqCst), 2);
        assert!(sink.payloads.lock().iter().all(BTreeMap::is_empty));
    }

    #[tokio::test]
    async fn values_after_worker_gone_is_empty() {
        let (handle, process) = MetricAggregator::spawn(LogSink);
        if let ProcessHandle::Task { handle: task, .. } = process {
            task.abort();
            let _ = task.await;
        }
        assert!(handle.values().await.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn statm_resident_field_parses() {
        assert_eq!(parse_statm_resident_kib("12345 678 90 1 0 2 0\n", 4096), Some(678 * 4));
        assert_eq!(parse_statm_resident_kib("bogus", 4096), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn resident_memory_reads_on_linux() {
        assert!(resident_memory_kib().unwrap() > 0);
    }
}
