//! Abnormal-termination detection at start.
//!
//! Runs exactly once per process lifetime, from the first pre-start hook:
//! reads the crash marker left by the previous run, pushes the start
//! counters, and re-arms the marker so the next run can judge this one.
//! Fail-open throughout — crash detection is observability and must never
//! abort startup.

use sidekick_core::CrashMarker;
use tracing::{info, warn};

use crate::telemetry::MetricHandle;

/// Outcome of the start check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartKind {
    /// Previous run ended cleanly (or no marker could be read).
    ClearStart,
    /// Previous run terminated abnormally.
    RecoveredFromCrash,
}

/// One-shot guard consumed by the crash-check hook.
#[derive(Debug)]
pub struct CrashGuard {
    marker: CrashMarker,
    metrics: MetricHandle,
}

impl CrashGuard {
    #[must_use]
    pub fn new(marker: CrashMarker, metrics: MetricHandle) -> Self {
        Self { marker, metrics }
    }

    /// Performs the start check and re-arms the marker.
    ///
    /// Always emits one "invocation" increment; adds one "crash" increment
    /// when the previous run left the marker armed. Consumes the guard, so
    /// the check cannot run twice.
    pub fn check_and_arm(self) -> StartKind {
        let had_crash = self.marker.read_or_clear();
        self.metrics.increment("invocation", 1);

        let kind = if had_crash {
            self.metrics.increment("crash", 1);
            warn!("previous run terminated abnormally");
            StartKind::RecoveredFromCrash
        } else {
            info!("clean start, no prior crash detected");
            StartKind::ClearStart
        };

        if let Err(err) = self.marker.arm() {
            warn!(error = %err, "failed to arm crash marker");
        }
        kind
    }
}
