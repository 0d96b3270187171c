//! Process-wide runtime limits, applied by a pre-start hook.
//!
//! The limits hook must run before any hook that can trigger
//! allocation-sensitive work (plugin discovery, worker attachment), so the
//! ceiling and request-size bounds are in place first. Applied once;
//! immutable afterwards.

use std::sync::OnceLock;

use tracing::{info, warn};

/// Limits every allocation-sensitive component consults.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeLimits {
    /// Soft memory ceiling; the memory-usage ticker warns when resident
    /// memory crosses it.
    pub memory_ceiling_bytes: u64,
    /// Maximum request body size, mirrored from the service configuration.
    pub max_request_size: usize,
    /// Compiled fast path for the comment-stripping routine. Stays off: it
    /// showed no measurable win across repeated runs and occasionally
    /// mis-handles nested comment input, so correctness wins over the
    /// theoretical speedup.
    pub comment_fast_path: bool,
}

impl RuntimeLimits {
    /// Limits derived from the resolved settings, with the comment-stripping
    /// fast path disabled.
    #[must_use]
    pub fn new(memory_ceiling_bytes: u64, max_request_size: usize) -> Self {
        Self {
            memory_ceiling_bytes,
            max_request_size,
            comment_fast_path: false,
        }
    }
}

static LIMITS: OnceLock<RuntimeLimits> = OnceLock::new();

/// Installs the process-wide limits. A second apply is ignored with a
/// warning; the first installation stays authoritative.
pub fn apply(limits: RuntimeLimits) {
    if LIMITS.set(limits).is_err() {
        warn!("runtime limits already applied, keeping the original values");
        return;
    }
    info!(
        memory_ceiling_bytes = limits.memory_ceiling_bytes,
        max_request_size = limits.max_request_size,
        comment_fast_path = limits.comment_fast_path,
        "runtime limits applied",
    );
}

/// Currently installed limits, if the limits hook has run.
pub fn get() -> Option<&'static RuntimeLimits> {
    LIMITS.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    // OnceLock is process-global, so a single test exercises the full
    // apply/reapply behavior.
    #[test]
    fn apply_installs_once_and_keeps_first_values() {
        apply(RuntimeLimits::new(1024, 256));
        let installed = get().unwrap();
        assert_eq!(installed.memory_ceiling_bytes, 1024);
        assert!(!installed.comment_fast_path);

        apply(RuntimeLimits::new(2048, 512));
        assert_eq!(get().unwrap().memory_ceiling_bytes, 1024);
    }
}
