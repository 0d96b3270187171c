//! Reactor/worker topology sizing.
//!
//! Computed once at boot, before the async runtime exists, and baked into the
//! immutable service configuration.

/// Thread/process topology the service runs with.
///
/// Reactors multiplex I/O-bound request handling and scale with hardware
/// parallelism (or an explicit override). Workers absorb blocking and
/// CPU-bound work and are throttled to a quarter of the reactor count so
/// they cannot oversubscribe the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    /// Number of reactor threads handling I/O multiplexing.
    pub reactor_threads: usize,
    /// Number of heavier worker slots for blocking work.
    pub worker_processes: usize,
}

impl Topology {
    /// Sizes the topology from an optional configured override and the number
    /// of available hardware execution units.
    ///
    /// `reactor_threads = override.unwrap_or(available)`, clamped to at least
    /// one; `worker_processes = max(1, reactor_threads / 4)`. Infallible:
    /// the result is always a valid positive pair.
    #[must_use]
    pub fn size(override_threads: Option<usize>, available_units: usize) -> Self {
        let reactor_threads = override_threads.unwrap_or(available_units).max(1);
        Self {
            reactor_threads,
            worker_processes: (reactor_threads / 4).max(1),
        }
    }

    /// Sizes the topology from the host's detected parallelism.
    #[must_use]
    pub fn detect(override_threads: Option<usize>) -> Self {
        let available =
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self::size(override_threads, available)
    }
}
