//! Graceful-shutdown coordination.
//!
//! One controller is shared by the supervisor, the network module, tickers,
//! and process monitors. It tracks the service phase, counts in-flight
//! requests through RAII guards, and broadcasts the stop signal every
//! background loop selects on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Lifecycle phase of the service.
///
/// Booting -> Accepting -> Draining -> Stopped, in that order only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePhase {
    /// Pre-start: hooks are running, no connection has been accepted.
    Booting,
    /// The service is accepting and handling requests.
    Accepting,
    /// Shutdown requested; in-flight requests are finishing, new ones are
    /// rejected.
    Draining,
    /// All done (or the drain wait expired and we gave up).
    Stopped,
}

/// Shared shutdown state.
#[derive(Debug)]
pub struct ShutdownController {
    phase: ArcSwap<ServicePhase>,
    in_flight: Arc<AtomicU64>,
    stop_signal: watch::Sender<bool>,
}

impl ShutdownController {
    /// New controller in the `Booting` phase.
    #[must_use]
    pub fn new() -> Self {
        let (stop_signal, _) = watch::channel(false);
        Self {
            phase: ArcSwap::from_pointee(ServicePhase::Booting),
            in_flight: Arc::new(AtomicU64::new(0)),
            stop_signal,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ServicePhase {
        **self.phase.load()
    }

    /// Marks the service as accepting requests.
    pub fn set_accepting(&self) {
        self.phase.store(Arc::new(ServicePhase::Accepting));
    }

    /// Moves to `Draining` and flips the stop signal for every subscriber
    /// (tickers, process monitors, request rejection).
    pub fn begin_drain(&self) {
        self.phase.store(Arc::new(ServicePhase::Draining));
        // send_replace stores the value even when no receiver exists yet, so
        // a subscriber created after this point still observes the signal.
        self.stop_signal.send_replace(true);
    }

    /// Subscribes to the stop signal. Loops select on
    /// `receiver.wait_for(|stop| *stop)` so slow subscribers still observe a
    /// signal that fired before they subscribed.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_signal.subscribe()
    }

    /// RAII guard counting one in-flight request; drops decrement even when
    /// the handler panics.
    #[must_use]
    pub fn track_request(&self) -> InFlightRequest {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightRequest {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for in-flight requests to finish, bounded by `max_wait`.
    ///
    /// Returns `true` and moves to `Stopped` when the drain completed;
    /// returns `false` (phase stays `Draining`) when the bound expired.
    pub async fn wait_for_drain(&self, max_wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.phase.store(Arc::new(ServicePhase::Stopped));
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for one in-flight request.
#[derive(Debug)]
pub struct InFlightRequest {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
