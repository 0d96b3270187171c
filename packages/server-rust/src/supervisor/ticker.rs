//! Periodic tickers.
//!
//! Every ticker runs on its own task with its own interval, so firings are
//! isolated: a slow ticker delays only its own next firing, never another
//! ticker and never request handling.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Boxed future produced by one ticker firing.
pub type TickerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked on each firing.
pub type TickerFn = Box<dyn FnMut() -> TickerFuture + Send>;

/// A periodic callback paired with its firing interval.
///
/// Registered before start, effective for the service lifetime afterwards.
pub struct TickerEntry {
    pub(crate) name: String,
    pub(crate) period: Duration,
    pub(crate) callback: TickerFn,
}

impl TickerEntry {
    /// Ticker with an async callback.
    ///
    /// # Panics
    ///
    /// Panics when `period` is zero; a zero-period ticker cannot be
    /// scheduled, and catching it at registration beats a panic inside the
    /// detached ticker task later.
    pub fn new(
        name: impl Into<String>,
        period: Duration,
        callback: impl FnMut() -> TickerFuture + Send + 'static,
    ) -> Self {
        assert!(!period.is_zero(), "ticker period must be non-zero");
        Self {
            name: name.into(),
            period,
            callback: Box::new(callback),
        }
    }

    /// Ticker with a synchronous callback; most maintenance tasks are.
    ///
    /// # Panics
    ///
    /// Panics when `period` is zero, like [`TickerEntry::new`].
    pub fn from_sync(
        name: impl Into<String>,
        period: Duration,
        mut callback: impl FnMut() + Send + 'static,
    ) -> Self {
        Self::new(name, period, move || {
            callback();
            Box::pin(std::future::ready(()))
        })
    }

    /// Ticker name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Firing interval.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl std::fmt::Debug for TickerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerEntry")
            .field("name", &self.name)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

/// Spawns the ticker loop. The first firing happens one full period after
/// start; the loop ends when the shutdown signal flips.
pub(crate) fn spawn_ticker(
    mut entry: TickerEntry,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // Created before the spawn so the period is anchored at registration
    // time, not at the task's first poll.
    let mut interval = tokio::time::interval(entry.period);
    tokio::spawn(async move {
        // interval's first tick completes immediately; skip it so the ticker
        // fires at t+period, not at start.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    trace!(ticker = %entry.name, "tick");
                    (entry.callback)().await;
                }
                // The guard returned by `wait_for` is dropped inside the
                // block so the spawned future stays `Send`.
                () = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    debug!(ticker = %entry.name, "ticker stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counting_ticker(period_secs: u64) -> (TickerEntry, Arc<AtomicU32>) {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let entry = TickerEntry::from_sync("count", Duration::from_secs(period_secs), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (entry, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_floor_elapsed_over_period_times() {
        let (entry, fired) = counting_ticker(30);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_ticker(entry, stop_rx);

        tokio::time::advance(Duration::from_secs(65)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_fire_before_first_period() {
        let (entry, fired) = counting_ticker(30);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_ticker(entry, stop_rx);

        tokio::time::advance(Duration::from_secs(29)).await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let (entry, fired) = counting_ticker(10);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_ticker(entry, stop_rx);

        tokio::time::advance(Duration::from_secs(25)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tickers_fire_independently() {
        let (fast, fast_fired) = counting_ticker(10);
        let slow_fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&slow_fired);
        // A ticker whose firing takes longer than the fast ticker's period.
        let slow = TickerEntry::new("slow", Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
        });

        let (_stop_tx, stop_rx) = watch::channel(false);
        let fast_handle = spawn_ticker(fast, stop_rx.clone());
        let slow_handle = spawn_ticker(slow, stop_rx);

        tokio::time::advance(Duration::from_secs(45)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        // The stalled slow ticker fired once and is stuck; the fast one is
        // unaffected by it.
        assert_eq!(slow_fired.load(Ordering::SeqCst), 1);
        assert!(fast_fired.load(Ordering::SeqCst) >= 4);

        fast_handle.abort();
        slow_handle.abort();
    }

    #[test]
    #[should_panic(expected = "ticker period must be non-zero")]
    fn zero_period_is_rejected_at_construction() {
        let _ = TickerEntry::from_sync("bad", Duration::ZERO, || {});
    }

    // Real clock: the spawned loop must be schedulable across threads.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ticker_loop_runs_on_a_multi_thread_runtime() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let entry = TickerEntry::from_sync("mt", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_ticker(entry, stop_rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }
}
