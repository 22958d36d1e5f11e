//! Periodic driver shared by every gas-price estimator: ticks on a fixed
//! interval, never lets two ticks run concurrently, and treats the first
//! tick error as fatal.

use std::{error::Error as StdError, path::Path, time::Duration};

use tokio::time::{interval, Instant, MissedTickBehavior};

/// Fixed tick period for every estimator driven by this module.
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// A boxed tick error. Each estimator's own `thiserror` enum already
/// implements `std::error::Error`, so boxing it here keeps the driver
/// generic without forcing one shared error type on every estimator.
pub type TickError = Box<dyn StdError + Send + Sync + 'static>;

/// Something that can be driven by [`run`]: one unit of estimator work per
/// tick, writing its output under `output_dir`.
#[async_trait::async_trait]
pub trait Tick {
    async fn tick(&mut self, output_dir: &Path) -> Result<(), TickError>;
}

/// Runs `estimator.tick()` once immediately, then once per [`TICK_INTERVAL`],
/// until it returns an error. A single sequential loop is inherently
/// single-flight: the next tick cannot start before the previous call's
/// future resolves. `MissedTickBehavior::Delay` means a tick that overruns
/// the interval does not queue up a burst of catch-up calls; the following
/// tick is simply rescheduled from whenever the slow one finished.
pub async fn run(name: &str, estimator: &mut dyn Tick, output_dir: &Path) -> Result<(), TickError> {
    run_with_interval(name, TICK_INTERVAL, estimator, output_dir).await
}

/// As [`run`], but with a caller-supplied interval. Used by tests to avoid
/// waiting on the real 10 second period.
pub async fn run_with_interval(
    name: &str,
    period: Duration,
    estimator: &mut dyn Tick,
    output_dir: &Path,
) -> Result<(), TickError> {
    if let Err(error) = estimator.tick(output_dir).await {
        log::error!("{name}: fatal error on first tick: {error}");
        return Err(error);
    }

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick `interval` schedules.

    loop {
        ticker.tick().await;
        let started = Instant::now();
        if let Err(error) = estimator.tick(output_dir).await {
            log::error!("{name}: fatal error after {:?}: {error}", started.elapsed());
            return Err(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        calls: Arc<AtomicUsize>,
        fail_on_call: Option<usize>,
    }

    #[async_trait::async_trait]
    impl Tick for Counter {
        async fn tick(&mut self, _output_dir: &Path) -> Result<(), TickError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_call == Some(n) {
                return Err("boom".into());
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_on_every_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut counter = Counter { calls: calls.clone(), fail_on_call: None };

        let driver = tokio::spawn(async move {
            run_with_interval("test", Duration::from_millis(10), &mut counter, Path::new(".")).await
        });

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(35)).await;
        assert!(calls.load(Ordering::SeqCst) >= 3);

        driver.abort();
    }

    #[tokio::test]
    async fn first_tick_error_is_fatal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut counter = Counter { calls, fail_on_call: Some(0) };
        let result = run_with_interval("test", Duration::from_millis(10), &mut counter, Path::new(".")).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn later_tick_error_stops_the_driver() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut counter = Counter { calls: calls.clone(), fail_on_call: Some(2) };

        let handle = tokio::spawn(async move {
            run_with_interval("test", Duration::from_millis(10), &mut counter, Path::new(".")).await
        });

        tokio::time::advance(Duration::from_millis(100)).await;
        let result = handle.await.unwrap();
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
