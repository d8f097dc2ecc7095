//! Watchdog / Timeout Manager: races a runner invocation against a
//! wall-clock deadline and a no-output interval check tracked as two
//! independent conditions.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::contracts::RunContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome<T> {
    Finished(T),
    TimedOut,
    NoOutput,
}

/// Shared between the runner invocation (which calls [`Tracker::touch`] on
/// meaningful output) and the watchdog loop (which polls it).
#[derive(Clone)]
pub struct Tracker {
    last_output_at_millis: Arc<AtomicI64>,
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            last_output_at_millis: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
        }
    }

    pub fn touch(&self) {
        self.last_output_at_millis
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_output_at_millis.load(Ordering::SeqCst);
        let now = Utc::now().timestamp_millis();
        Duration::from_millis((now - last).max(0) as u64)
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// 0 disables the wall-clock deadline.
    pub runner_timeout: Duration,
    pub watchdog_interval: Duration,
    pub watchdog_timeout: Duration,
}

/// Runs `fut` to completion unless the wall-clock deadline elapses or
/// `tracker` goes stale for longer than `watchdog_timeout`. `ctx` must be a
/// context the runner invocation itself observes via `ctx.cancelled()`: on
/// either expiry this cancels `ctx` and awaits `fut` so the runner's own
/// cancellation teardown (killing its child process) actually runs, instead
/// of dropping `fut` mid-flight and leaking the process. Either expiry path
/// maps the runner's eventual return value to
/// `WatchdogOutcome::TimedOut`/`NoOutput` regardless of what it produced.
pub async fn run_with_watchdog<F, T>(config: WatchdogConfig, tracker: Tracker, ctx: &RunContext, fut: F) -> WatchdogOutcome<T>
where
    F: Future<Output = T>,
{
    tokio::pin!(fut);

    let deadline_fut = async {
        if config.runner_timeout.is_zero() {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(config.runner_timeout).await;
        }
    };
    tokio::pin!(deadline_fut);

    let mut ticker = tokio::time::interval(config.watchdog_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            result = &mut fut => {
                return WatchdogOutcome::Finished(result);
            }
            _ = &mut deadline_fut => {
                ctx.cancel();
                fut.await;
                return WatchdogOutcome::TimedOut;
            }
            _ = ticker.tick() => {
                if tracker.idle_for() > config.watchdog_timeout {
                    ctx.cancel();
                    fut.await;
                    return WatchdogOutcome::NoOutput;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finishes_normally_when_fast() {
        let tracker = Tracker::new();
        let ctx = RunContext::new();
        let config = WatchdogConfig {
            runner_timeout: Duration::from_secs(5),
            watchdog_interval: Duration::from_millis(10),
            watchdog_timeout: Duration::from_secs(5),
        };
        let outcome = run_with_watchdog(config, tracker, &ctx, async { 42 }).await;
        assert!(matches!(outcome, WatchdogOutcome::Finished(42)));
    }

    #[tokio::test]
    async fn wall_clock_timeout_wins() {
        let tracker = Tracker::new();
        let ctx = RunContext::new();
        let ctx_inner = ctx.clone();
        let config = WatchdogConfig {
            runner_timeout: Duration::from_millis(20),
            watchdog_interval: Duration::from_millis(5),
            watchdog_timeout: Duration::from_secs(5),
        };
        let outcome = run_with_watchdog(config, tracker, &ctx, async {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                _ = ctx_inner.cancelled() => {}
            }
            42
        })
        .await;
        assert!(matches!(outcome, WatchdogOutcome::<i32>::TimedOut));
        assert!(ctx.is_cancelled(), "watchdog must cancel ctx so the runner can tear down its process");
    }

    #[tokio::test]
    async fn stale_output_trips_no_output() {
        let tracker = Tracker::new();
        let ctx = RunContext::new();
        let ctx_inner = ctx.clone();
        let config = WatchdogConfig {
            runner_timeout: Duration::from_secs(5),
            watchdog_interval: Duration::from_millis(5),
            watchdog_timeout: Duration::from_millis(15),
        };
        let outcome = run_with_watchdog(config, tracker, &ctx, async {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                _ = ctx_inner.cancelled() => {}
            }
            42
        })
        .await;
        assert!(matches!(outcome, WatchdogOutcome::<i32>::NoOutput));
        assert!(ctx.is_cancelled(), "watchdog must cancel ctx so the runner can tear down its process");
    }
}
