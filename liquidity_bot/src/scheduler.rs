//! Drives cycles on a fixed time grid.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cycle::Cycle;
use crate::error::BotError;
use crate::telemetry;

/// Anything that can run one refresh cycle.
#[async_trait]
pub trait CycleRunner: Send {
    fn name(&self) -> &str;
    async fn run_cycle(&mut self) -> Result<Cycle, BotError>;
}

/// Time source for the scheduler.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep_until(&self, deadline: Instant);
}

/// Wall clock backed by tokio's timer (and therefore by `tokio::time::pause` in tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
    }
}

/// Clock that only moves when told to. Sleeping jumps straight to the deadline.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner()) += by;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep_until(&self, deadline: Instant) {
        let target = deadline.saturating_duration_since(self.origin);
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        if target > *elapsed {
            *elapsed = target;
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Failed cycles in a row that are tolerated. One more stops the scheduler.
    pub max_consecutive_failures: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Upper bound of the random delay added to a backoff. Zero disables jitter.
    pub jitter: Duration,
}

impl SchedulerConfig {
    /// `min(base * 2^(failures - 1), max)`.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (failures - 1).min(31);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Why the scheduler stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerExit {
    pub cycles: u64,
    pub skipped_ticks: u64,
}

pub struct RefreshScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
}

impl RefreshScheduler {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Runs cycles until `shutdown` turns true (or its sender goes away) or more than
    /// `max_consecutive_failures` cycles fail in a row.
    ///
    /// Cycle `k` is due at `start + k * interval`. Ticks that pass while a cycle runs, or
    /// while backing off, are skipped rather than run late. A cycle fails when it returns an
    /// error or is degraded.
    pub async fn run<R>(&self, runner: &mut R, mut shutdown: watch::Receiver<bool>) -> Result<SchedulerExit, BotError>
    where
        R: CycleRunner + ?Sized,
    {
        let name = runner.name().to_string();
        let start = self.clock.now();
        let mut tick: u64 = 0;
        let mut exit = SchedulerExit::default();
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!(bot = %name, cycles = exit.cycles, "scheduler stopped");
                return Ok(exit);
            }

            let due = start + self.tick_offset(tick);
            tokio::select! {
                _ = self.clock.sleep_until(due) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(bot = %name, cycles = exit.cycles, "scheduler stopped");
                        return Ok(exit);
                    }
                    continue;
                }
            }

            let result = runner.run_cycle().await;
            exit.cycles += 1;

            let failure = match &result {
                Ok(cycle) if cycle.is_degraded() => Some(format!(
                    "cycle {} degraded: {} actions, none confirmed",
                    cycle.number,
                    cycle.submissions.len()
                )),
                Ok(_) => None,
                Err(e) => Some(e.to_string()),
            };

            match failure {
                None => {
                    if failures > 0 {
                        info!(bot = %name, after = failures, "recovered");
                    }
                    failures = 0;
                    telemetry::cycle(&name, "ok");
                }
                Some(reason) => {
                    failures += 1;
                    let kind = if result.is_ok() { "degraded" } else { "failed" };
                    error!(bot = %name, failures, reason = %reason, "cycle {kind}");
                    telemetry::cycle(&name, kind);
                    if failures > self.config.max_consecutive_failures {
                        telemetry::consecutive_failures(&name, failures);
                        return Err(BotError::TooManyFailures {
                            count: failures,
                            last: reason,
                        });
                    }
                }
            }
            telemetry::consecutive_failures(&name, failures);

            let now = self.clock.now();
            let backoff = self.config.backoff(failures) + self.jitter(failures);
            let next = self.next_tick(start, tick, now, backoff);
            let overrun = self.ticks_until(start, now).saturating_sub(tick + 1);
            if overrun > 0 {
                warn!(bot = %name, skipped = overrun, "cycle overran its interval");
            }
            if failures > 0 {
                debug!(bot = %name, ?backoff, next_tick = next, "backing off");
            }
            exit.skipped_ticks += next - (tick + 1);
            tick = next;
        }
    }

    fn tick_offset(&self, tick: u64) -> Duration {
        let nanos = self.config.interval.as_nanos().saturating_mul(u128::from(tick));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Index of the first tick at or after `at`.
    fn ticks_until(&self, start: Instant, at: Instant) -> u64 {
        let elapsed = at.saturating_duration_since(start).as_nanos();
        let interval = self.config.interval.as_nanos().max(1);
        u64::try_from(elapsed.div_ceil(interval)).unwrap_or(u64::MAX)
    }

    fn next_tick(&self, start: Instant, current: u64, now: Instant, backoff: Duration) -> u64 {
        let earliest = self.ticks_until(start, now + backoff);
        earliest.max(current + 1)
    }

    fn jitter(&self, failures: u32) -> Duration {
        if failures == 0 || self.config.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max = u64::try_from(self.config.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}
