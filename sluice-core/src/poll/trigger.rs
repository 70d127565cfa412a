use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::TriggerConfig;

/// Timing facts about previous runs, handed to a trigger when it picks the
/// next one.
#[derive(Clone, Copy, Debug, Default)]
pub struct TriggerContext {
    pub last_scheduled: Option<Instant>,
    pub last_started: Option<Instant>,
    pub last_completed: Option<Instant>,
}

impl TriggerContext {
    pub fn record_run(&mut self, scheduled: Instant, started: Instant, completed: Instant) {
        self.last_scheduled = Some(scheduled);
        self.last_started = Some(started);
        self.last_completed = Some(completed);
    }
}

/// Decides when the next tick fires. `None` ends the schedule.
pub trait TriggerPolicy: Send + Sync + fmt::Debug {
    fn next_execution(&self, ctx: &TriggerContext, now: Instant) -> Option<Instant>;
}

/// Fixed-rate or fixed-delay periodic trigger with an optional initial delay.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PeriodicTrigger {
    period: Duration,
    initial_delay: Duration,
    fixed_rate: bool,
}

impl PeriodicTrigger {
    /// Next run is `period` after the previous one completed.
    pub fn fixed_delay(period: Duration) -> Self {
        Self {
            period,
            initial_delay: Duration::ZERO,
            fixed_rate: false,
        }
    }

    /// Next run is `period` after the previous one was scheduled. A run that
    /// overshoots makes the next one fire immediately; missed runs are not
    /// replayed.
    pub fn fixed_rate(period: Duration) -> Self {
        Self {
            period,
            initial_delay: Duration::ZERO,
            fixed_rate: true,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_fixed_rate(&self) -> bool {
        self.fixed_rate
    }
}

impl TriggerPolicy for PeriodicTrigger {
    fn next_execution(&self, ctx: &TriggerContext, now: Instant) -> Option<Instant> {
        let Some(last_scheduled) = ctx.last_scheduled else {
            return Some(now + self.initial_delay);
        };
        if self.fixed_rate {
            Some((last_scheduled + self.period).max(now))
        } else {
            let anchor = ctx.last_completed.unwrap_or(now);
            Some(anchor + self.period)
        }
    }
}

/// Fires once after `delay`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OneShotTrigger {
    delay: Duration,
}

impl OneShotTrigger {
    pub fn after(delay: Duration) -> Self {
        Self { delay }
    }
}

impl TriggerPolicy for OneShotTrigger {
    fn next_execution(&self, ctx: &TriggerContext, now: Instant) -> Option<Instant> {
        match ctx.last_scheduled {
            None => Some(now + self.delay),
            Some(_) => None,
        }
    }
}

impl From<&TriggerConfig> for Arc<dyn TriggerPolicy> {
    fn from(config: &TriggerConfig) -> Self {
        match *config {
            TriggerConfig::FixedRate {
                period_ms,
                initial_delay_ms,
            } => Arc::new(
                PeriodicTrigger::fixed_rate(Duration::from_millis(period_ms))
                    .with_initial_delay(Duration::from_millis(initial_delay_ms)),
            ),
            TriggerConfig::FixedDelay {
                delay_ms,
                initial_delay_ms,
            } => Arc::new(
                PeriodicTrigger::fixed_delay(Duration::from_millis(delay_ms))
                    .with_initial_delay(Duration::from_millis(initial_delay_ms)),
            ),
            TriggerConfig::Once { delay_ms } => {
                Arc::new(OneShotTrigger::after(Duration::from_millis(delay_ms)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn first_run_honours_initial_delay() {
        let now = Instant::now();
        let trigger = PeriodicTrigger::fixed_delay(SECOND).with_initial_delay(5 * SECOND);
        assert_eq!(
            trigger.next_execution(&TriggerContext::default(), now),
            Some(now + 5 * SECOND)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_counts_from_completion() {
        let t0 = Instant::now();
        let mut ctx = TriggerContext::default();
        ctx.record_run(t0, t0, t0 + 3 * SECOND);

        let trigger = PeriodicTrigger::fixed_delay(2 * SECOND);
        assert_eq!(
            trigger.next_execution(&ctx, t0 + 3 * SECOND),
            Some(t0 + 5 * SECOND)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_rate_counts_from_schedule_and_never_goes_backwards() {
        let t0 = Instant::now();
        let mut ctx = TriggerContext::default();
        let trigger = PeriodicTrigger::fixed_rate(2 * SECOND);

        ctx.record_run(t0, t0, t0 + SECOND);
        assert_eq!(trigger.next_execution(&ctx, t0 + SECOND), Some(t0 + 2 * SECOND));

        ctx.record_run(t0, t0, t0 + 5 * SECOND);
        assert_eq!(
            trigger.next_execution(&ctx, t0 + 5 * SECOND),
            Some(t0 + 5 * SECOND)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once() {
        let now = Instant::now();
        let trigger = OneShotTrigger::after(SECOND);
        let mut ctx = TriggerContext::default();
        assert_eq!(trigger.next_execution(&ctx, now), Some(now + SECOND));

        ctx.record_run(now + SECOND, now + SECOND, now + SECOND);
        assert_eq!(trigger.next_execution(&ctx, now + SECOND), None);
    }

    #[test]
    fn config_maps_to_policy() {
        let trigger: Arc<dyn TriggerPolicy> = (&TriggerConfig::Once { delay_ms: 0 }).into();
        assert!(format!("{trigger:?}").contains("OneShotTrigger"));
    }
}
