use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Source of poll ticks. The tracker only awaits `tick`, so tests can swap in
/// a hand-driven ticker and production uses tokio's clock.
#[async_trait]
pub trait Ticker: Send {
    /// Resolves at the next tick. Must be cancel safe.
    async fn tick(&mut self);

    /// Restart the period from now. Called when polling resumes after the
    /// active set was empty.
    fn reset(&mut self) {}
}

pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// First tick fires one full period after creation.
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }

    fn reset(&mut self) {
        self.interval.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticker_waits_a_full_period() {
        let start = Instant::now();
        let mut ticker = IntervalTicker::new(Duration::from_millis(1500));

        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(1500));

        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restarts_period() {
        let mut ticker = IntervalTicker::new(Duration::from_millis(1500));
        time::sleep(Duration::from_millis(1000)).await;

        let reset_at = Instant::now();
        ticker.reset();
        ticker.tick().await;
        assert_eq!(reset_at.elapsed(), Duration::from_millis(1500));
    }
}
