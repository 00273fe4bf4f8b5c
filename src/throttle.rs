use std::time::Duration;
use tokio::time::Instant;

/// Minimum-gap policy for one rate-limited upstream.
///
/// `wait` returns immediately the first time and afterwards sleeps until at least
/// `min_interval` has passed since the previous call was let through.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Time left before the next call may go out.
    pub fn remaining(&self) -> Duration {
        match self.last {
            Some(last) => (last + self.min_interval).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    pub async fn wait(&mut self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_is_free() {
        let mut throttle = Throttle::new(Duration::from_secs(15));
        let start = Instant::now();
        throttle.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_successive_calls() {
        let mut throttle = Throttle::new(Duration::from_secs(15));
        let start = Instant::now();
        for _ in 0..4 {
            throttle.wait().await;
        }
        assert!(start.elapsed() >= Duration::from_secs(45));
        assert!(start.elapsed() < Duration::from_secs(46));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_work_counts_toward_the_gap() {
        let mut throttle = Throttle::new(Duration::from_secs(10));
        throttle.wait().await;
        tokio::time::sleep(Duration::from_secs(7)).await;
        let remaining = throttle.remaining();
        assert!(remaining <= Duration::from_secs(3) && remaining > Duration::from_millis(2990));

        let before = Instant::now();
        throttle.wait().await;
        let waited = before.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_millis(3010));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_never_sleeps() {
        let mut throttle = Throttle::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            throttle.wait().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
