use rand::rngs::OsRng;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Randomized pauses between browser interactions.
///
/// A disabled pacer never sleeps, which keeps scripted runs fast.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    enabled: bool,
}

impl Pacing {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Pick a delay between `min` and `max` milliseconds (inclusive).
    pub fn pick(&self, min: u64, max: u64) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        Duration::from_millis(OsRng.gen_range(lo..=hi))
    }

    /// Sleep for a random duration between `min` and `max` milliseconds.
    pub async fn random_delay(&self, min: u64, max: u64) {
        let delay = self.pick(min, max);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::new(true)
    }
}
