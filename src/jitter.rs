//! Explicit randomness sources for scheduling jitter and Bloom salts: injectable rather than
//! reaching for a bare `rand::thread_rng()`, so tests can pin a seed and assert on concrete
//! delays.

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub trait JitterSource: Send + Sync {
    /// A uniformly distributed delay in `[min, max]`.
    fn uniform(&self, min: Duration, max: Duration) -> Duration;

    /// `around ± spread`, uniformly distributed — used for the full-sync half-lifetime
    /// resend jitter.
    fn symmetric(&self, around: Duration, spread: Duration) -> Duration {
        let low = around.saturating_sub(spread);
        let high = around + spread;
        self.uniform(low, high)
    }
}

pub struct ChaChaJitter(Mutex<ChaCha8Rng>);

impl ChaChaJitter {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(ChaCha8Rng::seed_from_u64(seed)))
    }
}

impl JitterSource for ChaChaJitter {
    fn uniform(&self, min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        let mut rng = self.0.lock().expect("jitter rng mutex poisoned");
        let span_ms = (max - min).as_millis() as u64;
        let offset_ms = rng.gen_range(0..=span_ms);
        min + Duration::from_millis(offset_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_stays_in_bounds() {
        let j = ChaChaJitter::new(1);
        for _ in 0..50 {
            let d = j.uniform(Duration::from_millis(100), Duration::from_millis(500));
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(500));
        }
    }

    #[test]
    fn symmetric_stays_in_bounds() {
        let j = ChaChaJitter::new(2);
        for _ in 0..50 {
            let d = j.symmetric(Duration::from_millis(500), Duration::from_millis(200));
            assert!(d >= Duration::from_millis(300) && d <= Duration::from_millis(700));
        }
    }
}
