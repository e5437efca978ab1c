use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Serializes outgoing calls with a minimum spacing between call starts.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Blocks until the interval since the previous call has elapsed. The
    /// lock is held while sleeping so concurrent callers queue up.
    pub fn wait(&self) {
        let mut last = self.last_call.lock();
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let pause = self.min_interval - elapsed;
                log::debug!("rate limit: waiting {} ms", pause.as_millis());
                std::thread::sleep(pause);
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_consecutive_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(30));
        let t0 = Instant::now();
        limiter.wait();
        limiter.wait();
        limiter.wait();
        assert!(t0.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn zero_interval_never_sleeps() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let t0 = Instant::now();
        for _ in 0..100 {
            limiter.wait();
        }
        assert!(t0.elapsed() < Duration::from_secs(1));
    }
}
