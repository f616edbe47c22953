use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window limiter over a ring of `rate` admission timestamps.
///
/// A caller is admitted once the slot it would overwrite is at least a window
/// old and the previous admission is at least `1/rate` old, so no one-second
/// window ever sees more than `rate` admissions and bursts are spread evenly.
/// A slot must be a full window old, not merely `1/rate`: with `rate` slots,
/// the `1/rate` age rule alone would admit up to `rate²` calls per second.
/// The ring lock is held while waiting, which keeps admissions in FIFO order.
pub struct RateLimiter {
    spacing: Duration,
    ring: Mutex<Ring>,
}

struct Ring {
    slots: Vec<Option<Instant>>,
    next: usize,
    last: Option<Instant>,
}

impl RateLimiter {
    /// A rate of zero is treated as one per second.
    pub fn new(rate_per_second: usize) -> Self {
        let rate = rate_per_second.max(1);
        Self {
            spacing: WINDOW / rate as u32,
            ring: Mutex::new(Ring {
                slots: vec![None; rate],
                next: 0,
                last: None,
            }),
        }
    }

    pub async fn acquire(&self) {
        let mut ring = self.ring.lock().await;

        let mut ready = Instant::now();
        if let Some(oldest) = ring.slots[ring.next] {
            ready = ready.max(oldest + WINDOW);
        }
        if let Some(last) = ring.last {
            ready = ready.max(last + self.spacing);
        }

        if ready > Instant::now() {
            sleep_until(ready).await;
        }

        let admitted = Instant::now();
        let slot = ring.next;
        ring.slots[slot] = Some(admitted);
        ring.next = (slot + 1) % ring.slots.len();
        ring.last = Some(admitted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_admissions_are_spaced() {
        let limiter = RateLimiter::new(10);
        let start = Instant::now();

        for _ in 0..21 {
            limiter.acquire().await;
        }

        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_is_one_per_second() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
