//! Per-source request spacing.

use rand::{Rng, rng};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Hands out request slots at least `delay` (plus random jitter) apart.
///
/// Slots are reserved under a lock and waited on outside it, so concurrent
/// workers of one source queue up instead of bursting.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    jitter: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    /// # Arguments
    ///
    /// * `delay` - Minimum spacing between request slots.
    /// * `jitter` - Upper bound of the random extra spacing added per slot.
    pub fn new(delay: Duration, jitter: Duration) -> Self {
        Self {
            delay,
            jitter,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for this caller's request slot.
    pub async fn wait(&self) {
        let slot = self.reserve(Instant::now());
        sleep_until(slot).await;
    }

    fn reserve(&self, now: Instant) -> Instant {
        let spacing = self.delay + self.sample_jitter();
        let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
        let slot = next.map_or(now, |n| n.max(now));
        *next = Some(slot + spacing);
        slot
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng().random_range(0..=max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_spaced() {
        let pacer = Pacer::new(Duration::from_millis(100), Duration::ZERO);
        let now = Instant::now();
        let first = pacer.reserve(now);
        let second = pacer.reserve(now);
        let third = pacer.reserve(now);
        assert_eq!(first, now);
        assert_eq!(second - first, Duration::from_millis(100));
        assert_eq!(third - second, Duration::from_millis(100));
    }

    #[test]
    fn test_idle_pacer_does_not_delay() {
        let pacer = Pacer::new(Duration::from_millis(100), Duration::ZERO);
        let now = Instant::now();
        pacer.reserve(now);
        let later = now + Duration::from_secs(5);
        assert_eq!(pacer.reserve(later), later);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let pacer = Pacer::new(Duration::from_millis(10), Duration::from_millis(5));
        let now = Instant::now();
        let first = pacer.reserve(now);
        let second = pacer.reserve(now);
        let gap = second - first;
        assert!(gap >= Duration::from_millis(10) && gap <= Duration::from_millis(15));
    }
}
