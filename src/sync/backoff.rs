//! Bounded exponential backoff for peer reconnection (spec §7
//! `SyncTransportError`: "reconnect with exponential backoff (bounded)").
//!
//! Generalizes the teacher's fixed 5-second reconnect sleep
//! (`src/sync/network.rs`) into a doubling delay capped at a maximum, since
//! a fixed retry interval does not satisfy the spec's explicit "bounded
//! exponential backoff" requirement.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: 0 }
    }

    /// The delay before the next attempt, doubling each call and clamped to
    /// `max`. Advances internal state.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self.base.checked_mul(factor).unwrap_or(self.max).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Resets the attempt counter after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_each_attempt_until_capped() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
    }

    #[test]
    fn delay_never_exceeds_max() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            last = b.next_delay();
        }
        assert_eq!(last, Duration::from_secs(10));
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }
}
