//! Coalesce bursts of input into one value after a quiet period.

use std::time::Duration;
use web_time::Instant;

#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    quiet: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    pub fn quiet(&self) -> Duration {
        self.quiet
    }

    /// Replace the pending value and restart the quiet period.
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Time left before `poll` would release the pending value.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|(_, at)| self.quiet.saturating_sub(now.saturating_duration_since(*at)))
    }

    /// Take the latest value once the input has been quiet long enough.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, at)) if now.saturating_duration_since(*at) >= self.quiet => {
                self.pending.take().map(|(value, _)| value)
            }
            _ => None,
        }
    }

    /// Take the pending value regardless of the quiet period.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(150);

    #[test]
    fn test_burst_yields_last_value_once() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(QUIET);
        for (i, value) in [10, 20, 30].into_iter().enumerate() {
            debouncer.push(value, start + Duration::from_millis(40 * i as u64));
        }
        assert_eq!(debouncer.poll(start + Duration::from_millis(200)), None);
        assert_eq!(debouncer.poll(start + Duration::from_millis(230)), Some(30));
        assert_eq!(debouncer.poll(start + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_remaining_counts_down() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(QUIET);
        assert_eq!(debouncer.remaining(start), None);
        debouncer.push((), start);
        assert_eq!(
            debouncer.remaining(start + Duration::from_millis(100)),
            Some(Duration::from_millis(50))
        );
        assert_eq!(
            debouncer.remaining(start + Duration::from_secs(1)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_flush_and_cancel() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(QUIET);
        debouncer.push("a", now);
        assert_eq!(debouncer.flush(), Some("a"));
        debouncer.push("b", now);
        debouncer.cancel();
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.flush(), None);
    }
}
