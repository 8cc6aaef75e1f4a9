use std::time::{Duration, Instant};

/// Cancellable quiet-period scheduler. Each `schedule` replaces any pending
/// value and restarts the window, so a burst of changes fires exactly once
/// with the last value. Polled every frame with an injected clock, which keeps
/// the logic independent of any event loop.
pub struct Debouncer<T> {
    quiet: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debouncer<T> {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    pub fn schedule(&mut self, value: T, now: Instant) {
        self.pending = Some((now + self.quiet, value));
    }

    /// Fire the pending value if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((deadline, _)) if now >= *deadline => {
                self.pending.take().map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(d, _)| *d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(300);

    #[test]
    fn burst_of_changes_fires_once_with_last_value() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(QUIET);
        d.schedule(1, t0);
        d.schedule(2, t0 + Duration::from_millis(100));
        d.schedule(3, t0 + Duration::from_millis(200));

        // Still inside the quiet window of the last change.
        assert_eq!(d.poll(t0 + Duration::from_millis(450)), None);
        assert_eq!(d.poll(t0 + Duration::from_millis(500)), Some(3));
        assert_eq!(d.poll(t0 + Duration::from_millis(900)), None);
    }

    #[test]
    fn reschedule_restarts_the_window() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(QUIET);
        d.schedule("a", t0);
        assert_eq!(d.poll(t0 + Duration::from_millis(299)), None);
        d.schedule("b", t0 + Duration::from_millis(299));
        assert_eq!(d.poll(t0 + Duration::from_millis(598)), None);
        assert_eq!(d.poll(t0 + Duration::from_millis(599)), Some("b"));
    }

    #[test]
    fn cancel_discards_pending_value() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(QUIET);
        d.schedule(7, t0);
        assert!(d.is_pending());
        d.cancel();
        assert!(!d.is_pending());
        assert_eq!(d.poll(t0 + QUIET), None);
    }

    #[test]
    fn deadline_is_exposed_for_repaint_scheduling() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(QUIET);
        assert_eq!(d.next_deadline(), None);
        d.schedule((), t0);
        assert_eq!(d.next_deadline(), Some(t0 + QUIET));
    }
}
