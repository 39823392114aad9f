use std::time::{Duration, Instant};

/// Tracks the start of the current waiting period for a control loop.
/// Both the capture loop and the illumination sequence poll this on
/// every pass instead of sleeping for whole periods, so a loop stays
/// responsive to whatever else it has to do between firings.
///
/// The period is handed in per call rather than stored, which lets the
/// illumination sequence reuse one timer across phases with different
/// durations.
#[derive(Debug, Clone, Copy)]
pub struct IntervalTimer {
    /// Instant the current period started.
    period_start: Instant,
}

impl IntervalTimer {
    /// Create a timer whose first period starts now.
    pub fn start_now() -> Self {
        Self {
            period_start: Instant::now(),
        }
    }

    /// Begin a fresh period at the current instant, discarding any
    /// time already accumulated.
    pub fn restart(&mut self) {
        self.restart_at(Instant::now());
    }

    /// Begin a fresh period at `now`.
    pub fn restart_at(&mut self, now: Instant) {
        self.period_start = now;
    }

    /// Returns true exactly once per elapsed `period`. A true return
    /// resets the period start to the current instant, so the next
    /// period is measured from the moment the caller observed the
    /// firing, not from the nominal schedule.
    pub fn period_elapsed(&mut self, period: Duration) -> bool {
        self.period_elapsed_at(Instant::now(), period)
    }

    /// Clock-injected variant of [`IntervalTimer::period_elapsed`] so the
    /// firing behaviour can be pinned down in tests.
    pub fn period_elapsed_at(&mut self, now: Instant, period: Duration) -> bool {
        if now.duration_since(self.period_start) >= period {
            // A new period starts right here.
            self.period_start = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::from_millis(150_000))]
    #[case(Duration::from_millis(10_000))]
    #[case(Duration::from_millis(25))]
    fn test_fires_once_per_period(#[case] period: Duration) {
        let t0 = Instant::now();
        let mut timer = IntervalTimer::start_now();
        timer.restart_at(t0);

        assert!(!timer.period_elapsed_at(t0, period));
        assert!(!timer.period_elapsed_at(t0 + period / 2, period));
        assert!(timer.period_elapsed_at(t0 + period, period));
        // The period start was consumed by the firing above.
        assert!(!timer.period_elapsed_at(t0 + period, period));
        assert!(timer.period_elapsed_at(t0 + period * 2, period));
    }

    #[test]
    fn test_reset_happens_at_observation_instant() {
        let period = Duration::from_millis(1000);
        let late = Duration::from_millis(300);
        let t0 = Instant::now();
        let mut timer = IntervalTimer::start_now();
        timer.restart_at(t0);

        // A late poll fires, and the next period is measured from the
        // late observation rather than the nominal boundary.
        assert!(timer.period_elapsed_at(t0 + period + late, period));
        assert!(!timer.period_elapsed_at(t0 + period * 2, period));
        assert!(timer.period_elapsed_at(t0 + period * 2 + late, period));
    }

    #[test]
    fn test_at_most_once_after_long_stall() {
        let period = Duration::from_millis(100);
        let t0 = Instant::now();
        let mut timer = IntervalTimer::start_now();
        timer.restart_at(t0);

        // Missed periods are not queued up; a stalled loop gets one
        // firing when it comes back, not five.
        assert!(timer.period_elapsed_at(t0 + period * 5, period));
        assert!(!timer.period_elapsed_at(t0 + period * 5, period));
    }

    #[test]
    fn test_restart_discards_accumulated_time() {
        let period = Duration::from_millis(100);
        let t0 = Instant::now();
        let mut timer = IntervalTimer::start_now();
        timer.restart_at(t0);

        timer.restart_at(t0 + period / 2);
        assert!(!timer.period_elapsed_at(t0 + period, period));
        assert!(timer.period_elapsed_at(t0 + period / 2 + period, period));
    }
}
