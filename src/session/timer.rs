//! Processing-duration clock
//!
//! The host ticks a display once a second while a processing request is in
//! flight. The timer owns nothing but a start instant, so starting twice is
//! harmless and stopping always leaves it inert.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct ProcessingTimer {
    started: Option<Instant>,
    /// Duration of the last completed run
    last: Option<Duration>,
}

impl ProcessingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    /// Restart from `now`; a running timer is reset, not duplicated
    pub fn start_at(&mut self, now: Instant) {
        self.started = Some(now);
        self.last = None;
    }

    pub fn stop(&mut self) {
        self.stop_at(Instant::now());
    }

    pub fn stop_at(&mut self, now: Instant) {
        if let Some(started) = self.started.take() {
            self.last = Some(now.saturating_duration_since(started));
        }
    }

    /// Drop all state without recording a duration
    pub fn clear(&mut self) {
        self.started = None;
        self.last = None;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Elapsed time of the running or last completed run
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        match (self.started, self.last) {
            (Some(started), _) => now.saturating_duration_since(started),
            (None, Some(last)) => last,
            (None, None) => Duration::ZERO,
        }
    }

    pub fn display_at(&self, now: Instant) -> String {
        format_elapsed(self.elapsed_at(now))
    }
}

/// `MM:SS`, whole seconds
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00");
        assert_eq!(format_elapsed(Duration::from_millis(65_900)), "01:05");
        assert_eq!(format_elapsed(Duration::from_secs(3_600)), "60:00");
    }

    #[test]
    fn test_stop_freezes_elapsed() {
        let t0 = Instant::now();
        let mut timer = ProcessingTimer::new();
        timer.start_at(t0);
        assert!(timer.is_running());
        assert_eq!(timer.display_at(t0 + Duration::from_secs(12)), "00:12");

        timer.stop_at(t0 + Duration::from_secs(30));
        assert!(!timer.is_running());
        assert_eq!(timer.display_at(t0 + Duration::from_secs(500)), "00:30");
    }

    #[test]
    fn test_restart_is_idempotent() {
        let t0 = Instant::now();
        let mut timer = ProcessingTimer::new();
        timer.start_at(t0);
        timer.start_at(t0 + Duration::from_secs(5));
        assert_eq!(timer.elapsed_at(t0 + Duration::from_secs(6)), Duration::from_secs(1));

        timer.stop();
        timer.stop();
        assert!(!timer.is_running());
    }

    #[test]
    fn test_clear() {
        let mut timer = ProcessingTimer::new();
        timer.start();
        timer.clear();
        assert_eq!(timer.elapsed_at(Instant::now()), Duration::ZERO);
    }
}
