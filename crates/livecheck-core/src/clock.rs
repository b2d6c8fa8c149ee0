//! Whole-second session countdowns.
//!
//! Both countdowns are advanced by [`SessionClock::tick`], called once per
//! elapsed second by the runner. A countdown fires exactly once, on the tick
//! that brings it to zero, and stays fired until re-armed.

/// One-shot countdown in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    duration_secs: u64,
    remaining_secs: u64,
    fired: bool,
}

impl Countdown {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            duration_secs,
            remaining_secs: duration_secs,
            fired: false,
        }
    }

    /// Advance by one second. Returns `true` on the tick that fires.
    pub fn tick(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.fired = true;
            return true;
        }
        false
    }

    /// Restore the full duration and clear the fired flag.
    pub fn rearm(&mut self) {
        self.remaining_secs = self.duration_secs;
        self.fired = false;
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.duration_secs - self.remaining_secs
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

/// Which countdown fired on a given tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockEvents {
    pub hard_fired: bool,
    pub soft_fired: bool,
}

/// The hard session limit plus the optional soft "no valid face" limit.
#[derive(Debug, Clone)]
pub struct SessionClock {
    hard: Countdown,
    soft: Option<Countdown>,
    stopped: bool,
}

impl SessionClock {
    /// Arm both countdowns. A `soft_secs` of zero disables the soft limit.
    pub fn start(hard_secs: u64, soft_secs: u64) -> Self {
        Self {
            hard: Countdown::new(hard_secs),
            soft: (soft_secs > 0).then(|| Countdown::new(soft_secs)),
            stopped: false,
        }
    }

    pub fn tick(&mut self) -> ClockEvents {
        if self.stopped {
            return ClockEvents::default();
        }
        ClockEvents {
            hard_fired: self.hard.tick(),
            soft_fired: self.soft.as_mut().is_some_and(Countdown::tick),
        }
    }

    /// Reset the soft countdown to its full duration. The hard limit is never
    /// re-armed.
    pub fn rearm_soft(&mut self) {
        if let Some(soft) = self.soft.as_mut() {
            soft.rearm();
        }
    }

    /// Freeze both countdowns; further ticks are ignored.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn hard(&self) -> &Countdown {
        &self.hard
    }

    pub fn soft(&self) -> Option<&Countdown> {
        self.soft.as_ref()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.hard.elapsed_secs()
    }
}

/// Render remaining seconds as zero-padded `MM:SS`.
pub fn format_mmss(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_fires_once() {
        let mut c = Countdown::new(3);
        assert!(!c.tick());
        assert!(!c.tick());
        assert!(c.tick());
        assert!(c.has_fired());
        assert!(!c.tick());
        assert_eq!(c.remaining_secs(), 0);
    }

    #[test]
    fn test_rearm_restores_full_duration() {
        let mut c = Countdown::new(10);
        for _ in 0..7 {
            c.tick();
        }
        assert_eq!(c.remaining_secs(), 3);
        c.rearm();
        assert_eq!(c.remaining_secs(), 10);
        // Repeated re-arms are idempotent
        c.rearm();
        c.rearm();
        assert_eq!(c.remaining_secs(), 10);
    }

    #[test]
    fn test_zero_duration_fires_on_first_tick() {
        let mut c = Countdown::new(0);
        assert!(c.tick());
        assert_eq!(c.remaining_secs(), 0);
    }

    #[test]
    fn test_soft_rearm_never_touches_hard() {
        let mut clock = SessionClock::start(10, 4);
        for _ in 0..3 {
            clock.tick();
        }
        clock.rearm_soft();
        assert_eq!(clock.soft().unwrap().remaining_secs(), 4);
        assert_eq!(clock.hard().remaining_secs(), 7);
        assert_eq!(clock.elapsed_secs(), 3);
    }

    #[test]
    fn test_soft_and_hard_fire_independently() {
        let mut clock = SessionClock::start(5, 2);
        assert_eq!(clock.tick(), ClockEvents::default());
        let ev = clock.tick();
        assert!(ev.soft_fired);
        assert!(!ev.hard_fired);
        clock.tick();
        clock.tick();
        let ev = clock.tick();
        assert!(ev.hard_fired);
        assert!(!ev.soft_fired);
    }

    #[test]
    fn test_disabled_soft_limit() {
        let mut clock = SessionClock::start(2, 0);
        assert!(clock.soft().is_none());
        clock.rearm_soft();
        assert!(!clock.tick().soft_fired);
        assert!(clock.tick().hard_fired);
    }

    #[test]
    fn test_stopped_clock_ignores_ticks() {
        let mut clock = SessionClock::start(2, 1);
        clock.stop();
        assert_eq!(clock.tick(), ClockEvents::default());
        assert_eq!(clock.tick(), ClockEvents::default());
        assert_eq!(clock.hard().remaining_secs(), 2);
    }

    #[test]
    fn test_format_mmss() {
        assert_eq!(format_mmss(0), "00:00");
        assert_eq!(format_mmss(59), "00:59");
        assert_eq!(format_mmss(120), "02:00");
        assert_eq!(format_mmss(900), "15:00");
        assert_eq!(format_mmss(6001), "100:01");
    }
}
