use std::time::{Duration, Instant};

/// Default countdown length in seconds.
pub const SKIP_COOLDOWN_SECS: u32 = 10;

/// Interval between ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Countdown still running; seconds left.
    Counting(u32),
    /// Countdown hit zero on this tick. The timer has stopped itself.
    SkipEnabled,
    /// Timer was not running; nothing happened.
    Idle,
}

/// Countdown gate for the skip affordance.
///
/// The only tick source is `next_tick_at`: starting again overwrites it, so
/// two countdowns can never run at once.
#[derive(Debug, Clone)]
pub struct SkipTimer {
    cooldown_secs: u32,
    remaining: u32,
    next_tick_at: Option<Instant>,
}

impl SkipTimer {
    pub fn new(cooldown_secs: u32) -> Self {
        SkipTimer {
            cooldown_secs,
            remaining: 0,
            next_tick_at: None,
        }
    }

    /// Reset to the full cooldown and schedule the first tick one interval out.
    pub fn start(&mut self, now: Instant) {
        self.stop();
        self.remaining = self.cooldown_secs;
        self.next_tick_at = Some(now + TICK_INTERVAL);
        if self.remaining == 0 {
            // Zero-length cooldown still needs one tick to unlock the skip.
            self.remaining = 1;
        }
    }

    /// Decrement once. Stops itself and reports `SkipEnabled` at zero.
    pub fn tick(&mut self) -> TickOutcome {
        if self.next_tick_at.is_none() {
            return TickOutcome::Idle;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.next_tick_at = None;
            TickOutcome::SkipEnabled
        } else {
            if let Some(at) = self.next_tick_at.as_mut() {
                *at += TICK_INTERVAL;
            }
            TickOutcome::Counting(self.remaining)
        }
    }

    /// Deliver every tick that is due at `now`, in order.
    pub fn poll(&mut self, now: Instant) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        while let Some(at) = self.next_tick_at {
            if at > now {
                break;
            }
            outcomes.push(self.tick());
        }
        outcomes
    }

    /// Cancel any pending tick. `remaining` keeps its value.
    pub fn stop(&mut self) {
        self.next_tick_at = None;
    }

    /// Force the countdown to zero without firing a notification.
    pub fn clear(&mut self) {
        self.stop();
        self.remaining = 0;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.next_tick_at.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick_at
    }
}

impl Default for SkipTimer {
    fn default() -> Self {
        Self::new(SKIP_COOLDOWN_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_ticks_enable_skip_exactly_once() {
        let mut timer = SkipTimer::default();
        timer.start(Instant::now());
        assert_eq!(timer.remaining(), 10);

        let outcomes: Vec<_> = (0..10).map(|_| timer.tick()).collect();
        assert_eq!(outcomes[0], TickOutcome::Counting(9));
        assert_eq!(outcomes[8], TickOutcome::Counting(1));
        assert_eq!(outcomes[9], TickOutcome::SkipEnabled);
        assert_eq!(timer.remaining(), 0);
        assert!(!timer.is_running());

        assert_eq!(timer.tick(), TickOutcome::Idle);
        let enabled = outcomes.iter().filter(|o| **o == TickOutcome::SkipEnabled).count();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn restart_mid_countdown_resets_without_second_source() {
        let t0 = Instant::now();
        let mut timer = SkipTimer::default();
        timer.start(t0);
        timer.poll(t0 + Duration::from_secs(4));
        assert_eq!(timer.remaining(), 6);

        let t1 = t0 + Duration::from_millis(4500);
        timer.start(t1);
        assert_eq!(timer.remaining(), 10);
        assert_eq!(timer.next_deadline(), Some(t1 + TICK_INTERVAL));

        // One second later exactly one tick is due, not two.
        let due = timer.poll(t1 + Duration::from_secs(1));
        assert_eq!(due, vec![TickOutcome::Counting(9)]);
    }

    #[test]
    fn poll_delivers_all_due_ticks() {
        let t0 = Instant::now();
        let mut timer = SkipTimer::default();
        timer.start(t0);
        assert!(timer.poll(t0 + Duration::from_millis(999)).is_empty());
        let due = timer.poll(t0 + Duration::from_secs(30));
        assert_eq!(due.len(), 10);
        assert_eq!(due.last(), Some(&TickOutcome::SkipEnabled));
        assert!(timer.poll(t0 + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn stop_cancels_pending_ticks() {
        let t0 = Instant::now();
        let mut timer = SkipTimer::default();
        timer.start(t0);
        timer.stop();
        assert!(timer.poll(t0 + Duration::from_secs(30)).is_empty());
        assert_eq!(timer.remaining(), 10);
    }

    #[test]
    fn zero_cooldown_unlocks_on_first_tick() {
        let mut timer = SkipTimer::new(0);
        timer.start(Instant::now());
        assert_eq!(timer.tick(), TickOutcome::SkipEnabled);
    }
}
