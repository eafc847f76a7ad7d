use tokio::time::{Duration, Instant};

/// Deadlines owned by the phase controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Session budget expiry
    Countdown,
    /// Once-per-second refresh of the seconds-left display
    CountdownTick,
    /// Delay before the scripted opening message
    SetupGrace,
    /// Retry of the silence check after time-up
    SilencePoll,
    /// Clears the user-speaking flag
    SpeechDebounce,
    /// Cap on waiting for the closing turn
    EndWait,
    /// Pause before returning to waiting
    ReturnGrace,
}

impl TimerKind {
    const ALL: [TimerKind; 7] = [
        TimerKind::Countdown,
        TimerKind::CountdownTick,
        TimerKind::SetupGrace,
        TimerKind::SilencePoll,
        TimerKind::SpeechDebounce,
        TimerKind::EndWait,
        TimerKind::ReturnGrace,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// At most one pending deadline per timer kind
///
/// Arming a timer replaces its previous deadline, so a timer can never be
/// armed twice.
#[derive(Debug, Default, Clone)]
pub struct PendingTimers {
    deadlines: [Option<Instant>; 7],
}

impl PendingTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, kind: TimerKind, deadline: Instant) {
        self.deadlines[kind.index()] = Some(deadline);
    }

    pub fn arm_in(&mut self, kind: TimerKind, delay: Duration) {
        self.arm(kind, Instant::now() + delay);
    }

    pub fn clear(&mut self, kind: TimerKind) {
        self.deadlines[kind.index()] = None;
    }

    pub fn clear_all(&mut self) {
        self.deadlines = [None; 7];
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.index()].is_some()
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.deadlines[kind.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.iter().all(Option::is_none)
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Disarm and return every timer due at `now`, earliest first
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = TimerKind::ALL
            .iter()
            .filter_map(|&kind| match self.deadlines[kind.index()] {
                Some(deadline) if deadline <= now => Some((deadline, kind)),
                _ => None,
            })
            .collect();

        // Stable sort keeps declaration order for equal deadlines
        due.sort_by_key(|(deadline, _)| *deadline);

        for (_, kind) in &due {
            self.clear(*kind);
        }

        due.into_iter().map(|(_, kind)| kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_replaces_deadline() {
        let now = Instant::now();
        let mut timers = PendingTimers::new();

        timers.arm(TimerKind::SilencePoll, now + Duration::from_millis(500));
        timers.arm(TimerKind::SilencePoll, now + Duration::from_millis(900));

        assert_eq!(
            timers.next_deadline(),
            Some(now + Duration::from_millis(900))
        );
    }

    #[test]
    fn test_take_due_orders_by_deadline() {
        let now = Instant::now();
        let mut timers = PendingTimers::new();

        timers.arm(TimerKind::ReturnGrace, now + Duration::from_millis(20));
        timers.arm(TimerKind::Countdown, now + Duration::from_millis(10));
        timers.arm(TimerKind::CountdownTick, now + Duration::from_millis(10));
        timers.arm(TimerKind::EndWait, now + Duration::from_secs(5));

        let due = timers.take_due(now + Duration::from_millis(20));
        assert_eq!(
            due,
            vec![
                TimerKind::Countdown,
                TimerKind::CountdownTick,
                TimerKind::ReturnGrace
            ]
        );
        assert!(timers.is_armed(TimerKind::EndWait));
        assert!(!timers.is_armed(TimerKind::Countdown));
    }

    #[test]
    fn test_clear_all() {
        let mut timers = PendingTimers::new();
        timers.arm_in(TimerKind::Countdown, Duration::from_secs(60));
        timers.arm_in(TimerKind::SpeechDebounce, Duration::from_millis(600));

        timers.clear_all();
        assert!(timers.is_empty());
        assert_eq!(timers.next_deadline(), None);
    }
}
