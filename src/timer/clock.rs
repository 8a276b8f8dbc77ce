use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// The three independent countdowns a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClockKind {
    Session,
    Preparation,
    Recording,
}

impl fmt::Display for ClockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ClockKind::Session => "session",
            ClockKind::Preparation => "preparation",
            ClockKind::Recording => "recording",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockHandle {
    pub id: ClockId,
    pub kind: ClockKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockTick {
    pub clock: ClockHandle,
    pub remaining: Duration,
    pub total: Duration,
}

impl ClockTick {
    /// Whole seconds left, rounded up so a display never shows 0 early.
    pub fn remaining_display_secs(&self) -> u64 {
        let secs = self.remaining.as_secs();
        if self.remaining.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Deadline arithmetic for one countdown. Remaining time is always derived
/// from the start instant, never accumulated from ticks.
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    total: Duration,
    started_at: Instant,
}

impl Countdown {
    pub fn starting_at(total: Duration, started_at: Instant) -> Self {
        Self { total, started_at }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn deadline(&self) -> Instant {
        self.started_at + self.total
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.deadline().saturating_duration_since(now)
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at).min(self.total)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_saturates_after_deadline() {
        let start = Instant::now();
        let countdown = Countdown::starting_at(Duration::from_secs(60), start);

        assert_eq!(
            countdown.remaining_at(start + Duration::from_secs(15)),
            Duration::from_secs(45)
        );
        assert_eq!(countdown.remaining_at(start + Duration::from_secs(90)), Duration::ZERO);
        assert_eq!(
            countdown.elapsed_at(start + Duration::from_secs(90)),
            Duration::from_secs(60)
        );
        assert!(countdown.is_expired_at(start + Duration::from_secs(60)));
        assert!(!countdown.is_expired_at(start + Duration::from_millis(59_999)));
    }

    #[test]
    fn display_seconds_round_up() {
        let tick = ClockTick {
            clock: ClockHandle {
                id: ClockId(1),
                kind: ClockKind::Preparation,
            },
            remaining: Duration::from_millis(4_200),
            total: Duration::from_secs(60),
        };
        assert_eq!(tick.remaining_display_secs(), 5);
    }
}
