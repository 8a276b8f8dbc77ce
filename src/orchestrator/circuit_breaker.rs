use std::time::Duration;
use tokio::time::Instant;

const TRIP_THRESHOLD: u8 = 3;
const TRIP_WINDOW: Duration = Duration::from_secs(300);
const COOLDOWN: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { tripped_at: Instant },
    HalfOpen,
}

pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u8,
    last_failure_time: Option<Instant>,
    trip_threshold: u8,
    trip_window: Duration,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            trip_threshold: TRIP_THRESHOLD,
            trip_window: TRIP_WINDOW,
            cooldown: COOLDOWN,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn is_request_allowed(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open { tripped_at } => {
                if tripped_at.elapsed() >= self.cooldown {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.last_failure_time = None;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        let now = Instant::now();

        if let Some(last_fail) = self.last_failure_time {
            if now.duration_since(last_fail) > self.trip_window {
                self.failure_count = 1;
            } else {
                self.failure_count = self.failure_count.saturating_add(1);
            }
        } else {
            self.failure_count = 1;
        }

        self.last_failure_time = Some(now);

        // A failed probe while half-open trips again straight away.
        if self.failure_count >= self.trip_threshold || self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Open { tripped_at: now };
            tracing::warn!("Circuit breaker tripped, failure_count={}", self.failure_count);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
