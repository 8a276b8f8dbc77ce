//! Cancellable countdown clocks.
//!
//! Each clock is an independent tokio task that reports ticks on a fixed
//! interval and fires its expiry callback once the deadline passes. Expiry
//! is decided by the deadline alone, so a slow or skipped tick never delays
//! or advances it. Stopping a clock guarantees its expiry callback will not
//! run afterwards.

mod clock;

pub use clock::{ClockHandle, ClockId, ClockKind, ClockTick, Countdown};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

struct ClockEntry {
    countdown: Countdown,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct TimerSubsystem {
    tick_interval: Duration,
    next_id: u64,
    clocks: HashMap<ClockId, ClockEntry>,
}

impl TimerSubsystem {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval: tick_interval.max(MIN_TICK_INTERVAL),
            next_id: 1,
            clocks: HashMap::new(),
        }
    }

    /// Starts a countdown. Must be called from within a tokio runtime.
    pub fn start_clock<T, E>(
        &mut self,
        kind: ClockKind,
        duration: Duration,
        mut on_tick: T,
        on_expire: E,
    ) -> ClockHandle
    where
        T: FnMut(ClockTick) + Send + 'static,
        E: FnOnce(ClockHandle) + Send + 'static,
    {
        self.prune_finished();

        let handle = ClockHandle {
            id: ClockId(self.next_id),
            kind,
        };
        self.next_id += 1;

        let countdown = Countdown::starting_at(duration, Instant::now());
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let tick_interval = self.tick_interval;

        let task = tokio::spawn(async move {
            let expiry = tokio::time::sleep_until(countdown.deadline());
            tokio::pin!(expiry);
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut expiry => {
                        if flag.load(Ordering::Acquire) {
                            return;
                        }
                        on_tick(ClockTick {
                            clock: handle,
                            remaining: Duration::ZERO,
                            total: countdown.total(),
                        });
                        tracing::debug!("{} clock {:?} expired", handle.kind, handle.id);
                        on_expire(handle);
                        return;
                    }
                    _ = ticker.tick() => {
                        if flag.load(Ordering::Acquire) {
                            return;
                        }
                        on_tick(ClockTick {
                            clock: handle,
                            remaining: countdown.remaining_at(Instant::now()),
                            total: countdown.total(),
                        });
                    }
                }
            }
        });

        tracing::debug!(
            "{} clock {:?} started ({:.1}s)",
            kind,
            handle.id,
            duration.as_secs_f32()
        );

        self.clocks.insert(
            handle.id,
            ClockEntry {
                countdown,
                cancelled,
                task,
            },
        );
        handle
    }

    /// Cancels a clock. Returns false when it was unknown or already gone.
    pub fn stop(&mut self, handle: ClockHandle) -> bool {
        match self.clocks.remove(&handle.id) {
            Some(entry) => {
                entry.cancelled.store(true, Ordering::Release);
                entry.task.abort();
                tracing::debug!("{} clock {:?} stopped", handle.kind, handle.id);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        for (_, entry) in self.clocks.drain() {
            entry.cancelled.store(true, Ordering::Release);
            entry.task.abort();
        }
    }

    pub fn remaining(&self, handle: ClockHandle) -> Option<Duration> {
        self.clocks
            .get(&handle.id)
            .map(|entry| entry.countdown.remaining_at(Instant::now()))
    }

    pub fn is_running(&self, handle: ClockHandle) -> bool {
        self.clocks
            .get(&handle.id)
            .map(|entry| !entry.task.is_finished())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.clocks
            .values()
            .filter(|entry| !entry.task.is_finished())
            .count()
    }

    fn prune_finished(&mut self) {
        self.clocks.retain(|_, entry| !entry.task.is_finished());
    }
}

impl Drop for TimerSubsystem {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{mpsc, oneshot};

    #[tokio::test(start_paused = true)]
    async fn expiry_follows_elapsed_time_not_tick_count() {
        let mut timers = TimerSubsystem::new(Duration::from_secs(7));
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();

        timers.start_clock(
            ClockKind::Preparation,
            Duration::from_secs(20),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                let _ = tx.send(Instant::now());
            },
        );

        let fired_at = rx.await.unwrap();
        let elapsed = fired_at - started;
        assert!(elapsed >= Duration::from_secs(20));
        assert!(elapsed < Duration::from_secs(20) + Duration::from_millis(5));
        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_clock_never_fires() {
        let mut timers = TimerSubsystem::new(Duration::from_millis(250));
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let handle = timers.start_clock(
            ClockKind::Recording,
            Duration::from_secs(5),
            |_| {},
            move |_| flag.store(true, Ordering::SeqCst),
        );
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(timers.stop(handle));
        assert!(!timers.stop(handle));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(timers.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clocks_of_different_kinds_run_independently() {
        let mut timers = TimerSubsystem::new(Duration::from_millis(500));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut start = |kind, secs| {
            let tx = tx.clone();
            timers.start_clock(kind, Duration::from_secs(secs), |_| {}, move |h: ClockHandle| {
                let _ = tx.send(h.kind);
            })
        };
        start(ClockKind::Session, 30);
        start(ClockKind::Preparation, 10);
        let recording = start(ClockKind::Recording, 20);

        assert_eq!(rx.recv().await, Some(ClockKind::Preparation));
        assert!(timers.stop(recording));
        assert_eq!(rx.recv().await, Some(ClockKind::Session));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_length_clock_expires_immediately() {
        let mut timers = TimerSubsystem::new(Duration::from_secs(1));
        let (tx, rx) = oneshot::channel();
        let handle = timers.start_clock(ClockKind::Session, Duration::ZERO, |_| {}, move |h| {
            let _ = tx.send(h);
        });
        assert_eq!(rx.await.unwrap(), handle);
        assert_eq!(timers.remaining(handle), Some(Duration::ZERO));
    }
}
