// src/scheduler/timer.rs - Emulated IntervalTimer backed by one thread per timer
use super::interruptible::InterruptibleWait;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Identity of a timer instance. Firmware uses the address of its
/// `IntervalTimer` object, so two objects never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub usize);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

struct TimerEntry {
    wait: Arc<InterruptibleWait>,
    callback: TimerCallback,
    period: Duration,
}

/// Registry of running interval timers.
///
/// Each timer owns a detached thread that sleeps for its period and then
/// runs its callback, until [`end`](Self::end) or [`reset`](Self::reset)
/// stops it. Callbacks of one timer never overlap; callbacks of different
/// timers run concurrently.
#[derive(Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<TimerId, TimerEntry>>,
}

impl fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("active", &self.active_count())
            .finish()
    }
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TimerId, TimerEntry>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start calling `callback` every `period_us` microseconds.
    ///
    /// A timer already running under `id` is stopped first. Returns `false`
    /// for a zero period or when the thread cannot be spawned.
    pub fn begin(&self, id: TimerId, callback: TimerCallback, period_us: u32) -> bool {
        if period_us == 0 {
            tracing::warn!("Timer {} rejected: zero period", id);
            return false;
        }
        let period = Duration::from_micros(period_us as u64);
        let wait = Arc::new(InterruptibleWait::new());
        // Registered before the thread starts so its first callback can end it.
        let entry = TimerEntry {
            wait: wait.clone(),
            callback: callback.clone(),
            period,
        };
        let previous = self.lock().insert(id, entry);
        if let Some(previous) = previous {
            tracing::debug!("Timer {} restarted, stopping previous thread", id);
            previous.wait.interrupt();
        }

        let spawned = {
            let wait = wait.clone();
            thread::Builder::new()
                .name(format!("timer-{}", id))
                .spawn(move || run_timer(id, &wait, &callback, period))
        };
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn thread for timer {}: {}", id, e);
            let mut timers = self.lock();
            if timers.get(&id).is_some_and(|entry| Arc::ptr_eq(&entry.wait, &wait)) {
                timers.remove(&id);
            }
            return false;
        }
        tracing::info!("Timer {} started with period {:?}", id, period);
        true
    }

    /// Stop the timer registered under `id`; unknown ids are ignored.
    ///
    /// Returns once the timer thread has acknowledged, which includes
    /// waiting for a callback in flight. Called from the timer's own
    /// callback it returns immediately and the thread exits after the
    /// callback.
    pub fn end(&self, id: TimerId) {
        let entry = self.lock().remove(&id);
        if let Some(entry) = entry {
            entry.wait.interrupt();
            tracing::info!("Timer {} ended", id);
        }
    }

    /// Like [`end`](Self::end), but only when `id` still runs `callback`.
    /// A timer begun again under the same id since is left alone.
    pub fn end_callback(&self, id: TimerId, callback: &TimerCallback) -> bool {
        let entry = {
            let mut timers = self.lock();
            match timers.get(&id) {
                Some(entry) if Arc::ptr_eq(&entry.callback, callback) => timers.remove(&id),
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                entry.wait.interrupt();
                tracing::info!("Timer {} ended", id);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn period(&self, id: TimerId) -> Option<Duration> {
        self.lock().get(&id).map(|entry| entry.period)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Stop every timer, waiting at most `grace` for each one.
    ///
    /// Threads still busy after the grace period are left to exit on their
    /// own at their next loop boundary; they are counted in the return value
    /// and never run another callback once they get there. The registry is
    /// empty afterwards either way.
    pub fn reset(&self, grace: Duration) -> usize {
        let drained: Vec<(TimerId, TimerEntry)> = self.lock().drain().collect();
        let mut leaked = 0;
        for (id, entry) in drained {
            if !entry.wait.interrupt_timeout(grace) {
                tracing::warn!("Timer {} did not stop within {:?}, leaking its thread", id, grace);
                leaked += 1;
            }
        }
        leaked
    }
}

fn run_timer(id: TimerId, wait: &InterruptibleWait, callback: &TimerCallback, period: Duration) {
    while !wait.sleep(period) {
        if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
            tracing::error!("Timer {} callback panicked, stopping timer", id);
            break;
        }
    }
    wait.finish();
    tracing::trace!("Timer {} thread exiting", id);
}
