// src/scheduler/interruptible.rs - Cancellable sleep used by timer threads
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

#[derive(Debug, Default)]
struct WaitState {
    /// Stop requested; the owner exits at its next boundary.
    stop: bool,
    /// Owner is parked in `sleep`.
    sleeping: bool,
    /// Owner has left its loop and will not run another callback.
    finished: bool,
    owner: Option<ThreadId>,
}

/// Timed sleep that another thread can cut short.
///
/// One thread owns the wait: it calls [`sleep`](Self::sleep) between units of
/// work and [`finish`](Self::finish) when it leaves its loop. Any other thread
/// may call [`interrupt`](Self::interrupt), which wakes a sleeping owner and
/// returns once the owner has acknowledged by finishing. When the owner is
/// busy the interrupt waits for the work in flight to complete. When the
/// owner interrupts itself (a timer callback ending its own timer) the call
/// returns immediately.
#[derive(Debug, Default)]
pub struct InterruptibleWait {
    state: Mutex<WaitState>,
    cond: Condvar,
}

impl InterruptibleWait {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WaitState> {
        // A panicking callback never holds this lock, the state stays coherent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the calling thread the owner before its first `sleep`.
    pub fn claim(&self) {
        self.lock().owner = Some(thread::current().id());
    }

    /// Sleep up to `duration`. Returns `true` if a stop was requested, in
    /// which case the caller must leave its loop and call `finish`.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut state = self.lock();
        state.owner.get_or_insert_with(|| thread::current().id());
        if state.stop {
            return true;
        }
        state.sleeping = true;
        let (mut state, _) = self
            .cond
            .wait_timeout_while(state, duration, |s| !s.stop)
            .unwrap_or_else(|e| e.into_inner());
        state.sleeping = false;
        state.stop
    }

    /// Called by the owner once it will not run any more work.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.finished = true;
        state.sleeping = false;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stop
    }

    pub fn is_sleeping(&self) -> bool {
        self.lock().sleeping
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Request a stop and wait for the owner to acknowledge it.
    pub fn interrupt(&self) {
        let mut state = self.request_stop();
        if state.owner == Some(thread::current().id()) {
            return;
        }
        while !state.finished {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`interrupt`](Self::interrupt) but gives up after `timeout`.
    ///
    /// Returns `true` when the owner acknowledged (or is the caller), `false`
    /// when it is still busy after the timeout.
    pub fn interrupt_timeout(&self, timeout: Duration) -> bool {
        let state = self.request_stop();
        if state.owner == Some(thread::current().id()) {
            return true;
        }
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| !s.finished)
            .unwrap_or_else(|e| e.into_inner());
        state.finished
    }

    fn request_stop(&self) -> MutexGuard<'_, WaitState> {
        let mut state = self.lock();
        state.stop = true;
        self.cond.notify_all();
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_sleep_runs_full_duration_without_interrupt() {
        let wait = InterruptibleWait::new();
        let start = Instant::now();
        assert!(!wait.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_interrupt_wakes_sleeper_early() {
        let wait = Arc::new(InterruptibleWait::new());
        let owner = {
            let wait = wait.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let stopped = wait.sleep(Duration::from_secs(30));
                wait.finish();
                (stopped, start.elapsed())
            })
        };
        while !wait.is_sleeping() {
            thread::sleep(Duration::from_millis(1));
        }
        wait.interrupt();
        assert!(wait.is_finished());
        let (stopped, elapsed) = owner.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_interrupt_waits_for_work_in_flight() {
        let wait = Arc::new(InterruptibleWait::new());
        let done = Arc::new(AtomicUsize::new(0));
        let owner = {
            let (wait, done) = (wait.clone(), done.clone());
            thread::spawn(move || {
                while !wait.sleep(Duration::from_millis(1)) {
                    thread::sleep(Duration::from_millis(30));
                    done.fetch_add(1, Ordering::SeqCst);
                }
                wait.finish();
            })
        };
        thread::sleep(Duration::from_millis(10));
        wait.interrupt();
        let seen = done.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(done.load(Ordering::SeqCst), seen);
        owner.join().unwrap();
    }

    #[test]
    fn test_self_interrupt_returns_immediately() {
        let wait = InterruptibleWait::new();
        assert!(!wait.sleep(Duration::from_millis(1)));
        // Owner thread stopping itself must not wait for its own finish().
        wait.interrupt();
        assert!(wait.is_stopped());
        assert!(wait.sleep(Duration::from_secs(30)));
    }

    #[test]
    fn test_interrupt_timeout_gives_up_on_busy_owner() {
        let wait = Arc::new(InterruptibleWait::new());
        let owner = {
            let wait = wait.clone();
            thread::spawn(move || {
                wait.sleep(Duration::ZERO);
                thread::sleep(Duration::from_millis(200));
                wait.finish();
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!wait.interrupt_timeout(Duration::from_millis(10)));
        owner.join().unwrap();
        assert!(wait.interrupt_timeout(Duration::from_millis(10)));
    }
}
