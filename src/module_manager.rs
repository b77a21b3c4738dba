// src/module_manager.rs - Firmware module lifecycle: load, drive, tear down
use crate::abi::DylibFirmware;
use crate::config::RuntimeConfig;
use crate::hardware::Board;
use crate::scheduler::InterruptibleWait;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot load module: {0}")]
    Library(#[from] libloading::Error),
    #[error("module has no `{0}` entry point")]
    MissingEntryPoint(&'static str),
    #[error("module ABI version {found} does not match host version {expected}")]
    AbiMismatch { expected: u32, found: u32 },
    #[error("cannot stage module copy: {0}")]
    Stage(std::io::Error),
    #[error("cannot spawn driver thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Device logic driven by the runtime: `setup` once, then `run_loop` forever.
pub trait Firmware: Send {
    fn name(&self) -> &str;
    fn setup(&mut self, board: &Board);
    fn run_loop(&mut self, board: &Board);
}

/// Firmware made of two closures, for in-process modules and tests.
pub struct FnFirmware<S, L> {
    name: String,
    setup: S,
    run_loop: L,
}

impl<S, L> FnFirmware<S, L>
where
    S: FnMut(&Board) + Send,
    L: FnMut(&Board) + Send,
{
    pub fn new(name: impl Into<String>, setup: S, run_loop: L) -> Self {
        Self {
            name: name.into(),
            setup,
            run_loop,
        }
    }
}

impl<S, L> Firmware for FnFirmware<S, L>
where
    S: FnMut(&Board) + Send,
    L: FnMut(&Board) + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, board: &Board) {
        (self.setup)(board)
    }

    fn run_loop(&mut self, board: &Board) {
        (self.run_loop)(board)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Idle,
    Loading,
    Running,
    Stopping,
}

/// Outcome of stopping the running module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub module: Option<String>,
    pub timers_leaked: usize,
    pub driver_leaked: bool,
}

struct RunningModule {
    name: String,
    driver: Arc<InterruptibleWait>,
    active: Arc<AtomicBool>,
}

struct Status {
    state: ModuleState,
    current: Option<RunningModule>,
}

/// Runs at most one firmware module at a time on a dedicated driver thread.
///
/// Starting a module always tears the previous one down first: its driver
/// stops at the next loop boundary, its timers are stopped, its interrupt
/// bindings are dropped and its calls into the board become no-ops. Threads
/// that do not stop within the grace period are left running, detached, and
/// reported as leaked.
pub struct ModuleRuntime {
    board: Board,
    pacing: Duration,
    grace: Duration,
    swap: Mutex<()>,
    status: Mutex<Status>,
}

impl fmt::Debug for ModuleRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRuntime")
            .field("state", &self.state())
            .field("module", &self.current_module())
            .field("pacing", &self.pacing)
            .field("grace", &self.grace)
            .finish()
    }
}

impl ModuleRuntime {
    pub fn new(board: Board, config: &RuntimeConfig) -> Self {
        Self::with_timing(board, config.loop_pacing(), config.teardown_grace())
    }

    pub fn with_timing(board: Board, pacing: Duration, grace: Duration) -> Self {
        Self {
            board,
            pacing,
            grace,
            swap: Mutex::new(()),
            status: Mutex::new(Status {
                state: ModuleState::Idle,
                current: None,
            }),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ModuleState) {
        self.status().state = state;
    }

    /// Current lifecycle state. A driver whose firmware panicked counts as
    /// idle.
    pub fn state(&self) -> ModuleState {
        let status = self.status();
        match (&status.state, &status.current) {
            (ModuleState::Running, Some(m)) if m.driver.is_finished() => ModuleState::Idle,
            (state, _) => *state,
        }
    }

    pub fn current_module(&self) -> Option<String> {
        self.status().current.as_ref().map(|m| m.name.clone())
    }

    /// Tear down the running module, then load and start the shared object
    /// at `path`. On failure the runtime is left idle.
    pub fn load(&self, path: &str) -> Result<(), LoadError> {
        tracing::info!("Loading module {}", path);
        self.swap_in(move |board, active| {
            let firmware: Box<dyn Firmware> = Box::new(DylibFirmware::open(path, board, active)?);
            Ok(firmware)
        })
    }

    /// Tear down the running module and start `firmware` in its place.
    pub fn start(&self, firmware: Box<dyn Firmware>) -> Result<(), LoadError> {
        self.swap_in(move |_, _| Ok(firmware))
    }

    fn swap_in<F>(&self, open: F) -> Result<(), LoadError>
    where
        F: FnOnce(Board, Arc<AtomicBool>) -> Result<Box<dyn Firmware>, LoadError>,
    {
        let _swap = self.swap.lock().unwrap_or_else(|e| e.into_inner());
        self.teardown_current();

        self.set_state(ModuleState::Loading);
        let active = Arc::new(AtomicBool::new(true));
        let board = self.board.for_module(active.clone());
        let firmware = match open(board.clone(), active.clone()) {
            Ok(firmware) => firmware,
            Err(e) => {
                tracing::warn!("Module load failed: {}", e);
                self.set_state(ModuleState::Idle);
                return Err(e);
            }
        };

        let name = firmware.name().to_string();
        let driver = Arc::new(InterruptibleWait::new());
        let spawned = {
            let (driver, pacing) = (driver.clone(), self.pacing);
            thread::Builder::new()
                .name(format!("driver-{}", name))
                .spawn(move || drive(firmware, &board, &driver, pacing))
        };
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn driver for {}: {}", name, e);
            active.store(false, Ordering::Release);
            self.set_state(ModuleState::Idle);
            return Err(LoadError::Spawn(e));
        }

        tracing::info!("Module {} running", name);
        let mut status = self.status();
        status.current = Some(RunningModule { name, driver, active });
        status.state = ModuleState::Running;
        Ok(())
    }

    /// Stop the running module, if any.
    pub fn teardown(&self) -> TeardownReport {
        let _swap = self.swap.lock().unwrap_or_else(|e| e.into_inner());
        self.teardown_current()
    }

    fn teardown_current(&self) -> TeardownReport {
        let current = {
            let mut status = self.status();
            let current = status.current.take();
            if current.is_some() {
                status.state = ModuleState::Stopping;
            }
            current
        };
        let Some(module) = current else {
            return TeardownReport::default();
        };

        tracing::info!("Tearing down module {}", module.name);
        module.active.store(false, Ordering::Release);
        let driver_stopped = module.driver.interrupt_timeout(self.grace);
        let timers_leaked = self.board.timers.reset(self.grace);
        self.board.pins.clear_interrupts();
        if !driver_stopped {
            tracing::warn!(
                "Driver of {} did not stop within {:?}, leaking its thread",
                module.name,
                self.grace
            );
        }
        if timers_leaked > 0 {
            tracing::warn!("{} timer thread(s) of {} leaked", timers_leaked, module.name);
        }
        self.set_state(ModuleState::Idle);

        TeardownReport {
            module: Some(module.name),
            timers_leaked,
            driver_leaked: !driver_stopped,
        }
    }

    pub fn shutdown(&self) {
        let report = self.teardown();
        if let Some(name) = report.module {
            tracing::info!("Module {} shut down", name);
        }
    }
}

impl Drop for ModuleRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drive(mut firmware: Box<dyn Firmware>, board: &Board, wait: &InterruptibleWait, pacing: Duration) {
    wait.claim();
    let name = firmware.name().to_string();
    if catch_unwind(AssertUnwindSafe(|| firmware.setup(board))).is_err() {
        tracing::error!("setup() of {} panicked, module stopped", name);
    } else {
        while !wait.is_stopped() {
            if catch_unwind(AssertUnwindSafe(|| firmware.run_loop(board))).is_err() {
                tracing::error!("loop() of {} panicked, module stopped", name);
                break;
            }
            if wait.sleep(pacing) {
                break;
            }
        }
    }
    wait.finish();
    tracing::debug!("Driver of {} exiting", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn runtime() -> ModuleRuntime {
        ModuleRuntime::with_timing(Board::new(), Duration::from_millis(1), Duration::from_millis(100))
    }

    fn counting(name: &str, setups: Arc<AtomicUsize>, loops: Arc<AtomicUsize>) -> Box<dyn Firmware> {
        Box::new(FnFirmware::new(
            name,
            move |_: &Board| {
                setups.fetch_add(1, Ordering::SeqCst);
            },
            move |_: &Board| {
                loops.fetch_add(1, Ordering::SeqCst);
            },
        ))
    }

    fn wait_for(count: &AtomicUsize, at_least: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < at_least && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_setup_once_then_loop() {
        let rt = runtime();
        assert_eq!(rt.state(), ModuleState::Idle);
        let (setups, loops) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        rt.start(counting("a", setups.clone(), loops.clone())).unwrap();
        wait_for(&loops, 5);
        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert_eq!(rt.state(), ModuleState::Running);
        assert_eq!(rt.current_module().as_deref(), Some("a"));

        let report = rt.teardown();
        assert_eq!(report.module.as_deref(), Some("a"));
        assert!(!report.driver_leaked);
        assert_eq!(rt.state(), ModuleState::Idle);
        let frozen = loops.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(loops.load(Ordering::SeqCst), frozen);
    }

    #[test]
    fn test_loop_runs_before_pacing_sleep() {
        let rt = ModuleRuntime::with_timing(Board::new(), Duration::from_secs(30), Duration::from_millis(100));
        let (setups, loops) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        rt.start(counting("slow", setups, loops.clone())).unwrap();
        wait_for(&loops, 1);
        assert_eq!(loops.load(Ordering::SeqCst), 1);
        let started = Instant::now();
        rt.teardown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_teardown_without_module_is_noop() {
        let rt = runtime();
        assert_eq!(rt.teardown(), TeardownReport::default());
        assert_eq!(rt.state(), ModuleState::Idle);
    }

    #[test]
    fn test_failed_load_leaves_runtime_idle() {
        let rt = runtime();
        let (setups, loops) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        rt.start(counting("a", setups, loops.clone())).unwrap();
        wait_for(&loops, 1);
        assert!(rt.load("/nonexistent/libnothing.so").is_err());
        assert_eq!(rt.state(), ModuleState::Idle);
        assert_eq!(rt.current_module(), None);
        let frozen = loops.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(loops.load(Ordering::SeqCst), frozen);
    }

    #[test]
    fn test_stuck_loop_is_reported_as_leaked() {
        let rt = ModuleRuntime::with_timing(Board::new(), Duration::from_millis(1), Duration::from_millis(20));
        let entered = Arc::new(AtomicUsize::new(0));
        let e = entered.clone();
        rt.start(Box::new(FnFirmware::new(
            "stuck",
            |_: &Board| {},
            move |_: &Board| {
                e.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
            },
        )))
        .unwrap();
        wait_for(&entered, 1);
        let report = rt.teardown();
        assert!(report.driver_leaked);
        assert_eq!(rt.state(), ModuleState::Idle);
        thread::sleep(Duration::from_millis(400));
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_setup_stops_module() {
        let rt = runtime();
        rt.start(Box::new(FnFirmware::new(
            "broken",
            |_: &Board| panic!("setup failed"),
            |_: &Board| {},
        )))
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while rt.state() == ModuleState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(rt.state(), ModuleState::Idle);
    }

    #[test]
    fn test_firmware_sees_module_view() {
        let rt = runtime();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let view = Arc::new(Mutex::new(None));
        let v = view.clone();
        rt.start(Box::new(FnFirmware::new(
            "view",
            move |board: &Board| {
                *v.lock().unwrap() = Some(board.clone());
                s.fetch_add(1, Ordering::SeqCst);
            },
            |_: &Board| {},
        )))
        .unwrap();
        wait_for(&seen, 1);
        let board = view.lock().unwrap().clone().unwrap();
        assert!(board.is_active());
        rt.teardown();
        assert!(!board.is_active());
        assert!(rt.board().is_active());
    }

    #[test]
    fn test_teardown_clears_interrupt_bindings() {
        let rt = runtime();
        let setups = Arc::new(AtomicUsize::new(0));
        let s = setups.clone();
        rt.start(Box::new(FnFirmware::new(
            "isr",
            move |board: &Board| {
                board.attach_interrupt(17, Arc::new(|| {}), Default::default());
                s.fetch_add(1, Ordering::SeqCst);
            },
            |_: &Board| {},
        )))
        .unwrap();
        wait_for(&setups, 1);
        assert!(rt.board().pins.trigger(17));
        rt.teardown();
        assert!(!rt.board().pins.trigger(17));
    }
}
