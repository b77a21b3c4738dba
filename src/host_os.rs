// src/host_os.rs - Emulator host: the surface a shell (GUI or console) drives
use crate::config::EmulatorConfig;
use crate::hardware::{Board, ByteSink, PinObserver};
use crate::module_manager::{ModuleRuntime, ModuleState};

/// One emulated board plus the runtime driving its firmware.
///
/// A shell supplies paths and sinks and injects stimuli; everything else
/// happens on the runtime's own threads. Dropping the host tears the running
/// module down.
#[derive(Debug)]
pub struct EmulatorHost {
    runtime: ModuleRuntime,
}

impl EmulatorHost {
    pub fn new(config: &EmulatorConfig) -> Self {
        let board = Board::new();
        if let Some(root) = &config.emulator.sd_root {
            board.sd.set_root(root);
        }
        Self {
            runtime: ModuleRuntime::new(board, &config.emulator),
        }
    }

    pub fn board(&self) -> &Board {
        self.runtime.board()
    }

    pub fn runtime(&self) -> &ModuleRuntime {
        &self.runtime
    }

    /// Swap in the module at `path`. Failures are logged and reported as
    /// `false`; any previously running module is stopped either way.
    pub fn load(&self, path: &str) -> bool {
        match self.runtime.load(path) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to load {}: {}", path, e);
                false
            }
        }
    }

    pub fn state(&self) -> ModuleState {
        self.runtime.state()
    }

    /// Not validated here; firmware sees a bad root as failing SD calls.
    pub fn set_sd_root(&self, path: &str) {
        self.board().sd.set_root(path);
    }

    pub fn set_serial_sink(&self, sink: ByteSink) {
        self.board().serial.set_sink(sink);
    }

    pub fn set_lcd_sink(&self, sink: ByteSink) {
        self.board().lcd.set_sink(sink);
    }

    pub fn observe_pin(&self, pin: i32, observer: PinObserver) {
        self.board().pins.observe(pin, observer);
    }

    /// Run the handler bound to `pin` on the calling thread. The mode is
    /// accepted for API parity and not interpreted.
    pub fn trigger_interrupt(&self, pin: i32, mode: i32) -> bool {
        tracing::debug!("Interrupt requested on pin {} (mode {})", pin, mode);
        self.board().pins.trigger(pin)
    }

    pub fn inject_ir_code(&self, code: u32) {
        self.board().ir.inject(code);
    }

    pub fn shutdown(&self) {
        self.runtime.shutdown();
    }
}
