// src/hardware/ir.rs - IR receiver fed by injected remote-control codes
use std::sync::atomic::{AtomicU32, Ordering};

/// Holds the last injected code until firmware resumes the receiver.
/// Zero means nothing pending.
#[derive(Debug, Default)]
pub struct IrReceiver {
    pending: AtomicU32,
}

impl IrReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the shell when a remote key is pressed.
    pub fn inject(&self, code: u32) {
        tracing::debug!("IR code {:#08X} injected", code);
        self.pending.store(code, Ordering::Release);
    }

    /// The pending code, if any. Stays available until [`resume`](Self::resume).
    pub fn decode(&self) -> Option<u32> {
        match self.pending.load(Ordering::Acquire) {
            0 => None,
            code => Some(code),
        }
    }

    pub fn resume(&self) {
        self.pending.store(0, Ordering::Release);
    }
}
