// src/hardware/serial.rs - Emulated USB serial console
use super::{ByteSink, SinkSlot};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Serial traffic statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialStats {
    pub writes: u64,
    pub bytes_sent: u64,
    /// Bytes written while no sink was wired.
    pub bytes_dropped: u64,
}

/// Serial port as seen by firmware. Output goes verbatim to the wired sink,
/// or nowhere when none is wired.
#[derive(Default)]
pub struct Serial {
    sink: SinkSlot,
    stats: Mutex<SerialStats>,
}

impl Serial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sink(&self, sink: ByteSink) {
        self.sink.set(sink);
    }

    /// Baud rate is meaningless on the host.
    pub fn begin(&self, baud: u32) {
        tracing::debug!("Serial.begin({})", baud);
    }

    pub fn write(&self, bytes: &[u8]) {
        let delivered = self.sink.emit(bytes);
        tracing::trace!("Serial TX {} bytes (delivered: {})", bytes.len(), delivered);
        let mut stats = self.stats();
        stats.writes += 1;
        if delivered {
            stats.bytes_sent += bytes.len() as u64;
        } else {
            stats.bytes_dropped += bytes.len() as u64;
        }
    }

    pub fn print(&self, text: &str) {
        self.write(text.as_bytes());
    }

    pub fn println(&self, text: &str) {
        self.write(format!("{}\n", text).as_bytes());
    }

    /// `Serial.printf` equivalent: `serial.print_fmt(format_args!(...))`.
    pub fn print_fmt(&self, args: fmt::Arguments<'_>) {
        match args.as_str() {
            Some(text) => self.print(text),
            None => self.print(&args.to_string()),
        }
    }

    fn stats(&self) -> MutexGuard<'_, SerialStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_stats(&self) -> SerialStats {
        self.stats().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats() = SerialStats::default();
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serial")
            .field("wired", &self.sink.is_set())
            .field("stats", &self.get_stats())
            .finish()
    }
}
