// src/hardware/mod.rs - Emulated board: the peripheral context firmware runs against
pub mod audio;
pub mod ir;
pub mod lcd;
pub mod pins;
pub mod rtc;
pub mod sd;
pub mod serial;

use crate::scheduler::{TimerCallback, TimerId, TimerRegistry};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

pub use audio::AudioPlayer;
pub use ir::IrReceiver;
pub use lcd::Lcd;
pub use pins::{InterruptHandler, InterruptMode, PinObserver, PinTable};
pub use rtc::{Rtc, TmElements};
pub use sd::{OpenMode, SdCard, SdFile};
pub use serial::{Serial, SerialStats};

/// Receiver of raw peripheral output (serial bytes, LCD frames).
pub type ByteSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Replaceable output sink. The sink is cloned out before it is called, so
/// a sink may rewire itself and a slow sink never blocks rewiring.
#[derive(Default)]
pub struct SinkSlot(RwLock<Option<ByteSink>>);

impl SinkSlot {
    pub fn set(&self, sink: ByteSink) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    pub fn is_set(&self) -> bool {
        self.0.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Deliver `bytes` to the sink. Returns `false` when none is wired.
    pub fn emit(&self, bytes: &[u8]) -> bool {
        let sink = self.0.read().unwrap_or_else(|e| e.into_inner()).clone();
        match sink {
            Some(sink) => {
                sink(bytes);
                true
            }
            None => false,
        }
    }
}

/// The emulated board.
///
/// One instance stands for the whole hardware surface the firmware sees.
/// Clones share every peripheral, so the driver thread, timer threads and
/// the shell each hold their own handle to the same board.
///
/// A module runs against a view made by [`Board::for_module`]. Once its
/// flag is cleared the view's pin and timer methods do nothing, and the
/// handlers and callbacks registered through it stop firing. The public
/// peripheral fields are not gated.
#[derive(Clone)]
pub struct Board {
    pub serial: Arc<Serial>,
    pub lcd: Arc<Lcd>,
    pub sd: Arc<SdCard>,
    pub rtc: Rtc,
    pub ir: Arc<IrReceiver>,
    pub audio: Arc<AudioPlayer>,
    pub pins: Arc<PinTable>,
    pub timers: Arc<TimerRegistry>,
    started: Instant,
    gate: Option<Arc<AtomicBool>>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self {
            serial: Arc::new(Serial::new()),
            lcd: Arc::new(Lcd::new()),
            sd: Arc::new(SdCard::new()),
            rtc: Rtc::new(),
            ir: Arc::new(IrReceiver::new()),
            audio: Arc::new(AudioPlayer::new()),
            pins: Arc::new(PinTable::new()),
            timers: Arc::new(TimerRegistry::new()),
            started: Instant::now(),
            gate: None,
        }
    }

    /// A view of this board for one module, live while `active` is set.
    pub fn for_module(&self, active: Arc<AtomicBool>) -> Board {
        Board {
            gate: Some(active),
            ..self.clone()
        }
    }

    /// Always true for an ungated board.
    pub fn is_active(&self) -> bool {
        self.gate.as_ref().is_none_or(|gate| gate.load(Ordering::Acquire))
    }

    /// Pin modes are not emulated.
    pub fn pin_mode(&self, pin: i32, mode: i32) {
        tracing::trace!("pinMode({}, {}) ignored", pin, mode);
    }

    pub fn digital_write(&self, pin: i32, value: i32) {
        if self.is_active() {
            self.pins.write(pin, value);
        }
    }

    pub fn attach_interrupt(&self, pin: i32, handler: InterruptHandler, mode: InterruptMode) {
        let Some(gate) = &self.gate else {
            self.pins.attach(pin, handler, mode);
            return;
        };
        if !self.is_active() {
            tracing::debug!("attachInterrupt(pin {}) from a stopped module ignored", pin);
            return;
        }
        let gated: InterruptHandler = {
            let gate = gate.clone();
            Arc::new(move || {
                if gate.load(Ordering::Acquire) {
                    handler();
                }
            })
        };
        self.pins.attach(pin, gated.clone(), mode);
        // Teardown may have cleared the pins between the check and the attach.
        if !self.is_active() {
            self.pins.detach_handler(pin, &gated);
        }
    }

    pub fn delay(&self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }

    /// Milliseconds since the board was created, wrapping like the device
    /// counter does after ~49 days.
    pub fn millis(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    pub fn begin_timer(&self, id: TimerId, callback: TimerCallback, period_us: u32) -> bool {
        let Some(gate) = &self.gate else {
            return self.timers.begin(id, callback, period_us);
        };
        if !self.is_active() {
            tracing::debug!("Timer {} from a stopped module ignored", id);
            return false;
        }
        let gated: TimerCallback = {
            let gate = gate.clone();
            Arc::new(move || {
                if gate.load(Ordering::Acquire) {
                    callback();
                }
            })
        };
        if !self.timers.begin(id, gated.clone(), period_us) {
            return false;
        }
        // Same window as in `attach_interrupt`, against the timer reset.
        if !self.is_active() {
            self.timers.end_callback(id, &gated);
            return false;
        }
        true
    }

    pub fn end_timer(&self, id: TimerId) {
        if self.is_active() {
            self.timers.end(id);
        }
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("serial", &self.serial)
            .field("lcd", &self.lcd)
            .field("sd_root", &self.sd.root())
            .field("pins", &self.pins)
            .field("timers", &self.timers)
            .field("audio_playing", &self.audio.is_playing())
            .field("active", &self.is_active())
            .finish()
    }
}
