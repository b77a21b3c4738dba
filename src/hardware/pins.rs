// src/hardware/pins.rs - Pin interrupt bindings and digital-write observers
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub type InterruptHandler = Arc<dyn Fn() + Send + Sync>;
pub type PinObserver = Arc<dyn Fn(i32) + Send + Sync>;

/// Trigger mode passed to `attachInterrupt`. Recorded, not interpreted:
/// a trigger always calls the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptMode {
    Low,
    Change,
    #[default]
    Falling,
    Rising,
    High,
}

impl InterruptMode {
    pub fn from_raw(mode: i32) -> Self {
        match mode {
            0 => InterruptMode::Low,
            1 => InterruptMode::Change,
            3 => InterruptMode::Rising,
            4 => InterruptMode::High,
            _ => InterruptMode::Falling,
        }
    }
}

struct Binding {
    handler: InterruptHandler,
    mode: InterruptMode,
}

/// Pin tables. Registering for a pin replaces what was there. Dispatch runs
/// on the caller's thread with no lock held, so handlers may re-register.
#[derive(Default)]
pub struct PinTable {
    interrupts: Mutex<HashMap<i32, Binding>>,
    observers: Mutex<HashMap<i32, PinObserver>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl PinTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, pin: i32, handler: InterruptHandler, mode: InterruptMode) {
        tracing::debug!("attachInterrupt(pin {}, {:?})", pin, mode);
        lock(&self.interrupts).insert(pin, Binding { handler, mode });
    }

    /// Remove the binding for `pin` only if it still holds `handler`.
    pub fn detach_handler(&self, pin: i32, handler: &InterruptHandler) -> bool {
        let mut interrupts = lock(&self.interrupts);
        match interrupts.get(&pin) {
            Some(binding) if Arc::ptr_eq(&binding.handler, handler) => {
                interrupts.remove(&pin);
                true
            }
            _ => false,
        }
    }

    pub fn interrupt_mode(&self, pin: i32) -> Option<InterruptMode> {
        lock(&self.interrupts).get(&pin).map(|b| b.mode)
    }

    /// Run the handler bound to `pin`. Returns whether one was bound.
    pub fn trigger(&self, pin: i32) -> bool {
        let handler = lock(&self.interrupts).get(&pin).map(|b| b.handler.clone());
        match handler {
            Some(handler) => {
                tracing::trace!("Interrupt on pin {}", pin);
                handler();
                true
            }
            None => false,
        }
    }

    /// Drop every interrupt binding. Observers belong to the shell and stay.
    pub fn clear_interrupts(&self) {
        lock(&self.interrupts).clear();
    }

    pub fn observe(&self, pin: i32, observer: PinObserver) {
        lock(&self.observers).insert(pin, observer);
    }

    /// Report a digital write to the pin's observer. Returns whether one was
    /// registered.
    pub fn write(&self, pin: i32, value: i32) -> bool {
        let observer = lock(&self.observers).get(&pin).cloned();
        match observer {
            Some(observer) => {
                observer(value);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for PinTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut interrupts: Vec<i32> = lock(&self.interrupts).keys().copied().collect();
        let mut observers: Vec<i32> = lock(&self.observers).keys().copied().collect();
        interrupts.sort_unstable();
        observers.sort_unstable();
        f.debug_struct("PinTable")
            .field("interrupts", &interrupts)
            .field("observers", &observers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    #[test]
    fn test_trigger_without_handler_is_noop() {
        let pins = PinTable::new();
        assert!(!pins.trigger(17));
        assert!(!pins.write(9, 1));
    }

    #[test]
    fn test_attach_replaces_previous_handler() {
        let pins = PinTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        pins.attach(17, Arc::new(|| panic!("replaced handler ran")), InterruptMode::Falling);
        let h = hits.clone();
        pins.attach(17, Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }), InterruptMode::from_raw(2));
        assert!(pins.trigger(17));
        assert!(pins.trigger(17));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(pins.interrupt_mode(17), Some(InterruptMode::Falling));
    }

    #[test]
    fn test_observer_receives_written_value() {
        let pins = PinTable::new();
        let last = Arc::new(AtomicI32::new(-1));
        let l = last.clone();
        pins.observe(9, Arc::new(move |v| l.store(v, Ordering::SeqCst)));
        assert!(pins.write(9, 1));
        assert_eq!(last.load(Ordering::SeqCst), 1);
        assert!(pins.write(9, 0));
        assert_eq!(last.load(Ordering::SeqCst), 0);
        assert!(!pins.write(10, 1));
    }

    #[test]
    fn test_handler_may_rebind_its_own_pin() {
        let pins = Arc::new(PinTable::new());
        let p = pins.clone();
        pins.attach(2, Arc::new(move || {
            p.attach(2, Arc::new(|| {}), InterruptMode::Rising);
        }), InterruptMode::Falling);
        assert!(pins.trigger(2));
        assert_eq!(pins.interrupt_mode(2), Some(InterruptMode::Rising));
    }

    #[test]
    fn test_detach_handler_leaves_newer_binding() {
        let pins = PinTable::new();
        let old: InterruptHandler = Arc::new(|| {});
        let new: InterruptHandler = Arc::new(|| {});
        pins.attach(5, old.clone(), InterruptMode::Falling);
        pins.attach(5, new.clone(), InterruptMode::Change);
        assert!(!pins.detach_handler(5, &old));
        assert_eq!(pins.interrupt_mode(5), Some(InterruptMode::Change));
        assert!(pins.detach_handler(5, &new));
        assert!(!pins.trigger(5));
    }

    #[test]
    fn test_clear_interrupts_keeps_observers() {
        let pins = PinTable::new();
        pins.attach(17, Arc::new(|| {}), InterruptMode::Falling);
        pins.observe(9, Arc::new(|_| {}));
        pins.clear_interrupts();
        assert!(!pins.trigger(17));
        assert!(pins.write(9, 1));
    }
}
