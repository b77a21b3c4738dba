// src/scheduler/mod.rs - Timing primitives behind the emulated timers
pub mod interruptible;
pub mod timer;

pub use interruptible::InterruptibleWait;
pub use timer::{TimerCallback, TimerId, TimerRegistry};
