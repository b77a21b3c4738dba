//! Plugin ABI between the emulator host and a firmware module.
//!
//! A module is a shared object exporting [`DESCRIPTOR_SYMBOL`], a
//! `#[repr(C)]` [`ModuleDescriptor`]. The host calls `setup` once and then
//! `loop_fn` repeatedly, each time handing over a pointer to its
//! [`HostApi`] table. Everything a firmware can do to the emulated board goes
//! through that table.
//!
//! Modules built by the historical C++ toolchain are still accepted: when the
//! descriptor is missing the host looks for [`LEGACY_SETUP_SYMBOL`] and
//! [`LEGACY_LOOP_SYMBOL`] and calls them without arguments.

use std::ffi::{c_char, c_void};

/// Bumped whenever the layout of [`HostApi`] or [`ModuleDescriptor`] changes.
pub const ABI_VERSION: u32 = 1;

pub const DESCRIPTOR_SYMBOL: &[u8] = b"teensy_module_v1\0";
pub const LEGACY_SETUP_SYMBOL: &[u8] = b"_Z5setupv\0";
pub const LEGACY_LOOP_SYMBOL: &[u8] = b"_Z4loopv\0";

pub const LOW: i32 = 0;
pub const HIGH: i32 = 1;

pub const INPUT: i32 = 0;
pub const OUTPUT: i32 = 1;
pub const INPUT_PULLUP: i32 = 2;

pub const INT_LOW: i32 = 0;
pub const INT_CHANGE: i32 = 1;
pub const INT_FALLING: i32 = 2;
pub const INT_RISING: i32 = 3;
pub const INT_HIGH: i32 = 4;

pub const FILE_READ: i32 = 0;
pub const FILE_WRITE: i32 = 2;

/// Zero-argument callback used for interval timers and pin interrupts.
pub type IsrFn = extern "C" fn();

/// Entry point signature of a descriptor-based module.
pub type EntryFn = extern "C" fn(*const HostApi);

/// Entry point signature of a legacy module (`void setup()` / `void loop()`).
pub type LegacyEntryFn = extern "C" fn();

/// Decomposed wall-clock time, laid out like the DS1307 library's struct.
///
/// `year` counts from 1970. `wday` is 0 for Sunday.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TmElements {
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub wday: u8,
    pub day: u8,
    pub month: u8,
    pub year: u8,
}

/// Exported by every module under [`DESCRIPTOR_SYMBOL`].
#[repr(C)]
pub struct ModuleDescriptor {
    pub abi_version: u32,
    /// NUL-terminated display name, may be null.
    pub name: *const c_char,
    pub setup: EntryFn,
    pub loop_fn: EntryFn,
}

// The descriptor is immutable static data.
unsafe impl Sync for ModuleDescriptor {}

/// Function table the host hands to a module.
///
/// Every function takes `ctx` as its first argument; modules must pass back
/// the value found in [`HostApi::ctx`] untouched. File handles are plain
/// descriptors, negative when invalid.
#[repr(C)]
pub struct HostApi {
    pub abi_version: u32,
    pub ctx: *const c_void,

    pub serial_write: extern "C" fn(*const c_void, *const u8, usize),

    pub lcd_set_cursor: extern "C" fn(*const c_void, i32, i32),
    pub lcd_print: extern "C" fn(*const c_void, *const u8, usize),
    pub lcd_clear: extern "C" fn(*const c_void),

    pub sd_begin: extern "C" fn(*const c_void) -> bool,
    pub sd_exists: extern "C" fn(*const c_void, *const c_char) -> bool,
    pub sd_open: extern "C" fn(*const c_void, *const c_char, i32) -> i32,

    pub file_read: extern "C" fn(*const c_void, i32, *mut u8, usize) -> isize,
    pub file_write: extern "C" fn(*const c_void, i32, *const u8, usize) -> isize,
    pub file_is_directory: extern "C" fn(*const c_void, i32) -> bool,
    /// Copies the NUL-terminated base name into the buffer, returns its
    /// length without the terminator or -1.
    pub file_name: extern "C" fn(*const c_void, i32, *mut c_char, usize) -> isize,
    pub file_open_next: extern "C" fn(*const c_void, i32) -> i32,
    pub file_flush: extern "C" fn(*const c_void, i32),
    pub file_close: extern "C" fn(*const c_void, i32),

    pub rtc_read: extern "C" fn(*const c_void, *mut TmElements),
    pub rtc_write: extern "C" fn(*const c_void, *const TmElements),

    pub ir_decode: extern "C" fn(*const c_void, *mut u32) -> bool,
    pub ir_resume: extern "C" fn(*const c_void),

    pub audio_play: extern "C" fn(*const c_void, *const c_char),
    pub audio_stop: extern "C" fn(*const c_void),
    pub audio_is_playing: extern "C" fn(*const c_void) -> bool,

    pub pin_mode: extern "C" fn(*const c_void, i32, i32),
    pub digital_write: extern "C" fn(*const c_void, i32, i32),
    pub attach_interrupt: extern "C" fn(*const c_void, i32, IsrFn, i32),
    pub delay_ms: extern "C" fn(*const c_void, u32),
    pub millis: extern "C" fn(*const c_void) -> u32,

    /// `id` identifies the timer instance (its address on the firmware side).
    pub timer_begin: extern "C" fn(*const c_void, usize, IsrFn, u32) -> bool,
    pub timer_end: extern "C" fn(*const c_void, usize),
}
