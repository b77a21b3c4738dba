//! Firmware-side wrapper around [`HostApi`].
//!
//! A module records the table it receives in `setup` with [`install`]; code
//! running later (loop body, timer callbacks, interrupt handlers) reaches the
//! board through [`host`].

use crate::abi::{HostApi, IsrFn, TmElements};
use std::ffi::{CStr, CString, c_char};
use std::fmt;
use std::sync::atomic::{AtomicPtr, Ordering};

static HOST: AtomicPtr<HostApi> = AtomicPtr::new(std::ptr::null_mut());

/// Remember the host table handed to an entry point.
///
/// One slot per mapping of the module: timer and interrupt callbacks carry no
/// table argument and read it from here.
pub fn install(api: *const HostApi) {
    HOST.store(api as *mut HostApi, Ordering::Release);
}

/// The table recorded by [`install`], if any.
pub fn host() -> Option<Host> {
    let ptr = HOST.load(Ordering::Acquire);
    // The host keeps the table alive while any thread of this module runs.
    unsafe { ptr.as_ref() }.map(|api| Host { api })
}

#[derive(Clone, Copy)]
pub struct Host {
    api: &'static HostApi,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("abi_version", &self.api.abi_version)
            .finish()
    }
}

impl Host {
    pub fn serial_write(&self, bytes: &[u8]) {
        (self.api.serial_write)(self.api.ctx, bytes.as_ptr(), bytes.len());
    }

    pub fn serial_print(&self, text: &str) {
        self.serial_write(text.as_bytes());
    }

    pub fn serial_println(&self, text: &str) {
        self.serial_write(format!("{}\n", text).as_bytes());
    }

    pub fn lcd_set_cursor(&self, col: i32, row: i32) {
        (self.api.lcd_set_cursor)(self.api.ctx, col, row);
    }

    pub fn lcd_print(&self, text: &str) {
        (self.api.lcd_print)(self.api.ctx, text.as_ptr(), text.len());
    }

    pub fn lcd_clear(&self) {
        (self.api.lcd_clear)(self.api.ctx);
    }

    pub fn sd_begin(&self) -> bool {
        (self.api.sd_begin)(self.api.ctx)
    }

    pub fn sd_exists(&self, path: &str) -> bool {
        match CString::new(path) {
            Ok(path) => (self.api.sd_exists)(self.api.ctx, path.as_ptr()),
            Err(_) => false,
        }
    }

    pub fn sd_open(&self, path: &str, mode: i32) -> File {
        let fd = match CString::new(path) {
            Ok(path) => (self.api.sd_open)(self.api.ctx, path.as_ptr(), mode),
            Err(_) => -1,
        };
        File { host: *self, fd }
    }

    pub fn rtc_read(&self) -> TmElements {
        let mut tm = TmElements::default();
        (self.api.rtc_read)(self.api.ctx, &mut tm);
        tm
    }

    pub fn ir_decode(&self) -> Option<u32> {
        let mut value = 0u32;
        (self.api.ir_decode)(self.api.ctx, &mut value).then_some(value)
    }

    pub fn ir_resume(&self) {
        (self.api.ir_resume)(self.api.ctx);
    }

    pub fn audio_play(&self, name: &str) {
        if let Ok(name) = CString::new(name) {
            (self.api.audio_play)(self.api.ctx, name.as_ptr());
        }
    }

    pub fn audio_stop(&self) {
        (self.api.audio_stop)(self.api.ctx);
    }

    pub fn audio_is_playing(&self) -> bool {
        (self.api.audio_is_playing)(self.api.ctx)
    }

    pub fn pin_mode(&self, pin: i32, mode: i32) {
        (self.api.pin_mode)(self.api.ctx, pin, mode);
    }

    pub fn digital_write(&self, pin: i32, value: i32) {
        (self.api.digital_write)(self.api.ctx, pin, value);
    }

    pub fn attach_interrupt(&self, pin: i32, handler: IsrFn, mode: i32) {
        (self.api.attach_interrupt)(self.api.ctx, pin, handler, mode);
    }

    pub fn delay(&self, ms: u32) {
        (self.api.delay_ms)(self.api.ctx, ms);
    }

    pub fn millis(&self) -> u32 {
        (self.api.millis)(self.api.ctx)
    }
}

/// SD file handle as seen by firmware. Copies share the descriptor.
#[derive(Debug, Clone, Copy)]
pub struct File {
    host: Host,
    fd: i32,
}

impl File {
    pub fn is_valid(&self) -> bool {
        self.fd >= 0
    }

    pub fn fd(&self) -> i32 {
        self.fd
    }

    pub fn read(&self, buf: &mut [u8]) -> isize {
        (self.host.api.file_read)(self.host.api.ctx, self.fd, buf.as_mut_ptr(), buf.len())
    }

    pub fn write(&self, bytes: &[u8]) -> isize {
        (self.host.api.file_write)(self.host.api.ctx, self.fd, bytes.as_ptr(), bytes.len())
    }

    pub fn is_directory(&self) -> bool {
        (self.host.api.file_is_directory)(self.host.api.ctx, self.fd)
    }

    pub fn name(&self) -> Option<String> {
        let mut buf = [0 as c_char; 256];
        let len = (self.host.api.file_name)(self.host.api.ctx, self.fd, buf.as_mut_ptr(), buf.len());
        if len < 0 {
            return None;
        }
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Some(name.to_string_lossy().into_owned())
    }

    pub fn open_next_file(&self) -> File {
        let fd = (self.host.api.file_open_next)(self.host.api.ctx, self.fd);
        File { host: self.host, fd }
    }

    pub fn flush(&self) {
        (self.host.api.file_flush)(self.host.api.ctx, self.fd);
    }

    pub fn close(self) {
        (self.host.api.file_close)(self.host.api.ctx, self.fd);
    }
}

/// Periodic timer. Its address is the identity the host keys it by, so
/// instances are meant to live in statics.
#[derive(Debug, Default)]
pub struct IntervalTimer {
    _slot: u8,
}

impl IntervalTimer {
    pub const fn new() -> Self {
        Self { _slot: 0 }
    }

    fn id(&'static self) -> usize {
        self as *const Self as usize
    }

    pub fn begin(&'static self, callback: IsrFn, period_us: u32) -> bool {
        match host() {
            Some(h) => (h.api.timer_begin)(h.api.ctx, self.id(), callback, period_us),
            None => false,
        }
    }

    pub fn end(&'static self) {
        if let Some(h) = host() {
            (h.api.timer_end)(h.api.ctx, self.id());
        }
    }
}

/// Export a [`ModuleDescriptor`](crate::abi::ModuleDescriptor) for the given
/// entry points under the symbol the host looks for.
#[macro_export]
macro_rules! declare_module {
    ($name:expr, $setup:path, $loop_fn:path) => {
        #[unsafe(no_mangle)]
        #[allow(non_upper_case_globals)]
        pub static teensy_module_v1: $crate::abi::ModuleDescriptor = $crate::abi::ModuleDescriptor {
            abi_version: $crate::abi::ABI_VERSION,
            name: $name.as_ptr(),
            setup: $setup,
            loop_fn: $loop_fn,
        };
    };
}
