// src/abi.rs - Host side of the plugin ABI: loads modules, serves their HostApi calls
use crate::hardware::{Board, InterruptMode, OpenMode, SdFile};
use crate::module_manager::{Firmware, LoadError};
use crate::scheduler::TimerId;
use libloading::os::unix::Library;
use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_void};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use teensy_shared::abi::{
    ABI_VERSION, DESCRIPTOR_SYMBOL, EntryFn, HostApi, IsrFn, LEGACY_LOOP_SYMBOL,
    LEGACY_SETUP_SYMBOL, LegacyEntryFn, ModuleDescriptor, TmElements,
};

#[derive(Clone, Copy)]
enum Entry {
    Descriptor { setup: EntryFn, loop_fn: EntryFn },
    Legacy { setup: LegacyEntryFn, loop_fn: LegacyEntryFn },
}

/// Everything one loaded module talks to.
///
/// Lives behind an `Arc` held by the driver and by every timer and interrupt
/// callback the module registered; the shared object is unloaded only when
/// the last of them is gone. Once the module is torn down `active` is
/// cleared and every call that would touch the board does nothing.
pub struct ModuleHost {
    api: HostApi,
    board: Board,
    active: Arc<AtomicBool>,
    files: Mutex<HashMap<i32, SdFile>>,
    name: String,
    // Declared last so it is dropped after everything that may point into it.
    _library: Option<Library>,
}

// SAFETY: `api` only holds function pointers and a pointer to this very
// value; all mutable state is behind locks or atomics.
unsafe impl Send for ModuleHost {}
unsafe impl Sync for ModuleHost {}

impl fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHost")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .field("open_files", &self.files().len())
            .finish()
    }
}

impl ModuleHost {
    pub fn new(name: &str, board: Board, active: Arc<AtomicBool>, library: Option<Library>) -> Arc<Self> {
        Arc::new_cyclic(|me| ModuleHost {
            api: host_api(me.as_ptr() as *const c_void),
            board,
            active,
            files: Mutex::new(HashMap::new()),
            name: name.to_string(),
            _library: library,
        })
    }

    pub fn api(&self) -> *const HostApi {
        &self.api
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn files(&self) -> MutexGuard<'_, HashMap<i32, SdFile>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn open_file_count(&self) -> usize {
        self.files().len()
    }

    fn register(&self, file: SdFile) -> i32 {
        let fd = file.fd();
        if fd >= 0 {
            self.files().insert(fd, file);
        }
        fd
    }
}

/// A shared object loaded as firmware.
pub struct DylibFirmware {
    host: Arc<ModuleHost>,
    entry: Entry,
}

impl fmt::Debug for DylibFirmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let legacy = matches!(self.entry, Entry::Legacy { .. });
        f.debug_struct("DylibFirmware")
            .field("host", &self.host)
            .field("legacy", &legacy)
            .finish()
    }
}

impl DylibFirmware {
    /// Load the module at `path` and resolve its entry points.
    ///
    /// Modules exporting a descriptor get the host table on every call.
    /// Otherwise the legacy `setup()`/`loop()` symbols are used.
    pub fn open(path: &str, board: Board, active: Arc<AtomicBool>) -> Result<Self, LoadError> {
        let library = open_library(path)?;
        let fallback_name = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let (entry, name) = unsafe { resolve(&library) }?;
        let name = name.unwrap_or(fallback_name);
        tracing::info!(
            "Resolved module {} ({})",
            name,
            if matches!(entry, Entry::Legacy { .. }) { "legacy entry points" } else { "ABI v1" }
        );
        Ok(Self {
            host: ModuleHost::new(&name, board, active, Some(library)),
            entry,
        })
    }

    pub fn host(&self) -> &Arc<ModuleHost> {
        &self.host
    }
}

const DLOPEN_FLAGS: i32 = libc::RTLD_NOW | libc::RTLD_LOCAL;

static STAGED: AtomicUsize = AtomicUsize::new(0);

/// Open `path` through a private copy of the file.
///
/// `dlopen` returns the mapping it already holds for a path, statics and
/// all, so loading the same module twice would hand the new instance the
/// state of a previous one that may still have a leaked thread running.
/// A copy gets its own mapping. The copy is unlinked as soon as it is
/// mapped. Names that are not a file on disk go to the loader's search
/// path unchanged, and a copy that cannot be mapped (a `noexec` temp
/// directory) falls back to the original path.
fn open_library(path: &str) -> Result<Library, LoadError> {
    let source = Path::new(path);
    if !source.is_file() {
        return Ok(unsafe { Library::open(Some(path), DLOPEN_FLAGS) }?);
    }
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staged = std::env::temp_dir().join(format!(
        "teensy-emu-{}-{}-{}",
        std::process::id(),
        STAGED.fetch_add(1, Ordering::Relaxed),
        file_name
    ));
    std::fs::copy(source, &staged).map_err(LoadError::Stage)?;
    let library = unsafe { Library::open(Some(&staged), DLOPEN_FLAGS) };
    if let Err(e) = std::fs::remove_file(&staged) {
        tracing::warn!("Could not remove staged module {}: {}", staged.display(), e);
    }
    match library {
        Ok(library) => {
            tracing::debug!("Mapped {} from {}", path, staged.display());
            Ok(library)
        }
        Err(e) => {
            tracing::debug!("Staged copy of {} not loadable ({}), opening it in place", path, e);
            Ok(unsafe { Library::open(Some(path), DLOPEN_FLAGS) }?)
        }
    }
}

unsafe fn resolve(library: &Library) -> Result<(Entry, Option<String>), LoadError> {
    if let Ok(symbol) = unsafe { library.get::<*const ModuleDescriptor>(DESCRIPTOR_SYMBOL) } {
        let descriptor: *const ModuleDescriptor = *symbol;
        if let Some(descriptor) = unsafe { descriptor.as_ref() } {
            if descriptor.abi_version != ABI_VERSION {
                return Err(LoadError::AbiMismatch {
                    expected: ABI_VERSION,
                    found: descriptor.abi_version,
                });
            }
            let name = unsafe { c_string(descriptor.name) };
            let entry = Entry::Descriptor {
                setup: descriptor.setup,
                loop_fn: descriptor.loop_fn,
            };
            return Ok((entry, name));
        }
    }
    let setup = unsafe { library.get::<LegacyEntryFn>(LEGACY_SETUP_SYMBOL) }
        .map_err(|_| LoadError::MissingEntryPoint("setup"))?;
    let loop_fn = unsafe { library.get::<LegacyEntryFn>(LEGACY_LOOP_SYMBOL) }
        .map_err(|_| LoadError::MissingEntryPoint("loop"))?;
    Ok((
        Entry::Legacy {
            setup: *setup,
            loop_fn: *loop_fn,
        },
        None,
    ))
}

impl Firmware for DylibFirmware {
    fn name(&self) -> &str {
        self.host.name()
    }

    fn setup(&mut self, _board: &Board) {
        match self.entry {
            Entry::Descriptor { setup, .. } => setup(self.host.api()),
            Entry::Legacy { setup, .. } => setup(),
        }
    }

    fn run_loop(&mut self, _board: &Board) {
        match self.entry {
            Entry::Descriptor { loop_fn, .. } => loop_fn(self.host.api()),
            Entry::Legacy { loop_fn, .. } => loop_fn(),
        }
    }
}

fn host_api(ctx: *const c_void) -> HostApi {
    HostApi {
        abi_version: ABI_VERSION,
        ctx,
        serial_write,
        lcd_set_cursor,
        lcd_print,
        lcd_clear,
        sd_begin,
        sd_exists,
        sd_open,
        file_read,
        file_write,
        file_is_directory,
        file_name,
        file_open_next,
        file_flush,
        file_close,
        rtc_read,
        rtc_write,
        ir_decode,
        ir_resume,
        audio_play,
        audio_stop,
        audio_is_playing,
        pin_mode,
        digital_write,
        attach_interrupt,
        delay_ms,
        millis,
        timer_begin,
        timer_end,
    }
}

// Host calls. `ctx` is the `ModuleHost` the table was built for; it stays
// alive for as long as any thread of its module can make a call.

fn host<'a>(ctx: *const c_void) -> Option<&'a ModuleHost> {
    unsafe { (ctx as *const ModuleHost).as_ref() }
}

fn active<'a>(ctx: *const c_void) -> Option<&'a ModuleHost> {
    host(ctx).filter(|h| h.is_active())
}

/// A new strong reference for callbacks that outlive the current call.
fn retain(host: &ModuleHost) -> Arc<ModuleHost> {
    let ptr = host as *const ModuleHost;
    unsafe {
        Arc::increment_strong_count(ptr);
        Arc::from_raw(ptr)
    }
}

unsafe fn bytes<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }
}

unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

fn position(v: i32) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}

extern "C" fn serial_write(ctx: *const c_void, ptr: *const u8, len: usize) {
    if let Some(h) = active(ctx) {
        h.board.serial.write(unsafe { bytes(ptr, len) });
    }
}

extern "C" fn lcd_set_cursor(ctx: *const c_void, col: i32, row: i32) {
    if let Some(h) = active(ctx) {
        h.board.lcd.set_cursor(position(col), position(row));
    }
}

extern "C" fn lcd_print(ctx: *const c_void, ptr: *const u8, len: usize) {
    if let Some(h) = active(ctx) {
        h.board.lcd.print(unsafe { bytes(ptr, len) });
    }
}

extern "C" fn lcd_clear(ctx: *const c_void) {
    if let Some(h) = active(ctx) {
        h.board.lcd.clear();
    }
}

extern "C" fn sd_begin(ctx: *const c_void) -> bool {
    active(ctx).is_some_and(|h| h.board.sd.begin())
}

extern "C" fn sd_exists(ctx: *const c_void, path: *const c_char) -> bool {
    let Some(h) = active(ctx) else { return false };
    match unsafe { c_string(path) } {
        Some(path) => h.board.sd.exists(&path),
        None => false,
    }
}

extern "C" fn sd_open(ctx: *const c_void, path: *const c_char, mode: i32) -> i32 {
    let Some(h) = active(ctx) else { return -1 };
    let Some(path) = (unsafe { c_string(path) }) else { return -1 };
    h.register(h.board.sd.open(&path, OpenMode::from_raw(mode)))
}

extern "C" fn file_read(ctx: *const c_void, fd: i32, buf: *mut u8, len: usize) -> isize {
    let Some(h) = active(ctx) else { return -1 };
    if buf.is_null() {
        return -1;
    }
    let buf = unsafe { std::slice::from_raw_parts_mut(buf, len) };
    match h.files().get_mut(&fd).map(|f| f.read(buf)) {
        Some(Ok(n)) => n as isize,
        _ => -1,
    }
}

extern "C" fn file_write(ctx: *const c_void, fd: i32, ptr: *const u8, len: usize) -> isize {
    let Some(h) = active(ctx) else { return -1 };
    let data = unsafe { bytes(ptr, len) };
    match h.files().get_mut(&fd).map(|f| f.write(data)) {
        Some(Ok(n)) => n as isize,
        _ => -1,
    }
}

extern "C" fn file_is_directory(ctx: *const c_void, fd: i32) -> bool {
    active(ctx).is_some_and(|h| h.files().get(&fd).is_some_and(|f| f.is_directory()))
}

extern "C" fn file_name(ctx: *const c_void, fd: i32, buf: *mut c_char, len: usize) -> isize {
    let Some(h) = active(ctx) else { return -1 };
    if buf.is_null() || len == 0 {
        return -1;
    }
    let Some(name) = h.files().get(&fd).and_then(|f| f.name()) else { return -1 };
    let n = name.len().min(len - 1);
    unsafe {
        std::ptr::copy_nonoverlapping(name.as_ptr() as *const c_char, buf, n);
        *buf.add(n) = 0;
    }
    n as isize
}

extern "C" fn file_open_next(ctx: *const c_void, fd: i32) -> i32 {
    let Some(h) = active(ctx) else { return -1 };
    let next = h.files().get_mut(&fd).map(|dir| dir.open_next_file());
    match next {
        Some(file) => h.register(file),
        None => -1,
    }
}

extern "C" fn file_flush(ctx: *const c_void, fd: i32) {
    if let Some(h) = active(ctx) {
        if let Some(Err(e)) = h.files().get_mut(&fd).map(|f| f.flush()) {
            tracing::debug!("flush of fd {} failed: {}", fd, e);
        }
    }
}

extern "C" fn file_close(ctx: *const c_void, fd: i32) {
    // Closing stays possible after teardown so leaked threads can release files.
    if let Some(h) = host(ctx) {
        h.files().remove(&fd);
    }
}

extern "C" fn rtc_read(ctx: *const c_void, tm: *mut TmElements) {
    if let (Some(h), Some(tm)) = (host(ctx), unsafe { tm.as_mut() }) {
        *tm = h.board.rtc.read();
    }
}

extern "C" fn rtc_write(ctx: *const c_void, tm: *const TmElements) {
    if let (Some(h), Some(tm)) = (active(ctx), unsafe { tm.as_ref() }) {
        h.board.rtc.write(tm);
    }
}

extern "C" fn ir_decode(ctx: *const c_void, out: *mut u32) -> bool {
    let Some(code) = active(ctx).and_then(|h| h.board.ir.decode()) else { return false };
    if let Some(out) = unsafe { out.as_mut() } {
        *out = code;
    }
    true
}

extern "C" fn ir_resume(ctx: *const c_void) {
    if let Some(h) = active(ctx) {
        h.board.ir.resume();
    }
}

extern "C" fn audio_play(ctx: *const c_void, name: *const c_char) {
    if let Some(h) = active(ctx) {
        let name = unsafe { c_string(name) }.unwrap_or_default();
        h.board.audio.play(&name);
    }
}

extern "C" fn audio_stop(ctx: *const c_void) {
    if let Some(h) = active(ctx) {
        h.board.audio.stop();
    }
}

extern "C" fn audio_is_playing(ctx: *const c_void) -> bool {
    host(ctx).is_some_and(|h| h.board.audio.is_playing())
}

extern "C" fn pin_mode(ctx: *const c_void, pin: i32, mode: i32) {
    if let Some(h) = active(ctx) {
        h.board.pin_mode(pin, mode);
    }
}

extern "C" fn digital_write(ctx: *const c_void, pin: i32, value: i32) {
    if let Some(h) = active(ctx) {
        h.board.digital_write(pin, value);
    }
}

extern "C" fn attach_interrupt(ctx: *const c_void, pin: i32, isr: IsrFn, mode: i32) {
    let Some(h) = active(ctx) else { return };
    let owner = retain(h);
    h.board.attach_interrupt(
        pin,
        Arc::new(move || {
            if owner.is_active() {
                isr();
            }
        }),
        InterruptMode::from_raw(mode),
    );
}

// Sleeping keeps working after teardown so a leaked busy loop stays paced.
extern "C" fn delay_ms(ctx: *const c_void, ms: u32) {
    if let Some(h) = host(ctx) {
        h.board.delay(ms);
    }
}

extern "C" fn millis(ctx: *const c_void) -> u32 {
    host(ctx).map_or(0, |h| h.board.millis())
}

extern "C" fn timer_begin(ctx: *const c_void, id: usize, isr: IsrFn, period_us: u32) -> bool {
    let Some(h) = active(ctx) else { return false };
    let owner = retain(h);
    h.board.begin_timer(
        TimerId(id),
        Arc::new(move || {
            if owner.is_active() {
                isr();
            }
        }),
        period_us,
    )
}

extern "C" fn timer_end(ctx: *const c_void, id: usize) {
    if let Some(h) = active(ctx) {
        h.board.end_timer(TimerId(id));
    }
}
