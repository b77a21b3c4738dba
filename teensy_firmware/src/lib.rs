// teensy_firmware: alarm-clock demo module built against the teensy-emu plugin ABI

use std::sync::atomic::{AtomicBool, Ordering};
use teensy_shared::abi::{FILE_READ, HIGH, HostApi, INT_FALLING, LOW, OUTPUT};
use teensy_shared::firmware::{self, IntervalTimer, host};
use teensy_shared::{declare_module, remote};

pub const BACKLIGHT_PIN: i32 = 9;
pub const BUTTON_PIN: i32 = 17;
const CLOCK_PERIOD_US: u32 = 1_000_000;

static CLOCK: IntervalTimer = IntervalTimer::new();
static BACKLIGHT: AtomicBool = AtomicBool::new(false);

declare_module!(c"teensy-alarm-demo", setup, run_loop);

extern "C" fn setup(api: *const HostApi) {
    firmware::install(api);
    let Some(board) = host() else { return };

    board.serial_println("teensy alarm demo");
    board.pin_mode(BACKLIGHT_PIN, OUTPUT);
    set_backlight(true);
    board.attach_interrupt(BUTTON_PIN, on_button, INT_FALLING);

    if board.sd_begin() {
        list_card();
    } else {
        board.serial_println("no SD card");
    }

    board.lcd_clear();
    draw_clock();
    if !CLOCK.begin(draw_clock, CLOCK_PERIOD_US) {
        board.serial_println("clock timer failed");
    }
}

extern "C" fn run_loop(api: *const HostApi) {
    firmware::install(api);
    let Some(board) = host() else { return };
    if let Some(code) = board.ir_decode() {
        let line = describe_code(code);
        board.serial_println(&line);
        board.lcd_set_cursor(0, 1);
        board.lcd_print(&format!("{:<16}", line));
        board.ir_resume();
    }
}

extern "C" fn draw_clock() {
    if let Some(board) = host() {
        let tm = board.rtc_read();
        board.lcd_set_cursor(0, 0);
        board.lcd_print(&format!("{:02}:{:02}:{:02}", tm.hour, tm.minute, tm.second));
    }
}

extern "C" fn on_button() {
    let on = !BACKLIGHT.load(Ordering::Acquire);
    set_backlight(on);
}

fn set_backlight(on: bool) {
    BACKLIGHT.store(on, Ordering::Release);
    if let Some(board) = host() {
        board.digital_write(BACKLIGHT_PIN, if on { HIGH } else { LOW });
    }
}

fn list_card() {
    let Some(board) = host() else { return };
    let root = board.sd_open("/", FILE_READ);
    if !root.is_valid() {
        return;
    }
    loop {
        let entry = root.open_next_file();
        if !entry.is_valid() {
            break;
        }
        if let Some(name) = entry.name().filter(|n| n != "." && n != "..") {
            let kind = if entry.is_directory() { "/" } else { "" };
            board.serial_println(&format!("sd: {}{}", name, kind));
        }
        entry.close();
    }
    root.close();
}

/// Text shown for a received IR code: the remote key number when known.
pub fn describe_code(code: u32) -> String {
    match remote::index_of(code) {
        Some(index) => format!("key {}", index),
        None => format!("IR {:06X}", code),
    }
}
