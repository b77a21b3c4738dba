// src/hardware/lcd.rs - 16x2 character LCD (HD44780 through LiquidCrystal)
use super::{ByteSink, SinkSlot};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

pub const LCD_COLUMNS: usize = 16;
pub const LCD_ROWS: usize = 2;
pub const LCD_SURFACE_LEN: usize = LCD_COLUMNS * LCD_ROWS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Surface {
    cells: [u8; LCD_SURFACE_LEN],
    col: usize,
    row: usize,
}

impl Default for Surface {
    fn default() -> Self {
        Self {
            cells: [b' '; LCD_SURFACE_LEN],
            col: 0,
            row: 0,
        }
    }
}

/// Character LCD surface.
///
/// Every print republishes the whole 32-byte surface (row 0 then row 1) to
/// the sink; the renderer on the other side always redraws the full screen.
/// Printing does not move the cursor.
#[derive(Default)]
pub struct Lcd {
    surface: Mutex<Surface>,
    sink: SinkSlot,
}

impl Lcd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sink(&self, sink: ByteSink) {
        self.sink.set(sink);
    }

    fn surface(&self) -> MutexGuard<'_, Surface> {
        self.surface.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn begin(&self, _cols: u8, _rows: u8) {}
    pub fn cursor(&self) {}
    pub fn no_cursor(&self) {}
    pub fn blink(&self) {}
    pub fn no_blink(&self) {}

    pub fn set_cursor(&self, col: usize, row: usize) {
        let mut surface = self.surface();
        surface.col = col;
        surface.row = row;
    }

    pub fn cursor_position(&self) -> (usize, usize) {
        let surface = self.surface();
        (surface.col, surface.row)
    }

    /// Copy as much of `text` as fits on the cursor's row, then redraw.
    /// A cursor outside the surface writes nothing but still redraws.
    pub fn print(&self, text: &[u8]) {
        let snapshot = {
            let mut surface = self.surface();
            let (col, row) = (surface.col, surface.row);
            if row < LCD_ROWS && col < LCD_COLUMNS {
                let n = text.len().min(LCD_COLUMNS - col);
                let start = row * LCD_COLUMNS + col;
                surface.cells[start..start + n].copy_from_slice(&text[..n]);
            }
            surface.cells
        };
        self.sink.emit(&snapshot);
    }

    pub fn print_str(&self, text: &str) {
        self.print(text.as_bytes());
    }

    pub fn print_fmt(&self, args: fmt::Arguments<'_>) {
        self.print(args.to_string().as_bytes());
    }

    /// Blank the surface and redraw once.
    pub fn clear(&self) {
        self.surface().cells = [b' '; LCD_SURFACE_LEN];
        self.print(b"");
    }

    pub fn contents(&self) -> [u8; LCD_SURFACE_LEN] {
        self.surface().cells
    }

    /// The two rows as text, for log-based renderers.
    pub fn render_rows(&self) -> [String; LCD_ROWS] {
        render_rows(&self.contents())
    }
}

/// Split a published surface buffer into its rows.
pub fn render_rows(buffer: &[u8]) -> [String; LCD_ROWS] {
    let row = |r: usize| {
        let start = (r * LCD_COLUMNS).min(buffer.len());
        let end = ((r + 1) * LCD_COLUMNS).min(buffer.len());
        String::from_utf8_lossy(&buffer[start..end]).into_owned()
    };
    [row(0), row(1)]
}

impl fmt::Debug for Lcd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [top, bottom] = self.render_rows();
        f.debug_struct("Lcd")
            .field("top", &top)
            .field("bottom", &bottom)
            .field("cursor", &self.cursor_position())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn capture(lcd: &Lcd) -> Arc<Mutex<Vec<Vec<u8>>>> {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        lcd.set_sink(Arc::new(move |bytes: &[u8]| sink.lock().unwrap().push(bytes.to_vec())));
        frames
    }

    #[test]
    fn test_print_publishes_full_surface() {
        let lcd = Lcd::new();
        let frames = capture(&lcd);
        lcd.set_cursor(0, 1);
        lcd.print_str("hello");
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), LCD_SURFACE_LEN);
        assert_eq!(&frames[0][..16], b"                ");
        assert_eq!(&frames[0][16..21], b"hello");
    }

    #[test]
    fn test_print_truncates_at_row_end() {
        let lcd = Lcd::new();
        lcd.set_cursor(12, 0);
        lcd.print_str("overflowing");
        let [top, bottom] = lcd.render_rows();
        assert_eq!(top, "            over");
        assert_eq!(bottom, " ".repeat(16));
    }

    #[test]
    fn test_repeated_print_is_idempotent() {
        let lcd = Lcd::new();
        let frames = capture(&lcd);
        lcd.set_cursor(3, 0);
        lcd.print_str("12:00");
        lcd.print_str("12:00");
        let frames = frames.lock().unwrap();
        assert_eq!(frames[0], frames[1]);
        assert_eq!(lcd.cursor_position(), (3, 0));
    }

    #[test]
    fn test_clear_blanks_and_redraws_once() {
        let lcd = Lcd::new();
        lcd.print_str("junk");
        let frames = capture(&lcd);
        lcd.clear();
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].iter().all(|b| *b == b' '));
    }

    #[test]
    fn test_out_of_range_cursor_writes_nothing() {
        let lcd = Lcd::new();
        let frames = capture(&lcd);
        lcd.set_cursor(16, 0);
        lcd.print_str("x");
        lcd.set_cursor(0, 2);
        lcd.print_str("y");
        assert_eq!(frames.lock().unwrap().len(), 2);
        assert!(lcd.contents().iter().all(|b| *b == b' '));
    }

    #[test]
    fn test_display_controls_leave_surface_alone() {
        let lcd = Lcd::new();
        lcd.set_cursor(4, 1);
        lcd.print_str("on");
        let frames = capture(&lcd);
        lcd.begin(16, 2);
        lcd.cursor();
        lcd.no_cursor();
        lcd.blink();
        lcd.no_blink();
        assert!(frames.lock().unwrap().is_empty());
        assert_eq!(lcd.cursor_position(), (4, 1));
        assert_eq!(&lcd.contents()[20..22], b"on");
    }

    #[test]
    fn test_print_fmt() {
        let lcd = Lcd::new();
        lcd.print_fmt(format_args!("{:02}:{:02}", 7, 5));
        assert!(lcd.render_rows()[0].starts_with("07:05"));
    }
}
