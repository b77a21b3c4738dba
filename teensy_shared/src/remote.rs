//! Key codes of the 21-button NEC remote used with the IR receiver.

pub const COLUMNS: usize = 3;
pub const ROWS: usize = 7;

/// Prefix the receiver reports in front of every key of this remote.
pub const ADDRESS: u32 = 0xFF0000;

/// Row-major, three keys per row.
#[rustfmt::skip]
pub const KEYS: [u16; COLUMNS * ROWS] = [
    0xA25D, 0x629D, 0xE21D,
    0x22DD, 0x02FD, 0xC23D,
    0xE01F, 0xA857, 0x906F,
    0x6897, 0x9867, 0xB04F,
    0x30CF, 0x18E7, 0x7A85,
    0x10EF, 0x38C7, 0x5AA5,
    0x42BD, 0x4AB5, 0x52AD,
];

/// Full code for the key at `index` in [`KEYS`].
pub fn code_for(index: usize) -> Option<u32> {
    KEYS.get(index).map(|key| ADDRESS | *key as u32)
}

/// Full code for the key at `row`, `col` on the remote's face.
pub fn key_code(row: usize, col: usize) -> Option<u32> {
    if col >= COLUMNS {
        return None;
    }
    code_for(row * COLUMNS + col)
}

/// Reverse lookup, for logging received codes.
pub fn index_of(code: u32) -> Option<usize> {
    if code & 0xFF0000 != ADDRESS {
        return None;
    }
    KEYS.iter().position(|key| *key as u32 == code & 0xFFFF)
}
