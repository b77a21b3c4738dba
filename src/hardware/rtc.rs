// src/hardware/rtc.rs - DS1307 real-time clock reading host wall-clock time
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
pub use teensy_shared::abi::TmElements;

/// The emulated clock always reports host local time; writes are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rtc;

impl Rtc {
    pub fn new() -> Self {
        Self
    }

    pub fn read(&self) -> TmElements {
        to_elements(&Local::now())
    }

    /// Setting the emulated device time is not supported.
    pub fn write(&self, tm: &TmElements) {
        tracing::debug!("RTC.write({:?}) ignored", tm);
    }
}

/// Decompose a timestamp the way the DS1307 library does: `wday` counts from
/// Sunday = 0, `month` from 1 and `year` from 1970.
pub fn to_elements<Tz: TimeZone>(t: &DateTime<Tz>) -> TmElements {
    TmElements {
        second: t.second() as u8,
        minute: t.minute() as u8,
        hour: t.hour() as u8,
        wday: t.weekday().num_days_from_sunday() as u8,
        day: t.day() as u8,
        month: t.month() as u8,
        year: (t.year() - 1970).clamp(0, u8::MAX as i32) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_to_elements_decomposition() {
        // Sunday 2020-03-01 07:08:09 UTC
        let t = Utc.with_ymd_and_hms(2020, 3, 1, 7, 8, 9).unwrap();
        let tm = to_elements(&t);
        assert_eq!(
            tm,
            TmElements { second: 9, minute: 8, hour: 7, wday: 0, day: 1, month: 3, year: 50 }
        );
    }

    #[test]
    fn test_read_tracks_host_clock() {
        let rtc = Rtc::new();
        let before = Local::now();
        let tm = rtc.read();
        assert_eq!(tm.year as i32, before.year() - 1970);
        assert!((1..=12).contains(&tm.month));
        assert!(tm.wday < 7);
        rtc.write(&TmElements::default());
    }
}
