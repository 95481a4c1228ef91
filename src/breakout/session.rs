use crate::models::{Candle, SessionRange};
use chrono::{Duration, NaiveDate, Timelike};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Where the detection window sits on the clock.
///
/// The window is the four-hour candle whose open lands on `start_hour` in a
/// fixed-offset timezone. Exchange candles are UTC, so the offset shifts them
/// before the boundary check; it also decides which local date a range
/// belongs to.
#[derive(Debug, Clone, Copy)]
pub struct SessionSpec {
    pub start_hour: u32,
    pub tz_offset_hours: i32,
}

impl SessionSpec {
    pub fn new(start_hour: u32, tz_offset_hours: i32) -> Self {
        Self {
            start_hour,
            tz_offset_hours,
        }
    }
}

/// Extract one session range per local date from a four-hour series.
///
/// A candle qualifies when its open, shifted into the session timezone, sits
/// exactly on the window's start boundary. Duplicate dates keep the range
/// with the widest high-low span. Result is sorted by date ascending.
pub fn session_ranges(candles: &[Candle], spec: &SessionSpec) -> Vec<SessionRange> {
    let shift = Duration::hours(spec.tz_offset_hours as i64);
    let mut by_date: HashMap<NaiveDate, SessionRange> = HashMap::new();

    for candle in candles {
        let local_open = candle.open_time + shift;
        if local_open.hour() != spec.start_hour
            || local_open.minute() != 0
            || local_open.second() != 0
        {
            continue;
        }

        let range = SessionRange {
            date: local_open.date_naive(),
            high: candle.high,
            low: candle.low,
            open_time: candle.open_time,
            close_time: candle.close_time,
        };

        match by_date.entry(range.date) {
            Entry::Occupied(mut kept) => {
                if range.span() > kept.get().span() {
                    kept.insert(range);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(range);
            }
        }
    }

    let mut ranges: Vec<SessionRange> = by_date.into_values().collect();
    ranges.sort_by_key(|r| r.date);
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn candle_4h(open: DateTime<Utc>, high: f64, low: f64) -> Candle {
        Candle {
            open_time: open,
            close_time: open + Duration::hours(4) - Duration::milliseconds(1),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 5000.0,
        }
    }

    fn utc(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_picks_window_start_candle_per_day() {
        let candles = vec![
            candle_4h(utc(1, 0), 99.0, 97.0),
            candle_4h(utc(1, 4), 99.5, 96.5),
            candle_4h(utc(1, 8), 100.0, 95.0),
            candle_4h(utc(1, 12), 101.0, 98.0),
            candle_4h(utc(2, 8), 102.0, 97.0),
        ];

        let ranges = session_ranges(&candles, &SessionSpec::new(8, 0));

        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(ranges[0].high, 100.0);
        assert_eq!(ranges[0].low, 95.0);
        assert_eq!(ranges[0].open_time, utc(1, 8));
        assert_eq!(ranges[1].date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(ranges[1].high, 102.0);
    }

    #[test]
    fn test_misaligned_candle_is_skipped() {
        let aligned = candle_4h(utc(1, 8), 100.0, 95.0);
        let mut shifted = candle_4h(utc(1, 8), 120.0, 80.0);
        shifted.open_time += Duration::minutes(30);

        let ranges = session_ranges(&[aligned, shifted], &SessionSpec::new(8, 0));

        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].high, 100.0);
    }

    #[test]
    fn test_timezone_offset_shifts_boundary_and_date() {
        // Local 10:00 at UTC+2 is the 08:00 UTC candle
        let candles = vec![
            candle_4h(utc(1, 8), 100.0, 95.0),
            candle_4h(utc(1, 10), 110.0, 90.0),
        ];
        let ranges = session_ranges(&candles, &SessionSpec::new(10, 2));
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].open_time, utc(1, 8));

        // A late UTC candle can fall on the next local date
        let candles = vec![candle_4h(utc(1, 22), 100.0, 95.0)];
        let ranges = session_ranges(&candles, &SessionSpec::new(1, 3));
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
    }

    #[test]
    fn test_duplicate_date_keeps_widest_span() {
        // Duplicated feed rows for the same boundary, one wider than the other
        let narrow = candle_4h(utc(1, 8), 100.0, 96.0);
        let wide = candle_4h(utc(1, 8), 101.0, 95.0);

        let ranges = session_ranges(&[narrow.clone(), wide.clone()], &SessionSpec::new(8, 0));
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].high, 101.0);
        assert_eq!(ranges[0].low, 95.0);

        // Order-independent
        let ranges = session_ranges(&[wide, narrow], &SessionSpec::new(8, 0));
        assert_eq!(ranges[0].high, 101.0);
    }

    #[test]
    fn test_sorted_by_date() {
        let candles = vec![
            candle_4h(utc(3, 8), 100.0, 95.0),
            candle_4h(utc(1, 8), 100.0, 95.0),
            candle_4h(utc(2, 8), 100.0, 95.0),
        ];

        let ranges = session_ranges(&candles, &SessionSpec::new(8, 0));

        let dates: Vec<NaiveDate> = ranges.iter().map(|r| r.date).collect();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(),
            ]
        );
    }
}
