//! Trading calendar generation.
//!
//! Expected trading days are weekdays minus NYSE market holidays.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::HashSet;

/// NYSE full-day closures, (year, month, day).
const NYSE_HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2020
    (2020, 1, 1), (2020, 1, 20), (2020, 2, 17), (2020, 4, 10), (2020, 5, 25),
    (2020, 7, 3), (2020, 9, 7), (2020, 11, 26), (2020, 12, 25),
    // 2021
    (2021, 1, 1), (2021, 1, 18), (2021, 2, 15), (2021, 4, 2), (2021, 5, 31),
    (2021, 7, 5), (2021, 9, 6), (2021, 11, 25), (2021, 12, 24),
    // 2022
    (2022, 1, 17), (2022, 2, 21), (2022, 4, 15), (2022, 5, 30), (2022, 6, 20),
    (2022, 7, 4), (2022, 9, 5), (2022, 11, 24), (2022, 12, 26),
    // 2023
    (2023, 1, 2), (2023, 1, 16), (2023, 2, 20), (2023, 4, 7), (2023, 5, 29),
    (2023, 6, 19), (2023, 7, 4), (2023, 9, 4), (2023, 11, 23), (2023, 12, 25),
    // 2024
    (2024, 1, 1), (2024, 1, 15), (2024, 2, 19), (2024, 3, 29), (2024, 5, 27),
    (2024, 6, 19), (2024, 7, 4), (2024, 9, 2), (2024, 11, 28), (2024, 12, 25),
    // 2025 (01-09 national day of mourning)
    (2025, 1, 1), (2025, 1, 9), (2025, 1, 20), (2025, 2, 17), (2025, 4, 18),
    (2025, 5, 26), (2025, 6, 19), (2025, 7, 4), (2025, 9, 1), (2025, 11, 27),
    (2025, 12, 25),
    // 2026
    (2026, 1, 1), (2026, 1, 19), (2026, 2, 16), (2026, 4, 3), (2026, 5, 25),
    (2026, 6, 19), (2026, 7, 3), (2026, 9, 7), (2026, 11, 26), (2026, 12, 25),
    // 2027
    (2027, 1, 1), (2027, 1, 18), (2027, 2, 15), (2027, 3, 26), (2027, 5, 31),
    (2027, 6, 18), (2027, 7, 5), (2027, 9, 6), (2027, 11, 25), (2027, 12, 24),
];

/// Generates the ordered set of expected trading days for a range.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    holidays: HashSet<NaiveDate>,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl TradingCalendar {
    /// Calendar with the built-in NYSE holiday set.
    pub fn new() -> Self {
        let holidays = NYSE_HOLIDAYS
            .iter()
            .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
            .collect();
        Self { holidays }
    }

    /// Built-in holidays plus additional closures.
    pub fn with_extra_holidays<I>(extra: I) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        let mut calendar = Self::new();
        calendar.holidays.extend(extra);
        calendar
    }

    /// Calendar with no holidays at all, weekends only.
    pub fn weekdays_only() -> Self {
        Self {
            holidays: HashSet::new(),
        }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    /// Trading days in `[start, end]`, ascending. Empty when `start > end`.
    pub fn generate(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut current = start;
        while current <= end {
            if self.is_trading_day(current) {
                days.push(current);
            }
            current += Duration::days(1);
        }
        days
    }

    /// Number of trading days in `[start, end]`.
    pub fn count(&self, start: NaiveDate, end: NaiveDate) -> usize {
        let mut count = 0;
        let mut current = start;
        while current <= end {
            if self.is_trading_day(current) {
                count += 1;
            }
            current += Duration::days(1);
        }
        count
    }
}
