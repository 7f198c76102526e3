// src/monitor/sim_time.rs

//! Engine timestamp parsing and progress estimation.
//!
//! The engine writes simulation time in two shapes:
//! - plan files: `01JAN2024,0000` (date, `HHMM`)
//! - incremental logs: `01Jan2024  00:00:00` (date, `HH:MM:SS`)
//!
//! Hour `24` means midnight of the following day in both.

use std::sync::LazyLock;

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use regex::Regex;

static LOG_TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{2}[A-Za-z]{3}\d{4}\s+\d{2}:\d{2}:\d{2})").expect("static regex is valid")
});

/// Simulated time span a plan computes, used to turn the latest logged
/// simulation time into a progress fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SimulationWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Parse the value of a plan's `Simulation Date=` line, e.g.
    /// `01JAN2024,0000,02JAN2024,1200`.
    pub fn parse_plan_value(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.trim().split(',').map(str::trim).collect();
        if parts.len() < 4 {
            return None;
        }
        let start = parse_engine_datetime(&format!("{},{}", parts[0], parts[1]))?;
        let end = parse_engine_datetime(&format!("{},{}", parts[2], parts[3]))?;
        Some(Self { start, end })
    }

    /// `(current - start) / (end - start)`, clamped to `[0, 1]`.
    ///
    /// A zero or negative span yields `0.0`.
    pub fn fraction(&self, current: NaiveDateTime) -> f64 {
        let span = (self.end - self.start).num_seconds();
        if span <= 0 {
            return 0.0;
        }
        let done = (current - self.start).num_seconds();
        (done as f64 / span as f64).clamp(0.0, 1.0)
    }
}

/// Find the first engine timestamp in a log line.
pub fn find_log_timestamp(line: &str) -> Option<&str> {
    LOG_TIMESTAMP_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Parse either engine timestamp shape. Month names are case-insensitive.
pub fn parse_engine_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.len() < 9 || !s.is_char_boundary(9) {
        return None;
    }
    let (date_part, rest) = s.split_at(9);
    let date = parse_date(date_part)?;

    let rest = rest.trim_start_matches(',').trim();
    let (hour, minute, second) = if rest.contains(':') {
        let mut it = rest.split(':');
        let h = it.next()?.trim().parse::<u32>().ok()?;
        let m = it.next()?.trim().parse::<u32>().ok()?;
        let sec = it.next().map(|v| v.trim().parse::<u32>()).transpose().ok()?;
        (h, m, sec.unwrap_or(0))
    } else {
        if rest.len() != 4 || !rest.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let h = rest[..2].parse::<u32>().ok()?;
        let m = rest[2..].parse::<u32>().ok()?;
        (h, m, 0)
    };

    if hour == 24 && minute == 0 && second == 0 {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        return Some(midnight + ChronoDuration::days(1));
    }
    date.and_hms_opt(hour, minute, second)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let day = s.get(0..2)?.parse::<u32>().ok()?;
    let month = month_number(s.get(2..5)?)?;
    let year = s.get(5..9)?.parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = abbrev.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lower)
        .map(|idx| idx as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn parses_log_and_plan_shapes() {
        assert_eq!(
            parse_engine_datetime("15Mar2024  12:30:45"),
            Some(dt(2024, 3, 15, 12, 30, 45))
        );
        assert_eq!(
            parse_engine_datetime("02JAN2024,1200"),
            Some(dt(2024, 1, 2, 12, 0, 0))
        );
        assert_eq!(
            parse_engine_datetime("01jan2024,0000"),
            parse_engine_datetime("01JAN2024,0000")
        );
    }

    #[test]
    fn hour_24_rolls_to_next_midnight() {
        assert_eq!(
            parse_engine_datetime("01JAN2024,2400"),
            Some(dt(2024, 1, 2, 0, 0, 0))
        );
        assert_eq!(
            parse_engine_datetime("31Dec2024  24:00:00"),
            Some(dt(2025, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_engine_datetime(""), None);
        assert_eq!(parse_engine_datetime("not a date"), None);
        assert_eq!(parse_engine_datetime("01XYZ2024,0000"), None);
    }

    #[test]
    fn fraction_is_clamped() {
        let window = SimulationWindow::parse_plan_value("01JAN2024,0000,02JAN2024,0000").unwrap();
        assert!((window.fraction(dt(2024, 1, 1, 12, 0, 0)) - 0.5).abs() < 1e-9);
        assert!((window.fraction(dt(2024, 1, 1, 6, 0, 0)) - 0.25).abs() < 1e-9);
        assert_eq!(window.fraction(dt(2024, 1, 3, 0, 0, 0)), 1.0);
        assert_eq!(window.fraction(dt(2023, 12, 31, 0, 0, 0)), 0.0);
    }

    #[test]
    fn zero_span_window_reports_zero() {
        let window = SimulationWindow::parse_plan_value("01JAN2024,0000,01JAN2024,0000").unwrap();
        assert_eq!(window.fraction(dt(2024, 1, 1, 0, 0, 0)), 0.0);
    }

    #[test]
    fn finds_timestamp_inside_log_line() {
        assert_eq!(
            find_log_timestamp("  01Jan2024  00:00:00  Some text here"),
            Some("01Jan2024  00:00:00")
        );
        assert_eq!(find_log_timestamp("No timestamp here"), None);
    }
}
