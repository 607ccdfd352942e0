//! Business-day calendar for Marquee POS.
//!
//! A theatre's night runs past midnight: anything rung up before 02:00
//! local time still belongs to the previous evening's books. This module is
//! the single place that rule lives: report generation, retention pruning,
//! and daily-transition detection all derive business dates from here and
//! nowhere else.

use chrono::{Days, NaiveDate, NaiveDateTime, Timelike};

/// Local hour before which a transaction is booked to the previous day.
pub const BUSINESS_DAY_CUTOFF_HOUR: u32 = 2;

/// Business date (`YYYY-MM-DD`) for a terminal-local wall-clock timestamp.
///
/// Timestamps with an hour earlier than [`BUSINESS_DAY_CUTOFF_HOUR`] are
/// assigned to the previous calendar date.
pub fn business_date_of(ts: NaiveDateTime) -> String {
    let date = if ts.hour() < BUSINESS_DAY_CUTOFF_HOUR {
        ts.date()
            .checked_sub_days(Days::new(1))
            .unwrap_or_else(|| ts.date())
    } else {
        ts.date()
    };
    date.format("%Y-%m-%d").to_string()
}

/// Parse a `YYYY-MM-DD` business date string.
pub fn parse_business_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// The business date `days` before `date`, as a `YYYY-MM-DD` string.
///
/// Returns `None` when `date` is not a valid business date string.
pub fn business_date_minus_days(date: &str, days: u64) -> Option<String> {
    let parsed = parse_business_date(date)?;
    let shifted = parsed.checked_sub_days(Days::new(days))?;
    Some(shifted.format("%Y-%m-%d").to_string())
}

// ===========================================================================
// Tests
// ===========================================================================
