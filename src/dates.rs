//! Weekday-aligned date-range chunking for historical requests.
//!
//! The upstream API caps the span of one historical request, so a resume
//! window is split into non-overlapping chunks. Every chunk boundary is
//! adjusted to land on a trading day: starts roll forward over weekends,
//! ends roll back. Chunking is a pure function of its inputs — identical
//! output on every call, which the idempotent resume design relies on.

use chrono::{Datelike, Days, NaiveDate, Weekday};

/// An inclusive, weekend-adjusted span of calendar days, fetched as one
/// historical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Format a boundary date the way request URLs expect it.
    pub fn fmt(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }
}

/// Which side of a range a boundary sits on; determines the direction a
/// weekend date is adjusted.
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Start,
    End,
}

/// Move a weekend date onto the nearest trading day.
///
/// Start boundaries: Saturday → +2d, Sunday → +1d (next Monday).
/// End boundaries: Saturday → −1d, Sunday → −2d (previous Friday).
fn adjust_to_weekday(date: NaiveDate, boundary: Boundary) -> NaiveDate {
    match (date.weekday(), boundary) {
        (Weekday::Sat, Boundary::Start) => date + Days::new(2),
        (Weekday::Sun, Boundary::Start) => date + Days::new(1),
        (Weekday::Sat, Boundary::End) => date - Days::new(1),
        (Weekday::Sun, Boundary::End) => date - Days::new(2),
        _ => date,
    }
}

/// Split `[start, end]` into weekday-aligned chunks of at most
/// `max_span_days` days (plus adjustment slack).
///
/// Returns an empty vec when the adjusted start is after the adjusted end —
/// the steady-state "already up to date" condition.
pub fn chunk_date_ranges(start: NaiveDate, end: NaiveDate, max_span_days: u32) -> Vec<DateRange> {
    let start = adjust_to_weekday(start, Boundary::Start);
    let end = adjust_to_weekday(end, Boundary::End);

    if start > end {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = start;
    while current <= end {
        let chunk_end = (current + Days::new(u64::from(max_span_days))).min(end);
        let chunk_end = adjust_to_weekday(chunk_end, Boundary::End);
        chunks.push(DateRange {
            from: current,
            to: chunk_end,
        });
        current = adjust_to_weekday(chunk_end + Days::new(1), Boundary::Start);
    }
    chunks
}
