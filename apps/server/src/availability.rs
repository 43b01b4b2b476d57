//! Slot computation for the booking calendar.
//!
//! This is the one place that decides whether a start time is bookable. The
//! HTTP availability endpoint, the month calendar and the write-time recheck
//! in booking creation all go through `compute_availability` so they can
//! never disagree about what counts as occupied.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::models::{BlockedDay, OccupyingBooking, Vacation, WorkingHours};

// ── Constants ──

/// Candidate start times are enumerated on this grid (minutes).
pub const SLOT_STEP_MIN: i64 = 30;

/// Gap enforced after every occupying booking before the next client
/// (minutes). Appended after the booking's end, never before its start.
pub const BUFFER_MIN: i64 = 30;

/// Fallback service duration when the lookup fails or no service is given.
pub const DEFAULT_DURATION_MIN: i64 = 60;

/// Booking statuses that block calendar slots. Every call site must filter
/// with this exact set; `OCCUPYING_STATUS_SQL` is its SQL spelling.
pub const OCCUPYING_STATUSES: [&str; 2] = ["confirmed", "completed"];

/// SQL `IN` list matching `OCCUPYING_STATUSES`.
pub const OCCUPYING_STATUS_SQL: &str = "('confirmed', 'completed')";

// ── Result types ──

/// Why a day has no bookable slots at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosedReason {
    /// Owner blocked this specific date.
    Blocked,
    /// Date falls inside a vacation range.
    Vacation,
    /// No active working hours for this weekday.
    Closed,
}

/// Availability verdict for one (date, service duration) pair.
///
/// An open day with zero free slots is `available: true, slots: []` with no
/// reason — callers must not conflate that with a closed day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayAvailability {
    pub available: bool,
    pub slots: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ClosedReason>,
}

impl DayAvailability {
    fn closed(reason: ClosedReason) -> Self {
        Self {
            available: false,
            slots: Vec::new(),
            reason: Some(reason),
        }
    }

    fn open(slots: Vec<String>) -> Self {
        Self {
            available: true,
            slots,
            reason: None,
        }
    }
}

// ── Time helpers ──

/// Parse "HH:MM" (or "HH:MM:SS") into minutes since midnight.
pub fn minute_of_day(time: &str) -> Option<i64> {
    let mut parts = time.split(':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.trim().parse().ok()?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Format minutes since midnight as "HH:MM".
pub fn format_minute(minutes: i64) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Occupied `[start, end)` minute intervals for one date. Each booking is
/// padded with `buffer_min` after its end. Rows with unparseable times are
/// skipped rather than blocking the whole day.
fn occupied_intervals(bookings: &[OccupyingBooking], buffer_min: i64) -> Vec<(i64, i64)> {
    bookings
        .iter()
        .filter_map(|b| {
            let start = minute_of_day(&b.booking_time)?;
            let duration = if b.duration_minutes > 0 {
                b.duration_minutes
            } else {
                DEFAULT_DURATION_MIN
            };
            Some((start, start + duration + buffer_min))
        })
        .collect()
}

// ── Engine ──

/// Compute the bookable start times for `date`.
///
/// Pure function over explicit inputs: `bookings` must already be the
/// occupying bookings for that date (see `OCCUPYING_STATUSES`), the rest is
/// the owner's schedule configuration. Slots are emitted in ascending order
/// at `SLOT_STEP_MIN` granularity; a slot ending exactly at closing time is
/// valid.
pub fn compute_availability(
    date: NaiveDate,
    service_duration_min: i64,
    working_hours: &[WorkingHours],
    vacations: &[Vacation],
    blocked_days: &[BlockedDay],
    bookings: &[OccupyingBooking],
) -> DayAvailability {
    let date_str = date.format("%Y-%m-%d").to_string();

    if blocked_days.iter().any(|b| b.date == date_str) {
        return DayAvailability::closed(ClosedReason::Blocked);
    }

    // Inclusive range check; ISO date strings compare correctly as text.
    if vacations
        .iter()
        .any(|v| v.start_date <= date_str && date_str <= v.end_date)
    {
        return DayAvailability::closed(ClosedReason::Vacation);
    }

    // 0 = Sunday .. 6 = Saturday, the convention the schedule is stored in.
    let day_of_week = date.weekday().num_days_from_sunday() as i64;
    let hours = match working_hours
        .iter()
        .find(|wh| wh.day_of_week == day_of_week && wh.is_active)
    {
        Some(wh) => wh,
        None => return DayAvailability::closed(ClosedReason::Closed),
    };

    // A row with unparseable times is as good as no row.
    let (work_start, work_end) = match (
        minute_of_day(&hours.start_time),
        minute_of_day(&hours.end_time),
    ) {
        (Some(start), Some(end)) => (start, end),
        _ => return DayAvailability::closed(ClosedReason::Closed),
    };

    let duration = if service_duration_min > 0 {
        service_duration_min
    } else {
        DEFAULT_DURATION_MIN
    };
    let occupied = occupied_intervals(bookings, BUFFER_MIN);

    let mut slots = Vec::new();
    let mut t = work_start;
    while t + duration <= work_end {
        let conflicts = occupied
            .iter()
            .any(|&(start, end)| t < end && t + duration > start);
        if !conflicts {
            slots.push(format_minute(t));
        }
        t += SLOT_STEP_MIN;
    }

    DayAvailability::open(slots)
}

/// Write-time recheck: the requested start must be a member of a freshly
/// computed slot set. Accepts "HH:MM" or "HH:MM:SS" input.
pub fn is_start_bookable(availability: &DayAvailability, start_time: &str) -> bool {
    let Some(start) = minute_of_day(start_time) else {
        return false;
    };
    let normalized = format_minute(start);
    availability.available && availability.slots.iter().any(|s| *s == normalized)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// 2026-03-02 is a Monday (day_of_week 1).
    const MONDAY: &str = "2026-03-02";

    fn hours(day: i64, start: &str, end: &str, active: bool) -> WorkingHours {
        WorkingHours {
            day_of_week: day,
            start_time: start.to_string(),
            end_time: end.to_string(),
            is_active: active,
        }
    }

    fn vacation(start: &str, end: &str) -> Vacation {
        Vacation {
            id: 1,
            start_date: start.to_string(),
            end_date: end.to_string(),
            reason: None,
        }
    }

    fn blocked(d: &str) -> BlockedDay {
        BlockedDay {
            id: 1,
            date: d.to_string(),
            reason: None,
        }
    }

    fn booking(time: &str, duration: i64) -> OccupyingBooking {
        OccupyingBooking {
            booking_time: time.to_string(),
            duration_minutes: duration,
        }
    }

    fn full_week() -> Vec<WorkingHours> {
        (0..7).map(|d| hours(d, "09:00", "17:00", true)).collect()
    }

    // ── minute_of_day / format_minute ──

    #[test]
    fn test_minute_of_day_basic() {
        assert_eq!(minute_of_day("09:00"), Some(540));
        assert_eq!(minute_of_day("16:30"), Some(990));
        assert_eq!(minute_of_day("00:00"), Some(0));
    }

    #[test]
    fn test_minute_of_day_with_seconds() {
        assert_eq!(minute_of_day("10:30:00"), Some(630));
    }

    #[test]
    fn test_minute_of_day_rejects_garbage() {
        assert_eq!(minute_of_day("garbage"), None);
        assert_eq!(minute_of_day("25:00"), None);
        assert_eq!(minute_of_day("10:75"), None);
        assert_eq!(minute_of_day(""), None);
    }

    #[test]
    fn test_format_minute() {
        assert_eq!(format_minute(540), "09:00");
        assert_eq!(format_minute(990), "16:30");
        assert_eq!(format_minute(0), "00:00");
    }

    // ── Closed days ──

    #[test]
    fn test_blocked_day() {
        let result = compute_availability(
            date(MONDAY),
            60,
            &full_week(),
            &[],
            &[blocked(MONDAY)],
            &[],
        );
        assert!(!result.available);
        assert_eq!(result.reason, Some(ClosedReason::Blocked));
        assert!(result.slots.is_empty());
    }

    #[test]
    fn test_vacation_day() {
        let result = compute_availability(
            date(MONDAY),
            60,
            &full_week(),
            &[vacation("2026-03-01", "2026-03-05")],
            &[],
            &[],
        );
        assert!(!result.available);
        assert_eq!(result.reason, Some(ClosedReason::Vacation));
    }

    #[test]
    fn test_vacation_range_is_inclusive() {
        let v = [vacation("2026-03-02", "2026-03-04")];
        for d in ["2026-03-02", "2026-03-03", "2026-03-04"] {
            let result = compute_availability(date(d), 60, &full_week(), &v, &[], &[]);
            assert_eq!(result.reason, Some(ClosedReason::Vacation), "{}", d);
        }
        let after = compute_availability(date("2026-03-05"), 60, &full_week(), &v, &[], &[]);
        assert!(after.available);
    }

    #[test]
    fn test_blocked_takes_priority_over_vacation() {
        let result = compute_availability(
            date(MONDAY),
            60,
            &full_week(),
            &[vacation("2026-03-01", "2026-03-05")],
            &[blocked(MONDAY)],
            &[],
        );
        assert_eq!(result.reason, Some(ClosedReason::Blocked));
    }

    #[test]
    fn test_inactive_weekday_is_closed() {
        let wh = [hours(1, "09:00", "17:00", false)];
        let result = compute_availability(date(MONDAY), 60, &wh, &[], &[], &[]);
        assert!(!result.available);
        assert_eq!(result.reason, Some(ClosedReason::Closed));
    }

    #[test]
    fn test_missing_weekday_row_is_closed() {
        // Only Sunday configured; the query date is a Monday.
        let wh = [hours(0, "09:00", "17:00", true)];
        let result = compute_availability(date(MONDAY), 60, &wh, &[], &[], &[]);
        assert_eq!(result.reason, Some(ClosedReason::Closed));
    }

    #[test]
    fn test_unparseable_working_hours_is_closed() {
        let wh = [hours(1, "nine", "17:00", true)];
        let result = compute_availability(date(MONDAY), 60, &wh, &[], &[], &[]);
        assert_eq!(result.reason, Some(ClosedReason::Closed));
    }

    // ── Open days ──

    #[test]
    fn test_full_open_day_slot_grid() {
        let result = compute_availability(date(MONDAY), 60, &full_week(), &[], &[], &[]);
        assert!(result.available);
        assert_eq!(result.reason, None);
        // 09:00 .. 16:00 on the half-hour grid: the 16:00 slot ends exactly
        // at 17:00 and is valid.
        let expected: Vec<String> = (0..15).map(|i| format_minute(540 + i * 30)).collect();
        assert_eq!(result.slots, expected);
        assert_eq!(result.slots.first().unwrap(), "09:00");
        assert_eq!(result.slots.last().unwrap(), "16:00");
    }

    #[test]
    fn test_booking_with_buffer_excludes_overlapping_slots() {
        // Booking 10:00 for 60 min occupies [10:00, 11:30) once buffered.
        let bookings = [booking("10:00", 60)];
        let result = compute_availability(date(MONDAY), 60, &full_week(), &[], &[], &bookings);
        assert!(result.available);
        // 09:00 ends exactly at the booking start and survives; everything
        // from 09:30 through 11:00 would overlap [10:00, 11:30).
        for excluded in ["09:30", "10:00", "10:30", "11:00"] {
            assert!(!result.slots.iter().any(|s| s == excluded), "{}", excluded);
        }
        assert!(result.slots.iter().any(|s| s == "09:00"));
        assert!(result.slots.iter().any(|s| s == "11:30"));
        assert!(result.slots.iter().any(|s| s == "12:00"));
        // No surviving slot may violate the overlap rule.
        for slot in &result.slots {
            let t = minute_of_day(slot).unwrap();
            assert!(!(t < 690 && t + 60 > 600), "slot {} overlaps", slot);
        }
    }

    #[test]
    fn test_buffer_is_not_applied_before_booking_start() {
        // A 30-min service ending exactly when the booking starts is fine.
        let bookings = [booking("10:00", 60)];
        let result = compute_availability(date(MONDAY), 30, &full_week(), &[], &[], &bookings);
        assert!(result.slots.iter().any(|s| s == "09:30"));
        // First slot after the buffered end [.. 11:30).
        assert!(result.slots.iter().any(|s| s == "11:30"));
        assert!(!result.slots.iter().any(|s| s == "11:00"));
    }

    #[test]
    fn test_open_day_with_zero_free_slots_is_still_available() {
        let wh = [hours(1, "09:00", "10:00", true)];
        let bookings = [booking("09:00", 60)];
        let result = compute_availability(date(MONDAY), 60, &wh, &[], &[], &bookings);
        assert!(result.available);
        assert!(result.slots.is_empty());
        assert_eq!(result.reason, None);
    }

    #[test]
    fn test_last_slot_boundary() {
        let wh = [hours(1, "09:00", "10:00", true)];
        // Exactly fits: one slot at 09:00.
        let exact = compute_availability(date(MONDAY), 60, &wh, &[], &[], &[]);
        assert_eq!(exact.slots, vec!["09:00".to_string()]);
        // One minute over closing: no slots.
        let over = compute_availability(date(MONDAY), 61, &wh, &[], &[], &[]);
        assert!(over.available);
        assert!(over.slots.is_empty());
    }

    #[test]
    fn test_default_duration_when_unknown() {
        let wh = [hours(1, "09:00", "10:00", true)];
        // Duration 0 means "unknown" and falls back to 60 minutes, which
        // fits exactly once in a one-hour window.
        let result = compute_availability(date(MONDAY), 0, &wh, &[], &[], &[]);
        assert_eq!(result.slots, vec!["09:00".to_string()]);
    }

    #[test]
    fn test_idempotent() {
        let bookings = [booking("10:00", 60), booking("14:30", 90)];
        let first = compute_availability(date(MONDAY), 45, &full_week(), &[], &[], &bookings);
        let second = compute_availability(date(MONDAY), 45, &full_week(), &[], &[], &bookings);
        assert_eq!(first, second);
    }

    #[test]
    fn test_slots_are_ascending() {
        let bookings = [booking("11:00", 30), booking("15:00", 60)];
        let result = compute_availability(date(MONDAY), 30, &full_week(), &[], &[], &bookings);
        let minutes: Vec<i64> = result
            .slots
            .iter()
            .map(|s| minute_of_day(s).unwrap())
            .collect();
        assert!(minutes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unparseable_booking_time_is_skipped() {
        let bookings = [booking("not-a-time", 60)];
        let result = compute_availability(date(MONDAY), 60, &full_week(), &[], &[], &bookings);
        assert_eq!(result.slots.len(), 15); // full grid, nothing occupied
    }

    #[test]
    fn test_zero_buffer_allows_adjacent_slot() {
        // With the configured buffer, 11:00 is blocked after a 10:00/60
        // booking; with buffer 0 the occupied interval ends at the raw end
        // and 11:00 becomes free.
        let bookings = [booking("10:00", 60)];
        let buffered = occupied_intervals(&bookings, BUFFER_MIN);
        assert_eq!(buffered, vec![(600, 690)]);
        let raw = occupied_intervals(&bookings, 0);
        assert_eq!(raw, vec![(600, 660)]);
        let t = minute_of_day("11:00").unwrap();
        assert!(t < buffered[0].1 && t + 60 > buffered[0].0);
        assert!(!(t < raw[0].1 && t + 60 > raw[0].0));
    }

    // ── is_start_bookable ──

    #[test]
    fn test_is_start_bookable_membership() {
        let avail = compute_availability(date(MONDAY), 60, &full_week(), &[], &[], &[]);
        assert!(is_start_bookable(&avail, "09:00"));
        assert!(is_start_bookable(&avail, "09:00:00"));
        assert!(is_start_bookable(&avail, "16:00"));
        assert!(!is_start_bookable(&avail, "16:30"));
        assert!(!is_start_bookable(&avail, "08:30"));
        assert!(!is_start_bookable(&avail, "bogus"));
    }

    #[test]
    fn test_is_start_bookable_on_closed_day() {
        let avail = compute_availability(
            date(MONDAY),
            60,
            &full_week(),
            &[],
            &[blocked(MONDAY)],
            &[],
        );
        assert!(!is_start_bookable(&avail, "09:00"));
    }

    // ── Status filter consts stay in sync ──

    #[test]
    fn test_occupying_status_sql_matches_array() {
        for status in OCCUPYING_STATUSES {
            assert!(OCCUPYING_STATUS_SQL.contains(status));
        }
        assert_eq!(
            OCCUPYING_STATUS_SQL.matches('\'').count(),
            OCCUPYING_STATUSES.len() * 2
        );
    }

    #[test]
    fn test_cancelled_and_pending_never_passed_in() {
        // Construction-level guarantee: the filter lives in the SQL consts,
        // so the engine never sees non-occupying rows. Sanity-check the set.
        assert!(!OCCUPYING_STATUSES.contains(&"pending"));
        assert!(!OCCUPYING_STATUSES.contains(&"cancelled"));
    }
}
