use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use opsdesk_core::SchedulePolicy;

use crate::types::{Frequency, RecurrenceDefinition};

/// Compute the first occurrence on `anchor`'s grid that is strictly after
/// `reference`.
///
/// The grid is `anchor + k periods` for `k >= 0`, always derived from the
/// anchor itself so repeated calls never drift:
///
/// | Frequency | Preserved from the anchor                |
/// |-----------|------------------------------------------|
/// | `Weekly`  | weekday + time-of-day                    |
/// | `Monthly` | day-of-month + time-of-day               |
/// | `Yearly`  | month + day-of-month + time-of-day       |
///
/// When the anchor's day-of-month does not exist in a target month the
/// occurrence is clamped to that month's last day (Jan 31 → Feb 28 → Mar 31).
///
/// If `reference` is before the anchor, the anchor itself is returned. Past
/// the end of chrono's representable range the result saturates at
/// `DateTime::<Utc>::MAX_UTC`.
pub fn next_after(
    anchor: DateTime<Utc>,
    frequency: Frequency,
    reference: DateTime<Utc>,
) -> DateTime<Utc> {
    if anchor > reference {
        return anchor;
    }

    match frequency {
        Frequency::Weekly => {
            let week_secs = TimeDelta::weeks(1).num_seconds();
            // Whole weeks elapsed, plus one to land strictly after `reference`.
            let k = (reference - anchor).num_seconds() / week_secs + 1;
            TimeDelta::try_weeks(k)
                .and_then(|d| anchor.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        }
        Frequency::Monthly => step_months(anchor, reference, 1),
        Frequency::Yearly => step_months(anchor, reference, 12),
    }
}

/// Advance a definition's recurrence state after a successful run at `now`.
///
/// Returns `(last_occurrence, next_occurrence)`.
pub fn advance(
    policy: SchedulePolicy,
    definition: &RecurrenceDefinition,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let (ran, next) = match policy {
        SchedulePolicy::FixedGrid => {
            let slot = definition.next_occurrence;
            (
                slot,
                next_after(definition.anchor_time, definition.frequency, slot),
            )
        }
        SchedulePolicy::DriftForward => (now, next_after(now, definition.frequency, now)),
    };
    // last_occurrence never moves backwards, even after an anchor edit.
    let last = definition.last_occurrence.map_or(ran, |prev| prev.max(ran));
    (last, next)
}

/// Where a definition resumes after its grid was edited.
///
/// A definition that never ran starts at its anchor; otherwise it continues
/// at the first slot of the new grid after its last occurrence.
pub fn resume_point(
    anchor: DateTime<Utc>,
    frequency: Frequency,
    last_occurrence: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    match last_occurrence {
        Some(last) => next_after(anchor, frequency, last),
        None => anchor,
    }
}

fn step_months(anchor: DateTime<Utc>, reference: DateTime<Utc>, step: i32) -> DateTime<Utc> {
    let months_between = (reference.year() - anchor.year()) * 12
        + (reference.month() as i32 - anchor.month() as i32);
    // Start at the last slot not after reference's month; at most two candidates.
    let mut k = (months_between / step).max(0);
    loop {
        let Some(candidate) = k
            .checked_mul(step)
            .and_then(|months| shift_months(anchor, months))
        else {
            return DateTime::<Utc>::MAX_UTC;
        };
        if candidate > reference {
            return candidate;
        }
        k += 1;
    }
}

/// `anchor` moved by `months` calendar months, day clamped to month length.
fn shift_months(anchor: DateTime<Utc>, months: i32) -> Option<DateTime<Utc>> {
    let total = (anchor.year() * 12 + anchor.month0() as i32).checked_add(months)?;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = anchor.day().min(days_in_month(year, month)?);
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_time(anchor.time()).and_utc())
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    Some(
        NaiveDate::from_ymd_opt(next_year, next_month, 1)?
            .pred_opt()?
            .day(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike, Weekday};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn definition(anchor: DateTime<Utc>, frequency: Frequency) -> RecurrenceDefinition {
        RecurrenceDefinition {
            id: "rec-1".to_string(),
            name: "test".to_string(),
            anchor_time: anchor,
            frequency,
            is_active: true,
            last_occurrence: None,
            next_occurrence: anchor,
            is_deleted: false,
            owner_context: serde_json::Value::Null,
            created_at: anchor,
            updated_at: anchor,
        }
    }

    #[test]
    fn next_after_anchor_is_strictly_later_for_every_frequency() {
        let anchor = at(2026, 3, 15, 9, 30);
        for f in [Frequency::Weekly, Frequency::Monthly, Frequency::Yearly] {
            assert!(next_after(anchor, f, anchor) > anchor, "{f}");
        }
    }

    #[test]
    fn reference_before_anchor_returns_anchor() {
        let anchor = at(2026, 3, 15, 9, 30);
        let earlier = at(2026, 1, 1, 0, 0);
        assert_eq!(next_after(anchor, Frequency::Monthly, earlier), anchor);
    }

    #[test]
    fn weekly_chain_keeps_weekday_and_time() {
        let anchor = at(2026, 1, 5, 9, 0); // Monday
        let mut t = anchor;
        for _ in 0..60 {
            let next = next_after(anchor, Frequency::Weekly, t);
            assert!(next > t);
            assert_eq!(next.weekday(), Weekday::Mon);
            assert_eq!((next.hour(), next.minute()), (9, 0));
            assert_eq!(next - t, TimeDelta::weeks(1));
            t = next;
        }
    }

    #[test]
    fn weekly_from_mid_week_reference_snaps_to_grid() {
        let anchor = at(2026, 1, 5, 9, 0);
        let wednesday = at(2026, 10, 14, 17, 45);
        assert_eq!(
            next_after(anchor, Frequency::Weekly, wednesday),
            at(2026, 10, 19, 9, 0)
        );
    }

    #[test]
    fn monthly_on_31st_clamps_down_then_recovers() {
        let anchor = at(2025, 1, 31, 8, 0);
        let feb = next_after(anchor, Frequency::Monthly, anchor);
        assert_eq!(feb, at(2025, 2, 28, 8, 0));
        let mar = next_after(anchor, Frequency::Monthly, feb);
        assert_eq!(mar, at(2025, 3, 31, 8, 0));
        let apr = next_after(anchor, Frequency::Monthly, mar);
        assert_eq!(apr, at(2025, 4, 30, 8, 0));
    }

    #[test]
    fn monthly_on_31st_uses_leap_day() {
        let anchor = at(2024, 1, 31, 8, 0);
        assert_eq!(
            next_after(anchor, Frequency::Monthly, anchor),
            at(2024, 2, 29, 8, 0)
        );
    }

    #[test]
    fn monthly_chain_preserves_day_where_it_exists() {
        let anchor = at(2026, 1, 15, 23, 59);
        let mut t = anchor;
        for _ in 0..30 {
            let next = next_after(anchor, Frequency::Monthly, t);
            assert!(next > t);
            assert_eq!(next.day(), 15);
            assert_eq!((next.hour(), next.minute()), (23, 59));
            t = next;
        }
    }

    #[test]
    fn yearly_leap_day_clamps_in_common_years() {
        let anchor = at(2024, 2, 29, 12, 0);
        let next = next_after(anchor, Frequency::Yearly, anchor);
        assert_eq!(next, at(2025, 2, 28, 12, 0));
        let leap_again = next_after(anchor, Frequency::Yearly, at(2027, 6, 1, 0, 0));
        assert_eq!(leap_again, at(2028, 2, 29, 12, 0));
    }

    #[test]
    fn yearly_reference_later_same_day_moves_to_next_year() {
        let anchor = at(2020, 7, 4, 6, 0);
        let reference = at(2026, 7, 4, 6, 0);
        assert_eq!(
            next_after(anchor, Frequency::Yearly, reference),
            at(2027, 7, 4, 6, 0)
        );
    }

    #[test]
    fn far_future_saturates_instead_of_panicking() {
        let anchor = at(2026, 1, 1, 0, 0);
        let next = next_after(anchor, Frequency::Yearly, DateTime::<Utc>::MAX_UTC);
        assert_eq!(next, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn fixed_grid_advances_from_the_slot() {
        let anchor = at(2026, 1, 5, 9, 0);
        let mut def = definition(anchor, Frequency::Weekly);
        def.next_occurrence = at(2026, 10, 5, 9, 0);
        let late = at(2026, 10, 7, 13, 0);
        let (last, next) = advance(SchedulePolicy::FixedGrid, &def, late);
        assert_eq!(last, at(2026, 10, 5, 9, 0));
        assert_eq!(next, at(2026, 10, 12, 9, 0));
    }

    #[test]
    fn drift_forward_advances_from_run_time() {
        let anchor = at(2026, 1, 5, 9, 0);
        let mut def = definition(anchor, Frequency::Weekly);
        def.next_occurrence = at(2026, 10, 5, 9, 0);
        let late = at(2026, 10, 7, 13, 0);
        let (last, next) = advance(SchedulePolicy::DriftForward, &def, late);
        assert_eq!(last, late);
        assert_eq!(next, at(2026, 10, 14, 13, 0));
    }

    #[test]
    fn advance_never_moves_last_occurrence_backwards() {
        let anchor = at(2026, 1, 5, 9, 0);
        let mut def = definition(anchor, Frequency::Weekly);
        def.last_occurrence = Some(at(2026, 6, 1, 9, 0));
        def.next_occurrence = at(2026, 5, 4, 9, 0);
        let (last, _) = advance(SchedulePolicy::FixedGrid, &def, at(2026, 6, 2, 0, 0));
        assert_eq!(last, at(2026, 6, 1, 9, 0));
    }

    #[test]
    fn resume_point_starts_at_anchor_when_never_run() {
        let anchor = at(2026, 2, 10, 9, 0);
        assert_eq!(resume_point(anchor, Frequency::Monthly, None), anchor);
        assert_eq!(
            resume_point(anchor, Frequency::Monthly, Some(at(2026, 4, 10, 9, 0))),
            at(2026, 5, 10, 9, 0)
        );
    }
}
