//! Recurrence planner: when does the next reminder fire?
//!
//! Pure functions over absolute UTC instants. `now` is always passed in so the
//! results are reproducible. Durations are fixed, so a period is exactly
//! 604_800_000 ms regardless of daylight-saving changes.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{OffsetToken, RecurrenceMode};

/// Length of one periodic cycle.
pub const PERIOD: Duration = Duration::days(7);

/// Delay applied to a single reminder whose fire time has already passed.
pub const LATE_GRACE: Duration = Duration::seconds(60);

/// First firing of a task, with the deadline it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialPlan {
    pub fire_at: DateTime<Utc>,
    /// Equal to the input deadline unless a periodic task had to be advanced.
    pub deadline: DateTime<Utc>,
}

/// Next cycle of a periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextOccurrence {
    pub deadline: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
}

/// Compute the first fire time for a newly created or edited task.
///
/// Returns `None` when a periodic task has no occurrence left before
/// `end_date`, or when the result would fall outside chrono's date range.
/// The returned `fire_at` is always strictly after `now`.
///
/// A stale periodic deadline is moved forward by the smallest whole number of
/// periods that puts the fire time in the future. The count is computed
/// directly, so an arbitrarily old deadline costs one division rather than one
/// iteration per elapsed week; with no `end_date` the result is simply the
/// first future cycle.
pub fn compute_initial_fire_time(
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
    offset: OffsetToken,
    mode: RecurrenceMode,
    end_date: Option<DateTime<Utc>>,
) -> Option<InitialPlan> {
    let candidate = deadline.checked_sub_signed(offset.duration())?;
    if candidate > now {
        return Some(InitialPlan {
            fire_at: candidate,
            deadline,
        });
    }

    match mode {
        RecurrenceMode::Single => Some(InitialPlan {
            fire_at: now.checked_add_signed(LATE_GRACE)?,
            deadline,
        }),
        RecurrenceMode::Periodic => {
            let behind = (now - candidate).num_milliseconds();
            let periods = behind / PERIOD.num_milliseconds() + 1;
            let shift =
                Duration::try_milliseconds(periods.checked_mul(PERIOD.num_milliseconds())?)?;

            let advanced = deadline.checked_add_signed(shift)?;
            if end_date.is_some_and(|end| advanced > end) {
                return None;
            }
            Some(InitialPlan {
                fire_at: candidate.checked_add_signed(shift)?,
                deadline: advanced,
            })
        }
    }
}

/// Compute the cycle after `current_deadline` for a periodic task.
///
/// The end boundary is inclusive: a next deadline equal to `end_date` is
/// still an occurrence. The fire time is not checked against the clock; this
/// is called right after a send, when the old fire time is about a period
/// behind the new one. `None` also covers a next deadline past the end of
/// chrono's date range.
pub fn compute_next_periodic(
    current_deadline: DateTime<Utc>,
    offset: OffsetToken,
    end_date: Option<DateTime<Utc>>,
) -> Option<NextOccurrence> {
    let deadline = current_deadline.checked_add_signed(PERIOD)?;
    if end_date.is_some_and(|end| deadline > end) {
        return None;
    }
    Some(NextOccurrence {
        deadline,
        fire_at: deadline.checked_sub_signed(offset.duration())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use rstest::rstest;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn period_is_exactly_seven_days_of_millis() {
        assert_eq!(PERIOD.num_milliseconds(), 604_800_000);
    }

    #[test]
    fn future_single_fires_offset_before_deadline() {
        let now = at(2025, 1, 1, 0, 0, 0);
        let deadline = at(2025, 1, 5, 0, 0, 0);
        let plan =
            compute_initial_fire_time(now, deadline, OffsetToken::Long, RecurrenceMode::Single, None)
                .unwrap();
        assert_eq!(plan.fire_at, at(2025, 1, 2, 0, 0, 0));
        assert_eq!(plan.deadline, deadline);
    }

    #[test]
    fn late_single_fires_one_minute_from_now() {
        let now = at(2025, 1, 4, 23, 59, 30);
        let deadline = at(2025, 1, 5, 0, 0, 0);
        let plan =
            compute_initial_fire_time(now, deadline, OffsetToken::Short, RecurrenceMode::Single, None)
                .unwrap();
        assert_eq!(plan.fire_at, now + Duration::seconds(60));
        assert_eq!(plan.deadline, deadline);
    }

    #[test]
    fn candidate_equal_to_now_counts_as_late() {
        let now = at(2025, 1, 4, 0, 0, 0);
        let deadline = now + Duration::days(1);
        let plan =
            compute_initial_fire_time(now, deadline, OffsetToken::Medium, RecurrenceMode::Single, None)
                .unwrap();
        assert_eq!(plan.fire_at, now + LATE_GRACE);
    }

    #[test]
    fn stale_periodic_advances_whole_weeks() {
        let now = at(2025, 1, 10, 0, 0, 0);
        let deadline = at(2025, 1, 1, 0, 0, 0);
        let end = at(2025, 2, 1, 0, 0, 0);
        let plan = compute_initial_fire_time(
            now,
            deadline,
            OffsetToken::Long,
            RecurrenceMode::Periodic,
            Some(end),
        )
        .unwrap();
        // 2025-01-01 - 3d = 2024-12-29; +7d = 01-05 (past); +14d = 01-12 (future)
        assert_eq!(plan.deadline, at(2025, 1, 15, 0, 0, 0));
        assert_eq!(plan.fire_at, at(2025, 1, 12, 0, 0, 0));
        assert!(plan.fire_at > now);
    }

    #[test]
    fn stale_periodic_past_end_has_no_occurrence() {
        let now = at(2025, 3, 10, 0, 0, 0);
        let deadline = at(2025, 2, 1, 0, 0, 0);
        let end = at(2025, 2, 5, 0, 0, 0);
        assert!(
            compute_initial_fire_time(
                now,
                deadline,
                OffsetToken::Long,
                RecurrenceMode::Periodic,
                Some(end)
            )
            .is_none()
        );
    }

    #[test]
    fn stale_periodic_keeps_weekday_and_time_of_day() {
        let now = at(2025, 6, 18, 9, 30, 0);
        let deadline = now - Duration::days(1) + Duration::minutes(17);
        let end = now + Duration::days(60);
        let plan = compute_initial_fire_time(
            now,
            deadline,
            OffsetToken::Medium,
            RecurrenceMode::Periodic,
            Some(end),
        )
        .unwrap();

        assert!(plan.fire_at > now);
        assert_eq!(plan.deadline.weekday(), deadline.weekday());
        assert_eq!(plan.deadline.time(), deadline.time());
        let shift = (plan.deadline - deadline).num_milliseconds();
        assert_eq!(shift % PERIOD.num_milliseconds(), 0);
        // the smallest such shift: one period less would still be late
        assert!(plan.fire_at - PERIOD <= now);
        assert_eq!(plan.fire_at.minute(), deadline.minute());
    }

    #[test]
    fn very_old_deadline_without_end_terminates() {
        let now = at(2025, 1, 1, 0, 0, 0);
        let deadline = at(1975, 1, 1, 0, 0, 0);
        let plan = compute_initial_fire_time(
            now,
            deadline,
            OffsetToken::Short,
            RecurrenceMode::Periodic,
            None,
        )
        .unwrap();
        assert!(plan.fire_at > now);
        assert!(plan.fire_at <= now + PERIOD);
    }

    #[rstest]
    #[case::short(OffsetToken::Short)]
    #[case::medium(OffsetToken::Medium)]
    #[case::long(OffsetToken::Long)]
    fn initial_fire_time_is_always_future(#[case] offset: OffsetToken) {
        let now = at(2025, 5, 5, 12, 0, 0);
        for hours in [-24 * 30, -25, -3, 0, 1, 3, 4, 24 * 4] {
            let deadline = now + Duration::hours(hours);
            for mode in [RecurrenceMode::Single, RecurrenceMode::Periodic] {
                let plan = compute_initial_fire_time(now, deadline, offset, mode, None).unwrap();
                assert!(plan.fire_at > now, "{mode:?} {hours}h {offset}");
            }
        }
    }

    #[test]
    fn next_periodic_is_pure_and_moves_one_period() {
        let deadline = at(2025, 1, 1, 0, 0, 0);
        let a = compute_next_periodic(deadline, OffsetToken::Medium, None).unwrap();
        let b = compute_next_periodic(deadline, OffsetToken::Medium, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.deadline, at(2025, 1, 8, 0, 0, 0));
        assert_eq!(a.fire_at, at(2025, 1, 7, 0, 0, 0));

        let c = compute_next_periodic(a.deadline, OffsetToken::Medium, None).unwrap();
        assert_eq!((c.deadline - a.deadline).num_milliseconds(), 604_800_000);
        assert_eq!((c.fire_at - a.fire_at).num_milliseconds(), 604_800_000);
    }

    #[rstest]
    #[case::before_end(Duration::days(8), true)]
    #[case::exactly_at_end(Duration::days(7), true)]
    #[case::one_ms_past_end(Duration::days(7) - Duration::milliseconds(1), false)]
    #[case::well_past_end(Duration::days(3), false)]
    fn next_periodic_end_boundary_is_inclusive(#[case] end_after: Duration, #[case] some: bool) {
        let deadline = at(2025, 1, 25, 0, 0, 0);
        let next = compute_next_periodic(deadline, OffsetToken::Short, Some(deadline + end_after));
        assert_eq!(next.is_some(), some);
    }

    #[test]
    fn dates_at_the_edge_of_the_range_give_none() {
        let min = DateTime::<Utc>::MIN_UTC;
        let max = DateTime::<Utc>::MAX_UTC;

        // offset would step before the first representable instant
        assert!(
            compute_initial_fire_time(min, min, OffsetToken::Long, RecurrenceMode::Single, None)
                .is_none()
        );
        // late single whose grace runs past the last instant
        assert!(
            compute_initial_fire_time(max, max, OffsetToken::Short, RecurrenceMode::Single, None)
                .is_none()
        );
        // stale periodic that would need a week beyond the range
        let deadline = max - Duration::days(1);
        assert!(
            compute_initial_fire_time(
                max,
                deadline,
                OffsetToken::Short,
                RecurrenceMode::Periodic,
                None
            )
            .is_none()
        );
        assert!(compute_next_periodic(deadline, OffsetToken::Short, None).is_none());
    }
}
