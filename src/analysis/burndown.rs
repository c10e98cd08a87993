//! Burndown and completion projection.
//!
//! Compares the observed burn rate of a minimize-to-zero key result with
//! the rate required to reach zero by its deadline.

use crate::models::{BurndownResult, BurndownStatus, Projection};
use chrono::{Days, NaiveDate};

/// Date remaining work reaches zero at the observed velocity.
///
/// Fractional days round up. No positive velocity means `Never`, unless
/// nothing remains.
pub fn project_completion_date(
    remaining: f64,
    velocity: Option<f64>,
    current_date: NaiveDate,
) -> Projection {
    if remaining <= 0.0 {
        return Projection::On(current_date);
    }

    match velocity {
        Some(v) if v.is_finite() && v > 0.0 => {
            let days = (remaining / v).ceil();
            if !days.is_finite() {
                return Projection::Never;
            }
            current_date
                .checked_add_days(Days::new(days as u64))
                .map(Projection::On)
                .unwrap_or(Projection::Never)
        }
        _ => Projection::Never,
    }
}

/// Required vs. observed daily rate for remaining work.
///
/// `days_until_deadline` is negative once the deadline has passed; the
/// required rate then treats the deadline as one day away.
pub fn calculate_burndown(
    remaining: f64,
    deadline: NaiveDate,
    velocity: Option<f64>,
    current_date: NaiveDate,
) -> BurndownResult {
    let remaining = if remaining.is_finite() {
        remaining.max(0.0)
    } else {
        0.0
    };
    let velocity = velocity.filter(|v| v.is_finite());

    let days_until_deadline = (deadline - current_date).num_days();
    let required_daily_rate = remaining / days_until_deadline.max(1) as f64;

    let status = if remaining <= 0.0 {
        BurndownStatus::OnTrack
    } else {
        match velocity {
            Some(v) if v >= required_daily_rate => BurndownStatus::OnTrack,
            _ => BurndownStatus::AtRisk,
        }
    };

    BurndownResult {
        remaining_count: remaining,
        days_until_deadline,
        required_daily_rate,
        observed_daily_rate: velocity,
        projected_completion: project_completion_date(remaining, velocity, current_date),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_nothing_remaining_is_on_track() {
        let today = date(2025, 3, 1);
        for velocity in [None, Some(0.0), Some(-4.0), Some(10.0)] {
            let b = calculate_burndown(0.0, date(2025, 1, 1), velocity, today);
            assert_eq!(b.status, BurndownStatus::OnTrack);
            assert_eq!(b.projected_completion, Projection::On(today));
        }
    }

    #[test]
    fn test_behind_schedule_is_at_risk() {
        let today = date(2025, 3, 1);
        let deadline = date(2025, 4, 20); // 50 days out
        let b = calculate_burndown(70.0, deadline, Some(1.0), today);

        assert_eq!(b.days_until_deadline, 50);
        assert!((b.required_daily_rate - 1.4).abs() < 1e-9);
        assert_eq!(b.status, BurndownStatus::AtRisk);
        assert_eq!(b.projected_completion, Projection::On(date(2025, 5, 10)));
    }

    #[test]
    fn test_fast_enough_is_on_track() {
        let today = date(2025, 3, 1);
        let b = calculate_burndown(70.0, date(2025, 4, 20), Some(1.4), today);
        assert_eq!(b.status, BurndownStatus::OnTrack);
    }

    #[test]
    fn test_overdue_deadline() {
        let today = date(2025, 3, 1);
        let b = calculate_burndown(10.0, date(2025, 2, 19), Some(2.0), today);
        assert_eq!(b.days_until_deadline, -10);
        assert_eq!(b.required_daily_rate, 10.0);
        assert_eq!(b.status, BurndownStatus::AtRisk);
    }

    #[test]
    fn test_no_velocity_never_completes() {
        let today = date(2025, 3, 1);
        assert_eq!(project_completion_date(50.0, Some(0.0), today), Projection::Never);
        assert_eq!(project_completion_date(50.0, Some(-1.5), today), Projection::Never);
        assert_eq!(project_completion_date(50.0, None, today), Projection::Never);
        assert_eq!(
            project_completion_date(50.0, Some(f64::NAN), today),
            Projection::Never
        );
    }

    #[test]
    fn test_projection_rounds_up() {
        let today = date(2025, 3, 1);
        assert_eq!(
            project_completion_date(10.0, Some(4.0), today),
            Projection::On(date(2025, 3, 4))
        );
        assert_eq!(
            project_completion_date(1e300, Some(1e-300), today),
            Projection::Never
        );
    }
}
