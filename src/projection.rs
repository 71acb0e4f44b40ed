//! End-of-cycle usage projection from the rate observed so far.
//!
//! Pure functions over a quota record and its cycle window; nothing here
//! reads or writes shared state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::QuotaRecord;

/// Tolerance band, in percentage points, inside which the projection is
/// considered flat.
pub const DEFAULT_TREND_TOLERANCE: f64 = 5.0;

/// Direction the projected end-of-cycle usage is heading relative to where
/// the account stands today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Extrapolated end-of-cycle usage for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Fraction of the cycle elapsed, clamped to `(0, 1]`.
    pub elapsed_fraction: f64,
    pub daily_rate: f64,
    pub projected_used: f64,
    /// Projected usage as a percentage of the limit.
    pub projected_percent: f64,
    pub current_percent: f64,
    pub will_exceed: bool,
    pub projected_overage: f64,
    pub trend: Trend,
}

/// Project with the default ±5-point tolerance band.
pub fn project(
    record: &QuotaRecord,
    cycle_start: DateTime<Utc>,
    cycle_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Projection {
    project_with_tolerance(record, cycle_start, cycle_end, now, DEFAULT_TREND_TOLERANCE)
}

pub fn project_with_tolerance(
    record: &QuotaRecord,
    cycle_start: DateTime<Utc>,
    cycle_end: DateTime<Utc>,
    now: DateTime<Utc>,
    tolerance: f64,
) -> Projection {
    const SECS_PER_DAY: f64 = 86_400.0;

    let total_secs = (cycle_end - cycle_start).num_seconds().max(1) as f64;
    let elapsed_secs = (now - cycle_start).num_seconds() as f64;
    // Clamp to (0, 1] so a projection at cycle start never divides by zero.
    let elapsed_fraction = (elapsed_secs / total_secs).clamp(f64::EPSILON, 1.0);

    let elapsed_days = (elapsed_fraction * total_secs / SECS_PER_DAY).max(f64::EPSILON);
    let total_days = total_secs / SECS_PER_DAY;

    let daily_rate = record.used / elapsed_days;
    let projected_used = daily_rate * total_days;

    let (current_percent, projected_percent) = if record.limit > 0.0 {
        (
            record.used * 100.0 / record.limit,
            projected_used * 100.0 / record.limit,
        )
    } else {
        (0.0, 0.0)
    };

    let delta = projected_percent - current_percent;
    let trend = if delta > tolerance {
        Trend::Increasing
    } else if delta < -tolerance {
        Trend::Decreasing
    } else {
        Trend::Stable
    };

    Projection {
        elapsed_fraction,
        daily_rate,
        projected_used,
        projected_percent,
        current_percent,
        will_exceed: projected_used > record.limit,
        projected_overage: (projected_used - record.limit).max(0.0),
        trend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(limit: f64, used: f64) -> QuotaRecord {
        let mut r = QuotaRecord::new(limit, Utc::now());
        r.apply(used, Utc::now());
        r
    }

    #[test]
    fn test_halfway_projection_doubles_usage() {
        let start = Utc::now() - Duration::days(15);
        let end = start + Duration::days(30);
        let now = start + Duration::days(15);

        let p = project(&record(100.0, 50.0), start, end, now);

        assert!((p.elapsed_fraction - 0.5).abs() < 1e-9);
        assert!((p.projected_used - 100.0).abs() < 1e-6);
        assert!(!p.will_exceed);
        assert_eq!(p.projected_overage, 0.0);
    }

    #[test]
    fn test_projection_exceeding_limit() {
        let start = Utc::now() - Duration::days(10);
        let end = start + Duration::days(30);
        let now = start + Duration::days(10);

        let p = project(&record(100.0, 60.0), start, end, now);

        // 6/day over 30 days = 180.
        assert!((p.projected_used - 180.0).abs() < 1e-6);
        assert!(p.will_exceed);
        assert!((p.projected_overage - 80.0).abs() < 1e-6);
        assert_eq!(p.trend, Trend::Increasing);
    }

    #[test]
    fn test_cycle_start_does_not_divide_by_zero() {
        let start = Utc::now();
        let end = start + Duration::days(30);

        let p = project(&record(100.0, 0.0), start, end, start);

        assert!(p.elapsed_fraction > 0.0);
        assert_eq!(p.projected_used, 0.0);
        assert!(!p.will_exceed);
    }

    #[test]
    fn test_trend_stable_within_tolerance() {
        let start = Utc::now() - Duration::days(29);
        let end = start + Duration::days(30);
        let now = start + Duration::days(29);

        // Nearly through the cycle: projection barely differs from current.
        let p = project(&record(100.0, 80.0), start, end, now);
        assert_eq!(p.trend, Trend::Stable);
    }

    #[test]
    fn test_zero_limit_reports_zero_percent() {
        let start = Utc::now() - Duration::days(5);
        let end = start + Duration::days(30);

        let p = project(&record(0.0, 10.0), start, end, Utc::now());
        assert_eq!(p.current_percent, 0.0);
        assert_eq!(p.projected_percent, 0.0);
        assert!(p.will_exceed);
    }
}
