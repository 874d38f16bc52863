//! Vote score aggregation and presentation
//!
//! Scores are stored as integers carrying a fixed multiplier; formatting
//! buckets them into magnitude tiers (plain, K, M, B, ∞) at render time.

use chrono::{DateTime, Utc};

use crate::data::Vote;

/// Fixed-point multiplier applied to aggregated vote weights
pub const SCORE_MULTIPLIER: f64 = 10000.0;

const SCORE_MAX_K: f64 = 10000.0;
const SCORE_MAX_M: f64 = 10000000.0;
const SCORE_MAX_B: f64 = 10000000000.0;

/// Sum of vote weights for one item
///
/// A pure fold; recomputing over the same vote set always yields the
/// same value.
pub fn aggregate(votes: &[Vote]) -> i64 {
    votes.iter().map(|v| v.weight).sum()
}

/// The integer score stored on an item for the given vote set
pub fn stored_score(votes: &[Vote]) -> i64 {
    aggregate(votes) * SCORE_MULTIPLIER as i64
}

/// Render a stored score as a bounded-precision human string
///
/// The magnitude tier is chosen from `d = ceil(log10(|score / 10000|))`:
/// below 5 digits the rounded-up integer is shown as-is, then `K`, `M`
/// and `B` suffixes, and `∞` past the `B` range.
pub fn format_score(score: i64) -> String {
    let base = score as f64 / SCORE_MULTIPLIER;
    let d = base.abs().log10().ceil();

    if d < 5.0 {
        format!("{}", base.ceil() as i64)
    } else if d < 8.0 {
        format!("{:.1}K", base / SCORE_MAX_K)
    } else if d < 11.0 {
        format!("{:.1}M", base / SCORE_MAX_M)
    } else if d < 13.0 {
        format!("{:.1}B", base / SCORE_MAX_B)
    } else {
        let sign = if base < 0.0 { "-" } else { "" };
        format!("{}∞", sign)
    }
}

/// Render a timestamp as a relative English phrase ("3 hours ago")
pub fn relative_date(then: DateTime<Utc>) -> String {
    let interval = Utc::now() - then;

    let pluralize = |value: f64, unit: &str| -> String {
        if value.round() != 1.0 {
            let unit = if unit == "century" { "centurie" } else { unit };
            format!("{}s", unit)
        } else {
            unit.to_string()
        }
    };

    let when = if interval.num_seconds() < 0 {
        "in the future"
    } else {
        "ago"
    };

    let hours = (interval.num_seconds() as f64 / 3600.0).abs();
    let minutes = (interval.num_seconds() as f64 / 60.0).abs();
    let seconds = (interval.num_seconds() as f64).abs();

    if seconds < 30.0 {
        return "now".to_string();
    }

    let (val, unit) = if hours < 1.0 {
        if minutes < 1.0 {
            (seconds % 60.0, "second")
        } else {
            (minutes % 60.0, "minute")
        }
    } else if hours < 24.0 {
        (hours, "hour")
    } else if hours < 168.0 {
        (hours / 24.0, "day")
    } else if hours < 672.0 {
        (hours / 168.0, "week")
    } else if hours < 8760.0 {
        (hours / 672.0, "month")
    } else if hours < 87600.0 {
        (hours / 8760.0, "year")
    } else if hours < 876000.0 {
        (hours / 87600.0, "decade")
    } else {
        (hours / 876000.0, "century")
    };

    format!("{:.0} {} {}", val, pluralize(val, unit), when)
}

/// Render a timestamp in the fixed document format
pub fn format_date(then: DateTime<Utc>) -> String {
    then.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Hash;
    use chrono::Duration;

    fn vote(weight: i64) -> Vote {
        Vote {
            submitted_by: Hash::from_content(b"voter"),
            item: Hash::from_content(b"item"),
            weight,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn aggregate_sums_weights() {
        let votes = vec![vote(1), vote(1), vote(-1), vote(1)];
        assert_eq!(aggregate(&votes), 2);
        assert_eq!(stored_score(&votes), 20_000);
        assert_eq!(aggregate(&[]), 0);
    }

    #[test]
    fn format_score_plain_bucket() {
        assert_eq!(format_score(0), "0");
        assert_eq!(format_score(500_000), "50");
        assert_eq!(format_score(-500_000), "-50");
        // one vote
        assert_eq!(format_score(10_000), "1");
    }

    #[test]
    fn format_score_k_bucket() {
        // base 1,000,000 -> d = 6 -> K
        assert_eq!(format_score(10_000_000_000), "100.0K");
        // base 10,000,000 -> d = 7, still inside the K bucket
        assert_eq!(format_score(100_000_000_000), "1000.0K");
        // base 100,000 -> d = 5 -> lower K boundary
        assert_eq!(format_score(1_000_000_000), "10.0K");
    }

    #[test]
    fn format_score_m_and_b_buckets() {
        // base 1e8 -> d = 8 -> M
        assert_eq!(format_score(1_000_000_000_000), "10.0M");
        // base 1e11 -> d = 11 -> B
        assert_eq!(format_score(1_000_000_000_000_000), "10.0B");
    }

    #[test]
    fn format_score_saturates_to_infinity() {
        // base 1e13 -> d = 13 -> out of range
        assert_eq!(format_score(100_000_000_000_000_000), "∞");
        assert_eq!(format_score(-100_000_000_000_000_000), "-∞");
    }

    #[test]
    fn relative_date_ladder() {
        assert_eq!(relative_date(Utc::now()), "now");
        assert_eq!(
            relative_date(Utc::now() - Duration::minutes(5)),
            "5 minutes ago"
        );
        assert_eq!(relative_date(Utc::now() - Duration::hours(3)), "3 hours ago");
        assert_eq!(relative_date(Utc::now() - Duration::days(2)), "2 days ago");
        assert_eq!(relative_date(Utc::now() - Duration::weeks(2)), "2 weeks ago");
        assert_eq!(
            relative_date(Utc::now() - Duration::days(60)),
            "2 months ago"
        );
    }

    #[test]
    fn relative_date_handles_future_times() {
        let phrase = relative_date(Utc::now() + Duration::hours(5));
        assert!(phrase.ends_with("in the future"), "got: {phrase}");
    }

    #[test]
    fn format_date_is_millisecond_precise() {
        let formatted = format_date(Utc::now());
        // 2024-05-01T12:00:00.000+00:00
        assert_eq!(formatted.len(), "2024-05-01T12:00:00.000+00:00".len());
    }
}
