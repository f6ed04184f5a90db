//! Fixed-window boundary math (spec §4.2 "Window boundary math (fixed)").

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::tier::Tier;

/// Returns `(window_start, window_end)` for the fixed window containing
/// `now`, for the given tier.
pub fn fixed_window(tier: Tier, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    match tier {
        Tier::Minute => {
            let start = now
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .expect("valid truncation");
            (start, start + Duration::minutes(1))
        }
        Tier::Hour => {
            let start = now
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .expect("valid truncation");
            (start, start + Duration::hours(1))
        }
        Tier::Day => {
            let start = midnight(now);
            (start, start + Duration::days(1))
        }
        Tier::Week => {
            // weekday index 0 (Monday) .. 6 (Sunday)
            let days_since_monday = now.weekday().num_days_from_monday() as i64;
            let start = midnight(now) - Duration::days(days_since_monday);
            (start, start + Duration::days(7))
        }
        Tier::Month => {
            let start = Utc
                .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
                .single()
                .expect("valid first-of-month");
            let end = if now.month() == 12 {
                Utc.with_ymd_and_hms(now.year() + 1, 1, 1, 0, 0, 0)
                    .single()
                    .expect("valid january rollover")
            } else {
                Utc.with_ymd_and_hms(now.year(), now.month() + 1, 1, 0, 0, 0)
                    .single()
                    .expect("valid next-month start")
            };
            (start, end)
        }
    }
}

fn midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .expect("valid midnight")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_truncates_to_zero_seconds() {
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 10, 15, 42).unwrap();
        let (start, end) = fixed_window(Tier::Minute, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 31, 10, 15, 0).unwrap());
        assert_eq!(end - start, Duration::minutes(1));
    }

    #[test]
    fn week_starts_monday() {
        // 2026-07-31 is a Friday.
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        let (start, _) = fixed_window(Tier::Week, now);
        assert_eq!(start.weekday(), chrono::Weekday::Mon);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap());
    }

    #[test]
    fn month_rolls_over_december() {
        let now = Utc.with_ymd_and_hms(2026, 12, 15, 0, 0, 0).unwrap();
        let (start, end) = fixed_window(Tier::Month, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }
}
