use chrono::{DateTime, Duration, Timelike, Utc};

use crate::{
    daemon::storage::entities::{DayKey, Hour, UsageMs},
    utils::{
        clock::{local_time, Clock},
        time::next_hour_start,
    },
};

/// Part of a session that lies inside a single local hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourSegment {
    pub day: DayKey,
    pub hour: Hour,
    pub ms: UsageMs,
}

/// Splits `[start, start + elapsed)` at local hour boundaries.
///
/// `start` is truncated to whole milliseconds first, so the segments always add up to exactly
/// `elapsed` in milliseconds.
pub fn split_by_local_hour(
    clock: &dyn Clock,
    start: DateTime<Utc>,
    elapsed: Duration,
) -> Vec<HourSegment> {
    let start = DateTime::from_timestamp_millis(start.timestamp_millis()).unwrap_or(start);
    let end = start + Duration::milliseconds(elapsed.num_milliseconds());

    let mut segments = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let local = local_time(clock, cursor);
        let boundary = next_hour_start(local).with_timezone(&Utc);
        let segment_end = boundary.min(end);
        segments.push(HourSegment {
            day: DayKey::of(local),
            hour: local.hour() as Hour,
            ms: (segment_end - cursor).num_milliseconds().max(0) as UsageMs,
        });
        cursor = segment_end;
    }
    segments
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

    use super::split_by_local_hour;
    use crate::{
        daemon::storage::entities::DayKey,
        utils::clock::{test_clock::ManualClock, Clock},
    };

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDateTime::new(
            NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
        )
    }

    #[test]
    fn test_single_hour() {
        let clock = ManualClock::at_local(at(7, 10, 5));
        let segments = split_by_local_hour(&clock, clock.time(), Duration::minutes(30));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].hour, 10);
        assert_eq!(segments[0].ms, 30 * 60 * 1000);
    }

    #[test]
    fn test_crossing_midnight() {
        let clock = ManualClock::at_local(at(7, 23, 50));
        let segments = split_by_local_hour(&clock, clock.time(), Duration::minutes(20));
        assert_eq!(segments.len(), 2);
        assert_eq!(
            segments[0].day,
            DayKey::new(NaiveDate::from_ymd_opt(2025, 3, 7).unwrap())
        );
        assert_eq!((segments[0].hour, segments[0].ms), (23, 10 * 60 * 1000));
        assert_eq!(
            segments[1].day,
            DayKey::new(NaiveDate::from_ymd_opt(2025, 3, 8).unwrap())
        );
        assert_eq!((segments[1].hour, segments[1].ms), (0, 10 * 60 * 1000));
    }

    #[test]
    fn test_hours_are_local() {
        // 21:30 UTC is 23:30 at +02:00
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let clock = ManualClock::with_offset(at(7, 23, 30), offset);
        assert_eq!(
            clock.time(),
            Utc.with_ymd_and_hms(2025, 3, 7, 21, 30, 0).unwrap()
        );
        let segments = split_by_local_hour(&clock, clock.time(), Duration::minutes(45));
        assert_eq!(
            segments.iter().map(|v| v.hour).collect::<Vec<_>>(),
            vec![23, 0]
        );
    }

    #[test]
    fn test_long_session_sums_exactly() {
        let clock = ManualClock::at_local(at(7, 8, 17));
        let start = clock.time() + Duration::nanoseconds(123_456);
        let elapsed = Duration::milliseconds(5 * 3600 * 1000 + 1234);
        let segments = split_by_local_hour(&clock, start, elapsed);
        assert!(segments.len() <= 5 + 1 + 1);
        assert_eq!(
            segments.iter().map(|v| v.ms).sum::<u64>(),
            elapsed.num_milliseconds() as u64
        );
    }

    #[test]
    fn test_empty_interval() {
        let clock = ManualClock::at_local(at(7, 8, 0));
        assert!(split_by_local_hour(&clock, clock.time(), Duration::zero()).is_empty());
    }
}
