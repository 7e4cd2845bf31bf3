use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{debug, info};

use crate::{
    daemon::storage::{
        entities::{
            BlockedAttempts, BlockedAttemptsByHour, DailyUsage, DayKey, Hour, HourlyUsage,
            UsageMs,
        },
        record_storage::{put_record, take_record, RecordKey, RecordStorage},
    },
    utils::clock::{local_time, Clock},
};

use super::{
    config::HourSplitPolicy,
    hours::{split_by_local_hour, HourSegment},
};

/// Merges durations and blocked attempts into the persisted tables. Every call is one
/// [RecordStorage::update] of the records it touches.
pub struct Aggregator<S> {
    storage: S,
    clock: Arc<dyn Clock>,
    policy: HourSplitPolicy,
}

impl<S: RecordStorage> Aggregator<S> {
    pub fn new(storage: S, clock: Arc<dyn Clock>, policy: HourSplitPolicy) -> Self {
        Self {
            storage,
            clock,
            policy,
        }
    }

    /// Attributes `elapsed` of focus on `domain`, started at `start`, to the usage tables.
    pub async fn record_duration(
        &self,
        domain: &str,
        elapsed: Duration,
        start: DateTime<Utc>,
    ) -> Result<()> {
        if elapsed <= Duration::zero() {
            debug!("Skipping non-positive duration {elapsed} for {domain}");
            return Ok(());
        }
        let today = DayKey::of(local_time(&*self.clock, self.clock.time()));
        let segments = split_by_local_hour(&*self.clock, start, elapsed);

        let policy = self.policy;
        self.storage
            .update(
                &[RecordKey::SiteUsage, RecordKey::SiteUsageByHour],
                |values| {
                    let mut daily: DailyUsage = take_record(values, RecordKey::SiteUsage)?;
                    let mut hourly: HourlyUsage = take_record(values, RecordKey::SiteUsageByHour)?;
                    merge_duration(
                        &mut daily,
                        &mut hourly,
                        domain,
                        elapsed.num_milliseconds() as UsageMs,
                        &segments,
                        today,
                        policy,
                    );
                    put_record(values, RecordKey::SiteUsage, &daily)?;
                    put_record(values, RecordKey::SiteUsageByHour, &hourly)
                },
            )
            .await?;
        debug!("Recorded {}ms on {domain}", elapsed.num_milliseconds());
        Ok(())
    }

    /// Counts one redirected navigation to `domain` in the current local day and hour.
    pub async fn record_blocked_attempt(&self, domain: &str) -> Result<()> {
        let now = local_time(&*self.clock, self.clock.time());
        let today = DayKey::of(now);
        let hour = now.hour() as Hour;

        self.storage
            .update(
                &[RecordKey::BlockedAttempts, RecordKey::BlockedAttemptsByHour],
                |values| {
                    let mut attempts: BlockedAttempts =
                        take_record(values, RecordKey::BlockedAttempts)?;
                    let mut by_hour: BlockedAttemptsByHour =
                        take_record(values, RecordKey::BlockedAttemptsByHour)?;

                    *attempts
                        .entry(today)
                        .or_default()
                        .entry(domain.to_string())
                        .or_default() += 1;
                    *by_hour
                        .entry(today)
                        .or_default()
                        .entry(domain.to_string())
                        .or_default()
                        .entry(hour)
                        .or_default() += 1;

                    put_record(values, RecordKey::BlockedAttempts, &attempts)?;
                    put_record(values, RecordKey::BlockedAttemptsByHour, &by_hour)
                },
            )
            .await?;
        info!("Recorded blocked attempt on {domain} at {today} {hour}:00");
        Ok(())
    }
}

fn merge_duration(
    daily: &mut DailyUsage,
    hourly: &mut HourlyUsage,
    domain: &str,
    elapsed_ms: UsageMs,
    segments: &[HourSegment],
    today: DayKey,
    policy: HourSplitPolicy,
) {
    let mut add_hourly = |segment: &HourSegment| {
        *hourly
            .entry(segment.day)
            .or_default()
            .entry(domain.to_string())
            .or_default()
            .entry(segment.hour)
            .or_default() += segment.ms;
    };

    match policy {
        HourSplitPolicy::TodayOnly => {
            *daily
                .entry(today)
                .or_default()
                .entry(domain.to_string())
                .or_default() += elapsed_ms;
            for segment in segments.iter().filter(|v| v.day == today) {
                add_hourly(segment);
            }
        }
        HourSplitPolicy::PerDay => {
            for segment in segments {
                *daily
                    .entry(segment.day)
                    .or_default()
                    .entry(domain.to_string())
                    .or_default() += segment.ms;
                add_hourly(segment);
            }
        }
    }
}
