use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    daemon::storage::{
        entities::{
            AttemptCount, BlockList, BlockedAttempts, BlockedAttemptsByHour, DailyUsage, DayKey,
            Hour, HourlyUsage, UsageMs, HOURS_PER_DAY,
        },
        record_storage::{take_record, RecordKey, RecordStorage},
    },
    utils::clock::{local_time, Clock},
};

use super::config::MatchRule;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteTime {
    pub domain: String,
    #[serde(rename = "time")]
    pub time_ms: UsageMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAttempts {
    pub domain: String,
    pub count: AttemptCount,
}

pub fn is_blocked(domain: &str, block_list: &BlockList, match_rule: MatchRule) -> bool {
    block_list
        .iter()
        .any(|blocked| match_rule.matches(blocked, domain))
}

/// The `n` unblocked sites with the most time on `day`, most used first.
pub fn top_sites(
    daily: &DailyUsage,
    day: DayKey,
    n: usize,
    block_list: &BlockList,
    match_rule: MatchRule,
) -> Vec<SiteTime> {
    let Some(domains) = daily.get(&day) else {
        return vec![];
    };
    let mut sites = domains
        .iter()
        .filter(|(domain, _)| !is_blocked(domain, block_list, match_rule))
        .map(|(domain, time)| SiteTime {
            domain: domain.clone(),
            time_ms: *time,
        })
        .collect::<Vec<_>>();
    sites.sort_by(|a, b| b.time_ms.cmp(&a.time_ms).then_with(|| a.domain.cmp(&b.domain)));
    sites.truncate(n);
    sites
}

/// Blocked attempts per hour of `day`, summed over the block list entries.
pub fn attempt_heatmap(
    by_hour: &BlockedAttemptsByHour,
    day: DayKey,
    block_list: &BlockList,
) -> [AttemptCount; HOURS_PER_DAY] {
    let mut hours = [0; HOURS_PER_DAY];
    let Some(domains) = by_hour.get(&day) else {
        return hours;
    };
    for domain in block_list.iter() {
        if let Some(counts) = domains.get(domain) {
            add_hours(&mut hours, counts.iter());
        }
    }
    hours
}

/// Time spent on `domain` in every hour of `day`.
pub fn site_hourly_profile(
    hourly: &HourlyUsage,
    day: DayKey,
    domain: &str,
) -> [UsageMs; HOURS_PER_DAY] {
    let mut hours = [0; HOURS_PER_DAY];
    if let Some(usage) = hourly.get(&day).and_then(|v| v.get(domain)) {
        add_hours(&mut hours, usage.iter());
    }
    hours
}

/// Attempts on `day` for each block list entry, in block list order.
pub fn blocked_attempt_counts(
    attempts: &BlockedAttempts,
    day: DayKey,
    block_list: &BlockList,
) -> Vec<SiteAttempts> {
    let today = attempts.get(&day);
    block_list
        .iter()
        .map(|domain| SiteAttempts {
            domain: domain.to_string(),
            count: today.and_then(|v| v.get(domain)).copied().unwrap_or(0),
        })
        .collect()
}

fn add_hours<'a>(hours: &mut [u64; HOURS_PER_DAY], values: impl Iterator<Item = (&'a Hour, &'a u64)>) {
    for (hour, value) in values {
        // Hours outside of a day can only come from hand edited data.
        if let Some(slot) = hours.get_mut(*hour as usize) {
            *slot += *value;
        }
    }
}

/// Read-only view over the persisted tables, for presentation surfaces.
pub struct UsageQueries<S> {
    storage: S,
    clock: Arc<dyn Clock>,
    match_rule: MatchRule,
}

impl<S: RecordStorage> UsageQueries<S> {
    pub fn new(storage: S, clock: Arc<dyn Clock>, match_rule: MatchRule) -> Self {
        Self {
            storage,
            clock,
            match_rule,
        }
    }

    pub fn today(&self) -> DayKey {
        DayKey::of(local_time(&*self.clock, self.clock.time()))
    }

    pub async fn top_sites(&self, day: DayKey, n: usize) -> Result<Vec<SiteTime>> {
        let mut values = self
            .storage
            .get(&[RecordKey::SiteUsage, RecordKey::BlockedSites])
            .await?;
        let daily: DailyUsage = take_record(&mut values, RecordKey::SiteUsage)?;
        let block_list: BlockList = take_record(&mut values, RecordKey::BlockedSites)?;
        Ok(top_sites(&daily, day, n, &block_list, self.match_rule))
    }

    pub async fn attempt_heatmap(&self, day: DayKey) -> Result<[AttemptCount; HOURS_PER_DAY]> {
        let mut values = self
            .storage
            .get(&[RecordKey::BlockedAttemptsByHour, RecordKey::BlockedSites])
            .await?;
        let by_hour: BlockedAttemptsByHour =
            take_record(&mut values, RecordKey::BlockedAttemptsByHour)?;
        let block_list: BlockList = take_record(&mut values, RecordKey::BlockedSites)?;
        Ok(attempt_heatmap(&by_hour, day, &block_list))
    }

    pub async fn site_hourly_profile(
        &self,
        day: DayKey,
        domain: &str,
    ) -> Result<[UsageMs; HOURS_PER_DAY]> {
        let mut values = self.storage.get(&[RecordKey::SiteUsageByHour]).await?;
        let hourly: HourlyUsage = take_record(&mut values, RecordKey::SiteUsageByHour)?;
        Ok(site_hourly_profile(&hourly, day, domain))
    }

    pub async fn blocked_attempt_counts(&self, day: DayKey) -> Result<Vec<SiteAttempts>> {
        let mut values = self
            .storage
            .get(&[RecordKey::BlockedAttempts, RecordKey::BlockedSites])
            .await?;
        let attempts: BlockedAttempts = take_record(&mut values, RecordKey::BlockedAttempts)?;
        let block_list: BlockList = take_record(&mut values, RecordKey::BlockedSites)?;
        Ok(blocked_attempt_counts(&attempts, day, &block_list))
    }
}
