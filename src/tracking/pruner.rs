use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use anyhow::Result;
use chrono::Days;
use tracing::{debug, info};

use crate::{
    daemon::storage::{
        entities::{BlockList, DailyUsage, DayKey, HourlyUsage},
        record_storage::{put_record, take_record, RecordKey, RecordStorage},
    },
    utils::clock::{local_time, Clock},
};

use super::{config::MatchRule, query::is_blocked};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Removed day/domain entries.
    pub sites: usize,
    /// Removed day keys, summed over tables.
    pub days: usize,
}

/// Bounds storage growth. Each day keeps only its most used unblocked sites, and optionally whole
/// days past the retention window are dropped.
pub struct Pruner<S> {
    storage: S,
    clock: Arc<dyn Clock>,
    keep_top: usize,
    match_rule: MatchRule,
    retention_days: Option<u32>,
}

impl<S: RecordStorage> Pruner<S> {
    pub fn new(
        storage: S,
        clock: Arc<dyn Clock>,
        keep_top: usize,
        match_rule: MatchRule,
        retention_days: Option<u32>,
    ) -> Self {
        Self {
            storage,
            clock,
            keep_top,
            match_rule,
            retention_days,
        }
    }

    /// Reduces every day of the usage tables to the `keep_top` unblocked sites with the most
    /// time. Returns the number of removed day/domain entries.
    pub async fn prune(&self) -> Result<usize> {
        let keys = [
            RecordKey::SiteUsage,
            RecordKey::SiteUsageByHour,
            RecordKey::BlockedSites,
        ];
        let removed = self
            .storage
            .update(&keys, |values| {
                let mut daily: DailyUsage = take_record(values, RecordKey::SiteUsage)?;
                let mut hourly: HourlyUsage = take_record(values, RecordKey::SiteUsageByHour)?;
                let block_list: BlockList = take_record(values, RecordKey::BlockedSites)?;

                let removed = prune_top_sites(
                    &mut daily,
                    &mut hourly,
                    &block_list,
                    self.keep_top,
                    self.match_rule,
                );
                if removed > 0 {
                    put_record(values, RecordKey::SiteUsage, &daily)?;
                    put_record(values, RecordKey::SiteUsageByHour, &hourly)?;
                }
                Ok(removed)
            })
            .await?;
        if removed == 0 {
            debug!("Nothing to prune");
        } else {
            info!("Pruned {removed} site entries");
        }
        Ok(removed)
    }

    /// Drops every day older than `cutoff` from all usage and attempt tables. Returns the number
    /// of removed day keys.
    pub async fn prune_days_before(&self, cutoff: DayKey) -> Result<usize> {
        let keys = [
            RecordKey::SiteUsage,
            RecordKey::SiteUsageByHour,
            RecordKey::BlockedAttempts,
            RecordKey::BlockedAttemptsByHour,
        ];
        let removed = self
            .storage
            .update(&keys, |values| {
                let mut removed = 0;
                for key in keys {
                    // The four tables differ in value types, only their day level matters here.
                    let mut table: BTreeMap<DayKey, serde_json::Value> = take_record(values, key)?;
                    let count = drop_days_before(&mut table, cutoff);
                    if count > 0 {
                        removed += count;
                        put_record(values, key, &table)?;
                    }
                }
                Ok(removed)
            })
            .await?;
        if removed > 0 {
            info!("Dropped {removed} day entries before {cutoff}");
        }
        Ok(removed)
    }

    /// Runs everything the periodic timer is responsible for.
    pub async fn run_scheduled(&self) -> Result<PruneReport> {
        let sites = self.prune().await?;
        let days = match self.retention_days {
            Some(days) => {
                let today = local_time(&*self.clock, self.clock.time()).date_naive();
                let cutoff = today
                    .checked_sub_days(Days::new(days.into()))
                    .unwrap_or(today);
                self.prune_days_before(DayKey::new(cutoff)).await?
            }
            None => 0,
        };
        Ok(PruneReport { sites, days })
    }
}

/// Keeps the `keep_top` unblocked domains with most time for every day of `daily`. Blocked domains
/// never survive. Hourly rows follow the daily table. Ties go to the alphabetically smaller domain
/// so repeated runs keep the same set.
pub fn prune_top_sites(
    daily: &mut DailyUsage,
    hourly: &mut HourlyUsage,
    block_list: &BlockList,
    keep_top: usize,
    match_rule: MatchRule,
) -> usize {
    let mut removed = 0;
    for (day, domains) in daily.iter_mut() {
        let mut ranked = domains
            .iter()
            .filter(|(domain, _)| !is_blocked(domain, block_list, match_rule))
            .map(|(domain, time)| (domain.clone(), *time))
            .collect::<Vec<_>>();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let kept = ranked
            .into_iter()
            .take(keep_top)
            .map(|v| v.0)
            .collect::<HashSet<_>>();

        let before = domains.len();
        domains.retain(|domain, _| kept.contains(domain));
        removed += before - domains.len();

        if let Some(hours) = hourly.get_mut(day) {
            hours.retain(|domain, _| kept.contains(domain));
        }
    }
    removed
}

/// Removes day keys strictly older than `cutoff`.
pub fn drop_days_before<V>(table: &mut BTreeMap<DayKey, V>, cutoff: DayKey) -> usize {
    let kept = table.split_off(&cutoff);
    let removed = table.len();
    *table = kept;
    removed
}
