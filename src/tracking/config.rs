use std::{fmt::Display, time::Duration};

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::daemon::storage::record_storage::{
    put_record, take_record, RecordKey, RecordStorage, RecordValues,
};

pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 3 * 60;
pub const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_KEEP_TOP: usize = 10;

/// Where the hourly table puts parts of a session that fall on another day than the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HourSplitPolicy {
    /// Every hour segment goes to its own day, in both the daily and the hourly table.
    #[default]
    PerDay,
    /// The whole duration goes to today's daily total, hour segments from other days are
    /// dropped. This is how data written by the browser extension itself looks.
    TodayOnly,
}

impl Display for HourSplitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HourSplitPolicy::PerDay => write!(f, "per-day"),
            HourSplitPolicy::TodayOnly => write!(f, "today-only"),
        }
    }
}

/// How a visited domain is compared against block list entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchRule {
    /// `youtube.com` blocks only `youtube.com`.
    #[default]
    Exact,
    /// `youtube.com` also blocks `music.youtube.com`, but not `notyoutube.com`.
    Suffix,
}

impl MatchRule {
    pub fn matches(&self, blocked: &str, domain: &str) -> bool {
        match self {
            MatchRule::Exact => blocked == domain,
            MatchRule::Suffix => {
                blocked == domain
                    || domain
                        .strip_suffix(blocked)
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }
        }
    }
}

/// Rule last stored by a host, or the default when no host ever ran on the store.
pub async fn stored_match_rule(storage: &impl RecordStorage) -> Result<MatchRule> {
    let mut values = storage.get(&[RecordKey::MatchRule]).await?;
    Ok(take_record(&mut values, RecordKey::MatchRule)?)
}

pub async fn store_match_rule(storage: &impl RecordStorage, rule: MatchRule) -> Result<()> {
    let mut values = RecordValues::new();
    put_record(&mut values, RecordKey::MatchRule, &rule)?;
    storage.set(values).await?;
    Ok(())
}

impl Display for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchRule::Exact => write!(f, "exact"),
            MatchRule::Suffix => write!(f, "suffix"),
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct TrackerConfig {
    #[arg(
        long = "flush-interval-secs",
        default_value_t = DEFAULT_FLUSH_INTERVAL_SECS,
        help = "How often the focused site's time is written out. Bounds data loss on a crash"
    )]
    pub flush_interval_secs: u64,
    #[arg(
        long = "prune-interval-secs",
        default_value_t = DEFAULT_PRUNE_INTERVAL_SECS,
        help = "How often each day is trimmed to the most used sites"
    )]
    pub prune_interval_secs: u64,
    #[arg(long, default_value_t = DEFAULT_KEEP_TOP, help = "Sites kept per day when pruning")]
    pub keep_top: usize,
    #[arg(
        long,
        help = "Drop days older than this many days when pruning. Keeps everything by default"
    )]
    pub retention_days: Option<u32>,
    #[arg(long, value_enum, default_value_t = HourSplitPolicy::PerDay)]
    pub hour_split: HourSplitPolicy,
    #[arg(long, value_enum, default_value_t = MatchRule::Exact)]
    pub match_rule: MatchRule,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            prune_interval_secs: DEFAULT_PRUNE_INTERVAL_SECS,
            keep_top: DEFAULT_KEEP_TOP,
            retention_days: None,
            hour_split: HourSplitPolicy::default(),
            match_rule: MatchRule::default(),
        }
    }
}

impl TrackerConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs.max(1))
    }
}
