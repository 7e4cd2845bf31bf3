use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::time::date_to_record_name;

/// Milliseconds of focus time.
pub type UsageMs = u64;

/// Number of redirected navigations.
pub type AttemptCount = u64;

/// Hour of the local day, `0..24`.
pub type Hour = u8;

pub const HOURS_PER_DAY: usize = 24;

/// day → domain → value. Used for `siteUsage` and `blockedAttempts`.
pub type DailyTable<V> = BTreeMap<DayKey, BTreeMap<String, V>>;

/// day → domain → hour → value. Used for `siteUsageByHour` and `blockedAttemptsByHour`.
pub type HourlyTable<V> = BTreeMap<DayKey, BTreeMap<String, BTreeMap<Hour, V>>>;

pub type DailyUsage = DailyTable<UsageMs>;
pub type HourlyUsage = HourlyTable<UsageMs>;
pub type BlockedAttempts = DailyTable<AttemptCount>;
pub type BlockedAttemptsByHour = HourlyTable<AttemptCount>;

/// Identifies one local calendar day. Serialized as `YYYY-MM-DD` so keys written on machines with
/// different locales stay comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn of(local: DateTime<FixedOffset>) -> Self {
        Self(local.date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl Display for DayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&date_to_record_name(self.0))
    }
}

impl FromStr for DayKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self)
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ordered list of blocked domains. Order is only kept for display, lookups go through
/// [BlockList::contains].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockList(Vec<String>);

impl BlockList {
    pub fn contains(&self, domain: &str) -> bool {
        self.0.iter().any(|v| v == domain)
    }

    /// Adds a domain after normalizing user input. Returns `false` when the input is empty or the
    /// domain is already present.
    pub fn add(&mut self, raw: &str) -> bool {
        let Some(domain) = normalize_domain(raw) else {
            return false;
        };
        if self.contains(&domain) {
            return false;
        }
        self.0.push(domain);
        true
    }

    pub fn remove(&mut self, domain: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|v| v != domain);
        before != self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for BlockList {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut list = BlockList::default();
        for v in iter {
            list.add(&v.into());
        }
        list
    }
}

/// Turns whatever the user typed into a bare domain: `HTTPS://Example.com/path` → `example.com`.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let lower = raw.trim().to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let domain = without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .trim();
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_string())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{normalize_domain, BlockList, DailyUsage, DayKey, HourlyUsage};

    #[test]
    fn test_block_list_dedup() {
        let mut list = BlockList::default();
        assert!(list.add("example.com"));
        assert!(!list.add("example.com"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_block_list_normalizes_input() {
        let mut list = BlockList::default();
        assert!(list.add("  HTTPS://Example.com/watch?v=1 "));
        assert!(!list.add("http://example.com"));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["example.com"]);
    }

    #[test]
    fn test_block_list_ignores_empty_input() {
        let mut list = BlockList::default();
        assert!(!list.add("   "));
        assert!(!list.add("https://"));
        assert!(list.is_empty());
    }

    #[test]
    fn test_block_list_remove_keeps_order() {
        let mut list: BlockList = ["a.com", "b.com", "c.com"].into_iter().collect();
        assert!(list.remove("b.com"));
        assert!(!list.remove("b.com"));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["a.com", "c.com"]);
    }

    #[test]
    fn test_normalize_domain_keeps_port() {
        assert_eq!(
            normalize_domain("localhost:8080/index.html").as_deref(),
            Some("localhost:8080")
        );
    }

    #[test]
    fn test_tables_use_string_keys_on_disk() -> anyhow::Result<()> {
        let json = r#"{"2025-03-07":{"example.com":{"0":1000,"23":500}}}"#;
        let hourly: HourlyUsage = serde_json::from_str(json)?;
        let day = DayKey::new(NaiveDate::from_ymd_opt(2025, 3, 7).unwrap());
        assert_eq!(hourly[&day]["example.com"][&23], 500);
        assert_eq!(serde_json::to_string(&hourly)?, json);

        let daily: DailyUsage = serde_json::from_str(r#"{"2025-03-07":{"a.com":90000}}"#)?;
        assert_eq!(daily[&day]["a.com"], 90_000);
        Ok(())
    }

    #[test]
    fn test_day_key_rejects_locale_strings() {
        assert!("Fri Mar 07 2025".parse::<DayKey>().is_err());
    }
}
