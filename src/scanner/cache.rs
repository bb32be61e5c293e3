//! Per-subscription dedup cache
//!
//! Maps an item identifier to the day it was last observed. An entry survives
//! as long as the item keeps showing up; once it has not been seen for longer
//! than the retention window it is evicted.

use chrono::{DateTime, FixedOffset, TimeDelta};
use std::collections::HashMap;
use std::time::Duration;

/// Default initial capacity of a cache
pub const DEFAULT_CAPACITY: usize = 100;

/// Item identifier to last-seen day
#[derive(Debug, Clone, Default)]
pub struct DedupCache {
    entries: HashMap<String, DateTime<FixedOffset>>,
}

impl DedupCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Record an observation; returns true if the identifier was not cached
    ///
    /// The last-seen day is refreshed either way.
    pub fn observe(&mut self, id: &str, day: DateTime<FixedOffset>) -> bool {
        match self.entries.get_mut(id) {
            Some(seen) => {
                *seen = day;
                false
            }
            None => {
                self.entries.insert(id.to_string(), day);
                true
            }
        }
    }

    /// Merge identifiers recovered from the store, stamping them with `day`
    ///
    /// Existing entries keep the later of the two days. Returns how many
    /// identifiers were new to the cache.
    pub fn merge_recovered<I>(&mut self, ids: I, day: DateTime<FixedOffset>) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;
        for id in ids {
            self.entries
                .entry(id)
                .and_modify(|seen| {
                    if *seen < day {
                        *seen = day;
                    }
                })
                .or_insert_with(|| {
                    added += 1;
                    day
                });
        }
        added
    }

    /// Remove every entry last seen strictly before `cutoff`
    pub fn evict_before(&mut self, cutoff: DateTime<FixedOffset>) -> Vec<String> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, seen)| **seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.entries.remove(id);
        }
        stale
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn last_seen(&self, id: &str) -> Option<DateTime<FixedOffset>> {
        self.entries.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Oldest last-seen day that is kept: `today - retention`
///
/// `None` when the subtraction leaves chrono's range, in which case nothing
/// is old enough to evict.
pub fn retention_cutoff(
    today: DateTime<FixedOffset>,
    retention: Duration,
) -> Option<DateTime<FixedOffset>> {
    let window = TimeDelta::from_std(retention).ok()?;
    today.checked_sub_signed(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn day(d: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 10, d, 0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_observe_reports_new_once() {
        let mut cache = DedupCache::with_capacity(DEFAULT_CAPACITY);
        assert!(cache.observe("/a/1", day(1)));
        assert!(!cache.observe("/a/1", day(2)));
        assert_eq!(cache.last_seen("/a/1"), Some(day(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_merge_recovered_is_idempotent() {
        let ids = vec!["/a/1".to_string(), "/a/2".to_string()];

        let mut once = DedupCache::default();
        once.merge_recovered(ids.clone(), day(5));

        let mut twice = DedupCache::default();
        assert_eq!(twice.merge_recovered(ids.clone(), day(5)), 2);
        assert_eq!(twice.merge_recovered(ids, day(5)), 0);

        assert_eq!(once.len(), twice.len());
        assert!(twice.contains("/a/1") && twice.contains("/a/2"));
    }

    #[test]
    fn test_merge_keeps_later_day() {
        let mut cache = DedupCache::default();
        cache.observe("/a/1", day(9));
        cache.merge_recovered(vec!["/a/1".to_string()], day(5));
        assert_eq!(cache.last_seen("/a/1"), Some(day(9)));
    }

    #[test]
    fn test_evict_before_is_strict() {
        let mut cache = DedupCache::default();
        cache.observe("old", day(1));
        cache.observe("edge", day(2));
        cache.observe("new", day(3));

        let evicted = cache.evict_before(day(2));
        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(cache.contains("edge"));
        assert!(cache.contains("new"));
    }

    #[test]
    fn test_refresh_prevents_eviction() {
        let mut cache = DedupCache::default();
        cache.observe("/a/1", day(1));
        cache.observe("/a/1", day(10));
        assert!(cache.evict_before(day(5)).is_empty());
    }

    #[test]
    fn test_retention_cutoff() {
        let cutoff = retention_cutoff(day(10), Duration::from_secs(24 * 3600)).unwrap();
        assert_eq!(cutoff, day(9));
    }

    proptest! {
        #[test]
        fn prop_evicted_iff_before_cutoff(seen_hours in 0i64..2000, retention_hours in 0u64..500) {
            let today = day(30);
            let seen = today - TimeDelta::hours(seen_hours);
            let cutoff = retention_cutoff(today, Duration::from_secs(retention_hours * 3600)).unwrap();

            let mut cache = DedupCache::default();
            cache.observe("item", seen);
            let evicted = !cache.evict_before(cutoff).is_empty();

            prop_assert_eq!(evicted, cutoff > seen);
        }
    }
}
