//! Candidate items for recommendation, fed by the item recency source.

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::source::{ItemSource, SECONDS_PER_DAY};
use crate::vector::ItemId;

/// Recently published items with their publication time.
#[derive(Debug, Clone, Default)]
pub struct RecentItems {
    items: FxHashMap<ItemId, f64>,
    newest: f64,
}

impl RecentItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: ItemId) -> bool {
        self.items.contains_key(&item)
    }

    pub fn newest(&self) -> f64 {
        self.newest
    }

    pub fn insert(&mut self, item: ItemId, timestamp: f64) {
        self.items.insert(item, timestamp);
        self.newest = self.newest.max(timestamp);
    }

    /// Item ids in ascending order.
    pub fn candidates(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.items.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drops items older than `max_age_days` before the newest one.
    pub fn prune(&mut self, max_age_days: u32) -> usize {
        let cutoff = self.newest - max_age_days as f64 * SECONDS_PER_DAY;
        let before = self.items.len();
        self.items.retain(|_, ts| *ts > cutoff);
        before - self.items.len()
    }

    /// Pulls the recent item set. A full refresh replaces the set, otherwise
    /// new items are merged in and aged-out ones dropped.
    pub async fn refresh(
        &mut self,
        source: &dyn ItemSource,
        max_age_days: u32,
        full: bool,
    ) -> Result<usize> {
        let fetched = source.fetch_recent_items(max_age_days).await?;
        if full {
            self.items.clear();
            self.newest = 0.0;
        }
        let before = self.items.len();
        for (item, ts) in fetched {
            self.insert(item, ts);
        }
        let added = self.items.len() - before;
        let dropped = self.prune(max_age_days);
        log::debug!(
            "[items] {} new, {} aged out, {} candidates",
            added,
            dropped,
            self.items.len()
        );
        Ok(added)
    }
}
