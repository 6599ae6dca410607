//! Per-user vote vectors and the load window they were built from.

use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHashMap};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::source::{SECONDS_PER_DAY, SignalKind, VoteRecord, VoteSource};
use crate::vector::{ItemId, SparseVector, UserId};

pub type UserMap = IndexMap<UserId, SparseVector, FxBuildHasher>;

/// Load weight per signal kind. A kind with weight 0 is ignored on ingest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub click: f32,
    pub submission: f32,
    #[serde(rename = "mod")]
    pub mod_: f32,
    pub save: f32,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            click: 0.0,
            submission: 1.0,
            mod_: 1.0,
            save: 0.0,
        }
    }
}

impl SignalWeights {
    pub fn weight(&self, kind: SignalKind) -> f32 {
        match kind {
            SignalKind::Click => self.click,
            SignalKind::Submission => self.submission,
            SignalKind::Mod => self.mod_,
            SignalKind::Save => self.save,
        }
    }
}

/// Votes folded in by a single ingest or reload.
#[derive(Debug, Clone, Default)]
pub struct IngestBatch {
    /// The new scores per touched user, in first-touched order.
    pub votes: UserMap,
    pub records: usize,
}

impl IngestBatch {
    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.votes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

/// Distribution of per-user vote counts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoteStats {
    pub users: usize,
    pub entries: usize,
    pub mean: f32,
    /// Standard deviation of the vote count.
    pub rms: f32,
}

#[derive(Debug, Clone)]
pub struct VoteTable {
    users: UserMap,
    popularity: FxHashMap<ItemId, u32>,
    last_load_time: f64,
    first_load_time: f64,
    window_days: u32,
    weights: SignalWeights,
}

impl Default for VoteTable {
    fn default() -> Self {
        Self::new(30, SignalWeights::default())
    }
}

impl VoteTable {
    pub fn new(window_days: u32, weights: SignalWeights) -> Self {
        Self {
            users: UserMap::default(),
            popularity: FxHashMap::default(),
            last_load_time: 0.0,
            first_load_time: 0.0,
            window_days,
            weights,
        }
    }

    pub fn user(&self, user: UserId) -> Option<&SparseVector> {
        self.users.get(&user)
    }

    pub fn users(&self) -> impl Iterator<Item = (UserId, &SparseVector)> + '_ {
        self.users.iter().map(|(&u, v)| (u, v))
    }

    pub fn user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.users.keys().copied()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.users.contains_key(&user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// How many votes an item has received.
    pub fn popularity(&self, item: ItemId) -> u32 {
        self.popularity.get(&item).copied().unwrap_or(0)
    }

    pub fn last_load_time(&self) -> f64 {
        self.last_load_time
    }

    pub fn first_load_time(&self) -> f64 {
        self.first_load_time
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    pub fn weights(&self) -> SignalWeights {
        self.weights
    }

    pub(crate) fn set_watermarks(&mut self, first: f64, last: f64) {
        self.first_load_time = first;
        self.last_load_time = last;
    }

    pub(crate) fn set_window(&mut self, window_days: u32, weights: SignalWeights) {
        self.window_days = window_days;
        self.weights = weights;
    }

    /// Installs a whole user vector, replacing any previous one.
    pub(crate) fn insert_user(&mut self, vector: SparseVector) {
        for item in vector.items() {
            *self.popularity.entry(item).or_insert(0) += 1;
        }
        self.users.insert(vector.owner(), vector);
    }

    pub fn clear(&mut self) {
        self.users.clear();
        self.popularity.clear();
        self.last_load_time = 0.0;
        self.first_load_time = 0.0;
    }

    /// Folds votes into the table. A repeated (user, item) overwrites.
    pub fn ingest(&mut self, records: impl IntoIterator<Item = VoteRecord>) -> IngestBatch {
        let mut batch = IngestBatch::default();

        for record in records {
            let weight = self.weights.weight(record.kind);
            if weight == 0.0 {
                continue;
            }
            let score = record.vote.value() * weight;

            self.users
                .entry(record.user)
                .or_insert_with(|| SparseVector::new(record.user))
                .set(record.item, score);
            *self.popularity.entry(record.item).or_insert(0) += 1;

            batch
                .votes
                .entry(record.user)
                .or_insert_with(|| SparseVector::new(record.user))
                .set(record.item, score);
            batch.records += 1;
        }

        batch
    }

    /// Pulls votes from `source`.
    ///
    /// A full reload replaces the table with the votes inside the trailing
    /// window. Otherwise only votes newer than `last_load_time` are folded
    /// in. A table that was never loaded always reloads fully. On error the
    /// table is left untouched.
    pub async fn reload(&mut self, source: &dyn VoteSource, full: bool) -> Result<IngestBatch> {
        let full = full || self.last_load_time <= 0.0;
        let since = if full { None } else { Some(self.last_load_time) };

        let records = source.fetch_votes(since, self.window_days).await?;
        let latest = source.latest_vote_timestamp().await?;

        if full {
            self.clear();
        }
        let earliest = records.iter().map(|r| r.timestamp).reduce(f64::min);
        let batch = self.ingest(records);

        if let Some(latest) = latest {
            self.last_load_time = self.last_load_time.max(latest);
        }
        let window_start = self.last_load_time - self.window_days as f64 * SECONDS_PER_DAY;
        self.first_load_time = if full {
            earliest.unwrap_or(window_start)
        } else {
            self.first_load_time.max(window_start)
        };

        log::info!(
            "[votes] {} reload: {} records for {} users, table has {} users",
            if full { "full" } else { "incremental" },
            batch.records,
            batch.len(),
            self.len()
        );
        if full {
            let stats = self.vote_stats();
            log::info!(
                "[votes] distribution: mean {:.2} rms {:.2}, {} important users",
                stats.mean,
                stats.rms,
                self.important_users().len()
            );
        }

        Ok(batch)
    }

    pub fn vote_stats(&self) -> VoteStats {
        if self.users.is_empty() {
            return VoteStats::default();
        }
        let n = self.users.len() as f64;
        let (sum, sum_sq) = self.users.values().fold((0.0f64, 0.0f64), |(s, sq), v| {
            let len = v.len() as f64;
            (s + len, sq + len * len)
        });
        let mean = sum / n;
        VoteStats {
            users: self.users.len(),
            entries: sum as usize,
            mean: mean as f32,
            rms: (sum_sq / n - mean * mean).max(0.0).sqrt() as f32,
        }
    }

    /// Users with strictly more votes than the mean, in table order.
    pub fn important_users(&self) -> Vec<UserId> {
        if self.users.is_empty() {
            return Vec::new();
        }
        let mean = self.vote_stats().mean as f64;
        self.users
            .iter()
            .filter(|(_, v)| v.len() as f64 > mean)
            .map(|(&u, _)| u)
            .collect()
    }
}
