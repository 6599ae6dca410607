//! Feeds that supply raw votes and recently published items.
//!
//! The engine only talks to [`VoteSource`] and [`ItemSource`]. Two reference
//! implementations are provided: in-memory feeds for tests and embedding, and
//! JSON-lines files that are re-read on every fetch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vector::{ItemId, UserId};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Direction of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vote {
    Up,
    Down,
}

impl Vote {
    pub fn value(self) -> f32 {
        match self {
            Vote::Up => 1.0,
            Vote::Down => -1.0,
        }
    }
}

impl TryFrom<i8> for Vote {
    type Error = Error;

    fn try_from(v: i8) -> Result<Self> {
        match v {
            1 => Ok(Vote::Up),
            -1 => Ok(Vote::Down),
            other => Err(Error::DataSource(format!("invalid vote value {}", other))),
        }
    }
}

/// How a vote was expressed. Each kind carries its own load weight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Click,
    Submission,
    #[default]
    Mod,
    Save,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoteRecord {
    pub user: UserId,
    pub item: ItemId,
    pub vote: Vote,
    pub kind: SignalKind,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl VoteRecord {
    pub fn new(user: UserId, item: ItemId, vote: Vote, timestamp: f64) -> Self {
        Self {
            user,
            item,
            vote,
            kind: SignalKind::Mod,
            timestamp,
        }
    }
}

#[async_trait]
pub trait VoteSource: Send + Sync + 'static {
    /// Votes newer than `since`, or when `since` is `None`, every vote inside
    /// the trailing `window_days` measured back from the latest vote.
    async fn fetch_votes(&self, since: Option<f64>, window_days: u32) -> Result<Vec<VoteRecord>>;

    /// Timestamp of the most recent vote, `None` when the feed is empty.
    async fn latest_vote_timestamp(&self) -> Result<Option<f64>>;
}

#[async_trait]
pub trait ItemSource: Send + Sync + 'static {
    /// Items published within `max_age_days` of the newest item.
    async fn fetch_recent_items(&self, max_age_days: u32) -> Result<Vec<(ItemId, f64)>>;
}

fn latest(records: &[VoteRecord]) -> Option<f64> {
    records.iter().map(|r| r.timestamp).reduce(f64::max)
}

fn select_votes(records: &[VoteRecord], since: Option<f64>, window_days: u32) -> Vec<VoteRecord> {
    let cutoff = match since {
        Some(ts) => ts,
        None => match latest(records) {
            Some(newest) => newest - window_days as f64 * SECONDS_PER_DAY,
            None => return Vec::new(),
        },
    };
    let mut out: Vec<VoteRecord> = records
        .iter()
        .filter(|r| r.timestamp > cutoff)
        .copied()
        .collect();
    out.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    out
}

fn select_items(items: &[(ItemId, f64)], max_age_days: u32) -> Vec<(ItemId, f64)> {
    let Some(newest) = items.iter().map(|&(_, ts)| ts).reduce(f64::max) else {
        return Vec::new();
    };
    let cutoff = newest - max_age_days as f64 * SECONDS_PER_DAY;
    items.iter().filter(|&&(_, ts)| ts > cutoff).copied().collect()
}

// ============================================================================
// In-memory feeds
// ============================================================================

/// Shared in-memory vote feed. Clones see the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryVoteSource {
    records: Arc<RwLock<Vec<VoteRecord>>>,
}

impl MemoryVoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: VoteRecord) {
        self.records.write().push(record);
    }

    pub fn extend(&self, records: impl IntoIterator<Item = VoteRecord>) {
        self.records.write().extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl VoteSource for MemoryVoteSource {
    async fn fetch_votes(&self, since: Option<f64>, window_days: u32) -> Result<Vec<VoteRecord>> {
        Ok(select_votes(&self.records.read(), since, window_days))
    }

    async fn latest_vote_timestamp(&self) -> Result<Option<f64>> {
        Ok(latest(&self.records.read()))
    }
}

/// Shared in-memory item feed.
#[derive(Debug, Clone, Default)]
pub struct MemoryItemSource {
    items: Arc<RwLock<Vec<(ItemId, f64)>>>,
}

impl MemoryItemSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: ItemId, timestamp: f64) {
        self.items.write().push((item, timestamp));
    }
}

#[async_trait]
impl ItemSource for MemoryItemSource {
    async fn fetch_recent_items(&self, max_age_days: u32) -> Result<Vec<(ItemId, f64)>> {
        Ok(select_items(&self.items.read(), max_age_days))
    }
}

// ============================================================================
// JSON-lines feeds
// ============================================================================

/// One line of a vote feed file.
///
/// `{"user": 1, "item": 10, "vote": 1, "timestamp": 1700000000.0}`;
/// `kind` is optional and defaults to `mod`. Zero votes are skipped.
#[derive(Debug, Deserialize)]
struct VoteLine {
    user: UserId,
    item: ItemId,
    vote: i8,
    #[serde(default)]
    kind: SignalKind,
    timestamp: f64,
}

/// One line of an item feed file: `{"item": 10, "timestamp": 1700000000.0}`.
#[derive(Debug, Deserialize)]
struct ItemLine {
    item: ItemId,
    timestamp: f64,
}

async fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::DataSource(format!("cannot read {:?}: {}", path, e)))?;

    let mut out = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = serde_json::from_str(line).map_err(|e| {
            Error::DataSource(format!("{:?} line {}: {}", path, lineno + 1, e))
        })?;
        out.push(parsed);
    }
    Ok(out)
}

/// Vote feed backed by a JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonlVoteSource {
    path: PathBuf,
}

impl JsonlVoteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Vec<VoteRecord>> {
        let lines: Vec<VoteLine> = read_lines(&self.path).await?;
        let mut records = Vec::with_capacity(lines.len());
        for line in lines {
            if line.vote == 0 {
                continue;
            }
            records.push(VoteRecord {
                user: line.user,
                item: line.item,
                vote: Vote::try_from(line.vote)?,
                kind: line.kind,
                timestamp: line.timestamp,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl VoteSource for JsonlVoteSource {
    async fn fetch_votes(&self, since: Option<f64>, window_days: u32) -> Result<Vec<VoteRecord>> {
        let records = self.load().await?;
        Ok(select_votes(&records, since, window_days))
    }

    async fn latest_vote_timestamp(&self) -> Result<Option<f64>> {
        Ok(latest(&self.load().await?))
    }
}

/// Item feed backed by a JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonlItemSource {
    path: PathBuf,
}

impl JsonlItemSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ItemSource for JsonlItemSource {
    async fn fetch_recent_items(&self, max_age_days: u32) -> Result<Vec<(ItemId, f64)>> {
        let lines: Vec<ItemLine> = read_lines(&self.path).await?;
        let items: Vec<(ItemId, f64)> = lines.into_iter().map(|l| (l.item, l.timestamp)).collect();
        Ok(select_items(&items, max_age_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DAY: f64 = SECONDS_PER_DAY;

    #[tokio::test]
    async fn test_memory_window_and_since() {
        let source = MemoryVoteSource::new();
        source.push(VoteRecord::new(1, 10, Vote::Up, 0.0));
        source.push(VoteRecord::new(1, 11, Vote::Down, 20.0 * DAY));
        source.push(VoteRecord::new(2, 10, Vote::Up, 40.0 * DAY));

        assert_eq!(source.latest_vote_timestamp().await.unwrap(), Some(40.0 * DAY));

        let windowed = source.fetch_votes(None, 30).await.unwrap();
        assert_eq!(windowed.len(), 2);

        let newer = source.fetch_votes(Some(20.0 * DAY), 30).await.unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].user, 2);
    }

    #[tokio::test]
    async fn test_empty_memory_source() {
        let source = MemoryVoteSource::new();
        assert!(source.is_empty());
        assert_eq!(source.latest_vote_timestamp().await.unwrap(), None);
        assert!(source.fetch_votes(None, 30).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_votes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"user": 1, "item": 10, "vote": 1, "timestamp": 100.0}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"user": 1, "item": 11, "vote": 0, "timestamp": 101.0}}"#).unwrap();
        writeln!(
            file,
            r#"{{"user": 2, "item": 10, "vote": -1, "kind": "save", "timestamp": 102.0}}"#
        )
        .unwrap();
        file.flush().unwrap();

        let source = JsonlVoteSource::new(file.path());
        let votes = source.fetch_votes(None, 30).await.unwrap();
        assert_eq!(votes.len(), 2);
        assert_eq!(votes[1].vote, Vote::Down);
        assert_eq!(votes[1].kind, SignalKind::Save);
        assert_eq!(source.latest_vote_timestamp().await.unwrap(), Some(102.0));
    }

    #[tokio::test]
    async fn test_jsonl_malformed_is_data_source_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"user": 1, "item": 10, "vote": 1, "timestamp": 100.0}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        file.flush().unwrap();

        let err = JsonlVoteSource::new(file.path())
            .fetch_votes(None, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataSource(ref msg) if msg.contains("line 2")));

        let missing = JsonlVoteSource::new("/nonexistent/votes.jsonl");
        assert!(matches!(
            missing.latest_vote_timestamp().await,
            Err(Error::DataSource(_))
        ));
    }

    #[tokio::test]
    async fn test_items_relative_to_newest() {
        let source = MemoryItemSource::new();
        source.push(1, 0.0);
        source.push(2, 5.0 * DAY);
        source.push(3, 9.0 * DAY);
        let items = source.fetch_recent_items(7).await.unwrap();
        let ids: Vec<u32> = items.iter().map(|&(i, _)| i).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
