//! Engine configuration, loaded from JSON. Every section and field has a
//! default, so `{}` is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::cluster::ClusterConfig;
use crate::error::{Error, Result};
use crate::recommend::RecommenderConfig;
use crate::votes::SignalWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VotesConfig {
    /// Days of history kept in the table.
    pub window_days: u32,
    pub weights: SignalWeights,
}

impl Default for VotesConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            weights: SignalWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemsConfig {
    /// Items older than this are not recommended.
    pub max_age_days: u32,
}

impl Default for ItemsConfig {
    fn default() -> Self {
        Self { max_age_days: 7 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub update_interval_secs: u64,
    pub full_refresh_interval_secs: u64,
    /// Upper bound on a single vote or item source call.
    pub source_timeout_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 60,
            full_refresh_interval_secs: 86_400,
            source_timeout_ms: 30_000,
        }
    }
}

impl ScheduleConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs.max(1))
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    /// Bucket index of `now` (unix seconds). A full refresh is due when it
    /// changes between two ticks.
    pub fn full_refresh_epoch(&self, now: f64) -> u64 {
        (now.max(0.0) as u64) / self.full_refresh_interval_secs.max(1)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub votes: VotesConfig,
    pub items: ItemsConfig,
    pub cluster: ClusterConfig,
    pub recommender: RecommenderConfig,
    pub cache: CacheConfig,
    pub schedule: ScheduleConfig,
    /// Warm-restart snapshot, written after every successful refresh.
    pub snapshot_path: Option<PathBuf>,
    /// Score previously cached predictions against incoming votes.
    pub evaluate: bool,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("cannot read {:?}: {}", path, e)))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.num_clusters == 0 {
            return Err(Error::Config("cluster.num_clusters must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.recommender.fudge) {
            return Err(Error::Config(format!(
                "recommender.fudge must be in [0, 1], got {}",
                self.recommender.fudge
            )));
        }
        if self.votes.window_days == 0 {
            return Err(Error::Config("votes.window_days must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Orthogonalize;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config.votes.window_days, 30);
        assert_eq!(config.cluster.num_clusters, 40);
        assert_eq!(config.cluster.max_iterations, 10);
        assert_eq!(config.recommender.fudge, 0.0);
        assert_eq!(config.schedule.update_interval_secs, 60);
        assert!(config.snapshot_path.is_none());
        assert!(!config.evaluate);
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_json(
            r#"{
                "votes": {"weights": {"click": 0.5}},
                "cluster": {"num_clusters": 4, "orthogonalize": "per_iteration"},
                "snapshot_path": "/tmp/votes.snapshot"
            }"#,
        )
        .unwrap();
        assert_eq!(config.votes.window_days, 30);
        assert_eq!(config.votes.weights.click, 0.5);
        assert_eq!(config.votes.weights.mod_, 1.0);
        assert_eq!(config.cluster.num_clusters, 4);
        assert_eq!(config.cluster.orthogonalize, Orthogonalize::PerIteration);
        assert_eq!(
            config.snapshot_path.as_deref(),
            Some(Path::new("/tmp/votes.snapshot"))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"recommender": {"fudge": 2.0}}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"cluster": {"num_clusters": 0}}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json("not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_full_refresh_epoch() {
        let schedule = ScheduleConfig::default();
        assert_eq!(schedule.full_refresh_epoch(86_399.0), 0);
        assert_eq!(schedule.full_refresh_epoch(86_400.0), 1);
    }
}
