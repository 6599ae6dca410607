//! Engine operations: run, refresh, fetch, audit, snapshot-info

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use affinity_core::{
    CacheAdapter, CancelToken, EngineConfig, FsCacheStore, JsonlItemSource, JsonlVoteSource,
    RefreshEngine, RefreshReport, UserId, VoteSource, load_snapshot,
};

/// Feeds and stores shared by the engine commands.
pub struct Sources {
    pub votes: PathBuf,
    pub items: PathBuf,
    pub cache_dir: PathBuf,
}

pub async fn load_config(path: Option<&Path>, snapshot: Option<PathBuf>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => EngineConfig::default(),
    };
    if snapshot.is_some() {
        config.snapshot_path = snapshot;
    }
    Ok(config)
}

async fn open_cache(config: &EngineConfig, cache_dir: &Path) -> Result<CacheAdapter> {
    let store = FsCacheStore::open(cache_dir)
        .await
        .with_context(|| format!("Failed to open cache directory: {:?}", cache_dir))?;
    Ok(CacheAdapter::new(Arc::new(store), config.cache.clone()))
}

async fn build_engine(config: EngineConfig, sources: &Sources) -> Result<RefreshEngine> {
    let cache = open_cache(&config, &sources.cache_dir).await?;
    let engine = RefreshEngine::new(
        config,
        Arc::new(JsonlVoteSource::new(&sources.votes)),
        Arc::new(JsonlItemSource::new(&sources.items)),
        cache,
    );
    if let Some(path) = engine.config().snapshot_path.clone() {
        engine
            .warm_start(&path)
            .await
            .with_context(|| format!("Failed to load snapshot: {:?}", path))?;
    }
    Ok(engine)
}

fn report_json(report: &RefreshReport) -> serde_json::Value {
    let cluster = report.cluster.map(|c| {
        json!({
            "training_users": c.training_users,
            "passes": c.passes,
            "iterations": c.iterations,
            "converged": c.converged,
            "quality": c.quality,
            "empty_clusters": c.empty_clusters,
        })
    });
    json!({
        "full": report.full,
        "generation": report.generation,
        "records": report.records,
        "users_touched": report.users_touched,
        "candidates": report.candidates,
        "cluster": cluster,
        "clusters": report.clusters,
        "evaluation": report.evaluation,
        "published": report.published,
        "elapsed_ms": report.elapsed.as_millis() as u64,
    })
}

pub async fn run(config: EngineConfig, sources: Sources) -> Result<()> {
    let engine = build_engine(config, &sources).await?;
    let cancel = CancelToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping after the current cycle");
                cancel.cancel();
            }
        }
    });

    engine.run(cancel).await?;
    Ok(())
}

pub async fn refresh(config: EngineConfig, sources: Sources, full: bool) -> Result<()> {
    let engine = build_engine(config, &sources).await?;
    let report = engine
        .refresh(full, &CancelToken::new())
        .await
        .context("Refresh failed")?;

    println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    Ok(())
}

pub async fn fetch(config: EngineConfig, cache_dir: PathBuf, user: UserId) -> Result<()> {
    let cache = open_cache(&config, &cache_dir).await?;
    let output = cache.fetch(user).await;
    if output.is_empty() {
        info!("No cached output for user {}", user);
    }

    let entries: Vec<_> = output
        .sorted_by_score()
        .into_iter()
        .map(|(id, score)| json!({ "id": id, "score": score }))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "user": user, "entries": entries }))?
    );
    Ok(())
}

/// Checks cache coverage for every user in the vote feed.
pub async fn audit(config: EngineConfig, votes: PathBuf, cache_dir: PathBuf) -> Result<()> {
    let source = JsonlVoteSource::new(&votes);
    let records = source
        .fetch_votes(None, config.votes.window_days)
        .await
        .with_context(|| format!("Failed to read votes: {:?}", votes))?;

    let mut users: Vec<UserId> = records.iter().map(|r| r.user).collect();
    users.sort_unstable();
    users.dedup();
    info!("Auditing {} users from {:?}", users.len(), votes);

    let cache = open_cache(&config, &cache_dir).await?;
    let report = cache.audit(users).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn snapshot_info(path: PathBuf) -> Result<()> {
    let table = load_snapshot(&path)
        .await
        .with_context(|| format!("Failed to read snapshot: {:?}", path))?
        .with_context(|| format!("No snapshot at {:?}", path))?;

    let stats = table.vote_stats();
    let info = json!({
        "path": path,
        "users": table.len(),
        "entries": stats.entries,
        "mean_votes": stats.mean,
        "rms_votes": stats.rms,
        "important_users": table.important_users().len(),
        "window_days": table.window_days(),
        "first_load_time": table.first_load_time(),
        "last_load_time": table.last_load_time(),
        "weights": table.weights(),
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
