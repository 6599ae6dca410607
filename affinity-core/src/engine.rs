//! Refresh cycle and scheduling.
//!
//! One writer at a time rebuilds a private copy of the state and publishes
//! it with a single pointer swap:
//!
//!   writer:  tokio::sync::Mutex, held for a whole refresh
//!   current: arc_swap::ArcSwapOption, lock-free reads
//!
//! Readers call [`RefreshEngine::snapshot`] and keep the `Arc` for as long
//! as they need a consistent view.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex as AsyncMutex;

use crate::cache::{CacheAdapter, PublishSummary};
use crate::cancel::CancelToken;
use crate::cluster::{ClusterReport, ClusterStats};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::items::RecentItems;
use crate::recommend::{EvaluationReport, Recommender, evaluate};
use crate::snapshot::{load_snapshot, save_snapshot};
use crate::source::{ItemSource, VoteSource};
use crate::vector::{ItemId, SparseVector, UserId};
use crate::votes::{IngestBatch, VoteTable};

/// How often a sleeping scheduler looks at its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Everything a refresh rebuilds. Published as a whole.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub recommender: Recommender,
    pub items: RecentItems,
    /// Number of successful refreshes that produced this state.
    pub generation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub full: bool,
    pub generation: u64,
    pub records: usize,
    pub users_touched: usize,
    pub candidates: usize,
    pub cluster: Option<ClusterReport>,
    /// Per-cluster summary, filled when the cycle reclustered.
    pub clusters: Vec<ClusterStats>,
    pub evaluation: Option<EvaluationReport>,
    pub published: PublishSummary,
    pub elapsed: Duration,
}

pub struct RefreshEngine {
    config: EngineConfig,
    votes: Arc<dyn VoteSource>,
    items: Arc<dyn ItemSource>,
    cache: CacheAdapter,
    writer: AsyncMutex<()>,
    current: ArcSwapOption<EngineState>,
}

impl RefreshEngine {
    pub fn new(
        config: EngineConfig,
        votes: Arc<dyn VoteSource>,
        items: Arc<dyn ItemSource>,
        cache: CacheAdapter,
    ) -> Self {
        Self {
            config,
            votes,
            items,
            cache,
            writer: AsyncMutex::new(()),
            current: ArcSwapOption::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheAdapter {
        &self.cache
    }

    /// Last published state, if any refresh has succeeded.
    pub fn snapshot(&self) -> Option<Arc<EngineState>> {
        self.current.load_full()
    }

    fn empty_state(&self) -> EngineState {
        let votes = VoteTable::new(self.config.votes.window_days, self.config.votes.weights);
        EngineState {
            recommender: Recommender::new(
                self.config.recommender.clone(),
                votes,
                self.config.cluster.clone(),
            ),
            items: RecentItems::new(),
            generation: 0,
        }
    }

    /// Publishes the vote table stored at `path`. Returns false when there
    /// is no snapshot. Clusters are rebuilt by the next refresh.
    pub async fn warm_start(&self, path: &Path) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let Some(mut table) = load_snapshot(path).await? else {
            log::info!("[refresh] no snapshot at {:?}, starting cold", path);
            return Ok(false);
        };

        let (window_days, weights) = (self.config.votes.window_days, self.config.votes.weights);
        if table.window_days() != window_days || table.weights() != weights {
            log::info!(
                "[refresh] snapshot window {}d differs from configuration, using {}d",
                table.window_days(),
                window_days
            );
        }
        table.set_window(window_days, weights);

        let mut state = self.empty_state();
        *state.recommender.votes_mut() = table;
        self.current.store(Some(Arc::new(state)));
        Ok(true)
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Runs one refresh cycle. On error the published state is unchanged.
    pub async fn refresh(&self, full: bool, cancel: &CancelToken) -> Result<RefreshReport> {
        let _writer = self.writer.lock().await;
        let started = Instant::now();
        cancel.check()?;

        let mut state = match self.current.load_full() {
            Some(current) => (*current).clone(),
            None => self.empty_state(),
        };
        let full = full || state.recommender.votes().last_load_time() <= 0.0;
        let timeout = self.config.schedule.source_timeout();

        let batch = tokio::time::timeout(
            timeout,
            state.recommender.reload_votes(self.votes.as_ref(), full),
        )
        .await
        .map_err(|_| Error::DataSource(format!("vote source timed out after {:?}", timeout)))??;

        tokio::time::timeout(
            timeout,
            state
                .items
                .refresh(self.items.as_ref(), self.config.items.max_age_days, full),
        )
        .await
        .map_err(|_| Error::DataSource(format!("item source timed out after {:?}", timeout)))??;
        cancel.check()?;

        let evaluation = if self.config.evaluate && !batch.is_empty() {
            let cached = self.cache.fetch_many(batch.users()).await;
            let report = evaluate(&state.recommender, &batch, &cached);
            report.log();
            Some(report)
        } else {
            None
        };

        let recluster = full || state.recommender.clusters().is_empty();
        let candidates = state.items.candidates();
        let candidate_count = candidates.len();
        let recommender = std::mem::take(&mut state.recommender);
        let token = cancel.clone();

        let (recommender, cluster, outputs, batch) = tokio::task::spawn_blocking(move || {
            rebuild(recommender, batch, &candidates, recluster, &token)
        })
        .await
        .map_err(|e| Error::Internal(format!("refresh task failed: {}", e)))??;

        cancel.check()?;
        let clusters = match cluster {
            Some(_) => recommender.clusters().stats(),
            None => Vec::new(),
        };
        state.recommender = recommender;
        state.generation += 1;
        let state = Arc::new(state);
        self.current.store(Some(Arc::clone(&state)));

        let users_touched = outputs.len();
        let published = self.cache.publish_all(outputs).await;

        if let Some(path) = &self.config.snapshot_path
            && let Err(e) = save_snapshot(state.recommender.votes(), path).await
        {
            log::warn!("[refresh] snapshot save failed: {}", e);
        }

        let report = RefreshReport {
            full,
            generation: state.generation,
            records: batch.records,
            users_touched,
            candidates: candidate_count,
            cluster,
            clusters,
            evaluation,
            published,
            elapsed: started.elapsed(),
        };
        log::info!(
            "[refresh] generation {} ({}): {} records, {} users, {} candidates in {:?}",
            report.generation,
            if full { "full" } else { "incremental" },
            report.records,
            report.users_touched,
            report.candidates,
            report.elapsed
        );
        Ok(report)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Refreshes every `update_interval` until `cancel` fires.
    ///
    /// The first cycle is full unless a warm start published a state. Later
    /// cycles are incremental, except when the full-refresh bucket changed
    /// since the last successful cycle. Failed cycles are logged and retried
    /// on the next tick.
    pub async fn run(&self, cancel: CancelToken) -> Result<()> {
        let schedule = &self.config.schedule;
        let mut epoch: Option<u64> = None;

        log::info!(
            "[refresh] scheduler started: every {:?}, full every {}s",
            schedule.update_interval(),
            schedule.full_refresh_interval_secs
        );

        loop {
            let tick = Instant::now();
            let current = schedule.full_refresh_epoch(unix_now());
            let full = match epoch {
                Some(last) => last != current,
                None => self.snapshot().is_none(),
            };

            match self.refresh(full, &cancel).await {
                Ok(_) => epoch = Some(current),
                Err(Error::Cancelled) => break,
                Err(e) if e.is_recoverable() => {
                    log::warn!("[refresh] cycle failed, keeping last state: {}", e)
                }
                Err(e) => log::error!("[refresh] cycle failed: {}", e),
            }

            let wait = schedule.update_interval().saturating_sub(tick.elapsed());
            if !sleep_unless_cancelled(wait, &cancel).await {
                break;
            }
        }

        log::info!("[refresh] scheduler stopped");
        Ok(())
    }
}

/// CPU-bound part of a refresh, run on a blocking thread.
#[allow(clippy::type_complexity)]
fn rebuild(
    mut recommender: Recommender,
    batch: IngestBatch,
    candidates: &[ItemId],
    recluster: bool,
    cancel: &CancelToken,
) -> Result<(
    Recommender,
    Option<ClusterReport>,
    Vec<(UserId, SparseVector)>,
    IngestBatch,
)> {
    let cluster = if recluster {
        let report = recommender.recluster(cancel)?;
        log::info!(
            "[refresh] clustered {} users: {} iterations, quality {:.3}",
            report.training_users,
            report.iterations,
            report.quality
        );
        Some(report)
    } else {
        None
    };
    recommender.absorb(&batch);

    let mut outputs = Vec::with_capacity(batch.len());
    for user in batch.users() {
        cancel.check()?;
        let output = recommender.output_for(user, candidates);
        outputs.push((user, output));
    }
    Ok((recommender, cluster, outputs, batch))
}

/// Sleeps for `duration`. Returns false if `cancel` fired meanwhile.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return true;
        }
        tokio::time::sleep(left.min(CANCEL_POLL)).await;
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
