//! Cosine k-means over sparse user vote vectors.
//!
//! Users are binned round-robin, then repeatedly reassigned to the centroid
//! they are most similar to while centroids are recomputed as per-item means.
//! Between passes the centroids can be decorrelated with Gram-Schmidt.
//! Iteration stops once the average strict cosine between old and new
//! centroids exceeds the convergence threshold.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::vector::{ItemId, SparseVector, UserId};
use crate::votes::VoteTable;

/// When centroids are orthogonalized during [`ClusterEngine::generate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orthogonalize {
    Never,
    /// Once at the start of every pass.
    #[default]
    PerPass,
    /// Before every iteration.
    PerIteration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of clusters (K)
    pub num_clusters: usize,
    /// Iteration cap per pass
    pub max_iterations: usize,
    /// Passes run after the first one
    pub reclusters: usize,
    pub orthogonalize: Orthogonalize,
    /// Mean centroid stability above which a pass stops early
    pub convergence_threshold: f32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_clusters: 40,
            max_iterations: 10,
            reclusters: 1,
            orthogonalize: Orthogonalize::PerPass,
            convergence_threshold: 0.98,
        }
    }
}

impl ClusterConfig {
    pub fn new(num_clusters: usize) -> Self {
        Self {
            num_clusters,
            ..Default::default()
        }
    }

    pub fn with_max_iterations(mut self, iters: usize) -> Self {
        self.max_iterations = iters;
        self
    }

    pub fn with_reclusters(mut self, reclusters: usize) -> Self {
        self.reclusters = reclusters;
        self
    }

    pub fn with_orthogonalize(mut self, mode: Orthogonalize) -> Self {
        self.orthogonalize = mode;
        self
    }

    pub fn with_convergence_threshold(mut self, threshold: f32) -> Self {
        self.convergence_threshold = threshold;
        self
    }
}

/// Outcome of [`ClusterEngine::generate`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClusterReport {
    pub training_users: usize,
    pub passes: usize,
    /// Iterations summed over all passes
    pub iterations: usize,
    /// Whether the last pass stopped on the threshold
    pub converged: bool,
    /// Mean spread over non-empty clusters after the last iteration
    pub quality: f32,
    /// Mean old/new centroid similarity after the last iteration
    pub difference: f32,
    pub empty_clusters: usize,
}

/// Per-cluster summary for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStats {
    pub id: usize,
    pub users: usize,
    pub items: usize,
    pub spread: f32,
    pub norm: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterEngine {
    config: ClusterConfig,
    centroids: Vec<SparseVector>,
    members: Vec<Vec<UserId>>,
    spread: Vec<f32>,
    assignments: FxHashMap<UserId, usize>,
}

impl ClusterEngine {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Clusters with fixed centroids and members, for tests that need a
    /// known layout.
    #[cfg(test)]
    pub(crate) fn from_parts(
        config: ClusterConfig,
        centroids: Vec<SparseVector>,
        members: Vec<Vec<UserId>>,
    ) -> Self {
        let mut assignments = FxHashMap::default();
        for (cluster, users) in members.iter().enumerate() {
            for &user in users {
                assignments.insert(user, cluster);
            }
        }
        Self {
            config,
            spread: vec![0.0; centroids.len()],
            centroids,
            members,
            assignments,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Number of live clusters; 0 until [`generate`](Self::generate) succeeds.
    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn centroid(&self, cluster: usize) -> Option<&SparseVector> {
        self.centroids.get(cluster)
    }

    pub fn members(&self, cluster: usize) -> &[UserId] {
        self.members.get(cluster).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn spread(&self, cluster: usize) -> f32 {
        self.spread.get(cluster).copied().unwrap_or(0.0)
    }

    pub fn cluster_of(&self, user: UserId) -> Option<usize> {
        self.assignments.get(&user).copied()
    }

    pub fn assigned_users(&self) -> usize {
        self.assignments.len()
    }

    /// Centroid score of `item` in the user's cluster, 0 when unassigned.
    pub fn guess(&self, user: UserId, item: ItemId) -> f32 {
        self.cluster_of(user)
            .and_then(|c| self.centroids.get(c))
            .map(|centroid| centroid.get(item))
            .unwrap_or(0.0)
    }

    // ========================================================================
    // Training
    // ========================================================================

    /// Rebuilds all clusters from `training`.
    ///
    /// Fails without touching the current clusters when there are fewer
    /// training users than clusters. Cancellation is checked between
    /// iterations; a cancelled run leaves the engine in a partial state and
    /// should be discarded.
    pub fn generate(
        &mut self,
        votes: &VoteTable,
        training: &[UserId],
        cancel: &CancelToken,
    ) -> Result<ClusterReport> {
        let k = self.config.num_clusters;
        if k == 0 || training.is_empty() || training.len() < k {
            return Err(Error::ClusteringPrecondition {
                training: training.len(),
                clusters: k,
            });
        }

        log::info!(
            "[cluster] generating {} clusters from {} training users",
            k,
            training.len()
        );

        self.centroids = (0..k).map(|i| SparseVector::new(i as UserId)).collect();
        self.members = vec![Vec::new(); k];
        self.spread = vec![0.0; k];
        self.assignments.clear();

        for (i, &user) in training.iter().enumerate() {
            self.members[i % k].push(user);
            self.assignments.insert(user, i % k);
        }
        self.compute_centroids(votes);

        let mut report = ClusterReport {
            training_users: training.len(),
            ..Default::default()
        };

        for pass in 0..=self.config.reclusters {
            cancel.check()?;
            if self.config.orthogonalize == Orthogonalize::PerPass {
                self.orthogonalize();
            }
            report.passes += 1;
            report.converged = false;

            for iteration in 0..self.config.max_iterations {
                cancel.check()?;
                if self.config.orthogonalize == Orthogonalize::PerIteration {
                    self.orthogonalize();
                }

                self.clear_memberships();
                for &user in training {
                    self.assign(votes, user, false);
                }

                let old = self.centroids.clone();
                self.compute_centroids(votes);

                let (quality, difference, non_empty) = self.stability(&old);
                report.iterations += 1;
                report.quality = quality;
                report.difference = difference;
                report.empty_clusters = k - non_empty;

                log::info!(
                    "[cluster] pass {} iteration {}: quality {:.3}, difference {:.3}, {} empty",
                    pass,
                    iteration,
                    quality,
                    difference,
                    k - non_empty
                );

                if difference > self.config.convergence_threshold {
                    report.converged = true;
                    break;
                }
            }

            if log::log_enabled!(log::Level::Debug) {
                self.log_centroid_matrix();
            }
        }

        Ok(report)
    }

    /// Assigns users that are not yet in any cluster.
    pub fn add_users(&mut self, votes: &VoteTable, users: impl IntoIterator<Item = UserId>) {
        for user in users {
            if !self.assignments.contains_key(&user) {
                self.assign(votes, user, false);
            }
        }
    }

    /// Cluster for `user`, assigning it when needed.
    ///
    /// An assigned user keeps its cluster unless `avoid_previous` is set. In
    /// that case the previous cluster's similarity becomes an upper bound:
    /// only strictly less similar clusters qualify, except that an equally
    /// similar cluster with a higher index wins unless the best so far
    /// already matches the bound. Clusters the user is orthogonal to are
    /// never picked; if nothing qualifies the largest cluster is used.
    ///
    /// Returns `None` only when no clusters exist.
    pub fn assign(&mut self, votes: &VoteTable, user: UserId, avoid_previous: bool) -> Option<usize> {
        if self.centroids.is_empty() {
            return None;
        }
        let current = self.cluster_of(user);
        if let Some(cluster) = current
            && !avoid_previous
        {
            return Some(cluster);
        }

        let empty = SparseVector::new(user);
        let vector = votes.user(user).unwrap_or(&empty);

        let (avoid, limit) = match current {
            Some(c) if avoid_previous => (Some(c), vector.cosine(&self.centroids[c], false)),
            _ => (None, f32::INFINITY),
        };

        let mut best = f32::NEG_INFINITY;
        let mut chosen = None;
        for (i, centroid) in self.centroids.iter().enumerate() {
            let m = vector.cosine(centroid, false);
            if m == 0.0 {
                continue;
            }
            let past_avoided = avoid.is_none_or(|a| i > a);
            if (past_avoided && m == limit && best != limit) || (m > best && m < limit) {
                best = m;
                chosen = Some(i);
            }
        }

        let cluster = chosen.unwrap_or_else(|| self.largest_cluster());
        if avoid_previous {
            log::debug!(
                "[cluster] user {} moved from {:?} to {} ({:.3})",
                user,
                avoid,
                cluster,
                best
            );
        }
        self.place(user, cluster);
        Some(cluster)
    }

    /// Clusters ranked by similarity to the user, most similar first.
    ///
    /// Only clusters with non-zero similarity are listed. If there are none,
    /// every cluster is listed, ranked by centroid size.
    pub fn cluster_distances(&self, votes: &VoteTable, user: UserId) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = match votes.user(user) {
            Some(vector) => self
                .centroids
                .iter()
                .enumerate()
                .map(|(i, c)| (i, vector.cosine(c, false)))
                .filter(|&(_, m)| m != 0.0)
                .collect(),
            None => Vec::new(),
        };
        if ranked.is_empty() {
            ranked = self
                .centroids
                .iter()
                .enumerate()
                .map(|(i, c)| (i, c.len() as f32))
                .collect();
        }
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// Gram-Schmidt over the centroids in index order.
    ///
    /// For each centroid i and each earlier centroid j, the projection onto j
    /// is removed over j's items. The dot product is taken once per pair.
    pub fn orthogonalize(&mut self) {
        for i in 1..self.centroids.len() {
            let (done, rest) = self.centroids.split_at_mut(i);
            let w = &mut rest[0];
            for v in done.iter() {
                let v_norm = v.norm();
                if v_norm == 0.0 {
                    continue;
                }
                let factor = w.dot(v) / (v_norm * v_norm);
                for (item, v_val) in v.iter() {
                    let w_val = w.get(item);
                    w.set(item, w_val - factor * v_val);
                }
            }
        }
    }

    /// Pairwise strict cosine between centroids.
    pub fn centroid_similarity_matrix(&self) -> Vec<Vec<f32>> {
        self.centroids
            .iter()
            .map(|a| self.centroids.iter().map(|b| a.cosine(b, true)).collect())
            .collect()
    }

    pub fn stats(&self) -> Vec<ClusterStats> {
        self.centroids
            .iter()
            .enumerate()
            .map(|(id, c)| ClusterStats {
                id,
                users: self.members(id).len(),
                items: c.len(),
                spread: self.spread(id),
                norm: c.norm(),
            })
            .collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn largest_cluster(&self) -> usize {
        self.centroids
            .iter()
            .enumerate()
            .min_by_key(|&(i, c)| (Reverse(c.len()), i))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn place(&mut self, user: UserId, cluster: usize) {
        match self.assignments.insert(user, cluster) {
            Some(old) if old == cluster => {}
            Some(old) => {
                if let Some(members) = self.members.get_mut(old) {
                    members.retain(|&u| u != user);
                }
                self.members[cluster].push(user);
            }
            None => self.members[cluster].push(user),
        }
    }

    fn clear_memberships(&mut self) {
        self.assignments.clear();
        for members in &mut self.members {
            members.clear();
        }
    }

    fn compute_centroids(&mut self, votes: &VoteTable) {
        for i in 0..self.centroids.len() {
            self.recompute_centroid(votes, i);
        }
    }

    fn recompute_centroid(&mut self, votes: &VoteTable, i: usize) {
        let mut sums: BTreeMap<ItemId, (f32, u32)> = BTreeMap::new();
        for &user in &self.members[i] {
            let Some(vector) = votes.user(user) else {
                continue;
            };
            for (item, score) in vector.iter() {
                let slot = sums.entry(item).or_insert((0.0, 0));
                slot.0 += score;
                slot.1 += 1;
            }
        }

        let mut centroid = SparseVector::with_capacity(i as UserId, sums.len());
        for (item, (sum, count)) in sums {
            centroid.set(item, sum / count as f32);
        }

        let members = &self.members[i];
        self.spread[i] = if members.is_empty() {
            0.0
        } else {
            let total: f32 = members
                .iter()
                .filter_map(|&u| votes.user(u))
                .map(|v| centroid.cosine(v, false))
                .sum();
            total / members.len() as f32
        };
        self.centroids[i] = centroid;
    }

    /// (mean spread, mean old/new strict cosine, non-empty count)
    fn stability(&self, old: &[SparseVector]) -> (f32, f32, usize) {
        let mut quality = 0.0;
        let mut difference = 0.0;
        let mut non_empty = 0;
        for (i, centroid) in self.centroids.iter().enumerate() {
            if self.members[i].is_empty() {
                continue;
            }
            non_empty += 1;
            quality += self.spread[i];
            difference += centroid.cosine(&old[i], true);
            log::debug!(
                "[cluster] #{:>2} spread {:.3} users {:>6} items {:>6}",
                i,
                self.spread[i],
                self.members[i].len(),
                centroid.len()
            );
        }
        if non_empty > 0 {
            quality /= non_empty as f32;
            difference /= non_empty as f32;
        }
        (quality, difference, non_empty)
    }

    fn log_centroid_matrix(&self) {
        for (i, row) in self.centroid_similarity_matrix().iter().enumerate() {
            let cells: Vec<String> = row.iter().map(|v| format!("{:6.3}", v)).collect();
            log::debug!("[cluster] centroid {:>2}: {}", i, cells.join(","));
        }
    }
}
