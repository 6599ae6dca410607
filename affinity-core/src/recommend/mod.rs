//! Peer-based prediction on top of the vote table and clusters.
//!
//! A user's peers are the members of the cluster(s) most similar to the
//! user, ranked by how well their preferences agree with the user's own
//! votes. Predictions are the similarity-weighted average of the peers'
//! preferences.

mod evaluate;

pub use evaluate::{EvaluationReport, Tally, evaluate};

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::cluster::{ClusterConfig, ClusterEngine, ClusterReport};
use crate::error::Result;
use crate::source::VoteSource;
use crate::vector::{ItemId, SparseVector, UserId};
use crate::votes::{IngestBatch, VoteTable};

/// Ranked (peer, similarity) pairs, most similar first.
pub type SimilarityList = Vec<(UserId, f32)>;

/// What gets published to the cache for each refreshed user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Predicted scores over the recent item set.
    #[default]
    Predictions,
    /// The user's similarity list, keyed by peer id.
    Peers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommenderConfig {
    /// Weight of the cluster centroid against the user's own vote, in [0, 1]
    pub fudge: f32,
    /// Also predict items the user already voted on
    pub include_voted: bool,
    /// Candidate count above which an empty result triggers the pure cluster pass
    pub fallback_min_candidates: usize,
    /// A pass producing more predictions than this ends the retries
    pub min_recommendations: usize,
    /// Passes per user; passes after the first reassign the user's cluster
    pub max_attempts: usize,
    pub publish: PublishMode,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            fudge: 0.0,
            include_voted: true,
            fallback_min_candidates: 100,
            min_recommendations: 20,
            max_attempts: 1,
            publish: PublishMode::Predictions,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Recommender {
    config: RecommenderConfig,
    votes: VoteTable,
    clusters: ClusterEngine,
    peers: FxHashMap<UserId, SimilarityList>,
}

impl Recommender {
    pub fn new(config: RecommenderConfig, votes: VoteTable, clusters: ClusterConfig) -> Self {
        Self {
            config,
            votes,
            clusters: ClusterEngine::new(clusters),
            peers: FxHashMap::default(),
        }
    }

    pub fn config(&self) -> &RecommenderConfig {
        &self.config
    }

    pub fn votes(&self) -> &VoteTable {
        &self.votes
    }

    /// Direct access to the vote table. Batches ingested through it must be
    /// passed to [`absorb`](Self::absorb).
    pub fn votes_mut(&mut self) -> &mut VoteTable {
        &mut self.votes
    }

    /// Reloads the vote table from `source`.
    ///
    /// A full reload drops every similarity list. An incremental one keeps
    /// them; [`absorb`](Self::absorb) then drops those of the touched users.
    pub async fn reload_votes(&mut self, source: &dyn VoteSource, full: bool) -> Result<IngestBatch> {
        let full = full || self.votes.last_load_time() <= 0.0;
        let batch = self.votes.reload(source, full).await?;
        if full {
            self.peers.clear();
        }
        Ok(batch)
    }

    pub fn clusters(&self) -> &ClusterEngine {
        &self.clusters
    }

    /// Cached similarity list, if one was computed.
    pub fn peers(&self, user: UserId) -> Option<&[(UserId, f32)]> {
        self.peers.get(&user).map(Vec::as_slice)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Rebuilds the clusters over the above-average voters.
    pub fn recluster(&mut self, cancel: &CancelToken) -> Result<ClusterReport> {
        let training = self.votes.important_users();
        let report = self.clusters.generate(&self.votes, &training, cancel)?;
        self.peers.clear();
        Ok(report)
    }

    /// Accounts for a batch of new votes already folded into the table.
    ///
    /// Similarity lists of the touched users are dropped and users new to
    /// the clusters are assigned.
    pub fn absorb(&mut self, batch: &IngestBatch) {
        for user in batch.users() {
            self.peers.remove(&user);
        }
        if !self.clusters.is_empty() {
            self.clusters.add_users(&self.votes, batch.users());
        }
    }

    // ========================================================================
    // Prediction
    // ========================================================================

    /// Blend of the user's own vote and the cluster centroid.
    pub fn user_preference(&self, user: UserId, item: ItemId) -> f32 {
        self.preference_with(user, item, self.config.fudge)
    }

    fn preference_with(&self, user: UserId, item: ItemId, fudge: f32) -> f32 {
        let Some(vector) = self.votes.user(user) else {
            return 0.0;
        };
        let own = vector.try_get(item).map(|v| (1.0 - fudge) * v).unwrap_or(0.0);
        own + fudge * self.clusters.guess(user, item)
    }

    /// Peers of `user`, computing and caching them when needed.
    ///
    /// `recompute` forces a fresh list without changing the user's cluster.
    pub fn similar_users(&mut self, user: UserId, recompute: bool) -> &[(UserId, f32)] {
        self.ensure_peers(user, false, recompute);
        self.peers(user).unwrap_or(&[])
    }

    /// Predicted score for `item`; 0 when no peer carries any weight.
    ///
    /// `retry` reassigns the user away from its current cluster first.
    pub fn predict(&mut self, user: UserId, item: ItemId, retry: bool) -> f32 {
        self.ensure_peers(user, retry, false);
        let peers = self.peers(user).unwrap_or(&[]);
        self.weighted_prediction(peers, item, self.config.fudge)
    }

    /// Read-only variant of [`predict`](Self::predict) for shared snapshots.
    ///
    /// Uses the cached similarity list when present, otherwise computes one
    /// without storing it.
    pub fn predict_cached(&self, user: UserId, item: ItemId) -> f32 {
        match self.peers(user) {
            Some(peers) => self.weighted_prediction(peers, item, self.config.fudge),
            None => {
                let peers = self.compute_peers(user, self.config.fudge);
                self.weighted_prediction(&peers, item, self.config.fudge)
            }
        }
    }

    fn ensure_peers(&mut self, user: UserId, retry: bool, redo: bool) {
        if !(retry || redo || !self.peers.contains_key(&user)) {
            return;
        }
        if retry || self.clusters.cluster_of(user).is_none() {
            self.clusters.assign(&self.votes, user, retry);
        }
        let list = self.compute_peers(user, self.config.fudge);
        self.peers.insert(user, list);
    }

    fn compute_peers(&self, user: UserId, fudge: f32) -> SimilarityList {
        let ranked = self.clusters.cluster_distances(&self.votes, user);
        let Some(&(top_cluster, top)) = ranked.first() else {
            return Vec::new();
        };

        let mut scored: BTreeMap<UserId, f32> = BTreeMap::new();
        let (mut similar, mut different) = (0usize, 0usize);

        if let Some(own) = self.votes.user(user).filter(|v| !v.is_empty()) {
            for &(cluster, _) in ranked.iter().take_while(|&&(_, d)| d == top) {
                for &peer in self.clusters.members(cluster) {
                    if peer == user {
                        continue;
                    }
                    let (mut num, mut d_own, mut d_peer) = (0.0f32, 0.0f32, 0.0f32);
                    for (item, mine) in own.iter() {
                        let theirs = self.preference_with(peer, item, fudge);
                        num += mine * theirs;
                        d_own += mine * mine;
                        d_peer += theirs * theirs;
                    }
                    if num > 0.0 {
                        similar += 1;
                    } else if num < 0.0 {
                        different += 1;
                    }
                    if d_own * d_peer != 0.0 && num != 0.0 {
                        scored.insert(peer, num / (d_own * d_peer).sqrt());
                    }
                }
            }
        }

        let mut list: SimilarityList = if scored.is_empty() {
            log::debug!(
                "[recommend] user {} has no usable peers, falling back to cluster {}",
                user,
                top_cluster
            );
            let mut members: SimilarityList = self
                .clusters
                .members(top_cluster)
                .iter()
                .filter(|&&p| p != user)
                .map(|&p| (p, 0.0))
                .collect();
            members.sort_by_key(|&(p, _)| p);
            members
        } else {
            scored.into_iter().collect()
        };
        list.sort_by(|a, b| b.1.total_cmp(&a.1));

        log::trace!(
            "[recommend] user {}: cluster similarity {:.3}, {} peers ({} similar, {} different)",
            user,
            top,
            list.len(),
            similar,
            different
        );
        list
    }

    fn weighted_prediction(&self, peers: &[(UserId, f32)], item: ItemId, fudge: f32) -> f32 {
        let (num, denom) = peers.iter().fold((0.0f32, 0.0f32), |(n, d), &(peer, sim)| {
            (n + sim * self.preference_with(peer, item, fudge), d + sim.abs())
        });
        if denom == 0.0 { 0.0 } else { num / denom }
    }

    /// Non-zero predictions for `user` over `candidates`.
    ///
    /// Each attempt after the first reassigns the user's cluster. When an
    /// attempt yields nothing over a large candidate set, the items are
    /// predicted again from cluster preferences alone. Only positive scores
    /// are kept, unless no score is positive or the user has at most one
    /// positively similar peer.
    pub fn generate_recommendations(&mut self, user: UserId, candidates: &[ItemId]) -> SparseVector {
        let own = self.votes.user(user).cloned().unwrap_or_default();
        let mut out = SparseVector::new(user);
        let attempts = self.config.max_attempts.max(1);

        for attempt in 0..attempts {
            self.ensure_peers(user, attempt > 0, false);
            let peers = self.peers(user).unwrap_or(&[]);
            let mut count = 0usize;

            for &item in candidates {
                if !self.config.include_voted && own.contains(item) {
                    continue;
                }
                let q = self.weighted_prediction(peers, item, self.config.fudge);
                if q != 0.0 {
                    count += 1;
                    out.set(item, q);
                }
            }

            if count == 0 && candidates.len() > self.config.fallback_min_candidates {
                log::debug!("[recommend] user {}: resorting to cluster preferences", user);
                for &item in candidates {
                    if own.contains(item) {
                        continue;
                    }
                    let q = self.weighted_prediction(peers, item, 1.0);
                    if q != 0.0 {
                        count += 1;
                        out.set(item, q);
                    }
                }
            }

            if count > self.config.min_recommendations {
                break;
            }
            log::debug!(
                "[recommend] user {}: attempt {} produced only {} predictions ({} votes)",
                user,
                attempt,
                count,
                own.len()
            );
        }

        let positive_peers = self
            .peers(user)
            .map(|p| p.iter().filter(|&&(_, s)| s > 0.0).count())
            .unwrap_or(0);
        let (_, max) = out.min_max();
        if max > 0.0 && positive_peers > 1 {
            out.retain(|_, score| score > 0.0);
        }
        out
    }

    /// The user's similarity list as a vector keyed by peer id.
    ///
    /// Negative and zero peers are dropped unless no peer is positive or at
    /// most one is.
    pub fn peer_vector(&mut self, user: UserId) -> SparseVector {
        self.ensure_peers(user, false, true);
        let peers = self.peers(user).unwrap_or(&[]);

        let max = peers.iter().map(|&(_, s)| s).fold(0.0f32, f32::max);
        let positive = peers.iter().filter(|&&(_, s)| s > 0.0).count();

        let mut out = SparseVector::with_capacity(user, peers.len());
        for &(peer, sim) in peers {
            if sim > 0.0 || max == 0.0 || positive <= 1 {
                out.set(peer, sim);
            }
        }
        out
    }

    /// Output for `user` according to the configured [`PublishMode`].
    pub fn output_for(&mut self, user: UserId, candidates: &[ItemId]) -> SparseVector {
        match self.config.publish {
            PublishMode::Predictions => self.generate_recommendations(user, candidates),
            PublishMode::Peers => self.peer_vector(user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Vote, VoteRecord};

    fn ingest(table: &mut VoteTable, votes: &[(u32, u32, i8)]) -> IngestBatch {
        table.ingest(
            votes
                .iter()
                .map(|&(user, item, v)| VoteRecord::new(user, item, Vote::try_from(v).unwrap(), 0.0)),
        )
    }

    fn build(votes: &[(u32, u32, i8)], k: usize, config: RecommenderConfig) -> Recommender {
        let mut table = VoteTable::default();
        let batch = ingest(&mut table, votes);
        let mut rec = Recommender::new(config, table, ClusterConfig::new(k));
        rec.recluster(&CancelToken::new()).unwrap();
        rec.absorb(&batch);
        rec
    }

    /// Recommender over fixed clusters instead of trained ones.
    fn staged(
        votes: &[(u32, u32, i8)],
        centroids: Vec<SparseVector>,
        members: Vec<Vec<UserId>>,
        config: RecommenderConfig,
    ) -> Recommender {
        let mut table = VoteTable::default();
        ingest(&mut table, votes);
        let clusters = ClusterConfig::new(centroids.len());
        Recommender {
            config,
            votes: table,
            clusters: ClusterEngine::from_parts(clusters, centroids, members),
            peers: FxHashMap::default(),
        }
    }

    fn centroid(entries: &[(u32, f32)]) -> SparseVector {
        entries.iter().copied().collect()
    }

    /// User 1 is closest to cluster 1, then 0, then 2.
    fn three_way(config: RecommenderConfig) -> Recommender {
        staged(
            &[(1, 10, 1), (1, 11, 1), (3, 10, 1), (3, 11, 1)],
            vec![
                centroid(&[(10, 1.0), (11, 0.5), (12, -1.0)]),
                centroid(&[(10, 1.0), (11, 1.0), (12, 1.0)]),
                centroid(&[(10, 1.0), (11, 0.2)]),
            ],
            vec![vec![], vec![3], vec![]],
            config,
        )
    }

    /// Users 2 and 5 agree with user 1, user 3 disagrees, user 4 half agrees.
    fn five_users(config: RecommenderConfig) -> Recommender {
        build(
            &[
                (1, 1, 1),
                (1, 2, 1),
                (2, 1, 1),
                (2, 2, 1),
                (2, 3, 1),
                (2, 4, -1),
                (3, 1, -1),
                (3, 2, -1),
                (3, 3, -1),
                (3, 4, 1),
                (4, 1, 1),
                (4, 5, 1),
                (5, 1, 1),
                (5, 2, 1),
                (5, 4, 1),
            ],
            1,
            config,
        )
    }

    #[test]
    fn test_three_user_example() {
        let mut rec = build(
            &[(1, 10, 1), (1, 11, -1), (2, 10, 1), (2, 11, -1), (3, 12, 1)],
            2,
            RecommenderConfig::default(),
        );
        assert_eq!(rec.clusters().cluster_of(1), rec.clusters().cluster_of(2));
        assert_eq!(rec.predict(1, 12, false), 0.0);
        assert!((rec.predict(1, 10, false) - 1.0).abs() < 1e-6);
        assert_eq!(rec.similar_users(1, false), &[(2u32, 1.0f32)]);
    }

    #[test]
    fn test_user_preference_blend() {
        let config = RecommenderConfig {
            fudge: 0.25,
            ..Default::default()
        };
        let rec = five_users(config);
        let centroid = rec
            .clusters()
            .centroid(0)
            .expect("one cluster")
            .clone();

        let expected = 0.75 * 1.0 + 0.25 * centroid.get(1);
        assert!((rec.user_preference(1, 1) - expected).abs() < 1e-6);
        assert!((rec.user_preference(1, 3) - 0.25 * centroid.get(3)).abs() < 1e-6);
        assert_eq!(rec.user_preference(99, 1), 0.0);
    }

    #[test]
    fn test_similar_users_ranked_without_self() {
        let mut rec = five_users(RecommenderConfig::default());
        let peers = rec.similar_users(1, false).to_vec();

        let ids: Vec<u32> = peers.iter().map(|&(p, _)| p).collect();
        assert_eq!(ids, vec![2, 5, 4, 3]);
        assert!((peers[0].1 - 1.0).abs() < 1e-6);
        assert!((peers[2].1 - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((peers[3].1 + 1.0).abs() < 1e-6);
        assert!(rec.peers(1).is_some());
    }

    #[test]
    fn test_similar_users_spans_tied_clusters() {
        let mut rec = staged(
            &[
                (1, 10, 1),
                (1, 11, 1),
                (2, 10, 1),
                (2, 11, 1),
                (3, 10, 1),
                (4, 20, 1),
            ],
            vec![
                centroid(&[(10, 1.0)]),
                centroid(&[(10, 2.0)]),
                centroid(&[(20, 1.0)]),
            ],
            vec![vec![2], vec![3], vec![4]],
            RecommenderConfig::default(),
        );
        let peers = rec.similar_users(1, false).to_vec();

        // Clusters 0 and 1 are equally similar to user 1; cluster 2 is not.
        assert_eq!(rec.clusters().cluster_of(1), Some(0));
        let ids: Vec<u32> = peers.iter().map(|&(p, _)| p).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!((peers[0].1 - 1.0).abs() < 1e-6);
        assert!((peers[1].1 - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(rec.predict(1, 20, false), 0.0);
    }

    #[test]
    fn test_predict_retry_moves_user() {
        let config = RecommenderConfig {
            fudge: 0.5,
            ..Default::default()
        };
        let mut rec = three_way(config);

        assert!((rec.predict(1, 12, false) - 0.5).abs() < 1e-6);
        assert_eq!(rec.clusters().cluster_of(1), Some(1));
        assert!((rec.user_preference(1, 12) - 0.5).abs() < 1e-6);

        assert!((rec.predict(1, 12, true) - 0.5).abs() < 1e-6);
        assert_eq!(rec.clusters().cluster_of(1), Some(0));
        assert_eq!(rec.clusters().members(0), &[1]);
        assert_eq!(rec.clusters().members(1), &[3]);
        assert_eq!(rec.clusters().assigned_users(), 2);
        // The move shows through the centroid part of the preference.
        assert!((rec.user_preference(1, 12) + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_attempts_reassign_until_exhausted() {
        let config = RecommenderConfig {
            fudge: 0.5,
            max_attempts: 3,
            ..Default::default()
        };
        let mut rec = three_way(config);
        let out = rec.generate_recommendations(1, &[12]);

        assert_eq!(out.len(), 1);
        assert!((out.get(12) - 0.5).abs() < 1e-6);
        // 1 -> 0 -> 2, one membership at every step.
        assert_eq!(rec.clusters().cluster_of(1), Some(2));
        assert_eq!(rec.clusters().members(2), &[1]);
        assert!(rec.clusters().members(0).is_empty());
        assert_eq!(rec.clusters().members(1), &[3]);
        assert_eq!(rec.clusters().assigned_users(), 2);

        let mut single = three_way(RecommenderConfig {
            fudge: 0.5,
            ..Default::default()
        });
        single.generate_recommendations(1, &[12]);
        assert_eq!(single.clusters().cluster_of(1), Some(1));
    }

    #[test]
    fn test_predict_weighted_average() {
        let mut rec = five_users(RecommenderConfig::default());
        let denom = 3.0 + std::f32::consts::FRAC_1_SQRT_2;
        assert!((rec.predict(1, 3, false) - 2.0 / denom).abs() < 1e-5);
        assert!((rec.predict(1, 4, false) + 1.0 / denom).abs() < 1e-5);
        assert_eq!(rec.predict(1, 42, false), 0.0);
        assert_eq!(rec.predict_cached(1, 3), rec.predict(1, 3, false));
    }

    #[test]
    fn test_predict_without_peers_is_zero() {
        let mut rec = build(
            &[(1, 1, 1), (1, 2, 1), (2, 3, 1), (2, 4, 1), (3, 5, 1)],
            1,
            RecommenderConfig::default(),
        );
        // Nobody shares an item with user 3.
        assert!(rec.similar_users(3, false).iter().all(|&(_, s)| s == 0.0));
        assert_eq!(rec.predict(3, 1, false), 0.0);
        assert_eq!(rec.predict_cached(3, 1), 0.0);
    }

    #[test]
    fn test_recommendations_keep_positive() {
        let config = RecommenderConfig {
            include_voted: false,
            ..Default::default()
        };
        let mut rec = five_users(config);
        let out = rec.generate_recommendations(1, &[1, 2, 3, 4, 5]);

        assert_eq!(out.owner(), 1);
        assert!(!out.contains(1) && !out.contains(2));
        assert!(out.contains(3));
        assert!(out.contains(5));
        assert!(!out.contains(4), "negative prediction kept: {:?}", out);
    }

    #[test]
    fn test_single_positive_peer_keeps_negatives() {
        let mut rec = build(
            &[
                (1, 1, 1),
                (1, 2, 1),
                (2, 1, 1),
                (2, 2, 1),
                (2, 3, 1),
                (2, 4, -1),
                (3, 1, -1),
                (3, 2, -1),
                (3, 3, -1),
                (3, 4, 1),
            ],
            1,
            RecommenderConfig {
                include_voted: false,
                ..Default::default()
            },
        );
        let out = rec.generate_recommendations(1, &[1, 2, 3, 4]);
        assert!((out.get(3) - 1.0).abs() < 1e-6);
        assert!((out.get(4) + 1.0).abs() < 1e-6);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_cluster_fallback_over_large_candidate_set() {
        let mut votes: Vec<(u32, u32, i8)> = vec![(1, 1, 1), (2, 1, 1)];
        votes.extend((100..=200).map(|item| (6, item, 1)));
        let mut rec = build(&votes, 1, RecommenderConfig::default());

        let candidates: Vec<u32> = (100..=200).collect();
        let out = rec.generate_recommendations(1, &candidates);
        assert_eq!(out.len(), 101);
        assert!(out.iter().all(|(_, score)| (score - 1.0).abs() < 1e-6));

        // Small candidate sets never take the fallback.
        let out = rec.generate_recommendations(1, &candidates[..50]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_peer_vector_filters_negative_peers() {
        let config = RecommenderConfig {
            publish: PublishMode::Peers,
            ..Default::default()
        };
        let mut rec = five_users(config);
        let out = rec.output_for(1, &[]);
        let peers: Vec<u32> = out.items().collect();
        assert_eq!(peers, vec![2, 5, 4]);
    }

    #[test]
    fn test_absorb_invalidates_touched_users() {
        let mut rec = five_users(RecommenderConfig::default());
        let before = rec.similar_users(1, false).to_vec();
        rec.similar_users(2, false);

        let batch = ingest(rec.votes_mut(), &[(7, 1, 1), (7, 2, 1), (2, 5, 1)]);
        rec.absorb(&batch);
        assert_eq!(rec.peers(1), Some(before.as_slice()));
        assert!(rec.peers(2).is_none());
        assert_eq!(rec.clusters().cluster_of(7), Some(0));

        // User 7 votes exactly like user 1.
        let peers = rec.similar_users(7, false).to_vec();
        assert_eq!(peers[0].0, 1);
        assert!((peers[0].1 - 1.0).abs() < 1e-6);
        assert!(peers.iter().all(|&(p, _)| p != 7));

        // User 1 keeps its list until asked to recompute.
        assert!(rec.similar_users(1, false).iter().all(|&(p, _)| p != 7));
        assert!(rec.similar_users(1, true).iter().any(|&(p, _)| p == 7));
    }

    #[test]
    fn test_evaluate_tallies_cached_guesses() {
        let mut rec = five_users(RecommenderConfig::default());
        let mut cached = FxHashMap::default();
        cached.insert(1, [(3, 0.5), (4, -0.25), (6, 0.0)].into_iter().collect::<SparseVector>());

        let batch = ingest(rec.votes_mut(), &[(1, 3, 1), (1, 4, 1), (1, 6, -1), (8, 3, -1)]);
        rec.absorb(&batch);
        let report = evaluate(&rec, &batch, &cached);

        assert_eq!(report.overall.total, 4);
        assert_eq!(report.overall.up_right, 1);
        assert_eq!(report.overall.up_wrong, 1);
        assert_eq!(report.overall.unknown, 2);
        assert!((report.overall.accuracy() - 0.5).abs() < 1e-6);
        assert!((report.overall.coverage() - 0.5).abs() < 1e-6);
        assert_eq!(report.by_cluster[0].total, 4);
        assert_eq!(report.unclustered.total, 0);
        // Items 3 and 4 both reach four votes.
        assert_eq!(report.by_popularity[4].total, 3);
        assert_eq!(report.by_popularity[1].total, 1);
    }
}
