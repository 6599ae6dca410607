//! Scores previously published predictions against votes that arrived later.

use rustc_hash::FxHashMap;
use serde::Serialize;

use super::Recommender;
use crate::vector::{SparseVector, UserId};
use crate::votes::IngestBatch;

/// Items with this many votes or more share the last popularity bucket.
pub const POPULARITY_BUCKETS: usize = 20;

/// Guess outcomes for one slice of the evaluated votes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub up_right: u32,
    pub down_right: u32,
    pub up_wrong: u32,
    pub down_wrong: u32,
    /// Votes on items without a non-zero cached guess
    pub unknown: u32,
    pub total: u32,
}

impl Tally {
    pub fn record(&mut self, guess: Option<f32>, actual: f32) {
        self.total += 1;
        let product = guess.map(|g| g * actual).unwrap_or(0.0);
        match (product > 0.0, product < 0.0, actual > 0.0) {
            (true, _, true) => self.up_right += 1,
            (true, _, false) => self.down_right += 1,
            (_, true, true) => self.up_wrong += 1,
            (_, true, false) => self.down_wrong += 1,
            _ => self.unknown += 1,
        }
    }

    pub fn correct(&self) -> u32 {
        self.up_right + self.down_right
    }

    pub fn incorrect(&self) -> u32 {
        self.up_wrong + self.down_wrong
    }

    /// Fraction of guessed votes that were guessed right.
    pub fn accuracy(&self) -> f32 {
        self.correct() as f32 / (self.total - self.unknown).max(1) as f32
    }

    /// Fraction of votes that had a guess at all.
    pub fn coverage(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.total - self.unknown) as f32 / self.total as f32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub overall: Tally,
    /// Indexed by item vote count, capped at `POPULARITY_BUCKETS - 1`
    pub by_popularity: Vec<Tally>,
    /// Indexed by the voter's cluster
    pub by_cluster: Vec<Tally>,
    pub unclustered: Tally,
}

impl EvaluationReport {
    pub fn log(&self) {
        log::info!(
            "[evaluate] {} correct ({}+/{}-), {} incorrect ({}+/{}-), {} unknown: {:.2}% correct, {:.2}% covered",
            self.overall.correct(),
            self.overall.up_right,
            self.overall.down_right,
            self.overall.incorrect(),
            self.overall.up_wrong,
            self.overall.down_wrong,
            self.overall.unknown,
            100.0 * self.overall.accuracy(),
            100.0 * self.overall.coverage()
        );
        for (bucket, tally) in self.by_popularity.iter().enumerate() {
            if tally.total > 0 {
                log::debug!(
                    "[evaluate] popularity {:>2}: {:>6} correct, {:>6} incorrect, {:>6} unknown",
                    bucket,
                    tally.correct(),
                    tally.incorrect(),
                    tally.unknown
                );
            }
        }
        for (cluster, tally) in self.by_cluster.iter().enumerate() {
            if tally.total > 0 {
                log::debug!(
                    "[evaluate] cluster {:>2}: {:>6} correct, {:>6} incorrect, {:>6} unknown",
                    cluster,
                    tally.correct(),
                    tally.incorrect(),
                    tally.unknown
                );
            }
        }
    }
}

/// Compares each newly ingested vote with the prediction that was cached for
/// the voter before the vote arrived.
pub fn evaluate(
    recommender: &Recommender,
    batch: &IngestBatch,
    cached: &FxHashMap<UserId, SparseVector>,
) -> EvaluationReport {
    let mut report = EvaluationReport {
        by_popularity: vec![Tally::default(); POPULARITY_BUCKETS],
        by_cluster: vec![Tally::default(); recommender.clusters().len()],
        ..Default::default()
    };

    for (&user, votes) in &batch.votes {
        let prediction = cached.get(&user);
        let cluster = recommender.clusters().cluster_of(user);

        for (item, actual) in votes.iter() {
            let guess = prediction.and_then(|p| p.try_get(item));
            let bucket = (recommender.votes().popularity(item) as usize).min(POPULARITY_BUCKETS - 1);

            report.overall.record(guess, actual);
            report.by_popularity[bucket].record(guess, actual);
            match cluster.and_then(|c| report.by_cluster.get_mut(c)) {
                Some(tally) => tally.record(guess, actual),
                None => report.unclustered.record(guess, actual),
            }
        }
    }

    report
}
