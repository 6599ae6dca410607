//! Affinity - collaborative-filtering recommendations from vote histories
//!
//! Users are represented by sparse vectors of their votes. The library
//! provides:
//! - Sparse vectors with cosine similarity and an 8-bit quantized codec
//! - A windowed vote table with full and incremental reloads
//! - Cosine k-means over the most active users, with Gram-Schmidt
//!   orthogonalization of the centroids
//! - Peer-weighted predictions and per-user recommendation lists
//! - A key-value cache adapter publishing quantized outputs
//! - A refresh engine with snapshot swaps and warm-restart snapshots

pub mod cache;
pub mod cancel;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod items;
pub mod recommend;
pub mod snapshot;
pub mod source;
pub mod vector;
pub mod votes;

pub use cache::{
    AuditReport, CacheAdapter, CacheConfig, CacheStore, FsCacheStore, MemoryCacheStore,
    PublishSummary, cache_key,
};
pub use cancel::CancelToken;
pub use cluster::{ClusterConfig, ClusterEngine, ClusterReport, ClusterStats, Orthogonalize};
pub use config::{EngineConfig, ItemsConfig, ScheduleConfig, VotesConfig};
pub use engine::{EngineState, RefreshEngine, RefreshReport};
pub use error::{Error, Result};
pub use items::RecentItems;
pub use recommend::{
    EvaluationReport, PublishMode, Recommender, RecommenderConfig, SimilarityList, Tally, evaluate,
};
pub use snapshot::{load_snapshot, save_snapshot};
pub use source::{
    ItemSource, JsonlItemSource, JsonlVoteSource, MemoryItemSource, MemoryVoteSource, SignalKind,
    Vote, VoteRecord, VoteSource,
};
pub use vector::{ItemId, RECORD_SIZE, Scale, SparseVector, UserId};
pub use votes::{IngestBatch, SignalWeights, VoteStats, VoteTable};
