//! Scoring and clustering engine for crowd-submitted civic issue reports.
//!
//! A validated submission is scored for evidentiary quality, then assigned:
//! merged into a nearby similar cluster, used to found a new cluster, or
//! deferred into a pending pool until enough independent weight corroborates
//! it. Decisions are serialized per (category, geocell) lane.

pub mod aggregator;
pub mod assigner;
pub mod cluster;
pub mod engine;
pub mod geo_index;
pub mod lanes;
pub mod pending;
pub mod quality;
pub mod ranking;
pub mod similarity;
pub mod store;
pub mod traits;
pub mod trust;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use aggregator::{AggregateError, ClusterAggregator};
pub use assigner::{Assignment, ClusterAssigner, ClusterCandidate, Corroboration, Decision};
pub use cluster::{ClusterId, ClusterStatus, IssueCluster, Report};
pub use engine::{Engine, EngineEvent, SubmissionOutcome, SweepReport};
pub use geo_index::{GeoIndex, IndexHit, LaneKey};
pub use lanes::{LaneGuard, LaneLocks};
pub use pending::{PendingEntry, PendingPool};
pub use quality::QualityScorer;
pub use ranking::{ClusterSummary, PriorityRanker};
pub use similarity::SimilarityMatcher;
pub use store::ClusterStore;
pub use traits::{ContentValidator, SubmitterDirectory};
pub use trust::TrustScorer;
