use chrono::{DateTime, Utc};
use serde::Serialize;

use civicsignal_common::{Category, GeoPoint};

use crate::cluster::{ClusterId, IssueCluster};

/// Dashboard view of one open cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub category: Category,
    pub priority: f64,
    pub member_count: usize,
    pub weight_sum: f64,
    pub avg_quality: f32,
    pub centroid: GeoPoint,
    pub radius_m: f64,
    pub representative_text: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&IssueCluster> for ClusterSummary {
    fn from(cluster: &IssueCluster) -> Self {
        Self {
            id: cluster.id,
            category: cluster.category,
            priority: cluster.priority,
            member_count: cluster.member_count(),
            weight_sum: cluster.weight_sum,
            avg_quality: cluster.avg_quality,
            centroid: cluster.centroid,
            radius_m: cluster.radius_m,
            representative_text: cluster.representative_text().to_string(),
            updated_at: cluster.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PriorityRanker;

impl PriorityRanker {
    pub fn new() -> Self {
        Self
    }

    /// Open clusters by priority, highest first. Ties go to the larger
    /// cluster, then the older one.
    pub fn rank<'a>(&self, clusters: impl IntoIterator<Item = &'a IssueCluster>, limit: usize) -> Vec<ClusterSummary> {
        let mut open: Vec<&IssueCluster> = clusters.into_iter().filter(|c| c.is_open()).collect();
        open.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then(b.member_count().cmp(&a.member_count()))
                .then(a.id.cmp(&b.id))
        });
        open.into_iter().take(limit).map(ClusterSummary::from).collect()
    }
}
