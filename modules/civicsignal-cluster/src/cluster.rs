use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use civicsignal_common::{Category, GeoPoint, QualityScoreBreakdown, Submission};

/// Cluster identifier, allocated in increasing order by the store. Lower ids
/// are older clusters and win deterministic tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cluster-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Open,
    /// Absorbed into another cluster by a moderator merge.
    Merged,
    Closed,
}

/// The clustering-relevant projection of a scored submission. Cluster members
/// and pending entries both carry one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub submission_id: Uuid,
    pub submitter_id: String,
    pub category: Category,
    pub location: GeoPoint,
    pub gps_accuracy_m: f64,
    pub weight: f64,
    pub quality: f32,
    pub content: String,
    pub submitted_at: DateTime<Utc>,
}

impl Report {
    pub fn new(submission: &Submission, quality: &QualityScoreBreakdown, weight: f64) -> Self {
        Self {
            submission_id: submission.id,
            submitter_id: submission.submitter_id.clone(),
            category: submission.category,
            location: submission.location,
            gps_accuracy_m: submission.gps_accuracy_m,
            weight,
            quality: quality.total,
            content: submission.content.clone(),
            submitted_at: submission.created_at,
        }
    }
}

/// One real-world problem and the reports believed to describe it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueCluster {
    pub id: ClusterId,
    pub category: Category,
    pub members: Vec<Report>,
    pub centroid: GeoPoint,
    pub radius_m: f64,
    /// Sum of member trust weights.
    pub weight_sum: f64,
    pub avg_quality: f32,
    pub priority: f64,
    pub status: ClusterStatus,
    /// Member whose text stands in for the cluster during similarity checks.
    pub representative_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IssueCluster {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.members.iter().map(|m| m.submission_id)
    }

    pub fn contains_member(&self, submission_id: Uuid) -> bool {
        self.members.iter().any(|m| m.submission_id == submission_id)
    }

    pub fn representative_text(&self) -> &str {
        self.members
            .iter()
            .find(|m| m.submission_id == self.representative_id)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    pub fn is_open(&self) -> bool {
        self.status == ClusterStatus::Open
    }
}
