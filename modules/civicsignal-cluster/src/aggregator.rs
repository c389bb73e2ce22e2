//! Running cluster aggregates: weighted centroid, containment radius, weight
//! mass, average quality and priority.
//!
//! Every mutation is computed on a copy and committed only once all checks
//! pass, so a rejected merge leaves the cluster exactly as it was.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use civicsignal_common::config::ClusteringConfig;
use civicsignal_common::{Category, CivicSignalError, GeoPoint, QUALITY_SCORE_MAX};

use crate::cluster::{ClusterId, ClusterStatus, IssueCluster, Report};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregateError {
    #[error("{cluster} is full ({cap} members)")]
    Full { cluster: ClusterId, cap: usize },

    #[error("{cluster} would need radius {required_m:.0}m to contain its members")]
    RadiusExceeded { cluster: ClusterId, required_m: f64 },

    #[error("submission {0} is already a member")]
    DuplicateMember(Uuid),

    #[error("{0} is not open")]
    NotOpen(ClusterId),

    #[error("category mismatch: cluster is {cluster}, report is {report}")]
    CategoryMismatch { cluster: Category, report: Category },

    #[error("a cluster needs at least one founding member")]
    NoFounders,
}

impl From<AggregateError> for CivicSignalError {
    fn from(err: AggregateError) -> Self {
        match err {
            // Member cap and radius cap both bound what one cluster can hold.
            AggregateError::Full { .. } | AggregateError::RadiusExceeded { .. } => {
                CivicSignalError::CapacityExceeded(err.to_string())
            }
            other => CivicSignalError::InvariantViolation(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterAggregator {
    min_radius_m: f64,
    max_radius_m: f64,
    max_members: usize,
}

impl ClusterAggregator {
    pub fn new(config: &ClusteringConfig) -> Self {
        Self {
            min_radius_m: config.min_cluster_radius_m,
            max_radius_m: config.max_cluster_radius_m,
            max_members: config.max_members,
        }
    }

    /// Build a cluster from its founding members.
    pub fn create(
        &self,
        id: ClusterId,
        category: Category,
        founders: Vec<Report>,
        now: DateTime<Utc>,
    ) -> Result<IssueCluster, AggregateError> {
        let Some(first) = founders.first() else {
            return Err(AggregateError::NoFounders);
        };
        if founders.len() > self.max_members {
            return Err(AggregateError::Full {
                cluster: id,
                cap: self.max_members,
            });
        }
        for (i, founder) in founders.iter().enumerate() {
            if founder.category != category {
                return Err(AggregateError::CategoryMismatch {
                    cluster: category,
                    report: founder.category,
                });
            }
            if founders[..i].iter().any(|f| f.submission_id == founder.submission_id) {
                return Err(AggregateError::DuplicateMember(founder.submission_id));
            }
        }

        let mut cluster = IssueCluster {
            id,
            category,
            centroid: first.location,
            radius_m: self.min_radius_m,
            weight_sum: 0.0,
            avg_quality: 0.0,
            priority: 0.0,
            status: ClusterStatus::Open,
            representative_id: first.submission_id,
            members: founders,
            created_at: now,
            updated_at: now,
        };
        self.recompute(&mut cluster)?;
        Ok(cluster)
    }

    /// Add one member. On error the cluster is untouched.
    pub fn merge(&self, cluster: &mut IssueCluster, report: Report, now: DateTime<Utc>) -> Result<(), AggregateError> {
        self.check_accepts(cluster, &report)?;
        if cluster.members.len() >= self.max_members {
            return Err(AggregateError::Full {
                cluster: cluster.id,
                cap: self.max_members,
            });
        }

        let mut next = cluster.clone();
        next.members.push(report);
        next.updated_at = now;
        self.recompute(&mut next)?;
        *cluster = next;
        Ok(())
    }

    /// Fold every member of `absorb` into `keep`. On error neither changes.
    pub fn absorb(
        &self,
        keep: &mut IssueCluster,
        absorb: &mut IssueCluster,
        now: DateTime<Utc>,
    ) -> Result<(), AggregateError> {
        if !absorb.is_open() {
            return Err(AggregateError::NotOpen(absorb.id));
        }
        if keep.members.len() + absorb.members.len() > self.max_members {
            return Err(AggregateError::Full {
                cluster: keep.id,
                cap: self.max_members,
            });
        }

        let mut next = keep.clone();
        for member in &absorb.members {
            self.check_accepts(&next, member)?;
            next.members.push(member.clone());
        }
        next.updated_at = now;
        self.recompute(&mut next)?;

        *keep = next;
        absorb.status = ClusterStatus::Merged;
        absorb.updated_at = now;
        Ok(())
    }

    fn check_accepts(&self, cluster: &IssueCluster, report: &Report) -> Result<(), AggregateError> {
        if !cluster.is_open() {
            return Err(AggregateError::NotOpen(cluster.id));
        }
        if report.category != cluster.category {
            return Err(AggregateError::CategoryMismatch {
                cluster: cluster.category,
                report: report.category,
            });
        }
        if cluster.contains_member(report.submission_id) {
            return Err(AggregateError::DuplicateMember(report.submission_id));
        }
        Ok(())
    }

    /// Recompute every aggregate from the member list. The radius never
    /// shrinks below its previous value.
    fn recompute(&self, cluster: &mut IssueCluster) -> Result<(), AggregateError> {
        let weight_sum: f64 = cluster.members.iter().map(|m| m.weight).sum();
        let centroid = weighted_centroid(&cluster.members, weight_sum);

        let mut farthest_point_m: f64 = 0.0;
        let mut required_m: f64 = 0.0;
        for member in &cluster.members {
            let d = centroid.distance_m(&member.location);
            farthest_point_m = farthest_point_m.max(d);
            required_m = required_m.max(d + member.gps_accuracy_m);
        }
        if farthest_point_m > self.max_radius_m {
            return Err(AggregateError::RadiusExceeded {
                cluster: cluster.id,
                required_m: farthest_point_m,
            });
        }

        let radius_m = required_m
            .clamp(self.min_radius_m, self.max_radius_m)
            .max(cluster.radius_m);

        let count = cluster.members.len();
        let avg_quality = cluster.members.iter().map(|m| m.quality).sum::<f32>() / count as f32;

        cluster.centroid = centroid;
        cluster.radius_m = radius_m;
        cluster.weight_sum = weight_sum;
        cluster.avg_quality = avg_quality;
        cluster.representative_id = representative(&cluster.members).unwrap_or(cluster.representative_id);
        cluster.priority = priority_score(cluster.category, weight_sum, avg_quality, count);
        Ok(())
    }
}

pub(crate) fn weighted_centroid(members: &[Report], weight_sum: f64) -> GeoPoint {
    if weight_sum <= 0.0 {
        let n = members.len().max(1) as f64;
        return GeoPoint::new(
            members.iter().map(|m| m.location.lat).sum::<f64>() / n,
            members.iter().map(|m| m.location.lng).sum::<f64>() / n,
        );
    }
    GeoPoint::new(
        members.iter().map(|m| m.location.lat * m.weight).sum::<f64>() / weight_sum,
        members.iter().map(|m| m.location.lng * m.weight).sum::<f64>() / weight_sum,
    )
}

/// Highest-quality member, most recent on ties.
fn representative(members: &[Report]) -> Option<Uuid> {
    members
        .iter()
        .max_by(|a, b| {
            a.quality
                .total_cmp(&b.quality)
                .then(a.submitted_at.cmp(&b.submitted_at))
        })
        .map(|m| m.submission_id)
}

/// Dashboard ranking score, increasing in each factor. Never feeds assignment.
pub fn priority_score(category: Category, weight_sum: f64, avg_quality: f32, member_count: usize) -> f64 {
    let mass = 1.0 + weight_sum.max(0.0).ln_1p();
    let quality = 1.0 + (avg_quality as f64 / QUALITY_SCORE_MAX as f64).clamp(0.0, 1.0);
    let volume = 1.0 + (member_count.max(1) as f64).ln();
    category.severity_factor() * mass * quality * volume
}
