//! In-memory cluster registry: clusters, their geo index and the pending
//! pool, owned together so every mutation keeps the three consistent.
//!
//! Each mutating method runs its fallible steps before touching any state,
//! so an error leaves the store exactly as it was.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use civicsignal_common::{Category, CivicSignalError, EngineConfig};

use crate::aggregator::ClusterAggregator;
use crate::cluster::{ClusterId, ClusterStatus, IssueCluster, Report};
use crate::geo_index::GeoIndex;
use crate::pending::{PendingEntry, PendingPool};

#[derive(Debug, Clone)]
pub struct ClusterStore {
    aggregator: ClusterAggregator,
    clusters: BTreeMap<ClusterId, IssueCluster>,
    index: GeoIndex,
    pool: PendingPool,
    /// Submission id → cluster it belongs to.
    assigned: HashMap<Uuid, ClusterId>,
    next_id: u64,
}

impl ClusterStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            aggregator: ClusterAggregator::new(&config.clustering),
            clusters: BTreeMap::new(),
            index: GeoIndex::new(config.clustering.geocell_precision),
            pool: PendingPool::new(config.clustering.geocell_precision, config.pending.capacity_per_cell),
            assigned: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn index(&self) -> &GeoIndex {
        &self.index
    }

    pub fn pool(&self) -> &PendingPool {
        &self.pool
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&IssueCluster> {
        self.clusters.get(&id)
    }

    /// All clusters, any status, in id order.
    pub fn clusters(&self) -> impl Iterator<Item = &IssueCluster> {
        self.clusters.values()
    }

    pub fn cluster_of(&self, submission_id: Uuid) -> Option<ClusterId> {
        self.assigned.get(&submission_id).copied()
    }

    /// Whether the submission already sits in a cluster or the pending pool.
    pub fn is_known(&self, submission_id: Uuid) -> bool {
        self.assigned.contains_key(&submission_id) || self.pool.contains(submission_id)
    }

    /// Found a cluster. Founders waiting in the pending pool leave it.
    pub fn create(
        &mut self,
        category: Category,
        founders: Vec<Report>,
        now: DateTime<Utc>,
    ) -> Result<IssueCluster, CivicSignalError> {
        if let Some(taken) = founders.iter().find(|f| self.assigned.contains_key(&f.submission_id)) {
            return Err(CivicSignalError::InvariantViolation(format!(
                "submission {} is already assigned to {}",
                taken.submission_id, self.assigned[&taken.submission_id]
            )));
        }

        let id = ClusterId(self.next_id);
        let cluster = self.aggregator.create(id, category, founders, now)?;
        self.index
            .insert(id, category, cluster.centroid, cluster.radius_m)?;

        self.next_id += 1;
        for member in cluster.member_ids() {
            self.pool.remove(member);
            self.assigned.insert(member, id);
        }
        self.clusters.insert(id, cluster.clone());

        info!(
            cluster_id = %id,
            category = %category,
            members = cluster.member_count(),
            weight = cluster.weight_sum,
            "Cluster created"
        );
        Ok(cluster)
    }

    /// Add one report to an open cluster.
    pub fn merge(&mut self, id: ClusterId, report: Report, now: DateTime<Utc>) -> Result<IssueCluster, CivicSignalError> {
        if let Some(existing) = self.assigned.get(&report.submission_id) {
            return Err(CivicSignalError::InvariantViolation(format!(
                "submission {} is already assigned to {existing}",
                report.submission_id
            )));
        }
        let Some(current) = self.clusters.get(&id) else {
            return Err(CivicSignalError::InvariantViolation(format!("{id} does not exist")));
        };

        let mut next = current.clone();
        let submission_id = report.submission_id;
        self.aggregator.merge(&mut next, report, now)?;
        if next.radius_m < current.radius_m {
            return Err(CivicSignalError::InvariantViolation(format!(
                "merge would shrink {id} from {:.1}m to {:.1}m",
                current.radius_m, next.radius_m
            )));
        }
        self.index.update(id, next.centroid, next.radius_m)?;

        self.pool.remove(submission_id);
        self.assigned.insert(submission_id, id);
        self.clusters.insert(id, next.clone());

        info!(
            cluster_id = %id,
            %submission_id,
            members = next.member_count(),
            radius_m = next.radius_m,
            "Report merged into cluster"
        );
        Ok(next)
    }

    /// Park a report in the pending pool. Returns the entry evicted by a full
    /// pool cell, if any.
    pub fn defer(&mut self, report: Report, now: DateTime<Utc>) -> Result<Option<PendingEntry>, CivicSignalError> {
        if let Some(existing) = self.assigned.get(&report.submission_id) {
            return Err(CivicSignalError::InvariantViolation(format!(
                "submission {} is already assigned to {existing}",
                report.submission_id
            )));
        }
        self.pool.insert(report, now)
    }

    pub fn remove_pending(&mut self, submission_id: Uuid) -> Option<PendingEntry> {
        self.pool.remove(submission_id)
    }

    /// Close a cluster: it leaves the index and takes no further members.
    pub fn close(&mut self, id: ClusterId, now: DateTime<Utc>) -> Result<IssueCluster, CivicSignalError> {
        let Some(cluster) = self.clusters.get_mut(&id) else {
            return Err(CivicSignalError::InvariantViolation(format!("{id} does not exist")));
        };
        if !cluster.is_open() {
            return Err(CivicSignalError::InvariantViolation(format!("{id} is not open")));
        }
        cluster.status = ClusterStatus::Closed;
        cluster.updated_at = now;
        let closed = cluster.clone();
        self.index.remove(id);

        info!(cluster_id = %id, members = closed.member_count(), "Cluster closed");
        Ok(closed)
    }

    /// Moderator merge: every member of `absorb` moves into `keep`.
    pub fn merge_clusters(
        &mut self,
        keep: ClusterId,
        absorb: ClusterId,
        now: DateTime<Utc>,
    ) -> Result<IssueCluster, CivicSignalError> {
        if keep == absorb {
            return Err(CivicSignalError::InvariantViolation(format!(
                "cannot merge {keep} into itself"
            )));
        }
        let (Some(kept), Some(absorbed)) = (self.clusters.get(&keep), self.clusters.get(&absorb)) else {
            return Err(CivicSignalError::InvariantViolation(format!(
                "{keep} or {absorb} does not exist"
            )));
        };

        let mut next_keep = kept.clone();
        let mut next_absorb = absorbed.clone();
        self.aggregator.absorb(&mut next_keep, &mut next_absorb, now)?;
        self.index.update(keep, next_keep.centroid, next_keep.radius_m)?;

        self.index.remove(absorb);
        for member in next_absorb.member_ids() {
            self.assigned.insert(member, keep);
        }
        self.clusters.insert(absorb, next_absorb);
        self.clusters.insert(keep, next_keep.clone());

        info!(
            cluster_id = %keep,
            absorbed = %absorb,
            members = next_keep.member_count(),
            "Clusters merged"
        );
        Ok(next_keep)
    }
}
