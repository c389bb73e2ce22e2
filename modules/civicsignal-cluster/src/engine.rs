//! Async facade tying scoring, assignment and the cluster store together.
//!
//! One `Engine` is shared (behind an `Arc`) by every intake worker. Scoring
//! runs without locks; the assignment decision and its application run while
//! holding the lanes covering the submission's search disk.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use civicsignal_common::{
    Category, CivicSignalError, EngineConfig, QualityScoreBreakdown, Submission, TrustWeight,
};

use crate::assigner::{ClusterAssigner, Decision};
use crate::cluster::{ClusterId, IssueCluster, Report};
use crate::geo_index::{covering_lanes, LaneKey};
use crate::lanes::{LaneGuard, LaneLocks};
use crate::quality::QualityScorer;
use crate::ranking::{ClusterSummary, PriorityRanker};
use crate::store::ClusterStore;
use crate::traits::{ContentValidator, SubmitterDirectory};
use crate::trust::TrustScorer;

// ---------------------------------------------------------------------------
// Events and outcomes
// ---------------------------------------------------------------------------

/// Something a moderator or operator should see. Never fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Waited past the pending horizon without corroboration.
    PendingExpired {
        submission_id: Uuid,
        category: Category,
        deferred_at: DateTime<Utc>,
        age_hours: i64,
    },
    /// Evicted from a full pending pool cell.
    PendingOverflow {
        submission_id: Uuid,
        category: Category,
        deferred_at: DateTime<Utc>,
    },
    /// Enough independent submitters agree, but their combined weight is
    /// still below the formation gate.
    UnderweightCorroboration {
        category: Category,
        submission_ids: Vec<Uuid>,
        submitters: usize,
        weight: f64,
    },
    /// A cluster refused a merge it was chosen for, or a founding set did
    /// not fit one cluster (no `cluster_id`).
    CapacityExceeded {
        #[serde(skip_serializing_if = "Option::is_none")]
        cluster_id: Option<ClusterId>,
        submission_id: Uuid,
        detail: String,
    },
    InvariantViolation {
        submission_id: Uuid,
        detail: String,
    },
}

impl EngineEvent {
    pub fn code(&self) -> &'static str {
        match self {
            EngineEvent::PendingExpired { .. } => "pending_expired",
            EngineEvent::PendingOverflow { .. } => "pending_overflow",
            EngineEvent::UnderweightCorroboration { .. } => "underweight_corroboration",
            EngineEvent::CapacityExceeded { .. } => "capacity_exceeded",
            EngineEvent::InvariantViolation { .. } => "invariant_violation",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub submission_id: Uuid,
    pub quality: QualityScoreBreakdown,
    /// Weight the decision was made with.
    pub trust_weight: f64,
    pub decision: Decision,
    /// Snapshot of the cluster after a create or merge.
    pub cluster: Option<IssueCluster>,
    pub events: Vec<EngineEvent>,
}

impl SubmissionOutcome {
    /// A cluster refused this submission on its way to the final decision.
    pub fn capacity_exceeded(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, EngineEvent::CapacityExceeded { .. }))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub reevaluated: usize,
    pub merged: usize,
    pub created: usize,
    pub expired: usize,
    pub events: Vec<EngineEvent>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: EngineConfig,
    quality: QualityScorer,
    trust: TrustScorer,
    assigner: ClusterAssigner,
    ranker: PriorityRanker,
    store: RwLock<ClusterStore>,
    lanes: LaneLocks,
    trust_registry: RwLock<HashMap<String, TrustWeight>>,
    validator: Option<Arc<dyn ContentValidator>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, CivicSignalError> {
        config.validate()?;
        Ok(Self {
            quality: QualityScorer::new(config.quality.clone()),
            trust: TrustScorer::new(),
            assigner: ClusterAssigner::new(config.clustering.clone()),
            ranker: PriorityRanker::new(),
            store: RwLock::new(ClusterStore::new(&config)),
            lanes: LaneLocks::new(),
            trust_registry: RwLock::new(HashMap::new()),
            validator: None,
            config,
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn ContentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn read_store(&self) -> RwLockReadGuard<'_, ClusterStore> {
        self.store.read().expect("cluster store lock poisoned")
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, ClusterStore> {
        self.store.write().expect("cluster store lock poisoned")
    }

    // --- Intake ---

    /// Score and place one submission. Only `InputRejected` comes back as an
    /// error; everything else degrades and is reported on the outcome.
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionOutcome, CivicSignalError> {
        if let Err(reason) = submission.validate(&self.config.bounds, self.config.quality.gps_reject_m) {
            warn!(
                submission_id = %submission.id,
                reason = reason.code(),
                "Submission rejected: {reason}"
            );
            return Err(reason.into());
        }

        let corroboration = self.validation_score(&submission).await;
        let quality = self.quality.score(&submission, corroboration);
        let weight = self.effective_weight(&submission);
        let report = Report::new(&submission, &quality, weight);

        let lanes = covering_lanes(
            submission.category,
            &submission.location,
            self.config.clustering.max_cluster_radius_m,
            self.config.clustering.geocell_precision,
        )?;
        let held = lanes.clone();
        let _guard = self.lanes.acquire(lanes).await;

        let now = Utc::now();
        let mut events = Vec::new();

        if self.read_store().is_known(submission.id) {
            let detail = format!("submission {} was already placed", submission.id);
            error!(submission_id = %submission.id, "{detail}");
            events.push(EngineEvent::InvariantViolation {
                submission_id: submission.id,
                detail,
            });
            return Ok(SubmissionOutcome {
                submission_id: submission.id,
                quality,
                trust_weight: weight,
                decision: Decision::Defer,
                cluster: None,
                events,
            });
        }

        let (decision, cluster) = match self.place(report.clone(), now, false, &mut events) {
            Ok(placed) => placed,
            Err(e @ CivicSignalError::InputRejected(_)) => return Err(e),
            Err(e) => {
                let detail = e.to_string();
                error!(submission_id = %submission.id, "Assignment aborted: {detail}");
                events.push(EngineEvent::InvariantViolation {
                    submission_id: submission.id,
                    detail,
                });
                self.park(report, now, &mut events);
                (Decision::Defer, None)
            }
        };
        let promoted = self.reevaluate_pending(&held, submission.id, now, &mut events);

        info!(
            submission_id = %submission.id,
            category = %submission.category,
            quality = quality.total,
            grade = ?quality.grade,
            weight,
            decision = ?decision,
            promoted,
            "Submission placed"
        );

        Ok(SubmissionOutcome {
            submission_id: submission.id,
            quality,
            trust_weight: weight,
            decision,
            cluster,
            events,
        })
    }

    /// Decide and apply, retrying without any cluster that refuses the merge.
    /// `pending` is true when the report already sits in the pool.
    fn place(
        &self,
        report: Report,
        now: DateTime<Utc>,
        pending: bool,
        events: &mut Vec<EngineEvent>,
    ) -> Result<(Decision, Option<IssueCluster>), CivicSignalError> {
        let mut excluded = BTreeSet::new();
        loop {
            let assignment = {
                let store = self.read_store();
                self.assigner.assign(&report, &store, &excluded)?
            };

            match assignment.decision {
                Decision::MergeInto(cluster_id) => {
                    let merged = self.write_store().merge(cluster_id, report.clone(), now);
                    match merged {
                        Ok(cluster) => return Ok((Decision::MergeInto(cluster_id), Some(cluster))),
                        Err(CivicSignalError::CapacityExceeded(detail)) => {
                            warn!(
                                submission_id = %report.submission_id,
                                %cluster_id,
                                "Merge refused, re-evaluating: {detail}"
                            );
                            events.push(EngineEvent::CapacityExceeded {
                                cluster_id: Some(cluster_id),
                                submission_id: report.submission_id,
                                detail,
                            });
                            excluded.insert(cluster_id);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Decision::CreateNew => {
                    let created = self
                        .write_store()
                        .create(report.category, assignment.founders, now);
                    match created {
                        Ok(cluster) => return Ok((Decision::CreateNew, Some(cluster))),
                        // The report waits for a founding set that fits.
                        Err(CivicSignalError::CapacityExceeded(detail)) => {
                            warn!(
                                submission_id = %report.submission_id,
                                "Cluster creation refused, deferring: {detail}"
                            );
                            events.push(EngineEvent::CapacityExceeded {
                                cluster_id: None,
                                submission_id: report.submission_id,
                                detail,
                            });
                            if !pending {
                                self.park(report, now, events);
                            }
                            return Ok((Decision::Defer, None));
                        }
                        Err(e) => return Err(e),
                    }
                }
                Decision::Defer => {
                    if !pending {
                        self.park(report, now, events);
                    }
                    return Ok((Decision::Defer, None));
                }
            }
        }
    }

    /// Re-run the decision for pending entries in the held lanes, oldest
    /// first, after a placement changed what is around them. Returns how many
    /// left the pool.
    fn reevaluate_pending(
        &self,
        lanes: &BTreeSet<LaneKey>,
        just_placed: Uuid,
        now: DateTime<Utc>,
        events: &mut Vec<EngineEvent>,
    ) -> usize {
        let snapshot = self.read_store().pool().entries_in(lanes);
        let mut promoted = 0;
        for entry in snapshot {
            let submission_id = entry.submission_id();
            if submission_id == just_placed || !self.read_store().pool().contains(submission_id) {
                continue;
            }
            match self.place(entry.report, now, true, events) {
                Ok((Decision::Defer, _)) => {}
                Ok((decision, _)) => {
                    info!(%submission_id, decision = ?decision, "Pending entry placed on re-evaluation");
                    promoted += 1;
                }
                Err(e) => {
                    error!(%submission_id, error = %e, "Pending re-evaluation aborted");
                    events.push(EngineEvent::InvariantViolation {
                        submission_id,
                        detail: e.to_string(),
                    });
                }
            }
        }
        promoted
    }

    /// Put a report in the pending pool, surfacing any eviction.
    fn park(&self, report: Report, now: DateTime<Utc>, events: &mut Vec<EngineEvent>) {
        let submission_id = report.submission_id;
        let parked = self.write_store().defer(report, now);
        match parked {
            Ok(Some(evicted)) => {
                warn!(
                    submission_id = %evicted.submission_id(),
                    category = %evicted.report.category,
                    "Pending pool cell full, oldest entry surfaced to moderation"
                );
                events.push(EngineEvent::PendingOverflow {
                    submission_id: evicted.submission_id(),
                    category: evicted.report.category,
                    deferred_at: evicted.deferred_at,
                });
            }
            Ok(None) => {}
            Err(e) => {
                error!(%submission_id, error = %e, "Could not defer submission");
                events.push(EngineEvent::InvariantViolation {
                    submission_id,
                    detail: e.to_string(),
                });
            }
        }
    }

    /// Content-validation sub-score under the SLA. `None` when the validator
    /// is absent, fails or runs out of time.
    async fn validation_score(&self, submission: &Submission) -> Option<f32> {
        let validator = self.validator.as_ref()?;
        let budget = self
            .config
            .timeouts
            .validation_timeout(!submission.media.is_empty());

        match timeout(budget, validator.classify(&submission.content)).await {
            Ok(Ok(score)) => Some(score),
            Ok(Err(e)) => {
                warn!(submission_id = %submission.id, error = %e, "Content validation failed, scoring without it");
                None
            }
            Err(_) => {
                warn!(
                    submission_id = %submission.id,
                    budget_secs = budget.as_secs(),
                    "Content validation timed out, scoring without it"
                );
                None
            }
        }
    }

    /// A registered submitter's recomputed weight wins over the weight
    /// attached at intake.
    fn effective_weight(&self, submission: &Submission) -> f64 {
        self.trust_registry
            .read()
            .expect("trust registry lock poisoned")
            .get(&submission.submitter_id)
            .map(|w| w.value())
            .unwrap_or(submission.trust_weight)
    }

    // --- Trust ---

    /// Last known weight for a submitter, the floor if never computed.
    pub fn trust_weight(&self, submitter_id: &str) -> TrustWeight {
        self.trust_registry
            .read()
            .expect("trust registry lock poisoned")
            .get(submitter_id)
            .copied()
            .unwrap_or_else(TrustWeight::floor)
    }

    /// Recompute a submitter's weight from the verification collaborator. A
    /// failed or slow lookup keeps the last known weight.
    pub async fn refresh_trust(&self, directory: &dyn SubmitterDirectory, submitter_id: &str) -> TrustWeight {
        let budget = self.config.timeouts.history_timeout();
        match timeout(budget, directory.history(submitter_id)).await {
            Ok(Ok(history)) => {
                let weight = self.trust.recompute(&history);
                self.trust_registry
                    .write()
                    .expect("trust registry lock poisoned")
                    .insert(submitter_id.to_string(), weight);
                weight
            }
            Ok(Err(e)) => {
                warn!(submitter_id, error = %e, "Submitter history unavailable, keeping last weight");
                self.trust_weight(submitter_id)
            }
            Err(_) => {
                warn!(
                    submitter_id,
                    budget_secs = budget.as_secs(),
                    "Submitter history lookup timed out, keeping last weight"
                );
                self.trust_weight(submitter_id)
            }
        }
    }

    // --- Sweep ---

    /// Re-evaluate every pending entry, oldest first, then surface what has
    /// waited past the horizon or is stuck below the weight gate.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, CivicSignalError> {
        let horizon = Duration::hours(self.config.pending.horizon_hours);
        let snapshot = self.read_store().pool().entries();
        let mut report = SweepReport::default();
        let mut flagged: HashSet<Uuid> = HashSet::new();

        for entry in snapshot {
            let submission_id = entry.submission_id();
            let lanes = covering_lanes(
                entry.report.category,
                &entry.report.location,
                self.config.clustering.max_cluster_radius_m,
                self.config.clustering.geocell_precision,
            )?;
            let _guard = self.lanes.acquire(lanes).await;

            // An earlier entry in this sweep may have pulled it into a cluster.
            if !self.read_store().pool().contains(submission_id) {
                continue;
            }
            report.reevaluated += 1;

            let placed = self.place(entry.report.clone(), now, true, &mut report.events);
            match placed {
                Ok((Decision::MergeInto(_), _)) => report.merged += 1,
                Ok((Decision::CreateNew, _)) => report.created += 1,
                Ok((Decision::Defer, _)) => {
                    if entry.age(now) > horizon {
                        let removed = self.write_store().remove_pending(submission_id);
                        if let Some(expired) = removed {
                            let age_hours = expired.age(now).num_hours();
                            warn!(%submission_id, age_hours, "Pending entry expired, surfaced to moderation");
                            report.expired += 1;
                            report.events.push(EngineEvent::PendingExpired {
                                submission_id,
                                category: expired.report.category,
                                deferred_at: expired.deferred_at,
                                age_hours,
                            });
                        }
                        continue;
                    }
                    if flagged.contains(&submission_id) {
                        continue;
                    }
                    let corroboration = {
                        let store = self.read_store();
                        self.assigner.corroboration(&entry.report, &store)?
                    };
                    if corroboration.submitters >= self.config.clustering.min_similar_reports {
                        let mut submission_ids = vec![submission_id];
                        submission_ids.extend(corroboration.entries.iter().map(|e| e.submission_id()));
                        flagged.extend(submission_ids.iter().copied());
                        info!(
                            %submission_id,
                            submitters = corroboration.submitters,
                            weight = corroboration.weight,
                            "Corroborated reports still below weight gate"
                        );
                        report.events.push(EngineEvent::UnderweightCorroboration {
                            category: entry.report.category,
                            submission_ids,
                            submitters: corroboration.submitters,
                            weight: corroboration.weight,
                        });
                    }
                }
                Err(CivicSignalError::InvariantViolation(detail)) => {
                    error!(%submission_id, "Sweep re-evaluation aborted: {detail}");
                    report.events.push(EngineEvent::InvariantViolation { submission_id, detail });
                }
                Err(e) => return Err(e),
            }
        }

        let pruned = self.lanes.prune();
        info!(
            reevaluated = report.reevaluated,
            merged = report.merged,
            created = report.created,
            expired = report.expired,
            lanes_pruned = pruned,
            "Pending sweep finished"
        );
        Ok(report)
    }

    // --- Moderation ---

    pub async fn close_cluster(&self, id: ClusterId) -> Result<IssueCluster, CivicSignalError> {
        let _guard = self.cluster_lanes(&[id]).await?;
        self.write_store().close(id, Utc::now())
    }

    pub async fn merge_clusters(&self, keep: ClusterId, absorb: ClusterId) -> Result<IssueCluster, CivicSignalError> {
        let _guard = self.cluster_lanes(&[keep, absorb]).await?;
        self.write_store().merge_clusters(keep, absorb, Utc::now())
    }

    /// Lanes around the given clusters' centroids.
    async fn cluster_lanes(&self, ids: &[ClusterId]) -> Result<LaneGuard, CivicSignalError> {
        let mut keys = BTreeSet::new();
        {
            let store = self.read_store();
            for id in ids {
                let Some(cluster) = store.cluster(*id) else {
                    return Err(CivicSignalError::InvariantViolation(format!("{id} does not exist")));
                };
                keys.extend(covering_lanes(
                    cluster.category,
                    &cluster.centroid,
                    self.config.clustering.max_cluster_radius_m,
                    self.config.clustering.geocell_precision,
                )?);
            }
        }
        Ok(self.lanes.acquire(keys).await)
    }

    // --- Reads ---

    pub fn cluster(&self, id: ClusterId) -> Option<IssueCluster> {
        self.read_store().cluster(id).cloned()
    }

    pub fn clusters(&self) -> Vec<IssueCluster> {
        self.read_store().clusters().cloned().collect()
    }

    pub fn cluster_of(&self, submission_id: Uuid) -> Option<ClusterId> {
        self.read_store().cluster_of(submission_id)
    }

    pub fn rank(&self, limit: usize) -> Vec<ClusterSummary> {
        let store = self.read_store();
        self.ranker.rank(store.clusters(), limit)
    }

    pub fn pending_len(&self) -> usize {
        self.read_store().pool().len()
    }

    pub fn is_pending(&self, submission_id: Uuid) -> bool {
        self.read_store().pool().contains(submission_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civicsignal_common::GeoPoint;

    fn submission(text: &str, weight: f64) -> Submission {
        Submission::builder()
            .content(text)
            .category(Category::Environment)
            .location(GeoPoint::new(-6.3, 106.9))
            .gps_accuracy_m(15.0)
            .submitter_id(Uuid::new_v4().to_string())
            .trust_weight(weight)
            .build()
    }

    #[tokio::test]
    async fn rejected_input_never_reaches_the_store() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let mut outside = submission("pohon tumbang di jalan", 1.0);
        outside.location = GeoPoint::new(48.85, 2.35);
        let err = engine.submit(outside).await.unwrap_err();
        assert!(matches!(err, CivicSignalError::InputRejected(_)));
        assert!(engine.clusters().is_empty());
        assert_eq!(engine.pending_len(), 0);
    }

    #[tokio::test]
    async fn resubmitting_a_placed_submission_is_reported_not_applied() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let s = submission("pohon tumbang di jalan raya", 1.0);
        let first = engine.submit(s.clone()).await.unwrap();
        assert_eq!(first.decision, Decision::CreateNew);

        let again = engine.submit(s).await.unwrap();
        assert_eq!(again.decision, Decision::Defer);
        assert_eq!(again.events.len(), 1);
        assert_eq!(again.events[0].code(), "invariant_violation");
        assert_eq!(engine.clusters()[0].member_count(), 1);
        assert_eq!(engine.pending_len(), 0);
    }

    #[tokio::test]
    async fn invalid_config_is_refused() {
        let mut config = EngineConfig::default();
        config.clustering.similarity_threshold = 1.5;
        assert!(matches!(Engine::new(config), Err(CivicSignalError::Config(_))));
    }

    #[test]
    fn unknown_submitter_starts_at_floor() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.trust_weight("warga-baru").value(), 1.0);
    }
}
