//! The assignment decision: merge into a nearby similar cluster, found a new
//! one, or defer.
//!
//! Decisions are pure reads over a `ClusterStore`; the engine applies them.
//! Candidate ordering and founder selection are deterministic so a replay of
//! the same submissions in the same order yields the same clusters.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use civicsignal_common::config::ClusteringConfig;
use civicsignal_common::CivicSignalError;

use crate::aggregator::weighted_centroid;
use crate::cluster::{ClusterId, Report};
use crate::pending::PendingEntry;
use crate::similarity::SimilarityMatcher;
use crate::store::ClusterStore;

/// Slack when comparing summed weights against the formation gate, so three
/// reports of 0.4 reach 1.2 regardless of float rounding.
const WEIGHT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "cluster_id", rename_all = "snake_case")]
pub enum Decision {
    MergeInto(ClusterId),
    CreateNew,
    Defer,
}

/// A cluster that passed both the similarity and the containment check.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCandidate {
    pub cluster_id: ClusterId,
    pub similarity: f64,
    pub distance_m: f64,
}

/// Similar pending reports around a submission and the independent weight
/// they add up to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corroboration {
    pub entries: Vec<PendingEntry>,
    /// Distinct submitters, the report's own included.
    pub submitters: usize,
    /// Sum over distinct submitters of each one's largest weight.
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub decision: Decision,
    /// Surviving merge candidates, best first.
    pub candidates: Vec<ClusterCandidate>,
    /// Founding members for `CreateNew`, the report itself first.
    pub founders: Vec<Report>,
    pub corroboration: Corroboration,
}

#[derive(Debug, Clone)]
pub struct ClusterAssigner {
    config: ClusteringConfig,
    matcher: SimilarityMatcher,
}

impl ClusterAssigner {
    pub fn new(config: ClusteringConfig) -> Self {
        Self {
            config,
            matcher: SimilarityMatcher::new(),
        }
    }

    /// Decide where `report` goes. Clusters in `excluded` are skipped; the
    /// engine fills it with clusters that refused a merge.
    pub fn assign(
        &self,
        report: &Report,
        store: &ClusterStore,
        excluded: &BTreeSet<ClusterId>,
    ) -> Result<Assignment, CivicSignalError> {
        let candidates = self.candidates(report, store, excluded)?;
        if let Some(best) = candidates.first() {
            debug!(
                submission_id = %report.submission_id,
                cluster_id = %best.cluster_id,
                similarity = best.similarity,
                distance_m = best.distance_m,
                "Merge candidate selected"
            );
            return Ok(Assignment {
                decision: Decision::MergeInto(best.cluster_id),
                candidates,
                founders: Vec::new(),
                corroboration: Corroboration::default(),
            });
        }

        let corroboration = self.corroboration(report, store)?;

        let decision = if report.weight + WEIGHT_EPSILON >= self.config.high_weight_threshold
            || corroboration.weight + WEIGHT_EPSILON >= self.config.min_weight_for_cluster
        {
            Decision::CreateNew
        } else {
            Decision::Defer
        };

        debug!(
            submission_id = %report.submission_id,
            weight = report.weight,
            corroborating = corroboration.entries.len(),
            cumulative_weight = corroboration.weight,
            decision = ?decision,
            "No merge candidate"
        );

        Ok(Assignment {
            decision,
            candidates,
            founders: if decision == Decision::CreateNew {
                founders(report, &corroboration.entries)
            } else {
                Vec::new()
            },
            corroboration,
        })
    }

    /// Open clusters of the report's category that it could merge into, best
    /// first: highest similarity, then nearest, then lowest id.
    pub fn candidates(
        &self,
        report: &Report,
        store: &ClusterStore,
        excluded: &BTreeSet<ClusterId>,
    ) -> Result<Vec<ClusterCandidate>, CivicSignalError> {
        let hits = store
            .index()
            .query(&report.location, self.config.max_cluster_radius_m, report.category)?;

        let mut candidates = Vec::new();
        for hit in hits {
            if excluded.contains(&hit.cluster_id) {
                continue;
            }
            let Some(cluster) = store.cluster(hit.cluster_id) else {
                continue;
            };
            // A full cluster sends the report on to creation instead.
            if !cluster.is_open() || cluster.member_count() >= self.config.max_members {
                continue;
            }
            if hit.distance_m > cluster.radius_m + report.gps_accuracy_m {
                continue;
            }
            let similarity = self
                .matcher
                .similarity(&report.content, cluster.representative_text());
            if similarity < self.config.similarity_threshold {
                continue;
            }
            candidates.push(ClusterCandidate {
                cluster_id: hit.cluster_id,
                similarity,
                distance_m: hit.distance_m,
            });
        }

        candidates.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.distance_m.total_cmp(&b.distance_m))
                .then(a.cluster_id.cmp(&b.cluster_id))
        });
        Ok(candidates)
    }

    /// Similar deferred reports within the search radius that could found a
    /// cluster with `report`: the oldest ones up to the member cap, pruned so
    /// that together they fit inside one maximum-radius cluster. The weight
    /// covers exactly these entries.
    pub fn corroboration(&self, report: &Report, store: &ClusterStore) -> Result<Corroboration, CivicSignalError> {
        let mut found = store.pool().find_corroborating(
            report,
            self.config.max_cluster_radius_m,
            &self.matcher,
            self.config.similarity_threshold,
        )?;
        found.truncate(self.config.max_members.saturating_sub(1));
        let entries = self.prune_to_radius(report, found);

        let mut per_submitter: BTreeMap<&str, f64> = BTreeMap::new();
        per_submitter.insert(report.submitter_id.as_str(), report.weight);
        for entry in &entries {
            let w = per_submitter.entry(entry.report.submitter_id.as_str()).or_insert(0.0);
            *w = w.max(entry.report.weight);
        }

        let submitters = per_submitter.len();
        let weight = per_submitter.values().sum();
        Ok(Corroboration {
            entries,
            submitters,
            weight,
        })
    }

    /// Drop the entries farthest from the report until every point lies within
    /// the maximum radius of the weighted centroid.
    fn prune_to_radius(&self, report: &Report, mut entries: Vec<PendingEntry>) -> Vec<PendingEntry> {
        loop {
            let mut members: Vec<Report> = Vec::with_capacity(entries.len() + 1);
            members.push(report.clone());
            members.extend(entries.iter().map(|e| e.report.clone()));
            let weight_sum: f64 = members.iter().map(|m| m.weight).sum();
            let centroid = weighted_centroid(&members, weight_sum);

            let fits = members
                .iter()
                .all(|m| centroid.distance_m(&m.location) <= self.config.max_cluster_radius_m);
            if fits || entries.is_empty() {
                return entries;
            }

            let farthest = entries
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    let da = a.report.location.distance_m(&report.location);
                    let db = b.report.location.distance_m(&report.location);
                    da.total_cmp(&db)
                        .then(a.submission_id().cmp(&b.submission_id()))
                })
                .map(|(i, _)| i);
            match farthest {
                Some(i) => {
                    entries.remove(i);
                }
                None => return entries,
            }
        }
    }

}

/// The report first, then its corroborating entries in pool order.
fn founders(report: &Report, entries: &[PendingEntry]) -> Vec<Report> {
    let mut founders = Vec::with_capacity(entries.len() + 1);
    founders.push(report.clone());
    founders.extend(entries.iter().map(|e| e.report.clone()));
    founders
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use civicsignal_common::{Category, EngineConfig, GeoPoint};
    use uuid::Uuid;

    const TAMAN: GeoPoint = GeoPoint {
        lat: -6.2297,
        lng: 106.8295,
    };

    fn north(meters: f64) -> GeoPoint {
        GeoPoint::new(TAMAN.lat + meters / 111_195.0, TAMAN.lng)
    }

    fn report(text: &str, location: GeoPoint, weight: f64) -> Report {
        Report {
            submission_id: Uuid::new_v4(),
            submitter_id: Uuid::new_v4().to_string(),
            category: Category::Lighting,
            location,
            gps_accuracy_m: 20.0,
            weight,
            quality: 5.0,
            content: text.to_string(),
            submitted_at: Utc::now(),
        }
    }

    fn setup() -> (ClusterAssigner, ClusterStore) {
        setup_with(EngineConfig::default())
    }

    fn setup_with(config: EngineConfig) -> (ClusterAssigner, ClusterStore) {
        (ClusterAssigner::new(config.clustering.clone()), ClusterStore::new(&config))
    }

    #[test]
    fn decision_wire_format() {
        assert_eq!(
            serde_json::to_value(Decision::MergeInto(ClusterId(3))).unwrap(),
            serde_json::json!({ "decision": "merge_into", "cluster_id": 3 })
        );
        assert_eq!(
            serde_json::to_value(Decision::Defer).unwrap(),
            serde_json::json!({ "decision": "defer" })
        );
    }

    #[test]
    fn lone_report_with_full_weight_creates() {
        let (assigner, store) = setup();
        let r = report("lampu taman padam sejak senin", TAMAN, 1.0);
        let a = assigner.assign(&r, &store, &BTreeSet::new()).unwrap();
        assert_eq!(a.decision, Decision::CreateNew);
        assert_eq!(a.founders.len(), 1);
    }

    #[test]
    fn lone_light_report_defers() {
        let (assigner, store) = setup();
        let r = report("lampu taman padam sejak senin", TAMAN, 0.4);
        let a = assigner.assign(&r, &store, &BTreeSet::new()).unwrap();
        assert_eq!(a.decision, Decision::Defer);
        assert!(a.founders.is_empty());
    }

    #[test]
    fn similar_nearby_cluster_wins_over_creation() {
        let (assigner, mut store) = setup();
        let seed = report("lampu taman padam sejak senin", TAMAN, 1.0);
        let cluster = store
            .create(Category::Lighting, vec![seed], Utc::now())
            .unwrap();

        let r = report("lampu taman padam sejak senin malam", north(30.0), 4.0);
        let a = assigner.assign(&r, &store, &BTreeSet::new()).unwrap();
        assert_eq!(a.decision, Decision::MergeInto(cluster.id));
    }

    #[test]
    fn candidate_outside_radius_plus_accuracy_is_skipped() {
        let (assigner, mut store) = setup();
        store
            .create(Category::Lighting, vec![report("lampu taman padam", TAMAN, 1.0)], Utc::now())
            .unwrap();
        // cluster radius 50 + accuracy 20 < 400
        let r = report("lampu taman padam", north(400.0), 1.0);
        let a = assigner.assign(&r, &store, &BTreeSet::new()).unwrap();
        assert!(a.candidates.is_empty());
        assert_eq!(a.decision, Decision::CreateNew);
    }

    #[test]
    fn excluded_cluster_is_not_offered_again() {
        let (assigner, mut store) = setup();
        let cluster = store
            .create(Category::Lighting, vec![report("lampu taman padam", TAMAN, 1.0)], Utc::now())
            .unwrap();
        let r = report("lampu taman padam", TAMAN, 0.4);
        let excluded: BTreeSet<_> = [cluster.id].into_iter().collect();
        let a = assigner.assign(&r, &store, &excluded).unwrap();
        assert_eq!(a.decision, Decision::Defer);
    }

    #[test]
    fn ties_break_on_distance_then_lower_id() {
        let (assigner, mut store) = setup();
        let far = store
            .create(Category::Lighting, vec![report("lampu taman padam", north(40.0), 1.0)], Utc::now())
            .unwrap();
        let near = store
            .create(Category::Lighting, vec![report("lampu taman padam", north(10.0), 1.0)], Utc::now())
            .unwrap();
        let r = report("lampu taman padam", TAMAN, 1.0);
        let a = assigner.assign(&r, &store, &BTreeSet::new()).unwrap();
        assert_eq!(a.decision, Decision::MergeInto(near.id));
        assert_eq!(a.candidates[1].cluster_id, far.id);
    }

    #[test]
    fn repeated_submitter_counts_once() {
        let (assigner, mut store) = setup();
        let mut first = report("lampu taman padam sejak senin", TAMAN, 0.4);
        first.submitter_id = "warga-7".to_string();
        let mut second = report("lampu taman padam sejak senin", TAMAN, 0.4);
        second.submitter_id = "warga-7".to_string();
        store.defer(first, Utc::now()).unwrap();
        store.defer(second, Utc::now()).unwrap();

        let mut third = report("lampu taman padam sejak senin", TAMAN, 0.4);
        third.submitter_id = "warga-7".to_string();
        let a = assigner.assign(&third, &store, &BTreeSet::new()).unwrap();
        assert_eq!(a.corroboration.submitters, 1);
        assert_eq!(a.decision, Decision::Defer);
    }

    #[test]
    fn founders_are_pruned_to_fit_one_cluster() {
        let (assigner, mut store) = setup();
        let south = report("lampu taman padam sejak senin", TAMAN, 0.1);
        let south_id = south.submission_id;
        store.defer(south, Utc::now()).unwrap();
        store
            .defer(report("lampu taman padam sejak senin", north(1940.0), 0.5), Utc::now())
            .unwrap();

        // both entries are within 1000m of the probe, but not of their
        // shared weighted centroid
        let r = report("lampu taman padam sejak senin", north(950.0), 0.4);
        let c = assigner.corroboration(&r, &store).unwrap();
        let ids: Vec<_> = c.entries.iter().map(|e| e.submission_id()).collect();
        assert_eq!(ids, vec![south_id]);
        assert!((c.weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn weight_at_high_threshold_creates_alone() {
        let mut config = EngineConfig::default();
        config.clustering.min_weight_for_cluster = 4.0;
        let (assigner, store) = setup_with(config);

        let heavy = report("lampu taman padam sejak senin", TAMAN, 3.0);
        let a = assigner.assign(&heavy, &store, &BTreeSet::new()).unwrap();
        assert_eq!(a.decision, Decision::CreateNew);
        assert_eq!(a.founders.len(), 1);

        let lighter = report("lampu taman padam sejak senin", TAMAN, 2.9);
        let a = assigner.assign(&lighter, &store, &BTreeSet::new()).unwrap();
        assert_eq!(a.decision, Decision::Defer);
    }

    #[test]
    fn founders_respect_member_cap_and_radius() {
        let (assigner, mut store) = setup();
        let start = Utc::now();
        // oldest 48 north, then 49 south; all 97 together fit one cluster,
        // the oldest 49 alone do not
        for i in 0..97 {
            let meters = if i < 48 { 980.0 } else { -980.0 };
            let mut r = report("lampu taman padam sejak senin", north(meters), 0.4);
            r.submitter_id = "warga-9".to_string();
            store.defer(r, start + chrono::Duration::seconds(i)).unwrap();
        }
        assert_eq!(store.pool().len(), 97);

        let r = report("lampu taman padam sejak senin", TAMAN, 0.6);
        let a = assigner.assign(&r, &store, &BTreeSet::new()).unwrap();
        assert_eq!(a.decision, Decision::CreateNew);
        assert!(a.founders.len() <= 50);
        assert_eq!(a.founders.len(), a.corroboration.entries.len() + 1);

        // the founders the gate counted are exactly the ones that build
        let cluster = store.create(Category::Lighting, a.founders, Utc::now()).unwrap();
        assert!((cluster.weight_sum - (0.6 + 0.4 * a.corroboration.entries.len() as f64)).abs() < 1e-9);
    }
}
