//! Integration tests for collaborator degradation, trust refresh, pending
//! sweeps, moderation and lane concurrency.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;

use civicsignal_cluster::testing::{
    offset, pothole, submission, FailingValidator, FixedValidator, MockSubmitterDirectory,
    SlowValidator, KOTA_TUA, MONAS,
};
use civicsignal_cluster::{ClusterStatus, Decision, Engine, EngineEvent};
use civicsignal_common::{Category, EngineConfig, SubmitterHistory, TrustLevel};

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).unwrap()
}

fn quick_timeouts() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.timeouts.classification_secs = 1;
    config.timeouts.history_secs = 1;
    config
}

// ---------------------------------------------------------------------------
// Content validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validator_score_feeds_corroboration() {
    let validator = Arc::new(FixedValidator::new(2.5));
    let engine = engine().with_validator(validator.clone());

    let outcome = engine.submit(pothole(MONAS, 1.0)).await.unwrap();

    assert_eq!(outcome.quality.corroboration, 2.5);
    assert!(outcome.quality.flags.validation_available);
    assert_eq!(validator.calls(), 1);
}

#[tokio::test]
async fn slow_validator_degrades_to_zero_without_blocking_decision() {
    let engine = Engine::new(quick_timeouts())
        .unwrap()
        .with_validator(Arc::new(SlowValidator::new(3.0, Duration::from_secs(10))));

    let started = std::time::Instant::now();
    let outcome = engine.submit(pothole(MONAS, 1.0)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.quality.corroboration, 0.0);
    assert!(!outcome.quality.flags.validation_available);
    assert_eq!(outcome.decision, Decision::CreateNew);
}

#[tokio::test]
async fn failing_validator_degrades_to_zero() {
    let engine = engine().with_validator(Arc::new(FailingValidator));
    let outcome = engine.submit(pothole(MONAS, 1.0)).await.unwrap();
    assert_eq!(outcome.quality.corroboration, 0.0);
    assert_eq!(outcome.decision, Decision::CreateNew);
}

#[tokio::test]
async fn out_of_range_validator_score_is_clamped() {
    let engine = engine().with_validator(Arc::new(FixedValidator::new(40.0)));
    let outcome = engine.submit(pothole(MONAS, 1.0)).await.unwrap();
    assert_eq!(outcome.quality.corroboration, 3.0);
    assert!(outcome.quality.total <= 12.0);
}

// ---------------------------------------------------------------------------
// Trust
// ---------------------------------------------------------------------------

fn verified(submitter_id: &str) -> SubmitterHistory {
    SubmitterHistory {
        submitter_id: submitter_id.to_string(),
        phone_verified: true,
        id_document_verified: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn refreshed_trust_drives_the_decision_weight() {
    let engine = engine();
    let directory = MockSubmitterDirectory::new().with_history(verified("warga-ktp"));

    let weight = engine.refresh_trust(&directory, "warga-ktp").await;
    assert!((weight.value() - 3.0).abs() < 1e-9);
    assert_eq!(weight.level(), TrustLevel::Verified);

    let mut s = pothole(MONAS, 1.0);
    s.submitter_id = "warga-ktp".to_string();
    let outcome = engine.submit(s).await.unwrap();
    assert!((outcome.trust_weight - 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn unknown_submitter_keeps_floor_weight() {
    let engine = engine();
    let weight = engine
        .refresh_trust(&MockSubmitterDirectory::new(), "warga-anonim")
        .await;
    assert_eq!(weight.value(), 1.0);
}

#[tokio::test]
async fn slow_history_lookup_keeps_last_known_weight() {
    let engine = Engine::new(quick_timeouts()).unwrap();
    let fast = MockSubmitterDirectory::new().with_history(verified("warga-ktp"));
    engine.refresh_trust(&fast, "warga-ktp").await;

    let slow = MockSubmitterDirectory::new()
        .with_history(SubmitterHistory {
            submitter_id: "warga-ktp".to_string(),
            ..Default::default()
        })
        .with_delay(Duration::from_secs(10));
    let weight = engine.refresh_trust(&slow, "warga-ktp").await;

    assert!((weight.value() - 3.0).abs() < 1e-9);
    assert!((engine.trust_weight("warga-ktp").value() - 3.0).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sweep_surfaces_expired_entries() {
    let engine = engine();
    let lone = submission(
        "got mampet depan sekolah",
        Category::WaterDrainage,
        KOTA_TUA,
        15.0,
        0.4,
    );
    let lone_id = lone.id;
    assert_eq!(engine.submit(lone).await.unwrap().decision, Decision::Defer);

    let fresh = engine.sweep(Utc::now()).await.unwrap();
    assert_eq!(fresh.reevaluated, 1);
    assert_eq!(fresh.expired, 0);
    assert!(engine.is_pending(lone_id));

    let later = engine.sweep(Utc::now() + chrono::Duration::hours(73)).await.unwrap();
    assert_eq!(later.expired, 1);
    assert!(matches!(
        later.events.as_slice(),
        [EngineEvent::PendingExpired { submission_id, .. }] if *submission_id == lone_id
    ));
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn sweep_flags_corroborated_but_underweight_groups_once() {
    let engine = engine();
    for i in 0..3 {
        let s = submission(
            "got mampet depan sekolah",
            Category::WaterDrainage,
            offset(KOTA_TUA, i as f64 * 5.0, 0.0),
            15.0,
            0.3,
        );
        assert_eq!(engine.submit(s).await.unwrap().decision, Decision::Defer);
    }

    let report = engine.sweep(Utc::now()).await.unwrap();

    let flagged: Vec<_> = report
        .events
        .iter()
        .filter(|e| e.code() == "underweight_corroboration")
        .collect();
    assert_eq!(flagged.len(), 1);
    match flagged[0] {
        EngineEvent::UnderweightCorroboration {
            submitters,
            submission_ids,
            weight,
            ..
        } => {
            assert_eq!(*submitters, 3);
            assert_eq!(submission_ids.len(), 3);
            assert!((weight - 0.9).abs() < 1e-9);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(engine.pending_len(), 3);
}

#[tokio::test]
async fn pool_overflow_is_surfaced_not_dropped() {
    let mut config = EngineConfig::default();
    config.pending.capacity_per_cell = 2;
    let engine = Engine::new(config).unwrap();

    let texts = ["got mampet", "saluran tersumbat", "genangan air setinggi lutut"];
    let mut first_id = None;
    let mut last = None;
    for text in texts {
        let s = submission(text, Category::WaterDrainage, KOTA_TUA, 15.0, 0.2);
        first_id.get_or_insert(s.id);
        last = Some(engine.submit(s).await.unwrap());
    }

    let last = last.unwrap();
    assert_eq!(last.decision, Decision::Defer);
    assert!(matches!(
        last.events.as_slice(),
        [EngineEvent::PendingOverflow { submission_id, .. }] if Some(*submission_id) == first_id
    ));
    assert_eq!(engine.pending_len(), 2);
}

// ---------------------------------------------------------------------------
// Pending re-evaluation on intake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deferred_report_joins_once_a_merge_grows_the_cluster() {
    let engine = engine();
    let a = engine.submit(pothole(MONAS, 1.0)).await.unwrap();
    let cluster_id = a.cluster.unwrap().id;

    // 200m out with 20m accuracy: outside the 50m cluster, too light alone
    let d = pothole(offset(MONAS, 200.0, 0.0), 0.4);
    let d_id = d.id;
    assert_eq!(engine.submit(d).await.unwrap().decision, Decision::Defer);
    assert!(engine.is_pending(d_id));

    let b = submission(
        "jalan berlubang besar di jl mawar",
        Category::Infrastructure,
        offset(MONAS, 300.0, 0.0),
        260.0,
        1.0,
    );
    let outcome = engine.submit(b).await.unwrap();
    assert_eq!(outcome.decision, Decision::MergeInto(cluster_id));

    assert!(!engine.is_pending(d_id));
    assert_eq!(engine.cluster_of(d_id), Some(cluster_id));
    assert_eq!(engine.cluster(cluster_id).unwrap().member_count(), 3);
}

#[tokio::test]
async fn oversized_corroboration_still_places_the_report() {
    let engine = engine();
    // 48 oldest north, then 49 south, all from one account so none can
    // found a cluster on its own
    for i in 0..97 {
        let north_m = if i < 48 { 980.0 } else { -980.0 };
        let mut s = pothole(offset(MONAS, north_m, 0.0), 0.4);
        s.submitter_id = "warga-berulang".to_string();
        assert_eq!(engine.submit(s).await.unwrap().decision, Decision::Defer);
    }
    assert_eq!(engine.pending_len(), 97);

    let witness = pothole(MONAS, 0.6);
    let witness_id = witness.id;
    let outcome = engine.submit(witness).await.unwrap();

    assert_eq!(outcome.decision, Decision::CreateNew);
    let cluster_id = engine.cluster_of(witness_id).expect("witness is clustered");
    assert!(!engine.is_pending(witness_id));

    let cluster = engine.cluster(cluster_id).unwrap();
    assert!(cluster.member_count() <= 50);
    for m in &cluster.members {
        assert!(cluster.centroid.distance_m(&m.location) <= 1000.0);
    }
    for c in engine.clusters() {
        assert!(c.member_count() <= 50);
    }
}

// ---------------------------------------------------------------------------
// Moderation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closed_cluster_takes_no_new_members() {
    let engine = engine();
    let first = engine.submit(pothole(MONAS, 1.0)).await.unwrap().cluster.unwrap();

    let closed = engine.close_cluster(first.id).await.unwrap();
    assert_eq!(closed.status, ClusterStatus::Closed);

    let again = engine.submit(pothole(MONAS, 1.0)).await.unwrap();
    assert_eq!(again.decision, Decision::CreateNew);
    assert_ne!(again.cluster.unwrap().id, first.id);
    assert!(engine.rank(10).iter().all(|s| s.id != first.id));
}

#[tokio::test]
async fn moderator_merge_combines_clusters() {
    let engine = engine();
    let a = engine.submit(pothole(MONAS, 1.0)).await.unwrap().cluster.unwrap();
    let b = submission(
        "aspal amblas dekat halte",
        Category::Infrastructure,
        offset(MONAS, 200.0, 0.0),
        20.0,
        1.0,
    );
    let b = engine.submit(b).await.unwrap().cluster.unwrap();
    assert_ne!(a.id, b.id);

    let kept = engine.merge_clusters(a.id, b.id).await.unwrap();

    assert_eq!(kept.member_count(), 2);
    assert_eq!(engine.cluster(b.id).unwrap().status, ClusterStatus::Merged);
    let ranked = engine.rank(10);
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].id, a.id);
}

#[tokio::test]
async fn ranking_puts_severe_heavy_clusters_first() {
    let engine = engine();
    engine.submit(pothole(MONAS, 1.0)).await.unwrap();
    let hazard = submission(
        "kabel listrik putus menjuntai ke jalan",
        Category::Safety,
        KOTA_TUA,
        10.0,
        4.0,
    );
    let hazard = engine.submit(hazard).await.unwrap().cluster.unwrap();

    let ranked = engine.rank(1);
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].id, hazard.id);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_form_exactly_one_cluster() {
    let engine = Arc::new(engine());

    let tasks = (0..20).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.submit(pothole(MONAS, 1.0)).await })
    });
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let created = outcomes
        .iter()
        .filter(|o| o.decision == Decision::CreateNew)
        .count();
    assert_eq!(created, 1);
    let clusters = engine.clusters();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].member_count(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distant_regions_cluster_independently_in_parallel() {
    let engine = Arc::new(engine());

    let tasks = (0..8).map(|i| {
        let engine = engine.clone();
        let point = offset(MONAS, 0.0, i as f64 * 5_000.0);
        tokio::spawn(async move { engine.submit(pothole(point, 1.0)).await })
    });
    for joined in join_all(tasks).await {
        assert_eq!(joined.unwrap().unwrap().decision, Decision::CreateNew);
    }
    assert_eq!(engine.clusters().len(), 8);
}
