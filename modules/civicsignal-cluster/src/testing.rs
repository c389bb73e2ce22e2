// Test mocks for the clustering engine.
//
// Mocks matching the two collaborator boundaries:
// - FixedValidator / SlowValidator / FailingValidator (ContentValidator)
// - MockSubmitterDirectory (SubmitterDirectory), HashMap-based id→history
//
// Plus fixtures for building submissions around known Jakarta locations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use civicsignal_common::{Category, GeoPoint, Submission, SubmitterHistory};

use crate::traits::{ContentValidator, SubmitterDirectory};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Monas, central Jakarta.
pub const MONAS: GeoPoint = GeoPoint {
    lat: -6.1754,
    lng: 106.8272,
};
/// Kota Tua, north Jakarta.
pub const KOTA_TUA: GeoPoint = GeoPoint {
    lat: -6.1352,
    lng: 106.8133,
};
/// Bandung city center.
pub const BANDUNG: GeoPoint = GeoPoint {
    lat: -6.9175,
    lng: 107.6191,
};

/// Meters per degree of latitude on the haversine sphere.
const METERS_PER_DEGREE: f64 = 111_195.0;

/// Point `north_m` / `east_m` meters away from `origin`.
pub fn offset(origin: GeoPoint, north_m: f64, east_m: f64) -> GeoPoint {
    let lat = origin.lat + north_m / METERS_PER_DEGREE;
    let lng = origin.lng + east_m / (METERS_PER_DEGREE * origin.lat.to_radians().cos());
    GeoPoint::new(lat, lng)
}

// ---------------------------------------------------------------------------
// Submission fixtures
// ---------------------------------------------------------------------------

/// A submission from a fresh submitter.
pub fn submission(content: &str, category: Category, location: GeoPoint, accuracy_m: f64, weight: f64) -> Submission {
    Submission::builder()
        .content(content)
        .category(category)
        .location(location)
        .gps_accuracy_m(accuracy_m)
        .submitter_id(format!("warga-{}", Uuid::new_v4()))
        .trust_weight(weight)
        .build()
}

/// Pothole report at `location` with 20m accuracy.
pub fn pothole(location: GeoPoint, weight: f64) -> Submission {
    submission(
        "jalan berlubang di Jl. Mawar",
        Category::Infrastructure,
        location,
        20.0,
        weight,
    )
}

// ---------------------------------------------------------------------------
// ContentValidator mocks
// ---------------------------------------------------------------------------

/// Always answers with the same sub-score.
pub struct FixedValidator {
    score: f32,
    calls: AtomicUsize,
}

impl FixedValidator {
    pub fn new(score: f32) -> Self {
        Self {
            score,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentValidator for FixedValidator {
    async fn classify(&self, _content: &str) -> Result<f32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.score)
    }
}

/// Answers only after `delay`. Pair with a short timeout config.
pub struct SlowValidator {
    score: f32,
    delay: Duration,
}

impl SlowValidator {
    pub fn new(score: f32, delay: Duration) -> Self {
        Self { score, delay }
    }
}

#[async_trait]
impl ContentValidator for SlowValidator {
    async fn classify(&self, _content: &str) -> Result<f32> {
        tokio::time::sleep(self.delay).await;
        Ok(self.score)
    }
}

pub struct FailingValidator;

#[async_trait]
impl ContentValidator for FailingValidator {
    async fn classify(&self, _content: &str) -> Result<f32> {
        bail!("classifier unavailable")
    }
}

// ---------------------------------------------------------------------------
// MockSubmitterDirectory
// ---------------------------------------------------------------------------

/// HashMap-based verification history. Returns `Err` for unregistered ids,
/// and sleeps `delay` first when set.
/// Builder pattern: `.with_history()`, `.with_delay()`.
#[derive(Default)]
pub struct MockSubmitterDirectory {
    histories: HashMap<String, SubmitterHistory>,
    delay: Option<Duration>,
}

impl MockSubmitterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, history: SubmitterHistory) -> Self {
        self.histories.insert(history.submitter_id.clone(), history);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl SubmitterDirectory for MockSubmitterDirectory {
    async fn history(&self, submitter_id: &str) -> Result<SubmitterHistory> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.histories.get(submitter_id) {
            Some(history) => Ok(history.clone()),
            None => bail!("no verification record for {submitter_id}"),
        }
    }
}
