use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::RejectReason;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Great-circle distance to another point in meters.
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        haversine_m(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Haversine great-circle distance between two lat/lng points in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    haversine_km(lat1, lng1, lat2, lng2) * 1000.0
}

/// Axis-aligned lat/lng box. Submissions outside the national box are
/// rejected before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Indonesia, Sabang to Merauke and Rote to Miangas.
    pub const INDONESIA: BoundingBox = BoundingBox {
        min_lat: -11.0,
        max_lat: 6.5,
        min_lng: 94.0,
        max_lng: 141.5,
    };

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lng >= self.min_lng
            && point.lng <= self.max_lng
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::INDONESIA
    }
}

// --- Enums ---

/// Canonical issue categories. Clusters never span categories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Infrastructure,
    Cleanliness,
    Lighting,
    WaterDrainage,
    Environment,
    Safety,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Infrastructure => write!(f, "infrastructure"),
            Category::Cleanliness => write!(f, "cleanliness"),
            Category::Lighting => write!(f, "lighting"),
            Category::WaterDrainage => write!(f, "water_drainage"),
            Category::Environment => write!(f, "environment"),
            Category::Safety => write!(f, "safety"),
        }
    }
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Infrastructure,
        Category::Cleanliness,
        Category::Lighting,
        Category::WaterDrainage,
        Category::Environment,
        Category::Safety,
    ];

    /// Parse a category label from intake, accepting common English and
    /// Indonesian aliases. Returns `None` for anything outside the six
    /// canonical categories (health, education, governance included).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' ', '/'], "_");
        match normalized.as_str() {
            "infrastructure" | "infrastruktur" | "jalan" | "road" | "roads" => {
                Some(Category::Infrastructure)
            }
            "cleanliness" | "kebersihan" | "sampah" | "trash" | "garbage" => {
                Some(Category::Cleanliness)
            }
            "lighting" | "penerangan" | "lampu" | "streetlight" => Some(Category::Lighting),
            "water_drainage" | "water" | "drainage" | "drainase" | "air" | "banjir"
            | "flood" => Some(Category::WaterDrainage),
            "environment" | "lingkungan" => Some(Category::Environment),
            "safety" | "keamanan" | "security" => Some(Category::Safety),
            _ => None,
        }
    }

    /// Relative urgency used by cluster priority. Never used for assignment.
    pub fn severity_factor(&self) -> f64 {
        match self {
            Category::Safety => 1.5,
            Category::WaterDrainage => 1.3,
            Category::Infrastructure => 1.2,
            Category::Lighting => 1.0,
            Category::Environment => 1.0,
            Category::Cleanliness => 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// A reference to uploaded evidence. The engine never reads the file; it only
/// sees what the storage collaborator extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaEvidence {
    pub reference: String,
    pub kind: MediaKind,
    /// GPS position embedded in the file metadata, when present.
    #[serde(default)]
    pub embedded_location: Option<GeoPoint>,
}

/// Administrative address as geocoded by the localization collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AddressParts {
    pub street: Option<String>,
    /// Kelurahan / desa
    pub village: Option<String>,
    /// Kecamatan
    pub district: Option<String>,
    /// Kabupaten / kota
    pub city: Option<String>,
    pub province: Option<String>,
}

impl AddressParts {
    /// Fraction of the four administrative levels (village, district, city,
    /// province) that are populated.
    pub fn completeness(&self) -> f32 {
        let filled = [&self.village, &self.district, &self.city, &self.province]
            .iter()
            .filter(|part| part.as_deref().is_some_and(|s| !s.trim().is_empty()))
            .count();
        filled as f32 / 4.0
    }
}

/// Owned by downstream moderation. The engine carries it but never changes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    #[default]
    Unreviewed,
    Approved,
    Hidden,
}

// --- Submission ---

/// One normalized report handed over by the intake collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TypedBuilder)]
pub struct Submission {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    #[builder(setter(into))]
    pub content: String,
    pub category: Category,
    pub location: GeoPoint,
    /// GPS accuracy radius reported by the device, in meters.
    pub gps_accuracy_m: f64,
    #[serde(default)]
    #[builder(default)]
    pub address: AddressParts,
    #[serde(default)]
    #[builder(default)]
    pub media: Vec<MediaEvidence>,
    #[builder(setter(into))]
    pub submitter_id: String,
    /// Submitter trust weight at submission time. Anonymous intake may attach
    /// a discounted weight below the registered-submitter floor.
    #[builder(default = 1.0)]
    pub trust_weight: f64,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    #[builder(default)]
    pub status: ModerationStatus,
}

/// Upper bound for an attached trust weight.
pub const MAX_SUBMISSION_WEIGHT: f64 = 5.0;

impl Submission {
    /// Reject records that must never reach scoring or clustering.
    pub fn validate(&self, bounds: &BoundingBox, reject_accuracy_m: f64) -> Result<(), RejectReason> {
        if !self.location.is_finite()
            || self.location.lat.abs() > 90.0
            || self.location.lng.abs() > 180.0
        {
            return Err(RejectReason::InvalidCoordinates);
        }
        if !bounds.contains(&self.location) {
            return Err(RejectReason::OutOfBounds {
                lat: self.location.lat,
                lng: self.location.lng,
            });
        }
        if !self.gps_accuracy_m.is_finite() || self.gps_accuracy_m < 0.0 {
            return Err(RejectReason::InvalidCoordinates);
        }
        if self.gps_accuracy_m >= reject_accuracy_m {
            return Err(RejectReason::GpsAccuracyTooLow {
                accuracy_m: self.gps_accuracy_m,
            });
        }
        if !self.trust_weight.is_finite()
            || self.trust_weight <= 0.0
            || self.trust_weight > MAX_SUBMISSION_WEIGHT
        {
            return Err(RejectReason::InvalidTrustWeight(self.trust_weight));
        }
        Ok(())
    }
}
