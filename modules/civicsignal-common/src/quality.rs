use serde::{Deserialize, Serialize};

/// Sub-score caps. Their sum is the 12-point ceiling.
pub const TEXT_SCORE_MAX: f32 = 3.0;
pub const MEDIA_SCORE_MAX: f32 = 4.0;
pub const LOCATION_SCORE_MAX: f32 = 2.0;
pub const CORROBORATION_SCORE_MAX: f32 = 3.0;
pub const QUALITY_SCORE_MAX: f32 = 12.0;

/// Grade thresholds over the total.
pub const GRADE_LOW_MIN: f32 = 4.0;
pub const GRADE_MEDIUM_MIN: f32 = 7.0;
pub const GRADE_HIGH_MIN: f32 = 10.0;

/// GPS accuracy tiers in meters. At or beyond the reject tier the location
/// sub-score is zero and the submission never reaches clustering.
pub const GPS_EXCELLENT_M: f64 = 10.0;
pub const GPS_GOOD_M: f64 = 50.0;
pub const GPS_POOR_M: f64 = 200.0;
pub const GPS_REJECT_M: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    /// Below the LOW threshold
    Insufficient,
    Low,
    Medium,
    High,
}

impl QualityGrade {
    pub fn from_total(total: f32) -> Self {
        if total >= GRADE_HIGH_MIN {
            QualityGrade::High
        } else if total >= GRADE_MEDIUM_MIN {
            QualityGrade::Medium
        } else if total >= GRADE_LOW_MIN {
            QualityGrade::Low
        } else {
            QualityGrade::Insufficient
        }
    }
}

/// Evidence signals observed while scoring, kept for moderators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub has_location_reference: bool,
    pub has_time_reference: bool,
    /// At least one media item carries embedded GPS near the reported point.
    pub media_gps_consistent: bool,
    /// The content-validation collaborator answered in time.
    pub validation_available: bool,
    /// GPS accuracy at/over the reject tier; flagged for downstream rejection.
    pub rejected_location: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScoreBreakdown {
    pub text: f32,
    pub media: f32,
    pub location: f32,
    pub corroboration: f32,
    pub total: f32,
    pub grade: QualityGrade,
    pub flags: QualityFlags,
}

impl QualityScoreBreakdown {
    /// Clamp each sub-score to its cap and derive total and grade.
    pub fn new(text: f32, media: f32, location: f32, corroboration: f32, flags: QualityFlags) -> Self {
        let text = clamp_score(text, TEXT_SCORE_MAX);
        let media = clamp_score(media, MEDIA_SCORE_MAX);
        let location = clamp_score(location, LOCATION_SCORE_MAX);
        let corroboration = clamp_score(corroboration, CORROBORATION_SCORE_MAX);
        let total = (text + media + location + corroboration).clamp(0.0, QUALITY_SCORE_MAX);
        Self {
            text,
            media,
            location,
            corroboration,
            total,
            grade: QualityGrade::from_total(total),
            flags,
        }
    }
}

fn clamp_score(value: f32, max: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, max)
}
