//! Evidentiary quality scoring.
//!
//! Pure and deterministic: the only outside input is the optional
//! corroboration sub-score, which the engine fetches (with a timeout) before
//! calling in here.

use std::sync::LazyLock;

use regex::Regex;

use civicsignal_common::config::QualityConfig;
use civicsignal_common::{
    MediaKind, QualityFlags, QualityScoreBreakdown, Submission, GPS_EXCELLENT_M, GPS_GOOD_M,
    GPS_POOR_M,
};

/// Accepted content length window, in characters.
const MIN_CONTENT_CHARS: usize = 10;
const MAX_CONTENT_CHARS: usize = 5000;
/// Content at least this long earns the descriptive bonus.
const DESCRIPTIVE_CONTENT_CHARS: usize = 100;

const MAX_SCORED_IMAGES: usize = 2;

static LOCATION_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jl|jln|jalan|gang|gg|rt|rw|no|nomor|depan|dekat|samping|belakang|seberang|perempatan|pertigaan|simpang|kelurahan|kecamatan|desa|street|road|near|opposite|corner)\b",
    )
    .expect("valid regex")
});

static TIME_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(pagi|siang|sore|malam|kemarin|tadi|sejak|jam|pukul|senin|selasa|rabu|kamis|jumat|sabtu|minggu|today|yesterday|morning|night|since)\b|\b\d{1,2}[:.]\d{2}\b",
    )
    .expect("valid regex")
});

#[derive(Debug, Clone)]
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Score a submission. `corroboration` is the content-validation
    /// sub-score, `None` when the collaborator was unavailable.
    pub fn score(&self, submission: &Submission, corroboration: Option<f32>) -> QualityScoreBreakdown {
        let mut flags = QualityFlags::default();

        let text = self.text_score(&submission.content, &mut flags);
        let media = self.media_score(submission, &mut flags);
        let location = self.location_score(submission, &mut flags);

        flags.validation_available = corroboration.is_some();
        QualityScoreBreakdown::new(text, media, location, corroboration.unwrap_or(0.0), flags)
    }

    fn text_score(&self, content: &str, flags: &mut QualityFlags) -> f32 {
        let content = content.trim();
        let chars = content.chars().count();
        if chars < MIN_CONTENT_CHARS {
            return 0.0;
        }

        let mut score = 0.0;
        if chars <= MAX_CONTENT_CHARS {
            score += 1.0;
            if chars >= DESCRIPTIVE_CONTENT_CHARS {
                score += 0.5;
            }
        }
        flags.has_location_reference = LOCATION_REFERENCE_RE.is_match(content);
        if flags.has_location_reference {
            score += 1.0;
        }
        flags.has_time_reference = TIME_REFERENCE_RE.is_match(content);
        if flags.has_time_reference {
            score += 0.5;
        }
        score
    }

    fn media_score(&self, submission: &Submission, flags: &mut QualityFlags) -> f32 {
        let images = submission
            .media
            .iter()
            .filter(|m| m.kind == MediaKind::Image)
            .count();
        let has_video = submission.media.iter().any(|m| m.kind == MediaKind::Video);

        let mut score = images.min(MAX_SCORED_IMAGES) as f32;
        if has_video {
            score += 1.0;
        }

        flags.media_gps_consistent = submission.media.iter().any(|m| {
            m.embedded_location.is_some_and(|embedded| {
                embedded.is_finite()
                    && embedded.distance_m(&submission.location) <= self.config.media_gps_tolerance_m
            })
        });
        if flags.media_gps_consistent {
            score += 1.0;
        }
        score
    }

    fn location_score(&self, submission: &Submission, flags: &mut QualityFlags) -> f32 {
        let accuracy = submission.gps_accuracy_m;
        if !accuracy.is_finite() || accuracy >= self.config.gps_reject_m {
            flags.rejected_location = true;
            return 0.0;
        }

        let accuracy_score = if accuracy < GPS_EXCELLENT_M {
            1.5
        } else if accuracy < GPS_GOOD_M {
            1.0
        } else if accuracy < GPS_POOR_M {
            0.5
        } else {
            0.0
        };
        accuracy_score + submission.address.completeness() * 0.5
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}
