use tracing::{debug, warn};

use civicsignal_common::{SubmitterHistory, TrustWeight, TRUST_FLOOR};

const PHONE_BONUS: f64 = 0.5;
const ID_DOCUMENT_BONUS: f64 = 1.5;
const SELFIE_MATCH_BONUS: f64 = 0.5;
const SOCIAL_LINK_BONUS: f64 = 1.0;
const ENDORSEMENT_BONUS_EACH: f64 = 0.1;
const ENDORSEMENT_BONUS_MAX: f64 = 0.5;
const ACCURACY_BONUS_MAX: f64 = 0.5;
const HISTORY_BONUS_EACH: f64 = 0.03;
const HISTORY_BONUS_MAX: f64 = 0.3;

/// Moderated reports needed before the accuracy ratio means anything.
const MIN_REVIEWED_FOR_ACCURACY: u32 = 5;

/// Recomputes a submitter's trust weight from verification state and track
/// record. Invoked on a schedule or on verification change, not per report.
#[derive(Debug, Clone, Default)]
pub struct TrustScorer;

impl TrustScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn recompute(&self, history: &SubmitterHistory) -> TrustWeight {
        let mut weight = TRUST_FLOOR;

        if history.phone_verified {
            weight += PHONE_BONUS;
        }
        if history.id_document_verified {
            weight += ID_DOCUMENT_BONUS;
        }
        if history.selfie_matched {
            if history.id_document_verified {
                weight += SELFIE_MATCH_BONUS;
            } else {
                warn!(
                    submitter_id = history.submitter_id.as_str(),
                    "Selfie match claimed without ID verification, ignoring bonus"
                );
            }
        }
        if history.social_links > 0 {
            weight += SOCIAL_LINK_BONUS;
        }

        weight += (history.endorsements as f64 * ENDORSEMENT_BONUS_EACH).min(ENDORSEMENT_BONUS_MAX);
        weight += accuracy_bonus(history);
        weight += (history.total_reports as f64 * HISTORY_BONUS_EACH).min(HISTORY_BONUS_MAX);

        let trust = TrustWeight::new(weight);
        debug!(
            submitter_id = history.submitter_id.as_str(),
            raw = weight,
            weight = trust.value(),
            level = ?trust.level(),
            "Trust weight recomputed"
        );
        trust
    }
}

fn accuracy_bonus(history: &SubmitterHistory) -> f64 {
    if history.reviewed_reports < MIN_REVIEWED_FOR_ACCURACY {
        return 0.0;
    }
    if history.confirmed_reports > history.reviewed_reports {
        warn!(
            submitter_id = history.submitter_id.as_str(),
            confirmed = history.confirmed_reports,
            reviewed = history.reviewed_reports,
            "More confirmed than reviewed reports, ignoring accuracy bonus"
        );
        return 0.0;
    }
    let ratio = history.confirmed_reports as f64 / history.reviewed_reports as f64;
    ACCURACY_BONUS_MAX * ratio
}
