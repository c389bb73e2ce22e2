// Collaborator boundaries.
//
// ContentValidator: external image/text consistency classifier.
// SubmitterDirectory: identity-verification collaborator (KTP OCR, selfie
// match, social links, endorsements, moderation track record).
//
// Both are called under a timeout by the engine and degrade to a fallback on
// failure, so implementations may simply return errors.

use anyhow::Result;
use async_trait::async_trait;

use civicsignal_common::SubmitterHistory;

#[async_trait]
pub trait ContentValidator: Send + Sync {
    /// Corroboration sub-score for the report content, 0.0 to 3.0.
    async fn classify(&self, content: &str) -> Result<f32>;
}

#[async_trait]
pub trait SubmitterDirectory: Send + Sync {
    async fn history(&self, submitter_id: &str) -> Result<SubmitterHistory>;
}
