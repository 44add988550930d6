use async_trait::async_trait;

use crate::models::{InterestStatement, Judgment, Listing};
use crate::utils::error::Result;

/// Judges whether a listing's free text matches the operator's interests.
///
/// Implementations are best-effort: the same input may not always produce
/// the same judgment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelevanceClassifier: Send + Sync {
    async fn judge(&self, listing: &Listing, criteria: &[InterestStatement]) -> Result<Judgment>;
}
