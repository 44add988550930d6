use async_trait::async_trait;

use crate::models::{Listing, ListingRef, SearchParams};
use crate::utils::error::Result;

/// Where listings come from: a search index and per-listing detail pages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Every listing currently matching the coarse search parameters.
    ///
    /// An empty result is `Ok(vec![])`; transport or authentication problems
    /// are errors.
    async fn fetch_index(&self, params: &SearchParams) -> Result<Vec<ListingRef>>;

    /// Full, normalized detail of one listing.
    async fn fetch_detail(&self, listing: &ListingRef) -> Result<Listing>;
}
