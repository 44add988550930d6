//! Structured filtering of listings against the configured search criteria.
//!
//! Location tags are not matched here; they are forwarded to the relevance
//! classifier.

use crate::models::{BedroomFilter, GardenPreference, GardenStatus, Listing, SearchCriteria, UnknownGarden};

/// A filter a listing failed, used for logging rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Price,
    Surface,
    Bedrooms,
    Garden,
}

pub fn matches(listing: &Listing, criteria: &SearchCriteria) -> bool {
    rejection_reasons(listing, criteria).is_empty()
}

pub fn rejection_reasons(listing: &Listing, criteria: &SearchCriteria) -> Vec<Rejection> {
    let mut reasons = Vec::new();

    if !criteria.price.accepts(listing.price) {
        reasons.push(Rejection::Price);
    }
    if !criteria.surface.accepts(listing.surface) {
        reasons.push(Rejection::Surface);
    }
    if !bedrooms_match(listing.bedrooms, &criteria.bedrooms, criteria.bedrooms_required) {
        reasons.push(Rejection::Bedrooms);
    }
    if !garden_matches(listing.has_garden, criteria.garden, criteria.unknown_garden) {
        reasons.push(Rejection::Garden);
    }

    reasons
}

fn bedrooms_match(bedrooms: Option<u32>, filter: &BedroomFilter, required: bool) -> bool {
    match (filter, bedrooms) {
        (BedroomFilter::Any, _) => true,
        (BedroomFilter::Only(allowed), Some(count)) => allowed.contains(&count),
        (BedroomFilter::Only(_), None) => !required,
    }
}

fn garden_matches(garden: GardenStatus, preference: GardenPreference, unknown: UnknownGarden) -> bool {
    match preference {
        GardenPreference::Either => true,
        GardenPreference::Require => garden == GardenStatus::Yes,
        GardenPreference::Forbid => match garden {
            GardenStatus::No => true,
            GardenStatus::Yes => false,
            GardenStatus::Unknown => unknown == UnknownGarden::Lenient,
        },
    }
}
