use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{GardenStatus, ListingId};

/// A listing as it appears in the search index: enough to fetch its detail page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingRef {
    pub id: ListingId,
    pub url: String,
}

impl ListingRef {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: ListingId::new(id),
            url: url.into(),
        }
    }
}

/// Core listing data model, normalized from the scraped detail page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub id: ListingId,
    pub url: String,

    // Structured attributes
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub surface: Option<Decimal>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub has_garden: GardenStatus,

    // Free text, only read by the relevance classifier
    #[serde(default)]
    pub location_tags: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub additional_info: Option<String>,

    /// Remote image locations, in page order.
    #[serde(default)]
    pub image_refs: Vec<String>,

    pub fetched_at: DateTime<Utc>,
}

impl Listing {
    pub fn new(listing_ref: &ListingRef) -> Self {
        Self {
            id: listing_ref.id.clone(),
            url: listing_ref.url.clone(),
            price: None,
            surface: None,
            bedrooms: None,
            has_garden: GardenStatus::Unknown,
            location_tags: BTreeSet::new(),
            description: String::new(),
            additional_info: None,
            image_refs: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn location_label(&self) -> String {
        self.location_tags
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
