use std::path::PathBuf;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{Judgment, Listing, ListingId};
use crate::utils::error::Result;

/// Everything a notifier needs to announce one relevant listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub listing_id: ListingId,
    pub url: String,
    pub title: String,
    pub summary: Option<String>,
    pub location: String,
    pub price: Option<Decimal>,
    pub surface: Option<Decimal>,
    pub bedrooms: Option<u32>,
    /// Locally downloaded images, first one is used as the photo.
    pub images: Vec<PathBuf>,
}

impl Notification {
    pub fn new(listing: &Listing, judgment: Option<&Judgment>, images: Vec<PathBuf>) -> Self {
        let title = judgment
            .and_then(|j| j.title.clone())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Annonce {}", listing.id));

        Self {
            listing_id: listing.id.clone(),
            url: listing.url.clone(),
            title,
            summary: judgment.and_then(|j| j.summary.clone()),
            location: listing.location_label(),
            price: listing.price,
            surface: listing.surface,
            bedrooms: listing.bedrooms,
            images,
        }
    }

    pub fn caption(&self) -> String {
        format!("Title: {}", self.title)
    }

    pub fn message_text(&self) -> String {
        let mut message = format!("Title: {}\nURL: {}\n", self.title, self.url);

        let mut facts = Vec::new();
        if !self.location.is_empty() {
            facts.push(self.location.clone());
        }
        if let Some(price) = self.price {
            facts.push(format!("{} €", price.normalize()));
        }
        if let Some(surface) = self.surface {
            facts.push(format!("{} m²", surface.normalize()));
        }
        if let Some(bedrooms) = self.bedrooms {
            facts.push(format!("{} ch.", bedrooms));
        }
        if !facts.is_empty() {
            message.push_str(&facts.join(" · "));
            message.push('\n');
        }

        if let Some(summary) = self.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            message.push_str(&format!("Description:\n{}\n", summary));
        }
        message
    }
}

/// Trait for delivering notifications (Telegram, ...).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns `Ok(true)` once the channel has accepted the message.
    async fn send(&self, notification: &Notification) -> Result<bool>;
}
