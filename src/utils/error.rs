use std::path::PathBuf;

use thiserror::Error;

use crate::models::{ListingId, ProcessingStatus};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("{service} API error ({status}): {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("Scraping error for {url}: {message}")]
    Scraping { url: String, message: String },

    #[error("Index fetch failed: {0}")]
    IndexFetch(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Notifier error: {0}")]
    Notifier(String),

    #[error("State file {} is unreadable or corrupt: {source}", path.display())]
    StoreCorrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid status transition for listing {id}: {from} -> {to}")]
    InvalidTransition {
        id: ListingId,
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    #[error("Unknown listing: {id}")]
    UnknownListing { id: ListingId },
}

impl AppError {
    pub fn parse(message: impl Into<String>) -> Self {
        AppError::Parse {
            message: message.into(),
        }
    }

    /// Errors that must abort a run instead of being recorded against a single listing.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Config(_)
                | AppError::Io(_)
                | AppError::IndexFetch(_)
                | AppError::StoreCorrupted { .. }
                | AppError::InvalidTransition { .. }
                | AppError::UnknownListing { .. }
        )
    }

    /// Rate limiting, server-side failures and network hiccups; worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Http(e) => e.is_timeout() || e.is_connect(),
            AppError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
