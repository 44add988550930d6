use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Listing;

/// How far a listing has progressed through the pipeline.
///
/// Statuses only move forward:
///
/// ```text
/// seen_only       -> matched_filters | rejected_by_filters
/// matched_filters -> judged_relevant | judged_irrelevant
/// judged_relevant -> notified
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    SeenOnly,
    MatchedFilters,
    RejectedByFilters,
    JudgedRelevant,
    JudgedIrrelevant,
    Notified,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 6] = [
        ProcessingStatus::SeenOnly,
        ProcessingStatus::MatchedFilters,
        ProcessingStatus::RejectedByFilters,
        ProcessingStatus::JudgedRelevant,
        ProcessingStatus::JudgedIrrelevant,
        ProcessingStatus::Notified,
    ];

    pub fn can_advance_to(self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        matches!(
            (self, next),
            (SeenOnly, MatchedFilters)
                | (SeenOnly, RejectedByFilters)
                | (MatchedFilters, JudgedRelevant)
                | (MatchedFilters, JudgedIrrelevant)
                | (JudgedRelevant, Notified)
        )
    }

    /// Terminal statuses are never handed to the classifier or the notifier again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingStatus::RejectedByFilters
                | ProcessingStatus::JudgedIrrelevant
                | ProcessingStatus::Notified
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::SeenOnly => "seen_only",
            ProcessingStatus::MatchedFilters => "matched_filters",
            ProcessingStatus::RejectedByFilters => "rejected_by_filters",
            ProcessingStatus::JudgedRelevant => "judged_relevant",
            ProcessingStatus::JudgedIrrelevant => "judged_irrelevant",
            ProcessingStatus::Notified => "notified",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of a relevance judgment, kept with the record for the notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Judgment {
    pub relevant: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl Judgment {
    pub fn irrelevant() -> Self {
        Self {
            relevant: false,
            title: None,
            summary: None,
        }
    }
}

/// Persisted outcome for one listing id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingRecord {
    pub status: ProcessingStatus,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub details: Option<Listing>,
    #[serde(default)]
    pub judgment: Option<Judgment>,

    // Recoverable failures; never change the status
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub failed_attempts: u32,
}

impl ProcessingRecord {
    pub fn seen(at: DateTime<Utc>) -> Self {
        Self {
            status: ProcessingStatus::SeenOnly,
            first_seen_at: at,
            updated_at: at,
            details: None,
            judgment: None,
            last_error: None,
            failed_attempts: 0,
        }
    }
}
