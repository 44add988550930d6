use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{GardenPreference, Polarity, UnknownGarden};

/// Inclusive numeric range; a missing bound is unbounded on that side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RangeFilter {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    /// When set, a listing without a value is rejected instead of passed through.
    pub required: bool,
}

impl RangeFilter {
    pub fn new(min: Option<Decimal>, max: Option<Decimal>) -> Self {
        Self {
            min,
            max,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn contains(&self, value: Decimal) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }

    pub fn accepts(&self, value: Option<Decimal>) -> bool {
        match value {
            Some(value) => self.contains(value),
            None => !self.required,
        }
    }
}

/// Allowed bedroom counts. Configured as `"any"`, `"2,3"` or `[2, 3]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "BedroomsSetting", into = "BedroomsSetting")]
pub enum BedroomFilter {
    #[default]
    Any,
    Only(BTreeSet<u32>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BedroomsSetting {
    Counts(Vec<u32>),
    Text(String),
}

impl TryFrom<BedroomsSetting> for BedroomFilter {
    type Error = String;

    fn try_from(setting: BedroomsSetting) -> Result<Self, Self::Error> {
        match setting {
            BedroomsSetting::Counts(counts) if counts.is_empty() => Ok(BedroomFilter::Any),
            BedroomsSetting::Counts(counts) => Ok(BedroomFilter::Only(counts.into_iter().collect())),
            BedroomsSetting::Text(text) => text.parse(),
        }
    }
}

impl From<BedroomFilter> for BedroomsSetting {
    fn from(filter: BedroomFilter) -> Self {
        match filter {
            BedroomFilter::Any => BedroomsSetting::Text("any".to_string()),
            BedroomFilter::Only(counts) => BedroomsSetting::Counts(counts.into_iter().collect()),
        }
    }
}

impl FromStr for BedroomFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("any") {
            return Ok(BedroomFilter::Any);
        }
        s.split(',')
            .map(|part| {
                part.trim()
                    .parse::<u32>()
                    .map_err(|_| format!("invalid bedroom count '{}', expected \"any\" or a list of numbers", part.trim()))
            })
            .collect::<Result<BTreeSet<_>, _>>()
            .map(BedroomFilter::Only)
    }
}

impl BedroomFilter {
    /// Comma-separated counts as the search site expects them, `None` for any.
    pub fn to_query(&self) -> Option<String> {
        match self {
            BedroomFilter::Any => None,
            BedroomFilter::Only(counts) => Some(
                counts
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }
}

/// One human-readable interestingness statement handed verbatim to the classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterestStatement {
    pub statement: String,
    pub polarity: Polarity,
}

impl InterestStatement {
    const EXCLUDED_PREFIXES: [&'static str; 2] = ["PAS ", "!"];

    pub fn desired(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            polarity: Polarity::Desired,
        }
    }

    pub fn excluded(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            polarity: Polarity::Excluded,
        }
    }

    /// Parses a configured statement: a leading `PAS ` or `!` marks it as excluded.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        for prefix in Self::EXCLUDED_PREFIXES {
            if let Some(rest) = raw.strip_prefix(prefix) {
                return Self::excluded(rest.trim());
            }
        }
        Self::desired(raw)
    }

    pub fn is_desired(&self) -> bool {
        self.polarity == Polarity::Desired
    }
}

impl fmt::Display for InterestStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.polarity {
            Polarity::Desired => f.write_str(&self.statement),
            Polarity::Excluded => write!(f, "PAS {}", self.statement),
        }
    }
}

/// Operator-configured filter, loaded once per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchCriteria {
    pub price: RangeFilter,
    pub surface: RangeFilter,
    pub bedrooms: BedroomFilter,
    pub bedrooms_required: bool,
    pub garden: GardenPreference,
    pub unknown_garden: UnknownGarden,
    pub interesting: Vec<InterestStatement>,
}

/// Coarse server-side search parameters used to build the index query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchParams {
    pub insee_codes: Vec<String>,
    pub projects: String,
    pub types: String,
    pub natures: String,
    pub mandatory_commodities: Option<String>,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub surface_min: Option<Decimal>,
    pub surface_max: Option<Decimal>,
    pub bedrooms: BedroomFilter,
}
