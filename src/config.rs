use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use url::Url;

use crate::models::{
    BedroomFilter, GardenPreference, InterestStatement, RangeFilter, SearchCriteria, SearchParams, UnknownGarden,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub classifier: ClassifierConfig,
    pub notifier: NotifierConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub site_url: String,
    pub listings_per_page: usize,
    pub request_timeout: u64,
    pub asp: bool,
    pub render_js: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.scrapfly.io".to_string(),
            api_key: None,
            site_url: "https://www.seloger.com".to_string(),
            listings_per_page: 25,
            request_timeout: 150,
            asp: true,
            render_js: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout: u64,
    /// Ask for a bullet-point summary of relevant listings.
    pub summarize: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4-1106-preview".to_string(),
            request_timeout: 120,
            summarize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub api_url: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
    pub request_timeout: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
            bot_token: None,
            chat_id: None,
            retry_attempts: 5,
            retry_delay_ms: 5000,
            request_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_file: PathBuf,
    pub image_dir: PathBuf,
    pub image_index_file: PathBuf,
    /// Images downloaded per relevant listing; 0 disables downloads.
    pub max_images: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("processed_listings.json"),
            image_dir: PathBuf::from("img"),
            image_index_file: PathBuf::from("images.json"),
            max_images: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrent_listings: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_listings: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "seloger-watcher.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub insee_codes: Vec<String>,
    pub projects: String,
    pub types: String,
    pub natures: String,
    pub mandatory_commodities: Option<String>,

    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub price_required: bool,
    pub surface_min: Option<Decimal>,
    pub surface_max: Option<Decimal>,
    pub surface_required: bool,
    pub bedrooms: BedroomFilter,
    pub bedrooms_required: bool,
    pub garden: GardenPreference,
    pub unknown_garden: UnknownGarden,

    /// Statements for the relevance classifier; prefix with `PAS ` or `!` to exclude.
    pub interesting: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            insee_codes: Vec::new(),
            projects: "2".to_string(),
            types: "2,1".to_string(),
            natures: "1,2,4".to_string(),
            mandatory_commodities: None,
            price_min: None,
            price_max: None,
            price_required: false,
            surface_min: None,
            surface_max: None,
            surface_required: false,
            bedrooms: BedroomFilter::Any,
            bedrooms_required: false,
            garden: GardenPreference::Either,
            unknown_garden: UnknownGarden::Lenient,
            interesting: Vec::new(),
        }
    }
}

impl SearchConfig {
    pub fn criteria(&self) -> SearchCriteria {
        let mut price = RangeFilter::new(self.price_min, self.price_max);
        price.required = self.price_required;
        let mut surface = RangeFilter::new(self.surface_min, self.surface_max);
        surface.required = self.surface_required;

        SearchCriteria {
            price,
            surface,
            bedrooms: self.bedrooms.clone(),
            bedrooms_required: self.bedrooms_required,
            garden: self.garden,
            unknown_garden: self.unknown_garden,
            interesting: self
                .interesting
                .iter()
                .filter(|s| !s.trim().is_empty())
                .map(|s| InterestStatement::parse(s))
                .collect(),
        }
    }

    pub fn params(&self) -> SearchParams {
        SearchParams {
            insee_codes: self.insee_codes.clone(),
            projects: self.projects.clone(),
            types: self.types.clone(),
            natures: self.natures.clone(),
            mandatory_commodities: self.mandatory_commodities.clone(),
            price_min: self.price_min,
            price_max: self.price_max,
            surface_min: self.surface_min,
            surface_max: self.surface_max,
            bedrooms: self.bedrooms.clone(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, then `config/<RUN_MODE>`, `config/local`
    /// and `SELOGER__*` environment variables, in increasing priority.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // e.g. SELOGER_SEARCH__PRICE_MAX=250000
            .add_source(Environment::with_prefix("SELOGER").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;
        config.apply_env_secrets();
        config.validate()?;
        Ok(config)
    }

    /// Fill unset credentials from their conventional environment variables.
    fn apply_env_secrets(&mut self) {
        fill_from_env(&mut self.scraper.api_key, "SCRAPFLY_API_KEY");
        fill_from_env(&mut self.classifier.api_key, "OPENAI_API_KEY");
        fill_from_env(&mut self.notifier.bot_token, "TELEGRAM_BOT_TOKEN");
        fill_from_env(&mut self.notifier.chat_id, "TELEGRAM_CHAT_ID");
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("scraper.api_url", &self.scraper.api_url),
            ("scraper.site_url", &self.scraper.site_url),
            ("classifier.api_url", &self.classifier.api_url),
            ("notifier.api_url", &self.notifier.api_url),
        ] {
            if Url::parse(value).is_err() {
                return Err(ConfigError::Message(format!("Invalid URL in {}: {}", name, value)));
            }
        }

        if self.scraper.listings_per_page == 0 {
            return Err(ConfigError::Message("Scraper listings_per_page must be greater than 0".into()));
        }

        if self.classifier.model.trim().is_empty() {
            return Err(ConfigError::Message("Classifier model must not be empty".into()));
        }

        if self.pipeline.max_concurrent_listings == 0 {
            return Err(ConfigError::Message(
                "Pipeline max_concurrent_listings must be greater than 0".into(),
            ));
        }

        if self.search.insee_codes.iter().all(|code| code.trim().is_empty()) {
            return Err(ConfigError::Message("Search insee_codes must contain at least one code".into()));
        }

        check_bounds("price", self.search.price_min, self.search.price_max)?;
        check_bounds("surface", self.search.surface_min, self.search.surface_max)?;

        Ok(())
    }

    /// Credentials are only needed for a real run, not for `status` or `search-url`.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("scraper.api_key (or SCRAPFLY_API_KEY)", &self.scraper.api_key),
            ("classifier.api_key (or OPENAI_API_KEY)", &self.classifier.api_key),
            ("notifier.bot_token (or TELEGRAM_BOT_TOKEN)", &self.notifier.bot_token),
            ("notifier.chat_id (or TELEGRAM_CHAT_ID)", &self.notifier.chat_id),
        ] {
            if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                return Err(ConfigError::Message(format!("Missing required setting: {}", name)));
            }
        }
        Ok(())
    }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if slot.is_none() {
        *slot = env::var(var).ok().filter(|v| !v.is_empty());
    }
}

fn check_bounds(name: &str, min: Option<Decimal>, max: Option<Decimal>) -> Result<(), ConfigError> {
    match (min, max) {
        (Some(min), _) if min < Decimal::ZERO => Err(ConfigError::Message(format!(
            "Search {}_min must not be negative",
            name
        ))),
        (Some(min), Some(max)) if min > max => Err(ConfigError::Message(format!(
            "Search {}_min cannot exceed {}_max",
            name, name
        ))),
        _ => Ok(()),
    }
}
