//! Minimal Scrapfly REST client: one rendered page per call.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::ScraperConfig;
use crate::utils::error::{AppError, Result};

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    result: ScrapeResultBody,
}

#[derive(Debug, Deserialize)]
struct ScrapeResultBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    content: String,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    error: Option<ScrapeError>,
}

#[derive(Debug, Deserialize)]
struct ScrapeError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ScrapeResultBody {
    fn failure_message(&self) -> String {
        match &self.error {
            Some(ScrapeError {
                code: Some(code),
                message: Some(message),
            }) => format!("{}: {}", code, message),
            Some(ScrapeError {
                message: Some(message), ..
            }) => message.clone(),
            _ => format!(
                "upstream responded with status {}",
                self.status_code.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into())
            ),
        }
    }
}

#[derive(Clone)]
pub struct ScrapflyClient {
    client: Client,
    api_url: String,
    api_key: String,
    asp: bool,
    render_js: bool,
}

impl ScrapflyClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Missing Scrapfly API key".into())))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            asp: config.asp,
            render_js: config.render_js,
        })
    }

    /// Fetch the rendered HTML of `url`. `auto_scroll` makes lazily loaded result cards appear.
    pub async fn scrape(&self, url: &str, auto_scroll: bool) -> Result<String> {
        let mut query = vec![
            ("key", self.api_key.as_str()),
            ("url", url),
            ("asp", bool_param(self.asp)),
            ("render_js", bool_param(self.render_js)),
        ];
        if auto_scroll && self.render_js {
            query.push(("auto_scroll", "true"));
        }

        debug!(url, "Scraping page through Scrapfly");

        let resp = self
            .client
            .get(format!("{}/scrape", self.api_url))
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Api {
                service: "Scrapfly",
                status: status.as_u16(),
                message: body,
            });
        }

        let body: ScrapeResponse = resp.json().await?;
        if !body.result.success {
            return Err(AppError::Scraping {
                url: url.to_string(),
                message: body.result.failure_message(),
            });
        }

        debug!(url, bytes = body.result.content.len(), "Scraped page");
        Ok(body.result.content)
    }
}

fn bool_param(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
