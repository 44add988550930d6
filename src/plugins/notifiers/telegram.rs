use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info, warn};

use crate::config::NotifierConfig;
use crate::plugins::traits::{Notification, Notifier};
use crate::utils::error::{AppError, Result};

/// Telegram limits, in characters.
pub const MAX_CAPTION_LENGTH: usize = 1024;
pub const MAX_MESSAGE_LENGTH: usize = 4096;

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    client: Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
    retry_attempts: usize,
    retry_delay: Duration,
}

impl TelegramNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        let missing = |what: &str| AppError::Config(config::ConfigError::Message(format!("Missing Telegram {}", what)));
        let bot_token = config.bot_token.clone().ok_or_else(|| missing("bot token"))?;
        let chat_id = config.chat_id.clone().ok_or_else(|| missing("chat id"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot_token, method)
    }

    /// Runs `call` until it succeeds, fails permanently or attempts run out.
    async fn with_retry<F, Fut>(&self, what: &str, mut call: F) -> Result<TelegramResponse>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<TelegramResponse>>,
    {
        let strategy = FixedInterval::new(self.retry_delay).take(self.retry_attempts - 1);
        let mut attempt = 0;
        RetryIf::spawn(
            strategy,
            || {
                attempt += 1;
                debug!(what, attempt, "Calling Telegram");
                call()
            },
            |e: &AppError| {
                let retry = e.is_transient();
                if retry {
                    warn!(what, error = %e, "Telegram call failed, retrying");
                }
                retry
            },
        )
        .await
    }

    async fn send_photo(&self, photo: &Path, caption: &str) -> Result<TelegramResponse> {
        let bytes = tokio::fs::read(photo).await?;
        let file_name = photo
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo.jpg".to_string());
        let caption = truncate(caption, MAX_CAPTION_LENGTH);

        self.with_retry("sendPhoto", || {
            let form = Form::new()
                .text("chat_id", self.chat_id.clone())
                .text("caption", caption.clone())
                .part("photo", Part::bytes(bytes.clone()).file_name(file_name.clone()));
            let request = self.client.post(self.method_url("sendPhoto")).multipart(form);
            async move { read_response(request.send().await?).await }
        })
        .await
    }

    async fn send_message(&self, text: &str, parse_mode: Option<&str>) -> Result<TelegramResponse> {
        let mut payload = json!({
            "chat_id": self.chat_id,
            "text": truncate(text, MAX_MESSAGE_LENGTH),
            "disable_web_page_preview": false,
        });
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = json!(mode);
        }

        self.with_retry("sendMessage", || {
            let request = self.client.post(self.method_url("sendMessage")).json(&payload);
            async move { read_response(request.send().await?).await }
        })
        .await
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, notification: &Notification) -> Result<bool> {
        if let Some(photo) = notification.images.first() {
            match self.send_photo(photo, &notification.caption()).await {
                Ok(_) => debug!(listing_id = %notification.listing_id, "Photo sent"),
                Err(e) => warn!(listing_id = %notification.listing_id, error = %e, "Could not send photo"),
            }
        }

        let text = notification.message_text();
        let response = match self.send_message(&text, Some("Markdown")).await {
            // Free-form summaries do not always survive Markdown parsing
            Err(AppError::Api { status: 400, message, .. }) if message.contains("can't parse entities") => {
                warn!(listing_id = %notification.listing_id, "Markdown rejected, resending as plain text");
                self.send_message(&text, None).await?
            }
            other => other?,
        };

        if response.ok {
            info!(listing_id = %notification.listing_id, "Telegram notification sent");
        }
        Ok(response.ok)
    }
}

async fn read_response(resp: reqwest::Response) -> Result<TelegramResponse> {
    let status = resp.status();
    let body = resp.text().await?;
    let parsed = serde_json::from_str::<TelegramResponse>(&body).ok();

    if !status.is_success() {
        let message = parsed.and_then(|r| r.description).unwrap_or(body);
        return Err(AppError::Api {
            service: "Telegram",
            status: status.as_u16(),
            message,
        });
    }

    let response = parsed.ok_or_else(|| AppError::Notifier(format!("Unexpected Telegram response: {}", body)))?;
    if !response.ok {
        return Err(AppError::Notifier(
            response.description.unwrap_or_else(|| "request rejected".to_string()),
        ));
    }
    Ok(response)
}

/// Truncates on a character boundary, marking the cut with an ellipsis.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}
