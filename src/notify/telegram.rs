//! Telegram Bot API notifier
//!
//! Sends plain-text alerts with `sendMessage`. Alerts for the same symbol,
//! kind, timeframe and zone are rate limited so a flapping setup cannot flood
//! the chat. Free text sent with `send_text` is keyed by its leading text.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Notifier;
use crate::trading_core::AlertPayload;

/// Default Bot API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Leading characters of a message that identify it for rate limiting
const RATE_LIMIT_PREFIX_CHARS: usize = 50;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
    rate_limit: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl TelegramNotifier {
    /// Create a notifier with a 10 second HTTP timeout
    pub fn new(token: String, chat_id: String, rate_limit_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
            chat_id,
            rate_limit: Duration::from_secs(rate_limit_secs),
            last_sent: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn rate_limit_key(message: &str) -> String {
        message.chars().take(RATE_LIMIT_PREFIX_CHARS).collect()
    }

    /// Alerts on different zones never share a key, however alike their text
    fn payload_key(payload: &AlertPayload) -> String {
        format!(
            "{}|{}|{}|{}|{:.5}-{:.5}",
            payload.symbol,
            payload.kind.code(),
            payload.anchor_timeframe,
            payload.direction,
            payload.zone_bottom,
            payload.zone_top
        )
    }

    /// Record a send attempt for `key` unless one happened within the rate limit window
    async fn try_acquire(&self, key: &str, now: Instant) -> bool {
        let mut last_sent = self.last_sent.lock().await;
        if let Some(prev) = last_sent.get(key) {
            if now.duration_since(*prev) < self.rate_limit {
                return false;
            }
        }
        last_sent.insert(key.to_string(), now);
        last_sent.retain(|_, t| now.duration_since(*t) < self.rate_limit.max(Duration::from_secs(1)) * 10);
        true
    }

    /// POST one message to the chat
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.post(text, &Self::rate_limit_key(text)).await
    }

    async fn post(&self, text: &str, key: &str) -> Result<()> {
        if !self.try_acquire(key, Instant::now()).await {
            return Err(anyhow!("Rate limited: {:?}", key));
        }

        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.base_url, self.token))
            .json(&request)
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Telegram sendMessage failed with status {}: {}", status, body));
        }

        let parsed: SendMessageResponse = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;
        if !parsed.ok {
            return Err(anyhow!(
                "Telegram rejected message: {}",
                parsed.description.unwrap_or_default()
            ));
        }

        debug!("Telegram message delivered ({} chars)", text.len());
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, payload: &AlertPayload) -> Result<()> {
        let message = payload.render_message();
        match self.post(&message, &Self::payload_key(payload)).await {
            Ok(()) => {
                info!("Telegram alert sent: {} {}", payload.symbol, payload.kind);
                Ok(())
            }
            Err(e) => {
                warn!("Telegram alert failed for {}: {}", payload.symbol, e);
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
