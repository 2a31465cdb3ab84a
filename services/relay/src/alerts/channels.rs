//! Outbound alert sinks.
//!
//! Each channel owns its HTTP client and a sliding-window rate limiter
//! (default 10/min). A send is one of three outcomes: delivered, dropped
//! by the limiter (silently, no queueing), or failed — only failures are
//! errors, and they stay inside the dispatching channel.

use crate::rate_limiter::RateLimiter;
use relay_protocol::AlertMessage;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("{channel} returned HTTP {status}")]
    Status { channel: &'static str, status: u16 },
    #[error("{channel} request failed: {detail}")]
    Request {
        channel: &'static str,
        detail: String,
    },
}

/// What happened to one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    RateLimited,
    Disabled,
}

// ---------------------------------------------------------------------------
// Channel variants
// ---------------------------------------------------------------------------

pub struct TelegramChannel {
    pub bot_token: String,
    pub chat_id: String,
}

pub struct DiscordChannel {
    pub webhook_url: String,
}

pub struct WebhookChannel {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
}

/// A configured alert sink. Variants share the outcome contract; the
/// wire payload is channel-specific.
pub struct AlertChannel {
    kind: ChannelKind,
    enabled: bool,
    http: reqwest::Client,
    limiter: Mutex<RateLimiter>,
}

enum ChannelKind {
    Telegram(TelegramChannel),
    Discord(DiscordChannel),
    Webhook(WebhookChannel),
}

impl AlertChannel {
    pub fn telegram(bot_token: String, chat_id: String) -> Self {
        Self::build(ChannelKind::Telegram(TelegramChannel { bot_token, chat_id }))
    }

    pub fn discord(webhook_url: String) -> Self {
        Self::build(ChannelKind::Discord(DiscordChannel { webhook_url }))
    }

    pub fn webhook(url: String, method: String, headers: Vec<(String, String)>) -> Self {
        Self::build(ChannelKind::Webhook(WebhookChannel {
            url,
            method,
            headers,
        }))
    }

    fn build(kind: ChannelKind) -> Self {
        AlertChannel {
            kind,
            enabled: true,
            http: reqwest::Client::new(),
            limiter: Mutex::new(RateLimiter::default()),
        }
    }

    /// Override the default 10/min quota.
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Mutex::new(limiter);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            ChannelKind::Telegram(_) => "telegram",
            ChannelKind::Discord(_) => "discord",
            ChannelKind::Webhook(_) => "webhook",
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Deliver one alert. Disabled channels and quota-exhausted sends
    /// report their outcome without touching the network.
    pub async fn send(&self, message: &AlertMessage) -> Result<SendOutcome, AlertError> {
        if !self.enabled {
            return Ok(SendOutcome::Disabled);
        }
        {
            let mut limiter = self.limiter.lock().expect("limiter lock");
            if !limiter.allow() {
                debug!(channel = self.name(), "alert dropped by rate limit");
                return Ok(SendOutcome::RateLimited);
            }
            limiter.record();
        }

        match &self.kind {
            ChannelKind::Telegram(t) => self.send_telegram(t, message).await?,
            ChannelKind::Discord(d) => self.send_discord(d, message).await?,
            ChannelKind::Webhook(w) => self.send_webhook(w, message).await?,
        }
        Ok(SendOutcome::Sent)
    }

    async fn send_telegram(
        &self,
        channel: &TelegramChannel,
        message: &AlertMessage,
    ) -> Result<(), AlertError> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            channel.bot_token
        );
        let text = format!(
            "<b>[{}]</b> @{}\n{}",
            message.event_type,
            html_escape(&message.username),
            html_escape(&message.text)
        );
        let body = serde_json::json!({
            "chat_id": channel.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        self.post_json(&url, &body).await
    }

    async fn send_discord(
        &self,
        channel: &DiscordChannel,
        message: &AlertMessage,
    ) -> Result<(), AlertError> {
        let body = serde_json::json!({
            "content": format!(
                "**[{}]** @{}: {}",
                message.event_type, message.username, message.text
            ),
        });
        self.post_json(&channel.webhook_url, &body).await
    }

    async fn send_webhook(
        &self,
        channel: &WebhookChannel,
        message: &AlertMessage,
    ) -> Result<(), AlertError> {
        let method = reqwest::Method::from_bytes(channel.method.as_bytes()).map_err(|_| {
            AlertError::Request {
                channel: self.name(),
                detail: format!("invalid HTTP method '{}'", channel.method),
            }
        })?;
        let mut request = self.http.request(method, &channel.url).json(message);
        for (name, value) in &channel.headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| AlertError::Request {
            channel: self.name(),
            detail: e.to_string(),
        })?;
        self.check_status(response.status())
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(), AlertError> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AlertError::Request {
                channel: self.name(),
                detail: e.to_string(),
            })?;
        self.check_status(response.status())
    }

    fn check_status(&self, status: reqwest::StatusCode) -> Result<(), AlertError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(AlertError::Status {
                channel: self.name(),
                status: status.as_u16(),
            })
        }
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::EventType;
    use std::time::Duration;

    fn message() -> AlertMessage {
        AlertMessage {
            event_type: EventType::PostCreated,
            username: "alice".to_owned(),
            text: "hello".to_owned(),
            timestamp: "2026-07-01T10:00:00Z".to_owned(),
        }
    }

    #[tokio::test]
    async fn disabled_channel_never_sends() {
        let channel =
            AlertChannel::discord("http://127.0.0.1:1/hook".to_owned()).with_enabled(false);
        let outcome = channel.send(&message()).await.expect("send");
        assert_eq!(outcome, SendOutcome::Disabled);
    }

    #[tokio::test]
    async fn exhausted_quota_drops_without_network_io() {
        // Quota of zero: even the first send is dropped before any HTTP.
        let channel = AlertChannel::discord("http://127.0.0.1:1/hook".to_owned())
            .with_rate_limiter(RateLimiter::new(0, Duration::from_secs(60)));
        let outcome = channel.send(&message()).await.expect("send");
        assert_eq!(outcome, SendOutcome::RateLimited);
    }

    #[test]
    fn telegram_html_is_escaped() {
        assert_eq!(html_escape("a<b>&c"), "a&lt;b&gt;&amp;c");
    }
}
