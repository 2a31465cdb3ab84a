//! Process configuration.
//!
//! Environment variables are the sole config source.
//!
//! # Required
//! - `UPSTREAM_URL` — event source base URL (`http(s)://` or `ws(s)://`);
//!   the socket and the active-users endpoint are derived from it
//! - `UPSTREAM_TOKEN` — bearer token
//! - `LISTEN_PORT` — dashboard/status listener port
//!
//! # Optional
//! - `CHANNELS` (comma-separated, default `all`)
//! - `USER_FILTERS`, `KEYWORD_FILTERS`, `EVENT_TYPE_FILTERS`
//! - `TELEGRAM_BOT_TOKEN` + `TELEGRAM_CHAT_ID` (both or neither)
//! - `DISCORD_WEBHOOK_URL`
//! - `WEBHOOK_URL` + `WEBHOOK_METHOD` + `WEBHOOK_HEADERS`
//!   (headers as `Name: value` pairs separated by `;`)
//! - `DEBUG` — truthy gate for per-event chatty logs

use relay_protocol::{Channel, EventType, FilterConfig};

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub upstream_url: String,
    pub upstream_token: String,
    pub listen_port: u16,
    pub channels: Vec<Channel>,
    pub filters: FilterConfig,
    pub telegram: Option<TelegramConfig>,
    pub discord_webhook_url: Option<String>,
    pub webhook: Option<WebhookConfig>,
    pub debug: bool,
}

impl RelayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary lookup (tests inject maps here).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let upstream_url = required(&lookup, "UPSTREAM_URL")?;
        if !has_known_scheme(&upstream_url) {
            return Err(ConfigError::InvalidValue(format!(
                "UPSTREAM_URL must start with http(s):// or ws(s)://, got '{}'",
                upstream_url
            )));
        }
        let upstream_token = required(&lookup, "UPSTREAM_TOKEN")?;

        let listen_port = required(&lookup, "LISTEN_PORT")?;
        let listen_port: u16 = listen_port.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("LISTEN_PORT must be a port number, got '{}'", listen_port))
        })?;

        let channels = match lookup("CHANNELS") {
            None => vec![Channel::All],
            Some(raw) => parse_channels(&raw)?,
        };

        let filters = FilterConfig {
            users: split_list(lookup("USER_FILTERS").as_deref()),
            keywords: split_list(lookup("KEYWORD_FILTERS").as_deref()),
            event_types: parse_event_types(lookup("EVENT_TYPE_FILTERS").as_deref())?,
        };

        let telegram = match (lookup("TELEGRAM_BOT_TOKEN"), lookup("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidValue(
                    "TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set together".to_owned(),
                ))
            }
        };

        let webhook = match lookup("WEBHOOK_URL") {
            None => None,
            Some(url) => Some(WebhookConfig {
                url,
                method: lookup("WEBHOOK_METHOD").unwrap_or_else(|| "POST".to_owned()),
                headers: parse_headers(lookup("WEBHOOK_HEADERS").as_deref())?,
            }),
        };

        Ok(RelayConfig {
            upstream_url,
            upstream_token,
            listen_port,
            channels,
            filters,
            telegram,
            discord_webhook_url: lookup("DISCORD_WEBHOOK_URL"),
            webhook,
            debug: lookup("DEBUG").as_deref().is_some_and(is_truthy),
        })
    }

    /// The WebSocket form of the upstream URL.
    pub fn ws_url(&self) -> String {
        swap_scheme(&self.upstream_url, "http://", "ws://", "https://", "wss://")
    }

    /// The HTTP form of the upstream URL (active-users endpoint base).
    pub fn http_url(&self) -> String {
        swap_scheme(&self.upstream_url, "ws://", "http://", "wss://", "https://")
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    MissingVar(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVar(s) => write!(f, "Missing required variable: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Parse helpers
// ---------------------------------------------------------------------------

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<String, ConfigError> {
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name.to_owned())),
    }
}

fn has_known_scheme(url: &str) -> bool {
    ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

fn swap_scheme(url: &str, from_a: &str, to_a: &str, from_b: &str, to_b: &str) -> String {
    if let Some(rest) = url.strip_prefix(from_a) {
        return format!("{}{}", to_a, rest);
    }
    if let Some(rest) = url.strip_prefix(from_b) {
        return format!("{}{}", to_b, rest);
    }
    url.to_owned()
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_channels(raw: &str) -> Result<Vec<Channel>, ConfigError> {
    let mut channels = Vec::new();
    for item in split_list(Some(raw)) {
        let channel: Channel = item
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("CHANNELS: {}", e)))?;
        channels.push(channel);
    }
    Ok(channels)
}

fn parse_event_types(raw: Option<&str>) -> Result<Vec<EventType>, ConfigError> {
    let mut types = Vec::new();
    for item in split_list(raw) {
        let kind = EventType::parse(&item).ok_or_else(|| {
            ConfigError::InvalidValue(format!("EVENT_TYPE_FILTERS: unknown event type '{}'", item))
        })?;
        types.push(kind);
    }
    Ok(types)
}

/// `Name: value` pairs separated by `;`.
fn parse_headers(raw: Option<&str>) -> Result<Vec<(String, String)>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut headers = Vec::new();
    for pair in raw.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((name, value)) = pair.split_once(':') else {
            return Err(ConfigError::InvalidValue(format!(
                "WEBHOOK_HEADERS entry '{}' is not 'Name: value'",
                pair
            )));
        };
        headers.push((name.trim().to_owned(), value.trim().to_owned()));
    }
    Ok(headers)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("UPSTREAM_URL", "https://source.example.com"),
            ("UPSTREAM_TOKEN", "secret"),
            ("LISTEN_PORT", "8080"),
        ])
    }

    fn load(env: &HashMap<&str, &str>) -> Result<RelayConfig, ConfigError> {
        RelayConfig::from_lookup(|name| env.get(name).map(|v| (*v).to_owned()))
    }

    #[test]
    fn minimal_env_defaults_to_all_channel() {
        let config = load(&base_env()).expect("valid config");
        assert_eq!(config.channels, vec![Channel::All]);
        assert!(config.filters.users.is_empty());
        assert!(config.telegram.is_none());
        assert!(!config.debug);
    }

    #[test]
    fn each_required_var_is_enforced() {
        for missing in ["UPSTREAM_URL", "UPSTREAM_TOKEN", "LISTEN_PORT"] {
            let mut env = base_env();
            env.remove(missing);
            match load(&env) {
                Err(ConfigError::MissingVar(name)) => assert_eq!(name, missing),
                other => panic!("expected MissingVar({}), got {:?}", missing, other.err()),
            }
        }
    }

    #[test]
    fn url_scheme_swaps_both_ways() {
        let mut env = base_env();
        env.insert("UPSTREAM_URL", "https://source.example.com");
        let config = load(&env).expect("valid");
        assert_eq!(config.ws_url(), "wss://source.example.com");
        assert_eq!(config.http_url(), "https://source.example.com");

        env.insert("UPSTREAM_URL", "ws://10.0.0.5:9000/stream");
        let config = load(&env).expect("valid");
        assert_eq!(config.ws_url(), "ws://10.0.0.5:9000/stream");
        assert_eq!(config.http_url(), "http://10.0.0.5:9000/stream");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let mut env = base_env();
        env.insert("UPSTREAM_URL", "ftp://nope");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn channel_and_filter_lists_parse_with_whitespace() {
        let mut env = base_env();
        env.insert("CHANNELS", "tweets, following");
        env.insert("USER_FILTERS", "alice, bob,");
        env.insert("KEYWORD_FILTERS", "btc");
        env.insert("EVENT_TYPE_FILTERS", "post_created,follow_created");
        let config = load(&env).expect("valid");
        assert_eq!(config.channels, vec![Channel::Tweets, Channel::Following]);
        assert_eq!(config.filters.users, vec!["alice", "bob"]);
        assert_eq!(config.filters.event_types.len(), 2);
    }

    #[test]
    fn invalid_channel_or_event_type_is_fatal() {
        let mut env = base_env();
        env.insert("CHANNELS", "firehose");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue(_))));

        let mut env = base_env();
        env.insert("EVENT_TYPE_FILTERS", "post_deleted");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn telegram_requires_both_halves() {
        let mut env = base_env();
        env.insert("TELEGRAM_BOT_TOKEN", "bot123");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue(_))));

        env.insert("TELEGRAM_CHAT_ID", "-100");
        let config = load(&env).expect("valid");
        let telegram = config.telegram.expect("telegram config");
        assert_eq!(telegram.bot_token, "bot123");
    }

    #[test]
    fn webhook_headers_parse_as_name_value_pairs() {
        let mut env = base_env();
        env.insert("WEBHOOK_URL", "https://hooks.example.com/relay");
        env.insert("WEBHOOK_METHOD", "PUT");
        env.insert("WEBHOOK_HEADERS", "X-Auth: abc; Content-Signature: def");
        let config = load(&env).expect("valid");
        let webhook = config.webhook.expect("webhook config");
        assert_eq!(webhook.method, "PUT");
        assert_eq!(
            webhook.headers,
            vec![
                ("X-Auth".to_owned(), "abc".to_owned()),
                ("Content-Signature".to_owned(), "def".to_owned()),
            ]
        );

        let mut env = base_env();
        env.insert("WEBHOOK_URL", "https://hooks.example.com/relay");
        env.insert("WEBHOOK_HEADERS", "not-a-header");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn debug_accepts_common_truthy_spellings() {
        for (value, expected) in [("1", true), ("true", true), ("YES", true), ("0", false), ("off", false)] {
            let mut env = base_env();
            env.insert("DEBUG", value);
            assert_eq!(load(&env).expect("valid").debug, expected, "DEBUG={}", value);
        }
    }
}
