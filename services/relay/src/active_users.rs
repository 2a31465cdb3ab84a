//! Periodic cache of the upstream `/active-users` endpoint, plus the
//! fail-open validator that checks configured user filters against it.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(4 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SAMPLE_SIZE: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ActiveUsersError {
    #[error("active-users request failed: {0}")]
    Request(String),
    #[error("active-users endpoint returned HTTP {0}")]
    Status(u16),
    #[error("active-users response had no recognizable shape")]
    Shape,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Cached view of the server's known-user list.
///
/// The snapshot is owned here exclusively; `cached()` hands out copies.
pub struct ActiveUsersFetcher {
    http: reqwest::Client,
    base_url: String,
    token: String,
    cache: RwLock<Vec<String>>,
    refresh_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ActiveUsersFetcher {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        ActiveUsersFetcher {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
            cache: RwLock::new(Vec::new()),
            refresh_task: Mutex::new(None),
        }
    }

    /// GET the user list. Updates the cache on success; the error carries
    /// why the fetch failed (the cache is left untouched).
    pub async fn try_fetch(&self) -> Result<Vec<String>, ActiveUsersError> {
        let url = format!("{}/active-users", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ActiveUsersError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActiveUsersError::Status(status.as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ActiveUsersError::Request(e.to_string()))?;
        let users = parse_active_users(&body).ok_or(ActiveUsersError::Shape)?;

        *self.cache.write().expect("cache lock") = users.clone();
        debug!(count = users.len(), "active users refreshed");
        Ok(users)
    }

    /// Fetch with fallback: on any failure, log and return the last
    /// successful snapshot instead.
    pub async fn fetch(&self) -> Vec<String> {
        match self.try_fetch().await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "active-users fetch failed, serving cache");
                self.cached()
            }
        }
    }

    /// Copy of the last successful snapshot.
    pub fn cached(&self) -> Vec<String> {
        self.cache.read().expect("cache lock").clone()
    }

    /// Await one initial fetch, then refresh on an interval until
    /// [`stop`](Self::stop). A second call replaces the previous task.
    pub async fn start_periodic_refresh(self: &Arc<Self>, interval: Duration) {
        let _ = self.fetch().await;

        let fetcher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let _ = fetcher.fetch().await;
            }
        });

        let mut slot = self.refresh_task.lock().expect("refresh task lock");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Cancel the periodic refresh. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = self.refresh_task.lock().expect("refresh task lock").take() {
            task.abort();
            info!("active-users refresh stopped");
        }
    }
}

impl Drop for ActiveUsersFetcher {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.lock().expect("refresh task lock").take() {
            task.abort();
        }
    }
}

/// Extract usernames from any of the accepted response shapes
/// (first match wins):
/// `[string]`, `[{username}]`, `{usernames: [...]}`, `{users: [...]}` —
/// list items may be strings or `{username}` objects in the wrapped forms.
pub fn parse_active_users(body: &serde_json::Value) -> Option<Vec<String>> {
    if let Some(list) = body.as_array() {
        return collect_usernames(list);
    }
    if let Some(list) = body.get("usernames").and_then(|v| v.as_array()) {
        return collect_usernames(list);
    }
    if let Some(list) = body.get("users").and_then(|v| v.as_array()) {
        return collect_usernames(list);
    }
    None
}

fn collect_usernames(items: &[serde_json::Value]) -> Option<Vec<String>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if let Some(name) = item.as_str() {
            out.push(name.to_owned());
        } else if let Some(name) = item.get("username").and_then(|v| v.as_str()) {
            out.push(name.to_owned());
        } else {
            return None;
        }
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// UserFilterValidator
// ---------------------------------------------------------------------------

/// Result of checking a configured user list against the live snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFilterReport {
    pub valid: bool,
    pub invalid_users: Vec<String>,
    pub valid_users: Vec<String>,
    pub sample_active_users: Vec<String>,
    /// True when the snapshot could not be fetched; the report then fails
    /// open with `valid: true`.
    pub fetch_error: bool,
}

/// Compare configured user filters (case-insensitively) against the
/// fetched active-user snapshot.
///
/// Failing closed on a fetch error would take the relay down during
/// transient upstream trouble, so an unreachable endpoint reports valid.
pub async fn validate_user_filters(
    configured: &[String],
    fetcher: &ActiveUsersFetcher,
) -> UserFilterReport {
    let active = match fetcher.try_fetch().await {
        Ok(users) => users,
        Err(e) => {
            warn!(error = %e, "skipping user-filter validation, endpoint unreachable");
            return UserFilterReport {
                valid: true,
                invalid_users: Vec::new(),
                valid_users: configured.to_vec(),
                sample_active_users: Vec::new(),
                fetch_error: true,
            };
        }
    };

    let known: Vec<String> = active.iter().map(|u| u.to_lowercase()).collect();
    let mut valid_users = Vec::new();
    let mut invalid_users = Vec::new();
    for user in configured {
        if known.contains(&user.to_lowercase()) {
            valid_users.push(user.clone());
        } else {
            invalid_users.push(user.clone());
        }
    }

    UserFilterReport {
        valid: invalid_users.is_empty(),
        invalid_users,
        valid_users,
        sample_active_users: active.into_iter().take(SAMPLE_SIZE).collect(),
        fetch_error: false,
    }
}
