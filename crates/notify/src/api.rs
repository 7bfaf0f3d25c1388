//! REST collaborators.
//!
//! Trait seams for the notification history endpoints and the user
//! directory, plus the HTTP implementations used against the console
//! backend. This layer never constructs notification records; history rows
//! travel raw and are normalized by the caller.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::error::{NotifyError, Result};
use crate::token::TokenGuard;

/// Notification history and read-state endpoints.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// One page of raw history payloads.
    async fn history(&self, user_id: &str, page: u32, page_size: u32) -> Result<Vec<Value>>;

    /// Server-side unread count.
    async fn unread_count(&self, user_id: &str) -> Result<u64>;

    /// Mark one notification read. Returns whether the backend acknowledged.
    async fn mark_read(&self, id: &str, user_id: &str) -> Result<bool>;

    /// Mark every notification read.
    async fn mark_all_read(&self, user_id: &str) -> Result<bool>;
}

/// User and withdrawal lookups used by message templating.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Human-readable name for a user id. `Ok(None)` means the user is
    /// unknown, which is not an error.
    async fn display_name(&self, user_id: &str) -> Result<Option<String>>;

    /// Owning user of a withdrawal request.
    async fn withdrawal_owner(&self, withdrawal_id: &str) -> Result<Option<String>>;
}

/// User profile row as served by the directory endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    #[serde(default, alias = "firstName", alias = "FirstName")]
    pub first_name: Option<String>,
    #[serde(default, alias = "lastName", alias = "LastName")]
    pub last_name: Option<String>,
    #[serde(default, alias = "Email")]
    pub email: Option<String>,
}

impl UserProfile {
    /// Full name when any name part is present, else the email.
    pub fn display_name(&self) -> Option<String> {
        let first = self.first_name.as_deref().unwrap_or("").trim();
        let last = self.last_name.as_deref().unwrap_or("").trim();
        let full = format!("{first} {last}");
        let full = full.trim();
        if !full.is_empty() {
            return Some(full.to_string());
        }
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
    }
}

/// HTTP implementation of [`NotificationApi`].
pub struct HttpNotificationApi {
    base_url: Url,
    client: Client,
    token_guard: Arc<TokenGuard>,
}

impl HttpNotificationApi {
    /// Create a client for the given API base URL, e.g.
    /// `https://api.example.com/api/`.
    pub fn new(
        base_url: impl AsRef<str>,
        client: Client,
        token_guard: Arc<TokenGuard>,
    ) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url.as_ref())?,
            client,
            token_guard,
        })
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn history(&self, user_id: &str, page: u32, page_size: u32) -> Result<Vec<Value>> {
        let mut url = join_path(&self.base_url, "notifications")?;
        url.query_pairs_mut()
            .append_pair("userId", user_id)
            .append_pair("page", &page.to_string())
            .append_pair("pageSize", &page_size.to_string());

        let token = self.token_guard.valid_token().await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::api(status.as_u16(), body));
        }

        let value: Value = response.json().await?;
        Ok(history_rows(value))
    }

    async fn unread_count(&self, user_id: &str) -> Result<u64> {
        let mut url = join_path(&self.base_url, "notifications/unread-count")?;
        url.query_pairs_mut().append_pair("userId", user_id);

        let token = self.token_guard.valid_token().await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::api(status.as_u16(), body));
        }

        let value: Value = response.json().await?;
        Ok(unread_from(&value))
    }

    async fn mark_read(&self, id: &str, user_id: &str) -> Result<bool> {
        let url = join_path(&self.base_url, &format!("notifications/{id}/read"))?;

        let token = self.token_guard.valid_token().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({"userId": user_id}))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::api(status.as_u16(), body));
        }

        Ok(acknowledged(response.json().await.unwrap_or(Value::Null)))
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<bool> {
        let url = join_path(&self.base_url, "notifications/read-all")?;

        let token = self.token_guard.valid_token().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({"userId": user_id}))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::api(status.as_u16(), body));
        }

        Ok(acknowledged(response.json().await.unwrap_or(Value::Null)))
    }
}

/// HTTP implementation of [`UserDirectory`].
pub struct HttpUserDirectory {
    base_url: Url,
    client: Client,
    token_guard: Arc<TokenGuard>,
}

impl HttpUserDirectory {
    pub fn new(
        base_url: impl AsRef<str>,
        client: Client,
        token_guard: Arc<TokenGuard>,
    ) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url.as_ref())?,
            client,
            token_guard,
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>> {
        let url = join_path(&self.base_url, &format!("users/{user_id}"))?;

        let token = self.token_guard.valid_token().await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::api(status.as_u16(), body));
        }

        let profile: UserProfile = response.json().await?;
        Ok(profile.display_name())
    }

    async fn withdrawal_owner(&self, withdrawal_id: &str) -> Result<Option<String>> {
        let url = join_path(&self.base_url, &format!("withdrawals/{withdrawal_id}"))?;

        let token = self.token_guard.valid_token().await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::api(status.as_u16(), body));
        }

        let value: Value = response.json().await?;
        Ok(owner_id(&value))
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    // A trailing slash makes Url::join treat the last segment as a
    // directory instead of replacing it.
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&normalized).map_err(|e| NotifyError::config(format!("Invalid API base url: {e}")))
}

fn join_path(base_url: &Url, path: &str) -> Result<Url> {
    base_url
        .join(path)
        .map_err(|e| NotifyError::config(format!("Invalid API path {path}: {e}")))
}

/// History responses come either as a bare array or wrapped in an envelope.
fn history_rows(value: Value) -> Vec<Value> {
    match value {
        Value::Array(rows) => rows,
        Value::Object(mut map) => ["data", "Data", "items", "Items", "result", "Result"]
            .iter()
            .find_map(|key| map.remove(*key))
            .map(history_rows)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Unread responses come as a bare number or wrapped in an envelope.
fn unread_from(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::Object(map) => ["count", "Count", "unreadCount", "UnreadCount", "data", "Data"]
            .iter()
            .find_map(|key| map.get(*key))
            .map(unread_from)
            .unwrap_or(0),
        _ => 0,
    }
}

/// A 2xx without an explicit `success` flag counts as acknowledged.
fn acknowledged(value: Value) -> bool {
    value
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

fn owner_id(value: &Value) -> Option<String> {
    let candidates = ["userId", "UserId", "ownerId", "OwnerId"];
    let direct = candidates
        .iter()
        .find_map(|key| value.get(key))
        .and_then(Value::as_str);
    if let Some(id) = direct {
        return Some(id.to_string());
    }
    // Some endpoints wrap the row in a data envelope.
    value
        .get("data")
        .or_else(|| value.get("Data"))
        .and_then(|inner| {
            candidates
                .iter()
                .find_map(|key| inner.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}
