//! Message templating.
//!
//! Backend messages embed raw entity ids ("New request from 8f14e45f-...").
//! The templater swaps every UUID-shaped token for a human-readable name
//! from the user directory. Lookups for distinct tokens run concurrently,
//! successful ones are memoized for the session, and failures leave the
//! token in place so the message is still displayable.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use futures::future::join_all;
use regex::Regex;
use tracing::debug;

use crate::api::UserDirectory;

static UUID_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

/// Resolves entity ids embedded in notification messages.
pub struct MessageTemplater {
    directory: Arc<dyn UserDirectory>,
    /// Token -> display name, successful lookups only. Failed lookups are
    /// retried on the next message that carries the token.
    name_cache: DashMap<String, String>,
}

impl MessageTemplater {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            directory,
            name_cache: DashMap::new(),
        }
    }

    /// Replace every UUID-shaped token that resolves to a user name.
    ///
    /// Unresolvable tokens stay in place; the returned message is always
    /// displayable.
    pub async fn resolve(&self, message: &str) -> String {
        let tokens = distinct_tokens(message);
        if tokens.is_empty() {
            return message.to_string();
        }

        let lookups = tokens.iter().map(|token| self.user_name(token.clone()));
        let names = join_all(lookups).await;

        substitute(message, &tokens, names)
    }

    /// Two-hop resolution for withdrawal messages: the embedded id is a
    /// withdrawal id whose owning user carries the display name.
    pub async fn resolve_withdrawal(&self, message: &str) -> String {
        let tokens = distinct_tokens(message);
        if tokens.is_empty() {
            return message.to_string();
        }

        let lookups = tokens
            .iter()
            .map(|token| self.withdrawal_owner_name(token.clone()));
        let names = join_all(lookups).await;

        substitute(message, &tokens, names)
    }

    async fn user_name(&self, user_id: String) -> Option<String> {
        if let Some(hit) = self.name_cache.get(&user_id) {
            return Some(hit.clone());
        }
        match self.directory.display_name(&user_id).await {
            Ok(Some(name)) => {
                self.name_cache.insert(user_id, name.clone());
                Some(name)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "User name lookup failed");
                None
            }
        }
    }

    async fn withdrawal_owner_name(&self, withdrawal_id: String) -> Option<String> {
        if let Some(hit) = self.name_cache.get(&withdrawal_id) {
            return Some(hit.clone());
        }
        let owner = match self.directory.withdrawal_owner(&withdrawal_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => return None,
            Err(e) => {
                debug!(withdrawal_id = %withdrawal_id, error = %e, "Withdrawal lookup failed");
                return None;
            }
        };
        let name = self.user_name(owner).await?;
        self.name_cache.insert(withdrawal_id, name.clone());
        Some(name)
    }
}

/// UUID-shaped tokens in first-occurrence order, deduplicated.
fn distinct_tokens(message: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for found in UUID_TOKEN_RE.find_iter(message) {
        let token = found.as_str().to_string();
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

/// All lookups settle before any substitution happens, so a half-resolved
/// message is never produced.
fn substitute(message: &str, tokens: &[String], names: Vec<Option<String>>) -> String {
    let mut out = message.to_string();
    for (token, name) in tokens.iter().zip(names) {
        if let Some(name) = name {
            out = out.replace(token.as_str(), &name);
        }
    }
    out
}
