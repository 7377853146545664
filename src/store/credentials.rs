use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::providers::{TenantReference, TokenSet};

/// Identity every connection is stored under. The store is keyed so that
/// per-session identities can be added without changing its callers.
pub const DEFAULT_USER_ID: &str = "default";

/// Everything known about one user's Xero connection.
#[derive(Debug, Clone)]
pub struct CredentialEntry {
    pub token_set: TokenSet,
    pub tenants: Vec<TenantReference>,
}

/// A usable connection: the current tokens plus the selected tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub token_set: TokenSet,
    pub tenant_id: String,
}

/// Debug view of a stored entry. Never exposes token values.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub has_entry: bool,
    pub tenants: Option<Vec<TenantReference>>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub token_expired: bool,
    pub access_token_present: bool,
    pub refresh_token_present: bool,
}

/// In-memory credential store.
#[derive(Default)]
pub struct CredentialStore {
    entries: RwLock<HashMap<String, CredentialEntry>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store tokens and tenants for a user, replacing whatever was there.
    pub async fn save(&self, user_id: &str, token_set: TokenSet, tenants: Vec<TenantReference>) {
        debug!(user_id, tenants = tenants.len(), "saving credentials");
        self.entries
            .write()
            .await
            .insert(user_id.to_string(), CredentialEntry { token_set, tenants });
    }

    /// Current tokens and the first tenant's id.
    ///
    /// Fails with [`AppError::NotConnected`] when nothing is stored or the
    /// user has no tenants.
    pub async fn get(&self, user_id: &str) -> Result<Connection, AppError> {
        let entries = self.entries.read().await;
        let entry = entries.get(user_id).ok_or(AppError::NotConnected)?;
        let tenant = entry.tenants.first().ok_or(AppError::NotConnected)?;

        Ok(Connection {
            token_set: entry.token_set.clone(),
            tenant_id: tenant.tenant_id.clone(),
        })
    }

    /// Latest stored token set, regardless of tenant state.
    pub async fn token_set(&self, user_id: &str) -> Option<TokenSet> {
        self.entries
            .read()
            .await
            .get(user_id)
            .map(|entry| entry.token_set.clone())
    }

    /// Persist a refreshed token set, keeping the user's tenants.
    pub async fn replace_token_set(&self, user_id: &str, token_set: TokenSet) {
        match self.entries.write().await.get_mut(user_id) {
            Some(entry) => entry.token_set = token_set,
            None => warn!(user_id, "refreshed tokens for a user with no stored entry, dropping"),
        }
    }

    pub async fn summary(&self, user_id: &str) -> StoreSummary {
        let entries = self.entries.read().await;
        match entries.get(user_id) {
            Some(entry) => StoreSummary {
                has_entry: true,
                tenants: Some(entry.tenants.clone()),
                token_expiry: Some(entry.token_set.expires_at),
                token_expired: entry.token_set.is_expired(),
                access_token_present: !entry.token_set.access_token.is_empty(),
                refresh_token_present: entry.token_set.refresh_token.is_some(),
            },
            None => StoreSummary {
                has_entry: false,
                tenants: None,
                token_expiry: None,
                token_expired: false,
                access_token_present: false,
                refresh_token_present: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(access: &str) -> TokenSet {
        TokenSet {
            access_token: access.into(),
            refresh_token: Some(format!("{access}-refresh")),
            token_type: "Bearer".into(),
            expires_at: Utc::now() + chrono::Duration::minutes(30),
            scope: None,
        }
    }

    fn tenant(id: &str) -> TenantReference {
        TenantReference {
            tenant_id: id.into(),
            tenant_name: None,
            tenant_type: Some("ORGANISATION".into()),
        }
    }

    #[tokio::test]
    async fn test_get_before_save_is_not_connected() {
        let store = CredentialStore::new();
        assert!(matches!(store.get(DEFAULT_USER_ID).await, Err(AppError::NotConnected)));
    }

    #[tokio::test]
    async fn test_save_then_get_returns_first_tenant() {
        let store = CredentialStore::new();
        let token_a = tokens("token-a");
        store
            .save(DEFAULT_USER_ID, token_a.clone(), vec![tenant("T1"), tenant("T2")])
            .await;

        let conn = store.get(DEFAULT_USER_ID).await.unwrap();
        assert_eq!(conn.token_set, token_a);
        assert_eq!(conn.tenant_id, "T1");
    }

    #[tokio::test]
    async fn test_empty_tenant_list_is_not_connected() {
        let store = CredentialStore::new();
        store.save(DEFAULT_USER_ID, tokens("token-a"), vec![]).await;
        assert!(matches!(store.get(DEFAULT_USER_ID).await, Err(AppError::NotConnected)));
        // The tokens themselves are still there for a refresh.
        assert!(store.token_set(DEFAULT_USER_ID).await.is_some());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_entry() {
        let store = CredentialStore::new();
        store.save(DEFAULT_USER_ID, tokens("old"), vec![tenant("T1")]).await;
        store.save(DEFAULT_USER_ID, tokens("new"), vec![tenant("T9")]).await;

        let conn = store.get(DEFAULT_USER_ID).await.unwrap();
        assert_eq!(conn.token_set.access_token, "new");
        assert_eq!(conn.tenant_id, "T9");
    }

    #[tokio::test]
    async fn test_replace_token_set_keeps_tenants() {
        let store = CredentialStore::new();
        store.save(DEFAULT_USER_ID, tokens("old"), vec![tenant("T1")]).await;
        store.replace_token_set(DEFAULT_USER_ID, tokens("fresh")).await;

        let conn = store.get(DEFAULT_USER_ID).await.unwrap();
        assert_eq!(conn.token_set.access_token, "fresh");
        assert_eq!(conn.tenant_id, "T1");
    }

    #[tokio::test]
    async fn test_replace_token_set_for_unknown_user_is_ignored() {
        let store = CredentialStore::new();
        store.replace_token_set("someone", tokens("fresh")).await;
        assert!(store.token_set("someone").await.is_none());
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let store = CredentialStore::new();
        store.save("alice", tokens("a"), vec![tenant("TA")]).await;
        assert!(store.get("bob").await.is_err());
        assert_eq!(store.get("alice").await.unwrap().tenant_id, "TA");
    }

    #[tokio::test]
    async fn test_summary_hides_token_values() {
        let store = CredentialStore::new();
        assert!(!store.summary(DEFAULT_USER_ID).await.has_entry);

        store.save(DEFAULT_USER_ID, tokens("secret"), vec![tenant("T1")]).await;
        let summary = store.summary(DEFAULT_USER_ID).await;
        assert!(summary.has_entry);
        assert!(summary.access_token_present);
        assert!(summary.refresh_token_present);
        assert!(!summary.token_expired);

        let mut stale = tokens("secret");
        stale.expires_at = Utc::now() - chrono::Duration::minutes(1);
        store.replace_token_set(DEFAULT_USER_ID, stale).await;
        assert!(store.summary(DEFAULT_USER_ID).await.token_expired);

        let rendered = serde_json::to_string(&summary).unwrap();
        assert!(!rendered.contains("secret"));
    }
}
