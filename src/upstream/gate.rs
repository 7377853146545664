use serde_json::Value;
use tracing::{error, info, warn};

use super::client::{ApiClient, ApiRequest};
use crate::error::AppError;
use crate::providers::{OAuthProvider, TokenSet};
use crate::store::CredentialStore;

/// Wraps API calls with a single refresh-and-retry on 401.
///
/// A call is sent once. When Xero answers 401 the gate reads the latest
/// stored token set for the user (another call may already have rotated
/// it), exchanges its refresh token, stores the result and replays the
/// request once with the new access token. Whatever the replay returns is
/// final. Other failures are returned without touching the tokens.
#[derive(Clone, Copy)]
pub struct TokenGate<'a> {
    api: &'a ApiClient,
    store: &'a CredentialStore,
    provider: &'a dyn OAuthProvider,
    user_id: &'a str,
}

impl<'a> TokenGate<'a> {
    pub fn new(
        api: &'a ApiClient,
        store: &'a CredentialStore,
        provider: &'a dyn OAuthProvider,
        user_id: &'a str,
    ) -> Self {
        Self {
            api,
            store,
            provider,
            user_id,
        }
    }

    /// Send `request`, refreshing at most once.
    ///
    /// On a successful refresh `token_set` is replaced with the new tokens so
    /// the caller's following requests use them.
    pub async fn call(
        &self,
        token_set: &mut TokenSet,
        tenant_id: &str,
        request: &ApiRequest,
    ) -> Result<Value, AppError> {
        let unauthorized_body = match self.api.send(request, &token_set.access_token, tenant_id).await {
            Err(AppError::Upstream { status: 401, body }) => body,
            other => return other,
        };

        info!(path = %request.path, "access token rejected, refreshing");

        let Some(stored) = self.store.token_set(self.user_id).await else {
            warn!(user_id = self.user_id, "no stored tokens to refresh");
            return Err(AppError::UpstreamAuth { body: unauthorized_body });
        };
        let Some(refresh_token) = stored.refresh_token.as_deref() else {
            warn!(user_id = self.user_id, "stored tokens have no refresh token");
            return Err(AppError::UpstreamAuth { body: unauthorized_body });
        };

        let mut fresh = self
            .provider
            .refresh_token(refresh_token)
            .await
            .map_err(|e| {
                error!(user_id = self.user_id, "token refresh failed: {e}");
                e
            })?;
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = stored.refresh_token.clone();
        }

        self.store.replace_token_set(self.user_id, fresh.clone()).await;
        *token_set = fresh;
        info!(user_id = self.user_id, expires_at = %token_set.expires_at, "token refreshed");

        match self.api.send(request, &token_set.access_token, tenant_id).await {
            Err(AppError::Upstream { status: 401, body }) => {
                warn!(path = %request.path, "access token rejected again after refresh");
                Err(AppError::UpstreamAuth { body })
            }
            other => other,
        }
    }
}
