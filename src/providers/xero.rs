use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

use super::traits::{OAuthProvider, TenantReference, TokenSet};
use crate::config::Config;
use crate::error::{error_body, AppError};

/// Xero OAuth 2.0 provider.
///
/// Quirks:
/// - Token endpoint authenticates the client with HTTP Basic auth.
/// - Scopes must include `offline_access` to get refresh tokens.
/// - Refresh tokens rotate: every refresh returns a new one and the old one
///   stops working after a short grace period.
/// - Token lifetime: 30 minutes (access), 60 days (refresh).
/// - Tenants are not part of the token response; they come from `/connections`.
pub struct XeroProvider {
    client_id: String,
    client_secret: String,
    authorize_url: String,
    token_url: String,
    connections_url: String,
    http: reqwest::Client,
}

// Raw token response from Xero's identity server
#[derive(Debug, Deserialize)]
struct XeroTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
}

impl XeroProvider {
    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        Self::with_endpoints(
            config.client_id.clone(),
            config.client_secret.clone(),
            &config.authorize_url,
            &config.identity_url,
            &config.api_base_url,
            http,
        )
    }

    fn with_endpoints(
        client_id: String,
        client_secret: String,
        authorize_url: &str,
        identity_url: &str,
        api_url: &str,
        http: reqwest::Client,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            authorize_url: authorize_url.to_string(),
            token_url: format!("{}/connect/token", identity_url.trim_end_matches('/')),
            connections_url: format!("{}/connections", api_url.trim_end_matches('/')),
            http,
        }
    }

    fn token_set_from(&self, resp: XeroTokenResponse) -> TokenSet {
        let ttl = resp
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.token_ttl());

        TokenSet {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            token_type: resp.token_type.unwrap_or_else(|| "Bearer".into()),
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(30)),
            scope: resp.scope,
        }
    }
}

#[async_trait]
impl OAuthProvider for XeroProvider {
    fn id(&self) -> &str {
        "xero"
    }

    fn display_name(&self) -> &str {
        "Xero"
    }

    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> String {
        let scope_str = scopes.join(" ");
        format!(
            "{base}?response_type=code\
             &client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &scope={scope}\
             &state={state}",
            base = self.authorize_url,
            client_id = urlencoding(&self.client_id),
            redirect_uri = urlencoding(redirect_uri),
            scope = urlencoding(&scope_str),
            state = urlencoding(state),
        )
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, AppError> {
        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| AppError::FlowError(format!("Token exchange request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = error_body(resp).await.unwrap_or_default();
            return Err(AppError::FlowError(format!(
                "Xero token exchange failed (HTTP {status}): {body}"
            )));
        }

        let token_resp: XeroTokenResponse = resp
            .json()
            .await
            .map_err(|e| AppError::FlowError(format!("Failed to parse token response: {e}")))?;

        Ok(self.token_set_from(token_resp))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AppError> {
        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| AppError::RefreshFailed {
                message: format!("Refresh request failed: {e}"),
                status: None,
                body: None,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(AppError::RefreshFailed {
                message: format!("Xero refresh failed (HTTP {status})"),
                status: Some(status),
                body: error_body(resp).await,
            });
        }

        let token_resp: XeroTokenResponse =
            resp.json().await.map_err(|e| AppError::RefreshFailed {
                message: format!("Failed to parse refresh response: {e}"),
                status: None,
                body: None,
            })?;

        Ok(self.token_set_from(token_resp))
    }

    async fn tenants(&self, access_token: &str) -> Result<Vec<TenantReference>, AppError> {
        let resp = self
            .http
            .get(&self.connections_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(AppError::Upstream {
                status,
                body: error_body(resp).await,
            });
        }

        Ok(resp.json().await?)
    }
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTHORIZE_URL: &str = "https://login.xero.com/identity/connect/authorize";

    fn provider() -> XeroProvider {
        XeroProvider::with_endpoints(
            "client-123".into(),
            "shh".into(),
            AUTHORIZE_URL,
            "https://identity.xero.com",
            "https://api.xero.com",
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_auth_url_encodes_parameters() {
        let scopes = vec!["offline_access".to_string(), "accounting.transactions".to_string()];
        let url = provider().auth_url(&scopes, "st/ate", "https://localhost:4000/callback");

        assert!(url.starts_with(AUTHORIZE_URL));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("scope=offline_access+accounting.transactions"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Flocalhost%3A4000%2Fcallback"));
        assert!(url.contains("state=st%2Fate"));
    }

    #[test]
    fn test_token_set_uses_default_ttl_without_expires_in() {
        let provider = provider();
        let before = Utc::now();
        let tokens = provider.token_set_from(XeroTokenResponse {
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            token_type: None,
            expires_in: None,
            scope: None,
        });

        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.expires_at >= before + chrono::Duration::minutes(30));
        assert!(!tokens.is_expired());
    }

    #[test]
    fn test_endpoints_derive_from_bases() {
        let provider = provider();
        assert_eq!(provider.token_url, "https://identity.xero.com/connect/token");
        assert_eq!(provider.connections_url, "https://api.xero.com/connections");
    }
}
