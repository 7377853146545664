use anyhow::{Context, Result};
use std::time::Duration;

use crate::upstream::DEFAULT_PAGE_SIZE;

pub const DEFAULT_SCOPES: &[&str] = &[
    "openid",
    "profile",
    "email",
    "offline_access",
    "accounting.transactions",
    "accounting.reports.read",
    "accounting.settings",
    "accounting.contacts.read",
    "accounting.contacts",
];

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,

    // ── Xero OAuth app ──────────────────────────────────────────────────
    pub client_id: String,
    pub client_secret: String,
    /// Must match the redirect URI registered with the Xero app. Its path
    /// is where the callback handler is mounted.
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Base64 HMAC key for the OAuth state parameter. Random per process when unset.
    pub state_secret: Option<String>,

    // ── Xero endpoints ──────────────────────────────────────────────────
    pub api_base_url: String,
    pub identity_url: String,
    pub authorize_url: String,

    // ── Fetching ────────────────────────────────────────────────────────
    /// A page shorter than this ends a paged fetch.
    pub page_size: usize,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let either = |primary: &str, fallback: &str| var(primary).or_else(|| var(fallback));

        let scopes = match var("XERO_SCOPES") {
            Some(raw) => raw
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        };

        let page_size: usize = match var("XERO_PAGE_SIZE") {
            Some(raw) => raw.trim().parse().context("Invalid XERO_PAGE_SIZE")?,
            None => DEFAULT_PAGE_SIZE,
        };
        if page_size == 0 {
            anyhow::bail!("XERO_PAGE_SIZE must be at least 1");
        }

        Ok(Config {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: var("PORT")
                .unwrap_or_else(|| "4000".into())
                .parse()
                .context("Invalid PORT")?,

            client_id: either("XERO_CLIENT_ID", "CLIENT_ID")
                .context("XERO_CLIENT_ID (or CLIENT_ID) is required")?,
            client_secret: either("XERO_CLIENT_SECRET", "CLIENT_SECRET")
                .context("XERO_CLIENT_SECRET (or CLIENT_SECRET) is required")?,
            redirect_uri: var("REDIRECT_URI").context("REDIRECT_URI is required")?,
            scopes,
            state_secret: var("STATE_SECRET"),

            api_base_url: var("XERO_API_URL").unwrap_or_else(|| "https://api.xero.com".into()),
            identity_url: var("XERO_IDENTITY_URL")
                .unwrap_or_else(|| "https://identity.xero.com".into()),
            authorize_url: var("XERO_AUTHORIZE_URL")
                .unwrap_or_else(|| "https://login.xero.com/identity/connect/authorize".into()),

            page_size,
            request_timeout: Duration::from_secs(
                var("REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|| "20".into())
                    .parse()
                    .context("Invalid REQUEST_TIMEOUT_SECS")?,
            ),
        })
    }

    /// Path component of the redirect URI, where the OAuth callback is served.
    pub fn callback_path(&self) -> String {
        match url::Url::parse(&self.redirect_uri) {
            Ok(parsed) if parsed.path() != "/" => parsed.path().to_string(),
            _ => {
                tracing::warn!(
                    "REDIRECT_URI {} has no usable path, serving callback at /xero/callback",
                    self.redirect_uri
                );
                "/xero/callback".into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_and_fallback_names() {
        let config = Config::from_lookup(lookup(&[
            ("CLIENT_ID", "cid"),
            ("CLIENT_SECRET", "secret"),
            ("REDIRECT_URI", "https://localhost:4000/callback"),
        ]))
        .unwrap();

        assert_eq!(config.client_id, "cid");
        assert_eq!(config.port, 4000);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.request_timeout, Duration::from_secs(20));
        assert_eq!(config.scopes.len(), DEFAULT_SCOPES.len());
        assert_eq!(config.callback_path(), "/callback");
    }

    #[test]
    fn test_missing_redirect_uri_is_an_error() {
        let result = Config::from_lookup(lookup(&[
            ("XERO_CLIENT_ID", "cid"),
            ("XERO_CLIENT_SECRET", "secret"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_scopes_override() {
        let config = Config::from_lookup(lookup(&[
            ("XERO_CLIENT_ID", "cid"),
            ("XERO_CLIENT_SECRET", "secret"),
            ("REDIRECT_URI", "http://localhost/"),
            ("XERO_SCOPES", "offline_access, accounting.transactions"),
        ]))
        .unwrap();

        assert_eq!(config.scopes, vec!["offline_access", "accounting.transactions"]);
        assert_eq!(config.callback_path(), "/xero/callback");
    }

    #[test]
    fn test_page_size_must_be_positive() {
        let base = [
            ("XERO_CLIENT_ID", "cid"),
            ("XERO_CLIENT_SECRET", "secret"),
            ("REDIRECT_URI", "http://localhost/callback"),
        ];

        let zero = Config::from_lookup(lookup(&[base[0], base[1], base[2], ("XERO_PAGE_SIZE", "0")]));
        assert!(zero.is_err());

        let fifty = Config::from_lookup(lookup(&[base[0], base[1], base[2], ("XERO_PAGE_SIZE", "50")]))
            .unwrap();
        assert_eq!(fifty.page_size, 50);
    }
}
