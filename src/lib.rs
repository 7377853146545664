pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod kpi;
pub mod providers;
pub mod store;
pub mod upstream;

pub use config::Config;
pub use error::AppError;

use std::sync::Arc;

use crypto::StateSigner;
use providers::{OAuthProvider, XeroProvider};
use store::{CredentialStore, DEFAULT_USER_ID};
use upstream::{ApiClient, PagedFetch, TokenGate};

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub store: CredentialStore,
    pub provider: Box<dyn OAuthProvider>,
    pub api: ApiClient,
    pub signer: StateSigner,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the Xero provider, API client and state signer from config.
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        let http = upstream::http_client(&config)?;
        let signer = match &config.state_secret {
            Some(secret) => StateSigner::new(secret)?,
            None => StateSigner::random(),
        };

        Ok(Self {
            provider: Box::new(XeroProvider::from_config(&config, http.clone())),
            api: ApiClient::new(&config.api_base_url, http),
            store: CredentialStore::new(),
            signer,
            config,
        })
    }

    /// Refresh gate bound to the default user's credentials.
    pub fn gate(&self) -> TokenGate<'_> {
        TokenGate::new(&self.api, &self.store, self.provider.as_ref(), DEFAULT_USER_ID)
    }

    pub fn pager(&self) -> PagedFetch<'_> {
        PagedFetch::new(self.gate(), self.config.page_size)
    }
}
