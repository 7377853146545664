//! Shared fixtures: an `AppState` whose Xero endpoints all point at a
//! wiremock server.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use wiremock::MockServer;

use xero_kpi::providers::{TenantReference, TokenSet};
use xero_kpi::store::DEFAULT_USER_ID;
use xero_kpi::{AppState, Config, SharedState};

pub const TENANT_ID: &str = "tenant-1";

pub fn test_config(server: &MockServer) -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        client_id: "test-client".into(),
        client_secret: "test-secret".into(),
        redirect_uri: "http://localhost:4000/callback".into(),
        scopes: vec!["offline_access".into(), "accounting.transactions".into()],
        state_secret: None,
        api_base_url: server.uri(),
        identity_url: server.uri(),
        authorize_url: format!("{}/identity/connect/authorize", server.uri()),
        page_size: 100,
        request_timeout: Duration::from_secs(5),
    }
}

pub fn test_state(server: &MockServer) -> SharedState {
    Arc::new(AppState::from_config(test_config(server)).unwrap())
}

pub fn token_set(access: &str, refresh: Option<&str>) -> TokenSet {
    TokenSet {
        access_token: access.into(),
        refresh_token: refresh.map(str::to_string),
        token_type: "Bearer".into(),
        expires_at: Utc::now() + chrono::Duration::minutes(30),
        scope: None,
    }
}

/// Store `old-access`/`old-refresh` tokens for the default user.
pub async fn connect(state: &SharedState) {
    state
        .store
        .save(
            DEFAULT_USER_ID,
            token_set("old-access", Some("old-refresh")),
            vec![TenantReference {
                tenant_id: TENANT_ID.into(),
                tenant_name: Some("Demo Company".into()),
                tenant_type: Some("ORGANISATION".into()),
            }],
        )
        .await;
}

/// `count` invoice records numbered from `first`.
pub fn invoices(first: usize, count: usize) -> Vec<Value> {
    (first..first + count)
        .map(|n| {
            json!({
                "InvoiceID": format!("inv-{n}"),
                "Type": "ACCREC",
                "Contact": { "ContactID": format!("c-{}", n % 7), "Name": format!("Client {}", n % 7) },
                "Date": "2024-03-15T00:00:00",
                "Total": 10.0
            })
        })
        .collect()
}
