use reqwest::header::ACCEPT;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, instrument, trace};

use crate::config::Config;
use crate::error::{error_body, AppError};

/// Build the shared HTTP client. The timeout applies to each request on its own.
pub fn http_client(config: &Config) -> Result<reqwest::Client, AppError> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("xero-kpi/", env!("CARGO_PKG_VERSION")))
        .timeout(config.request_timeout)
        .build()?)
}

/// Description of a single API call, replayable by the refresh gate.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `api.xro/2.0/Invoices`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_params(mut self, params: &[(String, String)]) -> Self {
        self.query.extend(params.iter().cloned());
        self
    }
}

/// HTTP client for tenant-scoped Xero API requests.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send one request with bearer and tenant headers.
    ///
    /// Non-success responses come back as [`AppError::Upstream`] with the
    /// status and body Xero returned, 401 included; deciding what a 401
    /// means is the gate's job.
    #[instrument(skip(self, request, access_token), fields(method = %request.method, path = %request.path))]
    pub async fn send(
        &self,
        request: &ApiRequest,
        access_token: &str,
        tenant_id: &str,
    ) -> Result<Value, AppError> {
        debug!("Xero API request");
        trace!(query = ?request.query, "query parameters");

        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path))
            .bearer_auth(access_token)
            .header("xero-tenant-id", tenant_id)
            .header(ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        trace!(status = %status, "Xero API response");

        if !status.is_success() {
            return Err(AppError::Upstream {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Http(format!("Invalid JSON from Xero: {e}")))
    }
}
