//! API route handlers for xero-kpi.
//!
//! All handlers receive `SharedState` via Axum state extraction. Every
//! failure is an [`AppError`] and renders as `{ "ok": false, "error": ... }`.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::crypto::StateSigner;
use crate::error::AppError;
use crate::kpi::metrics;
use crate::kpi::{parse_bound, DateRange, Invoice, TimeEntry};
use crate::store::DEFAULT_USER_ID;
use crate::upstream::{ApiRequest, CollectionField, CONTACTS_ENDPOINT, INVOICES_ENDPOINT};
use crate::SharedState;

/// Consent must complete within this many seconds of `/xero/connect`.
const STATE_MAX_AGE_SECS: i64 = 600;

const ROUTES: &[&str] = &[
    "/health",
    "/debug",
    "/xero/connect",
    "/xero/refresh",
    "/xero/contacts",
    "/xero/invoices",
    "/xero/cac",
    "/xero/billable-hours",
];

// =============================================================================
// Router
// =============================================================================

pub fn app_router(state: SharedState) -> Router {
    let mut callback_path = state.config.callback_path();
    if ROUTES.contains(&callback_path.as_str()) || callback_path.starts_with("/kpi/") {
        warn!("REDIRECT_URI path {callback_path} collides with an API route, using /xero/callback");
        callback_path = "/xero/callback".into();
    }

    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/health", get(health))
        .route("/debug", get(debug_redirect))
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/xero/connect", get(connect))
        .route("/xero/refresh", post(refresh))
        .route(&callback_path, get(oauth_callback))
        // ── Writes ───────────────────────────────────────────────────────
        .route("/xero/contacts", post(create_contact))
        .route("/xero/invoices", post(create_invoice))
        .route("/xero/cac", post(cac))
        .route("/xero/billable-hours", post(billable_hours))
        // ── KPIs ─────────────────────────────────────────────────────────
        .route("/kpi/revenue-by-customer-month", get(revenue_by_customer_month))
        .route("/kpi/gross-profit-margin", get(gross_profit_margin))
        .route("/kpi/net-profit-margin", get(net_profit_margin))
        .route("/kpi/avg-rev-per-client", get(avg_rev_per_client))
        .route("/kpi/ltv", get(ltv))
        .route("/kpi/staff-to-client", get(staff_to_client))
        .route("/kpi/revenue-growth", get(revenue_growth))
        .route("/kpi/churn", get(churn))
        .route("/kpi/total-customers", get(total_customers))
        .route("/kpi/lost-customers", get(lost_customers))
        .route("/kpi/revenue-ytd-compare", get(revenue_ytd_compare))
        .route("/kpi/expenses-ytd-compare", get(expenses_ytd_compare))
        .route("/kpi/software-costs-percent", get(software_costs_percent))
        .route("/kpi/debug", get(debug))
        .with_state(state)
}

/// `{ "ok": true }` followed by the payload's fields.
fn ok_json<T: Serialize>(payload: T) -> Result<Json<Value>, AppError> {
    let mut body = Map::new();
    body.insert("ok".into(), Value::Bool(true));
    match serde_json::to_value(payload).map_err(|e| AppError::Internal(e.to_string()))? {
        Value::Object(fields) => body.extend(fields),
        other => {
            body.insert("data".into(), other);
        }
    }
    Ok(Json(Value::Object(body)))
}

// =============================================================================
// Health
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn debug_redirect() -> Redirect {
    Redirect::temporary("/kpi/debug")
}

/// GET /kpi/debug: What the credential store holds, without token values.
async fn debug(State(state): State<SharedState>) -> Json<Value> {
    let summary = state.store.summary(DEFAULT_USER_ID).await;
    Json(json!({ "ok": true, "storeSummary": summary }))
}

// =============================================================================
// OAuth Endpoints
// =============================================================================

#[derive(Deserialize)]
struct ConnectQuery {
    raw: Option<String>,
}

/// GET /xero/connect: Redirect to Xero's consent screen.
///
/// `?raw=true` or `Accept: application/json` returns the URL instead.
async fn connect(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(q): Query<ConnectQuery>,
) -> Result<Response, AppError> {
    // Build state parameter: userId:nonce:timestamp
    let timestamp = Utc::now().timestamp();
    let state_data = format!("{}:{}:{}", DEFAULT_USER_ID, StateSigner::nonce(), timestamp);
    let signed_state = state.signer.sign(&state_data)?;

    let consent_url =
        state
            .provider
            .auth_url(&state.config.scopes, &signed_state, &state.config.redirect_uri);
    info!(provider = state.provider.id(), "Consent URL built for {}", state.provider.display_name());

    let wants_json = q.raw.as_deref() == Some("true")
        || headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("application/json"));

    if wants_json {
        return Ok(Json(json!({ "consentUrl": consent_url })).into_response());
    }
    Ok(Redirect::temporary(&consent_url).into_response())
}

#[derive(Deserialize)]
struct OAuthCallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Verify a signed state and return the user id it was issued for.
fn verify_state(signer: &StateSigner, signed: Option<&str>) -> Result<String, AppError> {
    let signed = signed.ok_or_else(|| AppError::InvalidState("missing".into()))?;
    let state_data = signer.verify(signed)?;

    // Parse state: user_id:nonce:timestamp
    let parts: Vec<&str> = state_data.split(':').collect();
    if parts.len() != 3 {
        return Err(AppError::InvalidState("malformed".into()));
    }
    let timestamp: i64 = parts[2]
        .parse()
        .map_err(|_| AppError::InvalidState("invalid timestamp".into()))?;

    if Utc::now().timestamp() - timestamp > STATE_MAX_AGE_SECS {
        return Err(AppError::InvalidState("consent session expired".into()));
    }

    Ok(parts[0].to_string())
}

/// GET <REDIRECT_URI path>: Exchange the code and remember tokens + tenants.
async fn oauth_callback(
    State(state): State<SharedState>,
    Query(q): Query<OAuthCallbackQuery>,
) -> Result<Json<Value>, AppError> {
    if let Some(error) = q.error {
        warn!("Xero returned an error on callback: {error}");
        let message = match q.error_description {
            Some(detail) => format!("Xero returned an error: {error} {detail}"),
            None => format!("Xero returned an error: {error}"),
        };
        return Err(AppError::BadRequest(message));
    }

    let code = q
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("OAuth callback missing \"code\" param".into()))?;

    let user_id = verify_state(&state.signer, q.state.as_deref())?;

    let tokens = state
        .provider
        .exchange_code(&code, &state.config.redirect_uri)
        .await?;
    let tenants = state.provider.tenants(&tokens.access_token).await?;
    if tenants.is_empty() {
        warn!(user_id = %user_id, "Xero connection has no tenants, KPI calls will report not connected");
    }

    state.store.save(&user_id, tokens, tenants.clone()).await;
    info!(user_id = %user_id, tenants = tenants.len(), "Xero connected ✓");

    ok_json(json!({
        "message": "Xero connected. Tokens are held in memory; KPI endpoints are ready.",
        "tenants": tenants,
    }))
}

/// POST /xero/refresh: Exchange the stored refresh token now.
async fn refresh(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let stored = state
        .store
        .token_set(DEFAULT_USER_ID)
        .await
        .ok_or(AppError::NotConnected)?;
    let refresh_token = stored
        .refresh_token
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("No refresh token stored".into()))?;

    let mut fresh = state.provider.refresh_token(refresh_token).await?;
    if fresh.refresh_token.is_none() {
        fresh.refresh_token = stored.refresh_token.clone();
    }
    let expires_at = fresh.expires_at;
    state.store.replace_token_set(DEFAULT_USER_ID, fresh).await;
    info!("Refreshed token set saved");

    ok_json(json!({ "expiresAt": expires_at }))
}

// =============================================================================
// Fetch helpers
// =============================================================================

/// Every record of a list endpoint for the connected tenant.
async fn fetch_records(
    state: &SharedState,
    endpoint: &str,
    field: &str,
) -> Result<Vec<Value>, AppError> {
    let conn = state.store.get(DEFAULT_USER_ID).await?;
    let mut tokens = conn.token_set;
    state
        .pager()
        .fetch_all(
            &mut tokens,
            &conn.tenant_id,
            endpoint,
            &[],
            &CollectionField::named(field),
        )
        .await
}

async fn fetch_invoices(state: &SharedState) -> Result<Vec<Invoice>, AppError> {
    let records = fetch_records(state, INVOICES_ENDPOINT, "Invoices").await?;
    Ok(Invoice::from_records(records))
}

/// Send a write through the refresh gate for the connected tenant.
async fn post_to_xero(state: &SharedState, endpoint: &str, body: Value) -> Result<Value, AppError> {
    let conn = state.store.get(DEFAULT_USER_ID).await?;
    let mut tokens = conn.token_set;
    state
        .gate()
        .call(&mut tokens, &conn.tenant_id, &ApiRequest::post(endpoint, body))
        .await
}

// =============================================================================
// Query parameters
// =============================================================================

#[derive(Deserialize)]
struct RangeQuery {
    start: Option<String>,
    end: Option<String>,
}

impl RangeQuery {
    fn range(&self) -> Result<DateRange, AppError> {
        Ok(DateRange::new(
            parse_bound("start", self.start.as_deref())?,
            parse_bound("end", self.end.as_deref())?,
        ))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeriodsQuery {
    current_start: Option<String>,
    current_end: Option<String>,
    prev_start: Option<String>,
    prev_end: Option<String>,
}

impl PeriodsQuery {
    /// `(current, previous)` windows; all four bounds are required.
    fn windows(&self) -> Result<(DateRange, DateRange), AppError> {
        let required = |name: &str, raw: &Option<String>| -> Result<DateTime<Utc>, AppError> {
            parse_bound(name, raw.as_deref())?.ok_or_else(|| {
                AppError::BadRequest(
                    "Provide currentStart,currentEnd,prevStart,prevEnd as ISO dates".into(),
                )
            })
        };

        Ok((
            DateRange::between(
                required("currentStart", &self.current_start)?,
                required("currentEnd", &self.current_end)?,
            ),
            DateRange::between(
                required("prevStart", &self.prev_start)?,
                required("prevEnd", &self.prev_end)?,
            ),
        ))
    }
}

/// Parse a numeric JSON value or numeric string.
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse an optional JSON request body; empty means `{}`.
fn json_body(body: &Bytes) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {e}")))
}

// =============================================================================
// KPI Endpoints
// =============================================================================

/// GET /kpi/revenue-by-customer-month
async fn revenue_by_customer_month(
    State(state): State<SharedState>,
) -> Result<Json<Value>, AppError> {
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::revenue_by_customer_month(&invoices))
}

/// GET /kpi/gross-profit-margin?start&end
async fn gross_profit_margin(
    State(state): State<SharedState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Value>, AppError> {
    let range = q.range()?;
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::gross_profit_margin(&invoices, &range))
}

/// GET /kpi/net-profit-margin?start&end
async fn net_profit_margin(
    State(state): State<SharedState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Value>, AppError> {
    let range = q.range()?;
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::net_profit_margin(&invoices, &range))
}

/// GET /kpi/avg-rev-per-client?start&end
async fn avg_rev_per_client(
    State(state): State<SharedState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Value>, AppError> {
    let range = q.range()?;
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::avg_revenue_per_client(&invoices, &range))
}

#[derive(Deserialize)]
struct LtvQuery {
    #[serde(flatten)]
    range: RangeQuery,
    avg_lifespan_months: Option<String>,
}

/// GET /kpi/ltv?start&end&avg_lifespan_months
async fn ltv(
    State(state): State<SharedState>,
    Query(q): Query<LtvQuery>,
) -> Result<Json<Value>, AppError> {
    let range = q.range.range()?;
    let lifespan = match q.avg_lifespan_months.as_deref().filter(|s| !s.is_empty()) {
        None => metrics::DEFAULT_LIFESPAN_MONTHS,
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::BadRequest("avg_lifespan_months must be a number".into()))?,
    };
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::lifetime_value(&invoices, &range, lifespan))
}

#[derive(Deserialize)]
struct StaffQuery {
    staff_count: Option<String>,
}

/// GET /kpi/staff-to-client?staff_count
///
/// `staff_count` may also arrive in a JSON body; the query wins.
async fn staff_to_client(
    State(state): State<SharedState>,
    Query(q): Query<StaffQuery>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let body = json_body(&body)?;
    let staff_count = q
        .staff_count
        .as_deref()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|n| *n != 0.0)
        .or_else(|| number(body.get("staff_count")).filter(|n| *n != 0.0))
        .ok_or_else(|| AppError::BadRequest("Provide staff_count in query or body".into()))?;

    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::staff_to_client(&invoices, staff_count))
}

/// GET /kpi/revenue-growth?currentStart&currentEnd&prevStart&prevEnd
async fn revenue_growth(
    State(state): State<SharedState>,
    Query(q): Query<PeriodsQuery>,
) -> Result<Json<Value>, AppError> {
    let (current, previous) = q.windows()?;
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::revenue_growth(&invoices, &current, &previous))
}

/// GET /kpi/churn?currentStart&currentEnd&prevStart&prevEnd
async fn churn(
    State(state): State<SharedState>,
    Query(q): Query<PeriodsQuery>,
) -> Result<Json<Value>, AppError> {
    let (current, previous) = q.windows()?;
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::churn(&invoices, &previous, &current))
}

/// GET /kpi/total-customers
async fn total_customers(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let contacts = fetch_records(&state, CONTACTS_ENDPOINT, "Contacts").await?;
    ok_json(metrics::total_customers(&contacts))
}

/// GET /kpi/lost-customers?currentStart&currentEnd&prevStart&prevEnd
async fn lost_customers(
    State(state): State<SharedState>,
    Query(q): Query<PeriodsQuery>,
) -> Result<Json<Value>, AppError> {
    let (current, previous) = q.windows()?;
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::lost_customers(&invoices, &previous, &current))
}

/// GET /kpi/revenue-ytd-compare
async fn revenue_ytd_compare(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::revenue_ytd_compare(
        &invoices,
        Utc::now().date_naive(),
    ))
}

/// GET /kpi/expenses-ytd-compare
async fn expenses_ytd_compare(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::expenses_ytd_compare(
        &invoices,
        Utc::now().date_naive(),
    ))
}

#[derive(Deserialize)]
struct SoftwareQuery {
    #[serde(flatten)]
    range: RangeQuery,
    search: Option<String>,
}

/// GET /kpi/software-costs-percent?start&end&search
async fn software_costs_percent(
    State(state): State<SharedState>,
    Query(q): Query<SoftwareQuery>,
) -> Result<Json<Value>, AppError> {
    let range = q.range.range()?;
    let search = q.search.as_deref().filter(|s| !s.is_empty()).unwrap_or("software");
    let invoices = fetch_invoices(&state).await?;
    ok_json(metrics::software_costs_percent(&invoices, &range, search))
}

// =============================================================================
// Write Endpoints
// =============================================================================

/// Present and not null, false or an empty string.
fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// POST /xero/contacts: Create a contact. Body is a single Xero contact.
async fn create_contact(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let contact = json_body(&body)?;
    if !is_present(contact.get("Name")) {
        return Err(AppError::BadRequest("Provide contact payload with Name".into()));
    }

    let data = post_to_xero(&state, CONTACTS_ENDPOINT, json!({ "Contacts": [contact] })).await?;
    Ok((StatusCode::CREATED, Json(json!({ "ok": true, "data": data }))))
}

/// POST /xero/invoices: Create invoices. Accepts one invoice or `{"Invoices": [...]}`.
async fn create_invoice(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let payload = json_body(&body)?;
    if payload.as_object().is_some_and(Map::is_empty) {
        return Err(AppError::BadRequest("Missing invoice payload".into()));
    }

    let payload = if payload.get("Invoices").is_some() {
        payload
    } else {
        json!({ "Invoices": [payload] })
    };

    let invoices = payload["Invoices"]
        .as_array()
        .ok_or_else(|| AppError::BadRequest("Invoices must be an array".into()))?;
    let complete = invoices
        .iter()
        .all(|inv| is_present(inv.get("Type")) && is_present(inv.get("Contact")));
    if !complete {
        return Err(AppError::BadRequest("Each invoice needs Type and Contact".into()));
    }

    let data = post_to_xero(&state, INVOICES_ENDPOINT, payload).await?;
    Ok((StatusCode::CREATED, Json(json!({ "ok": true, "data": data }))))
}

#[derive(Deserialize)]
struct CacQuery {
    acquisition_cost: Option<String>,
    new_customers: Option<String>,
}

/// POST /xero/cac: Customer acquisition cost from body or query values.
async fn cac(Query(q): Query<CacQuery>, body: Bytes) -> Result<Json<Value>, AppError> {
    let body = json_body(&body)?;
    // Body values win over query values.
    let pick = |key: &str, query: &Option<String>| {
        number(body.get(key))
            .or_else(|| query.as_deref().and_then(|s| s.trim().parse().ok()))
            .filter(|n| *n != 0.0)
    };

    let (Some(acquisition_cost), Some(new_customers)) = (
        pick("acquisition_cost", &q.acquisition_cost),
        pick("new_customers", &q.new_customers),
    ) else {
        return Err(AppError::BadRequest(
            "Provide acquisition_cost and new_customers (body or query)".into(),
        ));
    };

    ok_json(metrics::cac(acquisition_cost, new_customers))
}

/// POST /xero/billable-hours: Totals over `{"timeEntries": [...]}`.
async fn billable_hours(body: Bytes) -> Result<Json<Value>, AppError> {
    let body = json_body(&body)?;
    let entries = body
        .get("timeEntries")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::BadRequest("Send timeEntries array in body".into()))?;

    let entries: Vec<TimeEntry> = entries
        .iter()
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
        .collect();

    ok_json(metrics::billable_hours(&entries))
}
