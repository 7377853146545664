//! HTTP surface for xero-kpi.
//!
//! - OAuth flow: `/xero/connect`, the callback, `/xero/refresh`
//! - KPIs over fetched invoices/contacts: `/kpi/*`
//! - Writes forwarded to Xero: `/xero/contacts`, `/xero/invoices`
//! - KPIs over posted inputs: `/xero/cac`, `/xero/billable-hours`
//! - `/health`, `/debug`

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::app_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
