//! Calls into the Xero accounting API.
//!
//! - `client`: one authenticated request, errors carry Xero's payload
//! - `gate`  : single refresh-and-retry on 401
//! - `paging`: walks `?page=N` list endpoints into one collection

pub mod client;
pub mod gate;
pub mod paging;

pub use client::{http_client, ApiClient, ApiRequest};
pub use gate::TokenGate;
pub use paging::{CollectionField, PagedFetch, DEFAULT_PAGE_SIZE};

/// List/create endpoint for sales invoices and bills.
pub const INVOICES_ENDPOINT: &str = "api.xro/2.0/Invoices";
/// List/create endpoint for contacts.
pub const CONTACTS_ENDPOINT: &str = "api.xro/2.0/Contacts";
