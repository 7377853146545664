use serde_json::Value;
use tracing::debug;

use super::client::ApiRequest;
use super::gate::TokenGate;
use crate::error::AppError;
use crate::providers::TokenSet;

/// Xero list endpoints return 100 records per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Which part of a page response holds the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionField {
    /// The first array-valued top-level field, in response order.
    First,
    /// A specific top-level field, e.g. `Invoices`.
    Named(String),
}

impl CollectionField {
    pub fn named(name: impl Into<String>) -> Self {
        CollectionField::Named(name.into())
    }
}

/// Pull the record array out of a page body. `None` when there is none.
pub fn take_collection(body: Value, field: &CollectionField) -> Option<Vec<Value>> {
    let Value::Object(map) = body else {
        return None;
    };

    match field {
        CollectionField::First => map.into_iter().find_map(|(_, value)| match value {
            Value::Array(items) => Some(items),
            _ => None,
        }),
        CollectionField::Named(name) => {
            map.into_iter()
                .find(|(key, _)| key == name)
                .and_then(|(_, value)| match value {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
        }
    }
}

/// Sequential `?page=N` walker over a list endpoint.
///
/// Pages are requested one after another starting at 1. A page that is
/// missing its collection, is empty, or holds fewer than `page_size`
/// records ends the walk. That assumes only the last page is ever short; a
/// full last page costs one extra request that comes back empty.
pub struct PagedFetch<'a> {
    gate: TokenGate<'a>,
    page_size: usize,
}

impl<'a> PagedFetch<'a> {
    pub fn new(gate: TokenGate<'a>, page_size: usize) -> Self {
        Self { gate, page_size }
    }

    /// Fetch every page of `endpoint` and concatenate the records in order.
    pub async fn fetch_all(
        &self,
        token_set: &mut TokenSet,
        tenant_id: &str,
        endpoint: &str,
        params: &[(String, String)],
        field: &CollectionField,
    ) -> Result<Vec<Value>, AppError> {
        let params: Vec<(String, String)> = params
            .iter()
            .filter(|(key, _)| key != "page")
            .cloned()
            .collect();

        let mut records = Vec::new();
        let mut page: u32 = 1;

        loop {
            let request = ApiRequest::get(endpoint)
                .with_params(&params)
                .with_query("page", page.to_string());
            let body = self.gate.call(token_set, tenant_id, &request).await?;

            let Some(items) = take_collection(body, field) else {
                debug!(endpoint, page, "page has no collection, stopping");
                break;
            };

            let count = items.len();
            records.extend(items);
            debug!(endpoint, page, count, total = records.len(), "fetched page");

            if count == 0 || count < self.page_size {
                break;
            }
            page += 1;
        }

        Ok(records)
    }
}
