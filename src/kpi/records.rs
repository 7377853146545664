use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::error::AppError;

pub const SALE: &str = "ACCREC";
pub const BILL: &str = "ACCPAY";

/// The parts of a Xero invoice the KPIs look at.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Invoice {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(default)]
    pub contact: Option<ContactRef>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total: f64,
    #[serde(default)]
    pub line_items: Option<Vec<LineItem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactRef {
    #[serde(rename = "ContactID", default)]
    pub contact_id: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItem {
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
}

impl Invoice {
    /// Deserialize fetched records, skipping (and logging) any that don't fit.
    pub fn from_records(records: Vec<Value>) -> Vec<Invoice> {
        records
            .into_iter()
            .filter_map(|record| match serde_json::from_value(record) {
                Ok(invoice) => Some(invoice),
                Err(e) => {
                    warn!("skipping malformed invoice record: {e}");
                    None
                }
            })
            .collect()
    }

    pub fn is_sale(&self) -> bool {
        self.kind == SALE
    }

    pub fn is_bill(&self) -> bool {
        self.kind == BILL
    }

    /// Identity used to count distinct clients: contact id, else contact name.
    pub fn client_key(&self) -> Option<&str> {
        let contact = self.contact.as_ref()?;
        non_empty(contact.contact_id.as_deref()).or_else(|| non_empty(contact.name.as_deref()))
    }

    pub fn contact_name(&self) -> &str {
        self.contact
            .as_ref()
            .and_then(|c| non_empty(c.name.as_deref()))
            .unwrap_or("Unknown")
    }

    /// The invoice date, falling back to the due date when there is none.
    pub fn record_date(&self) -> Option<DateTime<Utc>> {
        non_empty(self.date.as_deref())
            .or_else(|| non_empty(self.due_date.as_deref()))
            .and_then(parse_xero_date)
    }

    pub fn line_items(&self) -> &[LineItem] {
        self.line_items.as_deref().unwrap_or_default()
    }
}

/// One entry of a timesheet posted to the billable-hours endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeEntry {
    #[serde(default, deserialize_with = "truthy")]
    pub billable: bool,
    #[serde(default, deserialize_with = "lenient_number")]
    pub hours: f64,
    #[serde(default)]
    pub date: Option<String>,
}

/// Inclusive date window. An unbounded window matches every record, even
/// ones without a usable date.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(Some(start), Some(end))
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, invoice: &Invoice) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(date) = invoice.record_date() else {
            return false;
        };
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }

    /// Length in 30-day months, at least 1. Open-ended windows count as 1.
    pub fn months(&self) -> f64 {
        match (self.start, self.end) {
            (Some(start), Some(end)) => {
                let days = (end - start).num_milliseconds() as f64 / 86_400_000.0;
                (days / 30.0).max(1.0)
            }
            _ => 1.0,
        }
    }
}

/// Parse the date formats Xero emits: `/Date(1518685950940+0000)/`,
/// RFC 3339, `YYYY-MM-DDTHH:MM:SS[.fff]` (taken as UTC) and `YYYY-MM-DD`.
pub fn parse_xero_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Some(inner) = raw.strip_prefix("/Date(").and_then(|s| s.strip_suffix(")/")) {
        let millis_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map(|(i, _)| i)
            .unwrap_or(inner.len());
        let millis: i64 = inner[..millis_end].parse().ok()?;
        return Utc.timestamp_millis_opt(millis).single();
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Parse a date supplied by an API caller. Missing or blank is `None`.
pub fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    match non_empty(raw) {
        None => Ok(None),
        Some(value) => parse_xero_date(value).map(Some).ok_or_else(|| {
            AppError::BadRequest(format!("{name} must be an ISO date (YYYY-MM-DD), got {value:?}"))
        }),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Accept numbers, numeric strings and null. Anything else counts as zero.
fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// Accept any JSON value as a flag: `0`, `""`, `false` and null are false.
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}
