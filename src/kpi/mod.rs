//! Business KPIs computed from fetched Xero records.

pub mod metrics;
pub mod records;

pub use records::{parse_bound, parse_xero_date, DateRange, Invoice, TimeEntry};
