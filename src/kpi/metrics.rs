//! Pure aggregation routines. Each one takes already-fetched records and
//! returns the fields of one KPI response.
//!
//! Ratios whose denominator is zero are `None` (rendered as `null`).

use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use super::records::{parse_xero_date, DateRange, Invoice, TimeEntry};

/// At most this many lost client ids are listed in a response.
pub const LOST_CUSTOMERS_LIMIT: usize = 100;

pub const DEFAULT_LIFESPAN_MONTHS: f64 = 36.0;

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

fn sales<'a>(invoices: &'a [Invoice], range: &'a DateRange) -> impl Iterator<Item = &'a Invoice> {
    invoices.iter().filter(move |i| i.is_sale() && range.contains(i))
}

fn bills<'a>(invoices: &'a [Invoice], range: &'a DateRange) -> impl Iterator<Item = &'a Invoice> {
    invoices.iter().filter(move |i| i.is_bill() && range.contains(i))
}

fn total<'a>(invoices: impl Iterator<Item = &'a Invoice>) -> f64 {
    invoices.map(|i| i.total).sum()
}

/// Distinct client keys in first-seen order.
fn clients<'a>(invoices: impl Iterator<Item = &'a Invoice>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    invoices
        .filter_map(Invoice::client_key)
        .filter(|key| seen.insert(*key))
        .collect()
}

// ── Revenue by customer ─────────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueByCustomerMonth {
    /// contact name → `YYYY-MM` → revenue
    pub data: BTreeMap<String, BTreeMap<String, f64>>,
    pub invoice_count: usize,
}

pub fn revenue_by_customer_month(invoices: &[Invoice]) -> RevenueByCustomerMonth {
    let mut data: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();

    for invoice in invoices.iter().filter(|i| i.is_sale()) {
        let Some(date) = invoice.record_date() else {
            continue;
        };
        let month = format!("{}-{:02}", date.year(), date.month());
        *data
            .entry(invoice.contact_name().to_string())
            .or_default()
            .entry(month)
            .or_default() += invoice.total;
    }

    RevenueByCustomerMonth {
        data,
        invoice_count: invoices.len(),
    }
}

// ── Margins ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrossProfitMargin {
    pub revenue: f64,
    pub costs: f64,
    pub gross_profit: f64,
    pub gross_profit_margin: Option<f64>,
}

pub fn gross_profit_margin(invoices: &[Invoice], range: &DateRange) -> GrossProfitMargin {
    let revenue = total(sales(invoices, range));
    let costs = total(bills(invoices, range));
    let gross_profit = revenue - costs;

    GrossProfitMargin {
        revenue,
        costs,
        gross_profit,
        gross_profit_margin: ratio(gross_profit, revenue),
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetProfitMargin {
    pub revenue: f64,
    pub expenses: f64,
    pub net_profit: f64,
    pub net_profit_margin: Option<f64>,
}

pub fn net_profit_margin(invoices: &[Invoice], range: &DateRange) -> NetProfitMargin {
    let revenue = total(sales(invoices, range));
    let expenses = total(bills(invoices, range));
    let net_profit = revenue - expenses;

    NetProfitMargin {
        revenue,
        expenses,
        net_profit,
        net_profit_margin: ratio(net_profit, revenue),
    }
}

// ── Per-client revenue ──────────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvgRevenuePerClient {
    pub revenue: f64,
    pub client_count: usize,
    pub avg_revenue_per_client: f64,
}

pub fn avg_revenue_per_client(invoices: &[Invoice], range: &DateRange) -> AvgRevenuePerClient {
    let revenue = total(sales(invoices, range));
    let client_count = clients(sales(invoices, range)).len();

    AvgRevenuePerClient {
        revenue,
        client_count,
        avg_revenue_per_client: ratio(revenue, client_count as f64).unwrap_or(0.0),
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifetimeValue {
    pub revenue: f64,
    pub client_count: usize,
    pub avg_monthly_revenue_per_client: f64,
    #[serde(rename = "avg_lifespan_months")]
    pub avg_lifespan_months: f64,
    pub ltv_per_client: f64,
}

pub fn lifetime_value(invoices: &[Invoice], range: &DateRange, avg_lifespan_months: f64) -> LifetimeValue {
    let revenue = total(sales(invoices, range));
    let client_count = clients(sales(invoices, range)).len();
    let avg_monthly_revenue_per_client = ratio(revenue, client_count as f64)
        .map(|per_client| per_client / range.months())
        .unwrap_or(0.0);

    LifetimeValue {
        revenue,
        client_count,
        avg_monthly_revenue_per_client,
        avg_lifespan_months,
        ltv_per_client: avg_monthly_revenue_per_client * avg_lifespan_months,
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StaffToClient {
    #[serde(rename = "staff_count")]
    pub staff_count: f64,
    pub client_count: usize,
    #[serde(rename = "staff_to_client_ratio")]
    pub staff_to_client_ratio: Option<f64>,
}

pub fn staff_to_client(invoices: &[Invoice], staff_count: f64) -> StaffToClient {
    let client_count = clients(sales(invoices, &DateRange::unbounded())).len();

    StaffToClient {
        staff_count,
        client_count,
        staff_to_client_ratio: ratio(staff_count, client_count as f64),
    }
}

// ── Growth & churn ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueGrowth {
    pub current_revenue: f64,
    pub prev_revenue: f64,
    pub growth_rate: Option<f64>,
}

pub fn revenue_growth(invoices: &[Invoice], current: &DateRange, previous: &DateRange) -> RevenueGrowth {
    let current_revenue = total(sales(invoices, current));
    let prev_revenue = total(sales(invoices, previous));

    RevenueGrowth {
        current_revenue,
        prev_revenue,
        growth_rate: ratio(current_revenue - prev_revenue, prev_revenue),
    }
}

/// Clients billed in `previous` but not in `current`, in first-seen order,
/// plus the size of both client sets.
fn lost_clients<'a>(
    invoices: &'a [Invoice],
    previous: &'a DateRange,
    current: &'a DateRange,
) -> (Vec<&'a str>, usize, usize) {
    let prev_clients = clients(sales(invoices, previous));
    let current_clients = clients(sales(invoices, current));
    let current_set: HashSet<&str> = current_clients.iter().copied().collect();

    let lost = prev_clients
        .iter()
        .copied()
        .filter(|client| !current_set.contains(client))
        .collect();

    (lost, prev_clients.len(), current_clients.len())
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Churn {
    pub prev_clients: usize,
    pub current_clients: usize,
    pub lost_customers: usize,
    pub churn_rate: Option<f64>,
}

pub fn churn(invoices: &[Invoice], previous: &DateRange, current: &DateRange) -> Churn {
    let (lost, prev_clients, current_clients) = lost_clients(invoices, previous, current);

    Churn {
        prev_clients,
        current_clients,
        lost_customers: lost.len(),
        churn_rate: ratio(lost.len() as f64, prev_clients as f64),
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LostCustomers {
    pub lost_customers_count: usize,
    pub lost_customers: Vec<String>,
}

pub fn lost_customers(invoices: &[Invoice], previous: &DateRange, current: &DateRange) -> LostCustomers {
    let (lost, _, _) = lost_clients(invoices, previous, current);

    LostCustomers {
        lost_customers_count: lost.len(),
        lost_customers: lost
            .into_iter()
            .take(LOST_CUSTOMERS_LIMIT)
            .map(str::to_string)
            .collect(),
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TotalCustomers {
    pub total_customers: usize,
}

pub fn total_customers(contacts: &[Value]) -> TotalCustomers {
    TotalCustomers {
        total_customers: contacts.len(),
    }
}

// ── Year to date ────────────────────────────────────────────────────────

/// Jan 1 → `today` this year, and the same window one year earlier.
/// Feb 29 maps to Feb 28 in a non-leap previous year.
pub fn ytd_windows(today: NaiveDate) -> (DateRange, DateRange) {
    let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    let jan_first = |year: i32| NaiveDate::from_ymd_opt(year, 1, 1);

    let prev_year = today.year() - 1;
    let prev_today = NaiveDate::from_ymd_opt(prev_year, today.month(), today.day())
        .or_else(|| NaiveDate::from_ymd_opt(prev_year, today.month(), today.day() - 1));

    let current = DateRange::new(jan_first(today.year()).and_then(midnight), midnight(today));
    let previous = DateRange::new(
        jan_first(prev_year).and_then(midnight),
        prev_today.and_then(midnight),
    );
    (current, previous)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RevenueYtd {
    #[serde(rename = "currentYTD")]
    pub current: f64,
    #[serde(rename = "prevYTD")]
    pub previous: f64,
    #[serde(rename = "percentChange")]
    pub percent_change: Option<f64>,
}

pub fn revenue_ytd_compare(invoices: &[Invoice], today: NaiveDate) -> RevenueYtd {
    let (current_window, previous_window) = ytd_windows(today);
    let current = total(sales(invoices, &current_window));
    let previous = total(sales(invoices, &previous_window));

    RevenueYtd {
        current,
        previous,
        percent_change: ratio(current - previous, previous),
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ExpensesYtd {
    #[serde(rename = "currentYTDExpenses")]
    pub current: f64,
    #[serde(rename = "prevYTDExpenses")]
    pub previous: f64,
    #[serde(rename = "percentChange")]
    pub percent_change: Option<f64>,
}

pub fn expenses_ytd_compare(invoices: &[Invoice], today: NaiveDate) -> ExpensesYtd {
    let (current_window, previous_window) = ytd_windows(today);
    let current = total(bills(invoices, &current_window));
    let previous = total(bills(invoices, &previous_window));

    ExpensesYtd {
        current,
        previous,
        percent_change: ratio(current - previous, previous),
    }
}

// ── Software spend ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareCosts {
    pub software_total: f64,
    pub revenue: f64,
    pub percent_of_revenue: Option<f64>,
}

/// Bills whose contact name or any line description contains `search`
/// (case-insensitive), as a share of revenue over the same window.
pub fn software_costs_percent(invoices: &[Invoice], range: &DateRange, search: &str) -> SoftwareCosts {
    let needle = search.to_lowercase();
    let matches = |text: Option<&str>| text.unwrap_or_default().to_lowercase().contains(&needle);

    let software_total = total(bills(invoices, range).filter(|bill| {
        matches(bill.contact.as_ref().and_then(|c| c.name.as_deref()))
            || bill
                .line_items()
                .iter()
                .any(|line| matches(line.description.as_deref()))
    }));
    let revenue = total(sales(invoices, range));

    SoftwareCosts {
        software_total,
        revenue,
        percent_of_revenue: ratio(software_total, revenue),
    }
}

// ── Inputs supplied by the caller ───────────────────────────────────────

#[derive(Debug, Serialize, PartialEq)]
pub struct Cac {
    pub acquisition_cost: f64,
    pub new_customers: f64,
    pub cac: f64,
}

/// Customer acquisition cost. Callers reject a zero `new_customers`.
pub fn cac(acquisition_cost: f64, new_customers: f64) -> Cac {
    Cac {
        acquisition_cost,
        new_customers,
        cac: acquisition_cost / new_customers,
    }
}

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyHours {
    pub total_hours: f64,
    pub billable_hours: f64,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BillableHours {
    pub total_billable_hours: f64,
    pub monthly: BTreeMap<String, MonthlyHours>,
}

pub fn billable_hours(entries: &[TimeEntry]) -> BillableHours {
    let total_billable_hours = entries.iter().filter(|t| t.billable).map(|t| t.hours).sum();

    let mut monthly: BTreeMap<String, MonthlyHours> = BTreeMap::new();
    for entry in entries {
        let Some(date) = entry.date.as_deref().and_then(parse_xero_date) else {
            continue;
        };
        let bucket = monthly
            .entry(format!("{}-{:02}", date.year(), date.month()))
            .or_default();
        bucket.total_hours += entry.hours;
        if entry.billable {
            bucket.billable_hours += entry.hours;
        }
    }

    BillableHours {
        total_billable_hours,
        monthly,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::records::{ContactRef, LineItem};
    use chrono::{TimeZone, Utc};

    fn invoice(kind: &str, contact: &str, date: &str, amount: f64) -> Invoice {
        Invoice {
            kind: kind.into(),
            contact: Some(ContactRef {
                contact_id: Some(format!("id-{contact}")),
                name: Some(contact.into()),
            }),
            date: Some(date.into()),
            due_date: None,
            total: amount,
            line_items: None,
        }
    }

    fn range(start: &str, end: &str) -> DateRange {
        let parse = |s: &str| parse_xero_date(s).unwrap();
        DateRange::between(parse(start), parse(end))
    }

    fn ledger() -> Vec<Invoice> {
        vec![
            invoice("ACCREC", "Acme", "2024-01-10", 100.0),
            invoice("ACCREC", "Acme", "2024-01-20", 50.0),
            invoice("ACCREC", "Globex", "2024-02-05", 200.0),
            invoice("ACCPAY", "Landlord", "2024-01-01", 80.0),
            invoice("ACCPAY", "Figma Software", "2024-02-01", 20.0),
            invoice("ACCREC", "Initech", "2023-12-15", 70.0),
        ]
    }

    #[test]
    fn test_revenue_by_customer_month() {
        let result = revenue_by_customer_month(&ledger());
        assert_eq!(result.invoice_count, 6);
        assert_eq!(result.data["Acme"]["2024-01"], 150.0);
        assert_eq!(result.data["Globex"]["2024-02"], 200.0);
        assert!(!result.data.contains_key("Landlord"));
    }

    #[test]
    fn test_gross_profit_margin_in_range() {
        let result = gross_profit_margin(&ledger(), &range("2024-01-01", "2024-02-29"));
        assert_eq!(result.revenue, 350.0);
        assert_eq!(result.costs, 100.0);
        assert_eq!(result.gross_profit, 250.0);
        assert_eq!(result.gross_profit_margin, Some(250.0 / 350.0));
    }

    #[test]
    fn test_margin_without_revenue_is_null() {
        let result = net_profit_margin(&ledger(), &range("2030-01-01", "2030-12-31"));
        assert_eq!(result.revenue, 0.0);
        assert_eq!(result.net_profit_margin, None);
    }

    #[test]
    fn test_avg_revenue_and_ltv() {
        let all = DateRange::unbounded();
        let avg = avg_revenue_per_client(&ledger(), &all);
        assert_eq!(avg.client_count, 3);
        assert_eq!(avg.avg_revenue_per_client, 420.0 / 3.0);

        let ltv = lifetime_value(&ledger(), &all, DEFAULT_LIFESPAN_MONTHS);
        assert_eq!(ltv.avg_monthly_revenue_per_client, 140.0);
        assert_eq!(ltv.ltv_per_client, 140.0 * 36.0);
    }

    #[test]
    fn test_staff_to_client() {
        let result = staff_to_client(&ledger(), 6.0);
        assert_eq!(result.client_count, 3);
        assert_eq!(result.staff_to_client_ratio, Some(2.0));
        assert_eq!(staff_to_client(&[], 6.0).staff_to_client_ratio, None);
    }

    #[test]
    fn test_revenue_growth() {
        let result = revenue_growth(
            &ledger(),
            &range("2024-02-01", "2024-02-29"),
            &range("2024-01-01", "2024-01-31"),
        );
        assert_eq!(result.current_revenue, 200.0);
        assert_eq!(result.prev_revenue, 150.0);
        assert_eq!(result.growth_rate, Some(50.0 / 150.0));
    }

    #[test]
    fn test_churn_and_lost_customers() {
        let previous = range("2023-12-01", "2024-01-31");
        let current = range("2024-02-01", "2024-02-29");

        let churned = churn(&ledger(), &previous, &current);
        assert_eq!(churned.prev_clients, 2);
        assert_eq!(churned.current_clients, 1);
        assert_eq!(churned.lost_customers, 2);
        assert_eq!(churned.churn_rate, Some(1.0));

        let lost = lost_customers(&ledger(), &previous, &current);
        assert_eq!(lost.lost_customers_count, 2);
        assert_eq!(lost.lost_customers, vec!["id-Acme", "id-Initech"]);
    }

    #[test]
    fn test_ytd_windows_handle_leap_day() {
        let (current, previous) = ytd_windows(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(current.start, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(current.end, Some(Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()));
        assert_eq!(previous.end, Some(Utc.with_ymd_and_hms(2023, 2, 28, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_ytd_compare() {
        let mut invoices = ledger();
        invoices.push(invoice("ACCREC", "Acme", "2023-01-15", 75.0));
        invoices.push(invoice("ACCPAY", "Landlord", "2023-01-05", 40.0));
        let today = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();

        let revenue = revenue_ytd_compare(&invoices, today);
        assert_eq!(revenue.current, 350.0);
        assert_eq!(revenue.previous, 75.0);
        assert_eq!(revenue.percent_change, Some((350.0 - 75.0) / 75.0));

        let expenses = expenses_ytd_compare(&invoices, today);
        assert_eq!(expenses.current, 100.0);
        assert_eq!(expenses.previous, 40.0);
    }

    #[test]
    fn test_software_costs_match_contact_or_line_items() {
        let mut invoices = ledger();
        let mut tooling = invoice("ACCPAY", "Hardware Store", "2024-01-15", 30.0);
        tooling.line_items = Some(vec![LineItem {
            description: Some("Annual SOFTWARE licence".into()),
        }]);
        invoices.push(tooling);

        let result = software_costs_percent(&invoices, &DateRange::unbounded(), "software");
        assert_eq!(result.software_total, 50.0);
        assert_eq!(result.revenue, 420.0);
        assert_eq!(result.percent_of_revenue, Some(50.0 / 420.0));
    }

    #[test]
    fn test_cac_and_billable_hours() {
        assert_eq!(cac(1000.0, 4.0).cac, 250.0);

        let entries = vec![
            TimeEntry { billable: true, hours: 5.0, date: Some("2024-01-03".into()) },
            TimeEntry { billable: false, hours: 2.0, date: Some("2024-01-04".into()) },
            TimeEntry { billable: true, hours: 1.5, date: None },
        ];
        let result = billable_hours(&entries);
        assert_eq!(result.total_billable_hours, 6.5);
        assert_eq!(
            result.monthly["2024-01"],
            MonthlyHours { total_hours: 7.0, billable_hours: 5.0 }
        );
        assert_eq!(result.monthly.len(), 1);
    }

    #[test]
    fn test_serialized_field_names() {
        let value = serde_json::to_value(staff_to_client(&ledger(), 3.0)).unwrap();
        assert!(value.get("staff_count").is_some());
        assert!(value.get("clientCount").is_some());
        assert!(value.get("staff_to_client_ratio").is_some());

        let value = serde_json::to_value(revenue_ytd_compare(&[], NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())).unwrap();
        assert!(value.get("currentYTD").is_some());
        assert_eq!(value["percentChange"], Value::Null);
    }
}
