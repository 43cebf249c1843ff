/*!
 * Per-row monetary total derivation
 *
 * Utilization extracts publish money either as true per-row totals
 * (`Tot_Mdcr_Pymt_Amt`) or as per-event averages (`Avg_Mdcr_Pymt_Amt`).
 * A resolved total column is always taken verbatim; only when no total
 * column exists for a measure is the average multiplied by the row's
 * service count, and that row is flagged so downstream consumers can
 * label the figure as derived.
 */

use crate::data_types::DerivedFlags;
use crate::schema::{ColumnRole, RoleMap};

/// Monetary measures for one source row, with provenance flags
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RowTotals {
    pub submitted: Option<f64>,
    pub allowed: Option<f64>,
    pub payment: Option<f64>,
    pub derived: DerivedFlags,
}

/// Parse a numeric cell as published by CMS: optional "$" and thousands
/// separators, blank or non-numeric -> None
pub fn parse_numeric(cell: &str) -> Option<f64> {
    let cleaned: String = cell
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn one_measure(
    record: &csv::StringRecord,
    roles: &RoleMap,
    total_role: ColumnRole,
    avg_role: ColumnRole,
    services: f64,
) -> (Option<f64>, bool) {
    // Column-level decision: a resolved total column owns the measure even
    // when an individual cell fails to parse.
    if roles.get(total_role).is_some() {
        let value = roles.cell(record, total_role).and_then(parse_numeric);
        return (value, false);
    }
    if roles.get(avg_role).is_some() {
        return match roles.cell(record, avg_role).and_then(parse_numeric) {
            Some(avg) => (Some(avg * services), true),
            None => (None, false),
        };
    }
    (None, false)
}

/// Derive the three monetary measures for one record
pub fn derive_totals(record: &csv::StringRecord, roles: &RoleMap, services: f64) -> RowTotals {
    let (submitted, d_sub) = one_measure(
        record,
        roles,
        ColumnRole::TotalSubmitted,
        ColumnRole::AvgSubmitted,
        services,
    );
    let (allowed, d_alw) = one_measure(
        record,
        roles,
        ColumnRole::TotalAllowed,
        ColumnRole::AvgAllowed,
        services,
    );
    let (payment, d_pay) = one_measure(
        record,
        roles,
        ColumnRole::TotalPayment,
        ColumnRole::AvgPayment,
        services,
    );
    RowTotals {
        submitted,
        allowed,
        payment,
        derived: DerivedFlags {
            submitted: d_sub,
            allowed: d_alw,
            payment: d_pay,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ExtractKind;

    fn resolve(headers: &[&str]) -> RoleMap {
        let h: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
        RoleMap::resolve(&h, ExtractKind::Billing).unwrap()
    }

    fn record(cells: &[&str]) -> csv::StringRecord {
        csv::StringRecord::from(cells.to_vec())
    }

    #[test]
    fn test_parse_numeric_handles_cms_formatting() {
        assert_eq!(parse_numeric("1,234.5"), Some(1234.5));
        assert_eq!(parse_numeric("$89.10"), Some(89.1));
        assert_eq!(parse_numeric("  42 "), Some(42.0));
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("N/A"), None);
    }

    #[test]
    fn test_total_column_taken_verbatim() {
        let roles = resolve(&["NPI", "HCPCS_Cd", "Tot_Mdcr_Pymt_Amt", "Avg_Mdcr_Pymt_Amt"]);
        let rec = record(&["1", "77080", "500.00", "999.00"]);
        let totals = derive_totals(&rec, &roles, 10.0);
        assert_eq!(totals.payment, Some(500.0));
        assert!(!totals.derived.payment);
    }

    #[test]
    fn test_average_fallback_multiplies_and_flags() {
        let roles = resolve(&["NPI", "HCPCS_Cd", "Tot_Srvcs", "Avg_Mdcr_Pymt_Amt"]);
        let rec = record(&["1", "77080", "50", "89.10"]);
        let totals = derive_totals(&rec, &roles, 50.0);
        assert!((totals.payment.unwrap() - 4455.0).abs() < 1e-6);
        assert!(totals.derived.payment);
        assert_eq!(totals.submitted, None);
        assert!(!totals.derived.submitted);
    }

    #[test]
    fn test_total_column_owns_measure_even_when_cell_is_bad() {
        let roles = resolve(&["NPI", "HCPCS_Cd", "Tot_Mdcr_Pymt_Amt", "Avg_Mdcr_Pymt_Amt"]);
        let rec = record(&["1", "77080", "not-a-number", "89.10"]);
        let totals = derive_totals(&rec, &roles, 50.0);
        assert_eq!(totals.payment, None);
        assert!(!totals.derived.payment);
    }

    #[test]
    fn test_unparseable_average_yields_none_without_flag() {
        let roles = resolve(&["NPI", "HCPCS_Cd", "Avg_Mdcr_Pymt_Amt"]);
        let rec = record(&["1", "77080", "suppressed"]);
        let totals = derive_totals(&rec, &roles, 50.0);
        assert_eq!(totals.payment, None);
        assert!(!totals.derived.payment);
    }

    #[test]
    fn test_flags_are_independent_per_measure() {
        let roles = resolve(&[
            "NPI",
            "HCPCS_Cd",
            "Tot_Sbmtd_Chrg_Amt",
            "Avg_Mdcr_Alowd_Amt",
            "Avg_Mdcr_Pymt_Amt",
        ]);
        let rec = record(&["1", "77080", "1000.00", "20.00", "10.00"]);
        let totals = derive_totals(&rec, &roles, 5.0);
        assert_eq!(totals.submitted, Some(1000.0));
        assert!(!totals.derived.submitted);
        assert_eq!(totals.allowed, Some(100.0));
        assert!(totals.derived.allowed);
        assert_eq!(totals.payment, Some(50.0));
        assert!(totals.derived.payment);
    }
}
