/*!
 * Code-family routing and per-provider merging
 *
 * Letter-prefixed HCPCS codes are billed through the referral extract and
 * numeric CPT codes through the billing extract. A mixed request splits
 * into two independent scans (run via `rayon::join` when the `parallel`
 * feature is on) whose provider summaries merge afterwards, one row per
 * NPI regardless of how many families a provider appears in.
 */

use std::collections::HashMap;

use crate::aggregate::AggregationResult;
use crate::data_types::{CodeFamily, CodeVolumeMap, Npi, ProviderCodeAggregate, ProviderSummary};
use crate::error::{PufError, Result};
use crate::rollup::{format_code_breakdown, truncate_with_ellipsis};

/// The outcome of splitting a normalized code list by family
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutedCodes {
    pub cpt: Vec<String>,
    pub hcpcs: Vec<String>,
}

/// Split normalized codes into their extract families, preserving order
pub fn split_codes(codes: &[String]) -> RoutedCodes {
    let mut routed = RoutedCodes::default();
    for code in codes {
        match CodeFamily::classify(code) {
            CodeFamily::Cpt => routed.cpt.push(code.clone()),
            CodeFamily::Hcpcs => routed.hcpcs.push(code.clone()),
        }
    }
    routed
}

/// Run the two family scans, in parallel when built with the `parallel`
/// feature. Either closure may be a no-op for an empty family.
pub fn scan_families<A, B, RA, RB>(cpt_scan: A, hcpcs_scan: B) -> (Result<RA>, Result<RB>)
where
    A: FnOnce() -> Result<RA> + Send,
    B: FnOnce() -> Result<RB> + Send,
    RA: Send,
    RB: Send,
{
    #[cfg(feature = "parallel")]
    {
        rayon::join(cpt_scan, hcpcs_scan)
    }
    #[cfg(not(feature = "parallel"))]
    {
        (cpt_scan(), hcpcs_scan())
    }
}

/// Convert a dataset-level miss into the canonical empty result.
///
/// A family whose source extract is absent contributes nothing rather than
/// failing the whole query; every other error still propagates.
pub fn empty_on_unavailable(result: Result<AggregationResult>) -> Result<AggregationResult> {
    match result {
        Err(PufError::DatasetUnavailable { path, .. }) => {
            tracing::warn!(path = %path.display(), "extract missing; family contributes nothing");
            Ok(AggregationResult {
                rows: Vec::new(),
                metric: crate::aggregate::RankMetric::Services,
                truncated: false,
            })
        }
        other => other,
    }
}

/// Collapse (provider, code) aggregates into one summary row per provider,
/// in first-encountered provider order
pub fn summarize_providers(aggregates: &[ProviderCodeAggregate]) -> Vec<ProviderSummary> {
    let mut index: HashMap<Npi, usize> = HashMap::new();
    let mut summaries: Vec<ProviderSummary> = Vec::new();
    let mut volumes: Vec<CodeVolumeMap> = Vec::new();

    for agg in aggregates {
        let idx = match index.get(&agg.npi) {
            Some(&idx) => idx,
            None => {
                let idx = summaries.len();
                index.insert(agg.npi.clone(), idx);
                summaries.push(ProviderSummary {
                    npi: agg.npi.clone(),
                    doctor_name: agg.name.clone(),
                    specialty: agg.specialty.clone(),
                    city: agg.city.clone(),
                    state: agg.state.clone(),
                    primary_hospital_name: None,
                    primary_hospital_city: None,
                    primary_hospital_state: None,
                    hospital_summary: None,
                    total_services: 0.0,
                    total_payments: 0.0,
                    code_breakdown: String::new(),
                });
                volumes.push(CodeVolumeMap::new());
                idx
            }
        };
        summaries[idx].total_services += agg.total_services;
        summaries[idx].total_payments += agg.total_payment.unwrap_or(0.0);
        *volumes[idx].entry(agg.code.clone()).or_insert(0.0) += agg.total_services;
    }

    for (summary, volume) in summaries.iter_mut().zip(volumes.iter()) {
        summary.code_breakdown =
            format_code_breakdown(volume, crate::constants::PROVIDER_BREAKDOWN_MAX_CHARS);
    }
    summaries
}

/// Merge the two family summary sets into one row per provider.
///
/// Numeric totals add; descriptive fields keep the first non-empty value;
/// breakdown strings concatenate and re-cap. Order is first-appearance
/// across (cpt, hcpcs).
pub fn merge_summaries(cpt: Vec<ProviderSummary>, hcpcs: Vec<ProviderSummary>) -> Vec<ProviderSummary> {
    let mut index: HashMap<Npi, usize> = HashMap::new();
    let mut merged: Vec<ProviderSummary> = Vec::new();

    for summary in cpt.into_iter().chain(hcpcs) {
        match index.get(&summary.npi) {
            None => {
                index.insert(summary.npi.clone(), merged.len());
                merged.push(summary);
            }
            Some(&idx) => {
                let slot = &mut merged[idx];
                slot.total_services += summary.total_services;
                slot.total_payments += summary.total_payments;
                if slot.doctor_name.is_empty() {
                    slot.doctor_name = summary.doctor_name;
                }
                if slot.specialty.is_empty() {
                    slot.specialty = summary.specialty;
                }
                if slot.city.is_empty() {
                    slot.city = summary.city;
                }
                if slot.state.is_empty() {
                    slot.state = summary.state;
                }
                if !summary.code_breakdown.is_empty() {
                    let combined = if slot.code_breakdown.is_empty() {
                        summary.code_breakdown
                    } else {
                        format!("{}, {}", slot.code_breakdown, summary.code_breakdown)
                    };
                    slot.code_breakdown = truncate_with_ellipsis(
                        &combined,
                        crate::constants::MERGED_BREAKDOWN_MAX_CHARS,
                    );
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::DerivedFlags;

    fn agg(npi: &str, code: &str, services: f64, payment: Option<f64>) -> ProviderCodeAggregate {
        ProviderCodeAggregate {
            npi: Npi::from_raw(npi),
            code: code.to_string(),
            name: format!("Doc {npi}"),
            city: "Fresno".into(),
            state: "CA".into(),
            specialty: "Radiology".into(),
            total_services: services,
            total_beneficiaries: None,
            total_submitted: None,
            total_allowed: None,
            total_payment: payment,
            services_per_beneficiary: None,
            derived: DerivedFlags::default(),
            suppressed: false,
            rank_within_code: 0,
        }
    }

    #[test]
    fn test_split_codes_by_family() {
        let codes = vec![
            "A4593".to_string(),
            "77080".to_string(),
            "L8679".to_string(),
            "61889".to_string(),
        ];
        let routed = split_codes(&codes);
        assert_eq!(routed.hcpcs, vec!["A4593", "L8679"]);
        assert_eq!(routed.cpt, vec!["77080", "61889"]);
    }

    #[test]
    fn test_summarize_providers_one_row_per_npi() {
        let aggregates = vec![
            agg("1", "77080", 50.0, Some(100.0)),
            agg("1", "61889", 10.0, Some(200.0)),
            agg("2", "77080", 5.0, None),
        ];
        let summaries = summarize_providers(&aggregates);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].total_services, 60.0);
        assert_eq!(summaries[0].total_payments, 300.0);
        assert!(summaries[0].code_breakdown.contains("77080 (50)"));
        assert!(summaries[0].code_breakdown.contains("61889 (10)"));
    }

    #[test]
    fn test_merge_summaries_no_duplicate_providers() {
        let cpt = summarize_providers(&[agg("1", "77080", 50.0, Some(100.0))]);
        let hcpcs = summarize_providers(&[
            agg("1", "A4593", 20.0, Some(40.0)),
            agg("3", "A4593", 2.0, None),
        ]);
        let merged = merge_summaries(cpt, hcpcs);
        assert_eq!(merged.len(), 2);
        let first = &merged[0];
        assert_eq!(first.npi.as_str(), "1");
        assert_eq!(first.total_services, 70.0);
        assert_eq!(first.total_payments, 140.0);
        assert!(first.code_breakdown.contains("77080"));
        assert!(first.code_breakdown.contains("A4593"));
    }

    #[test]
    fn test_merged_breakdown_caps_at_join_limit() {
        let mut cpt = summarize_providers(&[agg("1", "77080", 50.0, None)]);
        let mut hcpcs = summarize_providers(&[agg("1", "A4593", 20.0, None)]);
        cpt[0].code_breakdown = "7".repeat(150);
        hcpcs[0].code_breakdown = "A".repeat(150);

        let merged = merge_summaries(cpt, hcpcs);
        let joined = &merged[0].code_breakdown;
        assert_eq!(
            joined.chars().count(),
            crate::constants::MERGED_BREAKDOWN_MAX_CHARS
        );
        assert!(joined.ends_with("..."));
    }

    #[test]
    fn test_empty_on_unavailable_swallows_missing_extract() {
        let err: Result<AggregationResult> = Err(PufError::dataset_unavailable(
            std::path::PathBuf::from("/missing/refHCPCS.csv"),
        ));
        let result = empty_on_unavailable(err).unwrap();
        assert!(result.rows.is_empty());

        let other: Result<AggregationResult> =
            Err(PufError::missing_column("code", "billing utilization"));
        assert!(empty_on_unavailable(other).is_err());
    }
}
