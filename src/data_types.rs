/*!
 * Data type definitions for claims aggregation
 *
 * This module contains the typed records flowing through the pipeline:
 * the ephemeral source row, the per-(provider, code) aggregate, the
 * affiliation/hospital reference records, and the finished output rows.
 */

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// NPI (National Provider Identifier) as it appears in the extracts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Npi(pub String);

impl Npi {
    /// Create an NPI from a raw cell, trimming surrounding whitespace
    pub fn from_raw(raw: &str) -> Self {
        Npi(raw.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Npi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Procedure code family, which determines the source extract to scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeFamily {
    /// Letter-prefixed HCPCS codes (e.g. A4593), billed via the referral extract
    Hcpcs,
    /// Numeric CPT codes (e.g. 77080), billed via the billing extract
    Cpt,
}

impl CodeFamily {
    /// Classify a normalized code by its leading character
    pub fn classify(code: &str) -> CodeFamily {
        match code.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => CodeFamily::Hcpcs,
            _ => CodeFamily::Cpt,
        }
    }
}

impl std::fmt::Display for CodeFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeFamily::Hcpcs => write!(f, "HCPCS"),
            CodeFamily::Cpt => write!(f, "CPT"),
        }
    }
}

/// Independent provenance flags, one per monetary measure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFlags {
    pub submitted: bool,
    pub allowed: bool,
    pub payment: bool,
}

impl DerivedFlags {
    /// OR-accumulate flags from another contributing row
    pub fn merge(&mut self, other: DerivedFlags) {
        self.submitted |= other.submitted;
        self.allowed |= other.allowed;
        self.payment |= other.payment;
    }
}

/// One parsed extract record, alive only within a chunk's processing window
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub npi: Npi,
    pub code: String,
    pub state: String,
    pub city: String,
    pub last_name: String,
    pub first_name: String,
    pub specialty: String,
    pub services: f64,
    pub beneficiaries: Option<f64>,
    pub submitted: Option<f64>,
    pub allowed: Option<f64>,
    pub payment: Option<f64>,
    pub derived: DerivedFlags,
}

impl SourceRow {
    /// Display name in "Last, First" form, degrading to whichever part exists
    pub fn display_name(&self) -> String {
        let last = self.last_name.trim();
        let first = self.first_name.trim();
        if !last.is_empty() && !first.is_empty() {
            format!("{}, {}", last, first)
        } else if !last.is_empty() {
            last.to_string()
        } else {
            first.to_string()
        }
    }
}

/// Finalized aggregate for one (provider, code) key
///
/// Exactly one of these exists per (NPI, code) pair in any output. Sums are
/// accumulated additively across contributing rows; derivation flags are
/// OR-accumulated; descriptive fields are captured first-row-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCodeAggregate {
    pub npi: Npi,
    pub code: String,
    pub name: String,
    pub city: String,
    pub state: String,
    pub specialty: String,
    pub total_services: f64,
    pub total_beneficiaries: Option<f64>,
    pub total_submitted: Option<f64>,
    pub total_allowed: Option<f64>,
    pub total_payment: Option<f64>,
    /// Services per beneficiary, absent when the beneficiary count is 0 or unknown
    pub services_per_beneficiary: Option<f64>,
    pub derived: DerivedFlags,
    /// Set iff total_services > 0 and the beneficiary count is 0, reflecting
    /// the source's privacy masking of counts under 11
    pub suppressed: bool,
    /// 1-based ordinal within the code group, descending by the rank metric
    pub rank_within_code: u32,
}

impl ProviderCodeAggregate {
    /// Note string for the beneficiary column, if suppression applies
    pub fn suppression_note(&self) -> Option<&'static str> {
        self.suppressed.then_some(crate::constants::SUPPRESSED_NOTE)
    }

    /// Note string for a derived monetary measure
    pub fn derivation_note(flag: bool) -> Option<&'static str> {
        flag.then_some(crate::constants::DERIVED_NOTE)
    }
}

/// One deduplicated provider-to-facility affiliation edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AffiliationEdge {
    pub npi: Npi,
    pub facility_id: String,
}

/// Hospital directory entry, keyed by facility certification number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HospitalMetadata {
    pub facility_id: String,
    pub name: String,
    pub city: String,
    pub state: String,
}

/// Facility-level rollup built by replaying provider aggregates through the
/// affiliation relation
///
/// A provider affiliated with k facilities contributes its full totals to all
/// k facilities (full-credit attribution, no volume splitting). Market-level
/// sums across facilities therefore over-count shared providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HospitalRollup {
    pub facility_id: String,
    pub hospital_name: String,
    pub hospital_city: String,
    pub hospital_state: String,
    pub total_procedures: f64,
    pub total_payments: f64,
    /// Count of distinct contributing NPIs, not contributing rows
    pub num_physicians: usize,
    pub avg_procedures_per_physician: f64,
    /// Top-5 codes by volume, e.g. "77080 (1,200), 61889 (300) (+2 more)"
    pub code_breakdown: String,
}

/// Per-provider summary row merged across code families
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub npi: Npi,
    pub doctor_name: String,
    pub specialty: String,
    pub city: String,
    pub state: String,
    pub primary_hospital_name: Option<String>,
    pub primary_hospital_city: Option<String>,
    pub primary_hospital_state: Option<String>,
    pub hospital_summary: Option<String>,
    pub total_services: f64,
    pub total_payments: f64,
    pub code_breakdown: String,
}

/// One row of the top-codes-by-volume report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeVolume {
    pub code: String,
    pub total_services: f64,
    pub total_payments: f64,
}

/// Per-code volume map used while building rollup breakdowns.
///
/// BTreeMap keeps replays deterministic when volumes tie.
pub type CodeVolumeMap = BTreeMap<String, f64>;

/// Normalize procedure codes: trim, uppercase, drop empties, dedupe
/// preserving first-seen order
pub fn normalize_codes(codes: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for c in codes {
        let c2 = c.trim().to_uppercase();
        if c2.is_empty() {
            continue;
        }
        if !out.contains(&c2) {
            out.push(c2);
        }
    }
    out
}

/// Normalize state filters: trim, uppercase, keep only two-letter codes,
/// dedupe preserving first-seen order
pub fn normalize_states(states: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in states {
        let s2 = s.trim().to_uppercase();
        if s2.len() != 2 || !s2.chars().all(|c| c.is_ascii_uppercase()) {
            continue;
        }
        if !out.contains(&s2) {
            out.push(s2);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_family_classification() {
        assert_eq!(CodeFamily::classify("A4593"), CodeFamily::Hcpcs);
        assert_eq!(CodeFamily::classify("L8679"), CodeFamily::Hcpcs);
        assert_eq!(CodeFamily::classify("77080"), CodeFamily::Cpt);
        assert_eq!(CodeFamily::classify("61889"), CodeFamily::Cpt);
        assert_eq!(CodeFamily::classify(""), CodeFamily::Cpt);
    }

    #[test]
    fn test_normalize_codes() {
        let input = vec![
            " a4593 ".to_string(),
            "77080".to_string(),
            "A4593".to_string(),
            "".to_string(),
        ];
        assert_eq!(normalize_codes(&input), vec!["A4593", "77080"]);
    }

    #[test]
    fn test_normalize_states_rejects_invalid() {
        let input = vec![
            "ca".to_string(),
            "OR".to_string(),
            "California".to_string(),
            "C1".to_string(),
            "CA".to_string(),
        ];
        assert_eq!(normalize_states(&input), vec!["CA", "OR"]);
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut row = SourceRow {
            npi: Npi::from_raw("1234567890"),
            code: "77080".into(),
            state: "CA".into(),
            city: "Fresno".into(),
            last_name: "Smith".into(),
            first_name: "Ann".into(),
            specialty: String::new(),
            services: 0.0,
            beneficiaries: None,
            submitted: None,
            allowed: None,
            payment: None,
            derived: DerivedFlags::default(),
        };
        assert_eq!(row.display_name(), "Smith, Ann");
        row.first_name.clear();
        assert_eq!(row.display_name(), "Smith");
        row.last_name.clear();
        row.first_name = "Ann".into();
        assert_eq!(row.display_name(), "Ann");
    }

    #[test]
    fn test_derived_flags_merge_is_or() {
        let mut a = DerivedFlags { submitted: true, allowed: false, payment: false };
        a.merge(DerivedFlags { submitted: false, allowed: true, payment: false });
        assert!(a.submitted && a.allowed && !a.payment);
    }
}
