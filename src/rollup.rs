/*!
 * Affiliation expansion and hospital rollups
 *
 * The affiliation crosswalk is a many-to-many relation between NPIs and
 * facility certification numbers. Rollups replay finished provider
 * aggregates through that relation: a provider affiliated with k
 * facilities contributes its full totals to all k (no volume splitting),
 * so per-facility figures answer "what volume do this hospital's
 * physicians handle" rather than "how much happened inside this building".
 */

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::warn;

use crate::data_types::{
    AffiliationEdge, CodeVolumeMap, HospitalMetadata, HospitalRollup, Npi, ProviderCodeAggregate,
    ProviderSummary,
};

/// In-memory reference data: the affiliation relation in both directions
/// plus the hospital directory
#[derive(Debug, Default, Clone)]
pub struct ReferenceData {
    affiliations: HashMap<Npi, BTreeSet<String>>,
    by_facility: HashMap<String, BTreeSet<Npi>>,
    directory: HashMap<String, HospitalMetadata>,
}

impl ReferenceData {
    /// Build from raw crosswalk edges and directory entries.
    ///
    /// Edges deduplicate via the set values; directory duplicates keep the
    /// first entry seen.
    pub fn from_parts(edges: Vec<AffiliationEdge>, hospitals: Vec<HospitalMetadata>) -> Self {
        let mut affiliations: HashMap<Npi, BTreeSet<String>> = HashMap::new();
        let mut by_facility: HashMap<String, BTreeSet<Npi>> = HashMap::new();
        for edge in edges {
            affiliations
                .entry(edge.npi.clone())
                .or_default()
                .insert(edge.facility_id.clone());
            by_facility
                .entry(edge.facility_id)
                .or_default()
                .insert(edge.npi);
        }

        let mut directory = HashMap::new();
        for hospital in hospitals {
            directory
                .entry(hospital.facility_id.clone())
                .or_insert(hospital);
        }

        Self {
            affiliations,
            by_facility,
            directory,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.affiliations.is_empty() && self.directory.is_empty()
    }

    /// Facilities a provider is affiliated with, deduplicated and sorted
    pub fn facilities_for(&self, npi: &Npi) -> Option<&BTreeSet<String>> {
        self.affiliations.get(npi)
    }

    /// Providers affiliated with a facility
    pub fn providers_for(&self, facility_id: &str) -> Option<&BTreeSet<Npi>> {
        self.by_facility.get(facility_id)
    }

    /// Directory entry for a facility, if the directory knows it
    pub fn hospital(&self, facility_id: &str) -> Option<&HospitalMetadata> {
        self.directory.get(facility_id)
    }

    /// Affiliated hospitals with directory metadata, alphabetical by name.
    ///
    /// Facilities absent from the directory are dropped.
    pub fn hospitals_for(&self, npi: &Npi) -> Vec<&HospitalMetadata> {
        let mut hospitals: Vec<&HospitalMetadata> = self
            .facilities_for(npi)
            .map(|ids| ids.iter().filter_map(|id| self.hospital(id)).collect())
            .unwrap_or_default();
        hospitals.sort_by(|a, b| a.name.cmp(&b.name));
        hospitals
    }
}

#[derive(Debug, Default)]
struct RollupAccumulator {
    total_procedures: f64,
    total_payments: f64,
    physicians: BTreeSet<Npi>,
    code_volumes: CodeVolumeMap,
}

/// Roll provider aggregates up to the facilities their NPIs affiliate with.
///
/// Facilities missing from the hospital directory are dropped silently;
/// providers with no affiliations contribute nothing. Output order is
/// facility id ascending; callers rank as needed.
pub fn rollup_hospitals(
    aggregates: &[ProviderCodeAggregate],
    refs: &ReferenceData,
) -> Vec<HospitalRollup> {
    if refs.is_empty() {
        warn!("no reference data loaded; hospital rollup is empty");
        return Vec::new();
    }

    let mut facilities: BTreeMap<String, RollupAccumulator> = BTreeMap::new();
    for agg in aggregates {
        let Some(facility_ids) = refs.facilities_for(&agg.npi) else {
            continue;
        };
        for facility_id in facility_ids {
            if refs.hospital(facility_id).is_none() {
                continue;
            }
            let acc = facilities.entry(facility_id.clone()).or_default();
            acc.total_procedures += agg.total_services;
            acc.total_payments += agg.total_payment.unwrap_or(0.0);
            acc.physicians.insert(agg.npi.clone());
            *acc.code_volumes.entry(agg.code.clone()).or_insert(0.0) += agg.total_services;
        }
    }

    facilities
        .into_iter()
        .filter_map(|(facility_id, acc)| {
            let meta = refs.hospital(&facility_id)?;
            let num_physicians = acc.physicians.len();
            let avg = if num_physicians > 0 {
                acc.total_procedures / num_physicians as f64
            } else {
                0.0
            };
            Some(HospitalRollup {
                facility_id,
                hospital_name: meta.name.clone(),
                hospital_city: meta.city.clone(),
                hospital_state: meta.state.clone(),
                total_procedures: acc.total_procedures,
                total_payments: acc.total_payments,
                num_physicians,
                avg_procedures_per_physician: avg,
                code_breakdown: format_code_breakdown(
                    &acc.code_volumes,
                    crate::constants::ROLLUP_BREAKDOWN_MAX_CHARS,
                ),
            })
        })
        .collect()
}

/// Attach affiliation fields to a provider summary: the alphabetical-first
/// hospital becomes the primary, and all affiliated hospitals appear in a
/// capped "Name (ST), ..." summary string.
pub fn attach_hospital_affiliations(summary: &mut ProviderSummary, refs: &ReferenceData) {
    let hospitals = refs.hospitals_for(&summary.npi);
    let Some(primary) = hospitals.first() else {
        return;
    };
    summary.primary_hospital_name = Some(primary.name.clone());
    summary.primary_hospital_city = Some(primary.city.clone());
    summary.primary_hospital_state = Some(primary.state.clone());

    let joined = hospitals
        .iter()
        .map(|h| {
            if h.state.is_empty() {
                h.name.clone()
            } else {
                format!("{} ({})", h.name, h.state)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    summary.hospital_summary = Some(truncate_with_ellipsis(
        &joined,
        crate::constants::HOSPITAL_SUMMARY_MAX_CHARS,
    ));
}

/// Render per-code volumes as a top-5 breakdown string with thousands
/// separators, e.g. `"77080 (1,200), 61889 (300) (+2 more)"`, capped at
/// `max_chars`.
pub fn format_code_breakdown(volumes: &CodeVolumeMap, max_chars: usize) -> String {
    if volumes.is_empty() {
        return String::new();
    }

    let mut entries: Vec<(&String, f64)> = volumes.iter().map(|(c, v)| (c, *v)).collect();
    // Stable sort over the BTreeMap iteration keeps ties code-ascending.
    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let top_n = crate::constants::BREAKDOWN_TOP_CODES;
    let mut parts: Vec<String> = entries
        .iter()
        .take(top_n)
        .map(|(code, volume)| format!("{} ({})", code, format_count(*volume)))
        .collect();
    if entries.len() > top_n {
        parts.push(format!("(+{} more)", entries.len() - top_n));
    }

    truncate_with_ellipsis(&parts.join(", "), max_chars)
}

/// Format a volume as a whole number with thousands separators
pub fn format_count(value: f64) -> String {
    let n = value.round() as i64;
    let digits = n.abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

/// Truncate to `max_chars` characters, replacing the tail with "..."
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}
