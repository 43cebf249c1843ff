/*!
 * Unified dataset API for CMS claims extracts
 *
 * `ClaimsDataset` ties the pipeline together: it knows where the extracts
 * live, owns the reference-data cache, and exposes the query surface. The
 * utilization extracts are never held in memory; every query streams them.
 * The affiliation crosswalk and hospital directory are small, so they load
 * once and stay cached until their files change on disk.
 */

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::aggregate::{Aggregation, AggregationResult};
use crate::config::PufConfig;
use crate::data_types::{
    normalize_codes, normalize_states, CodeVolume, CodeVolumeMap, HospitalRollup, Npi,
    ProviderCodeAggregate, ProviderSummary,
};
use crate::error::{PufError, Result};
use crate::rank::rank_and_truncate;
use crate::reader::{PufReader, RowFilter};
use crate::rollup::{attach_hospital_affiliations, rollup_hospitals, ReferenceData};
use crate::router::{empty_on_unavailable, merge_summaries, scan_families, split_codes, summarize_providers};
use crate::schema::ExtractKind;

// Standard extract names under a data root
const BILLING_FILE: &str = "physHCPCS.csv";
const REFERRAL_FILE: &str = "refHCPCS.csv";
const AFFILIATION_FILE: &str = "Facility_Affiliation.csv";
const HOSPITAL_DIRECTORY_FILE: &str = "Hospital_General_Information.csv";

/// Rows plus a partial-sample marker.
///
/// `truncated` is true when any contributing scan stopped at its soft row
/// cap, meaning the rows describe a prefix sample of the extract rather
/// than the whole file.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    pub rows: Vec<T>,
    pub truncated: bool,
}

/// Builder for a claims dataset
///
/// # Example
/// ```no_run
/// # use cms_puf::dataset::ClaimsDatasetBuilder;
/// let dataset = ClaimsDatasetBuilder::new()
///     .billing_data("data/physHCPCS.csv")
///     .referral_data("data/refHCPCS.csv")
///     .affiliations("data/Facility_Affiliation.csv")
///     .hospital_directory("data/Hospital_General_Information.csv")
///     .build()?;
/// # Ok::<(), cms_puf::PufError>(())
/// ```
pub struct ClaimsDatasetBuilder {
    billing_path: Option<PathBuf>,
    referral_path: Option<PathBuf>,
    affiliation_path: Option<PathBuf>,
    hospital_directory_path: Option<PathBuf>,
    config: PufConfig,
}

impl Default for ClaimsDatasetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimsDatasetBuilder {
    /// Create a new dataset builder with the global configuration
    pub fn new() -> Self {
        Self {
            billing_path: None,
            referral_path: None,
            affiliation_path: None,
            hospital_directory_path: None,
            config: crate::config::global_config(),
        }
    }

    /// Set the path to the billing (physician utilization) extract
    pub fn billing_data<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.billing_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the path to the referral (DMEPOS) extract
    pub fn referral_data<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.referral_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the path to the facility affiliation crosswalk
    pub fn affiliations<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.affiliation_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the path to the hospital directory
    pub fn hospital_directory<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.hospital_directory_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Override the runtime configuration
    pub fn config(mut self, config: PufConfig) -> Self {
        self.config = config;
        self
    }

    /// Discover standard-named extracts under a data root
    ///
    /// Looks for `physHCPCS.csv`, `refHCPCS.csv`, `Facility_Affiliation.csv`,
    /// and `Hospital_General_Information.csv` (case-insensitive).
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(PufError::Custom {
                message: format!("'{}' is not a directory", dir.display()),
                suggestion: Some("Provide a directory containing CMS extract files".to_string()),
            });
        }

        let mut builder = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();

            if filename.eq_ignore_ascii_case(BILLING_FILE) {
                builder = builder.billing_data(path);
            } else if filename.eq_ignore_ascii_case(REFERRAL_FILE) {
                builder = builder.referral_data(path);
            } else if filename.eq_ignore_ascii_case(AFFILIATION_FILE) {
                builder = builder.affiliations(path);
            } else if filename.eq_ignore_ascii_case(HOSPITAL_DIRECTORY_FILE) {
                builder = builder.hospital_directory(path);
            }
        }
        Ok(builder)
    }

    /// Build the dataset. At least one utilization extract must be set.
    pub fn build(self) -> Result<ClaimsDataset> {
        if self.billing_path.is_none() && self.referral_path.is_none() {
            return Err(PufError::Custom {
                message: "no utilization extract configured".to_string(),
                suggestion: Some(
                    "Use .billing_data() or .referral_data() to point at a utilization file"
                        .to_string(),
                ),
            });
        }
        Ok(ClaimsDataset {
            billing_path: self.billing_path,
            referral_path: self.referral_path,
            affiliation_path: self.affiliation_path,
            hospital_directory_path: self.hospital_directory_path,
            config: self.config,
            reference_cache: Mutex::new(ReferenceCache::default()),
        })
    }
}

/// mtime stamps the cache key is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct CacheStamp {
    affiliation_mtime: Option<SystemTime>,
    directory_mtime: Option<SystemTime>,
}

fn mtime_of(path: Option<&PathBuf>) -> Option<SystemTime> {
    path.and_then(|p| std::fs::metadata(p).ok())
        .and_then(|m| m.modified().ok())
}

/// Reference data keyed by source-file mtimes, rebuilt only when a source
/// file changes on disk
#[derive(Debug, Default)]
struct ReferenceCache {
    stamp: Option<CacheStamp>,
    data: Arc<ReferenceData>,
}

/// A configured claims dataset with its query surface
#[derive(Debug)]
pub struct ClaimsDataset {
    billing_path: Option<PathBuf>,
    referral_path: Option<PathBuf>,
    affiliation_path: Option<PathBuf>,
    hospital_directory_path: Option<PathBuf>,
    config: PufConfig,
    reference_cache: Mutex<ReferenceCache>,
}

impl ClaimsDataset {
    /// Current reference data, from cache when the source files are
    /// unchanged since the last build.
    ///
    /// Missing reference files degrade to empty reference data; affected
    /// query features simply yield empty or unenriched results.
    pub fn reference_data(&self) -> Arc<ReferenceData> {
        let stamp = CacheStamp {
            affiliation_mtime: mtime_of(self.affiliation_path.as_ref()),
            directory_mtime: mtime_of(self.hospital_directory_path.as_ref()),
        };

        let mut cache = match self.reference_cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cache.stamp == Some(stamp) {
            debug!("reference cache hit");
            return Arc::clone(&cache.data);
        }

        let reader = PufReader::from_config(&self.config);
        let edges = match &self.affiliation_path {
            Some(path) => match reader.load_affiliations(path) {
                Ok(edges) => edges,
                Err(e) => {
                    warn!(error = %e, "affiliation crosswalk unavailable");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let hospitals = match &self.hospital_directory_path {
            Some(path) => match reader.load_hospital_directory(path) {
                Ok(hospitals) => hospitals,
                Err(e) => {
                    warn!(error = %e, "hospital directory unavailable");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        cache.data = Arc::new(ReferenceData::from_parts(edges, hospitals));
        cache.stamp = Some(stamp);
        Arc::clone(&cache.data)
    }

    fn scan_family(
        &self,
        path: Option<&PathBuf>,
        kind: ExtractKind,
        codes: &[String],
        states: &[String],
        scan_all: bool,
    ) -> Result<AggregationResult> {
        let mut aggregation = Aggregation::new();
        if codes.is_empty() && !scan_all {
            return Ok(aggregation.finalize());
        }
        let Some(path) = path else {
            debug!(extract = kind.label(), "no extract configured for family");
            return Ok(aggregation.finalize());
        };

        let filter = RowFilter::new(codes, states);
        let reader = PufReader::from_config(&self.config);
        let outcome = reader.scan(path, kind, &filter, |row| aggregation.fold(row))?;
        aggregation.truncated = outcome.truncated;
        Ok(aggregation.finalize())
    }

    /// Run both family scans for a normalized code list.
    ///
    /// Returns the finalized per-family results in (cpt, hcpcs) order. A
    /// family whose extract file is missing contributes an empty result. An
    /// empty code list is a discovery scan: both extracts are streamed in
    /// full with no code restriction.
    fn routed_results(
        &self,
        codes: &[String],
        states: &[String],
    ) -> Result<(AggregationResult, AggregationResult)> {
        let routed = split_codes(codes);
        let scan_all = codes.is_empty();
        let (cpt, hcpcs) = scan_families(
            || {
                self.scan_family(
                    self.billing_path.as_ref(),
                    ExtractKind::Billing,
                    &routed.cpt,
                    states,
                    scan_all,
                )
            },
            || {
                self.scan_family(
                    self.referral_path.as_ref(),
                    ExtractKind::Referral,
                    &routed.hcpcs,
                    states,
                    scan_all,
                )
            },
        );
        Ok((empty_on_unavailable(cpt)?, empty_on_unavailable(hcpcs)?))
    }

    fn normalize_filters(codes: &[String], states: &[String]) -> Result<(Vec<String>, Vec<String>)> {
        let codes = normalize_codes(codes);
        if codes.is_empty() {
            return Err(PufError::empty_code_filter());
        }
        let normalized_states = normalize_states(states);
        if normalized_states.is_empty() && !states.is_empty() {
            warn!("all state filters were invalid; scanning without a state restriction");
        }
        Ok((codes, normalized_states))
    }

    /// Provider summaries for a set of procedure codes, one row per NPI,
    /// ranked by (services, payments) and capped at `max_rows`. Providers
    /// below `min_services` total service volume are dropped.
    ///
    /// Summaries carry hospital-affiliation enrichment when reference data
    /// is configured.
    pub fn doctors_by_codes(
        &self,
        codes: &[String],
        states: &[String],
        min_services: Option<f64>,
        max_rows: Option<usize>,
    ) -> Result<QueryResult<ProviderSummary>> {
        let (codes, states) = Self::normalize_filters(codes, states)?;
        let (cpt, hcpcs) = self.routed_results(&codes, &states)?;
        let truncated = cpt.truncated || hcpcs.truncated;

        let mut summaries = merge_summaries(
            summarize_providers(&cpt.rows),
            summarize_providers(&hcpcs.rows),
        );

        let refs = self.reference_data();
        if !refs.is_empty() {
            for summary in &mut summaries {
                attach_hospital_affiliations(summary, &refs);
            }
        }

        let rows = rank_and_truncate(
            summaries,
            |s| s.total_services,
            |s| s.total_payments,
            min_services,
            max_rows.unwrap_or(self.config.default_max_rows),
        );
        Ok(QueryResult { rows, truncated })
    }

    /// The full ranked per-(provider, code) table, with suppression and
    /// derivation markers intact.
    pub fn provider_code_report(
        &self,
        codes: &[String],
        states: &[String],
        max_rows: Option<usize>,
    ) -> Result<QueryResult<ProviderCodeAggregate>> {
        let (codes, states) = Self::normalize_filters(codes, states)?;
        let (cpt, hcpcs) = self.routed_results(&codes, &states)?;
        let truncated = cpt.truncated || hcpcs.truncated;

        let mut rows = cpt.rows;
        rows.extend(hcpcs.rows);
        // Code families never share a code, so per-code ranks survive the
        // concatenation; the stable re-sort just interleaves the groups.
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        rows.truncate(max_rows.unwrap_or(self.config.default_max_rows));
        Ok(QueryResult { rows, truncated })
    }

    /// Facility rollups for a set of procedure codes, ranked by
    /// (procedures, payments). Facilities below `min_procedures` total
    /// procedure volume are dropped.
    pub fn hospitals_by_codes(
        &self,
        codes: &[String],
        states: &[String],
        min_procedures: Option<f64>,
        max_rows: Option<usize>,
    ) -> Result<QueryResult<HospitalRollup>> {
        let (codes, states) = Self::normalize_filters(codes, states)?;
        let (cpt, hcpcs) = self.routed_results(&codes, &states)?;
        let truncated = cpt.truncated || hcpcs.truncated;

        let mut aggregates = cpt.rows;
        aggregates.extend(hcpcs.rows);
        let refs = self.reference_data();
        let rollups = rollup_hospitals(&aggregates, &refs);

        let rows = rank_and_truncate(
            rollups,
            |r| r.total_procedures,
            |r| r.total_payments,
            min_procedures,
            max_rows.unwrap_or(self.config.default_max_rows),
        );
        Ok(QueryResult { rows, truncated })
    }

    /// Provider summaries restricted to the NPIs affiliated with one
    /// facility, ranked by services.
    ///
    /// An unknown facility id yields an empty result.
    pub fn hospital_physicians(
        &self,
        facility_id: &str,
        codes: &[String],
        states: &[String],
        max_rows: Option<usize>,
    ) -> Result<QueryResult<ProviderSummary>> {
        let (codes, states) = Self::normalize_filters(codes, states)?;
        let refs = self.reference_data();
        let Some(npis) = refs.providers_for(facility_id.trim()) else {
            warn!(facility_id, "facility has no affiliated providers");
            return Ok(QueryResult { rows: Vec::new(), truncated: false });
        };
        let npis: std::collections::HashSet<Npi> = npis.iter().cloned().collect();

        let (cpt, hcpcs) = self.routed_results(&codes, &states)?;
        let truncated = cpt.truncated || hcpcs.truncated;

        let keep = |rows: Vec<ProviderCodeAggregate>| -> Vec<ProviderCodeAggregate> {
            rows.into_iter().filter(|r| npis.contains(&r.npi)).collect()
        };
        let mut summaries = merge_summaries(
            summarize_providers(&keep(cpt.rows)),
            summarize_providers(&keep(hcpcs.rows)),
        );
        for summary in &mut summaries {
            attach_hospital_affiliations(summary, &refs);
        }

        let rows = rank_and_truncate(
            summaries,
            |s| s.total_services,
            |s| s.total_payments,
            None,
            max_rows.unwrap_or(self.config.default_max_rows),
        );
        Ok(QueryResult { rows, truncated })
    }

    /// Per-code volume totals across providers, above a minimum service
    /// volume, ranked by (services, payments).
    ///
    /// An empty code list totals every code in the extracts: a full-extract
    /// discovery scan restricted only by state and `min_services`.
    pub fn top_codes_by_volume(
        &self,
        codes: &[String],
        states: &[String],
        min_services: Option<f64>,
        max_rows: Option<usize>,
    ) -> Result<QueryResult<CodeVolume>> {
        let (codes, states) = if codes.is_empty() {
            (Vec::new(), normalize_states(states))
        } else {
            Self::normalize_filters(codes, states)?
        };
        let (cpt, hcpcs) = self.routed_results(&codes, &states)?;
        let truncated = cpt.truncated || hcpcs.truncated;

        let mut services: CodeVolumeMap = CodeVolumeMap::new();
        let mut payments: CodeVolumeMap = CodeVolumeMap::new();
        for agg in cpt.rows.iter().chain(hcpcs.rows.iter()) {
            *services.entry(agg.code.clone()).or_insert(0.0) += agg.total_services;
            *payments.entry(agg.code.clone()).or_insert(0.0) += agg.total_payment.unwrap_or(0.0);
        }
        let volumes: Vec<CodeVolume> = services
            .into_iter()
            .map(|(code, total_services)| CodeVolume {
                total_payments: payments.get(&code).copied().unwrap_or(0.0),
                code,
                total_services,
            })
            .collect();

        let rows = rank_and_truncate(
            volumes,
            |v| v.total_services,
            |v| v.total_payments,
            min_services,
            max_rows.unwrap_or(self.config.default_max_rows),
        );
        Ok(QueryResult { rows, truncated })
    }
}
