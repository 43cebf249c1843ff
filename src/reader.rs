/*!
 * Chunked CSV streaming for CMS public-use extracts
 *
 * Utilization extracts run to about 10M rows, so nothing here materializes a
 * file. `PufReader::scan` streams records in fixed-size chunks, filters on
 * the requested code/state sets before doing any numeric work, and hands
 * each surviving row to the caller's sink. A soft scan cap bounds worst-case
 * latency; it is only consulted at chunk boundaries, so the chunk in flight
 * always completes.
 */

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use csv::ReaderBuilder;
use tracing::{debug, info};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::PufConfig;
use crate::data_types::{AffiliationEdge, HospitalMetadata, Npi, SourceRow};
use crate::error::{PufError, Result};
use crate::schema::{ColumnRole, ExtractKind, RoleMap};
use crate::totals::{derive_totals, parse_numeric};

/// Row filter applied before numeric parsing
#[derive(Debug, Clone)]
pub struct RowFilter {
    codes: HashSet<String>,
    states: Option<HashSet<String>>,
}

impl RowFilter {
    /// Build a filter from normalized code and state lists.
    ///
    /// An empty code list means no code restriction (every code in the
    /// extract passes, as in a full-extract discovery scan); an empty state
    /// list means no state restriction.
    pub fn new(codes: &[String], states: &[String]) -> Self {
        Self {
            codes: codes.iter().cloned().collect(),
            states: if states.is_empty() {
                None
            } else {
                Some(states.iter().cloned().collect())
            },
        }
    }

    fn accepts(&self, code: &str, state: &str) -> bool {
        if !self.codes.is_empty() && !self.codes.contains(code) {
            return false;
        }
        match &self.states {
            Some(states) => states.contains(state),
            None => true,
        }
    }
}

/// Outcome of one extract scan
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOutcome {
    /// Records read from the file
    pub scanned_rows: u64,
    /// Records that passed the code/state filter
    pub matched_rows: u64,
    /// True when the soft scan cap ended the scan early; results are a
    /// partial sample of the extract
    pub truncated: bool,
}

/// Streaming reader over utilization extracts
pub struct PufReader {
    chunk_size: usize,
    max_scan_rows: Option<u64>,
    skip_invalid_records: bool,
    #[cfg(feature = "progress")]
    show_progress_bar: bool,
}

impl Default for PufReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PufReader {
    /// Create a reader with default settings
    pub fn new() -> Self {
        Self::from_config(&PufConfig::default())
    }

    /// Create a reader from a configuration
    pub fn from_config(config: &PufConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_scan_rows: config.max_scan_rows,
            skip_invalid_records: config.skip_invalid_records,
            #[cfg(feature = "progress")]
            show_progress_bar: config.enable_progress_bar,
        }
    }

    /// Set records per chunk
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Set the soft scan cap (filter-matching rows)
    pub fn with_max_scan_rows(mut self, cap: Option<u64>) -> Self {
        self.max_scan_rows = cap;
        self
    }

    /// Enable or disable skipping invalid records
    pub fn with_skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = skip;
        self
    }

    #[cfg(feature = "progress")]
    /// Enable or disable the progress bar
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress_bar = show;
        self
    }

    /// Stream a utilization extract, feeding filter-passing rows to `sink`.
    ///
    /// Returns `DatasetUnavailable` when the file does not exist and
    /// `MissingColumn` when a mandatory role cannot be resolved from the
    /// header. Individual malformed records are skipped (or fail the scan
    /// when `skip_invalid_records` is off).
    pub fn scan<P, F>(
        &self,
        path: P,
        kind: ExtractKind,
        filter: &RowFilter,
        mut sink: F,
    ) -> Result<ScanOutcome>
    where
        P: AsRef<Path>,
        F: FnMut(SourceRow),
    {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PufError::dataset_unavailable(path.to_path_buf()));
        }

        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let roles = RoleMap::resolve(&headers, kind)?;

        info!(
            extract = kind.label(),
            path = %path.display(),
            "scanning extract"
        );

        #[cfg(feature = "progress")]
        let progress_bar = if self.show_progress_bar {
            let pb = ProgressBar::new(file_size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };
        #[cfg(not(feature = "progress"))]
        let _ = file_size;

        let mut outcome = ScanOutcome::default();
        let mut rows_in_chunk = 0usize;

        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) if self.skip_invalid_records => {
                    debug!(error = %e, "skipping malformed record");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            outcome.scanned_rows += 1;
            rows_in_chunk += 1;

            if let Some(row) = parse_source_row(&record, &roles, filter) {
                outcome.matched_rows += 1;
                sink(row);
            }

            if rows_in_chunk >= self.chunk_size {
                rows_in_chunk = 0;
                #[cfg(feature = "progress")]
                if let Some(pb) = &progress_bar {
                    if let Some(pos) = record.position() {
                        pb.set_position(pos.byte());
                    }
                }
                if let Some(cap) = self.max_scan_rows {
                    if outcome.matched_rows >= cap {
                        outcome.truncated = true;
                        break;
                    }
                }
            }
        }

        #[cfg(feature = "progress")]
        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        info!(
            extract = kind.label(),
            scanned = outcome.scanned_rows,
            matched = outcome.matched_rows,
            truncated = outcome.truncated,
            "scan complete"
        );

        Ok(outcome)
    }

    /// Load the provider-to-facility affiliation crosswalk.
    ///
    /// Edges with an empty NPI or facility id are dropped.
    pub fn load_affiliations<P: AsRef<Path>>(&self, path: P) -> Result<Vec<AffiliationEdge>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PufError::dataset_unavailable(path.to_path_buf()));
        }

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let roles = RoleMap::resolve(&headers, ExtractKind::Affiliation)?;

        let mut edges = Vec::new();
        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) if self.skip_invalid_records => {
                    debug!(error = %e, "skipping malformed affiliation record");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let npi = roles.cell(&record, ColumnRole::ProviderId).unwrap_or("");
            let facility_id = roles.cell(&record, ColumnRole::FacilityId).unwrap_or("");
            if npi.is_empty() || facility_id.is_empty() {
                continue;
            }
            edges.push(AffiliationEdge {
                npi: Npi::from_raw(npi),
                facility_id: facility_id.to_string(),
            });
        }

        info!(edges = edges.len(), "loaded affiliation crosswalk");
        Ok(edges)
    }

    /// Load the hospital directory.
    ///
    /// Entries without a facility id are dropped; missing city/state columns
    /// yield empty strings.
    pub fn load_hospital_directory<P: AsRef<Path>>(&self, path: P) -> Result<Vec<HospitalMetadata>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PufError::dataset_unavailable(path.to_path_buf()));
        }

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let roles = RoleMap::resolve(&headers, ExtractKind::HospitalDirectory)?;

        let mut hospitals = Vec::new();
        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) if self.skip_invalid_records => {
                    debug!(error = %e, "skipping malformed hospital record");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let facility_id = roles.cell(&record, ColumnRole::FacilityId).unwrap_or("");
            if facility_id.is_empty() {
                continue;
            }
            hospitals.push(HospitalMetadata {
                facility_id: facility_id.to_string(),
                name: roles
                    .cell(&record, ColumnRole::FacilityName)
                    .unwrap_or("")
                    .to_string(),
                city: roles
                    .cell(&record, ColumnRole::FacilityCity)
                    .unwrap_or("")
                    .to_string(),
                state: roles
                    .cell(&record, ColumnRole::FacilityState)
                    .unwrap_or("")
                    .to_string(),
            });
        }

        info!(hospitals = hospitals.len(), "loaded hospital directory");
        Ok(hospitals)
    }
}

/// Parse one CSV record into a `SourceRow`, applying the filter first.
///
/// Code, NPI, and state are trimmed; code and state are uppercased before
/// the filter check so extract casing never affects matching.
fn parse_source_row(
    record: &csv::StringRecord,
    roles: &RoleMap,
    filter: &RowFilter,
) -> Option<SourceRow> {
    let code = roles.cell(record, ColumnRole::Code)?.to_uppercase();
    let state = roles
        .cell(record, ColumnRole::State)
        .unwrap_or("")
        .to_uppercase();
    if !filter.accepts(&code, &state) {
        return None;
    }

    let npi = Npi::from_raw(roles.cell(record, ColumnRole::ProviderId)?);
    if npi.is_empty() {
        return None;
    }

    let services = roles
        .cell(record, ColumnRole::Services)
        .and_then(parse_numeric)
        .unwrap_or(0.0);
    let beneficiaries = roles
        .cell(record, ColumnRole::Beneficiaries)
        .and_then(parse_numeric);
    let totals = derive_totals(record, roles, services);

    Some(SourceRow {
        npi,
        code,
        state,
        city: roles
            .cell(record, ColumnRole::City)
            .unwrap_or("")
            .to_string(),
        last_name: roles
            .cell(record, ColumnRole::LastName)
            .unwrap_or("")
            .to_string(),
        first_name: roles
            .cell(record, ColumnRole::FirstName)
            .unwrap_or("")
            .to_string(),
        specialty: roles
            .cell(record, ColumnRole::Specialty)
            .unwrap_or("")
            .to_string(),
        services,
        beneficiaries,
        submitted: totals.submitted,
        allowed: totals.allowed,
        payment: totals.payment,
        derived: totals.derived,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn reader() -> PufReader {
        let r = PufReader::new()
            .with_chunk_size(2)
            .with_max_scan_rows(None)
            .with_skip_invalid_records(true);
        #[cfg(feature = "progress")]
        let r = r.with_progress_bar(false);
        r
    }

    const BILLING_HEADER: &str = "Rndrng_NPI,Rndrng_Prvdr_Last_Org_Name,Rndrng_Prvdr_First_Name,Rndrng_Prvdr_City,Rndrng_Prvdr_State_Abrvtn,Rndrng_Prvdr_Type,HCPCS_Cd,Tot_Srvcs,Tot_Benes,Avg_Mdcr_Pymt_Amt";

    #[test]
    fn test_scan_filters_on_code_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "phys.csv",
            &format!(
                "{BILLING_HEADER}\n\
                 1111111111,Smith,Ann,Fresno,CA,Radiology,77080,50,40,89.10\n\
                 2222222222,Jones,Bo,Reno,NV,Radiology,77080,30,25,90.00\n\
                 1111111111,Smith,Ann,Fresno,CA,Radiology,99213,500,400,40.00\n"
            ),
        );

        let filter = RowFilter::new(&["77080".to_string()], &["CA".to_string()]);
        let mut rows = Vec::new();
        let outcome = reader()
            .scan(&path, ExtractKind::Billing, &filter, |row| rows.push(row))
            .unwrap();

        assert_eq!(outcome.scanned_rows, 3);
        assert_eq!(outcome.matched_rows, 1);
        assert!(!outcome.truncated);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].npi.as_str(), "1111111111");
        assert_eq!(rows[0].services, 50.0);
        assert!(rows[0].derived.payment);
    }

    #[test]
    fn test_empty_code_list_scans_every_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "phys.csv",
            &format!(
                "{BILLING_HEADER}\n\
                 1111111111,Smith,Ann,Fresno,CA,Radiology,77080,50,40,89.10\n\
                 1111111111,Smith,Ann,Fresno,CA,Radiology,99213,500,400,40.00\n\
                 2222222222,Jones,Bo,Reno,NV,Radiology,A4593,10,5,20.00\n"
            ),
        );

        let filter = RowFilter::new(&[], &[]);
        let mut codes = Vec::new();
        let outcome = reader()
            .scan(&path, ExtractKind::Billing, &filter, |row| {
                codes.push(row.code)
            })
            .unwrap();

        assert_eq!(outcome.matched_rows, 3);
        assert_eq!(codes, vec!["77080", "99213", "A4593"]);
    }

    #[test]
    fn test_scan_cap_checked_at_chunk_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut contents = String::from(BILLING_HEADER);
        contents.push('\n');
        for i in 0..10 {
            contents.push_str(&format!(
                "{:010},Smith,Ann,Fresno,CA,Radiology,77080,1,1,1.00\n",
                i + 1
            ));
        }
        let path = write_csv(&dir, "phys.csv", &contents);

        let filter = RowFilter::new(&["77080".to_string()], &[]);
        let mut rows = 0usize;
        let outcome = reader()
            .with_chunk_size(4)
            .with_max_scan_rows(Some(3))
            .scan(&path, ExtractKind::Billing, &filter, |_| rows += 1)
            .unwrap();

        // The cap of 3 is exceeded inside the first chunk of 4; the chunk
        // still finishes before the scan stops.
        assert!(outcome.truncated);
        assert_eq!(rows, 4);
        assert_eq!(outcome.scanned_rows, 4);
    }

    #[test]
    fn test_missing_file_is_dataset_unavailable() {
        let filter = RowFilter::new(&["77080".to_string()], &[]);
        let err = reader()
            .scan("/nonexistent/phys.csv", ExtractKind::Billing, &filter, |_| {})
            .unwrap_err();
        assert!(matches!(err, PufError::DatasetUnavailable { .. }));
    }

    #[test]
    fn test_load_affiliations_drops_empty_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "aff.csv",
            "NPI,Facility Affiliations Certification Number\n\
             1111111111,F1\n\
             ,F2\n\
             2222222222,\n\
             2222222222,F1\n",
        );
        let edges = reader().load_affiliations(&path).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].facility_id, "F1");
        assert_eq!(edges[1].npi.as_str(), "2222222222");
    }

    #[test]
    fn test_load_hospital_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "hosp.csv",
            "Facility ID,Facility Name,City/Town,State\n\
             F1,General Hospital,Fresno,CA\n\
             ,Orphan Row,Reno,NV\n",
        );
        let hospitals = reader().load_hospital_directory(&path).unwrap();
        assert_eq!(hospitals.len(), 1);
        assert_eq!(hospitals[0].name, "General Hospital");
        assert_eq!(hospitals[0].state, "CA");
    }
}
