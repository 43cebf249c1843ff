/*!
 * # CMS PUF (Public Use File) Claims Aggregation Library
 *
 * A Rust library for aggregating CMS Medicare claims public-use files into
 * provider and hospital summaries.
 *
 * ## Features
 *
 * - 🚀 **Streaming**: chunked scans over multi-gigabyte utilization extracts
 * - 🔧 **Schema Tolerant**: tiered column matching across CMS file vintages
 * - 📊 **Provider & Hospital Views**: per-code rankings, per-provider
 *   summaries, and affiliation-based facility rollups
 * - 🧮 **Honest Numbers**: derived monetary totals and suppressed counts are
 *   flagged, never silently mixed with published totals
 * - 🧩 **Code Routing**: HCPCS and CPT codes scan their own extracts and
 *   merge into one result
 * - 🛡️ **Type Safe**: strongly typed records end to end
 *
 * ## Quick Start
 *
 * ```no_run
 * use cms_puf::prelude::*;
 *
 * # fn main() -> Result<()> {
 * // Discover standard-named extracts under one directory
 * let dataset = ClaimsDatasetBuilder::from_directory("./data")?.build()?;
 *
 * // Who bills DXA scans and sacral neuromodulation supplies?
 * let doctors = dataset.doctors_by_codes(
 *     &["77080".to_string(), "A4593".to_string()],
 *     &["CA".to_string()],
 *     None,
 *     Some(50),
 * )?;
 * for doc in &doctors.rows {
 *     println!("{} {} {}", doc.doctor_name, doc.total_services, doc.code_breakdown);
 * }
 *
 * // Which hospitals do those physicians affiliate with?
 * let hospitals = dataset.hospitals_by_codes(&["77080".to_string()], &[], None, None)?;
 * # Ok(())
 * # }
 * ```
 *
 * ## Configuration
 *
 * ```no_run
 * # use cms_puf::prelude::*;
 * # fn main() -> Result<()> {
 * let config = ConfigBuilder::new()
 *     .chunk_size(500_000)
 *     .max_scan_rows(Some(5_000_000))
 *     .progress_bar(false)
 *     .build();
 * cms_puf::config::set_global_config(config);
 * # Ok(())
 * # }
 * ```
 *
 * ## CMS Data Files
 *
 * - **Billing utilization**: Medicare Physician & Other Practitioners, by
 *   Provider and Service (`physHCPCS.csv`)
 * - **Referral utilization**: Medicare DMEPOS, by Referring Provider and
 *   Service (`refHCPCS.csv`)
 * - **Facility affiliations**: `Facility_Affiliation.csv`
 * - **Hospital directory**: `Hospital_General_Information.csv`
 *
 * Download files from: https://data.cms.gov/
 */

// Re-export error types from root
pub use error::{ErrorContext, PufError, Result};

// Public modules
pub mod aggregate;
pub mod config;
pub mod data_types;
pub mod dataset;
pub mod error;
pub mod rank;
pub mod reader;
pub mod rollup;
pub mod router;
pub mod schema;
pub mod totals;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```
/// use cms_puf::prelude::*;
/// ```
pub mod prelude {
    pub use crate::aggregate::{Aggregation, AggregationResult, RankMetric};
    pub use crate::config::{ConfigBuilder, PufConfig};
    pub use crate::data_types::*;
    pub use crate::dataset::{ClaimsDataset, ClaimsDatasetBuilder, QueryResult};
    pub use crate::error::{PufError, Result};
    pub use crate::reader::{PufReader, RowFilter, ScanOutcome};
    pub use crate::rollup::ReferenceData;
    pub use crate::schema::{ColumnRole, ExtractKind, RoleMap};
}

/// Claims aggregation constants
pub mod constants {
    /// Default cap on output rows for ranked reports
    pub const DEFAULT_MAX_ROWS: usize = 250;

    /// Codes shown in a breakdown string before the "(+K more)" suffix
    pub const BREAKDOWN_TOP_CODES: usize = 5;

    /// Character cap for per-provider, per-family code breakdown strings
    pub const PROVIDER_BREAKDOWN_MAX_CHARS: usize = 180;

    /// Character cap applied when the two family breakdowns join into one
    pub const MERGED_BREAKDOWN_MAX_CHARS: usize = 200;

    /// Character cap for per-facility code breakdown strings
    pub const ROLLUP_BREAKDOWN_MAX_CHARS: usize = 180;

    /// Character cap for provider hospital-affiliation summaries
    pub const HOSPITAL_SUMMARY_MAX_CHARS: usize = 140;

    /// Marker for beneficiary counts masked by the source's privacy floor
    pub const SUPPRESSED_NOTE: &str = "suppressed_<11";

    /// Marker for monetary totals reconstructed from per-event averages
    pub const DERIVED_NOTE: &str = "derived_from_average";
}
