/*!
 * End-to-end pipeline tests over temp-file CSV fixtures
 *
 * These exercise the whole path: directory discovery, header resolution,
 * chunked scanning, code-family routing, per-provider merging, affiliation
 * rollups, and ranking. Fixtures are small, but the headers are the real
 * CMS column names so schema resolution runs the same tiers it would on a
 * full extract.
 */

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use cms_puf::config::ConfigBuilder;
use cms_puf::dataset::ClaimsDatasetBuilder;
use cms_puf::prelude::*;

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    let mut f = File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

fn quiet_config(chunk_size: usize) -> PufConfig {
    ConfigBuilder::new()
        .progress_bar(false)
        .chunk_size(chunk_size)
        .max_scan_rows(None)
        .build()
}

const BILLING_HEADER: &str = "Rndrng_NPI,Rndrng_Prvdr_Last_Org_Name,Rndrng_Prvdr_First_Name,Rndrng_Prvdr_City,Rndrng_Prvdr_State_Abrvtn,Rndrng_Prvdr_Type,HCPCS_Cd,Tot_Srvcs,Tot_Benes,Avg_Sbmtd_Chrg,Avg_Mdcr_Alowd_Amt,Avg_Mdcr_Pymt_Amt";

const REFERRAL_HEADER: &str = "Rfrg_NPI,Rfrg_Prvdr_Last_Name_Org,Rfrg_Prvdr_First_Name,Rfrg_Prvdr_City,Rfrg_Prvdr_State_Abrvtn,Rfrg_Prvdr_Type,HCPCS_Cd,Tot_Suplr_Srvcs,Tot_Suplr_Benes,Avg_Suplr_Sbmtd_Chrg,Avg_Suplr_Mdcr_Alowd_Amt,Avg_Suplr_Mdcr_Pymt_Amt";

fn standard_fixture(dir: &Path) {
    // Billing extract publishes averages only, so monetary totals are
    // derived per row. 1000000001 bills two codes; 1000000002 competes on
    // 77080; 1000000003 has a masked beneficiary count on 61889.
    write_file(
        dir,
        "physHCPCS.csv",
        &format!(
            "{BILLING_HEADER}\n\
             1000000001,Petra,Lee,Fresno,CA,Diagnostic Radiology,77080,50,40,120.00,95.00,89.10\n\
             1000000001,Petra,Lee,Fresno,CA,Diagnostic Radiology,77080,10,8,120.00,95.00,89.10\n\
             1000000002,Quayle,Max,Sacramento,CA,Diagnostic Radiology,77080,30,25,110.00,90.00,85.00\n\
             1000000003,Reyes,Ana,Fresno,CA,Neurosurgery,61889,12,0,9000.00,4000.00,3500.00\n\
             1000000001,Petra,Lee,Fresno,CA,Diagnostic Radiology,99213,500,400,60.00,45.00,40.00\n"
        ),
    );
    write_file(
        dir,
        "refHCPCS.csv",
        &format!(
            "{REFERRAL_HEADER}\n\
             1000000001,Petra,Lee,Fresno,CA,Diagnostic Radiology,A4593,20,15,30.00,22.00,18.00\n\
             1000000004,Singh,Dev,Clovis,CA,Urology,A4593,40,35,30.00,22.00,18.00\n"
        ),
    );
    write_file(
        dir,
        "Facility_Affiliation.csv",
        "NPI,Facility Affiliations Certification Number\n\
         1000000001,F1\n\
         1000000001,F2\n\
         1000000002,F1\n\
         1000000003,F2\n",
    );
    write_file(
        dir,
        "Hospital_General_Information.csv",
        "Facility ID,Facility Name,City/Town,State\n\
         F1,Community Regional Medical Center,Fresno,CA\n\
         F2,Saint Agnes Medical Center,Fresno,CA\n",
    );
}

fn dataset(dir: &Path, chunk_size: usize) -> ClaimsDataset {
    ClaimsDatasetBuilder::from_directory(dir)
        .unwrap()
        .config(quiet_config(chunk_size))
        .build()
        .unwrap()
}

#[test]
fn derived_totals_survive_to_the_report() {
    let dir = tempfile::tempdir().unwrap();
    standard_fixture(dir.path());
    let ds = dataset(dir.path(), 100);

    let report = ds
        .provider_code_report(&["77080".to_string()], &[], None)
        .unwrap();
    let lead = report
        .rows
        .iter()
        .find(|r| r.npi.as_str() == "1000000001")
        .unwrap();

    // Two rows folded into one aggregate: 50 + 10 services, payments
    // reconstructed from the 89.10 average on both.
    assert_eq!(lead.total_services, 60.0);
    let payment = lead.total_payment.unwrap();
    assert!((payment - (50.0 * 89.10 + 10.0 * 89.10)).abs() < 1e-6);
    assert!(lead.derived.payment);
    assert!(lead.derived.submitted);
    assert!(lead.derived.allowed);
    assert_eq!(lead.rank_within_code, 1);
    assert_eq!(lead.total_beneficiaries, Some(48.0));
    assert_eq!(lead.services_per_beneficiary, Some(1.25));
}

#[test]
fn average_only_extract_reproduces_known_totals() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "physHCPCS.csv",
        "Rndrng_NPI,HCPCS_Cd,Tot_Srvcs,Tot_Benes,Avg_Sbmtd_Chrg\n\
         1000000123,77080,10,8,100.00\n\
         1000000123,77080,5,3,100.00\n",
    );
    let ds = ClaimsDatasetBuilder::new()
        .billing_data(dir.path().join("physHCPCS.csv"))
        .config(quiet_config(100))
        .build()
        .unwrap();

    let report = ds
        .provider_code_report(&["77080".to_string()], &[], None)
        .unwrap();
    assert_eq!(report.rows.len(), 1);
    let row = &report.rows[0];
    assert_eq!(row.total_services, 15.0);
    assert_eq!(row.total_beneficiaries, Some(11.0));
    assert_eq!(row.total_submitted, Some(1500.0));
    assert!(row.derived.submitted);
    assert!(!row.suppressed);
}

#[test]
fn masked_beneficiaries_are_flagged_not_divided() {
    let dir = tempfile::tempdir().unwrap();
    standard_fixture(dir.path());
    let ds = dataset(dir.path(), 100);

    let report = ds
        .provider_code_report(&["61889".to_string()], &[], None)
        .unwrap();
    assert_eq!(report.rows.len(), 1);
    let row = &report.rows[0];
    assert!(row.suppressed);
    assert_eq!(row.services_per_beneficiary, None);
    assert_eq!(row.total_services, 12.0);
}

#[test]
fn mixed_code_families_merge_into_one_provider_row() {
    let dir = tempfile::tempdir().unwrap();
    standard_fixture(dir.path());
    let ds = dataset(dir.path(), 100);

    let doctors = ds
        .doctors_by_codes(&["77080".to_string(), "A4593".to_string()], &[], None, None)
        .unwrap();

    let petra = doctors
        .rows
        .iter()
        .find(|d| d.npi.as_str() == "1000000001")
        .unwrap();
    // 60 from billing plus 20 from the referral extract, one row.
    assert_eq!(petra.total_services, 80.0);
    assert!(petra.code_breakdown.contains("77080 (60)"));
    assert!(petra.code_breakdown.contains("A4593 (20)"));
    assert_eq!(
        doctors
            .rows
            .iter()
            .filter(|d| d.npi.as_str() == "1000000001")
            .count(),
        1
    );

    // Affiliation enrichment: alphabetical-first hospital is primary.
    assert_eq!(
        petra.primary_hospital_name.as_deref(),
        Some("Community Regional Medical Center")
    );
    assert_eq!(
        petra.hospital_summary.as_deref(),
        Some("Community Regional Medical Center (CA), Saint Agnes Medical Center (CA)")
    );
}

#[test]
fn hospital_rollup_counts_physicians_and_gives_full_credit() {
    let dir = tempfile::tempdir().unwrap();
    standard_fixture(dir.path());
    let ds = dataset(dir.path(), 100);

    let hospitals = ds
        .hospitals_by_codes(&["77080".to_string(), "61889".to_string()], &[], None, None)
        .unwrap();
    assert_eq!(hospitals.rows.len(), 2);

    let f1 = hospitals
        .rows
        .iter()
        .find(|h| h.facility_id == "F1")
        .unwrap();
    let f2 = hospitals
        .rows
        .iter()
        .find(|h| h.facility_id == "F2")
        .unwrap();

    // F1: 1000000001 (60) + 1000000002 (30). F2: 1000000001 again with the
    // same 60 services (full credit), plus 1000000003 (12).
    assert_eq!(f1.total_procedures, 90.0);
    assert_eq!(f1.num_physicians, 2);
    assert_eq!(f1.avg_procedures_per_physician, 45.0);
    assert_eq!(f2.total_procedures, 72.0);
    assert_eq!(f2.num_physicians, 2);
    assert!(f2.code_breakdown.contains("77080 (60)"));
    assert!(f2.code_breakdown.contains("61889 (12)"));
}

#[test]
fn results_are_identical_across_chunk_sizes() {
    let dir = tempfile::tempdir().unwrap();
    standard_fixture(dir.path());

    let codes = vec!["77080".to_string(), "A4593".to_string(), "61889".to_string()];
    let one_row_chunks = dataset(dir.path(), 1)
        .doctors_by_codes(&codes, &[], None, None)
        .unwrap();
    let big_chunks = dataset(dir.path(), 10_000)
        .doctors_by_codes(&codes, &[], None, None)
        .unwrap();

    let key = |rows: &[ProviderSummary]| -> Vec<(String, f64, f64, String)> {
        rows.iter()
            .map(|r| {
                (
                    r.npi.as_str().to_string(),
                    r.total_services,
                    r.total_payments,
                    r.code_breakdown.clone(),
                )
            })
            .collect()
    };
    assert_eq!(key(&one_row_chunks.rows), key(&big_chunks.rows));
}

#[test]
fn state_filter_applies_before_aggregation() {
    let dir = tempfile::tempdir().unwrap();
    standard_fixture(dir.path());
    // Add an out-of-state competitor that would otherwise lead the ranking.
    let path = dir.path().join("physHCPCS.csv");
    let mut contents = std::fs::read_to_string(&path).unwrap();
    contents.push_str("1000000009,Big,Biller,Reno,NV,Diagnostic Radiology,77080,9999,9000,1.00,1.00,1.00\n");
    std::fs::write(&path, contents).unwrap();

    let ds = dataset(dir.path(), 100);
    let doctors = ds
        .doctors_by_codes(&["77080".to_string()], &["CA".to_string()], None, None)
        .unwrap();
    assert!(doctors.rows.iter().all(|d| d.state == "CA"));
    assert_eq!(doctors.rows[0].npi.as_str(), "1000000001");
}

#[test]
fn scan_cap_marks_results_truncated() {
    let dir = tempfile::tempdir().unwrap();
    standard_fixture(dir.path());
    let ds = ClaimsDatasetBuilder::from_directory(dir.path())
        .unwrap()
        .config(
            ConfigBuilder::new()
                .progress_bar(false)
                .chunk_size(1)
                .max_scan_rows(Some(2))
                .build(),
        )
        .build()
        .unwrap();

    let doctors = ds
        .doctors_by_codes(&["77080".to_string()], &[], None, None)
        .unwrap();
    assert!(doctors.truncated);
}

#[test]
fn missing_referral_extract_degrades_to_billing_only() {
    let dir = tempfile::tempdir().unwrap();
    standard_fixture(dir.path());
    std::fs::remove_file(dir.path().join("refHCPCS.csv")).unwrap();

    let ds = ClaimsDatasetBuilder::new()
        .billing_data(dir.path().join("physHCPCS.csv"))
        .referral_data(dir.path().join("refHCPCS.csv"))
        .config(quiet_config(100))
        .build()
        .unwrap();

    let doctors = ds
        .doctors_by_codes(&["77080".to_string(), "A4593".to_string()], &[], None, None)
        .unwrap();
    // HCPCS family contributes nothing; billing rows still come back.
    assert!(doctors.rows.iter().any(|d| d.npi.as_str() == "1000000001"));
    assert!(doctors.rows.iter().all(|d| !d.code_breakdown.contains("A4593")));
}

#[test]
fn malformed_rows_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "physHCPCS.csv",
        &format!(
            "{BILLING_HEADER}\n\
             1000000001,Petra,Lee,Fresno,CA,Diagnostic Radiology,77080,not-a-number,,,,\n\
             1000000002,Quayle,Max,Sacramento,CA,Diagnostic Radiology,77080,30,25,110.00,90.00,85.00\n"
        ),
    );
    let ds = ClaimsDatasetBuilder::new()
        .billing_data(dir.path().join("physHCPCS.csv"))
        .config(quiet_config(100))
        .build()
        .unwrap();

    let report = ds
        .provider_code_report(&["77080".to_string()], &[], None)
        .unwrap();
    // The bad row still aggregates with services coerced to 0.
    assert_eq!(report.rows.len(), 2);
    let bad = report
        .rows
        .iter()
        .find(|r| r.npi.as_str() == "1000000001")
        .unwrap();
    assert_eq!(bad.total_services, 0.0);
}
