/*!
 * Schema resolution for CMS public-use extracts
 *
 * CMS renames columns between file vintages (`Rndrng_NPI` vs `Rfrg_NPI` vs
 * `NPI`, `Tot_Srvcs` vs `Tot_Suplr_Srvcs`, ...), so nothing here assumes a
 * fixed header. Each logical column role carries a declarative matcher with
 * three tiers evaluated in order: exact names (case-insensitive), substring
 * candidates, then regular expressions. The first header that satisfies a
 * tier wins and later tiers are not consulted for that role.
 */

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{PufError, Result};

/// Logical column roles resolvable from an extract header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    ProviderId,
    Code,
    State,
    City,
    LastName,
    FirstName,
    Specialty,
    Services,
    Beneficiaries,
    AvgSubmitted,
    AvgAllowed,
    AvgPayment,
    TotalSubmitted,
    TotalAllowed,
    TotalPayment,
    FacilityId,
    FacilityName,
    FacilityCity,
    FacilityState,
}

impl ColumnRole {
    /// Stable role name used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            ColumnRole::ProviderId => "provider_id",
            ColumnRole::Code => "code",
            ColumnRole::State => "state",
            ColumnRole::City => "city",
            ColumnRole::LastName => "last_name",
            ColumnRole::FirstName => "first_name",
            ColumnRole::Specialty => "specialty",
            ColumnRole::Services => "services",
            ColumnRole::Beneficiaries => "beneficiaries",
            ColumnRole::AvgSubmitted => "avg_submitted_charge",
            ColumnRole::AvgAllowed => "avg_allowed_amount",
            ColumnRole::AvgPayment => "avg_medicare_payment",
            ColumnRole::TotalSubmitted => "total_submitted_charge",
            ColumnRole::TotalAllowed => "total_allowed_amount",
            ColumnRole::TotalPayment => "total_medicare_payment",
            ColumnRole::FacilityId => "facility_id",
            ColumnRole::FacilityName => "facility_name",
            ColumnRole::FacilityCity => "facility_city",
            ColumnRole::FacilityState => "facility_state",
        }
    }
}

impl std::fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The kind of extract being resolved, which decides role sets and
/// which roles are mandatory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractKind {
    /// Physician & Other Practitioners utilization file (billing NPI)
    Billing,
    /// DMEPOS referral utilization file (referring NPI)
    Referral,
    /// Facility affiliation crosswalk
    Affiliation,
    /// Hospital General Information directory
    HospitalDirectory,
}

impl ExtractKind {
    /// Human-readable dataset label for error messages
    pub fn label(&self) -> &'static str {
        match self {
            ExtractKind::Billing => "billing utilization",
            ExtractKind::Referral => "referral utilization",
            ExtractKind::Affiliation => "facility affiliation",
            ExtractKind::HospitalDirectory => "hospital directory",
        }
    }

    fn roles(&self) -> &'static [(ColumnRole, bool)] {
        // (role, mandatory)
        match self {
            ExtractKind::Billing | ExtractKind::Referral => &[
                (ColumnRole::ProviderId, true),
                (ColumnRole::Code, true),
                (ColumnRole::State, false),
                (ColumnRole::City, false),
                (ColumnRole::LastName, false),
                (ColumnRole::FirstName, false),
                (ColumnRole::Specialty, false),
                (ColumnRole::Services, false),
                (ColumnRole::Beneficiaries, false),
                (ColumnRole::AvgSubmitted, false),
                (ColumnRole::AvgAllowed, false),
                (ColumnRole::AvgPayment, false),
                (ColumnRole::TotalSubmitted, false),
                (ColumnRole::TotalAllowed, false),
                (ColumnRole::TotalPayment, false),
            ],
            ExtractKind::Affiliation => &[
                (ColumnRole::ProviderId, true),
                (ColumnRole::FacilityId, true),
            ],
            ExtractKind::HospitalDirectory => &[
                (ColumnRole::FacilityId, true),
                (ColumnRole::FacilityName, true),
                (ColumnRole::FacilityCity, false),
                (ColumnRole::FacilityState, false),
            ],
        }
    }
}

/// Tiered matcher for one column role
struct Matcher {
    exact: &'static [&'static str],
    contains: &'static [&'static str],
    patterns: Vec<Regex>,
    /// Total-money roles refuse headers whose name starts with "avg",
    /// so a per-event average is never summed as if it were a total
    reject_avg_prefix: bool,
}

impl Matcher {
    fn admits(&self, header: &str) -> bool {
        !(self.reject_avg_prefix && header.trim().to_lowercase().starts_with("avg"))
    }

    /// Locate the first header satisfying this matcher, tier by tier
    fn locate(&self, headers: &[String]) -> Option<usize> {
        for (i, h) in headers.iter().enumerate() {
            let ht = h.trim();
            if !self.admits(ht) {
                continue;
            }
            if self.exact.iter().any(|c| ht.eq_ignore_ascii_case(c)) {
                return Some(i);
            }
        }
        for (i, h) in headers.iter().enumerate() {
            let hl = h.trim().to_lowercase();
            if !self.admits(&hl) {
                continue;
            }
            if self.contains.iter().any(|c| hl.contains(&c.to_lowercase())) {
                return Some(i);
            }
        }
        for (i, h) in headers.iter().enumerate() {
            let ht = h.trim();
            if !self.admits(ht) {
                continue;
            }
            if self.patterns.iter().any(|re| re.is_match(ht)) {
                return Some(i);
            }
        }
        None
    }
}

fn regexes(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static column pattern must compile"))
        .collect()
}

lazy_static! {
    static ref MATCHERS: HashMap<ColumnRole, Matcher> = build_matchers();
}

fn build_matchers() -> HashMap<ColumnRole, Matcher> {
    let mut m = HashMap::new();

    m.insert(
        ColumnRole::ProviderId,
        Matcher {
            exact: &["Rndrng_NPI", "Rfrg_NPI", "NPI", "npi"],
            contains: &["npi"],
            patterns: regexes(&[r"(?i)^r(ndrng|frg)_npi$"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::Code,
        Matcher {
            exact: &["HCPCS_Cd", "HCPCS_CD", "hcpcs_cd", "hcpcs"],
            contains: &["hcpcs"],
            patterns: regexes(&[r"(?i)^hcpcs(_cd)?$"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::State,
        Matcher {
            exact: &[
                "Rndrng_Prvdr_State_Abrvtn",
                "Rfrg_Prvdr_State_Abrvtn",
                "State",
            ],
            contains: &["state", "abrvtn"],
            patterns: regexes(&[r"(?i)state.*abrvtn"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::City,
        Matcher {
            exact: &["Rndrng_Prvdr_City", "Rfrg_Prvdr_City", "City"],
            contains: &["city"],
            patterns: Vec::new(),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::LastName,
        Matcher {
            exact: &[
                "Rndrng_Prvdr_Last_Org_Name",
                "Rfrg_Prvdr_Last_Name_Org",
                "Last Name",
            ],
            contains: &["last_org", "last_name"],
            patterns: regexes(&[r"(?i)last.*(org|name)"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::FirstName,
        Matcher {
            exact: &[
                "Rndrng_Prvdr_First_Name",
                "Rfrg_Prvdr_First_Name",
                "First Name",
            ],
            contains: &["first_name"],
            patterns: regexes(&[r"(?i)first.*name"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::Specialty,
        Matcher {
            exact: &["Rndrng_Prvdr_Type", "Rfrg_Prvdr_Type", "Specialty"],
            contains: &["prvdr_type", "specialty"],
            patterns: Vec::new(),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::Services,
        Matcher {
            exact: &[
                "Tot_Srvcs",
                "Tot_Suplr_Srvcs",
                "Tot_Supplier_Srvcs",
                "Tot_Suplr_Srvc_Cnt",
            ],
            contains: &["srvcs"],
            patterns: regexes(&[r"(?i)^tot.*srvc"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::Beneficiaries,
        Matcher {
            exact: &["Tot_Benes", "Tot_Suplr_Benes", "Tot_Supplier_Benes"],
            contains: &["benes"],
            patterns: regexes(&[r"(?i)^tot.*bene"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::AvgSubmitted,
        Matcher {
            exact: &[
                "Avg_Sbmtd_Chrg",
                "Avg_Suplr_Sbmtd_Chrg",
                "Avg_Mdcr_Sbmtd_Chrg",
            ],
            contains: &[],
            patterns: regexes(&[r"(?i)^avg.*sbmtd"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::AvgAllowed,
        Matcher {
            exact: &["Avg_Mdcr_Alowd_Amt", "Avg_Suplr_Mdcr_Alowd_Amt"],
            contains: &[],
            patterns: regexes(&[r"(?i)^avg.*alowd"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::AvgPayment,
        Matcher {
            exact: &["Avg_Mdcr_Pymt_Amt", "Avg_Suplr_Mdcr_Pymt_Amt"],
            contains: &[],
            patterns: regexes(&[r"(?i)^avg.*pymt"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::TotalSubmitted,
        Matcher {
            exact: &["Tot_Sbmtd_Chrg_Amt", "Tot_Sbmtd_Chrg", "submitted_chrg_amt"],
            contains: &["sbmtd_chrg", "submitted_chrg"],
            patterns: regexes(&[r"(?i)sbmtd.*chrg"]),
            reject_avg_prefix: true,
        },
    );
    m.insert(
        ColumnRole::TotalAllowed,
        Matcher {
            exact: &[
                "Tot_Mdcr_Alowd_Amt",
                "Tot_Mdcr_Alowd",
                "medicare_allowed_amt",
            ],
            contains: &["alowd_amt", "allowed_amt"],
            patterns: regexes(&[r"(?i)alowd.*amt"]),
            reject_avg_prefix: true,
        },
    );
    m.insert(
        ColumnRole::TotalPayment,
        Matcher {
            exact: &[
                "Tot_Mdcr_Pymt_Amt",
                "Tot_Mdcr_Pymt",
                "medicare_payment_amt",
            ],
            contains: &["pymt_amt", "payment_amt"],
            patterns: regexes(&[r"(?i)pymt.*amt"]),
            reject_avg_prefix: true,
        },
    );
    m.insert(
        ColumnRole::FacilityId,
        Matcher {
            exact: &[
                "Facility Affiliations Certification Number",
                "Facility Type Certification Number",
                "Facility ID",
                "CCN",
            ],
            contains: &["certification number"],
            patterns: regexes(&[r"(?i)certification.*number"]),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::FacilityName,
        Matcher {
            exact: &["Facility Name", "Hospital Name"],
            contains: &["facility name", "hospital name"],
            patterns: Vec::new(),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::FacilityCity,
        Matcher {
            exact: &["City/Town", "City"],
            contains: &["city"],
            patterns: Vec::new(),
            reject_avg_prefix: false,
        },
    );
    m.insert(
        ColumnRole::FacilityState,
        Matcher {
            exact: &["State"],
            contains: &["state"],
            patterns: Vec::new(),
            reject_avg_prefix: false,
        },
    );

    m
}

/// Resolved role-to-column-index mapping for one extract header
#[derive(Debug, Clone)]
pub struct RoleMap {
    kind: ExtractKind,
    indices: HashMap<ColumnRole, usize>,
}

impl RoleMap {
    /// Resolve a header against the role set for `kind`.
    ///
    /// Optional roles that match nothing are simply absent; a mandatory role
    /// that matches nothing makes the whole dataset unusable.
    pub fn resolve(headers: &[String], kind: ExtractKind) -> Result<RoleMap> {
        let mut indices = HashMap::new();
        for &(role, mandatory) in kind.roles() {
            let matcher = &MATCHERS[&role];
            match matcher.locate(headers) {
                Some(idx) => {
                    indices.insert(role, idx);
                }
                None if mandatory => {
                    return Err(PufError::missing_column(role.name(), kind.label()));
                }
                None => {}
            }
        }
        Ok(RoleMap { kind, indices })
    }

    pub fn kind(&self) -> ExtractKind {
        self.kind
    }

    /// Column index for a role, if resolved
    pub fn get(&self, role: ColumnRole) -> Option<usize> {
        self.indices.get(&role).copied()
    }

    /// Cell value for a role from a CSV record, trimmed; None when the role
    /// is unresolved or the record is short
    pub fn cell<'r>(&self, record: &'r csv::StringRecord, role: ColumnRole) -> Option<&'r str> {
        self.get(role)
            .and_then(|idx| record.get(idx))
            .map(str::trim)
    }
}
