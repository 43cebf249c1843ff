/*!
 * Streaming (provider, code) aggregation
 *
 * `Aggregation` is the fold target for extract scans: rows arrive in file
 * order and land in an insertion-ordered map keyed by (NPI, code). Sums are
 * additive, derivation flags OR together, and descriptive fields keep the
 * first non-empty value seen. Finalization computes the per-aggregate
 * ratios, the suppression flag, and the within-code rank.
 */

use std::collections::HashMap;

use crate::data_types::{DerivedFlags, Npi, ProviderCodeAggregate, SourceRow};

/// In-flight accumulator for one (NPI, code) key
#[derive(Debug, Clone)]
struct Accumulator {
    npi: Npi,
    code: String,
    name: String,
    city: String,
    state: String,
    specialty: String,
    services: f64,
    beneficiaries: Option<f64>,
    submitted: Option<f64>,
    allowed: Option<f64>,
    payment: Option<f64>,
    derived: DerivedFlags,
}

fn add_opt(acc: &mut Option<f64>, value: Option<f64>) {
    if let Some(v) = value {
        *acc = Some(acc.unwrap_or(0.0) + v);
    }
}

fn keep_first(slot: &mut String, value: &str) {
    if slot.is_empty() && !value.is_empty() {
        *slot = value.to_string();
    }
}

/// Insertion-ordered (NPI, code) aggregation map
#[derive(Debug, Default)]
pub struct Aggregation {
    index: HashMap<(Npi, String), usize>,
    accumulators: Vec<Accumulator>,
    /// Set when the producing scan hit its soft row cap
    pub truncated: bool,
}

impl Aggregation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    /// Fold one source row into the map
    pub fn fold(&mut self, row: SourceRow) {
        let key = (row.npi.clone(), row.code.clone());
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                let idx = self.accumulators.len();
                self.index.insert(key, idx);
                self.accumulators.push(Accumulator {
                    npi: row.npi.clone(),
                    code: row.code.clone(),
                    name: String::new(),
                    city: String::new(),
                    state: String::new(),
                    specialty: String::new(),
                    services: 0.0,
                    beneficiaries: None,
                    submitted: None,
                    allowed: None,
                    payment: None,
                    derived: DerivedFlags::default(),
                });
                idx
            }
        };

        let acc = &mut self.accumulators[idx];
        keep_first(&mut acc.name, &row.display_name());
        keep_first(&mut acc.city, &row.city);
        keep_first(&mut acc.state, &row.state);
        keep_first(&mut acc.specialty, &row.specialty);
        acc.services += row.services;
        add_opt(&mut acc.beneficiaries, row.beneficiaries);
        add_opt(&mut acc.submitted, row.submitted);
        add_opt(&mut acc.allowed, row.allowed);
        add_opt(&mut acc.payment, row.payment);
        acc.derived.merge(row.derived);
    }

    /// Finalize into ranked aggregates, sorted by (code asc, metric desc).
    ///
    /// Ties on the metric keep first-encountered order (stable sort), and
    /// `rank_within_code` is the 1-based position inside each code group.
    pub fn finalize(self) -> AggregationResult {
        let truncated = self.truncated;
        let mut rows: Vec<ProviderCodeAggregate> = self
            .accumulators
            .into_iter()
            .map(finalize_one)
            .collect();

        let metric = RankMetric::select(&rows);
        rows.sort_by(|a, b| {
            a.code.cmp(&b.code).then_with(|| {
                metric
                    .value(b)
                    .partial_cmp(&metric.value(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });

        let mut rank = 0u32;
        for i in 0..rows.len() {
            if i == 0 || rows[i].code != rows[i - 1].code {
                rank = 0;
            }
            rank += 1;
            rows[i].rank_within_code = rank;
        }

        AggregationResult { rows, metric, truncated }
    }
}

fn finalize_one(acc: Accumulator) -> ProviderCodeAggregate {
    let benes = acc.beneficiaries.unwrap_or(0.0);
    let services_per_beneficiary = if benes > 0.0 {
        Some(round3(acc.services / benes))
    } else {
        None
    };
    let suppressed = acc.services > 0.0 && benes == 0.0;

    ProviderCodeAggregate {
        npi: acc.npi,
        code: acc.code,
        name: acc.name,
        city: acc.city,
        state: acc.state,
        specialty: acc.specialty,
        total_services: acc.services,
        total_beneficiaries: acc.beneficiaries,
        total_submitted: acc.submitted,
        total_allowed: acc.allowed,
        total_payment: acc.payment,
        services_per_beneficiary,
        derived: acc.derived,
        suppressed,
        rank_within_code: 0,
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Finalized aggregation output
#[derive(Debug)]
pub struct AggregationResult {
    pub rows: Vec<ProviderCodeAggregate>,
    pub metric: RankMetric,
    pub truncated: bool,
}

/// The measure used for within-code ranking, chosen once per result in
/// priority order: services, beneficiaries, payment, allowed, submitted.
/// A measure qualifies when at least one aggregate carries a value for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMetric {
    Services,
    Beneficiaries,
    Payment,
    Allowed,
    Submitted,
}

impl RankMetric {
    fn select(rows: &[ProviderCodeAggregate]) -> RankMetric {
        if rows.iter().any(|r| r.total_services != 0.0) {
            return RankMetric::Services;
        }
        if rows.iter().any(|r| r.total_beneficiaries.is_some()) {
            return RankMetric::Beneficiaries;
        }
        if rows.iter().any(|r| r.total_payment.is_some()) {
            return RankMetric::Payment;
        }
        if rows.iter().any(|r| r.total_allowed.is_some()) {
            return RankMetric::Allowed;
        }
        if rows.iter().any(|r| r.total_submitted.is_some()) {
            return RankMetric::Submitted;
        }
        RankMetric::Services
    }

    /// Metric value for one aggregate, absent measures counting as 0
    pub fn value(&self, row: &ProviderCodeAggregate) -> f64 {
        match self {
            RankMetric::Services => row.total_services,
            RankMetric::Beneficiaries => row.total_beneficiaries.unwrap_or(0.0),
            RankMetric::Payment => row.total_payment.unwrap_or(0.0),
            RankMetric::Allowed => row.total_allowed.unwrap_or(0.0),
            RankMetric::Submitted => row.total_submitted.unwrap_or(0.0),
        }
    }
}
