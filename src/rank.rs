/*!
 * Ranking and truncation for finished report rows
 */

use std::cmp::Ordering;

fn desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Sort rows descending on (primary, secondary), drop rows below the
/// minimum primary volume, and cap the output length.
///
/// The sort is stable, so rows tying on both keys keep their incoming
/// order. NaN keys compare as equal rather than poisoning the sort.
pub fn rank_and_truncate<T, P, S>(
    mut rows: Vec<T>,
    primary: P,
    secondary: S,
    min_primary: Option<f64>,
    max_rows: usize,
) -> Vec<T>
where
    P: Fn(&T) -> f64,
    S: Fn(&T) -> f64,
{
    if let Some(min) = min_primary {
        rows.retain(|r| primary(r) >= min);
    }
    rows.sort_by(|a, b| desc(primary(a), primary(b)).then_with(|| desc(secondary(a), secondary(b))));
    rows.truncate(max_rows);
    rows
}
