use crate::models::{Period, TimeSeries};
use log::warn;
use std::collections::BTreeMap;

/// Allowed drift of a normalized row sum from 1.0.
pub const SHARE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedShares {
    pub shares: TimeSeries,
    /// Periods dropped because their row total was zero
    pub excluded: Vec<Period>,
}

/// Divide every value by its period's total across the whole taxonomy.
///
/// Periods whose total is zero (or not finite) cannot be normalized and
/// are left out of the result rather than emitted as NaN.
pub fn normalize_shares(series: &TimeSeries) -> NormalizedShares {
    let mut rows = BTreeMap::new();
    let mut excluded = Vec::new();

    for (period, row) in series.rows() {
        let total: f64 = row.iter().sum();
        if total == 0.0 || !total.is_finite() {
            excluded.push(period);
            continue;
        }
        rows.insert(period, row.iter().map(|value| value / total).collect());
    }

    if !excluded.is_empty() {
        let listed: Vec<String> = excluded.iter().map(|p| p.to_string()).collect();
        warn!(
            "Excluded {} zero-total period(s) from shares: {}",
            excluded.len(),
            listed.join(", ")
        );
    }

    NormalizedShares {
        shares: TimeSeries::from_rows(series.taxonomy().clone(), rows),
        excluded,
    }
}

/// True when the row's proportions add up to one.
pub fn sums_to_one(row: &[f64]) -> bool {
    (row.iter().sum::<f64>() - 1.0).abs() <= SHARE_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Taxonomy;

    fn series(rows: &[(i32, [f64; 3])]) -> TimeSeries {
        let taxonomy = Taxonomy::new(["Coal", "Gas", "Pumped Storage"]).unwrap();
        let rows = rows
            .iter()
            .map(|(year, values)| (Period::annual(*year), values.to_vec()))
            .collect();
        TimeSeries::from_rows(taxonomy, rows)
    }

    #[test]
    fn test_rows_sum_to_one() {
        let absolute = series(&[
            (2018, [1000.0, 500.0, 0.0]),
            (2019, [0.1, 0.2, 0.3]),
            (2020, [12345.678, 98765.4321, 3.3]),
        ]);
        let normalized = normalize_shares(&absolute);

        assert!(normalized.excluded.is_empty());
        assert_eq!(normalized.shares.len(), 3);
        for (_, row) in normalized.shares.rows() {
            assert!(sums_to_one(row), "{:?}", row);
            assert!(row.iter().all(|v| (0.0..=1.0).contains(v)));
        }

        let coal = normalized.shares.value(Period::annual(2018), "Coal").unwrap();
        assert!((coal - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_total_periods_are_excluded() {
        let absolute = series(&[(2000, [0.0, 0.0, 0.0]), (2001, [1.0, 1.0, 0.0])]);
        let normalized = normalize_shares(&absolute);

        assert_eq!(normalized.excluded, vec![Period::annual(2000)]);
        assert_eq!(normalized.shares.len(), 1);
        assert!(normalized.shares.row(Period::annual(2000)).is_none());
        assert!(normalized
            .shares
            .rows()
            .all(|(_, row)| row.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_negative_flows_still_sum_to_one() {
        // Pumped storage is a net consumer
        let absolute = series(&[(2015, [60.0, 50.0, -10.0])]);
        let normalized = normalize_shares(&absolute);
        let row = normalized.shares.row(Period::annual(2015)).unwrap();

        assert!(sums_to_one(row));
        assert!(row[2] < 0.0);
    }
}
