//! Data preparation: raw records -> modelling table.
//!
//! - population density is rescaled (÷ `density_divisor`, default 1000)
//! - observed counts equal to the zero sentinel become true zeros
//! - observed counts must then be non-negative integers
//! - rows are sorted by (area, year) and given area/time/interaction indices

use std::collections::BTreeSet;

use crate::domain::{Observation, PreparedTable, RawRecord};
use crate::error::AppError;

/// Sentinel some exports write instead of a zero count.
pub const DEFAULT_ZERO_SENTINEL: f64 = 1e-4;

const SENTINEL_TOL: f64 = 1e-9;
const INTEGER_TOL: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct PrepareConfig {
    pub zero_sentinel: Option<f64>,
    pub density_divisor: f64,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            zero_sentinel: Some(DEFAULT_ZERO_SENTINEL),
            density_divisor: 1000.0,
        }
    }
}

/// Build the prepared table. The raw records are left untouched.
pub fn prepare(records: &[RawRecord], config: &PrepareConfig) -> Result<PreparedTable, AppError> {
    if !(config.density_divisor.is_finite() && config.density_divisor > 0.0) {
        return Err(AppError::input(format!(
            "Invalid density divisor: {}.",
            config.density_divisor
        )));
    }

    let area_ids: Vec<String> = records
        .iter()
        .map(|r| r.area_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let years: Vec<i32> = records
        .iter()
        .map(|r| r.year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut sorted: Vec<&RawRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.area_id.cmp(&b.area_id).then(a.year.cmp(&b.year)));

    let mut rows = Vec::with_capacity(sorted.len());
    let mut sentinel_hits = 0usize;

    for (row_idx, r) in sorted.into_iter().enumerate() {
        let mut observed = r.observed;
        if let Some(sentinel) = config.zero_sentinel {
            if (observed - sentinel).abs() <= SENTINEL_TOL {
                observed = 0.0;
                sentinel_hits += 1;
            }
        }

        let rounded = observed.round();
        if (observed - rounded).abs() > INTEGER_TOL || rounded < 0.0 {
            return Err(AppError::data(format!(
                "Observed count for area '{}' in {} is not a non-negative integer: {}.",
                r.area_id, r.year, r.observed
            )));
        }

        // Both lookups succeed: the lists were built from these records.
        let area_idx = area_ids.binary_search(&r.area_id).unwrap_or_default();
        let time_idx = years.binary_search(&r.year).unwrap_or_default();

        rows.push(Observation {
            area_id: r.area_id.clone(),
            year: r.year,
            observed: rounded as u64,
            expected: r.expected,
            population: r.population,
            pop_density: r.pop_density / config.density_divisor,
            poverty: r.poverty,
            area_idx,
            time_idx,
            interaction_idx: row_idx,
        });
    }

    if sentinel_hits > 0 {
        log::info!("Mapped {sentinel_hits} zero-sentinel counts back to 0");
    }

    Ok(PreparedTable {
        rows,
        area_ids,
        years,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(area: &str, year: i32, observed: f64) -> RawRecord {
        RawRecord {
            area_id: area.to_string(),
            year,
            observed,
            expected: 2.0,
            population: 1000.0,
            pop_density: 2500.0,
            poverty: 10.0,
        }
    }

    #[test]
    fn rescales_corrects_and_indexes() {
        let records = vec![raw("B", 2016, 3.0), raw("A", 2016, 1e-4), raw("A", 2015, 2.0)];
        let table = prepare(&records, &PrepareConfig::default()).unwrap();

        assert_eq!(table.area_ids, vec!["A", "B"]);
        assert_eq!(table.years, vec![2015, 2016]);

        let first = &table.rows[0];
        assert_eq!((first.area_id.as_str(), first.year), ("A", 2015));
        assert_eq!(first.interaction_idx, 0);
        assert!((first.pop_density - 2.5).abs() < 1e-12);

        let second = &table.rows[1];
        assert_eq!(second.observed, 0);
        assert_eq!((second.area_idx, second.time_idx, second.interaction_idx), (0, 1, 1));

        let third = &table.rows[2];
        assert_eq!((third.area_idx, third.time_idx), (1, 1));
        // Input left as it was.
        assert!((records[1].observed - 1e-4).abs() < 1e-15);
    }

    #[test]
    fn non_integer_counts_are_rejected() {
        let err = prepare(&[raw("A", 2015, 2.5)], &PrepareConfig::default()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn sentinel_can_be_disabled() {
        let config = PrepareConfig {
            zero_sentinel: None,
            ..PrepareConfig::default()
        };
        assert!(prepare(&[raw("A", 2015, 1e-4)], &config).is_err());
    }
}
