//! Descriptive statistics: notification rates, SMR and per-year summaries.

use serde::Serialize;

use crate::domain::{PreparedTable, SmrRecord, SmrTable};

/// Cases per this many inhabitants.
pub const RATE_SCALE: f64 = 100_000.0;

/// Notification rate of one year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearRate {
    pub year: i32,
    pub cases: u64,
    pub population: f64,
    /// Cases per 100 000; `None` when the year has no population.
    pub rate: Option<f64>,
}

/// Per-year notification rates, in year order.
pub fn notification_rates(table: &PreparedTable) -> Vec<YearRate> {
    table
        .years
        .iter()
        .map(|&year| {
            let (cases, population) = table
                .rows_for_year(year)
                .fold((0u64, 0.0), |(c, p), r| (c + r.observed, p + r.population));
            let rate = (population > 0.0).then(|| cases as f64 / population * RATE_SCALE);
            YearRate {
                year,
                cases,
                population,
                rate,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SmrConfig {
    /// Treat zero counts as missing (SMR = `None`) instead of SMR = 0.
    pub zero_as_missing: bool,
}

/// Attach `smr = observed / expected` to every row.
pub fn with_smr(table: &PreparedTable, config: &SmrConfig) -> SmrTable {
    let rows = table
        .rows
        .iter()
        .map(|obs| {
            let smr = if obs.expected <= 0.0 || !obs.expected.is_finite() {
                None
            } else if obs.observed == 0 && config.zero_as_missing {
                None
            } else {
                Some(obs.observed as f64 / obs.expected)
            };
            SmrRecord {
                observation: obs.clone(),
                smr,
            }
        })
        .collect();

    SmrTable {
        rows,
        area_ids: table.area_ids.clone(),
        years: table.years.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearSummary {
    pub year: i32,
    pub areas: usize,
    pub cases: u64,
    pub expected: f64,
    pub smr_mean: Option<f64>,
    pub smr_min: Option<f64>,
    pub smr_max: Option<f64>,
    /// Rows without an SMR value.
    pub smr_missing: usize,
}

pub fn year_summaries(table: &SmrTable) -> Vec<YearSummary> {
    table
        .years
        .iter()
        .map(|&year| {
            let rows: Vec<&SmrRecord> = table.rows.iter().filter(|r| r.observation.year == year).collect();
            let smrs: Vec<f64> = rows.iter().filter_map(|r| r.smr).collect();

            let smr_mean = (!smrs.is_empty()).then(|| smrs.iter().sum::<f64>() / smrs.len() as f64);
            let smr_min = smrs.iter().copied().reduce(f64::min);
            let smr_max = smrs.iter().copied().reduce(f64::max);

            YearSummary {
                year,
                areas: rows.len(),
                cases: rows.iter().map(|r| r.observation.observed).sum(),
                expected: rows.iter().map(|r| r.observation.expected).sum(),
                smr_mean,
                smr_min,
                smr_max,
                smr_missing: rows.len() - smrs.len(),
            }
        })
        .collect()
}

/// Ordinal class of an observed count, for the category map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ObservedCategory {
    Zero,
    OneToFive,
    SixToTen,
    ElevenToTwenty,
    TwentyOneToFifty,
    OverFifty,
}

impl ObservedCategory {
    pub const ALL: [ObservedCategory; 6] = [
        ObservedCategory::Zero,
        ObservedCategory::OneToFive,
        ObservedCategory::SixToTen,
        ObservedCategory::ElevenToTwenty,
        ObservedCategory::TwentyOneToFifty,
        ObservedCategory::OverFifty,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ObservedCategory::Zero => "0",
            ObservedCategory::OneToFive => "1-5",
            ObservedCategory::SixToTen => "6-10",
            ObservedCategory::ElevenToTwenty => "11-20",
            ObservedCategory::TwentyOneToFifty => "21-50",
            ObservedCategory::OverFifty => ">50",
        }
    }
}

pub fn observed_category(count: u64) -> ObservedCategory {
    match count {
        0 => ObservedCategory::Zero,
        1..=5 => ObservedCategory::OneToFive,
        6..=10 => ObservedCategory::SixToTen,
        11..=20 => ObservedCategory::ElevenToTwenty,
        21..=50 => ObservedCategory::TwentyOneToFifty,
        _ => ObservedCategory::OverFifty,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::Observation;

    pub(crate) fn obs(area: &str, area_idx: usize, year: i32, time_idx: usize, observed: u64, expected: f64) -> Observation {
        Observation {
            area_id: area.to_string(),
            year,
            observed,
            expected,
            population: 10_000.0,
            pop_density: 1.5,
            poverty: 20.0,
            area_idx,
            time_idx,
            interaction_idx: 0,
        }
    }

    fn table() -> PreparedTable {
        PreparedTable {
            rows: vec![
                obs("A", 0, 2015, 0, 4, 2.0),
                obs("A", 0, 2016, 1, 0, 2.0),
                obs("B", 1, 2015, 0, 6, 3.0),
                obs("B", 1, 2016, 1, 3, 0.0),
            ],
            area_ids: vec!["A".into(), "B".into()],
            years: vec![2015, 2016],
        }
    }

    #[test]
    fn notification_rate_is_cases_over_population() {
        let rates = notification_rates(&table());
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].cases, 10);
        let expected = 10.0 / 20_000.0 * 100_000.0;
        assert!((rates[0].rate.unwrap() - expected).abs() < 1e-9);
        assert!(rates.iter().all(|r| r.rate.unwrap() >= 0.0));
    }

    #[test]
    fn year_without_population_has_no_rate() {
        let mut t = table();
        for r in &mut t.rows {
            r.population = 0.0;
        }
        assert!(notification_rates(&t).iter().all(|r| r.rate.is_none()));
    }

    #[test]
    fn smr_keeps_zero_unless_configured() {
        let smr = with_smr(&table(), &SmrConfig::default());
        assert_eq!(smr.rows[1].smr, Some(0.0));
        assert_eq!(smr.rows[3].smr, None);
        assert_eq!(smr.rows[0].smr, Some(2.0));

        let smr = with_smr(&table(), &SmrConfig { zero_as_missing: true });
        assert_eq!(smr.rows[1].smr, None);
    }

    #[test]
    fn summaries_cover_every_year() {
        let s = year_summaries(&with_smr(&table(), &SmrConfig::default()));
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].smr_mean, Some(2.0));
        assert_eq!(s[1].smr_missing, 1);
        assert_eq!(s[1].smr_max, Some(0.0));
    }

    #[test]
    fn categories_follow_bounds() {
        assert_eq!(observed_category(0), ObservedCategory::Zero);
        assert_eq!(observed_category(5), ObservedCategory::OneToFive);
        assert_eq!(observed_category(6), ObservedCategory::SixToTen);
        assert_eq!(observed_category(20), ObservedCategory::ElevenToTwenty);
        assert_eq!(observed_category(50), ObservedCategory::TwentyOneToFifty);
        assert_eq!(observed_category(51).label(), ">50");
    }
}
