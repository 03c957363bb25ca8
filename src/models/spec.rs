//! Declarative model specifications.
//!
//! Every model is Poisson with offset `log(expected)` and an intercept. On top
//! of that a specification lists:
//!
//! - optional fixed covariates
//! - the BYM spatial pair (always present)
//! - an optional temporal pair (RW2 + iid over years)
//! - an optional space-time interaction of type I, II or III

use std::fmt;

use serde::Serialize;

use crate::domain::Observation;

/// Fixed-effect covariates available in the prepared table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Covariate {
    PopDensity,
    Poverty,
}

impl Covariate {
    pub fn name(self) -> &'static str {
        match self {
            Covariate::PopDensity => "pop_density",
            Covariate::Poverty => "poverty",
        }
    }

    pub fn value(self, obs: &Observation) -> f64 {
        match self {
            Covariate::PopDensity => obs.pop_density,
            Covariate::Poverty => obs.poverty,
        }
    }
}

/// Space-time interaction structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InteractionType {
    /// iid over (area, year).
    TypeI,
    /// iid areas ⊗ RW2 years: each area follows its own smooth trend.
    TypeII,
    /// ICAR areas ⊗ iid years: a spatial surface independent per year.
    TypeIII,
}

impl InteractionType {
    pub fn display_name(self) -> &'static str {
        match self {
            InteractionType::TypeI => "type I",
            InteractionType::TypeII => "type II",
            InteractionType::TypeIII => "type III",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub id: String,
    pub display_name: String,
    /// RW2 + iid temporal terms.
    pub temporal: bool,
    pub interaction: Option<InteractionType>,
    pub covariates: Vec<Covariate>,
}

impl ModelSpec {
    fn new(
        id: &str,
        display_name: &str,
        temporal: bool,
        interaction: Option<InteractionType>,
        with_covariates: bool,
    ) -> Self {
        let covariates = if with_covariates {
            vec![Covariate::PopDensity, Covariate::Poverty]
        } else {
            Vec::new()
        };
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            temporal,
            interaction,
            covariates,
        }
    }

    /// The ten models compared by the pipeline, simplest first.
    pub fn standard_suite() -> Vec<ModelSpec> {
        use InteractionType::*;
        vec![
            Self::new("bym", "BYM", false, None, false),
            Self::new("bym_cov", "BYM + covariates", false, None, true),
            Self::new("bym_rw2", "BYM + RW2", true, None, false),
            Self::new("bym_rw2_cov", "BYM + RW2 + covariates", true, None, true),
            Self::new("type1", "BYM + RW2 + type I", true, Some(TypeI), false),
            Self::new("type1_cov", "BYM + RW2 + type I + covariates", true, Some(TypeI), true),
            Self::new("type2", "BYM + RW2 + type II", true, Some(TypeII), false),
            Self::new("type2_cov", "BYM + RW2 + type II + covariates", true, Some(TypeII), true),
            Self::new("type3", "BYM + RW2 + type III", true, Some(TypeIII), false),
            Self::new("type3_cov", "BYM + RW2 + type III + covariates", true, Some(TypeIII), true),
        ]
    }

    pub fn by_id(id: &str) -> Option<ModelSpec> {
        Self::standard_suite().into_iter().find(|m| m.id == id)
    }

    /// Whether the model needs at least three years (RW2 terms).
    pub fn needs_time_series(&self) -> bool {
        self.temporal || self.interaction == Some(InteractionType::TypeII)
    }

    /// Additive formula, for reports.
    pub fn formula(&self) -> String {
        let mut terms = vec!["1".to_string()];
        terms.extend(self.covariates.iter().map(|c| c.name().to_string()));
        terms.push("f(area, model = \"bym\", graph)".to_string());
        if self.temporal {
            terms.push("f(time, model = \"rw2\")".to_string());
            terms.push("f(time_iid, model = \"iid\")".to_string());
        }
        match self.interaction {
            Some(InteractionType::TypeI) => terms.push("f(area_time, model = \"iid\")".to_string()),
            Some(InteractionType::TypeII) => {
                terms.push("f(time_int, model = \"rw2\", group = area, control.group = iid)".to_string())
            }
            Some(InteractionType::TypeIII) => terms.push(
                "f(area_int, model = \"besag\", graph, group = time, control.group = iid)".to_string(),
            ),
            None => {}
        }
        format!("observed ~ {} + offset(log(expected))", terms.join(" + "))
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_has_ten_unique_models() {
        let suite = ModelSpec::standard_suite();
        assert_eq!(suite.len(), 10);
        let mut ids: Vec<&str> = suite.iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn covariate_variants_alternate() {
        let suite = ModelSpec::standard_suite();
        for pair in suite.chunks(2) {
            assert!(pair[0].covariates.is_empty());
            assert_eq!(pair[1].covariates.len(), 2);
            assert_eq!(pair[0].interaction, pair[1].interaction);
        }
    }

    #[test]
    fn formula_mentions_terms() {
        let m = ModelSpec::by_id("type2_cov").unwrap();
        let f = m.formula();
        assert!(f.contains("poverty"));
        assert!(f.contains("rw2"));
        assert!(f.contains("group = area"));
        assert!(!ModelSpec::by_id("bym").unwrap().formula().contains("rw2"));
        assert!(ModelSpec::by_id("nope").is_none());
    }
}
