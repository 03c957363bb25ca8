//! Cross-validation scores.
//!
//! Every score is a predictive density of one observation given the others
//! (leave-one-out) or given everything outside its group (grouped CV). Scores
//! are aggregated as the mean negative log score over the usable values.

use rayon::prelude::*;

use crate::models::{CrossValidation, FitResult, LinearPredictorPosterior};

/// Level-set counts of the grouped variants reported by default.
pub const DEFAULT_LEVEL_SETS: [usize; 3] = [3, 5, 10];

/// Leave-one-out predictive densities (CPO).
pub fn loo_scores(posterior: &LinearPredictorPosterior) -> Vec<Option<f64>> {
    (0..posterior.len())
        .into_par_iter()
        .map(|i| posterior.predictive_density(i, &[i]))
        .collect()
}

/// Leave-group-out predictive densities, groups built from `level_sets`
/// levels of posterior correlation.
pub fn group_cv_scores(posterior: &LinearPredictorPosterior, level_sets: usize) -> Vec<Option<f64>> {
    (0..posterior.len())
        .into_par_iter()
        .map(|i| {
            let group = posterior.correlation_group(i, level_sets);
            posterior.predictive_density(i, &group)
        })
        .collect()
}

/// Mean of `-ln(score)` over finite positive scores; `None` if none remain.
pub fn log_score(scores: &[Option<f64>]) -> Option<f64> {
    let usable: Vec<f64> = scores
        .iter()
        .flatten()
        .copied()
        .filter(|s| s.is_finite() && *s > 0.0)
        .collect();
    if usable.is_empty() {
        return None;
    }
    Some(usable.iter().map(|s| -s.ln()).sum::<f64>() / usable.len() as f64)
}

pub fn cross_validate(fit: &FitResult, level_sets: &[usize]) -> CrossValidation {
    let posterior = &fit.predictor;
    let loo = loo_scores(posterior);
    let dropped = loo.iter().filter(|s| s.is_none()).count();
    if dropped > 0 {
        log::warn!("{}: {dropped} leave-one-out scores unavailable", fit.model_id);
    }

    let group = level_sets
        .iter()
        .map(|&k| (k, log_score(&group_cv_scores(posterior, k))))
        .collect();

    CrossValidation {
        loocv: log_score(&loo),
        group,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::posterior::tests::independent;

    #[test]
    fn log_score_drops_unusable_values() {
        let scores = [Some(0.5), None, Some(f64::NAN), Some(0.0), Some(0.25)];
        let expected = (-(0.5f64).ln() - (0.25f64).ln()) / 2.0;
        assert!((log_score(&scores).unwrap() - expected).abs() < 1e-12);
        assert_eq!(log_score(&[None, Some(-1.0)]), None);
        assert_eq!(log_score(&[]), None);
    }

    #[test]
    fn loo_matches_cpo_and_uncorrelated_groups() {
        let post = independent(vec![2, 6, 3], vec![0.8, 1.7, 1.0], 0.03);
        let cpo = post.cpo();
        assert_eq!(loo_scores(&post), cpo);
        // Uncorrelated group members do not change the prediction.
        for (g, c) in group_cv_scores(&post, 3).iter().zip(&cpo) {
            assert!((g.unwrap() - c.unwrap()).abs() < 1e-12);
        }
    }
}
