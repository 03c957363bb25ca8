//! Hyperparameter grids.
//!
//! Precisions are searched on `θ = log τ`, so an evenly spaced grid in `θ` is
//! a log-spaced grid in `τ`. The search is a deterministic grid sweep:
//! - no local-optimiser tuning
//! - same inputs, same result, regardless of thread count

use crate::error::AppError;

/// `steps` evenly spaced points between `min` and `max` (inclusive).
pub fn linspace(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, AppError> {
    if !(min.is_finite() && max.is_finite() && max > min) {
        return Err(AppError::input(format!(
            "Invalid grid range: min={min}, max={max} (must be finite and max>min)."
        )));
    }
    if steps < 2 {
        return Err(AppError::input("Grid steps must be >= 2."));
    }

    let step = (max - min) / (steps as f64 - 1.0);
    Ok((0..steps).map(|i| min + step * i as f64).collect())
}

/// Candidates `center ± half_width` (`points` values, odd counts include the
/// center), clamped to `bounds` and deduplicated.
pub fn sweep_candidates(center: f64, half_width: f64, points: usize, bounds: (f64, f64)) -> Vec<f64> {
    let (lo, hi) = bounds;
    let raw = match linspace(center - half_width, center + half_width, points.max(2)) {
        Ok(values) => values,
        Err(_) => vec![center],
    };

    let mut out: Vec<f64> = Vec::with_capacity(raw.len());
    for v in raw {
        let v = v.clamp(lo, hi);
        if !out.iter().any(|o| (o - v).abs() < 1e-12) {
            out.push(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_includes_endpoints() {
        let g = linspace(-1.0, 1.0, 5).unwrap();
        assert_eq!(g, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert!(linspace(1.0, 1.0, 3).is_err());
        assert!(linspace(0.0, 1.0, 1).is_err());
    }

    #[test]
    fn sweep_is_centered_and_clamped() {
        let c = sweep_candidates(4.0, 4.0, 9, (-8.0, 16.0));
        assert_eq!(c.len(), 9);
        assert!(c.contains(&4.0));

        let c = sweep_candidates(15.0, 4.0, 9, (-8.0, 16.0));
        assert!(c.iter().all(|&v| v <= 16.0));
        assert!(c.len() < 9);
    }
}
