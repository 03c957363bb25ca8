//! Posterior marginal density curves.
//!
//! Fixed effects have Gaussian marginals. Precisions are log-normal because
//! the engine approximates `log τ` by a Gaussian around its mode.

use std::error::Error;
use std::path::Path;

use plotters::prelude::*;

use crate::error::AppError;
use crate::math::{normal_pdf, normal_quantile};
use crate::models::FitResult;

const DENSITY_POINTS: usize = 201;
/// Half-width of the plotted range in standard deviations.
const SPAN_SD: f64 = 4.0;
const PLOT_SIZE: (u32, u32) = (480, 280);

const CURVE: RGBColor = RGBColor(31, 78, 121);
const BAND: RGBColor = RGBColor(120, 170, 215);

#[derive(Debug, Clone, PartialEq)]
pub struct DensityCurve {
    pub name: String,
    /// `(x, density)` pairs, increasing in `x`.
    pub points: Vec<(f64, f64)>,
    /// 95% interval.
    pub lower: f64,
    pub upper: f64,
    /// Posterior mean for Gaussians, median for log-normals.
    pub center: f64,
}

impl DensityCurve {
    /// `None` unless `sd` is positive and finite.
    pub fn gaussian(name: impl Into<String>, mean: f64, sd: f64) -> Option<Self> {
        if !(sd > 0.0 && sd.is_finite() && mean.is_finite()) {
            return None;
        }
        let z = normal_quantile(0.975);
        let points = grid(-SPAN_SD, SPAN_SD)
            .map(|t| (mean + t * sd, normal_pdf(t) / sd))
            .collect();
        Some(Self {
            name: name.into(),
            points,
            lower: mean - z * sd,
            upper: mean + z * sd,
            center: mean,
        })
    }

    /// Density of `exp(X)` with `X ~ N(mu, sigma²)`.
    pub fn log_normal(name: impl Into<String>, mu: f64, sigma: f64) -> Option<Self> {
        if !(sigma > 0.0 && sigma.is_finite() && mu.is_finite()) {
            return None;
        }
        let z = normal_quantile(0.975);
        let points = grid(-SPAN_SD, SPAN_SD)
            .map(|t| {
                let x = (mu + t * sigma).exp();
                (x, normal_pdf(t) / (x * sigma))
            })
            .filter(|(x, d)| x.is_finite() && d.is_finite())
            .collect::<Vec<_>>();
        if points.len() < 2 {
            return None;
        }
        Some(Self {
            name: name.into(),
            points,
            lower: (mu - z * sigma).exp(),
            upper: (mu + z * sigma).exp(),
            center: mu.exp(),
        })
    }

    fn peak(&self) -> f64 {
        self.points.iter().map(|p| p.1).fold(0.0, f64::max)
    }
}

fn grid(from: f64, to: f64) -> impl Iterator<Item = f64> {
    let step = (to - from) / (DENSITY_POINTS - 1) as f64;
    (0..DENSITY_POINTS).map(move |k| from + step * k as f64)
}

/// Marginals of every fixed effect, then every precision with a finite sd.
pub fn fit_densities(fit: &FitResult) -> Vec<DensityCurve> {
    let fixed = fit
        .fixed
        .iter()
        .filter_map(|f| DensityCurve::gaussian(&f.name, f.mean, f.sd));
    let hyper = fit.hyper.iter().filter_map(|h| {
        let sd = h.log_precision_sd?;
        DensityCurve::log_normal(format!("precision of {}", h.name), h.log_precision, sd)
    });
    fixed.chain(hyper).collect()
}

pub fn write_density_plot(path: &Path, curve: &DensityCurve) -> Result<(), AppError> {
    render_density(path, curve)
        .map_err(|e| AppError::numeric(format!("Failed to draw density '{}': {e}", path.display())))?;
    log::debug!("Wrote density '{}'", path.display());
    Ok(())
}

fn render_density(path: &Path, curve: &DensityCurve) -> Result<(), Box<dyn Error>> {
    let (x0, x1) = match (curve.points.first(), curve.points.last()) {
        (Some(a), Some(b)) if b.0 > a.0 => (a.0, b.0),
        _ => return Err("density curve has no extent".into()),
    };
    let y1 = curve.peak() * 1.05;

    let root = SVGBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root).margin(10).build_cartesian_2d(x0..x1, 0.0..y1)?;

    let band: Vec<(f64, f64)> = curve
        .points
        .iter()
        .copied()
        .filter(|&(x, _)| x >= curve.lower && x <= curve.upper)
        .collect();
    chart.draw_series(AreaSeries::new(band, 0.0, BAND.mix(0.5)))?;
    chart.draw_series(LineSeries::new(curve.points.iter().copied(), CURVE.stroke_width(2)))?;

    chart.draw_series(std::iter::once(PathElement::new(
        vec![(x0, 0.0), (x1, 0.0)],
        BLACK.stroke_width(1),
    )))?;
    chart.draw_series(std::iter::once(PathElement::new(
        vec![(curve.center, 0.0), (curve.center, y1)],
        BLACK.mix(0.6),
    )))?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_curve_is_a_density() {
        let c = DensityCurve::gaussian("beta", 0.2, 0.5).unwrap();
        let step = c.points[1].0 - c.points[0].0;
        let mass: f64 = c.points.iter().map(|p| p.1 * step).sum();
        assert!((mass - 1.0).abs() < 1e-3, "mass {mass}");
        assert!((c.lower - (0.2 - 1.959964 * 0.5)).abs() < 1e-4);
        assert_eq!(c.points.len(), DENSITY_POINTS);
    }

    #[test]
    fn log_normal_interval_matches_precision_bounds() {
        let c = DensityCurve::log_normal("tau", 1.0, 0.3).unwrap();
        assert!(c.points.iter().all(|p| p.0 > 0.0 && p.1 >= 0.0));
        assert!(c.lower < c.center && c.center < c.upper);
        assert!((c.center - 1.0f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn degenerate_sd_gives_no_curve() {
        assert!(DensityCurve::gaussian("x", 0.0, 0.0).is_none());
        assert!(DensityCurve::log_normal("x", 0.0, f64::NAN).is_none());
    }

    #[test]
    fn density_plot_is_written() {
        let c = DensityCurve::gaussian("beta", 0.0, 1.0).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beta.svg");
        write_density_plot(&path, &c).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("<svg"));
    }
}
