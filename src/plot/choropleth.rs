//! Choropleth maps of area polygons.
//!
//! Each map fills every area of the reference geometry with a class colour and
//! outlines it. Areas without a value for the mapped quantity get
//! [`NO_DATA`].

use std::collections::HashMap;
use std::error::Error;
use std::path::Path;

use geo::{Area, BoundingRect, LineString};
use plotters::prelude::*;

use crate::domain::{AreaGeometry, PreparedTable};
use crate::error::AppError;
use crate::models::AreaEffect;
use crate::plot::LegendEntry;
use crate::stats::{LisaClass, LisaRow, ObservedCategory, observed_category};

const MAP_WIDTH: u32 = 640;
const MAP_MIN_HEIGHT: u32 = 240;
const MAP_MAX_HEIGHT: u32 = 1200;
const MARGIN: u32 = 12;

pub const NO_DATA: RGBColor = RGBColor(160, 160, 160);
const BORDER: RGBColor = RGBColor(60, 60, 60);

/// Upper bounds of the relative-risk classes; the last class is open.
pub const RR_BREAKS: [f64; 6] = [0.5, 0.8, 0.95, 1.05, 1.25, 2.0];

const RR_COLORS: [RGBColor; 7] = [
    RGBColor(33, 102, 172),
    RGBColor(103, 169, 207),
    RGBColor(209, 229, 240),
    RGBColor(247, 247, 247),
    RGBColor(253, 219, 199),
    RGBColor(239, 138, 98),
    RGBColor(178, 24, 43),
];

pub fn lisa_color(class: LisaClass) -> RGBColor {
    match class {
        LisaClass::HighHigh => RGBColor(215, 25, 28),
        LisaClass::HighLow => RGBColor(253, 174, 97),
        LisaClass::LowHigh => RGBColor(171, 217, 233),
        LisaClass::LowLow => RGBColor(44, 123, 182),
        LisaClass::NotSignificant => RGBColor(235, 235, 235),
    }
}

pub fn category_color(category: ObservedCategory) -> RGBColor {
    match category {
        ObservedCategory::Zero => RGBColor(255, 255, 204),
        ObservedCategory::OneToFive => RGBColor(254, 217, 118),
        ObservedCategory::SixToTen => RGBColor(254, 178, 76),
        ObservedCategory::ElevenToTwenty => RGBColor(253, 141, 60),
        ObservedCategory::TwentyOneToFifty => RGBColor(240, 59, 32),
        ObservedCategory::OverFifty => RGBColor(189, 0, 38),
    }
}

/// Class index of a relative risk in [`RR_BREAKS`].
pub fn rr_class(rr: f64) -> usize {
    RR_BREAKS.iter().position(|&b| rr < b).unwrap_or(RR_BREAKS.len())
}

pub fn rr_color(rr: f64) -> RGBColor {
    if !rr.is_finite() {
        return NO_DATA;
    }
    RR_COLORS[rr_class(rr)]
}

pub fn lisa_legend() -> Vec<LegendEntry> {
    let mut legend: Vec<LegendEntry> = LisaClass::ALL
        .iter()
        .map(|&c| LegendEntry::new(c.to_string(), lisa_color(c)))
        .collect();
    legend.push(LegendEntry::new("no data", NO_DATA));
    legend
}

pub fn category_legend() -> Vec<LegendEntry> {
    let mut legend: Vec<LegendEntry> = ObservedCategory::ALL
        .iter()
        .map(|&c| LegendEntry::new(c.label(), category_color(c)))
        .collect();
    legend.push(LegendEntry::new("no data", NO_DATA));
    legend
}

pub fn rr_legend() -> Vec<LegendEntry> {
    let mut legend = Vec::with_capacity(RR_COLORS.len() + 1);
    for (k, &color) in RR_COLORS.iter().enumerate() {
        let label = match k {
            0 => format!("< {}", RR_BREAKS[0]),
            k if k == RR_BREAKS.len() => format!(">= {}", RR_BREAKS[k - 1]),
            k => format!("{} - {}", RR_BREAKS[k - 1], RR_BREAKS[k]),
        };
        legend.push(LegendEntry::new(label, color));
    }
    legend.push(LegendEntry::new("no data", NO_DATA));
    legend
}

/// LISA classes of one year.
pub fn lisa_map(
    path: &Path,
    geometries: &[AreaGeometry],
    rows: &[LisaRow],
    year: i32,
) -> Result<Vec<LegendEntry>, AppError> {
    let classes: HashMap<&str, LisaClass> = rows
        .iter()
        .filter(|r| r.year == year)
        .map(|r| (r.area_id.as_str(), r.class))
        .collect();
    draw_map(path, geometries, |id| {
        classes.get(id).map(|&c| lisa_color(c)).unwrap_or(NO_DATA)
    })?;
    Ok(lisa_legend())
}

/// Observed-count categories of one year.
pub fn observed_map(
    path: &Path,
    geometries: &[AreaGeometry],
    table: &PreparedTable,
    year: i32,
) -> Result<Vec<LegendEntry>, AppError> {
    let counts: HashMap<&str, u64> = table
        .rows_for_year(year)
        .map(|o| (o.area_id.as_str(), o.observed))
        .collect();
    draw_map(path, geometries, |id| {
        counts
            .get(id)
            .map(|&y| category_color(observed_category(y)))
            .unwrap_or(NO_DATA)
    })?;
    Ok(category_legend())
}

/// Posterior mean relative risk of the area-level effects.
pub fn relative_risk_map(
    path: &Path,
    geometries: &[AreaGeometry],
    effects: &[AreaEffect],
) -> Result<Vec<LegendEntry>, AppError> {
    let rr: HashMap<&str, f64> = effects.iter().map(|e| (e.area_id.as_str(), e.rr_mean)).collect();
    draw_map(path, geometries, |id| rr.get(id).map(|&v| rr_color(v)).unwrap_or(NO_DATA))?;
    Ok(rr_legend())
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
}

impl Bounds {
    fn of(geometries: &[AreaGeometry]) -> Option<Self> {
        let mut out: Option<Bounds> = None;
        for g in geometries {
            let Some(r) = g.geometry.bounding_rect() else {
                continue;
            };
            let b = Bounds {
                min_x: r.min().x,
                max_x: r.max().x,
                min_y: r.min().y,
                max_y: r.max().y,
            };
            out = Some(match out {
                None => b,
                Some(o) => Bounds {
                    min_x: o.min_x.min(b.min_x),
                    max_x: o.max_x.max(b.max_x),
                    min_y: o.min_y.min(b.min_y),
                    max_y: o.max_y.max(b.max_y),
                },
            });
        }
        out.map(Bounds::padded)
    }

    /// Keep a non-empty extent even for a single point-like geometry.
    fn padded(self) -> Self {
        let pad = 1e-9_f64.max(0.01 * (self.max_x - self.min_x).max(self.max_y - self.min_y));
        Bounds {
            min_x: self.min_x - pad,
            max_x: self.max_x + pad,
            min_y: self.min_y - pad,
            max_y: self.max_y + pad,
        }
    }

    fn canvas(&self) -> (u32, u32) {
        let inner = f64::from(MAP_WIDTH - 2 * MARGIN);
        let aspect = (self.max_y - self.min_y) / (self.max_x - self.min_x);
        let h = (inner * aspect).round() as u32 + 2 * MARGIN;
        (MAP_WIDTH, h.clamp(MAP_MIN_HEIGHT, MAP_MAX_HEIGHT))
    }
}

fn ring(line: &LineString<f64>) -> Vec<(f64, f64)> {
    line.coords().map(|c| (c.x, c.y)).collect()
}

fn draw_map(path: &Path, geometries: &[AreaGeometry], fill: impl Fn(&str) -> RGBColor) -> Result<(), AppError> {
    let bounds = Bounds::of(geometries).ok_or_else(|| AppError::data("Cannot draw a map without area geometries."))?;
    render_map(path, geometries, &bounds, &fill)
        .map_err(|e| AppError::numeric(format!("Failed to draw map '{}': {e}", path.display())))?;
    log::info!("Wrote map '{}'", path.display());
    Ok(())
}

fn render_map(
    path: &Path,
    geometries: &[AreaGeometry],
    bounds: &Bounds,
    fill: &impl Fn(&str) -> RGBColor,
) -> Result<(), Box<dyn Error>> {
    let root = SVGBackend::new(path, bounds.canvas()).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(MARGIN)
        .build_cartesian_2d(bounds.min_x..bounds.max_x, bounds.min_y..bounds.max_y)?;

    // Larger polygons first so enclaves stay visible on top of their hosts.
    let mut parts: Vec<(f64, RGBColor, Vec<(f64, f64)>)> = Vec::new();
    for g in geometries {
        let color = fill(&g.area_id);
        for polygon in &g.geometry.0 {
            parts.push((polygon.unsigned_area(), color, ring(polygon.exterior())));
        }
    }
    parts.sort_by(|a, b| b.0.total_cmp(&a.0));

    chart.draw_series(
        parts
            .iter()
            .map(|(_, color, points)| Polygon::new(points.clone(), color.filled())),
    )?;
    chart.draw_series(
        parts
            .iter()
            .map(|(_, _, points)| PathElement::new(points.clone(), BORDER.stroke_width(1))),
    )?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::contiguity::tests::square;

    #[test]
    fn rr_classes_follow_breaks() {
        assert_eq!(rr_class(0.2), 0);
        assert_eq!(rr_class(0.5), 1);
        assert_eq!(rr_class(1.0), 3);
        assert_eq!(rr_class(1.05), 4);
        assert_eq!(rr_class(5.0), 6);
        assert_eq!(rr_color(f64::NAN), NO_DATA);
    }

    #[test]
    fn legends_cover_every_class_plus_no_data() {
        assert_eq!(lisa_legend().len(), LisaClass::ALL.len() + 1);
        assert_eq!(category_legend().len(), ObservedCategory::ALL.len() + 1);
        let rr = rr_legend();
        assert_eq!(rr.len(), RR_BREAKS.len() + 2);
        assert_eq!(rr[0].label, "< 0.5");
        assert_eq!(rr[6].label, ">= 2");
    }

    #[test]
    fn map_is_written_as_svg() {
        let geoms = vec![square("a", 0.0, 0.0), square("b", 1.0, 0.0)];
        let effects = vec![AreaEffect {
            area_id: "a".into(),
            mean: 0.3,
            sd: 0.1,
            rr_mean: 1.35,
            prob_excess: 0.99,
        }];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rr.svg");
        let legend = relative_risk_map(&path, &geoms, &effects).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();

        assert_eq!(legend.len(), 8);
        assert!(text.contains("<svg"));
        assert!(text.contains("polygon"));
    }

    #[test]
    fn empty_geometry_is_a_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lisa.svg");
        let err = lisa_map(&path, &[], &[], 2020).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(!path.exists());
    }
}
