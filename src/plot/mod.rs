//! SVG figures for the HTML report.
//!
//! Responsibilities:
//!
//! - choropleth maps (LISA classes, observed-count categories, relative risk)
//! - posterior marginal density curves with the 95% interval shaded
//!
//! Figures carry no text. Titles and legends live in the HTML around them,
//! which keeps rendering independent of system fonts.

pub mod choropleth;
pub mod density;

pub use choropleth::*;
pub use density::*;

use plotters::style::RGBColor;

/// One legend swatch, rendered by the report.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub color: RGBColor,
}

impl LegendEntry {
    pub fn new(label: impl Into<String>, color: RGBColor) -> Self {
        Self {
            label: label.into(),
            color,
        }
    }

    /// CSS colour, e.g. `#d7191c`.
    pub fn hex(&self) -> String {
        let RGBColor(r, g, b) = self.color;
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_lowercase_six_digits() {
        let e = LegendEntry::new("x", RGBColor(215, 25, 28));
        assert_eq!(e.hex(), "#d7191c");
    }
}
