//! Export the comparison table (CSV) and fitted summaries (JSON).
//!
//! The CSV is meant to be easy to consume in spreadsheets: one row per model,
//! empty cells where a cross-validation score is unavailable.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;

use crate::error::AppError;
use crate::fit::ComparisonTable;
use crate::models::FitResult;

#[derive(Serialize)]
struct CsvRow<'a> {
    model: &'a str,
    name: &'a str,
    mean_deviance: String,
    p_d: String,
    dic: String,
    waic: String,
    p_waic: String,
    loocv: String,
    lcv3: String,
    lcv5: String,
    lcv10: String,
}

fn num(v: f64) -> String {
    format!("{v:.4}")
}

fn opt(v: Option<f64>) -> String {
    v.map(num).unwrap_or_default()
}

/// Write the comparison table to a CSV file.
pub fn write_comparison_csv(path: &Path, table: &ComparisonTable) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::input(format!("Failed to create export CSV '{}': {e}", path.display())))?;

    for r in &table.rows {
        writer
            .serialize(CsvRow {
                model: &r.model_id,
                name: &r.display_name,
                mean_deviance: num(r.mean_deviance),
                p_d: num(r.p_d),
                dic: num(r.dic),
                waic: num(r.waic),
                p_waic: num(r.p_waic),
                loocv: opt(r.loocv),
                lcv3: opt(r.lcv3),
                lcv5: opt(r.lcv5),
                lcv10: opt(r.lcv10),
            })
            .map_err(|e| AppError::input(format!("Failed to write export CSV row: {e}")))?;
    }

    writer
        .flush()
        .map_err(|e| AppError::input(format!("Failed to flush export CSV: {e}")))?;
    log::info!("Wrote comparison table to '{}'", path.display());
    Ok(())
}

/// Write posterior summaries of the fits as pretty JSON.
pub fn write_fits_json(path: &Path, fits: &[FitResult]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create summary JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), fits)
        .map_err(|e| AppError::input(format!("Failed to write summary JSON: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::ComparisonRow;

    #[test]
    fn csv_has_header_and_blank_missing_scores() {
        let table = ComparisonTable {
            rows: vec![ComparisonRow {
                model_id: "bym".into(),
                display_name: "BYM".into(),
                mean_deviance: 40.0,
                p_d: 3.5,
                dic: 43.5,
                waic: 44.0,
                p_waic: 4.0,
                loocv: Some(2.25),
                lcv3: None,
                lcv5: Some(2.5),
                lcv10: Some(2.75),
            }],
        };
        let file = tempfile::NamedTempFile::new().unwrap();
        write_comparison_csv(file.path(), &table).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();

        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "model,name,mean_deviance,p_d,dic,waic,p_waic,loocv,lcv3,lcv5,lcv10"
        );
        assert_eq!(
            lines.next().unwrap(),
            "bym,BYM,40.0000,3.5000,43.5000,44.0000,4.0000,2.2500,,2.5000,2.7500"
        );
    }
}
