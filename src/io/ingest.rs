//! GeoJSON ingest.
//!
//! Turns a `FeatureCollection` with one feature per (area, year) into raw
//! records plus the reference-year area boundaries.
//!
//! Design goals:
//! - **Configurable property names** (`ColumnNames`)
//! - **Row-level validation** (skip bad features, but report what happened)
//! - **Strict uniqueness** of (area, year): a duplicate aborts the load
//! - **Separation of concerns**: no unit conversion or sentinel handling here

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use geo::MultiPolygon;
use geojson::{Feature, GeoJson};
use serde_json::Value;

use crate::domain::{AreaGeometry, ColumnNames, RawRecord};
use crate::error::AppError;

/// How to read the input file.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub path: PathBuf,
    pub columns: ColumnNames,
    /// Year whose polygons define the areas; `None` = earliest year.
    pub reference_year: Option<i32>,
}

/// A feature-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    /// Zero-based feature index in the collection.
    pub feature: usize,
    pub area_id: Option<String>,
    pub message: String,
}

/// Ingest output: raw records + reference geometries + row errors.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub records: Vec<RawRecord>,
    pub geometries: Vec<AreaGeometry>,
    pub reference_year: i32,
    pub row_errors: Vec<RowError>,
    pub features_read: usize,
}

/// Load a GeoJSON dataset from disk.
pub fn load_dataset(config: &IngestConfig) -> Result<RawDataset, AppError> {
    let text = std::fs::read_to_string(&config.path).map_err(|e| {
        AppError::input(format!("Failed to read '{}': {e}", config.path.display()))
    })?;
    parse_dataset(&text, &config.columns, config.reference_year, &config.path)
}

/// Parse GeoJSON text. `origin` is only used in messages.
pub fn parse_dataset(
    text: &str,
    columns: &ColumnNames,
    reference_year: Option<i32>,
    origin: &Path,
) -> Result<RawDataset, AppError> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e| AppError::input(format!("Invalid GeoJSON in '{}': {e}", origin.display())))?;

    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(AppError::input(format!(
            "'{}' is not a GeoJSON FeatureCollection.",
            origin.display()
        )));
    };

    let features_read = collection.features.len();
    let mut records = Vec::with_capacity(features_read);
    let mut geometry_by_row: Vec<Option<MultiPolygon<f64>>> = Vec::with_capacity(features_read);
    let mut row_errors = Vec::new();

    for (idx, feature) in collection.features.into_iter().enumerate() {
        match parse_feature(feature, columns) {
            Ok((record, geometry)) => {
                records.push(record);
                geometry_by_row.push(geometry);
            }
            Err((area_id, message)) => {
                log::warn!("Skipping feature {idx}: {message}");
                row_errors.push(RowError {
                    feature: idx,
                    area_id,
                    message,
                });
            }
        }
    }

    if records.is_empty() {
        return Err(AppError::data(format!(
            "No valid features in '{}' ({} read, {} rejected).",
            origin.display(),
            features_read,
            row_errors.len()
        )));
    }

    ensure_unique_area_years(&records)?;

    let years: BTreeSet<i32> = records.iter().map(|r| r.year).collect();
    let reference_year = match reference_year {
        Some(y) if years.contains(&y) => y,
        Some(y) => {
            return Err(AppError::input(format!(
                "Reference year {y} is not present in the data."
            )));
        }
        None => *years.iter().next().ok_or_else(|| AppError::data("No years in data."))?,
    };

    let mut geometries = Vec::new();
    for (record, geometry) in records.iter().zip(geometry_by_row) {
        if record.year != reference_year {
            continue;
        }
        let Some(geometry) = geometry else {
            return Err(AppError::data(format!(
                "Area '{}' has no polygon geometry in reference year {reference_year}.",
                record.area_id
            )));
        };
        geometries.push(AreaGeometry {
            area_id: record.area_id.clone(),
            geometry,
        });
    }
    geometries.sort_by(|a, b| a.area_id.cmp(&b.area_id));

    log::info!(
        "Loaded {} records ({} areas, {} years) from '{}'; {} features rejected",
        records.len(),
        geometries.len(),
        years.len(),
        origin.display(),
        row_errors.len()
    );

    Ok(RawDataset {
        records,
        geometries,
        reference_year,
        row_errors,
        features_read,
    })
}

type FeatureError = (Option<String>, String);

fn parse_feature(
    mut feature: Feature,
    columns: &ColumnNames,
) -> Result<(RawRecord, Option<MultiPolygon<f64>>), FeatureError> {
    let area_id = match feature.property(&columns.area_id) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err((
                None,
                format!("missing or empty `{}` property", columns.area_id),
            ));
        }
    };

    let err = |message: String| (Some(area_id.clone()), message);

    let year = number_property(&feature, &columns.year).map_err(err)?;
    if year.fract() != 0.0 || year < i32::MIN as f64 || year > i32::MAX as f64 {
        return Err(err(format!("`{}` is not an integer year: {year}", columns.year)));
    }

    let observed = number_property(&feature, &columns.observed).map_err(err)?;
    let expected = number_property(&feature, &columns.expected).map_err(err)?;
    let population = number_property(&feature, &columns.population).map_err(err)?;
    let pop_density = number_property(&feature, &columns.pop_density).map_err(err)?;
    let poverty = number_property(&feature, &columns.poverty).map_err(err)?;

    if observed < 0.0 {
        return Err(err(format!("negative `{}`: {observed}", columns.observed)));
    }
    if population < 0.0 {
        return Err(err(format!("negative `{}`: {population}", columns.population)));
    }

    let geometry = match feature.geometry.take() {
        None => None,
        Some(geom) => {
            let geom: geo::Geometry<f64> = geom
                .try_into()
                .map_err(|e| err(format!("unreadable geometry: {e}")))?;
            match geom {
                geo::Geometry::MultiPolygon(mp) => Some(mp),
                geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
                _ => return Err(err("geometry is not a (multi)polygon".to_string())),
            }
        }
    };

    Ok((
        RawRecord {
            area_id,
            year: year as i32,
            observed,
            expected,
            population,
            pop_density,
            poverty,
        },
        geometry,
    ))
}

/// Read a numeric property; numeric strings are accepted.
fn number_property(feature: &Feature, name: &str) -> Result<f64, String> {
    let value = match feature.property(name) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Null) | None => return Err(format!("missing `{name}` property")),
        Some(other) => return Err(format!("`{name}` is not numeric: {other}")),
    };
    match value {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(format!("`{name}` is not a finite number")),
    }
}

fn ensure_unique_area_years(records: &[RawRecord]) -> Result<(), AppError> {
    let mut seen: BTreeMap<(&str, i32), usize> = BTreeMap::new();
    for r in records {
        let count = seen.entry((r.area_id.as_str(), r.year)).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Err(AppError::data(format!(
                "Duplicate record for area '{}' in year {}.",
                r.area_id, r.year
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(area: &str, year: i32, cases: f64, with_geom: bool) -> String {
        let geom = if with_geom {
            r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#
        } else {
            "null"
        };
        format!(
            r#"{{"type":"Feature","geometry":{geom},"properties":{{"area_id":"{area}","year":{year},"cases":{cases},"expected":2.5,"population":1000,"pop_density":"1500","poverty":12.0}}}}"#
        )
    }

    fn collection(features: &[String]) -> String {
        format!(r#"{{"type":"FeatureCollection","features":[{}]}}"#, features.join(","))
    }

    #[test]
    fn parses_records_and_reference_geometries() {
        let text = collection(&[
            feature("A", 2015, 3.0, true),
            feature("A", 2016, 4.0, false),
            feature("B", 2015, 0.0, true),
        ]);
        let ds = parse_dataset(&text, &ColumnNames::default(), None, Path::new("t")).unwrap();
        assert_eq!(ds.records.len(), 3);
        assert_eq!(ds.reference_year, 2015);
        assert_eq!(ds.geometries.len(), 2);
        assert!((ds.records[0].pop_density - 1500.0).abs() < 1e-12);
    }

    #[test]
    fn bad_feature_is_reported_not_fatal() {
        let broken = r#"{"type":"Feature","geometry":null,"properties":{"area_id":"C","year":2015}}"#;
        let text = collection(&[feature("A", 2015, 3.0, true), broken.to_string()]);
        let ds = parse_dataset(&text, &ColumnNames::default(), None, Path::new("t")).unwrap();
        assert_eq!(ds.records.len(), 1);
        assert_eq!(ds.row_errors.len(), 1);
        assert_eq!(ds.row_errors[0].area_id.as_deref(), Some("C"));
    }

    #[test]
    fn no_valid_feature_is_fatal() {
        let broken = r#"{"type":"Feature","geometry":null,"properties":{"area_id":"C","year":2015}}"#;
        let text = collection(&[broken.to_string(), broken.replace("\"C\"", "\"D\"")]);
        let err = parse_dataset(&text, &ColumnNames::default(), None, Path::new("t")).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.message().contains("2 read, 2 rejected"), "{err}");

        let err = parse_dataset(&collection(&[]), &ColumnNames::default(), None, Path::new("t")).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn duplicate_area_year_is_fatal() {
        let text = collection(&[feature("A", 2015, 3.0, true), feature("A", 2015, 1.0, true)]);
        let err = parse_dataset(&text, &ColumnNames::default(), None, Path::new("t")).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn missing_reference_geometry_is_fatal() {
        let text = collection(&[feature("A", 2015, 3.0, false)]);
        let err = parse_dataset(&text, &ColumnNames::default(), None, Path::new("t")).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn custom_column_names() {
        let text = collection(&[feature("A", 2015, 3.0, true)]).replace("\"cases\"", "\"notified\"");
        let columns = ColumnNames {
            observed: "notified".to_string(),
            ..ColumnNames::default()
        };
        let ds = parse_dataset(&text, &columns, Some(2015), Path::new("t")).unwrap();
        assert!((ds.records[0].observed - 3.0).abs() < 1e-12);
    }
}
