//! CSV ingest for field-scan tables.
//!
//! Turns a scan CSV into a clean `ScanTable` that is safe to fit.
//!
//! Design goals:
//! - **Strict schema** for required columns (clear errors + exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Both coordinate systems** available on every sample: missing
//!   cylindrical or cartesian positions are derived from the other pair

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{CalcData, Sample, ScanTable};
use crate::error::AppError;

/// Summary stats about the samples actually loaded.
#[derive(Debug, Clone)]
pub struct ScanStats {
    pub n_samples: usize,
    pub z_min: f64,
    pub z_max: f64,
    pub r_max: f64,
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output: the scan table plus stats and row errors.
#[derive(Debug)]
pub struct IngestedScan {
    pub table: ScanTable,
    pub stats: ScanStats,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Load a scan CSV into a `ScanTable`.
///
/// The schema requires `Z` and the three field components `Br`, `Bz`, `Bphi`,
/// plus at least one complete position pair: `(X, Y)` or `(R, Phi)`. The
/// missing pair is derived per row.
pub fn load_scan(path: &Path) -> Result<IngestedScan, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(3, format!("Failed to open scan CSV '{}': {e}", path.display()))
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    for col in ["z", "br", "bz", "bphi"] {
        if !header_map.contains_key(col) {
            return Err(AppError::new(
                2,
                format!("Scan CSV is missing required column '{col}'."),
            ));
        }
    }
    let has_cart = header_map.contains_key("x") && header_map.contains_key("y");
    let has_cyl = header_map.contains_key("r") && header_map.contains_key("phi");
    if !has_cart && !has_cyl {
        return Err(AppError::new(
            2,
            "Scan CSV needs a complete position pair: either X,Y or R,Phi.",
        ));
    }

    let mut samples = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1; records start at line 2.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &header_map, has_cart, has_cyl) {
            Ok(sample) => samples.push(sample),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if samples.is_empty() {
        return Err(AppError::new(3, "No valid rows remain after ingest."));
    }

    let stats = ScanStats {
        n_samples: samples.len(),
        z_min: samples.iter().map(|s| s.z).fold(f64::INFINITY, f64::min),
        z_max: samples.iter().map(|s| s.z).fold(f64::NEG_INFINITY, f64::max),
        r_max: samples.iter().map(|s| s.r).fold(0.0, f64::max),
    };

    Ok(IngestedScan {
        table: ScanTable::new(samples),
        stats,
        row_errors,
        rows_read,
    })
}

/// Load a calculated-reference CSV (`Br`, `Bz`, `Bphi` columns).
///
/// The row count must match the scan it accompanies; that check lives in the
/// evaluator so the error points at the version requiring the data.
pub fn load_calc_data(path: &Path) -> Result<CalcData, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(
            3,
            format!("Failed to open calculated-reference CSV '{}': {e}", path.display()),
        )
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);
    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    for col in ["br", "bz", "bphi"] {
        if !header_map.contains_key(col) {
            return Err(AppError::new(
                2,
                format!("Calculated-reference CSV is missing required column '{col}'."),
            ));
        }
    }

    let mut calc = CalcData {
        br: Vec::new(),
        bz: Vec::new(),
        bphi: Vec::new(),
    };
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record =
            result.map_err(|e| AppError::new(3, format!("CSV parse error at line {line}: {e}")))?;
        calc.br.push(field(&record, &header_map, "br", line)?);
        calc.bz.push(field(&record, &header_map, "bz", line)?);
        calc.bphi.push(field(&record, &header_map, "bphi", line)?);
    }
    Ok(calc)
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Excel sometimes emits UTF-8 CSVs with a BOM prefix on the first header.
    name.trim().trim_start_matches('\u{feff}').to_lowercase()
}

fn field(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    col: &str,
    line: usize,
) -> Result<f64, AppError> {
    parse_field(record, header_map, col)
        .map_err(|message| AppError::new(3, format!("Line {line}: {message}")))
}

fn parse_field(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    col: &str,
) -> Result<f64, String> {
    let idx = *header_map
        .get(col)
        .ok_or_else(|| format!("missing column '{col}'"))?;
    let raw = record
        .get(idx)
        .ok_or_else(|| format!("row too short for column '{col}'"))?;
    let v: f64 = raw
        .parse()
        .map_err(|_| format!("column '{col}' is not a number ('{raw}')"))?;
    if !v.is_finite() {
        return Err(format!("column '{col}' is not finite"));
    }
    Ok(v)
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    has_cart: bool,
    has_cyl: bool,
) -> Result<Sample, String> {
    let z = parse_field(record, header_map, "z")?;
    let br = parse_field(record, header_map, "br")?;
    let bz = parse_field(record, header_map, "bz")?;
    let bphi = parse_field(record, header_map, "bphi")?;

    let (x, y, r, phi) = if has_cart {
        let x = parse_field(record, header_map, "x")?;
        let y = parse_field(record, header_map, "y")?;
        if has_cyl {
            (
                x,
                y,
                parse_field(record, header_map, "r")?,
                parse_field(record, header_map, "phi")?,
            )
        } else {
            (x, y, x.hypot(y), y.atan2(x))
        }
    } else {
        let r = parse_field(record, header_map, "r")?;
        let phi = parse_field(record, header_map, "phi")?;
        if r < 0.0 {
            return Err(format!("radius must be non-negative (got {r})"));
        }
        (r * phi.cos(), r * phi.sin(), r, phi)
    };

    Ok(Sample {
        z,
        r,
        phi,
        x,
        y,
        br,
        bz,
        bphi,
    })
}
