//! Export the merged scan table to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream
//! scripts: the original samples plus whatever derived columns the analyzer
//! attached (`*_fit`, cartesian fits, `*_unc`).

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::ScanTable;
use crate::error::AppError;

/// Write the scan table with its derived columns to a CSV file.
pub fn write_scan_csv(path: &Path, table: &ScanTable) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;

    let mut header = String::from("X,Y,Z,R,Phi,Br,Bz,Bphi");
    if table.fit.is_some() {
        header.push_str(",Br_fit,Bz_fit,Bphi_fit");
    }
    if table.cart_fit.is_some() {
        header.push_str(",Bx_fit,By_fit");
    }
    if table.unc.is_some() {
        header.push_str(",Br_unc,Bz_unc,Bphi_unc");
    }
    writeln!(file, "{header}")
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV header: {e}")))?;

    for (i, s) in table.samples.iter().enumerate() {
        let mut row = format!(
            "{:.10},{:.10},{:.10},{:.10},{:.10},{:.10},{:.10},{:.10}",
            s.x, s.y, s.z, s.r, s.phi, s.br, s.bz, s.bphi
        );
        if let Some(ref fit) = table.fit {
            row.push_str(&format!(",{:.10},{:.10},{:.10}", fit.br[i], fit.bz[i], fit.bphi[i]));
        }
        if let Some((ref bx, ref by)) = table.cart_fit {
            row.push_str(&format!(",{:.10},{:.10}", bx[i], by[i]));
        }
        if let Some(ref unc) = table.unc {
            row.push_str(&format!(",{:.10},{:.10},{:.10}", unc.br[i], unc.bz[i], unc.bphi[i]));
        }
        writeln!(file, "{row}")
            .map_err(|e| AppError::new(2, format!("Failed to write export CSV row: {e}")))?;
    }

    Ok(())
}
