use crate::core::units;
use nalgebra::DMatrix;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HessianFileError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Missing '$hessian' marker line")]
    MissingMarker,
    #[error("Expected {expected} matrix entries, found {got}")]
    WrongEntryCount { expected: usize, got: usize },
}

/// Reads a text Hessian file: a `$hessian` marker line followed by the
/// `3N × 3N` matrix entries in row-major order, whitespace separated.
///
/// File values are divided by the squared Bohr radius on ingest; non-numeric
/// tokens are skipped, matching the loose column layouts such files come in.
pub fn read_hessian(path: &Path, atom_count: usize) -> Result<DMatrix<f64>, HessianFileError> {
    let content = std::fs::read_to_string(path).map_err(|e| HessianFileError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;

    let mut lines = content.lines();
    if !lines.any(|line| line.trim() == "$hessian") {
        return Err(HessianFileError::MissingMarker);
    }

    let dim = 3 * atom_count;
    let values: Vec<f64> = lines
        .flat_map(|line| line.split_whitespace())
        .filter_map(|token| token.parse::<f64>().ok())
        .map(|v| units::gradient_bohr_to_angstrom(units::gradient_bohr_to_angstrom(v)))
        .collect();

    if values.len() != dim * dim {
        return Err(HessianFileError::WrongEntryCount {
            expected: dim * dim,
            got: values.len(),
        });
    }

    Ok(DMatrix::from_row_slice(dim, dim, &values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::BOHR_RADIUS_ANGSTROM;

    #[test]
    fn reads_row_major_matrix_and_converts_units() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hessian");
        let mut content = String::from("$hessian\n");
        for row in 0..3 {
            for col in 0..3 {
                content.push_str(&format!("{:.1} ", (row * 3 + col) as f64));
            }
            content.push('\n');
        }
        std::fs::write(&path, content).unwrap();

        let matrix = read_hessian(&path, 1).unwrap();
        assert_eq!(matrix.nrows(), 3);
        let au2 = BOHR_RADIUS_ANGSTROM * BOHR_RADIUS_ANGSTROM;
        assert!((matrix[(1, 2)] - 5.0 / au2).abs() < 1e-12);
    }

    #[test]
    fn missing_marker_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hessian");
        std::fs::write(&path, "1.0 2.0\n").unwrap();
        assert!(matches!(
            read_hessian(&path, 1),
            Err(HessianFileError::MissingMarker)
        ));
    }

    #[test]
    fn wrong_entry_count_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hessian");
        std::fs::write(&path, "$hessian\n1.0 2.0 3.0\n").unwrap();
        assert!(matches!(
            read_hessian(&path, 1),
            Err(HessianFileError::WrongEntryCount { expected: 9, got: 3 })
        ));
    }
}
