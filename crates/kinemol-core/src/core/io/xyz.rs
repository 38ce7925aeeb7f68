use crate::core::constants;
use crate::core::models::system::System;
use nalgebra::Vector3;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XyzError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Malformed XYZ content at line {line}: {message}")]
    Malformed { line: usize, message: String },
    #[error("Unknown element symbol '{0}'")]
    UnknownElement(String),
    #[error(transparent)]
    System(#[from] crate::core::models::system::SystemError),
}

fn io_err(path: &Path, source: std::io::Error) -> XyzError {
    XyzError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    }
}

/// Parses an XYZ file into a [`System`] with charge 0 and multiplicity 1.
///
/// Only the first frame of a multi-frame file is read.
pub fn read_xyz(path: &Path) -> Result<System, XyzError> {
    let content = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let mut lines = content.lines().enumerate();

    let (_, header) = lines.next().ok_or(XyzError::Malformed {
        line: 1,
        message: "empty file".to_string(),
    })?;
    let count: usize = header.trim().parse().map_err(|_| XyzError::Malformed {
        line: 1,
        message: format!("expected an atom count, found '{}'", header.trim()),
    })?;
    lines.next(); // comment line

    let mut numbers = Vec::with_capacity(count);
    let mut geometry = Vec::with_capacity(count);
    for _ in 0..count {
        let (idx, line) = lines.next().ok_or(XyzError::Malformed {
            line: count + 2,
            message: "fewer atom lines than the header announced".to_string(),
        })?;
        let mut fields = line.split_whitespace();
        let symbol = fields.next().ok_or(XyzError::Malformed {
            line: idx + 1,
            message: "missing element symbol".to_string(),
        })?;
        let z = constants::element_number(symbol)
            .ok_or_else(|| XyzError::UnknownElement(symbol.to_string()))?;
        let mut coord = [0.0_f64; 3];
        for c in &mut coord {
            let field = fields.next().ok_or(XyzError::Malformed {
                line: idx + 1,
                message: "expected three coordinates".to_string(),
            })?;
            *c = field.parse().map_err(|_| XyzError::Malformed {
                line: idx + 1,
                message: format!("'{field}' is not a number"),
            })?;
        }
        numbers.push(z);
        geometry.push(Vector3::new(coord[0], coord[1], coord[2]));
    }

    Ok(System::new(&numbers, geometry, 0, 1)?)
}

/// Appends one trajectory frame to `path` in XYZ format.
///
/// The comment line carries the potential energy in Hartree; the frame name
/// is the step index, matching the trajectory convention of the restart
/// machinery.
pub fn append_frame(
    path: &Path,
    system: &System,
    step: usize,
    energy: f64,
) -> Result<(), XyzError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    let mut writer = BufWriter::new(file);
    write_frame(&mut writer, system, &format!("{step}"), energy).map_err(|e| io_err(path, e))
}

/// Truncates `path` and writes a single frame.
pub fn write_xyz(path: &Path, system: &System, name: &str, energy: f64) -> Result<(), XyzError> {
    let file = std::fs::File::create(path).map_err(|e| io_err(path, e))?;
    let mut writer = BufWriter::new(file);
    write_frame(&mut writer, system, name, energy).map_err(|e| io_err(path, e))
}

fn write_frame<W: Write>(
    writer: &mut W,
    system: &System,
    name: &str,
    energy: f64,
) -> Result<(), std::io::Error> {
    writeln!(writer, "{}", system.atom_count())?;
    writeln!(writer, "{name} Energy = {energy:.10}")?;
    for (atom, pos) in system.atoms().iter().zip(system.geometry()) {
        writeln!(
            writer,
            "{:<2} {:>15.8} {:>15.8} {:>15.8}",
            atom.symbol(),
            pos.x,
            pos.y,
            pos.z
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diatomic() -> System {
        System::new(
            &[1, 1],
            vec![Vector3::zeros(), Vector3::new(0.74, 0.0, 0.0)],
            0,
            1,
        )
        .unwrap()
    }

    #[test]
    fn written_frame_reads_back_with_same_elements_and_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h2.xyz");
        write_xyz(&path, &diatomic(), "h2", -1.17).unwrap();

        let system = read_xyz(&path).unwrap();
        assert_eq!(system.atomic_numbers(), vec![1, 1]);
        assert!((system.geometry()[1].x - 0.74).abs() < 1e-8);
    }

    #[test]
    fn append_accumulates_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.xyz");
        append_frame(&path, &diatomic(), 0, -1.0).unwrap();
        append_frame(&path, &diatomic(), 1, -1.1).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().filter(|l| l.trim() == "2").count(), 2);
        assert!(content.contains("1 Energy = -1.1000000000"));
    }

    #[test]
    fn malformed_header_is_reported_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.xyz");
        std::fs::write(&path, "not-a-count\n\n").unwrap();
        assert!(matches!(
            read_xyz(&path),
            Err(XyzError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn unknown_element_symbol_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.xyz");
        std::fs::write(&path, "1\ncomment\nQq 0.0 0.0 0.0\n").unwrap();
        assert!(matches!(read_xyz(&path), Err(XyzError::UnknownElement(_))));
    }
}
