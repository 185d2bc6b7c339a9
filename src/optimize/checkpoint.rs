//! Population checkpoints.
//!
//! Candidates and fitness are stored as two CSV tables with a leading index
//! column (header `,0,1,…`), one row per population member in the same
//! order. A JSON sidecar next to the candidate table records the run seed,
//! the generation counter and a CRC32 of each table. Every file is replaced
//! atomically and the sidecar is written last, so a table whose checksum
//! disagrees with the sidecar was written by a generation that never
//! finished checkpointing.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::archive::write_atomically;

/// Checkpoint read/write errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Checkpoint state error: {0}")]
    State(#[from] serde_json::Error),
    #[error("{}: row {row}, column {column}: cannot parse {value:?} as a number", path.display())]
    Parse {
        path: PathBuf,
        row: usize,
        column: usize,
        value: String,
    },
    #[error("{}: row {row} has {actual} values, expected {expected}", path.display())]
    Ragged {
        path: PathBuf,
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// Run state stored next to the candidate table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Seed the run was started with.
    pub seed: u64,
    /// Generations completed when the checkpoint was written.
    pub generation: u64,
    /// CRC32 of the candidate table written with this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_crc: Option<u32>,
    /// CRC32 of the fitness table written with this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitness_crc: Option<u32>,
}

/// Location of the state sidecar for a candidate table.
pub fn state_path(candidates: &Path) -> PathBuf {
    let mut name = candidates
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".state.json");
    candidates.with_file_name(name)
}

/// Atomically write a table of rows, returning the CRC32 of the file.
pub fn write_table(path: &Path, rows: &[Vec<f64>]) -> Result<u32, CheckpointError> {
    let width = rows.first().map_or(0, Vec::len);
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());

    let mut header = Vec::with_capacity(width + 1);
    header.push(String::new());
    header.extend((0..width).map(|i| i.to_string()));
    writer.write_record(&header)?;

    for (i, row) in rows.iter().enumerate() {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(i.to_string());
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    write_atomically(path, |file| {
        use std::io::Write;
        file.write_all(&bytes)
    })?;
    Ok(crc32fast::hash(&bytes))
}

/// CRC32 of a table file, or `None` if it does not exist.
pub fn table_checksum(path: &Path) -> Result<Option<u32>, CheckpointError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(crc32fast::hash(&bytes))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read a table written by [`write_table`]. Returns `None` if the file
/// does not exist.
pub fn read_table(path: &Path) -> Result<Option<Vec<Vec<f64>>>, CheckpointError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));
    let width = reader.headers()?.len().saturating_sub(1);

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let values = record
            .iter()
            .skip(1)
            .enumerate()
            .map(|(column, value)| {
                value
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| CheckpointError::Parse {
                        path: path.to_path_buf(),
                        row,
                        column,
                        value: value.to_string(),
                    })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        if values.len() != width {
            return Err(CheckpointError::Ragged {
                path: path.to_path_buf(),
                row,
                expected: width,
                actual: values.len(),
            });
        }
        rows.push(values);
    }
    Ok(Some(rows))
}

/// Atomically write the state sidecar for `candidates`.
pub fn write_state(candidates: &Path, state: &CheckpointState) -> Result<(), CheckpointError> {
    let json = serde_json::to_vec_pretty(state)?;
    write_atomically(&state_path(candidates), |file| {
        use std::io::Write;
        file.write_all(&json)
    })?;
    Ok(())
}

/// Read the state sidecar for `candidates`, if present.
pub fn read_state(candidates: &Path) -> Result<Option<CheckpointState>, CheckpointError> {
    match File::open(state_path(candidates)) {
        Ok(file) => Ok(Some(serde_json::from_reader(BufReader::new(file))?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_table_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pop.csv");
        let crc = write_table(&path, &[vec![0.5, 1.0], vec![0.25, 1e4]]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, ",0,1\n0,0.5,1\n1,0.25,10000\n");
        assert_eq!(table_checksum(&path).unwrap(), Some(crc));
        assert_eq!(table_checksum(&dir.path().join("absent.csv")).unwrap(), None);
    }

    #[test]
    fn test_table_roundtrip_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pop.csv");
        let rows = vec![
            vec![0.1 + 0.2, 1.0 / 3.0, -2.5e-12],
            vec![f64::MAX, f64::MIN_POSITIVE, 0.0],
        ];
        write_table(&path, &rows).unwrap();
        assert_eq!(read_table(&path).unwrap(), Some(rows));

        // Overwrite in place.
        write_table(&path, &[vec![7.0]]).unwrap();
        assert_eq!(read_table(&path).unwrap(), Some(vec![vec![7.0]]));
    }

    #[test]
    fn test_missing_table() {
        let dir = tempdir().unwrap();
        assert_eq!(read_table(&dir.path().join("absent.csv")).unwrap(), None);
    }

    #[test]
    fn test_malformed_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");

        fs::write(&path, ",0,1\n0,0.5,abc\n").unwrap();
        assert!(matches!(
            read_table(&path),
            Err(CheckpointError::Parse { row: 0, column: 1, .. })
        ));

        fs::write(&path, ",0,1\n0,0.5,1\n1,0.5\n").unwrap();
        assert!(matches!(
            read_table(&path),
            Err(CheckpointError::Ragged { row: 1, expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_state_sidecar() {
        let dir = tempdir().unwrap();
        let cand = dir.path().join("latest_pop.csv");
        assert_eq!(
            state_path(&cand),
            dir.path().join("latest_pop.csv.state.json")
        );
        assert_eq!(read_state(&cand).unwrap(), None);

        let state = CheckpointState {
            seed: 17,
            generation: 4,
            candidates_crc: Some(0xDEAD_BEEF),
            fitness_crc: Some(7),
        };
        write_state(&cand, &state).unwrap();
        assert_eq!(read_state(&cand).unwrap(), Some(state));

        // Sidecars without checksums still load.
        fs::write(state_path(&cand), r#"{"seed": 3, "generation": 1}"#).unwrap();
        assert_eq!(
            read_state(&cand).unwrap(),
            Some(CheckpointState {
                seed: 3,
                generation: 1,
                candidates_crc: None,
                fitness_crc: None,
            })
        );
    }
}
