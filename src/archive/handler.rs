//! Data handler owning the archive of one optimization run.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};

use super::format::CompressionType;
use super::pareto::{non_dominated_fronts, pareto_mask};
use super::reader::ArchiveReader;
use super::writer::ArchiveWriter;
use super::{ArchiveError, write_atomically};
use crate::design::DesignSpace;
use crate::schema::{OptiRecord, OptiRecordRef};

/// Objective vectors and free variables of a set of records, in order.
pub type ArchiveData = (Vec<Vec<f64>>, Vec<Vec<f64>>);

/// Persists evaluated designs and auxiliary run state.
///
/// There must be exactly one `DataHandler` writing a given archive at a
/// time. The archive file is opened for appending on the first write.
#[derive(Debug)]
pub struct DataHandler {
    archive_path: PathBuf,
    designer_path: PathBuf,
    compression: CompressionType,
    writer: Option<ArchiveWriter>,
}

impl DataHandler {
    /// Create a handler for the given archive and designer files.
    pub fn new<A: Into<PathBuf>, B: Into<PathBuf>>(archive_path: A, designer_path: B) -> Self {
        Self {
            archive_path: archive_path.into(),
            designer_path: designer_path.into(),
            compression: CompressionType::None,
            writer: None,
        }
    }

    /// Set payload compression for newly created archives.
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Path of the archive file.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Path of the designer file.
    pub fn designer_path(&self) -> &Path {
        &self.designer_path
    }

    /// Records in the archive, if it has been opened for writing.
    pub fn records_written(&self) -> Option<u64> {
        self.writer.as_ref().map(ArchiveWriter::records)
    }

    /// Append one evaluated design to the archive.
    ///
    /// Free variables and objectives must be finite: JSON has no encoding
    /// for infinities or NaN.
    pub fn save_to_archive<D: Serialize, R: Serialize>(
        &mut self,
        x: &[f64],
        design: &D,
        full_results: &R,
        objs: &[f64],
    ) -> Result<(), ArchiveError> {
        for (field, values) in [("x", x), ("objs", objs)] {
            if !values.iter().all(|v| v.is_finite()) {
                return Err(ArchiveError::NonFinite {
                    field,
                    values: values.to_vec(),
                });
            }
        }

        let payload = serde_json::to_vec(&OptiRecordRef {
            x,
            design,
            full_results,
            objs,
        })?;

        let writer = if let Some(writer) = self.writer.as_mut() {
            writer
        } else {
            self.writer
                .insert(ArchiveWriter::open(&self.archive_path, self.compression)?)
        };
        writer.append(&payload)?;
        debug!(
            "Archived record {} ({} bytes)",
            writer.records() - 1,
            payload.len()
        );
        Ok(())
    }

    /// Iterate over archived records in append order.
    ///
    /// Each call reopens the archive from the start.
    pub fn load_from_archive<D: DeserializeOwned, R: DeserializeOwned>(
        &self,
    ) -> Result<ArchiveReader<D, R>, ArchiveError> {
        ArchiveReader::open(&self.archive_path)
    }

    /// Objective vectors and free variables of every archived record.
    pub fn get_archive_data(&self) -> Result<ArchiveData, ArchiveError> {
        let mut fitness = Vec::new();
        let mut free_vars = Vec::new();
        for record in self.load_from_archive::<IgnoredAny, IgnoredAny>()? {
            let record = record?;
            fitness.push(record.objs);
            free_vars.push(record.x);
        }
        Ok((fitness, free_vars))
    }

    /// All non-dominated fronts of the archive, as record indices.
    pub fn non_dominated_fronts(&self) -> Result<Vec<Vec<usize>>, ArchiveError> {
        let (fitness, _) = self.get_archive_data()?;
        Ok(non_dominated_fronts(&fitness))
    }

    /// Iterate over the records on the first non-dominated front.
    pub fn get_pareto_data<D: DeserializeOwned, R: DeserializeOwned>(
        &self,
    ) -> Result<impl Iterator<Item = Result<OptiRecord<D, R>, ArchiveError>>, ArchiveError> {
        let (fitness, _) = self.get_archive_data()?;
        let mask = pareto_mask(&fitness);

        let records = self.load_from_archive::<D, R>()?;
        Ok(records
            .enumerate()
            .filter_map(move |(i, record)| match record {
                Ok(record) => mask.get(i).copied().unwrap_or(false).then_some(Ok(record)),
                Err(e) => Some(Err(e)),
            }))
    }

    /// Objective vectors and free variables of the Pareto-optimal records.
    pub fn get_pareto_fitness_freevars(&self) -> Result<ArchiveData, ArchiveError> {
        let mut fitness = Vec::new();
        let mut free_vars = Vec::new();
        for record in self.get_pareto_data::<IgnoredAny, IgnoredAny>()? {
            let record = record?;
            fitness.push(record.objs);
            free_vars.push(record.x);
        }
        Ok((fitness, free_vars))
    }

    /// Iterate over archived records whose results satisfy the design
    /// constraints.
    pub fn feasible_records<D, R, S>(
        &self,
        space: &S,
    ) -> Result<impl Iterator<Item = Result<OptiRecord<D, R>, ArchiveError>>, ArchiveError>
    where
        D: DeserializeOwned,
        R: DeserializeOwned,
        S: DesignSpace<R>,
    {
        let records = self.load_from_archive::<D, R>()?;
        Ok(records.filter(move |record| match record {
            Ok(record) => space.check_constraints(&record.full_results),
            Err(_) => true,
        }))
    }

    /// Save the designer used for this run.
    pub fn save_designer<T: Serialize>(&self, designer: &T) -> Result<(), ArchiveError> {
        self.save_object(designer, &self.designer_path)
    }

    /// Load the designer saved for this run.
    pub fn load_designer<T: DeserializeOwned>(&self) -> Result<T, ArchiveError> {
        self.load_object(&self.designer_path)
    }

    /// Save a single object to `path`, replacing any previous content.
    pub fn save_object<T: Serialize, P: AsRef<Path>>(
        &self,
        obj: &T,
        path: P,
    ) -> Result<(), ArchiveError> {
        let json = serde_json::to_vec_pretty(obj)?;
        write_atomically(path.as_ref(), |file| {
            use std::io::Write;
            file.write_all(&json)
        })?;
        Ok(())
    }

    /// Load a single object saved with [`DataHandler::save_object`].
    pub fn load_object<T: DeserializeOwned, P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<T, ArchiveError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}
