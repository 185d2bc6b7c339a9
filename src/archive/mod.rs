//! Append-only archive of evaluated designs.
//!
//! Every successful fitness evaluation is appended to a single archive file
//! as an [`OptiRecord`](crate::schema::OptiRecord). The archive can be
//! replayed in order, projected onto objectives and free variables, and
//! filtered to its Pareto front.
//!
//! # File Format
//!
//! ```text
//! Header (16 bytes):
//!   Magic: "DOPA" (4 bytes)
//!   Version: u16
//!   Flags: u16 (compression)
//!   Reserved: 8 bytes
//!
//! Record frames (repeated until end of file):
//!   Length: u32
//!   LengthCrc: u32 (CRC32 of the length bytes)
//!   BodyCrc: u32 (CRC32 of the payload)
//!   Payload: JSON-encoded record, optionally LZ4 compressed
//! ```
//!
//! A frame cut short by a crash is skipped on read and truncated when the
//! archive is next opened for writing. A frame failing either checksum is
//! corruption: reads stop with an error and the writer refuses to open.

mod format;
mod handler;
mod pareto;
mod reader;
mod writer;

use std::fs::File;
use std::io;
use std::path::Path;

pub use format::{ARCHIVE_MAGIC, ARCHIVE_VERSION, ArchiveFlags, ArchiveHeader, CompressionType};
pub use handler::{ArchiveData, DataHandler};
pub use pareto::{dominates, non_dominated_fronts, pareto_mask};
pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;

/// Archive and auxiliary object persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Corrupt archive record {index}: {source}")]
    Corrupt {
        index: u64,
        #[source]
        source: io::Error,
    },
    #[error("Cannot decode archive record {index}: {source}")]
    Decode {
        index: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("Record {field} must be finite, got {values:?}")]
    NonFinite {
        field: &'static str,
        values: Vec<f64>,
    },
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Write a file through a temporary sibling and rename it into place, so
/// readers never observe a partially written file.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
