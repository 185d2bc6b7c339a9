//! Append-only archive writer.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use super::format::{
    ArchiveFlags, ArchiveHeader, CompressionType, FRAME_HEADER_LEN, FrameRead, encode_frame,
    read_frame,
};

/// Appends serialized records to an archive file.
///
/// Opening an existing archive validates its header and every frame, and
/// truncates a torn final frame so records appended afterwards stay
/// readable. A damaged frame anywhere else fails the open and leaves the
/// file untouched.
pub struct ArchiveWriter {
    file: File,
    path: PathBuf,
    header: ArchiveHeader,
    records: u64,
}

impl ArchiveWriter {
    /// Open (or create) an archive for appending.
    ///
    /// `compression` only applies to new archives; existing archives keep
    /// the compression recorded in their header.
    pub fn open<P: AsRef<Path>>(path: P, compression: CompressionType) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();

        if len < ArchiveHeader::SIZE as u64 {
            if len > 0 {
                warn!(
                    "Archive {} has a truncated header ({} bytes), reinitializing",
                    path.display(),
                    len
                );
                file.set_len(0)?;
            }
            let header = ArchiveHeader {
                flags: ArchiveFlags { compression },
            };
            file.seek(SeekFrom::Start(0))?;
            header.write_to(&mut file)?;
            file.sync_data()?;
            return Ok(Self {
                file,
                path,
                header,
                records: 0,
            });
        }

        let (header, records, valid_end) = {
            let mut reader = BufReader::new(&mut file);
            reader.seek(SeekFrom::Start(0))?;
            let header = ArchiveHeader::read_from(&mut reader)?;
            let mut records = 0u64;
            let mut valid_end = ArchiveHeader::SIZE as u64;
            loop {
                match read_frame(&mut reader)? {
                    FrameRead::Frame(body) => {
                        records += 1;
                        valid_end += (FRAME_HEADER_LEN + body.len()) as u64;
                    }
                    FrameRead::End => break,
                    FrameRead::Torn { valid } => {
                        warn!(
                            "Archive {} ends in a torn record ({} bytes), truncating",
                            path.display(),
                            valid
                        );
                        break;
                    }
                }
            }
            (header, records, valid_end)
        };

        if valid_end < len {
            file.set_len(valid_end)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::End(0))?;

        if header.flags.compression != compression {
            info!(
                "Archive {} uses {:?} compression, ignoring requested {:?}",
                path.display(),
                header.flags.compression,
                compression
            );
        }

        Ok(Self {
            file,
            path,
            header,
            records,
        })
    }

    /// Append one serialized record and sync it to disk.
    pub fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        let frame = encode_frame(payload, self.header.flags.compression)?;
        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        self.records += 1;
        Ok(())
    }

    /// Number of records in the archive, including those present at open.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Compression used for appended records.
    pub fn compression(&self) -> CompressionType {
        self.header.flags.compression
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("path", &self.path())
            .field("records", &self.records())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_writer_creates_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.dopa");

        let mut writer = ArchiveWriter::open(&path, CompressionType::None).unwrap();
        writer.append(b"{}").unwrap();
        writer.append(b"[]").unwrap();
        assert_eq!(writer.records(), 2);

        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(len, (ArchiveHeader::SIZE + 2 * (FRAME_HEADER_LEN + 2)) as u64);
    }

    #[test]
    fn test_reopen_counts_and_truncates_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.dopa");

        {
            let mut writer = ArchiveWriter::open(&path, CompressionType::None).unwrap();
            writer.append(b"\"one\"").unwrap();
            writer.append(b"\"two\"").unwrap();
        }

        // Simulate a crash in the middle of a third append.
        let mut bytes = fs::read(&path).unwrap();
        let intact = bytes.len();
        let third = encode_frame(b"\"three, at length\"", CompressionType::None).unwrap();
        bytes.extend_from_slice(&third[..FRAME_HEADER_LEN + 4]);
        fs::write(&path, &bytes).unwrap();

        let mut writer = ArchiveWriter::open(&path, CompressionType::None).unwrap();
        assert_eq!(writer.records(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact as u64);

        writer.append(b"\"three\"").unwrap();
        assert_eq!(writer.records(), 3);
    }

    #[test]
    fn test_damaged_frame_is_never_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("damaged.dopa");

        {
            let mut writer = ArchiveWriter::open(&path, CompressionType::None).unwrap();
            for payload in [&b"[0]"[..], b"[1]", b"[2]", b"[3]"] {
                writer.append(payload).unwrap();
            }
        }

        // Grow the second frame's length prefix past the end of the file.
        let mut bytes = fs::read(&path).unwrap();
        let second = ArchiveHeader::SIZE + FRAME_HEADER_LEN + 3;
        bytes[second + 2] = 0x01;
        fs::write(&path, &bytes).unwrap();

        let err = ArchiveWriter::open(&path, CompressionType::None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_reinitializes_truncated_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.dopa");
        fs::write(&path, b"DOP").unwrap();

        let writer = ArchiveWriter::open(&path, CompressionType::None).unwrap();
        assert_eq!(writer.records(), 0);
        assert_eq!(
            fs::metadata(&path).unwrap().len(),
            ArchiveHeader::SIZE as u64
        );
    }
}
