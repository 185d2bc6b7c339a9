//! Sequential archive reader.

use std::fs::File;
use std::io::{self, BufReader};
use std::marker::PhantomData;
use std::path::Path;

use log::warn;
use serde::de::DeserializeOwned;

use super::ArchiveError;
use super::format::{ArchiveHeader, CompressionType, FrameRead, decode_payload, read_frame};
use crate::schema::OptiRecord;

/// Iterator over archived records in append order.
///
/// A torn final record ends iteration quietly. A damaged frame yields
/// [`ArchiveError::Corrupt`] and ends iteration. A frame that is intact but
/// does not decode into the requested types yields [`ArchiveError::Decode`]
/// and iteration moves on to the next record.
///
/// Usage:
/// ```ignore
/// for record in ArchiveReader::<MyDesign, MyResults>::open("opti_archive.dopa")? {
///     let record = record?;
///     println!("{:?} -> {:?}", record.x, record.objs);
/// }
/// ```
pub struct ArchiveReader<D, R> {
    reader: Option<BufReader<File>>,
    compression: CompressionType,
    index: u64,
    _records: PhantomData<fn() -> OptiRecord<D, R>>,
}

impl<D, R> ArchiveReader<D, R> {
    /// Open an archive for reading.
    ///
    /// A zero-length file is treated as an empty archive.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self {
                reader: None,
                compression: CompressionType::None,
                index: 0,
                _records: PhantomData,
            });
        }

        let mut reader = BufReader::new(file);
        let header = ArchiveHeader::read_from(&mut reader)?;

        Ok(Self {
            reader: Some(reader),
            compression: header.flags.compression,
            index: 0,
            _records: PhantomData,
        })
    }

    /// Number of records yielded so far.
    pub fn position(&self) -> u64 {
        self.index
    }

    fn next_payload(&mut self) -> Option<Result<Vec<u8>, ArchiveError>> {
        let reader = self.reader.as_mut()?;
        let frame = match read_frame(reader) {
            Ok(frame) => frame,
            Err(e) => {
                self.reader = None;
                return Some(Err(self.frame_error(e)));
            }
        };

        match frame {
            FrameRead::Frame(body) => match decode_payload(body, self.compression) {
                Ok(payload) => Some(Ok(payload)),
                Err(e) => {
                    self.reader = None;
                    Some(Err(self.frame_error(e)))
                }
            },
            FrameRead::End => {
                self.reader = None;
                None
            }
            FrameRead::Torn { valid } => {
                warn!(
                    "Skipping torn record {} at end of archive ({} bytes)",
                    self.index, valid
                );
                self.reader = None;
                None
            }
        }
    }

    fn frame_error(&self, e: io::Error) -> ArchiveError {
        if e.kind() == io::ErrorKind::InvalidData {
            ArchiveError::Corrupt {
                index: self.index,
                source: e,
            }
        } else {
            ArchiveError::Io(e)
        }
    }
}

impl<D: DeserializeOwned, R: DeserializeOwned> Iterator for ArchiveReader<D, R> {
    type Item = Result<OptiRecord<D, R>, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        let payload = match self.next_payload()? {
            Ok(payload) => payload,
            Err(e) => return Some(Err(e)),
        };

        let index = self.index;
        self.index += 1;
        Some(
            serde_json::from_slice(&payload)
                .map_err(|source| ArchiveError::Decode { index, source }),
        )
    }
}
