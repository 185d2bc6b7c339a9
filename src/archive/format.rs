//! Binary format definitions for optimization archive files.

use std::io::{self, Read, Write};

/// Magic bytes identifying an optimization archive file.
pub const ARCHIVE_MAGIC: &[u8; 4] = b"DOPA";

/// Current format version.
pub const ARCHIVE_VERSION: u16 = 1;

/// Upper bound on a single record frame.
pub const MAX_FRAME_LEN: u32 = 1 << 30;

/// Frame header: Length(4) + LengthCrc(4) + BodyCrc(4).
pub const FRAME_HEADER_LEN: usize = 12;

/// Compression type for record payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    /// Plain JSON payloads.
    #[default]
    None = 0,
    /// LZ4 block compression (requires the `lz4` feature).
    Lz4 = 1,
}

impl CompressionType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lz4),
            _ => None,
        }
    }
}

/// Archive header flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveFlags {
    /// Compression type (lower 4 bits).
    pub compression: CompressionType,
}

impl ArchiveFlags {
    pub fn to_u16(self) -> u16 {
        self.compression as u16
    }

    pub fn from_u16(v: u16) -> io::Result<Self> {
        let compression = CompressionType::from_u8((v & 0x0F) as u8).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown archive compression: {}", v & 0x0F),
            )
        })?;
        Ok(Self { compression })
    }
}

/// File header for the archive format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub flags: ArchiveFlags,
}

impl ArchiveHeader {
    /// Size of header in bytes.
    /// Magic(4) + Version(2) + Flags(2) + Reserved(8) = 16
    pub const SIZE: usize = 16;

    /// Write header to output.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(ARCHIVE_MAGIC)?;
        w.write_all(&ARCHIVE_VERSION.to_le_bytes())?;
        w.write_all(&self.flags.to_u16().to_le_bytes())?;
        w.write_all(&[0u8; 8])?;
        Ok(())
    }

    /// Read header from input.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != ARCHIVE_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid DOPA magic bytes",
            ));
        }

        let mut buf2 = [0u8; 2];
        r.read_exact(&mut buf2)?;
        let version = u16::from_le_bytes(buf2);
        if version != ARCHIVE_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported DOPA version: {}", version),
            ));
        }

        r.read_exact(&mut buf2)?;
        let flags = ArchiveFlags::from_u16(u16::from_le_bytes(buf2))?;

        let mut reserved = [0u8; 8];
        r.read_exact(&mut reserved)?;

        Ok(Self { flags })
    }
}

/// Result of reading one frame.
#[derive(Debug)]
pub enum FrameRead {
    /// A complete frame payload.
    Frame(Vec<u8>),
    /// Clean end of stream.
    End,
    /// The stream ends inside a frame; `valid` bytes were available.
    Torn { valid: usize },
}

/// Encode a payload as a checksummed, length-prefixed frame.
pub fn encode_frame(payload: &[u8], compression: CompressionType) -> io::Result<Vec<u8>> {
    let body = compress(payload, compression)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Record of {} bytes exceeds frame limit", body.len()),
            )
        })?;

    let len_bytes = len.to_le_bytes();
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&len_bytes);
    frame.extend_from_slice(&crc32fast::hash(&len_bytes).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read the next frame.
///
/// Only a frame that runs into end of stream is reported as
/// [`FrameRead::Torn`]. A length or body that fails its checksum is
/// `InvalidData`, wherever it sits in the stream.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<FrameRead> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let got = read_up_to(r, &mut header)?;
    if got == 0 {
        return Ok(FrameRead::End);
    }
    if got < header.len() {
        return Ok(FrameRead::Torn { valid: got });
    }

    let [l0, l1, l2, l3, c0, c1, c2, c3, b0, b1, b2, b3] = header;
    let len_bytes = [l0, l1, l2, l3];
    if crc32fast::hash(&len_bytes) != u32::from_le_bytes([c0, c1, c2, c3]) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Frame length fails its checksum",
        ));
    }
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame length {} exceeds limit", len),
        ));
    }

    let mut body = Vec::new();
    let got = r.take(len as u64).read_to_end(&mut body)?;
    if got < len as usize {
        return Ok(FrameRead::Torn {
            valid: FRAME_HEADER_LEN + got,
        });
    }
    if crc32fast::hash(&body) != u32::from_le_bytes([b0, b1, b2, b3]) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Frame body fails its checksum",
        ));
    }

    Ok(FrameRead::Frame(body))
}

/// Decode a frame body back into the serialized record bytes.
pub fn decode_payload(body: Vec<u8>, compression: CompressionType) -> io::Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(body),
        CompressionType::Lz4 => decompress_lz4(&body),
    }
}

fn compress(payload: &[u8], compression: CompressionType) -> io::Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(payload.to_vec()),
        CompressionType::Lz4 => compress_lz4(payload),
    }
}

/// Fill `buf` as far as the stream allows, returning the bytes read.
fn read_up_to<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(feature = "lz4")]
fn compress_lz4(data: &[u8]) -> io::Result<Vec<u8>> {
    Ok(lz4_flex::compress_prepend_size(data))
}

#[cfg(not(feature = "lz4"))]
fn compress_lz4(_data: &[u8]) -> io::Result<Vec<u8>> {
    Err(lz4_unavailable())
}

#[cfg(feature = "lz4")]
fn decompress_lz4(data: &[u8]) -> io::Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(not(feature = "lz4"))]
fn decompress_lz4(_data: &[u8]) -> io::Result<Vec<u8>> {
    Err(lz4_unavailable())
}

#[cfg(not(feature = "lz4"))]
fn lz4_unavailable() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "LZ4 archive compression requires the `lz4` feature",
    )
}
