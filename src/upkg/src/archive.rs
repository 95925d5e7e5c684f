//! Byte stream abstraction
//!
//! [`Archive`] is the reader every other layer sits on: package files on disk,
//! decrypted container entries, decompressed chunks. Primitive reads honour
//! the per-archive byte order and an optional stopper offset past which
//! nothing may be read.
//!
//! # Wire encodings
//!
//! ## Compact index
//!
//! Signed variable-length integer used by the first two engine generations:
//! - Byte 0: bit 7 sign, bit 6 "more", bits 0-5 value
//! - Bytes 1-4: bit 7 "more", bits 0-6 value
//!
//! ## FString
//!
//! - Length (compact index before UE3, int32 after)
//! - Positive length: that many 8-bit characters including the terminator
//! - Negative length: that many UTF-16 code units including the terminator

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

use crate::game::{Engine, Game};
use crate::{Error, Result};

/// Package file tag as stored by little-endian platforms.
pub const PACKAGE_FILE_TAG: u32 = 0x9E2A83C1;
/// The same tag written by a big-endian platform.
pub const PACKAGE_FILE_TAG_REV: u32 = 0xC1832A9E;

/// Dialect of an archive, set during detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ArchiveVersion {
    pub file_version: i32,
    pub licensee_version: i32,
    pub game: Game,
    pub reverse_bytes: bool,
}

impl ArchiveVersion {
    pub fn new(file_version: i32, licensee_version: i32, game: Game) -> Self {
        Self {
            file_version,
            licensee_version,
            game,
            reverse_bytes: false,
        }
    }

    pub fn engine(&self) -> Engine {
        self.game.engine()
    }

    /// Generations 1 and 2 store counts and indices as compact indices.
    pub fn uses_compact_index(&self) -> bool {
        matches!(
            self.engine(),
            Engine::UE1 | Engine::UE2 | Engine::Vengeance | Engine::Lead | Engine::UE2X
        )
    }

    pub fn is_ue3_or_later(&self) -> bool {
        self.engine() >= Engine::UE3
    }

    pub fn is_ue4(&self) -> bool {
        self.engine() == Engine::UE4
    }
}

/// 128-bit identifier stored as four 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Guid(pub [u32; 4]);

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{:08X}{:08X}{:08X}{:08X}", a, b, c, d)
    }
}

macro_rules! endian {
    ($ar:expr, $buf:expr, $f:ident) => {
        if $ar.version().reverse_bytes {
            BigEndian::$f(&$buf)
        } else {
            LittleEndian::$f(&$buf)
        }
    };
}

fn read_n<A: Archive + ?Sized, const N: usize>(ar: &mut A) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    ar.read_bytes(&mut buf)?;
    Ok(buf)
}

/// Seekable byte source with a version and an optional stopper.
pub trait Archive {
    /// Copy bytes at the cursor without consulting the stopper.
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<()>;

    fn seek(&mut self, pos: u64) -> Result<()>;

    fn tell(&self) -> u64;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn version(&self) -> &ArchiveVersion;

    fn version_mut(&mut self) -> &mut ArchiveVersion;

    fn stopper(&self) -> Option<u64>;

    fn set_stopper(&mut self, stopper: Option<u64>);

    /// Release OS resources; the next read reopens them.
    fn close(&mut self) {}

    /// End of the package headers, for readers that only transform those.
    fn set_header_end(&mut self, _end: u64) {}

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        if let Some(stopper) = self.stopper() {
            let pos = self.tell();
            if pos + buf.len() as u64 > stopper {
                return Err(Error::Stopper {
                    pos,
                    size: buf.len(),
                    stopper,
                });
            }
        }
        self.read_raw(buf)
    }

    fn read_bytes_vec(&mut self, size: usize) -> Result<Vec<u8>> {
        let pos = self.tell();
        let remaining = self.len().saturating_sub(pos);
        if size as u64 > remaining {
            return Err(Error::Eof {
                pos,
                size,
                len: self.len(),
            });
        }
        let mut buf = vec![0u8; size];
        self.read_bytes(&mut buf)?;
        Ok(buf)
    }

    fn skip(&mut self, count: u64) -> Result<()> {
        let pos = self.tell();
        self.seek(pos + count)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(read_n::<Self, 1>(self)?[0])
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let buf = read_n::<Self, 2>(self)?;
        Ok(endian!(self, buf, read_u16))
    }

    fn read_i16(&mut self) -> Result<i16> {
        let buf = read_n::<Self, 2>(self)?;
        Ok(endian!(self, buf, read_i16))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let buf = read_n::<Self, 4>(self)?;
        Ok(endian!(self, buf, read_u32))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let buf = read_n::<Self, 4>(self)?;
        Ok(endian!(self, buf, read_i32))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let buf = read_n::<Self, 8>(self)?;
        Ok(endian!(self, buf, read_u64))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let buf = read_n::<Self, 8>(self)?;
        Ok(endian!(self, buf, read_i64))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let buf = read_n::<Self, 4>(self)?;
        Ok(endian!(self, buf, read_f32))
    }

    /// Boolean stored as int32.
    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_i32()? != 0)
    }

    fn read_guid(&mut self) -> Result<Guid> {
        Ok(Guid([
            self.read_u32()?,
            self.read_u32()?,
            self.read_u32()?,
            self.read_u32()?,
        ]))
    }

    fn read_compact_index(&mut self) -> Result<i32> {
        let pos = self.tell();
        let first = self.read_u8()?;
        let mut value = (first & 0x3F) as u32;
        if first & 0x40 != 0 {
            let mut shift = 6u32;
            loop {
                if shift > 27 {
                    return Err(Error::corrupt(pos, "compact index longer than 5 bytes"));
                }
                let b = self.read_u8()?;
                value |= ((b & 0x7F) as u32) << shift;
                shift += 7;
                if b & 0x80 == 0 {
                    break;
                }
            }
        }
        let value = value as i32;
        Ok(if first & 0x80 != 0 {
            value.wrapping_neg()
        } else {
            value
        })
    }

    /// Compact index before UE3, int32 afterwards.
    fn read_index(&mut self) -> Result<i32> {
        if self.version().uses_compact_index() {
            self.read_compact_index()
        } else {
            self.read_i32()
        }
    }

    /// Element count of a serialized array.
    fn read_array_len(&mut self) -> Result<usize> {
        let pos = self.tell();
        let count = self.read_index()?;
        if count < 0 {
            return Err(Error::corrupt(pos, format!("negative array count {}", count)));
        }
        let remaining = self.len().saturating_sub(self.tell());
        if count as u64 > remaining {
            return Err(Error::corrupt(
                pos,
                format!("array count {} exceeds remaining {} bytes", count, remaining),
            ));
        }
        Ok(count as usize)
    }

    fn read_fstring(&mut self) -> Result<String> {
        let pos = self.tell();
        let len = self.read_index()?;
        if len == 0 {
            return Ok(String::new());
        }
        let chars = len.unsigned_abs() as u64;
        let bytes = if len > 0 { chars } else { chars * 2 };
        let remaining = self.len().saturating_sub(self.tell());
        if bytes > remaining {
            return Err(Error::corrupt(
                pos,
                format!("string length {} exceeds remaining {} bytes", len, remaining),
            ));
        }

        if len > 0 {
            let buf = self.read_bytes_vec(chars as usize)?;
            match buf.split_last() {
                Some((0, body)) => Ok(body.iter().map(|&b| b as char).collect()),
                _ => Err(Error::corrupt(pos, "string is not null-terminated")),
            }
        } else {
            let mut units = Vec::with_capacity(chars as usize);
            for _ in 0..chars {
                units.push(self.read_u16()?);
            }
            if units.pop() != Some(0) {
                return Err(Error::corrupt(pos, "string is not null-terminated"));
            }
            Ok(String::from_utf16_lossy(&units))
        }
    }
}

/// Append the compact index encoding of `value`.
pub fn encode_compact_index(value: i32, out: &mut Vec<u8>) {
    let mut rest = value.unsigned_abs();
    let mut first = (rest & 0x3F) as u8;
    if value < 0 {
        first |= 0x80;
    }
    rest >>= 6;
    if rest != 0 {
        first |= 0x40;
    }
    out.push(first);
    while rest != 0 {
        let mut b = (rest & 0x7F) as u8;
        rest >>= 7;
        if rest != 0 {
            b |= 0x80;
        }
        out.push(b);
    }
}

/// Decode a compact index, returning the value and the bytes consumed.
pub fn decode_compact_index(bytes: &[u8]) -> Result<(i32, usize)> {
    let mut reader = MemReader::new(bytes.to_vec());
    let value = reader.read_compact_index()?;
    Ok((value, reader.tell() as usize))
}

/// Archive over an owned buffer.
#[derive(Debug, Clone, Default)]
pub struct MemReader {
    data: Vec<u8>,
    pos: u64,
    version: ArchiveVersion,
    stopper: Option<u64>,
}

impl MemReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_version(data: Vec<u8>, version: ArchiveVersion) -> Self {
        Self {
            data,
            version,
            ..Default::default()
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Archive for MemReader {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.pos as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(Error::Eof {
                pos: self.pos,
                size: buf.len(),
                len: self.data.len() as u64,
            });
        }
        buf.copy_from_slice(&self.data[start..end]);
        self.pos = end as u64;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.data.len() as u64 {
            return Err(Error::Eof {
                pos,
                size: 0,
                len: self.data.len() as u64,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn version(&self) -> &ArchiveVersion {
        &self.version
    }

    fn version_mut(&mut self) -> &mut ArchiveVersion {
        &mut self.version
    }

    fn stopper(&self) -> Option<u64> {
        self.stopper
    }

    fn set_stopper(&mut self, stopper: Option<u64>) {
        self.stopper = stopper;
    }
}

/// Archive over a file on disk, opened lazily.
#[derive(Debug)]
pub struct FileReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    size: u64,
    pos: u64,
    version: ArchiveVersion,
    stopper: Option<u64>,
}

impl FileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            file: Some(BufReader::new(file)),
            size,
            pos: 0,
            version: ArchiveVersion::default(),
            stopper: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn handle(&mut self) -> Result<&mut BufReader<File>> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                tracing::debug!("reopening {}", self.path.display());
                let mut file = BufReader::new(File::open(&self.path)?);
                file.seek(SeekFrom::Start(self.pos))?;
                file
            }
        };
        Ok(self.file.insert(file))
    }
}

impl Archive for FileReader {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.pos + buf.len() as u64 > self.size {
            return Err(Error::Eof {
                pos: self.pos,
                size: buf.len(),
                len: self.size,
            });
        }
        self.handle()?.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.size {
            return Err(Error::Eof {
                pos,
                size: 0,
                len: self.size,
            });
        }
        if pos != self.pos {
            if let Some(file) = self.file.as_mut() {
                file.seek(SeekFrom::Start(pos))?;
            }
            self.pos = pos;
        }
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> u64 {
        self.size
    }

    fn version(&self) -> &ArchiveVersion {
        &self.version
    }

    fn version_mut(&mut self) -> &mut ArchiveVersion {
        &mut self.version
    }

    fn stopper(&self) -> Option<u64> {
        self.stopper
    }

    fn set_stopper(&mut self, stopper: Option<u64>) {
        self.stopper = stopper;
    }

    fn close(&mut self) {
        self.file = None;
    }
}

impl<A: Archive + ?Sized> Archive for Box<A> {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_raw(buf)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        (**self).seek(pos)
    }

    fn tell(&self) -> u64 {
        (**self).tell()
    }

    fn len(&self) -> u64 {
        (**self).len()
    }

    fn version(&self) -> &ArchiveVersion {
        (**self).version()
    }

    fn version_mut(&mut self) -> &mut ArchiveVersion {
        (**self).version_mut()
    }

    fn stopper(&self) -> Option<u64> {
        (**self).stopper()
    }

    fn set_stopper(&mut self, stopper: Option<u64>) {
        (**self).set_stopper(stopper)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn set_header_end(&mut self, end: u64) {
        (**self).set_header_end(end)
    }
}

macro_rules! write_prim {
    ($name:ident, $ty:ty, $n:expr, $f:ident) => {
        pub fn $name(&mut self, value: $ty) -> &mut Self {
            let mut buf = [0u8; $n];
            if self.version.reverse_bytes {
                BigEndian::$f(&mut buf, value);
            } else {
                LittleEndian::$f(&mut buf, value);
            }
            self.write_bytes(&buf)
        }
    };
}

/// Serializer for the same primitives, used to build fixtures and
/// compressed payloads.
#[derive(Debug, Clone, Default)]
pub struct ArchiveWriter {
    data: Vec<u8>,
    version: ArchiveVersion,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(version: ArchiveVersion) -> Self {
        Self {
            data: Vec::new(),
            version,
        }
    }

    pub fn version(&self) -> &ArchiveVersion {
        &self.version
    }

    pub fn position(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.data.push(value);
        self
    }

    write_prim!(write_u16, u16, 2, write_u16);
    write_prim!(write_i16, i16, 2, write_i16);
    write_prim!(write_u32, u32, 4, write_u32);
    write_prim!(write_i32, i32, 4, write_i32);
    write_prim!(write_u64, u64, 8, write_u64);
    write_prim!(write_i64, i64, 8, write_i64);
    write_prim!(write_f32, f32, 4, write_f32);

    pub fn write_guid(&mut self, guid: Guid) -> &mut Self {
        for word in guid.0 {
            self.write_u32(word);
        }
        self
    }

    pub fn write_compact_index(&mut self, value: i32) -> &mut Self {
        encode_compact_index(value, &mut self.data);
        self
    }

    /// Compact index before UE3, int32 afterwards.
    pub fn write_index(&mut self, value: i32) -> &mut Self {
        if self.version.uses_compact_index() {
            self.write_compact_index(value)
        } else {
            self.write_i32(value)
        }
    }

    /// Latin-1 when every character fits, UTF-16 otherwise.
    pub fn write_fstring(&mut self, s: &str) -> &mut Self {
        if s.is_empty() {
            return self.write_index(0);
        }
        if s.chars().all(|c| (c as u32) < 0x100) {
            self.write_index(s.chars().count() as i32 + 1);
            for c in s.chars() {
                self.data.push(c as u32 as u8);
            }
            self.data.push(0);
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            self.write_index(-(units.len() as i32 + 1));
            for unit in units {
                self.write_u16(unit);
            }
            self.write_u16(0);
        }
        self
    }

    /// Overwrite a previously written int32, e.g. a size or offset placeholder.
    pub fn patch_i32(&mut self, at: usize, value: i32) {
        let buf = &mut self.data[at..at + 4];
        if self.version.reverse_bytes {
            BigEndian::write_i32(buf, value);
        } else {
            LittleEndian::write_i32(buf, value);
        }
    }

    pub fn patch_i64(&mut self, at: usize, value: i64) {
        let buf = &mut self.data[at..at + 8];
        if self.version.reverse_bytes {
            BigEndian::write_i64(buf, value);
        } else {
            LittleEndian::write_i64(buf, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact_roundtrip(value: i32) -> (i32, usize) {
        let mut buf = Vec::new();
        encode_compact_index(value, &mut buf);
        let (decoded, used) = decode_compact_index(&buf).unwrap();
        assert_eq!(used, buf.len());
        (decoded, used)
    }

    #[test]
    fn test_compact_index_values() {
        assert_eq!(compact_roundtrip(0), (0, 1));
        assert_eq!(compact_roundtrip(63), (63, 1));
        assert_eq!(compact_roundtrip(-63), (-63, 1));
        assert_eq!(compact_roundtrip(64), (64, 2));
        assert_eq!(compact_roundtrip(-64), (-64, 2));
        assert_eq!(compact_roundtrip(i32::MAX), (i32::MAX, 5));
        assert_eq!(compact_roundtrip(-i32::MAX), (-i32::MAX, 5));
    }

    #[test]
    fn test_compact_index_layout() {
        let mut buf = Vec::new();
        encode_compact_index(-64, &mut buf);
        assert_eq!(buf, vec![0xC0, 0x01]);

        let mut buf = Vec::new();
        encode_compact_index(8191, &mut buf);
        assert_eq!(buf, vec![0x7F, 0x7F]);
    }

    #[test]
    fn test_compact_index_too_long() {
        let err = decode_compact_index(&[0x40, 0x80, 0x80, 0x80, 0x80, 0x01]).unwrap_err();
        assert!(err.to_string().contains("compact index"));
    }

    #[test]
    fn test_primitives_little_endian() {
        let mut r = MemReader::new(vec![0x01, 0x02, 0x03, 0x04, 0xFF, 0xFF, 0x00, 0x00, 0x80, 0x3F]);
        assert_eq!(r.read_u32().unwrap(), 0x04030201);
        assert_eq!(r.read_i16().unwrap(), -1);
        assert_eq!(r.read_u16().unwrap(), 0);
        assert_eq!(r.read_u16().unwrap(), 0x3F80);
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn test_reverse_bytes() {
        let mut r = MemReader::new(vec![0x9E, 0x2A, 0x83, 0xC1]);
        r.version_mut().reverse_bytes = true;
        assert_eq!(r.read_u32().unwrap(), PACKAGE_FILE_TAG);
    }

    #[test]
    fn test_stopper() {
        let mut r = MemReader::new(vec![0u8; 16]);
        r.set_stopper(Some(6));
        assert!(r.read_i32().is_ok());
        let err = r.read_i32().unwrap_err();
        assert!(matches!(err, Error::Stopper { pos: 4, size: 4, stopper: 6 }));
        assert_eq!(err.kind(), crate::ErrorKind::StructuralCorruption);
        r.set_stopper(None);
        assert!(r.read_i32().is_ok());
    }

    #[test]
    fn test_fstring_ansi_and_utf16() {
        let mut w = ArchiveWriter::with_version(ArchiveVersion::new(369, 0, Game::UE3));
        w.write_fstring("Engine").write_fstring("Größe\u{4E16}").write_fstring("");
        let mut r = MemReader::with_version(w.into_inner(), ArchiveVersion::new(369, 0, Game::UE3));
        assert_eq!(r.read_fstring().unwrap(), "Engine");
        assert_eq!(r.read_fstring().unwrap(), "Größe\u{4E16}");
        assert_eq!(r.read_fstring().unwrap(), "");
        assert_eq!(r.tell(), r.len());
    }

    #[test]
    fn test_fstring_compact_length() {
        let v = ArchiveVersion::new(120, 0, Game::UE2);
        let mut w = ArchiveWriter::with_version(v);
        w.write_fstring("Core");
        assert_eq!(w.as_slice()[0], 5);
        let mut r = MemReader::with_version(w.into_inner(), v);
        assert_eq!(r.read_fstring().unwrap(), "Core");
    }

    #[test]
    fn test_fstring_rejects_garbage() {
        let mut w = ArchiveWriter::new();
        w.write_i32(1_000_000).write_bytes(b"abc");
        let mut r = MemReader::new(w.into_inner());
        assert!(r.read_fstring().is_err());

        let mut w = ArchiveWriter::new();
        w.write_i32(3).write_bytes(b"abc");
        let mut r = MemReader::new(w.into_inner());
        let err = r.read_fstring().unwrap_err();
        assert!(err.to_string().contains("null-terminated"));
    }

    #[test]
    fn test_file_reader_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [1u8, 0, 0, 0, 2, 0, 0, 0]).unwrap();

        let mut r = FileReader::open(&path).unwrap();
        assert_eq!(r.read_i32().unwrap(), 1);
        r.close();
        assert!(!r.is_open());
        assert_eq!(r.read_i32().unwrap(), 2);
        assert!(r.is_open());
        r.seek(0).unwrap();
        assert_eq!(r.read_i32().unwrap(), 1);
        assert!(r.seek(9).is_err());
    }

    #[test]
    fn test_writer_patch() {
        let mut w = ArchiveWriter::new();
        w.write_i32(0).write_i64(0);
        w.patch_i32(0, 42);
        w.patch_i64(4, -1);
        let mut r = MemReader::new(w.into_inner());
        assert_eq!(r.read_i32().unwrap(), 42);
        assert_eq!(r.read_i64().unwrap(), -1);
    }
}
