//! Bulk data blocks
//!
//! Large payloads (mip levels, sound data) are stored as a header followed by
//! the bytes, or by the bytes somewhere else: later in the package, or in a
//! separate file such as a texture cache.
//!
//! | Version | Header |
//! |---------|--------|
//! | gen 3, < 266 | end position, size on disk (254+), lazy flags (251+), name (260+), element count |
//! | gen 3, >= 266 | flags, element count, size on disk, offset (all int32) |
//! | gen 4 | flags, element count, size on disk, offset (int64 from 198) |

use serde::Serialize;

use crate::archive::Archive;
use crate::chunked;
use crate::compression::Method;
use crate::game::ue4_ver;
use crate::property::Linker;
use crate::{Error, Result, ResultExt};

/// Bulk data flag bits.
pub mod bulk_flags {
    /// Payload lives in another file.
    pub const STORE_IN_SEPARATE_FILE: u32 = 0x01;
    pub const COMPRESSED_ZLIB: u32 = 0x02;
    pub const COMPRESSED_LZO: u32 = 0x10;
    /// Header only, nothing stored.
    pub const NO_DATA: u32 = 0x20;
    /// Payload stored elsewhere in the same package.
    pub const SEPARATE_DATA: u32 = 0x40;
    pub const COMPRESSED_LZX: u32 = 0x80;
}

use bulk_flags::*;

/// First generation 3 version with the current header.
const CURRENT_HEADER_VERSION: i32 = 266;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkData {
    pub flags: u32,
    pub element_count: i32,
    pub element_size: usize,
    pub size_on_disk: i64,
    pub offset: u64,
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl BulkData {
    /// Read the header only; the cursor is left after it.
    pub fn read_header(ar: &mut dyn Archive, linker: &dyn Linker, element_size: usize) -> Result<Self> {
        let version = *ar.version();
        let mut bulk = Self {
            flags: 0,
            element_count: 0,
            element_size,
            size_on_disk: 0,
            offset: 0,
            data: None,
        };

        if version.is_ue4() {
            bulk.flags = ar.read_u32()?;
            bulk.element_count = ar.read_i32()?;
            bulk.size_on_disk = ar.read_i32()? as i64;
            bulk.offset = if version.file_version < ue4_ver::BULKDATA_AT_LARGE_OFFSETS {
                ar.read_i32()? as u64
            } else {
                ar.read_i64()? as u64
            };
        } else if version.is_ue3_or_later() && version.file_version >= CURRENT_HEADER_VERSION {
            bulk.flags = ar.read_u32()?;
            bulk.element_count = ar.read_i32()?;
            bulk.size_on_disk = ar.read_i32()? as i64;
            bulk.offset = ar.read_i32()? as u64;
        } else {
            // lazy array form
            let end_position = ar.read_i32()? as i64;
            if version.file_version >= 254 {
                bulk.size_on_disk = ar.read_i32()? as i64;
            }
            if version.file_version >= 251 {
                let lazy_flags = ar.read_i32()?;
                if lazy_flags & 1 != 0 {
                    return Err(Error::unsupported("lazy array flags", lazy_flags));
                }
                if lazy_flags & 2 != 0 {
                    bulk.flags |= COMPRESSED_ZLIB;
                }
            }
            if version.is_ue3_or_later() && version.file_version >= 260 {
                linker.read_name(ar)?;
            }
            bulk.element_count = ar.read_index()?;
            bulk.offset = ar.tell();
            bulk.size_on_disk = end_position - bulk.offset as i64;
        }

        if bulk.element_count < 0 {
            return Err(Error::corrupt(ar.tell(), format!("negative bulk element count {}", bulk.element_count)));
        }
        Ok(bulk)
    }

    /// Read the header and, when stored in this package, the payload. The
    /// cursor ends after the inline payload, or after the header when the
    /// payload lives elsewhere.
    pub fn read(ar: &mut dyn Archive, linker: &dyn Linker, element_size: usize) -> Result<Self> {
        let mut bulk = Self::read_header(ar, linker, element_size)?;
        if !bulk.is_stored_here() {
            return Ok(bulk);
        }
        if bulk.flags & SEPARATE_DATA != 0 {
            let pos = ar.tell();
            let stopper = ar.stopper();
            ar.set_stopper(None);
            let result = bulk.load_from(ar);
            ar.set_stopper(stopper);
            ar.seek(pos)?;
            result?;
        } else {
            if bulk.offset != ar.tell() {
                tracing::warn!("inline bulk data at {} but header says {}", ar.tell(), bulk.offset);
            }
            bulk.load_from(ar)?;
        }
        Ok(bulk)
    }

    /// Read the header and step over an inline payload.
    pub fn skip(ar: &mut dyn Archive, linker: &dyn Linker) -> Result<Self> {
        let bulk = Self::read_header(ar, linker, 1)?;
        if bulk.offset == ar.tell() && bulk.size_on_disk > 0 {
            ar.seek(ar.tell() + bulk.size_on_disk as u64)?;
        }
        Ok(bulk)
    }

    pub fn data_size(&self) -> usize {
        self.element_count as usize * self.element_size
    }

    pub fn is_stored_here(&self) -> bool {
        self.flags & (STORE_IN_SEPARATE_FILE | NO_DATA) == 0
    }

    pub fn method(&self) -> Method {
        if self.flags & COMPRESSED_ZLIB != 0 {
            Method::Zlib
        } else if self.flags & COMPRESSED_LZO != 0 {
            Method::Lzo
        } else if self.flags & COMPRESSED_LZX != 0 {
            Method::Lzx
        } else {
            Method::None
        }
    }

    /// Read the payload at `offset` of `ar`, which may be another file.
    pub fn load_from(&mut self, ar: &mut dyn Archive) -> Result<()> {
        let size = self.data_size();
        if size == 0 {
            self.data = Some(Vec::new());
            return Ok(());
        }
        ar.seek(self.offset)?;
        let method = self.method();
        let data = if method == Method::None {
            ar.read_bytes_vec(size)?
        } else {
            chunked::read_compressed_chunk(ar, method, size)
                .with_context(|| format!("bulk data at {}", self.offset))?
        };
        self.data = Some(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveVersion, ArchiveWriter, MemReader};
    use crate::game::Game;
    use crate::property::tests::TestLinker;

    fn ue3() -> ArchiveVersion {
        ArchiveVersion::new(512, 0, Game::UE3)
    }

    #[test]
    fn test_inline_payload() {
        let mut w = ArchiveWriter::with_version(ue3());
        w.write_u32(0).write_i32(4).write_i32(8).write_i32(16);
        w.write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]).write_u32(0xFFFF_FFFF);
        let linker = TestLinker::new(&["None"]);
        let mut r = MemReader::with_version(w.into_inner(), ue3());

        let bulk = BulkData::read(&mut r, &linker, 2).unwrap();
        assert_eq!(bulk.data.as_deref(), Some(&[1u8, 2, 3, 4, 5, 6, 7, 8][..]));
        assert_eq!(r.read_u32().unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_compressed_separate_data() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 7) as u8).collect();
        let mut w = ArchiveWriter::with_version(ue3());
        w.write_u32(COMPRESSED_ZLIB | SEPARATE_DATA).write_i32(5000).write_i32(0);
        let offset_at = w.position();
        w.write_i32(0).write_u32(0xABCD);
        let offset = w.position();
        chunked::write_compressed_chunk(&mut w, Method::Zlib, &payload, 2048).unwrap();
        w.patch_i32(offset_at, offset as i32);
        let linker = TestLinker::new(&["None"]);
        let mut r = MemReader::with_version(w.into_inner(), ue3());
        r.set_stopper(Some(20));

        let bulk = BulkData::read(&mut r, &linker, 1).unwrap();
        assert_eq!(bulk.method(), Method::Zlib);
        assert_eq!(bulk.data.unwrap(), payload);
        // cursor and stopper restored
        assert_eq!(r.tell(), 16);
        assert_eq!(r.stopper(), Some(20));
    }

    #[test]
    fn test_external_payload_left_alone() {
        let mut w = ArchiveWriter::with_version(ue3());
        w.write_u32(STORE_IN_SEPARATE_FILE).write_i32(100).write_i32(100).write_i32(4096);
        let linker = TestLinker::new(&["None"]);
        let mut r = MemReader::with_version(w.into_inner(), ue3());
        let bulk = BulkData::read(&mut r, &linker, 1).unwrap();
        assert!(bulk.data.is_none());
        assert!(!bulk.is_stored_here());
        assert_eq!(bulk.offset, 4096);

        let mut cache = MemReader::new(vec![9u8; 4196]);
        let mut bulk = bulk;
        bulk.load_from(&mut cache).unwrap();
        assert_eq!(bulk.data.unwrap().len(), 100);
    }

    #[test]
    fn test_lazy_array_and_ue4_headers() {
        let linker = TestLinker::new(&["None", "Mip"]);
        let old = ArchiveVersion::new(255, 0, Game::UE3);
        let mut w = ArchiveWriter::with_version(old);
        // end position, size on disk, lazy flags, count
        w.write_i32(20).write_i32(4).write_i32(0).write_i32(4).write_bytes(&[1, 2, 3, 4]);
        let mut r = MemReader::with_version(w.into_inner(), old);
        let bulk = BulkData::read(&mut r, &linker, 1).unwrap();
        assert_eq!((bulk.offset, bulk.size_on_disk), (16, 4));
        assert_eq!(bulk.data.unwrap(), vec![1, 2, 3, 4]);

        let ue4 = ArchiveVersion::new(516, 0, Game::ue4(20));
        let mut w = ArchiveWriter::with_version(ue4);
        w.write_u32(0).write_i32(2).write_i32(2).write_i64(20).write_bytes(&[5, 6]);
        let mut r = MemReader::with_version(w.into_inner(), ue4);
        let bulk = BulkData::skip(&mut r, &linker).unwrap();
        assert_eq!(bulk.element_count, 2);
        assert_eq!(r.tell(), 22);
    }

    #[test]
    fn test_negative_count_is_corrupt() {
        let mut w = ArchiveWriter::with_version(ue3());
        w.write_u32(0).write_i32(-1).write_i32(0).write_i32(16);
        let linker = TestLinker::new(&["None"]);
        let mut r = MemReader::with_version(w.into_inner(), ue3());
        let err = BulkData::read(&mut r, &linker, 1).unwrap_err();
        assert!(err.to_string().contains("negative bulk element count"));
    }
}
