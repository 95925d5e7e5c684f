//! Android OBB bundles
//!
//! Layout:
//! - 13-byte signature `UE3AndroidOBB`
//! - int32 entry count
//! - per entry: FString name, int64 position, int32 size
//!
//! Entries are stored uncompressed and unencrypted.

use std::cell::RefCell;
use std::rc::Rc;

use super::{ContainerEntry, EntryIndex, SharedReader, Vfs, WindowReader};
use crate::archive::Archive;
use crate::compression::Method;
use crate::{Error, Result, ResultExt};

pub const OBB_SIGNATURE: &[u8; 13] = b"UE3AndroidOBB";

pub struct ObbVfs {
    name: String,
    reader: Option<SharedReader>,
    index: EntryIndex,
    rejection: Option<String>,
}

impl ObbVfs {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reader: None,
            index: EntryIndex::new(),
            rejection: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read_directory(&mut self, reader: &mut dyn Archive) -> Result<()> {
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(Error::corrupt(reader.tell() - 4, format!("negative entry count {}", count)));
        }
        for i in 0..count {
            let raw = reader.read_fstring().with_context(|| format!("entry {}", i))?;
            let name = raw.replace('\\', "/");
            let path = name.strip_prefix("../").unwrap_or(&name).to_string();
            let position = reader.read_i64()? as u64;
            let size = reader.read_i32()?;
            if size < 0 || position + size as u64 > reader.len() {
                return Err(Error::corrupt(
                    reader.tell(),
                    format!("entry {} ({}) lies outside the bundle", i, path),
                ));
            }
            self.index.push(ContainerEntry {
                path,
                size: size as u64,
                method: Method::None,
                encrypted: false,
                position,
            });
        }
        self.index.finish();
        Ok(())
    }
}

impl Vfs for ObbVfs {
    fn kind(&self) -> &'static str {
        "obb"
    }

    fn attach(&mut self, mut reader: Box<dyn Archive>) -> Result<bool> {
        let mut signature = [0u8; 13];
        if reader.len() < 17 || reader.read_bytes(&mut signature).is_err() || &signature != OBB_SIGNATURE {
            self.rejection = Some(format!("{}: not an OBB bundle", self.name));
            return Ok(false);
        }

        self.read_directory(reader.as_mut())
            .with_context(|| format!("obb {}", self.name))?;
        tracing::info!("obb {}: {} files", self.name, self.index.len());
        self.reader = Some(Rc::new(RefCell::new(reader)));
        Ok(true)
    }

    fn rejection(&self) -> Option<&str> {
        self.rejection.as_deref()
    }

    fn entries(&self) -> &[ContainerEntry] {
        self.index.entries()
    }

    fn find(&self, path: &str) -> Option<usize> {
        self.index.find(path)
    }

    fn open_entry(&self, index: usize) -> Result<Box<dyn Archive>> {
        let shared = self
            .reader
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("{}: not attached", self.name)))?;
        let entry = self
            .index
            .entries()
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("{}: entry {}", self.name, index)))?;
        Ok(Box::new(WindowReader::new(Rc::clone(shared), entry.position, entry.size)))
    }

    fn close(&self) {
        if let Some(shared) = &self.reader {
            shared.borrow_mut().close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveWriter, MemReader};

    /// Bundle with the given entries; data follows the directory.
    fn build_obb(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut dir = ArchiveWriter::new();
        dir.write_bytes(OBB_SIGNATURE).write_i32(files.len() as i32);
        let dir_size: usize = 17 + files.iter().map(|(n, _)| 4 + n.len() + 1 + 12).sum::<usize>();

        let mut offset = dir_size;
        for (name, data) in files {
            dir.write_fstring(name).write_i64(offset as i64).write_i32(data.len() as i32);
            offset += data.len();
        }
        for (_, data) in files {
            dir.write_bytes(data);
        }
        dir.into_inner()
    }

    #[test]
    fn test_attach_and_read() {
        let bundle = build_obb(&[
            ("..\\UDKGame\\CookedAndroid\\Startup.xxx", &b"startup bytes"[..]),
            ("UDKGame/CookedAndroid/Map.xxx", &b"map"[..]),
        ]);
        let mut vfs = ObbVfs::new("main.obb");
        assert!(vfs.attach(Box::new(MemReader::new(bundle))).unwrap());
        assert_eq!(vfs.num_files(), 2);
        assert_eq!(vfs.file_name(0), Some("UDKGame/CookedAndroid/Startup.xxx"));
        assert_eq!(vfs.file_size("udkgame/cookedandroid/map.xxx"), Some(3));
        assert_eq!(vfs.read_all("UDKGame/CookedAndroid/Startup.xxx").unwrap(), b"startup bytes");

        // two readers interleaved over one container
        let mut a = vfs.create_reader("UDKGame/CookedAndroid/Startup.xxx").unwrap();
        let mut b = vfs.create_reader("UDKGame/CookedAndroid/Map.xxx").unwrap();
        assert_eq!(a.read_u8().unwrap(), b's');
        assert_eq!(b.read_u8().unwrap(), b'm');
        assert_eq!(a.read_u8().unwrap(), b't');
        assert!(b.read_bytes_vec(3).is_err());
    }

    #[test]
    fn test_bad_signature() {
        let mut vfs = ObbVfs::new("junk.obb");
        assert!(!vfs.attach(Box::new(MemReader::new(b"not an obb file at all".to_vec()))).unwrap());
        assert!(vfs.rejection().unwrap().contains("not an OBB"));
        assert!(vfs.create_reader("x").is_err());
    }

    #[test]
    fn test_entry_outside_bundle() {
        let mut w = ArchiveWriter::new();
        w.write_bytes(OBB_SIGNATURE)
            .write_i32(1)
            .write_fstring("a.xxx")
            .write_i64(1000)
            .write_i32(10);
        let mut vfs = ObbVfs::new("bad.obb");
        let err = vfs.attach(Box::new(MemReader::new(w.into_inner()))).unwrap_err();
        assert!(err.to_string().contains("outside the bundle"));
    }
}
