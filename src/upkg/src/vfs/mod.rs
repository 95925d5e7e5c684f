//! Container file systems
//!
//! A container is one physical file holding many virtual files: `.pak`
//! archives and Android `.obb` bundles. Each implements [`Vfs`]; the
//! [`catalog::FileCatalog`] mounts them next to loose files so packages can be
//! found by name regardless of where they live.
//!
//! Entry readers share the container's underlying [`Archive`] and seek on
//! every read, so any number of entries can be open at once.

pub mod catalog;
pub mod obb;
pub mod pak;

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use crate::archive::{Archive, ArchiveVersion};
use crate::compression::Method;
use crate::{Error, Result};

pub use catalog::FileCatalog;
pub use obb::ObbVfs;
pub use pak::PakVfs;

/// Underlying archive of a container, shared by every entry reader.
pub type SharedReader = Rc<RefCell<Box<dyn Archive>>>;

/// Buckets in the name hash table.
pub const HASH_SIZE: usize = 1024;

/// Containers with at least this many entries get a hash table.
pub const MIN_ENTRIES_FOR_HASHING: usize = 256;

/// One file inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerEntry {
    pub path: String,
    /// Uncompressed size.
    pub size: u64,
    pub method: Method,
    pub encrypted: bool,
    /// Offset of the entry record or data inside the container.
    pub position: u64,
}

/// Lookup key: forward slashes, lower case, no leading slash.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_ascii_lowercase()
}

/// Case-insensitive bucket hash of a file name.
pub fn name_hash(name: &str) -> usize {
    let mut hash: u16 = 0;
    for c in name.bytes() {
        let c = c.to_ascii_lowercase() as u16;
        hash = hash
            .rotate_left(5)
            .wrapping_sub(hash)
            .wrapping_add(((c << 4) + c) ^ 0x13F);
    }
    hash as usize & (HASH_SIZE - 1)
}

/// Shorten mounted paths the way the engine addresses them:
/// `/Engine/Content/x` → `/Engine/x`, `/Engine/Plugins/x` → `/Plugins/x`,
/// `/<Project>/Content/x` → `/Game/x`.
pub fn compact_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/Engine/Content") {
        return format!("/Engine{}", rest);
    }
    if let Some(rest) = path.strip_prefix("/Engine") {
        if rest.starts_with("/Plugins") {
            return rest.to_string();
        }
    }
    let Some(tail) = path.strip_prefix('/') else {
        return path.to_string();
    };
    let Some(slash) = tail.find('/') else {
        return path.to_string();
    };
    let pos = slash + 1;
    if !path[pos..].starts_with("/Content/") || pos <= 4 {
        return path.to_string();
    }
    format!("/Game{}", &path[pos + 8..])
}

/// Entry list with case-insensitive lookup, hashed once it grows large.
#[derive(Debug, Default)]
pub struct EntryIndex {
    entries: Vec<ContainerEntry>,
    keys: Vec<String>,
    buckets: Option<Vec<Vec<u32>>>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ContainerEntry) {
        self.keys.push(normalize_path(&entry.path));
        self.entries.push(entry);
        self.buckets = None;
    }

    /// Build the hash table if the index is large enough.
    pub fn finish(&mut self) {
        if self.entries.len() < MIN_ENTRIES_FOR_HASHING {
            return;
        }
        let mut buckets = vec![Vec::new(); HASH_SIZE];
        for (i, key) in self.keys.iter().enumerate() {
            buckets[name_hash(key)].push(i as u32);
        }
        self.buckets = Some(buckets);
    }

    pub fn is_hashed(&self) -> bool {
        self.buckets.is_some()
    }

    pub fn entries(&self) -> &[ContainerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, path: &str) -> Option<usize> {
        let key = normalize_path(path);
        match &self.buckets {
            Some(buckets) => buckets[name_hash(&key)]
                .iter()
                .map(|&i| i as usize)
                .find(|&i| self.keys[i] == key),
            None => self.find_linear(&key),
        }
    }

    pub fn find_linear(&self, path: &str) -> Option<usize> {
        let key = normalize_path(path);
        self.keys.iter().position(|k| *k == key)
    }
}

/// Stored entry: a window `[start, start + size)` of the container.
pub struct WindowReader {
    shared: SharedReader,
    start: u64,
    size: u64,
    pos: u64,
    version: ArchiveVersion,
    stopper: Option<u64>,
}

impl WindowReader {
    pub fn new(shared: SharedReader, start: u64, size: u64) -> Self {
        Self {
            shared,
            start,
            size,
            pos: 0,
            version: ArchiveVersion::default(),
            stopper: None,
        }
    }
}

impl Archive for WindowReader {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.pos + buf.len() as u64 > self.size {
            return Err(Error::Eof {
                pos: self.pos,
                size: buf.len(),
                len: self.size,
            });
        }
        // the container reader is shared, so always reposition it
        let mut inner = self.shared.borrow_mut();
        inner.seek(self.start + self.pos)?;
        inner.read_raw(buf)?;
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
        self.pos = pos;
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
}

/// A mounted container.
pub trait Vfs {
    /// Short name of the container format, e.g. `pak`.
    fn kind(&self) -> &'static str;

    /// Parse the container directory from `reader`.
    ///
    /// Returns `Ok(false)` when the file is not this kind of container or
    /// must be skipped (wrong key, unsupported layout); [`Vfs::rejection`]
    /// then says why. Structural damage past the signature is an error.
    fn attach(&mut self, reader: Box<dyn Archive>) -> Result<bool>;

    fn rejection(&self) -> Option<&str>;

    fn entries(&self) -> &[ContainerEntry];

    fn find(&self, path: &str) -> Option<usize>;

    /// Reader over the uncompressed bytes of entry `index`.
    fn open_entry(&self, index: usize) -> Result<Box<dyn Archive>>;

    /// Release the container file handle; reads reopen it.
    fn close(&self) {}

    fn num_files(&self) -> usize {
        self.entries().len()
    }

    fn file_name(&self, index: usize) -> Option<&str> {
        self.entries().get(index).map(|e| e.path.as_str())
    }

    fn file_size(&self, path: &str) -> Option<u64> {
        self.find(path).map(|i| self.entries()[i].size)
    }

    fn create_reader(&self, path: &str) -> Result<Box<dyn Archive>> {
        let index = self
            .find(path)
            .ok_or_else(|| Error::NotFound(format!("{} in {} container", path, self.kind())))?;
        self.open_entry(index)
    }

    fn read_all(&self, path: &str) -> Result<Vec<u8>> {
        let mut reader = self.create_reader(path)?;
        let len = reader.len() as usize;
        reader.read_bytes_vec(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> ContainerEntry {
        ContainerEntry {
            path: path.to_string(),
            size: 0,
            method: Method::None,
            encrypted: false,
            position: 0,
        }
    }

    #[test]
    fn test_compact_path() {
        assert_eq!(compact_path("/Engine/Content/Maps/Entry.umap"), "/Engine/Maps/Entry.umap");
        assert_eq!(compact_path("/Engine/Plugins/Fx/a.uasset"), "/Plugins/Fx/a.uasset");
        assert_eq!(compact_path("/ShooterGame/Content/Maps/a.umap"), "/Game/Maps/a.umap");
        assert_eq!(compact_path("/Abc/Content/a.uasset"), "/Abc/Content/a.uasset");
        assert_eq!(compact_path("/ShooterGame/Config/a.ini"), "/ShooterGame/Config/a.ini");
        assert_eq!(compact_path("relative/path"), "relative/path");
        assert_eq!(compact_path("/"), "/");
    }

    #[test]
    fn test_name_hash_case_insensitive() {
        assert_eq!(name_hash("Game/Maps/A.umap"), name_hash("game/maps/a.umap"));
        assert!(name_hash("anything at all") < HASH_SIZE);
    }

    #[test]
    fn test_hashed_lookup_agrees_with_linear() {
        let mut index = EntryIndex::new();
        for i in 0..600 {
            index.push(entry(&format!("/Game/Dir{}/File{}.uasset", i % 7, i)));
        }
        index.finish();
        assert!(index.is_hashed());

        for i in (0..600).step_by(37) {
            let name = format!("game/DIR{}/file{}.UASSET", i % 7, i);
            assert_eq!(index.find(&name), Some(i));
            assert_eq!(index.find(&name), index.find_linear(&name));
        }
        assert_eq!(index.find("/Game/missing.uasset"), None);
        assert_eq!(index.find_linear("/Game/missing.uasset"), None);
    }

    #[test]
    fn test_small_index_is_linear() {
        let mut index = EntryIndex::new();
        index.push(entry("Content\\Textures\\T_Rock.uasset"));
        index.finish();
        assert!(!index.is_hashed());
        assert_eq!(index.find("/content/textures/t_rock.uasset"), Some(0));
    }
}
