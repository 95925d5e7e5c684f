//! Registry of loose files and mounted containers
//!
//! Packages reference each other by bare name (`Engine`, `Core`,
//! `/Game/Maps/Entry`), so the catalog indexes every known file by its
//! lower-cased base name and resolves a name to whichever loose file or
//! container entry carries it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{ObbVfs, PakVfs, Vfs};
use crate::archive::{Archive, FileReader};
use crate::{Error, Result, ResultExt};

/// Extensions of files that hold packages.
pub const PACKAGE_EXTENSIONS: &[&str] = &[
    "u", "upk", "umap", "uasset", "xxx", "sfm", "ut2", "ut3", "utx", "uax", "umx", "usx", "ukx",
    "unr", "rom", "lm", "bsm", "sac", "mtx",
];

/// Extensions mounted as containers.
pub const CONTAINER_EXTENSIONS: &[&str] = &["pak", "obb"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Disk(PathBuf),
    Container { container: usize, entry: usize },
}

/// A file known to the catalog.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    /// Disk path or path inside the container.
    pub path: String,
    pub size: u64,
    pub is_package: bool,
    location: Location,
}

impl CatalogFile {
    pub fn in_container(&self) -> bool {
        matches!(self.location, Location::Container { .. })
    }
}

/// Lower-cased `(base name, extension)` of a path.
fn split_name(path: &str) -> (String, String) {
    let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (base, ext) = match file.rfind('.') {
        Some(dot) if dot > 0 => (&file[..dot], &file[dot + 1..]),
        _ => (file, ""),
    };
    (base.to_ascii_lowercase(), ext.to_ascii_lowercase())
}

pub fn is_package_extension(ext: &str) -> bool {
    PACKAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

#[derive(Default)]
pub struct FileCatalog {
    files: Vec<CatalogFile>,
    by_base: HashMap<String, Vec<usize>>,
    containers: Vec<Box<dyn Vfs>>,
    rejections: Vec<String>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, path: String, size: u64, location: Location) {
        let (base, ext) = split_name(&path);
        let index = self.files.len();
        self.files.push(CatalogFile {
            path,
            size,
            is_package: is_package_extension(&ext),
            location,
        });
        self.by_base.entry(base).or_default().push(index);
    }

    /// Register one file on disk; containers are mounted.
    ///
    /// Returns `Ok(false)` for a container that was skipped.
    pub fn register_file(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let (_, ext) = split_name(&path.to_string_lossy());
        if CONTAINER_EXTENSIONS.contains(&ext.as_str()) {
            return self.mount_file(path);
        }
        let size = std::fs::metadata(path)?.len();
        self.add(path.to_string_lossy().to_string(), size, Location::Disk(path.to_path_buf()));
        Ok(true)
    }

    /// Register every file under `root`. Returns the number of files added,
    /// container entries included.
    pub fn register_dir(&mut self, root: impl AsRef<Path>) -> Result<usize> {
        let before = self.files.len();
        for entry in walkdir::WalkDir::new(root.as_ref())
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            // one damaged container must not stop the scan
            if let Err(e) = self.register_file(entry.path()) {
                tracing::warn!("{}: {}", entry.path().display(), e.breadcrumb());
                self.rejections.push(format!("{}: {}", entry.path().display(), e));
            }
        }
        let added = self.files.len() - before;
        tracing::info!("registered {} files from {}", added, root.as_ref().display());
        Ok(added)
    }

    fn mount_file(&mut self, path: &Path) -> Result<bool> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let (_, ext) = split_name(&name);
        let vfs: Box<dyn Vfs> = match ext.as_str() {
            "obb" => Box::new(ObbVfs::new(name)),
            _ => Box::new(PakVfs::new(name)),
        };
        let reader = FileReader::open(path)?;
        self.mount(vfs, Box::new(reader))
            .with_context(|| format!("mounting {}", path.display()))
    }

    /// Attach `vfs` to `reader` and index its entries.
    pub fn mount(&mut self, mut vfs: Box<dyn Vfs>, reader: Box<dyn Archive>) -> Result<bool> {
        if !vfs.attach(reader)? {
            let message = vfs.rejection().unwrap_or("container rejected").to_string();
            tracing::warn!("{}", message);
            self.rejections.push(message);
            return Ok(false);
        }
        let container = self.containers.len();
        let entries: Vec<(String, u64)> = vfs.entries().iter().map(|e| (e.path.clone(), e.size)).collect();
        // containers release their handle until the first read
        vfs.close();
        self.containers.push(vfs);
        for (entry, (path, size)) in entries.into_iter().enumerate() {
            self.add(path, size, Location::Container { container, entry });
        }
        Ok(true)
    }

    pub fn files(&self) -> &[CatalogFile] {
        &self.files
    }

    pub fn containers(&self) -> &[Box<dyn Vfs>] {
        &self.containers
    }

    /// Messages for containers that were skipped.
    pub fn rejections(&self) -> &[String] {
        &self.rejections
    }

    /// Find a package by name. Directories are ignored and the match is
    /// case-insensitive; without an extension any package extension matches.
    pub fn find_package(&self, name: &str) -> Option<&CatalogFile> {
        let (base, ext) = split_name(name);
        let candidates = self.by_base.get(&base)?;
        candidates.iter().map(|&i| &self.files[i]).find(|f| {
            if ext.is_empty() {
                f.is_package
            } else {
                is_package_extension(&ext) && split_name(&f.path).1 == ext
            }
        })
    }

    /// Find any file by base name and extension, e.g. a companion `.tfc`.
    pub fn find_file(&self, name: &str) -> Option<&CatalogFile> {
        let (base, ext) = split_name(name);
        self.by_base
            .get(&base)?
            .iter()
            .map(|&i| &self.files[i])
            .find(|f| split_name(&f.path).1 == ext)
    }

    pub fn open(&self, file: &CatalogFile) -> Result<Box<dyn Archive>> {
        match &file.location {
            Location::Disk(path) => Ok(Box::new(FileReader::open(path)?)),
            Location::Container { container, entry } => self.containers[*container]
                .open_entry(*entry)
                .with_context(|| file.path.clone()),
        }
    }

    pub fn open_package(&self, name: &str) -> Result<Box<dyn Archive>> {
        let file = self
            .find_package(name)
            .ok_or_else(|| Error::NotFound(format!("package {}", name)))?;
        self.open(file)
    }

    /// Close every container handle; later reads reopen them.
    pub fn close_readers(&self) {
        for vfs in &self.containers {
            vfs.close();
        }
    }
}
