//! Package files
//!
//! A [`Package`] is a parsed header (summary, name, import and export
//! tables) plus the reader its objects are deserialized from. Objects are
//! created lazily by the [`Loader`](loader::Loader).
//!
//! ```text
//! +-----------+-------+---------+---------+----------------+
//! | summary   | names | imports | exports | object data... |
//! +-----------+-------+---------+---------+----------------+
//! ```
//!
//! Compressed packages are transparently wrapped in a
//! [`ChunkedReader`](crate::chunked::ChunkedReader) after the summary, and
//! obfuscated ones in a [`CipherReader`] underneath it.

pub mod cipher;
pub mod loader;
pub mod summary;
pub mod tables;

use std::cell::{Cell, RefCell, RefMut};

use serde::Serialize;

use crate::archive::{Archive, ArchiveVersion, MemReader};
use crate::chunked::ChunkedReader;
use crate::game::GameCatalog;
use crate::object::ObjectRef;
use crate::package::cipher::CipherReader;
use crate::property::Linker;
use crate::{Error, Result, ResultExt};

pub use cipher::Cipher;
pub use loader::Loader;
pub use summary::{probe_fully_compressed, PackageSummary};
pub use tables::{ExportRecord, ImportRecord, NameMap, ObjectIndex};

/// Outer chains deeper than this are treated as cyclic.
const MAX_OUTER_DEPTH: usize = 64;

/// How far a package has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PackageState {
    Unopened,
    HeaderRead,
    TablesLoaded,
    Ready,
}

pub struct Package {
    name: String,
    summary: PackageSummary,
    version: ArchiveVersion,
    names: NameMap,
    imports: Vec<ImportRecord>,
    exports: Vec<ExportRecord>,
    fully_compressed: bool,
    reader: RefCell<Box<dyn Archive>>,
    state: Cell<PackageState>,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("names", &self.names.len())
            .field("imports", &self.imports.len())
            .field("exports", &self.exports.len())
            .field("state", &self.state.get())
            .finish()
    }
}

impl Package {
    /// Parse the header and tables of the package behind `reader`.
    pub fn open(name: &str, reader: Box<dyn Archive>, catalog: &GameCatalog) -> Result<Self> {
        let mut package = Self::read_header(name, reader, catalog)?;
        package.load_tables()?;
        Ok(package)
    }

    /// Read the summary and detect the game; the tables stay empty.
    pub fn read_header(name: &str, reader: Box<dyn Archive>, catalog: &GameCatalog) -> Result<Self> {
        Self::read_header_inner(name, reader, catalog).with_context(|| name.to_string())
    }

    fn read_header_inner(name: &str, mut reader: Box<dyn Archive>, catalog: &GameCatalog) -> Result<Self> {
        reader.seek(0)?;
        let mut fully = None;
        if let Some(cipher) = Cipher::detect(reader.as_mut())? {
            tracing::debug!("{}: {:?} cipher", name, cipher);
            reader = Box::new(CipherReader::new(reader, cipher)?);
        } else {
            fully = probe_fully_compressed(reader.as_mut())?;
            if let Some(method) = fully {
                tracing::debug!("{}: fully compressed ({:?})", name, method);
                reader = Box::new(ChunkedReader::fully_compressed(reader, method)?);
            }
        }

        let summary = PackageSummary::read(reader.as_mut(), catalog)?;
        tracing::debug!(
            "{}: version {}/{}, {} names, {} imports, {} exports",
            name,
            reader.version().file_version,
            reader.version().licensee_version,
            summary.name_count,
            summary.import_count,
            summary.export_count
        );

        if let Some(cipher) = cipher::read_post_summary_cipher(reader.as_mut())? {
            tracing::debug!("{}: {:?} cipher after the summary", name, cipher);
            reader = Box::new(CipherReader::new(reader, cipher)?);
        }
        reader.set_header_end(summary.headers_size.max(0) as u64);

        if summary.is_compressed() {
            if fully.is_some() {
                return Err(Error::corrupt(0, "fully compressed package has its own chunk table"));
            }
            let method = summary.compression_method();
            reader = Box::new(ChunkedReader::new(reader, method, summary.compressed_chunks.clone())?);
        }
        let version = *reader.version();

        Ok(Self {
            name: name.to_string(),
            summary,
            version,
            names: NameMap::default(),
            imports: Vec::new(),
            exports: Vec::new(),
            fully_compressed: fully.is_some(),
            reader: RefCell::new(reader),
            state: Cell::new(PackageState::HeaderRead),
        })
    }

    /// Read the name, import and export tables after [`Package::read_header`].
    ///
    /// On failure the package stays in the last state it reached.
    pub fn load_tables(&mut self) -> Result<()> {
        let name = self.name.clone();
        self.load_tables_inner().with_context(|| name)
    }

    fn load_tables_inner(&mut self) -> Result<()> {
        if self.state.get() != PackageState::HeaderRead {
            return Err(Error::corrupt(0, format!("tables requested in state {:?}", self.state.get())));
        }
        let reader = self.reader.get_mut();
        let names = NameMap::read(reader.as_mut(), &self.summary).context("name table")?;
        let imports = tables::read_imports(reader.as_mut(), &self.summary, &names).context("import table")?;
        let mut exports = tables::read_exports(reader.as_mut(), &self.summary, &names).context("export table")?;
        cipher::unscramble_exports(&mut exports, &self.summary, self.version.game).context("export table")?;
        self.names = names;
        self.imports = imports;
        self.exports = exports;
        self.state.set(PackageState::TablesLoaded);

        let len = self.reader.get_mut().len();
        for (i, export) in self.exports.iter().enumerate() {
            let end = export.serial_offset.saturating_add(export.serial_size);
            if export.serial_offset < 0 || export.serial_size < 0 || end as u64 > len {
                tracing::warn!(
                    "{}: export {} ({}) spans {}..{} beyond {} bytes",
                    self.name,
                    i,
                    export.object_name,
                    export.serial_offset,
                    end,
                    len
                );
            }
        }
        self.state.set(PackageState::Ready);
        Ok(())
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>, catalog: &GameCatalog) -> Result<Self> {
        Self::open(name, Box::new(MemReader::new(bytes)), catalog)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn summary(&self) -> &PackageSummary {
        &self.summary
    }

    /// Version with the detected game; every object read uses it.
    pub fn version(&self) -> &ArchiveVersion {
        &self.version
    }

    pub fn names(&self) -> &NameMap {
        &self.names
    }

    pub fn imports(&self) -> &[ImportRecord] {
        &self.imports
    }

    pub fn exports(&self) -> &[ExportRecord] {
        &self.exports
    }

    pub fn state(&self) -> PackageState {
        self.state.get()
    }

    pub fn is_fully_compressed(&self) -> bool {
        self.fully_compressed
    }

    /// Decoded index, or an error when it points outside the tables.
    pub fn resolve(&self, index: i32) -> Result<ObjectIndex> {
        let resolved = ObjectIndex::from_raw(index);
        let valid = match resolved {
            ObjectIndex::Null => true,
            ObjectIndex::Import(i) => i < self.imports.len(),
            ObjectIndex::Export(i) => i < self.exports.len(),
        };
        if valid {
            Ok(resolved)
        } else {
            Err(Error::corrupt(0, format!("{}: object index {} out of range", self.name, index)))
        }
    }

    fn entry(&self, index: i32) -> Option<(&str, i32)> {
        match ObjectIndex::from_raw(index) {
            ObjectIndex::Null => None,
            ObjectIndex::Import(i) => self.imports.get(i).map(|r| (r.object_name.as_str(), r.outer_index)),
            ObjectIndex::Export(i) => self.exports.get(i).map(|r| (r.object_name.as_str(), r.outer_index)),
        }
    }

    /// Object name of an import or export.
    pub fn object_name(&self, index: i32) -> Option<&str> {
        self.entry(index).map(|(name, _)| name)
    }

    /// Class of export `index`; zero means the export is itself a class.
    pub fn class_name_of(&self, export: usize) -> Option<&str> {
        let record = self.exports.get(export)?;
        if record.class_index == 0 {
            return Some("Class");
        }
        self.object_name(record.class_index)
    }

    /// Name of the package an import or export lives in: the outermost
    /// import of the chain, or this package for exports.
    pub fn outermost_name(&self, index: i32) -> Option<&str> {
        let mut current = index;
        for _ in 0..MAX_OUTER_DEPTH {
            match ObjectIndex::from_raw(current) {
                ObjectIndex::Null => return None,
                ObjectIndex::Export(_) => return Some(&self.name),
                ObjectIndex::Import(i) => {
                    let record = self.imports.get(i)?;
                    if record.outer_index == 0 {
                        return Some(&record.object_name);
                    }
                    current = record.outer_index;
                }
            }
        }
        tracing::warn!("{}: outer chain of {} does not terminate", self.name, index);
        None
    }

    /// `Package.Outer.Name` for an export, `Package.Name` for an import
    /// whose outermost import is the package.
    pub fn object_path(&self, index: i32) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = index;
        let mut is_export = false;
        for _ in 0..MAX_OUTER_DEPTH {
            let Some((name, outer)) = self.entry(current) else {
                break;
            };
            is_export |= current > 0;
            parts.push(name);
            current = outer;
            if current == 0 {
                break;
            }
        }
        if parts.is_empty() {
            return None;
        }
        if is_export {
            parts.push(&self.name);
        }
        parts.reverse();
        Some(parts.join("."))
    }

    /// Whether import `import_index` of `self` names the same object as
    /// export `export_index` of `other`, comparing outer chains.
    pub fn compare_object_paths(&self, import_index: i32, other: &Package, export_index: i32) -> bool {
        let (mut a, mut b) = (import_index, export_index);
        for _ in 0..MAX_OUTER_DEPTH {
            if a == 0 && b == 0 {
                return true;
            }
            let (name_a, outer_a) = if a == 0 {
                (self.name.as_str(), 0)
            } else {
                match self.entry(a) {
                    Some(e) => e,
                    None => return false,
                }
            };
            let (name_b, outer_b) = if b == 0 {
                (other.name.as_str(), 0)
            } else {
                match other.entry(b) {
                    Some(e) => e,
                    None => return false,
                }
            };
            if !name_a.eq_ignore_ascii_case(name_b) {
                return false;
            }
            a = outer_a;
            b = outer_b;
        }
        false
    }

    /// Export of `self` that import `import_index` of `importer` refers to.
    pub fn find_export_for_import(&self, importer: &Package, import_index: usize) -> Option<usize> {
        let import = importer.imports.get(import_index)?;
        let raw = ObjectIndex::Import(import_index).to_raw();
        self.exports.iter().enumerate().find_map(|(i, export)| {
            if !export.object_name.eq_ignore_ascii_case(&import.object_name) {
                return None;
            }
            if !self.class_name_of(i)?.eq_ignore_ascii_case(&import.class_name) {
                return None;
            }
            // generation 4 names are unique enough
            if self.version.is_ue4() || importer.compare_object_paths(raw, self, ObjectIndex::Export(i).to_raw()) {
                Some(i)
            } else {
                None
            }
        })
    }

    /// Exclusive access to the object data reader.
    pub fn reader(&self) -> Result<RefMut<'_, Box<dyn Archive>>> {
        self.reader
            .try_borrow_mut()
            .map_err(|_| Error::corrupt(0, format!("{}: reader already in use", self.name)))
    }

    /// Release the file handle; it reopens on the next read.
    pub fn close_reader(&self) {
        if let Ok(mut reader) = self.reader.try_borrow_mut() {
            reader.close();
        }
    }
}

impl Linker for Package {
    fn read_name(&self, ar: &mut dyn Archive) -> Result<String> {
        self.names.read_name(ar)
    }

    fn object_ref(&self, index: i32) -> ObjectRef {
        ObjectRef {
            index,
            path: self.object_path(index),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    //! Synthetic generation 3 packages.

    use crate::archive::{ArchiveVersion, ArchiveWriter, Guid, PACKAGE_FILE_TAG};
    use crate::game::Game;

    pub(crate) const VERSION: i32 = 512;

    pub(crate) fn version() -> ArchiveVersion {
        ArchiveVersion::new(VERSION, 0, Game::UE3)
    }

    struct Import {
        class_package: i32,
        class_name: i32,
        outer: i32,
        name: i32,
    }

    struct Export {
        class: i32,
        outer: i32,
        name: i32,
        body: Vec<u8>,
    }

    /// Builds a package from names, imports and exports with raw bodies.
    pub(crate) struct PackageBuilder {
        names: Vec<String>,
        imports: Vec<Import>,
        exports: Vec<Export>,
    }

    impl PackageBuilder {
        pub(crate) fn new() -> Self {
            Self {
                names: vec!["None".to_string()],
                imports: Vec::new(),
                exports: Vec::new(),
            }
        }

        pub(crate) fn name(&mut self, name: &str) -> i32 {
            if let Some(i) = self.names.iter().position(|n| n == name) {
                return i as i32;
            }
            self.names.push(name.to_string());
            self.names.len() as i32 - 1
        }

        /// Returns the import's package index.
        pub(crate) fn import(&mut self, class_package: &str, class_name: &str, outer: i32, name: &str) -> i32 {
            let import = Import {
                class_package: self.name(class_package),
                class_name: self.name(class_name),
                outer,
                name: self.name(name),
            };
            self.imports.push(import);
            -(self.imports.len() as i32)
        }

        /// Returns the export's package index.
        pub(crate) fn export(&mut self, class: i32, outer: i32, name: &str, body: Vec<u8>) -> i32 {
            let export = Export {
                class,
                outer,
                name: self.name(name),
                body,
            };
            self.exports.push(export);
            self.exports.len() as i32
        }

        /// Body writer for this package's version.
        pub(crate) fn writer(&self) -> ArchiveWriter {
            ArchiveWriter::with_version(version())
        }

        /// Append an int property tag and value.
        pub(crate) fn int_property(&mut self, w: &mut ArchiveWriter, name: &str, value: i32) {
            let name = self.name(name);
            let ty = self.name("IntProperty");
            w.write_i32(name).write_i32(0).write_i32(ty).write_i32(0);
            w.write_i32(4).write_i32(0).write_i32(value);
        }

        /// Append an object property tag and value.
        pub(crate) fn object_property(&mut self, w: &mut ArchiveWriter, name: &str, index: i32) {
            let name = self.name(name);
            let ty = self.name("ObjectProperty");
            w.write_i32(name).write_i32(0).write_i32(ty).write_i32(0);
            w.write_i32(4).write_i32(0).write_i32(index);
        }

        /// Terminate a property list; net index first.
        pub(crate) fn body(&mut self, props: impl FnOnce(&mut Self, &mut ArchiveWriter)) -> Vec<u8> {
            let mut w = self.writer();
            w.write_i32(-1);
            props(self, &mut w);
            w.write_i32(0).write_i32(0);
            w.into_inner()
        }

        pub(crate) fn build(&self) -> Vec<u8> {
            let mut w = self.writer();
            w.write_u32(PACKAGE_FILE_TAG).write_u32(VERSION as u32);
            let headers_size = w.position();
            w.write_i32(0).write_fstring("None").write_u32(0);
            w.write_i32(self.names.len() as i32);
            let name_offset = w.position();
            w.write_i32(0).write_i32(self.exports.len() as i32);
            let export_offset = w.position();
            w.write_i32(0).write_i32(self.imports.len() as i32);
            let import_offset = w.position();
            w.write_i32(0);
            let depends_offset = w.position();
            w.write_i32(0);
            w.write_guid(Guid([1, 2, 3, 4]));
            w.write_i32(1).write_i32(self.exports.len() as i32).write_i32(self.names.len() as i32).write_i32(0);
            w.write_i32(3000).write_i32(0);
            w.write_u32(0).write_i32(0);
            w.write_u32(0);

            let pos = w.position() as i32;
            w.patch_i32(name_offset, pos);
            for name in &self.names {
                w.write_fstring(name).write_u64(0);
            }
            let pos = w.position() as i32;
            w.patch_i32(import_offset, pos);
            for import in &self.imports {
                w.write_i32(import.class_package).write_i32(0);
                w.write_i32(import.class_name).write_i32(0);
                w.write_i32(import.outer);
                w.write_i32(import.name).write_i32(0);
            }
            let pos = w.position() as i32;
            w.patch_i32(export_offset, pos);
            let mut offset_slots = Vec::new();
            for export in &self.exports {
                w.write_i32(export.class).write_i32(0).write_i32(export.outer);
                w.write_i32(export.name).write_i32(0).write_i32(0);
                w.write_u32(0).write_u32(0).write_i32(export.body.len() as i32);
                offset_slots.push(w.position());
                w.write_i32(0);
                w.write_i32(0).write_u32(0).write_i32(0).write_guid(Guid::default()).write_u32(0);
            }
            let pos = w.position() as i32;
            w.patch_i32(depends_offset, pos);
            w.patch_i32(headers_size, pos);
            for (export, slot) in self.exports.iter().zip(offset_slots) {
                let pos = w.position() as i32;
                w.patch_i32(slot, pos);
                w.write_bytes(&export.body);
            }
            w.into_inner()
        }
    }
}
