//! Name, import and export tables
//!
//! Package indices are 1-based and signed: `-i-1` is import `i`, `i+1` is
//! export `i` and zero is no object. See [`ObjectIndex`].

use std::cell::{Cell, RefCell};

use serde::Serialize;

use crate::archive::{Archive, ArchiveVersion, Guid};
use crate::game::{ue4_ver, Game};
use crate::object::ObjectHandle;
use crate::package::summary::PackageSummary;
use crate::property::tag::{display_name, read_name_ref};
use crate::{Error, Result, ResultExt};

/// First generation 3 version with 64-bit object flags.
const QWORD_FLAGS_VERSION: i32 = 195;
/// Export flag: object belongs to another package but was cooked into this one.
pub const EXPORT_FORCED: u32 = 0x1;

/// Decoded package index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectIndex {
    Null,
    Import(usize),
    Export(usize),
}

impl ObjectIndex {
    pub fn from_raw(index: i32) -> Self {
        match index {
            0 => Self::Null,
            i if i < 0 => Self::Import((-(i as i64) - 1) as usize),
            i => Self::Export(i as usize - 1),
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Self::Null => 0,
            Self::Import(i) => -(i as i32) - 1,
            Self::Export(i) => i as i32 + 1,
        }
    }
}

/// Package-scoped string table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NameMap {
    names: Vec<String>,
}

/// Replace names that are clearly not text, usually a sign of a title
/// specific encryption the catalog doesn't know.
///
/// A name is garbled when most of it is unreadable: control characters,
/// replacement characters, or any non-ASCII byte of an 8-bit name. Wide
/// names are only written for text beyond Latin-1, so their letters count
/// as readable whatever the script.
fn is_garbled(name: &str) -> bool {
    let name = name.split('\0').next().unwrap_or("");
    let len = name.chars().count();
    if len == 0 {
        return false;
    }
    let wide = name.chars().any(|c| c as u32 > 0xFF);
    let unreadable = name
        .chars()
        .filter(|&c| c.is_control() || c == char::REPLACEMENT_CHARACTER || (!wide && !c.is_ascii()))
        .count();
    if unreadable * 2 > len {
        return true;
    }
    // the string reader substitutes '$' for unreadable characters
    let dollars = name.chars().filter(|&c| c == '$').count();
    dollars > 0 && (len >= 64 || (len > 16 && dollars >= len / 2))
}

/// Null-terminated string of the earliest packages.
fn read_cstring(ar: &mut dyn Archive) -> Result<String> {
    let pos = ar.tell();
    let mut out = String::new();
    loop {
        match ar.read_u8()? {
            0 => return Ok(out),
            b => out.push(b as char),
        }
        if out.len() > 1024 {
            return Err(Error::corrupt(pos, "unterminated name"));
        }
    }
}

impl NameMap {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Read `summary.name_count` entries at `summary.name_offset`.
    pub fn read(ar: &mut dyn Archive, summary: &PackageSummary) -> Result<Self> {
        let count = summary.name_count;
        if count < 0 || count as u64 > ar.len() {
            return Err(Error::corrupt(summary.name_offset as u64, format!("invalid name count {}", count)));
        }
        let mut names = Vec::with_capacity(count as usize);
        if count == 0 {
            return Ok(Self { names });
        }
        ar.seek(summary.name_offset as u64)?;
        let version = *ar.version();
        let ver = version.file_version;
        for i in 0..count as usize {
            let pos = ar.tell();
            let name = (|| -> Result<String> {
                if version.is_ue4() {
                    let name = ar.read_fstring()?.trim().to_string();
                    if ver >= ue4_ver::NAME_HASHES_SERIALIZED {
                        let _non_case_preserving = ar.read_u16()?;
                        let _case_preserving = ar.read_u16()?;
                    }
                    return Ok(name);
                }
                let name = if !version.is_ue3_or_later() && ver < 64 {
                    read_cstring(&mut *ar)?
                } else {
                    ar.read_fstring()?
                };
                if version.is_ue3_or_later() && ver >= QWORD_FLAGS_VERSION {
                    let _flags = ar.read_u64()?;
                } else {
                    let _flags = ar.read_u32()?;
                }
                Ok(name)
            })()
            .with_context(|| format!("name {} at {}", i, pos))?;

            if is_garbled(&name) {
                tracing::warn!("fixing garbled name {} ({:?})", i, name);
                names.push(format!("__name_{}__", i));
            } else {
                names.push(name);
            }
        }
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|s| s.as_str())
    }

    /// Name `index` with instance `number`, e.g. `Mesh_3` for number 4.
    pub fn get(&self, index: i32, number: i32) -> Option<String> {
        let base = self.names.get(usize::try_from(index).ok()?)?;
        Some(display_name(base, number))
    }

    /// Read a name reference at the cursor.
    pub fn read_name(&self, ar: &mut dyn Archive) -> Result<String> {
        let pos = ar.tell();
        let (index, number) = read_name_ref(ar)?;
        self.get(index, number).ok_or_else(|| {
            Error::corrupt(pos, format!("name index {} out of range ({} names)", index, self.names.len()))
        })
    }
}

/// Reference to an object in another package.
#[derive(Debug, Clone, Serialize)]
pub struct ImportRecord {
    pub class_package: String,
    pub class_name: String,
    pub outer_index: i32,
    pub object_name: String,
    /// Set once resolution failed so it is reported only once.
    #[serde(skip)]
    pub missing: Cell<bool>,
}

impl ImportRecord {
    pub fn read(ar: &mut dyn Archive, names: &NameMap, editor_data: bool) -> Result<Self> {
        let class_package = names.read_name(ar)?;
        let class_name = names.read_name(ar)?;
        let outer_index = ar.read_i32()?;
        let object_name = names.read_name(ar)?;
        let version = *ar.version();
        if version.is_ue4() && version.file_version >= ue4_ver::NON_OUTER_PACKAGE_IMPORT && editor_data {
            let _package_name = names.read_name(ar)?;
        }
        Ok(Self {
            class_package,
            class_name,
            outer_index,
            object_name,
            missing: Cell::new(false),
        })
    }

    pub fn is_missing(&self) -> bool {
        self.missing.get()
    }
}

/// Per-title export record fields that the generic layout lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportSlot {
    /// After the archetype.
    AfterArchetype,
    /// After the serial offset.
    AfterOffset,
}

struct ExportQuirk {
    game: Game,
    licensee_min: i32,
    file_min: i32,
    slot: ExportSlot,
    words: u64,
}

const EXPORT_QUIRKS: &[ExportQuirk] = &[
    ExportQuirk { game: Game::BATMAN2, licensee_min: 89, file_min: 0, slot: ExportSlot::AfterArchetype, words: 1 },
    ExportQuirk { game: Game::BATMAN3, licensee_min: 89, file_min: 0, slot: ExportSlot::AfterArchetype, words: 1 },
    ExportQuirk { game: Game::MK, licensee_min: 0, file_min: 573, slot: ExportSlot::AfterArchetype, words: 1 },
    ExportQuirk { game: Game::MK, licensee_min: 0, file_min: 677, slot: ExportSlot::AfterArchetype, words: 4 },
    ExportQuirk { game: Game::HUXLEY, licensee_min: 22, file_min: 0, slot: ExportSlot::AfterOffset, words: 1 },
    // upper half of a 64-bit serial offset
    ExportQuirk { game: Game::MK, licensee_min: 0, file_min: 677, slot: ExportSlot::AfterOffset, words: 1 },
];

fn skip_quirk_words(ar: &mut dyn Archive, slot: ExportSlot) -> Result<()> {
    let version = *ar.version();
    let words: u64 = EXPORT_QUIRKS
        .iter()
        .filter(|q| {
            q.slot == slot
                && q.game == version.game
                && version.licensee_version >= q.licensee_min
                && version.file_version >= q.file_min
        })
        .map(|q| q.words)
        .sum();
    if words > 0 {
        ar.skip(words * 4)?;
    }
    Ok(())
}

/// Whether the export record carries the component map.
fn has_component_map(version: &ArchiveVersion) -> bool {
    let (ver, lic) = (version.file_version, version.licensee_version);
    match version.game {
        Game::ALPHA_PROTOCOL if lic >= 53 => false,
        Game::TRANSFORMERS if lic >= 37 => false,
        Game::MK if ver >= 573 => true,
        _ => ver < 543,
    }
}

/// Object defined in this package.
#[derive(Debug, Serialize)]
pub struct ExportRecord {
    pub class_index: i32,
    pub super_index: i32,
    #[serde(skip_serializing_if = "is_zero")]
    pub template_index: i32,
    pub outer_index: i32,
    pub object_name: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub archetype: i32,
    /// Generation 3 stores the high word first.
    pub object_flags: u64,
    pub serial_size: i64,
    pub serial_offset: i64,
    pub export_flags: u32,
    pub guid: Guid,
    /// Materialized object, created at most once.
    #[serde(skip)]
    pub object: RefCell<Option<ObjectHandle>>,
    /// Creation was attempted and declined (unknown class, defaults).
    #[serde(skip)]
    pub declined: Cell<bool>,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

impl ExportRecord {
    pub(crate) fn empty() -> Self {
        Self {
            class_index: 0,
            super_index: 0,
            template_index: 0,
            outer_index: 0,
            object_name: String::new(),
            archetype: 0,
            object_flags: 0,
            serial_size: 0,
            serial_offset: 0,
            export_flags: 0,
            guid: Guid::default(),
            object: RefCell::new(None),
            declined: Cell::new(false),
        }
    }

    pub fn read(ar: &mut dyn Archive, names: &NameMap) -> Result<Self> {
        let version = *ar.version();
        if version.is_ue4() {
            Self::read_ue4(ar, names)
        } else if version.is_ue3_or_later() {
            Self::read_ue3(ar, names)
        } else {
            Self::read_ue2(ar, names)
        }
    }

    fn read_ue2(ar: &mut dyn Archive, names: &NameMap) -> Result<Self> {
        if ar.version().game == Game::AA2 {
            return Self::read_aa2(ar, names);
        }
        let mut export = Self::empty();
        export.class_index = ar.read_index()?;
        export.super_index = ar.read_index()?;
        export.outer_index = ar.read_i32()?;
        export.object_name = names.read_name(ar)?;
        export.object_flags = ar.read_u32()? as u64;
        export.serial_size = ar.read_index()? as i64;
        if export.serial_size > 0 {
            export.serial_offset = ar.read_index()? as i64;
        }
        Ok(export)
    }

    /// Reordered fields, a random word and inverted flags.
    fn read_aa2(ar: &mut dyn Archive, names: &NameMap) -> Result<Self> {
        let mut export = Self::empty();
        export.super_index = ar.read_index()?;
        let _salt = ar.read_i32()?;
        export.class_index = ar.read_index()?;
        export.outer_index = ar.read_i32()?;
        export.object_flags = !ar.read_u32()? as u64;
        export.object_name = names.read_name(ar)?;
        export.serial_size = ar.read_index()? as i64;
        if export.serial_size > 0 {
            export.serial_offset = ar.read_index()? as i64;
        }
        Ok(export)
    }

    fn read_ue3(ar: &mut dyn Archive, names: &NameMap) -> Result<Self> {
        let version = *ar.version();
        let ver = version.file_version;
        let game = version.game;
        if game == Game::WHEELMAN {
            return Self::read_wheelman(ar, names);
        }
        let obfuscator = if game == Game::AA3 { ar.read_i32()? } else { 0 };

        let mut export = Self::empty();
        export.class_index = ar.read_i32()?;
        export.super_index = ar.read_i32()?;
        export.outer_index = ar.read_i32()?;
        export.object_name = names.read_name(ar)?;
        if ver >= 220 {
            export.archetype = ar.read_i32()?;
        }
        skip_quirk_words(ar, ExportSlot::AfterArchetype)?;
        let flags = ar.read_u32()? as u64;
        export.object_flags = if ver >= QWORD_FLAGS_VERSION {
            (flags << 32) | ar.read_u32()? as u64
        } else {
            flags
        };
        export.serial_size = ar.read_i32()? as i64;
        if export.serial_size != 0 || ver >= 249 {
            export.serial_offset = ar.read_i32()? as i64;
        }
        skip_quirk_words(ar, ExportSlot::AfterOffset)?;
        if has_component_map(&version) {
            // component map: name -> export index
            let count = ar.read_array_len()?;
            for _ in 0..count {
                names.read_name(ar)?;
                ar.read_i32()?;
            }
        }
        if ver >= 247 {
            export.export_flags = ar.read_u32()?;
        }
        export.read_ue3_tail(ar, &version)?;

        if game == Game::AA3 {
            export.class_index ^= obfuscator;
            export.super_index ^= obfuscator;
            export.outer_index ^= obfuscator;
            export.archetype ^= obfuscator;
            export.serial_size = (export.serial_size as i32 ^ obfuscator) as i64;
            export.serial_offset = (export.serial_offset as i32 ^ obfuscator) as i64;
        }
        Ok(export)
    }

    /// Generations, guid and the trailing package flags. Several titles
    /// strip part of this and end the record early.
    fn read_ue3_tail(&mut self, ar: &mut dyn Archive, version: &ArchiveVersion) -> Result<()> {
        let (ver, lic, game) = (version.file_version, version.licensee_version, version.game);
        if game == Game::TRANSFORMERS && lic >= 116 && ar.read_u8()? == 0 {
            return Ok(());
        }
        if game == Game::MK && ver >= 446 {
            // generations removed
            self.guid = ar.read_guid()?;
            return Ok(());
        }
        if game == Game::BIOSHOCK3 && ar.read_i32()? == 0 {
            return Ok(());
        }
        if ver >= 322 {
            let generations = ar.read_array_len()?;
            ar.skip(generations as u64 * 4)?;
            self.guid = ar.read_guid()?;
        }
        if game == Game::UNDERTOW && ver >= 431 {
            ar.read_i32()?;
        }
        if game == Game::ARMY_OF_2 {
            return Ok(());
        }
        if ver >= 475 {
            let _package_flags = ar.read_u32()?;
        }
        if game == Game::THIEF4 && self.export_flags & 8 != 0 {
            ar.read_i32()?;
        }
        Ok(())
    }

    /// Fixed layout with the name first and the maps stored raw.
    fn read_wheelman(ar: &mut dyn Archive, names: &NameMap) -> Result<Self> {
        let mut export = Self::empty();
        ar.read_i32()?;
        export.object_name = names.read_name(ar)?;
        export.outer_index = ar.read_i32()?;
        export.class_index = ar.read_i32()?;
        export.super_index = ar.read_i32()?;
        export.archetype = ar.read_i32()?;
        let flags = ar.read_u32()? as u64;
        export.object_flags = (flags << 32) | ar.read_u32()? as u64;
        export.serial_size = ar.read_i32()? as i64;
        export.serial_offset = ar.read_i32()? as i64;
        ar.skip(8)?;
        // inline component map
        ar.skip(0x14)?;
        export.export_flags = ar.read_u32()?;
        // inline generations
        ar.skip(0xC)?;
        export.guid = ar.read_guid()?;
        Ok(export)
    }

    fn read_ue4(ar: &mut dyn Archive, names: &NameMap) -> Result<Self> {
        let ver = ar.version().file_version;
        let mut export = Self::empty();
        export.class_index = ar.read_i32()?;
        export.super_index = ar.read_i32()?;
        if ver >= ue4_ver::TEMPLATE_INDEX_IN_COOKED_EXPORTS {
            export.template_index = ar.read_i32()?;
        }
        export.outer_index = ar.read_i32()?;
        export.object_name = names.read_name(ar)?;
        if ver < ue4_ver::REMOVE_ARCHETYPE_INDEX_FROM_LINKER_TABLES {
            export.archetype = ar.read_i32()?;
        }
        export.object_flags = ar.read_u32()? as u64;
        if ver < ue4_ver::SIXTY_FOUR_BIT_EXPORTMAP_SERIALSIZES {
            export.serial_size = ar.read_i32()? as i64;
            export.serial_offset = ar.read_i32()? as i64;
        } else {
            export.serial_size = ar.read_i64()?;
            export.serial_offset = ar.read_i64()?;
        }
        let forced_export = ar.read_bool()?;
        let _not_for_client = ar.read_bool()?;
        let _not_for_server = ar.read_bool()?;
        if forced_export {
            export.export_flags |= EXPORT_FORCED;
        }
        if ver < ue4_ver::REMOVE_NET_INDEX {
            let generations = ar.read_array_len()?;
            ar.skip(generations as u64 * 4)?;
        }
        export.guid = ar.read_guid()?;
        let _package_flags = ar.read_u32()?;
        if ver >= ue4_ver::LOAD_FOR_EDITOR_GAME {
            let _not_for_editor_game = ar.read_bool()?;
        }
        if ver >= ue4_ver::COOKED_ASSETS_IN_EDITOR_SUPPORT {
            let _is_asset = ar.read_bool()?;
        }
        if ver >= ue4_ver::PRELOAD_DEPENDENCIES_IN_COOKED_EXPORTS {
            // first dependency and the four dependency counts
            ar.skip(20)?;
        }
        Ok(export)
    }

    pub fn is_forced(&self) -> bool {
        self.export_flags & EXPORT_FORCED != 0
    }

    pub fn object(&self) -> Option<ObjectHandle> {
        self.object.borrow().clone()
    }
}

pub fn read_imports(ar: &mut dyn Archive, summary: &PackageSummary, names: &NameMap) -> Result<Vec<ImportRecord>> {
    read_table(ar, summary.import_count, summary.import_offset, "import", |ar| {
        ImportRecord::read(ar, names, summary.contains_editor_data())
    })
}

pub fn read_exports(ar: &mut dyn Archive, summary: &PackageSummary, names: &NameMap) -> Result<Vec<ExportRecord>> {
    read_table(ar, summary.export_count, summary.export_offset, "export", |ar| ExportRecord::read(ar, names))
}

fn read_table<T>(
    ar: &mut dyn Archive,
    count: i32,
    offset: i32,
    what: &str,
    mut read: impl FnMut(&mut dyn Archive) -> Result<T>,
) -> Result<Vec<T>> {
    if count < 0 || count as u64 > ar.len() {
        return Err(Error::corrupt(offset as u64, format!("invalid {} count {}", what, count)));
    }
    if count == 0 {
        return Ok(Vec::new());
    }
    ar.seek(offset as u64)?;
    (0..count as usize)
        .map(|i| read(ar).with_context(|| format!("{} {}", what, i)))
        .collect()
}
