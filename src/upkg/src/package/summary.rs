//! Package file summary
//!
//! The summary opens every package: tag, version word, table counts and
//! offsets, and for the third generation the compressed chunk list.
//!
//! | Generation | Version word | Layout |
//! |------------|--------------|--------|
//! | 1, 2 | `licensee << 16 \| file` | flags, tables, heritage (< 68) or guid + generations |
//! | 3 | `licensee << 16 \| file` | headers size, group, flags, tables, depends, guid, generations, engine/cooker versions, chunks |
//! | 4 | legacy selector `-2..=-7` | explicit versions, custom versions, then the generation 3 fields plus bulk data start |

use serde::Serialize;

use crate::archive::{Archive, Guid, PACKAGE_FILE_TAG, PACKAGE_FILE_TAG_REV};
use crate::chunked::CompressedChunk;
use crate::compression::Method;
use crate::game::{self, ue4_ver, Engine, Game, GameCatalog};
use crate::{Error, Result, ResultExt};

/// Package flag bits consulted while reading.
pub mod package_flags {
    /// Generation 3 cooked package.
    pub const COOKED: u32 = 0x0000_0008;
    /// Generation 4 package stripped of editor data.
    pub const FILTER_EDITOR_ONLY: u32 = 0x8000_0000;
}

/// Version words that mark a file compressed from its first byte.
const FULLY_COMPRESSED_MARKERS: [u32; 3] = [PACKAGE_FILE_TAG, 0x20000, 0x10000];

/// Wire shape of generation 4 custom versions, chosen by the legacy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CustomVersionFormat {
    /// Legacy `-2`: `{int32 tag, int32 version}`.
    Enums,
    /// Legacy `-3..=-5`: `{guid, int32 version, friendly name}`.
    Guids,
    /// Legacy `-6` on: `{guid, int32 version}`.
    Optimized,
}

impl CustomVersionFormat {
    pub fn for_legacy(legacy_version: i32) -> Self {
        match legacy_version {
            -2 => Self::Enums,
            -5..=-3 => Self::Guids,
            _ => Self::Optimized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomVersion {
    pub key: Guid,
    pub version: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
}

impl CustomVersion {
    fn read(ar: &mut dyn Archive, format: CustomVersionFormat) -> Result<Self> {
        match format {
            CustomVersionFormat::Enums => {
                let tag = ar.read_u32()?;
                Ok(Self {
                    key: Guid([0, 0, 0, tag]),
                    version: ar.read_i32()?,
                    friendly_name: None,
                })
            }
            CustomVersionFormat::Guids => Ok(Self {
                key: ar.read_guid()?,
                version: ar.read_i32()?,
                friendly_name: Some(ar.read_fstring()?),
            }),
            CustomVersionFormat::Optimized => Ok(Self {
                key: ar.read_guid()?,
                version: ar.read_i32()?,
                friendly_name: None,
            }),
        }
    }
}

/// Counts recorded each time the package was saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Generation {
    pub export_count: i32,
    pub name_count: i32,
    pub net_object_count: i32,
}

impl Generation {
    fn read(ar: &mut dyn Archive) -> Result<Self> {
        let export_count = ar.read_i32()?;
        let name_count = ar.read_i32()?;
        let version = *ar.version();
        let net_object_count = if !version.is_ue4() && version.file_version >= 322 {
            ar.read_i32()?
        } else {
            0
        };
        Ok(Self {
            export_count,
            name_count,
            net_object_count,
        })
    }
}

/// Generation 4 `FEngineVersion`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EngineVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub changelist: u32,
    pub branch: String,
}

impl EngineVersion {
    fn read(ar: &mut dyn Archive) -> Result<Self> {
        Ok(Self {
            major: ar.read_u16()?,
            minor: ar.read_u16()?,
            patch: ar.read_u16()?,
            changelist: ar.read_u32()?,
            branch: ar.read_fstring()?,
        })
    }
}

/// Extra int32 words some titles insert in front of the headers size.
struct LeadingWords {
    game: Game,
    licensee_min: i32,
    words: u64,
}

const LEADING_WORDS: &[LeadingWords] = &[
    LeadingWords { game: Game::R6_VEGAS2, licensee_min: 48, words: 1 },
    LeadingWords { game: Game::R6_VEGAS2, licensee_min: 49, words: 1 },
    LeadingWords { game: Game::HUXLEY, licensee_min: 8, words: 1 },
    LeadingWords { game: Game::HUXLEY, licensee_min: 17, words: 1 },
    LeadingWords { game: Game::TRANSFORMERS, licensee_min: 181, words: 4 },
    LeadingWords { game: Game::TRANSFORMERS, licensee_min: 55, words: 1 },
    LeadingWords { game: Game::MORTAL_ONLINE, licensee_min: 1, words: 1 },
    LeadingWords { game: Game::BIOSHOCK3, licensee_min: 66, words: 1 },
];

fn leading_words(game: Game, licensee_version: i32) -> u64 {
    LEADING_WORDS
        .iter()
        .filter(|w| w.game == game && licensee_version >= w.licensee_min)
        .map(|w| w.words)
        .sum()
}

/// Header of a package file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PackageSummary {
    pub tag: u32,
    /// Versions as stored; the effective ones live in the archive version.
    pub file_version: i32,
    pub licensee_version: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_version: Option<i32>,
    pub unversioned: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_versions: Vec<CustomVersion>,
    pub headers_size: i32,
    pub package_group: String,
    pub package_flags: u32,
    pub name_count: i32,
    pub name_offset: i32,
    pub export_count: i32,
    pub export_offset: i32,
    pub import_count: i32,
    pub import_offset: i32,
    pub depends_offset: i32,
    pub guid: Guid,
    pub generations: Vec<Generation>,
    pub engine_version: i32,
    pub cooker_version: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_by: Option<EngineVersion>,
    pub compression_flags: u32,
    pub compressed_chunks: Vec<CompressedChunk>,
    pub bulk_data_start_offset: i64,
}

/// Peek at the first two words: a package tag followed by another tag (or
/// a block size) means the whole file is one compressed chunk.
///
/// Returns the method to decode it with. The cursor is left at 0 and the
/// archive byte order untouched.
pub fn probe_fully_compressed(ar: &mut dyn Archive) -> Result<Option<Method>> {
    if ar.len() < 8 {
        return Ok(None);
    }
    ar.seek(0)?;
    let mut head = [0u8; 8];
    ar.read_bytes(&mut head)?;
    ar.seek(0)?;
    let words = |big: bool| {
        let conv = if big { u32::from_be_bytes } else { u32::from_le_bytes };
        let tag = conv([head[0], head[1], head[2], head[3]]);
        let second = conv([head[4], head[5], head[6], head[7]]);
        (tag, second)
    };
    // read as stored, then swapped relative to the archive order
    let native = ar.version().reverse_bytes;
    for big in [native, !native] {
        let (tag, second) = words(big);
        if tag == PACKAGE_FILE_TAG && FULLY_COMPRESSED_MARKERS.contains(&second) {
            // big-endian consoles compress whole files with LZX
            let method = if big { Method::Lzx } else { Method::Auto };
            return Ok(Some(method));
        }
    }
    Ok(None)
}

/// Tags some titles stamp instead of the standard one.
pub mod alt_tag {
    pub const KILLING_FLOOR: u32 = 0x9E2A_83C2;
    pub const ISTORM: u32 = 0x7E4A_8BCA;
    pub const NURIEN: u32 = 0xA94E_6C81;
    pub const BATTLE_TERR: u32 = 0xA1B2_C93F;
    pub const LOCO: u32 = 0xD58C_3147;
    pub const BERKANIX: u32 = 0xF2BA_C156;
    pub const HAWKEN: u32 = 0xEA31_928C;
    /// Followed by an extra version word.
    pub const TAO_YUAN: u32 = 0x1234_5678;
    /// Followed by a byte count and that many bytes.
    pub const STORM_WAR: u32 = 0xEC20_1133;
    pub const GUN_LEGEND: u32 = 0x879A_4B41;
    pub const MMH7: u32 = 0x4D4D_4837;
}

/// Read the package tag, flipping the byte order for a swapped one.
///
/// Alternative tags are accepted and may attribute the game outright.
fn read_tag(ar: &mut dyn Archive) -> Result<u32> {
    let tag = ar.read_u32()?;
    let game = match tag {
        PACKAGE_FILE_TAG => return Ok(tag),
        PACKAGE_FILE_TAG_REV => {
            let version = ar.version_mut();
            version.reverse_bytes = !version.reverse_bytes;
            return Ok(PACKAGE_FILE_TAG);
        }
        alt_tag::KILLING_FLOOR | alt_tag::ISTORM | alt_tag::NURIEN | alt_tag::HAWKEN | alt_tag::MMH7 => None,
        alt_tag::BATTLE_TERR => Some(Game::BATTLE_TERR),
        alt_tag::LOCO => Some(Game::LOCO),
        alt_tag::BERKANIX => Some(Game::BERKANIX),
        alt_tag::GUN_LEGEND => Some(Game::GUN_LEGEND),
        alt_tag::TAO_YUAN => {
            let _extra_version = ar.read_i32()?;
            Some(Game::TAO_YUAN)
        }
        alt_tag::STORM_WAR => {
            let count = ar.read_u8()?;
            ar.skip(count as u64)?;
            None
        }
        _ => return Err(Error::BadTag { tag }),
    };
    tracing::debug!("alternative package tag {:#010X}", tag);
    if let Some(game) = game {
        ar.version_mut().game = game;
    }
    Ok(tag)
}

impl PackageSummary {
    /// Read the summary at the cursor, detecting the game on the way.
    ///
    /// The archive version is updated in place: byte order, file and
    /// licensee versions, and the detected game.
    pub fn read(ar: &mut dyn Archive, catalog: &GameCatalog) -> Result<Self> {
        let tag = read_tag(ar)?;
        let mut summary = Self {
            tag,
            ..Default::default()
        };
        let version_word = ar.read_u32()?;
        if version_word & 0xFFFF_F000 == 0xFFFF_F000 {
            summary.legacy_version = Some(version_word as i32);
            summary.read_ue4(ar, catalog).context("UE4 summary")?;
            return Ok(summary);
        }

        summary.file_version = (version_word & 0xFFFF) as i32;
        summary.licensee_version = (version_word >> 16) as i32;
        {
            let version = ar.version_mut();
            version.file_version = summary.file_version;
            version.licensee_version = summary.licensee_version;
            catalog.detect_game(version, game::forced_game());
            catalog.override_version(version, game::forced_version());
        }

        if ar.version().is_ue3_or_later() {
            summary.read_ue3(ar).context("UE3 summary")?;
        } else {
            summary.read_ue2(ar).context("UE2 summary")?;
        }
        Ok(summary)
    }

    fn read_tables(&mut self, ar: &mut dyn Archive) -> Result<()> {
        self.name_count = ar.read_i32()?;
        self.name_offset = ar.read_i32()?;
        self.export_count = ar.read_i32()?;
        self.export_offset = ar.read_i32()?;
        self.import_count = ar.read_i32()?;
        self.import_offset = ar.read_i32()?;
        Ok(())
    }

    fn read_generations(&mut self, ar: &mut dyn Archive) -> Result<()> {
        let count = ar.read_i32()?;
        if count < 0 || count as u64 > ar.len().saturating_sub(ar.tell()) {
            return Err(Error::corrupt(ar.tell(), format!("invalid generation count {}", count)));
        }
        self.generations = (0..count)
            .map(|_| Generation::read(ar))
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn read_ue2(&mut self, ar: &mut dyn Archive) -> Result<()> {
        self.package_flags = ar.read_u32()?;
        self.read_tables(ar)?;
        if ar.version().file_version < 68 {
            let _heritage_count = ar.read_i32()?;
            let _heritage_offset = ar.read_i32()?;
            self.generations = vec![Generation {
                export_count: self.export_count,
                name_count: self.name_count,
                net_object_count: 0,
            }];
        } else {
            self.guid = ar.read_guid()?;
            self.read_generations(ar)?;
        }
        Ok(())
    }

    fn read_ue3(&mut self, ar: &mut dyn Archive) -> Result<()> {
        let version = *ar.version();
        let ver = version.file_version;

        let skip = leading_words(version.game, version.licensee_version);
        if skip > 0 {
            tracing::debug!("skipping {} leading summary words for {:?}", skip, version.game);
            ar.skip(skip * 4)?;
        }
        if ver >= 249 {
            self.headers_size = ar.read_i32()?;
        }
        if version.engine() == Engine::Midway3 && version.licensee_version >= 2 {
            let _midway_tag = ar.read_i32()?;
            let _midway_version = ar.read_i32()?;
        }
        if ver >= 269 {
            self.package_group = ar.read_fstring()?;
        }
        self.package_flags = ar.read_u32()?;
        self.read_tables(ar)?;
        if ver >= 415 {
            self.depends_offset = ar.read_i32()?;
        }
        if ver >= 623 {
            // import/export guid tables and thumbnail table
            ar.skip(12)?;
        }
        if ver >= 584 {
            let _unknown = ar.read_i32()?;
        }
        self.guid = ar.read_guid()?;
        self.read_generations(ar)?;
        if ver >= 245 {
            self.engine_version = ar.read_i32()?;
        }
        if ver >= 277 {
            self.cooker_version = ar.read_i32()?;
        }
        if ver >= 334 {
            self.read_compression(ar)?;
        }
        if ver >= 482 {
            let _package_source = ar.read_u32()?;
        }
        Ok(())
    }

    fn read_compression(&mut self, ar: &mut dyn Archive) -> Result<()> {
        self.compression_flags = ar.read_u32()?;
        let count = ar.read_i32()?;
        if count < 0 || count as u64 > ar.len().saturating_sub(ar.tell()) / 16 {
            return Err(Error::corrupt(ar.tell(), format!("invalid compressed chunk count {}", count)));
        }
        self.compressed_chunks = (0..count)
            .map(|_| CompressedChunk::read(ar))
            .collect::<Result<_>>()?;
        Ok(())
    }

    /// Generation 4 packages carry editor data unless unversioned or
    /// filtered at cook time.
    pub fn contains_editor_data(&self) -> bool {
        self.legacy_version.is_some()
            && !self.unversioned
            && self.package_flags & package_flags::FILTER_EDITOR_ONLY == 0
    }

    fn read_ue4(&mut self, ar: &mut dyn Archive, catalog: &GameCatalog) -> Result<()> {
        let legacy = self.legacy_version.unwrap_or(-1);
        // validates the selector before anything else is read
        let oldest_minor = game::ue4_minor_for_legacy(legacy)?;

        if legacy != -4 {
            let _ue3_version = ar.read_i32()?;
        }
        let file_version = ar.read_i32()?;
        let licensee_version = ar.read_i32()?;
        if file_version & !0xFFFF != 0 || licensee_version & !0xFFFF != 0 {
            return Err(Error::corrupt(
                ar.tell(),
                format!("UE4 versions out of range: {}/{}", file_version, licensee_version),
            ));
        }
        self.file_version = file_version;
        self.licensee_version = licensee_version;
        self.unversioned = file_version == 0 && licensee_version == 0;

        {
            let forced = game::forced_game();
            let version = ar.version_mut();
            version.file_version = file_version;
            version.licensee_version = licensee_version;
            if self.unversioned && forced.is_none() {
                let minor = oldest_minor.min(game::LATEST_SUPPORTED_UE4_VERSION);
                tracing::info!("unversioned package, assuming engine 4.{}", minor);
                version.game = Game::ue4(minor);
                version.file_version = game::UE4_ENGINE_VERSIONS[minor as usize];
            } else {
                version.game = Game::UE4_BASE;
                catalog.detect_game(version, forced);
            }
            catalog.override_version(version, game::forced_version());
        }
        let ver = ar.version().file_version;

        if legacy <= -2 {
            let format = CustomVersionFormat::for_legacy(legacy);
            let count = ar.read_array_len()?;
            self.custom_versions = (0..count)
                .map(|_| CustomVersion::read(ar, format))
                .collect::<Result<_>>()
                .context("custom versions")?;
        }

        self.headers_size = ar.read_i32()?;
        self.package_group = ar.read_fstring()?;
        self.package_flags = ar.read_u32()?;
        self.name_count = ar.read_i32()?;
        self.name_offset = ar.read_i32()?;
        if ver >= ue4_ver::ADDED_PACKAGE_SUMMARY_LOCALIZATION_ID && self.contains_editor_data() {
            let _localization_id = ar.read_fstring()?;
        }
        if ver >= ue4_ver::SERIALIZE_TEXT_IN_PACKAGES {
            let _gatherable_text_count = ar.read_i32()?;
            let _gatherable_text_offset = ar.read_i32()?;
        }
        self.export_count = ar.read_i32()?;
        self.export_offset = ar.read_i32()?;
        self.import_count = ar.read_i32()?;
        self.import_offset = ar.read_i32()?;
        self.depends_offset = ar.read_i32()?;
        if ver >= ue4_ver::ADD_STRING_ASSET_REFERENCES_MAP {
            let _soft_references_count = ar.read_i32()?;
            let _soft_references_offset = ar.read_i32()?;
        }
        if ver >= ue4_ver::ADDED_SEARCHABLE_NAMES {
            let _searchable_names_offset = ar.read_i32()?;
        }
        let _thumbnail_table_offset = ar.read_i32()?;
        self.guid = ar.read_guid()?;
        if self.contains_editor_data() && ver >= ue4_ver::ADDED_PACKAGE_OWNER {
            let _persistent_guid = ar.read_guid()?;
            if ver < ue4_ver::NON_OUTER_PACKAGE_IMPORT {
                let _owner_persistent_guid = ar.read_guid()?;
            }
        }
        self.read_generations(ar)?;

        if ver >= ue4_ver::ENGINE_VERSION_OBJECT {
            let saved_by = EngineVersion::read(ar)?;
            self.engine_version = saved_by.changelist as i32;
            self.saved_by = Some(saved_by);
        } else {
            self.engine_version = ar.read_i32()?;
        }
        if ver >= ue4_ver::PACKAGE_SUMMARY_HAS_COMPATIBLE_ENGINE_VERSION {
            let _compatible = EngineVersion::read(ar)?;
        }
        self.read_compression(ar)?;
        let _package_source = ar.read_u32()?;
        let additional = ar.read_array_len()?;
        for _ in 0..additional {
            let _package_to_cook = ar.read_fstring()?;
        }
        if legacy > -7 {
            let texture_allocations = ar.read_i32()?;
            if texture_allocations != 0 {
                return Err(Error::unsupported("texture allocation count", texture_allocations));
            }
        }
        if ver >= ue4_ver::ASSET_REGISTRY_TAGS {
            let _asset_registry_offset = ar.read_i32()?;
        }
        if ver >= ue4_ver::SUMMARY_HAS_BULKDATA_OFFSET {
            self.bulk_data_start_offset = ar.read_i64()?;
        }
        Ok(())
    }

    /// Compression method of the chunk list.
    pub fn compression_method(&self) -> Method {
        Method::from_flags(self.compression_flags)
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_flags != 0 && !self.compressed_chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveVersion, ArchiveWriter, MemReader};

    fn read(bytes: Vec<u8>) -> (Result<PackageSummary>, ArchiveVersion) {
        let mut r = MemReader::new(bytes);
        let summary = PackageSummary::read(&mut r, &GameCatalog::new());
        (summary, *r.version())
    }

    #[test]
    fn test_ue2_heritage_summary() {
        let mut w = ArchiveWriter::new();
        w.write_u32(PACKAGE_FILE_TAG).write_u32(61);
        w.write_u32(0x1).write_i32(3).write_i32(64).write_i32(2).write_i32(128);
        w.write_i32(1).write_i32(96).write_i32(1).write_i32(200);
        let (summary, version) = read(w.into_inner());
        let summary = summary.unwrap();
        assert_eq!(version.engine(), Engine::UE1);
        assert_eq!(summary.generations.len(), 1);
        assert_eq!(summary.generations[0].export_count, 2);
        assert_eq!((summary.import_count, summary.import_offset), (1, 96));
    }

    fn ue2_tail(w: &mut ArchiveWriter) {
        w.write_u32(0).write_i32(1).write_i32(64).write_i32(0).write_i32(0).write_i32(0).write_i32(0);
        w.write_guid(Guid::default()).write_i32(0);
    }

    #[test]
    fn test_alternative_tags() {
        // Loco attributes the game regardless of the version
        let mut w = ArchiveWriter::new();
        w.write_u32(alt_tag::LOCO).write_u32(120);
        ue2_tail(&mut w);
        let (summary, version) = read(w.into_inner());
        assert_eq!(summary.unwrap().tag, alt_tag::LOCO);
        assert_eq!(version.game, Game::LOCO);

        // Killing Floor keeps ordinary detection
        let mut w = ArchiveWriter::new();
        w.write_u32(alt_tag::KILLING_FLOOR).write_u32(128 | (29 << 16));
        ue2_tail(&mut w);
        let (summary, version) = read(w.into_inner());
        assert_eq!(summary.unwrap().name_count, 1);
        assert_eq!(version.game, Game::UT2);

        // Storm War pads the tag with a counted blob
        let mut w = ArchiveWriter::new();
        w.write_u32(alt_tag::STORM_WAR).write_u8(3).write_bytes(b"abc").write_u32(120);
        ue2_tail(&mut w);
        let (summary, version) = read(w.into_inner());
        assert_eq!(summary.unwrap().name_offset, 64);
        assert_eq!(version.file_version, 120);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut w = ArchiveWriter::new();
        w.write_u32(0x1234_5679).write_u32(120);
        let (summary, _) = read(w.into_inner());
        assert!(summary.unwrap_err().to_string().contains("Wrong package tag: 0x12345679"));
    }

    #[test]
    fn test_ue3_summary_with_chunks() {
        let mut w = ArchiveWriter::new();
        w.write_u32(PACKAGE_FILE_TAG).write_u32(512);
        w.write_i32(0x100).write_fstring("None").write_u32(package_flags::COOKED);
        w.write_i32(5).write_i32(0x200).write_i32(2).write_i32(0x300).write_i32(1).write_i32(0x280);
        w.write_i32(0x340);
        w.write_guid(Guid([1, 2, 3, 4]));
        w.write_i32(1).write_i32(2).write_i32(5).write_i32(2);
        w.write_i32(3000).write_i32(100);
        w.write_u32(1).write_i32(1);
        w.write_i32(0x100).write_i32(0x1000).write_i32(0x100).write_i32(0x400);
        w.write_u32(0);
        let (summary, version) = read(w.into_inner());
        let summary = summary.unwrap();
        assert_eq!(version.game, Game::UE3);
        assert_eq!(summary.package_group, "None");
        assert_eq!(summary.generations[0].net_object_count, 2);
        assert_eq!(summary.engine_version, 3000);
        assert!(summary.is_compressed());
        assert_eq!(summary.compression_method(), Method::Zlib);
        assert_eq!(summary.compressed_chunks[0].uncompressed_size, 0x1000);
        assert_eq!(summary.headers_size, 0x100);
    }

    #[test]
    fn test_reversed_tag_flips_byte_order() {
        let mut w = ArchiveWriter::with_version(ArchiveVersion {
            reverse_bytes: true,
            ..Default::default()
        });
        w.write_u32(PACKAGE_FILE_TAG).write_u32(61);
        w.write_u32(0).write_i32(0).write_i32(0).write_i32(0).write_i32(0);
        w.write_i32(0).write_i32(0).write_i32(0).write_i32(0);
        let (summary, version) = read(w.into_inner());
        summary.unwrap();
        assert!(version.reverse_bytes);
        assert_eq!(version.file_version, 61);
    }

    #[test]
    fn test_bad_tag() {
        let (summary, _) = read(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let err = summary.unwrap_err();
        assert!(err.to_string().contains("Wrong package tag"));
    }

    #[test]
    fn test_ue4_unversioned_summary() {
        let mut w = ArchiveWriter::with_version(ArchiveVersion::new(0, 0, Game::ue4(0)));
        w.write_u32(PACKAGE_FILE_TAG).write_i32(-7);
        w.write_i32(864).write_i32(0).write_i32(0);
        // optimized custom versions
        w.write_i32(1).write_guid(Guid([9, 9, 9, 9])).write_i32(3);
        w.write_i32(0x200).write_fstring("None").write_u32(package_flags::FILTER_EDITOR_ONLY);
        w.write_i32(4).write_i32(0x300);
        // unversioned resolves to 4.14 (file version 508): text, tables, depends, soft refs
        w.write_i32(0).write_i32(0);
        w.write_i32(1).write_i32(0x400).write_i32(1).write_i32(0x380).write_i32(0);
        w.write_i32(0).write_i32(0);
        w.write_i32(0);
        w.write_guid(Guid::default());
        w.write_i32(1).write_i32(1).write_i32(4);
        // saved-by and compatible engine versions
        for _ in 0..2 {
            w.write_u16(4).write_u16(14).write_u16(0).write_u32(0).write_fstring("");
        }
        w.write_u32(0).write_i32(0);
        w.write_u32(0).write_i32(0);
        w.write_i32(0x500);
        w.write_i64(0x600);
        let (summary, version) = read(w.into_inner());
        let summary = summary.unwrap();
        assert!(summary.unversioned);
        assert_eq!(version.game, Game::ue4(14));
        assert_eq!(version.file_version, 508);
        assert_eq!(summary.custom_versions.len(), 1);
        assert_eq!(summary.custom_versions[0].version, 3);
        assert_eq!(summary.bulk_data_start_offset, 0x600);
        assert_eq!((summary.export_count, summary.export_offset), (1, 0x400));
    }

    #[test]
    fn test_ue4_legacy_out_of_range() {
        let mut w = ArchiveWriter::new();
        w.write_u32(PACKAGE_FILE_TAG).write_i32(-9).write_i32(0);
        let (summary, _) = read(w.into_inner());
        let err = summary.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnsupportedDialect);
        assert!(err.breadcrumb().starts_with("UE4 summary > "));
    }

    #[test]
    fn test_probe_fully_compressed() {
        let mut w = ArchiveWriter::new();
        w.write_u32(PACKAGE_FILE_TAG).write_u32(0x20000).write_u32(0);
        let mut r = MemReader::new(w.into_inner());
        assert_eq!(probe_fully_compressed(&mut r).unwrap(), Some(Method::Auto));
        assert_eq!(r.tell(), 0);

        let mut bytes = PACKAGE_FILE_TAG.to_be_bytes().to_vec();
        bytes.extend_from_slice(&PACKAGE_FILE_TAG.to_be_bytes());
        let mut r = MemReader::new(bytes);
        assert_eq!(probe_fully_compressed(&mut r).unwrap(), Some(Method::Lzx));

        let mut w = ArchiveWriter::new();
        w.write_u32(PACKAGE_FILE_TAG).write_u32(512);
        let mut r = MemReader::new(w.into_inner());
        assert_eq!(probe_fully_compressed(&mut r).unwrap(), None);
    }

    #[test]
    fn test_leading_words_table() {
        assert_eq!(leading_words(Game::TRANSFORMERS, 200), 5);
        assert_eq!(leading_words(Game::TRANSFORMERS, 60), 1);
        assert_eq!(leading_words(Game::R6_VEGAS2, 48), 1);
        assert_eq!(leading_words(Game::UE3, 1000), 0);
    }
}
