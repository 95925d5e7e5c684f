//! Per-title package obfuscation
//!
//! A few titles scramble their package files with a trivial byte cipher.
//! The first dword of the file identifies the cipher; [`CipherReader`]
//! undoes it underneath everything else, so the summary and tables read as
//! a standard package.
//!
//! | Title | First dword | Cipher |
//! |-------|-------------|--------|
//! | Lineage 2, Exteel | `"Li"` (UTF-16) | 28-byte banner, then one-byte XOR |
//! | Battle Territory Online | `0x342B9CFC` | rotate left by bit count |
//! | Nurien | `0xB01F713F` | 16-byte XOR key over the headers |
//! | Blade & Soul | `0xF84CEAB0` | 32-byte XOR key |
//! | America's Army 2 | after the summary | position keyed XOR and rotate |

use crate::archive::{Archive, ArchiveVersion, PACKAGE_FILE_TAG};
use crate::game::Game;
use crate::package::summary::PackageSummary;
use crate::package::tables::ExportRecord;
use crate::{Error, Result};

/// UTF-16 `"Li"` of the `Lineage2Ver111` banner.
const LINEAGE_MAGIC: u32 = 0x0069_004C;
const LINEAGE_HEADER_SIZE: u64 = 28;
const BATTLE_TERR_MAGIC: u32 = 0x342B_9CFC;
const NURIEN_MAGIC: u32 = 0xB01F_713F;
const BLADE_N_SOUL_MAGIC: u32 = 0xF84C_EAB0;

const NURIEN_KEY: [u8; 16] = [
    0xFE, 0xF2, 0x35, 0x2E, 0x12, 0xFF, 0x47, 0x8A, 0xE1, 0x2D, 0x53, 0xE2, 0x21, 0xA3, 0x74, 0xA8,
];
const BLADE_N_SOUL_KEY: &[u8; 32] = b"qiffjdlerdoqymvketdcl0er2subioxq";

/// Package flag marking Blade & Soul exports with scrambled sizes and offsets.
const BLADE_N_SOUL_SCRAMBLED_EXPORTS: u32 = 0x0800_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    /// Every byte XORed with one key; the first 28 bytes are a banner.
    Lineage { key: u8 },
    /// Every byte rotated left by its number of set bits.
    BattleTerr,
    /// Repeating 16-byte key, only below the header end.
    Nurien { header_end: u64 },
    /// Repeating 32-byte key.
    BladeAndSoul,
    /// Key derived from the absolute position.
    AmericasArmy2,
}

impl Cipher {
    /// Identify the cipher from the first bytes of a file.
    ///
    /// Leaves the cursor at 0.
    pub fn detect(ar: &mut dyn Archive) -> Result<Option<Self>> {
        if ar.len() < 16 {
            return Ok(None);
        }
        ar.seek(0)?;
        let mut head = [0u8; 4];
        ar.read_raw(&mut head)?;
        let cipher = match u32::from_le_bytes(head) {
            LINEAGE_MAGIC if ar.len() > LINEAGE_HEADER_SIZE => {
                ar.seek(LINEAGE_HEADER_SIZE)?;
                let mut first = [0u8; 1];
                ar.read_raw(&mut first)?;
                // the summary starts with the tag, so its low byte gives the key
                Some(Self::Lineage {
                    key: first[0] ^ (PACKAGE_FILE_TAG & 0xFF) as u8,
                })
            }
            BATTLE_TERR_MAGIC => Some(Self::BattleTerr),
            NURIEN_MAGIC => Some(Self::Nurien { header_end: u64::MAX }),
            BLADE_N_SOUL_MAGIC => Some(Self::BladeAndSoul),
            _ => None,
        };
        ar.seek(0)?;
        Ok(cipher)
    }

    /// Game the cipher implies, if only one title uses it.
    pub fn game(self) -> Option<Game> {
        match self {
            Self::Lineage { .. } => Some(Game::LINEAGE2),
            Self::BattleTerr => Some(Game::BATTLE_TERR),
            Self::BladeAndSoul => Some(Game::BLADE_N_SOUL),
            Self::AmericasArmy2 => Some(Game::AA2),
            Self::Nurien { .. } => None,
        }
    }

    /// Bytes hidden in front of the package.
    fn base(self) -> u64 {
        match self {
            Self::Lineage { .. } => LINEAGE_HEADER_SIZE,
            _ => 0,
        }
    }

    /// Decode `buf`, read from absolute file position `pos`.
    pub fn decode(self, buf: &mut [u8], pos: u64) {
        match self {
            Self::Lineage { key } => buf.iter_mut().for_each(|b| *b ^= key),
            Self::BattleTerr => {
                for b in buf.iter_mut() {
                    *b = b.rotate_left(b.count_ones().max(1));
                }
            }
            Self::Nurien { header_end } => {
                for (i, b) in buf.iter_mut().enumerate() {
                    let at = pos + i as u64;
                    if at >= header_end {
                        break;
                    }
                    *b ^= NURIEN_KEY[(at & 0xF) as usize];
                }
            }
            Self::BladeAndSoul => {
                for (i, b) in buf.iter_mut().enumerate() {
                    *b ^= BLADE_N_SOUL_KEY[((pos + i as u64) % 32) as usize];
                }
            }
            Self::AmericasArmy2 => {
                for (i, b) in buf.iter_mut().enumerate() {
                    let at = (pos + i as u64) as u32;
                    let key = (at >> 8) ^ at;
                    *b ^= (key & 0xFF) as u8;
                    if key & 2 != 0 {
                        *b = b.rotate_left(1);
                    }
                }
            }
        }
    }
}

/// Archive that deciphers another one on the fly.
pub struct CipherReader<A: Archive> {
    inner: A,
    cipher: Cipher,
    version: ArchiveVersion,
    stopper: Option<u64>,
}

impl<A: Archive> CipherReader<A> {
    /// Wrap `inner`; the cursor moves to the start of the package.
    pub fn new(mut inner: A, cipher: Cipher) -> Result<Self> {
        let pos = inner.tell().max(cipher.base());
        inner.seek(pos)?;
        let mut version = *inner.version();
        if let Some(game) = cipher.game() {
            version.game = game;
        }
        Ok(Self {
            inner,
            cipher,
            version,
            stopper: None,
        })
    }

    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Archive> Archive for CipherReader<A> {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        let pos = self.inner.tell();
        self.inner.read_raw(buf)?;
        self.cipher.decode(buf, pos);
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(pos + self.cipher.base())
    }

    fn tell(&self) -> u64 {
        self.inner.tell().saturating_sub(self.cipher.base())
    }

    fn len(&self) -> u64 {
        self.inner.len().saturating_sub(self.cipher.base())
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
        self.inner.close();
    }

    fn set_header_end(&mut self, end: u64) {
        if let Cipher::Nurien { header_end } = &mut self.cipher {
            *header_end = end;
        }
    }
}

impl<A: Archive> std::fmt::Debug for CipherReader<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherReader")
            .field("cipher", &self.cipher)
            .field("pos", &self.tell())
            .finish()
    }
}

/// America's Army 2 flags the encryption in a word following the summary.
///
/// Returns the cipher to install from the cursor on.
pub fn read_post_summary_cipher(ar: &mut dyn Archive) -> Result<Option<Cipher>> {
    let version = *ar.version();
    if version.game != Game::AA2 || version.licensee_version < 19 {
        return Ok(None);
    }
    let encrypted = ar.read_i32()?;
    Ok((encrypted != 0).then_some(Cipher::AmericasArmy2))
}

fn unscramble_pointer(value: i64, code1: u32, code2: u32, index: u32) -> Result<i64> {
    let value = i32::try_from(value).map_err(|_| Error::corrupt(0, format!("export {} pointer out of range", index)))?;
    let rotated = (value as u32).rotate_right(index.wrapping_add(code2) & 0x1F);
    Ok((code1.rotate_right(index % 32) ^ rotated) as i32 as i64)
}

/// Recover Blade & Soul export sizes and offsets, keyed by the summary.
pub fn unscramble_exports(exports: &mut [ExportRecord], summary: &PackageSummary, game: Game) -> Result<()> {
    if game != Game::BLADE_N_SOUL || summary.package_flags & BLADE_N_SOUL_SCRAMBLED_EXPORTS == 0 {
        return Ok(());
    }
    let low = |v: i32| (v as u32) & 0xFF;
    let code1 = low(summary.headers_size) << 24
        | low(summary.name_count) << 16
        | low(summary.name_offset) << 8
        | low(summary.export_count);
    let code2 = (summary.export_offset as u32)
        .wrapping_add(summary.import_count as u32)
        .wrapping_add(summary.import_offset as u32)
        & 0x1F;
    for (i, export) in exports.iter_mut().enumerate() {
        export.serial_size = unscramble_pointer(export.serial_size, code1, code2, i as u32)?;
        export.serial_offset = unscramble_pointer(export.serial_offset, code1, code2, i as u32)?;
    }
    tracing::debug!("unscrambled {} export pointers", exports.len());
    Ok(())
}
