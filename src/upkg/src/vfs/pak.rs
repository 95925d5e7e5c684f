//! UE4 `.pak` containers
//!
//! # Layout
//!
//! The footer sits at a fixed distance from the end of the file, and that
//! distance grew over the format's life, so each known size is tried:
//!
//! | Size | Versions                      | Extra fields                      |
//! |------|-------------------------------|-----------------------------------|
//! | 61   | 1-7                           |                                   |
//! | 189  | 8 (4.22)                      | 4 compression names               |
//! | 221  | 8 (4.23-4.24), 10+            | 5 compression names               |
//! | 222  | 9 (4.25)                      | frozen index flag, 5 names        |
//!
//! Footer: key guid (16), encrypted index (u8), magic, version, index
//! offset (i64), index size (i64), index hash (20), then the extras.
//!
//! Before version 10 the index is a flat list of `{name, entry}` records.
//! From version 10 it carries bit-packed entries and a separate directory
//! index naming them.
//!
//! Every stored file is preceded by a copy of its entry record, which is
//! skipped when reading (`struct_size`).

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use super::{compact_path, ContainerEntry, EntryIndex, SharedReader, Vfs, WindowReader};
use crate::archive::{Archive, ArchiveVersion, Guid, MemReader};
use crate::compression::{self, Method};
use crate::crypto::{self, AesKey, AES_BLOCK_SIZE};
use crate::game::Engine;
use crate::{Error, Result, ResultExt};

pub const PAK_MAGIC: u32 = 0x5A6F12E1;

/// Footer sizes, tried in this order.
pub const FOOTER_SIZES: [u64; 4] = [61, 189, 221, 222];

/// Decrypted window for encrypted, uncompressed entries.
pub const ENCRYPTED_WINDOW: usize = 256;

/// Pak format versions
pub mod pak_version {
    pub const INITIAL: i32 = 1;
    pub const NO_TIMESTAMPS: i32 = 2;
    pub const COMPRESSION_ENCRYPTION: i32 = 3;
    pub const INDEX_ENCRYPTION: i32 = 4;
    pub const RELATIVE_CHUNK_OFFSETS: i32 = 5;
    pub const DELETE_RECORDS: i32 = 6;
    pub const ENCRYPTION_KEY_GUID: i32 = 7;
    pub const FNAME_BASED_COMPRESSION_METHOD: i32 = 8;
    pub const FROZEN_INDEX: i32 = 9;
    pub const PATH_HASH_INDEX: i32 = 10;
    pub const FNV64_BUG_FIX: i32 = 11;
    pub const LATEST: i32 = FNV64_BUG_FIX;
}

use pak_version::*;

/// Trailer describing where the index lives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PakFooter {
    pub encryption_key_guid: Guid,
    pub encrypted_index: bool,
    pub version: i32,
    /// 1 for the 4.23 flavour of version 8.
    pub sub_version: i32,
    pub index_offset: u64,
    pub index_size: u64,
    pub index_hash: [u8; 20],
    pub frozen_index: bool,
    pub compression_methods: Vec<Method>,
}

impl PakFooter {
    /// Try each known footer size; `None` if no magic is found.
    pub fn locate(ar: &mut dyn Archive) -> Result<Option<Self>> {
        for size in FOOTER_SIZES {
            if ar.len() <= size {
                return Ok(None);
            }
            ar.seek(ar.len() - size)?;
            if let Some(mut footer) = Self::read(ar)? {
                if size == 221 && footer.version == FNAME_BASED_COMPRESSION_METHOD {
                    footer.sub_version = 1;
                }
                return Ok(Some(footer));
            }
        }
        Ok(None)
    }

    fn read(ar: &mut dyn Archive) -> Result<Option<Self>> {
        let guid = ar.read_guid()?;
        let encrypted_index = ar.read_u8()? != 0;
        if ar.read_u32()? != PAK_MAGIC {
            return Ok(None);
        }
        let version = ar.read_i32()?;
        let index_offset = ar.read_i64()?;
        let index_size = ar.read_i64()?;
        if index_offset < 0 || index_size < 0 {
            return Err(Error::corrupt(ar.tell(), "negative pak index bounds"));
        }
        let mut index_hash = [0u8; 20];
        ar.read_bytes(&mut index_hash)?;

        let frozen_index = version == FROZEN_INDEX && ar.read_u8()? != 0;

        let mut compression_methods = Vec::new();
        if version >= FNAME_BASED_COMPRESSION_METHOD {
            // a fifth name slot exists from 4.23 but is never used
            for _ in 0..4 {
                let mut raw = [0u8; 32];
                ar.read_bytes(&mut raw)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let name = String::from_utf8_lossy(&raw[..end]).to_string();
                if name.is_empty() {
                    break;
                }
                let method = Method::from_name(&name).unwrap_or_else(|| {
                    tracing::warn!("unknown pak compression method {:?}, detecting per block", name);
                    Method::Auto
                });
                compression_methods.push(method);
            }
        }

        Ok(Some(Self {
            encryption_key_guid: if version >= ENCRYPTION_KEY_GUID { guid } else { Guid::default() },
            encrypted_index: version >= INDEX_ENCRYPTION && encrypted_index,
            version,
            sub_version: 0,
            index_offset: index_offset as u64,
            index_size: index_size as u64,
            index_hash,
            frozen_index,
            compression_methods,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PakBlock {
    /// Absolute offsets in the container.
    pub start: u64,
    pub end: u64,
}

/// Location and encoding of one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PakEntry {
    pub pos: u64,
    /// Size on disk.
    pub size: u64,
    pub uncompressed_size: u64,
    pub method: Method,
    pub block_size: u32,
    pub blocks: Vec<PakBlock>,
    pub encrypted: bool,
    /// Size of the entry record stored in front of the data.
    pub struct_size: u64,
}

/// Compression method of a version 1-7 entry.
fn legacy_method(raw: u32) -> Method {
    match raw {
        // custom engine codecs were sniffed per block
        4 => Method::Auto,
        other => Method::from_flags(other),
    }
}

fn selected_method(footer: &PakFooter, selector: u32, pos: u64) -> Result<Method> {
    if footer.version < FNAME_BASED_COMPRESSION_METHOD {
        return Ok(legacy_method(selector));
    }
    match selector {
        0 => Ok(Method::None),
        i => footer
            .compression_methods
            .get(i as usize - 1)
            .copied()
            .ok_or_else(|| Error::corrupt(pos, format!("compression method slot {} is empty", i))),
    }
}

impl PakEntry {
    /// Read an entry record as stored in a flat index.
    pub fn read(ar: &mut dyn Archive, footer: &PakFooter) -> Result<Self> {
        let start = ar.tell();
        let pos = ar.read_i64()? as u64;
        let size = ar.read_i64()? as u64;
        let uncompressed_size = ar.read_i64()? as u64;

        let selector = if footer.version < FNAME_BASED_COMPRESSION_METHOD {
            ar.read_u32()?
        } else if footer.version == FNAME_BASED_COMPRESSION_METHOD && footer.sub_version == 0 {
            ar.read_u8()? as u32
        } else {
            ar.read_u32()?
        };

        if footer.version < NO_TIMESTAMPS {
            let _timestamp = ar.read_i64()?;
        }
        ar.skip(20)?;

        let mut blocks = Vec::new();
        let mut encrypted = false;
        let mut block_size = 0;
        if footer.version >= COMPRESSION_ENCRYPTION {
            if selector != 0 {
                let count = ar.read_array_len()?;
                for _ in 0..count {
                    let (s, e) = (ar.read_i64()? as u64, ar.read_i64()? as u64);
                    blocks.push(if footer.version >= RELATIVE_CHUNK_OFFSETS {
                        PakBlock {
                            start: s + pos,
                            end: e + pos,
                        }
                    } else {
                        PakBlock { start: s, end: e }
                    });
                }
            }
            encrypted = ar.read_u8()? != 0;
            block_size = ar.read_u32()?;
        }

        Ok(Self {
            pos,
            size,
            uncompressed_size,
            method: selected_method(footer, selector, start)?,
            block_size,
            blocks,
            encrypted,
            struct_size: ar.tell() - start,
        })
    }

    /// Decode a bit-packed entry (version 10+).
    ///
    /// Bitfield: bit 31 offset fits in 32 bits, 30 uncompressed size
    /// fits, 29 size fits, 23-28 method slot, 22 encrypted, 6-21 block
    /// count, 0-5 block size in 2 KiB units.
    pub fn decode(data: &[u8], offset: usize, footer: &PakFooter) -> Result<Self> {
        let tail = data
            .get(offset..)
            .ok_or_else(|| Error::corrupt(offset as u64, "encoded entry offset out of range"))?;
        let mut r = MemReader::new(tail.to_vec());
        let bits = r.read_u32()?;

        let selector = (bits >> 23) & 0x3F;
        let mut read_var = |fits32: bool| -> Result<u64> {
            if fits32 {
                Ok(r.read_u32()? as u64)
            } else {
                r.read_u64()
            }
        };
        let pos = read_var(bits & (1 << 31) != 0)?;
        let uncompressed_size = read_var(bits & (1 << 30) != 0)?;
        let size = if selector != 0 {
            read_var(bits & (1 << 29) != 0)?
        } else {
            uncompressed_size
        };
        let encrypted = (bits >> 22) & 1 != 0;
        let block_count = ((bits >> 6) & 0xFFFF) as usize;

        // the record written in front of the data: 3 x i64, method, hash,
        // flags, block size, plus the block table when compressed
        let mut struct_size = 8 * 3 + 4 + 20 + 1 + 4;
        if selector != 0 {
            struct_size += 4 + block_count as u64 * 16;
        }

        let mut block_size = 0;
        let mut blocks = Vec::with_capacity(block_count);
        if block_count > 0 {
            block_size = if uncompressed_size < 65536 {
                uncompressed_size as u32
            } else {
                (bits & 0x3F) << 11
            };
            let start = pos + struct_size;
            if block_count == 1 && !encrypted {
                blocks.push(PakBlock {
                    start,
                    end: start + size,
                });
            } else {
                let align = if encrypted { AES_BLOCK_SIZE as u64 } else { 1 };
                let mut current = start;
                for _ in 0..block_count {
                    let len = r.read_u32()? as u64;
                    blocks.push(PakBlock {
                        start: current,
                        end: current + len,
                    });
                    current += len.div_ceil(align) * align;
                }
            }
        }

        Ok(Self {
            pos,
            size,
            uncompressed_size,
            method: selected_method(footer, selector, offset as u64)?,
            block_size,
            blocks,
            encrypted,
            struct_size,
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.method != Method::None
    }
}

/// Whether a decrypted index starts with a plausible string.
///
/// Checks only the length range and terminator of the mount point, so a
/// wrong key is caught most of the time without rejecting odd but valid
/// containers.
pub fn index_looks_valid(data: &[u8]) -> bool {
    let Some(len) = data.get(..4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])) else {
        return false;
    };
    if !(-512..=512).contains(&len) {
        return false;
    }
    match len {
        0 => true,
        n if n > 0 => data.get(4 + n as usize - 1) == Some(&0),
        n => {
            let at = 4 + (n.unsigned_abs() as usize - 1) * 2;
            data.get(at..at + 2) == Some(&[0, 0][..])
        }
    }
}

/// Strip the `../../..` prefix, or mount at the root when it is missing.
pub fn validate_mount_point(name: &str, mount: &str) -> String {
    if let Some(rest) = mount.strip_prefix("../../..") {
        if rest.starts_with('/') && !rest[1..].starts_with('.') {
            return rest.to_string();
        }
    }
    tracing::warn!("pak {} has strange mount point {:?}, mounting to root", name, mount);
    "/".to_string()
}

pub struct PakVfs {
    name: String,
    key: Option<AesKey>,
    reader: Option<SharedReader>,
    footer: Option<PakFooter>,
    mount_point: String,
    pak_entries: Vec<PakEntry>,
    index: EntryIndex,
    rejection: Option<String>,
    encrypted_files: usize,
}

impl PakVfs {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            reader: None,
            footer: None,
            mount_point: "/".to_string(),
            pak_entries: Vec::new(),
            index: EntryIndex::new(),
            rejection: None,
            encrypted_files: 0,
        }
    }

    /// Use `key` instead of the process-wide key.
    pub fn with_key(mut self, key: AesKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn footer(&self) -> Option<&PakFooter> {
        self.footer.as_ref()
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn pak_entry(&self, index: usize) -> Option<&PakEntry> {
        self.pak_entries.get(index)
    }

    pub fn encrypted_files(&self) -> usize {
        self.encrypted_files
    }

    fn key(&self) -> Option<AesKey> {
        self.key.or_else(crypto::aes_key)
    }

    fn reject(&mut self, message: String) -> Result<bool> {
        tracing::warn!("{}", message);
        self.rejection = Some(message);
        Ok(false)
    }

    /// Read `size` bytes at `offset`, decrypting when the index is encrypted.
    fn read_index_block(&self, reader: &mut dyn Archive, footer: &PakFooter, offset: u64, size: u64, key: Option<&AesKey>) -> Result<Vec<u8>> {
        reader.seek(offset)?;
        let mut data = reader.read_bytes_vec(size as usize)?;
        if let (true, Some(key)) = (footer.encrypted_index, key) {
            crypto::decrypt_with_key(&mut data, key)?;
        }
        Ok(data)
    }

    fn add(&mut self, path: String, entry: PakEntry) {
        if entry.encrypted {
            self.encrypted_files += 1;
        }
        self.index.push(ContainerEntry {
            path,
            size: entry.uncompressed_size,
            method: entry.method,
            encrypted: entry.encrypted,
            position: entry.pos,
        });
        self.pak_entries.push(entry);
    }

    fn load_legacy_index(&mut self, index: &mut MemReader, footer: &PakFooter) -> Result<()> {
        let count = index.read_i32()?;
        for i in 0..count.max(0) {
            let name = index.read_fstring().with_context(|| format!("index entry {}", i))?;
            let path = compact_path(&format!("{}{}", self.mount_point, name));
            let entry = PakEntry::read(index, footer).with_context(|| format!("index entry {} ({})", i, name))?;
            self.add(path, entry);
        }
        Ok(())
    }

    fn load_path_hash_index(&mut self, reader: &mut dyn Archive, index: &mut MemReader, footer: &PakFooter, key: Option<&AesKey>) -> Result<bool> {
        let count = index.read_i32()?;
        let _path_hash_seed = index.read_u64()?;

        if index.read_bool()? {
            let _offset = index.read_i64()?;
            let _size = index.read_i64()?;
            index.skip(20)?;
        }
        let mut directory = None;
        if index.read_bool()? {
            let offset = index.read_i64()? as u64;
            let size = index.read_i64()? as u64;
            index.skip(20)?;
            directory = Some((offset, size));
        }
        let Some((dir_offset, dir_size)) = directory else {
            return self.reject(format!("pak {} has no full directory index, skipping", self.name));
        };

        let encoded_len = index.read_array_len()?;
        let encoded = index.read_bytes_vec(encoded_len)?;
        let file_count = index.read_array_len()?;
        let mut files = Vec::with_capacity(file_count);
        for i in 0..file_count {
            files.push(PakEntry::read(index, footer).with_context(|| format!("unencoded entry {}", i))?);
        }

        let data = self
            .read_index_block(reader, footer, dir_offset, dir_size, key)
            .context("directory index")?;
        let mut dir = MemReader::new(data);
        let dir_count = dir.read_array_len()?;
        for _ in 0..dir_count {
            let dir_name = dir.read_fstring()?;
            let joined = format!("{}{}", self.mount_point, dir_name.trim_start_matches('/'));
            let folder = compact_path(&joined).trim_end_matches('/').to_string();
            let files_in_dir = dir.read_array_len()?;
            for _ in 0..files_in_dir {
                let file_name = dir.read_fstring()?;
                let location = dir.read_i32()?;
                let entry = if location < 0 {
                    let i = (-(location + 1)) as usize;
                    files
                        .get(i)
                        .cloned()
                        .ok_or_else(|| Error::corrupt(dir.tell(), format!("unencoded entry {} out of range", i)))?
                } else {
                    PakEntry::decode(&encoded, location as usize, footer)
                        .with_context(|| format!("encoded entry for {}", file_name))?
                };
                self.add(format!("{}/{}", folder, file_name), entry);
            }
        }

        if self.index.len() != count as usize {
            tracing::warn!(
                "pak {}: index declares {} files, directory lists {}",
                self.name,
                count,
                self.index.len()
            );
        }
        Ok(true)
    }
}

impl Vfs for PakVfs {
    fn kind(&self) -> &'static str {
        "pak"
    }

    fn attach(&mut self, mut reader: Box<dyn Archive>) -> Result<bool> {
        reader.version_mut().reverse_bytes = false;
        let Some(footer) = PakFooter::locate(reader.as_mut())? else {
            return self.reject(format!("{}: no pak footer found", self.name));
        };
        if footer.version > LATEST {
            tracing::warn!("pak {} has unsupported version {}", self.name, footer.version);
        }
        if footer.frozen_index {
            return self.reject(format!("pak {} has a frozen index, skipping", self.name));
        }

        let key = self.key();
        if footer.encrypted_index && key.is_none() {
            return self.reject(format!("pak {} has an encrypted index and no AES key, skipping", self.name));
        }

        let data = self
            .read_index_block(reader.as_mut(), &footer, footer.index_offset, footer.index_size, key.as_ref())
            .with_context(|| format!("pak {} index", self.name))?;
        if footer.encrypted_index && !index_looks_valid(&data) {
            return self.reject(format!(
                "the provided AES key doesn't work with {}, skipping",
                self.name
            ));
        }

        let mut index = MemReader::new(data);
        let mount = index.read_fstring().map_err(|e| {
            if footer.encrypted_index {
                Error::InvalidKey(format!("{}: index unreadable, the AES key is probably wrong", self.name))
            } else {
                e
            }
        })?;
        self.mount_point = validate_mount_point(&self.name, &mount);

        let loaded = if footer.version < PATH_HASH_INDEX {
            self.load_legacy_index(&mut index, &footer).map(|()| true)
        } else {
            self.load_path_hash_index(reader.as_mut(), &mut index, &footer, key.as_ref())
        }
        .with_context(|| format!("pak {} index", self.name))?;
        if !loaded {
            return Ok(false);
        }

        self.index.finish();
        tracing::info!(
            "pak {}: {} files ({} encrypted), mount point {:?}, version {}.{}",
            self.name,
            self.index.len(),
            self.encrypted_files,
            self.mount_point,
            footer.version,
            footer.sub_version
        );
        self.footer = Some(footer);
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
            .pak_entries
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("{}: entry {}", self.name, index)))?;

        if !entry.is_compressed() && !entry.encrypted {
            return Ok(Box::new(WindowReader::new(
                Rc::clone(shared),
                entry.pos + entry.struct_size,
                entry.uncompressed_size,
            )));
        }
        let key = if entry.encrypted {
            Some(self.key().ok_or(Error::MissingAesKey)?)
        } else {
            None
        };
        Ok(Box::new(PakFileReader::new(Rc::clone(shared), entry.clone(), key)))
    }

    fn close(&self) {
        if let Some(shared) = &self.reader {
            shared.borrow_mut().close();
        }
    }
}

/// Reader for compressed or encrypted entries; caches one decoded block.
pub struct PakFileReader {
    shared: SharedReader,
    entry: PakEntry,
    key: Option<AesKey>,
    pos: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    version: ArchiveVersion,
    stopper: Option<u64>,
}

impl PakFileReader {
    fn new(shared: SharedReader, entry: PakEntry, key: Option<AesKey>) -> Self {
        Self {
            shared,
            entry,
            key,
            pos: 0,
            buffer: Vec::new(),
            buffer_start: 0,
            version: ArchiveVersion::default(),
            stopper: None,
        }
    }

    fn read_container(&self, at: u64, len: usize) -> Result<Vec<u8>> {
        let mut inner = self.shared.borrow_mut();
        inner.seek(at)?;
        inner.read_bytes_vec(len)
    }

    fn decrypt(&self, data: &mut [u8]) -> Result<()> {
        let key = self.key.as_ref().ok_or(Error::MissingAesKey)?;
        crypto::decrypt_with_key(data, key)
    }

    fn load_block(&mut self, pos: u64) -> Result<()> {
        let block_size = match self.entry.block_size {
            0 => self.entry.uncompressed_size.max(1),
            n => n as u64,
        };
        let index = (pos / block_size) as usize;
        let block = *self
            .entry
            .blocks
            .get(index)
            .ok_or_else(|| Error::corrupt(pos, format!("no compression block {}", index)))?;
        let compressed_len = block
            .end
            .checked_sub(block.start)
            .ok_or_else(|| Error::corrupt(block.start, "compression block ends before it starts"))?
            as usize;

        let mut data = if self.entry.encrypted {
            let mut data = self.read_container(block.start, crypto::align(compressed_len))?;
            self.decrypt(&mut data)?;
            data.truncate(compressed_len);
            data
        } else {
            self.read_container(block.start, compressed_len)?
        };

        let start = index as u64 * block_size;
        let expected = block_size.min(self.entry.uncompressed_size - start) as usize;
        data = compression::decompress_for(Engine::UE4, self.entry.method, &data, expected)
            .with_context(|| format!("block {} at {}", index, block.start))?;
        self.buffer = data;
        self.buffer_start = start;
        Ok(())
    }

    fn load_window(&mut self, pos: u64) -> Result<()> {
        let start = pos & !(AES_BLOCK_SIZE as u64 - 1);
        let remaining = (self.entry.size.saturating_sub(start) as usize).min(ENCRYPTED_WINDOW);
        let mut data = self.read_container(
            self.entry.pos + self.entry.struct_size + start,
            crypto::align(remaining),
        )?;
        self.decrypt(&mut data)?;
        self.buffer = data;
        self.buffer_start = start;
        Ok(())
    }
}

impl Archive for PakFileReader {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        let len = self.entry.uncompressed_size;
        if self.pos + buf.len() as u64 > len {
            return Err(Error::Eof {
                pos: self.pos,
                size: buf.len(),
                len,
            });
        }
        let mut done = 0;
        while done < buf.len() {
            let end = self.buffer_start + self.buffer.len() as u64;
            if self.pos < self.buffer_start || self.pos >= end {
                if self.entry.is_compressed() {
                    self.load_block(self.pos)?;
                } else {
                    self.load_window(self.pos)?;
                }
                if self.pos >= self.buffer_start + self.buffer.len() as u64 {
                    return Err(Error::corrupt(self.pos, "decoded block is empty"));
                }
            }
            let from = (self.pos - self.buffer_start) as usize;
            let count = (self.buffer.len() - from).min(buf.len() - done);
            buf[done..done + count].copy_from_slice(&self.buffer[from..from + count]);
            done += count;
            self.pos += count as u64;
        }
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.entry.uncompressed_size {
            return Err(Error::Eof {
                pos,
                size: 0,
                len: self.entry.uncompressed_size,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> u64 {
        self.entry.uncompressed_size
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

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;

    pub(crate) const KEY: AesKey = *b"pak-test-key-0123456789abcdefABC";

    pub(crate) struct TestFile {
        pub name: String,
        pub data: Vec<u8>,
        pub method: Method,
        pub encrypted: bool,
    }

    impl TestFile {
        pub fn new(name: &str, data: Vec<u8>, method: Method, encrypted: bool) -> Self {
            Self {
                name: name.to_string(),
                data,
                method,
                encrypted,
            }
        }
    }

    fn selector(version: i32, method: Method) -> u32 {
        match (version >= FNAME_BASED_COMPRESSION_METHOD, method) {
            (_, Method::None) => 0,
            (_, Method::Zlib) => 1,
            (true, Method::Lz4) => 2,
            (_, other) => panic!("no selector for {}", other),
        }
    }

    fn footer_size(version: i32, sub: i32) -> u64 {
        match version {
            v if v < FNAME_BASED_COMPRESSION_METHOD => 61,
            FNAME_BASED_COMPRESSION_METHOD if sub == 0 => 189,
            FROZEN_INDEX => 222,
            _ => 221,
        }
    }

    fn write_record(w: &mut ArchiveWriter, version: i32, sub: i32, e: &PakEntry, sel: u32, relative: &[(u64, u64)]) {
        w.write_i64(e.pos as i64)
            .write_i64(e.size as i64)
            .write_i64(e.uncompressed_size as i64);
        if version == FNAME_BASED_COMPRESSION_METHOD && sub == 0 {
            w.write_u8(sel as u8);
        } else {
            w.write_u32(sel);
        }
        if version < NO_TIMESTAMPS {
            w.write_i64(0);
        }
        w.write_bytes(&[0u8; 20]);
        if version >= COMPRESSION_ENCRYPTION {
            if sel != 0 {
                w.write_i32(relative.len() as i32);
                for &(s, end) in relative {
                    w.write_i64(s as i64).write_i64(end as i64);
                }
            }
            w.write_u8(e.encrypted as u8).write_u32(e.block_size);
        }
    }

    fn record_size(version: i32, sub: i32, sel: u32, blocks: usize) -> u64 {
        let mut size = 24 + if version == FNAME_BASED_COMPRESSION_METHOD && sub == 0 { 1 } else { 4 } + 20;
        if version < NO_TIMESTAMPS {
            size += 8;
        }
        if version >= COMPRESSION_ENCRYPTION {
            if sel != 0 {
                size += 4 + 16 * blocks as u64;
            }
            size += 5;
        }
        size
    }

    fn pad_encrypt(mut data: Vec<u8>) -> Vec<u8> {
        data.resize(crypto::align(data.len()), 0);
        crypto::encrypt_with_key(&mut data, &KEY).unwrap();
        data
    }

    fn write_footer(w: &mut ArchiveWriter, version: i32, sub: i32, encrypted_index: bool, index_offset: u64, index_size: u64) {
        w.write_guid(Guid::default())
            .write_u8(encrypted_index as u8)
            .write_u32(PAK_MAGIC)
            .write_i32(version)
            .write_i64(index_offset as i64)
            .write_i64(index_size as i64)
            .write_bytes(&[0u8; 20]);
        if version == FROZEN_INDEX {
            w.write_u8(0);
        }
        if version >= FNAME_BASED_COMPRESSION_METHOD {
            let slots = if footer_size(version, sub) == 189 { 4 } else { 5 };
            for name in ["Zlib", "LZ4", "", "", ""].iter().take(slots) {
                let mut raw = [0u8; 32];
                raw[..name.len()].copy_from_slice(name.as_bytes());
                w.write_bytes(&raw);
            }
        }
    }

    /// Write file payloads and return their entries (with relative block tables).
    fn write_payloads(w: &mut ArchiveWriter, version: i32, sub: i32, files: &[TestFile], block: usize) -> Vec<(PakEntry, u32, Vec<(u64, u64)>)> {
        let mut out = Vec::new();
        for f in files {
            let sel = selector(version, f.method);
            let pos = w.position() as u64;
            let mut payload = Vec::new();
            let mut lens = Vec::new();
            if f.method == Method::None {
                payload = if f.encrypted { pad_encrypt(f.data.clone()) } else { f.data.clone() };
            } else {
                for chunk in f.data.chunks(block) {
                    let packed = compression::compress(f.method, chunk).unwrap();
                    lens.push(packed.len() as u64);
                    payload.extend(if f.encrypted { pad_encrypt(packed) } else { packed });
                }
            }
            let header = record_size(version, sub, sel, lens.len());
            let mut relative = Vec::new();
            let mut offset = header;
            for len in &lens {
                relative.push((offset, offset + len));
                offset += if f.encrypted { crypto::align(*len as usize) as u64 } else { *len };
            }
            let stored: Vec<(u64, u64)> = if version >= RELATIVE_CHUNK_OFFSETS {
                relative.clone()
            } else {
                relative.iter().map(|&(s, e)| (s + pos, e + pos)).collect()
            };
            let entry = PakEntry {
                pos,
                size: if f.method == Method::None { f.data.len() as u64 } else { lens.iter().sum() },
                uncompressed_size: f.data.len() as u64,
                method: f.method,
                block_size: if f.method == Method::None { 0 } else { block as u32 },
                blocks: Vec::new(),
                encrypted: f.encrypted,
                struct_size: header,
            };
            write_record(w, version, sub, &entry, sel, &stored);
            w.write_bytes(&payload);
            out.push((entry, sel, stored));
        }
        out
    }

    /// Build a flat-index pak (versions 1-9).
    pub(crate) fn build_pak(version: i32, sub: i32, mount: &str, files: &[TestFile], encrypt_index: bool, block: usize) -> Vec<u8> {
        let mut w = ArchiveWriter::new();
        let entries = write_payloads(&mut w, version, sub, files, block);

        let mut index = ArchiveWriter::new();
        index.write_fstring(mount).write_i32(files.len() as i32);
        for (f, (entry, sel, blocks)) in files.iter().zip(&entries) {
            index.write_fstring(&f.name);
            write_record(&mut index, version, sub, entry, *sel, blocks);
        }
        let mut index = index.into_inner();
        if encrypt_index {
            index = pad_encrypt(index);
        }

        let index_offset = w.position() as u64;
        w.write_bytes(&index);
        write_footer(&mut w, version, sub, encrypt_index, index_offset, index.len() as u64);
        w.into_inner()
    }

    /// Build a version 11 pak whose files all live in one directory.
    fn build_pak_v11(mount: &str, dir: &str, files: &[TestFile], block: usize) -> Vec<u8> {
        let version = FNV64_BUG_FIX;
        let mut w = ArchiveWriter::new();
        let entries = write_payloads(&mut w, version, 0, files, block);

        // bit-packed entries, except the last file which goes in the plain list
        let mut encoded = ArchiveWriter::new();
        let mut locations = Vec::new();
        for (i, (entry, sel, blocks)) in entries.iter().enumerate() {
            if i + 1 == entries.len() {
                locations.push(-1);
                continue;
            }
            locations.push(encoded.position() as i32);
            let mut bits = (1u32 << 31) | (1 << 30) | (1 << 29);
            bits |= sel << 23;
            bits |= (entry.encrypted as u32) << 22;
            bits |= (blocks.len() as u32) << 6;
            bits |= (entry.block_size >> 11) & 0x3F;
            encoded.write_u32(bits).write_u32(entry.pos as u32).write_u32(entry.uncompressed_size as u32);
            if *sel != 0 {
                encoded.write_u32(entry.size as u32);
            }
            if blocks.len() > 1 || (entry.encrypted && !blocks.is_empty()) {
                for (s, e) in blocks {
                    encoded.write_u32((e - s) as u32);
                }
            }
        }

        let mut directory = ArchiveWriter::new();
        directory.write_i32(1).write_fstring(dir).write_i32(files.len() as i32);
        for (f, loc) in files.iter().zip(&locations) {
            directory.write_fstring(&f.name).write_i32(*loc);
        }
        let directory = directory.into_inner();
        let dir_offset = w.position() as u64;
        w.write_bytes(&directory);

        let encoded = encoded.into_inner();
        let mut index = ArchiveWriter::new();
        index
            .write_fstring(mount)
            .write_i32(files.len() as i32)
            .write_u64(0x1234)
            .write_i32(0)
            .write_i32(1)
            .write_i64(dir_offset as i64)
            .write_i64(directory.len() as i64)
            .write_bytes(&[0u8; 20])
            .write_i32(encoded.len() as i32)
            .write_bytes(&encoded)
            .write_i32(1);
        let (last, sel, blocks) = &entries[entries.len() - 1];
        write_record(&mut index, version, 0, last, *sel, blocks);
        let index = index.into_inner();

        let index_offset = w.position() as u64;
        w.write_bytes(&index);
        write_footer(&mut w, version, 0, false, index_offset, index.len() as u64);
        w.into_inner()
    }

    fn sample(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(seed) ^ (i >> 8) as u8).collect()
    }

    fn test_files() -> Vec<TestFile> {
        vec![
            TestFile::new("Maps/Plain.umap", sample(1000, 3), Method::None, false),
            TestFile::new("Maps/Packed.uasset", sample(5000, 5), Method::Zlib, false),
            TestFile::new("Secret/Plain.uasset", sample(777, 7), Method::None, true),
            TestFile::new("Secret/Packed.uasset", sample(4100, 11), Method::Zlib, true),
            TestFile::new("Empty.txt", Vec::new(), Method::None, false),
        ]
    }

    fn attach(data: Vec<u8>) -> PakVfs {
        let mut vfs = PakVfs::new("test.pak").with_key(KEY);
        assert!(vfs.attach(Box::new(MemReader::new(data))).unwrap(), "{:?}", vfs.rejection());
        vfs
    }

    fn check_all(vfs: &PakVfs, prefix: &str, files: &[TestFile]) {
        assert_eq!(vfs.num_files(), files.len());
        for f in files {
            let path = format!("{}{}", prefix, f.name);
            assert_eq!(vfs.file_size(&path), Some(f.data.len() as u64), "{}", path);
            assert_eq!(vfs.read_all(&path).unwrap(), f.data, "{}", path);
        }
    }

    #[test]
    fn test_legacy_versions_roundtrip() {
        let files = test_files();
        for (version, sub) in [(3, 0), (4, 0), (5, 0), (7, 0), (8, 0), (8, 1), (9, 0)] {
            let data = build_pak(version, sub, "../../../ShooterGame/Content/", &files, false, 2048);
            let vfs = attach(data);
            let footer = vfs.footer().unwrap();
            assert_eq!((footer.version, footer.sub_version), (version, sub));
            assert_eq!(vfs.mount_point(), "/ShooterGame/Content/");
            check_all(&vfs, "/Game/", &files);
            assert_eq!(vfs.encrypted_files(), 2);
        }
    }

    #[test]
    fn test_oldest_versions() {
        let files = vec![
            TestFile::new("a.u", sample(300, 13), Method::None, false),
            TestFile::new("b.u", sample(64, 17), Method::None, false),
        ];
        for version in [INITIAL, NO_TIMESTAMPS] {
            let vfs = attach(build_pak(version, 0, "../../../", &files, false, 0));
            check_all(&vfs, "/", &files);
        }
    }

    #[test]
    fn test_lz4_selector() {
        let files = vec![TestFile::new("x.uasset", sample(9000, 19), Method::Lz4, false)];
        let vfs = attach(build_pak(8, 1, "../../../Engine/Content/", &files, false, 4096));
        assert_eq!(vfs.entries()[0].method, Method::Lz4);
        check_all(&vfs, "/Engine/", &files);
    }

    #[test]
    fn test_encrypted_index() {
        let files = test_files();
        let data = build_pak(8, 1, "../../../ShooterGame/Content/", &files, true, 2048);
        let vfs = attach(data.clone());
        check_all(&vfs, "/Game/", &files);

        // no key at all
        let mut vfs = PakVfs::new("nokey.pak");
        if crypto::aes_key().is_none() {
            assert!(!vfs.attach(Box::new(MemReader::new(data.clone()))).unwrap());
            assert!(vfs.rejection().unwrap().contains("no AES key"));
        }

        // wrong key
        let mut vfs = PakVfs::new("wrong.pak").with_key([7u8; 32]);
        let attached = vfs.attach(Box::new(MemReader::new(data)));
        match attached {
            Ok(false) => assert!(vfs.rejection().unwrap().contains("doesn't work")),
            Ok(true) => panic!("wrong key accepted"),
            Err(e) => assert_eq!(e.kind(), crate::ErrorKind::ConfigurationError),
        }
    }

    #[test]
    fn test_path_hash_index() {
        let files = vec![
            TestFile::new("Plain.uasset", sample(900, 3), Method::None, false),
            TestFile::new("Packed.uasset", sample(70_000, 5), Method::Zlib, false),
            TestFile::new("Single.uasset", sample(3000, 23), Method::Zlib, false),
            TestFile::new("Secret.uasset", sample(5000, 9), Method::Zlib, true),
            TestFile::new("Listed.uasset", sample(123, 29), Method::None, false),
        ];
        let data = build_pak_v11("../../../ShooterGame/Content/", "Maps/", &files, 32768);
        let vfs = attach(data);
        assert_eq!(vfs.footer().unwrap().version, 11);
        check_all(&vfs, "/Game/Maps/", &files);
    }

    #[test]
    fn test_hashed_lookup() {
        let files: Vec<TestFile> = (0..300)
            .map(|i| TestFile::new(&format!("Dir{}/File{}.uasset", i % 5, i), sample(8 + i % 13, i as u8), Method::None, false))
            .collect();
        let vfs = attach(build_pak(7, 0, "../../../Proj/Content/", &files, false, 0));
        assert!(vfs.index.is_hashed());
        for i in [0usize, 17, 150, 299] {
            let path = format!("/GAME/dir{}/file{}.UASSET", i % 5, i);
            assert_eq!(vfs.find(&path), Some(i));
            assert_eq!(vfs.index.find_linear(&path), Some(i));
        }
        assert!(vfs.create_reader("/Game/nope.uasset").is_err());
    }

    #[test]
    fn test_strange_mount_point() {
        let files = vec![TestFile::new("a.uasset", vec![1, 2, 3], Method::None, false)];
        let vfs = attach(build_pak(7, 0, "D:/build/", &files, false, 0));
        assert_eq!(vfs.mount_point(), "/");
        assert_eq!(vfs.read_all("/a.uasset").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_not_a_pak() {
        let mut vfs = PakVfs::new("junk.pak");
        assert!(!vfs.attach(Box::new(MemReader::new(vec![0u8; 400]))).unwrap());
        assert!(vfs.rejection().unwrap().contains("no pak footer"));
        let mut vfs = PakVfs::new("tiny.pak");
        assert!(!vfs.attach(Box::new(MemReader::new(vec![0u8; 10]))).unwrap());
    }

    #[test]
    fn test_random_access_in_compressed_entry() {
        let files = vec![TestFile::new("big.uasset", sample(10_000, 31), Method::Zlib, true)];
        let vfs = attach(build_pak(8, 1, "../../../", &files, false, 1024));
        let mut r = vfs.create_reader("big.uasset").unwrap();
        r.seek(5000).unwrap();
        assert_eq!(r.read_bytes_vec(3000).unwrap(), files[0].data[5000..8000]);
        r.seek(1020).unwrap();
        assert_eq!(r.read_bytes_vec(10).unwrap(), files[0].data[1020..1030]);
        r.seek(9999).unwrap();
        assert!(r.read_u16().is_err());
    }

    #[test]
    fn test_index_validation() {
        let mut ok = Vec::new();
        ok.extend_from_slice(&3i32.to_le_bytes());
        ok.extend_from_slice(b"ab\0");
        assert!(index_looks_valid(&ok));
        ok[6] = b'c';
        assert!(!index_looks_valid(&ok));

        let mut wide = Vec::new();
        wide.extend_from_slice(&(-2i32).to_le_bytes());
        wide.extend_from_slice(&[b'a', 0, 0, 0]);
        assert!(index_looks_valid(&wide));
        assert!(!index_looks_valid(&1000i32.to_le_bytes()));
        assert!(!index_looks_valid(&[1, 2]));
        assert!(index_looks_valid(&0i32.to_le_bytes()));
    }
}
