//! PS3 retail PKG file format structures.
//!
//! A retail `.pkg` file has the following high-level layout:
//!
//! | Region            | Offset                    | Notes                           |
//! |-------------------|---------------------------|---------------------------------|
//! | Header            | `0x00`–`0x7F`             | Plaintext                       |
//! | Header digest     | `0x80`–`0xBF`             | CMAC ‖ signature ‖ SHA-1 tail   |
//! | Metadata entries  | `0xC0`                    | `{type, length, data}` records  |
//! | Metadata digest   | after the entries         | over the entries only           |
//! | Encrypted body    | `data_offset`             | AES-128-CTR, header IV          |
//! | Filler digest     | `data_offset + data_size` | digest of 16 zero bytes         |
//! | Footer            | last `0x20` bytes         | SHA-1 of everything before it   |
//!
//! Inside the decrypted body, offsets are relative to its start: the file
//! entry table comes first, then the file names, then the file contents.
//! Every name and every file's data is padded to 16 bytes.

use core::fmt;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use enumflags2::{BitFlags, bitflags};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::PkgError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// PKG magic: `\x7FPKG` → `0x7F504B47` (big-endian).
pub const PKG_MAGIC: u32 = 0x7F50_4B47;

/// Revision of a retail ("finalized") package.
pub const PKG_REVISION_RETAIL: u16 = 0x8000;

/// Package type of a PS3 package.
pub const PKG_TYPE_PS3: u16 = 0x0001;

/// Size of the fixed header, excluding its digest.
pub const PKG_HEADER_SIZE: usize = 0x80;

/// Size of one digest envelope.
pub const PKG_DIGEST_SIZE: usize = 0x40;

/// The metadata list always starts right after the header digest.
pub const PKG_METADATA_OFFSET: u32 = (PKG_HEADER_SIZE + PKG_DIGEST_SIZE) as u32;

/// Size of one file entry record in the item table.
pub const PKG_FILE_ENTRY_SIZE: usize = 0x20;

/// SHA-1 plus zero padding at the very end of the file.
pub const PKG_FOOTER_SIZE: usize = 0x20;

/// Alignment of every name and data region inside the body.
pub const PKG_ALIGNMENT: u64 = 0x10;

/// Length of the content ID field.
pub const PKG_CONTENT_ID_SIZE: usize = 0x30;

/// IV used by packages built with default settings.
pub const PKG_DEFAULT_IV: [u8; 16] = [
    0x6C, 0xC6, 0x08, 0xD4, 0x6C, 0x84, 0xCE, 0x96, 0x7C, 0xDD, 0x83, 0xC1, 0xA6, 0xBB, 0x43, 0x69,
];

/// Round `n` up to the next multiple of [`PKG_ALIGNMENT`].
#[inline]
pub const fn align_up(n: u64) -> u64 {
    n.div_ceil(PKG_ALIGNMENT) * PKG_ALIGNMENT
}

/// Copy `src` into a zeroed fixed-size array, truncating any excess.
pub(crate) fn pad_bytes<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let len = std::cmp::min(src.len(), N);
    out[..len].copy_from_slice(&src[..len]);
    out
}

/// Interpret a NUL-padded field as UTF-8.
pub(crate) fn trim_nul_str(raw: &[u8]) -> &str {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    core::str::from_utf8(&raw[..end]).unwrap_or("<invalid UTF-8>")
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Known DRM type values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum PkgDrmType {
    None = 0x0,
    Network = 0x1,
    Local = 0x2,
    Free = 0x3,
    PspGo = 0xD,
}

/// Known content type values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum PkgContentType {
    GameData = 0x04,
    GameExec = 0x05,
    Ps1Emu = 0x06,
    PspMinis = 0x07,
    SystemUpdate = 0x08,
    PspRemaster = 0x09,
    PspNeoGeo = 0x0A,
    Unk0B = 0x0B,
    Avatar = 0x0D,
    Minis2 = 0x0E,
    XmbPlugin = 0x0F,
    Theme = 0x12,
    DiscMovie = 0x13,
    Widget = 0x15,
    LicenseFile = 0x16,
    PspGo = 0x18,
}

/// Metadata entry type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum PkgMetadataType {
    DrmType = 0x1,
    ContentType = 0x2,
    PackageType = 0x3,
    PackageSize = 0x4,
    PackageVersion = 0x5,
    QaDigest = 0x7,
    SystemAndAppVersion = 0x8,
    UnknownAllZeroes = 0x9,
    InstallDirectory = 0xA,
}

/// Per-entry flags stored in [`PkgFileEntry::flags`].
#[bitflags]
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PkgFileFlag {
    Npdrm = 0x0000_0001,
    Edat = 0x0000_0002,
    Directory = 0x0000_0004,
    SelfExec = 0x0000_0100,
    PspCrypto = 0x1000_0000,
    Overwrite = 0x8000_0000,
}

/// Package-wide flags carried by the `PackageType` metadata entry.
#[bitflags]
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PkgFlag {
    Unknown0x1 = 0x0001,
    Eboot = 0x0002,
    RequireLicense = 0x0004,
    Unknown0x8 = 0x0008,
    CumulativePatch = 0x0010,
    Unknown0x20 = 0x0020,
    RenameDirectory = 0x0040,
    Edat = 0x0080,
    Unknown0x100 = 0x0100,
    Emulator = 0x0200,
    VshModule = 0x0400,
    DiscBinded = 0x0800,
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Fixed PKG header (`0x00`–`0x7F`, all big-endian).
///
/// ```text
/// 0x00  u32      magic (0x7F504B47)
/// 0x04  u16      revision        (0x8000 retail)
/// 0x06  u16      package_type    (0x0001 PS3)
/// 0x08  u32      metadata_offset (always 0xC0)
/// 0x0C  u32      metadata_count
/// 0x10  u32      metadata_size   (entries + 0x40 digest)
/// 0x14  u32      item_count
/// 0x18  u64      total_size
/// 0x20  u64      data_offset
/// 0x28  u64      data_size
/// 0x30  [u8;48]  content_id  (null-padded ASCII)
/// 0x60  [u8;16]  debug_digest
/// 0x70  [u8;16]  iv          (AES-CTR initial counter)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgHeader {
    pub magic: u32,
    pub revision: u16,
    pub package_type: u16,
    pub metadata_offset: u32,
    pub metadata_count: u32,
    pub metadata_size: u32,
    pub item_count: u32,
    pub total_size: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub content_id: [u8; PKG_CONTENT_ID_SIZE],
    pub debug_digest: [u8; 16],
    pub iv: [u8; 16],
}

impl PkgHeader {
    /// Read and validate a header.
    ///
    /// Magic, revision and type are checked in that order before any other
    /// field is interpreted.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, PkgError> {
        let mut raw = [0u8; PKG_HEADER_SIZE];
        r.read_exact(&mut raw).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => PkgError::FileTooSmall,
            _ => PkgError::Io(e),
        })?;
        Self::parse(&raw)
    }

    /// Parse a header from its raw bytes.
    pub fn parse(raw: &[u8; PKG_HEADER_SIZE]) -> Result<Self, PkgError> {
        let mut c = io::Cursor::new(&raw[..]);

        let magic = c.read_u32::<BigEndian>()?;
        if magic != PKG_MAGIC {
            return Err(PkgError::InvalidMagic(magic));
        }
        let revision = c.read_u16::<BigEndian>()?;
        if revision != PKG_REVISION_RETAIL {
            return Err(PkgError::UnsupportedRevision(revision));
        }
        let package_type = c.read_u16::<BigEndian>()?;
        if package_type != PKG_TYPE_PS3 {
            return Err(PkgError::UnsupportedType(package_type));
        }

        let metadata_offset = c.read_u32::<BigEndian>()?;
        let metadata_count = c.read_u32::<BigEndian>()?;
        let metadata_size = c.read_u32::<BigEndian>()?;
        let item_count = c.read_u32::<BigEndian>()?;
        let total_size = c.read_u64::<BigEndian>()?;
        let data_offset = c.read_u64::<BigEndian>()?;
        let data_size = c.read_u64::<BigEndian>()?;

        let mut content_id = [0u8; PKG_CONTENT_ID_SIZE];
        c.read_exact(&mut content_id)?;
        let mut debug_digest = [0u8; 16];
        c.read_exact(&mut debug_digest)?;
        let mut iv = [0u8; 16];
        c.read_exact(&mut iv)?;

        Ok(Self {
            magic,
            revision,
            package_type,
            metadata_offset,
            metadata_count,
            metadata_size,
            item_count,
            total_size,
            data_offset,
            data_size,
            content_id,
            debug_digest,
            iv,
        })
    }

    /// Write the header in on-disk order.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.magic)?;
        w.write_u16::<BigEndian>(self.revision)?;
        w.write_u16::<BigEndian>(self.package_type)?;
        w.write_u32::<BigEndian>(self.metadata_offset)?;
        w.write_u32::<BigEndian>(self.metadata_count)?;
        w.write_u32::<BigEndian>(self.metadata_size)?;
        w.write_u32::<BigEndian>(self.item_count)?;
        w.write_u64::<BigEndian>(self.total_size)?;
        w.write_u64::<BigEndian>(self.data_offset)?;
        w.write_u64::<BigEndian>(self.data_size)?;
        w.write_all(&self.content_id)?;
        w.write_all(&self.debug_digest)?;
        w.write_all(&self.iv)?;
        Ok(())
    }

    /// Serialize into the exact 0x80-byte on-disk form.
    pub fn to_bytes(&self) -> [u8; PKG_HEADER_SIZE] {
        let mut out = [0u8; PKG_HEADER_SIZE];
        let mut c = io::Cursor::new(&mut out[..]);
        // A cursor over a buffer of exactly the header size cannot run short.
        let _ = self.write_to(&mut c);
        out
    }

    /// Content-ID as a UTF-8 `&str`, stripping trailing NULs.
    pub fn content_id_str(&self) -> &str {
        trim_nul_str(&self.content_id)
    }

    /// Offset of the first byte after the encrypted body.
    pub const fn data_end(&self) -> u64 {
        self.data_offset.saturating_add(self.data_size)
    }
}

impl fmt::Display for PkgHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PkgHeader(revision={:#06x}, type={:#06x}, content_id=\"{}\", items={}, \
             metadata={}@{:#x}, total_size={}, data_offset={:#x}, data_size={})",
            self.revision,
            self.package_type,
            self.content_id_str(),
            self.item_count,
            self.metadata_count,
            self.metadata_offset,
            self.total_size,
            self.data_offset,
            self.data_size,
        )
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// One `{type, length, data}` record of the metadata list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgMetadataEntry {
    /// Raw type code; unknown codes are kept as-is.
    pub entry_type: u32,
    pub data: Vec<u8>,
}

impl PkgMetadataEntry {
    pub fn new(kind: PkgMetadataType, data: Vec<u8>) -> Self {
        Self {
            entry_type: kind.into(),
            data,
        }
    }

    /// An entry whose payload is one big-endian `u32`.
    pub fn from_u32(kind: PkgMetadataType, value: u32) -> Self {
        Self::new(kind, value.to_be_bytes().to_vec())
    }

    /// An entry whose payload is one big-endian `u64`.
    pub fn from_u64(kind: PkgMetadataType, value: u64) -> Self {
        Self::new(kind, value.to_be_bytes().to_vec())
    }

    /// Typed view of the type code.
    pub fn kind(&self) -> Result<PkgMetadataType, u32> {
        PkgMetadataType::try_from(self.entry_type).map_err(|e| e.number)
    }

    /// First four payload bytes as a big-endian `u32`.
    pub fn as_u32(&self) -> Option<u32> {
        let bytes = self.data.get(..4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// First eight payload bytes as a big-endian `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.data.get(..8)?.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    /// Size on disk, including the type and length fields.
    pub fn byte_len(&self) -> usize {
        8 + self.data.len()
    }

    /// Read one entry; `remaining` is what is left of the metadata region.
    pub fn read_from<R: Read>(r: &mut R, remaining: u64) -> Result<Self, PkgError> {
        if remaining < 8 {
            return Err(PkgError::MetadataOverflow);
        }
        let entry_type = r.read_u32::<BigEndian>()?;
        let length = r.read_u32::<BigEndian>()?;
        if u64::from(length) > remaining - 8 {
            return Err(PkgError::MetadataOverflow);
        }

        let mut data = vec![0u8; length as usize];
        r.read_exact(&mut data)?;
        Ok(Self { entry_type, data })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.entry_type)?;
        w.write_u32::<BigEndian>(self.data.len() as u32)?;
        w.write_all(&self.data)
    }
}

impl fmt::Display for PkgMetadataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Ok(kind) => write!(f, "{kind:?}")?,
            Err(raw) => write!(f, "Unknown({raw:#x})")?,
        }
        write!(f, " [{} bytes]", self.data.len())
    }
}

/// Ordered metadata list. Lookups return the first entry of a type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PkgMetadata {
    entries: Vec<PkgMetadataEntry>,
}

impl PkgMetadata {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Read `count` entries from a region of `size` bytes, where `size`
    /// includes the trailing digest.
    pub fn read_from<R: Read>(r: &mut R, count: u32, size: u32) -> Result<Self, PkgError> {
        let mut remaining = u64::from(size)
            .checked_sub(PKG_DIGEST_SIZE as u64)
            .ok_or(PkgError::MetadataOverflow)?;

        let mut entries = Vec::with_capacity(std::cmp::min(count, 64) as usize);
        for _ in 0..count {
            let entry = PkgMetadataEntry::read_from(r, remaining)?;
            remaining -= entry.byte_len() as u64;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for entry in &self.entries {
            entry.write_to(w)?;
        }
        Ok(())
    }

    /// Serialized size of the entries, excluding the digest.
    pub fn byte_len(&self) -> usize {
        self.entries.iter().map(PkgMetadataEntry::byte_len).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PkgMetadataEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PkgMetadataEntry> {
        self.entries.iter()
    }

    pub fn push(&mut self, entry: PkgMetadataEntry) {
        self.entries.push(entry);
    }

    /// Replace the first entry with the same type code, or append.
    pub fn set(&mut self, entry: PkgMetadataEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.entry_type == entry.entry_type)
        {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    /// First entry of the given type.
    pub fn get(&self, kind: PkgMetadataType) -> Option<&PkgMetadataEntry> {
        let code = u32::from(kind);
        self.entries.iter().find(|e| e.entry_type == code)
    }

    pub fn drm_type(&self) -> Option<u32> {
        self.get(PkgMetadataType::DrmType)?.as_u32()
    }

    /// Attempt to interpret the DRM type as [`PkgDrmType`].
    pub fn drm_type_enum(&self) -> Option<Result<PkgDrmType, u32>> {
        self.drm_type()
            .map(|v| PkgDrmType::try_from(v).map_err(|e| e.number))
    }

    pub fn content_type(&self) -> Option<u32> {
        self.get(PkgMetadataType::ContentType)?.as_u32()
    }

    /// Attempt to interpret the content type as [`PkgContentType`].
    pub fn content_type_enum(&self) -> Option<Result<PkgContentType, u32>> {
        self.content_type()
            .map(|v| PkgContentType::try_from(v).map_err(|e| e.number))
    }

    /// Package flags; unknown bits are dropped.
    pub fn package_flags(&self) -> Option<BitFlags<PkgFlag>> {
        self.get(PkgMetadataType::PackageType)?
            .as_u32()
            .map(BitFlags::from_bits_truncate)
    }

    pub fn package_size(&self) -> Option<u64> {
        self.get(PkgMetadataType::PackageSize)?.as_u64()
    }

    /// Install directory name. The payload is 8 reserved bytes followed by
    /// a NUL-padded 0x20-byte name.
    pub fn install_directory(&self) -> Option<&str> {
        let data = &self.get(PkgMetadataType::InstallDirectory)?.data;
        data.get(8..).map(trim_nul_str)
    }
}

impl<'a> IntoIterator for &'a PkgMetadata {
    type Item = &'a PkgMetadataEntry;
    type IntoIter = std::slice::Iter<'a, PkgMetadataEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// File-entry struct
// ---------------------------------------------------------------------------

/// A single entry in the PKG item table (32 bytes each).
///
/// ```text
/// 0x00  u32  name_offset   (relative to the body start)
/// 0x04  u32  name_size     (unpadded, no NUL)
/// 0x08  u64  data_offset   (relative to the body start)
/// 0x10  u64  data_size
/// 0x18  u32  flags         (PkgFileFlag bits)
/// 0x1C  u32  reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PkgFileEntry {
    pub name_offset: u32,
    pub name_size: u32,
    pub data_offset: u64,
    pub data_size: u64,
    pub flags: u32,
    pub reserved: u32,
}

impl PkgFileEntry {
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            name_offset: r.read_u32::<BigEndian>()?,
            name_size: r.read_u32::<BigEndian>()?,
            data_offset: r.read_u64::<BigEndian>()?,
            data_size: r.read_u64::<BigEndian>()?,
            flags: r.read_u32::<BigEndian>()?,
            reserved: r.read_u32::<BigEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.name_offset)?;
        w.write_u32::<BigEndian>(self.name_size)?;
        w.write_u64::<BigEndian>(self.data_offset)?;
        w.write_u64::<BigEndian>(self.data_size)?;
        w.write_u32::<BigEndian>(self.flags)?;
        w.write_u32::<BigEndian>(self.reserved)
    }

    /// Flags as typed BitFlags; unknown bits are dropped.
    #[must_use]
    pub fn flags_bits(&self) -> BitFlags<PkgFileFlag> {
        BitFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub const fn is_directory(&self) -> bool {
        self.flags & PkgFileFlag::Directory as u32 != 0
    }

    /// Whether the file's data starts with an NPD license header.
    #[inline]
    pub const fn is_protected(&self) -> bool {
        self.flags & (PkgFileFlag::Npdrm as u32 | PkgFileFlag::Edat as u32) != 0
    }
}

impl fmt::Display for PkgFileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PkgEntry(name_off={:#x}, name_sz={}, data_off={:#x}, \
             data_sz={}, flags={:#010x})",
            self.name_offset, self.name_size, self.data_offset, self.data_size, self.flags,
        )
    }
}

// ---------------------------------------------------------------------------
// Resolved entry (with decoded name)
// ---------------------------------------------------------------------------

/// A fully-resolved file entry with its decoded name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgItem {
    /// Index of this item in the table.
    pub index: u32,
    /// Decoded file/directory name.
    pub name: String,
    /// Raw entry from the item table.
    pub entry: PkgFileEntry,
}

impl fmt::Display for PkgItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.entry.is_directory() {
            "dir"
        } else {
            "file"
        };
        write!(
            f,
            "PkgItem(#{}, \"{}\", {}, size={}, flags={:?})",
            self.index,
            self.name,
            kind,
            self.entry.data_size,
            self.entry.flags_bits(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PkgHeader {
        PkgHeader {
            magic: PKG_MAGIC,
            revision: PKG_REVISION_RETAIL,
            package_type: PKG_TYPE_PS3,
            metadata_offset: PKG_METADATA_OFFSET,
            metadata_count: 2,
            metadata_size: 0x58,
            item_count: 3,
            total_size: 0x1234,
            data_offset: 0x118,
            data_size: 0x100,
            content_id: pad_bytes(b"TEST00000_00-SAMPLE000000000"),
            debug_digest: [0u8; 16],
            iv: PKG_DEFAULT_IV,
        }
    }

    #[test]
    fn header_layout_is_big_endian_and_fixed() {
        let raw = sample_header().to_bytes();
        assert_eq!(&raw[0x00..0x04], &[0x7F, 0x50, 0x4B, 0x47]);
        assert_eq!(&raw[0x04..0x06], &[0x80, 0x00]);
        assert_eq!(&raw[0x06..0x08], &[0x00, 0x01]);
        assert_eq!(&raw[0x08..0x0C], &[0x00, 0x00, 0x00, 0xC0]);
        assert_eq!(&raw[0x14..0x18], &[0x00, 0x00, 0x00, 0x03]);
        assert_eq!(&raw[0x30..0x34], b"TEST");
        assert_eq!(raw[0x30 + 28], 0);
        assert_eq!(&raw[0x70..0x80], &PKG_DEFAULT_IV);

        let parsed = PkgHeader::parse(&raw).unwrap();
        assert_eq!(parsed, sample_header());
        assert_eq!(parsed.content_id_str(), "TEST00000_00-SAMPLE000000000");
    }

    #[test]
    fn header_checks_magic_then_revision_then_type() {
        let mut raw = sample_header().to_bytes();
        raw[0] = 0x00;
        raw[4] = 0x00;
        assert!(matches!(
            PkgHeader::parse(&raw),
            Err(PkgError::InvalidMagic(0x0050_4B47))
        ));

        let mut raw = sample_header().to_bytes();
        raw[4] = 0x00;
        raw[7] = 0x02;
        assert!(matches!(
            PkgHeader::parse(&raw),
            Err(PkgError::UnsupportedRevision(0x0000))
        ));

        let mut raw = sample_header().to_bytes();
        raw[7] = 0x02;
        assert!(matches!(
            PkgHeader::parse(&raw),
            Err(PkgError::UnsupportedType(0x0002))
        ));
    }

    #[test]
    fn truncated_header_is_too_small() {
        let raw = sample_header().to_bytes();
        let mut short = &raw[..0x40];
        let err = PkgHeader::read_from(&mut short).unwrap_err();
        assert!(matches!(err, PkgError::FileTooSmall));
        assert!(err.is_format_error());
    }

    #[test]
    fn metadata_set_replaces_first_of_type() {
        let mut meta = PkgMetadata::new();
        meta.push(PkgMetadataEntry::from_u32(PkgMetadataType::DrmType, 3));
        meta.push(PkgMetadataEntry::from_u32(PkgMetadataType::ContentType, 5));
        meta.set(PkgMetadataEntry::from_u32(PkgMetadataType::DrmType, 2));
        meta.set(PkgMetadataEntry::from_u64(PkgMetadataType::PackageSize, 99));

        assert_eq!(meta.len(), 3);
        assert_eq!(meta.entries()[0].as_u32(), Some(2));
        assert_eq!(meta.drm_type_enum(), Some(Ok(PkgDrmType::Local)));
        assert_eq!(meta.content_type_enum(), Some(Ok(PkgContentType::GameExec)));
        assert_eq!(meta.package_size(), Some(99));
        assert_eq!(meta.byte_len(), 12 + 12 + 16);
    }

    #[test]
    fn metadata_keeps_unknown_types() {
        let mut buf = Vec::new();
        PkgMetadataEntry {
            entry_type: 0x42,
            data: vec![1, 2, 3],
        }
        .write_to(&mut buf)
        .unwrap();
        PkgMetadataEntry::from_u32(PkgMetadataType::PackageType, 0x0802)
            .write_to(&mut buf)
            .unwrap();

        let size = (buf.len() + PKG_DIGEST_SIZE) as u32;
        let meta = PkgMetadata::read_from(&mut buf.as_slice(), 2, size).unwrap();
        assert_eq!(meta.entries()[0].kind(), Err(0x42));
        assert_eq!(meta.entries()[0].data, vec![1, 2, 3]);
        assert_eq!(
            meta.package_flags(),
            Some(PkgFlag::Eboot | PkgFlag::DiscBinded)
        );
    }

    #[test]
    fn metadata_length_is_bounded_by_region() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&0x1000u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        let size = (buf.len() + PKG_DIGEST_SIZE) as u32;
        let err = PkgMetadata::read_from(&mut buf.as_slice(), 1, size).unwrap_err();
        assert!(matches!(err, PkgError::MetadataOverflow));

        // count claims more entries than fit
        let err = PkgMetadata::read_from(&mut buf.as_slice(), 1, 0x40).unwrap_err();
        assert!(matches!(err, PkgError::MetadataOverflow));
    }

    #[test]
    fn install_directory_skips_reserved_prefix() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&pad_bytes::<0x20>(b"NPUB12345"));
        let mut meta = PkgMetadata::new();
        meta.push(PkgMetadataEntry::new(PkgMetadataType::InstallDirectory, data));
        assert_eq!(meta.install_directory(), Some("NPUB12345"));
    }

    #[test]
    fn file_entry_flags() {
        let entry = PkgFileEntry {
            name_offset: 0x60,
            name_size: 3,
            data_offset: 0x80,
            data_size: 0,
            flags: 0x8000_0004,
            reserved: 0,
        };
        assert!(entry.is_directory());
        assert!(!entry.is_protected());
        assert_eq!(
            entry.flags_bits(),
            PkgFileFlag::Directory | PkgFileFlag::Overwrite
        );

        let mut raw = Vec::new();
        entry.write_to(&mut raw).unwrap();
        assert_eq!(raw.len(), PKG_FILE_ENTRY_SIZE);
        assert_eq!(PkgFileEntry::read_from(&mut raw.as_slice()).unwrap(), entry);
    }

    #[test]
    fn alignment_helper() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 16);
        assert_eq!(align_up(16), 16);
        assert_eq!(align_up(17), 32);
    }
}
