//! PS3 retail PKG writer.
//!
//! Output is produced in one forward pass and only needs [`Write`]:
//!
//! 1. layout: every name and data offset is computed up front;
//! 2. header + digest;
//! 3. metadata + digest;
//! 4. body through a [`CtrStream`]: item table, padded names, padded data;
//! 5. filler digest;
//! 6. SHA-1 of everything so far, then 12 zero bytes.
//!
//! # Example
//!
//! ```ignore
//! use hdk_pkg::pkg::{PkgBuilder, PkgContentType, PkgDrmType};
//!
//! let header = PkgBuilder::new()
//!     .content_id("UP0001-TEST00001_00-0000000000000000")
//!     .drm_type(PkgDrmType::Free)
//!     .content_type(PkgContentType::GameExec)
//!     .add_directory("USRDIR")
//!     .add_file("USRDIR/EBOOT.BIN", eboot_data)
//!     .write(output_file)?;
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::PathBuf;

use enumflags2::BitFlags;
use tracing::debug;

use super::digest::generate_digest;
use super::reader::PkgArchive;
use super::structs::*;
use crate::crypto::{CtrStream, Sha1Writer};
use crate::error::{PkgError, PkgWriteError};
use crate::keys::{PkgKeys, RETAIL_KEYS};

/// Buffer size used when copying file sources into the body.
const WRITE_CHUNK_SIZE: usize = 0x4000;

/// Maximum length of the install directory name.
const INSTALL_DIR_SIZE: usize = 0x20;

// ---------------------------------------------------------------------------
// Builder Item
// ---------------------------------------------------------------------------

enum ItemSource {
    Directory,
    Bytes(Vec<u8>),
    Path(PathBuf),
    Reader(Box<dyn Read>, u64),
}

impl fmt::Debug for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "Directory"),
            Self::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
            Self::Path(path) => write!(f, "Path({})", path.display()),
            Self::Reader(_, size) => write!(f, "Reader({size} bytes)"),
        }
    }
}

/// An item (file or directory) to be written to the PKG.
#[derive(Debug)]
struct BuilderItem {
    name: String,
    flags: u32,
    source: ItemSource,
}

impl BuilderItem {
    const fn is_directory(&self) -> bool {
        matches!(self.source, ItemSource::Directory)
    }

    /// Declared size of the item's data; touches the filesystem for paths.
    fn data_size(&self) -> io::Result<u64> {
        match &self.source {
            ItemSource::Directory => Ok(0),
            ItemSource::Bytes(data) => Ok(data.len() as u64),
            ItemSource::Path(path) => Ok(std::fs::metadata(path)?.len()),
            ItemSource::Reader(_, size) => Ok(*size),
        }
    }
}

/// Body layout computed before anything is written.
#[derive(Debug)]
struct Layout {
    entries: Vec<PkgFileEntry>,
    names_size: u64,
    data_size: u64,
}

// ---------------------------------------------------------------------------
// PKG Builder
// ---------------------------------------------------------------------------

/// Builder for constructing a PS3 retail PKG archive.
#[derive(Debug)]
pub struct PkgBuilder {
    keys: PkgKeys,
    content_id: String,
    iv: [u8; 16],
    debug_digest: [u8; 16],
    metadata: PkgMetadata,
    install_directory: Option<String>,
    items: Vec<BuilderItem>,
}

impl Default for PkgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PkgBuilder {
    /// Create a new PKG builder.
    ///
    /// Default configuration:
    /// - Keys: [`RETAIL_KEYS`]
    /// - Content ID: empty
    /// - IV: [`PKG_DEFAULT_IV`]
    /// - Debug digest zeroed, no metadata, no items
    pub fn new() -> Self {
        Self {
            keys: RETAIL_KEYS,
            content_id: String::new(),
            iv: PKG_DEFAULT_IV,
            debug_digest: [0u8; 16],
            metadata: PkgMetadata::new(),
            install_directory: None,
            items: Vec::new(),
        }
    }

    /// Seed a builder from an existing package: content ID, IV, debug
    /// digest, metadata and every item with its flags. File data is read
    /// into memory.
    pub fn from_archive<R: Read + Seek>(archive: &mut PkgArchive<R>) -> Result<Self, PkgError> {
        let header = archive.header().clone();
        let mut builder = Self {
            keys: *archive.keys(),
            content_id: header.content_id_str().to_string(),
            iv: header.iv,
            debug_digest: header.debug_digest,
            metadata: archive.metadata().clone(),
            ..Self::new()
        };

        for item in archive.read_items()? {
            let source = if item.entry.is_directory() {
                ItemSource::Directory
            } else {
                ItemSource::Bytes(archive.read_item_data(item.index as usize)?)
            };
            builder.items.push(BuilderItem {
                name: item.name,
                flags: item.entry.flags,
                source,
            });
        }

        Ok(builder)
    }

    // -- Configuration methods ----------------------------------------------

    /// Use a different key table.
    pub const fn keys(mut self, keys: PkgKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Set the content ID (max 48 bytes, will be NUL-padded).
    pub fn content_id(mut self, id: &str) -> Self {
        self.content_id = id.to_string();
        self
    }

    /// Set the IV (AES-CTR initial counter).
    pub const fn iv(mut self, iv: [u8; 16]) -> Self {
        self.iv = iv;
        self
    }

    pub const fn debug_digest(mut self, digest: [u8; 16]) -> Self {
        self.debug_digest = digest;
        self
    }

    /// Set the DRM type.
    pub fn drm_type(mut self, drm: PkgDrmType) -> Self {
        self.metadata
            .set(PkgMetadataEntry::from_u32(PkgMetadataType::DrmType, drm.into()));
        self
    }

    /// Set the content type.
    pub fn content_type(mut self, ct: PkgContentType) -> Self {
        self.metadata.set(PkgMetadataEntry::from_u32(
            PkgMetadataType::ContentType,
            ct.into(),
        ));
        self
    }

    /// Set the package flags.
    pub fn package_flags(mut self, flags: BitFlags<PkgFlag>) -> Self {
        self.metadata.set(PkgMetadataEntry::from_u32(
            PkgMetadataType::PackageType,
            flags.bits(),
        ));
        self
    }

    /// Set the declared package size.
    pub fn package_size(mut self, size: u64) -> Self {
        self.metadata
            .set(PkgMetadataEntry::from_u64(PkgMetadataType::PackageSize, size));
        self
    }

    /// Set the package version; `revision` is the tool revision stored
    /// before it.
    pub fn package_version(mut self, revision: u16, version: u16) -> Self {
        let mut data = revision.to_be_bytes().to_vec();
        data.extend_from_slice(&version.to_be_bytes());
        self.metadata
            .set(PkgMetadataEntry::new(PkgMetadataType::PackageVersion, data));
        self
    }

    /// Set the install directory (max 32 bytes, will be NUL-padded).
    pub fn install_directory(mut self, dir: &str) -> Self {
        self.install_directory = Some(dir.to_string());
        self
    }

    /// Append a raw metadata entry.
    pub fn metadata(mut self, entry: PkgMetadataEntry) -> Self {
        self.metadata.push(entry);
        self
    }

    // -- Item addition ------------------------------------------------------

    /// Add a directory to the package.
    pub fn add_directory(mut self, name: &str) -> Self {
        self.items.push(BuilderItem {
            name: name.to_string(),
            flags: (PkgFileFlag::Directory | PkgFileFlag::Overwrite).bits(),
            source: ItemSource::Directory,
        });
        self
    }

    /// Add a file held in memory.
    pub fn add_file(self, name: &str, data: Vec<u8>) -> Self {
        self.add_file_with_flags(name, data, PkgFileFlag::Overwrite.into())
    }

    /// Add a file held in memory with explicit entry flags.
    pub fn add_file_with_flags(
        mut self,
        name: &str,
        data: Vec<u8>,
        flags: BitFlags<PkgFileFlag>,
    ) -> Self {
        self.items.push(BuilderItem {
            name: name.to_string(),
            flags: flags.bits(),
            source: ItemSource::Bytes(data),
        });
        self
    }

    /// Add a file streamed from disk at write time.
    pub fn add_file_from_path(self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.add_file_from_path_with_flags(name, path, PkgFileFlag::Overwrite.into())
    }

    pub fn add_file_from_path_with_flags(
        mut self,
        name: &str,
        path: impl Into<PathBuf>,
        flags: BitFlags<PkgFileFlag>,
    ) -> Self {
        self.items.push(BuilderItem {
            name: name.to_string(),
            flags: flags.bits(),
            source: ItemSource::Path(path.into()),
        });
        self
    }

    /// Add a file read from `reader` at write time. Exactly `size` bytes
    /// are copied; a reader that ends early fails the write.
    pub fn add_file_from_reader(
        self,
        name: &str,
        reader: impl Read + 'static,
        size: u64,
    ) -> Self {
        self.add_file_from_reader_with_flags(name, reader, size, PkgFileFlag::Overwrite.into())
    }

    pub fn add_file_from_reader_with_flags(
        mut self,
        name: &str,
        reader: impl Read + 'static,
        size: u64,
        flags: BitFlags<PkgFileFlag>,
    ) -> Self {
        self.items.push(BuilderItem {
            name: name.to_string(),
            flags: flags.bits(),
            source: ItemSource::Reader(Box::new(reader), size),
        });
        self
    }

    // -- Writing ------------------------------------------------------------

    /// Write the complete PKG to `writer` and return the header that was
    /// written.
    pub fn write<W: Write>(mut self, writer: W) -> Result<PkgHeader, PkgWriteError> {
        // ---- 1. validate and lay out ----
        if self.content_id.len() > PKG_CONTENT_ID_SIZE {
            return Err(PkgWriteError::ContentIdTooLong(self.content_id));
        }
        if let Some(dir) = self.install_directory.take() {
            if dir.len() > INSTALL_DIR_SIZE {
                return Err(PkgWriteError::InstallDirTooLong(dir));
            }
            let mut data = vec![0u8; 8];
            data.extend_from_slice(&pad_bytes::<INSTALL_DIR_SIZE>(dir.as_bytes()));
            self.metadata
                .set(PkgMetadataEntry::new(PkgMetadataType::InstallDirectory, data));
        }

        let layout = self.layout()?;

        let metadata_size = u32::try_from(self.metadata.byte_len() + PKG_DIGEST_SIZE)
            .map_err(|_| PkgWriteError::DataOverflow)?;
        let data_offset = u64::from(PKG_METADATA_OFFSET) + u64::from(metadata_size);
        let total_size = data_offset
            .checked_add(layout.data_size)
            .and_then(|n| n.checked_add((PKG_DIGEST_SIZE + PKG_FOOTER_SIZE) as u64))
            .ok_or(PkgWriteError::DataOverflow)?;

        let header = PkgHeader {
            magic: PKG_MAGIC,
            revision: PKG_REVISION_RETAIL,
            package_type: PKG_TYPE_PS3,
            metadata_offset: PKG_METADATA_OFFSET,
            metadata_count: self.metadata.len() as u32,
            metadata_size,
            item_count: self.items.len() as u32,
            total_size,
            data_offset,
            data_size: layout.data_size,
            content_id: pad_bytes::<PKG_CONTENT_ID_SIZE>(self.content_id.as_bytes()),
            debug_digest: self.debug_digest,
            iv: self.iv,
        };
        debug!(
            %header,
            names_size = layout.names_size,
            "computed PKG layout"
        );

        let mut out = Sha1Writer::new(writer);

        // ---- 2. header + digest ----
        let raw_header = header.to_bytes();
        out.write_all(&raw_header)?;
        out.write_all(&generate_digest(&self.keys, &raw_header))?;

        // ---- 3. metadata + digest ----
        let mut raw_metadata = Vec::with_capacity(metadata_size as usize);
        self.metadata.write_to(&mut raw_metadata)?;
        out.write_all(&raw_metadata)?;
        out.write_all(&generate_digest(&self.keys, &raw_metadata))?;

        // ---- 4. encrypted body ----
        {
            let mut body = CtrStream::new(&mut out, &self.keys.pkg_aes, &self.iv)
                .with_length(layout.data_size);

            let mut table = Vec::with_capacity(self.items.len() * PKG_FILE_ENTRY_SIZE);
            for entry in &layout.entries {
                entry.write_to(&mut table)?;
            }
            body.write_all(&table)?;

            for item in &self.items {
                body.write_all(item.name.as_bytes())?;
                write_padding(&mut body, item.name.len() as u64)?;
            }

            for (item, entry) in self.items.iter_mut().zip(&layout.entries) {
                if item.is_directory() {
                    continue;
                }
                let size = entry.data_size;
                debug!(
                    name = %item.name,
                    offset = entry.data_offset,
                    size,
                    "writing PKG item"
                );
                write_item_data(&mut item.source, &mut body, size)?;
                write_padding(&mut body, size)?;
            }

            debug_assert_eq!(body.position(), layout.data_size);
        }

        // ---- 5. filler digest ----
        out.write_all(&generate_digest(&self.keys, &[0u8; 16]))?;

        // ---- 6. footer ----
        let hash = out.digest();
        let mut writer = out.into_inner();
        writer.write_all(&hash)?;
        writer.write_all(&[0u8; PKG_FOOTER_SIZE - 20])?;
        writer.flush()?;

        Ok(header)
    }

    /// Write into a fresh buffer.
    pub fn write_to_vec(self) -> Result<Vec<u8>, PkgWriteError> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    // -- Internal helpers ---------------------------------------------------

    /// Compute every entry's offsets. Names and file data are each padded
    /// to 16 bytes; directories take no data space and point at the running
    /// data cursor.
    fn layout(&self) -> Result<Layout, PkgWriteError> {
        let table_size = (self.items.len() as u64)
            .checked_mul(PKG_FILE_ENTRY_SIZE as u64)
            .ok_or(PkgWriteError::DataOverflow)?;

        let mut names_size = 0u64;
        for item in &self.items {
            if item.name.is_empty() {
                return Err(PkgWriteError::EntryNameEmpty);
            }
            names_size = names_size
                .checked_add(align_up(item.name.len() as u64))
                .ok_or(PkgWriteError::DataOverflow)?;
        }

        let data_start = table_size
            .checked_add(names_size)
            .ok_or(PkgWriteError::DataOverflow)?;

        let mut entries = Vec::with_capacity(self.items.len());
        let mut name_cursor = table_size;
        let mut data_cursor = data_start;

        for item in &self.items {
            let size = item.data_size()?;
            let name_offset =
                u32::try_from(name_cursor).map_err(|_| PkgWriteError::DataOverflow)?;
            let name_size =
                u32::try_from(item.name.len()).map_err(|_| PkgWriteError::DataOverflow)?;

            entries.push(PkgFileEntry {
                name_offset,
                name_size,
                data_offset: data_cursor,
                data_size: size,
                flags: item.flags,
                reserved: 0,
            });

            name_cursor += align_up(item.name.len() as u64);
            if !item.is_directory() {
                data_cursor = data_cursor
                    .checked_add(size)
                    .map(align_up)
                    .ok_or(PkgWriteError::DataOverflow)?;
            }
        }

        Ok(Layout {
            entries,
            names_size,
            data_size: data_cursor,
        })
    }
}

/// Zero bytes that bring `len` up to the next 16-byte boundary.
fn write_padding<W: Write>(w: &mut W, len: u64) -> io::Result<()> {
    let pad = (align_up(len) - len) as usize;
    w.write_all(&[0u8; PKG_ALIGNMENT as usize][..pad])
}

fn write_item_data<W: Write>(source: &mut ItemSource, w: &mut W, size: u64) -> io::Result<()> {
    match source {
        ItemSource::Directory => Ok(()),
        ItemSource::Bytes(data) => w.write_all(data),
        ItemSource::Path(path) => copy_exact(&mut File::open(path)?, w, size),
        ItemSource::Reader(reader, _) => copy_exact(reader, w, size),
    }
}

/// Copy exactly `size` bytes in fixed-size chunks.
fn copy_exact<R: Read + ?Sized, W: Write>(r: &mut R, w: &mut W, size: u64) -> io::Result<()> {
    let mut buf = vec![0u8; WRITE_CHUNK_SIZE];
    let mut left = size;
    while left > 0 {
        let want = std::cmp::min(left, WRITE_CHUNK_SIZE as u64) as usize;
        let n = r.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "item source ended before its declared size",
            ));
        }
        w.write_all(&buf[..n])?;
        left -= n as u64;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_offsets_are_running_totals() {
        let builder = PkgBuilder::new()
            .add_file("a.txt", b"hello".to_vec())
            .add_directory("dir")
            .add_file("some/longer/name.bin", vec![0xAB; 20]);
        let layout = builder.layout().unwrap();

        let e = &layout.entries;
        // 3 entries, names padded to 16, 16, 32
        assert_eq!(e[0].name_offset, 0x60);
        assert_eq!(e[1].name_offset, 0x70);
        assert_eq!(e[2].name_offset, 0x80);
        assert_eq!(layout.names_size, 0x40);

        assert_eq!(e[0].data_offset, 0xA0);
        assert_eq!(e[0].data_size, 5);
        assert_eq!(e[1].data_offset, 0xB0);
        assert_eq!(e[1].data_size, 0);
        assert_eq!(e[2].data_offset, 0xB0);
        assert_eq!(e[2].data_size, 20);
        assert_eq!(layout.data_size, 0xD0);
    }

    #[test]
    fn rejects_content_id_too_long() {
        let long_id = "X".repeat(49);
        let result = PkgBuilder::new()
            .content_id(&long_id)
            .write(io::Cursor::new(&mut Vec::new()));

        assert!(matches!(result, Err(PkgWriteError::ContentIdTooLong(_))));
    }

    #[test]
    fn rejects_empty_name() {
        let result = PkgBuilder::new()
            .add_file("", vec![1])
            .write(io::Cursor::new(&mut Vec::new()));

        assert!(matches!(result, Err(PkgWriteError::EntryNameEmpty)));
    }

    #[test]
    fn rejects_install_dir_too_long() {
        let result = PkgBuilder::new()
            .install_directory(&"D".repeat(33))
            .write(io::Cursor::new(&mut Vec::new()));

        assert!(matches!(result, Err(PkgWriteError::InstallDirTooLong(_))));
    }

    #[test]
    fn short_reader_fails_with_unexpected_eof() {
        let result = PkgBuilder::new()
            .add_file_from_reader("short.bin", io::Cursor::new(vec![1u8; 10]), 32)
            .write_to_vec();

        match result {
            Err(PkgWriteError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }

    #[test]
    fn typed_setters_replace_existing_entries() {
        let builder = PkgBuilder::new()
            .drm_type(PkgDrmType::Local)
            .content_type(PkgContentType::GameData)
            .drm_type(PkgDrmType::Free);

        assert_eq!(builder.metadata.len(), 2);
        assert_eq!(builder.metadata.drm_type(), Some(PkgDrmType::Free as u32));
    }

    #[test]
    fn header_sizes_add_up() {
        let header = PkgBuilder::new()
            .content_id("TEST00000_00-SAMPLE000000000")
            .drm_type(PkgDrmType::Free)
            .add_file("x", vec![9; 3])
            .write(io::sink())
            .unwrap();

        assert_eq!(header.metadata_offset, 0xC0);
        assert_eq!(header.metadata_size, 12 + 0x40);
        assert_eq!(header.data_offset, 0xC0 + 12 + 0x40);
        assert_eq!(header.data_size, 0x20 + 0x10 + 0x10);
        assert_eq!(
            header.total_size,
            header.data_offset + header.data_size + 0x40 + 0x20
        );
    }
}
