//! PS3 retail PKG reader.
//!
//! Parses the header, the metadata list and both of their digests, then
//! gives access to the item table, names and file data through a
//! [`CtrStream`] over the encrypted body. Every lookup seeks the body to an
//! explicit offset, so item iteration, name lookups and data reads never
//! depend on where a previous read left the cursor.
//!
//! Digest mismatches are logged and exposed through [`DigestCheck`]; they
//! never stop the archive from opening.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use super::digest::{DigestCheck, validate_digest};
use super::path::{base_name, safe_join};
use super::structs::*;
use crate::crypto::{CtrStream, Sha1Writer};
use crate::error::{NpdError, PkgError};
use crate::keys::{PkgKeys, RETAIL_KEYS};
use crate::npdrm::NpdHeader;
use crate::options::{DEFAULT_CHUNK_SIZE, ExtractOptions};

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Streaming PS3 retail PKG reader.
///
/// ```ignore
/// let mut pkg = PkgArchive::open(file)?;
/// assert!(pkg.header_digest_check().is_intact());
///
/// for item in pkg.items() {
///     let item = item?;
///     println!("{item}");
/// }
///
/// let data = pkg.read_item_data(1)?;
/// ```
pub struct PkgArchive<R: Read + Seek> {
    inner: R,
    keys: PkgKeys,
    header: PkgHeader,
    header_digest: [u8; PKG_DIGEST_SIZE],
    header_check: DigestCheck,
    metadata: PkgMetadata,
    metadata_digest: [u8; PKG_DIGEST_SIZE],
    metadata_check: DigestCheck,
    file_size: u64,
}

impl<R: Read + Seek> PkgArchive<R> {
    /// Open a retail package using the retail key table.
    pub fn open(inner: R) -> Result<Self, PkgError> {
        Self::open_with_keys(inner, &RETAIL_KEYS)
    }

    /// Open a package, parsing the header, metadata and both digests.
    ///
    /// This does **not** read the item table yet; call [`Self::items`] or
    /// [`Self::read_items`] for that.
    pub fn open_with_keys(mut inner: R, keys: &PkgKeys) -> Result<Self, PkgError> {
        let file_size = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;

        if file_size < u64::from(PKG_METADATA_OFFSET) {
            return Err(PkgError::FileTooSmall);
        }

        // ---- header (0x00) + digest (0x80) ----
        let mut raw_header = [0u8; PKG_HEADER_SIZE];
        inner.read_exact(&mut raw_header)?;
        let header = PkgHeader::parse(&raw_header)?;

        let mut header_digest = [0u8; PKG_DIGEST_SIZE];
        inner.read_exact(&mut header_digest)?;
        let header_check = validate_digest(keys, &raw_header, &header_digest);
        debug!(%header, ?header_check, "parsed PKG header");
        if !header_check.is_intact() {
            warn!(?header_check, "PKG header digest does not match");
        }

        // ---- metadata ----
        let metadata_end = u64::from(header.metadata_offset) + u64::from(header.metadata_size);
        if metadata_end > file_size || (header.metadata_size as usize) < PKG_DIGEST_SIZE {
            return Err(PkgError::MetadataOverflow);
        }

        inner.seek(SeekFrom::Start(u64::from(header.metadata_offset)))?;
        let mut raw_metadata = vec![0u8; header.metadata_size as usize];
        inner.read_exact(&mut raw_metadata)?;

        let (entries, digest) = raw_metadata.split_at(raw_metadata.len() - PKG_DIGEST_SIZE);
        let mut metadata_digest = [0u8; PKG_DIGEST_SIZE];
        metadata_digest.copy_from_slice(digest);

        let metadata = PkgMetadata::read_from(
            &mut &raw_metadata[..],
            header.metadata_count,
            header.metadata_size,
        )?;
        let metadata_check = validate_digest(keys, entries, &metadata_digest);
        debug!(
            count = metadata.len(),
            size = header.metadata_size,
            ?metadata_check,
            "parsed PKG metadata"
        );
        if !metadata_check.is_intact() {
            warn!(?metadata_check, "PKG metadata digest does not match");
        }

        // ---- body bounds ----
        let data_end = header
            .data_offset
            .checked_add(header.data_size)
            .ok_or(PkgError::DataOutOfBounds)?;
        if data_end > file_size || header.data_offset < metadata_end {
            return Err(PkgError::DataOutOfBounds);
        }
        let table_size = u64::from(header.item_count) * PKG_FILE_ENTRY_SIZE as u64;
        if table_size > header.data_size {
            return Err(PkgError::DataOutOfBounds);
        }

        Ok(Self {
            inner,
            keys: *keys,
            header,
            header_digest,
            header_check,
            metadata,
            metadata_digest,
            metadata_check,
            file_size,
        })
    }

    // -- accessors ----------------------------------------------------------

    /// Reference to the parsed header.
    pub const fn header(&self) -> &PkgHeader {
        &self.header
    }

    /// Reference to the parsed metadata list.
    pub const fn metadata(&self) -> &PkgMetadata {
        &self.metadata
    }

    pub const fn header_digest(&self) -> &[u8; PKG_DIGEST_SIZE] {
        &self.header_digest
    }

    pub const fn metadata_digest(&self) -> &[u8; PKG_DIGEST_SIZE] {
        &self.metadata_digest
    }

    /// Result of checking the header digest.
    pub const fn header_digest_check(&self) -> DigestCheck {
        self.header_check
    }

    /// Result of checking the metadata digest.
    pub const fn metadata_digest_check(&self) -> DigestCheck {
        self.metadata_check
    }

    /// Number of file items declared in the header.
    pub const fn item_count(&self) -> u32 {
        self.header.item_count
    }

    pub const fn keys(&self) -> &PkgKeys {
        &self.keys
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    // -- item table ---------------------------------------------------------

    /// Read a single raw [`PkgFileEntry`] by index from the item table.
    pub fn read_file_entry(&mut self, index: usize) -> Result<PkgFileEntry, PkgError> {
        if index >= self.header.item_count as usize {
            return Err(PkgError::EntryIndex(index));
        }

        let mut body = self.body()?;
        body.seek(SeekFrom::Start((index * PKG_FILE_ENTRY_SIZE) as u64))?;
        let entry = PkgFileEntry::read_from(&mut body)?;

        self.check_entry(index, &entry)?;
        Ok(entry)
    }

    /// Read the name of the entry at `index`.
    pub fn read_entry_name(
        &mut self,
        index: usize,
        entry: &PkgFileEntry,
    ) -> Result<String, PkgError> {
        let mut body = self.body()?;
        body.seek(SeekFrom::Start(u64::from(entry.name_offset)))?;
        let mut buf = vec![0u8; entry.name_size as usize];
        body.read_exact(&mut buf)?;

        while buf.last() == Some(&0) {
            buf.pop();
        }
        String::from_utf8(buf).map_err(|_| PkgError::InvalidEntryName(index))
    }

    /// Iterate over items lazily.
    ///
    /// ```ignore
    /// for item in pkg.items() {
    ///     let item = item?;
    ///     println!("{}", item.name);
    /// }
    /// ```
    pub fn items(&mut self) -> Items<'_, R> {
        Items::new(self)
    }

    /// Resolve all items into a `Vec<PkgItem>`.
    pub fn read_items(&mut self) -> Result<Vec<PkgItem>, PkgError> {
        self.items().collect()
    }

    // -- file data ----------------------------------------------------------

    /// Read the data of an item by index.
    pub fn read_item_data(&mut self, index: usize) -> Result<Vec<u8>, PkgError> {
        let mut reader = self.item_reader(index)?;
        let mut out = Vec::with_capacity(reader.remaining() as usize);
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Streaming reader over a single item's decrypted data.
    ///
    /// It borrows `&mut self` so the archive cannot be used while the
    /// reader is active.
    pub fn item_reader(&mut self, index: usize) -> Result<PkgItemReader<'_, R>, PkgError> {
        let entry = self.read_file_entry(index)?;
        if entry.is_directory() {
            return Err(PkgError::IsDirectory(index));
        }

        let mut body = self.body()?;
        body.seek(SeekFrom::Start(entry.data_offset))?;
        Ok(PkgItemReader {
            data: body.take(entry.data_size),
            entry,
        })
    }

    /// Copy an item's data into `sink` in chunks of `chunk_size` bytes.
    /// Returns the number of bytes copied.
    pub fn extract_item<W: Write>(
        &mut self,
        index: usize,
        sink: &mut W,
        chunk_size: usize,
    ) -> Result<u64, PkgError> {
        let mut reader = self.item_reader(index)?;
        let expected = reader.remaining();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };

        let mut buf = vec![0u8; chunk_size];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])?;
            copied += n as u64;
        }

        if copied != expected {
            return Err(PkgError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "item data ends early",
            )));
        }
        Ok(copied)
    }

    /// Extract every item below `dir`.
    ///
    /// Directories are created, files are written with their exact size.
    /// Names that would escape `dir` fail with [`PkgError::UnsafePath`].
    /// When `options.klicensee` is set, protected files have their NPD
    /// header checked and failures are logged.
    pub fn extract_all(
        &mut self,
        dir: &Path,
        options: &ExtractOptions,
    ) -> Result<Vec<PkgItem>, PkgError> {
        let items = self.read_items()?;
        fs::create_dir_all(dir)?;

        for item in &items {
            let index = item.index as usize;
            let target = safe_join(dir, &item.name)?;

            if item.entry.is_directory() {
                fs::create_dir_all(&target)?;
                info!(name = %item.name, "created directory");
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            if let Some(klicensee) = options.klicensee.as_ref() {
                if item.entry.is_protected() {
                    match self.verify_npd(index, klicensee) {
                        Ok(true) => debug!(name = %item.name, "NPD header valid"),
                        Ok(false) => {
                            warn!(name = %item.name, "NPD header does not match klicensee");
                        }
                        Err(e) => {
                            warn!(name = %item.name, error = %e, "could not read NPD header");
                        }
                    }
                }
            }

            let file = if options.overwrite {
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&target)?
            } else {
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&target)?
            };
            let mut out = BufWriter::new(file);
            let written = self.extract_item(index, &mut out, options.chunk_size)?;
            out.flush()?;

            info!(name = %item.name, size = written, "extracted file");
        }

        Ok(items)
    }

    // -- NPD ----------------------------------------------------------------

    /// Parse the NPD header at the start of an item's data.
    pub fn read_npd_header(&mut self, index: usize) -> Result<NpdHeader, PkgError> {
        let mut reader = self.item_reader(index)?;
        if reader.remaining() < NpdHeader::SIZE as u64 {
            return Err(PkgError::Npd(NpdError::BufferTooSmall {
                needed: NpdHeader::SIZE,
                available: reader.remaining() as usize,
            }));
        }

        let mut buf = [0u8; NpdHeader::SIZE];
        reader.read_exact(&mut buf)?;
        let npd = NpdHeader::parse(&buf)?;
        npd.validate()?;
        Ok(npd)
    }

    /// Check an item's NPD header against `klicensee`, using the item's
    /// base file name.
    pub fn verify_npd(&mut self, index: usize, klicensee: &[u8; 16]) -> Result<bool, PkgError> {
        let entry = self.read_file_entry(index)?;
        let name = self.read_entry_name(index, &entry)?;
        let npd = self.read_npd_header(index)?;
        Ok(npd.is_header_valid(&self.keys, klicensee, base_name(&name)))
    }

    // -- footer -------------------------------------------------------------

    /// Check the trailing SHA-1 against every byte before it.
    ///
    /// Returns `Ok(false)` when the footer is missing or does not match.
    pub fn verify_footer(&mut self) -> Result<bool, PkgError> {
        let hashed_len = self.header.data_end() + PKG_DIGEST_SIZE as u64;
        if hashed_len + 20 > self.file_size {
            return Ok(false);
        }

        self.inner.seek(SeekFrom::Start(0))?;
        let mut hasher = Sha1Writer::new(io::sink());
        io::copy(&mut (&mut self.inner).take(hashed_len), &mut hasher)?;

        let mut stored = [0u8; 20];
        self.inner.read_exact(&mut stored)?;
        let ok = stored == hasher.digest();
        if !ok {
            warn!("PKG footer hash does not match");
        }
        Ok(ok)
    }

    // -- internal helpers ---------------------------------------------------

    /// Decrypting view of the body, positioned at body offset zero.
    fn body(&mut self) -> io::Result<CtrStream<&mut R>> {
        self.inner.seek(SeekFrom::Start(self.header.data_offset))?;
        CtrStream::open(
            &mut self.inner,
            &self.keys.pkg_aes,
            &self.header.iv,
            self.header.data_size,
        )
    }

    fn check_entry(&self, index: usize, entry: &PkgFileEntry) -> Result<(), PkgError> {
        let size = self.header.data_size;

        let name_end = u64::from(entry.name_offset) + u64::from(entry.name_size);
        if name_end > size {
            return Err(PkgError::EntryOutOfBounds(index));
        }

        if !entry.is_directory() {
            let data_end = entry
                .data_offset
                .checked_add(entry.data_size)
                .ok_or(PkgError::EntryOutOfBounds(index))?;
            if data_end > size {
                return Err(PkgError::EntryOutOfBounds(index));
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------
// Iterators / streaming readers
// -----------------------------------------------------------------------

/// Iterator over `PkgItem`s that borrows the archive.
pub struct Items<'a, R: Read + Seek> {
    archive: &'a mut PkgArchive<R>,
    idx: usize,
    total: usize,
}

impl<'a, R: Read + Seek> Items<'a, R> {
    fn new(archive: &'a mut PkgArchive<R>) -> Self {
        let total = archive.header.item_count as usize;
        Self {
            archive,
            idx: 0,
            total,
        }
    }

    fn resolve(&mut self, index: usize) -> Result<PkgItem, PkgError> {
        let entry = self.archive.read_file_entry(index)?;
        let name = self.archive.read_entry_name(index, &entry)?;
        Ok(PkgItem {
            index: index as u32,
            name,
            entry,
        })
    }
}

impl<'a, R: Read + Seek> Iterator for Items<'a, R> {
    type Item = Result<PkgItem, PkgError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.total {
            return None;
        }

        let i = self.idx;
        self.idx += 1;
        Some(self.resolve(i))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.idx;
        (left, Some(left))
    }
}

/// Streaming reader over one item's decrypted data.
///
/// Borrows `&mut PkgArchive` so no other archive operations may run while
/// the reader is alive.
pub struct PkgItemReader<'a, R: Read + Seek> {
    data: io::Take<CtrStream<&'a mut R>>,
    entry: PkgFileEntry,
}

impl<'a, R: Read + Seek> PkgItemReader<'a, R> {
    pub const fn entry(&self) -> &PkgFileEntry {
        &self.entry
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.data.limit()
    }
}

impl<'a, R: Read + Seek> Read for PkgItemReader<'a, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.data.read(out)
    }
}
