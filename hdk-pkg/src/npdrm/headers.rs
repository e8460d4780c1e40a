//! NPD header structure, hashing and validation

use binrw::{BinRead, BinWrite};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::crypto::aes_cmac;
use crate::error::NpdError;
use crate::keys::PkgKeys;
use crate::pkg::structs::trim_nul_str;

/// License type stored in [`NpdHeader::drm_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum NpdDrmType {
    Unknown = 0,
    Network = 1,
    Local = 2,
    Free = 3,
}

/// Application type stored in [`NpdHeader::app_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum NpdAppType {
    Module = 0x00,
    Executable = 0x01,
    ModuleDisc = 0x20,
    ExecutableDisc = 0x21,
    ModuleHdd = 0x30,
    ExecutableHdd = 0x31,
}

/// NPD (`PlayStation` Data) header structure
///
/// ```text
/// 0x00  [u8;4]   magic "NPD\0"
/// 0x04  u32      version
/// 0x08  u32      drm_type
/// 0x0C  u32      app_type
/// 0x10  [u8;48]  content_id
/// 0x40  [u8;16]  qa_digest
/// 0x50  [u8;16]  content_id_hash  CMAC(content hash key, content_id ‖ filename)
/// 0x60  [u8;16]  header_hash      CMAC(klicensee ^ xor key, bytes 0x00..0x60)
/// 0x70  u64      limited_time_start
/// 0x78  u64      limited_time_end
/// ```
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[br(big)]
#[bw(big)]
pub struct NpdHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub drm_type: u32,
    pub app_type: u32,
    pub content_id: [u8; 0x30],
    pub qa_digest: [u8; 0x10],
    pub content_id_hash: [u8; 0x10],
    pub header_hash: [u8; 0x10],
    pub limited_time_start: u64,
    pub limited_time_end: u64,
}

impl NpdHeader {
    /// Size of NPD header in bytes
    pub const SIZE: usize = 0x80;

    /// Leading bytes covered by the header hash.
    pub const SIGNED_SIZE: usize = 0x60;

    /// Expected magic number for NPD files
    pub const MAGIC: [u8; 4] = *b"NPD\0";

    /// Header version written by [`NpdHeader::new`].
    pub const VERSION: u32 = 4;

    /// Create an unhashed header. Call [`NpdHeader::hash_header`] before
    /// writing it out.
    #[must_use]
    pub fn new(
        content_id: &str,
        drm_type: NpdDrmType,
        app_type: NpdAppType,
        qa_digest: [u8; 0x10],
    ) -> Self {
        let mut cid = [0u8; 0x30];
        let len = std::cmp::min(content_id.len(), cid.len());
        cid[..len].copy_from_slice(&content_id.as_bytes()[..len]);

        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            drm_type: drm_type.into(),
            app_type: app_type.into(),
            content_id: cid,
            qa_digest,
            content_id_hash: [0u8; 0x10],
            header_hash: [0u8; 0x10],
            limited_time_start: 0,
            limited_time_end: 0,
        }
    }

    /// Parse NPD header from byte buffer
    pub fn parse(buffer: &[u8]) -> Result<Self, NpdError> {
        if buffer.len() < Self::SIZE {
            return Err(NpdError::BufferTooSmall {
                needed: Self::SIZE,
                available: buffer.len(),
            });
        }
        let mut cursor = std::io::Cursor::new(&buffer[..Self::SIZE]);
        Ok(Self::read(&mut cursor)?)
    }

    /// Serialize NPD header to bytes
    ///
    /// # Arguments
    ///
    /// * `buffer` - Buffer to write header to (must be at least SIZE bytes)
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<(), NpdError> {
        if buffer.len() < Self::SIZE {
            return Err(NpdError::BufferTooSmall {
                needed: Self::SIZE,
                available: buffer.len(),
            });
        }
        let mut cursor = std::io::Cursor::new(&mut buffer[..Self::SIZE]);
        self.write(&mut cursor)?;
        Ok(())
    }

    /// Validate NPD header structure and magic numbers
    pub fn validate(&self) -> Result<(), NpdError> {
        if self.magic != Self::MAGIC {
            return Err(NpdError::InvalidMagic {
                expected: Self::MAGIC,
                actual: self.magic,
            });
        }
        Ok(())
    }

    /// Content ID as a `&str`, stripping trailing NULs.
    pub fn content_id_str(&self) -> &str {
        trim_nul_str(&self.content_id)
    }

    /// Attempt to interpret the raw `drm_type` as [`NpdDrmType`].
    pub fn drm_type_enum(&self) -> Result<NpdDrmType, u32> {
        NpdDrmType::try_from(self.drm_type).map_err(|e| e.number)
    }

    /// Attempt to interpret the raw `app_type` as [`NpdAppType`].
    pub fn app_type_enum(&self) -> Result<NpdAppType, u32> {
        NpdAppType::try_from(self.app_type).map_err(|e| e.number)
    }

    /// Fill in both hashes for a file called `filename`.
    pub fn hash_header(&mut self, keys: &PkgKeys, klicensee: &[u8; 16], filename: &str) {
        self.content_id_hash = self.expected_content_id_hash(keys, filename);
        self.header_hash = self.expected_header_hash(keys, klicensee);
    }

    /// Whether both hashes match `klicensee` and `filename`.
    pub fn is_header_valid(&self, keys: &PkgKeys, klicensee: &[u8; 16], filename: &str) -> bool {
        self.content_id_hash == self.expected_content_id_hash(keys, filename)
            && self.header_hash == self.expected_header_hash(keys, klicensee)
    }

    /// Validate against the klicensee shared by DRM-free titles.
    pub fn is_free_header_valid(&self, keys: &PkgKeys, filename: &str) -> bool {
        self.is_header_valid(keys, &keys.npdrm_free_klicensee, filename)
    }

    fn expected_content_id_hash(&self, keys: &PkgKeys, filename: &str) -> [u8; 16] {
        let mut data = Vec::with_capacity(self.content_id.len() + filename.len());
        data.extend_from_slice(&self.content_id);
        data.extend_from_slice(filename.as_bytes());
        aes_cmac(&keys.npdrm_content_hash, &data)
    }

    fn expected_header_hash(&self, keys: &PkgKeys, klicensee: &[u8; 16]) -> [u8; 16] {
        let mut key = [0u8; 16];
        for (k, (a, b)) in key
            .iter_mut()
            .zip(klicensee.iter().zip(keys.npdrm_header_hash_xor.iter()))
        {
            *k = a ^ b;
        }
        aes_cmac(&key, &self.signed_prefix())
    }

    /// Bytes `0x00..0x60`, the part the header hash covers.
    fn signed_prefix(&self) -> [u8; Self::SIGNED_SIZE] {
        let mut out = [0u8; Self::SIGNED_SIZE];
        out[0x00..0x04].copy_from_slice(&self.magic);
        out[0x04..0x08].copy_from_slice(&self.version.to_be_bytes());
        out[0x08..0x0C].copy_from_slice(&self.drm_type.to_be_bytes());
        out[0x0C..0x10].copy_from_slice(&self.app_type.to_be_bytes());
        out[0x10..0x40].copy_from_slice(&self.content_id);
        out[0x40..0x50].copy_from_slice(&self.qa_digest);
        out[0x50..0x60].copy_from_slice(&self.content_id_hash);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::RETAIL_KEYS;

    const CONTENT_ID: &str = "UP0001-TEST00000_00-SAMPLE0000000000";
    const KLIC: [u8; 16] = [
        0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0xFE, 0xDC, 0xBA, 0x98, 0x76, 0x54, 0x32,
        0x10,
    ];

    fn hashed(filename: &str) -> NpdHeader {
        let mut npd = NpdHeader::new(CONTENT_ID, NpdDrmType::Local, NpdAppType::Module, [0x33; 16]);
        npd.hash_header(&RETAIL_KEYS, &KLIC, filename);
        npd
    }

    #[test]
    fn layout_round_trip() {
        let npd = hashed("EBOOT.BIN");
        let mut buf = [0u8; NpdHeader::SIZE];
        npd.serialize(&mut buf).unwrap();

        assert_eq!(&buf[0..4], b"NPD\0");
        assert_eq!(&buf[4..8], &[0, 0, 0, 4]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 2]);
        assert_eq!(&buf[0x10..0x10 + CONTENT_ID.len()], CONTENT_ID.as_bytes());
        assert_eq!(&buf[0x50..0x60], &npd.content_id_hash);
        assert_eq!(&buf[0x60..0x70], &npd.header_hash);
        assert_eq!(&buf[..0x60], &npd.signed_prefix());

        let parsed = NpdHeader::parse(&buf).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed, npd);
        assert_eq!(parsed.content_id_str(), CONTENT_ID);
        assert_eq!(parsed.drm_type_enum(), Ok(NpdDrmType::Local));
        assert_eq!(parsed.app_type_enum(), Ok(NpdAppType::Module));
    }

    #[test]
    fn hashed_header_validates() {
        let npd = hashed("EBOOT.BIN");
        assert!(npd.is_header_valid(&RETAIL_KEYS, &KLIC, "EBOOT.BIN"));
    }

    #[test]
    fn wrong_klicensee_or_filename_is_invalid() {
        let npd = hashed("EBOOT.BIN");

        let mut other = KLIC;
        other[15] ^= 0xFF;
        assert!(!npd.is_header_valid(&RETAIL_KEYS, &other, "EBOOT.BIN"));
        assert!(!npd.is_header_valid(&RETAIL_KEYS, &KLIC, "eboot.bin"));
        assert!(!npd.is_free_header_valid(&RETAIL_KEYS, "EBOOT.BIN"));
    }

    #[test]
    fn tampered_prefix_breaks_header_hash() {
        let mut npd = hashed("DATA.EDAT");
        npd.qa_digest[0] ^= 1;
        assert!(!npd.is_header_valid(&RETAIL_KEYS, &KLIC, "DATA.EDAT"));
    }

    #[test]
    fn free_klicensee() {
        let mut npd = NpdHeader::new(CONTENT_ID, NpdDrmType::Free, NpdAppType::Executable, [0; 16]);
        npd.hash_header(&RETAIL_KEYS, &RETAIL_KEYS.npdrm_free_klicensee, "EBOOT.BIN");
        assert!(npd.is_free_header_valid(&RETAIL_KEYS, "EBOOT.BIN"));
    }

    #[test]
    fn rejects_short_buffer_and_bad_magic() {
        assert!(matches!(
            NpdHeader::parse(&[0u8; 0x40]),
            Err(NpdError::BufferTooSmall {
                needed: 0x80,
                available: 0x40
            })
        ));

        let parsed = NpdHeader::parse(&[0u8; 0x80]).unwrap();
        assert!(matches!(
            parsed.validate(),
            Err(NpdError::InvalidMagic { .. })
        ));
    }
}
