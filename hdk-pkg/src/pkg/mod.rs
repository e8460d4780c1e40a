//! PS3 retail PKG reader and writer.
//!
//! The body is AES-128-CTR encrypted; header and metadata each carry a
//! CMAC/ECDSA/SHA-1 digest and the file ends with a SHA-1 footer.

pub mod digest;
pub mod path;
pub mod reader;
pub mod structs;
pub mod writer;

pub use digest::{DigestCheck, generate_digest, validate_digest};
pub use reader::{Items, PkgArchive, PkgItemReader};
pub use structs::{
    PKG_DEFAULT_IV, PKG_MAGIC, PkgContentType, PkgDrmType, PkgFileEntry, PkgFileFlag, PkgFlag,
    PkgHeader, PkgItem, PkgMetadata, PkgMetadataEntry, PkgMetadataType,
};
pub use writer::PkgBuilder;
