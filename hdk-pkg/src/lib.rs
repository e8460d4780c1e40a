//! PS3 retail PKG handling
//!
//! Reads and writes retail (`0x8000`) PS3 packages: the plaintext header
//! and metadata with their digest envelopes, the AES-128-CTR body holding
//! the item table, names and file data, and the trailing SHA-1 footer.
//! NPD license headers found at the start of protected files can be
//! checked against a klicensee.

pub mod crypto;
pub mod error;
pub mod keys;
pub mod npdrm;
pub mod options;
pub mod pkg;

// Re-export main types for convenience
pub use error::{NpdError, PkgError, PkgWriteError};
pub use keys::{PkgKeys, RETAIL_KEYS};
pub use npdrm::NpdHeader;
pub use options::{ExtractOptions, ExtractOptionsBuilder};
pub use pkg::{PkgArchive, PkgBuilder};
